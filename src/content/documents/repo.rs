use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;

use super::repo_types::{DocKind, Document, NewDocument};

const DOC_COLUMNS: &str = "id, name, file_name, file_path, file_type, created_at";

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list(&self, kind: DocKind) -> anyhow::Result<Vec<Document>>;
    async fn find(&self, kind: DocKind, id: i64) -> anyhow::Result<Option<Document>>;
    async fn insert(&self, kind: DocKind, doc: &NewDocument) -> anyhow::Result<Document>;
    async fn save(&self, kind: DocKind, doc: &Document) -> anyhow::Result<bool>;
    async fn delete(&self, kind: DocKind, id: i64) -> anyhow::Result<bool>;
    /// Other rows of `kind` stored under `key`.
    async fn references(&self, kind: DocKind, key: &str, excluding: i64) -> anyhow::Result<i64>;
}

#[derive(Clone)]
pub struct PgDocumentStore {
    db: PgPool,
}

impl PgDocumentStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn list(&self, kind: DocKind) -> anyhow::Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, Document>(&format!(
            "SELECT {DOC_COLUMNS} FROM {} ORDER BY created_at DESC, id DESC",
            kind.table()
        ))
        .fetch_all(&self.db)
        .await
        .with_context(|| format!("list {}", kind.table()))?;
        Ok(rows)
    }

    async fn find(&self, kind: DocKind, id: i64) -> anyhow::Result<Option<Document>> {
        let row = sqlx::query_as::<_, Document>(&format!(
            "SELECT {DOC_COLUMNS} FROM {} WHERE id = $1",
            kind.table()
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .with_context(|| format!("find {} {id}", kind.slug()))?;
        Ok(row)
    }

    async fn insert(&self, kind: DocKind, doc: &NewDocument) -> anyhow::Result<Document> {
        let row = sqlx::query_as::<_, Document>(&format!(
            r#"
            INSERT INTO {} (name, file_name, file_path, file_type)
            VALUES ($1, $2, $3, $4)
            RETURNING {DOC_COLUMNS}
            "#,
            kind.table()
        ))
        .bind(&doc.name)
        .bind(&doc.file_name)
        .bind(&doc.file_path)
        .bind(&doc.file_type)
        .fetch_one(&self.db)
        .await
        .with_context(|| format!("insert {}", kind.slug()))?;
        Ok(row)
    }

    async fn save(&self, kind: DocKind, doc: &Document) -> anyhow::Result<bool> {
        let res = sqlx::query(&format!(
            "UPDATE {} SET name = $2, file_name = $3, file_path = $4, file_type = $5 WHERE id = $1",
            kind.table()
        ))
        .bind(doc.id)
        .bind(&doc.name)
        .bind(&doc.file_name)
        .bind(&doc.file_path)
        .bind(&doc.file_type)
        .execute(&self.db)
        .await
        .with_context(|| format!("update {} {}", kind.slug(), doc.id))?;
        Ok(res.rows_affected() > 0)
    }

    async fn delete(&self, kind: DocKind, id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", kind.table()))
            .bind(id)
            .execute(&self.db)
            .await
            .with_context(|| format!("delete {} {id}", kind.slug()))?;
        Ok(res.rows_affected() > 0)
    }

    async fn references(&self, kind: DocKind, key: &str, excluding: i64) -> anyhow::Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE file_path = $1 AND id <> $2",
            kind.table()
        ))
        .bind(key)
        .bind(excluding)
        .fetch_one(&self.db)
        .await
        .with_context(|| format!("count references to {key}"))?;
        Ok(count)
    }
}

#[cfg(test)]
pub use memory::MemoryDocumentStore;
