use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;

use super::repo_types::{Post, PostDraft, PostKind};

const POST_COLUMNS: &str =
    "id, title, content, role_access, thumbnail, images, video, gif, pdf, created_at, updated_at";

#[async_trait]
pub trait PostStore: Send + Sync {
    async fn list(&self, kind: PostKind) -> anyhow::Result<Vec<Post>>;
    async fn find(&self, kind: PostKind, id: i64) -> anyhow::Result<Option<Post>>;
    async fn insert(&self, kind: PostKind, draft: &PostDraft) -> anyhow::Result<Post>;
    async fn update(&self, kind: PostKind, id: i64, draft: &PostDraft)
        -> anyhow::Result<Option<Post>>;
    async fn delete(&self, kind: PostKind, id: i64) -> anyhow::Result<bool>;
    /// Rows of `kind` pointing at `key`, leaving out row `excluding`.
    async fn references(
        &self,
        kind: PostKind,
        key: &str,
        excluding: Option<i64>,
    ) -> anyhow::Result<i64>;
}

#[derive(Clone)]
pub struct PgPostStore {
    db: PgPool,
}

impl PgPostStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PostStore for PgPostStore {
    async fn list(&self, kind: PostKind) -> anyhow::Result<Vec<Post>> {
        let rows = sqlx::query_as::<_, Post>(&format!(
            "SELECT {POST_COLUMNS} FROM {} ORDER BY created_at DESC, id DESC",
            kind.table()
        ))
        .fetch_all(&self.db)
        .await
        .with_context(|| format!("list {}", kind.table()))?;
        Ok(rows)
    }

    async fn find(&self, kind: PostKind, id: i64) -> anyhow::Result<Option<Post>> {
        let row = sqlx::query_as::<_, Post>(&format!(
            "SELECT {POST_COLUMNS} FROM {} WHERE id = $1",
            kind.table()
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .with_context(|| format!("find {} {id}", kind.slug()))?;
        Ok(row)
    }

    async fn insert(&self, kind: PostKind, draft: &PostDraft) -> anyhow::Result<Post> {
        let row = sqlx::query_as::<_, Post>(&format!(
            r#"
            INSERT INTO {} (title, content, role_access, thumbnail, images, video, gif, pdf)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {POST_COLUMNS}
            "#,
            kind.table()
        ))
        .bind(&draft.title)
        .bind(&draft.content)
        .bind(&draft.role_access)
        .bind(&draft.thumbnail)
        .bind(&draft.images)
        .bind(&draft.video)
        .bind(&draft.gif)
        .bind(&draft.pdf)
        .fetch_one(&self.db)
        .await
        .with_context(|| format!("insert {}", kind.slug()))?;
        Ok(row)
    }

    async fn update(
        &self,
        kind: PostKind,
        id: i64,
        draft: &PostDraft,
    ) -> anyhow::Result<Option<Post>> {
        let row = sqlx::query_as::<_, Post>(&format!(
            r#"
            UPDATE {}
            SET title = $2, content = $3, role_access = $4, thumbnail = $5, images = $6,
                video = $7, gif = $8, pdf = $9, updated_at = now()
            WHERE id = $1
            RETURNING {POST_COLUMNS}
            "#,
            kind.table()
        ))
        .bind(id)
        .bind(&draft.title)
        .bind(&draft.content)
        .bind(&draft.role_access)
        .bind(&draft.thumbnail)
        .bind(&draft.images)
        .bind(&draft.video)
        .bind(&draft.gif)
        .bind(&draft.pdf)
        .fetch_optional(&self.db)
        .await
        .with_context(|| format!("update {} {id}", kind.slug()))?;
        Ok(row)
    }

    async fn delete(&self, kind: PostKind, id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", kind.table()))
            .bind(id)
            .execute(&self.db)
            .await
            .with_context(|| format!("delete {} {id}", kind.slug()))?;
        Ok(res.rows_affected() > 0)
    }

    async fn references(
        &self,
        kind: PostKind,
        key: &str,
        excluding: Option<i64>,
    ) -> anyhow::Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!(
            r#"
            SELECT COUNT(*) FROM {}
            WHERE ($2::BIGINT IS NULL OR id <> $2)
              AND (thumbnail = $1 OR video = $1 OR gif = $1 OR pdf = $1 OR $1 = ANY(images))
            "#,
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
pub use memory::MemoryPostStore;
