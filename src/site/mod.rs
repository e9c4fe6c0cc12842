//! Site-wide singletons editable by admins: the marquee banner and the
//! popup gallery. Each lives as one JSON document in `site_settings`.

use anyhow::Context;
use axum::Router;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{types::Json, PgPool};

use crate::state::AppState;

pub mod marquee;
pub mod popup;

pub fn router(state: &AppState) -> Router<AppState> {
    marquee::routes(state).merge(popup::routes(state))
}

/// Stored document for `key`, or `T::default()` when never written.
pub async fn load<T>(db: &PgPool, key: &str) -> anyhow::Result<T>
where
    T: DeserializeOwned + Default + Send + Unpin + 'static,
{
    let row: Option<Json<T>> = sqlx::query_scalar("SELECT value FROM site_settings WHERE key = $1")
        .bind(key)
        .fetch_optional(db)
        .await
        .with_context(|| format!("load setting {key}"))?;
    Ok(row.map(|Json(v)| v).unwrap_or_default())
}

pub async fn save<T>(db: &PgPool, key: &str, value: &T) -> anyhow::Result<()>
where
    T: Serialize + Sync,
{
    sqlx::query(
        r#"
        INSERT INTO site_settings (key, value, updated_at)
        VALUES ($1, $2, now())
        ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
        "#,
    )
    .bind(key)
    .bind(Json(value))
    .execute(db)
    .await
    .with_context(|| format!("save setting {key}"))?;
    Ok(())
}
