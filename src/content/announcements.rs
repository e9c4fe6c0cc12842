use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use tracing::{info, instrument};

use super::documents::{DocKind, DocumentView};
use crate::{
    auth::{claims::HR_ADMINS, guarded},
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Clone, FromRow)]
pub struct Announcement {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub file_id: Option<i64>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct AnnouncementView {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub file_id: Option<i64>,
    pub file: Option<DocumentView>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
pub struct AnnouncementInput {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    /// `0` detaches the file.
    #[serde(default)]
    pub file_id: Option<i64>,
}

impl Announcement {
    pub async fn list(db: &PgPool) -> anyhow::Result<Vec<Announcement>> {
        let rows = sqlx::query_as::<_, Announcement>(
            "SELECT id, title, content, file_id, created_at FROM announcements ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(db)
        .await
        .context("list announcements")?;
        Ok(rows)
    }

    pub async fn find(db: &PgPool, id: i64) -> anyhow::Result<Option<Announcement>> {
        let row = sqlx::query_as::<_, Announcement>(
            "SELECT id, title, content, file_id, created_at FROM announcements WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(db)
        .await
        .context("find announcement")?;
        Ok(row)
    }

    pub async fn insert(
        db: &PgPool,
        title: &str,
        content: &str,
        file_id: Option<i64>,
    ) -> anyhow::Result<Announcement> {
        let row = sqlx::query_as::<_, Announcement>(
            r#"
            INSERT INTO announcements (title, content, file_id)
            VALUES ($1, $2, $3)
            RETURNING id, title, content, file_id, created_at
            "#,
        )
        .bind(title)
        .bind(content)
        .bind(file_id)
        .fetch_one(db)
        .await
        .context("insert announcement")?;
        Ok(row)
    }

    pub async fn save(&self, db: &PgPool) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "UPDATE announcements SET title = $2, content = $3, file_id = $4 WHERE id = $1",
        )
        .bind(self.id)
        .bind(&self.title)
        .bind(&self.content)
        .bind(self.file_id)
        .execute(db)
        .await
        .context("update announcement")?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn delete(db: &PgPool, id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM announcements WHERE id = $1")
            .bind(id)
            .execute(db)
            .await
            .context("delete announcement")?;
        Ok(res.rows_affected() > 0)
    }

    /// Embeds the referenced file, if it still exists.
    pub async fn view(self, state: &AppState) -> anyhow::Result<AnnouncementView> {
        let file = match self.file_id {
            Some(fid) => match state.documents.find(DocKind::File, fid).await? {
                Some(doc) => Some(doc.view(state).await?),
                None => None,
            },
            None => None,
        };
        Ok(AnnouncementView {
            id: self.id,
            title: self.title,
            content: self.content,
            file_id: self.file_id,
            file,
            created_at: self.created_at,
        })
    }
}

pub fn routes(state: &AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/announcements", get(list_announcements))
        .route("/announcement/:id", get(get_announcement));

    let writers = Router::new()
        .route("/announcement", post(create_announcement))
        .route(
            "/announcement/:id",
            put(update_announcement).delete(delete_announcement),
        );

    public.merge(guarded(state, HR_ADMINS, writers))
}

/// `None` and `0` both mean "no file"; anything else must exist.
async fn checked_file_id(state: &AppState, file_id: Option<i64>) -> ApiResult<Option<i64>> {
    match file_id.filter(|id| *id != 0) {
        Some(id) => {
            if state.documents.find(DocKind::File, id).await?.is_none() {
                return Err(ApiError::validation("File not found"));
            }
            Ok(Some(id))
        }
        None => Ok(None),
    }
}

#[instrument(skip(state))]
pub async fn list_announcements(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<AnnouncementView>>> {
    let rows = Announcement::list(&state.db).await?;
    let mut out = Vec::with_capacity(rows.len());
    for a in rows {
        out.push(a.view(&state).await?);
    }
    Ok(Json(out))
}

#[instrument(skip(state))]
pub async fn get_announcement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<AnnouncementView>> {
    let row = Announcement::find(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Announcement not found"))?;
    Ok(Json(row.view(&state).await?))
}

#[instrument(skip(state, payload))]
pub async fn create_announcement(
    State(state): State<AppState>,
    Json(payload): Json<AnnouncementInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let title = payload
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::validation("Title is required"))?;
    let file_id = checked_file_id(&state, payload.file_id).await?;

    let row = Announcement::insert(
        &state.db,
        title,
        payload.content.as_deref().unwrap_or_default(),
        file_id,
    )
    .await?;
    info!(id = row.id, "announcement created");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Upload Announcement successful", "id": row.id })),
    ))
}

#[instrument(skip(state, payload))]
pub async fn update_announcement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<AnnouncementInput>,
) -> ApiResult<Json<Value>> {
    let mut row = Announcement::find(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Announcement not found"))?;

    if let Some(title) = payload.title.filter(|t| !t.trim().is_empty()) {
        row.title = title.trim().to_string();
    }
    if let Some(content) = payload.content {
        row.content = content;
    }
    if payload.file_id.is_some() {
        row.file_id = checked_file_id(&state, payload.file_id).await?;
    }

    if !row.save(&state.db).await? {
        return Err(ApiError::not_found("Announcement not found"));
    }
    Ok(Json(json!({ "message": "Updated successful" })))
}

#[instrument(skip(state))]
pub async fn delete_announcement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    if !Announcement::delete(&state.db, id).await? {
        return Err(ApiError::not_found("Announcement not found"));
    }
    Ok(Json(json!({ "message": "Deleted successful" })))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{
            header::{CONTENT_TYPE, COOKIE},
            Request, StatusCode,
        },
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::{
        app::build_app,
        auth::{jwt::JwtKeys, Role},
        state::AppState,
    };

    #[tokio::test]
    async fn blank_title_is_rejected_before_touching_the_database() {
        let state = AppState::fake();
        let issued = JwtKeys::new(&state.config.jwt).issue(2, "hr", Role::AdminHr).unwrap();
        let app = build_app(state);

        let req = Request::post("/announcement")
            .header(COOKIE, format!("auth_token={}; session_id={}", issued.token, issued.session_id))
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"title":"  ","content":"x"}"#))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&to_bytes(res.into_body(), usize::MAX).await.unwrap()).unwrap();
        assert_eq!(body["error"], "Title is required");
    }
}
