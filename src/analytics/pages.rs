use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use tracing::{debug, instrument};

use super::{parse_period, Period, PeriodQuery};
use crate::{
    auth::{
        claims::{ALL_ADMINS, MEMBERS},
        guarded, AuthUser,
    },
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Sections whose hits are counted.
pub const TRACKED_PAGES: [&str; 8] = [
    "activity",
    "announcement",
    "it-knowledge",
    "article",
    "security",
    "regulation",
    "training",
    "calendar",
];

/// `/article/12` -> `article`; `None` for untracked sections.
pub fn page_name(path: &str) -> Option<&'static str> {
    let first = path.split('/').nth(1)?;
    TRACKED_PAGES.iter().copied().find(|p| *p == first)
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PageVisit {
    pub id: i64,
    pub username: String,
    pub page_name: String,
    pub page_path: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize, FromRow)]
pub struct PageCount {
    pub page_name: String,
    pub count: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageHit {
    #[serde(default)]
    pub page_path: String,
}

impl PageVisit {
    pub async fn insert(db: &PgPool, username: &str, page: &str, path: &str) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO page_visits (username, page_name, page_path) VALUES ($1, $2, $3)")
            .bind(username)
            .bind(page)
            .bind(path)
            .execute(db)
            .await
            .context("insert page visit")?;
        Ok(())
    }

    pub async fn list(db: &PgPool) -> anyhow::Result<Vec<PageVisit>> {
        let rows = sqlx::query_as::<_, PageVisit>(
            r#"
            SELECT id, username, page_name, page_path, created_at
            FROM page_visits
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(db)
        .await
        .context("list page visits")?;
        Ok(rows)
    }

    pub async fn top_pages(db: &PgPool, period: Period) -> anyhow::Result<Vec<PageCount>> {
        let rows = sqlx::query_as::<_, PageCount>(
            r#"
            SELECT page_name, COUNT(*) AS count
            FROM page_visits
            WHERE created_at >= $1 AND created_at < $2
            GROUP BY page_name
            ORDER BY count DESC, page_name
            "#,
        )
        .bind(period.start)
        .bind(period.end)
        .fetch_all(db)
        .await
        .context("top pages")?;
        Ok(rows)
    }

    pub async fn delete(db: &PgPool, id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM page_visits WHERE id = $1")
            .bind(id)
            .execute(db)
            .await
            .context("delete page visit")?;
        Ok(res.rows_affected() > 0)
    }
}

pub fn routes(state: &AppState) -> Router<AppState> {
    let members = Router::new()
        .route("/pagevisitors", post(log_page_visit).get(all_page_visits))
        .route("/toppagevisitors", get(top_pages));

    let admins = Router::new().route("/pagevisit/:id", delete(delete_page_visit));

    guarded(state, MEMBERS, members).merge(guarded(state, ALL_ADMINS, admins))
}

/// Untracked sections are acknowledged with 204 and not stored.
#[instrument(skip(state, body), fields(username = %ctx.username))]
pub async fn log_page_visit(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    body: Result<Json<PageHit>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(hit) = body.map_err(|_| ApiError::validation("Invalid request body"))?;
    let path = hit.page_path.trim();
    if path.is_empty() {
        return Err(ApiError::validation("pagePath is required"));
    }
    let Some(page) = page_name(path) else {
        debug!(%path, "untracked page");
        return Ok(StatusCode::NO_CONTENT.into_response());
    };
    PageVisit::insert(&state.db, &ctx.username, page, path).await?;
    Ok(Json(json!({ "message": "logvisitpage saved" })).into_response())
}

#[instrument(skip(state))]
pub async fn all_page_visits(State(state): State<AppState>) -> ApiResult<Json<Vec<PageVisit>>> {
    Ok(Json(PageVisit::list(&state.db).await?))
}

#[instrument(skip(state))]
pub async fn top_pages(
    State(state): State<AppState>,
    Query(q): Query<PeriodQuery>,
) -> ApiResult<Json<Vec<PageCount>>> {
    let period = parse_period(&q)?;
    Ok(Json(PageVisit::top_pages(&state.db, period).await?))
}

#[instrument(skip(state))]
pub async fn delete_page_visit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    if !PageVisit::delete(&state.db, id).await? {
        return Err(ApiError::not_found("ID not found"));
    }
    Ok(Json(json!({ "message": "Deleted successful" })))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{
            header::{CONTENT_TYPE, COOKIE},
            Request,
        },
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{
        app::build_app,
        auth::{jwt::JwtKeys, Role},
    };

    fn cookie(state: &AppState, role: Role) -> String {
        let issued = JwtKeys::new(&state.config.jwt).issue(3, "frank", role).unwrap();
        format!("auth_token={}; session_id={}", issued.token, issued.session_id)
    }

    #[test]
    fn page_name_takes_first_segment() {
        assert_eq!(page_name("/article/12"), Some("article"));
        assert_eq!(page_name("/it-knowledge"), Some("it-knowledge"));
        assert_eq!(page_name("/calendar?m=3"), None);
        assert_eq!(page_name("/admin/users"), None);
        assert_eq!(page_name("article"), None);
    }

    #[test]
    fn page_visit_rows_carry_the_requested_path() {
        let row = PageVisit {
            id: 7,
            username: "frank".into(),
            page_name: page_name("/article/12").unwrap().into(),
            page_path: "/article/12".into(),
            created_at: time::macros::datetime!(2025-03-01 8:30 UTC),
        };
        let v = serde_json::to_value(&row).unwrap();
        assert_eq!(v["page_name"], "article");
        assert_eq!(v["page_path"], "/article/12");
        assert_eq!(v["created_at"], "2025-03-01T08:30:00Z");
    }

    async fn post_hit(body: &str, role: Role) -> StatusCode {
        let state = AppState::fake();
        let cookie = cookie(&state, role);
        let app = build_app(state);
        let req = Request::post("/pagevisitors")
            .header(COOKIE, cookie.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        app.oneshot(req).await.unwrap().status()
    }

    #[tokio::test]
    async fn page_hits_are_validated_before_storage() {
        assert_eq!(post_hit(r#"{"pagePath": ""}"#, Role::User).await, StatusCode::BAD_REQUEST);
        assert_eq!(post_hit("not json", Role::User).await, StatusCode::BAD_REQUEST);
        assert_eq!(
            post_hit(r#"{"pagePath": "/dashboard"}"#, Role::User).await,
            StatusCode::NO_CONTENT
        );
    }

    #[tokio::test]
    async fn top_lists_reject_bad_periods() {
        let state = AppState::fake();
        let cookie = cookie(&state, Role::User);
        let app = build_app(state);
        for uri in ["/toppagevisitors?month=13&year=2024", "/topvisitors?month=a&year=2024"] {
            let req = Request::get(uri)
                .header(COOKIE, cookie.clone())
                .body(Body::empty())
                .unwrap();
            assert_eq!(app.clone().oneshot(req).await.unwrap().status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn visit_delete_rejects_malformed_ids() {
        let state = AppState::fake();
        let cookie = cookie(&state, Role::Admin);
        let app = build_app(state);
        let req = Request::delete("/visit/not-a-uuid")
            .header(COOKIE, cookie.clone())
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.oneshot(req).await.unwrap().status(), StatusCode::BAD_REQUEST);
    }
}
