use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::HeaderMap,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{client_ip, parse_period, Period, PeriodQuery};
use crate::{
    auth::{
        claims::{ALL_ADMINS, MEMBERS},
        guarded, AuthUser,
    },
    error::{ApiError, ApiResult},
    state::AppState,
};

const TOP_VISITORS: i64 = 5;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Visit {
    pub id: Uuid,
    pub username: String,
    pub user_ip: String,
    pub session_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    /// Seconds; zero until the visit is closed.
    pub duration: i64,
}

#[derive(Debug, Serialize, FromRow)]
pub struct VisitorCount {
    pub username: String,
    pub count: i64,
}

impl Visit {
    pub async fn insert(
        db: &PgPool,
        username: &str,
        user_ip: &str,
        session_id: &str,
    ) -> anyhow::Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO visits (id, username, user_ip, session_id, start_time)
            VALUES ($1, $2, $3, $4, now())
            "#,
        )
        .bind(id)
        .bind(username)
        .bind(user_ip)
        .bind(session_id)
        .execute(db)
        .await
        .context("insert visit")?;
        Ok(id)
    }

    /// Closes the latest visit of `session_id`; `None` when there is none.
    pub async fn close_latest(db: &PgPool, session_id: &str) -> anyhow::Result<Option<i64>> {
        let duration: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE visits
            SET end_time = now(),
                duration = GREATEST(0, EXTRACT(EPOCH FROM (now() - start_time)))::BIGINT
            WHERE id = (
                SELECT id FROM visits WHERE session_id = $1 ORDER BY start_time DESC LIMIT 1
            )
            RETURNING duration
            "#,
        )
        .bind(session_id)
        .fetch_optional(db)
        .await
        .context("close visit")?;
        Ok(duration)
    }

    pub async fn count(db: &PgPool) -> anyhow::Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM visits")
            .fetch_one(db)
            .await
            .context("count visits")?;
        Ok(n)
    }

    pub async fn list(db: &PgPool) -> anyhow::Result<Vec<Visit>> {
        let rows = sqlx::query_as::<_, Visit>(
            r#"
            SELECT id, username, user_ip, session_id, start_time, end_time, duration
            FROM visits
            ORDER BY start_time DESC
            "#,
        )
        .fetch_all(db)
        .await
        .context("list visits")?;
        Ok(rows)
    }

    /// Mean duration over every recorded visit, open ones counting as zero.
    pub async fn avg_duration(db: &PgPool) -> anyhow::Result<f64> {
        let avg: Option<f64> =
            sqlx::query_scalar("SELECT AVG(duration)::DOUBLE PRECISION FROM visits")
                .fetch_one(db)
                .await
                .context("average visit duration")?;
        Ok(avg.unwrap_or(0.0))
    }

    pub async fn top_usernames(db: &PgPool, period: Period, limit: i64) -> anyhow::Result<Vec<VisitorCount>> {
        let rows = sqlx::query_as::<_, VisitorCount>(
            r#"
            SELECT username, COUNT(*) AS count
            FROM visits
            WHERE start_time >= $1 AND start_time < $2
            GROUP BY username
            ORDER BY count DESC, username
            LIMIT $3
            "#,
        )
        .bind(period.start)
        .bind(period.end)
        .bind(limit)
        .fetch_all(db)
        .await
        .context("top visitors")?;
        Ok(rows)
    }

    pub async fn delete(db: &PgPool, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM visits WHERE id = $1")
            .bind(id)
            .execute(db)
            .await
            .context("delete visit")?;
        Ok(res.rows_affected() > 0)
    }
}

pub fn routes(state: &AppState) -> Router<AppState> {
    let public = Router::new().route("/visitors", get(total_visitors));

    let members = Router::new()
        .route("/visit", post(record_visit))
        .route("/exit", post(record_exit))
        .route("/topvisitors", get(top_visitors));

    let admins = Router::new()
        .route("/allvisitors", get(all_visitors))
        .route("/avg-duration", get(avg_duration))
        .route("/visit/:id", delete(delete_visit));

    public
        .merge(guarded(state, MEMBERS, members))
        .merge(guarded(state, ALL_ADMINS, admins))
}

#[instrument(skip(state, headers, peer), fields(username = %ctx.username))]
pub async fn record_visit(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> ApiResult<Json<Value>> {
    let ip = client_ip(&headers, peer.map(|ConnectInfo(a)| a));
    let id = Visit::insert(&state.db, &ctx.username, &ip, &ctx.session_id).await?;
    debug!(%id, %ip, "visit recorded");
    Ok(Json(json!({ "message": "Visit recorded", "session_id": ctx.session_id })))
}

#[instrument(skip(state), fields(username = %ctx.username))]
pub async fn record_exit(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
) -> ApiResult<Json<Value>> {
    if ctx.session_id.is_empty() {
        return Ok(Json(json!({ "message": "No session ID, skip recording" })));
    }
    match Visit::close_latest(&state.db, &ctx.session_id).await? {
        Some(duration) => Ok(Json(json!({ "message": "Exit recorded", "duration": duration }))),
        None => Ok(Json(json!({ "message": "No visit found for session, skip recording" }))),
    }
}

#[instrument(skip(state))]
pub async fn total_visitors(State(state): State<AppState>) -> ApiResult<Json<i64>> {
    Ok(Json(Visit::count(&state.db).await?))
}

#[instrument(skip(state))]
pub async fn all_visitors(State(state): State<AppState>) -> ApiResult<Json<Vec<Visit>>> {
    Ok(Json(Visit::list(&state.db).await?))
}

#[instrument(skip(state))]
pub async fn avg_duration(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let avg = Visit::avg_duration(&state.db).await?;
    Ok(Json(json!({ "avg_duration": avg })))
}

#[instrument(skip(state))]
pub async fn top_visitors(
    State(state): State<AppState>,
    Query(q): Query<PeriodQuery>,
) -> ApiResult<Json<Vec<VisitorCount>>> {
    let period = parse_period(&q)?;
    Ok(Json(Visit::top_usernames(&state.db, period, TOP_VISITORS).await?))
}

#[instrument(skip(state))]
pub async fn delete_visit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = Uuid::parse_str(&id).map_err(|_| ApiError::validation("Invalid ID format"))?;
    if !Visit::delete(&state.db, id).await? {
        return Err(ApiError::not_found("ID not found"));
    }
    Ok(Json(json!({ "message": "Deleted successfully" })))
}
