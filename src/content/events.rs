use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use super::{form::FormData, ics, UPLOAD_LIMIT};
use crate::{
    auth::{claims::HR_ADMINS, guarded},
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Kind given to events imported from a calendar file.
pub const IMPORTED_KIND: &str = "holiday";

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Event {
    pub id: i64,
    pub title: String,
    #[serde(with = "time::serde::rfc3339")]
    #[sqlx(rename = "start_at")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    #[sqlx(rename = "end_at")]
    pub end: OffsetDateTime,
    pub description: String,
    pub location: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct EventInput {
    #[serde(default)]
    pub title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

impl EventInput {
    fn validate(&self) -> ApiResult<()> {
        if self.title.trim().is_empty() {
            return Err(ApiError::validation("Title is required"));
        }
        if self.end < self.start {
            return Err(ApiError::validation("end must not be before start"));
        }
        Ok(())
    }
}

const EVENT_COLUMNS: &str = "id, title, start_at, end_at, description, location, kind";

impl Event {
    pub async fn list(db: &PgPool) -> anyhow::Result<Vec<Event>> {
        let rows = sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events ORDER BY start_at, id"
        ))
        .fetch_all(db)
        .await
        .context("list events")?;
        Ok(rows)
    }

    pub async fn find(db: &PgPool, id: i64) -> anyhow::Result<Option<Event>> {
        let row = sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await
        .context("find event")?;
        Ok(row)
    }

    pub async fn insert(
        db: &PgPool,
        title: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
        description: &str,
        location: &str,
        kind: &str,
    ) -> anyhow::Result<Event> {
        let row = sqlx::query_as::<_, Event>(&format!(
            r#"
            INSERT INTO events (title, start_at, end_at, description, location, kind)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(title)
        .bind(start)
        .bind(end)
        .bind(description)
        .bind(location)
        .bind(kind)
        .fetch_one(db)
        .await
        .context("insert event")?;
        Ok(row)
    }

    pub async fn replace(db: &PgPool, id: i64, input: &EventInput) -> anyhow::Result<Option<Event>> {
        let row = sqlx::query_as::<_, Event>(&format!(
            r#"
            UPDATE events
            SET title = $2, start_at = $3, end_at = $4, description = $5, location = $6, kind = $7
            WHERE id = $1
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(input.title.trim())
        .bind(input.start)
        .bind(input.end)
        .bind(&input.description)
        .bind(&input.location)
        .bind(&input.kind)
        .fetch_optional(db)
        .await
        .context("update event")?;
        Ok(row)
    }

    pub async fn delete(db: &PgPool, id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(db)
            .await
            .context("delete event")?;
        Ok(res.rows_affected() > 0)
    }
}

pub fn routes(state: &AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/events", get(list_events))
        .route("/event/:id", get(get_event));

    let writers = Router::new()
        .route("/event", post(create_event))
        .route("/event/:id", put(update_event).delete(delete_event))
        .route(
            "/upload-ics",
            post(upload_ics).layer(DefaultBodyLimit::max(UPLOAD_LIMIT)),
        );

    public.merge(guarded(state, HR_ADMINS, writers))
}

#[instrument(skip(state))]
pub async fn list_events(State(state): State<AppState>) -> ApiResult<Json<Vec<Event>>> {
    Ok(Json(Event::list(&state.db).await?))
}

#[instrument(skip(state))]
pub async fn get_event(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Event>> {
    Event::find(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Event not found"))
}

#[instrument(skip(state))]
pub async fn create_event(
    State(state): State<AppState>,
    Json(input): Json<EventInput>,
) -> ApiResult<(StatusCode, Json<Event>)> {
    input.validate()?;
    let event = Event::insert(
        &state.db,
        input.title.trim(),
        input.start,
        input.end,
        &input.description,
        &input.location,
        &input.kind,
    )
    .await?;
    info!(id = event.id, "event created");
    Ok((StatusCode::CREATED, Json(event)))
}

#[instrument(skip(state))]
pub async fn update_event(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<EventInput>,
) -> ApiResult<Json<Event>> {
    input.validate()?;
    Event::replace(&state.db, id, &input)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Event not found"))
}

#[instrument(skip(state))]
pub async fn delete_event(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    if !Event::delete(&state.db, id).await? {
        return Err(ApiError::not_found("Event not found"));
    }
    Ok(Json(json!({ "message": "Event deleted" })))
}

/// Imports every complete VEVENT of the uploaded calendar as a holiday.
#[instrument(skip(state, mp))]
pub async fn upload_ics(State(state): State<AppState>, mp: Multipart) -> ApiResult<Json<Value>> {
    let form = FormData::read(mp).await?;
    let upload = form
        .file("file")
        .ok_or_else(|| ApiError::validation("No file uploaded"))?;
    let parsed = ics::parse(&upload.bytes).map_err(|e| {
        warn!(error = %e, file = %upload.file_name, "calendar rejected");
        ApiError::validation(format!("Failed to parse .ics file: {e}"))
    })?;

    let mut inserted = 0usize;
    for ev in &parsed {
        Event::insert(
            &state.db,
            &ev.summary,
            ev.start,
            ev.end,
            &ev.description,
            &ev.location,
            IMPORTED_KIND,
        )
        .await?;
        inserted += 1;
    }
    info!(inserted, "calendar imported");
    Ok(Json(json!({ "message": "Upload successful", "events_inserted": inserted })))
}
