//! Quick links and the grouped link sections shown on the portal front page.

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
use tracing::{info, instrument};

use crate::{
    auth::{claims::ADMIN_ONLY, guarded},
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Link {
    pub id: i64,
    pub name: String,
    pub link_url: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Section {
    pub id: i64,
    pub name: String,
    pub name_link: String,
    pub link_url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LinkInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub link_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SectionInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub name_link: Option<String>,
    #[serde(default)]
    pub link_url: Option<String>,
}

fn filled(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl LinkInput {
    fn required(&self) -> ApiResult<(String, String)> {
        match (filled(&self.name), filled(&self.link_url)) {
            (Some(name), Some(url)) => Ok((name, url)),
            _ => Err(ApiError::validation("name and link_url are required")),
        }
    }
}

impl SectionInput {
    fn required(&self) -> ApiResult<(String, String, String)> {
        let name = filled(&self.name).ok_or_else(|| ApiError::validation("name is required"))?;
        Ok((
            name,
            filled(&self.name_link).unwrap_or_default(),
            filled(&self.link_url).unwrap_or_default(),
        ))
    }
}

impl Link {
    pub async fn list(db: &PgPool) -> anyhow::Result<Vec<Link>> {
        let rows = sqlx::query_as::<_, Link>("SELECT id, name, link_url FROM links ORDER BY id")
            .fetch_all(db)
            .await
            .context("list links")?;
        Ok(rows)
    }

    pub async fn find(db: &PgPool, id: i64) -> anyhow::Result<Option<Link>> {
        let row = sqlx::query_as::<_, Link>("SELECT id, name, link_url FROM links WHERE id = $1")
            .bind(id)
            .fetch_optional(db)
            .await
            .context("find link")?;
        Ok(row)
    }

    pub async fn insert(db: &PgPool, name: &str, link_url: &str) -> anyhow::Result<Link> {
        let row = sqlx::query_as::<_, Link>(
            "INSERT INTO links (name, link_url) VALUES ($1, $2) RETURNING id, name, link_url",
        )
        .bind(name)
        .bind(link_url)
        .fetch_one(db)
        .await
        .context("insert link")?;
        Ok(row)
    }

    pub async fn save(&self, db: &PgPool) -> anyhow::Result<bool> {
        let res = sqlx::query("UPDATE links SET name = $2, link_url = $3 WHERE id = $1")
            .bind(self.id)
            .bind(&self.name)
            .bind(&self.link_url)
            .execute(db)
            .await
            .context("update link")?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn delete(db: &PgPool, id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM links WHERE id = $1")
            .bind(id)
            .execute(db)
            .await
            .context("delete link")?;
        Ok(res.rows_affected() > 0)
    }
}

impl Section {
    pub async fn list(db: &PgPool) -> anyhow::Result<Vec<Section>> {
        let rows = sqlx::query_as::<_, Section>(
            "SELECT id, name, name_link, link_url FROM sections ORDER BY id",
        )
        .fetch_all(db)
        .await
        .context("list sections")?;
        Ok(rows)
    }

    pub async fn find(db: &PgPool, id: i64) -> anyhow::Result<Option<Section>> {
        let row = sqlx::query_as::<_, Section>(
            "SELECT id, name, name_link, link_url FROM sections WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(db)
        .await
        .context("find section")?;
        Ok(row)
    }

    pub async fn insert(
        db: &PgPool,
        name: &str,
        name_link: &str,
        link_url: &str,
    ) -> anyhow::Result<Section> {
        let row = sqlx::query_as::<_, Section>(
            r#"
            INSERT INTO sections (name, name_link, link_url)
            VALUES ($1, $2, $3)
            RETURNING id, name, name_link, link_url
            "#,
        )
        .bind(name)
        .bind(name_link)
        .bind(link_url)
        .fetch_one(db)
        .await
        .context("insert section")?;
        Ok(row)
    }

    pub async fn save(&self, db: &PgPool) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "UPDATE sections SET name = $2, name_link = $3, link_url = $4 WHERE id = $1",
        )
        .bind(self.id)
        .bind(&self.name)
        .bind(&self.name_link)
        .bind(&self.link_url)
        .execute(db)
        .await
        .context("update section")?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn delete(db: &PgPool, id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM sections WHERE id = $1")
            .bind(id)
            .execute(db)
            .await
            .context("delete section")?;
        Ok(res.rows_affected() > 0)
    }
}

pub fn routes(state: &AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/links", get(list_links))
        .route("/link/:id", get(get_link))
        .route("/sections", get(list_sections))
        .route("/section/:id", get(get_section));

    let admin = Router::new()
        .route("/link", post(create_link))
        .route("/link/:id", put(update_link).delete(delete_link))
        .route("/section", post(create_section))
        .route("/section/:id", put(update_section).delete(delete_section));

    public.merge(guarded(state, ADMIN_ONLY, admin))
}

#[instrument(skip(state))]
pub async fn list_links(State(state): State<AppState>) -> ApiResult<Json<Vec<Link>>> {
    Ok(Json(Link::list(&state.db).await?))
}

#[instrument(skip(state))]
pub async fn get_link(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Link>> {
    Link::find(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Link not found"))
}

#[instrument(skip(state))]
pub async fn create_link(
    State(state): State<AppState>,
    Json(payload): Json<LinkInput>,
) -> ApiResult<(StatusCode, Json<Link>)> {
    let (name, url) = payload.required()?;
    let link = Link::insert(&state.db, &name, &url).await?;
    info!(id = link.id, "link created");
    Ok((StatusCode::CREATED, Json(link)))
}

#[instrument(skip(state))]
pub async fn update_link(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<LinkInput>,
) -> ApiResult<Json<Link>> {
    let mut link = Link::find(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Link not found"))?;
    if let Some(name) = filled(&payload.name) {
        link.name = name;
    }
    if let Some(url) = filled(&payload.link_url) {
        link.link_url = url;
    }
    if !link.save(&state.db).await? {
        return Err(ApiError::not_found("Link not found"));
    }
    Ok(Json(link))
}

#[instrument(skip(state))]
pub async fn delete_link(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    if !Link::delete(&state.db, id).await? {
        return Err(ApiError::not_found("Link not found"));
    }
    Ok(Json(json!({ "message": "Deleted successful" })))
}

#[instrument(skip(state))]
pub async fn list_sections(State(state): State<AppState>) -> ApiResult<Json<Vec<Section>>> {
    Ok(Json(Section::list(&state.db).await?))
}

#[instrument(skip(state))]
pub async fn get_section(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Section>> {
    Section::find(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Section not found"))
}

#[instrument(skip(state))]
pub async fn create_section(
    State(state): State<AppState>,
    Json(payload): Json<SectionInput>,
) -> ApiResult<(StatusCode, Json<Section>)> {
    let (name, name_link, link_url) = payload.required()?;
    let section = Section::insert(&state.db, &name, &name_link, &link_url).await?;
    info!(id = section.id, "section created");
    Ok((StatusCode::CREATED, Json(section)))
}

#[instrument(skip(state))]
pub async fn update_section(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<SectionInput>,
) -> ApiResult<Json<Section>> {
    let mut section = Section::find(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Section not found"))?;
    if let Some(name) = filled(&payload.name) {
        section.name = name;
    }
    if let Some(name_link) = filled(&payload.name_link) {
        section.name_link = name_link;
    }
    if let Some(url) = filled(&payload.link_url) {
        section.link_url = url;
    }
    if !section.save(&state.db).await? {
        return Err(ApiError::not_found("Section not found"));
    }
    Ok(Json(section))
}

#[instrument(skip(state))]
pub async fn delete_section(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    if !Section::delete(&state.db, id).await? {
        return Err(ApiError::not_found("Section not found"));
    }
    Ok(Json(json!({ "message": "Deleted successful" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_needs_name_and_url() {
        let input = LinkInput {
            name: Some("Intranet".into()),
            link_url: Some("   ".into()),
        };
        assert!(matches!(input.required(), Err(ApiError::Validation(_))));

        let input = LinkInput {
            name: Some(" HR ".into()),
            link_url: Some("https://hr.example".into()),
        };
        let (name, url) = input.required().unwrap();
        assert_eq!(name, "HR");
        assert_eq!(url, "https://hr.example");
    }

    #[test]
    fn section_only_requires_a_name() {
        let (name, name_link, url) = SectionInput {
            name: Some("Forms".into()),
            ..SectionInput::default()
        }
        .required()
        .unwrap();
        assert_eq!((name.as_str(), name_link.as_str(), url.as_str()), ("Forms", "", ""));
        assert!(SectionInput::default().required().is_err());
    }
}
