use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument};

use crate::{
    auth::{claims::ALL_ADMINS, guarded},
    error::ApiResult,
    state::AppState,
};

const KEY: &str = "marquee";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Marquee {
    #[serde(default)]
    pub message: String,
}

pub fn routes(state: &AppState) -> Router<AppState> {
    let public = Router::new().route("/marquee", get(get_marquee));
    let admins = Router::new().route("/marquee", post(set_marquee));
    public.merge(guarded(state, ALL_ADMINS, admins))
}

#[instrument(skip(state))]
pub async fn get_marquee(State(state): State<AppState>) -> ApiResult<Json<Marquee>> {
    Ok(Json(super::load(&state.db, KEY).await?))
}

#[instrument(skip(state, body))]
pub async fn set_marquee(
    State(state): State<AppState>,
    Json(body): Json<Marquee>,
) -> ApiResult<Json<Value>> {
    let marquee = Marquee {
        message: body.message.trim().to_string(),
    };
    super::save(&state.db, KEY, &marquee).await?;
    info!(len = marquee.message.len(), "marquee updated");
    Ok(Json(json!({ "message": "Marquee updated", "marquee": marquee.message })))
}
