use axum::Router;

use crate::state::AppState;

pub mod dto;
pub mod handlers;
pub mod repo;
pub mod repo_types;
pub mod services;

pub use repo::{PgPostStore, PostStore};
pub use repo_types::PostKind;

pub fn router(state: &AppState) -> Router<AppState> {
    handlers::routes(state)
}
