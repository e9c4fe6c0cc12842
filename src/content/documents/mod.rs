use axum::Router;

use crate::state::AppState;

pub mod handlers;
pub mod repo;
pub mod repo_types;
pub mod services;

pub use repo::{DocumentStore, PgDocumentStore};
pub use repo_types::{DocKind, Document, DocumentView};

pub fn routes(state: &AppState) -> Router<AppState> {
    handlers::routes(state)
}
