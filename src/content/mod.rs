use axum::Router;

use crate::state::AppState;

pub mod announcements;
pub mod attachments;
pub mod documents;
pub mod events;
pub mod form;
pub mod ics;
pub mod links;
pub mod posts;

/// Request body cap for routes that accept uploads.
pub const UPLOAD_LIMIT: usize = 20 * 1024 * 1024; // 20MB

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(posts::router(state))
        .merge(documents::routes(state))
        .merge(announcements::routes(state))
        .merge(links::routes(state))
        .merge(events::routes(state))
}
