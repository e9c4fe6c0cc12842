use axum::Router;

use crate::state::AppState;

pub mod frames;
pub mod handlers;
pub mod notifier;
pub mod registry;
pub mod repo;
pub mod socket;

pub use registry::ChatHub;

pub fn router(state: &AppState) -> Router<AppState> {
    handlers::routes(state)
}
