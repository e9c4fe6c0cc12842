use axum::{middleware::from_fn_with_state, Router};

use crate::state::AppState;

pub mod claims;
pub mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod lockout;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;

pub use claims::Role;
pub use extractors::{AuthUser, SessionContext};

/// Puts `routes` behind the role guard for `allowed`.
pub fn guarded(
    state: &AppState,
    allowed: &'static [Role],
    routes: Router<AppState>,
) -> Router<AppState> {
    routes.route_layer(from_fn_with_state(
        extractors::RoleGuard::new(state, allowed),
        extractors::require_role,
    ))
}

pub fn router(state: &AppState) -> Router<AppState> {
    handlers::routes(state)
}
