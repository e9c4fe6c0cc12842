use axum::{
    extract::{Path, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{info, instrument};

use super::{dto::UpdateUserRequest, services};
use crate::{
    auth::{
        claims::{ADMIN_ONLY, ALL_ADMINS, MEMBERS},
        guarded,
        repo_types::{DirectoryEntry, User},
        AuthUser,
    },
    error::{ApiError, ApiResult},
    state::AppState,
};

pub fn routes(state: &AppState) -> Router<AppState> {
    let public = Router::new().route("/nusers", get(directory));

    let admins = Router::new()
        .route("/users", get(list_users))
        .route("/user/:id", get(get_user));

    let admin_only = Router::new()
        .route("/user/:id", delete(delete_user))
        .route("/userunlock/:username", post(unlock_user));

    let members = Router::new().route("/user/:id", put(update_user));

    public
        .merge(guarded(state, ALL_ADMINS, admins))
        .merge(guarded(state, ADMIN_ONLY, admin_only))
        .merge(guarded(state, MEMBERS, members))
}

#[instrument(skip(state))]
pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.users.list().await?))
}

#[instrument(skip(state))]
pub async fn get_user(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<User>> {
    state
        .users
        .find_by_id(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("User not found"))
}

#[instrument(skip(state, payload), fields(caller = %ctx.username))]
pub async fn update_user(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateUserRequest>,
) -> ApiResult<Json<Value>> {
    services::update_user(state.users.as_ref(), &ctx, id, payload).await?;
    Ok(Json(json!({ "message": "Updated successful" })))
}

#[instrument(skip(state))]
pub async fn delete_user(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    if !state.users.delete(id).await? {
        return Err(ApiError::not_found("User not found"));
    }
    info!(user_id = id, "user deleted");
    Ok(Json(json!({ "message": "Deleted successful" })))
}

#[instrument(skip(state))]
pub async fn unlock_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<Value>> {
    services::unlock_user(state.users.as_ref(), &state.governor, &username).await?;
    Ok(Json(json!({ "message": format!("User {username} unlocked") })))
}

/// Contact directory; served without login.
#[instrument(skip(state))]
pub async fn directory(State(state): State<AppState>) -> ApiResult<Json<Vec<DirectoryEntry>>> {
    let entries = state.users.directory().await?;
    if entries.is_empty() {
        return Err(ApiError::not_found("No users found"));
    }
    Ok(Json(entries))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{
            header::{CONTENT_TYPE, COOKIE},
            Request, StatusCode,
        },
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::{
        app::build_app,
        auth::{jwt::JwtKeys, Role},
        state::AppState,
    };

    fn cookie_for(state: &AppState, id: i64, username: &str, role: Role) -> String {
        let issued = JwtKeys::new(&state.config.jwt).issue(id, username, role).unwrap();
        format!("auth_token={}; session_id={}", issued.token, issued.session_id)
    }

    async fn signup(app: &axum::Router, username: &str) {
        let req = Request::post("/signup")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"username": username, "password": "long-enough-1", "first_name": username})
                    .to_string(),
            ))
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn directory_is_public_and_hides_credentials() {
        let state = AppState::fake();
        let app = build_app(state);

        let res = app
            .clone()
            .oneshot(Request::get("/nusers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        signup(&app, "carol").await;
        let res = app
            .oneshot(Request::get("/nusers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(&to_bytes(res.into_body(), usize::MAX).await.unwrap()).unwrap();
        assert_eq!(body[0]["first_name"], "carol");
        assert!(body[0].get("password_hash").is_none());
        assert!(body[0].get("username").is_none());
    }

    #[tokio::test]
    async fn user_listing_needs_an_admin_and_delete_needs_admin() {
        let state = AppState::fake();
        let member = cookie_for(&state, 5, "dave", Role::User);
        let hr = cookie_for(&state, 6, "hr", Role::AdminHr);
        let app = build_app(state);
        signup(&app, "dave").await;

        let res = app
            .clone()
            .oneshot(Request::get("/users").header(COOKIE, member).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = app
            .clone()
            .oneshot(Request::get("/users").header(COOKIE, hr.clone()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app
            .oneshot(Request::delete("/user/1").header(COOKIE, hr).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn member_updates_own_profile() {
        let state = AppState::fake();
        let app = build_app(state.clone());
        signup(&app, "erin").await;
        let me = cookie_for(&state, 1, "erin", Role::User);

        let req = Request::put("/user/1")
            .header(COOKIE, me)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"last_name": "Smith"}).to_string()))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let stored = state.users.find_by_id(1).await.unwrap().unwrap();
        assert_eq!(stored.last_name, "Smith");
    }
}
