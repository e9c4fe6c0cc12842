use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, instrument};

use super::{
    registry::ChatIdentity,
    repo::{ChatMessage, UserSocket},
    socket::ws_handler,
};
use crate::{
    auth::{
        claims::{ADMIN_ONLY, MEMBERS},
        guarded, AuthUser,
    },
    error::{ApiError, ApiResult},
    state::AppState,
};

pub fn routes(state: &AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/ws", get(ws_handler))
        .route("/usersockets", get(list_user_sockets))
        .route("/usersocket/:key", get(user_socket_by_username));

    let admin = Router::new()
        .route("/usersocket/:key", delete(delete_user_socket))
        .route("/chat/online", get(online))
        .route("/messages", get(list_messages))
        .route("/message/:id", get(get_message).delete(delete_message))
        .route("/messages/delete-many", post(delete_many));

    let members = Router::new().route("/messages/:username", get(messages_of));

    public
        .merge(guarded(state, ADMIN_ONLY, admin))
        .merge(guarded(state, MEMBERS, members))
}

#[derive(Debug, Deserialize)]
pub struct DeleteManyRequest {
    pub ids: Vec<i64>,
}

#[instrument(skip(state))]
pub async fn list_user_sockets(State(state): State<AppState>) -> ApiResult<Json<Vec<UserSocket>>> {
    Ok(Json(UserSocket::list(&state.db).await?))
}

#[instrument(skip(state))]
pub async fn user_socket_by_username(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<UserSocket>> {
    UserSocket::by_username(&state.db, &username)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("User not found"))
}

#[instrument(skip(state))]
pub async fn delete_user_socket(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    if !UserSocket::delete(&state.db, id).await? {
        return Err(ApiError::not_found("id not found"));
    }
    Ok(Json(json!({ "message": "Deleted successful" })))
}

/// Identities currently connected to the chat.
#[instrument(skip(state))]
pub async fn online(State(state): State<AppState>) -> ApiResult<Json<Vec<ChatIdentity>>> {
    Ok(Json(state.chat.snapshot().await?))
}

#[instrument(skip(state))]
pub async fn list_messages(State(state): State<AppState>) -> ApiResult<Json<Vec<ChatMessage>>> {
    Ok(Json(ChatMessage::list(&state.db).await?))
}

#[instrument(skip(state))]
pub async fn get_message(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ChatMessage>> {
    ChatMessage::find(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Message not found"))
}

#[instrument(skip(state))]
pub async fn delete_message(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    if !ChatMessage::delete(&state.db, id).await? {
        return Err(ApiError::not_found("id not found"));
    }
    Ok(Json(json!({ "message": "Deleted successful" })))
}

#[instrument(skip(state, payload))]
pub async fn delete_many(
    State(state): State<AppState>,
    Json(payload): Json<DeleteManyRequest>,
) -> ApiResult<Json<Value>> {
    if payload.ids.is_empty() {
        return Err(ApiError::validation("No message ids given"));
    }
    let deleted = ChatMessage::delete_many(&state.db, &payload.ids).await?;
    info!(deleted, "chat messages deleted");
    Ok(Json(json!({ "message": "Deleted successful", "deleted": deleted })))
}

/// A member's own history; admins may read anyone's.
#[instrument(skip(state), fields(caller = %ctx.username))]
pub async fn messages_of(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    Path(username): Path<String>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    if ctx.username != username && !ctx.is_admin() {
        return Err(ApiError::forbidden("Access Denied"));
    }
    Ok(Json(ChatMessage::by_sender(&state.db, &username).await?))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header::COOKIE, Request, StatusCode},
    };
    use tower::ServiceExt;

    use crate::{
        app::build_app,
        auth::{jwt::JwtKeys, Role},
        state::AppState,
    };

    fn cookie_for(state: &AppState, username: &str, role: Role) -> String {
        let issued = JwtKeys::new(&state.config.jwt)
            .issue(9, username, role)
            .unwrap();
        format!("auth_token={}; session_id={}", issued.token, issued.session_id)
    }

    #[tokio::test]
    async fn foreign_history_is_forbidden_for_members() {
        let state = AppState::fake();
        let cookie = cookie_for(&state, "bob", Role::User);
        let app = build_app(state);
        let req = Request::get("/messages/carol")
            .header(COOKIE, cookie)
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn chat_admin_routes_reject_non_admins() {
        let state = AppState::fake();
        let cookie = cookie_for(&state, "hr", Role::AdminHr);
        let app = build_app(state);
        let req = Request::get("/messages")
            .header(COOKIE, cookie)
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admin_sees_online_snapshot() {
        let state = AppState::fake();
        let cookie = cookie_for(&state, "root", Role::Admin);
        let app = build_app(state);
        let req = Request::get("/chat/online")
            .header(COOKIE, cookie)
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
