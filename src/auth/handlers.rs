use axum::{
    extract::{FromRef, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument};

use super::{
    claims::MEMBERS,
    dto::{
        ChangePasswordRequest, MessageResponse, ProfileResponse, SignInRequest, SignInResponse,
        SignUpRequest, TokenResponse,
    },
    extractors::{auth_token, caller_role, AuthUser},
    guarded,
    jwt::{JwtKeys, TokenError},
    services,
};
use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

pub fn routes(state: &AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/signup", post(sign_up))
        .route("/signin", post(sign_in))
        .route("/auth/token", get(current_token))
        .route("/logout", get(logout));

    let members = Router::new()
        .route("/change-password", post(change_password))
        .route("/profile", get(profile));

    public.merge(guarded(state, MEMBERS, members))
}

fn cookie_headers(values: [axum::http::HeaderValue; 2]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for v in values {
        headers.append(SET_COOKIE, v);
    }
    headers
}

#[instrument(skip(state, headers, payload), fields(username = %payload.username))]
pub async fn sign_up(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SignUpRequest>,
) -> ApiResult<impl IntoResponse> {
    let keys = JwtKeys::from_ref(&state);
    let caller = caller_role(&keys, &headers);
    services::sign_up(state.users.as_ref(), payload, caller).await?;
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new("Sign-up successful")),
    ))
}

#[instrument(skip(state, payload), fields(username = %payload.username))]
pub async fn sign_in(
    State(state): State<AppState>,
    Json(payload): Json<SignInRequest>,
) -> ApiResult<impl IntoResponse> {
    let keys = JwtKeys::from_ref(&state);
    let signed = services::sign_in(
        state.users.as_ref(),
        &state.governor,
        &keys,
        &payload,
        OffsetDateTime::now_utc(),
    )
    .await?;

    let cookies = keys
        .session_cookies(&signed.session)
        .map_err(|e| ApiError::Internal(e.into()))?;
    let role = signed.user.role();
    let body = SignInResponse {
        token_type: "Bearer",
        token: signed.session.token,
        id: signed.user.id,
        name: signed.user.first_name,
        role: role.as_str().to_string(),
        redirect_url: role.redirect_url(),
        force_password_change: signed.user.force_password_change,
    };
    Ok((cookie_headers(cookies), Json(body)))
}

/// Echoes the caller's current token if it is still valid.
#[instrument(skip_all)]
pub async fn current_token(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<TokenResponse>> {
    let token = auth_token(&headers).ok_or(ApiError::Unauthorized("MissingToken"))?;
    match JwtKeys::from_ref(&state).validate(&token) {
        Ok(_) => Ok(Json(TokenResponse { token })),
        Err(TokenError::Expired) => Err(ApiError::Unauthorized("SessionExpired")),
        Err(_) => Err(ApiError::Unauthorized("InvalidToken")),
    }
}

#[instrument(skip_all)]
pub async fn logout(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let cookies = JwtKeys::from_ref(&state)
        .clearing_cookies()
        .map_err(|e| ApiError::Internal(e.into()))?;
    Ok((
        cookie_headers(cookies),
        Json(MessageResponse::new("Logout successful")),
    ))
}

#[instrument(skip(state, payload), fields(user_id = ctx.user_id))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    services::change_password(state.users.as_ref(), ctx.user_id, payload).await?;
    Ok(Json(MessageResponse {
        message: "Password changed successfully",
        redirect_url: Some("/"),
    }))
}

#[instrument(skip(state), fields(user_id = ctx.user_id))]
pub async fn profile(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
) -> ApiResult<Json<ProfileResponse>> {
    let user = state
        .users
        .find_by_id(ctx.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    info!(user_id = user.id, "profile read");
    Ok(Json(ProfileResponse {
        id: user.id,
        first_name: user.first_name,
        last_name: user.last_name,
        username: user.username,
        email: user.email,
        phone: user.phone,
        role: user.role,
    }))
}
