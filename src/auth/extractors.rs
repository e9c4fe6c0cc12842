use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{
        header::{AUTHORIZATION, COOKIE},
        request::Parts,
        HeaderMap,
    },
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use super::{
    claims::Role,
    jwt::{JwtKeys, TokenError, AUTH_COOKIE, SESSION_COOKIE},
};
use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Identity of the caller, placed in request extensions by [`require_role`].
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
    pub session_id: String,
}

impl SessionContext {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// State for one guarded route group.
#[derive(Clone)]
pub struct RoleGuard {
    keys: JwtKeys,
    allowed: &'static [Role],
}

impl RoleGuard {
    pub fn new(state: &AppState, allowed: &'static [Role]) -> Self {
        Self {
            keys: JwtKeys::new(&state.config.jwt),
            allowed,
        }
    }

    /// Token first, then session id, then role; the role is never looked at
    /// for an unauthenticated request.
    pub fn authorize(&self, headers: &HeaderMap) -> ApiResult<SessionContext> {
        let token = auth_token(headers).ok_or(ApiError::Unauthorized("MissingToken"))?;
        let claims = self.keys.validate(&token).map_err(|e| match e {
            TokenError::Expired => ApiError::Unauthorized("SessionExpired"),
            TokenError::Malformed | TokenError::InvalidSignature => {
                ApiError::Unauthorized("InvalidToken")
            }
        })?;
        let session_id = read_cookie(headers, SESSION_COOKIE)
            .ok_or(ApiError::Unauthorized("Missing session ID"))?;

        match Role::parse(&claims.role) {
            Some(role) if self.allowed.contains(&role) => Ok(SessionContext {
                user_id: claims.user_id,
                username: claims.username,
                role,
                session_id,
            }),
            _ => {
                warn!(username = %claims.username, role = %claims.role, "role not allowed");
                Err(ApiError::forbidden("Access Denied"))
            }
        }
    }
}

pub async fn require_role(
    State(guard): State<RoleGuard>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx = guard.authorize(req.headers())?;
    debug!(user_id = ctx.user_id, role = %ctx.role, "request authorized");
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// Role of an optional, valid `auth_token` on an otherwise public route.
pub fn caller_role(keys: &JwtKeys, headers: &HeaderMap) -> Option<Role> {
    let token = auth_token(headers)?;
    let claims = keys.validate(&token).ok()?;
    Role::parse(&claims.role)
}

/// `auth_token` cookie, falling back to a Bearer header.
pub fn auth_token(headers: &HeaderMap) -> Option<String> {
    read_cookie(headers, AUTH_COOKIE).or_else(|| bearer_token(headers))
}

pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Caller identity for handlers behind [`require_role`].
pub struct AuthUser(pub SessionContext);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionContext>()
            .cloned()
            .map(AuthUser)
            .ok_or(ApiError::Unauthorized("MissingToken"))
    }
}
