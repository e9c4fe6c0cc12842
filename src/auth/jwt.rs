use axum::{
    extract::FromRef,
    http::{header::InvalidHeaderValue, HeaderValue},
};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::claims::{Claims, Role};
use crate::{config::JwtConfig, state::AppState};

pub const AUTH_COOKIE: &str = "auth_token";
pub const SESSION_COOKIE: &str = "session_id";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token malformed")]
    Malformed,
    #[error("token signature invalid")]
    InvalidSignature,
}

/// Signing/verification keys plus token and cookie lifetimes.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    pub issuer: String,
    pub ttl: Duration,
    pub session_ttl: Duration,
    pub cookie_secure: bool,
}

/// A freshly signed token and its companion session id.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub session_id: String,
    pub expires_at: OffsetDateTime,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        JwtKeys::new(&state.config.jwt)
    }
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            ttl: Duration::minutes(cfg.ttl_minutes),
            session_ttl: Duration::hours(cfg.session_ttl_hours),
            cookie_secure: cfg.cookie_secure,
        }
    }

    pub fn issue(&self, user_id: i64, username: &str, role: Role) -> anyhow::Result<IssuedSession> {
        self.issue_at(user_id, username, role, OffsetDateTime::now_utc())
    }

    pub fn issue_at(
        &self,
        user_id: i64,
        username: &str,
        role: Role,
        now: OffsetDateTime,
    ) -> anyhow::Result<IssuedSession> {
        let expires_at = now + self.ttl;
        let claims = Claims {
            user_id,
            username: username.to_string(),
            role: role.as_str().to_string(),
            iss: self.issuer.clone(),
            exp: expires_at.unix_timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        debug!(user_id, %role, "jwt signed");
        Ok(IssuedSession {
            token,
            session_id: Uuid::new_v4().to_string(),
            expires_at,
        })
    }

    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_at(token, OffsetDateTime::now_utc())
    }

    /// Accepts a token strictly before its `exp`; at or after it the token is `Expired`.
    pub fn validate_at(&self, token: &str, now: OffsetDateTime) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.set_required_spec_claims(&["exp", "iss"]);

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                _ => TokenError::Malformed,
            }
        })?;

        if data.claims.exp <= now.unix_timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(data.claims)
    }

    pub fn session_cookies(
        &self,
        issued: &IssuedSession,
    ) -> Result<[HeaderValue; 2], InvalidHeaderValue> {
        Ok([
            cookie(AUTH_COOKIE, &issued.token, self.ttl.whole_seconds(), self.cookie_secure)?,
            cookie(
                SESSION_COOKIE,
                &issued.session_id,
                self.session_ttl.whole_seconds(),
                self.cookie_secure,
            )?,
        ])
    }

    pub fn clearing_cookies(&self) -> Result<[HeaderValue; 2], InvalidHeaderValue> {
        Ok([
            cookie(AUTH_COOKIE, "", 0, self.cookie_secure)?,
            cookie(SESSION_COOKIE, "", 0, self.cookie_secure)?,
        ])
    }
}

fn cookie(
    name: &str,
    value: &str,
    max_age: i64,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}
