use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{info, warn};

use super::{
    claims::Role,
    dto::{ChangePasswordRequest, SignInRequest, SignUpRequest},
    jwt::{IssuedSession, JwtKeys},
    lockout::LoginGovernor,
    password::{hash_password, verify_password},
    repo::UserStore,
    repo_types::{NewUser, User, UserChanges},
};
use crate::error::{ApiError, ApiResult};

pub const MAX_USERNAME_LEN: usize = 20;
pub const MIN_SIGNUP_PASSWORD_LEN: usize = 8;
pub const MIN_CHANGED_PASSWORD_LEN: usize = 6;
pub const SEED_ADMIN_USERNAME: &str = "admin";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Role granted at signup. Elevated roles need an admin caller, and the
/// seeded `admin` username is never handed out to anonymous callers.
fn granted_role(req: &SignUpRequest, caller: Option<Role>) -> ApiResult<Role> {
    if req.username.eq_ignore_ascii_case(SEED_ADMIN_USERNAME) && caller != Some(Role::Admin) {
        return Err(ApiError::forbidden("Username is reserved"));
    }
    let requested = match req.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        None => None,
        Some(raw) => Some(
            Role::parse(raw).ok_or_else(|| ApiError::validation(format!("Unknown role {raw:?}")))?,
        ),
    };
    match requested {
        Some(Role::User) | None => Ok(Role::User),
        Some(role) if caller == Some(Role::Admin) => Ok(role),
        Some(role) => Err(ApiError::forbidden(format!(
            "Only admin can assign {role} role"
        ))),
    }
}

pub async fn sign_up(
    users: &dyn UserStore,
    mut req: SignUpRequest,
    caller: Option<Role>,
) -> ApiResult<User> {
    req.username = req.username.trim().to_string();
    req.email = req.email.trim().to_lowercase();

    if req.username.is_empty() {
        return Err(ApiError::validation("Username is required"));
    }
    if req.username.chars().count() > MAX_USERNAME_LEN {
        return Err(ApiError::validation(format!(
            "Username must be at most {MAX_USERNAME_LEN} characters"
        )));
    }
    if req.password.len() < MIN_SIGNUP_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "Password must be at least {MIN_SIGNUP_PASSWORD_LEN} characters"
        )));
    }
    if !req.email.is_empty() && !is_valid_email(&req.email) {
        return Err(ApiError::validation("Invalid email"));
    }

    let role = granted_role(&req, caller)?;

    if users.find_by_username(&req.username).await?.is_some() {
        warn!(username = %req.username, "username already registered");
        return Err(ApiError::Conflict("Username is already registered".into()));
    }

    let user = users
        .create(NewUser {
            first_name: req.first_name,
            last_name: req.last_name,
            username: req.username,
            email: req.email,
            phone: req.phone,
            password_hash: hash_password(&req.password)?,
            role,
            force_password_change: false,
        })
        .await?;
    info!(user_id = user.id, username = %user.username, %role, "user registered");
    Ok(user)
}

pub struct SignedIn {
    pub user: User,
    pub session: IssuedSession,
}

/// Lock check, credential check, counter update, token issue.
pub async fn sign_in(
    users: &dyn UserStore,
    governor: &LoginGovernor,
    keys: &JwtKeys,
    req: &SignInRequest,
    now: OffsetDateTime,
) -> ApiResult<SignedIn> {
    let username = req.username.trim();
    if username.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("Username and password are required"));
    }

    if let Err(lock) = governor.check(username, now) {
        warn!(username, until = %lock.until, "signin rejected while locked");
        return Err(ApiError::TooManyAttempts {
            until: lock.until,
            retry_after_secs: lock.retry_after_secs(now),
        });
    }

    let found = users.find_by_username(username).await?;
    let verified = match &found {
        Some(u) => verify_password(&req.password, &u.password_hash)?,
        None => false,
    };
    let user = match found {
        Some(u) if verified => u,
        found => {
            warn!(username, known = found.is_some(), "signin with invalid credentials");
            governor.record_failure(username, now);
            return Err(ApiError::InvalidCredentials("Invalid credentials"));
        }
    };

    if user.locked {
        warn!(user_id = user.id, "signin refused for locked account");
        return Err(ApiError::forbidden("Account is locked"));
    }

    governor.record_success(username);
    let session = keys.issue(user.id, &user.username, user.role())?;
    info!(user_id = user.id, role = %user.role(), "user signed in");
    Ok(SignedIn { user, session })
}

pub async fn change_password(
    users: &dyn UserStore,
    user_id: i64,
    req: ChangePasswordRequest,
) -> ApiResult<()> {
    let user = users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if !user.force_password_change && !verify_password(&req.current_password, &user.password_hash)? {
        return Err(ApiError::InvalidCredentials("Current password is incorrect"));
    }
    if req.new_password.len() < MIN_CHANGED_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "New password must be at least {MIN_CHANGED_PASSWORD_LEN} characters long"
        )));
    }

    users
        .update(
            user_id,
            UserChanges {
                password_hash: Some(hash_password(&req.new_password)?),
                force_password_change: Some(false),
                ..Default::default()
            },
        )
        .await?;
    info!(user_id, "password changed");
    Ok(())
}

/// Creates the `admin` account on first start; it must change its password.
pub async fn seed_admin(users: &dyn UserStore, password: &str) -> anyhow::Result<()> {
    if users.find_by_username(SEED_ADMIN_USERNAME).await?.is_some() {
        return Ok(());
    }
    users
        .create(NewUser {
            first_name: "Administrator".into(),
            last_name: String::new(),
            username: SEED_ADMIN_USERNAME.into(),
            email: String::new(),
            phone: String::new(),
            password_hash: hash_password(password)?,
            role: Role::Admin,
            force_password_change: true,
        })
        .await?;
    info!("seeded admin account");
    Ok(())
}
