use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;

use super::claims::Role;

/// User record in the database.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub phone: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // argon2, never exposed
    pub role: String,
    pub force_password_change: bool,
    pub locked: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl User {
    /// Unknown stored roles degrade to `user`.
    pub fn role(&self) -> Role {
        Role::parse(&self.role).unwrap_or(Role::User)
    }
}

/// Fields for a new account; the password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub phone: String,
    pub password_hash: String,
    pub role: Role,
    pub force_password_change: bool,
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: Option<Role>,
    pub password_hash: Option<String>,
    pub force_password_change: Option<bool>,
    pub locked: Option<bool>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.username.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.role.is_none()
            && self.password_hash.is_none()
            && self.force_password_change.is_none()
            && self.locked.is_none()
    }

    pub fn apply(self, user: &mut User) {
        if let Some(v) = self.first_name {
            user.first_name = v;
        }
        if let Some(v) = self.last_name {
            user.last_name = v;
        }
        if let Some(v) = self.username {
            user.username = v;
        }
        if let Some(v) = self.email {
            user.email = v;
        }
        if let Some(v) = self.phone {
            user.phone = v;
        }
        if let Some(v) = self.role {
            user.role = v.as_str().to_string();
        }
        if let Some(v) = self.password_hash {
            user.password_hash = v;
        }
        if let Some(v) = self.force_password_change {
            user.force_password_change = v;
        }
        if let Some(v) = self.locked {
            user.locked = v;
        }
    }
}

/// Public directory entry served without authentication.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DirectoryEntry {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}
