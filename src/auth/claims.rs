use std::fmt;

use serde::{Deserialize, Serialize};

/// Portal roles. Flat: `admin` is listed explicitly wherever admins are allowed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
    #[serde(rename = "adminhr")]
    AdminHr,
    #[serde(rename = "adminit")]
    AdminIt,
}

impl Role {
    /// Lenient parse used on token claims and request bodies: trims and lowercases.
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim().to_lowercase().as_str() {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            "adminhr" => Some(Role::AdminHr),
            "adminit" => Some(Role::AdminIt),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::AdminHr => "adminhr",
            Role::AdminIt => "adminit",
        }
    }

    /// Landing page after signin.
    pub fn redirect_url(self) -> &'static str {
        match self {
            Role::Admin | Role::AdminHr => "/admin",
            Role::AdminIt => "/admin/it-knowledge",
            Role::User => "/",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const ADMIN_ONLY: &[Role] = &[Role::Admin];
pub const IT_ADMINS: &[Role] = &[Role::Admin, Role::AdminIt];
pub const HR_ADMINS: &[Role] = &[Role::Admin, Role::AdminHr];
pub const ALL_ADMINS: &[Role] = &[Role::Admin, Role::AdminHr, Role::AdminIt];
pub const MEMBERS: &[Role] = &[Role::User, Role::AdminIt, Role::Admin, Role::AdminHr];

/// JWT payload carried in the `auth_token` cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub username: String,
    pub role: String, // raw; normalized by the guard
    pub iss: String,
    pub exp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_case_and_whitespace() {
        assert_eq!(Role::parse(" Admin "), Some(Role::Admin));
        assert_eq!(Role::parse("ADMINIT"), Some(Role::AdminIt));
        assert_eq!(Role::parse("root"), None);
    }

    #[test]
    fn redirects_per_role() {
        assert_eq!(Role::Admin.redirect_url(), "/admin");
        assert_eq!(Role::AdminIt.redirect_url(), "/admin/it-knowledge");
        assert_eq!(Role::AdminHr.redirect_url(), "/admin");
        assert_eq!(Role::User.redirect_url(), "/");
    }

    #[test]
    fn serde_uses_lowercase_names() {
        assert_eq!(serde_json::to_string(&Role::AdminHr).unwrap(), "\"adminhr\"");
        let r: Role = serde_json::from_str("\"adminit\"").unwrap();
        assert_eq!(r, Role::AdminIt);
    }
}
