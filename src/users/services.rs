use tracing::info;

use super::dto::UpdateUserRequest;
use crate::{
    auth::{
        lockout::LoginGovernor,
        password::hash_password,
        repo::UserStore,
        repo_types::{User, UserChanges},
        services::{is_valid_email, MAX_USERNAME_LEN, MIN_CHANGED_PASSWORD_LEN},
        Role, SessionContext,
    },
    error::{ApiError, ApiResult},
};

fn filled(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Applies a profile edit. Members may edit themselves; admins anyone.
/// Role and the force-password-change flag are admin-only.
pub async fn update_user(
    users: &dyn UserStore,
    caller: &SessionContext,
    id: i64,
    req: UpdateUserRequest,
) -> ApiResult<User> {
    if caller.user_id != id && !caller.is_admin() {
        return Err(ApiError::forbidden("Access Denied"));
    }
    let current = users
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let mut changes = UserChanges {
        first_name: filled(req.first_name),
        last_name: filled(req.last_name),
        phone: filled(req.phone),
        ..UserChanges::default()
    };

    if let Some(email) = filled(req.email).map(|e| e.to_lowercase()) {
        if !is_valid_email(&email) {
            return Err(ApiError::validation("Invalid email"));
        }
        changes.email = Some(email);
    }

    if let Some(username) = filled(req.username).filter(|u| *u != current.username) {
        if username.chars().count() > MAX_USERNAME_LEN {
            return Err(ApiError::validation(format!(
                "Username must be at most {MAX_USERNAME_LEN} characters"
            )));
        }
        if users.find_by_username(&username).await?.is_some() {
            return Err(ApiError::Conflict("Username is already registered".into()));
        }
        changes.username = Some(username);
    }

    if let Some(raw) = filled(req.role) {
        let role = Role::parse(&raw)
            .ok_or_else(|| ApiError::validation(format!("Unknown role {raw:?}")))?;
        if role != current.role() {
            if !caller.is_admin() {
                return Err(ApiError::forbidden("Only admin can change role"));
            }
            changes.role = Some(role);
        }
    }

    if let Some(flag) = req.force_password_change {
        if flag != current.force_password_change {
            if !caller.is_admin() {
                return Err(ApiError::forbidden("Access Denied"));
            }
            changes.force_password_change = Some(flag);
        }
    }

    if let Some(password) = req.password.filter(|p| !p.is_empty()) {
        if password.chars().count() < MIN_CHANGED_PASSWORD_LEN {
            return Err(ApiError::validation(format!(
                "Password must be at least {MIN_CHANGED_PASSWORD_LEN} characters"
            )));
        }
        changes.password_hash = Some(hash_password(&password)?);
    }

    if changes.is_empty() {
        return Err(ApiError::validation("No fields to update"));
    }

    let updated = users
        .update(id, changes)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    info!(user_id = id, by = %caller.username, "user updated");
    Ok(updated)
}

/// Clears both the persisted `locked` flag and any lockout window.
pub async fn unlock_user(
    users: &dyn UserStore,
    governor: &LoginGovernor,
    username: &str,
) -> ApiResult<()> {
    let user = users
        .find_by_username(username)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    users
        .update(
            user.id,
            UserChanges {
                locked: Some(false),
                ..UserChanges::default()
            },
        )
        .await?;
    governor.clear(&user.username);
    info!(%username, "user unlocked");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::{Duration, OffsetDateTime};

    use super::*;
    use crate::auth::{
        lockout::MemoryAttemptStore,
        repo::MemoryUserStore,
        repo_types::NewUser,
    };

    async fn seeded() -> (MemoryUserStore, User, User) {
        let store = MemoryUserStore::default();
        let mk = |username: &str, role: Role| NewUser {
            first_name: username.into(),
            last_name: String::new(),
            username: username.into(),
            email: format!("{username}@example.com"),
            phone: String::new(),
            password_hash: "x".into(),
            role,
            force_password_change: false,
        };
        let alice = store.create(mk("alice", Role::User)).await.unwrap();
        let root = store.create(mk("root", Role::Admin)).await.unwrap();
        (store, alice, root)
    }

    fn ctx(user: &User) -> SessionContext {
        SessionContext {
            user_id: user.id,
            username: user.username.clone(),
            role: user.role(),
            session_id: "s".into(),
        }
    }

    #[tokio::test]
    async fn member_edits_self_but_not_others_or_role() {
        let (store, alice, root) = seeded().await;

        let updated = update_user(
            &store,
            &ctx(&alice),
            alice.id,
            UpdateUserRequest {
                phone: Some(" 0812345678 ".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.phone, "0812345678");

        let err = update_user(&store, &ctx(&alice), root.id, UpdateUserRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));

        let err = update_user(
            &store,
            &ctx(&alice),
            alice.id,
            UpdateUserRequest {
                role: Some("admin".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn admin_changes_role_and_username_conflicts_are_rejected() {
        let (store, alice, root) = seeded().await;

        let updated = update_user(
            &store,
            &ctx(&root),
            alice.id,
            UpdateUserRequest {
                role: Some(" AdminHR ".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.role(), Role::AdminHr);

        let err = update_user(
            &store,
            &ctx(&root),
            alice.id,
            UpdateUserRequest {
                username: Some("root".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let err = update_user(&store, &ctx(&root), alice.id, UpdateUserRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn unlock_clears_flag_and_lockout() {
        let (store, alice, _) = seeded().await;
        store
            .update(
                alice.id,
                UserChanges {
                    locked: Some(true),
                    ..UserChanges::default()
                },
            )
            .await
            .unwrap();
        let governor = LoginGovernor::new(Arc::new(MemoryAttemptStore::new()), 1, Duration::minutes(15));
        let now = OffsetDateTime::now_utc();
        governor.record_failure("alice", now);
        assert!(governor.check("alice", now).is_err());

        unlock_user(&store, &governor, "alice").await.unwrap();

        assert!(!store.find_by_id(alice.id).await.unwrap().unwrap().locked);
        assert!(governor.check("alice", now).is_ok());
        assert!(matches!(
            unlock_user(&store, &governor, "ghost").await,
            Err(ApiError::NotFound(_))
        ));
    }
}
