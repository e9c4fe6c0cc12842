use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;

use super::repo_types::{DirectoryEntry, NewUser, User, UserChanges};

const USER_COLUMNS: &str = "id, first_name, last_name, username, email, phone, password_hash, \
                            role, force_password_change, locked, created_at";

/// Credential store.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>>;
    async fn create(&self, user: NewUser) -> anyhow::Result<User>;
    /// Returns the updated record, or `None` when no such user exists.
    async fn update(&self, id: i64, changes: UserChanges) -> anyhow::Result<Option<User>>;
    async fn delete(&self, id: i64) -> anyhow::Result<bool>;
    async fn list(&self) -> anyhow::Result<Vec<User>>;
    async fn directory(&self) -> anyhow::Result<Vec<DirectoryEntry>>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.db)
        .await
        .context("find user by username")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn create(&self, user: NewUser) -> anyhow::Result<User> {
        let created = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users
                (first_name, last_name, username, email, phone, password_hash, role, force_password_change)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.force_password_change)
        .fetch_one(&self.db)
        .await
        .context("insert user")?;
        Ok(created)
    }

    async fn update(&self, id: i64, changes: UserChanges) -> anyhow::Result<Option<User>> {
        let Some(mut user) = self.find_by_id(id).await? else {
            return Ok(None);
        };
        changes.apply(&mut user);
        let updated = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET first_name = $2, last_name = $3, username = $4, email = $5, phone = $6,
                password_hash = $7, role = $8, force_password_change = $9, locked = $10
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(&user.password_hash)
        .bind(&user.role)
        .bind(user.force_password_change)
        .bind(user.locked)
        .fetch_optional(&self.db)
        .await
        .context("update user")?;
        Ok(updated)
    }

    async fn delete(&self, id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete user")?;
        Ok(res.rows_affected() > 0)
    }

    async fn list(&self) -> anyhow::Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id"
        ))
        .fetch_all(&self.db)
        .await
        .context("list users")?;
        Ok(users)
    }

    async fn directory(&self) -> anyhow::Result<Vec<DirectoryEntry>> {
        let entries = sqlx::query_as::<_, DirectoryEntry>(
            "SELECT id, first_name, last_name, email, phone FROM users ORDER BY id",
        )
        .fetch_all(&self.db)
        .await
        .context("list user directory")?;
        Ok(entries)
    }
}

#[cfg(test)]
pub use memory::MemoryUserStore;

#[cfg(test)]
mod memory {
    use std::sync::Mutex;

    use super::*;

    /// In-process store for router and service tests.
    #[derive(Default)]
    pub struct MemoryUserStore {
        users: Mutex<Vec<User>>,
    }

    impl MemoryUserStore {
        fn with<R>(&self, f: impl FnOnce(&mut Vec<User>) -> R) -> R {
            f(&mut self.users.lock().unwrap())
        }
    }

    #[async_trait]
    impl UserStore for MemoryUserStore {
        async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
            Ok(self.with(|u| u.iter().find(|x| x.username == username).cloned()))
        }

        async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>> {
            Ok(self.with(|u| u.iter().find(|x| x.id == id).cloned()))
        }

        async fn create(&self, new: NewUser) -> anyhow::Result<User> {
            self.with(|users| {
                anyhow::ensure!(
                    !users.iter().any(|x| x.username == new.username),
                    "duplicate username"
                );
                let user = User {
                    id: users.iter().map(|x| x.id).max().unwrap_or(0) + 1,
                    first_name: new.first_name,
                    last_name: new.last_name,
                    username: new.username,
                    email: new.email,
                    phone: new.phone,
                    password_hash: new.password_hash,
                    role: new.role.as_str().to_string(),
                    force_password_change: new.force_password_change,
                    locked: false,
                    created_at: time::OffsetDateTime::now_utc(),
                };
                users.push(user.clone());
                Ok(user)
            })
        }

        async fn update(&self, id: i64, changes: UserChanges) -> anyhow::Result<Option<User>> {
            Ok(self.with(|users| {
                users.iter_mut().find(|x| x.id == id).map(|user| {
                    changes.apply(user);
                    user.clone()
                })
            }))
        }

        async fn delete(&self, id: i64) -> anyhow::Result<bool> {
            Ok(self.with(|users| {
                let before = users.len();
                users.retain(|x| x.id != id);
                users.len() != before
            }))
        }

        async fn list(&self) -> anyhow::Result<Vec<User>> {
            Ok(self.with(|u| u.clone()))
        }

        async fn directory(&self) -> anyhow::Result<Vec<DirectoryEntry>> {
            Ok(self.with(|u| {
                u.iter()
                    .map(|x| DirectoryEntry {
                        id: x.id,
                        first_name: x.first_name.clone(),
                        last_name: x.last_name.clone(),
                        email: x.email.clone(),
                        phone: x.phone.clone(),
                    })
                    .collect()
            }))
        }
    }
}
