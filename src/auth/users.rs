//! User lookup contract and password verification.
//!
//! The broker does not own user rows; it reaches them through
//! [`UserRepository`]. The Postgres implementation mirrors the platform's
//! `users` table; tests use an in-memory double.

use anyhow::{Context, Result};
use argon2::password_hash::PasswordHash;
use argon2::{Argon2, PasswordVerifier};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

/// Identity returned to request handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub active: bool,
}

/// Fields needed to evaluate a login attempt.
#[derive(Debug, Clone)]
pub struct LoginRecord {
    pub user: AuthUser,
    pub password_hash: String,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Resolve a login identifier: by email first, else by username.
    async fn find_for_login(&self, identifier: &str) -> Result<Option<LoginRecord>>;

    /// Fetch the current user row.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<AuthUser>>;

    /// Drop stored device/push tokens for the user (logout-all hook).
    async fn clear_device_tokens(&self, user_id: Uuid) -> Result<()>;
}

/// Verify a password against a PHC-format argon2 hash.
///
/// A malformed stored hash verifies as false rather than erroring; the
/// caller treats it as any other failed credential check.
#[must_use]
pub fn verify_password(password_hash: &str, password: &str) -> bool {
    PasswordHash::new(password_hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

#[derive(Debug, Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_for_login(&self, identifier: &str) -> Result<Option<LoginRecord>> {
        let query = r"
            SELECT id, email, username, active, password_hash
            FROM users
            WHERE email = $1 OR username = $1
            ORDER BY (email = $1) DESC
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup login record")?;

        Ok(row.map(|row| LoginRecord {
            user: AuthUser {
                id: row.get("id"),
                email: row.get("email"),
                username: row.get("username"),
                active: row.get("active"),
            },
            password_hash: row.get("password_hash"),
        }))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AuthUser>> {
        let query = "SELECT id, email, username, active FROM users WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch user")?;

        Ok(row.map(|row| AuthUser {
            id: row.get("id"),
            email: row.get("email"),
            username: row.get("username"),
            active: row.get("active"),
        }))
    }

    async fn clear_device_tokens(&self, user_id: Uuid) -> Result<()> {
        let query = "DELETE FROM device_tokens WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to clear device tokens")?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use argon2::password_hash::rand_core::OsRng;
    use argon2::password_hash::SaltString;
    use argon2::PasswordHasher;
    use std::collections::HashSet;
    use tokio::sync::Mutex;

    /// In-memory repository double for broker tests.
    pub(crate) struct MemoryUserRepository {
        records: Vec<LoginRecord>,
        cleared: Mutex<HashSet<Uuid>>,
    }

    impl MemoryUserRepository {
        pub(crate) fn new(records: Vec<LoginRecord>) -> Self {
            Self {
                records,
                cleared: Mutex::new(HashSet::new()),
            }
        }

        pub(crate) async fn device_tokens_cleared(&self, user_id: Uuid) -> bool {
            self.cleared.lock().await.contains(&user_id)
        }
    }

    #[async_trait]
    impl UserRepository for MemoryUserRepository {
        async fn find_for_login(&self, identifier: &str) -> Result<Option<LoginRecord>> {
            let by_email = self
                .records
                .iter()
                .find(|record| record.user.email == identifier);
            let record = by_email.or_else(|| {
                self.records
                    .iter()
                    .find(|record| record.user.username == identifier)
            });
            Ok(record.cloned())
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<AuthUser>> {
            Ok(self
                .records
                .iter()
                .find(|record| record.user.id == id)
                .map(|record| record.user.clone()))
        }

        async fn clear_device_tokens(&self, user_id: Uuid) -> Result<()> {
            self.cleared.lock().await.insert(user_id);
            Ok(())
        }
    }

    pub(crate) fn hash_password(password: &str) -> String {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .expect("hashing test password")
            .to_string()
    }

    pub(crate) fn login_record(email: &str, username: &str, password: &str, active: bool) -> LoginRecord {
        LoginRecord {
            user: AuthUser {
                id: Uuid::new_v4(),
                email: email.to_string(),
                username: username.to_string(),
                active,
            },
            password_hash: hash_password(password),
        }
    }
}
