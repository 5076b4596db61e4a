//! Server-side refresh-token tracking.
//!
//! Every issued refresh token is recorded under its token id; rotation and
//! logout revoke the record. [`RevocationStore::revoke`] is a compare-and-
//! revoke: it reports whether *this* call flipped the record, which is what
//! makes rotation single-use under concurrent refreshes — exactly one of two
//! racing requests observes `true` and proceeds to mint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use super::token::unix_now;

/// Persisted record of an issued refresh token.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub jti: String,
    pub user_id: Uuid,
    pub fingerprint: String,
    pub expires_at: i64,
    pub revoked: bool,
}

#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Store a freshly issued refresh token id.
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<()>;

    /// True when the id exists, is unrevoked, and is unexpired.
    async fn is_active(&self, jti: &str) -> Result<bool>;

    /// Revoke the id. Returns `true` only when this call performed the
    /// revocation; a second caller (or an unknown id) gets `false`.
    async fn revoke(&self, jti: &str) -> Result<bool>;

    /// Revoke every record for the user. Returns the number revoked.
    async fn revoke_all(&self, user_id: Uuid) -> Result<u64>;
}

/// Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PgRevocationStore {
    pool: PgPool,
}

impl PgRevocationStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RevocationStore for PgRevocationStore {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<()> {
        let query = r"
            INSERT INTO refresh_tokens (jti, user_id, fingerprint, expires_at, revoked)
            VALUES ($1, $2, $3, TO_TIMESTAMP($4), FALSE)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&record.jti)
            .bind(record.user_id)
            .bind(&record.fingerprint)
            .bind(record.expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert refresh token record")?;
        Ok(())
    }

    async fn is_active(&self, jti: &str) -> Result<bool> {
        let query = r"
            SELECT COUNT(*) AS active FROM refresh_tokens
            WHERE jti = $1 AND revoked = FALSE AND expires_at > NOW()
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(jti)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to check refresh token state")?;
        let active: i64 = row.get("active");
        Ok(active > 0)
    }

    async fn revoke(&self, jti: &str) -> Result<bool> {
        // The `revoked = FALSE` predicate is the rotation lock: concurrent
        // refreshes race on it and only one UPDATE reports a row.
        let query = "UPDATE refresh_tokens SET revoked = TRUE WHERE jti = $1 AND revoked = FALSE";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(jti)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke refresh token")?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all(&self, user_id: Uuid) -> Result<u64> {
        let query =
            "UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = $1 AND revoked = FALSE";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke user refresh tokens")?;
        Ok(result.rows_affected())
    }
}

/// In-memory store for tests and single-instance deployments.
#[derive(Debug, Default)]
pub struct MemoryRevocationStore {
    records: Mutex<HashMap<String, RefreshTokenRecord>>,
}

impl MemoryRevocationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        records.insert(record.jti.clone(), record.clone());
        Ok(())
    }

    async fn is_active(&self, jti: &str) -> Result<bool> {
        let records = self.records.lock().await;
        Ok(records
            .get(jti)
            .is_some_and(|record| !record.revoked && record.expires_at > unix_now()))
    }

    async fn revoke(&self, jti: &str) -> Result<bool> {
        // One guard covers the read-modify-write, mirroring the SQL
        // compare-and-revoke.
        let mut records = self.records.lock().await;
        match records.get_mut(jti) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all(&self, user_id: Uuid) -> Result<u64> {
        let mut records = self.records.lock().await;
        let mut revoked = 0;
        for record in records.values_mut() {
            if record.user_id == user_id && !record.revoked {
                record.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}
