//! Bastion Advisory Locks
//!
//! The lock backend used by the elector, and its PostgreSQL implementation.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use async_trait::async_trait;
use bastion_client::dedicated;
use bastion_common::utils::advisory_lock_parts;
use bastion_common::{ConnectionConfig, Result, StoreConfig};
use sqlx::postgres::PgConnection;
use std::time::Duration;

const TRY_LOCK_SQL: &str = "SELECT pg_try_advisory_lock($1)";

const UNLOCK_SQL: &str = "SELECT pg_advisory_unlock($1)";

/// Counts advisory locks on `(classid, objid)` held by the current session.
/// Single-bigint-key locks report `objsubid = 1`.
const HELD_SQL: &str = "SELECT count(*) FROM pg_locks \
     WHERE pid = pg_backend_pid() AND locktype = 'advisory' \
     AND classid::bigint = $1 AND objid::bigint = $2 AND objsubid = 1";

// =============================================================================
// Traits
// =============================================================================

/// One session able to take session-scoped advisory locks.
///
/// Locks live exactly as long as the session; dropping the value ends the
/// session and releases everything it held.
#[async_trait]
pub trait AdvisoryLock: Send {
    /// Try to take `key` without waiting.
    async fn try_lock(&mut self, key: i64) -> Result<bool>;

    /// Whether this session still holds `key`.
    async fn is_held(&mut self, key: i64) -> Result<bool>;

    /// Give `key` back. Returns whether it was held.
    async fn release(&mut self, key: i64) -> Result<bool>;
}

/// Opens fresh lock sessions.
#[async_trait]
pub trait LockConnector: Send + Sync + 'static {
    type Lock: AdvisoryLock + 'static;

    async fn connect(&self) -> Result<Self::Lock>;
}

// =============================================================================
// PostgreSQL
// =============================================================================

/// Advisory locks on a dedicated, non-pooled PostgreSQL session.
pub struct PgAdvisoryLock {
    conn: PgConnection,
}

impl PgAdvisoryLock {
    pub fn new(conn: PgConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl AdvisoryLock for PgAdvisoryLock {
    async fn try_lock(&mut self, key: i64) -> Result<bool> {
        let acquired: bool = sqlx::query_scalar(TRY_LOCK_SQL)
            .bind(key)
            .fetch_one(&mut self.conn)
            .await?;
        Ok(acquired)
    }

    async fn is_held(&mut self, key: i64) -> Result<bool> {
        let (classid, objid) = advisory_lock_parts(key);
        let held: i64 = sqlx::query_scalar(HELD_SQL)
            .bind(classid)
            .bind(objid)
            .fetch_one(&mut self.conn)
            .await?;
        Ok(held > 0)
    }

    async fn release(&mut self, key: i64) -> Result<bool> {
        let released: bool = sqlx::query_scalar(UNLOCK_SQL)
            .bind(key)
            .fetch_one(&mut self.conn)
            .await?;
        Ok(released)
    }
}

impl std::fmt::Debug for PgAdvisoryLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgAdvisoryLock").finish_non_exhaustive()
    }
}

/// Dials a new dedicated session per election attempt.
#[derive(Debug, Clone)]
pub struct PgLockConnector {
    config: ConnectionConfig,
    connect_timeout: Duration,
}

impl PgLockConnector {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        config.connection.validate()?;
        Ok(Self {
            config: config.connection.clone(),
            connect_timeout: config.timeout.connect,
        })
    }
}

#[async_trait]
impl LockConnector for PgLockConnector {
    type Lock = PgAdvisoryLock;

    async fn connect(&self) -> Result<PgAdvisoryLock> {
        let conn = dedicated(&self.config, self.connect_timeout).await?;
        tracing::debug!(
            target = %self.config.sanitized_connection_string(),
            "Opened election session"
        );
        Ok(PgAdvisoryLock::new(conn))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_common::BastionError;

    #[test]
    fn test_connector_requires_target() {
        let config = StoreConfig::default();
        assert!(matches!(
            PgLockConnector::new(&config),
            Err(BastionError::Configuration(_))
        ));
    }

    #[test]
    fn test_held_query_matches_split_key() {
        assert!(HELD_SQL.contains("classid::bigint = $1"));
        assert!(HELD_SQL.contains("objid::bigint = $2"));
        assert!(HELD_SQL.contains("pid = pg_backend_pid()"));
    }

    #[tokio::test]
    async fn test_connect_failure_is_retryable() {
        let config = StoreConfig::from_url("postgres://u:p@127.0.0.1:1/db")
            .unwrap()
            .with_connect_timeout(Duration::from_secs(2));
        let connector = PgLockConnector::new(&config).unwrap();
        let err = connector.connect().await.unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err}");
    }
}
