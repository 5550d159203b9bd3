//! Bastion Client Connections
//!
//! Leases handed out by the provider, pinned units of work, and dedicated
//! connections that live outside the pool.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use bastion_common::{BastionError, ConnectionConfig, Result, SslMode};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode, Postgres};
use sqlx::Connection;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

// =============================================================================
// Connect Options
// =============================================================================

/// Translate a connection descriptor into driver options.
pub fn connect_options(config: &ConnectionConfig) -> Result<PgConnectOptions> {
    config.validate()?;

    if let Some(ref url) = config.url {
        return url
            .parse::<PgConnectOptions>()
            .map_err(|e| BastionError::InvalidUrl(e.to_string()));
    }

    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database)
        .ssl_mode(ssl_mode(config.ssl_mode));

    if let Some(ref user) = config.user {
        options = options.username(user);
    }
    if let Some(ref password) = config.password {
        options = options.password(password);
    }
    if let Some(ref app) = config.application_name {
        options = options.application_name(app);
    }

    Ok(options)
}

fn ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyCa => PgSslMode::VerifyCa,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

/// Open a connection that is not managed by any pool.
///
/// Session-scoped state such as advisory locks lives exactly as long as the
/// returned connection.
pub async fn dedicated(config: &ConnectionConfig, connect_timeout: Duration) -> Result<PgConnection> {
    let options = connect_options(config)?;
    match tokio::time::timeout(connect_timeout, PgConnection::connect_with(&options)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(BastionError::Timeout(format!(
            "connecting to {} took longer than {:?}",
            config.sanitized_connection_string(),
            connect_timeout
        ))),
    }
}

// =============================================================================
// Lease
// =============================================================================

/// A connection handed out by the provider.
///
/// Pooled leases go back to the pool when released or dropped. Pinned leases
/// borrow a caller-owned connection and are never returned to the pool.
pub enum Lease<'a> {
    Pooled(PoolConnection<Postgres>),
    Pinned(&'a mut PgConnection),
}

impl Lease<'_> {
    pub fn is_pinned(&self) -> bool {
        matches!(self, Lease::Pinned(_))
    }
}

impl Deref for Lease<'_> {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        match self {
            Lease::Pooled(conn) => &**conn,
            Lease::Pinned(conn) => &**conn,
        }
    }
}

impl DerefMut for Lease<'_> {
    fn deref_mut(&mut self) -> &mut PgConnection {
        match self {
            Lease::Pooled(conn) => &mut **conn,
            Lease::Pinned(conn) => &mut **conn,
        }
    }
}

impl std::fmt::Debug for Lease<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.is_pinned() { "Lease::Pinned" } else { "Lease::Pooled" })
    }
}

// =============================================================================
// Unit of Work
// =============================================================================

/// One pooled session held for the duration of a caller-defined scope.
///
/// Store calls made with the unit of work run on its connection, so they see
/// each other's uncommitted writes once a transaction is open on it.
pub struct UnitOfWork {
    conn: PoolConnection<Postgres>,
    id: u64,
}

impl UnitOfWork {
    pub(crate) fn new(conn: PoolConnection<Postgres>, id: u64) -> Self {
        Self { conn, id }
    }

    /// Provider-local identifier, for logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The pinned connection.
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    /// Open a transaction on the pinned connection.
    ///
    /// Dropping the transaction without committing rolls it back.
    pub async fn begin(&mut self) -> Result<sqlx::Transaction<'_, Postgres>> {
        Ok(Connection::begin(&mut *self.conn).await?)
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork").field("id", &self.id).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_fields() {
        let config = ConnectionConfig {
            host: "db.internal".to_string(),
            port: 6543,
            user: Some("app".to_string()),
            password: Some("hunter2".to_string()),
            database: "documents".to_string(),
            ..Default::default()
        };

        let options = connect_options(&config).unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_username(), "app");
        assert_eq!(options.get_database(), Some("documents"));
    }

    #[test]
    fn test_options_from_url() {
        let config = ConnectionConfig::from_url("postgres://u:p@localhost:5433/appdb").unwrap();
        let options = connect_options(&config).unwrap();
        assert_eq!(options.get_host(), "localhost");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_database(), Some("appdb"));
    }

    #[test]
    fn test_missing_target_fails_fast() {
        let err = connect_options(&ConnectionConfig::default()).unwrap_err();
        assert!(matches!(err, BastionError::Configuration(_)));
    }

    #[test]
    fn test_invalid_table_fails_fast() {
        let config = ConnectionConfig {
            host: "localhost".to_string(),
            table: Some("drop table;".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            connect_options(&config),
            Err(BastionError::InvalidIdentifier(_))
        ));
    }

    #[tokio::test]
    async fn test_dedicated_unreachable() {
        let config = ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            ssl_mode: SslMode::Disable,
            ..Default::default()
        };
        let err = dedicated(&config, Duration::from_secs(5)).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
