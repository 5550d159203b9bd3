//! Bastion Client Connection Provider
//!
//! Lazily created connection pool shared by every store over one database.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::connection::{connect_options, Lease, UnitOfWork};
use bastion_common::{BastionError, ConnectionConfig, PoolConfig, Result, StoreConfig};
use parking_lot::RwLock;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions};
use sqlx::Connection;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

// =============================================================================
// Connection Provider
// =============================================================================

/// Hands out connections from a pool that is dialed on first use.
///
/// Construction only validates configuration; nothing touches the network
/// until the first [`ConnectionProvider::acquire`].
pub struct ConnectionProvider {
    config: ConnectionConfig,
    pool_config: PoolConfig,
    connect_timeout: Duration,
    options: RwLock<PgConnectOptions>,
    pool: RwLock<Option<PgPool>>,
    dial: Mutex<()>,
    closed: AtomicBool,
    pools_created: AtomicU64,
    total_acquired: AtomicU64,
    total_released: AtomicU64,
    pinned_reuse: AtomicU64,
    units_opened: AtomicU64,
}

impl ConnectionProvider {
    /// Create a provider. Fails fast on bad configuration.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let options = connect_options(&config.connection)?;

        Ok(Self {
            config: config.connection.clone(),
            pool_config: config.pool.clone(),
            connect_timeout: config.timeout.connect,
            options: RwLock::new(options),
            pool: RwLock::new(None),
            dial: Mutex::new(()),
            closed: AtomicBool::new(false),
            pools_created: AtomicU64::new(0),
            total_acquired: AtomicU64::new(0),
            total_released: AtomicU64::new(0),
            pinned_reuse: AtomicU64::new(0),
            units_opened: AtomicU64::new(0),
        })
    }

    /// The connection descriptor this provider was built from.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .min_connections(self.pool_config.min_connections)
            .max_connections(self.pool_config.max_connections)
            .acquire_timeout(self.pool_config.acquire_timeout)
            .idle_timeout(Some(self.pool_config.idle_timeout))
            .max_lifetime(Some(self.pool_config.max_lifetime))
            .test_before_acquire(self.pool_config.test_on_acquire)
    }

    async fn dial(&self, options: PgConnectOptions) -> Result<PgPool> {
        let connecting = self.pool_options().connect_with(options);
        let pool = match tokio::time::timeout(self.connect_timeout, connecting).await {
            Ok(result) => result.map_err(|e| {
                tracing::error!(
                    target_db = %self.config.sanitized_connection_string(),
                    error = %e,
                    "Failed to open connection pool"
                );
                BastionError::from(e)
            })?,
            Err(_) => {
                return Err(BastionError::Timeout(format!(
                    "connecting to {} took longer than {:?}",
                    self.config.sanitized_connection_string(),
                    self.connect_timeout
                )))
            }
        };

        self.pools_created.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            "Opened connection pool to {} (max {} connections)",
            self.config.sanitized_connection_string(),
            self.pool_config.max_connections
        );
        Ok(pool)
    }

    /// The pool, dialing it if this is the first use.
    pub async fn pool(&self) -> Result<PgPool> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BastionError::ConnectionClosed);
        }

        let existing = self.pool.read().clone();
        if let Some(pool) = existing {
            return Ok(pool);
        }

        let _dialing = self.dial.lock().await;
        let existing = self.pool.read().clone();
        if let Some(pool) = existing {
            return Ok(pool);
        }

        let options = self.options.read().clone();
        let pool = self.dial(options).await?;
        *self.pool.write() = Some(pool.clone());
        Ok(pool)
    }

    /// Get a connection for one operation.
    ///
    /// A pinned connection (from a [`UnitOfWork`] or an open transaction) is
    /// handed back as is; otherwise a connection is leased from the pool.
    pub async fn acquire<'a>(&self, pinned: Option<&'a mut PgConnection>) -> Result<Lease<'a>> {
        if let Some(conn) = pinned {
            self.pinned_reuse.fetch_add(1, Ordering::Relaxed);
            return Ok(Lease::Pinned(conn));
        }

        let pool = self.pool().await?;
        let conn = pool.acquire().await?;
        self.total_acquired.fetch_add(1, Ordering::Relaxed);
        Ok(Lease::Pooled(conn))
    }

    /// Give a lease back. Pinned leases stay with their owner.
    pub fn release(&self, lease: Lease<'_>) {
        if let Lease::Pooled(conn) = lease {
            drop(conn);
            self.total_released.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Pin one pooled connection for a caller-defined scope.
    pub async fn unit_of_work(&self) -> Result<UnitOfWork> {
        let pool = self.pool().await?;
        let conn = pool.acquire().await?;
        let id = self.units_opened.fetch_add(1, Ordering::Relaxed) + 1;
        self.total_acquired.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Opened unit of work {}", id);
        Ok(UnitOfWork::new(conn, id))
    }

    /// Round-trip a ping over a pooled connection.
    pub async fn ping(&self) -> Result<()> {
        let mut lease = self.acquire(None).await?;
        let result = lease.ping().await;
        self.release(lease);
        Ok(result?)
    }

    /// Replace the pool with one dialed against `url`.
    ///
    /// The previous pool is closed in the background once its connections
    /// come back.
    pub async fn connect(&self, url: &str) -> Result<()> {
        let config = ConnectionConfig {
            table: self.config.table.clone(),
            ..ConnectionConfig::from_url(url)?
        };
        let options = connect_options(&config)?;

        let _dialing = self.dial.lock().await;
        let pool = self.dial(options.clone()).await?;

        *self.options.write() = options;
        let previous = self.pool.write().replace(pool);
        self.closed.store(false, Ordering::SeqCst);

        if let Some(previous) = previous {
            close_in_background(previous);
        }
        Ok(())
    }

    /// Stop handing out connections and close the pool.
    ///
    /// Does not wait for outstanding leases; the pool finishes closing in
    /// the background once they are returned.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(pool) = self.pool.write().take() {
            tracing::info!(
                "Closing connection pool to {}",
                self.config.sanitized_connection_string()
            );
            close_in_background(pool);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Get provider statistics.
    pub fn stats(&self) -> PoolStats {
        let pool = self.pool.read();
        PoolStats {
            pools_created: self.pools_created.load(Ordering::SeqCst),
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            pinned_reuse: self.pinned_reuse.load(Ordering::Relaxed),
            current_size: pool.as_ref().map(|p| p.size()).unwrap_or(0),
            idle: pool.as_ref().map(|p| p.num_idle()).unwrap_or(0),
            max_size: self.pool_config.max_connections,
            min_size: self.pool_config.min_connections,
        }
    }
}

fn close_in_background(pool: PgPool) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { pool.close().await });
        }
        Err(_) => drop(pool),
    }
}

impl std::fmt::Debug for ConnectionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProvider")
            .field("target", &self.config.sanitized_connection_string())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// =============================================================================
// Pool Statistics
// =============================================================================

/// Statistics for the connection provider.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub pools_created: u64,
    pub total_acquired: u64,
    pub total_released: u64,
    pub pinned_reuse: u64,
    pub current_size: u32,
    pub idle: usize,
    pub max_size: u32,
    pub min_size: u32,
}

impl PoolStats {
    /// Get pool utilization as a percentage.
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            return 0.0;
        }
        let in_use = (self.current_size as usize).saturating_sub(self.idle);
        (in_use as f64 / self.max_size as f64) * 100.0
    }
}

// =============================================================================
// Tests
// =============================================================================
