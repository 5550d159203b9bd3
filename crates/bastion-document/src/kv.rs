//! Bastion Key/Value Store
//!
//! Flat string settings in a `(key, value)` table, with optional encrypted
//! entries for secrets.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use bastion_client::ConnectionProvider;
use bastion_common::utils::{escape_like, validate_identifier};
use bastion_common::{BastionError, Result, SecretCipher, TimeoutConfig};
use sqlx::postgres::PgConnection;
use sqlx::Connection;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Normalize a key: trimmed, lower case, `-` and `.` folded to `_`.
pub fn normalize_key(key: &str) -> String {
    key.trim()
        .chars()
        .map(|c| match c {
            '-' | '.' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

// =============================================================================
// Key/Value Store
// =============================================================================

/// String key/value store over one table.
pub struct KeyValueStore {
    provider: Arc<ConnectionProvider>,
    table: String,
    timeout: Duration,
    cipher: Option<Arc<dyn SecretCipher>>,
    ready: OnceCell<()>,
}

impl KeyValueStore {
    pub fn new(provider: Arc<ConnectionProvider>, table: &str) -> Result<Self> {
        Ok(Self {
            provider,
            table: validate_identifier(table)?,
            timeout: TimeoutConfig::default().query,
            cipher: None,
            ready: OnceCell::new(),
        })
    }

    /// Enable the secure accessors.
    pub fn with_cipher(mut self, cipher: Arc<dyn SecretCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the table if it is missing.
    pub async fn init(&self) -> Result<()> {
        self.guard("init", async {
            let mut lease = self.provider.acquire(None).await?;
            let result = self.ensure_table(&mut lease).await;
            self.provider.release(lease);
            result
        })
        .await
    }

    /// The value stored under `key`, if any.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = normalize_key(key);
        self.guard("get", async {
            let mut lease = self.provider.acquire(None).await?;
            let result = self.get_on(&mut lease, &key).await;
            self.provider.release(lease);
            result
        })
        .await
    }

    /// Every entry in the table.
    pub async fn get_all(&self) -> Result<BTreeMap<String, String>> {
        self.guard("get_all", async {
            let mut lease = self.provider.acquire(None).await?;
            let sql = format!("SELECT key, COALESCE(value, '') FROM {}", self.table);
            let result = match self.ensure_table(&mut lease).await {
                Ok(()) => sqlx::query_as::<_, (String, String)>(&sql)
                    .fetch_all(&mut *lease)
                    .await
                    .map_err(BastionError::from),
                Err(e) => Err(e),
            };
            self.provider.release(lease);
            Ok(result?.into_iter().collect())
        })
        .await
    }

    /// Entries whose (normalized) key starts with `prefix`.
    pub async fn get_with_prefix(&self, prefix: &str) -> Result<BTreeMap<String, String>> {
        let pattern = format!("{}%", escape_like(&normalize_key(prefix)));
        self.guard("get_with_prefix", async {
            let mut lease = self.provider.acquire(None).await?;
            let sql = format!(
                "SELECT key, COALESCE(value, '') FROM {} WHERE key LIKE $1 ESCAPE '\\'",
                self.table
            );
            let result = match self.ensure_table(&mut lease).await {
                Ok(()) => sqlx::query_as::<_, (String, String)>(&sql)
                    .bind(pattern.as_str())
                    .fetch_all(&mut *lease)
                    .await
                    .map_err(BastionError::from),
                Err(e) => Err(e),
            };
            self.provider.release(lease);
            Ok(result?.into_iter().collect())
        })
        .await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let key = normalize_key(key);
        self.guard("set", async {
            let mut lease = self.provider.acquire(None).await?;
            let result = self.set_on(&mut lease, &key, value).await;
            self.provider.release(lease);
            result
        })
        .await
    }

    /// Set several entries in one transaction.
    pub async fn set_many(&self, items: &BTreeMap<String, String>) -> Result<()> {
        self.guard("set_many", async {
            let mut lease = self.provider.acquire(None).await?;
            let result = self.set_many_on(&mut lease, items).await;
            self.provider.release(lease);
            result
        })
        .await
    }

    /// Remove `key`. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let key = normalize_key(key);
        self.guard("delete", async {
            let mut lease = self.provider.acquire(None).await?;
            let sql = format!("DELETE FROM {} WHERE key = $1", self.table);
            let result = match self.ensure_table(&mut lease).await {
                Ok(()) => sqlx::query(&sql)
                    .bind(key.as_str())
                    .execute(&mut *lease)
                    .await
                    .map(|done| done.rows_affected() > 0)
                    .map_err(BastionError::from),
                Err(e) => Err(e),
            };
            self.provider.release(lease);
            result
        })
        .await
    }

    /// Decrypt the value stored under `key`.
    pub async fn get_secure(&self, key: &str) -> Result<Option<String>> {
        let cipher = self.cipher("get_secure")?;
        match self.get(key).await? {
            Some(sealed) => cipher
                .decrypt(&sealed)
                .map(Some)
                .map_err(|e| self.failed("get_secure", e)),
            None => Ok(None),
        }
    }

    /// Encrypt `value` and store it under `key`.
    pub async fn set_secure(&self, key: &str, value: &str) -> Result<()> {
        let cipher = self.cipher("set_secure")?;
        let sealed = cipher
            .encrypt(value)
            .map_err(|e| self.failed("set_secure", e))?;
        self.set(key, &sealed).await
    }

    // ==========================================================================
    // Internals
    // ==========================================================================

    fn cipher(&self, operation: &'static str) -> Result<&Arc<dyn SecretCipher>> {
        self.cipher.as_ref().ok_or_else(|| {
            self.failed(
                operation,
                BastionError::Configuration("no encryption key available".to_string()),
            )
        })
    }

    async fn guard<T, F>(&self, operation: &'static str, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result.map_err(|e| self.failed(operation, e)),
            Err(_) => Err(self.failed(
                operation,
                BastionError::Timeout(format!("{} on {} exceeded {:?}", operation, self.table, self.timeout)),
            )),
        }
    }

    fn failed(&self, operation: &'static str, error: BastionError) -> BastionError {
        if error.is_user_error() {
            tracing::warn!(operation, table = %self.table, error = %error, "Key/value store operation failed");
        } else {
            tracing::error!(operation, table = %self.table, error = %error, "Key/value store operation failed");
        }
        error
    }

    async fn ensure_table(&self, conn: &mut PgConnection) -> Result<()> {
        self.ready
            .get_or_try_init(|| async move {
                let sql = format!(
                    "CREATE TABLE IF NOT EXISTS {} (key varchar(1000) PRIMARY KEY, value varchar(4000))",
                    self.table
                );
                match sqlx::query(&sql).execute(conn).await {
                    Ok(_) => Ok(()),
                    Err(e) => {
                        let err = BastionError::from(e);
                        if err.is_already_exists() {
                            Ok(())
                        } else {
                            Err(err)
                        }
                    }
                }
            })
            .await
            .map(|_| ())
    }

    async fn get_on(&self, conn: &mut PgConnection, key: &str) -> Result<Option<String>> {
        self.ensure_table(conn).await?;
        let sql = format!("SELECT COALESCE(value, '') FROM {} WHERE key = $1", self.table);
        let value: Option<String> = sqlx::query_scalar(&sql)
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(value)
    }

    async fn set_on(&self, conn: &mut PgConnection, key: &str, value: &str) -> Result<()> {
        self.ensure_table(conn).await?;
        sqlx::query(&self.upsert_sql())
            .bind(key)
            .bind(value)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn set_many_on(&self, conn: &mut PgConnection, items: &BTreeMap<String, String>) -> Result<()> {
        self.ensure_table(conn).await?;
        let sql = self.upsert_sql();
        let mut tx = conn.begin().await?;
        for (key, value) in items {
            sqlx::query(&sql)
                .bind(normalize_key(key))
                .bind(value.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await.map_err(BastionError::transaction)?;
        Ok(())
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (key, value) VALUES ($1, $2) ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
            self.table
        )
    }
}

impl std::fmt::Debug for KeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueStore")
            .field("table", &self.table)
            .field("secure", &self.cipher.is_some())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
