//! Bastion Document Store
//!
//! CRUD, bulk and transactional operations over one document table.
//!
//! Every public operation is one bounded unit of work: lease a connection,
//! optionally open a transaction, run its statements, commit or roll back,
//! release the lease. Operations run under the configured query deadline and
//! are cancelled by dropping their future; an interrupted transaction is
//! rolled back, never partially committed.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::schema::{create_table_sql, TableLayout, COLUMNS_SQL};
use crate::types::{Entry, FieldRow, Metadata};
use bastion_client::{ConnectionProvider, UnitOfWork};
use bastion_common::utils::validate_identifier;
use bastion_common::{BastionError, Result, StoreConfig, TimeoutConfig};
use bastion_query::{Param, Query, QueryCompiler};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgConnection, PgRow, Postgres};
use sqlx::query::{Query as SqlQuery, QueryScalar};
use sqlx::types::Json;
use sqlx::{Connection, Row};
use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Whether the session's transaction, if any, has not been assigned an id yet.
const UNWRITTEN_SQL: &str = "SELECT txid_current_if_assigned() IS NULL";

/// Produces the documents written right after the store creates its table.
pub type SeedFn = Arc<dyn Fn() -> Result<Vec<Entry>> + Send + Sync>;

/// Runs `$work` on a leased connection inside the store's operation guard,
/// with the table's statements resolved on that same connection.
macro_rules! leased {
    ($store:expr, $operation:expr, $pinned:expr, |$conn:ident, $statements:pat_param| $work:expr) => {{
        let store: &DocumentStore = $store;
        store
            .guard($operation, async {
                let mut lease = store.provider.acquire($pinned).await?;
                let pinned = lease.is_pinned();
                let result = match store.statements(&mut lease, pinned).await {
                    Ok(resolved) => {
                        let $conn: &mut PgConnection = &mut lease;
                        let $statements: &TableStatements = &resolved;
                        $work.await
                    }
                    Err(e) => Err(e),
                };
                store.provider.release(lease);
                result
            })
            .await
    }};
}

// =============================================================================
// Table Statements
// =============================================================================

/// Layout-dependent statements, resolved once per store.
#[derive(Debug, Clone)]
struct TableStatements {
    layout: TableLayout,
    upsert: String,
    metadata: String,
}

impl TableStatements {
    fn new(table: &str, layout: TableLayout) -> Self {
        Self {
            upsert: layout.upsert_sql(table),
            metadata: layout.metadata_sql(table),
            layout,
        }
    }
}

// =============================================================================
// Document Store
// =============================================================================

/// JSON document store over one table.
pub struct DocumentStore {
    provider: Arc<ConnectionProvider>,
    table: String,
    timeout: Duration,
    compiler: QueryCompiler,
    statements: OnceCell<TableStatements>,
    on_create: Option<SeedFn>,
}

impl DocumentStore {
    /// Create a store for `table` on a shared provider.
    pub fn new(provider: Arc<ConnectionProvider>, table: &str) -> Result<Self> {
        Ok(Self {
            provider,
            table: validate_identifier(table)?,
            timeout: TimeoutConfig::default().query,
            compiler: QueryCompiler::new(),
            statements: OnceCell::new(),
            on_create: None,
        })
    }

    /// Build a provider from configuration and a store on its table.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let table = config.connection.table_name()?;
        let provider = Arc::new(ConnectionProvider::new(config)?);
        Ok(Self::new(provider, &table)?.with_timeout(config.timeout.query))
    }

    /// Set the per-operation deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Seed documents saved once, right after this store creates its table.
    ///
    /// Seeds go through the regular upsert, so a store that loses a creation
    /// race and seeds again changes nothing.
    pub fn on_create<F>(mut self, seed: F) -> Self
    where
        F: Fn() -> Result<Vec<Entry>> + Send + Sync + 'static,
    {
        self.on_create = Some(Arc::new(seed));
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn provider(&self) -> &Arc<ConnectionProvider> {
        &self.provider
    }

    /// The detected table layout, once the table has been touched.
    pub fn layout(&self) -> Option<TableLayout> {
        self.statements.get().map(|s| s.layout)
    }

    /// Bind store operations to a caller-held connection or transaction.
    pub fn on<'s, 'c>(&'s self, conn: &'c mut PgConnection) -> ScopedStore<'s, 'c> {
        ScopedStore { store: self, conn }
    }

    /// Bind store operations to a unit of work's pinned connection.
    pub fn scoped<'s, 'c>(&'s self, unit: &'c mut UnitOfWork) -> ScopedStore<'s, 'c> {
        self.on(unit.connection())
    }

    // ==========================================================================
    // Operations
    // ==========================================================================

    /// Insert or replace one document.
    pub async fn save(&self, key: &str, data: &Value) -> Result<()> {
        leased!(self, "save", None, |conn, statements| self.save_on(conn, statements, key, data))
    }

    /// The payload stored under `key`, if any.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        leased!(self, "get", None, |conn, _| self.get_on(conn, key))
    }

    /// Every payload in the table.
    pub async fn get_all(&self) -> Result<Vec<Value>> {
        leased!(self, "get_all", None, |conn, _| self.get_all_on(conn))
    }

    /// Remove one document. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        leased!(self, "delete", None, |conn, _| self.delete_on(conn, key))
    }

    /// Remove every listed key in one statement. Returns the number removed.
    pub async fn delete_all(&self, keys: &[String]) -> Result<u64> {
        leased!(self, "delete_all", None, |conn, _| self.delete_all_on(conn, keys))
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        leased!(self, "exists", None, |conn, _| self.exists_on(conn, key))
    }

    /// Save `items[i]` under `keys[i]`, all or nothing.
    pub async fn save_all(&self, items: &[Value], keys: &[String]) -> Result<()> {
        check_batch(items, keys).map_err(|e| self.failed("save_all", e))?;
        leased!(self, "save_all", None, |conn, statements| self
            .save_all_on(conn, statements, items, keys))
    }

    /// Payloads matching `query`, in query order.
    pub async fn query(&self, query: &Query) -> Result<Vec<Value>> {
        leased!(self, "query", None, |conn, _| self.query_on(conn, query))
    }

    /// Keyed matches of `query`, each document once.
    pub async fn query_entries(&self, query: &Query) -> Result<Vec<Entry>> {
        leased!(self, "query_entries", None, |conn, _| self.query_entries_on(conn, query))
    }

    /// The projected fields of each match, as text.
    pub async fn query_fields(&self, query: &Query) -> Result<Vec<FieldRow>> {
        leased!(self, "query_fields", None, |conn, _| self.query_fields_on(conn, query))
    }

    pub async fn count(&self, query: &Query) -> Result<i64> {
        leased!(self, "count", None, |conn, _| self.count_on(conn, query))
    }

    /// Delete matches of `query`, returning the keys actually removed.
    pub async fn delete_query(&self, query: &Query) -> Result<Vec<String>> {
        leased!(self, "delete_query", None, |conn, _| self.delete_query_on(conn, query))
    }

    /// Lock the matches of `query`, transform them, and save the result in
    /// one transaction.
    ///
    /// Overlapping callers wait on each other's row locks. If `update` fails
    /// nothing is written.
    pub async fn query_and_update<F>(&self, query: &Query, update: F) -> Result<Vec<Entry>>
    where
        F: FnOnce(Vec<Entry>) -> Result<Vec<Entry>> + Send,
    {
        leased!(self, "query_and_update", None, |conn, statements| self
            .query_and_update_on(conn, statements, query, update))
    }

    /// Version and last-update time for each existing key, in key order.
    pub async fn metadata(&self, keys: &[String]) -> Result<Vec<Metadata>> {
        leased!(self, "metadata", None, |conn, statements| self
            .metadata_on(conn, statements, keys))
    }

    /// Verify connectivity and that the table is usable.
    pub async fn check(&self) -> Result<()> {
        leased!(self, "check", None, |conn, _| self.check_on(conn))
    }

    /// Close the underlying provider.
    pub fn close(&self) {
        self.provider.close();
    }

    // ==========================================================================
    // Guard
    // ==========================================================================

    async fn guard<T, F>(&self, operation: &'static str, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let result = match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(BastionError::Timeout(format!(
                "{} on {} exceeded {:?}",
                operation, self.table, self.timeout
            ))),
        };

        result.map_err(|e| self.failed(operation, e))
    }

    /// Report a failed operation before handing the error back.
    fn failed(&self, operation: &'static str, error: BastionError) -> BastionError {
        if error.is_user_error() {
            tracing::warn!(operation, table = %self.table, error = %error, "Document store operation failed");
        } else {
            tracing::error!(operation, table = %self.table, error = %error, "Document store operation failed");
        }
        error
    }

    // ==========================================================================
    // Table Provisioning
    // ==========================================================================

    /// Layout-dependent statements, provisioning the table on first use.
    ///
    /// Everything runs on `conn`. On a pooled connection the result is cached
    /// right away. On a caller's pinned connection it is cached only when the
    /// table is visible outside the caller's transaction, so a rolled-back
    /// scope never leaves a cached table behind.
    async fn statements(&self, conn: &mut PgConnection, pinned: bool) -> Result<Cow<'_, TableStatements>> {
        if let Some(ready) = self.statements.get() {
            return Ok(Cow::Borrowed(ready));
        }

        if !pinned {
            let ready = self
                .statements
                .get_or_try_init(|| async move {
                    let (layout, _) = self.provision(conn).await?;
                    Ok::<_, BastionError>(TableStatements::new(&self.table, layout))
                })
                .await?;
            return Ok(Cow::Borrowed(ready));
        }

        let (layout, created) = self.provision(&mut *conn).await?;
        let resolved = TableStatements::new(&self.table, layout);
        if !created && outside_transaction_writes(conn).await? {
            let _ = self.statements.set(resolved.clone());
        }
        Ok(match self.statements.get() {
            Some(ready) => Cow::Borrowed(ready),
            None => Cow::Owned(resolved),
        })
    }

    /// Detect the table layout, creating and seeding the table when it is
    /// missing. Returns whether this call created it.
    ///
    /// Creation runs in its own transaction (a savepoint inside a caller's
    /// transaction), so losing a creation race leaves the caller's work intact.
    async fn provision(&self, conn: &mut PgConnection) -> Result<(TableLayout, bool)> {
        let columns: Vec<String> = sqlx::query_scalar(COLUMNS_SQL)
            .bind(self.table.as_str())
            .fetch_all(&mut *conn)
            .await?;

        if let Some(layout) = TableLayout::from_columns(&columns) {
            if !layout.version {
                tracing::debug!("Table '{}' has no version column; defaulting to 1", self.table);
            }
            return Ok((layout, false));
        }

        let mut tx = conn.begin().await?;
        match sqlx::query(&create_table_sql(&self.table)).execute(&mut *tx).await {
            Ok(_) => {
                self.seed(&mut tx).await?;
                tx.commit().await.map_err(BastionError::transaction)?;
                tracing::info!("Created document table '{}'", self.table);
                Ok((TableLayout::full(), true))
            }
            Err(e) => {
                let err = BastionError::from(e);
                if !err.is_already_exists() {
                    return Err(err);
                }
                tx.rollback().await?;
                tracing::debug!("Table '{}' was created concurrently", self.table);
                Ok((TableLayout::full(), false))
            }
        }
    }

    async fn seed(&self, conn: &mut PgConnection) -> Result<()> {
        let Some(ref seed) = self.on_create else {
            return Ok(());
        };
        let entries = seed()?;
        let upsert = TableLayout::full().upsert_sql(&self.table);
        for entry in &entries {
            upsert_with(&upsert, conn, &entry.key, &entry.data).await?;
        }
        tracing::info!("Seeded {} documents into '{}'", entries.len(), self.table);
        Ok(())
    }

    // ==========================================================================
    // Connection-Level Operations
    // ==========================================================================

    async fn save_on(
        &self,
        conn: &mut PgConnection,
        statements: &TableStatements,
        key: &str,
        data: &Value,
    ) -> Result<()> {
        upsert_with(&statements.upsert, conn, key, data).await
    }

    async fn get_on(&self, conn: &mut PgConnection, key: &str) -> Result<Option<Value>> {
        let sql = format!("SELECT data FROM {} WHERE id = $1", self.table);
        let found: Option<Option<Json<Value>>> = sqlx::query_scalar(&sql)
            .bind(key)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| decode_error(key, e))?;
        Ok(found.map(payload))
    }

    async fn get_all_on(&self, conn: &mut PgConnection) -> Result<Vec<Value>> {
        let sql = format!("SELECT data FROM {}", self.table);
        let rows: Vec<Option<Json<Value>>> = sqlx::query_scalar(&sql)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| decode_error(&self.table, e))?;
        Ok(rows.into_iter().map(payload).collect())
    }

    async fn delete_on(&self, conn: &mut PgConnection, key: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table);
        let done = sqlx::query(&sql).bind(key).execute(&mut *conn).await?;
        Ok(done.rows_affected() > 0)
    }

    async fn delete_all_on(&self, conn: &mut PgConnection, keys: &[String]) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE id = ANY($1)", self.table);
        let done = sqlx::query(&sql).bind(keys).execute(&mut *conn).await?;
        Ok(done.rows_affected())
    }

    async fn exists_on(&self, conn: &mut PgConnection, key: &str) -> Result<bool> {
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)", self.table);
        let exists: bool = sqlx::query_scalar(&sql).bind(key).fetch_one(&mut *conn).await?;
        Ok(exists)
    }

    async fn save_all_on(
        &self,
        conn: &mut PgConnection,
        statements: &TableStatements,
        items: &[Value],
        keys: &[String],
    ) -> Result<()> {
        check_batch(items, keys)?;

        let mut tx = conn.begin().await?;
        for (key, data) in keys.iter().zip(items) {
            upsert_with(&statements.upsert, &mut tx, key, data).await?;
        }
        tx.commit().await.map_err(BastionError::transaction)?;

        tracing::debug!("Saved {} documents to '{}'", items.len(), self.table);
        Ok(())
    }

    async fn query_on(&self, conn: &mut PgConnection, query: &Query) -> Result<Vec<Value>> {
        let stmt = self.compiler.select(query, &self.table);
        let rows = bind_params(sqlx::query(&stmt.sql), &stmt.params)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(|row| row_payload(row, &self.table)).collect()
    }

    async fn query_entries_on(&self, conn: &mut PgConnection, query: &Query) -> Result<Vec<Entry>> {
        let stmt = self.compiler.select_keyed(query, &self.table, false);
        let rows = bind_params(sqlx::query(&stmt.sql), &stmt.params)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(row_entry).collect()
    }

    async fn query_fields_on(&self, conn: &mut PgConnection, query: &Query) -> Result<Vec<FieldRow>> {
        let stmt = self.compiler.select(query, &self.table);
        let rows = bind_params(sqlx::query(&stmt.sql), &stmt.params)
            .fetch_all(&mut *conn)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut fields = FieldRow::new();
            for field in &query.fields {
                let name = field.to_dotted();
                let value: Option<String> = row.try_get(name.as_str())?;
                fields.insert(name, value);
            }
            out.push(fields);
        }
        Ok(out)
    }

    async fn count_on(&self, conn: &mut PgConnection, query: &Query) -> Result<i64> {
        let stmt = self.compiler.count(query, &self.table);
        let count: i64 = bind_scalar_params(sqlx::query_scalar(&stmt.sql), &stmt.params)
            .fetch_one(&mut *conn)
            .await?;
        Ok(count)
    }

    async fn delete_query_on(&self, conn: &mut PgConnection, query: &Query) -> Result<Vec<String>> {
        let stmt = self.compiler.delete(query, &self.table);
        let keys: Vec<String> = bind_scalar_params(sqlx::query_scalar(&stmt.sql), &stmt.params)
            .fetch_all(&mut *conn)
            .await?;
        tracing::debug!("Deleted {} documents from '{}'", keys.len(), self.table);
        Ok(keys)
    }

    async fn query_and_update_on<F>(
        &self,
        conn: &mut PgConnection,
        statements: &TableStatements,
        query: &Query,
        update: F,
    ) -> Result<Vec<Entry>>
    where
        F: FnOnce(Vec<Entry>) -> Result<Vec<Entry>> + Send,
    {
        let stmt = self.compiler.select_keyed(query, &self.table, true);

        let mut tx = conn.begin().await?;
        let rows = bind_params(sqlx::query(&stmt.sql), &stmt.params)
            .fetch_all(&mut *tx)
            .await?;
        let locked = rows.iter().map(row_entry).collect::<Result<Vec<_>>>()?;

        let updated = update(locked)?;
        for entry in &updated {
            upsert_with(&statements.upsert, &mut tx, &entry.key, &entry.data).await?;
        }
        tx.commit().await.map_err(BastionError::transaction)?;

        Ok(updated)
    }

    async fn metadata_on(
        &self,
        conn: &mut PgConnection,
        statements: &TableStatements,
        keys: &[String],
    ) -> Result<Vec<Metadata>> {
        let rows: Vec<(String, i64, DateTime<Utc>)> = sqlx::query_as(&statements.metadata)
            .bind(keys)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(key, version, last_updated)| Metadata {
                key,
                version,
                last_updated,
            })
            .collect())
    }

    async fn check_on(&self, conn: &mut PgConnection) -> Result<()> {
        conn.ping().await?;
        Ok(())
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("table", &self.table)
            .field("timeout", &self.timeout)
            .field("layout", &self.layout())
            .finish()
    }
}

// =============================================================================
// Scoped Store
// =============================================================================

/// A store bound to one caller-held connection.
///
/// Operations run on that connection, inside whatever transaction the caller
/// has open on it. Transactions the store opens itself (`save_all`,
/// `query_and_update`) become savepoints there.
pub struct ScopedStore<'s, 'c> {
    store: &'s DocumentStore,
    conn: &'c mut PgConnection,
}

impl ScopedStore<'_, '_> {
    pub async fn save(&mut self, key: &str, data: &Value) -> Result<()> {
        let store = self.store;
        leased!(store, "save", Some(&mut *self.conn), |conn, statements| store
            .save_on(conn, statements, key, data))
    }

    pub async fn get(&mut self, key: &str) -> Result<Option<Value>> {
        let store = self.store;
        leased!(store, "get", Some(&mut *self.conn), |conn, _| store.get_on(conn, key))
    }

    pub async fn get_all(&mut self) -> Result<Vec<Value>> {
        let store = self.store;
        leased!(store, "get_all", Some(&mut *self.conn), |conn, _| store.get_all_on(conn))
    }

    pub async fn delete(&mut self, key: &str) -> Result<bool> {
        let store = self.store;
        leased!(store, "delete", Some(&mut *self.conn), |conn, _| store.delete_on(conn, key))
    }

    pub async fn delete_all(&mut self, keys: &[String]) -> Result<u64> {
        let store = self.store;
        leased!(store, "delete_all", Some(&mut *self.conn), |conn, _| store
            .delete_all_on(conn, keys))
    }

    pub async fn exists(&mut self, key: &str) -> Result<bool> {
        let store = self.store;
        leased!(store, "exists", Some(&mut *self.conn), |conn, _| store.exists_on(conn, key))
    }

    pub async fn save_all(&mut self, items: &[Value], keys: &[String]) -> Result<()> {
        let store = self.store;
        check_batch(items, keys).map_err(|e| store.failed("save_all", e))?;
        leased!(store, "save_all", Some(&mut *self.conn), |conn, statements| store
            .save_all_on(conn, statements, items, keys))
    }

    pub async fn query(&mut self, query: &Query) -> Result<Vec<Value>> {
        let store = self.store;
        leased!(store, "query", Some(&mut *self.conn), |conn, _| store.query_on(conn, query))
    }

    pub async fn query_entries(&mut self, query: &Query) -> Result<Vec<Entry>> {
        let store = self.store;
        leased!(store, "query_entries", Some(&mut *self.conn), |conn, _| store
            .query_entries_on(conn, query))
    }

    pub async fn count(&mut self, query: &Query) -> Result<i64> {
        let store = self.store;
        leased!(store, "count", Some(&mut *self.conn), |conn, _| store.count_on(conn, query))
    }

    pub async fn delete_query(&mut self, query: &Query) -> Result<Vec<String>> {
        let store = self.store;
        leased!(store, "delete_query", Some(&mut *self.conn), |conn, _| store
            .delete_query_on(conn, query))
    }

    pub async fn query_and_update<F>(&mut self, query: &Query, update: F) -> Result<Vec<Entry>>
    where
        F: FnOnce(Vec<Entry>) -> Result<Vec<Entry>> + Send,
    {
        let store = self.store;
        leased!(store, "query_and_update", Some(&mut *self.conn), |conn, statements| store
            .query_and_update_on(conn, statements, query, update))
    }

    pub async fn metadata(&mut self, keys: &[String]) -> Result<Vec<Metadata>> {
        let store = self.store;
        leased!(store, "metadata", Some(&mut *self.conn), |conn, statements| store
            .metadata_on(conn, statements, keys))
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// True when the session's current transaction has written nothing, so every
/// table it can see was committed by someone.
async fn outside_transaction_writes(conn: &mut PgConnection) -> Result<bool> {
    let clean: bool = sqlx::query_scalar(UNWRITTEN_SQL).fetch_one(&mut *conn).await?;
    Ok(clean)
}

fn check_batch(items: &[Value], keys: &[String]) -> Result<()> {
    if items.len() != keys.len() {
        return Err(BastionError::MismatchedBatch {
            items: items.len(),
            keys: keys.len(),
        });
    }
    Ok(())
}

async fn upsert_with(sql: &str, conn: &mut PgConnection, key: &str, data: &Value) -> Result<()> {
    sqlx::query(sql)
        .bind(key)
        .bind(data.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn bind_params<'q>(
    mut query: SqlQuery<'q, Postgres, PgArguments>,
    params: &'q [Param],
) -> SqlQuery<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            Param::Text(value) => query.bind(value.as_str()),
            Param::TextArray(values) => query.bind(values.as_slice()),
        };
    }
    query
}

fn bind_scalar_params<'q, O>(
    mut query: QueryScalar<'q, Postgres, O, PgArguments>,
    params: &'q [Param],
) -> QueryScalar<'q, Postgres, O, PgArguments> {
    for param in params {
        query = match param {
            Param::Text(value) => query.bind(value.as_str()),
            Param::TextArray(values) => query.bind(values.as_slice()),
        };
    }
    query
}

/// A null payload (possible on legacy tables) reads as JSON null.
fn payload(data: Option<Json<Value>>) -> Value {
    data.map(|Json(value)| value).unwrap_or(Value::Null)
}

fn row_payload(row: &PgRow, context: &str) -> Result<Value> {
    let data: Option<Json<Value>> = row.try_get("data").map_err(|e| decode_error(context, e))?;
    Ok(payload(data))
}

fn row_entry(row: &PgRow) -> Result<Entry> {
    let key: String = row.try_get("id")?;
    let data: Option<Json<Value>> = row.try_get("data").map_err(|e| decode_error(&key, e))?;
    Ok(Entry::new(key, payload(data)))
}

fn decode_error(key: &str, err: sqlx::Error) -> BastionError {
    match err {
        sqlx::Error::ColumnDecode { source, .. } => BastionError::MalformedDocument {
            key: key.to_string(),
            reason: source.to_string(),
        },
        sqlx::Error::Decode(source) => BastionError::MalformedDocument {
            key: key.to_string(),
            reason: source.to_string(),
        },
        other => BastionError::from(other),
    }
}

// =============================================================================
// Tests
// =============================================================================
