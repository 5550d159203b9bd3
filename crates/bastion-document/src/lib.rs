//! Bastion Document - JSON Document Store
//!
//! Versioned JSON documents kept one row per document in a PostgreSQL table
//! `(id, data json, ...)`, plus a small key/value store for settings and
//! secrets.
//!
//! Key Features:
//! - Idempotent upserts with transparent version counting
//! - Tables provisioned on first use; legacy layouts detected and defaulted
//! - Filtered, sorted, paginated and recursive queries
//! - All-or-nothing batch saves and lock-then-update transactions
//! - Typed stores over any serde model through a pluggable codec
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod kv;
pub mod schema;
pub mod store;
pub mod typed;
pub mod types;

pub use kv::KeyValueStore;
pub use schema::TableLayout;
pub use store::{DocumentStore, ScopedStore};
pub use typed::{Codec, JsonDataStore, SerdeCodec, TypedStore};
pub use types::{Entry, FieldRow, Metadata};
