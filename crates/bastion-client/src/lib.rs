//! Bastion Client - PostgreSQL Connection Management
//!
//! Connection provisioning for the Bastion stores. A [`ConnectionProvider`]
//! lazily dials a bounded pool on first use and hands out [`Lease`]s. A
//! [`UnitOfWork`] pins one session so that several store calls share it (and
//! any transaction open on it).
//!
//! Key Features:
//! - Lazy pool creation with fail-fast configuration checks
//! - Pinned-connection reuse without a round trip through the pool
//! - Background pool shutdown and reconnect
//! - Dedicated non-pooled connections for session-scoped state
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod connection;
pub mod pool;

pub use connection::{connect_options, dedicated, Lease, UnitOfWork};
pub use pool::{ConnectionProvider, PoolStats};
