//! Bastion Election - Leader Election
//!
//! Single-leader election across processes sharing one PostgreSQL database.
//! Each participant holds a dedicated session and competes for a session-level
//! advisory lock; whoever holds it is the leader until its session dies or the
//! lock disappears.
//!
//! Key Features:
//! - Follower, Candidate and Leader roles driven by one owning task
//! - Periodic liveness checks of the held lock
//! - Fixed-interval retry after failed or lost elections
//! - Pluggable lock backend for testing
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod elector;
pub mod lock;

pub use elector::{ElectorHandle, LeaderElector, Role};
pub use lock::{AdvisoryLock, LockConnector, PgAdvisoryLock, PgLockConnector};
