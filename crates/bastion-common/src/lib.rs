//! Bastion Common - Shared Types and Utilities
//!
//! Foundational types used across the Bastion document storage crates.
//! Provides the unified error type, connection and pool configuration,
//! identifier validation, and the symmetric cipher used for secret values.
//!
//! Key Features:
//! - Unified error type with retryable error detection
//! - Connection descriptors parsed from URLs or discrete fields
//! - SQL identifier validation and connection string sanitizing
//! - AES-256-GCM secret cipher
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod config;
pub mod crypto;
pub mod error;
pub mod utils;

pub use config::{ConnectionConfig, ElectionConfig, PoolConfig, SslMode, StoreConfig, TimeoutConfig};
pub use crypto::{AesGcmCipher, SecretCipher};
pub use error::{BastionError, Result};
