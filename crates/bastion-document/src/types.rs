//! Bastion Document Types
//!
//! Rows exchanged with the document store.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// =============================================================================
// Entry
// =============================================================================

/// A document payload together with its key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub data: Value,
}

impl Entry {
    pub fn new(key: impl Into<String>, data: Value) -> Self {
        Self {
            key: key.into(),
            data,
        }
    }

    /// Read a top-level string field of the payload.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }
}

impl From<(String, Value)> for Entry {
    fn from((key, data): (String, Value)) -> Self {
        Self { key, data }
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Bookkeeping for one stored document, without its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub key: String,
    /// Starts at 1 and grows by one with every save that changes the payload.
    pub version: i64,
    pub last_updated: DateTime<Utc>,
}

/// Projected text columns of one row, keyed by field path.
pub type FieldRow = BTreeMap<String, Option<String>>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_accessors() {
        let entry = Entry::new("a", json!({"name": "Alpha", "n": 1}));
        assert_eq!(entry.get_str("name"), Some("Alpha"));
        assert_eq!(entry.get_str("n"), None);
        assert_eq!(entry.get_str("missing"), None);
    }

    #[test]
    fn test_entry_from_tuple() {
        let entry: Entry = ("k".to_string(), json!(null)).into();
        assert_eq!(entry.key, "k");
        assert!(entry.data.is_null());
    }
}
