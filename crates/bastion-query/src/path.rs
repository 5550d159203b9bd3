//! Bastion Field Paths
//!
//! Addressing of nested values inside the JSON payload column.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use bastion_common::utils::quote_literal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the payload column.
pub const DATA_COLUMN: &str = "data";

// =============================================================================
// Field Path
// =============================================================================

/// A parsed dotted path such as `owner.address.city`.
///
/// `~1` inside a segment stands for a literal `.` and `~0` for a literal `~`,
/// so keys containing dots stay addressable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a dotted path.
    pub fn parse(path: &str) -> Self {
        let segments = path
            .split('.')
            .map(|s| s.replace("~1", ".").replace("~0", "~"))
            .collect();
        Self { segments }
    }

    /// Build a path from already-split segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Render back to dotted form, re-escaping as needed.
    pub fn to_dotted(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.replace('~', "~0").replace('.', "~1"))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Expression extracting the value as text (`->>` on the last hop).
    pub fn text_expr(&self, column: &str) -> String {
        self.render(column, "->>")
    }

    /// Expression extracting the value as structured JSON (`->` throughout).
    pub fn json_expr(&self, column: &str) -> String {
        self.render(column, "->")
    }

    fn render(&self, column: &str, last_op: &str) -> String {
        let mut expr = String::from(column);
        let last = self.segments.len().saturating_sub(1);
        for (i, segment) in self.segments.iter().enumerate() {
            expr.push_str(if i == last { last_op } else { "->" });
            expr.push_str(&quote_literal(segment));
        }
        expr
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_dotted())
    }
}

impl From<&str> for FieldPath {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<String> for FieldPath {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_dotted()
    }
}

// =============================================================================
// Tests
// =============================================================================
