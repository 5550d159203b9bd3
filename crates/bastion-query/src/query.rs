//! Bastion Query Model
//!
//! The complete description of a read or delete: filter tree, ordering,
//! pagination, projections and an optional recursive traversal.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::filter::{Condition, ConditionGroup};
use crate::path::FieldPath;
use bastion_common::{BastionError, Result};
use serde::{Deserialize, Serialize};

// =============================================================================
// Sorting
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub field: FieldPath,
    #[serde(default)]
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(field: impl Into<FieldPath>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<FieldPath>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

// =============================================================================
// Traversal
// =============================================================================

/// A recursive walk over documents linked by field values.
///
/// Starting from the documents matched by the query (the seeds), each step
/// follows to documents whose `link_field` equals the previous document's
/// `seed_field`. Descending from a root uses `("id", "parent")`; ascending
/// from a leaf uses `("parent", "id")`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Traversal {
    pub seed_field: FieldPath,
    pub link_field: FieldPath,
    /// Stop after this many hops. `None` walks until no new rows appear.
    #[serde(default)]
    pub max_depth: Option<u32>,
}

impl Traversal {
    pub fn new(seed_field: impl Into<FieldPath>, link_field: impl Into<FieldPath>) -> Self {
        Self {
            seed_field: seed_field.into(),
            link_field: link_field.into(),
            max_depth: None,
        }
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = Some(depth);
        self
    }
}

// =============================================================================
// Query
// =============================================================================

/// Filter, sort, pagination, projection and traversal for one statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Query {
    #[serde(default)]
    pub conditions: ConditionGroup,
    #[serde(default)]
    pub sort: Vec<Sort>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub fields: Vec<FieldPath>,
    #[serde(default)]
    pub recurse: Option<Traversal>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutable access to the root condition group.
    pub fn filter(&mut self) -> &mut ConditionGroup {
        &mut self.conditions
    }

    pub fn with_conditions(mut self, conditions: ConditionGroup) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn sort_by(mut self, sort: Sort) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_field(mut self, field: impl Into<FieldPath>) -> Self {
        self.fields.push(field.into());
        self
    }

    pub fn with_fields<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<FieldPath>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn recurse(mut self, seed_field: impl Into<FieldPath>, link_field: impl Into<FieldPath>) -> Self {
        self.recurse = Some(Traversal::new(seed_field, link_field));
        self
    }

    pub fn with_traversal(mut self, traversal: Traversal) -> Self {
        self.recurse = Some(traversal);
        self
    }

    /// True when the query imposes an order or a window on its matches.
    pub fn is_windowed(&self) -> bool {
        !self.sort.is_empty() || self.limit.is_some() || self.offset.is_some()
    }

    /// Check the query without touching the database.
    ///
    /// Compilation never fails; an invalid operator only surfaces as a
    /// statement error at execution. Call this first to catch it early.
    pub fn validate(&self) -> Result<()> {
        self.conditions.validate()?;
        let paths = self
            .sort
            .iter()
            .map(|s| &s.field)
            .chain(self.fields.iter())
            .chain(self.recurse.iter().flat_map(|t| [&t.seed_field, &t.link_field]));
        for path in paths {
            if path.segments().iter().any(String::is_empty) {
                return Err(BastionError::QueryFailed(format!(
                    "field path '{}' has an empty segment",
                    path
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
