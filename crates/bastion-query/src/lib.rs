//! Bastion Query - Query Model and Compiler
//!
//! Structured filter, sort, pagination and traversal specifications for JSON
//! documents, and the compiler that turns them into parameterized PostgreSQL
//! statements over a `json` payload column.
//!
//! Key Features:
//! - Dotted field paths parsed once into segments
//! - Nested AND/OR condition groups
//! - Numeric, temporal, containment and membership operators
//! - Recursive ancestor/descendant walks via `WITH RECURSIVE`
//!
//! The compiler is pure: no I/O and no hidden state.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod compiler;
pub mod filter;
pub mod path;
pub mod query;

pub use compiler::{Param, QueryCompiler, Statement};
pub use filter::{Condition, ConditionGroup, GroupOperator, Operator};
pub use path::FieldPath;
pub use query::{Query, Sort, SortDirection, Traversal};
