//! Bastion Query Compiler
//!
//! Turns a [`Query`] into parameterized PostgreSQL statements over a table
//! shaped `(id, data json, ...)`. Operand values are always bound as
//! parameters; field path segments are rendered as escaped literals.
//!
//! Compilation does not fail. A condition with an unknown operator or the
//! wrong number of operands compiles to a call of the nonexistent function
//! `invalid_condition(...)`, so the problem is reported by the server when
//! the statement runs. [`Query::validate`] catches the same cases up front.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::filter::{operand_text, Condition, ConditionGroup, Operator};
use crate::path::{FieldPath, DATA_COLUMN};
use crate::query::{Query, Traversal};
use bastion_common::utils::{quote_identifier, quote_literal};
use serde_json::Value;

// =============================================================================
// Statement
// =============================================================================

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Text(String),
    TextArray(Vec<String>),
}

/// SQL text with `$n` placeholders and the values for them, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// Accumulates parameters and hands out their placeholders.
#[derive(Default)]
struct Binder {
    params: Vec<Param>,
}

impl Binder {
    fn bind(&mut self, param: Param) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    fn bind_text(&mut self, value: &Value) -> String {
        self.bind(Param::Text(operand_text(value)))
    }

    fn finish(self, sql: String) -> Statement {
        Statement {
            sql,
            params: self.params,
        }
    }
}

// =============================================================================
// Query Compiler
// =============================================================================

/// Pure query-to-SQL compiler.
///
/// `table` arguments must already be validated identifiers; they are
/// embedded verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryCompiler;

impl QueryCompiler {
    pub fn new() -> Self {
        Self
    }

    /// Select payloads (plus any projections) in result order.
    pub fn select(&self, query: &Query, table: &str) -> Statement {
        let mut binder = Binder::default();
        let projection = projection(&query.fields);

        let sql = match &query.recurse {
            None => format!(
                "SELECT {} FROM {}{}",
                projection,
                table,
                seed_tail(query, &mut binder)
            ),
            Some(traversal) => format!(
                "{} SELECT {} FROM {} AS doc JOIN {} ON reached.id = doc.id \
                 ORDER BY reached.depth, reached.ord",
                walk_cte(query, traversal, table, &mut binder),
                projection,
                table,
                REACHED
            ),
        };

        binder.finish(sql)
    }

    /// Select `(id, data)` pairs, each document at most once.
    ///
    /// With `lock` the matched rows are locked `FOR UPDATE` until the
    /// surrounding transaction ends.
    pub fn select_keyed(&self, query: &Query, table: &str, lock: bool) -> Statement {
        let mut binder = Binder::default();

        let sql = match &query.recurse {
            None => {
                let mut sql = format!("SELECT id, data FROM {}{}", table, seed_tail(query, &mut binder));
                if lock {
                    sql.push_str(" FOR UPDATE");
                }
                sql
            }
            Some(traversal) => {
                let mut sql = format!(
                    "{} SELECT doc.id, doc.data FROM {} AS doc JOIN {} ON reached.id = doc.id \
                     ORDER BY reached.depth, reached.ord",
                    walk_cte(query, traversal, table, &mut binder),
                    table,
                    REACHED
                );
                if lock {
                    sql.push_str(" FOR UPDATE OF doc");
                }
                sql
            }
        };

        binder.finish(sql)
    }

    /// Count the documents [`QueryCompiler::select_keyed`] would return.
    pub fn count(&self, query: &Query, table: &str) -> Statement {
        let inner = self.select_keyed(query, table, false);
        Statement {
            sql: format!("SELECT COUNT(*) FROM ({}) AS matched", inner.sql),
            params: inner.params,
        }
    }

    /// Delete matched documents, returning their ids.
    ///
    /// For traversals the ids come back in walk order.
    pub fn delete(&self, query: &Query, table: &str) -> Statement {
        let mut binder = Binder::default();

        let sql = match &query.recurse {
            None if query.is_windowed() => format!(
                "DELETE FROM {t} WHERE id IN (SELECT id FROM {t}{tail}) RETURNING id",
                t = table,
                tail = seed_tail(query, &mut binder)
            ),
            None => format!(
                "DELETE FROM {}{} RETURNING id",
                table,
                where_clause(&query.conditions, &mut binder)
            ),
            Some(traversal) => format!(
                "{}, removed AS (DELETE FROM {} WHERE id IN (SELECT id FROM walk) RETURNING id) \
                 SELECT removed.id FROM removed JOIN {} ON reached.id = removed.id \
                 ORDER BY reached.depth, reached.ord",
                walk_cte(query, traversal, table, &mut binder),
                table,
                REACHED
            ),
        };

        binder.finish(sql)
    }

    /// Compile a condition tree alone. `None` when it holds no conditions.
    pub fn filter(&self, group: &ConditionGroup) -> Option<Statement> {
        let mut binder = Binder::default();
        compile_group(group, DATA_COLUMN, &mut binder).map(|sql| binder.finish(sql))
    }
}

/// Each walked document once, at its shallowest depth.
const REACHED: &str =
    "(SELECT id, MIN(depth) AS depth, MIN(ord) AS ord FROM walk GROUP BY id) AS reached";

// =============================================================================
// Clauses
// =============================================================================

fn projection(fields: &[FieldPath]) -> String {
    let mut out = String::from(DATA_COLUMN);
    for field in fields {
        out.push_str(&format!(
            ", {} AS {}",
            field.text_expr(DATA_COLUMN),
            quote_identifier(&field.to_dotted())
        ));
    }
    out
}

fn where_clause(group: &ConditionGroup, binder: &mut Binder) -> String {
    compile_group(group, DATA_COLUMN, binder)
        .map(|expr| format!(" WHERE {}", expr))
        .unwrap_or_default()
}

fn order_terms(query: &Query) -> Option<String> {
    if query.sort.is_empty() {
        return None;
    }
    let terms = query
        .sort
        .iter()
        .map(|s| format!("{} {}", s.field.text_expr(DATA_COLUMN), s.direction.as_sql()))
        .collect::<Vec<_>>()
        .join(", ");
    Some(terms)
}

fn window(query: &Query) -> String {
    let mut out = String::new();
    if let Some(limit) = query.limit {
        out.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = query.offset {
        out.push_str(&format!(" OFFSET {}", offset));
    }
    out
}

/// `WHERE ... ORDER BY ... LIMIT ... OFFSET ...` for the seed rows.
fn seed_tail(query: &Query, binder: &mut Binder) -> String {
    let mut out = where_clause(&query.conditions, binder);
    if let Some(terms) = order_terms(query) {
        out.push_str(" ORDER BY ");
        out.push_str(&terms);
    }
    out.push_str(&window(query));
    out
}

/// `WITH RECURSIVE walk(id, data, depth, ord) AS (...)`.
///
/// `ord` is the seed's position in the seed ordering and is inherited by
/// every document reached from it.
fn walk_cte(query: &Query, traversal: &Traversal, table: &str, binder: &mut Binder) -> String {
    let over = order_terms(query)
        .map(|terms| format!("ORDER BY {}", terms))
        .unwrap_or_default();

    let mut sql = format!(
        "WITH RECURSIVE walk(id, data, depth, ord) AS (\
         SELECT seed.id, seed.data, 0, seed.ord FROM \
         (SELECT id, data, ROW_NUMBER() OVER ({over}) AS ord FROM {table}{tail}) AS seed \
         UNION ALL \
         SELECT hop.id, hop.data, walk.depth + 1, walk.ord FROM {table} AS hop \
         JOIN walk ON ({link}) = ({seed})",
        over = over,
        table = table,
        tail = seed_tail(query, binder),
        link = traversal.link_field.text_expr("hop.data"),
        seed = traversal.seed_field.text_expr("walk.data"),
    );
    if let Some(max) = traversal.max_depth {
        sql.push_str(&format!(" WHERE walk.depth < {}", max));
    }
    sql.push(')');
    sql
}

// =============================================================================
// Conditions
// =============================================================================

fn compile_group(group: &ConditionGroup, column: &str, binder: &mut Binder) -> Option<String> {
    let mut parts: Vec<String> = group
        .conditions
        .iter()
        .map(|c| compile_condition(c, column, binder))
        .collect();
    parts.extend(
        group
            .groups
            .iter()
            .filter_map(|g| compile_group(g, column, binder)),
    );

    if parts.is_empty() {
        return None;
    }
    let joiner = format!(" {} ", group.operator.as_str());
    Some(format!("({})", parts.join(&joiner)))
}

fn compile_condition(condition: &Condition, column: &str, binder: &mut Binder) -> String {
    let operands = &condition.operands;
    if let Some(expected) = condition.operator.arity() {
        if operands.len() != expected {
            return invalid(&format!(
                "{} expects {} operand(s) for {}",
                condition.operator, expected, condition.field
            ));
        }
    }

    let text = condition.field.text_expr(column);
    let json = condition.field.json_expr(column);

    match &condition.operator {
        Operator::Eq => format!("({}) = {}", text, binder.bind_text(&operands[0])),
        Operator::Neq => format!("({}) != {}", text, binder.bind_text(&operands[0])),
        Operator::Lt => numeric(&text, "<", &operands[0], binder),
        Operator::Lte => numeric(&text, "<=", &operands[0], binder),
        Operator::Gt => numeric(&text, ">", &operands[0], binder),
        Operator::Gte => numeric(&text, ">=", &operands[0], binder),
        Operator::Between => {
            let low = binder.bind_text(&operands[0]);
            let high = binder.bind_text(&operands[1]);
            format!("({})::numeric BETWEEN {}::numeric AND {}::numeric", text, low, high)
        }
        Operator::Before => temporal(&text, "<", &operands[0], binder),
        Operator::After => temporal(&text, ">", &operands[0], binder),
        Operator::Contains => {
            let needle = Value::Array(vec![operands[0].clone()]).to_string();
            format!("({})::jsonb @> {}::jsonb", json, binder.bind(Param::Text(needle)))
        }
        Operator::Includes => {
            let set = operands.iter().map(operand_text).collect();
            format!("({}) = ANY({}::text[])", text, binder.bind(Param::TextArray(set)))
        }
        Operator::In => format!("({})::jsonb ? {}", json, binder.bind_text(&operands[0])),
        Operator::AnyIn => {
            let keys = operands.iter().map(operand_text).collect();
            format!("({})::jsonb ?| {}::text[]", json, binder.bind(Param::TextArray(keys)))
        }
        Operator::Null => format!("({}) IS NULL", text),
        Operator::Unknown(name) => invalid(&format!("unknown operator '{}' on {}", name, condition.field)),
    }
}

fn numeric(text: &str, op: &str, operand: &Value, binder: &mut Binder) -> String {
    format!("({})::numeric {} {}::numeric", text, op, binder.bind_text(operand))
}

fn temporal(text: &str, op: &str, operand: &Value, binder: &mut Binder) -> String {
    format!("({})::timestamptz {} {}::timestamptz", text, op, binder.bind_text(operand))
}

fn invalid(reason: &str) -> String {
    format!("invalid_condition({})", quote_literal(reason))
}

// =============================================================================
// Tests
// =============================================================================
