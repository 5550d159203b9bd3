//! Bastion Query Filters
//!
//! Leaf conditions and the boolean groups that combine them.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::path::FieldPath;
use bastion_common::{BastionError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// =============================================================================
// Operator
// =============================================================================

/// A comparison operator.
///
/// Operators travel by name. A name this crate does not know is kept as
/// [`Operator::Unknown`] instead of being rejected at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Between,
    Before,
    After,
    Contains,
    Includes,
    In,
    AnyIn,
    Null,
    Unknown(String),
}

impl Operator {
    pub fn parse(name: &str) -> Self {
        match name {
            "eq" => Self::Eq,
            "neq" => Self::Neq,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "between" => Self::Between,
            "before" => Self::Before,
            "after" => Self::After,
            "contains" => Self::Contains,
            "includes" => Self::Includes,
            "in" => Self::In,
            "anyin" => Self::AnyIn,
            "null" => Self::Null,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Between => "between",
            Self::Before => "before",
            Self::After => "after",
            Self::Contains => "contains",
            Self::Includes => "includes",
            Self::In => "in",
            Self::AnyIn => "anyin",
            Self::Null => "null",
            Self::Unknown(name) => name,
        }
    }

    /// Number of operands the operator takes; `None` for set operators.
    pub fn arity(&self) -> Option<usize> {
        match self {
            Self::Null => Some(0),
            Self::Between => Some(2),
            Self::Includes | Self::AnyIn => None,
            Self::Unknown(_) => None,
            _ => Some(1),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Operator {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

// =============================================================================
// Condition
// =============================================================================

/// A leaf predicate: `field <operator> operands`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: FieldPath,
    pub operator: Operator,
    #[serde(default)]
    pub operands: Vec<Value>,
}

impl Condition {
    pub fn new(field: impl Into<FieldPath>, operator: Operator, operands: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            operands,
        }
    }

    /// Check the operator is known and the operand count fits it.
    pub fn validate(&self) -> Result<()> {
        if let Operator::Unknown(name) = &self.operator {
            return Err(BastionError::UnknownOperator(name.clone()));
        }
        if let Some(expected) = self.operator.arity() {
            if self.operands.len() != expected {
                return Err(BastionError::InvalidOperands {
                    operator: self.operator.to_string(),
                    reason: format!("expected {} operand(s), got {}", expected, self.operands.len()),
                });
            }
        }
        if matches!(self.operator, Operator::Before | Operator::After)
            && !self.operands[0].is_string()
        {
            return Err(BastionError::InvalidOperands {
                operator: self.operator.to_string(),
                reason: "instant operand must be an RFC 3339 string".to_string(),
            });
        }
        Ok(())
    }
}

/// Render an operand the way it is bound as a text parameter.
pub(crate) fn operand_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn instant(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

// =============================================================================
// Condition Group
// =============================================================================

/// Boolean combinator for condition groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum GroupOperator {
    #[default]
    And,
    Or,
}

impl GroupOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// A tree of conditions joined by one operator per level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConditionGroup {
    pub operator: GroupOperator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub groups: Vec<ConditionGroup>,
}

impl ConditionGroup {
    pub fn and() -> Self {
        Self::default()
    }

    pub fn or() -> Self {
        Self {
            operator: GroupOperator::Or,
            ..Default::default()
        }
    }

    /// True when the group (recursively) holds no conditions.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.groups.iter().all(ConditionGroup::is_empty)
    }

    /// Validate every condition in the tree.
    pub fn validate(&self) -> Result<()> {
        for condition in &self.conditions {
            condition.validate()?;
        }
        for group in &self.groups {
            group.validate()?;
        }
        Ok(())
    }

    pub fn push(&mut self, condition: Condition) -> &mut Self {
        self.conditions.push(condition);
        self
    }

    pub fn push_group(&mut self, group: ConditionGroup) -> &mut Self {
        self.groups.push(group);
        self
    }

    /// Add a condition by operator name.
    pub fn condition(
        &mut self,
        field: impl Into<FieldPath>,
        operator: &str,
        operands: Vec<Value>,
    ) -> &mut Self {
        self.push(Condition::new(field, Operator::parse(operator), operands))
    }

    pub fn equals(&mut self, field: impl Into<FieldPath>, value: impl Into<Value>) -> &mut Self {
        self.push(Condition::new(field, Operator::Eq, vec![value.into()]))
    }

    pub fn not_equals(&mut self, field: impl Into<FieldPath>, value: impl Into<Value>) -> &mut Self {
        self.push(Condition::new(field, Operator::Neq, vec![value.into()]))
    }

    pub fn less_than(&mut self, field: impl Into<FieldPath>, value: impl Into<Value>) -> &mut Self {
        self.push(Condition::new(field, Operator::Lt, vec![value.into()]))
    }

    pub fn less_than_or_equal(&mut self, field: impl Into<FieldPath>, value: impl Into<Value>) -> &mut Self {
        self.push(Condition::new(field, Operator::Lte, vec![value.into()]))
    }

    pub fn greater_than(&mut self, field: impl Into<FieldPath>, value: impl Into<Value>) -> &mut Self {
        self.push(Condition::new(field, Operator::Gt, vec![value.into()]))
    }

    pub fn greater_than_or_equal(&mut self, field: impl Into<FieldPath>, value: impl Into<Value>) -> &mut Self {
        self.push(Condition::new(field, Operator::Gte, vec![value.into()]))
    }

    pub fn between(
        &mut self,
        field: impl Into<FieldPath>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> &mut Self {
        self.push(Condition::new(field, Operator::Between, vec![low.into(), high.into()]))
    }

    pub fn before(&mut self, field: impl Into<FieldPath>, at: DateTime<Utc>) -> &mut Self {
        self.push(Condition::new(field, Operator::Before, vec![instant(at)]))
    }

    pub fn after(&mut self, field: impl Into<FieldPath>, at: DateTime<Utc>) -> &mut Self {
        self.push(Condition::new(field, Operator::After, vec![instant(at)]))
    }

    /// Array-valued field contains `value`.
    pub fn contains(&mut self, field: impl Into<FieldPath>, value: impl Into<Value>) -> &mut Self {
        self.push(Condition::new(field, Operator::Contains, vec![value.into()]))
    }

    /// Scalar field is one of `values`.
    pub fn includes<I, V>(&mut self, field: impl Into<FieldPath>, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.push(Condition::new(field, Operator::Includes, values))
    }

    /// Object-valued field has the key `key`.
    pub fn has_key(&mut self, field: impl Into<FieldPath>, key: impl Into<String>) -> &mut Self {
        self.push(Condition::new(field, Operator::In, vec![Value::String(key.into())]))
    }

    /// Object-valued field has at least one of `keys`.
    pub fn has_any_key<I, S>(&mut self, field: impl Into<FieldPath>, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys = keys.into_iter().map(|k| Value::String(k.into())).collect();
        self.push(Condition::new(field, Operator::AnyIn, keys))
    }

    /// Field is absent or null.
    pub fn is_null(&mut self, field: impl Into<FieldPath>) -> &mut Self {
        self.push(Condition::new(field, Operator::Null, Vec::new()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_operator_names_round_trip() {
        for name in [
            "eq", "neq", "lt", "lte", "gt", "gte", "between", "before", "after", "contains",
            "includes", "in", "anyin", "null",
        ] {
            let op = Operator::parse(name);
            assert!(!matches!(op, Operator::Unknown(_)), "{} should be known", name);
            assert_eq!(op.as_str(), name);
        }
        assert_eq!(Operator::parse("like"), Operator::Unknown("like".to_string()));
    }

    #[test]
    fn test_validate_unknown_operator() {
        let mut group = ConditionGroup::and();
        group.condition("name", "like", vec![json!("a%")]);
        assert!(matches!(group.validate(), Err(BastionError::UnknownOperator(op)) if op == "like"));
    }

    #[test]
    fn test_validate_arity() {
        let bad = Condition::new("n", Operator::Between, vec![json!(1)]);
        assert!(matches!(bad.validate(), Err(BastionError::InvalidOperands { .. })));

        let good = Condition::new("n", Operator::Between, vec![json!(1), json!(5)]);
        assert!(good.validate().is_ok());

        let null = Condition::new("n", Operator::Null, Vec::new());
        assert!(null.validate().is_ok());
    }

    #[test]
    fn test_nested_validation() {
        let mut inner = ConditionGroup::or();
        inner.condition("x", "bogus", vec![]);
        let mut outer = ConditionGroup::and();
        outer.equals("a", "b").push_group(inner);
        assert!(outer.validate().is_err());
    }

    #[test]
    fn test_before_uses_utc_rfc3339() {
        let at = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let mut group = ConditionGroup::and();
        group.before("timestamp", at);
        assert_eq!(group.conditions[0].operands[0], json!("2000-01-01T00:00:00.000Z"));
    }

    #[test]
    fn test_is_empty_ignores_empty_subgroups() {
        let mut group = ConditionGroup::and();
        assert!(group.is_empty());
        group.push_group(ConditionGroup::or());
        assert!(group.is_empty());
        group.is_null("deleted");
        assert!(!group.is_empty());
    }

    #[test]
    fn test_condition_group_deserializes() {
        let group: ConditionGroup = serde_json::from_value(json!({
            "operator": "OR",
            "conditions": [
                {"field": "status", "operator": "eq", "operands": ["open"]},
                {"field": "meta.owner", "operator": "null"}
            ]
        }))
        .unwrap();
        assert_eq!(group.operator, GroupOperator::Or);
        assert_eq!(group.conditions[1].field.segments().len(), 2);
        assert_eq!(group.conditions[1].operator, Operator::Null);
    }

    #[test]
    fn test_operand_text() {
        assert_eq!(operand_text(&json!("abc")), "abc");
        assert_eq!(operand_text(&json!(42)), "42");
        assert_eq!(operand_text(&json!(true)), "true");
    }
}
