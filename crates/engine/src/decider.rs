//! Declarative conditional router attached to one step.
//!
//! A `Decider` is an ordered list of conditions evaluated against the
//! step's output map. First match wins; if nothing matches the optional
//! default target is chosen. No comparison ever panics — a condition
//! that cannot be evaluated simply doesn't match.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// Comparison operators understood by a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// Loose equality: numeric when both sides coerce to numbers.
    Eq,
    /// Loose inequality.
    Ne,
    /// Strict equality, including type.
    StrictEq,
    /// Strict inequality.
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    /// Expected is a list containing the actual value.
    In,
    /// Actual is a string containing the expected substring.
    Contains,
}

impl CompareOp {
    /// Parse the textual operator form used in workflow definitions.
    /// Unknown operators yield `None`; callers treat that as
    /// never-matching rather than an error.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            "===" => Some(Self::StrictEq),
            "!==" => Some(Self::StrictNe),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "in" => Some(Self::In),
            "contains" => Some(Self::Contains),
            _ => None,
        }
    }
}

/// Numeric coercion: JSON numbers, booleans, and numeric strings all
/// compare as numbers under the loose operators.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn loose_eq(actual: &Value, expected: &Value) -> bool {
    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        return a == b;
    }
    actual == expected
}

fn ordering(actual: &Value, expected: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        return a.partial_cmp(&b);
    }
    // Lexical comparison when both sides are strings.
    if let (Value::String(a), Value::String(b)) = (actual, expected) {
        return Some(a.cmp(b));
    }
    None
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// One routing rule: `output[key] <op> expected  =>  target`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub key: String,
    pub op: CompareOp,
    pub expected: Value,
    pub target: String,
}

impl Condition {
    /// Total match predicate — never panics, unmatched on any type
    /// mismatch. A key missing from the output compares as `null`.
    fn matches(&self, output: &Value) -> bool {
        let actual = output.get(&self.key).unwrap_or(&Value::Null);
        match self.op {
            CompareOp::Eq => loose_eq(actual, &self.expected),
            CompareOp::Ne => !loose_eq(actual, &self.expected),
            CompareOp::StrictEq => actual == &self.expected,
            CompareOp::StrictNe => actual != &self.expected,
            CompareOp::Lt => matches!(ordering(actual, &self.expected), Some(std::cmp::Ordering::Less)),
            CompareOp::Le => matches!(
                ordering(actual, &self.expected),
                Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
            ),
            CompareOp::Gt => matches!(ordering(actual, &self.expected), Some(std::cmp::Ordering::Greater)),
            CompareOp::Ge => matches!(
                ordering(actual, &self.expected),
                Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
            ),
            CompareOp::In => self
                .expected
                .as_array()
                .is_some_and(|list| list.iter().any(|item| loose_eq(actual, item))),
            CompareOp::Contains => match (actual.as_str(), self.expected.as_str()) {
                (Some(haystack), Some(needle)) => haystack.contains(needle),
                _ => false,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Decider
// ---------------------------------------------------------------------------

/// Ordered condition list plus an optional default target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Decider {
    conditions: Vec<Condition>,
    default: Option<String>,
}

impl Decider {
    pub fn builder() -> DeciderBuilder {
        DeciderBuilder::default()
    }

    /// Append a condition; evaluation order is append order.
    pub fn push(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    /// Set (or replace) the default target.
    pub fn set_default(&mut self, target: impl Into<String>) {
        self.default = Some(target.into());
    }

    /// Evaluate against a step's output map. `None` means "proceed with
    /// static edges".
    pub fn evaluate(&self, output: &Value) -> Option<&str> {
        self.conditions
            .iter()
            .find(|c| c.matches(output))
            .map(|c| c.target.as_str())
            .or(self.default.as_deref())
    }
}

/// Fluent builder backing the façade's `route(...)` / `otherwise(...)`.
#[derive(Debug, Default)]
pub struct DeciderBuilder {
    decider: Decider,
}

impl DeciderBuilder {
    pub fn when(
        mut self,
        key: impl Into<String>,
        op: CompareOp,
        expected: impl Into<Value>,
        target: impl Into<String>,
    ) -> Self {
        self.decider.push(Condition {
            key: key.into(),
            op,
            expected: expected.into(),
            target: target.into(),
        });
        self
    }

    pub fn otherwise(mut self, target: impl Into<String>) -> Self {
        self.decider.set_default(target);
        self
    }

    pub fn build(self) -> Decider {
        self.decider
    }
}
