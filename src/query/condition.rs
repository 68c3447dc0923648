//! Backend-neutral predicates.

use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    pub fn sql(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "!=",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Compare { column: String, op: Comparison, value: Value },
    In { column: String, values: Vec<Value> },
    Like { column: String, pattern: Value, case_insensitive: bool },
    /// `col IS NULL OR col = ''`
    NullOrEmpty { column: String },
    /// `col IS NOT NULL AND col != ''`
    NotNullOrEmpty { column: String },
    /// Caller-trusted SQL; `?` marks a bound argument.
    Raw { sql: String, args: Vec<Value> },
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    pub fn compare(column: impl Into<String>, op: Comparison, value: Value) -> Self {
        Condition::Compare { column: column.into(), op, value }
    }

    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self::compare(column, Comparison::Eq, value)
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Condition::Raw { sql: sql.into(), args: Vec::new() }
    }

    pub fn raw_with(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Condition::Raw { sql: sql.into(), args }
    }

    /// AND-combines, flattening nested conjunctions.
    pub fn and(self, other: Condition) -> Self {
        match (self, other) {
            (Condition::And(mut a), Condition::And(b)) => {
                a.extend(b);
                Condition::And(a)
            }
            (Condition::And(mut a), c) => {
                a.push(c);
                Condition::And(a)
            }
            (c, Condition::And(mut b)) => {
                b.insert(0, c);
                Condition::And(b)
            }
            (a, b) => Condition::And(vec![a, b]),
        }
    }

    pub fn or(self, other: Condition) -> Self {
        match self {
            Condition::Or(mut a) => {
                a.push(other);
                Condition::Or(a)
            }
            c => Condition::Or(vec![c, other]),
        }
    }

    /// Whether the predicate references `column` structurally. Raw fragments
    /// are opaque and never match.
    pub fn mentions(&self, column: &str) -> bool {
        match self {
            Condition::Compare { column: c, .. }
            | Condition::In { column: c, .. }
            | Condition::Like { column: c, .. }
            | Condition::NullOrEmpty { column: c }
            | Condition::NotNullOrEmpty { column: c } => c == column,
            Condition::Raw { .. } => false,
            Condition::And(parts) | Condition::Or(parts) => parts.iter().any(|p| p.mentions(column)),
        }
    }
}
