//! Filter operator table.

use serde::Deserialize;
use serde_json::Value;

use crate::query::{Comparison, Condition};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum FilterOperator {
    #[default]
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    ILike,
    In,
    /// Exclusive on both ends.
    Between,
    BetweenInclusive,
    IsNull,
    IsNotNull,
}

impl From<String> for FilterOperator {
    fn from(s: String) -> Self {
        FilterOperator::parse(&s).unwrap_or_else(|| {
            tracing::warn!(operator = %s, "unknown filter operator, using eq");
            FilterOperator::Eq
        })
    }
}

impl FilterOperator {
    /// Case-insensitive, with aliases. `None` for anything unrecognized.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.trim().to_ascii_lowercase().as_str() {
            "eq" | "equals" => FilterOperator::Eq,
            "neq" | "not_equals" | "ne" => FilterOperator::Ne,
            "gt" | "greater_than" => FilterOperator::Gt,
            "gte" | "greater_than_equals" | "ge" => FilterOperator::Gte,
            "lt" | "less_than" => FilterOperator::Lt,
            "lte" | "less_than_equals" | "le" => FilterOperator::Lte,
            "like" => FilterOperator::Like,
            "ilike" => FilterOperator::ILike,
            "in" => FilterOperator::In,
            "between" => FilterOperator::Between,
            "between_inclusive" => FilterOperator::BetweenInclusive,
            "is_null" | "isnull" => FilterOperator::IsNull,
            "is_not_null" | "isnotnull" => FilterOperator::IsNotNull,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Ne => "neq",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
            FilterOperator::Like => "like",
            FilterOperator::ILike => "ilike",
            FilterOperator::In => "in",
            FilterOperator::Between => "between",
            FilterOperator::BetweenInclusive => "between_inclusive",
            FilterOperator::IsNull => "is_null",
            FilterOperator::IsNotNull => "is_not_null",
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, FilterOperator::Between | FilterOperator::BetweenInclusive)
    }

    /// Predicate for `column`. `None` when the value cannot satisfy the
    /// operator, which is a range without exactly two bounds.
    pub fn condition(&self, column: &str, value: &Value) -> Option<Condition> {
        let compare = |op| Some(Condition::compare(column, op, value.clone()));
        match self {
            FilterOperator::Eq => compare(Comparison::Eq),
            FilterOperator::Ne => compare(Comparison::Ne),
            FilterOperator::Gt => compare(Comparison::Gt),
            FilterOperator::Gte => compare(Comparison::Gte),
            FilterOperator::Lt => compare(Comparison::Lt),
            FilterOperator::Lte => compare(Comparison::Lte),
            FilterOperator::Like | FilterOperator::ILike => Some(Condition::Like {
                column: column.to_string(),
                pattern: value.clone(),
                case_insensitive: *self == FilterOperator::ILike,
            }),
            FilterOperator::In => Some(Condition::In {
                column: column.to_string(),
                values: match value {
                    Value::Array(items) => items.clone(),
                    Value::Null => Vec::new(),
                    other => vec![other.clone()],
                },
            }),
            FilterOperator::Between | FilterOperator::BetweenInclusive => {
                let (lo, hi) = range_bounds(value)?;
                let (lo_op, hi_op) = if *self == FilterOperator::Between {
                    (Comparison::Gt, Comparison::Lt)
                } else {
                    (Comparison::Gte, Comparison::Lte)
                };
                Some(Condition::compare(column, lo_op, lo).and(Condition::compare(column, hi_op, hi)))
            }
            FilterOperator::IsNull => Some(Condition::NullOrEmpty { column: column.to_string() }),
            FilterOperator::IsNotNull => Some(Condition::NotNullOrEmpty { column: column.to_string() }),
        }
    }
}

pub(crate) fn range_bounds(value: &Value) -> Option<(Value, Value)> {
    match value {
        Value::Array(items) if items.len() == 2 => Some((items[0].clone(), items[1].clone())),
        _ => None,
    }
}
