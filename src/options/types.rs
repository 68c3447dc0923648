//! Declarative read options as they arrive in a request body or headers.

use serde::Deserialize;
use serde_json::Value;

use crate::options::operator::FilterOperator;
use crate::query::Direction;
use crate::response::ResponseFormat;

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    pub columns: Vec<String>,
    #[serde(alias = "omitColumns")]
    pub omit_columns: Vec<String>,
    pub filters: Vec<FilterOption>,
    pub sort: Vec<SortOption>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub preload: Vec<PreloadOption>,
    #[serde(alias = "customOperators")]
    pub custom_operators: Vec<CustomOperator>,
    #[serde(alias = "computedColumns")]
    pub computed_columns: Vec<ComputedColumn>,
    #[serde(alias = "skipCount")]
    pub skip_count: bool,
    pub distinct: bool,
    #[serde(alias = "customSQLWhere", alias = "customSqlWhere")]
    pub custom_sql_where: Option<String>,
    #[serde(alias = "customSQLOr", alias = "customSqlOr")]
    pub custom_sql_or: Option<String>,
    #[serde(alias = "responseFormat")]
    pub response_format: ResponseFormat,
    #[serde(alias = "cleanJSON", alias = "cleanJson")]
    pub clean_json: bool,
}

/// How a filter joins the predicates accumulated before it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum LogicOperator {
    #[default]
    And,
    Or,
}

impl From<String> for LogicOperator {
    fn from(s: String) -> Self {
        if s.trim().eq_ignore_ascii_case("or") {
            LogicOperator::Or
        } else {
            LogicOperator::And
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct FilterOption {
    pub column: String,
    #[serde(default, alias = "op")]
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
    #[serde(default, alias = "logicOperator", alias = "logic")]
    pub logic_operator: LogicOperator,
}

impl FilterOption {
    pub fn new(column: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        FilterOption {
            column: column.into(),
            operator,
            value,
            logic_operator: LogicOperator::And,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SortOption {
    pub column: String,
    #[serde(default)]
    pub direction: Direction,
}

/// Eager load of a named relation.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PreloadOption {
    #[serde(alias = "name")]
    pub relation: String,
    pub columns: Vec<String>,
    #[serde(alias = "omitColumns")]
    pub omit_columns: Vec<String>,
    pub filters: Vec<FilterOption>,
    pub sort: Vec<SortOption>,
    pub limit: Option<u64>,
}

/// Raw predicate applied with AND. The SQL is caller-trusted.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct CustomOperator {
    pub name: String,
    pub sql: String,
}

/// Expression projected in place of a real column.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ComputedColumn {
    pub name: String,
    pub expression: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn camel_case_aliases_are_accepted() {
        let opts: RequestOptions = serde_json::from_value(json!({
            "skipCount": true,
            "customSQLWhere": "x > 1",
            "responseFormat": "Syncfusion",
            "cleanJSON": true,
            "computedColumns": [{"name": "total", "expression": "a + b"}],
            "sort": [{"column": "name", "direction": "DESC"}],
            "filters": [{"column": "name", "operator": "ILIKE", "value": "%a%", "logicOperator": "OR"}]
        }))
        .unwrap();
        assert!(opts.skip_count && opts.clean_json);
        assert_eq!(opts.custom_sql_where.as_deref(), Some("x > 1"));
        assert_eq!(opts.response_format, ResponseFormat::Syncfusion);
        assert_eq!(opts.sort[0].direction, Direction::Desc);
        assert_eq!(opts.filters[0].operator, FilterOperator::ILike);
        assert_eq!(opts.filters[0].logic_operator, LogicOperator::Or);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let opts: RequestOptions = serde_json::from_value(json!({
            "filters": [{"column": "id"}],
            "sort": [{"column": "id", "direction": "sideways"}],
            "preload": [{"name": "employees"}]
        }))
        .unwrap();
        assert_eq!(opts.filters[0].operator, FilterOperator::Eq);
        assert_eq!(opts.filters[0].value, Value::Null);
        assert_eq!(opts.sort[0].direction, Direction::Asc);
        assert_eq!(opts.preload[0].relation, "employees");
        assert_eq!(opts.limit, None);
    }
}
