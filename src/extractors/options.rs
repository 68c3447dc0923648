//! Read options carried in request headers, one header per option field.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use serde::de::DeserializeOwned;

use crate::error::AppError;
use crate::options::RequestOptions;
use crate::response::ResponseFormat;

pub const FILTERS_HEADER: &str = "X-Filters";
pub const SORT_HEADER: &str = "X-Sort";
pub const COLUMNS_HEADER: &str = "X-Columns";
pub const OMIT_COLUMNS_HEADER: &str = "X-Omit-Columns";
pub const PRELOAD_HEADER: &str = "X-Preload";
pub const COMPUTED_COLUMNS_HEADER: &str = "X-Computed-Columns";
pub const CUSTOM_OPERATORS_HEADER: &str = "X-Custom-Operators";
pub const LIMIT_HEADER: &str = "X-Limit";
pub const OFFSET_HEADER: &str = "X-Offset";
pub const SKIP_COUNT_HEADER: &str = "X-Skip-Count";
pub const DISTINCT_HEADER: &str = "X-Distinct";
pub const CLEAN_JSON_HEADER: &str = "X-Clean-JSON";
pub const CUSTOM_SQL_WHERE_HEADER: &str = "X-Custom-SQL-Where";
pub const CUSTOM_SQL_OR_HEADER: &str = "X-Custom-SQL-Or";
pub const RESPONSE_FORMAT_HEADER: &str = "X-Response-Format";

pub const OPTION_HEADERS: [&str; 15] = [
    FILTERS_HEADER,
    SORT_HEADER,
    COLUMNS_HEADER,
    OMIT_COLUMNS_HEADER,
    PRELOAD_HEADER,
    COMPUTED_COLUMNS_HEADER,
    CUSTOM_OPERATORS_HEADER,
    LIMIT_HEADER,
    OFFSET_HEADER,
    SKIP_COUNT_HEADER,
    DISTINCT_HEADER,
    CLEAN_JSON_HEADER,
    CUSTOM_SQL_WHERE_HEADER,
    CUSTOM_SQL_OR_HEADER,
    RESPONSE_FORMAT_HEADER,
];

/// Options for header-driven reads. Absent headers keep defaults; a header
/// that does not parse rejects the request with `bad_request`.
#[derive(Clone, Debug, Default)]
pub struct HeaderOptions(pub RequestOptions);

fn header<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, AppError> {
    match parts.headers.get(name) {
        None => Ok(None),
        Some(v) => v
            .to_str()
            .map(|s| Some(s.trim()).filter(|s| !s.is_empty()))
            .map_err(|_| AppError::BadRequest(format!("{} is not valid text", name))),
    }
}

fn json_header<T: DeserializeOwned>(parts: &Parts, name: &str) -> Result<Option<T>, AppError> {
    header(parts, name)?
        .map(|s| serde_json::from_str(s).map_err(|e| AppError::BadRequest(format!("{}: {}", name, e))))
        .transpose()
}

fn number_header(parts: &Parts, name: &str) -> Result<Option<u64>, AppError> {
    header(parts, name)?
        .map(|s| {
            s.parse()
                .map_err(|_| AppError::BadRequest(format!("{} must be a non-negative integer", name)))
        })
        .transpose()
}

fn bool_header(parts: &Parts, name: &str) -> Result<bool, AppError> {
    match header(parts, name)?.map(str::to_ascii_lowercase).as_deref() {
        None | Some("false") | Some("0") | Some("no") => Ok(false),
        Some("true") | Some("1") | Some("yes") => Ok(true),
        Some(_) => Err(AppError::BadRequest(format!("{} must be true or false", name))),
    }
}

impl HeaderOptions {
    pub fn from_parts(parts: &Parts) -> Result<Self, AppError> {
        Ok(HeaderOptions(RequestOptions {
            columns: json_header(parts, COLUMNS_HEADER)?.unwrap_or_default(),
            omit_columns: json_header(parts, OMIT_COLUMNS_HEADER)?.unwrap_or_default(),
            filters: json_header(parts, FILTERS_HEADER)?.unwrap_or_default(),
            sort: json_header(parts, SORT_HEADER)?.unwrap_or_default(),
            limit: number_header(parts, LIMIT_HEADER)?,
            offset: number_header(parts, OFFSET_HEADER)?,
            preload: json_header(parts, PRELOAD_HEADER)?.unwrap_or_default(),
            custom_operators: json_header(parts, CUSTOM_OPERATORS_HEADER)?.unwrap_or_default(),
            computed_columns: json_header(parts, COMPUTED_COLUMNS_HEADER)?.unwrap_or_default(),
            skip_count: bool_header(parts, SKIP_COUNT_HEADER)?,
            distinct: bool_header(parts, DISTINCT_HEADER)?,
            custom_sql_where: header(parts, CUSTOM_SQL_WHERE_HEADER)?.map(str::to_string),
            custom_sql_or: header(parts, CUSTOM_SQL_OR_HEADER)?.map(str::to_string),
            response_format: header(parts, RESPONSE_FORMAT_HEADER)?
                .map(ResponseFormat::parse)
                .unwrap_or_default(),
            clean_json: bool_header(parts, CLEAN_JSON_HEADER)?,
        }))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for HeaderOptions
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        HeaderOptions::from_parts(parts)
    }
}
