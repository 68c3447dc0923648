//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::response::Envelope;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Registry and descriptor failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("model already registered: {0}")]
    AlreadyRegistered(String),
    #[error("model does not unwrap to a struct: {0}")]
    InvalidShape(String),
    #[error("model not found: {0}")]
    NotFound(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Failures raised by the query abstraction and its backend adapters.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("database: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("database: {}", postgres_message(.0))]
    Postgres(#[from] tokio_postgres::Error),
    #[error("connection pool: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    #[error("connect: {0}")]
    Connect(String),
    #[error("nested transactions are not supported")]
    UnsupportedNesting,
    #[error("query has no table")]
    MissingTable,
    #[error("refusing to {0} without a WHERE clause")]
    MissingPredicate(&'static str),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Rejected(String),
}

/// Server-reported detail (severity, SQLSTATE, message, detail, constraint)
/// when there is one; otherwise the error and its source chain.
fn postgres_message(err: &tokio_postgres::Error) -> String {
    if let Some(db) = err.as_db_error() {
        let mut out = format!("{} {}: {}", db.severity(), db.code().code(), db.message());
        if let Some(detail) = db.detail() {
            out.push_str(&format!(" ({})", detail));
        }
        if let Some(constraint) = db.constraint() {
            out.push_str(&format!(" [constraint {}]", constraint));
        }
        return out;
    }
    let mut out = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !out.contains(&cause_text) {
            out.push_str(": ");
            out.push_str(&cause_text);
        }
        source = cause.source();
    }
    out
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("invalid entity: {0}")]
    InvalidEntity(String),
    #[error("invalid model type: {0}")]
    InvalidModelType(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("missing id: {0}")]
    MissingId(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("query: {0}")]
    Query(QueryError),
    #[error("internal: {0}")]
    Internal(String),
}

impl From<ModelError> for AppError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::NotFound(name) => AppError::InvalidEntity(name),
            ModelError::InvalidShape(name) => AppError::InvalidModelType(name),
            ModelError::InvalidData(msg) => AppError::InvalidData(msg),
            ModelError::AlreadyRegistered(name) => AppError::Internal(format!("model already registered: {}", name)),
        }
    }
}

impl From<QueryError> for AppError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::NotFound(what) => AppError::NotFound(what),
            other => AppError::Query(other),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidEntity(_)
            | AppError::BadRequest(_)
            | AppError::InvalidData(_)
            | AppError::MissingId(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidOperation(_) => StatusCode::METHOD_NOT_ALLOWED,
            AppError::InvalidModelType(_) | AppError::Query(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidEntity(_) => "invalid_entity",
            AppError::InvalidModelType(_) => "invalid_model_type",
            AppError::InvalidOperation(_) => "invalid_operation",
            AppError::BadRequest(_) => "bad_request",
            AppError::InvalidData(_) => "invalid_data",
            AppError::MissingId(_) => "missing_id",
            AppError::NotFound(_) => "not_found",
            AppError::Query(_) => "query_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Message safe to hand to the client. Server-side failures stay generic.
    pub fn public_message(&self) -> String {
        if self.status().is_server_error() {
            match self {
                AppError::Query(_) => "query failed".to_string(),
                AppError::InvalidModelType(_) => "entity is misconfigured".to_string(),
                _ => "internal server error".to_string(),
            }
        } else {
            self.to_string()
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        Envelope::failure(self.code(), self.public_message(), None)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        (status, Json(self.to_envelope())).into_response()
    }
}
