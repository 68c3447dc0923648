//! Entity handlers. Each one turns the HTTP request into a [`CrudRequest`]
//! and hands it to the shared [`crate::service::CrudHandler`].

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::Method,
    Json,
};
use regex::Regex;
use serde_json::Value;

use crate::error::AppError;
use crate::extractors::HeaderOptions;
use crate::service::{CrudRequest, Operation, RequestBody};
use crate::state::AppState;

const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

fn validate_identifier(kind: &str, value: &str) -> Result<(), AppError> {
    let re = Regex::new(IDENTIFIER_PATTERN).map_err(|e| AppError::Internal(e.to_string()))?;
    if re.is_match(value) {
        Ok(())
    } else {
        Err(AppError::InvalidEntity(format!("{} '{}' is not a valid identifier", kind, value)))
    }
}

fn validate_path(schema: &str, entity: &str) -> Result<(), AppError> {
    validate_identifier("schema", schema)?;
    validate_identifier("entity", entity)
}

fn parse_body(body: &Bytes) -> Result<RequestBody, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::BadRequest("request body is required".into()));
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("malformed request body: {}", e)))
}

async fn run(state: &AppState, request: CrudRequest) -> Result<Json<Value>, AppError> {
    state.crud.handle(request).await.map(Json)
}

/// POST /:schema/:entity
pub async fn post(
    State(state): State<AppState>,
    Path((schema, entity)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    validate_path(&schema, &entity)?;
    let request = CrudRequest::from_body(schema, entity, None, parse_body(&body)?)?;
    run(&state, request).await
}

/// POST /:schema/:entity/:id
pub async fn post_by_id(
    State(state): State<AppState>,
    Path((schema, entity, id)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    validate_path(&schema, &entity)?;
    let request = CrudRequest::from_body(schema, entity, Some(id), parse_body(&body)?)?;
    run(&state, request).await
}

/// GET /:schema/:entity
pub async fn list(
    State(state): State<AppState>,
    Path((schema, entity)): Path<(String, String)>,
    HeaderOptions(options): HeaderOptions,
) -> Result<Json<Value>, AppError> {
    validate_path(&schema, &entity)?;
    let request = CrudRequest::new(schema, entity, Operation::Read).with_options(options);
    run(&state, request).await
}

/// GET /:schema/:entity/:id
pub async fn read(
    State(state): State<AppState>,
    Path((schema, entity, id)): Path<(String, String, String)>,
    HeaderOptions(options): HeaderOptions,
) -> Result<Json<Value>, AppError> {
    validate_path(&schema, &entity)?;
    let request = CrudRequest::new(schema, entity, Operation::Read)
        .with_id(id)
        .with_options(options);
    run(&state, request).await
}

/// GET /:schema/:entity/metadata
pub async fn metadata(
    State(state): State<AppState>,
    Path((schema, entity)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    validate_path(&schema, &entity)?;
    run(&state, CrudRequest::new(schema, entity, Operation::Meta)).await
}

/// Any method the entity routes do not serve.
pub async fn method_not_allowed(method: Method) -> AppError {
    AppError::InvalidOperation(method.to_string())
}
