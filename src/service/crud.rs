//! Generic CRUD orchestration: resolve the entity, run the operation against
//! the configured [`Database`], render the response body.

use std::any::Any;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::error::{AppError, QueryError};
use crate::model::{EntityDescriptor, ModelRegistry, TableMetadata};
use crate::options::{apply, compile, RequestOptions};
use crate::query::{transaction, Condition, Database};
use crate::response::{render_success, Metadata};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Read,
    Create,
    Update,
    Delete,
    /// Table metadata for the entity.
    Meta,
}

impl Operation {
    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(Operation::Read),
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            "meta" | "metadata" => Ok(Operation::Meta),
            other => Err(AppError::InvalidOperation(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Meta => "meta",
        }
    }
}

/// JSON body of `POST /{schema}/{entity}[/{id}]`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RequestBody {
    pub operation: String,
    pub data: Option<Value>,
    pub id: Option<Value>,
    pub options: RequestOptions,
}

#[derive(Clone, Debug)]
pub struct CrudRequest {
    pub schema: String,
    pub entity: String,
    /// Id taken from the URL; wins over `body_id`.
    pub id: Option<String>,
    pub body_id: Option<Value>,
    pub operation: Operation,
    pub data: Option<Value>,
    pub options: RequestOptions,
}

impl CrudRequest {
    pub fn new(schema: impl Into<String>, entity: impl Into<String>, operation: Operation) -> Self {
        CrudRequest {
            schema: schema.into(),
            entity: entity.into(),
            id: None,
            body_id: None,
            operation,
            data: None,
            options: RequestOptions::default(),
        }
    }

    pub fn from_body(
        schema: impl Into<String>,
        entity: impl Into<String>,
        id: Option<String>,
        body: RequestBody,
    ) -> Result<Self, AppError> {
        let operation = Operation::parse(&body.operation)?;
        Ok(CrudRequest {
            id,
            body_id: body.id.filter(|v| !v.is_null()),
            data: body.data,
            options: body.options,
            ..CrudRequest::new(schema, entity, operation)
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Clone)]
pub struct CrudHandler {
    registry: Arc<ModelRegistry>,
    db: Arc<dyn Database>,
}

impl CrudHandler {
    pub fn new(registry: Arc<ModelRegistry>, db: Arc<dyn Database>) -> Self {
        CrudHandler { registry, db }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    /// Entity name to descriptor placed at `schema`/`entity`.
    pub fn resolve(&self, schema: &str, entity: &str) -> Result<Arc<EntityDescriptor>, AppError> {
        let model = self.registry.resolve(schema, entity)?;
        let descriptor = EntityDescriptor::describe(&model.prototype)?;
        Ok(Arc::new(descriptor.located(Some(schema), entity)))
    }

    pub fn metadata(&self, schema: &str, entity: &str) -> Result<TableMetadata, AppError> {
        let descriptor = self.resolve(schema, entity)?;
        Ok(TableMetadata::from_descriptor(&descriptor))
    }

    /// Runs one request. A panic anywhere below is contained here and becomes
    /// an `internal_error`.
    pub async fn handle(&self, request: CrudRequest) -> Result<Value, AppError> {
        let this = self.clone();
        let operation = request.operation;
        let entity = format!("{}.{}", request.schema, request.entity);
        match tokio::spawn(async move { this.dispatch(request).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                tracing::error!(operation = operation.name(), entity = %entity, panic = %message, "recovered from panic");
                Err(AppError::Internal(message))
            }
            Err(e) => Err(AppError::Internal(e.to_string())),
        }
    }

    async fn dispatch(&self, request: CrudRequest) -> Result<Value, AppError> {
        let descriptor = self.resolve(&request.schema, &request.entity)?;
        tracing::debug!(operation = request.operation.name(), entity = %descriptor.name, "dispatch");
        let key = request_key(&descriptor, request.id.as_deref(), request.body_id.as_ref())?;
        let format = request.options.response_format;
        let clean = request.options.clean_json;
        match request.operation {
            Operation::Read => self.read(&descriptor, key, request.options).await,
            Operation::Meta => {
                let meta = serde_json::to_value(TableMetadata::from_descriptor(&descriptor))
                    .map_err(|e| AppError::Internal(e.to_string()))?;
                Ok(render_success(format, meta, None, clean))
            }
            Operation::Create => {
                let data = self.create(&descriptor, request.data).await?;
                Ok(render_success(format, data, None, clean))
            }
            Operation::Update => {
                let data = self.update(&descriptor, key, request.data).await?;
                Ok(render_success(format, data, None, clean))
            }
            Operation::Delete => {
                let data = self.delete(&descriptor, key, request.data).await?;
                Ok(render_success(format, data, None, clean))
            }
        }
    }

    async fn read(
        &self,
        descriptor: &Arc<EntityDescriptor>,
        key: Option<Key>,
        options: RequestOptions,
    ) -> Result<Value, AppError> {
        let id = match key {
            None => None,
            Some(Key::One(id)) => Some(id),
            Some(Key::Many(_)) => return Err(AppError::BadRequest("read takes a single id".into())),
        };
        let options = compile(descriptor, options);
        let select = self.db.new_select().model(descriptor.clone());
        let (select, total) = apply(select, descriptor, &options, id.as_ref()).await?;
        let metadata = Metadata {
            total,
            filtered: total,
            limit: options.limit,
            offset: options.offset,
        };
        let data = match &id {
            Some(id) => select
                .scan_one()
                .await?
                .ok_or_else(|| AppError::NotFound(format!("{} {}", descriptor.name, id)))?,
            None => Value::Array(select.scan().await?),
        };
        Ok(render_success(options.response_format, data, Some(metadata), options.clean_json))
    }

    async fn create(&self, descriptor: &Arc<EntityDescriptor>, data: Option<Value>) -> Result<Value, AppError> {
        match data {
            None | Some(Value::Null) => Err(AppError::InvalidData("create requires data".into())),
            Some(Value::Array(items)) => {
                if items.is_empty() {
                    return Err(AppError::InvalidData("create requires at least one item".into()));
                }
                let rows = items
                    .iter()
                    .map(|item| descriptor.normalize(item))
                    .collect::<Result<Vec<_>, _>>()?;
                let created = Arc::new(Mutex::new(Vec::with_capacity(rows.len())));
                let sink = created.clone();
                let desc = descriptor.clone();
                transaction(self.db.as_ref(), move |tx| {
                    Box::pin(async move {
                        for row in rows {
                            let value = insert_row(tx, &desc, row).await?;
                            sink.lock().await.push(value);
                        }
                        Ok(())
                    })
                })
                .await?;
                let rows = std::mem::take(&mut *created.lock().await);
                tracing::debug!(entity = %descriptor.name, rows = rows.len(), "batch created");
                Ok(Value::Array(rows))
            }
            Some(item) => {
                let row = descriptor.normalize(&item)?;
                Ok(insert_row(self.db.as_ref(), descriptor, row).await?)
            }
        }
    }

    async fn update(
        &self,
        descriptor: &Arc<EntityDescriptor>,
        key: Option<Key>,
        data: Option<Value>,
    ) -> Result<Value, AppError> {
        let data = data.ok_or_else(|| AppError::InvalidData("update requires data".into()))?;
        let pk = primary_key(descriptor);
        let changes: Vec<(Value, Map<String, Value>)> = match (key, data) {
            (_, Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in &items {
                    let mut set = descriptor.normalize(item)?;
                    let id = set
                        .remove(&pk)
                        .ok_or_else(|| AppError::MissingId(format!("each item must carry '{}'", pk)))?;
                    out.push((descriptor.coerce_key_value(&id)?, set));
                }
                out
            }
            (Some(Key::One(id)), item) => {
                let mut set = descriptor.normalize(&item)?;
                set.remove(&pk);
                vec![(id, set)]
            }
            (Some(Key::Many(ids)), item) => {
                let mut set = descriptor.normalize(&item)?;
                set.remove(&pk);
                ids.into_iter().map(|id| (id, set.clone())).collect()
            }
            (None, item) => {
                let mut set = descriptor.normalize(&item)?;
                let id = set
                    .remove(&pk)
                    .ok_or_else(|| AppError::MissingId("update requires an id".into()))?;
                vec![(descriptor.coerce_key_value(&id)?, set)]
            }
        };
        if changes.is_empty() {
            return Err(AppError::InvalidData("update requires at least one item".into()));
        }
        if changes.iter().any(|(_, set)| set.is_empty()) {
            return Err(AppError::InvalidData("no updatable columns in data".into()));
        }

        if changes.len() == 1 {
            let (id, set) = changes.into_iter().next().ok_or_else(|| AppError::Internal("empty update".into()))?;
            return Ok(update_row(self.db.as_ref(), descriptor, &pk, id, set).await?);
        }
        let updated = Arc::new(Mutex::new(Vec::with_capacity(changes.len())));
        let sink = updated.clone();
        let desc = descriptor.clone();
        transaction(self.db.as_ref(), move |tx| {
            Box::pin(async move {
                for (id, set) in changes {
                    let value = update_row(tx, &desc, &pk, id, set).await?;
                    sink.lock().await.push(value);
                }
                Ok(())
            })
        })
        .await?;
        let rows = std::mem::take(&mut *updated.lock().await);
        Ok(Value::Array(rows))
    }

    async fn delete(
        &self,
        descriptor: &Arc<EntityDescriptor>,
        key: Option<Key>,
        data: Option<Value>,
    ) -> Result<Value, AppError> {
        let pk = primary_key(descriptor);
        let ids = match (key, data) {
            (Some(Key::One(id)), _) => return Ok(delete_row(self.db.as_ref(), descriptor, &pk, id).await?),
            (Some(Key::Many(ids)), _) => ids,
            (None, Some(Value::Array(items))) => items
                .iter()
                .map(|item| match item {
                    Value::Object(obj) => {
                        let id = descriptor
                            .column(&pk)
                            .and_then(|c| obj.get(&c.json_name).or_else(|| obj.get(&c.name)))
                            .ok_or_else(|| AppError::MissingId(format!("each item must carry '{}'", pk)))?;
                        Ok(descriptor.coerce_key_value(id)?)
                    }
                    other => Ok(descriptor.coerce_key_value(other)?),
                })
                .collect::<Result<Vec<_>, AppError>>()?,
            (None, _) => return Err(AppError::MissingId("delete requires an id".into())),
        };
        if ids.is_empty() {
            return Err(AppError::MissingId("delete requires an id".into()));
        }
        let deleted = Arc::new(Mutex::new(Vec::with_capacity(ids.len())));
        let sink = deleted.clone();
        let desc = descriptor.clone();
        transaction(self.db.as_ref(), move |tx| {
            Box::pin(async move {
                for id in ids {
                    let value = delete_row(tx, &desc, &pk, id).await?;
                    sink.lock().await.push(value);
                }
                Ok(())
            })
        })
        .await?;
        let rows = std::mem::take(&mut *deleted.lock().await);
        Ok(Value::Array(rows))
    }
}

/// Id or ids addressed by a request.
#[derive(Clone, Debug, PartialEq)]
enum Key {
    One(Value),
    Many(Vec<Value>),
}

fn request_key(
    descriptor: &EntityDescriptor,
    url_id: Option<&str>,
    body_id: Option<&Value>,
) -> Result<Option<Key>, AppError> {
    if let Some(id) = url_id.filter(|s| !s.trim().is_empty()) {
        return Ok(Some(Key::One(descriptor.coerce_key(id)?)));
    }
    match body_id {
        None => Ok(None),
        Some(Value::Array(ids)) => Ok(Some(Key::Many(
            ids.iter()
                .map(|id| descriptor.coerce_key_value(id))
                .collect::<Result<_, _>>()?,
        ))),
        Some(id) => Ok(Some(Key::One(descriptor.coerce_key_value(id)?))),
    }
}

fn primary_key(descriptor: &EntityDescriptor) -> String {
    descriptor
        .primary_key()
        .map(|c| c.name.clone())
        .unwrap_or_else(|| "id".to_string())
}

/// Returned row when the backend supports RETURNING, else the written values.
async fn insert_row(
    db: &dyn Database,
    descriptor: &Arc<EntityDescriptor>,
    row: Map<String, Value>,
) -> Result<Value, QueryError> {
    let res = db
        .new_insert()
        .model(descriptor.clone())
        .values(row.clone())
        .returning("*")
        .exec()
        .await?;
    Ok(res.rows.into_iter().next().unwrap_or(Value::Object(row)))
}

async fn update_row(
    db: &dyn Database,
    descriptor: &Arc<EntityDescriptor>,
    pk: &str,
    id: Value,
    set: Map<String, Value>,
) -> Result<Value, QueryError> {
    let res = db
        .new_update()
        .model(descriptor.clone())
        .set_map(set.clone())
        .where_(Condition::eq(pk, id.clone()))
        .returning("*")
        .exec()
        .await?;
    if res.rows_affected == 0 {
        return Err(QueryError::NotFound(format!("{} {}", descriptor.name, id)));
    }
    Ok(res.rows.into_iter().next().unwrap_or_else(|| {
        let mut row = set;
        row.insert(pk.to_string(), id);
        Value::Object(row)
    }))
}

async fn delete_row(
    db: &dyn Database,
    descriptor: &Arc<EntityDescriptor>,
    pk: &str,
    id: Value,
) -> Result<Value, QueryError> {
    let res = db
        .new_delete()
        .model(descriptor.clone())
        .where_(Condition::eq(pk, id.clone()))
        .returning("*")
        .exec()
        .await?;
    if res.rows_affected == 0 {
        return Err(QueryError::NotFound(format!("{} {}", descriptor.name, id)));
    }
    Ok(res.rows.into_iter().next().unwrap_or_else(|| {
        let mut row = Map::new();
        row.insert(pk.to_string(), id);
        Value::Object(row)
    }))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operations_parse_case_insensitively() {
        assert_eq!(Operation::parse("READ").unwrap(), Operation::Read);
        assert_eq!(Operation::parse(" metadata ").unwrap(), Operation::Meta);
        let err = Operation::parse("upsert").unwrap_err();
        assert_eq!(err.code(), "invalid_operation");
    }

    #[test]
    fn body_parses_with_defaults() {
        let body: RequestBody = serde_json::from_value(json!({
            "operation": "create",
            "data": {"id": "d1"}
        }))
        .unwrap();
        let req = CrudRequest::from_body("test", "departments", None, body).unwrap();
        assert_eq!(req.operation, Operation::Create);
        assert!(req.body_id.is_none());
        assert!(req.options.filters.is_empty());
    }

    #[test]
    fn panic_payloads_become_messages() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(42)), "panic");
    }
}
