//! sqlx adapter over a PostgreSQL pool.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgConnection, Postgres, Row, Transaction, TypeInfo};
use tokio::sync::Mutex;

use crate::error::QueryError;
use crate::model::EntityDescriptor;
use crate::query::{Capability, Database, DeleteQuery, ExecResult, InsertQuery, SelectQuery, TxFn, UpdateQuery};
use crate::sql::{
    last_insert_id, render_count, render_delete, render_insert, render_raw, render_select, render_update, PgBindValue,
    QueryBuf,
};

pub const BACKEND: &str = "sqlx";

#[derive(Clone)]
pub struct SqlxDatabase {
    pool: PgPool,
}

impl SqlxDatabase {
    pub fn new(pool: PgPool) -> Self {
        SqlxDatabase { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, QueryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Handle bound to one open transaction.
pub struct SqlxTxDatabase {
    tx: Mutex<Transaction<'static, Postgres>>,
}

fn bind(buf: &QueryBuf) -> Query<'_, Postgres, PgArguments> {
    tracing::debug!(sql = %buf.sql, params = ?buf.params, "query");
    let mut query = sqlx::query(&buf.sql);
    for p in &buf.params {
        query = query.bind(PgBindValue::from_bind(p));
    }
    query
}

async fn fetch_rows(conn: &mut PgConnection, buf: &QueryBuf) -> Result<Vec<Value>, QueryError> {
    let rows = bind(buf).fetch_all(&mut *conn).await?;
    Ok(rows.iter().map(row_to_json).collect())
}

async fn fetch_count(conn: &mut PgConnection, buf: &QueryBuf) -> Result<i64, QueryError> {
    let row = bind(buf).fetch_one(&mut *conn).await?;
    Ok(row.try_get::<i64, _>(0)?)
}

async fn execute(conn: &mut PgConnection, buf: &QueryBuf) -> Result<ExecResult, QueryError> {
    let done = bind(buf).execute(&mut *conn).await?;
    Ok(ExecResult {
        rows_affected: done.rows_affected(),
        ..Default::default()
    })
}

async fn write(
    conn: &mut PgConnection,
    buf: &QueryBuf,
    model: Option<&EntityDescriptor>,
    returning: bool,
) -> Result<ExecResult, QueryError> {
    if !returning {
        return execute(conn, buf).await;
    }
    let rows = fetch_rows(conn, buf).await?;
    Ok(ExecResult {
        rows_affected: rows.len() as u64,
        last_insert_id: last_insert_id(model, &rows),
        rows,
    })
}

async fn select_on(conn: &mut PgConnection, q: &SelectQuery) -> Result<Vec<Value>, QueryError> {
    fetch_rows(conn, &render_select(q)?).await
}

async fn count_on(conn: &mut PgConnection, q: &SelectQuery) -> Result<i64, QueryError> {
    fetch_count(conn, &render_count(q)?).await
}

async fn insert_on(conn: &mut PgConnection, q: &InsertQuery) -> Result<ExecResult, QueryError> {
    write(conn, &render_insert(q, true)?, q.model.as_deref(), !q.returning.is_empty()).await
}

async fn update_on(conn: &mut PgConnection, q: &UpdateQuery) -> Result<ExecResult, QueryError> {
    let mut res = write(conn, &render_update(q, true)?, q.model.as_deref(), !q.returning.is_empty()).await?;
    res.last_insert_id = None;
    Ok(res)
}

async fn delete_on(conn: &mut PgConnection, q: &DeleteQuery) -> Result<ExecResult, QueryError> {
    let mut res = write(conn, &render_delete(q, true)?, q.model.as_deref(), !q.returning.is_empty()).await?;
    res.last_insert_id = None;
    Ok(res)
}

fn supports(capability: Capability) -> bool {
    match capability {
        Capability::Returning | Capability::LastInsertId => true,
    }
}

#[async_trait]
impl Database for SqlxDatabase {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn supports(&self, capability: Capability) -> bool {
        supports(capability)
    }

    async fn select(&self, query: &SelectQuery) -> Result<Vec<Value>, QueryError> {
        let mut conn = self.pool.acquire().await?;
        select_on(&mut conn, query).await
    }

    async fn count(&self, query: &SelectQuery) -> Result<i64, QueryError> {
        let mut conn = self.pool.acquire().await?;
        count_on(&mut conn, query).await
    }

    async fn insert(&self, query: &InsertQuery) -> Result<ExecResult, QueryError> {
        let mut conn = self.pool.acquire().await?;
        insert_on(&mut conn, query).await
    }

    async fn update(&self, query: &UpdateQuery) -> Result<ExecResult, QueryError> {
        let mut conn = self.pool.acquire().await?;
        update_on(&mut conn, query).await
    }

    async fn delete(&self, query: &DeleteQuery) -> Result<ExecResult, QueryError> {
        let mut conn = self.pool.acquire().await?;
        delete_on(&mut conn, query).await
    }

    async fn exec(&self, sql: &str, args: &[Value]) -> Result<ExecResult, QueryError> {
        let mut conn = self.pool.acquire().await?;
        execute(&mut conn, &render_raw(sql, args)).await
    }

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Value>, QueryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_rows(&mut conn, &render_raw(sql, args)).await
    }

    async fn run_in_transaction<'a>(&'a self, f: TxFn<'a>) -> Result<(), QueryError> {
        let tx = self.pool.begin().await?;
        let handle = SqlxTxDatabase { tx: Mutex::new(tx) };
        let result = f(&handle).await;
        let tx = handle.tx.into_inner();
        match result {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    tracing::warn!(error = %rb, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Database for SqlxTxDatabase {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn supports(&self, capability: Capability) -> bool {
        supports(capability)
    }

    async fn select(&self, query: &SelectQuery) -> Result<Vec<Value>, QueryError> {
        let mut tx = self.tx.lock().await;
        select_on(&mut tx, query).await
    }

    async fn count(&self, query: &SelectQuery) -> Result<i64, QueryError> {
        let mut tx = self.tx.lock().await;
        count_on(&mut tx, query).await
    }

    async fn insert(&self, query: &InsertQuery) -> Result<ExecResult, QueryError> {
        let mut tx = self.tx.lock().await;
        insert_on(&mut tx, query).await
    }

    async fn update(&self, query: &UpdateQuery) -> Result<ExecResult, QueryError> {
        let mut tx = self.tx.lock().await;
        update_on(&mut tx, query).await
    }

    async fn delete(&self, query: &DeleteQuery) -> Result<ExecResult, QueryError> {
        let mut tx = self.tx.lock().await;
        delete_on(&mut tx, query).await
    }

    async fn exec(&self, sql: &str, args: &[Value]) -> Result<ExecResult, QueryError> {
        let mut tx = self.tx.lock().await;
        execute(&mut tx, &render_raw(sql, args)).await
    }

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Value>, QueryError> {
        let mut tx = self.tx.lock().await;
        fetch_rows(&mut tx, &render_raw(sql, args)).await
    }

    async fn run_in_transaction<'a>(&'a self, _f: TxFn<'a>) -> Result<(), QueryError> {
        Err(QueryError::UnsupportedNesting)
    }
}

fn row_to_json(row: &PgRow) -> Value {
    let mut map = Map::new();
    for (idx, col) in row.columns().iter().enumerate() {
        map.insert(col.name().to_string(), cell_to_value(row, idx, col.type_info().name()));
    }
    Value::Object(map)
}

fn cell_to_value(row: &PgRow, idx: usize, type_name: &str) -> Value {
    let decoded: Result<Option<Value>, sqlx::Error> = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(idx).map(|v| v.map(Value::Bool)),
        "INT2" => row.try_get::<Option<i16>, _>(idx).map(|v| v.map(Value::from)),
        "INT4" => row.try_get::<Option<i32>, _>(idx).map(|v| v.map(Value::from)),
        "INT8" => row.try_get::<Option<i64>, _>(idx).map(|v| v.map(Value::from)),
        "FLOAT4" => row.try_get::<Option<f32>, _>(idx).map(|v| v.map(|n| Value::from(f64::from(n)))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(idx).map(|v| v.map(Value::from)),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(idx)
            .map(|v| v.map(|u| Value::String(u.to_string()))),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .map(|v| v.map(|d| Value::String(d.to_rfc3339()))),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .map(|v| v.map(|d| Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(idx)
            .map(|v| v.map(|d| Value::String(d.format("%Y-%m-%d").to_string()))),
        "TIME" => row
            .try_get::<Option<chrono::NaiveTime>, _>(idx)
            .map(|v| v.map(|t| Value::String(t.format("%H:%M:%S%.f").to_string()))),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(idx),
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .map(|v| v.map(|b| Value::String(String::from_utf8_lossy(&b).into_owned()))),
        _ => row.try_get::<Option<String>, _>(idx).map(|v| v.map(Value::String)),
    };
    match decoded {
        Ok(v) => v.unwrap_or(Value::Null),
        Err(e) => {
            tracing::debug!(column = idx, type_name, error = %e, "undecodable column");
            Value::Null
        }
    }
}
