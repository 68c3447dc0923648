//! tokio-postgres adapter over a deadpool connection pool.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, GenericClient, NoTls, Row, Transaction};

use crate::error::QueryError;
use crate::model::EntityDescriptor;
use crate::query::{Capability, Database, DeleteQuery, ExecResult, InsertQuery, SelectQuery, TxFn, UpdateQuery};
use crate::sql::{
    last_insert_id, render_count, render_delete, render_insert, render_raw, render_select, render_update, PgParam,
    QueryBuf,
};

pub const BACKEND: &str = "postgres";

#[derive(Clone)]
pub struct PostgresDatabase {
    pool: Pool,
}

impl PostgresDatabase {
    pub fn new(pool: Pool) -> Self {
        PostgresDatabase { pool }
    }

    /// Builds the pool; connections are opened lazily on first use.
    pub fn connect(url: &str, max_size: usize) -> Result<Self, QueryError> {
        let mut cfg = Config::new();
        cfg.url = Some(url.to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(max_size));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| QueryError::Connect(e.to_string()))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

pub struct PostgresTxDatabase<'c> {
    tx: Mutex<Transaction<'c>>,
}

fn params(buf: &QueryBuf) -> Vec<PgParam> {
    tracing::debug!(sql = %buf.sql, params = ?buf.params, "query");
    buf.params.iter().map(PgParam::from_bind).collect()
}

async fn fetch_rows<C: GenericClient + Sync>(client: &C, buf: &QueryBuf) -> Result<Vec<Value>, QueryError> {
    let values = params(buf);
    let refs: Vec<&(dyn ToSql + Sync)> = values.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
    let rows = client.query(buf.sql.as_str(), &refs).await?;
    Ok(rows.iter().map(row_to_json).collect())
}

async fn fetch_count<C: GenericClient + Sync>(client: &C, buf: &QueryBuf) -> Result<i64, QueryError> {
    let values = params(buf);
    let refs: Vec<&(dyn ToSql + Sync)> = values.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
    let row = client.query_one(buf.sql.as_str(), &refs).await?;
    Ok(row.try_get::<_, i64>(0)?)
}

async fn execute<C: GenericClient + Sync>(client: &C, buf: &QueryBuf) -> Result<ExecResult, QueryError> {
    let values = params(buf);
    let refs: Vec<&(dyn ToSql + Sync)> = values.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
    let rows_affected = client.execute(buf.sql.as_str(), &refs).await?;
    Ok(ExecResult {
        rows_affected,
        ..Default::default()
    })
}

async fn write<C: GenericClient + Sync>(
    client: &C,
    buf: &QueryBuf,
    model: Option<&EntityDescriptor>,
    returning: bool,
    insert: bool,
) -> Result<ExecResult, QueryError> {
    if !returning {
        return execute(client, buf).await;
    }
    let rows = fetch_rows(client, buf).await?;
    Ok(ExecResult {
        rows_affected: rows.len() as u64,
        last_insert_id: if insert { last_insert_id(model, &rows) } else { None },
        rows,
    })
}

async fn select_on<C: GenericClient + Sync>(client: &C, q: &SelectQuery) -> Result<Vec<Value>, QueryError> {
    fetch_rows(client, &render_select(q)?).await
}

async fn count_on<C: GenericClient + Sync>(client: &C, q: &SelectQuery) -> Result<i64, QueryError> {
    fetch_count(client, &render_count(q)?).await
}

async fn insert_on<C: GenericClient + Sync>(client: &C, q: &InsertQuery) -> Result<ExecResult, QueryError> {
    write(client, &render_insert(q, true)?, q.model.as_deref(), !q.returning.is_empty(), true).await
}

async fn update_on<C: GenericClient + Sync>(client: &C, q: &UpdateQuery) -> Result<ExecResult, QueryError> {
    write(client, &render_update(q, true)?, q.model.as_deref(), !q.returning.is_empty(), false).await
}

async fn delete_on<C: GenericClient + Sync>(client: &C, q: &DeleteQuery) -> Result<ExecResult, QueryError> {
    write(client, &render_delete(q, true)?, q.model.as_deref(), !q.returning.is_empty(), false).await
}

#[async_trait]
impl Database for PostgresDatabase {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(capability, Capability::Returning | Capability::LastInsertId)
    }

    async fn select(&self, query: &SelectQuery) -> Result<Vec<Value>, QueryError> {
        let client = self.pool.get().await?;
        let pg: &Client = &client;
        select_on(pg, query).await
    }

    async fn count(&self, query: &SelectQuery) -> Result<i64, QueryError> {
        let client = self.pool.get().await?;
        let pg: &Client = &client;
        count_on(pg, query).await
    }

    async fn insert(&self, query: &InsertQuery) -> Result<ExecResult, QueryError> {
        let client = self.pool.get().await?;
        let pg: &Client = &client;
        insert_on(pg, query).await
    }

    async fn update(&self, query: &UpdateQuery) -> Result<ExecResult, QueryError> {
        let client = self.pool.get().await?;
        let pg: &Client = &client;
        update_on(pg, query).await
    }

    async fn delete(&self, query: &DeleteQuery) -> Result<ExecResult, QueryError> {
        let client = self.pool.get().await?;
        let pg: &Client = &client;
        delete_on(pg, query).await
    }

    async fn exec(&self, sql: &str, args: &[Value]) -> Result<ExecResult, QueryError> {
        let client = self.pool.get().await?;
        let pg: &Client = &client;
        execute(pg, &render_raw(sql, args)).await
    }

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Value>, QueryError> {
        let client = self.pool.get().await?;
        let pg: &Client = &client;
        fetch_rows(pg, &render_raw(sql, args)).await
    }

    async fn run_in_transaction<'a>(&'a self, f: TxFn<'a>) -> Result<(), QueryError> {
        let mut client = self.pool.get().await?;
        let pg: &mut Client = &mut client;
        let tx = pg.transaction().await?;
        let handle = PostgresTxDatabase { tx: Mutex::new(tx) };
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
impl<'c> Database for PostgresTxDatabase<'c> {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(capability, Capability::Returning | Capability::LastInsertId)
    }

    async fn select(&self, query: &SelectQuery) -> Result<Vec<Value>, QueryError> {
        let tx = self.tx.lock().await;
        select_on(&*tx, query).await
    }

    async fn count(&self, query: &SelectQuery) -> Result<i64, QueryError> {
        let tx = self.tx.lock().await;
        count_on(&*tx, query).await
    }

    async fn insert(&self, query: &InsertQuery) -> Result<ExecResult, QueryError> {
        let tx = self.tx.lock().await;
        insert_on(&*tx, query).await
    }

    async fn update(&self, query: &UpdateQuery) -> Result<ExecResult, QueryError> {
        let tx = self.tx.lock().await;
        update_on(&*tx, query).await
    }

    async fn delete(&self, query: &DeleteQuery) -> Result<ExecResult, QueryError> {
        let tx = self.tx.lock().await;
        delete_on(&*tx, query).await
    }

    async fn exec(&self, sql: &str, args: &[Value]) -> Result<ExecResult, QueryError> {
        let tx = self.tx.lock().await;
        execute(&*tx, &render_raw(sql, args)).await
    }

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Value>, QueryError> {
        let tx = self.tx.lock().await;
        fetch_rows(&*tx, &render_raw(sql, args)).await
    }

    async fn run_in_transaction<'a>(&'a self, _f: TxFn<'a>) -> Result<(), QueryError> {
        Err(QueryError::UnsupportedNesting)
    }
}

fn row_to_json(row: &Row) -> Value {
    let mut map = Map::new();
    for (idx, col) in row.columns().iter().enumerate() {
        map.insert(col.name().to_string(), extract_value(row, idx, col.type_()));
    }
    Value::Object(map)
}

fn extract_value(row: &Row, idx: usize, pg_type: &Type) -> Value {
    let decoded: Result<Option<Value>, tokio_postgres::Error> = match *pg_type {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx).map(|v| v.map(Value::Bool)),
        Type::INT2 => row.try_get::<_, Option<i16>>(idx).map(|v| v.map(Value::from)),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx).map(|v| v.map(Value::from)),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx).map(|v| v.map(Value::from)),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .map(|v| v.map(|n| Value::from(f64::from(n)))),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx).map(|v| v.map(Value::from)),
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)
            .map(|v| v.map(|u| Value::String(u.to_string()))),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .map(|v| v.map(|d| Value::String(d.to_rfc3339()))),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .map(|v| v.map(|d| Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)
            .map(|v| v.map(|d| Value::String(d.format("%Y-%m-%d").to_string()))),
        Type::TIME => row
            .try_get::<_, Option<NaiveTime>>(idx)
            .map(|v| v.map(|t| Value::String(t.format("%H:%M:%S%.f").to_string()))),
        Type::JSON | Type::JSONB => row.try_get::<_, Option<Value>>(idx),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .map(|v| v.map(|b| Value::String(String::from_utf8_lossy(&b).into_owned()))),
        _ => row.try_get::<_, Option<String>>(idx).map(|v| v.map(Value::String)),
    };
    match decoded {
        Ok(v) => v.unwrap_or(Value::Null),
        Err(e) => {
            tracing::debug!(column = idx, pg_type = %pg_type, error = %e, "undecodable column");
            Value::Null
        }
    }
}
