//! The backend contract every adapter implements.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::QueryError;
use crate::query::select::{Select, SelectQuery};
use crate::query::write::{Delete, DeleteQuery, Insert, InsertQuery, Update, UpdateQuery};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Body of a transaction. It receives a handle bound to the transaction's
/// single connection.
pub type TxFn<'a> =
    Box<dyn for<'t> FnOnce(&'t dyn Database) -> BoxFuture<'t, Result<(), QueryError>> + Send + 'a>;

/// Features that not every backend provides natively.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    Returning,
    LastInsertId,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecResult {
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
    /// Rows produced by RETURNING; empty when the backend cannot return rows.
    pub rows: Vec<Value>,
}

#[async_trait]
pub trait Database: Send + Sync {
    fn backend(&self) -> &'static str;

    fn supports(&self, capability: Capability) -> bool;

    async fn select(&self, query: &SelectQuery) -> Result<Vec<Value>, QueryError>;

    async fn count(&self, query: &SelectQuery) -> Result<i64, QueryError>;

    async fn exists(&self, query: &SelectQuery) -> Result<bool, QueryError> {
        Ok(self.count(query).await? > 0)
    }

    async fn insert(&self, query: &InsertQuery) -> Result<ExecResult, QueryError>;

    async fn update(&self, query: &UpdateQuery) -> Result<ExecResult, QueryError>;

    async fn delete(&self, query: &DeleteQuery) -> Result<ExecResult, QueryError>;

    /// Raw statement; `?` placeholders are bound from `args`.
    async fn exec(&self, sql: &str, args: &[Value]) -> Result<ExecResult, QueryError>;

    /// Raw query returning rows as JSON objects.
    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Value>, QueryError>;

    /// Runs `f` on a single transactional connection. Commits when `f`
    /// returns `Ok`, rolls back and returns `f`'s error unchanged otherwise.
    /// Handles that are already inside a transaction fail with
    /// [`QueryError::UnsupportedNesting`].
    async fn run_in_transaction<'a>(&'a self, f: TxFn<'a>) -> Result<(), QueryError>;
}

impl<'d> dyn Database + 'd {
    pub fn new_select(&self) -> Select<'_> {
        Select::new(self)
    }

    pub fn new_insert(&self) -> Insert<'_> {
        Insert::new(self)
    }

    pub fn new_update(&self) -> Update<'_> {
        Update::new(self)
    }

    pub fn new_delete(&self) -> Delete<'_> {
        Delete::new(self)
    }
}

/// Generic front for [`Database::run_in_transaction`] so callers can pass a
/// plain closure.
///
/// ```ignore
/// transaction(db, |tx| Box::pin(async move {
///     tx.new_insert().table("audit").value("event", json!("x")).exec().await?;
///     Ok(())
/// })).await?;
/// ```
pub async fn transaction<'a, F>(db: &'a dyn Database, f: F) -> Result<(), QueryError>
where
    F: for<'t> FnOnce(&'t dyn Database) -> BoxFuture<'t, Result<(), QueryError>> + Send + 'a,
{
    db.run_in_transaction(Box::new(f)).await
}
