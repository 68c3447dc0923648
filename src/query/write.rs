//! INSERT, UPDATE and DELETE clause accumulation.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::QueryError;
use crate::model::EntityDescriptor;
use crate::query::condition::Condition;
use crate::query::database::{Database, ExecResult};
use crate::query::select::TableRef;

#[derive(Clone, Debug, Default)]
pub struct InsertQuery {
    pub table: Option<TableRef>,
    pub model: Option<Arc<EntityDescriptor>>,
    pub rows: Vec<Map<String, Value>>,
    /// `*` selects every model column.
    pub returning: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct UpdateQuery {
    pub table: Option<TableRef>,
    pub model: Option<Arc<EntityDescriptor>>,
    pub set: Map<String, Value>,
    pub filter: Option<Condition>,
    pub returning: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct DeleteQuery {
    pub table: Option<TableRef>,
    pub model: Option<Arc<EntityDescriptor>>,
    pub filter: Option<Condition>,
    pub returning: Vec<String>,
}

fn push_filter(filter: &mut Option<Condition>, condition: Condition, or: bool) {
    *filter = Some(match filter.take() {
        None => condition,
        Some(prev) if or => prev.or(condition),
        Some(prev) => prev.and(condition),
    });
}

pub struct Insert<'a> {
    db: &'a dyn Database,
    query: InsertQuery,
}

impl<'a> Insert<'a> {
    pub fn new(db: &'a dyn Database) -> Self {
        Insert {
            db,
            query: InsertQuery::default(),
        }
    }

    pub fn model(mut self, descriptor: Arc<EntityDescriptor>) -> Self {
        if self.query.table.is_none() {
            self.query.table = Some(TableRef::of(&descriptor));
        }
        self.query.model = Some(descriptor);
        self
    }

    pub fn table(mut self, name: &str) -> Self {
        self.query.table = Some(TableRef::parse(name));
        self
    }

    /// Sets a column on the last row, starting one if none exists.
    pub fn value(mut self, column: impl Into<String>, value: Value) -> Self {
        if self.query.rows.is_empty() {
            self.query.rows.push(Map::new());
        }
        if let Some(row) = self.query.rows.last_mut() {
            row.insert(column.into(), value);
        }
        self
    }

    /// Appends a full row.
    pub fn values(mut self, row: Map<String, Value>) -> Self {
        self.query.rows.push(row);
        self
    }

    /// No-op on backends without RETURNING support.
    pub fn returning(mut self, column: impl Into<String>) -> Self {
        self.query.returning.push(column.into());
        self
    }

    pub fn query(&self) -> &InsertQuery {
        &self.query
    }

    pub async fn exec(self) -> Result<ExecResult, QueryError> {
        self.db.insert(&self.query).await
    }
}

pub struct Update<'a> {
    db: &'a dyn Database,
    query: UpdateQuery,
}

impl<'a> Update<'a> {
    pub fn new(db: &'a dyn Database) -> Self {
        Update {
            db,
            query: UpdateQuery::default(),
        }
    }

    pub fn model(mut self, descriptor: Arc<EntityDescriptor>) -> Self {
        if self.query.table.is_none() {
            self.query.table = Some(TableRef::of(&descriptor));
        }
        self.query.model = Some(descriptor);
        self
    }

    pub fn table(mut self, name: &str) -> Self {
        self.query.table = Some(TableRef::parse(name));
        self
    }

    pub fn set(mut self, column: impl Into<String>, value: Value) -> Self {
        self.query.set.insert(column.into(), value);
        self
    }

    pub fn set_map(mut self, values: Map<String, Value>) -> Self {
        self.query.set.extend(values);
        self
    }

    pub fn where_(mut self, condition: Condition) -> Self {
        push_filter(&mut self.query.filter, condition, false);
        self
    }

    pub fn where_or(mut self, condition: Condition) -> Self {
        push_filter(&mut self.query.filter, condition, true);
        self
    }

    pub fn returning(mut self, column: impl Into<String>) -> Self {
        self.query.returning.push(column.into());
        self
    }

    pub fn query(&self) -> &UpdateQuery {
        &self.query
    }

    pub async fn exec(self) -> Result<ExecResult, QueryError> {
        self.db.update(&self.query).await
    }
}

pub struct Delete<'a> {
    db: &'a dyn Database,
    query: DeleteQuery,
}

impl<'a> Delete<'a> {
    pub fn new(db: &'a dyn Database) -> Self {
        Delete {
            db,
            query: DeleteQuery::default(),
        }
    }

    pub fn model(mut self, descriptor: Arc<EntityDescriptor>) -> Self {
        if self.query.table.is_none() {
            self.query.table = Some(TableRef::of(&descriptor));
        }
        self.query.model = Some(descriptor);
        self
    }

    pub fn table(mut self, name: &str) -> Self {
        self.query.table = Some(TableRef::parse(name));
        self
    }

    pub fn where_(mut self, condition: Condition) -> Self {
        push_filter(&mut self.query.filter, condition, false);
        self
    }

    pub fn where_or(mut self, condition: Condition) -> Self {
        push_filter(&mut self.query.filter, condition, true);
        self
    }

    pub fn returning(mut self, column: impl Into<String>) -> Self {
        self.query.returning.push(column.into());
        self
    }

    pub fn query(&self) -> &DeleteQuery {
        &self.query
    }

    pub async fn exec(self) -> Result<ExecResult, QueryError> {
        self.db.delete(&self.query).await
    }
}
