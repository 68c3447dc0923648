//! SELECT clause accumulation.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::error::QueryError;
use crate::model::EntityDescriptor;
use crate::query::condition::Condition;
use crate::query::database::Database;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    /// Accepts `table` or `schema.table`.
    pub fn parse(name: &str) -> Self {
        match name.split_once('.') {
            Some((schema, table)) => TableRef {
                schema: Some(schema.to_string()),
                name: table.to_string(),
            },
            None => TableRef {
                schema: None,
                name: name.to_string(),
            },
        }
    }

    pub fn of(descriptor: &EntityDescriptor) -> Self {
        TableRef {
            schema: descriptor.schema.clone(),
            name: descriptor.table.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl From<String> for Direction {
    fn from(s: String) -> Self {
        Direction::parse(&s)
    }
}

impl Direction {
    /// `desc` in any case is descending; everything else is ascending.
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("desc") {
            Direction::Desc
        } else {
            Direction::Asc
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Projection {
    Column(String),
    /// Caller-trusted expression projected under `alias`.
    Expr { sql: String, alias: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub on: String,
}

/// Eager load of a related entity, returned as a nested JSON member.
#[derive(Clone, Debug)]
pub struct RelationLoad {
    pub name: String,
    pub many: bool,
    pub target: Arc<EntityDescriptor>,
    pub table: TableRef,
    /// Column on the primary table.
    pub parent_key: String,
    /// Column on the related table.
    pub child_key: String,
    /// Empty means every column of the related entity.
    pub columns: Vec<String>,
    pub filter: Option<Condition>,
    pub order: Vec<OrderBy>,
    pub limit: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct SelectQuery {
    pub table: Option<TableRef>,
    pub model: Option<Arc<EntityDescriptor>>,
    pub columns: Vec<Projection>,
    pub distinct: bool,
    pub filter: Option<Condition>,
    pub joins: Vec<Join>,
    pub relations: Vec<RelationLoad>,
    pub order: Vec<OrderBy>,
    pub group: Vec<String>,
    pub having: Option<Condition>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectQuery {
    pub(crate) fn push_filter(&mut self, condition: Condition, or: bool) {
        self.filter = Some(match self.filter.take() {
            None => condition,
            Some(prev) if or => prev.or(condition),
            Some(prev) => prev.and(condition),
        });
    }
}

/// Fluent SELECT builder bound to a database handle. Clause order does not
/// matter; terminators hand the accumulated query to the backend.
pub struct Select<'a> {
    db: &'a dyn Database,
    query: SelectQuery,
}

impl<'a> Select<'a> {
    pub fn new(db: &'a dyn Database) -> Self {
        Select {
            db,
            query: SelectQuery::default(),
        }
    }

    /// Binds the entity; sets the table unless one was given explicitly.
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

    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.query.columns.push(Projection::Column(name.into()));
        self
    }

    pub fn columns<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query
            .columns
            .extend(names.into_iter().map(|n| Projection::Column(n.into())));
        self
    }

    pub fn column_expr(mut self, sql: impl Into<String>, alias: impl Into<String>) -> Self {
        self.query.columns.push(Projection::Expr {
            sql: sql.into(),
            alias: alias.into(),
        });
        self
    }

    pub fn distinct(mut self, distinct: bool) -> Self {
        self.query.distinct = distinct;
        self
    }

    pub fn where_(mut self, condition: Condition) -> Self {
        self.query.push_filter(condition, false);
        self
    }

    pub fn where_or(mut self, condition: Condition) -> Self {
        self.query.push_filter(condition, true);
        self
    }

    pub fn join(mut self, table: impl Into<String>, on: impl Into<String>) -> Self {
        self.query.joins.push(Join {
            kind: JoinKind::Inner,
            table: table.into(),
            on: on.into(),
        });
        self
    }

    pub fn left_join(mut self, table: impl Into<String>, on: impl Into<String>) -> Self {
        self.query.joins.push(Join {
            kind: JoinKind::Left,
            table: table.into(),
            on: on.into(),
        });
        self
    }

    pub fn relation(mut self, load: RelationLoad) -> Self {
        self.query.relations.push(load);
        self
    }

    pub fn order(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.query.order.push(OrderBy {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn group(mut self, column: impl Into<String>) -> Self {
        self.query.group.push(column.into());
        self
    }

    pub fn having(mut self, condition: Condition) -> Self {
        self.query.having = Some(match self.query.having.take() {
            None => condition,
            Some(prev) => prev.and(condition),
        });
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.query.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.query.offset = Some(n);
        self
    }

    pub fn query(&self) -> &SelectQuery {
        &self.query
    }

    pub async fn scan(self) -> Result<Vec<Value>, QueryError> {
        self.db.select(&self.query).await
    }

    pub async fn scan_one(mut self) -> Result<Option<Value>, QueryError> {
        self.query.limit = Some(1);
        Ok(self.db.select(&self.query).await?.into_iter().next())
    }

    /// Rows matching the filter, ignoring ordering and pagination.
    pub async fn count(&self) -> Result<i64, QueryError> {
        self.db.count(&self.query).await
    }

    pub async fn exists(&self) -> Result<bool, QueryError> {
        self.db.exists(&self.query).await
    }
}
