//! In-memory `Database` used by the integration suites. It evaluates the
//! structured clauses of each query; raw SQL is rejected.

#![allow(dead_code)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{Map, Value};

use resolvespec::model::{EntityDescriptor, Field, Record, Reflect, Shape};
use resolvespec::query::{
    Capability, Comparison, Condition, Database, DeleteQuery, Direction, ExecResult, InsertQuery, OrderBy,
    Projection, SelectQuery, TableRef, TxFn, UpdateQuery,
};
use resolvespec::{AppState, CrudHandler, ModelRegistry, QueryError};

pub struct Department;

impl Reflect for Department {
    fn shape() -> Shape {
        Shape::record(|| {
            Record::new("Department")
                .table("departments")
                .field(Field::of::<String>("id").primary_key())
                .field(Field::of::<String>("name").not_null())
                .field(Field::of::<Option<String>>("code").unique())
                .field(Field::of::<Option<i32>>("floor"))
                .field(Field::of::<Vec<Employee>>("employees").has_many("department_id"))
        })
    }
}

pub struct Employee;

impl Reflect for Employee {
    fn shape() -> Shape {
        Shape::record(|| {
            Record::new("Employee")
                .table("employees")
                .field(Field::of::<String>("id").primary_key())
                .field(Field::of::<String>("first_name").rename("firstName"))
                .field(Field::of::<Option<i32>>("age"))
                .field(Field::of::<Option<String>>("department_id").indexed())
                .field(Field::of::<Option<Department>>("department").belongs_to("department_id"))
        })
    }
}

/// Always panics when described; used to check panic containment.
pub struct Exploding;

impl Reflect for Exploding {
    fn shape() -> Shape {
        Shape::record(|| panic!("exploding prototype"))
    }
}

pub fn registry() -> Arc<ModelRegistry> {
    let registry = ModelRegistry::new();
    registry.register_type::<Department>("test.departments").unwrap();
    registry.register_type::<Employee>("test.employees").unwrap();
    registry.register_type::<Exploding>("test.exploding").unwrap();
    Arc::new(registry)
}

pub fn handler() -> (CrudHandler, MemoryDb) {
    let db = MemoryDb::new();
    (CrudHandler::new(registry(), Arc::new(db.clone())), db)
}

pub fn state() -> (AppState, MemoryDb) {
    let db = MemoryDb::new();
    (AppState::new(registry(), Arc::new(db.clone())), db)
}

type Row = Map<String, Value>;

#[derive(Clone, Default)]
pub struct MemoryDb {
    tables: Arc<Mutex<HashMap<String, Vec<Row>>>>,
    in_tx: bool,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, HashMap<String, Vec<Row>>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables()
            .get(table)
            .map(|rows| rows.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        let mut tables = self.tables();
        let entry = tables.entry(table.to_string()).or_default();
        for row in rows {
            if let Value::Object(obj) = row {
                entry.push(obj);
            }
        }
    }
}

fn table_name(table: &Option<TableRef>, model: &Option<Arc<EntityDescriptor>>) -> Result<String, QueryError> {
    table
        .as_ref()
        .map(|t| t.name.clone())
        .or_else(|| model.as_ref().map(|m| m.table.clone()))
        .ok_or(QueryError::MissingTable)
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::String(y)) => x.as_f64()?.partial_cmp(&y.parse().ok()?),
        (Value::String(x), Value::Number(y)) => x.parse::<f64>().ok()?.partial_cmp(&y.as_f64()?),
        _ => None,
    }
}

fn text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn like(value: &Value, pattern: &Value, case_insensitive: bool) -> bool {
    let (Some(value), Some(pattern)) = (text(value), text(pattern)) else {
        return false;
    };
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    RegexBuilder::new(&re)
        .case_insensitive(case_insensitive)
        .build()
        .map(|r| r.is_match(&value))
        .unwrap_or(false)
}

fn eval(row: &Row, condition: &Condition) -> Result<bool, QueryError> {
    let get = |c: &str| row.get(c).cloned().unwrap_or(Value::Null);
    Ok(match condition {
        Condition::Compare { column, op, value } => {
            let ord = compare(&get(column), value);
            match op {
                Comparison::Eq => ord == Some(Ordering::Equal),
                Comparison::Ne => ord.is_some_and(|o| o != Ordering::Equal),
                Comparison::Gt => ord == Some(Ordering::Greater),
                Comparison::Gte => ord.is_some_and(|o| o != Ordering::Less),
                Comparison::Lt => ord == Some(Ordering::Less),
                Comparison::Lte => ord.is_some_and(|o| o != Ordering::Greater),
            }
        }
        Condition::In { column, values } => {
            let v = get(column);
            values.iter().any(|x| compare(&v, x) == Some(Ordering::Equal))
        }
        Condition::Like { column, pattern, case_insensitive } => like(&get(column), pattern, *case_insensitive),
        Condition::NullOrEmpty { column } => matches!(get(column), Value::Null) || get(column) == Value::from(""),
        Condition::NotNullOrEmpty { column } => !(matches!(get(column), Value::Null) || get(column) == Value::from("")),
        Condition::Raw { sql, .. } => return Err(QueryError::Rejected(format!("raw sql not supported: {}", sql))),
        Condition::And(parts) => {
            for p in parts {
                if !eval(row, p)? {
                    return Ok(false);
                }
            }
            true
        }
        Condition::Or(parts) => {
            for p in parts {
                if eval(row, p)? {
                    return Ok(true);
                }
            }
            false
        }
    })
}

fn matching(rows: &[Row], filter: &Option<Condition>) -> Result<Vec<Row>, QueryError> {
    let mut out = Vec::new();
    for row in rows {
        if filter.as_ref().map(|f| eval(row, f)).transpose()?.unwrap_or(true) {
            out.push(row.clone());
        }
    }
    Ok(out)
}

fn sort(rows: &mut [Row], order: &[OrderBy]) {
    rows.sort_by(|a, b| {
        for o in order {
            let x = a.get(&o.column).unwrap_or(&Value::Null);
            let y = b.get(&o.column).unwrap_or(&Value::Null);
            let ord = match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                _ => compare(x, y).unwrap_or(Ordering::Equal),
            };
            let ord = if o.direction == Direction::Desc { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn project(row: &Row, columns: &[String]) -> Row {
    if columns.is_empty() {
        return row.clone();
    }
    columns
        .iter()
        .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
        .collect()
}

impl MemoryDb {
    fn filtered(&self, query: &SelectQuery) -> Result<Vec<Row>, QueryError> {
        let table = table_name(&query.table, &query.model)?;
        let tables = self.tables();
        matching(tables.get(&table).map(Vec::as_slice).unwrap_or(&[]), &query.filter)
    }
}

#[async_trait]
impl Database for MemoryDb {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn supports(&self, _capability: Capability) -> bool {
        false
    }

    async fn select(&self, query: &SelectQuery) -> Result<Vec<Value>, QueryError> {
        let mut rows = self.filtered(query)?;
        sort(&mut rows, &query.order);
        let offset = query.offset.unwrap_or(0) as usize;
        let rows: Vec<Row> = rows
            .into_iter()
            .skip(offset)
            .take(query.limit.map(|l| l as usize).unwrap_or(usize::MAX))
            .collect();

        let tables = self.tables();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut projected = Row::new();
            for projection in &query.columns {
                match projection {
                    Projection::Column(c) => projected.insert(c.clone(), row.get(c).cloned().unwrap_or(Value::Null)),
                    Projection::Expr { alias, .. } => projected.insert(alias.clone(), Value::Null),
                };
            }
            if query.columns.is_empty() {
                projected = row.clone();
            }
            for rel in &query.relations {
                let parent = row.get(&rel.parent_key).cloned().unwrap_or(Value::Null);
                let candidates = tables.get(&rel.table.name).map(Vec::as_slice).unwrap_or(&[]);
                let mut related: Vec<Row> = matching(candidates, &rel.filter)?
                    .into_iter()
                    .filter(|r| {
                        !parent.is_null()
                            && compare(r.get(&rel.child_key).unwrap_or(&Value::Null), &parent) == Some(Ordering::Equal)
                    })
                    .collect();
                sort(&mut related, &rel.order);
                if let Some(limit) = rel.limit {
                    related.truncate(limit as usize);
                }
                let related: Vec<Value> = related.iter().map(|r| Value::Object(project(r, &rel.columns))).collect();
                let value = if rel.many {
                    Value::Array(related)
                } else {
                    related.into_iter().next().unwrap_or(Value::Null)
                };
                projected.insert(rel.name.clone(), value);
            }
            out.push(Value::Object(projected));
        }
        Ok(out)
    }

    async fn count(&self, query: &SelectQuery) -> Result<i64, QueryError> {
        Ok(self.filtered(query)?.len() as i64)
    }

    async fn insert(&self, query: &InsertQuery) -> Result<ExecResult, QueryError> {
        let table = table_name(&query.table, &query.model)?;
        let pk = query
            .model
            .as_ref()
            .and_then(|m| m.primary_key().map(|c| c.name.clone()));
        let mut tables = self.tables();
        let rows = tables.entry(table.clone()).or_default();
        for row in &query.rows {
            if let Some(pk) = &pk {
                let id = row.get(pk).cloned().unwrap_or(Value::Null);
                if rows.iter().any(|r| r.get(pk) == Some(&id)) {
                    return Err(QueryError::Rejected(format!("duplicate key {} in {}", id, table)));
                }
            }
            rows.push(row.clone());
        }
        Ok(ExecResult {
            rows_affected: query.rows.len() as u64,
            ..Default::default()
        })
    }

    async fn update(&self, query: &UpdateQuery) -> Result<ExecResult, QueryError> {
        let table = table_name(&query.table, &query.model)?;
        let filter = query.filter.as_ref().ok_or(QueryError::MissingPredicate("update"))?;
        let mut tables = self.tables();
        let mut affected = 0;
        for row in tables.entry(table).or_default().iter_mut() {
            if eval(row, filter)? {
                for (k, v) in &query.set {
                    row.insert(k.clone(), v.clone());
                }
                affected += 1;
            }
        }
        Ok(ExecResult {
            rows_affected: affected,
            ..Default::default()
        })
    }

    async fn delete(&self, query: &DeleteQuery) -> Result<ExecResult, QueryError> {
        let table = table_name(&query.table, &query.model)?;
        let filter = query.filter.as_ref().ok_or(QueryError::MissingPredicate("delete"))?;
        let mut tables = self.tables();
        let rows = tables.entry(table).or_default();
        let before = rows.len();
        let mut kept = Vec::with_capacity(before);
        for row in rows.drain(..) {
            if !eval(&row, filter)? {
                kept.push(row);
            }
        }
        *rows = kept;
        Ok(ExecResult {
            rows_affected: (before - rows.len()) as u64,
            ..Default::default()
        })
    }

    async fn exec(&self, sql: &str, _args: &[Value]) -> Result<ExecResult, QueryError> {
        Err(QueryError::Rejected(format!("raw sql not supported: {}", sql)))
    }

    async fn query(&self, sql: &str, _args: &[Value]) -> Result<Vec<Value>, QueryError> {
        if sql.trim().eq_ignore_ascii_case("select 1") {
            return Ok(vec![serde_json::json!({ "?column?": 1 })]);
        }
        Err(QueryError::Rejected(format!("raw sql not supported: {}", sql)))
    }

    async fn run_in_transaction<'a>(&'a self, f: TxFn<'a>) -> Result<(), QueryError> {
        if self.in_tx {
            return Err(QueryError::UnsupportedNesting);
        }
        let snapshot = self.tables().clone();
        let handle = MemoryDb {
            tables: Arc::clone(&self.tables),
            in_tx: true,
        };
        let result = f(&handle).await;
        if result.is_err() {
            *self.tables() = snapshot;
        }
        result
    }
}
