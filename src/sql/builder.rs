//! Renders query clauses into parameterized PostgreSQL.
//! Identifiers are quoted; values are always bound, cast to the column type when known.

use serde_json::Value;

use crate::error::QueryError;
use crate::model::{EntityDescriptor, ScalarType};
use crate::query::{
    Condition, DeleteQuery, InsertQuery, JoinKind, OrderBy, Projection, RelationLoad, SelectQuery,
    TableRef, UpdateQuery,
};

const MAIN_ALIAS: &str = "main";
const RELATION_ALIAS: &str = "rel";

/// A value to bind, with the scalar type of the column it is compared to.
#[derive(Clone, Debug, PartialEq)]
pub struct Bind {
    pub value: Value,
    pub kind: Option<ScalarType>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Bind>,
}

impl QueryBuf {
    fn push_param(&mut self, value: Value, kind: Option<ScalarType>) -> String {
        self.params.push(Bind { value, kind });
        let n = self.params.len();
        match kind {
            Some(k) => format!("${}::{}", n, k.sql_type()),
            None => format!("${}", n),
        }
    }
}

/// Quote identifier for PostgreSQL.
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

pub fn qualified_table(table: &TableRef) -> String {
    match &table.schema {
        Some(schema) => format!("{}.{}", quoted(schema), quoted(&table.name)),
        None => quoted(&table.name),
    }
}

/// Column context: which entity the names belong to and how they are qualified.
#[derive(Clone, Copy)]
struct Scope<'q> {
    model: Option<&'q EntityDescriptor>,
    qualifier: Option<&'static str>,
}

impl<'q> Scope<'q> {
    fn column(&self, name: &str) -> String {
        match self.qualifier {
            Some(q) => format!("{}.{}", q, quoted(name)),
            None => quoted(name),
        }
    }

    fn kind(&self, name: &str) -> Option<ScalarType> {
        self.model.and_then(|m| m.column(name)).map(|c| c.kind)
    }
}

fn render_condition(buf: &mut QueryBuf, scope: Scope<'_>, condition: &Condition) -> String {
    match condition {
        Condition::Compare { column, op, value } => {
            let ph = buf.push_param(value.clone(), scope.kind(column));
            format!("{} {} {}", scope.column(column), op.sql(), ph)
        }
        Condition::In { column, values } => {
            if values.is_empty() {
                return "1 = 0".to_string();
            }
            let kind = scope.kind(column);
            let phs: Vec<String> = values.iter().map(|v| buf.push_param(v.clone(), kind)).collect();
            format!("{} IN ({})", scope.column(column), phs.join(", "))
        }
        Condition::Like { column, pattern, case_insensitive } => {
            let pattern = match pattern {
                Value::String(s) => Value::String(s.clone()),
                other => Value::String(other.to_string()),
            };
            let ph = buf.push_param(pattern, None);
            let op = if *case_insensitive { "ILIKE" } else { "LIKE" };
            format!("CAST({} AS TEXT) {} {}", scope.column(column), op, ph)
        }
        Condition::NullOrEmpty { column } => {
            let c = scope.column(column);
            format!("({} IS NULL OR CAST({} AS TEXT) = '')", c, c)
        }
        Condition::NotNullOrEmpty { column } => {
            let c = scope.column(column);
            format!("({} IS NOT NULL AND CAST({} AS TEXT) != '')", c, c)
        }
        Condition::Raw { sql, args } => format!("({})", bind_raw(buf, sql, args)),
        Condition::And(parts) => join_conditions(buf, scope, parts, " AND ", "TRUE"),
        Condition::Or(parts) => join_conditions(buf, scope, parts, " OR ", "FALSE"),
    }
}

fn join_conditions(buf: &mut QueryBuf, scope: Scope<'_>, parts: &[Condition], sep: &str, empty: &str) -> String {
    if parts.is_empty() {
        return empty.to_string();
    }
    let rendered: Vec<String> = parts.iter().map(|p| render_condition(buf, scope, p)).collect();
    format!("({})", rendered.join(sep))
}

/// Replaces `?` outside string literals with numbered placeholders while arguments remain.
fn bind_raw(buf: &mut QueryBuf, sql: &str, args: &[Value]) -> String {
    let mut out = String::with_capacity(sql.len() + args.len() * 3);
    let mut args = args.iter();
    let mut in_literal = false;
    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_literal = !in_literal;
                out.push(ch);
            }
            '?' if !in_literal => match args.next() {
                Some(v) => out.push_str(&buf.push_param(v.clone(), None)),
                None => out.push(ch),
            },
            _ => out.push(ch),
        }
    }
    out
}

fn model_columns(model: Option<&EntityDescriptor>) -> Vec<String> {
    model.map(|m| m.column_names()).unwrap_or_default()
}

fn projection_list(scope: Scope<'_>, projections: &[Projection]) -> Vec<String> {
    if projections.is_empty() {
        let all = model_columns(scope.model);
        if all.is_empty() {
            return vec![match scope.qualifier {
                Some(q) => format!("{}.*", q),
                None => "*".to_string(),
            }];
        }
        return all.iter().map(|c| scope.column(c)).collect();
    }
    projections
        .iter()
        .map(|p| match p {
            Projection::Column(c) => scope.column(c),
            Projection::Expr { sql, alias } => format!("({}) AS {}", sql, quoted(alias)),
        })
        .collect()
}

fn order_list(scope: Scope<'_>, order: &[OrderBy]) -> String {
    order
        .iter()
        .map(|o| format!("{} {}", scope.column(&o.column), o.direction.sql()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_relation(buf: &mut QueryBuf, parent: Scope<'_>, load: &RelationLoad) -> String {
    let scope = Scope {
        model: Some(load.target.as_ref()),
        qualifier: Some(RELATION_ALIAS),
    };
    let columns: Vec<String> = if load.columns.is_empty() {
        projection_list(scope, &[])
    } else {
        load.columns.iter().map(|c| scope.column(c)).collect()
    };
    let mut inner = format!(
        "SELECT {} FROM {} {} WHERE {} = {}",
        columns.join(", "),
        qualified_table(&load.table),
        RELATION_ALIAS,
        scope.column(&load.child_key),
        parent.column(&load.parent_key)
    );
    if let Some(filter) = &load.filter {
        let rendered = render_condition(buf, scope, filter);
        inner.push_str(" AND ");
        inner.push_str(&rendered);
    }
    if !load.order.is_empty() {
        inner.push_str(" ORDER BY ");
        inner.push_str(&order_list(scope, &load.order));
    }
    if load.many {
        if let Some(n) = load.limit {
            inner.push_str(&format!(" LIMIT {}", n));
        }
        format!(
            "(SELECT COALESCE(json_agg(row_to_json(sub)), '[]'::json) FROM ({}) sub) AS {}",
            inner,
            quoted(&load.name)
        )
    } else {
        inner.push_str(" LIMIT 1");
        format!("(SELECT row_to_json(sub) FROM ({}) sub) AS {}", inner, quoted(&load.name))
    }
}

/// FROM, JOIN, WHERE, GROUP BY and HAVING shared by row and count queries.
fn render_body(buf: &mut QueryBuf, scope: Scope<'_>, query: &SelectQuery, table: &TableRef) -> String {
    let mut sql = format!(" FROM {} {}", qualified_table(table), MAIN_ALIAS);
    for join in &query.joins {
        let kind = match join.kind {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        };
        sql.push_str(&format!(" {} {} ON {}", kind, join.table, join.on));
    }
    if let Some(filter) = &query.filter {
        let rendered = render_condition(buf, scope, filter);
        sql.push_str(" WHERE ");
        sql.push_str(&rendered);
    }
    if !query.group.is_empty() {
        let cols: Vec<String> = query.group.iter().map(|c| scope.column(c)).collect();
        sql.push_str(" GROUP BY ");
        sql.push_str(&cols.join(", "));
    }
    if let Some(having) = &query.having {
        let rendered = render_condition(buf, scope, having);
        sql.push_str(" HAVING ");
        sql.push_str(&rendered);
    }
    sql
}

fn select_scope(query: &SelectQuery) -> Scope<'_> {
    Scope {
        model: query.model.as_deref(),
        qualifier: Some(MAIN_ALIAS),
    }
}

pub fn render_select(query: &SelectQuery) -> Result<QueryBuf, QueryError> {
    let table = query.table.as_ref().ok_or(QueryError::MissingTable)?;
    let scope = select_scope(query);
    let mut buf = QueryBuf::default();
    let mut select = projection_list(scope, &query.columns);
    for load in &query.relations {
        select.push(render_relation(&mut buf, scope, load));
    }
    let body = render_body(&mut buf, scope, query, table);
    let mut sql = format!(
        "SELECT {}{}{}",
        if query.distinct { "DISTINCT " } else { "" },
        select.join(", "),
        body
    );
    let order = sortable(query);
    if !order.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_list(scope, &order));
    }
    if let Some(n) = query.limit {
        sql.push_str(&format!(" LIMIT {}", n));
    }
    if let Some(n) = query.offset {
        sql.push_str(&format!(" OFFSET {}", n));
    }
    buf.sql = sql;
    Ok(buf)
}

/// PostgreSQL only sorts a DISTINCT select by projected columns; other sort
/// entries are dropped.
fn sortable(query: &SelectQuery) -> Vec<OrderBy> {
    if !query.distinct || query.columns.is_empty() {
        return query.order.clone();
    }
    query
        .order
        .iter()
        .filter(|o| {
            let projected = query.columns.iter().any(|p| match p {
                Projection::Column(c) => *c == o.column,
                Projection::Expr { alias, .. } => *alias == o.column,
            });
            if !projected {
                tracing::warn!(column = %o.column, "dropping sort on a column outside the distinct projection");
            }
            projected
        })
        .cloned()
        .collect()
}

/// Row count of the filtered set; ordering, pagination and preloads are ignored.
pub fn render_count(query: &SelectQuery) -> Result<QueryBuf, QueryError> {
    let table = query.table.as_ref().ok_or(QueryError::MissingTable)?;
    let scope = select_scope(query);
    let mut buf = QueryBuf::default();
    let body = render_body(&mut buf, scope, query, table);
    buf.sql = if query.distinct || !query.group.is_empty() {
        let select = projection_list(scope, &query.columns);
        format!(
            "SELECT COUNT(*) FROM (SELECT {}{}{}) counted",
            if query.distinct { "DISTINCT " } else { "" },
            select.join(", "),
            body
        )
    } else {
        format!("SELECT COUNT(*){}", body)
    };
    Ok(buf)
}

fn returning_clause(model: Option<&EntityDescriptor>, returning: &[String]) -> String {
    if returning.is_empty() {
        return String::new();
    }
    let scope = Scope { model, qualifier: None };
    let cols: Vec<String> = if returning.iter().any(|c| c == "*") {
        projection_list(scope, &[])
    } else {
        returning.iter().map(|c| quoted(c)).collect()
    };
    format!(" RETURNING {}", cols.join(", "))
}

/// `with_returning` is false on backends that cannot return rows; RETURNING is then dropped.
pub fn render_insert(query: &InsertQuery, with_returning: bool) -> Result<QueryBuf, QueryError> {
    let table = query.table.as_ref().ok_or(QueryError::MissingTable)?;
    let scope = Scope {
        model: query.model.as_deref(),
        qualifier: None,
    };
    let mut buf = QueryBuf::default();
    let mut columns: Vec<&String> = Vec::new();
    for row in &query.rows {
        for key in row.keys() {
            if !columns.contains(&key) {
                columns.push(key);
            }
        }
    }
    let mut sql = if columns.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", qualified_table(table))
    } else {
        let mut tuples = Vec::with_capacity(query.rows.len());
        for row in &query.rows {
            let values: Vec<String> = columns
                .iter()
                .map(|c| match row.get(c.as_str()) {
                    Some(v) => buf.push_param(v.clone(), scope.kind(c)),
                    None => "DEFAULT".to_string(),
                })
                .collect();
            tuples.push(format!("({})", values.join(", ")));
        }
        let names: Vec<String> = columns.iter().map(|c| quoted(c)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            qualified_table(table),
            names.join(", "),
            tuples.join(", ")
        )
    };
    if with_returning {
        sql.push_str(&returning_clause(scope.model, &query.returning));
    }
    buf.sql = sql;
    Ok(buf)
}

pub fn render_update(query: &UpdateQuery, with_returning: bool) -> Result<QueryBuf, QueryError> {
    let table = query.table.as_ref().ok_or(QueryError::MissingTable)?;
    let filter = query.filter.as_ref().ok_or(QueryError::MissingPredicate("update"))?;
    if query.set.is_empty() {
        return Err(QueryError::Rejected("update has no assignments".into()));
    }
    let scope = Scope {
        model: query.model.as_deref(),
        qualifier: None,
    };
    let mut buf = QueryBuf::default();
    let sets: Vec<String> = query
        .set
        .iter()
        .map(|(c, v)| format!("{} = {}", quoted(c), buf.push_param(v.clone(), scope.kind(c))))
        .collect();
    let where_clause = render_condition(&mut buf, scope, filter);
    let mut sql = format!(
        "UPDATE {} SET {} WHERE {}",
        qualified_table(table),
        sets.join(", "),
        where_clause
    );
    if with_returning {
        sql.push_str(&returning_clause(scope.model, &query.returning));
    }
    buf.sql = sql;
    Ok(buf)
}

pub fn render_delete(query: &DeleteQuery, with_returning: bool) -> Result<QueryBuf, QueryError> {
    let table = query.table.as_ref().ok_or(QueryError::MissingTable)?;
    let filter = query.filter.as_ref().ok_or(QueryError::MissingPredicate("delete"))?;
    let scope = Scope {
        model: query.model.as_deref(),
        qualifier: None,
    };
    let mut buf = QueryBuf::default();
    let where_clause = render_condition(&mut buf, scope, filter);
    let mut sql = format!("DELETE FROM {} WHERE {}", qualified_table(table), where_clause);
    if with_returning {
        sql.push_str(&returning_clause(scope.model, &query.returning));
    }
    buf.sql = sql;
    Ok(buf)
}

/// Raw statement with `?` placeholders.
pub fn render_raw(sql: &str, args: &[Value]) -> QueryBuf {
    let mut buf = QueryBuf::default();
    buf.sql = bind_raw(&mut buf, sql, args);
    buf
}

/// Integer primary key of the last returned row, if any.
pub fn last_insert_id(model: Option<&EntityDescriptor>, rows: &[Value]) -> Option<i64> {
    let pk = model.and_then(|m| m.primary_key()).filter(|c| c.kind.is_integer())?;
    rows.last().and_then(|r| r.get(&pk.name)).and_then(Value::as_i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Field, Record, Reflect, Shape};
    use crate::query::{Comparison, Direction, OrderBy};
    use serde_json::json;
    use std::sync::Arc;

    struct Department;
    struct Employee;

    impl Reflect for Department {
        fn shape() -> Shape {
            Shape::record(|| {
                Record::new("Department")
                    .table("departments")
                    .field(Field::of::<String>("id").primary_key())
                    .field(Field::of::<String>("name"))
                    .field(Field::of::<i32>("budget"))
                    .field(Field::of::<Vec<Employee>>("employees").has_many("department_id"))
            })
        }
    }

    impl Reflect for Employee {
        fn shape() -> Shape {
            Shape::record(|| {
                Record::new("Employee")
                    .table("employees")
                    .field(Field::of::<i64>("id").primary_key())
                    .field(Field::of::<String>("department_id"))
                    .field(Field::of::<String>("name"))
            })
        }
    }

    fn departments() -> Arc<EntityDescriptor> {
        Arc::new(EntityDescriptor::describe(&Department::shape()).unwrap().located(Some("test"), "departments"))
    }

    fn base() -> SelectQuery {
        let model = departments();
        SelectQuery {
            table: Some(TableRef::of(&model)),
            model: Some(model),
            ..Default::default()
        }
    }

    #[test]
    fn select_with_filters_order_and_pagination() {
        let mut q = base();
        q.columns = vec![Projection::Column("id".into()), Projection::Column("name".into())];
        q.push_filter(Condition::compare("budget", Comparison::Gte, json!(10)), false);
        q.push_filter(Condition::Like { column: "name".into(), pattern: json!("E%"), case_insensitive: true }, false);
        q.order.push(OrderBy { column: "name".into(), direction: Direction::Desc });
        q.limit = Some(5);
        q.offset = Some(10);
        let buf = render_select(&q).unwrap();
        assert_eq!(
            buf.sql,
            "SELECT main.\"id\", main.\"name\" FROM \"test\".\"departments\" main \
             WHERE (main.\"budget\" >= $1::integer AND CAST(main.\"name\" AS TEXT) ILIKE $2) \
             ORDER BY main.\"name\" DESC LIMIT 5 OFFSET 10"
        );
        assert_eq!(buf.params.len(), 2);
        assert_eq!(buf.params[0].kind, Some(ScalarType::Int));
    }

    #[test]
    fn count_ignores_order_and_pagination() {
        let mut q = base();
        q.push_filter(Condition::In { column: "id".into(), values: vec![json!("a"), json!("b")] }, false);
        q.order.push(OrderBy { column: "name".into(), direction: Direction::Asc });
        q.limit = Some(1);
        let buf = render_count(&q).unwrap();
        assert_eq!(
            buf.sql,
            "SELECT COUNT(*) FROM \"test\".\"departments\" main WHERE main.\"id\" IN ($1::text, $2::text)"
        );
    }

    #[test]
    fn distinct_count_wraps_projection() {
        let mut q = base();
        q.distinct = true;
        q.columns = vec![Projection::Column("name".into())];
        let buf = render_count(&q).unwrap();
        assert!(buf.sql.starts_with("SELECT COUNT(*) FROM (SELECT DISTINCT main.\"name\" FROM"));
    }

    #[test]
    fn like_casts_to_text() {
        let mut q = base();
        q.push_filter(Condition::Like { column: "budget".into(), pattern: json!("1%"), case_insensitive: false }, false);
        let buf = render_select(&q).unwrap();
        assert!(buf.sql.ends_with("WHERE CAST(main.\"budget\" AS TEXT) LIKE $1"));
        assert_eq!(buf.params[0].kind, None);
    }

    #[test]
    fn distinct_sort_keeps_only_projected_columns() {
        let mut q = base();
        q.distinct = true;
        q.columns = vec![Projection::Column("name".into())];
        q.order.push(OrderBy { column: "budget".into(), direction: Direction::Desc });
        q.order.push(OrderBy { column: "name".into(), direction: Direction::Asc });
        let buf = render_select(&q).unwrap();
        assert!(buf.sql.starts_with("SELECT DISTINCT main.\"name\" FROM"));
        assert!(buf.sql.ends_with("ORDER BY main.\"name\" ASC"));

        q.distinct = false;
        let buf = render_select(&q).unwrap();
        assert!(buf.sql.ends_with("ORDER BY main.\"budget\" DESC, main.\"name\" ASC"));
    }

    #[test]
    fn null_checks_cast_to_text() {
        let mut q = base();
        q.push_filter(Condition::NullOrEmpty { column: "budget".into() }, false);
        let buf = render_select(&q).unwrap();
        assert!(buf.sql.ends_with("WHERE (main.\"budget\" IS NULL OR CAST(main.\"budget\" AS TEXT) = '')"));
        assert!(buf.params.is_empty());
    }

    #[test]
    fn preload_renders_correlated_subquery() {
        let model = departments();
        let target = Arc::new(model.relation("employees").unwrap().target());
        let mut q = base();
        q.columns = vec![Projection::Column("id".into())];
        q.relations.push(RelationLoad {
            name: "employees".into(),
            many: true,
            table: TableRef { schema: Some("test".into()), name: target.table.clone() },
            target,
            parent_key: "id".into(),
            child_key: "department_id".into(),
            columns: vec!["id".into(), "name".into()],
            filter: Some(Condition::eq("name", json!("Ann"))),
            order: Vec::new(),
            limit: Some(3),
        });
        let buf = render_select(&q).unwrap();
        assert_eq!(
            buf.sql,
            "SELECT main.\"id\", (SELECT COALESCE(json_agg(row_to_json(sub)), '[]'::json) FROM \
             (SELECT rel.\"id\", rel.\"name\" FROM \"test\".\"employees\" rel WHERE rel.\"department_id\" = main.\"id\" \
             AND rel.\"name\" = $1::text LIMIT 3) sub) AS \"employees\" FROM \"test\".\"departments\" main"
        );
    }

    #[test]
    fn raw_fragments_bind_outside_literals() {
        let buf = render_raw("name = ? AND note != '?' AND budget > ?", &[json!("x"), json!(3)]);
        assert_eq!(buf.sql, "name = $1 AND note != '?' AND budget > $2");
        assert_eq!(buf.params.len(), 2);
    }

    #[test]
    fn insert_fills_missing_columns_with_default() {
        let mut a = serde_json::Map::new();
        a.insert("id".into(), json!("d1"));
        a.insert("name".into(), json!("Eng"));
        let mut b = serde_json::Map::new();
        b.insert("id".into(), json!("d2"));
        let model = departments();
        let q = InsertQuery {
            table: Some(TableRef::of(&model)),
            model: Some(model),
            rows: vec![a, b],
            returning: vec!["*".into()],
        };
        let buf = render_insert(&q, true).unwrap();
        assert_eq!(
            buf.sql,
            "INSERT INTO \"test\".\"departments\" (\"id\", \"name\") VALUES ($1::text, $2::text), ($3::text, DEFAULT) \
             RETURNING \"id\", \"name\", \"budget\""
        );
        let no_returning = render_insert(&q, false).unwrap();
        assert!(!no_returning.sql.contains("RETURNING"));
    }

    #[test]
    fn update_and_delete_require_predicate() {
        let model = departments();
        let mut u = UpdateQuery {
            table: Some(TableRef::of(&model)),
            model: Some(model.clone()),
            ..Default::default()
        };
        u.set.insert("name".into(), json!("Ops"));
        assert!(matches!(render_update(&u, false), Err(QueryError::MissingPredicate("update"))));
        u.filter = Some(Condition::eq("id", json!("d1")));
        let buf = render_update(&u, false).unwrap();
        assert_eq!(buf.sql, "UPDATE \"test\".\"departments\" SET \"name\" = $1::text WHERE \"id\" = $2::text");

        let d = DeleteQuery {
            table: Some(TableRef::of(&model)),
            model: Some(model),
            filter: None,
            returning: Vec::new(),
        };
        assert!(matches!(render_delete(&d, true), Err(QueryError::MissingPredicate("delete"))));
    }

    #[test]
    fn missing_table_is_an_error() {
        assert!(matches!(render_select(&SelectQuery::default()), Err(QueryError::MissingTable)));
    }
}
