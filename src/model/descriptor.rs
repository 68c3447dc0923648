//! Entity descriptors: columns and relations derived from a prototype shape,
//! plus the column checks used to sanitize every caller-supplied column name.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{Map, Value};

use crate::error::ModelError;
use crate::model::reflect::{Record, RecordFn, RelationKeys, ScalarType, Shape};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    /// Storage column name.
    pub name: String,
    /// Declared field name.
    pub field: String,
    /// Serialized name used in payloads.
    pub json_name: String,
    pub kind: ScalarType,
    pub nullable: bool,
    pub primary: bool,
    pub unique: bool,
    pub indexed: bool,
}

impl Column {
    pub fn sql_type(&self) -> &'static str {
        self.kind.sql_type()
    }
}

#[derive(Clone, Debug)]
pub struct Relation {
    /// Serialized name; also the key the preloaded value is returned under.
    pub name: String,
    pub field: String,
    pub many: bool,
    pub keys: Option<RelationKeys>,
    target: RecordFn,
}

impl Relation {
    pub fn target(&self) -> EntityDescriptor {
        EntityDescriptor::from_record(&(self.target)())
    }

    fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name) || self.field.eq_ignore_ascii_case(name)
    }
}

#[derive(Clone, Debug)]
pub struct EntityDescriptor {
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
    pub columns: Vec<Column>,
    pub relations: Vec<Relation>,
    table_explicit: bool,
}

impl EntityDescriptor {
    /// Reflects a prototype. Pointer, optional, list and array layers are
    /// unwrapped first; anything that is not a record underneath is rejected.
    pub fn describe(shape: &Shape) -> Result<Self, ModelError> {
        let record = shape
            .unwrap_record()
            .ok_or_else(|| ModelError::InvalidShape(format!("{:?}", shape)))?;
        Ok(Self::from_record(&record()))
    }

    pub fn from_record(record: &Record) -> Self {
        let mut columns = Vec::new();
        let mut relations = Vec::new();
        for field in record.fields.iter().filter(|f| !f.skip) {
            let json_name = field.rename.clone().unwrap_or_else(|| field.name.clone());
            if let Some(target) = field.shape.unwrap_record() {
                relations.push(Relation {
                    name: json_name,
                    field: field.name.clone(),
                    many: field.shape.is_collection(),
                    keys: field.relation.clone(),
                    target,
                });
                continue;
            }
            let Some(kind) = field.shape.scalar() else {
                tracing::debug!(field = %field.name, "skipping field that is neither a column nor a relation");
                continue;
            };
            let name = field
                .column
                .clone()
                .or_else(|| field.rename.clone())
                .unwrap_or_else(|| field.name.to_lowercase());
            columns.push(Column {
                name,
                field: field.name.clone(),
                json_name,
                kind,
                nullable: field.shape.is_optional() && !field.not_null && !field.primary_key,
                primary: field.primary_key,
                unique: field.unique || field.primary_key,
                indexed: field.indexed || field.primary_key,
            });
        }
        EntityDescriptor {
            name: record.name.clone(),
            schema: None,
            table: record.table.clone().unwrap_or_else(|| snake_case(&record.name)),
            columns,
            relations,
            table_explicit: record.table.is_some(),
        }
    }

    /// Places the descriptor at the registered location. The entity name only
    /// becomes the table when the record does not name its own table.
    pub fn located(mut self, schema: Option<&str>, entity: &str) -> Self {
        if let Some(schema) = schema.filter(|s| !s.is_empty()) {
            self.schema = Some(schema.to_string());
        }
        if !self.table_explicit {
            self.table = entity.to_string();
        }
        self
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .or_else(|| self.columns.iter().find(|c| c.json_name == name))
            .or_else(|| self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)))
    }

    pub fn is_valid_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Keeps known columns (as canonical column names) and warns for each drop.
    pub fn filter_valid_columns(&self, names: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            match self.column(name.trim()) {
                Some(c) => {
                    if !out.contains(&c.name) {
                        out.push(c.name.clone());
                    }
                }
                None => tracing::warn!(entity = %self.name, column = %name, "dropping unknown column"),
            }
        }
        out
    }

    /// First declared primary key, else a column called `id`.
    pub fn primary_key(&self) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.primary)
            .or_else(|| self.columns.iter().find(|c| c.name == "id"))
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.matches(name.trim()))
    }

    pub fn relation_names(&self) -> Vec<String> {
        self.relations.iter().map(|r| r.name.clone()).collect()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Checks a write payload against the entity shape. Returns values keyed by
    /// column name; unknown members and relation members are dropped.
    pub fn normalize(&self, value: &Value) -> Result<Map<String, Value>, ModelError> {
        let Value::Object(obj) = value else {
            return Err(ModelError::InvalidData(format!("{} payload must be a JSON object", self.name)));
        };
        let mut out = Map::new();
        for (key, v) in obj {
            let Some(column) = self
                .columns
                .iter()
                .find(|c| c.json_name == *key)
                .or_else(|| self.columns.iter().find(|c| c.name == *key))
            else {
                tracing::debug!(entity = %self.name, member = %key, "ignoring member without a column");
                continue;
            };
            out.insert(column.name.clone(), check_value(column, v)?);
        }
        Ok(out)
    }

    /// Converts a textual id into the primary key's JSON representation.
    pub fn coerce_key(&self, raw: &str) -> Result<Value, ModelError> {
        let raw = raw.trim();
        let kind = self.primary_key().map(|c| c.kind).unwrap_or(ScalarType::Text);
        if kind.is_integer() {
            let n: i64 = raw
                .parse()
                .map_err(|_| ModelError::InvalidData(format!("invalid id '{}'", raw)))?;
            return Ok(Value::Number(n.into()));
        }
        if kind == ScalarType::Uuid {
            let u = uuid::Uuid::parse_str(raw).map_err(|_| ModelError::InvalidData(format!("invalid uuid '{}'", raw)))?;
            return Ok(Value::String(u.to_string()));
        }
        Ok(Value::String(raw.to_string()))
    }

    /// Same as [`coerce_key`](Self::coerce_key) for ids taken from a JSON body.
    pub fn coerce_key_value(&self, v: &Value) -> Result<Value, ModelError> {
        match v {
            Value::String(s) => self.coerce_key(s),
            Value::Number(n) => self.coerce_key(&n.to_string()),
            other => Err(ModelError::InvalidData(format!("invalid id {}", other))),
        }
    }
}

fn check_value(column: &Column, v: &Value) -> Result<Value, ModelError> {
    let mismatch = || {
        ModelError::InvalidData(format!(
            "{} expects {}, got {}",
            column.json_name,
            column.sql_type(),
            json_kind(v)
        ))
    };
    if v.is_null() {
        return if column.nullable { Ok(Value::Null) } else { Err(mismatch()) };
    }
    let ok = match column.kind {
        ScalarType::Bool => v.is_boolean(),
        ScalarType::SmallInt => v.as_i64().is_some_and(|n| i16::try_from(n).is_ok()),
        ScalarType::Int => v.as_i64().is_some_and(|n| i32::try_from(n).is_ok()),
        ScalarType::BigInt => v.as_i64().is_some(),
        ScalarType::Float | ScalarType::Double => v.is_number(),
        ScalarType::Text => v.is_string(),
        ScalarType::Uuid => v.as_str().is_some_and(|s| uuid::Uuid::parse_str(s).is_ok()),
        ScalarType::Timestamp => v.as_str().is_some_and(|s| {
            DateTime::parse_from_rfc3339(s).is_ok() || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        }),
        ScalarType::Date => v.as_str().is_some_and(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()),
        ScalarType::Time => v.as_str().is_some_and(|s| NaiveTime::parse_from_str(s, "%H:%M:%S%.f").is_ok()),
        ScalarType::Json => true,
        ScalarType::Bytes => v.is_string() || v.is_array(),
    };
    if ok {
        Ok(v.clone())
    } else {
        Err(mismatch())
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut prev_lower = false;
    for c in s.chars() {
        if c.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::reflect::{Field, Reflect};
    use serde_json::json;

    struct Employee;
    struct Department;

    impl Reflect for Employee {
        fn shape() -> Shape {
            Shape::record(|| {
                Record::new("Employee")
                    .field(Field::of::<i64>("ID").primary_key())
                    .field(Field::of::<String>("department_id").indexed())
                    .field(Field::of::<Option<Department>>("department").belongs_to("department_id"))
            })
        }
    }

    impl Reflect for Department {
        fn shape() -> Shape {
            Shape::record(|| {
                Record::new("Department")
                    .table("departments")
                    .field(Field::of::<String>("id").primary_key())
                    .field(Field::of::<String>("Name").rename("name").unique())
                    .field(Field::of::<Option<String>>("description"))
                    .field(Field::of::<Option<chrono::DateTime<chrono::Utc>>>("created_at").column("created"))
                    .field(Field::of::<i32>("head_count").rename("headCount"))
                    .field(Field::of::<Vec<Employee>>("employees").has_many("department_id"))
                    .field(Field::of::<String>("scratch").skip())
            })
        }
    }

    fn departments() -> EntityDescriptor {
        EntityDescriptor::describe(&Department::shape()).unwrap()
    }

    #[test]
    fn column_name_resolution_order() {
        let d = departments();
        assert_eq!(d.column_names(), vec!["id", "name", "description", "created", "headCount"]);
        let emp = EntityDescriptor::describe(&Employee::shape()).unwrap();
        assert_eq!(emp.columns[0].name, "id");
        assert_eq!(emp.table, "employee");
    }

    #[test]
    fn timestamps_are_columns_and_collections_are_relations() {
        let d = departments();
        assert_eq!(d.column("created").map(|c| c.kind), Some(ScalarType::Timestamp));
        assert_eq!(d.relation_names(), vec!["employees"]);
        assert!(d.relation("Employees").is_some_and(|r| r.many));
        let target = d.relation("employees").unwrap().target();
        assert_eq!(target.name, "Employee");
        assert_eq!(target.relation("department").map(|r| r.many), Some(false));
    }

    #[test]
    fn flags_follow_field_declarations() {
        let d = departments();
        let id = d.column("id").unwrap();
        assert!(id.primary && id.unique && !id.nullable);
        assert!(d.column("description").unwrap().nullable);
        assert!(d.column("name").unwrap().unique);
        assert_eq!(d.primary_key().map(|c| c.name.as_str()), Some("id"));
    }

    #[test]
    fn non_record_prototype_is_rejected() {
        assert!(matches!(
            EntityDescriptor::describe(&Shape::of::<Vec<u32>>()),
            Err(ModelError::InvalidShape(_))
        ));
        assert!(EntityDescriptor::describe(&Shape::of::<Box<[Department; 1]>>()).is_ok());
    }

    #[test]
    fn filter_valid_columns_drops_unknown_names() {
        let d = departments();
        let kept = d.filter_valid_columns(&["name".into(), "nonexistent_col".into(), "headCount".into(), "NAME".into()]);
        assert_eq!(kept, vec!["name", "headCount"]);
        assert!(!d.is_valid_column("employees"));
    }

    #[test]
    fn normalize_drops_extraneous_and_rejects_mistyped() {
        let d = departments();
        let row = d
            .normalize(&json!({"id": "d1", "name": "Eng", "bogus": 1, "employees": []}))
            .unwrap();
        assert_eq!(row.len(), 2);
        assert_eq!(row["name"], "Eng");

        assert!(matches!(d.normalize(&json!({"headCount": "12"})), Err(ModelError::InvalidData(_))));
        assert!(matches!(d.normalize(&json!({"name": null})), Err(ModelError::InvalidData(_))));
        assert!(d.normalize(&json!({"description": null})).is_ok());
        assert!(d.normalize(&json!({"created": "2024-01-02T03:04:05Z"})).is_ok());
        assert!(d.normalize(&json!({"created": "yesterday"})).is_err());
        assert!(d.normalize(&json!([1, 2])).is_err());
    }

    #[test]
    fn coerce_key_follows_primary_key_type() {
        let emp = EntityDescriptor::describe(&Employee::shape()).unwrap();
        assert_eq!(emp.coerce_key("42").unwrap(), json!(42));
        assert!(emp.coerce_key("abc").is_err());
        assert_eq!(departments().coerce_key("d1").unwrap(), json!("d1"));
    }

    #[test]
    fn located_keeps_explicit_table() {
        let d = departments().located(Some("test"), "depts");
        assert_eq!(d.table, "departments");
        assert_eq!(d.schema.as_deref(), Some("test"));
        let e = EntityDescriptor::describe(&Employee::shape()).unwrap().located(None, "staff");
        assert_eq!(e.table, "staff");
        assert_eq!(snake_case("OrderLine"), "order_line");
    }
}
