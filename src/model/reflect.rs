//! Static shape descriptions standing in for runtime struct introspection.
//!
//! A registered prototype is any type implementing [`Reflect`]. Records reference
//! nested records lazily through `fn() -> Record`, so relation cycles
//! (department -> employees -> department) never recurse while building a shape.

use std::sync::Arc;

/// Column-level value kinds. Each maps to the PostgreSQL type used for casts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarType {
    Bool,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Text,
    Uuid,
    Timestamp,
    Date,
    Time,
    Json,
    Bytes,
}

impl ScalarType {
    /// PostgreSQL type name, used in `$n::type` casts and in table metadata.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ScalarType::Bool => "boolean",
            ScalarType::SmallInt => "smallint",
            ScalarType::Int => "integer",
            ScalarType::BigInt => "bigint",
            ScalarType::Float => "real",
            ScalarType::Double => "double precision",
            ScalarType::Text => "text",
            ScalarType::Uuid => "uuid",
            ScalarType::Timestamp => "timestamptz",
            ScalarType::Date => "date",
            ScalarType::Time => "time",
            ScalarType::Json => "jsonb",
            ScalarType::Bytes => "bytea",
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, ScalarType::SmallInt | ScalarType::Int | ScalarType::BigInt)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self, ScalarType::Float | ScalarType::Double)
    }
}

pub type RecordFn = fn() -> Record;

/// Shape of a type, including the indirection layers wrapped around it.
#[derive(Clone, Debug)]
pub enum Shape {
    Scalar(ScalarType),
    Optional(Box<Shape>),
    Pointer(Box<Shape>),
    List(Box<Shape>),
    Array(Box<Shape>, usize),
    Record(RecordFn),
}

impl Shape {
    pub fn of<T: Reflect + ?Sized>() -> Shape {
        T::shape()
    }

    pub fn record(f: RecordFn) -> Shape {
        Shape::Record(f)
    }

    /// Strips pointer, optional, list and array layers and returns the record
    /// underneath, if there is one.
    pub fn unwrap_record(&self) -> Option<RecordFn> {
        match self {
            Shape::Record(f) => Some(*f),
            Shape::Optional(inner)
            | Shape::Pointer(inner)
            | Shape::List(inner)
            | Shape::Array(inner, _) => inner.unwrap_record(),
            Shape::Scalar(_) => None,
        }
    }

    /// True when any layer between the outside and the record is a collection.
    pub fn is_collection(&self) -> bool {
        match self {
            Shape::List(_) | Shape::Array(_, _) => true,
            Shape::Optional(inner) | Shape::Pointer(inner) => inner.is_collection(),
            _ => false,
        }
    }

    pub fn is_optional(&self) -> bool {
        match self {
            Shape::Optional(_) => true,
            Shape::Pointer(inner) => inner.is_optional(),
            _ => false,
        }
    }

    /// The scalar under optional and pointer layers. Lists of scalars are not columns.
    pub fn scalar(&self) -> Option<ScalarType> {
        match self {
            Shape::Scalar(s) => Some(*s),
            Shape::Optional(inner) | Shape::Pointer(inner) => inner.scalar(),
            _ => None,
        }
    }
}

/// How a relation field joins to its owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelationKeys {
    /// Foreign key lives on the related table and points at our primary key.
    HasMany { foreign_key: String },
    HasOne { foreign_key: String },
    /// Foreign key lives on our table and points at the related primary key.
    BelongsTo { foreign_key: String },
}

#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub shape: Shape,
    pub column: Option<String>,
    pub rename: Option<String>,
    pub primary_key: bool,
    pub unique: bool,
    pub indexed: bool,
    pub not_null: bool,
    pub skip: bool,
    pub relation: Option<RelationKeys>,
}

impl Field {
    pub fn of<T: Reflect + ?Sized>(name: impl Into<String>) -> Self {
        Self::new(name, T::shape())
    }

    pub fn new(name: impl Into<String>, shape: Shape) -> Self {
        Field {
            name: name.into(),
            shape,
            column: None,
            rename: None,
            primary_key: false,
            unique: false,
            indexed: false,
            not_null: false,
            skip: false,
            relation: None,
        }
    }

    /// Explicit column name; wins over `rename` and the field name.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Serialized (JSON) name of the field.
    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.rename = Some(name.into());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Field is neither a column nor a relation.
    pub fn skip(mut self) -> Self {
        self.skip = true;
        self
    }

    pub fn has_many(mut self, foreign_key: impl Into<String>) -> Self {
        self.relation = Some(RelationKeys::HasMany { foreign_key: foreign_key.into() });
        self
    }

    pub fn has_one(mut self, foreign_key: impl Into<String>) -> Self {
        self.relation = Some(RelationKeys::HasOne { foreign_key: foreign_key.into() });
        self
    }

    pub fn belongs_to(mut self, foreign_key: impl Into<String>) -> Self {
        self.relation = Some(RelationKeys::BelongsTo { foreign_key: foreign_key.into() });
        self
    }
}

/// A struct-shaped prototype.
#[derive(Clone, Debug)]
pub struct Record {
    pub name: String,
    pub table: Option<String>,
    pub fields: Vec<Field>,
}

impl Record {
    pub fn new(name: impl Into<String>) -> Self {
        Record {
            name: name.into(),
            table: None,
            fields: Vec::new(),
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }
}

/// Implemented by every type usable as a registered prototype or a field type.
///
/// ```
/// use resolvespec::model::{Field, Record, Reflect, Shape};
///
/// struct Department;
///
/// impl Reflect for Department {
///     fn shape() -> Shape {
///         Shape::record(|| {
///             Record::new("Department")
///                 .table("departments")
///                 .field(Field::of::<String>("id").primary_key())
///                 .field(Field::of::<String>("name"))
///         })
///     }
/// }
/// ```
pub trait Reflect {
    fn shape() -> Shape;
}

macro_rules! reflect_scalar {
    ($($t:ty => $s:ident),* $(,)?) => {
        $(
            impl Reflect for $t {
                fn shape() -> Shape {
                    Shape::Scalar(ScalarType::$s)
                }
            }
        )*
    };
}

reflect_scalar! {
    bool => Bool,
    i8 => SmallInt,
    i16 => SmallInt,
    u8 => SmallInt,
    i32 => Int,
    u16 => Int,
    i64 => BigInt,
    u32 => BigInt,
    u64 => BigInt,
    f32 => Float,
    f64 => Double,
    String => Text,
    str => Text,
    char => Text,
    uuid::Uuid => Uuid,
    chrono::DateTime<chrono::Utc> => Timestamp,
    chrono::DateTime<chrono::FixedOffset> => Timestamp,
    chrono::NaiveDateTime => Timestamp,
    chrono::NaiveDate => Date,
    chrono::NaiveTime => Time,
    serde_json::Value => Json,
}

impl<T: Reflect> Reflect for Option<T> {
    fn shape() -> Shape {
        Shape::Optional(Box::new(T::shape()))
    }
}

impl<T: Reflect + ?Sized> Reflect for Box<T> {
    fn shape() -> Shape {
        Shape::Pointer(Box::new(T::shape()))
    }
}

impl<T: Reflect + ?Sized> Reflect for Arc<T> {
    fn shape() -> Shape {
        Shape::Pointer(Box::new(T::shape()))
    }
}

impl<T: Reflect> Reflect for Vec<T> {
    fn shape() -> Shape {
        Shape::List(Box::new(T::shape()))
    }
}

impl<T: Reflect> Reflect for [T] {
    fn shape() -> Shape {
        Shape::List(Box::new(T::shape()))
    }
}

impl<T: Reflect, const N: usize> Reflect for [T; N] {
    fn shape() -> Shape {
        Shape::Array(Box::new(T::shape()), N)
    }
}
