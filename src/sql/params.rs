//! Bind values for both Postgres drivers.

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, Postgres};
use tokio_postgres::types::{to_sql_checked, IsNull as PgIsNull, ToSql, Type};

use crate::sql::builder::Bind;

type BoxDynError = Box<dyn std::error::Error + Send + Sync>;

/// A value bound through sqlx. Values compared against a typed column travel
/// as text and are converted by the `$n::type` cast in the statement; the
/// rest keep their JSON type.
#[derive(Clone, Debug)]
pub enum PgBindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Json(Value),
}

impl PgBindValue {
    pub fn from_bind(bind: &Bind) -> Self {
        if bind.kind.is_some() {
            return match &bind.value {
                Value::Null => PgBindValue::Null,
                Value::String(s) => PgBindValue::String(s.clone()),
                other => PgBindValue::String(other.to_string()),
            };
        }
        Self::from_json(&bind.value)
    }

    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => PgBindValue::Null,
            Value::Bool(b) => PgBindValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => PgBindValue::I64(i),
                None => PgBindValue::F64(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => PgBindValue::String(s.clone()),
            Value::Array(_) | Value::Object(_) => PgBindValue::Json(v.clone()),
        }
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        match self {
            PgBindValue::Null => Ok(IsNull::Yes),
            PgBindValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf),
            PgBindValue::I64(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf),
            PgBindValue::F64(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf),
            PgBindValue::String(s) => <&str as Encode<Postgres>>::encode_by_ref(&s.as_str(), buf),
            PgBindValue::Json(v) => <Value as Encode<Postgres>>::encode_by_ref(v, buf),
        }
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self {
            PgBindValue::Null | PgBindValue::String(_) => <String as sqlx::Type<Postgres>>::type_info(),
            PgBindValue::Bool(_) => <bool as sqlx::Type<Postgres>>::type_info(),
            PgBindValue::I64(_) => <i64 as sqlx::Type<Postgres>>::type_info(),
            PgBindValue::F64(_) => <f64 as sqlx::Type<Postgres>>::type_info(),
            PgBindValue::Json(_) => <Value as sqlx::Type<Postgres>>::type_info(),
        })
    }
}

impl sqlx::Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}

/// A value bound through tokio-postgres. Statements are prepared untyped, so
/// the server infers each parameter's type and the value is encoded to match.
#[derive(Clone, Debug)]
pub struct PgParam(pub Value);

impl PgParam {
    pub fn from_bind(bind: &Bind) -> Self {
        PgParam(bind.value.clone())
    }

    fn text(&self) -> String {
        match &self.0 {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn integer(&self) -> Result<i64, BoxDynError> {
        match &self.0 {
            Value::Number(n) => n.as_i64().ok_or_else(|| format!("{} is not an integer", n).into()),
            Value::Bool(b) => Ok(i64::from(*b)),
            Value::String(s) => Ok(s.trim().parse()?),
            other => Err(format!("{} is not an integer", other).into()),
        }
    }

    fn float(&self) -> Result<f64, BoxDynError> {
        match &self.0 {
            Value::Number(n) => n.as_f64().ok_or_else(|| format!("{} is not a number", n).into()),
            Value::String(s) => Ok(s.trim().parse()?),
            other => Err(format!("{} is not a number", other).into()),
        }
    }

    fn boolean(&self) -> Result<bool, BoxDynError> {
        match &self.0 {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) => Ok(n.as_i64().unwrap_or_default() != 0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "yes" => Ok(true),
                "false" | "f" | "0" | "no" => Ok(false),
                other => Err(format!("{} is not a boolean", other).into()),
            },
            other => Err(format!("{} is not a boolean", other).into()),
        }
    }
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, BoxDynError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_utc());
    }
    Ok(NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))?)
}

impl ToSql for PgParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<PgIsNull, BoxDynError> {
        if self.0.is_null() {
            return Ok(PgIsNull::Yes);
        }
        match *ty {
            Type::BOOL => self.boolean()?.to_sql(ty, out),
            Type::INT2 => i16::try_from(self.integer()?)?.to_sql(ty, out),
            Type::INT4 => i32::try_from(self.integer()?)?.to_sql(ty, out),
            Type::INT8 => self.integer()?.to_sql(ty, out),
            Type::FLOAT4 => (self.float()? as f32).to_sql(ty, out),
            Type::FLOAT8 => self.float()?.to_sql(ty, out),
            Type::UUID => uuid::Uuid::parse_str(self.text().trim())?.to_sql(ty, out),
            Type::TIMESTAMPTZ => parse_timestamp(&self.text())?.and_utc().to_sql(ty, out),
            Type::TIMESTAMP => parse_timestamp(&self.text())?.to_sql(ty, out),
            Type::DATE => NaiveDate::parse_from_str(&self.text(), "%Y-%m-%d")?.to_sql(ty, out),
            Type::TIME => NaiveTime::parse_from_str(&self.text(), "%H:%M:%S%.f")?.to_sql(ty, out),
            Type::JSON | Type::JSONB => self.0.to_sql(ty, out),
            Type::BYTEA => self.text().into_bytes().to_sql(ty, out),
            _ => self.text().to_sql(ty, out),
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScalarType;
    use serde_json::json;

    #[test]
    fn typed_columns_bind_as_text() {
        let b = Bind { value: json!(42), kind: Some(ScalarType::Int) };
        assert!(matches!(PgBindValue::from_bind(&b), PgBindValue::String(s) if s == "42"));
        let b = Bind { value: json!(42), kind: None };
        assert!(matches!(PgBindValue::from_bind(&b), PgBindValue::I64(42)));
        let b = Bind { value: json!({"a": 1}), kind: None };
        assert!(matches!(PgBindValue::from_bind(&b), PgBindValue::Json(_)));
    }

    #[test]
    fn tokio_param_encodes_by_inferred_type() {
        let mut out = BytesMut::new();
        let p = PgParam(json!("7"));
        assert!(matches!(p.to_sql(&Type::INT4, &mut out), Ok(PgIsNull::No)));
        assert_eq!(&out[..], &7i32.to_be_bytes());

        let mut out = BytesMut::new();
        assert!(PgParam(json!("x")).to_sql(&Type::INT8, &mut out).is_err());
        assert!(matches!(PgParam(Value::Null).to_sql(&Type::INT8, &mut out), Ok(PgIsNull::Yes)));

        let mut out = BytesMut::new();
        assert!(PgParam(json!(true)).to_sql(&Type::TEXT, &mut out).is_ok());
        assert_eq!(&out[..], b"true");
    }
}
