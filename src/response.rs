//! Standard response envelope and alternate response shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Read summary. `total == -1` means counting was skipped on request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub total: i64,
    pub filtered: i64,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl Envelope {
    pub fn success(data: Value, metadata: Option<Metadata>) -> Self {
        Envelope {
            success: true,
            data: Some(data),
            metadata,
            error: None,
        }
    }

    pub fn failure(code: &str, message: String, details: Option<Value>) -> Self {
        Envelope {
            success: false,
            data: None,
            metadata: None,
            error: Some(ErrorDetail {
                code: code.to_string(),
                message,
                details,
            }),
        }
    }
}

/// Response body layout selected through request options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum ResponseFormat {
    #[default]
    Default,
    Simple,
    Syncfusion,
}

impl From<String> for ResponseFormat {
    fn from(s: String) -> Self {
        ResponseFormat::parse(&s)
    }
}

impl ResponseFormat {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => ResponseFormat::Simple,
            "syncfusion" => ResponseFormat::Syncfusion,
            _ => ResponseFormat::Default,
        }
    }
}

/// Builds the success body for the requested format.
pub fn render_success(format: ResponseFormat, mut data: Value, metadata: Option<Metadata>, clean: bool) -> Value {
    if clean {
        clean_json(&mut data);
    }
    match format {
        ResponseFormat::Simple => data,
        ResponseFormat::Syncfusion => {
            let count = metadata.as_ref().map(|m| m.total).filter(|t| *t >= 0).unwrap_or_else(|| match &data {
                Value::Array(items) => items.len() as i64,
                Value::Null => 0,
                _ => 1,
            });
            serde_json::json!({ "result": data, "count": count })
        }
        ResponseFormat::Default => serde_json::to_value(Envelope::success(data, metadata)).unwrap_or(Value::Null),
    }
}

/// Drops `null` members from every object, recursively.
pub fn clean_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            for v in map.values_mut() {
                clean_json(v);
            }
        }
        Value::Array(items) => {
            for v in items.iter_mut() {
                clean_json(v);
            }
        }
        _ => {}
    }
}
