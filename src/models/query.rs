//! Query-related data models.
//!
//! This module defines bound parameter values, query requests and the two result shapes
//! a statement can produce.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Default query timeout in milliseconds (40s).
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 40_000;

/// Resolve a caller-supplied timeout: absent or zero falls back to `fallback`.
pub fn timeout_or(timeout_ms: Option<u64>, fallback: Duration) -> Duration {
    match timeout_ms {
        Some(ms) if ms > 0 => Duration::from_millis(ms),
        _ => fallback,
    }
}

/// [`timeout_or`] with the crate-wide default.
pub fn resolve_timeout(timeout_ms: Option<u64>) -> Duration {
    timeout_or(timeout_ms, Duration::from_millis(DEFAULT_QUERY_TIMEOUT_MS))
}

/// One result row: column name to decoded value, in column order.
pub type Row = serde_json::Map<String, JsonValue>;

/// A positional parameter value for `?` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Unsigned integer beyond the i64 range (e.g. BIGINT UNSIGNED ids)
    UInt(u64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Convert a JSON scalar into a parameter. Arrays and objects are rejected.
    pub fn from_json(value: JsonValue) -> Option<Self> {
        match value {
            JsonValue::Null => Some(Self::Null),
            JsonValue::Bool(b) => Some(Self::Bool(b)),
            JsonValue::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_u64().map(Self::UInt))
                .or_else(|| n.as_f64().map(Self::Float)),
            JsonValue::String(s) => Some(Self::String(s)),
            JsonValue::Array(_) | JsonValue::Object(_) => None,
        }
    }
}

macro_rules! impl_from_for_param {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for QueryParam {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }
        )+
    };
}

impl_from_for_param!(
    bool => Bool,
    i8 => Int,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => Int,
    u16 => Int,
    u32 => Int,
    u64 => UInt,
    f32 => Float,
    f64 => Float,
    String => String,
    &str => String,
    Vec<u8> => Bytes,
);

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// A statement with its positional parameters and optional timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<QueryParam>,
    /// Default: 40000
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl QueryRequest {
    /// Create a new query request without parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            timeout_ms: None,
        }
    }

    /// Add a parameter to this query.
    pub fn with_param(mut self, param: impl Into<QueryParam>) -> Self {
        self.params.push(param.into());
        self
    }

    /// Replace all parameters.
    pub fn with_params(mut self, params: Vec<QueryParam>) -> Self {
        self.params = params;
        self
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Get the effective timeout.
    pub fn effective_timeout(&self) -> Duration {
        resolve_timeout(self.timeout_ms)
    }
}

/// Acknowledgement returned by statements that produce no result columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteAck {
    pub affected_rows: u64,
    /// Generated key of the last inserted row; `None` when the driver reports none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_id: Option<u64>,
    /// Server speaks the 4.1+ protocol.
    pub protocol41: bool,
    pub execution_time_ms: u64,
}

/// Result of a single statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    /// Statement produced result columns (possibly zero rows).
    Rows(Vec<Row>),
    /// Statement produced no result columns.
    Write(WriteAck),
}

impl QueryResult {
    /// Check if this is a row set.
    pub fn is_rows(&self) -> bool {
        matches!(self, Self::Rows(_))
    }

    /// Borrow the rows, if this is a row set.
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            Self::Rows(rows) => Some(rows),
            Self::Write(_) => None,
        }
    }

    /// Borrow the write acknowledgement, if any.
    pub fn write_ack(&self) -> Option<&WriteAck> {
        match self {
            Self::Rows(_) => None,
            Self::Write(ack) => Some(ack),
        }
    }

    /// Non-empty row set, or `None` for "no rows" and for write results.
    pub fn into_non_empty_rows(self) -> Option<Vec<Row>> {
        match self {
            Self::Rows(rows) if !rows.is_empty() => Some(rows),
            _ => None,
        }
    }

    pub fn insert_id(&self) -> Option<u64> {
        self.write_ack().and_then(|ack| ack.insert_id)
    }

    pub fn affected_rows(&self) -> Option<u64> {
        self.write_ack().map(|ack| ack.affected_rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ack(affected_rows: u64, insert_id: Option<u64>) -> QueryResult {
        QueryResult::Write(WriteAck {
            affected_rows,
            insert_id,
            protocol41: true,
            execution_time_ms: 1,
        })
    }

    #[test]
    fn test_resolve_timeout() {
        assert_eq!(resolve_timeout(None), Duration::from_millis(40_000));
        assert_eq!(resolve_timeout(Some(0)), Duration::from_millis(40_000));
        assert_eq!(resolve_timeout(Some(1500)), Duration::from_millis(1500));
        assert_eq!(
            timeout_or(Some(0), Duration::from_millis(500)),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_query_param_types() {
        assert!(QueryParam::Null.is_null());
        assert!(!QueryParam::Bool(true).is_null());
        assert_eq!(QueryParam::from(42).type_name(), "int");
        assert_eq!(QueryParam::from(u64::MAX).type_name(), "uint");
        assert_eq!(QueryParam::from("hello").type_name(), "string");
        assert_eq!(QueryParam::from(None::<i32>), QueryParam::Null);
    }

    #[test]
    fn test_query_param_from_json() {
        assert_eq!(QueryParam::from_json(json!(5)), Some(QueryParam::Int(5)));
        assert_eq!(QueryParam::from_json(json!(1.5)), Some(QueryParam::Float(1.5)));
        assert_eq!(
            QueryParam::from_json(json!("a")),
            Some(QueryParam::String("a".to_string()))
        );
        assert_eq!(QueryParam::from_json(json!([1])), None);
    }

    #[test]
    fn test_query_request_defaults() {
        let req = QueryRequest::new("SELECT 1").with_param(7);
        assert_eq!(req.params, vec![QueryParam::Int(7)]);
        assert_eq!(req.effective_timeout(), Duration::from_millis(DEFAULT_QUERY_TIMEOUT_MS));
        assert_eq!(req.with_timeout(10).effective_timeout(), Duration::from_millis(10));
    }

    #[test]
    fn test_empty_rows_are_absent() {
        assert_eq!(QueryResult::Rows(Vec::new()).into_non_empty_rows(), None);
        assert_eq!(ack(1, Some(3)).into_non_empty_rows(), None);

        let mut row = Row::new();
        row.insert("x".to_string(), json!(1));
        let rows = QueryResult::Rows(vec![row.clone()]).into_non_empty_rows();
        assert_eq!(rows, Some(vec![row]));
    }

    #[test]
    fn test_write_ack_accessors() {
        let result = ack(2, None);
        assert!(!result.is_rows());
        assert_eq!(result.affected_rows(), Some(2));
        assert_eq!(result.insert_id(), None);
        assert_eq!(QueryResult::Rows(Vec::new()).affected_rows(), None);
    }

    #[test]
    fn test_write_ack_serializes_camel_case() {
        let value = serde_json::to_value(ack(1, Some(9))).unwrap();
        assert_eq!(value["affectedRows"], 1);
        assert_eq!(value["insertId"], 9);
        assert_eq!(value["protocol41"], true);
    }
}
