//! SQLite value and row types.

use std::sync::Arc;

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::de::DeserializeOwned;
use smallvec::SmallVec;

use crate::error::{DatabaseError, Result};

/// An engine-native SQLite value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view. Reals only convert when they hold an exact integer.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Integer(i) => Some(i),
            Value::Real(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                Some(f as i64)
            }
            _ => None,
        }
    }

    /// Real view. Integers beyond 2^53 lose precision.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Real(f) => Some(f),
            Value::Integer(i) => Some(i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        if let Value::Text(s) = self {
            Some(s)
        } else {
            None
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        if let Value::Blob(b) = self {
            Some(b)
        } else {
            None
        }
    }

    /// JSON form. Blobs become arrays of byte values; non-finite reals become null.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Real(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Blob(b) => serde_json::Value::Array(
                b.iter().map(|byte| serde_json::Value::from(*byte)).collect(),
            ),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Value::Null => Ok(ToSqlOutput::Owned(rusqlite::types::Value::Null)),
            Value::Integer(i) => Ok(ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i))),
            Value::Real(f) => Ok(ToSqlOutput::Owned(rusqlite::types::Value::Real(*f))),
            // Borrow text and blobs; rebinding a stored binding must not copy it
            Value::Text(s) => Ok(ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes()))),
            Value::Blob(b) => Ok(ToSqlOutput::Borrowed(ValueRef::Blob(b))),
        }
    }
}

/// Owned copy of an engine cell. Invalid UTF-8 text is replaced, not rejected.
impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(s) => Value::Text(String::from_utf8_lossy(s).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(value.into())
    }
}

/// Column names shared by every row of one result.
pub type Columns = Arc<[String]>;

/// One result row: a column-name-to-value mapping in column order.
///
/// Uses SmallVec so rows with up to 16 columns stay inline.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Columns,
    values: SmallVec<[Value; 16]>,
}

impl Row {
    pub(crate) fn new(columns: Columns, values: SmallVec<[Value; 16]>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value by column name. With duplicate names the first column wins.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }

    /// JSON object keyed by column name. With duplicate names the last column wins.
    pub fn to_json(&self) -> serde_json::Map<String, serde_json::Value> {
        self.iter()
            .map(|(name, value)| (name.to_string(), value.to_json()))
            .collect()
    }

    /// Deserialize the row into a typed record.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(serde_json::Value::Object(self.to_json()))
            .map_err(|e| DatabaseError::Parameter(format!("row decode failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn row() -> Row {
        let columns: Columns = vec!["id".to_string(), "name".to_string(), "data".to_string()].into();
        Row::new(
            columns,
            SmallVec::from_vec(vec![
                Value::Integer(7),
                Value::Text("fan".to_string()),
                Value::Blob(vec![1, 2]),
            ]),
        )
    }

    #[test]
    fn test_value_accessors() {
        assert!(Value::Null.is_null());
        assert_eq!(Value::Integer(42).as_f64(), Some(42.0));
        assert_eq!(Value::Real(2.0).as_i64(), Some(2));
        // Fractional reals are not truncated
        assert_eq!(Value::Real(1.5).as_i64(), None);
        assert_eq!(Value::Real(f64::INFINITY).as_i64(), None);
        assert_eq!(Value::Text("hi".to_string()).as_str(), Some("hi"));
        assert_eq!(Value::Blob(vec![1, 2, 3]).as_bytes(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_from_value_ref() {
        assert_eq!(Value::from(ValueRef::Integer(3)), Value::Integer(3));
        assert_eq!(
            Value::from(ValueRef::Text(&[0x66, 0xFF])),
            Value::Text("f\u{FFFD}".to_string())
        );
        assert_eq!(Value::from(ValueRef::Blob(&[9, 8])), Value::Blob(vec![9, 8]));
    }

    #[test]
    fn test_row_lookup() {
        let row = row();
        assert_eq!(row.get("name"), Some(&Value::Text("fan".to_string())));
        assert_eq!(row.get_index(0), Some(&Value::Integer(7)));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.len(), 3);
    }

    #[test]
    fn test_row_json() {
        let json = row().to_json();
        assert_eq!(json["id"], serde_json::json!(7));
        assert_eq!(json["data"], serde_json::json!([1, 2]));
        assert_eq!(Value::Real(f64::NAN).to_json(), serde_json::Value::Null);
    }

    #[test]
    fn test_row_decode() {
        #[derive(Deserialize)]
        struct Device {
            id: i64,
            name: String,
            data: Vec<u8>,
        }

        let device: Device = row().decode().unwrap();
        assert_eq!(device.id, 7);
        assert_eq!(device.name, "fan");
        assert_eq!(device.data, vec![1, 2]);
    }
}
