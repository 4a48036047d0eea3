//! Parameter marshaling.
//!
//! Callers hand over [`Params`]; before a task is queued they are validated and
//! converted into a [`Binding`] of engine-native [`Value`]s. Byte buffers become
//! owned blobs, everything else passes through as-is.

use std::collections::HashSet;

use bytes::Bytes;
use rusqlite::Statement;

use super::types::Value;
use crate::error::{DatabaseError, Result};

/// A caller-supplied parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    /// Shared byte buffer
    Bytes(Bytes),
}

impl Param {
    fn marshal(self) -> Value {
        match self {
            Param::Null => Value::Null,
            Param::Integer(i) => Value::Integer(i),
            Param::Real(f) => Value::Real(f),
            Param::Text(s) => Value::Text(s),
            Param::Blob(b) => Value::Blob(b),
            Param::Bytes(b) => Value::Blob(b.to_vec()),
        }
    }
}

macro_rules! param_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Param {
            fn from(v: $t) -> Self {
                Param::Integer(i64::from(v))
            }
        })*
    };
}

param_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Param::Integer(i64::from(v))
    }
}

impl From<f32> for Param {
    fn from(v: f32) -> Self {
        Param::Real(f64::from(v))
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::Real(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Text(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Text(v)
    }
}

impl From<Vec<u8>> for Param {
    fn from(v: Vec<u8>) -> Self {
        Param::Blob(v)
    }
}

impl From<&[u8]> for Param {
    fn from(v: &[u8]) -> Self {
        Param::Bytes(Bytes::copy_from_slice(v))
    }
}

impl From<Bytes> for Param {
    fn from(v: Bytes) -> Self {
        Param::Bytes(v)
    }
}

impl From<Value> for Param {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => Param::Null,
            Value::Integer(i) => Param::Integer(i),
            Value::Real(f) => Param::Real(f),
            Value::Text(s) => Param::Text(s),
            Value::Blob(b) => Param::Blob(b),
        }
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(v: Option<T>) -> Self {
        v.map_or(Param::Null, Into::into)
    }
}

/// Parameters for one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    #[default]
    None,
    Positional(Vec<Param>),
    Named(Vec<(String, Param)>),
}

impl Params {
    pub fn positional<I, P>(values: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Param>,
    {
        Params::Positional(values.into_iter().map(Into::into).collect())
    }

    pub fn named<I, K, P>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, P)>,
        K: Into<String>,
        P: Into<Param>,
    {
        Params::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Params::None)
    }

    /// Reject malformed shapes, then marshal.
    pub fn into_binding(self) -> Result<Option<Binding>> {
        self.validate()?;
        Ok(marshal(self))
    }

    fn validate(&self) -> Result<()> {
        let Params::Named(pairs) = self else {
            return Ok(());
        };
        let mut seen = HashSet::with_capacity(pairs.len());
        for (name, _) in pairs {
            let key = bind_name(name);
            if key.len() < 2 {
                return Err(DatabaseError::Parameter(format!(
                    "empty parameter name {:?}",
                    name
                )));
            }
            if !seen.insert(key) {
                return Err(DatabaseError::Parameter(format!(
                    "duplicate parameter name {:?}",
                    name
                )));
            }
        }
        Ok(())
    }
}

impl From<Vec<Param>> for Params {
    fn from(values: Vec<Param>) -> Self {
        if values.is_empty() {
            Params::None
        } else {
            Params::Positional(values)
        }
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Params::None
    }
}

impl<P: Into<Param>, const N: usize> From<[P; N]> for Params {
    fn from(values: [P; N]) -> Self {
        if N == 0 {
            Params::None
        } else {
            Params::positional(values)
        }
    }
}

impl<P: Into<Param>> From<Option<P>> for Params {
    fn from(value: Option<P>) -> Self {
        match value {
            Some(v) => Params::Positional(vec![v.into()]),
            None => Params::None,
        }
    }
}

/// Marshaled parameters, ready to bind.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Positional(Vec<Value>),
    Named(Vec<(String, Value)>),
}

impl Binding {
    /// Bind onto a prepared engine statement.
    pub(crate) fn apply(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<()> {
        match self {
            Binding::Positional(values) => {
                for (i, value) in values.iter().enumerate() {
                    stmt.raw_bind_parameter(i + 1, value)?;
                }
            }
            Binding::Named(pairs) => {
                for (name, value) in pairs {
                    let index = stmt
                        .parameter_index(name)?
                        .ok_or_else(|| rusqlite::Error::InvalidParameterName(name.clone()))?;
                    stmt.raw_bind_parameter(index, value)?;
                }
            }
        }
        Ok(())
    }
}

/// Convert caller parameters into engine values. Absent parameters bind nothing.
pub fn marshal(params: Params) -> Option<Binding> {
    match params {
        Params::None => None,
        Params::Positional(values) => Some(Binding::Positional(
            values.into_iter().map(Param::marshal).collect(),
        )),
        Params::Named(pairs) => Some(Binding::Named(
            pairs
                .into_iter()
                .map(|(name, value)| (bind_name(&name), value.marshal()))
                .collect(),
        )),
    }
}

/// Bind names carry a sigil; bare names get `:`.
fn bind_name(name: &str) -> String {
    if name.starts_with([':', '@', '$']) {
        name.to_string()
    } else {
        format!(":{}", name)
    }
}
