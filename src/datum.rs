//! Dynamically typed values and the row serializers used by state stores.
//!
//! A raw state key or value is a positional list of [`Datum`]s encoded with the
//! serializer recorded in the store's schema descriptor. Decoding checks every
//! value against the declared [`Field`]s so that a schema/value mismatch
//! surfaces as a [`StateError::Decode`] instead of a wrongly shaped row.

use crate::error::{Result, StateError};
use crate::schema::{DataType, Field};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single dynamically typed value.
///
/// Nested structs are positional; their field names live in the matching
/// [`DataType::Struct`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(OrderedFloat<f64>),
    String(String),
    Struct(Vec<Datum>),
}

impl Datum {
    /// Convenience constructor for doubles.
    #[must_use]
    pub fn double(v: f64) -> Self {
        Self::Double(OrderedFloat(v))
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(i64::from(*v)),
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check this value against a declared type.
    fn conforms(&self, field: &Field) -> bool {
        match (self, &field.data_type) {
            (Self::Null, _) => field.nullable,
            (Self::Bool(_), DataType::Bool)
            | (Self::Int(_), DataType::Int)
            | (Self::Long(_), DataType::Long)
            | (Self::Double(_), DataType::Double)
            | (Self::String(_), DataType::String) => true,
            (Self::Struct(values), DataType::Struct(fields)) => conforms_all(values, fields),
            _ => false,
        }
    }
}

impl From<i32> for Datum {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<bool> for Datum {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Datum {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Struct(values) => {
                f.write_str("{")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

fn conforms_all(values: &[Datum], fields: &[Field]) -> bool {
    values.len() == fields.len() && values.iter().zip(fields).all(|(v, f)| v.conforms(f))
}

/// A named struct value: the `key` or `value` column of an output row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StructValue {
    fields: Vec<(String, Datum)>,
}

impl StructValue {
    /// Bind positional values to the names of `fields`.
    ///
    /// Callers guarantee equal lengths (decoding has already checked arity).
    #[must_use]
    pub fn from_parts(fields: &[Field], values: Vec<Datum>) -> Self {
        debug_assert_eq!(fields.len(), values.len());
        Self {
            fields: fields.iter().map(|f| f.name.clone()).zip(values).collect(),
        }
    }

    /// Look up a top-level field by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Datum> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Field names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    /// Field values in declaration order.
    pub fn values(&self) -> impl Iterator<Item = &Datum> {
        self.fields.iter().map(|(_, v)| v)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Byte encoding of a raw key or value, recorded in the schema descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Serializer {
    /// Compact binary encoding (the default for engine-written stores).
    Postcard,
    /// JSON array per key/value; used by debugging builds of the engine.
    Json,
}

impl Serializer {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Postcard => "postcard",
            Self::Json => "json",
        }
    }

    /// Encode a positional row.
    ///
    /// # Errors
    /// Returns [`StateError::Decode`] if the values cannot be serialized.
    pub fn encode(self, values: &[Datum]) -> Result<Vec<u8>> {
        match self {
            Self::Postcard => postcard::to_allocvec(values)
                .map_err(|e| StateError::decode(format!("postcard encode: {e}"))),
            Self::Json => serde_json::to_vec(values)
                .map_err(|e| StateError::decode(format!("json encode: {e}"))),
        }
    }

    /// Decode a positional row and check it against `fields`.
    ///
    /// # Errors
    /// Returns [`StateError::Decode`] if the bytes are not a valid encoding or
    /// the decoded values do not match the declared fields.
    pub fn decode(self, bytes: &[u8], fields: &[Field]) -> Result<Vec<Datum>> {
        let values: Vec<Datum> = match self {
            Self::Postcard => postcard::from_bytes(bytes)
                .map_err(|e| StateError::decode(format!("postcard decode: {e}")))?,
            Self::Json => serde_json::from_slice(bytes)
                .map_err(|e| StateError::decode(format!("json decode: {e}")))?,
        };
        if !conforms_all(&values, fields) {
            return Err(StateError::decode(format!(
                "{} values do not match schema with fields [{}]",
                values.len(),
                fields
                    .iter()
                    .map(|f| f.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        Ok(values)
    }
}
