//! Record types flowing through the migration pipeline.
//!
//! A [`RawRecord`] is what a source store hands back: a document id, the
//! source-native position used for cursoring, and a loosely structured body.
//! The body is resolved field by field through [`RawField`] during
//! normalization into a fully typed [`NormalizedRecord`]; nothing untyped
//! travels past the normalizer.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Opaque resumption marker for paginated reads.
///
/// Holds the source-native position of the last record of a page (a
/// document id for keyed stores, a byte offset for NDJSON files). Only the
/// source that produced a cursor can interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// Wrap a source-native position.
    pub fn new(position: impl Into<String>) -> Self {
        Self(position.into())
    }

    /// The raw position string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Body of a source document.
#[derive(Debug, Clone, PartialEq)]
pub enum RawBody {
    /// A key-value document; fields may be missing or of unexpected type.
    Document(Map<String, Value>),
    /// The source could not decode the document at all.
    Malformed(String),
}

/// A document as read from the source store.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Source document id.
    pub id: String,
    /// Whether `id` was made up by the driver because the document had none.
    pub id_generated: bool,
    /// Position of this record in the source, used to build the next cursor.
    pub position: Cursor,
    /// Document body.
    pub body: RawBody,
}

/// A single field looked up on a raw record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawField<'a> {
    /// The key is absent (or the document is malformed).
    Missing,
    /// The key is present with an explicit null.
    Null,
    /// A string value.
    Text(&'a str),
    /// A numeric value.
    Number(&'a Number),
    /// Any other JSON value (bool, array, object).
    Other(&'a Value),
}

impl RawRecord {
    /// Create a record from a JSON document.
    pub fn document(id: impl Into<String>, position: Cursor, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            id_generated: false,
            position,
            body: RawBody::Document(fields),
        }
    }

    /// Create a record whose body could not be decoded.
    pub fn malformed(id: impl Into<String>, position: Cursor, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            id_generated: false,
            position,
            body: RawBody::Malformed(reason.into()),
        }
    }

    /// Mark `id` as a driver-made placeholder rather than a document key.
    pub fn with_generated_id(mut self) -> Self {
        self.id_generated = true;
        self
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> RawField<'_> {
        let RawBody::Document(fields) = &self.body else {
            return RawField::Missing;
        };
        match fields.get(name) {
            None => RawField::Missing,
            Some(Value::Null) => RawField::Null,
            Some(Value::String(s)) => RawField::Text(s),
            Some(Value::Number(n)) => RawField::Number(n),
            Some(other) => RawField::Other(other),
        }
    }
}

impl<'a> RawField<'a> {
    /// Whether the field is absent or explicitly null.
    pub fn is_absent(&self) -> bool {
        matches!(self, RawField::Missing | RawField::Null)
    }

    /// Integer content. Accepts integral JSON numbers and numeric strings.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RawField::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            RawField::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// A fully typed user record ready for the destination store.
///
/// Every optional attribute is an explicit `Option` and serializes as
/// `null`, never as an absent key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Lower-cased identity key; the upsert match criterion.
    pub email: String,
    /// One-way credential hash.
    pub password: String,
    /// Display name.
    pub name: String,
    /// Device id, or the configured sentinel when unknown.
    pub device_id: String,
    pub fcm_token: Option<String>,
    pub age: Option<i64>,
    pub device_type: Option<String>,
    pub gender: Option<String>,
    pub mobile_no: Option<i64>,
    pub profile_url: Option<String>,
    pub uid: Option<String>,
}

impl NormalizedRecord {
    /// The identity key this record is matched by.
    pub fn identity_key(&self) -> &str {
        &self.email
    }
}

/// A bounded group of normalized records flushed together.
pub type Batch = Vec<NormalizedRecord>;
