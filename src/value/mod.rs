//! The store's value model.
//!
//! Records ("compounds") are schemaless documents. The backing store keeps a
//! closed set of scalar kinds apart (two integer widths, doubles, decimals,
//! dates, object ids) and both the rule engine and condition matching have
//! to respect those kinds, so values are not flattened to JSON.

mod compare;
mod document;

pub use compare::{compare, equals, CompareError};
pub use document::{
    expand_dotted, is_shadow_path, remove_path, strip_internal_fields, validate_document,
    FORBIDDEN_FIELD_NAMES, ID_FIELD, OLD_FIELD, VERSION_FIELD,
};
pub(crate) use document::{reject_reserved, set_path};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// A schemaless record or sub-document.
pub type Document = BTreeMap<String, Value>;

/// 12-byte opaque record identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub [u8; 12]);

static OBJECT_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

impl ObjectId {
    /// Generate a fresh id: seconds, process id, then a process-local counter.
    pub fn generate() -> Self {
        let secs = (crate::types::now_millis() / 1000) as u32;
        let pid = std::process::id();
        let count = OBJECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..8].copy_from_slice(&pid.to_be_bytes());
        bytes[8..12].copy_from_slice(&count.to_be_bytes());
        ObjectId(bytes)
    }

    /// Canonical 24-character hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from the canonical hex form.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 12] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(ObjectId(arr))
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// High-precision decimal, kept in its canonical string form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Decimal128(pub String);

/// Milliseconds since Unix epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DateTime(pub i64);

impl DateTime {
    pub fn from_millis(ms: i64) -> Self {
        DateTime(ms)
    }

    pub fn millis(self) -> i64 {
        self.0
    }
}

/// A single value stored in a record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Field absent / unknown identifier.
    Undefined,
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Decimal(Decimal128),
    Date(DateTime),
    ObjectId(ObjectId),
    String(String),
    Array(Vec<Value>),
    Document(Document),
}

impl Value {
    /// Name of this value's kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Double(_) => "double",
            Value::Decimal(_) => "decimal",
            Value::Date(_) => "date",
            Value::ObjectId(_) => "objectId",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Document(_) => "document",
        }
    }

    /// Null or absent.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int32(_) | Value::Int64(_) | Value::Double(_))
    }

    /// Truthiness as the rule language sees it.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int32(n) => *n != 0,
            Value::Int64(n) => *n != 0,
            Value::Double(d) => *d != 0.0 && !d.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Decimal(_)
            | Value::Date(_)
            | Value::ObjectId(_)
            | Value::Array(_)
            | Value::Document(_) => true,
        }
    }

    /// Integer view of numeric kinds (doubles only when integral).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(n) => Some(*n as i64),
            Value::Int64(n) => Some(*n),
            Value::Double(d) if d.fract() == 0.0 && d.is_finite() => Some(*d as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(n) => Some(*n as f64),
            Value::Int64(n) => Some(*n as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    /// Look up a direct member: a document field, an array index, or `length`.
    pub fn member(&self, name: &str) -> Value {
        match self {
            Value::Document(doc) => doc.get(name).cloned().unwrap_or(Value::Undefined),
            Value::Array(items) => {
                if name == "length" {
                    return Value::Int64(items.len() as i64);
                }
                name.parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or(Value::Undefined)
            }
            Value::String(s) if name == "length" => Value::Int64(s.chars().count() as i64),
            _ => Value::Undefined,
        }
    }

    /// Render for string concatenation.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int32(n) => n.to_string(),
            Value::Int64(n) => n.to_string(),
            Value::Double(d) => d.to_string(),
            Value::Decimal(d) => d.0.clone(),
            Value::Date(d) => d.0.to_string(),
            Value::ObjectId(id) => id.to_hex(),
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(Value::to_display_string)
                .collect::<Vec<_>>()
                .join(","),
            Value::Document(_) => "[object Object]".to_string(),
        }
    }

    /// Canonical JSON. Documents are key-sorted, so equal values always
    /// render to the same text.
    pub fn to_canonical_json(&self) -> serde_json::Value {
        use serde_json::{json, Value as Json};
        match self {
            Value::Undefined => json!({ "$undefined": true }),
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int32(n) => json!(n),
            Value::Int64(n) => json!(n),
            Value::Double(d) => match serde_json::Number::from_f64(*d) {
                Some(n) => Json::Number(n),
                None => json!({ "$numberDouble": d.to_string() }),
            },
            Value::Decimal(d) => json!({ "$numberDecimal": d.0 }),
            Value::Date(d) => json!({ "$date": d.0 }),
            Value::ObjectId(id) => json!({ "$oid": id.to_hex() }),
            Value::String(s) => Json::String(s.clone()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_canonical_json).collect()),
            Value::Document(doc) => Json::Object(
                doc.iter()
                    .map(|(k, v)| (k.clone(), v.to_canonical_json()))
                    .collect(),
            ),
        }
    }

    /// Convert plain JSON. Integers become `Int64`, other numbers `Double`,
    /// and `{"$oid": ..}` / `{"$date": ..}` wrappers are recognised.
    pub fn from_json(json: serde_json::Value) -> Value {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int64(i),
                None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from_json).collect()),
            Json::Object(map) => {
                if map.len() == 1 {
                    if let Some(Json::String(hex)) = map.get("$oid") {
                        if let Ok(id) = ObjectId::from_hex(hex) {
                            return Value::ObjectId(id);
                        }
                    }
                    if let Some(ms) = map.get("$date").and_then(Json::as_i64) {
                        return Value::Date(DateTime(ms));
                    }
                    if let Some(Json::String(d)) = map.get("$numberDecimal") {
                        return Value::Decimal(Decimal128(d.clone()));
                    }
                }
                Value::Document(
                    map.into_iter()
                        .map(|(k, v)| (k, Value::from_json(v)))
                        .collect(),
                )
            }
        }
    }
}

/// Build a document from a JSON object; non-objects yield an empty document.
pub fn document_from_json(json: serde_json::Value) -> Document {
    match Value::from_json(json) {
        Value::Document(doc) => doc,
        _ => Document::new(),
    }
}

/// Resolve a dotted path (`a.b.0.c`) inside a document.
pub fn get_path(doc: &Document, path: &str) -> Value {
    let mut segments = path.split('.');
    let first = match segments.next() {
        Some(s) => s,
        None => return Value::Undefined,
    };
    let mut current = match doc.get(first) {
        Some(v) => v.clone(),
        None => return Value::Undefined,
    };
    for segment in segments {
        current = match &current {
            Value::Document(_) | Value::Array(_) => current.member(segment),
            _ => return Value::Undefined,
        };
    }
    current
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int32(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int64(n)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::ObjectId(id)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Document(doc)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_id_hex_roundtrip() {
        let id = ObjectId::generate();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 24);
        assert_eq!(ObjectId::from_hex(&hex).unwrap(), id);
        assert!(ObjectId::from_hex("abc").is_err());
    }

    #[test]
    fn test_object_ids_are_unique() {
        let a = ObjectId::generate();
        let b = ObjectId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int32(0).is_truthy());
        assert!(!Value::Double(f64::NAN).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(Value::Document(Document::new()).is_truthy());
        assert!(Value::Array(vec![]).is_truthy());
    }

    #[test]
    fn test_get_path() {
        let doc = document_from_json(json!({
            "a": { "b": { "c": 3 } },
            "tags": ["x", "y"]
        }));
        assert_eq!(get_path(&doc, "a.b.c"), Value::Int64(3));
        assert_eq!(get_path(&doc, "tags.1"), Value::from("y"));
        assert_eq!(get_path(&doc, "tags.length"), Value::Int64(2));
        assert_eq!(get_path(&doc, "a.missing.c"), Value::Undefined);
        assert_eq!(get_path(&doc, "a.b.c.d"), Value::Undefined);
    }

    #[test]
    fn test_from_json_wrappers() {
        let id = ObjectId::generate();
        let value = Value::from_json(json!({ "$oid": id.to_hex() }));
        assert_eq!(value, Value::ObjectId(id));
        let value = Value::from_json(json!({ "$date": 1000 }));
        assert_eq!(value, Value::Date(DateTime(1000)));
        assert_eq!(Value::from_json(json!(1.5)), Value::Double(1.5));
    }

    #[test]
    fn test_canonical_json_is_key_sorted() {
        let a = document_from_json(json!({ "z": 1, "a": { "y": 2, "b": 3 } }));
        let b = document_from_json(json!({ "a": { "b": 3, "y": 2 }, "z": 1 }));
        let ja = Value::Document(a).to_canonical_json().to_string();
        let jb = Value::Document(b).to_canonical_json().to_string();
        assert_eq!(ja, jb);
        assert_eq!(ja, r#"{"a":{"b":3,"y":2},"z":1}"#);
    }
}
