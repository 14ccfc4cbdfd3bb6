//! Record-level helpers: field-name validation, dotted-path writes and
//! projection of engine-reserved fields.

use super::{Document, Value};
use crate::error::{LabError, Result};

/// Store identifier field.
pub const ID_FIELD: &str = "_id";

/// Monotonic version counter maintained by the concurrency controller.
pub const VERSION_FIELD: &str = "__version";

/// Shadow copy of the record's state before its latest update.
pub const OLD_FIELD: &str = "__old";

/// Names that would reach object internals through member access.
pub const FORBIDDEN_FIELD_NAMES: [&str; 3] = ["constructor", "__proto__", "prototype"];

fn check_field_name(key: &str) -> Result<()> {
    if key.starts_with('$') {
        return Err(LabError::InvalidField(format!(
            "field names can't start with $: {key}"
        )));
    }
    if key.contains('.') {
        return Err(LabError::InvalidField(format!(
            "field names cannot contain .: {key}"
        )));
    }
    if FORBIDDEN_FIELD_NAMES.contains(&key) {
        return Err(LabError::InvalidField(format!(
            "cannot use {key} as field name"
        )));
    }
    Ok(())
}

fn validate_value(value: &Value) -> Result<()> {
    match value {
        Value::Document(doc) => validate_document(doc),
        Value::Array(items) => items.iter().try_for_each(validate_value),
        _ => Ok(()),
    }
}

/// Recursively check every field name of a document.
pub fn validate_document(document: &Document) -> Result<()> {
    for (key, value) in document {
        check_field_name(key)?;
        validate_value(value)?;
    }
    Ok(())
}

/// Reject client payloads that try to write engine-reserved fields.
///
/// `paths` may be dotted; only the top-level segment is checked.
pub(crate) fn reject_reserved<'a>(
    paths: impl IntoIterator<Item = &'a String>,
    allow_id: bool,
) -> Result<()> {
    for path in paths {
        let root = path.split('.').next().unwrap_or(path);
        let reserved = root == VERSION_FIELD || root == OLD_FIELD || (!allow_id && root == ID_FIELD);
        if reserved {
            return Err(LabError::InvalidField(format!("{root} is reserved")));
        }
    }
    Ok(())
}

/// Set `value` at a dotted `path`, creating intermediate documents.
pub(crate) fn set_path(doc: &mut Document, path: &str, value: Value) -> Result<()> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = match segments.pop() {
        Some(s) if !s.is_empty() => s,
        _ => return Err(LabError::InvalidField(format!("empty path segment in {path}"))),
    };

    let mut parent = doc;
    for segment in segments {
        let entry = parent
            .entry(segment.to_string())
            .or_insert_with(|| Value::Document(Document::new()));
        parent = match entry {
            Value::Document(inner) => inner,
            _ => {
                return Err(LabError::InvalidField(format!(
                    "path {path} redefines non-document field {segment}"
                )))
            }
        };
    }
    parent.insert(last.to_string(), value);
    Ok(())
}

/// Apply a dotted-path set map to a copy of `base`.
///
/// This is the candidate post-update state rules are evaluated against.
pub fn expand_dotted(base: &Document, set: &Document) -> Result<Document> {
    let mut out = base.clone();
    for (path, value) in set {
        set_path(&mut out, path, value.clone())?;
    }
    Ok(out)
}

/// Remove a dotted path. Missing segments are ignored.
pub fn remove_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Document(inner)) = document.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

/// True for `__old` and any path below it.
pub fn is_shadow_path(path: &str) -> bool {
    path == OLD_FIELD
        || path
            .strip_prefix(OLD_FIELD)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Remove the shadow copy from a record before it leaves the engine.
pub fn strip_internal_fields(mut document: Document) -> Document {
    document.remove(OLD_FIELD);
    document
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{document_from_json, get_path};
    use serde_json::json;

    #[test]
    fn test_validate_rejects_bad_names() {
        for bad in [
            json!({ "$where": 1 }),
            json!({ "a.b": 1 }),
            json!({ "nested": { "constructor": 1 } }),
            json!({ "list": [{ "__proto__": 1 }] }),
        ] {
            let doc = document_from_json(bad.clone());
            assert!(
                matches!(validate_document(&doc), Err(LabError::InvalidField(_))),
                "accepted {bad}"
            );
        }
        let ok = document_from_json(json!({ "name": "x", "inner": { "n": 1 } }));
        assert!(validate_document(&ok).is_ok());
    }

    #[test]
    fn test_expand_dotted() {
        let base = document_from_json(json!({ "a": { "b": 1, "keep": true }, "n": 1 }));
        let set = document_from_json(json!({ "a.b": 2, "a.c.d": "new", "n": 5 }));
        let out = expand_dotted(&base, &set).unwrap();
        assert_eq!(get_path(&out, "a.b"), Value::Int64(2));
        assert_eq!(get_path(&out, "a.keep"), Value::Bool(true));
        assert_eq!(get_path(&out, "a.c.d"), Value::from("new"));
        assert_eq!(get_path(&out, "n"), Value::Int64(5));
        // base untouched
        assert_eq!(get_path(&base, "a.b"), Value::Int64(1));
    }

    #[test]
    fn test_expand_dotted_redefined_path() {
        let base = document_from_json(json!({ "a": 1 }));
        let set = document_from_json(json!({ "a.b": 2 }));
        assert!(matches!(
            expand_dotted(&base, &set),
            Err(LabError::InvalidField(_))
        ));
    }

    #[test]
    fn test_reject_reserved() {
        let keys = vec!["__version".to_string()];
        assert!(reject_reserved(&keys, true).is_err());
        let keys = vec!["__old.title".to_string()];
        assert!(reject_reserved(&keys, true).is_err());
        let keys = vec!["_id".to_string()];
        assert!(reject_reserved(&keys, true).is_ok());
        assert!(reject_reserved(&keys, false).is_err());
    }

    #[test]
    fn test_remove_path_and_shadow_paths() {
        let mut doc = document_from_json(json!({ "a": { "b": 1, "c": 2 }, "s": "x" }));
        remove_path(&mut doc, "a.b");
        remove_path(&mut doc, "s.deep");
        remove_path(&mut doc, "nope.x");
        assert_eq!(get_path(&doc, "a.b"), Value::Undefined);
        assert_eq!(get_path(&doc, "a.c"), Value::Int64(2));
        assert_eq!(get_path(&doc, "s"), Value::from("x"));

        assert!(is_shadow_path("__old"));
        assert!(is_shadow_path("__old.title"));
        assert!(!is_shadow_path("__older"));
    }

    #[test]
    fn test_strip_internal_fields() {
        let doc = document_from_json(json!({ "x": 1, "__old": { "x": 0 }, "__version": 1 }));
        let out = strip_internal_fields(doc);
        assert!(!out.contains_key(OLD_FIELD));
        assert!(out.contains_key(VERSION_FIELD));
    }
}
