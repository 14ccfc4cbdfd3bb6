//! Condition map parsing and store-native matching.

use crate::error::{LabError, Result};
use crate::value::{compare, equals, get_path, Document, Value, ID_FIELD};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Operators allowed inside an operator sub-map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Exists,
}

impl QueryOperator {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "$eq" => QueryOperator::Eq,
            "$ne" => QueryOperator::Ne,
            "$gt" => QueryOperator::Gt,
            "$gte" => QueryOperator::Gte,
            "$lt" => QueryOperator::Lt,
            "$lte" => QueryOperator::Lte,
            "$in" => QueryOperator::In,
            "$nin" => QueryOperator::Nin,
            "$exists" => QueryOperator::Exists,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueryOperator::Eq => "$eq",
            QueryOperator::Ne => "$ne",
            QueryOperator::Gt => "$gt",
            QueryOperator::Gte => "$gte",
            QueryOperator::Lt => "$lt",
            QueryOperator::Lte => "$lte",
            QueryOperator::In => "$in",
            QueryOperator::Nin => "$nin",
            QueryOperator::Exists => "$exists",
        }
    }
}

/// The declared constraint on one path.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// Exact value (including plain sub-documents).
    Literal(Value),
    /// All operators must hold.
    Operators(Vec<(QueryOperator, Value)>),
}

/// One side of a declared range.
#[derive(Clone, Debug, PartialEq)]
pub struct Bound {
    pub value: Value,
    pub inclusive: bool,
}

/// Range operators declared on a path.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bounds {
    /// From `$gt` / `$gte`.
    pub lower: Vec<Bound>,
    /// From `$lt` / `$lte`.
    pub upper: Vec<Bound>,
}

/// Equality the way the store matches it: arrays match when any element is
/// equal to a scalar operand.
fn value_matches(field: &Value, expected: &Value) -> bool {
    if equals(field, expected) {
        return true;
    }
    match (field, expected) {
        (Value::Array(items), other) if !matches!(other, Value::Array(_)) => {
            items.iter().any(|item| equals(item, other))
        }
        _ => false,
    }
}

fn ordering_matches(field: &Value, bound: &Value, accept: fn(Ordering) -> bool) -> bool {
    match field {
        Value::Array(items) => items
            .iter()
            .any(|item| compare(item, bound).map(accept).unwrap_or(false)),
        _ => compare(field, bound).map(accept).unwrap_or(false),
    }
}

impl Condition {
    fn from_value(path: &str, value: Value) -> Result<Self> {
        let doc = match &value {
            Value::Document(doc) if !doc.is_empty() && doc.keys().all(|k| k.starts_with('$')) => {
                doc
            }
            _ => return Ok(Condition::Literal(value)),
        };

        let mut operators = Vec::with_capacity(doc.len());
        for (name, operand) in doc {
            let op = QueryOperator::parse(name).ok_or_else(|| {
                LabError::InvalidCondition(format!("unknown operator {name} on {path}"))
            })?;
            if matches!(op, QueryOperator::In | QueryOperator::Nin)
                && !matches!(operand, Value::Array(_))
            {
                return Err(LabError::InvalidCondition(format!(
                    "{name} on {path} needs an array"
                )));
            }
            operators.push((op, operand.clone()));
        }
        Ok(Condition::Operators(operators))
    }

    /// Does a record's field value satisfy this condition?
    pub fn matches(&self, field: &Value) -> bool {
        match self {
            Condition::Literal(expected) => value_matches(field, expected),
            Condition::Operators(ops) => ops.iter().all(|(op, operand)| match op {
                QueryOperator::Eq => value_matches(field, operand),
                QueryOperator::Ne => !value_matches(field, operand),
                QueryOperator::Gt => ordering_matches(field, operand, Ordering::is_gt),
                QueryOperator::Gte => ordering_matches(field, operand, Ordering::is_ge),
                QueryOperator::Lt => ordering_matches(field, operand, Ordering::is_lt),
                QueryOperator::Lte => ordering_matches(field, operand, Ordering::is_le),
                QueryOperator::In => match operand {
                    Value::Array(options) => options.iter().any(|o| value_matches(field, o)),
                    _ => false,
                },
                QueryOperator::Nin => match operand {
                    Value::Array(options) => !options.iter().any(|o| value_matches(field, o)),
                    _ => true,
                },
                QueryOperator::Exists => {
                    !matches!(field, Value::Undefined) == operand.is_truthy()
                }
            }),
        }
    }

    fn operator(&self, wanted: QueryOperator) -> Option<&Value> {
        match self {
            Condition::Literal(_) => None,
            Condition::Operators(ops) => ops.iter().find(|(op, _)| *op == wanted).map(|(_, v)| v),
        }
    }
}

/// An immutable, parsed condition map.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ConditionMap {
    conditions: BTreeMap<String, Condition>,
    source: Document,
}

impl ConditionMap {
    /// The match-everything map.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a flat condition document.
    pub fn from_document(document: Document) -> Result<Self> {
        let mut conditions = BTreeMap::new();
        for (path, value) in &document {
            if path.is_empty() || path.starts_with('$') {
                return Err(LabError::InvalidCondition(format!(
                    "unsupported condition key `{path}`"
                )));
            }
            conditions.insert(path.clone(), Condition::from_value(path, value.clone())?);
        }
        Ok(Self {
            conditions,
            source: document,
        })
    }

    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        match Value::from_json(json) {
            Value::Document(doc) => Self::from_document(doc),
            other => Err(LabError::InvalidCondition(format!(
                "conditions must be a document, got {}",
                other.kind()
            ))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.conditions.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Condition)> {
        self.conditions.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, path: &str) -> Option<&Condition> {
        self.conditions.get(path)
    }

    /// The document this map was parsed from.
    pub fn source(&self) -> &Document {
        &self.source
    }

    /// Key-sorted JSON text; identical condition shapes render identically.
    pub fn canonical_json(&self) -> String {
        Value::Document(self.source.clone())
            .to_canonical_json()
            .to_string()
    }

    /// True when the only constrained path is the record identifier.
    pub fn is_id_only(&self) -> bool {
        self.conditions.len() == 1 && self.conditions.contains_key(ID_FIELD)
    }

    /// Does a record satisfy every declared condition?
    pub fn matches(&self, document: &Document) -> bool {
        self.conditions
            .iter()
            .all(|(path, condition)| condition.matches(&get_path(document, path)))
    }

    /// The exact value a path is pinned to, by literal or `$eq`.
    pub fn pinned(&self, path: &str) -> Option<&Value> {
        match self.conditions.get(path)? {
            Condition::Literal(v) => Some(v),
            c => c.operator(QueryOperator::Eq),
        }
    }

    /// True when the map guarantees `path != value` for every match.
    pub fn excludes(&self, path: &str, value: &Value) -> bool {
        let condition = match self.conditions.get(path) {
            Some(c) => c,
            None => return false,
        };
        if let Some(ne) = condition.operator(QueryOperator::Ne) {
            if equals(ne, value) {
                return true;
            }
        }
        if let Some(Value::Array(options)) = condition.operator(QueryOperator::Nin) {
            if options.iter().any(|o| equals(o, value)) {
                return true;
            }
        }
        false
    }

    /// Range operators declared on a path.
    pub fn bounds(&self, path: &str) -> Bounds {
        let mut bounds = Bounds::default();
        if let Some(Condition::Operators(ops)) = self.conditions.get(path) {
            for (op, value) in ops {
                let bound = |inclusive| Bound {
                    value: value.clone(),
                    inclusive,
                };
                match op {
                    QueryOperator::Gt => bounds.lower.push(bound(false)),
                    QueryOperator::Gte => bounds.lower.push(bound(true)),
                    QueryOperator::Lt => bounds.upper.push(bound(false)),
                    QueryOperator::Lte => bounds.upper.push(bound(true)),
                    _ => {}
                }
            }
        }
        bounds
    }
}
