//! Type-aware ordering and equality over store values.

use super::Value;
use std::cmp::Ordering;
use thiserror::Error;

/// Why two values could not be ordered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompareError {
    /// High-precision decimals are never comparable, not even to each other.
    #[error("{0} values cannot be compared")]
    Unsupported(&'static str),

    #[error("cannot compare {left} with {right}")]
    Incomparable {
        left: &'static str,
        right: &'static str,
    },
}

/// A numeric view of the kinds that order on the number line.
enum Numeric {
    Int(i64),
    Float(f64),
}

fn numeric(value: &Value) -> Option<Numeric> {
    match value {
        Value::Int32(n) => Some(Numeric::Int(*n as i64)),
        Value::Int64(n) => Some(Numeric::Int(*n)),
        Value::Date(d) => Some(Numeric::Int(d.millis())),
        Value::Double(d) => Some(Numeric::Float(*d)),
        _ => None,
    }
}

fn compare_numeric(a: Numeric, b: Numeric) -> Option<Ordering> {
    match (a, b) {
        (Numeric::Int(x), Numeric::Int(y)) => Some(x.cmp(&y)),
        (Numeric::Int(x), Numeric::Float(y)) => (x as f64).partial_cmp(&y),
        (Numeric::Float(x), Numeric::Int(y)) => x.partial_cmp(&(y as f64)),
        (Numeric::Float(x), Numeric::Float(y)) => x.partial_cmp(&y),
    }
}

/// Order two values.
///
/// Integers, doubles and dates share the number line (dates by epoch
/// milliseconds). Object ids only order against object ids, strings against
/// strings, booleans against booleans. Decimals are rejected outright.
pub fn compare(a: &Value, b: &Value) -> Result<Ordering, CompareError> {
    if matches!(a, Value::Decimal(_)) || matches!(b, Value::Decimal(_)) {
        return Err(CompareError::Unsupported("decimal"));
    }

    let incomparable = || CompareError::Incomparable {
        left: a.kind(),
        right: b.kind(),
    };

    if let (Some(x), Some(y)) = (numeric(a), numeric(b)) {
        return compare_numeric(x, y).ok_or_else(incomparable);
    }

    match (a, b) {
        (Value::ObjectId(x), Value::ObjectId(y)) => Ok(x.to_hex().cmp(&y.to_hex())),
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Ok(x.cmp(y)),
        _ => Err(incomparable()),
    }
}

/// Query-filter equality: null and absent are equal to each other, numbers
/// compare by value across widths, composites compare structurally.
pub fn equals(a: &Value, b: &Value) -> bool {
    if a.is_nullish() || b.is_nullish() {
        return a.is_nullish() && b.is_nullish();
    }

    if a.is_numeric() && b.is_numeric() {
        return match (numeric(a), numeric(b)) {
            (Some(x), Some(y)) => compare_numeric(x, y) == Some(Ordering::Equal),
            _ => false,
        };
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Decimal(x), Value::Decimal(y)) => x == y,
        (Value::Date(x), Value::Date(y)) => x == y,
        (Value::ObjectId(x), Value::ObjectId(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| equals(l, r))
        }
        (Value::Document(x), Value::Document(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map(|other| equals(v, other)).unwrap_or(false))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{DateTime, Decimal128, ObjectId};

    #[test]
    fn test_numeric_promotion() {
        assert_eq!(
            compare(&Value::Int32(3), &Value::Int64(4)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            compare(&Value::Int64(5), &Value::Double(4.5)).unwrap(),
            Ordering::Greater
        );
        assert_eq!(
            compare(&Value::Double(2.0), &Value::Int32(2)).unwrap(),
            Ordering::Equal
        );
    }

    #[test]
    fn test_date_is_numeric() {
        let date = Value::Date(DateTime(1_000));
        assert_eq!(compare(&date, &Value::Int64(999)).unwrap(), Ordering::Greater);
        assert_eq!(
            compare(&date, &Value::Date(DateTime(1_000))).unwrap(),
            Ordering::Equal
        );
    }

    #[test]
    fn test_decimal_unsupported() {
        let dec = Value::Decimal(Decimal128("1.5".into()));
        assert_eq!(
            compare(&dec, &Value::Int32(1)),
            Err(CompareError::Unsupported("decimal"))
        );
        assert_eq!(
            compare(&dec, &dec.clone()),
            Err(CompareError::Unsupported("decimal"))
        );
    }

    #[test]
    fn test_object_id_only_against_object_id() {
        let a = Value::ObjectId(ObjectId([0; 12]));
        let b = Value::ObjectId(ObjectId([1; 12]));
        assert_eq!(compare(&a, &b).unwrap(), Ordering::Less);
        assert!(matches!(
            compare(&a, &Value::from("000000000000000000000000")),
            Err(CompareError::Incomparable { .. })
        ));
    }

    #[test]
    fn test_cross_kind_incomparable() {
        let err = compare(&Value::from("5"), &Value::Int32(5)).unwrap_err();
        assert_eq!(
            err,
            CompareError::Incomparable {
                left: "string",
                right: "int32"
            }
        );
        assert!(compare(&Value::Null, &Value::Int32(0)).is_err());
        assert!(compare(&Value::Double(f64::NAN), &Value::Int32(0)).is_err());
    }

    #[test]
    fn test_null_equals_undefined() {
        assert!(equals(&Value::Null, &Value::Undefined));
        assert!(equals(&Value::Undefined, &Value::Null));
        assert!(!equals(&Value::Null, &Value::Bool(false)));
    }

    #[test]
    fn test_structural_equality() {
        let a = Value::Array(vec![Value::Int32(1), Value::from("x")]);
        let b = Value::Array(vec![Value::Double(1.0), Value::from("x")]);
        assert!(equals(&a, &b));

        let mut d1 = crate::value::Document::new();
        d1.insert("k".into(), Value::Int64(7));
        let mut d2 = d1.clone();
        assert!(equals(&Value::Document(d1.clone()), &Value::Document(d2.clone())));
        d2.insert("extra".into(), Value::Null);
        assert!(!equals(&Value::Document(d1), &Value::Document(d2)));
    }

    #[test]
    fn test_date_not_equal_to_number() {
        assert!(!equals(&Value::Date(DateTime(5)), &Value::Int64(5)));
    }
}
