//! Concrete operator semantics over resolved values.

use super::ast::{BinaryOp, UnaryOp};
use crate::error::EvaluationError;
use crate::value::{compare, equals, Value};
use std::cmp::Ordering;

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        match value {
            Value::Int32(n) => Some(Num::Int(*n as i64)),
            Value::Int64(n) => Some(Num::Int(*n)),
            Value::Double(d) => Some(Num::Float(*d)),
            Value::Date(d) => Some(Num::Int(d.millis())),
            _ => None,
        }
    }

    fn float(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(d) => d,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Num::Int(n) => Value::Int64(n),
            Num::Float(d) => Value::Double(d),
        }
    }

    /// ECMAScript ToInt32.
    fn to_int32(self) -> i32 {
        match self {
            Num::Int(n) => n as i32,
            Num::Float(d) if !d.is_finite() => 0,
            Num::Float(d) => d.trunc().rem_euclid(4_294_967_296.0) as u32 as i32,
        }
    }
}

fn invalid_operands(op: BinaryOp, left: &Value, right: &Value) -> EvaluationError {
    EvaluationError::InvalidOperands {
        operator: op.symbol().to_string(),
        left: left.kind(),
        right: right.kind(),
    }
}

fn numbers(op: BinaryOp, left: &Value, right: &Value) -> Result<(Num, Num), EvaluationError> {
    match (Num::of(left), Num::of(right)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(invalid_operands(op, left, right)),
    }
}

/// Integer arithmetic when both sides are integers and the result fits,
/// otherwise double arithmetic.
fn arithmetic(
    a: Num,
    b: Num,
    int: fn(i64, i64) -> Option<i64>,
    float: fn(f64, f64) -> f64,
) -> Value {
    if let (Num::Int(x), Num::Int(y)) = (a, b) {
        if let Some(n) = int(x, y) {
            return Value::Int64(n);
        }
    }
    Value::Double(float(a.float(), b.float()))
}

fn ordering(op: BinaryOp, ord: Ordering) -> bool {
    match op {
        BinaryOp::Lt => ord.is_lt(),
        BinaryOp::Gt => ord.is_gt(),
        BinaryOp::Le => ord.is_le(),
        BinaryOp::Ge => ord.is_ge(),
        _ => false,
    }
}

/// Does `left <op> right` hold for two resolved values?
pub(crate) fn compare_with(op: BinaryOp, left: &Value, right: &Value) -> Result<bool, EvaluationError> {
    Ok(ordering(op, compare(left, right)?))
}

pub(crate) fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvaluationError> {
    match op {
        BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::BitAnd => {
            Err(EvaluationError::InvalidOperator(op.symbol().to_string()))
        }
        BinaryOp::Eq => Ok(Value::Bool(equals(left, right))),
        BinaryOp::Ne => Ok(Value::Bool(!equals(left, right))),
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
            compare_with(op, left, right).map(Value::Bool)
        }
        BinaryOp::Shl | BinaryOp::Shr | BinaryOp::UShr => {
            let (a, b) = numbers(op, left, right)?;
            let shift = (b.to_int32() as u32) & 31;
            let a = a.to_int32();
            Ok(match op {
                BinaryOp::Shl => Value::Int32(a.wrapping_shl(shift)),
                BinaryOp::Shr => Value::Int32(a >> shift),
                _ => Value::Int64(((a as u32) >> shift) as i64),
            })
        }
        BinaryOp::Add => {
            if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
                let mut out = left.to_display_string();
                out.push_str(&right.to_display_string());
                return Ok(Value::String(out));
            }
            let (a, b) = numbers(op, left, right)?;
            Ok(arithmetic(a, b, i64::checked_add, |x, y| x + y))
        }
        BinaryOp::Sub => {
            let (a, b) = numbers(op, left, right)?;
            Ok(arithmetic(a, b, i64::checked_sub, |x, y| x - y))
        }
        BinaryOp::Mul => {
            let (a, b) = numbers(op, left, right)?;
            Ok(arithmetic(a, b, i64::checked_mul, |x, y| x * y))
        }
        BinaryOp::Div => {
            let (a, b) = numbers(op, left, right)?;
            Ok(Value::Double(a.float() / b.float()))
        }
        BinaryOp::Rem => {
            let (a, b) = numbers(op, left, right)?;
            Ok(arithmetic(a, b, i64::checked_rem, |x, y| x % y))
        }
    }
}

pub(crate) fn unary(op: UnaryOp, argument: &Value) -> Result<Value, EvaluationError> {
    if op == UnaryOp::Not {
        return Ok(Value::Bool(!argument.is_truthy()));
    }
    let n = Num::of(argument).ok_or_else(|| EvaluationError::InvalidOperand {
        operator: op.symbol().to_string(),
        kind: argument.kind(),
    })?;
    Ok(match op {
        UnaryOp::Neg => match n {
            Num::Int(x) => x
                .checked_neg()
                .map(Value::Int64)
                .unwrap_or(Value::Double(-(x as f64))),
            Num::Float(d) => Value::Double(-d),
        },
        UnaryOp::BitNot => Value::Int32(!n.to_int32()),
        _ => n.into_value(),
    })
}
