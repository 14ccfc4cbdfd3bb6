//! Tree-walking evaluator, concrete and query-symbolic.
//!
//! In concrete mode every identifier resolves against the [`EvalContext`]
//! and the walk behaves like a small JavaScript interpreter.
//!
//! In query mode there is no record yet. Member chains rooted at the record
//! identifier fold into [`Operand::Unresolved`] paths, and comparisons that
//! touch such a path are answered from the query's [`ConditionMap`]:
//!
//! - `==` holds only when the path is pinned to an equal value.
//! - `!=` holds when the map excludes the value, or pins a different one.
//! - Ordering against a pinned value is definite. A declared range bound in
//!   the same direction that can overlap the rule's half-line gives
//!   [`TriState::Possible`]. Anything else is false.
//!
//! Arithmetic on unresolved paths is an error, which denies the rule.

use super::ast::{BinaryOp, Expr, LogicalOp, UnaryOp};
use super::context::EvalContext;
use super::operators;
use super::symbolic::{FieldPath, Operand, TriState};
use crate::error::EvaluationError;
use crate::query::{Bound, Bounds, ConditionMap};
use crate::value::{compare, equals, Value};
use std::cmp::Ordering;

/// Identifier that names the record a rule is checked against.
pub const RECORD_IDENTIFIER: &str = "compound";

/// Member names a rule may never read.
pub const FORBIDDEN_MEMBER_NAMES: [&str; 6] =
    ["constructor", "prototype", "__proto__", "bind", "call", "this"];

type EvalResult<T> = Result<T, EvaluationError>;

/// Walks one expression tree against one context.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    context: &'a EvalContext,
    query: Option<&'a ConditionMap>,
}

impl<'a> Evaluator<'a> {
    pub fn concrete(context: &'a EvalContext) -> Self {
        Self {
            context,
            query: None,
        }
    }

    pub fn symbolic(context: &'a EvalContext, query: &'a ConditionMap) -> Self {
        Self {
            context,
            query: Some(query),
        }
    }

    /// Evaluate and reduce to a three-valued outcome. Concrete evaluation
    /// never yields `Possible`.
    pub fn run(&self, expr: &Expr) -> EvalResult<TriState> {
        let operand = self.evaluate(expr)?;
        Ok(self.truth(&operand))
    }

    pub fn evaluate(&self, expr: &Expr) -> EvalResult<Operand> {
        match expr {
            Expr::Literal(value) => Ok(Operand::Resolved(value.clone())),
            Expr::Identifier(name) => Ok(self.identifier(name)),
            Expr::This => Ok(Operand::Resolved(Value::Undefined)),
            Expr::Array(items) => items
                .iter()
                .map(|item| {
                    let operand = self.evaluate(item)?;
                    self.resolve(operand, "[]")
                })
                .collect::<EvalResult<Vec<_>>>()
                .map(|values| Operand::Resolved(Value::Array(values))),
            Expr::Member {
                object,
                property,
                computed,
            } => self.member(object, property, *computed),
            Expr::Call { callee, arguments } => self.call(callee, arguments),
            Expr::Unary { operator, argument } => {
                let operand = self.evaluate(argument)?;
                self.unary(*operator, operand)
            }
            Expr::Binary {
                operator,
                left,
                right,
            } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                self.binary(*operator, left, right)
            }
            Expr::Logical {
                operator,
                left,
                right,
            } => self.logical(*operator, left, right),
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                let test = self.evaluate(test)?;
                match self.truth(&test) {
                    TriState::True => self.evaluate(consequent),
                    TriState::False => self.evaluate(alternate),
                    TriState::Possible => {
                        let a = self.evaluate(consequent)?;
                        let b = self.evaluate(alternate)?;
                        if self.truth(&a) == TriState::False && self.truth(&b) == TriState::False {
                            Ok(Operand::from_tri(TriState::False))
                        } else {
                            Ok(Operand::Tri(TriState::Possible))
                        }
                    }
                }
            }
        }
    }

    fn identifier(&self, name: &str) -> Operand {
        if self.query.is_some() && name == RECORD_IDENTIFIER {
            return Operand::Unresolved(FieldPath::root());
        }
        Operand::Resolved(
            self.context
                .variable(name)
                .cloned()
                .unwrap_or(Value::Undefined),
        )
    }

    fn pinned(&self, path: &FieldPath) -> Option<&'a Value> {
        self.query?.pinned(&path.dotted())
    }

    /// Truthiness. An unresolved field is truthy only when pinned to a truthy
    /// value.
    fn truth(&self, operand: &Operand) -> TriState {
        match operand {
            Operand::Resolved(v) => TriState::from_bool(v.is_truthy()),
            Operand::Tri(t) => *t,
            Operand::Unresolved(path) => {
                TriState::from_bool(self.pinned(path).is_some_and(Value::is_truthy))
            }
        }
    }

    /// A concrete value for an operand, substituting pinned fields.
    fn resolve(&self, operand: Operand, operator: &str) -> EvalResult<Value> {
        match operand {
            Operand::Resolved(v) => Ok(v),
            Operand::Unresolved(ref path) => self
                .pinned(path)
                .cloned()
                .ok_or_else(|| EvaluationError::FieldOperand(operator.to_string())),
            Operand::Tri(_) => Err(EvaluationError::FieldOperand(operator.to_string())),
        }
    }

    fn member(&self, object: &Expr, property: &Expr, computed: bool) -> EvalResult<Operand> {
        let target = self.evaluate(object)?;
        let name = match (computed, property) {
            (false, Expr::Identifier(name)) => name.clone(),
            _ => match self.evaluate(property)? {
                Operand::Resolved(Value::String(s)) => s,
                Operand::Resolved(key @ (Value::Int32(_) | Value::Int64(_))) => {
                    key.to_display_string()
                }
                Operand::Resolved(_) => return Err(EvaluationError::InvalidMemberKey),
                _ => return Err(EvaluationError::FieldOperand("[]".to_string())),
            },
        };

        if FORBIDDEN_MEMBER_NAMES.contains(&name.as_str()) {
            return Err(EvaluationError::ForbiddenMember(name));
        }

        match target {
            Operand::Unresolved(path) => Ok(Operand::Unresolved(path.child(&name))),
            Operand::Tri(_) => Err(EvaluationError::FieldOperand(".".to_string())),
            Operand::Resolved(value) if value.is_nullish() => {
                Err(EvaluationError::NullMemberAccess(name))
            }
            Operand::Resolved(value) => Ok(Operand::Resolved(value.member(&name))),
        }
    }

    fn call(&self, callee: &Expr, arguments: &[Expr]) -> EvalResult<Operand> {
        let function = match callee {
            Expr::Identifier(name) if self.context.variable(name).is_none() => {
                self.context.function(name)
            }
            _ => None,
        };
        let function = match function {
            Some(f) => f,
            None => {
                return match self.evaluate(callee)? {
                    Operand::Unresolved(_) => Err(EvaluationError::NotCallable),
                    _ => Ok(Operand::Resolved(Value::Undefined)),
                };
            }
        };

        let args = arguments
            .iter()
            .map(|arg| {
                let operand = self.evaluate(arg)?;
                self.resolve(operand, "()")
            })
            .collect::<EvalResult<Vec<_>>>()?;
        function(&args, self.context).map(Operand::Resolved)
    }

    fn unary(&self, operator: UnaryOp, operand: Operand) -> EvalResult<Operand> {
        match (operator, operand) {
            (_, Operand::Resolved(value)) => operators::unary(operator, &value).map(Operand::from),
            (UnaryOp::Not, Operand::Tri(state)) => Ok(Operand::from_tri(state.not())),
            (UnaryOp::Not, operand @ Operand::Unresolved(_)) => {
                let value = self.resolve(operand, operator.symbol())?;
                Ok(Operand::Resolved(Value::Bool(!value.is_truthy())))
            }
            _ => Err(EvaluationError::FieldOperand(operator.symbol().to_string())),
        }
    }

    fn binary(&self, operator: BinaryOp, left: Operand, right: Operand) -> EvalResult<Operand> {
        match (left, right) {
            (Operand::Resolved(a), Operand::Resolved(b)) => {
                operators::binary(operator, &a, &b).map(Operand::from)
            }
            (Operand::Tri(_), _) | (_, Operand::Tri(_)) => match operator {
                BinaryOp::Eq | BinaryOp::Ne => Ok(Operand::Tri(TriState::Possible)),
                _ => Err(EvaluationError::FieldOperand(operator.symbol().to_string())),
            },
            (Operand::Unresolved(a), Operand::Unresolved(b)) => {
                self.fields_binary(operator, &a, &b)
            }
            (Operand::Unresolved(path), Operand::Resolved(value)) => {
                self.field_binary(operator, &path, &value)
            }
            (Operand::Resolved(value), Operand::Unresolved(path)) => {
                self.field_binary(operator.flipped(), &path, &value)
            }
        }
    }

    /// `field <op> value`, answered from the query's declared conditions.
    fn field_binary(&self, operator: BinaryOp, path: &FieldPath, value: &Value) -> EvalResult<Operand> {
        let query = match self.query {
            Some(q) => q,
            None => return Err(EvaluationError::FieldOperand(operator.symbol().to_string())),
        };
        let dotted = path.dotted();
        let pinned = query.pinned(&dotted);

        let state = match operator {
            BinaryOp::Eq => TriState::from_bool(pinned.is_some_and(|p| equals(p, value))),
            BinaryOp::Ne => TriState::from_bool(
                query.excludes(&dotted, value) || pinned.is_some_and(|p| !equals(p, value)),
            ),
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => match pinned {
                Some(p) => TriState::from_bool(operators::compare_with(operator, p, value)?),
                None => range_outcome(operator, &query.bounds(&dotted), value),
            },
            _ => return Err(EvaluationError::FieldOperand(operator.symbol().to_string())),
        };
        Ok(Operand::from_tri(state))
    }

    /// Two record fields compared with each other.
    fn fields_binary(&self, operator: BinaryOp, a: &FieldPath, b: &FieldPath) -> EvalResult<Operand> {
        if !matches!(
            operator,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge
        ) {
            return Err(EvaluationError::FieldOperand(operator.symbol().to_string()));
        }
        if a == b && matches!(operator, BinaryOp::Eq | BinaryOp::Ne) {
            return Ok(Operand::from_tri(TriState::from_bool(operator == BinaryOp::Eq)));
        }
        match (self.pinned(a), self.pinned(b)) {
            (Some(x), Some(y)) => operators::binary(operator, x, y).map(Operand::from),
            _ => Ok(Operand::from_tri(TriState::False)),
        }
    }

    fn logical(&self, operator: LogicalOp, left: &Expr, right: &Expr) -> EvalResult<Operand> {
        let left = self.evaluate(left)?;
        if let Operand::Resolved(value) = &left {
            let short_circuit = match operator {
                LogicalOp::And => !value.is_truthy(),
                LogicalOp::Or => value.is_truthy(),
            };
            return if short_circuit {
                Ok(left)
            } else {
                self.evaluate(right)
            };
        }

        let a = self.truth(&left);
        let decided = match operator {
            LogicalOp::And => a == TriState::False,
            LogicalOp::Or => a == TriState::True,
        };
        if decided {
            return Ok(Operand::from_tri(a));
        }
        let right = self.evaluate(right)?;
        let b = self.truth(&right);
        Ok(Operand::from_tri(match operator {
            LogicalOp::And => a.and(b),
            LogicalOp::Or => a.or(b),
        }))
    }
}

/// Could a record within `bounds` satisfy `field <op> value`?
///
/// Needs at least one bound on the same side as the comparison; every bound
/// on the opposite side must leave room for it.
fn range_outcome(operator: BinaryOp, bounds: &Bounds, value: &Value) -> TriState {
    let (same_side, other_side, wants_above) = match operator {
        BinaryOp::Gt | BinaryOp::Ge => (&bounds.lower, &bounds.upper, true),
        BinaryOp::Lt | BinaryOp::Le => (&bounds.upper, &bounds.lower, false),
        _ => return TriState::False,
    };
    let strict = matches!(operator, BinaryOp::Gt | BinaryOp::Lt);

    let relevant = same_side.iter().any(|b| compare(&b.value, value).is_ok());
    if !relevant {
        return TriState::False;
    }

    let room = |bound: &Bound| match compare(&bound.value, value) {
        Ok(Ordering::Equal) => bound.inclusive && !strict,
        Ok(ord) => (ord == Ordering::Greater) == wants_above,
        Err(_) => true,
    };
    if other_side.iter().all(room) {
        TriState::Possible
    } else {
        TriState::False
    }
}
