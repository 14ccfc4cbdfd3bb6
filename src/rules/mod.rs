//! Access rules.
//!
//! A rule is a single expression in a small JavaScript-like language:
//!
//! ```text
//! compound.owner == request.user._id && contains(request.user.roles, "editor")
//! ```
//!
//! Rules are parsed once when a beaker is configured and evaluated either
//! concretely against a record, or symbolically against the conditions of a
//! query when no record exists yet (see [`evaluator`]).

mod ast;
mod context;
pub mod evaluator;
mod lexer;
mod operators;
mod parser;
mod rule;
mod symbolic;

pub use ast::{BinaryOp, Expr, LogicalOp, UnaryOp};
pub use context::{EvalContext, RuleFunction};
pub use evaluator::{Evaluator, FORBIDDEN_MEMBER_NAMES, RECORD_IDENTIFIER};
pub use parser::parse;
pub use rule::{evaluate_rule, EvaluationMode, Rule, RuleCache, RuleSet};
pub use symbolic::{FieldPath, Operand, TriState};
