//! Variables and host functions visible to a rule.

use crate::error::EvaluationError;
use crate::types::now_millis;
use crate::value::{equals, DateTime, Document, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A host function callable from rule text.
pub type RuleFunction =
    Arc<dyn Fn(&[Value], &EvalContext) -> Result<Value, EvaluationError> + Send + Sync>;

/// Everything a rule can see: top-level variables (`request`, `compound`),
/// callable functions, and the clock used by `date()`.
#[derive(Clone)]
pub struct EvalContext {
    variables: Document,
    functions: HashMap<String, RuleFunction>,
    now: DateTime,
}

impl EvalContext {
    /// A context with the built-in functions and the current time.
    pub fn new() -> Self {
        let mut functions: HashMap<String, RuleFunction> = HashMap::new();
        functions.insert("contains".to_string(), Arc::new(contains));
        functions.insert("date".to_string(), Arc::new(date));
        Self {
            variables: Document::new(),
            functions,
            now: DateTime::from_millis(now_millis()),
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_function<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&[Value], &EvalContext) -> Result<Value, EvaluationError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
        self
    }

    /// Pin the clock `date()` reads when called without arguments.
    pub fn with_clock(mut self, now: DateTime) -> Self {
        self.now = now;
        self
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn function(&self, name: &str) -> Option<&RuleFunction> {
        self.functions.get(name)
    }

    pub fn now(&self) -> DateTime {
        self.now
    }
}

impl Default for EvalContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut functions: Vec<_> = self.functions.keys().collect();
        functions.sort();
        f.debug_struct("EvalContext")
            .field("variables", &self.variables)
            .field("functions", &functions)
            .field("now", &self.now)
            .finish()
    }
}

fn invalid_argument(function: &str, message: impl Into<String>) -> EvaluationError {
    EvaluationError::InvalidArgument {
        function: function.to_string(),
        message: message.into(),
    }
}

/// `contains(array, value)` / `contains(string, substring)`.
fn contains(args: &[Value], _ctx: &EvalContext) -> Result<Value, EvaluationError> {
    let needle = args.get(1).unwrap_or(&Value::Undefined);
    match args.first() {
        Some(Value::Array(items)) => Ok(Value::Bool(items.iter().any(|v| equals(v, needle)))),
        Some(Value::String(haystack)) => match needle {
            Value::String(s) => Ok(Value::Bool(haystack.contains(s.as_str()))),
            other => Err(invalid_argument(
                "contains",
                format!("cannot search a string for {}", other.kind()),
            )),
        },
        Some(other) => Err(invalid_argument(
            "contains",
            format!("expected array or string, got {}", other.kind()),
        )),
        None => Err(invalid_argument("contains", "missing arguments")),
    }
}

/// `date()`, `date(epochMillis)` or `date("RFC 3339 text")`.
fn date(args: &[Value], ctx: &EvalContext) -> Result<Value, EvaluationError> {
    let millis = match args.first() {
        None | Some(Value::Undefined) => ctx.now().millis(),
        Some(Value::Date(d)) => d.millis(),
        Some(Value::String(text)) => chrono::DateTime::parse_from_rfc3339(text)
            .map_err(|e| invalid_argument("date", e.to_string()))?
            .timestamp_millis(),
        Some(other) => match other.as_f64() {
            Some(ms) if ms.is_finite() => ms as i64,
            _ => {
                return Err(invalid_argument(
                    "date",
                    format!("cannot build a date from {}", other.kind()),
                ))
            }
        },
    };
    Ok(Value::Date(DateTime::from_millis(millis)))
}
