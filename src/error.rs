//! Error types for the rule engine, the change dispatcher and the lab facade.

use crate::types::{BeakerId, Operation, SubscriptionId};
use crate::value::{CompareError, ObjectId};
use std::sync::Arc;
use thiserror::Error;

/// Failure while evaluating a parsed rule.
///
/// Every variant collapses to a deny at the top level; callers only ever see
/// "rule evaluation failed".
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("member `{0}` may not be accessed")]
    ForbiddenMember(String),

    #[error("operator `{0}` is not allowed")]
    InvalidOperator(String),

    #[error("operator `{operator}` cannot combine {left} and {right}")]
    InvalidOperands {
        operator: String,
        left: &'static str,
        right: &'static str,
    },

    #[error("operator `{operator}` cannot be applied to {kind}")]
    InvalidOperand {
        operator: String,
        kind: &'static str,
    },

    #[error("cannot compare {left} with {right}")]
    Incomparable {
        left: &'static str,
        right: &'static str,
    },

    #[error("{0} values cannot be compared")]
    UnsupportedComparison(&'static str),

    #[error("operator `{0}` cannot be applied to record fields in a query")]
    FieldOperand(String),

    #[error("cannot read member `{0}` of null or undefined")]
    NullMemberAccess(String),

    #[error("member key must be a string or an integer")]
    InvalidMemberKey,

    #[error("record fields do not have functions")]
    NotCallable,

    #[error("invalid argument to {function}(): {message}")]
    InvalidArgument {
        function: String,
        message: String,
    },
}

impl From<CompareError> for EvaluationError {
    fn from(e: CompareError) -> Self {
        match e {
            CompareError::Unsupported(kind) => EvaluationError::UnsupportedComparison(kind),
            CompareError::Incomparable { left, right } => {
                EvaluationError::Incomparable { left, right }
            }
        }
    }
}

/// Errors produced by the rule layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { message: String, offset: usize },

    #[error("evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),
}

impl RuleError {
    pub(crate) fn parse(message: impl Into<String>, offset: usize) -> Self {
        RuleError::Parse {
            message: message.into(),
            offset,
        }
    }
}

/// Result type for rule operations.
pub type RuleResult<T> = std::result::Result<T, RuleError>;

/// A failure reported by the backing store's change feed.
///
/// Cheap to clone so a single error can be broadcast to every subscriber of
/// a listener group.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("change feed error: {message}")]
pub struct FeedError {
    message: Arc<str>,
}

impl FeedError {
    pub fn new(message: impl AsRef<str>) -> Self {
        Self {
            message: Arc::from(message.as_ref()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Main error type for lab operations.
#[derive(Debug, Error)]
pub enum LabError {
    #[error("Access denied: {operation} on beaker {beaker}")]
    AccessDenied { operation: Operation, beaker: BeakerId },

    #[error("Write conflict on compound {id} in beaker {beaker}")]
    WriteConflict { beaker: BeakerId, id: ObjectId },

    #[error("Compound {id} not found in beaker {beaker}")]
    NotFound { beaker: BeakerId, id: ObjectId },

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(SubscriptionId),

    #[error("Unknown beaker: {0}")]
    UnknownBeaker(BeakerId),

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    #[error("Invalid {operation} rule for beaker {beaker}")]
    InvalidRule {
        beaker: BeakerId,
        operation: Operation,
        #[source]
        source: RuleError,
    },

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for LabError {
    fn from(e: serde_json::Error) -> Self {
        LabError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for LabError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        LabError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for LabError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        LabError::Deserialization(e.to_string())
    }
}

impl From<std::io::Error> for LabError {
    fn from(e: std::io::Error) -> Self {
        LabError::Config(e.to_string())
    }
}

/// Result type for lab operations.
pub type Result<T> = std::result::Result<T, LabError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_rule_hides_detail() {
        let err = LabError::InvalidRule {
            beaker: BeakerId::from("posts"),
            operation: Operation::List,
            source: RuleError::parse("unexpected `)`", 7),
        };
        let shown = err.to_string();
        assert_eq!(shown, "Invalid list rule for beaker posts");
        assert!(!shown.contains("unexpected"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_feed_error_clone_shares_message() {
        let err = FeedError::new("cursor killed");
        let copy = err.clone();
        assert_eq!(copy.message(), "cursor killed");
        assert_eq!(err, copy);
    }
}
