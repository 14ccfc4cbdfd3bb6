//! Three-valued outcomes and unresolved record fields.

use crate::value::Value;
use std::fmt;

/// Outcome of a comparison that may not be decidable from a query's shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriState {
    True,
    False,
    /// Cannot be proven false from the declared conditions.
    Possible,
}

impl TriState {
    pub fn from_bool(b: bool) -> Self {
        if b {
            TriState::True
        } else {
            TriState::False
        }
    }

    pub fn and(self, other: TriState) -> TriState {
        match (self, other) {
            (TriState::False, _) | (_, TriState::False) => TriState::False,
            (TriState::True, TriState::True) => TriState::True,
            _ => TriState::Possible,
        }
    }

    pub fn or(self, other: TriState) -> TriState {
        match (self, other) {
            (TriState::True, _) | (_, TriState::True) => TriState::True,
            (TriState::False, TriState::False) => TriState::False,
            _ => TriState::Possible,
        }
    }

    pub fn not(self) -> TriState {
        match self {
            TriState::True => TriState::False,
            TriState::False => TriState::True,
            TriState::Possible => TriState::Possible,
        }
    }

    /// Top-level collapse: possible counts as a pass.
    pub fn passes(self) -> bool {
        !matches!(self, TriState::False)
    }
}

/// A dotted path into the record being matched, still bound to the query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        Self(segments)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn dotted(&self) -> String {
        self.0.join(".")
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dotted())
    }
}

/// What a subexpression evaluates to.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Resolved(Value),
    /// Only produced in query mode, for member chains rooted at the record.
    Unresolved(FieldPath),
    /// Only ever holds `Possible`; definite outcomes are stored as booleans.
    Tri(TriState),
}

impl Operand {
    pub fn from_tri(state: TriState) -> Self {
        match state {
            TriState::True => Operand::Resolved(Value::Bool(true)),
            TriState::False => Operand::Resolved(Value::Bool(false)),
            TriState::Possible => Operand::Tri(TriState::Possible),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Operand::Resolved(v) => v.kind(),
            Operand::Unresolved(_) => "record field",
            Operand::Tri(_) => "possible",
        }
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Resolved(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TriState::{False, Possible, True};

    #[test]
    fn test_three_valued_and() {
        assert_eq!(False.and(Possible), False);
        assert_eq!(True.and(Possible), Possible);
        assert_eq!(Possible.and(True), Possible);
        assert_eq!(Possible.and(False), False);
        assert_eq!(Possible.and(Possible), Possible);
        assert_eq!(True.and(True), True);
    }

    #[test]
    fn test_three_valued_or() {
        assert_eq!(True.or(Possible), True);
        assert_eq!(False.or(Possible), Possible);
        assert_eq!(Possible.or(False), Possible);
        assert_eq!(Possible.or(Possible), Possible);
        assert_eq!(False.or(False), False);
    }

    #[test]
    fn test_not_and_collapse() {
        assert_eq!(Possible.not(), Possible);
        assert_eq!(True.not(), False);
        assert!(Possible.passes());
        assert!(!False.passes());
    }

    #[test]
    fn test_field_path() {
        let path = FieldPath::root().child("owner").child("id");
        assert_eq!(path.dotted(), "owner.id");
        assert!(FieldPath::root().is_root());
        assert_eq!(Operand::from_tri(True), Operand::Resolved(Value::Bool(true)));
    }
}
