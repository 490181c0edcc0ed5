//! Comparison and chain operators used by condition trees

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Comparison operator of a single condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operator(&'static str);

impl Operator {
    pub const EQ: Self = Operator("=");
    pub const NEQ: Self = Operator("<>");
    pub const GT: Self = Operator(">");
    pub const LT: Self = Operator("<");
    pub const GTE: Self = Operator(">=");
    pub const LTE: Self = Operator("<=");
    pub const LIKE: Self = Operator("LIKE");
    pub const IN: Self = Operator("IN");
    pub const BETWEEN: Self = Operator("BETWEEN");
    pub const IS: Self = Operator("IS");
    pub const IS_NOT: Self = Operator("IS NOT");

    /// Get the string representation of the operator
    pub fn as_str(&self) -> &'static str {
        self.0
    }

    /// The operator to use when the compared value turns out to be NULL
    pub(crate) fn for_null(self) -> Self {
        match self {
            Operator::EQ => Operator::IS,
            Operator::NEQ => Operator::IS_NOT,
            other => other,
        }
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a condition node attaches to the nodes before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    Where,
    WhereNot,
    And,
    AndNot,
    Or,
    OrNot,
}

impl Chain {
    pub fn negated(self) -> Self {
        match self {
            Chain::Where => Chain::WhereNot,
            Chain::WhereNot => Chain::Where,
            Chain::And => Chain::AndNot,
            Chain::AndNot => Chain::And,
            Chain::Or => Chain::OrNot,
            Chain::OrNot => Chain::Or,
        }
    }

    pub fn is_negated(self) -> bool {
        matches!(self, Chain::WhereNot | Chain::AndNot | Chain::OrNot)
    }

    /// Whether this chain can open a nesting level
    pub fn is_leading(self) -> bool {
        matches!(self, Chain::Where | Chain::WhereNot)
    }

    /// The same negation applied to the leading position
    pub(crate) fn as_leading(self) -> Self {
        if self.is_negated() {
            Chain::WhereNot
        } else {
            Chain::Where
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Chain::Where => "WHERE",
            Chain::WhereNot => "WHERE NOT",
            Chain::And => "AND",
            Chain::AndNot => "AND NOT",
            Chain::Or => "OR",
            Chain::OrNot => "OR NOT",
        }
    }
}

impl Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
