//! Evaluation errors

use thiserror::Error;

/// Errors raised while parsing or evaluating an expression
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    /// Malformed list syntax
    #[error("Parse error: {0}")]
    Parse(String),

    /// Call to a function outside the built-in table
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    /// Variable not bound in any enclosing scope
    #[error("Unbound variable: {0}")]
    UnboundVariable(String),

    /// Argument of the wrong type
    #[error("Type mismatch in {function}: expected {expected}, found {found}")]
    TypeMismatch {
        function: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Wrong number of arguments
    #[error("Arity mismatch in {function}: expected {expected}, found {found}")]
    Arity {
        function: String,
        expected: String,
        found: usize,
    },

    /// Raised by the `error` built-in
    #[error("Raised: {0}")]
    Raised(String),

    #[error("Division by zero")]
    DivisionByZero,

    /// Nesting deeper than the interpreter allows
    #[error("Evaluation depth limit {0} exceeded")]
    DepthExceeded(usize),
}

impl EvalError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn type_mismatch(function: &str, expected: &'static str, found: &'static str) -> Self {
        Self::TypeMismatch {
            function: function.to_string(),
            expected,
            found,
        }
    }

    pub fn arity(function: &str, expected: impl Into<String>, found: usize) -> Self {
        Self::Arity {
            function: function.to_string(),
            expected: expected.into(),
            found,
        }
    }
}
