//! Sandboxed expression language for accumulator programs
//!
//! Programs are JSON list forms evaluated by a small pure interpreter.
//! Only the built-in table is callable, so a program cannot reach the host.

pub mod ast;
pub mod builtins;
pub mod error;
pub mod interpreter;
pub mod value;

pub use ast::Expr;
pub use error::EvalError;
pub use interpreter::{Env, Interpreter, DEFAULT_MAX_DEPTH};
pub use value::{Closure, Value};
