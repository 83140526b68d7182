//! Guarded runtime: values, scopes, operator and access guards, the
//! restricted builtin table and the IR evaluator.

pub mod builtins;
pub mod env;
pub mod error;
pub mod eval;
pub mod guards;
pub mod methods;
pub mod operators;
pub mod value;

pub use env::{Deadline, Limits, Scope, ScopeRef};
pub use error::{EvalError, ResourceError, RuntimeError, RuntimeKind};
pub use value::Value;

#[cfg(test)]
mod eval_test;
