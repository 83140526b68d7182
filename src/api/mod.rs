//! Public API for evaluating untrusted formula programs.
//!
//! The pipeline behind both entry points is parse → rewrite → evaluate:
//! the rewriter lowers the source into an IR whose node kinds *are* the
//! guarded primitives, and the evaluator runs that IR under a name policy,
//! size limits and a wall-clock deadline.
//!
//! # Example
//!
//! ```
//! use cordon::api::{Namespace, Sandbox, SandboxOptions};
//! use cordon::runtime::Value;
//!
//! let sandbox = Sandbox::new(SandboxOptions::default());
//!
//! let mut ns = Namespace::new();
//! ns.set("price", Value::Float(19.5));
//! ns.set("qty", Value::Int(4));
//!
//! let total = sandbox.eval_expr("price * qty", &ns).unwrap();
//! assert_eq!(total.repr(), "78.0");
//! ```

pub mod error;
pub mod namespace;
pub mod options;
pub mod sandbox;

pub use error::Error;
pub use namespace::Namespace;
pub use options::SandboxOptions;
pub use sandbox::{eval_expr, exec, Sandbox};

#[cfg(test)]
mod sandbox_test;
