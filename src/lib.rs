//! Cordon evaluates a restricted, Python-like formula dialect on behalf of
//! untrusted callers.
//!
//! Source text is parsed, then lowered by a rewriter that only accepts a
//! closed allow-list of constructs, replacing data access and iteration
//! with guarded primitives. The resulting program runs in a tree-walking
//! evaluator under a name/attribute policy, result-size limits and a
//! wall-clock budget.
//!
//! Most callers only need [`api::Sandbox`]:
//!
//! ```
//! use cordon::api::{Namespace, Sandbox};
//! use cordon::runtime::Value;
//!
//! let mut ns = Namespace::new();
//! ns.set("rate", Value::Float(0.2));
//! let v = Sandbox::default().eval_expr("100 * (1 + rate)", &ns).unwrap();
//! assert_eq!(v.repr(), "120.0");
//! ```

pub mod api;
pub mod parser;
pub mod policy;
pub mod rewriter;
pub mod runtime;

pub use api::{Error, Namespace, Sandbox, SandboxOptions};
pub use policy::{MagicMethods, NamePolicy};
pub use runtime::Value;

/// Test utilities for enabling logging in tests
#[cfg(test)]
pub mod test_utils {
    /// Initializes a tracing subscriber at DEBUG level; call at the start
    /// of a test to see evaluation logging. Safe to call more than once.
    pub fn init_test_logging() {
        use tracing_subscriber::{fmt, EnvFilter};

        let _ = fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    }
}
