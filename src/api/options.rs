//! Configuration options for the sandbox.

use std::time::Duration;

use crate::policy::MagicMethods;

/// Configuration for one [`Sandbox`](super::Sandbox).
///
/// The defaults are the safe ones: no magic methods, a one second budget,
/// and result-size limits tight enough that a hostile formula fails fast.
///
/// # Example
///
/// ```
/// use cordon::api::SandboxOptions;
/// use std::time::Duration;
///
/// let options = SandboxOptions {
///     timeout: Duration::from_millis(200),
///     ..SandboxOptions::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct SandboxOptions {
    /// Wall-clock budget for a single evaluation. Checked on every guarded
    /// iteration step and every call, so loops observe it promptly.
    ///
    /// Default: 1 second.
    pub timeout: Duration,

    /// Largest sequence or string any single operation may produce.
    ///
    /// Default: 100 000 elements.
    pub max_collection_len: usize,

    /// Largest decimal-digit estimate allowed for `**` results.
    ///
    /// Default: 100 digits.
    pub max_pow_digits: u32,

    /// Deepest allowed nesting of evaluated-function calls.
    ///
    /// Default: 64.
    pub max_call_depth: usize,

    /// Which dunder method names class definitions may implement.
    ///
    /// Default: [`MagicMethods::Deny`].
    pub magic_methods: MagicMethods,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        let limits = crate::runtime::Limits::default();
        Self {
            timeout: Duration::from_secs(1),
            max_collection_len: limits.max_collection_len,
            max_pow_digits: limits.max_pow_digits,
            max_call_depth: limits.max_call_depth,
            magic_methods: MagicMethods::Deny,
        }
    }
}

impl SandboxOptions {
    pub(crate) fn limits(&self) -> crate::runtime::Limits {
        crate::runtime::Limits {
            max_collection_len: self.max_collection_len,
            max_pow_digits: self.max_pow_digits,
            max_call_depth: self.max_call_depth,
        }
    }
}
