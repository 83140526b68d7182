//! Name and attribute access policy.
//!
//! A single predicate decides whether untrusted code may read a given
//! identifier. The decision is referentially transparent: a fixed deny-set
//! plus an explicit double-underscore prefix check (no regex, no substring
//! scans), and an optional caller-supplied allow-list of magic method names
//! used for class definitions.

use hashbrown::HashSet;
use once_cell::sync::Lazy;

/// Identifiers that expose interpreter internals or namespace reflection.
///
/// Covers frame/code/traceback internals, generator and coroutine
/// internals, module namespace accessors, and the bare `globals`/`vars`/
/// `locals` reflection entry points.
static DENY_SET: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // frame objects
        "f_back",
        "f_builtins",
        "f_code",
        "f_globals",
        "f_lasti",
        "f_lineno",
        "f_locals",
        "f_trace",
        // code objects
        "co_code",
        "co_consts",
        "co_filename",
        "co_flags",
        "co_names",
        "co_varnames",
        // traceback objects
        "tb_frame",
        "tb_lasti",
        "tb_lineno",
        "tb_next",
        // generator / coroutine internals
        "gi_code",
        "gi_frame",
        "gi_running",
        "gi_yieldfrom",
        "cr_await",
        "cr_code",
        "cr_frame",
        "cr_running",
        // legacy function introspection
        "func_code",
        "func_globals",
        // namespace reflection
        "globals",
        "locals",
        "vars",
    ]
    .into_iter()
    .collect()
});

/// Magic method names a class definition may implement when the caller
/// opts in: construction, containment and the six comparisons.
pub const STANDARD_MAGIC_METHODS: &[&str] = &[
    "__init__",
    "__contains__",
    "__eq__",
    "__ne__",
    "__lt__",
    "__le__",
    "__gt__",
    "__ge__",
];

/// Which dunder method names class definitions may use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MagicMethods {
    /// Every dunder name is denied (the safe default).
    #[default]
    Deny,
    /// Allow [`STANDARD_MAGIC_METHODS`].
    Standard,
    /// Allow exactly these names (each must still be dunder-shaped).
    Only(Vec<String>),
}

/// The name/attribute access policy for one sandbox configuration.
#[derive(Debug, Clone, Default)]
pub struct NamePolicy {
    magic: MagicMethods,
}

impl NamePolicy {
    pub fn new(magic: MagicMethods) -> Self {
        Self { magic }
    }

    /// May untrusted code read `name`?
    ///
    /// Denies deny-set entries and `__`-prefixed identifiers, except the
    /// bare two-character `__` itself (kept as specified upstream) and any
    /// configured magic method name.
    pub fn is_allowed(&self, name: &str) -> bool {
        if DENY_SET.contains(name) {
            return false;
        }
        if name.starts_with("__") && name != "__" {
            return self.is_allowed_magic(name);
        }
        true
    }

    fn is_allowed_magic(&self, name: &str) -> bool {
        match &self.magic {
            MagicMethods::Deny => false,
            MagicMethods::Standard => STANDARD_MAGIC_METHODS.contains(&name),
            MagicMethods::Only(names) => names.iter().any(|n| n == name),
        }
    }
}

#[cfg(test)]
mod policy_test {
    use super::*;

    #[test]
    fn every_deny_set_entry_is_rejected() {
        let policy = NamePolicy::default();
        for name in DENY_SET.iter() {
            assert!(!policy.is_allowed(name), "{name} should be denied");
        }
    }

    // The predicate must hold wherever an identifier can appear, so run
    // the whole set through the pipeline as both a bare name and an
    // attribute.
    #[test]
    fn every_deny_set_entry_is_rejected_in_both_positions() {
        use crate::api::{Error, Sandbox};

        let sandbox = Sandbox::default();
        for name in DENY_SET.iter() {
            assert!(
                matches!(sandbox.check(name), Err(Error::Denied { .. })),
                "bare {name} should be denied"
            );
            assert!(
                matches!(sandbox.check(&format!("x.{name}")), Err(Error::Denied { .. })),
                "attribute {name} should be denied"
            );
        }
    }

    #[test]
    fn ordinary_names_are_allowed() {
        let policy = NamePolicy::default();
        for name in ["x", "total", "_private", "record", "amount_total"] {
            assert!(policy.is_allowed(name), "{name} should be allowed");
        }
    }

    #[test]
    fn dunder_names_are_rejected_by_default() {
        let policy = NamePolicy::default();
        for name in ["__class__", "__dict__", "__subclasses__", "__init__"] {
            assert!(!policy.is_allowed(name), "{name} should be denied");
        }
    }

    // Upstream behavior, preserved deliberately: the bare two-character
    // marker is a legal name even though every other dunder is not.
    #[test]
    fn bare_double_underscore_is_allowed() {
        let policy = NamePolicy::default();
        assert!(policy.is_allowed("__"));
        assert!(!policy.is_allowed("___x"));
    }

    #[test]
    fn standard_magic_methods_can_be_opted_in() {
        let policy = NamePolicy::new(MagicMethods::Standard);
        assert!(policy.is_allowed("__eq__"));
        assert!(policy.is_allowed("__init__"));
        assert!(policy.is_allowed("__contains__"));
        // Opting in to comparisons must not open reflection hooks.
        assert!(!policy.is_allowed("__class__"));
        assert!(!policy.is_allowed("__getattribute__"));
    }

    #[test]
    fn custom_allow_list_is_exact() {
        let policy = NamePolicy::new(MagicMethods::Only(vec!["__eq__".to_string()]));
        assert!(policy.is_allowed("__eq__"));
        assert!(!policy.is_allowed("__ne__"));
    }

    #[test]
    fn single_underscore_prefix_is_fine() {
        let policy = NamePolicy::default();
        assert!(policy.is_allowed("_sre"));
        assert!(policy.is_allowed("_"));
    }
}
