//! Scopes and the evaluation budget.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;

use crate::runtime::error::EvalError;
use crate::runtime::value::Value;

pub type ScopeRef = Rc<Scope>;

/// One lexical scope. Lookups walk the parent chain, writes always land in
/// the innermost scope.
pub struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<ScopeRef>,
}

impl Scope {
    pub fn root() -> ScopeRef {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: None,
        })
    }

    pub fn child(parent: &ScopeRef) -> ScopeRef {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
        })
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.vars.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.vars.borrow_mut().insert(name.into(), value);
    }

    /// `del name`; only the innermost scope is consulted.
    pub fn delete(&self, name: &str) -> bool {
        self.vars.borrow_mut().remove(name).is_some()
    }

    /// Snapshot of the innermost bindings, in no particular order.
    pub fn bindings(&self) -> Vec<(String, Value)> {
        self.vars
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Wall-clock budget for one evaluation.
///
/// A copy is handed to every guarded iterator at construction; each
/// iteration step checks it, so any loop that makes progress observes the
/// deadline without instrumenting every expression.
#[derive(Clone, Copy)]
pub struct Deadline {
    at: Instant,
    limit: Duration,
}

impl Deadline {
    pub fn new(limit: Duration) -> Self {
        Self {
            at: Instant::now() + limit,
            limit,
        }
    }

    pub fn check(&self) -> Result<(), EvalError> {
        if Instant::now() > self.at {
            Err(EvalError::Timeout { limit: self.limit })
        } else {
            Ok(())
        }
    }
}

/// Size bounds enforced by the arithmetic and container guards.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Largest sequence or string an operation may produce.
    pub max_collection_len: usize,
    /// Largest decimal-digit estimate a power result may have.
    pub max_pow_digits: u32,
    /// Deepest evaluated-function call nesting.
    pub max_call_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_collection_len: 100_000,
            max_pow_digits: 100,
            max_call_depth: 64,
        }
    }
}
