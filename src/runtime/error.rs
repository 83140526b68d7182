//! Evaluation-time errors.
//!
//! Two very different families share the error channel:
//!
//! - **Runtime errors** are ordinary program errors raised by the evaluated
//!   code itself (type errors, key errors, division by zero). They can be
//!   caught by `try`/`except` inside the sandbox and pass through to the
//!   caller unchanged otherwise.
//! - **Sandbox violations** (denied names, resource bounds, the wall-clock
//!   budget) are fatal: `except` never catches them, and they always
//!   surface to the host.

use std::time::Duration;
use thiserror::Error;

/// Any error the evaluator can produce.
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    #[error("{0}")]
    Runtime(RuntimeError),

    #[error("access to '{name}' is denied")]
    Denied { name: String },

    #[error("{0}")]
    Resource(ResourceError),

    #[error("evaluation exceeded the {limit:?} time budget")]
    Timeout { limit: Duration },
}

/// An error raised by the evaluated program, tagged Python-style.
#[derive(Debug, Clone, Error)]
#[error("{}: {message}", kind.name())]
pub struct RuntimeError {
    pub kind: RuntimeKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    /// Catch-all base kind; a bare `except Exception` matches everything.
    Exception,
    Type,
    Name,
    Attribute,
    Key,
    Index,
    Value,
    ZeroDivision,
    Overflow,
}

impl RuntimeKind {
    pub fn name(self) -> &'static str {
        match self {
            RuntimeKind::Exception => "Exception",
            RuntimeKind::Type => "TypeError",
            RuntimeKind::Name => "NameError",
            RuntimeKind::Attribute => "AttributeError",
            RuntimeKind::Key => "KeyError",
            RuntimeKind::Index => "IndexError",
            RuntimeKind::Value => "ValueError",
            RuntimeKind::ZeroDivision => "ZeroDivisionError",
            RuntimeKind::Overflow => "OverflowError",
        }
    }
}

/// A size guard tripped before the offending operation ran.
#[derive(Debug, Clone, Error)]
pub enum ResourceError {
    #[error("result would have {len} elements, more than the allowed {max}")]
    CollectionTooLarge { len: usize, max: usize },

    #[error("result would have about {digits} digits, more than the allowed {max}")]
    PowTooLarge { digits: u32, max: u32 },

    #[error("call depth {depth} exceeds the allowed {max}")]
    RecursionTooDeep { depth: usize, max: usize },
}

impl RuntimeError {
    pub fn new(kind: RuntimeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl EvalError {
    pub fn type_error(message: impl Into<String>) -> Self {
        EvalError::Runtime(RuntimeError::new(RuntimeKind::Type, message))
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        EvalError::Runtime(RuntimeError::new(RuntimeKind::Value, message))
    }

    pub fn name_error(name: &str) -> Self {
        EvalError::Runtime(RuntimeError::new(
            RuntimeKind::Name,
            format!("name '{name}' is not defined"),
        ))
    }

    pub fn attribute_error(type_name: &str, attr: &str) -> Self {
        EvalError::Runtime(RuntimeError::new(
            RuntimeKind::Attribute,
            format!("'{type_name}' object has no attribute '{attr}'"),
        ))
    }

    pub fn key_error(key_repr: String) -> Self {
        EvalError::Runtime(RuntimeError::new(RuntimeKind::Key, key_repr))
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        EvalError::Runtime(RuntimeError::new(RuntimeKind::Index, message))
    }
}

impl From<RuntimeError> for EvalError {
    fn from(e: RuntimeError) -> Self {
        EvalError::Runtime(e)
    }
}

impl From<ResourceError> for EvalError {
    fn from(e: ResourceError) -> Self {
        EvalError::Resource(e)
    }
}
