//! Public error types.
//!
//! Internal per-stage errors (parse, rewrite, evaluation) are converted to
//! this stable type at the API boundary. The variants mirror the caller's
//! decision points: a `BadConstruct` or `Denied` means the program is not
//! acceptable, `ResourceExceeded` and `Timeout` mean it misbehaved, and
//! `Runtime` is the program's own error surfacing unchanged.

use std::time::Duration;

use thiserror::Error;

use crate::parser::ParseError;
use crate::rewriter::{RewriteError, RewriteErrorKind};
use crate::runtime::{EvalError, ResourceError, RuntimeError};

#[derive(Debug, Error)]
pub enum Error {
    /// The source is not syntactically valid.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The source uses a construct with no safe lowering rule.
    #[error("forbidden construct: {construct} (line {line})")]
    BadConstruct { construct: String, line: u32 },

    /// A name, attribute or string key violates the access policy, or a
    /// stubbed builtin was called.
    #[error("access to '{name}' is denied")]
    Denied { name: String },

    /// A size guard refused to let an operation run.
    #[error("resource limit exceeded: {0}")]
    ResourceExceeded(ResourceError),

    /// The wall-clock budget ran out.
    #[error("evaluation timed out after {limit:?}")]
    Timeout { limit: Duration },

    /// An ordinary error raised by the evaluated program.
    #[error("{0}")]
    Runtime(RuntimeError),
}

impl From<RewriteError> for Error {
    fn from(e: RewriteError) -> Self {
        match e.kind {
            RewriteErrorKind::BadConstruct { construct } => Error::BadConstruct {
                construct,
                line: e.line,
            },
            RewriteErrorKind::Denied { name } => Error::Denied { name },
        }
    }
}

impl From<EvalError> for Error {
    fn from(e: EvalError) -> Self {
        match e {
            EvalError::Runtime(e) => Error::Runtime(e),
            EvalError::Denied { name } => Error::Denied { name },
            EvalError::Resource(e) => Error::ResourceExceeded(e),
            EvalError::Timeout { limit } => Error::Timeout { limit },
        }
    }
}
