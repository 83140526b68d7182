//! Rewrite-time rejection errors.

use thiserror::Error;

/// Error raised while lowering the parsed tree into the guarded IR.
///
/// Both kinds fire before any evaluation: a rejected program never runs.
#[derive(Debug, Clone, Error)]
#[error("{kind} (line {line})")]
pub struct RewriteError {
    pub kind: RewriteErrorKind,
    /// 1-based source line of the offending node.
    pub line: u32,
}

#[derive(Debug, Clone, Error)]
pub enum RewriteErrorKind {
    /// The construct has no safe lowering rule.
    #[error("forbidden construct: {construct}")]
    BadConstruct { construct: String },

    /// An identifier violates the name policy.
    #[error("access to '{name}' is denied")]
    Denied { name: String },
}

impl RewriteError {
    pub fn bad(construct: impl Into<String>, line: u32) -> Self {
        Self {
            kind: RewriteErrorKind::BadConstruct {
                construct: construct.into(),
            },
            line,
        }
    }

    pub fn denied(name: impl Into<String>, line: u32) -> Self {
        Self {
            kind: RewriteErrorKind::Denied { name: name.into() },
            line,
        }
    }
}
