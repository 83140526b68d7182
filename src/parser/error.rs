//! Parse errors with source locations.

use crate::parser::ast::Span;
use thiserror::Error;

/// Parser error with a source location.
#[derive(Debug, Clone, Error)]
#[error("{kind} at line {line}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Span,
    /// 1-based source line of the offending token.
    pub line: u32,
}

/// Specific kinds of parse errors.
#[derive(Debug, Clone, Error)]
pub enum ParseErrorKind {
    #[error("expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },

    #[error("unclosed delimiter '{delimiter}'")]
    UnclosedDelimiter { delimiter: char },

    #[error("invalid number literal '{text}'")]
    InvalidNumber { text: String },

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("inconsistent indentation")]
    BadIndentation,

    #[error("unexpected character '{ch}'")]
    UnexpectedChar { ch: char },

    #[error("expression nesting exceeds {max_depth} levels")]
    MaxDepthExceeded { max_depth: usize },

    #[error("{message}")]
    Other { message: String },
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, span: Span, line: u32) -> Self {
        Self { kind, span, line }
    }
}
