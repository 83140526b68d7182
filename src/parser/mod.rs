pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;

pub use ast::{Module, Span};
pub use error::{ParseError, ParseErrorKind};
pub use parser::parse_module;

#[cfg(test)]
mod parser_test;
