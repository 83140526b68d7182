pub mod error;
pub mod ir;
pub mod rewrite;

pub use error::{RewriteError, RewriteErrorKind};
pub use rewrite::rewrite;

#[cfg(test)]
mod rewrite_test;
