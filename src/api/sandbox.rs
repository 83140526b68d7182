//! The sandbox facade.
//!
//! A [`Sandbox`] owns one policy/limits configuration and evaluates any
//! number of programs under it. Each evaluation is independent: it gets a
//! fresh scope seeded from the caller's [`Namespace`], a fresh builtin
//! table, and a fresh wall-clock deadline.

use tracing::debug;

use crate::parser::ast::Span;
use crate::parser::{parse_module, ParseError, ParseErrorKind};
use crate::policy::NamePolicy;
use crate::rewriter::{ir, rewrite};
use crate::runtime::env::{Deadline, Scope};
use crate::runtime::eval::run_program;
use crate::runtime::Value;

use super::{Error, Namespace, SandboxOptions};

pub struct Sandbox {
    options: SandboxOptions,
    policy: NamePolicy,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(SandboxOptions::default())
    }
}

impl Sandbox {
    pub fn new(options: SandboxOptions) -> Self {
        let policy = NamePolicy::new(options.magic_methods.clone());
        Self { options, policy }
    }

    pub fn options(&self) -> &SandboxOptions {
        &self.options
    }

    /// Parses and lowers without evaluating, reporting whether the source
    /// would be accepted. Useful for validating stored formulas up front.
    pub fn check(&self, source: &str) -> Result<(), Error> {
        self.lower(source).map(|_| ())
    }

    /// Evaluates a single expression against read-only bindings.
    ///
    /// The source must be exactly one expression; statements are rejected.
    ///
    /// # Example
    ///
    /// ```
    /// use cordon::api::{Namespace, Sandbox};
    /// use cordon::runtime::Value;
    ///
    /// let mut ns = Namespace::new();
    /// ns.set("qty", Value::Int(4));
    /// let result = Sandbox::default().eval_expr("qty * 25", &ns).unwrap();
    /// assert_eq!(result.repr(), "100");
    /// ```
    pub fn eval_expr(&self, source: &str, globals: &Namespace) -> Result<Value, Error> {
        let module = parse_module(source)?;
        let is_single_expr = module.body.len() == 1
            && matches!(module.body[0].kind, crate::parser::ast::StmtKind::Expr(_));
        if !is_single_expr {
            return Err(Error::Parse(ParseError::new(
                ParseErrorKind::Other {
                    message: "source must be a single expression".to_string(),
                },
                Span(0..source.len()),
                1,
            )));
        }
        let program = rewrite(&module, &self.policy)?;
        let scope = Scope::root();
        for (name, value) in globals.iter() {
            scope.set(name, value.clone());
        }
        self.run(&program, &scope)
    }

    /// Runs a program of statements against a mutable namespace.
    ///
    /// On success the namespace is replaced with the program's final
    /// top-level bindings, and the value of the trailing expression
    /// statement (if any) is returned.
    ///
    /// # Example
    ///
    /// ```
    /// use cordon::api::{Namespace, Sandbox};
    /// use cordon::runtime::Value;
    ///
    /// let mut ns = Namespace::new();
    /// ns.set("base", Value::Int(10));
    /// let result = Sandbox::default()
    ///     .exec("total = base * 3\ntotal + 1", &mut ns)
    ///     .unwrap();
    /// assert_eq!(result.repr(), "31");
    /// assert_eq!(ns.get("total").unwrap().repr(), "30");
    /// ```
    pub fn exec(&self, source: &str, globals: &mut Namespace) -> Result<Value, Error> {
        let program = self.lower(source)?;
        let scope = Scope::root();
        for (name, value) in globals.iter() {
            scope.set(name, value.clone());
        }
        let result = self.run(&program, &scope)?;
        globals.replace_all(scope.bindings());
        Ok(result)
    }

    fn lower(&self, source: &str) -> Result<ir::Program, Error> {
        let module = parse_module(source)?;
        Ok(rewrite(&module, &self.policy)?)
    }

    fn run(&self, program: &ir::Program, scope: &crate::runtime::ScopeRef) -> Result<Value, Error> {
        let deadline = Deadline::new(self.options.timeout);
        let result = run_program(program, &self.policy, self.options.limits(), deadline, scope);
        if let Err(e) = &result {
            debug!(error = %e, "evaluation failed");
        }
        Ok(result?)
    }
}

/// Evaluates one expression with default options and no bindings.
pub fn eval_expr(source: &str) -> Result<Value, Error> {
    Sandbox::default().eval_expr(source, &Namespace::new())
}

/// Runs a program with default options against the given namespace.
pub fn exec(source: &str, globals: &mut Namespace) -> Result<Value, Error> {
    Sandbox::default().exec(source, globals)
}
