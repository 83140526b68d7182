//! Lowering pass from the parsed tree to the guarded IR.
//!
//! This is a closed allow-list: every permitted node kind has exactly one
//! lowering rule below, and the `match` arms are exhaustive, so a new
//! syntax form cannot slip through as a silent fallback — it must be
//! reasoned about and given a rule (or a rejection) here.

use crate::parser::ast;
use crate::policy::NamePolicy;
use crate::rewriter::error::RewriteError;
use crate::rewriter::ir;
use tracing::debug;

/// Lower a parsed module, rejecting everything without a safe rule.
pub fn rewrite(module: &ast::Module, policy: &NamePolicy) -> Result<ir::Program, RewriteError> {
    let rewriter = Rewriter { policy };
    let body = rewriter.block(&module.body)?;
    debug!(statements = body.len(), "lowered program");
    Ok(ir::Program { body })
}

struct Rewriter<'p> {
    policy: &'p NamePolicy,
}

impl Rewriter<'_> {
    fn check_name(&self, name: &str, line: u32) -> Result<(), RewriteError> {
        if self.policy.is_allowed(name) {
            Ok(())
        } else {
            Err(RewriteError::denied(name, line))
        }
    }

    fn block(&self, stmts: &[ast::Stmt]) -> Result<Vec<ir::Stmt>, RewriteError> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            if let Some(lowered) = self.stmt(stmt)? {
                out.push(lowered);
            }
        }
        Ok(out)
    }

    fn stmt(&self, stmt: &ast::Stmt) -> Result<Option<ir::Stmt>, RewriteError> {
        let line = stmt.line;
        let kind = match &stmt.kind {
            ast::StmtKind::Pass => return Ok(None),

            ast::StmtKind::Expr(e) => ir::StmtKind::Expr(self.expr(e)?),

            ast::StmtKind::Assign { targets, value } => {
                let value = self.expr(value)?;
                let targets = targets
                    .iter()
                    .map(|t| self.target(t))
                    .collect::<Result<Vec<_>, _>>()?;
                ir::StmtKind::Assign { targets, value }
            }

            ast::StmtKind::AugAssign { target, op, value } => match &target.kind {
                // There is no safe read-modify-write rewrite for opaque
                // attribute/subscript targets, so only bare names pass.
                ast::ExprKind::Name(name) => {
                    self.check_name(name, target.line)?;
                    ir::StmtKind::AugAssign {
                        name: name.clone(),
                        op: *op,
                        value: self.expr(value)?,
                    }
                }
                ast::ExprKind::Attribute { .. } => {
                    return Err(RewriteError::bad(
                        "augmented assignment to an attribute",
                        line,
                    ));
                }
                ast::ExprKind::Subscript { .. } => {
                    return Err(RewriteError::bad(
                        "augmented assignment to a subscript",
                        line,
                    ));
                }
                _ => return Err(RewriteError::bad("augmented assignment target", line)),
            },

            ast::StmtKind::If { branches, orelse } => {
                let branches = branches
                    .iter()
                    .map(|(cond, body)| Ok((self.expr(cond)?, self.block(body)?)))
                    .collect::<Result<Vec<_>, RewriteError>>()?;
                ir::StmtKind::If {
                    branches,
                    orelse: self.block(orelse)?,
                }
            }

            // The wall-clock budget hooks guarded iterator steps; a `while`
            // body never takes one, so the loop form is rejected outright.
            ast::StmtKind::While { .. } => {
                return Err(RewriteError::bad("while loop", line));
            }

            ast::StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => ir::StmtKind::For {
                target: self.target(target)?,
                iter: self.expr(iter)?,
                body: self.block(body)?,
                orelse: self.block(orelse)?,
            },

            ast::StmtKind::FuncDef {
                name,
                params,
                body,
                is_async,
            } => {
                if *is_async {
                    return Err(RewriteError::bad("async function", line));
                }
                self.check_name(name, line)?;
                let func = self.func(name, params, ir::FuncBody::Block(self.block(body)?))?;
                ir::StmtKind::FuncDef {
                    func: std::rc::Rc::new(func),
                }
            }

            ast::StmtKind::ClassDef {
                name,
                bases,
                keywords,
                body,
            } => {
                if let Some((key, _)) = keywords.first() {
                    return Err(RewriteError::bad(
                        format!("class keyword '{key}'"),
                        line,
                    ));
                }
                self.check_name(name, line)?;
                let bases = bases
                    .iter()
                    .map(|b| self.expr(b))
                    .collect::<Result<Vec<_>, _>>()?;
                ir::StmtKind::ClassDef {
                    name: name.clone(),
                    bases,
                    body: self.block(body)?,
                }
            }

            ast::StmtKind::Return(value) => {
                ir::StmtKind::Return(value.as_ref().map(|v| self.expr(v)).transpose()?)
            }

            ast::StmtKind::Delete(targets) => {
                let targets = targets
                    .iter()
                    .map(|t| self.delete_target(t))
                    .collect::<Result<Vec<_>, _>>()?;
                ir::StmtKind::Delete(targets)
            }

            ast::StmtKind::Break => ir::StmtKind::Break,
            ast::StmtKind::Continue => ir::StmtKind::Continue,

            ast::StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                let handlers = handlers
                    .iter()
                    .map(|h| {
                        if let Some(name) = &h.name {
                            self.check_name(name, h.line)?;
                        }
                        Ok(ir::Handler {
                            exc_type: h.exc_type.as_ref().map(|t| self.expr(t)).transpose()?,
                            name: h.name.clone(),
                            body: self.block(&h.body)?,
                            line: h.line,
                        })
                    })
                    .collect::<Result<Vec<_>, RewriteError>>()?;
                ir::StmtKind::Try {
                    body: self.block(body)?,
                    handlers,
                    orelse: self.block(orelse)?,
                    finalbody: self.block(finalbody)?,
                }
            }

            ast::StmtKind::Raise(exc) => {
                ir::StmtKind::Raise(exc.as_ref().map(|e| self.expr(e)).transpose()?)
            }

            ast::StmtKind::With { items, body } => {
                let items = items
                    .iter()
                    .map(|(ctx, target)| {
                        Ok((
                            self.expr(ctx)?,
                            target.as_ref().map(|t| self.target(t)).transpose()?,
                        ))
                    })
                    .collect::<Result<Vec<_>, RewriteError>>()?;
                ir::StmtKind::With {
                    items,
                    body: self.block(body)?,
                }
            }

            ast::StmtKind::Import { .. } => {
                return Err(RewriteError::bad("import", line));
            }
            ast::StmtKind::FromImport { wildcard, .. } => {
                let construct = if *wildcard { "wildcard import" } else { "import" };
                return Err(RewriteError::bad(construct, line));
            }
            ast::StmtKind::Global(_) => {
                return Err(RewriteError::bad("global declaration", line));
            }
            ast::StmtKind::Nonlocal(_) => {
                return Err(RewriteError::bad("nonlocal declaration", line));
            }
            ast::StmtKind::Assert { .. } => {
                return Err(RewriteError::bad("assert statement", line));
            }
        };
        Ok(Some(ir::Stmt { kind, line }))
    }

    fn func(
        &self,
        name: &str,
        params: &[ast::Param],
        body: ir::FuncBody,
    ) -> Result<ir::Func, RewriteError> {
        let params = params
            .iter()
            .map(|p| {
                self.check_name(&p.name, p.line)?;
                Ok(ir::Param {
                    name: p.name.clone(),
                    default: p.default.as_ref().map(|d| self.expr(d)).transpose()?,
                })
            })
            .collect::<Result<Vec<_>, RewriteError>>()?;
        Ok(ir::Func {
            name: name.to_string(),
            params,
            body,
        })
    }

    /// Lower an assignment/binding target, building the unpack plan for
    /// nested sequence patterns.
    fn target(&self, target: &ast::Expr) -> Result<ir::Target, RewriteError> {
        let line = target.line;
        match &target.kind {
            ast::ExprKind::Name(name) => {
                self.check_name(name, line)?;
                Ok(ir::Target::Name(name.clone()))
            }
            ast::ExprKind::Attribute { value, attr } => {
                self.check_attr(attr, line)?;
                Ok(ir::Target::Attr {
                    obj: self.expr(value)?,
                    attr: attr.clone(),
                })
            }
            ast::ExprKind::Subscript { value, index } => Ok(ir::Target::Index {
                obj: self.expr(value)?,
                index: self.index(index, line)?,
            }),
            ast::ExprKind::Tuple(elts) | ast::ExprKind::List(elts) => {
                if elts.is_empty() {
                    return Err(RewriteError::bad("empty assignment target", line));
                }
                let elts = elts
                    .iter()
                    .map(|e| self.target(e))
                    .collect::<Result<Vec<_>, _>>()?;
                let spec = build_unpack_spec(&elts);
                Ok(ir::Target::Nested { elts, spec })
            }
            ast::ExprKind::Starred(_) => {
                Err(RewriteError::bad("starred assignment target", line))
            }
            _ => Err(RewriteError::bad("assignment target", line)),
        }
    }

    fn delete_target(&self, target: &ast::Expr) -> Result<ir::Target, RewriteError> {
        match self.target(target)? {
            ir::Target::Nested { .. } => {
                Err(RewriteError::bad("tuple delete target", target.line))
            }
            t => Ok(t),
        }
    }

    /// Statically known attribute names get the dunder check here, before
    /// any code runs; the runtime policy check still applies to everything.
    fn check_attr(&self, attr: &str, line: u32) -> Result<(), RewriteError> {
        if attr.starts_with("__") && attr != "__" {
            return Err(RewriteError::denied(attr, line));
        }
        self.check_name(attr, line)
    }

    fn expr(&self, expr: &ast::Expr) -> Result<ir::Expr, RewriteError> {
        let line = expr.line;
        let kind = match &expr.kind {
            ast::ExprKind::NoneLit => ir::ExprKind::NoneLit,
            ast::ExprKind::BoolLit(v) => ir::ExprKind::BoolLit(*v),
            ast::ExprKind::IntLit(v) => ir::ExprKind::IntLit(*v),
            ast::ExprKind::FloatLit(v) => ir::ExprKind::FloatLit(*v),
            ast::ExprKind::StrLit(s) => ir::ExprKind::StrLit(s.as_str().into()),

            ast::ExprKind::EllipsisLit => {
                return Err(RewriteError::bad("ellipsis literal", line));
            }
            ast::ExprKind::Await(_) => {
                return Err(RewriteError::bad("await expression", line));
            }
            ast::ExprKind::Yield(_) => {
                return Err(RewriteError::bad("yield expression", line));
            }
            ast::ExprKind::Starred(_) => {
                return Err(RewriteError::bad("starred expression", line));
            }

            ast::ExprKind::Name(name) => {
                self.check_name(name, line)?;
                ir::ExprKind::Name(name.clone())
            }

            ast::ExprKind::Tuple(elts) => ir::ExprKind::Tuple(self.exprs(elts)?),
            ast::ExprKind::List(elts) => ir::ExprKind::List(self.exprs(elts)?),
            ast::ExprKind::Set(elts) => ir::ExprKind::Set(self.exprs(elts)?),
            ast::ExprKind::Dict { keys, values } => {
                let pairs = keys
                    .iter()
                    .zip(values)
                    .map(|(k, v)| Ok((self.expr(k)?, self.expr(v)?)))
                    .collect::<Result<Vec<_>, RewriteError>>()?;
                ir::ExprKind::Dict(pairs)
            }

            ast::ExprKind::Attribute { value, attr } => {
                self.check_attr(attr, line)?;
                ir::ExprKind::GetAttr {
                    obj: Box::new(self.expr(value)?),
                    attr: attr.clone(),
                }
            }

            ast::ExprKind::Subscript { value, index } => ir::ExprKind::GetItem {
                obj: Box::new(self.expr(value)?),
                index: Box::new(self.index(index, line)?),
            },

            ast::ExprKind::Call { func, args } => {
                // The two names that would execute arbitrary source text
                // are rejected regardless of argument shape.
                if let ast::ExprKind::Name(name) = &func.kind {
                    if name == "eval" || name == "exec" {
                        return Err(RewriteError::bad(format!("call to {name}"), line));
                    }
                }
                let args = args
                    .iter()
                    .map(|a| {
                        Ok(match a {
                            ast::CallArg::Pos(e) => ir::Arg::Pos(self.expr(e)?),
                            ast::CallArg::Star(e) => ir::Arg::Star(self.expr(e)?),
                            ast::CallArg::Keyword(k, e) => {
                                self.check_name(k, line)?;
                                ir::Arg::Keyword(k.clone(), self.expr(e)?)
                            }
                            ast::CallArg::KwStar(e) => ir::Arg::KwStar(self.expr(e)?),
                        })
                    })
                    .collect::<Result<Vec<_>, RewriteError>>()?;
                ir::ExprKind::Apply {
                    func: Box::new(self.expr(func)?),
                    args,
                }
            }

            ast::ExprKind::Unary { op, operand } => ir::ExprKind::Unary {
                op: *op,
                operand: Box::new(self.expr(operand)?),
            },

            ast::ExprKind::Binary { op, left, right } => ir::ExprKind::Binary {
                op: *op,
                left: Box::new(self.expr(left)?),
                right: Box::new(self.expr(right)?),
            },

            ast::ExprKind::Bool { op, values } => ir::ExprKind::BoolChain {
                op: *op,
                values: self.exprs(values)?,
            },

            ast::ExprKind::Compare {
                left,
                ops,
                comparators,
            } => ir::ExprKind::Compare {
                left: Box::new(self.expr(left)?),
                ops: ops.clone(),
                comparators: self.exprs(comparators)?,
            },

            ast::ExprKind::IfElse { test, body, orelse } => ir::ExprKind::IfElse {
                test: Box::new(self.expr(test)?),
                body: Box::new(self.expr(body)?),
                orelse: Box::new(self.expr(orelse)?),
            },

            ast::ExprKind::Lambda { params, body } => {
                let func = self.func(
                    "<lambda>",
                    params,
                    ir::FuncBody::Expr(Box::new(self.expr(body)?)),
                )?;
                ir::ExprKind::Lambda(std::rc::Rc::new(func))
            }

            ast::ExprKind::ListComp { elt, generators } => {
                self.comp(ir::CompKind::List, None, elt, generators)?
            }
            ast::ExprKind::SetComp { elt, generators } => {
                self.comp(ir::CompKind::Set, None, elt, generators)?
            }
            ast::ExprKind::DictComp {
                key,
                value,
                generators,
            } => self.comp(ir::CompKind::Dict, Some(key), value, generators)?,
            ast::ExprKind::GeneratorExp { elt, generators } => {
                self.comp(ir::CompKind::Generator, None, elt, generators)?
            }
        };
        Ok(ir::Expr { kind, line })
    }

    fn exprs(&self, exprs: &[ast::Expr]) -> Result<Vec<ir::Expr>, RewriteError> {
        exprs.iter().map(|e| self.expr(e)).collect()
    }

    fn comp(
        &self,
        kind: ir::CompKind,
        key: Option<&ast::Expr>,
        elt: &ast::Expr,
        generators: &[ast::Comprehension],
    ) -> Result<ir::ExprKind, RewriteError> {
        let generators = generators
            .iter()
            .map(|g| {
                Ok(ir::Generator {
                    target: self.target(&g.target)?,
                    iter: self.expr(&g.iter)?,
                    ifs: self.exprs(&g.ifs)?,
                })
            })
            .collect::<Result<Vec<_>, RewriteError>>()?;
        Ok(ir::ExprKind::Comp(Box::new(ir::Comp {
            kind,
            key: key.map(|k| self.expr(k)).transpose()?,
            elt: self.expr(elt)?,
            generators,
        })))
    }

    /// Lower a subscript index: slice syntax becomes an explicit slice
    /// construction, a multi-dimensional subscript a tuple of them.
    fn index(&self, index: &ast::Index, line: u32) -> Result<ir::Expr, RewriteError> {
        let kind = match index {
            ast::Index::Single(e) => return self.expr(e),
            ast::Index::Slice { lower, upper, step } => ir::ExprKind::MakeSlice {
                lower: lower.as_ref().map(|e| self.expr(e).map(Box::new)).transpose()?,
                upper: upper.as_ref().map(|e| self.expr(e).map(Box::new)).transpose()?,
                step: step.as_ref().map(|e| self.expr(e).map(Box::new)).transpose()?,
            },
            ast::Index::Tuple(items) => {
                let elts = items
                    .iter()
                    .map(|i| self.index(i, line))
                    .collect::<Result<Vec<_>, _>>()?;
                ir::ExprKind::Tuple(elts)
            }
        };
        Ok(ir::Expr { kind, line })
    }
}

/// Minimum length plus child plans for every nested position.
fn build_unpack_spec(elts: &[ir::Target]) -> ir::UnpackSpec {
    let children = elts
        .iter()
        .enumerate()
        .filter_map(|(i, t)| match t {
            ir::Target::Nested { spec, .. } => Some((i, spec.clone())),
            _ => None,
        })
        .collect();
    ir::UnpackSpec {
        min_len: elts.len(),
        children,
    }
}
