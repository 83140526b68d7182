//! Recursive-descent parser for the formula dialect.
//!
//! Precedence climbing for expressions, one suite helper for every compound
//! statement. The parser accepts some constructs (imports, `while`,
//! `async def`, `yield`, `...`) that the rewriter later rejects — rejection
//! with a construct name and line number is the rewriter's contract, so the
//! grammar keeps them representable.

use crate::parser::ast::*;
use crate::parser::error::{ParseError, ParseErrorKind};
use crate::parser::lexer::{self, Kw, Tok, Token};

// Each nesting level costs a full precedence-climbing chain of stack
// frames, so the bound must stay well below what a 2 MB thread stack can
// absorb.
const MAX_NESTING_DEPTH: usize = 64;

pub fn parse_module(source: &str) -> Result<Module, ParseError> {
    let tokens = lexer::tokenize(source)?;
    Parser::new(tokens).module()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    // ---- token plumbing -------------------------------------------------

    fn cur(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn cur_tok(&self) -> &Tok {
        &self.cur().tok
    }

    fn line(&self) -> u32 {
        self.cur().line
    }

    fn span(&self) -> Span {
        self.cur().span.clone()
    }

    fn prev_end(&self) -> usize {
        if self.pos == 0 {
            0
        } else {
            self.tokens[self.pos - 1].span.0.end
        }
    }

    fn advance(&mut self) -> Token {
        let t = self.cur().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn check(&self, tok: &Tok) -> bool {
        self.cur_tok() == tok
    }

    fn check_kw(&self, kw: Kw) -> bool {
        matches!(self.cur_tok(), Tok::Keyword(k) if *k == kw)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.check(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: Kw) -> bool {
        if self.check_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<Token, ParseError> {
        if self.check(tok) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_kw(&mut self, kw: Kw, what: &str) -> Result<(), ParseError> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_name(&mut self, what: &str) -> Result<String, ParseError> {
        match self.cur_tok() {
            Tok::Name(n) => {
                let n = n.clone();
                self.advance();
                Ok(n)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        ParseError::new(
            ParseErrorKind::UnexpectedToken {
                expected: expected.to_string(),
                found: describe(self.cur_tok()),
            },
            self.span(),
            self.line(),
        )
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::new(
                ParseErrorKind::MaxDepthExceeded {
                    max_depth: MAX_NESTING_DEPTH,
                },
                self.span(),
                self.line(),
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn expr(&self, kind: ExprKind, start: &Span, line: u32) -> Expr {
        Expr {
            kind,
            span: Span(start.0.start..self.prev_end()),
            line,
        }
    }

    // ---- statements -----------------------------------------------------

    fn module(mut self) -> Result<Module, ParseError> {
        let mut body = Vec::new();
        loop {
            match self.cur_tok() {
                Tok::EndOfInput => break,
                Tok::Newline => {
                    self.advance();
                }
                _ => self.statement_into(&mut body)?,
            }
        }
        Ok(Module { body })
    }

    fn statement_into(&mut self, out: &mut Vec<Stmt>) -> Result<(), ParseError> {
        match self.cur_tok() {
            Tok::Keyword(Kw::If) => out.push(self.if_stmt()?),
            Tok::Keyword(Kw::While) => out.push(self.while_stmt()?),
            Tok::Keyword(Kw::For) => out.push(self.for_stmt()?),
            Tok::Keyword(Kw::Try) => out.push(self.try_stmt()?),
            Tok::Keyword(Kw::With) => out.push(self.with_stmt()?),
            Tok::Keyword(Kw::Def) => out.push(self.func_def(false)?),
            Tok::Keyword(Kw::Async) => {
                self.advance();
                if self.check_kw(Kw::Def) {
                    out.push(self.func_def(true)?);
                } else {
                    return Err(self.unexpected("'def' after 'async'"));
                }
            }
            Tok::Keyword(Kw::Class) => out.push(self.class_def()?),
            _ => self.simple_stmt_line(out)?,
        }
        Ok(())
    }

    /// One or more `;`-separated simple statements, terminated by a newline.
    fn simple_stmt_line(&mut self, out: &mut Vec<Stmt>) -> Result<(), ParseError> {
        loop {
            out.push(self.simple_stmt()?);
            if self.eat(&Tok::Semicolon) {
                if self.check(&Tok::Newline) || self.check(&Tok::EndOfInput) {
                    break;
                }
                continue;
            }
            break;
        }
        if !self.eat(&Tok::Newline) && !self.check(&Tok::EndOfInput) {
            return Err(self.unexpected("end of statement"));
        }
        Ok(())
    }

    fn stmt(&self, kind: StmtKind, start: &Span, line: u32) -> Stmt {
        Stmt {
            kind,
            span: Span(start.0.start..self.prev_end()),
            line,
        }
    }

    fn simple_stmt(&mut self) -> Result<Stmt, ParseError> {
        let start = self.span();
        let line = self.line();
        let kind = match self.cur_tok() {
            Tok::Keyword(Kw::Pass) => {
                self.advance();
                StmtKind::Pass
            }
            Tok::Keyword(Kw::Break) => {
                self.advance();
                StmtKind::Break
            }
            Tok::Keyword(Kw::Continue) => {
                self.advance();
                StmtKind::Continue
            }
            Tok::Keyword(Kw::Return) => {
                self.advance();
                if self.at_stmt_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.testlist()?))
                }
            }
            Tok::Keyword(Kw::Raise) => {
                self.advance();
                if self.at_stmt_end() {
                    StmtKind::Raise(None)
                } else {
                    StmtKind::Raise(Some(self.test()?))
                }
            }
            Tok::Keyword(Kw::Del) => {
                self.advance();
                let mut targets = vec![self.test()?];
                while self.eat(&Tok::Comma) {
                    targets.push(self.test()?);
                }
                StmtKind::Delete(targets)
            }
            Tok::Keyword(Kw::Import) => {
                self.advance();
                let mut names = Vec::new();
                loop {
                    let name = self.dotted_name()?;
                    let alias = if self.eat_kw(Kw::As) {
                        Some(self.expect_name("import alias")?)
                    } else {
                        None
                    };
                    names.push((name, alias));
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
                StmtKind::Import { names }
            }
            Tok::Keyword(Kw::From) => {
                self.advance();
                let module = self.dotted_name()?;
                self.expect_kw(Kw::Import, "'import'")?;
                if self.eat(&Tok::Star) {
                    StmtKind::FromImport {
                        module,
                        names: Vec::new(),
                        wildcard: true,
                    }
                } else {
                    let mut names = Vec::new();
                    loop {
                        let name = self.expect_name("imported name")?;
                        let alias = if self.eat_kw(Kw::As) {
                            Some(self.expect_name("import alias")?)
                        } else {
                            None
                        };
                        names.push((name, alias));
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                    }
                    StmtKind::FromImport {
                        module,
                        names,
                        wildcard: false,
                    }
                }
            }
            Tok::Keyword(Kw::Global) => {
                self.advance();
                StmtKind::Global(self.name_list()?)
            }
            Tok::Keyword(Kw::Nonlocal) => {
                self.advance();
                StmtKind::Nonlocal(self.name_list()?)
            }
            Tok::Keyword(Kw::Assert) => {
                self.advance();
                let test = self.test()?;
                let msg = if self.eat(&Tok::Comma) {
                    Some(self.test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            _ => return self.expr_stmt(),
        };
        Ok(self.stmt(kind, &start, line))
    }

    fn at_stmt_end(&self) -> bool {
        matches!(
            self.cur_tok(),
            Tok::Newline | Tok::Semicolon | Tok::EndOfInput
        )
    }

    fn name_list(&mut self) -> Result<Vec<String>, ParseError> {
        let mut names = vec![self.expect_name("name")?];
        while self.eat(&Tok::Comma) {
            names.push(self.expect_name("name")?);
        }
        Ok(names)
    }

    fn dotted_name(&mut self) -> Result<String, ParseError> {
        let mut name = self.expect_name("module name")?;
        while self.eat(&Tok::Dot) {
            name.push('.');
            name.push_str(&self.expect_name("module name")?);
        }
        Ok(name)
    }

    /// Expression statement, assignment chain, or augmented assignment.
    fn expr_stmt(&mut self) -> Result<Stmt, ParseError> {
        let start = self.span();
        let line = self.line();
        let first = self.testlist_star()?;

        if let Tok::AugAssign(symbol) = self.cur_tok() {
            let symbol = *symbol;
            self.advance();
            let value = self.testlist()?;
            let op = aug_op(symbol);
            return Ok(self.stmt(
                StmtKind::AugAssign {
                    target: first,
                    op,
                    value,
                },
                &start,
                line,
            ));
        }

        if self.check(&Tok::Assign) {
            let mut chain = vec![first];
            while self.eat(&Tok::Assign) {
                chain.push(self.testlist_star()?);
            }
            let value = chain.pop().expect("assignment chain has a value");
            return Ok(self.stmt(
                StmtKind::Assign {
                    targets: chain,
                    value,
                },
                &start,
                line,
            ));
        }

        Ok(self.stmt(StmtKind::Expr(first), &start, line))
    }

    // ---- compound statements -------------------------------------------

    fn suite(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(&Tok::Colon, "':'")?;
        let mut body = Vec::new();
        if self.eat(&Tok::Newline) {
            self.expect(&Tok::Indent, "an indented block")?;
            while !self.eat(&Tok::Dedent) {
                if self.check(&Tok::Newline) {
                    self.advance();
                    continue;
                }
                if self.check(&Tok::EndOfInput) {
                    break;
                }
                self.statement_into(&mut body)?;
            }
        } else {
            // Inline suite: `if x: a; b`
            self.simple_stmt_line(&mut body)?;
        }
        Ok(body)
    }

    fn if_stmt(&mut self) -> Result<Stmt, ParseError> {
        let start = self.span();
        let line = self.line();
        self.advance(); // 'if'
        let mut branches = vec![(self.test()?, self.suite()?)];
        let mut orelse = Vec::new();
        loop {
            if self.check_kw(Kw::Elif) {
                self.advance();
                branches.push((self.test()?, self.suite()?));
            } else if self.check_kw(Kw::Else) {
                self.advance();
                orelse = self.suite()?;
                break;
            } else {
                break;
            }
        }
        Ok(self.stmt(StmtKind::If { branches, orelse }, &start, line))
    }

    fn while_stmt(&mut self) -> Result<Stmt, ParseError> {
        let start = self.span();
        let line = self.line();
        self.advance(); // 'while'
        let cond = self.test()?;
        let body = self.suite()?;
        let orelse = if self.eat_kw(Kw::Else) {
            self.suite()?
        } else {
            Vec::new()
        };
        Ok(self.stmt(StmtKind::While { cond, body, orelse }, &start, line))
    }

    fn for_stmt(&mut self) -> Result<Stmt, ParseError> {
        let start = self.span();
        let line = self.line();
        self.advance(); // 'for'
        let target = self.target_list()?;
        self.expect_kw(Kw::In, "'in'")?;
        let iter = self.testlist()?;
        let body = self.suite()?;
        let orelse = if self.eat_kw(Kw::Else) {
            self.suite()?
        } else {
            Vec::new()
        };
        Ok(self.stmt(
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
            &start,
            line,
        ))
    }

    fn try_stmt(&mut self) -> Result<Stmt, ParseError> {
        let start = self.span();
        let line = self.line();
        self.advance(); // 'try'
        let body = self.suite()?;
        let mut handlers = Vec::new();
        while self.check_kw(Kw::Except) {
            let handler_line = self.line();
            self.advance();
            let (exc_type, name) = if self.check(&Tok::Colon) {
                (None, None)
            } else {
                let ty = self.test()?;
                let name = if self.eat_kw(Kw::As) {
                    Some(self.expect_name("exception name")?)
                } else {
                    None
                };
                (Some(ty), name)
            };
            let handler_body = self.suite()?;
            handlers.push(ExceptHandler {
                exc_type,
                name,
                body: handler_body,
                line: handler_line,
            });
        }
        let orelse = if !handlers.is_empty() && self.eat_kw(Kw::Else) {
            self.suite()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat_kw(Kw::Finally) {
            self.suite()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.unexpected("'except' or 'finally'"));
        }
        Ok(self.stmt(
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
            &start,
            line,
        ))
    }

    fn with_stmt(&mut self) -> Result<Stmt, ParseError> {
        let start = self.span();
        let line = self.line();
        self.advance(); // 'with'
        let mut items = Vec::new();
        loop {
            let ctx = self.test()?;
            let target = if self.eat_kw(Kw::As) {
                Some(self.target_list()?)
            } else {
                None
            };
            items.push((ctx, target));
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        let body = self.suite()?;
        Ok(self.stmt(StmtKind::With { items, body }, &start, line))
    }

    fn func_def(&mut self, is_async: bool) -> Result<Stmt, ParseError> {
        let start = self.span();
        let line = self.line();
        self.advance(); // 'def'
        let name = self.expect_name("function name")?;
        self.expect(&Tok::LParen, "'('")?;
        let params = self.param_list()?;
        self.expect(&Tok::RParen, "')'")?;
        let body = self.suite()?;
        Ok(self.stmt(
            StmtKind::FuncDef {
                name,
                params,
                body,
                is_async,
            },
            &start,
            line,
        ))
    }

    fn param_list(&mut self) -> Result<Vec<Param>, ParseError> {
        let mut params = Vec::new();
        while !self.check(&Tok::RParen) {
            let line = self.line();
            let name = self.expect_name("parameter name")?;
            let default = if self.eat(&Tok::Assign) {
                Some(self.test()?)
            } else {
                None
            };
            params.push(Param {
                name,
                default,
                line,
            });
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn class_def(&mut self) -> Result<Stmt, ParseError> {
        let start = self.span();
        let line = self.line();
        self.advance(); // 'class'
        let name = self.expect_name("class name")?;
        let mut bases = Vec::new();
        let mut keywords = Vec::new();
        if self.eat(&Tok::LParen) {
            while !self.check(&Tok::RParen) {
                if let Tok::Name(n) = self.cur_tok() {
                    // Keyword base (`metaclass=...`) needs two-token lookahead.
                    if self.tokens.get(self.pos + 1).map(|t| &t.tok) == Some(&Tok::Assign) {
                        let key = n.clone();
                        self.advance();
                        self.advance();
                        keywords.push((key, self.test()?));
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                        continue;
                    }
                }
                bases.push(self.test()?);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
            self.expect(&Tok::RParen, "')'")?;
        }
        let body = self.suite()?;
        Ok(self.stmt(
            StmtKind::ClassDef {
                name,
                bases,
                keywords,
                body,
            },
            &start,
            line,
        ))
    }

    /// Comma-separated targets of a `for`/`with` binding.
    fn target_list(&mut self) -> Result<Expr, ParseError> {
        let start = self.span();
        let line = self.line();
        let first = self.atom_trailers()?;
        if !self.check(&Tok::Comma) {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat(&Tok::Comma) {
            if self.check_kw(Kw::In) || self.check(&Tok::Colon) {
                break;
            }
            elts.push(self.atom_trailers()?);
        }
        Ok(self.expr(ExprKind::Tuple(elts), &start, line))
    }

    // ---- expressions ----------------------------------------------------

    /// `test (',' test)*` — a bare tuple when more than one element.
    fn testlist(&mut self) -> Result<Expr, ParseError> {
        self.testlist_star()
    }

    fn testlist_star(&mut self) -> Result<Expr, ParseError> {
        let start = self.span();
        let line = self.line();
        let first = self.test_or_star()?;
        if !self.check(&Tok::Comma) {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat(&Tok::Comma) {
            if self.at_expr_end() {
                break;
            }
            elts.push(self.test_or_star()?);
        }
        Ok(self.expr(ExprKind::Tuple(elts), &start, line))
    }

    fn at_expr_end(&self) -> bool {
        matches!(
            self.cur_tok(),
            Tok::Newline
                | Tok::Semicolon
                | Tok::EndOfInput
                | Tok::Assign
                | Tok::RParen
                | Tok::RBracket
                | Tok::RBrace
                | Tok::Colon
        ) || matches!(self.cur_tok(), Tok::AugAssign(_))
    }

    fn test_or_star(&mut self) -> Result<Expr, ParseError> {
        if self.check(&Tok::Star) {
            let start = self.span();
            let line = self.line();
            self.advance();
            let inner = self.test()?;
            return Ok(self.expr(ExprKind::Starred(Box::new(inner)), &start, line));
        }
        self.test()
    }

    fn test(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let result = self.test_inner();
        self.leave();
        result
    }

    fn test_inner(&mut self) -> Result<Expr, ParseError> {
        let start = self.span();
        let line = self.line();

        if self.check_kw(Kw::Lambda) {
            self.advance();
            let mut params = Vec::new();
            if !self.check(&Tok::Colon) {
                loop {
                    let pline = self.line();
                    let name = self.expect_name("parameter name")?;
                    let default = if self.eat(&Tok::Assign) {
                        Some(self.test()?)
                    } else {
                        None
                    };
                    params.push(Param {
                        name,
                        default,
                        line: pline,
                    });
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
            }
            self.expect(&Tok::Colon, "':'")?;
            let body = self.test()?;
            return Ok(self.expr(
                ExprKind::Lambda {
                    params,
                    body: Box::new(body),
                },
                &start,
                line,
            ));
        }

        if self.check_kw(Kw::Yield) {
            self.advance();
            let value = if self.at_expr_end() {
                None
            } else {
                Some(Box::new(self.testlist()?))
            };
            return Ok(self.expr(ExprKind::Yield(value), &start, line));
        }

        let body = self.or_test()?;
        if self.check_kw(Kw::If) {
            self.advance();
            let test = self.or_test()?;
            self.expect_kw(Kw::Else, "'else'")?;
            let orelse = self.test()?;
            return Ok(self.expr(
                ExprKind::IfElse {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                },
                &start,
                line,
            ));
        }
        Ok(body)
    }

    fn or_test(&mut self) -> Result<Expr, ParseError> {
        let start = self.span();
        let line = self.line();
        let first = self.and_test()?;
        if !self.check_kw(Kw::Or) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw(Kw::Or) {
            values.push(self.and_test()?);
        }
        Ok(self.expr(
            ExprKind::Bool {
                op: BoolOp::Or,
                values,
            },
            &start,
            line,
        ))
    }

    fn and_test(&mut self) -> Result<Expr, ParseError> {
        let start = self.span();
        let line = self.line();
        let first = self.not_test()?;
        if !self.check_kw(Kw::And) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw(Kw::And) {
            values.push(self.not_test()?);
        }
        Ok(self.expr(
            ExprKind::Bool {
                op: BoolOp::And,
                values,
            },
            &start,
            line,
        ))
    }

    fn not_test(&mut self) -> Result<Expr, ParseError> {
        if self.check_kw(Kw::Not) {
            let start = self.span();
            let line = self.line();
            self.advance();
            let operand = self.not_test()?;
            return Ok(self.expr(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                &start,
                line,
            ));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let start = self.span();
        let line = self.line();
        let left = self.bit_or()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        loop {
            let op = match self.cur_tok() {
                Tok::Lt => CmpOp::Lt,
                Tok::Gt => CmpOp::Gt,
                Tok::Le => CmpOp::Le,
                Tok::Ge => CmpOp::Ge,
                Tok::EqEq => CmpOp::Eq,
                Tok::NotEq => CmpOp::NotEq,
                Tok::Keyword(Kw::In) => CmpOp::In,
                Tok::Keyword(Kw::Is) => {
                    self.advance();
                    let op = if self.eat_kw(Kw::Not) {
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    };
                    ops.push(op);
                    comparators.push(self.bit_or()?);
                    continue;
                }
                Tok::Keyword(Kw::Not) => {
                    self.advance();
                    self.expect_kw(Kw::In, "'in' after 'not'")?;
                    ops.push(CmpOp::NotIn);
                    comparators.push(self.bit_or()?);
                    continue;
                }
                _ => break,
            };
            self.advance();
            ops.push(op);
            comparators.push(self.bit_or()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(self.expr(
            ExprKind::Compare {
                left: Box::new(left),
                ops,
                comparators,
            },
            &start,
            line,
        ))
    }

    fn bit_or(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(0)
    }

    /// Left-associative binary levels, tightest last.
    fn binary_level(&mut self, level: usize) -> Result<Expr, ParseError> {
        const LEVELS: &[&[(Tok, BinOp)]] = &[
            &[(Tok::Pipe, BinOp::BitOr)],
            &[(Tok::Caret, BinOp::BitXor)],
            &[(Tok::Amp, BinOp::BitAnd)],
            &[(Tok::Shl, BinOp::Shl), (Tok::Shr, BinOp::Shr)],
            &[(Tok::Plus, BinOp::Add), (Tok::Minus, BinOp::Sub)],
            &[
                (Tok::Star, BinOp::Mult),
                (Tok::Slash, BinOp::Div),
                (Tok::DoubleSlash, BinOp::FloorDiv),
                (Tok::Percent, BinOp::Mod),
            ],
        ];
        if level == LEVELS.len() {
            return self.factor();
        }
        let start = self.span();
        let line = self.line();
        let mut left = self.binary_level(level + 1)?;
        'outer: loop {
            for (tok, op) in LEVELS[level] {
                if self.check(tok) {
                    self.advance();
                    let right = self.binary_level(level + 1)?;
                    left = self.expr(
                        ExprKind::Binary {
                            op: *op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        &start,
                        line,
                    );
                    continue 'outer;
                }
            }
            break;
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        let start = self.span();
        let line = self.line();
        let op = match self.cur_tok() {
            Tok::Minus => Some(UnaryOp::Neg),
            Tok::Plus => Some(UnaryOp::Pos),
            Tok::Tilde => Some(UnaryOp::Invert),
            Tok::Keyword(Kw::Await) => {
                self.advance();
                let operand = self.factor()?;
                return Ok(self.expr(ExprKind::Await(Box::new(operand)), &start, line));
            }
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.factor()?;
            return Ok(self.expr(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                &start,
                line,
            ));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let start = self.span();
        let line = self.line();
        let base = self.atom_trailers()?;
        if self.eat(&Tok::DoubleStar) {
            // Right-associative; `-x ** y` binds the `**` tighter.
            let exp = self.factor()?;
            return Ok(self.expr(
                ExprKind::Binary {
                    op: BinOp::Pow,
                    left: Box::new(base),
                    right: Box::new(exp),
                },
                &start,
                line,
            ));
        }
        Ok(base)
    }

    fn atom_trailers(&mut self) -> Result<Expr, ParseError> {
        let start = self.span();
        let line = self.line();
        let mut value = self.atom()?;
        loop {
            match self.cur_tok() {
                Tok::Dot => {
                    self.advance();
                    let attr = self.expect_name("attribute name")?;
                    value = self.expr(
                        ExprKind::Attribute {
                            value: Box::new(value),
                            attr,
                        },
                        &start,
                        line,
                    );
                }
                Tok::LParen => {
                    self.advance();
                    let args = self.call_args()?;
                    value = self.expr(
                        ExprKind::Call {
                            func: Box::new(value),
                            args,
                        },
                        &start,
                        line,
                    );
                }
                Tok::LBracket => {
                    self.advance();
                    let index = self.subscript()?;
                    self.expect(&Tok::RBracket, "']'")?;
                    value = self.expr(
                        ExprKind::Subscript {
                            value: Box::new(value),
                            index: Box::new(index),
                        },
                        &start,
                        line,
                    );
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn call_args(&mut self) -> Result<Vec<CallArg>, ParseError> {
        let mut args = Vec::new();
        while !self.check(&Tok::RParen) {
            if self.eat(&Tok::DoubleStar) {
                args.push(CallArg::KwStar(self.test()?));
            } else if self.eat(&Tok::Star) {
                args.push(CallArg::Star(self.test()?));
            } else if let Tok::Name(n) = self.cur_tok() {
                if self.tokens.get(self.pos + 1).map(|t| &t.tok) == Some(&Tok::Assign) {
                    let key = n.clone();
                    self.advance();
                    self.advance();
                    args.push(CallArg::Keyword(key, self.test()?));
                } else {
                    args.push(CallArg::Pos(self.maybe_genexp()?));
                }
            } else {
                args.push(CallArg::Pos(self.maybe_genexp()?));
            }
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(&Tok::RParen, "')'")?;
        Ok(args)
    }

    /// A positional call argument, possibly a bare generator expression
    /// (`f(x for x in xs)`).
    fn maybe_genexp(&mut self) -> Result<Expr, ParseError> {
        let start = self.span();
        let line = self.line();
        let first = self.test()?;
        if self.check_kw(Kw::For) {
            let generators = self.comprehension_clauses()?;
            return Ok(self.expr(
                ExprKind::GeneratorExp {
                    elt: Box::new(first),
                    generators,
                },
                &start,
                line,
            ));
        }
        Ok(first)
    }

    fn subscript(&mut self) -> Result<Index, ParseError> {
        let first = self.subscript_item()?;
        if !self.check(&Tok::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Tok::Comma) {
            if self.check(&Tok::RBracket) {
                break;
            }
            items.push(self.subscript_item()?);
        }
        Ok(Index::Tuple(items))
    }

    fn subscript_item(&mut self) -> Result<Index, ParseError> {
        let mut lower = None;
        if !self.check(&Tok::Colon) {
            let e = self.test()?;
            if !self.check(&Tok::Colon) {
                return Ok(Index::Single(e));
            }
            lower = Some(e);
        }
        self.expect(&Tok::Colon, "':'")?;
        let mut upper = None;
        if !matches!(
            self.cur_tok(),
            Tok::RBracket | Tok::Comma | Tok::Colon
        ) {
            upper = Some(self.test()?);
        }
        let mut step = None;
        if self.eat(&Tok::Colon)
            && !matches!(self.cur_tok(), Tok::RBracket | Tok::Comma)
        {
            step = Some(self.test()?);
        }
        Ok(Index::Slice { lower, upper, step })
    }

    fn comprehension_clauses(&mut self) -> Result<Vec<Comprehension>, ParseError> {
        let mut generators = Vec::new();
        while self.check_kw(Kw::For) {
            let line = self.line();
            self.advance();
            let target = self.target_list()?;
            self.expect_kw(Kw::In, "'in'")?;
            let iter = self.or_test()?;
            let mut ifs = Vec::new();
            while self.eat_kw(Kw::If) {
                ifs.push(self.or_test()?);
            }
            generators.push(Comprehension {
                target,
                iter,
                ifs,
                line,
            });
        }
        Ok(generators)
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        let start = self.span();
        let line = self.line();
        let kind = match self.cur_tok().clone() {
            Tok::Int(v) => {
                self.advance();
                ExprKind::IntLit(v)
            }
            Tok::Float(v) => {
                self.advance();
                ExprKind::FloatLit(v)
            }
            Tok::Str(s) => {
                self.advance();
                // Adjacent string literals concatenate.
                let mut value = s;
                while let Tok::Str(next) = self.cur_tok() {
                    value.push_str(next);
                    self.advance();
                }
                ExprKind::StrLit(value)
            }
            Tok::Name(n) => {
                self.advance();
                ExprKind::Name(n)
            }
            Tok::Keyword(Kw::None) => {
                self.advance();
                ExprKind::NoneLit
            }
            Tok::Keyword(Kw::True) => {
                self.advance();
                ExprKind::BoolLit(true)
            }
            Tok::Keyword(Kw::False) => {
                self.advance();
                ExprKind::BoolLit(false)
            }
            Tok::Ellipsis => {
                self.advance();
                ExprKind::EllipsisLit
            }
            Tok::LParen => {
                self.advance();
                if self.eat(&Tok::RParen) {
                    ExprKind::Tuple(Vec::new())
                } else {
                    let first = self.test_or_star()?;
                    if self.check_kw(Kw::For) {
                        let generators = self.comprehension_clauses()?;
                        self.expect(&Tok::RParen, "')'")?;
                        ExprKind::GeneratorExp {
                            elt: Box::new(first),
                            generators,
                        }
                    } else if self.check(&Tok::Comma) {
                        let mut elts = vec![first];
                        while self.eat(&Tok::Comma) {
                            if self.check(&Tok::RParen) {
                                break;
                            }
                            elts.push(self.test_or_star()?);
                        }
                        self.expect(&Tok::RParen, "')'")?;
                        ExprKind::Tuple(elts)
                    } else {
                        self.expect(&Tok::RParen, "')'")?;
                        return Ok(first);
                    }
                }
            }
            Tok::LBracket => {
                self.advance();
                if self.eat(&Tok::RBracket) {
                    ExprKind::List(Vec::new())
                } else {
                    let first = self.test_or_star()?;
                    if self.check_kw(Kw::For) {
                        let generators = self.comprehension_clauses()?;
                        self.expect(&Tok::RBracket, "']'")?;
                        ExprKind::ListComp {
                            elt: Box::new(first),
                            generators,
                        }
                    } else {
                        let mut elts = vec![first];
                        while self.eat(&Tok::Comma) {
                            if self.check(&Tok::RBracket) {
                                break;
                            }
                            elts.push(self.test_or_star()?);
                        }
                        self.expect(&Tok::RBracket, "']'")?;
                        ExprKind::List(elts)
                    }
                }
            }
            Tok::LBrace => {
                self.advance();
                self.brace_display()?
            }
            _ => return Err(self.unexpected("an expression")),
        };
        Ok(self.expr(kind, &start, line))
    }

    /// Dict or set display (possibly a comprehension), after `{`.
    fn brace_display(&mut self) -> Result<ExprKind, ParseError> {
        if self.eat(&Tok::RBrace) {
            return Ok(ExprKind::Dict {
                keys: Vec::new(),
                values: Vec::new(),
            });
        }
        let first = self.test()?;
        if self.eat(&Tok::Colon) {
            // Dict display or dict comprehension.
            let first_value = self.test()?;
            if self.check_kw(Kw::For) {
                let generators = self.comprehension_clauses()?;
                self.expect(&Tok::RBrace, "'}'")?;
                return Ok(ExprKind::DictComp {
                    key: Box::new(first),
                    value: Box::new(first_value),
                    generators,
                });
            }
            let mut keys = vec![first];
            let mut values = vec![first_value];
            while self.eat(&Tok::Comma) {
                if self.check(&Tok::RBrace) {
                    break;
                }
                keys.push(self.test()?);
                self.expect(&Tok::Colon, "':'")?;
                values.push(self.test()?);
            }
            self.expect(&Tok::RBrace, "'}'")?;
            return Ok(ExprKind::Dict { keys, values });
        }
        // Set display or set comprehension.
        if self.check_kw(Kw::For) {
            let generators = self.comprehension_clauses()?;
            self.expect(&Tok::RBrace, "'}'")?;
            return Ok(ExprKind::SetComp {
                elt: Box::new(first),
                generators,
            });
        }
        let mut elts = vec![first];
        while self.eat(&Tok::Comma) {
            if self.check(&Tok::RBrace) {
                break;
            }
            elts.push(self.test()?);
        }
        self.expect(&Tok::RBrace, "'}'")?;
        Ok(ExprKind::Set(elts))
    }
}

fn aug_op(symbol: &str) -> BinOp {
    match symbol {
        "+=" => BinOp::Add,
        "-=" => BinOp::Sub,
        "*=" => BinOp::Mult,
        "/=" => BinOp::Div,
        "//=" => BinOp::FloorDiv,
        "%=" => BinOp::Mod,
        "**=" => BinOp::Pow,
        "&=" => BinOp::BitAnd,
        "|=" => BinOp::BitOr,
        "^=" => BinOp::BitXor,
        "<<=" => BinOp::Shl,
        ">>=" => BinOp::Shr,
        other => unreachable!("unknown augmented operator {other}"),
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Newline => "end of line".to_string(),
        Tok::Indent => "indent".to_string(),
        Tok::Dedent => "dedent".to_string(),
        Tok::EndOfInput => "end of input".to_string(),
        Tok::Int(v) => format!("integer {v}"),
        Tok::Float(v) => format!("number {v}"),
        Tok::Str(_) => "string literal".to_string(),
        Tok::Name(n) => format!("name '{n}'"),
        Tok::Keyword(k) => format!("keyword '{k:?}'").to_lowercase(),
        other => format!("'{other:?}'"),
    }
}
