use crate::parser::ast::*;
use crate::parser::error::ParseErrorKind;
use crate::parser::parse_module;
use indoc::indoc;
use pretty_assertions::assert_eq;

fn parse_expr(src: &str) -> Expr {
    let module = parse_module(src).unwrap();
    assert_eq!(module.body.len(), 1, "expected a single statement");
    match module.body.into_iter().next().unwrap().kind {
        StmtKind::Expr(e) => e,
        other => panic!("expected expression statement, got {other:?}"),
    }
}

#[test]
fn arithmetic_precedence() {
    let e = parse_expr("1 + 2 * 3");
    match e.kind {
        ExprKind::Binary {
            op: BinOp::Add,
            right,
            ..
        } => match right.kind {
            ExprKind::Binary {
                op: BinOp::Mult, ..
            } => {}
            other => panic!("expected Mult on the right, got {other:?}"),
        },
        other => panic!("expected Add at the root, got {other:?}"),
    }
}

#[test]
fn power_is_right_associative() {
    let e = parse_expr("2 ** 3 ** 2");
    match e.kind {
        ExprKind::Binary {
            op: BinOp::Pow,
            left,
            right,
        } => {
            assert_eq!(left.kind, ExprKind::IntLit(2));
            assert!(matches!(
                right.kind,
                ExprKind::Binary {
                    op: BinOp::Pow,
                    ..
                }
            ));
        }
        other => panic!("expected Pow, got {other:?}"),
    }
}

#[test]
fn negative_power_binds_exponent_first() {
    // -2 ** 2 is -(2 ** 2)
    let e = parse_expr("-2 ** 2");
    assert!(matches!(
        e.kind,
        ExprKind::Unary {
            op: UnaryOp::Neg,
            ..
        }
    ));
}

#[test]
fn chained_comparison() {
    let e = parse_expr("1 < x <= 10");
    match e.kind {
        ExprKind::Compare { ops, .. } => assert_eq!(ops, vec![CmpOp::Lt, CmpOp::Le]),
        other => panic!("expected Compare, got {other:?}"),
    }
}

#[test]
fn not_in_and_is_not() {
    let e = parse_expr("a not in b");
    match e.kind {
        ExprKind::Compare { ops, .. } => assert_eq!(ops, vec![CmpOp::NotIn]),
        other => panic!("expected Compare, got {other:?}"),
    }
    let e = parse_expr("a is not b");
    match e.kind {
        ExprKind::Compare { ops, .. } => assert_eq!(ops, vec![CmpOp::IsNot]),
        other => panic!("expected Compare, got {other:?}"),
    }
}

#[test]
fn call_with_keyword_and_star_args() {
    let e = parse_expr("f(1, x=2, *rest, **kw)");
    match e.kind {
        ExprKind::Call { args, .. } => {
            assert_eq!(args.len(), 4);
            assert!(matches!(args[0], CallArg::Pos(_)));
            assert!(matches!(args[1], CallArg::Keyword(ref k, _) if k == "x"));
            assert!(matches!(args[2], CallArg::Star(_)));
            assert!(matches!(args[3], CallArg::KwStar(_)));
        }
        other => panic!("expected Call, got {other:?}"),
    }
}

#[test]
fn subscript_slice_forms() {
    assert!(matches!(
        parse_expr("a[1]").kind,
        ExprKind::Subscript { ref index, .. } if matches!(**index, Index::Single(_))
    ));
    assert!(matches!(
        parse_expr("a[1:2:3]").kind,
        ExprKind::Subscript { ref index, .. }
            if matches!(**index, Index::Slice { lower: Some(_), upper: Some(_), step: Some(_) })
    ));
    assert!(matches!(
        parse_expr("a[:]").kind,
        ExprKind::Subscript { ref index, .. }
            if matches!(**index, Index::Slice { lower: None, upper: None, step: None })
    ));
    assert!(matches!(
        parse_expr("a[1:2, 3]").kind,
        ExprKind::Subscript { ref index, .. } if matches!(**index, Index::Tuple(_))
    ));
}

#[test]
fn list_comprehension_with_condition() {
    let e = parse_expr("[x * 2 for x in xs if x != 0]");
    match e.kind {
        ExprKind::ListComp { generators, .. } => {
            assert_eq!(generators.len(), 1);
            assert_eq!(generators[0].ifs.len(), 1);
        }
        other => panic!("expected ListComp, got {other:?}"),
    }
}

#[test]
fn dict_set_and_dict_comp() {
    assert!(matches!(
        parse_expr("{'a': 1, 'b': 2}").kind,
        ExprKind::Dict { ref keys, .. } if keys.len() == 2
    ));
    assert!(matches!(
        parse_expr("{1, 2, 3}").kind,
        ExprKind::Set(ref elts) if elts.len() == 3
    ));
    assert!(matches!(
        parse_expr("{k: v for k, v in items}").kind,
        ExprKind::DictComp { .. }
    ));
}

#[test]
fn conditional_expression_and_lambda() {
    assert!(matches!(
        parse_expr("a if c else b").kind,
        ExprKind::IfElse { .. }
    ));
    assert!(matches!(
        parse_expr("lambda x, y=1: x + y").kind,
        ExprKind::Lambda { ref params, .. } if params.len() == 2
    ));
}

#[test]
fn assignment_forms() {
    let m = parse_module("a = b = 1").unwrap();
    match &m.body[0].kind {
        StmtKind::Assign { targets, .. } => assert_eq!(targets.len(), 2),
        other => panic!("expected Assign, got {other:?}"),
    }

    let m = parse_module("a, (b, c) = v").unwrap();
    match &m.body[0].kind {
        StmtKind::Assign { targets, .. } => {
            assert!(matches!(targets[0].kind, ExprKind::Tuple(_)));
        }
        other => panic!("expected Assign, got {other:?}"),
    }

    let m = parse_module("x += 1").unwrap();
    assert!(matches!(
        m.body[0].kind,
        StmtKind::AugAssign { op: BinOp::Add, .. }
    ));
}

#[test]
fn compound_statements() {
    let src = indoc! {"
        total = 0
        for rec in records:
            if rec.active:
                total += rec.amount
            else:
                pass
    "};
    let m = parse_module(src).unwrap();
    assert_eq!(m.body.len(), 2);
    match &m.body[1].kind {
        StmtKind::For { body, .. } => {
            assert!(matches!(body[0].kind, StmtKind::If { .. }));
        }
        other => panic!("expected For, got {other:?}"),
    }
}

#[test]
fn try_except_finally() {
    let src = indoc! {"
        try:
            x = d['k']
        except KeyError as e:
            x = None
        finally:
            done = True
    "};
    let m = parse_module(src).unwrap();
    match &m.body[0].kind {
        StmtKind::Try {
            handlers,
            finalbody,
            ..
        } => {
            assert_eq!(handlers.len(), 1);
            assert_eq!(handlers[0].name.as_deref(), Some("e"));
            assert_eq!(finalbody.len(), 1);
        }
        other => panic!("expected Try, got {other:?}"),
    }
}

#[test]
fn function_and_class_defs() {
    let src = indoc! {"
        def area(w, h=1):
            return w * h

        class Point(Base, metaclass=Meta):
            def __init__(self, x):
                self.x = x
    "};
    let m = parse_module(src).unwrap();
    assert!(matches!(m.body[0].kind, StmtKind::FuncDef { ref params, .. } if params.len() == 2));
    match &m.body[1].kind {
        StmtKind::ClassDef {
            bases, keywords, ..
        } => {
            assert_eq!(bases.len(), 1);
            assert_eq!(keywords[0].0, "metaclass");
        }
        other => panic!("expected ClassDef, got {other:?}"),
    }
}

#[test]
fn rejected_later_but_parse_now() {
    // These must parse so the rewriter can reject them with line numbers.
    assert!(parse_module("import os").is_ok());
    assert!(parse_module("from os import *").is_ok());
    assert!(parse_module("while True: pass").is_ok());
    assert!(parse_module("...").is_ok());
    assert!(parse_module("async def f(): pass").is_ok());
}

#[test]
fn semicolons_separate_simple_statements() {
    let m = parse_module("a = 1; b = 2; a + b").unwrap();
    assert_eq!(m.body.len(), 3);
    assert!(matches!(m.body[2].kind, StmtKind::Expr(_)));
}

#[test]
fn with_statement_bindings() {
    let m = parse_module("with ctx() as (a, b): pass").unwrap();
    match &m.body[0].kind {
        StmtKind::With { items, .. } => {
            assert!(items[0].1.is_some());
        }
        other => panic!("expected With, got {other:?}"),
    }
}

#[test]
fn deep_nesting_is_limited() {
    // Must come back as a parse error, not blow the thread stack.
    let src = format!("{}1{}", "(".repeat(500), ")".repeat(500));
    let err = parse_module(&src).unwrap_err();
    assert!(matches!(err.kind, ParseErrorKind::MaxDepthExceeded { .. }));

    let src = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
    assert!(parse_module(&src).is_err());
}

#[test]
fn parse_error_carries_line() {
    let err = parse_module("x = 1\ny = ]").unwrap_err();
    assert_eq!(err.line, 2);
}
