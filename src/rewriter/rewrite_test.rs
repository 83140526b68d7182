use crate::parser::parse_module;
use crate::policy::{MagicMethods, NamePolicy};
use crate::rewriter::error::RewriteErrorKind;
use crate::rewriter::{ir, rewrite};
use pretty_assertions::assert_eq;

fn lower(src: &str) -> Result<ir::Program, crate::rewriter::RewriteError> {
    rewrite(&parse_module(src).unwrap(), &NamePolicy::default())
}

fn bad_construct(src: &str) -> String {
    match lower(src).unwrap_err().kind {
        RewriteErrorKind::BadConstruct { construct } => construct,
        other => panic!("expected BadConstruct, got {other:?}"),
    }
}

fn denied_name(src: &str) -> String {
    match lower(src).unwrap_err().kind {
        RewriteErrorKind::Denied { name } => name,
        other => panic!("expected Denied, got {other:?}"),
    }
}

#[test]
fn rejects_constructs_without_a_rule() {
    assert_eq!(bad_construct("eval('1')"), "call to eval");
    assert_eq!(bad_construct("exec('1')"), "call to exec");
    assert_eq!(bad_construct("import os"), "import");
    assert_eq!(bad_construct("from os import path"), "import");
    assert_eq!(bad_construct("from os import *"), "wildcard import");
    assert_eq!(bad_construct("while True: pass"), "while loop");
    assert_eq!(bad_construct("..."), "ellipsis literal");
    assert_eq!(bad_construct("async def f(): pass"), "async function");
    assert_eq!(bad_construct("global x"), "global declaration");
    assert_eq!(bad_construct("assert x"), "assert statement");
    assert_eq!(bad_construct("x = *a"), "starred expression");
}

#[test]
fn rejection_carries_the_line_number() {
    let err = lower("x = 1\nimport os").unwrap_err();
    assert_eq!(err.line, 2);
}

#[test]
fn metaclass_keyword_is_rejected() {
    assert_eq!(
        bad_construct("class C(metaclass=type): pass"),
        "class keyword 'metaclass'"
    );
}

#[test]
fn augmented_assignment_only_on_bare_names() {
    assert!(lower("x += 1").is_ok());
    assert_eq!(
        bad_construct("a.b += 1"),
        "augmented assignment to an attribute"
    );
    assert_eq!(
        bad_construct("a[0] += 1"),
        "augmented assignment to a subscript"
    );
}

#[test]
fn denied_names_are_caught_statically() {
    assert_eq!(denied_name("x.f_globals"), "f_globals");
    assert_eq!(denied_name("globals"), "globals");
    assert_eq!(denied_name("vars"), "vars");
    assert_eq!(denied_name("x.__class__"), "__class__");
    assert_eq!(denied_name("__import__"), "__import__");
}

#[test]
fn dunder_attribute_rejected_even_with_magic_methods_enabled() {
    // The rewrite-time dunder check on attribute reads is independent of
    // the runtime policy configuration.
    let module = parse_module("x.__eq__").unwrap();
    let policy = NamePolicy::new(MagicMethods::Standard);
    assert!(rewrite(&module, &policy).is_err());
}

#[test]
fn attribute_read_becomes_guarded_getattr() {
    let prog = lower("a.b").unwrap();
    match &prog.body[0].kind {
        ir::StmtKind::Expr(e) => {
            assert!(matches!(&e.kind, ir::ExprKind::GetAttr { attr, .. } if attr == "b"));
        }
        other => panic!("expected expression, got {other:?}"),
    }
}

#[test]
fn slice_is_lowered_to_slice_construction() {
    let prog = lower("a[1:2]").unwrap();
    match &prog.body[0].kind {
        ir::StmtKind::Expr(e) => match &e.kind {
            ir::ExprKind::GetItem { index, .. } => {
                assert!(matches!(index.kind, ir::ExprKind::MakeSlice { .. }));
            }
            other => panic!("expected GetItem, got {other:?}"),
        },
        other => panic!("expected expression, got {other:?}"),
    }
}

#[test]
fn nested_target_builds_unpack_spec() {
    let prog = lower("a, (b, c) = v").unwrap();
    match &prog.body[0].kind {
        ir::StmtKind::Assign { targets, .. } => match &targets[0] {
            ir::Target::Nested { spec, .. } => {
                assert_eq!(spec.min_len, 2);
                assert_eq!(spec.children.len(), 1);
                assert_eq!(spec.children[0].0, 1);
                assert_eq!(spec.children[0].1.min_len, 2);
            }
            other => panic!("expected nested target, got {other:?}"),
        },
        other => panic!("expected assignment, got {other:?}"),
    }
}

#[test]
fn starred_assignment_target_is_rejected() {
    assert_eq!(bad_construct("a, *b = v"), "starred assignment target");
}

#[test]
fn except_bind_names_are_policy_checked() {
    let src = "try:\n    pass\nexcept Exception as f_globals:\n    pass";
    assert_eq!(denied_name(src), "f_globals");
}

#[test]
fn lambda_parameters_are_policy_checked() {
    assert_eq!(denied_name("lambda vars: vars"), "vars");
}

#[test]
fn magic_methods_in_class_bodies_follow_the_allow_list() {
    let src = "class C:\n    def __eq__(self, other):\n        return True";
    let module = parse_module(src).unwrap();
    assert!(rewrite(&module, &NamePolicy::default()).is_err());
    assert!(rewrite(&module, &NamePolicy::new(MagicMethods::Standard)).is_ok());
}

#[test]
fn rewrite_is_deterministic() {
    // Lowering the same tree twice yields the same IR; guarded semantics
    // are node kinds, so nothing can get wrapped twice.
    let src = "[d['k'].attr for d in rows if d[0:2]]";
    let module = parse_module(src).unwrap();
    let policy = NamePolicy::default();
    let first = rewrite(&module, &policy).unwrap();
    let second = rewrite(&module, &policy).unwrap();
    assert_eq!(first, second);
}

#[test]
fn pass_lowers_to_nothing() {
    let prog = lower("pass").unwrap();
    assert!(prog.body.is_empty());
}
