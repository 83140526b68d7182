use std::time::Duration;

use indoc::indoc;
use pretty_assertions::assert_eq;

use crate::api::{eval_expr, Error, Namespace, Sandbox, SandboxOptions};
use crate::policy::MagicMethods;
use crate::runtime::Value;

#[test]
fn expression_evaluation() {
    assert_eq!(eval_expr("1 + 2 * 3").unwrap().repr(), "7");
    assert_eq!(
        eval_expr("[x.upper() for x in ('a', 'b') if x != 'b']")
            .unwrap()
            .repr(),
        "['A']"
    );
}

#[test]
fn eval_expr_rejects_statements() {
    assert!(matches!(eval_expr("x = 1").unwrap_err(), Error::Parse(_)));
    assert!(matches!(
        eval_expr("1 + 1\n2 + 2").unwrap_err(),
        Error::Parse(_)
    ));
}

#[test]
fn exec_returns_trailing_expression_and_updates_namespace() {
    let mut ns = Namespace::new();
    ns.set("base", Value::Int(7));
    let src = indoc! {"
        doubled = base * 2
        doubled + 1
    "};
    let result = Sandbox::default().exec(src, &mut ns).unwrap();
    assert_eq!(result.repr(), "15");
    assert_eq!(ns.get("doubled").unwrap().repr(), "14");
    // The input binding survives too.
    assert_eq!(ns.get("base").unwrap().repr(), "7");
}

#[test]
fn forbidden_constructs_fail_before_running() {
    let sandbox = Sandbox::default();
    for src in [
        "import os",
        "while True: pass",
        "eval('1')",
        "exec('x = 1')",
        "async def f(): pass",
    ] {
        assert!(
            matches!(sandbox.check(src), Err(Error::BadConstruct { .. })),
            "{src} should be rejected"
        );
    }

    // Rejection happens before any statement runs, even ones preceding
    // the offending construct.
    let mut ns = Namespace::new();
    ns.set("log", Value::list(vec![]));
    let err = sandbox.exec("log.append(1)\nimport os", &mut ns).unwrap_err();
    assert!(matches!(err, Error::BadConstruct { .. }));
    assert_eq!(ns.get("log").unwrap().repr(), "[]");
}

#[test]
fn denied_names_fail_statically() {
    let sandbox = Sandbox::default();
    assert!(matches!(
        sandbox.check("x.__class__"),
        Err(Error::Denied { .. })
    ));
    assert!(matches!(
        sandbox.check("globals()"),
        Err(Error::Denied { .. })
    ));
}

#[test]
fn dangerous_builtins_are_denied_at_call_time() {
    let err = eval_expr("open('/etc/passwd')").unwrap_err();
    assert!(matches!(err, Error::Denied { name } if name == "open"));
}

#[test]
fn runtime_errors_pass_through() {
    let err = eval_expr("1 / 0").unwrap_err();
    assert!(matches!(err, Error::Runtime(_)));
    assert_eq!(err.to_string(), "ZeroDivisionError: division by zero");
}

#[test]
fn resource_limits_are_enforced() {
    let err = eval_expr("'a' * 10 ** 9").unwrap_err();
    assert!(matches!(err, Error::ResourceExceeded(_)));
}

#[test]
fn timeout_is_enforced() {
    let sandbox = Sandbox::new(SandboxOptions {
        timeout: Duration::from_millis(30),
        ..SandboxOptions::default()
    });
    let err = sandbox
        .eval_expr("sum(range(10 ** 9))", &Namespace::new())
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
}

#[test]
fn magic_methods_require_opt_in() {
    let src = indoc! {"
        class Point:
            def __init__(self, x):
                self.x = x
            def __eq__(self, other):
                return self.x == other.x
        Point(1) == Point(1)
    "};
    let mut ns = Namespace::new();
    let strict = Sandbox::default();
    assert!(matches!(
        strict.exec(src, &mut ns),
        Err(Error::Denied { .. })
    ));

    let permissive = Sandbox::new(SandboxOptions {
        magic_methods: MagicMethods::Standard,
        ..SandboxOptions::default()
    });
    let result = permissive.exec(src, &mut Namespace::new()).unwrap();
    assert_eq!(result.repr(), "True");
}

#[test]
fn namespaces_round_trip_container_values() {
    let mut ns = Namespace::new();
    Sandbox::default()
        .exec("items = [1, 2]\nitems.append(3)", &mut ns)
        .unwrap();
    assert_eq!(ns.get("items").unwrap().repr(), "[1, 2, 3]");
}

#[test]
fn check_accepts_valid_programs_without_running_them() {
    let sandbox = Sandbox::default();
    // Would time out if executed; check only lowers it.
    assert!(sandbox.check("x = sum(range(10 ** 9))").is_ok());
    assert!(matches!(sandbox.check("1 +"), Err(Error::Parse(_))));
}
