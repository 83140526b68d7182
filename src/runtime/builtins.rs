//! The restricted builtin namespace.
//!
//! The table is rebuilt per evaluation and the evaluator resolves names
//! against it read-only, so a program cannot swap a builtin out from under
//! itself. Known-safe names get native implementations; every other
//! builtin name is present but bound to a stub that raises a denial on
//! first call, which keeps `callable(open)` honest while making `open()`
//! fail.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use hashbrown::HashMap;

use crate::parser::ast::BinOp;
use crate::runtime::error::{EvalError, RuntimeError, RuntimeKind};
use crate::runtime::eval::{Interp, NativeFn};
use crate::runtime::guards::{guarded_getattr, GuardedIter};
use crate::runtime::methods::sort_values;
use crate::runtime::operators::{self, to_f64};
use crate::runtime::value::{
    format_float, Builtin, BuiltinImpl, Dict, Num, Range, Set, SliceValue, Value,
};

/// Builtin names that exist only to fail: file and process access, dynamic
/// code, reflection, and everything else without a safe meaning here.
const STUBBED: &[&str] = &[
    "open",
    "input",
    "eval",
    "exec",
    "compile",
    "__import__",
    "getattr",
    "setattr",
    "delattr",
    "dir",
    "id",
    "hash",
    "object",
    "super",
    "staticmethod",
    "classmethod",
    "property",
    "memoryview",
    "bytearray",
    "bytes",
    "next",
    "format",
    "exit",
    "quit",
    "help",
    "breakpoint",
];

/// Builds the builtin namespace for one evaluation.
pub fn restricted_builtins() -> HashMap<String, Value> {
    let mut table = HashMap::new();
    let natives: &[(&str, NativeFn)] = &[
        ("abs", bi_abs),
        ("all", bi_all),
        ("any", bi_any),
        ("bool", bi_bool),
        ("callable", bi_callable),
        ("chr", bi_chr),
        ("dict", bi_dict),
        ("divmod", bi_divmod),
        ("enumerate", bi_enumerate),
        ("filter", bi_filter),
        ("float", bi_float),
        ("frozenset", bi_set),
        ("hasattr", bi_hasattr),
        ("int", bi_int),
        ("isinstance", bi_isinstance),
        ("iter", bi_iter),
        ("len", bi_len),
        ("list", bi_list),
        ("map", bi_map),
        ("max", bi_max),
        ("min", bi_min),
        ("ord", bi_ord),
        ("print", bi_print),
        ("range", bi_range),
        ("repr", bi_repr),
        ("reversed", bi_reversed),
        ("round", bi_round),
        ("set", bi_set),
        ("slice", bi_slice),
        ("sorted", bi_sorted),
        ("str", bi_str),
        ("sum", bi_sum),
        ("tuple", bi_tuple),
        ("type", bi_type),
        ("zip", bi_zip),
    ];
    for (name, f) in natives {
        table.insert(name.to_string(), native(name, *f));
    }
    for name in STUBBED {
        table.insert(
            name.to_string(),
            Value::Builtin(Rc::new(Builtin {
                name: (*name).into(),
                imp: BuiltinImpl::Stub,
            })),
        );
    }
    let exceptions = [
        ("Exception", RuntimeKind::Exception),
        ("TypeError", RuntimeKind::Type),
        ("NameError", RuntimeKind::Name),
        ("AttributeError", RuntimeKind::Attribute),
        ("KeyError", RuntimeKind::Key),
        ("IndexError", RuntimeKind::Index),
        ("ValueError", RuntimeKind::Value),
        ("ZeroDivisionError", RuntimeKind::ZeroDivision),
        ("OverflowError", RuntimeKind::Overflow),
    ];
    for (name, kind) in exceptions {
        table.insert(name.to_string(), Value::ExcType(kind));
    }
    table
}

fn native(name: &str, f: NativeFn) -> Value {
    Value::Builtin(Rc::new(Builtin {
        name: name.into(),
        imp: BuiltinImpl::Native(f),
    }))
}

fn no_kwargs(name: &str, kwargs: &[(String, Value)]) -> Result<(), EvalError> {
    if kwargs.is_empty() {
        Ok(())
    } else {
        Err(EvalError::type_error(format!(
            "{name}() takes no keyword arguments"
        )))
    }
}

fn exactly(name: &str, args: &[Value], n: usize) -> Result<(), EvalError> {
    if args.len() == n {
        Ok(())
    } else {
        Err(EvalError::type_error(format!(
            "{name}() takes exactly {n} argument{} ({} given)",
            if n == 1 { "" } else { "s" },
            args.len()
        )))
    }
}

fn at_most_one(name: &str, args: &[Value]) -> Result<Option<Value>, EvalError> {
    match args.len() {
        0 => Ok(None),
        1 => Ok(Some(args[0].clone())),
        n => Err(EvalError::type_error(format!(
            "{name}() takes at most 1 argument ({n} given)"
        ))),
    }
}

fn materialize(interp: &Interp, v: &Value) -> Result<Vec<Value>, EvalError> {
    GuardedIter::new(v, interp.deadline())?.collect()
}

fn bi_abs(_: &mut Interp, args: Vec<Value>, kw: Vec<(String, Value)>) -> Result<Value, EvalError> {
    no_kwargs("abs", &kw)?;
    exactly("abs", &args, 1)?;
    match args[0].as_number() {
        Some(Num::Int(n)) => n
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| EvalError::Runtime(RuntimeError::new(
                RuntimeKind::Overflow,
                "abs result out of range",
            ))),
        Some(Num::Float(f)) => Ok(Value::Float(f.abs())),
        None => Err(EvalError::type_error(format!(
            "bad operand type for abs(): '{}'",
            args[0].type_name()
        ))),
    }
}

fn bi_all(i: &mut Interp, args: Vec<Value>, kw: Vec<(String, Value)>) -> Result<Value, EvalError> {
    no_kwargs("all", &kw)?;
    exactly("all", &args, 1)?;
    let mut iter = GuardedIter::new(&args[0], i.deadline())?;
    while let Some(v) = iter.next()? {
        if !v.truthy() {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn bi_any(i: &mut Interp, args: Vec<Value>, kw: Vec<(String, Value)>) -> Result<Value, EvalError> {
    no_kwargs("any", &kw)?;
    exactly("any", &args, 1)?;
    let mut iter = GuardedIter::new(&args[0], i.deadline())?;
    while let Some(v) = iter.next()? {
        if v.truthy() {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn bi_bool(_: &mut Interp, args: Vec<Value>, kw: Vec<(String, Value)>) -> Result<Value, EvalError> {
    no_kwargs("bool", &kw)?;
    Ok(Value::Bool(
        at_most_one("bool", &args)?.is_some_and(|v| v.truthy()),
    ))
}

fn bi_callable(
    _: &mut Interp,
    args: Vec<Value>,
    kw: Vec<(String, Value)>,
) -> Result<Value, EvalError> {
    no_kwargs("callable", &kw)?;
    exactly("callable", &args, 1)?;
    Ok(Value::Bool(matches!(
        args[0],
        Value::Function(_) | Value::Builtin(_) | Value::Method(_) | Value::Class(_) | Value::ExcType(_)
    )))
}

fn bi_chr(_: &mut Interp, args: Vec<Value>, kw: Vec<(String, Value)>) -> Result<Value, EvalError> {
    no_kwargs("chr", &kw)?;
    exactly("chr", &args, 1)?;
    let code = args[0].as_index("chr() argument")?;
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(|c| Value::str(c.to_string()))
        .ok_or_else(|| EvalError::value_error("chr() arg not in range(0x110000)"))
}

fn bi_ord(_: &mut Interp, args: Vec<Value>, kw: Vec<(String, Value)>) -> Result<Value, EvalError> {
    no_kwargs("ord", &kw)?;
    exactly("ord", &args, 1)?;
    match &args[0] {
        Value::Str(s) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Int(c as i64)),
                _ => Err(EvalError::type_error(format!(
                    "ord() expected a character, but string of length {} found",
                    s.chars().count()
                ))),
            }
        }
        other => Err(EvalError::type_error(format!(
            "ord() expected string, got '{}'",
            other.type_name()
        ))),
    }
}

fn bi_dict(i: &mut Interp, args: Vec<Value>, kw: Vec<(String, Value)>) -> Result<Value, EvalError> {
    let mut out = Dict::new();
    match args.len() {
        0 => {}
        1 => match &args[0] {
            Value::Dict(src) => operators::dict_update(&mut out, &src.borrow()),
            other => {
                // An iterable of key/value pairs.
                for pair in materialize(i, other)? {
                    let items = materialize(i, &pair)?;
                    if items.len() != 2 {
                        return Err(EvalError::value_error(format!(
                            "dictionary update sequence element has length {}; 2 is required",
                            items.len()
                        )));
                    }
                    let mut it = items.into_iter();
                    let key = it.next().unwrap();
                    if !key.is_hashable() {
                        return Err(EvalError::type_error(format!(
                            "unhashable type: '{}'",
                            key.type_name()
                        )));
                    }
                    out.insert(key, it.next().unwrap());
                }
            }
        },
        n => {
            return Err(EvalError::type_error(format!(
                "dict expected at most 1 positional argument, got {n}"
            )))
        }
    }
    for (name, value) in kw {
        out.insert(Value::str(name), value);
    }
    Ok(Value::Dict(Rc::new(RefCell::new(out))))
}

fn bi_divmod(
    i: &mut Interp,
    args: Vec<Value>,
    kw: Vec<(String, Value)>,
) -> Result<Value, EvalError> {
    no_kwargs("divmod", &kw)?;
    exactly("divmod", &args, 2)?;
    let q = operators::binary(BinOp::FloorDiv, &args[0], &args[1], i.limits())?;
    let r = operators::binary(BinOp::Mod, &args[0], &args[1], i.limits())?;
    Ok(Value::tuple(vec![q, r]))
}

fn bi_enumerate(
    i: &mut Interp,
    args: Vec<Value>,
    kw: Vec<(String, Value)>,
) -> Result<Value, EvalError> {
    no_kwargs("enumerate", &kw)?;
    let (iterable, start) = match args.len() {
        1 => (args[0].clone(), 0),
        2 => (args[0].clone(), args[1].as_index("enumerate start")?),
        n => {
            return Err(EvalError::type_error(format!(
                "enumerate() takes 1 or 2 arguments ({n} given)"
            )))
        }
    };
    let items = materialize(i, &iterable)?;
    Ok(Value::list(
        items
            .into_iter()
            .enumerate()
            .map(|(idx, v)| Value::tuple(vec![Value::Int(start + idx as i64), v]))
            .collect(),
    ))
}

fn bi_filter(
    i: &mut Interp,
    args: Vec<Value>,
    kw: Vec<(String, Value)>,
) -> Result<Value, EvalError> {
    no_kwargs("filter", &kw)?;
    exactly("filter", &args, 2)?;
    let func = args[0].clone();
    let mut out = Vec::new();
    let mut iter = GuardedIter::new(&args[1], i.deadline())?;
    while let Some(v) = iter.next()? {
        let keep = match &func {
            Value::None => v.truthy(),
            f => i.call_value(f.clone(), vec![v.clone()], vec![])?.truthy(),
        };
        if keep {
            out.push(v);
        }
    }
    Ok(Value::list(out))
}

fn bi_float(
    _: &mut Interp,
    args: Vec<Value>,
    kw: Vec<(String, Value)>,
) -> Result<Value, EvalError> {
    no_kwargs("float", &kw)?;
    let Some(v) = at_most_one("float", &args)? else {
        return Ok(Value::Float(0.0));
    };
    match &v {
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| {
                EvalError::value_error(format!(
                    "could not convert string to float: {}",
                    v.repr()
                ))
            }),
        other => match other.as_number() {
            Some(n) => Ok(Value::Float(to_f64(n))),
            None => Err(EvalError::type_error(format!(
                "float() argument must be a string or a number, not '{}'",
                other.type_name()
            ))),
        },
    }
}

fn bi_int(_: &mut Interp, args: Vec<Value>, kw: Vec<(String, Value)>) -> Result<Value, EvalError> {
    no_kwargs("int", &kw)?;
    match args.len() {
        0 => Ok(Value::Int(0)),
        1 => match &args[0] {
            Value::Str(s) => parse_int(s.trim(), 10),
            other => match other.as_number() {
                Some(Num::Int(n)) => Ok(Value::Int(n)),
                Some(Num::Float(f)) => {
                    if f.is_finite() && f.abs() < i64::MAX as f64 {
                        Ok(Value::Int(f.trunc() as i64))
                    } else {
                        Err(EvalError::value_error(
                            "cannot convert float to integer",
                        ))
                    }
                }
                None => Err(EvalError::type_error(format!(
                    "int() argument must be a string or a number, not '{}'",
                    other.type_name()
                ))),
            },
        },
        2 => {
            let base = args[1].as_index("int() base")?;
            if !(2..=36).contains(&base) {
                return Err(EvalError::value_error("int() base must be >= 2 and <= 36"));
            }
            match &args[0] {
                Value::Str(s) => parse_int(s.trim(), base as u32),
                _ => Err(EvalError::type_error(
                    "int() can't convert non-string with explicit base",
                )),
            }
        }
        n => Err(EvalError::type_error(format!(
            "int() takes at most 2 arguments ({n} given)"
        ))),
    }
}

fn parse_int(s: &str, base: u32) -> Result<Value, EvalError> {
    i64::from_str_radix(s, base)
        .map(Value::Int)
        .map_err(|_| {
            EvalError::value_error(format!(
                "invalid literal for int() with base {base}: '{s}'"
            ))
        })
}

fn bi_hasattr(
    i: &mut Interp,
    args: Vec<Value>,
    kw: Vec<(String, Value)>,
) -> Result<Value, EvalError> {
    no_kwargs("hasattr", &kw)?;
    exactly("hasattr", &args, 2)?;
    let name = match &args[1] {
        Value::Str(s) => s.clone(),
        other => {
            return Err(EvalError::type_error(format!(
                "attribute name must be string, not '{}'",
                other.type_name()
            )))
        }
    };
    match guarded_getattr(i.policy(), &args[0], &name) {
        Ok(_) => Ok(Value::Bool(true)),
        Err(EvalError::Runtime(e)) if e.kind == RuntimeKind::Attribute => Ok(Value::Bool(false)),
        // A denied name stays denied; hasattr is not a probe around the
        // policy.
        Err(other) => Err(other),
    }
}

fn bi_isinstance(
    _: &mut Interp,
    args: Vec<Value>,
    kw: Vec<(String, Value)>,
) -> Result<Value, EvalError> {
    no_kwargs("isinstance", &kw)?;
    exactly("isinstance", &args, 2)?;
    Ok(Value::Bool(isinstance(&args[0], &args[1])?))
}

fn isinstance(obj: &Value, class: &Value) -> Result<bool, EvalError> {
    match class {
        Value::Tuple(options) => {
            for option in options.iter() {
                if isinstance(obj, option)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Builtin(b) => Ok(match (&*b.name, obj) {
            // bool is a subtype of int.
            ("int", Value::Bool(_)) => true,
            (name, _) => name == obj.type_name(),
        }),
        Value::Class(c) => match obj {
            Value::Instance(inst) => Ok(class_isa(&inst.class, c)),
            _ => Ok(false),
        },
        Value::ExcType(kind) => match obj {
            Value::Exception(e) => {
                Ok(*kind == RuntimeKind::Exception || e.kind == *kind)
            }
            _ => Ok(false),
        },
        other => Err(EvalError::type_error(format!(
            "isinstance() arg 2 must be a type or tuple of types, not '{}'",
            other.type_name()
        ))),
    }
}

fn class_isa(class: &Rc<crate::runtime::value::Class>, target: &Rc<crate::runtime::value::Class>) -> bool {
    Rc::ptr_eq(class, target) || class.bases.iter().any(|b| class_isa(b, target))
}

fn bi_iter(i: &mut Interp, args: Vec<Value>, kw: Vec<(String, Value)>) -> Result<Value, EvalError> {
    no_kwargs("iter", &kw)?;
    exactly("iter", &args, 1)?;
    Ok(Value::list(materialize(i, &args[0])?))
}

fn bi_len(_: &mut Interp, args: Vec<Value>, kw: Vec<(String, Value)>) -> Result<Value, EvalError> {
    no_kwargs("len", &kw)?;
    exactly("len", &args, 1)?;
    let len = match &args[0] {
        Value::Str(s) => s.chars().count() as i64,
        Value::Tuple(t) => t.len() as i64,
        Value::List(l) => l.borrow().len() as i64,
        Value::Dict(d) => d.borrow().len() as i64,
        Value::Set(s) => s.borrow().len() as i64,
        Value::Range(r) => r.len(),
        other => {
            return Err(EvalError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    Ok(Value::Int(len))
}

fn bi_list(i: &mut Interp, args: Vec<Value>, kw: Vec<(String, Value)>) -> Result<Value, EvalError> {
    no_kwargs("list", &kw)?;
    match at_most_one("list", &args)? {
        None => Ok(Value::list(vec![])),
        Some(v) => Ok(Value::list(materialize(i, &v)?)),
    }
}

fn bi_tuple(
    i: &mut Interp,
    args: Vec<Value>,
    kw: Vec<(String, Value)>,
) -> Result<Value, EvalError> {
    no_kwargs("tuple", &kw)?;
    match at_most_one("tuple", &args)? {
        None => Ok(Value::tuple(vec![])),
        Some(Value::Tuple(t)) => Ok(Value::Tuple(t)),
        Some(v) => Ok(Value::tuple(materialize(i, &v)?)),
    }
}

fn bi_set(i: &mut Interp, args: Vec<Value>, kw: Vec<(String, Value)>) -> Result<Value, EvalError> {
    no_kwargs("set", &kw)?;
    let mut out = Set::new();
    if let Some(v) = at_most_one("set", &args)? {
        for item in materialize(i, &v)? {
            if !item.is_hashable() {
                return Err(EvalError::type_error(format!(
                    "unhashable type: '{}'",
                    item.type_name()
                )));
            }
            out.add(item);
        }
    }
    Ok(Value::Set(Rc::new(RefCell::new(out))))
}

fn bi_map(i: &mut Interp, args: Vec<Value>, kw: Vec<(String, Value)>) -> Result<Value, EvalError> {
    no_kwargs("map", &kw)?;
    if args.len() < 2 {
        return Err(EvalError::type_error("map() must have at least two arguments"));
    }
    let func = args[0].clone();
    let columns: Vec<Vec<Value>> = args[1..]
        .iter()
        .map(|v| materialize(i, v))
        .collect::<Result<_, _>>()?;
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(rows);
    for row in 0..rows {
        let call_args: Vec<Value> = columns.iter().map(|col| col[row].clone()).collect();
        out.push(i.call_value(func.clone(), call_args, vec![])?);
    }
    Ok(Value::list(out))
}

fn bi_zip(i: &mut Interp, args: Vec<Value>, kw: Vec<(String, Value)>) -> Result<Value, EvalError> {
    no_kwargs("zip", &kw)?;
    let columns: Vec<Vec<Value>> = args
        .iter()
        .map(|v| materialize(i, v))
        .collect::<Result<_, _>>()?;
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(rows);
    for row in 0..rows {
        out.push(Value::tuple(
            columns.iter().map(|col| col[row].clone()).collect(),
        ));
    }
    Ok(Value::list(out))
}

fn bi_max(i: &mut Interp, args: Vec<Value>, kw: Vec<(String, Value)>) -> Result<Value, EvalError> {
    extremum(i, "max", args, kw, Ordering::Greater)
}

fn bi_min(i: &mut Interp, args: Vec<Value>, kw: Vec<(String, Value)>) -> Result<Value, EvalError> {
    extremum(i, "min", args, kw, Ordering::Less)
}

fn extremum(
    i: &mut Interp,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    want: Ordering,
) -> Result<Value, EvalError> {
    let mut key = None;
    for (kw, v) in kwargs {
        match kw.as_str() {
            "key" => key = Some(v),
            other => {
                return Err(EvalError::type_error(format!(
                    "'{other}' is an invalid keyword argument for {name}()"
                )))
            }
        }
    }
    let candidates = match args.len() {
        0 => {
            return Err(EvalError::type_error(format!(
                "{name} expected at least 1 argument, got 0"
            )))
        }
        1 => materialize(i, &args[0])?,
        _ => args,
    };
    if candidates.is_empty() {
        return Err(EvalError::value_error(format!("{name}() arg is an empty sequence")));
    }
    let mut best: Option<(Value, Value)> = None;
    for v in candidates {
        let k = match &key {
            Some(f) if !matches!(f, Value::None) => {
                i.call_value(f.clone(), vec![v.clone()], vec![])?
            }
            _ => v.clone(),
        };
        best = match best {
            None => Some((k, v)),
            Some((bk, bv)) => {
                let ord = operators::ordering(&k, &bk).ok_or_else(|| {
                    EvalError::type_error(format!(
                        "'>' not supported between instances of '{}' and '{}'",
                        k.type_name(),
                        bk.type_name()
                    ))
                })?;
                if ord == want {
                    Some((k, v))
                } else {
                    Some((bk, bv))
                }
            }
        };
    }
    Ok(best.map(|(_, v)| v).unwrap_or(Value::None))
}

fn bi_print(
    _: &mut Interp,
    args: Vec<Value>,
    kw: Vec<(String, Value)>,
) -> Result<Value, EvalError> {
    no_kwargs("print", &kw)?;
    let line = args
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    tracing::debug!(target: "cordon::print", "{line}");
    Ok(Value::None)
}

/// Ranges are lazy values; constructing one is O(1) no matter the span.
fn bi_range(
    _: &mut Interp,
    args: Vec<Value>,
    kw: Vec<(String, Value)>,
) -> Result<Value, EvalError> {
    no_kwargs("range", &kw)?;
    let (start, stop, step) = match args.len() {
        1 => (0, args[0].as_index("range() stop")?, 1),
        2 => (
            args[0].as_index("range() start")?,
            args[1].as_index("range() stop")?,
            1,
        ),
        3 => {
            let step = args[2].as_index("range() step")?;
            if step == 0 {
                return Err(EvalError::value_error("range() arg 3 must not be zero"));
            }
            (
                args[0].as_index("range() start")?,
                args[1].as_index("range() stop")?,
                step,
            )
        }
        n => {
            return Err(EvalError::type_error(format!(
                "range expected 1 to 3 arguments, got {n}"
            )))
        }
    };
    Ok(Value::Range(Range { start, stop, step }))
}

fn bi_repr(_: &mut Interp, args: Vec<Value>, kw: Vec<(String, Value)>) -> Result<Value, EvalError> {
    no_kwargs("repr", &kw)?;
    exactly("repr", &args, 1)?;
    Ok(Value::str(args[0].repr()))
}

fn bi_reversed(
    i: &mut Interp,
    args: Vec<Value>,
    kw: Vec<(String, Value)>,
) -> Result<Value, EvalError> {
    no_kwargs("reversed", &kw)?;
    exactly("reversed", &args, 1)?;
    let mut items = materialize(i, &args[0])?;
    items.reverse();
    Ok(Value::list(items))
}

fn bi_round(
    _: &mut Interp,
    args: Vec<Value>,
    kw: Vec<(String, Value)>,
) -> Result<Value, EvalError> {
    no_kwargs("round", &kw)?;
    let (value, ndigits) = match args.len() {
        1 => (args[0].clone(), None),
        2 => match &args[1] {
            Value::None => (args[0].clone(), None),
            v => (args[0].clone(), Some(v.as_index("round() ndigits")?)),
        },
        n => {
            return Err(EvalError::type_error(format!(
                "round() takes 1 or 2 arguments ({n} given)"
            )))
        }
    };
    match (value.as_number(), ndigits) {
        (Some(Num::Int(n)), _) => Ok(Value::Int(n)),
        (Some(Num::Float(f)), None) => {
            let r = f.round_ties_even();
            if r.is_finite() && r.abs() < i64::MAX as f64 {
                Ok(Value::Int(r as i64))
            } else {
                Err(EvalError::value_error(
                    "cannot convert float infinity or NaN to integer",
                ))
            }
        }
        (Some(Num::Float(f)), Some(nd)) => {
            if !f.is_finite() {
                return Ok(Value::Float(f));
            }
            Ok(Value::Float(round_to_digits(f, nd)))
        }
        (None, _) => Err(EvalError::type_error(format!(
            "type {} doesn't define a rounding rule",
            value.type_name()
        ))),
    }
}

// Rounds on the decimal expansion of the exact binary value, ties to even.
// Scaling by a power of ten first would misplace near-tie inputs whose
// nearest double sits just below the tie, like 2.675 at two digits.
fn round_to_digits(f: f64, ndigits: i64) -> f64 {
    if ndigits >= 323 {
        return f;
    }
    if ndigits < -308 {
        return 0.0 * f.signum();
    }
    if ndigits >= 0 {
        format!("{f:.*}", ndigits as usize).parse().unwrap_or(f)
    } else {
        let factor = 10f64.powi(-ndigits as i32);
        format!("{:.0}", f / factor)
            .parse::<f64>()
            .map(|q| q * factor)
            .unwrap_or(f)
    }
}

fn bi_slice(
    _: &mut Interp,
    args: Vec<Value>,
    kw: Vec<(String, Value)>,
) -> Result<Value, EvalError> {
    no_kwargs("slice", &kw)?;
    let part = |v: &Value| -> Result<Option<i64>, EvalError> {
        match v {
            Value::None => Ok(None),
            other => other.as_index("slice component").map(Some),
        }
    };
    let (start, stop, step) = match args.len() {
        1 => (None, part(&args[0])?, None),
        2 => (part(&args[0])?, part(&args[1])?, None),
        3 => (part(&args[0])?, part(&args[1])?, part(&args[2])?),
        n => {
            return Err(EvalError::type_error(format!(
                "slice expected 1 to 3 arguments, got {n}"
            )))
        }
    };
    Ok(Value::Slice(Rc::new(SliceValue { start, stop, step })))
}

fn bi_sorted(
    i: &mut Interp,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value, EvalError> {
    exactly("sorted", &args, 1)?;
    let mut key = None;
    let mut reverse = false;
    for (kw, v) in kwargs {
        match kw.as_str() {
            "key" => key = Some(v),
            "reverse" => reverse = v.truthy(),
            other => {
                return Err(EvalError::type_error(format!(
                    "'{other}' is an invalid keyword argument for sorted()"
                )))
            }
        }
    }
    let items = materialize(i, &args[0])?;
    Ok(Value::list(sort_values(i, items, key, reverse)?))
}

fn bi_str(_: &mut Interp, args: Vec<Value>, kw: Vec<(String, Value)>) -> Result<Value, EvalError> {
    no_kwargs("str", &kw)?;
    match at_most_one("str", &args)? {
        None => Ok(Value::str("")),
        Some(Value::Float(f)) => Ok(Value::str(format_float(f))),
        Some(v) => Ok(Value::str(v.to_string())),
    }
}

fn bi_sum(i: &mut Interp, args: Vec<Value>, kw: Vec<(String, Value)>) -> Result<Value, EvalError> {
    no_kwargs("sum", &kw)?;
    let (iterable, start) = match args.len() {
        1 => (args[0].clone(), Value::Int(0)),
        2 => (args[0].clone(), args[1].clone()),
        n => {
            return Err(EvalError::type_error(format!(
                "sum() takes 1 or 2 arguments ({n} given)"
            )))
        }
    };
    if matches!(start, Value::Str(_)) {
        return Err(EvalError::type_error(
            "sum() can't sum strings (use ''.join(seq) instead)",
        ));
    }
    let mut total = start;
    let mut iter = GuardedIter::new(&iterable, i.deadline())?;
    while let Some(v) = iter.next()? {
        total = operators::guarded_add(&total, &v, i.limits())?;
    }
    Ok(total)
}

fn bi_type(_: &mut Interp, args: Vec<Value>, kw: Vec<(String, Value)>) -> Result<Value, EvalError> {
    no_kwargs("type", &kw)?;
    exactly("type", &args, 1)?;
    Ok(match &args[0] {
        Value::Instance(inst) => Value::Class(inst.class.clone()),
        Value::Exception(e) => Value::ExcType(e.kind),
        other => {
            let name = other.type_name();
            let imp = match name {
                "int" => BuiltinImpl::Native(bi_int as NativeFn),
                "float" => BuiltinImpl::Native(bi_float as NativeFn),
                "str" => BuiltinImpl::Native(bi_str as NativeFn),
                "bool" => BuiltinImpl::Native(bi_bool as NativeFn),
                "list" => BuiltinImpl::Native(bi_list as NativeFn),
                "tuple" => BuiltinImpl::Native(bi_tuple as NativeFn),
                "dict" => BuiltinImpl::Native(bi_dict as NativeFn),
                "set" => BuiltinImpl::Native(bi_set as NativeFn),
                "range" => BuiltinImpl::Native(bi_range as NativeFn),
                "slice" => BuiltinImpl::Native(bi_slice as NativeFn),
                _ => BuiltinImpl::Stub,
            };
            Value::Builtin(Rc::new(Builtin {
                name: name.into(),
                imp,
            }))
        }
    })
}
