//! Methods on the built-in types.
//!
//! A bound method is just a receiver plus a name; dispatch happens here at
//! call time. Anything not listed is unreachable, since the guarded
//! attribute read refuses to produce a bound method for unknown names.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use crate::runtime::env::Deadline;
use crate::runtime::error::EvalError;
use crate::runtime::eval::Interp;
use crate::runtime::guards::{check_key, GuardedIter};
use crate::runtime::operators;
use crate::runtime::value::{py_eq, Dict, Set, Value};

const STR_METHODS: &[&str] = &[
    "upper",
    "lower",
    "capitalize",
    "title",
    "strip",
    "lstrip",
    "rstrip",
    "split",
    "join",
    "replace",
    "startswith",
    "endswith",
    "find",
    "index",
    "count",
    "isdigit",
    "isalpha",
    "isalnum",
    "isspace",
    "isupper",
    "islower",
];

const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "index", "count", "sort", "reverse", "clear",
    "copy",
];

const DICT_METHODS: &[&str] = &[
    "get",
    "keys",
    "values",
    "items",
    "pop",
    "popitem",
    "setdefault",
    "update",
    "clear",
    "copy",
];

const SET_METHODS: &[&str] = &[
    "add",
    "discard",
    "remove",
    "clear",
    "copy",
    "union",
    "intersection",
    "difference",
    "update",
    "issubset",
    "issuperset",
];

const TUPLE_METHODS: &[&str] = &["count", "index"];

pub fn has_method(value: &Value, name: &str) -> bool {
    let table: &[&str] = match value {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        _ => return false,
    };
    table.contains(&name)
}

pub fn call_method(
    interp: &mut Interp,
    recv: &Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value, EvalError> {
    if !kwargs.is_empty() && !(matches!(recv, Value::List(_)) && name == "sort") {
        return Err(EvalError::type_error(format!(
            "{name}() takes no keyword arguments"
        )));
    }
    match recv {
        Value::Str(s) => str_method(s, name, args, interp.deadline()),
        Value::List(items) => list_method(interp, items, name, args, kwargs),
        Value::Dict(d) => dict_method(interp, d, name, args),
        Value::Set(s) => set_method(s, name, args, interp.deadline()),
        Value::Tuple(items) => seq_search(items, name, args),
        other => Err(EvalError::attribute_error(other.type_name(), name)),
    }
}

fn str_method(
    s: &Rc<str>,
    name: &str,
    args: Vec<Value>,
    deadline: Deadline,
) -> Result<Value, EvalError> {
    match name {
        "upper" => no_args(name, &args).map(|()| Value::str(s.to_uppercase())),
        "lower" => no_args(name, &args).map(|()| Value::str(s.to_lowercase())),
        "capitalize" => no_args(name, &args).map(|()| {
            let mut chars = s.chars();
            match chars.next() {
                Some(first) => Value::str(
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                ),
                None => Value::str(""),
            }
        }),
        "title" => no_args(name, &args).map(|()| {
            let mut out = String::with_capacity(s.len());
            let mut at_word_start = true;
            for c in s.chars() {
                if c.is_alphabetic() {
                    if at_word_start {
                        out.extend(c.to_uppercase());
                    } else {
                        out.extend(c.to_lowercase());
                    }
                    at_word_start = false;
                } else {
                    out.push(c);
                    at_word_start = true;
                }
            }
            Value::str(out)
        }),
        "strip" | "lstrip" | "rstrip" => {
            let trimmed = match args.first() {
                None | Some(Value::None) => match name {
                    "strip" => s.trim().to_string(),
                    "lstrip" => s.trim_start().to_string(),
                    _ => s.trim_end().to_string(),
                },
                Some(Value::Str(set)) => {
                    let set: Vec<char> = set.chars().collect();
                    match name {
                        "strip" => s.trim_matches(|c| set.contains(&c)).to_string(),
                        "lstrip" => s.trim_start_matches(|c| set.contains(&c)).to_string(),
                        _ => s.trim_end_matches(|c| set.contains(&c)).to_string(),
                    }
                }
                Some(other) => {
                    return Err(EvalError::type_error(format!(
                        "{name} arg must be a string, not '{}'",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::str(trimmed))
        }
        "split" => match args.first() {
            None | Some(Value::None) => Ok(Value::list(
                s.split_whitespace().map(Value::str).collect(),
            )),
            Some(Value::Str(sep)) if !sep.is_empty() => {
                Ok(Value::list(s.split(&**sep).map(Value::str).collect()))
            }
            Some(Value::Str(_)) => Err(EvalError::value_error("empty separator")),
            Some(other) => Err(EvalError::type_error(format!(
                "must be str or None, not '{}'",
                other.type_name()
            ))),
        },
        "join" => {
            let iterable = one_arg(name, args)?;
            let parts = GuardedIter::new(&iterable, deadline)?.collect()?;
            let mut out = String::new();
            for (i, part) in parts.iter().enumerate() {
                match part {
                    Value::Str(p) => {
                        if i > 0 {
                            out.push_str(s);
                        }
                        out.push_str(p);
                    }
                    other => {
                        return Err(EvalError::type_error(format!(
                            "sequence item {i}: expected str instance, {} found",
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(Value::str(out))
        }
        "replace" => {
            let (from, to) = two_args(name, args)?;
            match (&from, &to) {
                (Value::Str(from), Value::Str(to)) => {
                    Ok(Value::str(s.replace(&**from, to)))
                }
                _ => Err(EvalError::type_error("replace arguments must be str")),
            }
        }
        "startswith" | "endswith" => {
            let prefix = one_arg(name, args)?;
            match &prefix {
                Value::Str(p) => Ok(Value::Bool(if name == "startswith" {
                    s.starts_with(&**p)
                } else {
                    s.ends_with(&**p)
                })),
                Value::Tuple(options) => {
                    for opt in options.iter() {
                        match opt {
                            Value::Str(p) => {
                                let hit = if name == "startswith" {
                                    s.starts_with(&**p)
                                } else {
                                    s.ends_with(&**p)
                                };
                                if hit {
                                    return Ok(Value::Bool(true));
                                }
                            }
                            other => {
                                return Err(EvalError::type_error(format!(
                                    "tuple for {name} must only contain str, not '{}'",
                                    other.type_name()
                                )))
                            }
                        }
                    }
                    Ok(Value::Bool(false))
                }
                other => Err(EvalError::type_error(format!(
                    "{name} first arg must be str or a tuple of str, not '{}'",
                    other.type_name()
                ))),
            }
        }
        "find" | "index" => {
            let needle = one_arg(name, args)?;
            let needle = match &needle {
                Value::Str(n) => n.clone(),
                other => {
                    return Err(EvalError::type_error(format!(
                        "must be str, not '{}'",
                        other.type_name()
                    )))
                }
            };
            // Byte offsets and character offsets agree only for ASCII, so
            // search over chars.
            let chars: Vec<char> = s.chars().collect();
            let pattern: Vec<char> = needle.chars().collect();
            let found = (0..=chars.len().saturating_sub(pattern.len()))
                .find(|&i| chars[i..i + pattern.len()] == pattern[..]);
            match (found, name) {
                (Some(i), _) => Ok(Value::Int(i as i64)),
                (None, "find") => Ok(Value::Int(-1)),
                (None, _) => Err(EvalError::value_error("substring not found")),
            }
        }
        "count" => {
            let needle = one_arg(name, args)?;
            match &needle {
                Value::Str(n) if !n.is_empty() => {
                    Ok(Value::Int(s.matches(&**n).count() as i64))
                }
                Value::Str(_) => Ok(Value::Int(s.chars().count() as i64 + 1)),
                other => Err(EvalError::type_error(format!(
                    "must be str, not '{}'",
                    other.type_name()
                ))),
            }
        }
        "isdigit" => char_class(s, name, &args, |c| c.is_ascii_digit()),
        "isalpha" => char_class(s, name, &args, char::is_alphabetic),
        "isalnum" => char_class(s, name, &args, char::is_alphanumeric),
        "isspace" => char_class(s, name, &args, char::is_whitespace),
        "isupper" => no_args(name, &args).map(|()| {
            let has_cased = s.chars().any(char::is_alphabetic);
            Value::Bool(has_cased && !s.chars().any(char::is_lowercase))
        }),
        "islower" => no_args(name, &args).map(|()| {
            let has_cased = s.chars().any(char::is_alphabetic);
            Value::Bool(has_cased && !s.chars().any(char::is_uppercase))
        }),
        _ => Err(EvalError::attribute_error("str", name)),
    }
}

fn char_class(
    s: &str,
    name: &str,
    args: &[Value],
    pred: fn(char) -> bool,
) -> Result<Value, EvalError> {
    no_args(name, args)?;
    Ok(Value::Bool(!s.is_empty() && s.chars().all(pred)))
}

fn list_method(
    interp: &mut Interp,
    items: &Rc<RefCell<Vec<Value>>>,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value, EvalError> {
    match name {
        "append" => {
            let v = one_arg(name, args)?;
            interp.check_growth(items.borrow().len() + 1)?;
            items.borrow_mut().push(v);
            Ok(Value::None)
        }
        "extend" => {
            let iterable = one_arg(name, args)?;
            let new = GuardedIter::new(&iterable, interp.deadline())?.collect()?;
            interp.check_growth(items.borrow().len() + new.len())?;
            items.borrow_mut().extend(new);
            Ok(Value::None)
        }
        "insert" => {
            let (pos, v) = two_args(name, args)?;
            let mut items = items.borrow_mut();
            interp.check_growth(items.len() + 1)?;
            let raw = pos.as_index("insert position")?;
            let len = items.len() as i64;
            let idx = if raw < 0 { (raw + len).max(0) } else { raw.min(len) };
            items.insert(idx as usize, v);
            Ok(Value::None)
        }
        "pop" => {
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(EvalError::index_error("pop from empty list"));
            }
            let raw = match args.first() {
                None => items.len() as i64 - 1,
                Some(v) => v.as_index("pop index")?,
            };
            let len = items.len() as i64;
            let idx = if raw < 0 { raw + len } else { raw };
            if idx < 0 || idx >= len {
                return Err(EvalError::index_error("pop index out of range"));
            }
            Ok(items.remove(idx as usize))
        }
        "remove" => {
            let v = one_arg(name, args)?;
            let mut items = items.borrow_mut();
            match items.iter().position(|x| py_eq(x, &v)) {
                Some(pos) => {
                    items.remove(pos);
                    Ok(Value::None)
                }
                None => Err(EvalError::value_error("list.remove(x): x not in list")),
            }
        }
        "index" | "count" => {
            let items = items.borrow();
            seq_search(&items, name, args)
        }
        "sort" => {
            let mut key = None;
            let mut reverse = false;
            for (kw, v) in kwargs {
                match kw.as_str() {
                    "key" => key = Some(v),
                    "reverse" => reverse = v.truthy(),
                    other => {
                        return Err(EvalError::type_error(format!(
                            "'{other}' is an invalid keyword argument for sort()"
                        )))
                    }
                }
            }
            let snapshot = items.borrow().clone();
            let sorted = sort_values(interp, snapshot, key, reverse)?;
            *items.borrow_mut() = sorted;
            Ok(Value::None)
        }
        "reverse" => {
            no_args(name, &args)?;
            items.borrow_mut().reverse();
            Ok(Value::None)
        }
        "clear" => {
            no_args(name, &args)?;
            items.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => {
            no_args(name, &args)?;
            let copy = items.borrow().clone();
            Ok(Value::list(copy))
        }
        _ => Err(EvalError::attribute_error("list", name)),
    }
}

/// `index`/`count` over any materialized sequence.
fn seq_search(items: &[Value], name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    let needle = one_arg(name, args)?;
    match name {
        "count" => Ok(Value::Int(
            items.iter().filter(|v| py_eq(v, &needle)).count() as i64,
        )),
        "index" => items
            .iter()
            .position(|v| py_eq(v, &needle))
            .map(|i| Value::Int(i as i64))
            .ok_or_else(|| EvalError::value_error(format!("{} is not in sequence", needle.repr()))),
        other => Err(EvalError::attribute_error("sequence", other)),
    }
}

/// Stable sort used by both `list.sort` and the `sorted` builtin.
pub fn sort_values(
    interp: &mut Interp,
    values: Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> Result<Vec<Value>, EvalError> {
    let mut decorated = Vec::with_capacity(values.len());
    for v in values {
        let k = match (&key, &v) {
            (Some(Value::None), _) | (None, _) => v.clone(),
            (Some(f), _) => interp.call_value(f.clone(), vec![v.clone()], vec![])?,
        };
        decorated.push((k, v));
    }
    let mut failed: Option<EvalError> = None;
    decorated.sort_by(|a, b| match operators::ordering(&a.0, &b.0) {
        Some(ord) => {
            if reverse {
                ord.reverse()
            } else {
                ord
            }
        }
        None => {
            if failed.is_none() {
                failed = Some(EvalError::type_error(format!(
                    "'<' not supported between instances of '{}' and '{}'",
                    a.0.type_name(),
                    b.0.type_name()
                )));
            }
            Ordering::Equal
        }
    });
    if let Some(err) = failed {
        return Err(err);
    }
    Ok(decorated.into_iter().map(|(_, v)| v).collect())
}

fn dict_method(
    interp: &mut Interp,
    d: &Rc<RefCell<Dict>>,
    name: &str,
    args: Vec<Value>,
) -> Result<Value, EvalError> {
    match name {
        "get" => {
            let (key, default) = arg_and_default(name, args)?;
            check_key(interp.policy(), &key)?;
            Ok(d.borrow().get(&key).cloned().unwrap_or(default))
        }
        "keys" => no_args(name, &args).map(|()| Value::list(d.borrow().keys())),
        "values" => no_args(name, &args).map(|()| Value::list(d.borrow().values())),
        "items" => no_args(name, &args).map(|()| {
            Value::list(
                d.borrow()
                    .iter()
                    .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            )
        }),
        "pop" => {
            let (key, default) = match args.len() {
                1 => (args.into_iter().next().unwrap(), None),
                2 => {
                    let mut it = args.into_iter();
                    (it.next().unwrap(), Some(it.next().unwrap()))
                }
                n => {
                    return Err(EvalError::type_error(format!(
                        "pop expected at most 2 arguments, got {n}"
                    )))
                }
            };
            check_key(interp.policy(), &key)?;
            match d.borrow_mut().remove(&key) {
                Some(v) => Ok(v),
                None => default.ok_or_else(|| EvalError::key_error(key.repr())),
            }
        }
        "popitem" => {
            no_args(name, &args)?;
            d.borrow_mut()
                .pop_last()
                .map(|(k, v)| Value::tuple(vec![k, v]))
                .ok_or_else(|| EvalError::key_error("'popitem(): dictionary is empty'".into()))
        }
        "setdefault" => {
            let (key, default) = arg_and_default(name, args)?;
            check_key(interp.policy(), &key)?;
            if !key.is_hashable() {
                return Err(EvalError::type_error(format!(
                    "unhashable type: '{}'",
                    key.type_name()
                )));
            }
            let mut d = d.borrow_mut();
            if let Some(v) = d.get(&key) {
                return Ok(v.clone());
            }
            d.insert(key, default.clone());
            Ok(default)
        }
        "update" => {
            let other = one_arg(name, args)?;
            match &other {
                Value::Dict(src) => {
                    if !Rc::ptr_eq(d, src) {
                        operators::dict_update(&mut d.borrow_mut(), &src.borrow());
                    }
                    Ok(Value::None)
                }
                other => Err(EvalError::type_error(format!(
                    "update argument must be a dict, not '{}'",
                    other.type_name()
                ))),
            }
        }
        "clear" => {
            no_args(name, &args)?;
            d.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => {
            no_args(name, &args)?;
            let mut out = Dict::new();
            operators::dict_update(&mut out, &d.borrow());
            Ok(Value::Dict(Rc::new(RefCell::new(out))))
        }
        _ => Err(EvalError::attribute_error("dict", name)),
    }
}

fn set_method(
    s: &Rc<RefCell<Set>>,
    name: &str,
    args: Vec<Value>,
    deadline: Deadline,
) -> Result<Value, EvalError> {
    match name {
        "add" => {
            let v = one_arg(name, args)?;
            if !v.is_hashable() {
                return Err(EvalError::type_error(format!(
                    "unhashable type: '{}'",
                    v.type_name()
                )));
            }
            s.borrow_mut().add(v);
            Ok(Value::None)
        }
        "discard" => {
            let v = one_arg(name, args)?;
            s.borrow_mut().discard(&v);
            Ok(Value::None)
        }
        "remove" => {
            let v = one_arg(name, args)?;
            if s.borrow_mut().discard(&v) {
                Ok(Value::None)
            } else {
                Err(EvalError::key_error(v.repr()))
            }
        }
        "clear" => {
            no_args(name, &args)?;
            s.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => {
            no_args(name, &args)?;
            let mut out = Set::new();
            for v in s.borrow().iter_slice() {
                out.add(v.clone());
            }
            Ok(Value::Set(Rc::new(RefCell::new(out))))
        }
        "union" | "intersection" | "difference" | "update" | "issubset" | "issuperset" => {
            let other = one_arg(name, args)?;
            let other_items = GuardedIter::new(&other, deadline)?.collect()?;
            let mut other_set = Set::new();
            for v in other_items {
                other_set.add(v);
            }
            let this = s.borrow();
            match name {
                "union" => {
                    let mut out = Set::new();
                    for v in this.iter_slice().iter().chain(other_set.iter_slice()) {
                        out.add(v.clone());
                    }
                    Ok(Value::Set(Rc::new(RefCell::new(out))))
                }
                "intersection" => {
                    let mut out = Set::new();
                    for v in this.iter_slice() {
                        if other_set.contains(v) {
                            out.add(v.clone());
                        }
                    }
                    Ok(Value::Set(Rc::new(RefCell::new(out))))
                }
                "difference" => {
                    let mut out = Set::new();
                    for v in this.iter_slice() {
                        if !other_set.contains(v) {
                            out.add(v.clone());
                        }
                    }
                    Ok(Value::Set(Rc::new(RefCell::new(out))))
                }
                "update" => {
                    drop(this);
                    let mut this = s.borrow_mut();
                    for v in other_set.iter_slice() {
                        this.add(v.clone());
                    }
                    Ok(Value::None)
                }
                "issubset" => Ok(Value::Bool(
                    this.iter_slice().iter().all(|v| other_set.contains(v)),
                )),
                "issuperset" => Ok(Value::Bool(
                    other_set.iter_slice().iter().all(|v| this.contains(v)),
                )),
                _ => unreachable!(),
            }
        }
        _ => Err(EvalError::attribute_error("set", name)),
    }
}

fn no_args(name: &str, args: &[Value]) -> Result<(), EvalError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(EvalError::type_error(format!(
            "{name}() takes no arguments ({} given)",
            args.len()
        )))
    }
}

fn one_arg(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    if args.len() == 1 {
        Ok(args.into_iter().next().unwrap())
    } else {
        Err(EvalError::type_error(format!(
            "{name}() takes exactly one argument ({} given)",
            args.len()
        )))
    }
}

fn two_args(name: &str, args: Vec<Value>) -> Result<(Value, Value), EvalError> {
    if args.len() == 2 {
        let mut it = args.into_iter();
        Ok((it.next().unwrap(), it.next().unwrap()))
    } else {
        Err(EvalError::type_error(format!(
            "{name}() takes exactly 2 arguments ({} given)",
            args.len()
        )))
    }
}

/// One required argument plus an optional default (which falls back to
/// `None`), the shape of `dict.get` and `dict.setdefault`.
fn arg_and_default(name: &str, args: Vec<Value>) -> Result<(Value, Value), EvalError> {
    match args.len() {
        1 => Ok((args.into_iter().next().unwrap(), Value::None)),
        2 => {
            let mut it = args.into_iter();
            Ok((it.next().unwrap(), it.next().unwrap()))
        }
        n => Err(EvalError::type_error(format!(
            "{name} expected at most 2 arguments, got {n}"
        ))),
    }
}
