//! Guarded data-access primitives.
//!
//! These are the runtime halves of the lowered IR nodes: iteration checks
//! the wall-clock budget on every step, attribute and subscript reads run
//! the name policy, and unpacking validates shape before binding.

use std::rc::Rc;

use crate::policy::NamePolicy;
use crate::rewriter::ir::UnpackSpec;
use crate::runtime::env::Deadline;
use crate::runtime::error::EvalError;
use crate::runtime::methods;
use crate::runtime::value::{BoundMethod, SliceValue, Value};

/// Iterator over any iterable value.
///
/// Holds a copy of the evaluation deadline, taken at construction, and
/// checks it on every `next` call. Mutable containers are snapshotted, so
/// mutating a list inside its own `for` body does not skip or repeat
/// elements.
pub struct GuardedIter {
    deadline: Deadline,
    state: IterState,
}

enum IterState {
    Items { items: Vec<Value>, idx: usize },
    Tuple { items: Rc<Vec<Value>>, idx: usize },
    Range { cur: i64, stop: i64, step: i64 },
}

impl GuardedIter {
    pub fn new(value: &Value, deadline: Deadline) -> Result<Self, EvalError> {
        let state = match value {
            Value::List(items) => IterState::Items {
                items: items.borrow().clone(),
                idx: 0,
            },
            Value::Tuple(items) => IterState::Tuple {
                items: items.clone(),
                idx: 0,
            },
            Value::Str(s) => IterState::Items {
                items: s.chars().map(|c| Value::str(c.to_string())).collect(),
                idx: 0,
            },
            Value::Dict(d) => IterState::Items {
                items: d.borrow().keys(),
                idx: 0,
            },
            Value::Set(s) => IterState::Items {
                items: s.borrow().iter_slice().to_vec(),
                idx: 0,
            },
            Value::Range(r) => IterState::Range {
                cur: r.start,
                stop: r.stop,
                step: r.step,
            },
            other => {
                return Err(EvalError::type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )))
            }
        };
        Ok(Self { deadline, state })
    }

    pub fn next(&mut self) -> Result<Option<Value>, EvalError> {
        self.deadline.check()?;
        Ok(match &mut self.state {
            IterState::Items { items, idx } => {
                let v = items.get(*idx).cloned();
                *idx += 1;
                v
            }
            IterState::Tuple { items, idx } => {
                let v = items.get(*idx).cloned();
                *idx += 1;
                v
            }
            IterState::Range { cur, stop, step } => {
                let exhausted = if *step > 0 { *cur >= *stop } else { *cur <= *stop };
                if exhausted {
                    None
                } else {
                    let v = *cur;
                    *cur += *step;
                    Some(Value::Int(v))
                }
            }
        })
    }

    /// Drains the iterator into a vector, still under the deadline.
    pub fn collect(mut self) -> Result<Vec<Value>, EvalError> {
        let mut out = Vec::new();
        while let Some(v) = self.next()? {
            out.push(v);
        }
        Ok(out)
    }
}

/// Materializes an iterable and checks it against an unpack plan's arity.
/// Nested plans are validated by the caller recursing per element.
pub fn guarded_unpack(
    value: &Value,
    spec: &UnpackSpec,
    deadline: Deadline,
) -> Result<Vec<Value>, EvalError> {
    let items = GuardedIter::new(value, deadline)?.collect()?;
    if items.len() < spec.min_len {
        return Err(EvalError::value_error(format!(
            "not enough values to unpack (expected {}, got {})",
            spec.min_len,
            items.len()
        )));
    }
    if items.len() > spec.min_len {
        return Err(EvalError::value_error(format!(
            "too many values to unpack (expected {})",
            spec.min_len
        )));
    }
    Ok(items)
}

/// Policy-checked attribute read.
pub fn guarded_getattr(
    policy: &NamePolicy,
    obj: &Value,
    name: &str,
) -> Result<Value, EvalError> {
    if !policy.is_allowed(name) {
        return Err(EvalError::Denied {
            name: name.to_string(),
        });
    }
    // `str.format` reaches vformat and with it arbitrary attribute paths
    // through replacement fields, so it stays out entirely.
    if matches!(obj, Value::Str(_)) && (name == "format" || name == "format_map") {
        return Err(EvalError::Denied {
            name: name.to_string(),
        });
    }
    match obj {
        Value::Instance(inst) => {
            if let Some(v) = inst.attrs.borrow().get(name) {
                return Ok(v.clone());
            }
            match inst.class.lookup(name) {
                Some(Value::Function(_)) => Ok(Value::Method(Rc::new(BoundMethod {
                    recv: obj.clone(),
                    name: name.into(),
                }))),
                Some(v) => Ok(v),
                None => Err(EvalError::attribute_error(&inst.class.name, name)),
            }
        }
        Value::Class(class) => class
            .lookup(name)
            .ok_or_else(|| EvalError::attribute_error(&class.name, name)),
        Value::Exception(exc) if name == "args" => {
            Ok(Value::tuple(vec![Value::str(&*exc.message)]))
        }
        other => {
            if methods::has_method(other, name) {
                Ok(Value::Method(Rc::new(BoundMethod {
                    recv: obj.clone(),
                    name: name.into(),
                })))
            } else {
                Err(EvalError::attribute_error(other.type_name(), name))
            }
        }
    }
}

/// Policy-checked attribute write; only instances and classes are mutable.
pub fn guarded_setattr(
    policy: &NamePolicy,
    obj: &Value,
    name: &str,
    value: Value,
) -> Result<(), EvalError> {
    if !policy.is_allowed(name) {
        return Err(EvalError::Denied {
            name: name.to_string(),
        });
    }
    match obj {
        Value::Instance(inst) => {
            inst.attrs.borrow_mut().insert(name.to_string(), value);
            Ok(())
        }
        Value::Class(class) => {
            class.attrs.borrow_mut().insert(name.to_string(), value);
            Ok(())
        }
        other => Err(EvalError::type_error(format!(
            "cannot set attribute '{name}' on '{}' object",
            other.type_name()
        ))),
    }
}

pub fn guarded_delattr(policy: &NamePolicy, obj: &Value, name: &str) -> Result<(), EvalError> {
    if !policy.is_allowed(name) {
        return Err(EvalError::Denied {
            name: name.to_string(),
        });
    }
    match obj {
        Value::Instance(inst) => {
            if inst.attrs.borrow_mut().remove(name).is_some() {
                Ok(())
            } else {
                Err(EvalError::attribute_error(&inst.class.name, name))
            }
        }
        other => Err(EvalError::type_error(format!(
            "cannot delete attribute '{name}' on '{}' object",
            other.type_name()
        ))),
    }
}

/// Policy-checked subscript read. String keys go through the same name
/// policy as attributes; a dict is not a loophole for denied names.
pub fn guarded_getitem(policy: &NamePolicy, obj: &Value, key: &Value) -> Result<Value, EvalError> {
    check_key(policy, key)?;
    if let Value::Slice(slice) = key {
        return slice_sequence(obj, slice);
    }
    match obj {
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = normalize_index(key.as_index("string index")?, chars.len(), "string")?;
            Ok(Value::str(chars[idx].to_string()))
        }
        Value::List(items) => {
            let items = items.borrow();
            let idx = normalize_index(key.as_index("list index")?, items.len(), "list")?;
            Ok(items[idx].clone())
        }
        Value::Tuple(items) => {
            let idx = normalize_index(key.as_index("tuple index")?, items.len(), "tuple")?;
            Ok(items[idx].clone())
        }
        Value::Dict(d) => d
            .borrow()
            .get(key)
            .cloned()
            .ok_or_else(|| EvalError::key_error(key.repr())),
        Value::Range(r) => {
            let len = r.len();
            let raw = key.as_index("range index")?;
            let idx = if raw < 0 { raw + len } else { raw };
            if idx < 0 || idx >= len {
                Err(EvalError::index_error("range object index out of range"))
            } else {
                Ok(Value::Int(r.start + idx * r.step))
            }
        }
        other => Err(EvalError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// Policy-checked subscript write.
pub fn guarded_setitem(
    policy: &NamePolicy,
    obj: &Value,
    key: &Value,
    value: Value,
) -> Result<(), EvalError> {
    check_key(policy, key)?;
    match obj {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let idx = normalize_index(
                key.as_index("list index")?,
                items.len(),
                "list assignment",
            )?;
            items[idx] = value;
            Ok(())
        }
        Value::Dict(d) => {
            if !key.is_hashable() {
                return Err(unhashable(key));
            }
            d.borrow_mut().insert(key.clone(), value);
            Ok(())
        }
        other => Err(EvalError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

pub fn guarded_delitem(policy: &NamePolicy, obj: &Value, key: &Value) -> Result<(), EvalError> {
    check_key(policy, key)?;
    match obj {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let idx =
                normalize_index(key.as_index("list index")?, items.len(), "list deletion")?;
            items.remove(idx);
            Ok(())
        }
        Value::Dict(d) => d
            .borrow_mut()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| EvalError::key_error(key.repr())),
        other => Err(EvalError::type_error(format!(
            "'{}' object does not support item deletion",
            other.type_name()
        ))),
    }
}

/// String keys obey the name policy wherever they select data.
pub fn check_key(policy: &NamePolicy, key: &Value) -> Result<(), EvalError> {
    if let Value::Str(s) = key {
        if !policy.is_allowed(s) {
            return Err(EvalError::Denied {
                name: s.to_string(),
            });
        }
    }
    Ok(())
}

fn unhashable(key: &Value) -> EvalError {
    EvalError::type_error(format!("unhashable type: '{}'", key.type_name()))
}

fn normalize_index(raw: i64, len: usize, what: &str) -> Result<usize, EvalError> {
    let len = len as i64;
    let idx = if raw < 0 { raw + len } else { raw };
    if idx < 0 || idx >= len {
        Err(EvalError::index_error(format!("{what} index out of range")))
    } else {
        Ok(idx as usize)
    }
}

fn slice_sequence(obj: &Value, slice: &SliceValue) -> Result<Value, EvalError> {
    match obj {
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_indices(slice, chars.len())?;
            Ok(Value::str(
                picked.into_iter().map(|i| chars[i]).collect::<String>(),
            ))
        }
        Value::List(items) => {
            let items = items.borrow();
            let picked = slice_indices(slice, items.len())?;
            Ok(Value::list(
                picked.into_iter().map(|i| items[i].clone()).collect(),
            ))
        }
        Value::Tuple(items) => {
            let picked = slice_indices(slice, items.len())?;
            Ok(Value::tuple(
                picked.into_iter().map(|i| items[i].clone()).collect(),
            ))
        }
        other => Err(EvalError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// Element indices selected by a slice over a sequence of `len` items,
/// with the usual clamping of out-of-range bounds.
fn slice_indices(slice: &SliceValue, len: usize) -> Result<Vec<usize>, EvalError> {
    let len = len as i64;
    let step = slice.step.unwrap_or(1);
    if step == 0 {
        return Err(EvalError::value_error("slice step cannot be zero"));
    }
    let clamp = |raw: i64, lo: i64, hi: i64| -> i64 {
        let v = if raw < 0 { raw + len } else { raw };
        v.clamp(lo, hi)
    };
    let (start, stop) = if step > 0 {
        (
            slice.start.map_or(0, |v| clamp(v, 0, len)),
            slice.stop.map_or(len, |v| clamp(v, 0, len)),
        )
    } else {
        (
            slice.start.map_or(len - 1, |v| clamp(v, -1, len - 1)),
            slice.stop.map_or(-1, |v| clamp(v, -1, len - 1)),
        )
    };
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(i as usize);
        i += step;
    }
    Ok(out)
}

#[cfg(test)]
mod guards_test {
    use super::*;
    use crate::rewriter::ir::UnpackSpec;
    use crate::runtime::value::Range;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn deadline() -> Deadline {
        Deadline::new(Duration::from_secs(5))
    }

    fn policy() -> NamePolicy {
        NamePolicy::default()
    }

    #[test]
    fn range_iterates_lazily() {
        let r = Value::Range(Range {
            start: 0,
            stop: 7,
            step: 2,
        });
        let items = GuardedIter::new(&r, deadline()).unwrap().collect().unwrap();
        assert_eq!(items.len(), 4);
        assert_eq!(items[3].repr(), "6");
    }

    #[test]
    fn iteration_observes_the_deadline() {
        let deadline = Deadline::new(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        let r = Value::Range(Range {
            start: 0,
            stop: 1_000_000_000,
            step: 1,
        });
        let mut iter = GuardedIter::new(&r, deadline).unwrap();
        assert!(matches!(iter.next(), Err(EvalError::Timeout { .. })));
    }

    #[test]
    fn unpack_requires_exact_arity() {
        let spec = UnpackSpec {
            min_len: 2,
            children: vec![],
        };
        let v = Value::tuple(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(guarded_unpack(&v, &spec, deadline()).unwrap().len(), 2);
        let short = Value::tuple(vec![Value::Int(1)]);
        assert!(guarded_unpack(&short, &spec, deadline()).is_err());
        let long = Value::tuple(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert!(guarded_unpack(&long, &spec, deadline()).is_err());
    }

    #[test]
    fn string_format_is_denied() {
        let err = guarded_getattr(&policy(), &Value::str("{}"), "format").unwrap_err();
        assert!(matches!(err, EvalError::Denied { name } if name == "format"));
    }

    #[test]
    fn string_keys_obey_the_name_policy() {
        let d = Value::Dict(Default::default());
        let err = guarded_getitem(&policy(), &d, &Value::str("f_globals")).unwrap_err();
        assert!(matches!(err, EvalError::Denied { .. }));
    }

    #[test]
    fn missing_dict_key_is_a_key_error() {
        let d = Value::Dict(Default::default());
        let err = guarded_getitem(&policy(), &d, &Value::str("missing")).unwrap_err();
        assert!(matches!(
            err,
            EvalError::Runtime(e) if e.kind == crate::runtime::error::RuntimeKind::Key
        ));
    }

    #[test]
    fn negative_and_sliced_indexing() {
        let list = Value::list(vec![
            Value::Int(0),
            Value::Int(1),
            Value::Int(2),
            Value::Int(3),
        ]);
        let v = guarded_getitem(&policy(), &list, &Value::Int(-1)).unwrap();
        assert_eq!(v.repr(), "3");

        let slice = Value::Slice(Rc::new(SliceValue {
            start: Some(1),
            stop: None,
            step: Some(2),
        }));
        let v = guarded_getitem(&policy(), &list, &slice).unwrap();
        assert_eq!(v.repr(), "[1, 3]");

        let rev = Value::Slice(Rc::new(SliceValue {
            start: None,
            stop: None,
            step: Some(-1),
        }));
        let v = guarded_getitem(&policy(), &Value::str("abc"), &rev).unwrap();
        assert_eq!(v.to_string(), "cba");
    }
}
