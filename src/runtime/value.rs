//! The dynamic value model.
//!
//! Values are small Rc-backed handles; mutable containers share interior
//! state through `RefCell` so that aliasing assignments behave the way the
//! evaluated language expects (`a = [1]; b = a; b.append(2)` changes `a`).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use hashbrown::HashMap;

use crate::rewriter::ir;
use crate::runtime::error::{EvalError, RuntimeKind};

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Tuple(Rc<Vec<Value>>),
    List(Rc<RefCell<Vec<Value>>>),
    Dict(Rc<RefCell<Dict>>),
    Set(Rc<RefCell<Set>>),
    /// Lazy integer range; iterated step by step, never materialized.
    Range(Range),
    Slice(Rc<SliceValue>),
    Function(Rc<Function>),
    Builtin(Rc<Builtin>),
    /// A method selected off a receiver, called later.
    Method(Rc<BoundMethod>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    /// An exception type such as `ValueError`, usable in `except` clauses
    /// and callable to produce an exception instance.
    ExcType(RuntimeKind),
    Exception(Rc<ExceptionValue>),
}

/// Insertion-ordered association list.
///
/// Key lookup is linear with cross-numeric equality (`1`, `1.0` and `True`
/// are the same key), which matches the source language and keeps keys in
/// first-insertion order without a hash over dynamic values.
#[derive(Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

#[derive(Default)]
pub struct Set {
    items: Vec<Value>,
}

#[derive(Clone, Copy)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

pub struct SliceValue {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

/// A user-defined function or lambda with its captured scope.
pub struct Function {
    pub def: Rc<ir::Func>,
    /// Evaluated default per parameter, aligned with `def.params`.
    pub defaults: Vec<Option<Value>>,
    pub scope: crate::runtime::env::ScopeRef,
}

pub struct Builtin {
    pub name: Rc<str>,
    pub imp: BuiltinImpl,
}

pub enum BuiltinImpl {
    Native(crate::runtime::eval::NativeFn),
    /// Placeholder for a dangerous or unknown builtin name; raises a
    /// denial on first call instead of at lookup time.
    Stub,
}

pub struct BoundMethod {
    pub recv: Value,
    pub name: Rc<str>,
}

pub struct Class {
    pub name: String,
    pub bases: Vec<Rc<Class>>,
    pub attrs: RefCell<HashMap<String, Value>>,
}

pub struct Instance {
    pub class: Rc<Class>,
    pub attrs: RefCell<HashMap<String, Value>>,
}

pub struct ExceptionValue {
    pub kind: RuntimeKind,
    pub message: String,
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Value {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Range(_) => "range",
            Value::Slice(_) => "slice",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Method(_) => "builtin_function_or_method",
            Value::Class(_) => "type",
            Value::Instance(_) => "object",
            Value::ExcType(_) => "type",
            Value::Exception(_) => "Exception",
        }
    }

    /// Truthiness, matching the evaluated language.
    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Set(s) => !s.borrow().is_empty(),
            Value::Range(r) => r.len() > 0,
            _ => true,
        }
    }

    /// Numeric view treating `bool` as an integer, or `None`.
    pub fn as_number(&self) -> Option<Num> {
        match self {
            Value::Bool(b) => Some(Num::Int(*b as i64)),
            Value::Int(n) => Some(Num::Int(*n)),
            Value::Float(f) => Some(Num::Float(*f)),
            _ => None,
        }
    }

    /// Index-shaped integer (`bool` counts), or a type error.
    pub fn as_index(&self, what: &str) -> Result<i64, EvalError> {
        match self {
            Value::Bool(b) => Ok(*b as i64),
            Value::Int(n) => Ok(*n),
            other => Err(EvalError::type_error(format!(
                "{what} must be an integer, not '{}'",
                other.type_name()
            ))),
        }
    }

    /// Immutable values usable as dict keys and set members.
    pub fn is_hashable(&self) -> bool {
        match self {
            Value::None
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Str(_)
            | Value::Range(_)
            | Value::ExcType(_) => true,
            Value::Tuple(items) => items.iter().all(Value::is_hashable),
            _ => false,
        }
    }

    pub fn repr(&self) -> String {
        self.repr_depth(0)
    }

    fn repr_depth(&self, depth: usize) -> String {
        if depth > 12 {
            return "...".to_string();
        }
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Value::Tuple(items) => {
                let inner = join_reprs(items, depth);
                if items.len() == 1 {
                    format!("({inner},)")
                } else {
                    format!("({inner})")
                }
            }
            Value::List(items) => format!("[{}]", join_reprs(&items.borrow(), depth)),
            Value::Dict(d) => {
                let entries: Vec<String> = d
                    .borrow()
                    .iter()
                    .map(|(k, v)| {
                        format!("{}: {}", k.repr_depth(depth + 1), v.repr_depth(depth + 1))
                    })
                    .collect();
                format!("{{{}}}", entries.join(", "))
            }
            Value::Set(s) => {
                let s = s.borrow();
                if s.is_empty() {
                    "set()".to_string()
                } else {
                    format!("{{{}}}", join_reprs(s.iter_slice(), depth))
                }
            }
            Value::Range(r) => {
                if r.step == 1 {
                    format!("range({}, {})", r.start, r.stop)
                } else {
                    format!("range({}, {}, {})", r.start, r.stop, r.step)
                }
            }
            Value::Slice(s) => format!(
                "slice({}, {}, {})",
                opt_int(s.start),
                opt_int(s.stop),
                opt_int(s.step)
            ),
            Value::Function(f) => format!("<function {}>", f.def.name),
            Value::Builtin(b) => format!("<built-in function {}>", b.name),
            Value::Method(m) => format!("<bound method {}>", m.name),
            Value::Class(c) => format!("<class '{}'>", c.name),
            Value::Instance(i) => format!("<{} object>", i.class.name),
            Value::ExcType(kind) => format!("<class '{}'>", kind.name()),
            Value::Exception(e) => format!("{}({})", e.kind.name(), Value::str(&*e.message).repr()),
        }
    }
}

fn join_reprs(items: &[Value], depth: usize) -> String {
    items
        .iter()
        .map(|v| v.repr_depth(depth + 1))
        .collect::<Vec<_>>()
        .join(", ")
}

fn opt_int(v: Option<i64>) -> String {
    match v {
        Some(n) => n.to_string(),
        None => "None".to_string(),
    }
}

/// Floats print with a trailing `.0` when integral, matching `str(1.0)`.
pub fn format_float(f: f64) -> String {
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if f.is_nan() {
        return "nan".to_string();
    }
    if f == f.trunc() && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

/// `str()` conversion: strings render unquoted, everything else as repr.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Exception(e) => f.write_str(&e.message),
            other => f.write_str(&other.repr()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Rc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Rc::from(v.as_str()))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(Rc::new(RefCell::new(
            v.into_iter().map(Into::into).collect(),
        )))
    }
}

/// Structural equality with cross-numeric comparison and reference
/// identity for functions, classes and instances.
///
/// User `__eq__` hooks are dispatched by the evaluator before falling back
/// here, so this function never runs evaluated code.
pub fn py_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Tuple(x), Value::Tuple(y)) => seq_eq(x, y),
        (Value::List(x), Value::List(y)) => {
            Rc::ptr_eq(x, y) || seq_eq(&x.borrow(), &y.borrow())
        }
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| py_eq(v, other)))
        }
        (Value::Set(x), Value::Set(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter_slice().iter().all(|v| y.contains(v))
        }
        (Value::Range(x), Value::Range(y)) => {
            x.start == y.start && x.stop == y.stop && x.step == y.step
        }
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) => x.name == y.name,
        (Value::Class(x), Value::Class(y)) => Rc::ptr_eq(x, y),
        (Value::Instance(x), Value::Instance(y)) => Rc::ptr_eq(x, y),
        (Value::ExcType(x), Value::ExcType(y)) => x == y,
        (Value::Exception(x), Value::Exception(y)) => Rc::ptr_eq(x, y),
        _ => match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => num_eq(x, y),
            _ => false,
        },
    }
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| py_eq(x, y))
}

#[derive(Clone, Copy)]
pub enum Num {
    Int(i64),
    Float(f64),
}

pub fn num_eq(a: Num, b: Num) -> bool {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => x == y,
        (Num::Float(x), Num::Float(y)) => x == y,
        (Num::Int(x), Num::Float(y)) | (Num::Float(y), Num::Int(x)) => x as f64 == y,
    }
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| py_eq(k, key))
            .map(|(_, v)| v)
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| py_eq(k, &key)) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _)| py_eq(k, key))?;
        Some(self.entries.remove(pos).1)
    }

    pub fn pop_last(&mut self) -> Option<(Value, Value)> {
        self.entries.pop()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }
}

impl Set {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.items.iter().any(|v| py_eq(v, value))
    }

    pub fn add(&mut self, value: Value) {
        if !self.contains(&value) {
            self.items.push(value);
        }
    }

    pub fn discard(&mut self, value: &Value) -> bool {
        match self.items.iter().position(|v| py_eq(v, value)) {
            Some(pos) => {
                self.items.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter_slice(&self) -> &[Value] {
        &self.items
    }
}

impl Range {
    pub fn len(&self) -> i64 {
        if self.step > 0 {
            ((self.stop - self.start).max(0) + self.step - 1) / self.step
        } else {
            ((self.start - self.stop).max(0) + (-self.step) - 1) / (-self.step)
        }
    }
}

impl Class {
    /// Attribute lookup through the class and its bases, depth first.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.attrs.borrow().get(name) {
            return Some(v.clone());
        }
        self.bases.iter().find_map(|base| base.lookup(name))
    }
}

#[cfg(test)]
mod value_test {
    use super::*;

    #[test]
    fn truthiness_follows_emptiness() {
        assert!(!Value::None.truthy());
        assert!(!Value::Int(0).truthy());
        assert!(Value::Int(-1).truthy());
        assert!(!Value::str("").truthy());
        assert!(Value::str("x").truthy());
        assert!(!Value::list(vec![]).truthy());
        assert!(Value::list(vec![Value::Int(1)]).truthy());
    }

    #[test]
    fn cross_numeric_equality() {
        assert!(py_eq(&Value::Int(1), &Value::Float(1.0)));
        assert!(py_eq(&Value::Bool(true), &Value::Int(1)));
        assert!(!py_eq(&Value::Int(1), &Value::str("1")));
    }

    #[test]
    fn dict_keeps_insertion_order_and_merges_numeric_keys() {
        let mut d = Dict::new();
        d.insert(Value::Int(1), Value::str("a"));
        d.insert(Value::str("k"), Value::str("b"));
        d.insert(Value::Float(1.0), Value::str("c"));
        assert_eq!(d.len(), 2);
        assert_eq!(d.get(&Value::Int(1)).unwrap().to_string(), "c");
        assert_eq!(d.keys()[0].repr(), "1");
    }

    #[test]
    fn range_len_handles_direction() {
        let r = Range { start: 0, stop: 10, step: 3 };
        assert_eq!(r.len(), 4);
        let r = Range { start: 10, stop: 0, step: -1 };
        assert_eq!(r.len(), 10);
        let r = Range { start: 0, stop: 10, step: -1 };
        assert_eq!(r.len(), 0);
    }

    #[test]
    fn repr_matches_source_language() {
        assert_eq!(Value::Float(1.0).repr(), "1.0");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(
            Value::list(vec![Value::str("a"), Value::None]).repr(),
            "['a', None]"
        );
        assert_eq!(Value::Bool(true).repr(), "True");
    }
}
