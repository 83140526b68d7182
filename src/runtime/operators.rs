//! Guarded operator semantics.
//!
//! Concatenation, repetition and exponentiation check their result size
//! *before* allocating or computing, so `'a' * 10**9` and `2 ** 10**6`
//! fail with a resource error instead of exhausting memory or CPU.

use std::cmp::Ordering;
use std::rc::Rc;

use crate::parser::ast::{BinOp, CmpOp, UnaryOp};
use crate::runtime::env::Limits;
use crate::runtime::error::{EvalError, ResourceError, RuntimeError, RuntimeKind};
use crate::runtime::value::{num_eq, py_eq, Dict, Num, Set, Value};

pub fn binary(op: BinOp, left: &Value, right: &Value, limits: &Limits) -> Result<Value, EvalError> {
    match op {
        BinOp::Add => guarded_add(left, right, limits),
        BinOp::Sub => sub(left, right),
        BinOp::Mult => guarded_mult(left, right, limits),
        BinOp::Div => div(left, right),
        BinOp::FloorDiv => floor_div(left, right),
        BinOp::Mod => modulo(left, right),
        BinOp::Pow => guarded_pow(left, right, limits),
        BinOp::BitAnd => bitwise(op, left, right),
        BinOp::BitOr => bitwise(op, left, right),
        BinOp::BitXor => bitwise(op, left, right),
        BinOp::Shl | BinOp::Shr => shift(op, left, right),
    }
}

pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value, EvalError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!operand.truthy())),
        UnaryOp::Neg => match operand.as_number() {
            Some(Num::Int(n)) => n
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| overflow("negation")),
            Some(Num::Float(f)) => Ok(Value::Float(-f)),
            None => Err(bad_unary("-", operand)),
        },
        UnaryOp::Pos => match operand.as_number() {
            Some(Num::Int(n)) => Ok(Value::Int(n)),
            Some(Num::Float(f)) => Ok(Value::Float(f)),
            None => Err(bad_unary("+", operand)),
        },
        UnaryOp::Invert => match operand.as_number() {
            Some(Num::Int(n)) => Ok(Value::Int(!n)),
            _ => Err(bad_unary("~", operand)),
        },
    }
}

/// Bounded `+`: numeric addition, or concatenation with a pre-checked
/// result length.
pub fn guarded_add(left: &Value, right: &Value, limits: &Limits) -> Result<Value, EvalError> {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return match (a, b) {
            (Num::Int(x), Num::Int(y)) => x
                .checked_add(y)
                .map(Value::Int)
                .ok_or_else(|| overflow("integer addition")),
            _ => Ok(Value::Float(to_f64(a) + to_f64(b))),
        };
    }
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => {
            check_len(a.len() + b.len(), limits)?;
            Ok(Value::str(format!("{a}{b}")))
        }
        (Value::List(a), Value::List(b)) => {
            let (a, b) = (a.borrow(), b.borrow());
            check_len(a.len() + b.len(), limits)?;
            Ok(Value::list(a.iter().chain(b.iter()).cloned().collect()))
        }
        (Value::Tuple(a), Value::Tuple(b)) => {
            check_len(a.len() + b.len(), limits)?;
            Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        _ => Err(bad_binary("+", left, right)),
    }
}

/// Bounded `*`: numeric product, or sequence repetition with a pre-checked
/// result length.
pub fn guarded_mult(left: &Value, right: &Value, limits: &Limits) -> Result<Value, EvalError> {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return match (a, b) {
            (Num::Int(x), Num::Int(y)) => x
                .checked_mul(y)
                .map(Value::Int)
                .ok_or_else(|| overflow("integer multiplication")),
            _ => Ok(Value::Float(to_f64(a) * to_f64(b))),
        };
    }
    let (seq, count) = match (left, right) {
        (seq, Value::Int(n)) => (seq, *n),
        (Value::Int(n), seq) => (seq, *n),
        _ => return Err(bad_binary("*", left, right)),
    };
    let count = count.max(0) as usize;
    match seq {
        Value::Str(s) => {
            check_len(s.len().saturating_mul(count), limits)?;
            Ok(Value::str(s.repeat(count)))
        }
        Value::List(items) => {
            let items = items.borrow();
            check_len(items.len().saturating_mul(count), limits)?;
            let mut out = Vec::with_capacity(items.len() * count);
            for _ in 0..count {
                out.extend(items.iter().cloned());
            }
            Ok(Value::list(out))
        }
        Value::Tuple(items) => {
            check_len(items.len().saturating_mul(count), limits)?;
            let mut out = Vec::with_capacity(items.len() * count);
            for _ in 0..count {
                out.extend(items.iter().cloned());
            }
            Ok(Value::tuple(out))
        }
        _ => Err(bad_binary("*", left, right)),
    }
}

/// Bounded `**`: estimates the result's decimal digit count first and
/// refuses anything above the configured bound.
pub fn guarded_pow(left: &Value, right: &Value, limits: &Limits) -> Result<Value, EvalError> {
    let (a, b) = match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(bad_binary("** or pow()", left, right)),
    };
    match (a, b) {
        (Num::Int(base), Num::Int(exp)) if exp >= 0 => {
            // digits(base^exp) ~= exp * log10(|base|)
            if base.unsigned_abs() > 1 {
                let digits = (exp as f64 * (base.unsigned_abs() as f64).log10()).ceil() as u32;
                if digits > limits.max_pow_digits {
                    return Err(ResourceError::PowTooLarge {
                        digits,
                        max: limits.max_pow_digits,
                    }
                    .into());
                }
            }
            let exp = u32::try_from(exp).map_err(|_| {
                EvalError::from(ResourceError::PowTooLarge {
                    digits: u32::MAX,
                    max: limits.max_pow_digits,
                })
            })?;
            base.checked_pow(exp)
                .map(Value::Int)
                .ok_or_else(|| overflow("integer power"))
        }
        _ => {
            let result = to_f64(a).powf(to_f64(b));
            if result.is_infinite() && to_f64(a).is_finite() && to_f64(b).is_finite() {
                return Err(overflow("float power"));
            }
            Ok(Value::Float(result))
        }
    }
}

fn sub(left: &Value, right: &Value) -> Result<Value, EvalError> {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return match (a, b) {
            (Num::Int(x), Num::Int(y)) => x
                .checked_sub(y)
                .map(Value::Int)
                .ok_or_else(|| overflow("integer subtraction")),
            _ => Ok(Value::Float(to_f64(a) - to_f64(b))),
        };
    }
    if let (Value::Set(a), Value::Set(b)) = (left, right) {
        let (a, b) = (a.borrow(), b.borrow());
        let mut out = Set::new();
        for v in a.iter_slice() {
            if !b.contains(v) {
                out.add(v.clone());
            }
        }
        return Ok(Value::Set(Rc::new(std::cell::RefCell::new(out))));
    }
    Err(bad_binary("-", left, right))
}

fn div(left: &Value, right: &Value) -> Result<Value, EvalError> {
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => {
            let d = to_f64(b);
            if d == 0.0 {
                Err(zero_division("division by zero"))
            } else {
                Ok(Value::Float(to_f64(a) / d))
            }
        }
        _ => Err(bad_binary("/", left, right)),
    }
}

fn floor_div(left: &Value, right: &Value) -> Result<Value, EvalError> {
    match (left.as_number(), right.as_number()) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => {
            if b == 0 {
                Err(zero_division("integer division or modulo by zero"))
            } else {
                Ok(Value::Int(int_floor_div(a, b)?))
            }
        }
        (Some(a), Some(b)) => {
            let d = to_f64(b);
            if d == 0.0 {
                Err(zero_division("float floor division by zero"))
            } else {
                Ok(Value::Float((to_f64(a) / d).floor()))
            }
        }
        _ => Err(bad_binary("//", left, right)),
    }
}

// Floor division rounds toward negative infinity, so 7 // -2 is -4.
fn int_floor_div(a: i64, b: i64) -> Result<i64, EvalError> {
    let q = a
        .checked_div(b)
        .ok_or_else(|| overflow("integer division"))?;
    Ok(if a % b != 0 && (a ^ b) < 0 { q - 1 } else { q })
}

fn modulo(left: &Value, right: &Value) -> Result<Value, EvalError> {
    if let Value::Str(template) = left {
        return percent_format(template, right);
    }
    match (left.as_number(), right.as_number()) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => {
            if b == 0 {
                Err(zero_division("integer division or modulo by zero"))
            } else {
                // Sign follows the divisor: 7 % -2 is -1.
                let r = a.wrapping_rem(b);
                Ok(Value::Int(if r != 0 && (r < 0) != (b < 0) {
                    r + b
                } else {
                    r
                }))
            }
        }
        (Some(a), Some(b)) => {
            let d = to_f64(b);
            if d == 0.0 {
                Err(zero_division("float modulo"))
            } else {
                // Sign follows the divisor, as in the evaluated language.
                let r = to_f64(a) % d;
                Ok(Value::Float(if r != 0.0 && (r < 0.0) != (d < 0.0) {
                    r + d
                } else {
                    r
                }))
            }
        }
        _ => Err(bad_binary("%", left, right)),
    }
}

fn bitwise(op: BinOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    if let (Some(Num::Int(a)), Some(Num::Int(b))) = (left.as_number(), right.as_number()) {
        return Ok(Value::Int(match op {
            BinOp::BitAnd => a & b,
            BinOp::BitOr => a | b,
            BinOp::BitXor => a ^ b,
            _ => unreachable!(),
        }));
    }
    if let (Value::Set(a), Value::Set(b)) = (left, right) {
        let (a, b) = (a.borrow(), b.borrow());
        let mut out = Set::new();
        match op {
            BinOp::BitAnd => {
                for v in a.iter_slice() {
                    if b.contains(v) {
                        out.add(v.clone());
                    }
                }
            }
            BinOp::BitOr => {
                for v in a.iter_slice().iter().chain(b.iter_slice()) {
                    out.add(v.clone());
                }
            }
            BinOp::BitXor => {
                for v in a.iter_slice() {
                    if !b.contains(v) {
                        out.add(v.clone());
                    }
                }
                for v in b.iter_slice() {
                    if !a.contains(v) {
                        out.add(v.clone());
                    }
                }
            }
            _ => unreachable!(),
        }
        return Ok(Value::Set(Rc::new(std::cell::RefCell::new(out))));
    }
    Err(bad_binary(op.symbol(), left, right))
}

fn shift(op: BinOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    match (left.as_number(), right.as_number()) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => {
            if b < 0 {
                return Err(EvalError::value_error("negative shift count"));
            }
            let b = u32::try_from(b).map_err(|_| overflow("shift count"))?;
            let result = match op {
                BinOp::Shl => a.checked_shl(b).filter(|r| r >> b == a),
                BinOp::Shr => a.checked_shr(b).or(Some(if a < 0 { -1 } else { 0 })),
                _ => unreachable!(),
            };
            result.map(Value::Int).ok_or_else(|| overflow("shift"))
        }
        _ => Err(bad_binary(op.symbol(), left, right)),
    }
}

/// Comparison without user-defined hooks; the evaluator dispatches
/// `__eq__` and friends on instances before calling this.
pub fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, EvalError> {
    match op {
        CmpOp::Eq => Ok(py_eq(left, right)),
        CmpOp::NotEq => Ok(!py_eq(left, right)),
        CmpOp::Is => Ok(value_is(left, right)),
        CmpOp::IsNot => Ok(!value_is(left, right)),
        CmpOp::In => contains(right, left),
        CmpOp::NotIn => Ok(!contains(right, left)?),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ord = ordering(left, right).ok_or_else(|| {
                EvalError::type_error(format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    op.symbol(),
                    left.type_name(),
                    right.type_name()
                ))
            })?;
            Ok(match op {
                CmpOp::Lt => ord == Ordering::Less,
                CmpOp::Le => ord != Ordering::Greater,
                CmpOp::Gt => ord == Ordering::Greater,
                CmpOp::Ge => ord != Ordering::Less,
                _ => unreachable!(),
            })
        }
    }
}

/// Total order over comparable pairs: numbers, strings, and sequences
/// element by element. `None` for incomparable types.
pub fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        if num_eq(a, b) {
            return Some(Ordering::Equal);
        }
        return to_f64(a).partial_cmp(&to_f64(b));
    }
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Tuple(a), Value::Tuple(b)) => seq_ordering(a, b),
        (Value::List(a), Value::List(b)) => seq_ordering(&a.borrow(), &b.borrow()),
        _ => None,
    }
}

fn seq_ordering(a: &[Value], b: &[Value]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b.iter()) {
        match ordering(x, y)? {
            Ordering::Equal => continue,
            other => return Some(other),
        }
    }
    Some(a.len().cmp(&b.len()))
}

/// `is`: reference identity for containers, value identity for scalars.
fn value_is(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b),
        (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
        (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
        (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
        (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
        (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
        (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
        (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
        (Value::ExcType(a), Value::ExcType(b)) => a == b,
        _ => false,
    }
}

/// Membership for the built-in containers. Instance `__contains__` is
/// dispatched by the evaluator before reaching here.
pub fn contains(container: &Value, item: &Value) -> Result<bool, EvalError> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(&**needle)),
            other => Err(EvalError::type_error(format!(
                "'in <string>' requires string as left operand, not '{}'",
                other.type_name()
            ))),
        },
        Value::Tuple(items) => Ok(items.iter().any(|v| py_eq(v, item))),
        Value::List(items) => Ok(items.borrow().iter().any(|v| py_eq(v, item))),
        Value::Dict(d) => Ok(d.borrow().get(item).is_some()),
        Value::Set(s) => Ok(s.borrow().contains(item)),
        Value::Range(r) => match item.as_number() {
            Some(Num::Int(n)) => Ok(r.step != 0
                && (n - r.start) % r.step == 0
                && if r.step > 0 {
                    n >= r.start && n < r.stop
                } else {
                    n <= r.start && n > r.stop
                }),
            _ => Ok(false),
        },
        other => Err(EvalError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

/// Minimal `%` string formatting: `%s`, `%d`/`%i`, `%f`, `%x`, `%r` and
/// `%%`, with a tuple supplying multiple values.
fn percent_format(template: &str, args: &Value) -> Result<Value, EvalError> {
    let values: Vec<Value> = match args {
        Value::Tuple(items) => items.as_ref().clone(),
        single => vec![single.clone()],
    };
    let mut out = String::with_capacity(template.len());
    let mut next = 0usize;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let spec = chars
            .next()
            .ok_or_else(|| EvalError::value_error("incomplete format"))?;
        if spec == '%' {
            out.push('%');
            continue;
        }
        let value = values.get(next).ok_or_else(|| {
            EvalError::type_error("not enough arguments for format string")
        })?;
        next += 1;
        match spec {
            's' => out.push_str(&value.to_string()),
            'r' => out.push_str(&value.repr()),
            'd' | 'i' => match value.as_number() {
                Some(Num::Int(n)) => out.push_str(&n.to_string()),
                Some(Num::Float(f)) => out.push_str(&(f.trunc() as i64).to_string()),
                None => {
                    return Err(EvalError::type_error(format!(
                        "%d format: a number is required, not {}",
                        value.type_name()
                    )))
                }
            },
            'f' => match value.as_number() {
                Some(n) => out.push_str(&format!("{:.6}", to_f64(n))),
                None => {
                    return Err(EvalError::type_error(format!(
                        "%f format: a number is required, not {}",
                        value.type_name()
                    )))
                }
            },
            'x' => match value.as_number() {
                Some(Num::Int(n)) => out.push_str(&format!("{n:x}")),
                _ => {
                    return Err(EvalError::type_error(
                        "%x format: an integer is required",
                    ))
                }
            },
            other => {
                return Err(EvalError::value_error(format!(
                    "unsupported format character '{other}'"
                )))
            }
        }
    }
    if next < values.len() {
        return Err(EvalError::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(Value::str(out))
}

pub fn to_f64(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    }
}

fn check_len(len: usize, limits: &Limits) -> Result<(), EvalError> {
    if len > limits.max_collection_len {
        Err(ResourceError::CollectionTooLarge {
            len,
            max: limits.max_collection_len,
        }
        .into())
    } else {
        Ok(())
    }
}

fn bad_binary(symbol: &str, left: &Value, right: &Value) -> EvalError {
    EvalError::type_error(format!(
        "unsupported operand type(s) for {symbol}: '{}' and '{}'",
        left.type_name(),
        right.type_name()
    ))
}

fn bad_unary(symbol: &str, operand: &Value) -> EvalError {
    EvalError::type_error(format!(
        "bad operand type for unary {symbol}: '{}'",
        operand.type_name()
    ))
}

fn overflow(what: &str) -> EvalError {
    EvalError::Runtime(RuntimeError::new(
        RuntimeKind::Overflow,
        format!("{what} result out of range"),
    ))
}

fn zero_division(message: &str) -> EvalError {
    EvalError::Runtime(RuntimeError::new(RuntimeKind::ZeroDivision, message))
}

/// `dict(...)` update helper shared by a couple of call sites.
pub fn dict_update(target: &mut Dict, source: &Dict) {
    for (k, v) in source.iter() {
        target.insert(k.clone(), v.clone());
    }
}

#[cfg(test)]
mod operators_test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn limits() -> Limits {
        Limits::default()
    }

    #[test]
    fn concatenation_is_bounded() {
        let limits = Limits {
            max_collection_len: 8,
            ..Limits::default()
        };
        let a = Value::str("abcde");
        assert!(guarded_add(&a, &Value::str("fgh"), &limits).is_ok());
        let err = guarded_add(&a, &Value::str("fghi"), &limits).unwrap_err();
        assert!(matches!(err, EvalError::Resource(_)));
    }

    #[test]
    fn repetition_is_bounded_before_allocating() {
        let err = guarded_mult(&Value::str("a"), &Value::Int(1_000_000_000), &limits());
        assert!(matches!(err.unwrap_err(), EvalError::Resource(_)));
        // Negative counts produce an empty sequence, as in the source
        // language.
        let v = guarded_mult(&Value::str("ab"), &Value::Int(-3), &limits()).unwrap();
        assert_eq!(v.to_string(), "");
    }

    #[test]
    fn pow_digit_guard_fires_before_computing() {
        let err = guarded_pow(&Value::Int(10), &Value::Int(1_000_000), &limits());
        assert!(matches!(err.unwrap_err(), EvalError::Resource(_)));
        let v = guarded_pow(&Value::Int(2), &Value::Int(10), &limits()).unwrap();
        assert!(py_eq(&v, &Value::Int(1024)));
    }

    #[test]
    fn division_semantics() {
        // True division always yields a float.
        let v = div(&Value::Int(7), &Value::Int(2)).unwrap();
        assert!(py_eq(&v, &Value::Float(3.5)));
        // Floor division and modulo round toward negative infinity.
        let v = floor_div(&Value::Int(-7), &Value::Int(2)).unwrap();
        assert!(py_eq(&v, &Value::Int(-4)));
        let v = modulo(&Value::Int(-7), &Value::Int(2)).unwrap();
        assert!(py_eq(&v, &Value::Int(1)));
        // Negative divisors too: quotient floors and the remainder takes
        // the divisor's sign.
        let v = floor_div(&Value::Int(7), &Value::Int(-2)).unwrap();
        assert!(py_eq(&v, &Value::Int(-4)));
        let v = modulo(&Value::Int(7), &Value::Int(-2)).unwrap();
        assert!(py_eq(&v, &Value::Int(-1)));
        let v = floor_div(&Value::Int(-7), &Value::Int(-2)).unwrap();
        assert!(py_eq(&v, &Value::Int(3)));
        let v = modulo(&Value::Int(-7), &Value::Int(-2)).unwrap();
        assert!(py_eq(&v, &Value::Int(-1)));
        let v = floor_div(&Value::Float(7.0), &Value::Int(-2)).unwrap();
        assert!(py_eq(&v, &Value::Float(-4.0)));
        assert!(matches!(
            div(&Value::Int(1), &Value::Int(0)).unwrap_err(),
            EvalError::Runtime(e) if e.kind == RuntimeKind::ZeroDivision
        ));
    }

    #[test]
    fn chained_value_comparisons() {
        assert!(compare(CmpOp::Lt, &Value::Int(1), &Value::Float(1.5)).unwrap());
        assert!(compare(CmpOp::Eq, &Value::Int(1), &Value::Float(1.0)).unwrap());
        assert!(compare(
            CmpOp::Lt,
            &Value::str("abc"),
            &Value::str("abd")
        )
        .unwrap());
        assert!(compare(CmpOp::Lt, &Value::Int(1), &Value::str("x")).is_err());
    }

    #[test]
    fn membership() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert!(contains(&list, &Value::Float(2.0)).unwrap());
        assert!(contains(&Value::str("hello"), &Value::str("ell")).unwrap());
        let r = Value::Range(crate::runtime::value::Range {
            start: 0,
            stop: 10,
            step: 3,
        });
        assert!(contains(&r, &Value::Int(9)).unwrap());
        assert!(!contains(&r, &Value::Int(10)).unwrap());
    }

    #[test]
    fn percent_formatting() {
        let out = modulo(
            &Value::str("%s has %d items"),
            &Value::tuple(vec![Value::str("cart"), Value::Int(3)]),
        )
        .unwrap();
        assert_eq!(out.to_string(), "cart has 3 items");
    }
}
