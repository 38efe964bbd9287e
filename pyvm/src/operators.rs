//! Operator tables for the arithmetic, subscript and comparison opcodes.
//!
//! Handlers here only know builtin types. Instance operands are routed
//! through their dunder methods by the interpreter before reaching these
//! tables.

pub(crate) mod printf;

use std::cmp::Ordering;
use std::rc::Rc;

use bytecode::{BinaryOp, CompareOp, UnaryOp};
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::exceptions::{ExcType, RunError, RunResult, exception_matches};
use crate::value::{HashKey, Num, Set, Value, values_eq, with_set};

pub type BinaryFn = fn(&Value, &Value) -> RunResult<Value>;
pub type CompareFn = fn(&Value, &Value) -> RunResult<Value>;

/// Indexed by `BinaryOp as usize`.
pub const BINARY_OPS: [BinaryFn; BinaryOp::COUNT] = [
    power,
    multiply,
    modulo,
    add,
    subtract,
    subscript,
    floor_divide,
    true_divide,
    lshift,
    rshift,
    bit_and,
    bit_xor,
    bit_or,
];

/// Indexed by the `COMPARE_OP` argument.
pub const COMPARE_OPS: [CompareFn; CompareOp::COUNT] = [
    less,
    less_equal,
    equal,
    not_equal,
    greater,
    greater_equal,
    contains,
    not_contains,
    is,
    is_not,
    exception_match,
    bad_compare,
];

#[inline]
pub fn binary(op: BinaryOp, a: &Value, b: &Value) -> RunResult<Value> {
    BINARY_OPS[op as usize](a, b)
}

#[inline]
pub fn compare(op: CompareOp, a: &Value, b: &Value) -> RunResult<Value> {
    COMPARE_OPS[op as usize](a, b)
}

/// Method names tried on instance operands, normal then reflected.
pub fn binary_dunder(op: BinaryOp) -> (&'static str, &'static str) {
    match op {
        BinaryOp::Power => ("__pow__", "__rpow__"),
        BinaryOp::Multiply => ("__mul__", "__rmul__"),
        BinaryOp::Modulo => ("__mod__", "__rmod__"),
        BinaryOp::Add => ("__add__", "__radd__"),
        BinaryOp::Subtract => ("__sub__", "__rsub__"),
        BinaryOp::Subscr => ("__getitem__", ""),
        BinaryOp::FloorDivide => ("__floordiv__", "__rfloordiv__"),
        BinaryOp::TrueDivide => ("__truediv__", "__rtruediv__"),
        BinaryOp::Lshift => ("__lshift__", "__rlshift__"),
        BinaryOp::Rshift => ("__rshift__", "__rrshift__"),
        BinaryOp::And => ("__and__", "__rand__"),
        BinaryOp::Xor => ("__xor__", "__rxor__"),
        BinaryOp::Or => ("__or__", "__ror__"),
    }
}

pub fn compare_dunder(op: CompareOp) -> Option<&'static str> {
    Some(match op {
        CompareOp::Lt => "__lt__",
        CompareOp::Le => "__le__",
        CompareOp::Eq => "__eq__",
        CompareOp::Ne => "__ne__",
        CompareOp::Gt => "__gt__",
        CompareOp::Ge => "__ge__",
        _ => return None,
    })
}

pub fn unsupported(op: BinaryOp, a: &Value, b: &Value) -> RunError {
    ExcType::TypeError.err(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        a.type_name(),
        b.type_name()
    ))
}

/// Wrap a value as a dict key or set member.
pub fn hash_key(value: Value) -> RunResult<HashKey> {
    HashKey::new(value)
        .map_err(|e| ExcType::TypeError.err(format!("unhashable type: '{}'", e.0)))
}

// ── numeric coercion ───────────────────────────────────────────────

enum Pair {
    Ints(i64, i64),
    Bigs(BigInt, BigInt),
    Floats(f64, f64),
    Complex((f64, f64), (f64, f64)),
}

fn coerce(a: &Value, b: &Value) -> Option<Pair> {
    let (x, y) = (a.as_num()?, b.as_num()?);
    Some(match (x, y) {
        (Num::Int(x), Num::Int(y)) => Pair::Ints(x, y),
        (Num::Int(_) | Num::Long(_), Num::Int(_) | Num::Long(_)) => {
            Pair::Bigs(a.as_bigint()?.into_owned(), b.as_bigint()?.into_owned())
        }
        (Num::Complex(..), _) | (_, Num::Complex(..)) => {
            Pair::Complex(as_complex(x), as_complex(y))
        }
        _ => Pair::Floats(x.to_f64(), y.to_f64()),
    })
}

fn as_complex(n: Num<'_>) -> (f64, f64) {
    match n {
        Num::Complex(re, im) => (re, im),
        other => (other.to_f64(), 0.0),
    }
}

fn big(value: BigInt) -> Value {
    Value::from_bigint(value)
}

fn zero_division(msg: &str) -> RunError {
    ExcType::ZeroDivisionError.err(msg)
}

// ── arithmetic ─────────────────────────────────────────────────────

fn add(a: &Value, b: &Value) -> RunResult<Value> {
    if let Some(pair) = coerce(a, b) {
        return Ok(match pair {
            Pair::Ints(x, y) => match x.checked_add(y) {
                Some(r) => Value::Int(r),
                None => big(BigInt::from(x) + y),
            },
            Pair::Bigs(x, y) => big(x + y),
            Pair::Floats(x, y) => Value::Float(x + y),
            Pair::Complex((a, b), (c, d)) => Value::Complex(a + c, b + d),
        });
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => {
            let mut s = String::with_capacity(x.len() + y.len());
            s.push_str(x);
            s.push_str(y);
            Ok(Value::str(&s))
        }
        (Value::List(x), Value::List(y)) => {
            let mut items = x.borrow().clone();
            items.extend(y.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (Value::Tuple(x), Value::Tuple(y)) => {
            Ok(Value::tuple(x.iter().chain(y.iter()).cloned().collect()))
        }
        (Value::Bytes(x), Value::Bytes(y)) => {
            Ok(Value::Bytes(x.iter().chain(y.iter()).copied().collect()))
        }
        (Value::Str(_), other) => Err(ExcType::TypeError.err(format!(
            "Can't convert '{}' object to str implicitly",
            other.type_name()
        ))),
        _ => Err(unsupported(BinaryOp::Add, a, b)),
    }
}

fn subtract(a: &Value, b: &Value) -> RunResult<Value> {
    if let Some(pair) = coerce(a, b) {
        return Ok(match pair {
            Pair::Ints(x, y) => match x.checked_sub(y) {
                Some(r) => Value::Int(r),
                None => big(BigInt::from(x) - y),
            },
            Pair::Bigs(x, y) => big(x - y),
            Pair::Floats(x, y) => Value::Float(x - y),
            Pair::Complex((a, b), (c, d)) => Value::Complex(a - c, b - d),
        });
    }
    match (a, b) {
        (Value::Set(_) | Value::FrozenSet(_), Value::Set(_) | Value::FrozenSet(_)) => {
            Ok(set_op(a, b, |x, y| x.difference(y).cloned().collect()))
        }
        _ => Err(unsupported(BinaryOp::Subtract, a, b)),
    }
}

fn multiply(a: &Value, b: &Value) -> RunResult<Value> {
    if let Some(pair) = coerce(a, b) {
        return Ok(match pair {
            Pair::Ints(x, y) => match x.checked_mul(y) {
                Some(r) => Value::Int(r),
                None => big(BigInt::from(x) * y),
            },
            Pair::Bigs(x, y) => big(x * y),
            Pair::Floats(x, y) => Value::Float(x * y),
            Pair::Complex((a, b), (c, d)) => {
                Value::Complex(a * c - b * d, a * d + b * c)
            }
        });
    }
    let (seq, count) = if is_sequence(a) { (a, b) } else { (b, a) };
    if !is_sequence(seq) {
        return Err(unsupported(BinaryOp::Multiply, a, b));
    }
    let times = match count {
        Value::Long(n) if n.is_negative() => 0,
        Value::Long(_) => {
            return Err(ExcType::OverflowError.err(
                "cannot fit 'int' into an index-sized integer",
            ));
        }
        _ => count.as_i64().ok_or_else(|| {
            ExcType::TypeError.err(format!(
                "can't multiply sequence by non-int of type '{}'",
                count.type_name()
            ))
        })?,
    };
    repeat(seq, times)
}

fn is_sequence(value: &Value) -> bool {
    matches!(
        value,
        Value::Str(_) | Value::List(_) | Value::Tuple(_) | Value::Bytes(_)
    )
}

/// `seq * count`. The result size is checked before anything is allocated.
fn repeat(seq: &Value, count: i64) -> RunResult<Value> {
    let times = count.max(0) as usize;
    match seq {
        Value::Str(s) => {
            let total = repeated_len(s.len(), times, 1)
                .ok_or_else(|| ExcType::OverflowError.err("repeated string is too long"))?;
            let mut out = String::new();
            out.try_reserve_exact(total).map_err(|_| out_of_memory())?;
            if total > 0 {
                (0..times).for_each(|_| out.push_str(s));
            }
            Ok(Value::str(&out))
        }
        Value::Bytes(b) => {
            let total = repeated_len(b.len(), times, 1)
                .ok_or_else(|| ExcType::OverflowError.err("repeated bytes are too long"))?;
            let mut out = Vec::new();
            out.try_reserve_exact(total).map_err(|_| out_of_memory())?;
            if total > 0 {
                (0..times).for_each(|_| out.extend_from_slice(b));
            }
            Ok(Value::Bytes(out.into()))
        }
        Value::Tuple(items) => Ok(Value::tuple(cycle(items, times)?)),
        Value::List(items) => Ok(Value::list(cycle(&items.borrow(), times)?)),
        other => Err(ExcType::TypeError.err(format!(
            "can't multiply sequence of type '{}'",
            other.type_name()
        ))),
    }
}

/// Length of `times` copies of `unit` elements, if its byte size fits in `isize`.
fn repeated_len(unit: usize, times: usize, elem_size: usize) -> Option<usize> {
    let total = unit.checked_mul(times)?;
    let bytes = total.checked_mul(elem_size)?;
    (bytes <= isize::MAX as usize).then_some(total)
}

fn out_of_memory() -> RunError {
    RunError::Exc(ExcType::MemoryError.instance(Vec::new()))
}

fn cycle(items: &[Value], times: usize) -> RunResult<Vec<Value>> {
    let total = repeated_len(items.len(), times, std::mem::size_of::<Value>())
        .ok_or_else(out_of_memory)?;
    let mut out = Vec::new();
    out.try_reserve_exact(total).map_err(|_| out_of_memory())?;
    if total > 0 {
        (0..times).for_each(|_| out.extend_from_slice(items));
    }
    Ok(out)
}

fn true_divide(a: &Value, b: &Value) -> RunResult<Value> {
    match coerce(a, b) {
        Some(Pair::Ints(x, y)) => {
            if y == 0 {
                return Err(zero_division("division by zero"));
            }
            Ok(Value::Float(x as f64 / y as f64))
        }
        Some(Pair::Bigs(x, y)) => {
            if y.is_zero() {
                return Err(zero_division("division by zero"));
            }
            let x = x.to_f64().unwrap_or(f64::INFINITY);
            let y = y.to_f64().unwrap_or(f64::INFINITY);
            Ok(Value::Float(x / y))
        }
        Some(Pair::Floats(x, y)) => {
            if y == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            Ok(Value::Float(x / y))
        }
        Some(Pair::Complex((a, b), (c, d))) => {
            if c == 0.0 && d == 0.0 {
                return Err(zero_division("complex division by zero"));
            }
            let denom = c * c + d * d;
            Ok(Value::Complex((a * c + b * d) / denom, (b * c - a * d) / denom))
        }
        None => Err(unsupported(BinaryOp::TrueDivide, a, b)),
    }
}

/// Python `divmod` for floats: the remainder takes the sign of `y`.
pub fn float_divmod(x: f64, y: f64) -> (f64, f64) {
    let mut rem = x % y;
    let mut div = (x - rem) / y;
    if rem != 0.0 {
        if (y < 0.0) != (rem < 0.0) {
            rem += y;
            div -= 1.0;
        }
    } else {
        rem = 0.0f64.copysign(y);
    }
    let floordiv = if div != 0.0 {
        let floor = div.floor();
        if div - floor > 0.5 { floor + 1.0 } else { floor }
    } else {
        0.0f64.copysign(x / y)
    };
    (floordiv, rem)
}

fn floor_divide(a: &Value, b: &Value) -> RunResult<Value> {
    match coerce(a, b) {
        Some(Pair::Ints(x, y)) => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            if x == i64::MIN && y == -1 {
                return Ok(big(-BigInt::from(x)));
            }
            Ok(Value::Int(Integer::div_floor(&x, &y)))
        }
        Some(Pair::Bigs(x, y)) => {
            if y.is_zero() {
                return Err(zero_division("integer division or modulo by zero"));
            }
            Ok(big(Integer::div_floor(&x, &y)))
        }
        Some(Pair::Floats(x, y)) => {
            if y == 0.0 {
                return Err(zero_division("float divmod()"));
            }
            Ok(Value::Float(float_divmod(x, y).0))
        }
        Some(Pair::Complex(..)) => {
            Err(ExcType::TypeError.err("can't take floor of complex number."))
        }
        None => Err(unsupported(BinaryOp::FloorDivide, a, b)),
    }
}

fn modulo(a: &Value, b: &Value) -> RunResult<Value> {
    if let Value::Str(fmt) = a {
        return printf::format(fmt, b).map(|s| Value::str(&s));
    }
    match coerce(a, b) {
        Some(Pair::Ints(x, y)) => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            if y == -1 {
                return Ok(Value::Int(0));
            }
            Ok(Value::Int(Integer::mod_floor(&x, &y)))
        }
        Some(Pair::Bigs(x, y)) => {
            if y.is_zero() {
                return Err(zero_division("integer division or modulo by zero"));
            }
            Ok(big(Integer::mod_floor(&x, &y)))
        }
        Some(Pair::Floats(x, y)) => {
            if y == 0.0 {
                return Err(zero_division("float modulo"));
            }
            Ok(Value::Float(float_divmod(x, y).1))
        }
        Some(Pair::Complex(..)) => {
            Err(ExcType::TypeError.err("can't mod complex numbers."))
        }
        None => Err(unsupported(BinaryOp::Modulo, a, b)),
    }
}

fn power(a: &Value, b: &Value) -> RunResult<Value> {
    match coerce(a, b) {
        Some(Pair::Ints(x, y)) if y >= 0 => {
            if let Some(r) = u32::try_from(y).ok().and_then(|e| x.checked_pow(e)) {
                return Ok(Value::Int(r));
            }
            int_power(BigInt::from(x), BigInt::from(y))
        }
        Some(Pair::Bigs(x, y)) if !y.is_negative() => int_power(x, y),
        Some(Pair::Ints(..) | Pair::Bigs(..)) => {
            let x = a.as_num().map(Num::to_f64).unwrap_or(0.0);
            let y = b.as_num().map(Num::to_f64).unwrap_or(0.0);
            float_power(x, y)
        }
        Some(Pair::Floats(x, y)) => float_power(x, y),
        Some(Pair::Complex(x, y)) => {
            let (re, im) = complex_power(x, y)?;
            Ok(Value::Complex(re, im))
        }
        None => Err(unsupported(BinaryOp::Power, a, b)),
    }
}

fn int_power(base: BigInt, exp: BigInt) -> RunResult<Value> {
    if base.is_zero() || base == BigInt::from(1) {
        return Ok(big(if exp.is_zero() { BigInt::from(1) } else { base }));
    }
    let exp = exp
        .to_u32()
        .ok_or_else(|| ExcType::OverflowError.err("exponent too large"))?;
    Ok(big(num_traits::pow(base, exp as usize)))
}

fn float_power(x: f64, y: f64) -> RunResult<Value> {
    if x == 0.0 && y < 0.0 {
        return Err(zero_division("0.0 cannot be raised to a negative power"));
    }
    if x < 0.0 && y.fract() != 0.0 {
        let (re, im) = complex_power((x, 0.0), (y, 0.0))?;
        return Ok(Value::Complex(re, im));
    }
    Ok(Value::Float(x.powf(y)))
}

fn complex_power((a, b): (f64, f64), (c, d): (f64, f64)) -> RunResult<(f64, f64)> {
    if c == 0.0 && d == 0.0 {
        return Ok((1.0, 0.0));
    }
    if a == 0.0 && b == 0.0 {
        if d != 0.0 || c < 0.0 {
            return Err(zero_division("0.0 to a negative or complex power"));
        }
        return Ok((0.0, 0.0));
    }
    let vabs = a.hypot(b);
    let mut len = vabs.powf(c);
    let at = b.atan2(a);
    let mut phase = at * c;
    if d != 0.0 {
        len /= (at * d).exp();
        phase += d * vabs.ln();
    }
    Ok((len * phase.cos(), len * phase.sin()))
}

// ── bitwise ────────────────────────────────────────────────────────

fn shift_count(b: &Value, op: BinaryOp, a: &Value) -> RunResult<usize> {
    let count = b.as_bigint().ok_or_else(|| unsupported(op, a, b))?;
    if count.is_negative() {
        return Err(ExcType::ValueError.err("negative shift count"));
    }
    count
        .to_usize()
        .ok_or_else(|| ExcType::OverflowError.err("Python int too large to convert to C ssize_t"))
}

fn lshift(a: &Value, b: &Value) -> RunResult<Value> {
    let x = a.as_bigint().ok_or_else(|| unsupported(BinaryOp::Lshift, a, b))?;
    let count = shift_count(b, BinaryOp::Lshift, a)?;
    if let (Some(x), true) = (x.to_i64(), count < 64) {
        if let Ok(r) = i64::try_from((x as i128) << count) {
            return Ok(Value::Int(r));
        }
    }
    Ok(big(x.into_owned() << count))
}

fn rshift(a: &Value, b: &Value) -> RunResult<Value> {
    let x = a.as_bigint().ok_or_else(|| unsupported(BinaryOp::Rshift, a, b))?;
    let count = shift_count(b, BinaryOp::Rshift, a)?;
    if let Some(x) = x.to_i64() {
        return Ok(Value::Int(if count >= 64 { x >> 63 } else { x >> count }));
    }
    Ok(big(x.into_owned() >> count))
}

fn bitwise(
    a: &Value,
    b: &Value,
    op: BinaryOp,
    ints: fn(i64, i64) -> i64,
    bigs: fn(&BigInt, &BigInt) -> BigInt,
    sets: fn(&Set, &Set) -> Set,
) -> RunResult<Value> {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => {
            return Ok(Value::Bool(ints(*x as i64, *y as i64) != 0));
        }
        (Value::Set(_) | Value::FrozenSet(_), Value::Set(_) | Value::FrozenSet(_)) => {
            return Ok(set_op(a, b, sets));
        }
        _ => {}
    }
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Ok(Value::Int(ints(x, y)));
    }
    match (a.as_bigint(), b.as_bigint()) {
        (Some(x), Some(y)) => Ok(big(bigs(&x, &y))),
        _ => Err(unsupported(op, a, b)),
    }
}

fn bit_and(a: &Value, b: &Value) -> RunResult<Value> {
    bitwise(a, b, BinaryOp::And, |x, y| x & y, |x, y| x & y, |x, y| {
        x.intersection(y).cloned().collect()
    })
}

fn bit_or(a: &Value, b: &Value) -> RunResult<Value> {
    bitwise(a, b, BinaryOp::Or, |x, y| x | y, |x, y| x | y, |x, y| {
        x.union(y).cloned().collect()
    })
}

fn bit_xor(a: &Value, b: &Value) -> RunResult<Value> {
    bitwise(a, b, BinaryOp::Xor, |x, y| x ^ y, |x, y| x ^ y, |x, y| {
        x.symmetric_difference(y).cloned().collect()
    })
}

/// Apply a set operation; the result is frozen when the left side is.
fn set_op(a: &Value, b: &Value, op: impl FnOnce(&Set, &Set) -> Set) -> Value {
    let result = with_set(a, |x| with_set(b, |y| op(x, y)));
    match a {
        Value::FrozenSet(_) => Value::FrozenSet(Rc::new(result)),
        _ => Value::set(result),
    }
}

// ── unary ──────────────────────────────────────────────────────────

pub fn unary(op: UnaryOp, value: &Value) -> RunResult<Value> {
    let bad = || {
        let symbol = match op {
            UnaryOp::Positive => "+",
            UnaryOp::Negative => "-",
            UnaryOp::Not => "not",
            UnaryOp::Invert => "~",
        };
        ExcType::TypeError.err(format!(
            "bad operand type for unary {symbol}: '{}'",
            value.type_name()
        ))
    };
    if op == UnaryOp::Not {
        return Ok(Value::Bool(!value.is_truthy()));
    }
    let num = value.as_num().ok_or_else(bad)?;
    Ok(match (op, num) {
        (UnaryOp::Positive, Num::Int(i)) => Value::Int(i),
        (UnaryOp::Positive, Num::Long(_) | Num::Float(_) | Num::Complex(..)) => {
            value.clone()
        }
        (UnaryOp::Negative, Num::Int(i)) => match i.checked_neg() {
            Some(r) => Value::Int(r),
            None => big(-BigInt::from(i)),
        },
        (UnaryOp::Negative, Num::Long(b)) => big(-b.clone()),
        (UnaryOp::Negative, Num::Float(f)) => Value::Float(-f),
        (UnaryOp::Negative, Num::Complex(re, im)) => Value::Complex(-re, -im),
        (UnaryOp::Invert, Num::Int(i)) => Value::Int(!i),
        (UnaryOp::Invert, Num::Long(b)) => big(-(b.clone() + BigInt::from(1))),
        _ => return Err(bad()),
    })
}

// ── subscripts ─────────────────────────────────────────────────────

fn index_of(index: &Value, container: &Value) -> RunResult<i64> {
    match index {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(*b as i64),
        Value::Long(_) => Err(ExcType::IndexError.err(
            "cannot fit 'int' into an index-sized integer",
        )),
        other => Err(ExcType::TypeError.err(format!(
            "{} indices must be integers, not {}",
            container.type_name(),
            other.type_name()
        ))),
    }
}

/// Resolve a possibly negative index against `len`.
fn normalize(index: i64, len: usize) -> Option<usize> {
    let idx = if index < 0 { index + len as i64 } else { index };
    (0..len as i64).contains(&idx).then_some(idx as usize)
}

fn slice_bound(value: &Value) -> RunResult<Option<i64>> {
    match value {
        Value::None => Ok(None),
        Value::Int(i) => Ok(Some(*i)),
        Value::Bool(b) => Ok(Some(*b as i64)),
        Value::Long(b) => Ok(Some(if b.is_negative() { i64::MIN } else { i64::MAX })),
        _ => Err(ExcType::TypeError.err(
            "slice indices must be integers or None or have an __index__ method",
        )),
    }
}

/// The positions selected by `slice` in a sequence of `len` items.
pub fn slice_positions(slice: &crate::value::Slice, len: usize) -> RunResult<Vec<usize>> {
    let step = slice_bound(&slice.step)?.unwrap_or(1);
    if step == 0 {
        return Err(ExcType::ValueError.err("slice step cannot be zero"));
    }
    let len = len as i64;
    let clamp = |v: Option<i64>, default: i64| match v {
        None => default,
        Some(mut v) => {
            if v < 0 {
                v = v.saturating_add(len);
                if v < 0 {
                    v = if step < 0 { -1 } else { 0 };
                }
            } else if v >= len {
                v = if step < 0 { len - 1 } else { len };
            }
            v
        }
    };
    let (start, stop) = if step > 0 {
        (clamp(slice_bound(&slice.start)?, 0), clamp(slice_bound(&slice.stop)?, len))
    } else {
        (clamp(slice_bound(&slice.start)?, len - 1), clamp(slice_bound(&slice.stop)?, -1))
    };
    let mut positions = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        positions.push(i as usize);
        match i.checked_add(step) {
            Some(next) => i = next,
            None => break,
        }
    }
    Ok(positions)
}

fn subscript(container: &Value, index: &Value) -> RunResult<Value> {
    if let Value::Dict(dict) = container {
        let key = hash_key(index.clone())?;
        return match dict.borrow().get(&key) {
            Some(value) => Ok(value.clone()),
            None => Err(RunError::Exc(ExcType::KeyError.instance(vec![index.clone()]))),
        };
    }
    if let Value::Slice(slice) = index {
        return slice_sequence(container, slice);
    }
    let out_of_range = |what: &str| ExcType::IndexError.err(format!("{what} index out of range"));
    match container {
        Value::List(items) => {
            let items = items.borrow();
            let i = index_of(index, container)?;
            normalize(i, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| out_of_range("list"))
        }
        Value::Tuple(items) => {
            let i = index_of(index, container)?;
            normalize(i, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| out_of_range("tuple"))
        }
        Value::Str(s) => {
            let i = index_of(index, container)?;
            let count = s.chars().count();
            normalize(i, count)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::str(c.encode_utf8(&mut [0; 4])))
                .ok_or_else(|| out_of_range("string"))
        }
        Value::Bytes(b) => {
            let i = index_of(index, container)?;
            normalize(i, b.len())
                .map(|i| Value::Int(b[i] as i64))
                .ok_or_else(|| ExcType::IndexError.err("index out of range"))
        }
        Value::Range(r) => {
            let i = index_of(index, container)?;
            normalize(i, r.len())
                .and_then(|i| r.get(i))
                .map(Value::Int)
                .ok_or_else(|| out_of_range("range object"))
        }
        other => Err(ExcType::TypeError.err(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn slice_sequence(container: &Value, slice: &crate::value::Slice) -> RunResult<Value> {
    match container {
        Value::List(items) => {
            let items = items.borrow();
            let picked = slice_positions(slice, items.len())?;
            Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Tuple(items) => {
            let picked = slice_positions(slice, items.len())?;
            Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_positions(slice, chars.len())?;
            Ok(Value::str(&picked.into_iter().map(|i| chars[i]).collect::<String>()))
        }
        Value::Bytes(b) => {
            let picked = slice_positions(slice, b.len())?;
            Ok(Value::Bytes(picked.into_iter().map(|i| b[i]).collect()))
        }
        Value::Range(r) => {
            let picked = slice_positions(slice, r.len())?;
            Ok(Value::tuple(
                picked.into_iter().filter_map(|i| r.get(i)).map(Value::Int).collect(),
            ))
        }
        other => Err(ExcType::TypeError.err(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// `container[index] = value`
pub fn store_subscript(container: &Value, index: &Value, value: Value) -> RunResult<()> {
    match container {
        Value::Dict(dict) => {
            let key = hash_key(index.clone())?;
            dict.borrow_mut().insert(key, value);
            Ok(())
        }
        Value::List(items) => {
            if let Value::Slice(slice) = index {
                let replacement = match &value {
                    Value::List(l) => l.borrow().clone(),
                    Value::Tuple(t) => t.to_vec(),
                    other => {
                        return Err(ExcType::TypeError.err(format!(
                            "can only assign an iterable, not '{}'",
                            other.type_name()
                        )));
                    }
                };
                return assign_slice(&mut items.borrow_mut(), slice, replacement);
            }
            let i = index_of(index, container)?;
            let mut items = items.borrow_mut();
            let len = items.len();
            let slot = normalize(i, len)
                .ok_or_else(|| ExcType::IndexError.err("list assignment index out of range"))?;
            items[slot] = value;
            Ok(())
        }
        other => Err(ExcType::TypeError.err(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn assign_slice(
    items: &mut Vec<Value>,
    slice: &crate::value::Slice,
    replacement: Vec<Value>,
) -> RunResult<()> {
    let step = slice_bound(&slice.step)?.unwrap_or(1);
    let positions = slice_positions(slice, items.len())?;
    if step == 1 {
        let start = match positions.first() {
            Some(&p) => p,
            None => {
                let start = slice_bound(&slice.start)?.unwrap_or(0);
                let len = items.len() as i64;
                let start = if start < 0 { (start + len).max(0) } else { start.min(len) };
                start as usize
            }
        };
        let end = start + positions.len();
        items.splice(start..end, replacement);
        return Ok(());
    }
    if positions.len() != replacement.len() {
        return Err(ExcType::ValueError.err(format!(
            "attempt to assign sequence of size {} to extended slice of size {}",
            replacement.len(),
            positions.len()
        )));
    }
    for (pos, value) in positions.into_iter().zip(replacement) {
        items[pos] = value;
    }
    Ok(())
}

/// `del container[index]`
pub fn delete_subscript(container: &Value, index: &Value) -> RunResult<()> {
    match container {
        Value::Dict(dict) => {
            let key = hash_key(index.clone())?;
            match dict.borrow_mut().shift_remove(&key) {
                Some(_) => Ok(()),
                None => Err(RunError::Exc(ExcType::KeyError.instance(vec![index.clone()]))),
            }
        }
        Value::List(items) => {
            if let Value::Slice(slice) = index {
                let mut items = items.borrow_mut();
                let mut positions = slice_positions(slice, items.len())?;
                positions.sort_unstable();
                for pos in positions.into_iter().rev() {
                    items.remove(pos);
                }
                return Ok(());
            }
            let i = index_of(index, container)?;
            let mut items = items.borrow_mut();
            let len = items.len();
            let slot = normalize(i, len)
                .ok_or_else(|| ExcType::IndexError.err("list assignment index out of range"))?;
            items.remove(slot);
            Ok(())
        }
        other => Err(ExcType::TypeError.err(format!(
            "'{}' object doesn't support item deletion",
            other.type_name()
        ))),
    }
}

// ── comparisons ────────────────────────────────────────────────────

fn unorderable(a: &Value, b: &Value, op: CompareOp) -> RunError {
    ExcType::TypeError.err(format!(
        "unorderable types: {}() {} {}()",
        a.type_name(),
        op.symbol(),
        b.type_name()
    ))
}

/// Ordering of two builtin values; `None` when unordered (NaN).
pub fn ordering(a: &Value, b: &Value, op: CompareOp) -> RunResult<Option<Ordering>> {
    if let Some(pair) = coerce(a, b) {
        return match pair {
            Pair::Ints(x, y) => Ok(Some(x.cmp(&y))),
            Pair::Bigs(x, y) => Ok(Some(x.cmp(&y))),
            Pair::Floats(x, y) => Ok(x.partial_cmp(&y)),
            Pair::Complex(..) => Err(unorderable(a, b, op)),
        };
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(Some(x.cmp(y))),
        (Value::Bytes(x), Value::Bytes(y)) => Ok(Some(x.cmp(y))),
        (Value::Tuple(x), Value::Tuple(y)) => sequence_ordering(x, y, op),
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow().clone(), y.borrow().clone());
            sequence_ordering(&x, &y, op)
        }
        _ => Err(unorderable(a, b, op)),
    }
}

fn sequence_ordering(x: &[Value], y: &[Value], op: CompareOp) -> RunResult<Option<Ordering>> {
    for (a, b) in x.iter().zip(y) {
        if !values_eq(a, b) {
            return ordering(a, b, op);
        }
    }
    Ok(Some(x.len().cmp(&y.len())))
}

fn is_set(value: &Value) -> bool {
    matches!(value, Value::Set(_) | Value::FrozenSet(_))
}

fn subset(a: &Value, b: &Value) -> bool {
    with_set(a, |x| with_set(b, |y| x.iter().all(|k| y.contains(k))))
}

fn set_len(value: &Value) -> usize {
    with_set(value, |s| s.len())
}

fn ordered(a: &Value, b: &Value, op: CompareOp, accept: fn(Ordering) -> bool) -> RunResult<Value> {
    if is_set(a) && is_set(b) {
        let result = match op {
            CompareOp::Lt => subset(a, b) && set_len(a) < set_len(b),
            CompareOp::Le => subset(a, b),
            CompareOp::Gt => subset(b, a) && set_len(a) > set_len(b),
            _ => subset(b, a),
        };
        return Ok(Value::Bool(result));
    }
    Ok(Value::Bool(ordering(a, b, op)?.is_some_and(accept)))
}

fn less(a: &Value, b: &Value) -> RunResult<Value> {
    ordered(a, b, CompareOp::Lt, Ordering::is_lt)
}

fn less_equal(a: &Value, b: &Value) -> RunResult<Value> {
    ordered(a, b, CompareOp::Le, Ordering::is_le)
}

fn greater(a: &Value, b: &Value) -> RunResult<Value> {
    ordered(a, b, CompareOp::Gt, Ordering::is_gt)
}

fn greater_equal(a: &Value, b: &Value) -> RunResult<Value> {
    ordered(a, b, CompareOp::Ge, Ordering::is_ge)
}

fn equal(a: &Value, b: &Value) -> RunResult<Value> {
    Ok(Value::Bool(values_eq(a, b)))
}

fn not_equal(a: &Value, b: &Value) -> RunResult<Value> {
    Ok(Value::Bool(!values_eq(a, b)))
}

fn is(a: &Value, b: &Value) -> RunResult<Value> {
    Ok(Value::Bool(a.is(b)))
}

fn is_not(a: &Value, b: &Value) -> RunResult<Value> {
    Ok(Value::Bool(!a.is(b)))
}

/// `item in container` for builtin containers.
pub fn contains_item(container: &Value, item: &Value) -> RunResult<bool> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(&**needle)),
            other => Err(ExcType::TypeError.err(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Bytes(b) => match item {
            Value::Bytes(needle) => {
                Ok(needle.is_empty() || b.windows(needle.len()).any(|w| w == &needle[..]))
            }
            other => match other.as_i64() {
                Some(byte) => Ok(b.iter().any(|&x| x as i64 == byte)),
                None => Err(ExcType::TypeError.err("Type str doesn't support the buffer API")),
            },
        },
        Value::List(items) => Ok(items.borrow().iter().any(|x| values_eq(x, item))),
        Value::Tuple(items) => Ok(items.iter().any(|x| values_eq(x, item))),
        Value::Dict(dict) => {
            let key = hash_key(item.clone())?;
            Ok(dict.borrow().contains_key(&key))
        }
        Value::Set(_) | Value::FrozenSet(_) => {
            let key = hash_key(item.clone())?;
            Ok(with_set(container, |s| s.contains(&key)))
        }
        Value::Range(r) => Ok(match item.as_i64() {
            Some(i) => {
                let in_bounds = if r.step > 0 {
                    r.start <= i && i < r.stop
                } else {
                    r.stop < i && i <= r.start
                };
                in_bounds && (i - r.start) % r.step == 0
            }
            None => false,
        }),
        other => Err(ExcType::TypeError.err(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn contains(item: &Value, container: &Value) -> RunResult<Value> {
    contains_item(container, item).map(Value::Bool)
}

fn not_contains(item: &Value, container: &Value) -> RunResult<Value> {
    contains_item(container, item).map(|found| Value::Bool(!found))
}

fn is_exception_class(value: &Value) -> bool {
    match value {
        Value::ExcType(_) => true,
        Value::Class(class) => class.exc_base().is_some(),
        Value::Tuple(items) => items.iter().all(is_exception_class),
        _ => false,
    }
}

fn exception_match(exc: &Value, handler: &Value) -> RunResult<Value> {
    if !is_exception_class(handler) {
        return Err(ExcType::TypeError.err(
            "catching classes that do not inherit from BaseException is not allowed",
        ));
    }
    Ok(Value::Bool(exception_matches(exc, handler)))
}

fn bad_compare(_: &Value, _: &Value) -> RunResult<Value> {
    Err(ExcType::SystemError.err("bad COMPARE_OP argument"))
}
