use bytecode::{BinaryOp, CompareOp};
use num_bigint::BigInt;
use num_traits::{FromPrimitive, Num as _, Signed, Zero};

use crate::args::CallArgs;
use crate::builtins::expect_int;
use crate::exceptions::{ExcType, RunResult};
use crate::interpreter::Interpreter;
use crate::value::{Num, Value};

pub fn abs(_: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("abs", 1, 1)?;
    let value = &args.positional[0];
    match value.as_num() {
        Some(Num::Int(i)) => Ok(match i.checked_abs() {
            Some(r) => Value::Int(r),
            None => Value::from_bigint(BigInt::from(i).abs()),
        }),
        Some(Num::Long(b)) => Ok(Value::from_bigint(b.abs())),
        Some(Num::Float(f)) => Ok(Value::Float(f.abs())),
        Some(Num::Complex(re, im)) => Ok(Value::Float(re.hypot(im))),
        None => Err(ExcType::TypeError.err(format!(
            "bad operand type for abs(): '{}'",
            value.type_name()
        ))),
    }
}

/// Parse an integer literal the way `int(text, base)` does.
pub fn parse_int(text: &str, base: u32) -> Option<BigInt> {
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = digits.to_ascii_lowercase();
    let (base, digits) = match (base, lower.get(..2)) {
        (0 | 16, Some("0x")) => (16, &lower[2..]),
        (0 | 8, Some("0o")) => (8, &lower[2..]),
        (0 | 2, Some("0b")) => (2, &lower[2..]),
        (0, _) => {
            if lower.len() > 1 && lower.starts_with('0') && lower.bytes().any(|b| b != b'0') {
                return None;
            }
            (10, lower.as_str())
        }
        (base, _) => (base, lower.as_str()),
    };
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    let value = BigInt::from_str_radix(digits, base).ok()?;
    Some(if negative { -value } else { value })
}

pub fn int(interp: &mut Interpreter, mut args: CallArgs) -> RunResult<Value> {
    if let Some(base) = args.take_keyword("base") {
        args.positional.push(base);
    }
    args.check("int", 0, 2)?;
    let Some(value) = args.get(0) else {
        return Ok(Value::Int(0));
    };
    if let Some(base) = args.get(1) {
        let base = expect_int(base)?;
        if base != 0 && !(2..=36).contains(&base) {
            return Err(ExcType::ValueError.err("int() base must be >= 2 and <= 36"));
        }
        let Value::Str(text) = value else {
            return Err(ExcType::TypeError.err(
                "int() can't convert non-string with explicit base",
            ));
        };
        return parse_int(text, base as u32)
            .map(Value::from_bigint)
            .ok_or_else(|| invalid_literal(text, base));
    }
    match value {
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Int(_) | Value::Long(_) => Ok(value.clone()),
        Value::Float(f) => {
            if f.is_nan() {
                return Err(ExcType::ValueError.err("cannot convert float NaN to integer"));
            }
            BigInt::from_f64(f.trunc())
                .map(Value::from_bigint)
                .ok_or_else(|| ExcType::OverflowError.err("cannot convert float infinity to integer"))
        }
        Value::Str(text) => parse_int(text, 10)
            .map(Value::from_bigint)
            .ok_or_else(|| invalid_literal(text, 10)),
        Value::Instance(_) => match interp.lookup_special(value, "__int__") {
            Some(method) => interp.call_value(method, CallArgs::default()),
            None => Err(not_a_number("int", value)),
        },
        other => Err(not_a_number("int", other)),
    }
}

fn invalid_literal(text: &str, base: i64) -> crate::exceptions::RunError {
    ExcType::ValueError.err(format!(
        "invalid literal for int() with base {base}: {}",
        crate::format::str_repr(text)
    ))
}

fn not_a_number(func: &str, value: &Value) -> crate::exceptions::RunError {
    ExcType::TypeError.err(format!(
        "{func}() argument must be a string or a number, not '{}'",
        value.type_name()
    ))
}

pub fn parse_float(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let lower = trimmed.to_ascii_lowercase();
    let unsigned = lower.trim_start_matches(['+', '-']);
    match unsigned {
        "inf" | "infinity" | "nan" => {
            let magnitude = if unsigned == "nan" { f64::NAN } else { f64::INFINITY };
            Some(if lower.starts_with('-') { -magnitude } else { magnitude })
        }
        _ => trimmed.parse().ok(),
    }
}

pub fn float(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("float", 0, 1)?;
    let Some(value) = args.get(0) else {
        return Ok(Value::Float(0.0));
    };
    match value {
        Value::Str(text) => parse_float(text).map(Value::Float).ok_or_else(|| {
            ExcType::ValueError.err(format!(
                "could not convert string to float: {}",
                crate::format::str_repr(text)
            ))
        }),
        Value::Instance(_) => match interp.lookup_special(value, "__float__") {
            Some(method) => interp.call_value(method, CallArgs::default()),
            None => Err(not_a_number("float", value)),
        },
        other => match other.as_num() {
            Some(Num::Complex(..)) | None => Err(not_a_number("float", other)),
            Some(Num::Long(b)) => num_traits::ToPrimitive::to_f64(b)
                .filter(|f| f.is_finite())
                .map(Value::Float)
                .ok_or_else(|| ExcType::OverflowError.err("int too large to convert to float")),
            Some(n) => Ok(Value::Float(n.to_f64())),
        },
    }
}

pub fn divmod(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("divmod", 2, 2)?;
    let (a, b) = (&args.positional[0], &args.positional[1]);
    let quotient = interp.binary_op(BinaryOp::FloorDivide, a, b)?;
    let remainder = interp.binary_op(BinaryOp::Modulo, a, b)?;
    Ok(Value::tuple(vec![quotient, remainder]))
}

pub fn pow(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("pow", 2, 3)?;
    let (base, exp) = (&args.positional[0], &args.positional[1]);
    let Some(modulus) = args.get(2).filter(|m| !m.is_none()) else {
        return interp.binary_op(BinaryOp::Power, base, exp);
    };
    let (Some(b), Some(e), Some(m)) = (base.as_bigint(), exp.as_bigint(), modulus.as_bigint()) else {
        return Err(ExcType::TypeError.err(
            "pow() 3rd argument not allowed unless all arguments are integers",
        ));
    };
    if e.is_negative() {
        return Err(ExcType::ValueError.err(
            "pow() 2nd argument cannot be negative when 3rd argument specified",
        ));
    }
    if m.is_zero() {
        return Err(ExcType::ValueError.err("pow() 3rd argument cannot be 0"));
    }
    // modpow rounds like mod_floor, so the result takes the modulus' sign.
    Ok(Value::from_bigint(b.modpow(&e, &m)))
}

pub fn hex(_: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("hex", 1, 1)?;
    let value = &args.positional[0];
    let n = value.as_bigint().ok_or_else(|| {
        ExcType::TypeError.err(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })?;
    let sign = if n.is_negative() { "-" } else { "" };
    Ok(Value::str(&format!("{sign}0x{:x}", n.magnitude())))
}

fn extremum(
    interp: &mut Interpreter,
    mut args: CallArgs,
    name: &str,
    op: CompareOp,
) -> RunResult<Value> {
    let key = args.take_keyword("key").filter(|k| !k.is_none());
    let default = args.take_keyword("default");
    args.check(name, 1, usize::MAX)?;
    let items = if args.len() == 1 {
        interp.collect_iterable(&args.positional[0])?
    } else {
        args.positional
    };

    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let rank = match &key {
            Some(key) => interp.call_value(key.clone(), CallArgs::new(vec![item.clone()]))?,
            None => item.clone(),
        };
        let better = match &best {
            None => true,
            Some((best_rank, _)) => interp.compare_op(op, &rank, best_rank)?.is_truthy(),
        };
        if better {
            best = Some((rank, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(ExcType::ValueError.err(format!("{name}() arg is an empty sequence"))),
    }
}

pub fn min(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    extremum(interp, args, "min", CompareOp::Lt)
}

pub fn max(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    extremum(interp, args, "max", CompareOp::Gt)
}

pub fn sum(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("sum", 1, 2)?;
    let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
    if matches!(total, Value::Str(_)) {
        return Err(ExcType::TypeError.err(
            "sum() can't sum strings [use ''.join(seq) instead]",
        ));
    }
    let iter = interp.get_iter(&args.positional[0])?;
    while let Some(item) = interp.iter_next(&iter)? {
        total = interp.binary_op(BinaryOp::Add, &total, &item)?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_literals() {
        assert_eq!(parse_int(" 42 ", 10), Some(BigInt::from(42)));
        assert_eq!(parse_int("-0x1f", 0), Some(BigInt::from(-31)));
        assert_eq!(parse_int("ff", 16), Some(BigInt::from(255)));
        assert_eq!(parse_int("0b101", 2), Some(BigInt::from(5)));
        assert_eq!(parse_int("012", 0), None);
        assert_eq!(parse_int("000", 0), Some(BigInt::from(0)));
        assert_eq!(parse_int("1.5", 10), None);
        assert_eq!(parse_int("", 10), None);
        assert_eq!(parse_int("--1", 10), None);
    }

    #[test]
    fn float_literals() {
        assert_eq!(parse_float("2.5"), Some(2.5));
        assert_eq!(parse_float(" -inf"), Some(f64::NEG_INFINITY));
        assert!(parse_float("nan").is_some_and(f64::is_nan));
        assert_eq!(parse_float("1e3"), Some(1000.0));
        assert_eq!(parse_float("abc"), None);
    }
}
