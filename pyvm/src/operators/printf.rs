//! `str % args` formatting.

use num_bigint::BigInt;
use num_traits::Signed;

use crate::exceptions::{ExcType, RunError, RunResult};
use crate::format::{repr, to_str};
use crate::value::{Namespace, Num, Value};

#[derive(Debug, Default, Clone, Copy)]
struct Spec {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alternate: bool,
    width: usize,
    precision: Option<usize>,
}

enum Args<'a> {
    Positional(Vec<Value>, usize),
    Mapping(&'a Value),
}

impl Args<'_> {
    fn next(&mut self) -> RunResult<Value> {
        match self {
            Args::Positional(items, idx) => {
                let value = items.get(*idx).cloned().ok_or_else(|| {
                    ExcType::TypeError.err("not enough arguments for format string")
                })?;
                *idx += 1;
                Ok(value)
            }
            Args::Mapping(value) => Ok((*value).clone()),
        }
    }
}

pub fn format(fmt: &str, args: &Value) -> RunResult<String> {
    let mut args = match args {
        Value::Tuple(items) => Args::Positional(items.to_vec(), 0),
        Value::Dict(_) => Args::Mapping(args),
        other => Args::Positional(vec![other.clone()], 0),
    };
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec = Spec::default();
        let mut mapped = None;

        if chars.peek() == Some(&'(') {
            chars.next();
            let mut depth = 1;
            let mut key = String::new();
            for c in chars.by_ref() {
                match c {
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
                key.push(c);
            }
            if depth != 0 {
                return Err(ExcType::ValueError.err("incomplete format key"));
            }
            mapped = Some(lookup(args_mapping(&args)?, &key)?);
        }

        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.left = true,
                '+' => spec.plus = true,
                ' ' => spec.space = true,
                '0' => spec.zero = true,
                '#' => spec.alternate = true,
                _ => break,
            }
            chars.next();
        }

        if chars.peek() == Some(&'*') {
            chars.next();
            spec.width = star(&mut args, &mut spec)?;
        } else {
            spec.width = digits(&mut chars);
        }
        if chars.peek() == Some(&'.') {
            chars.next();
            if chars.peek() == Some(&'*') {
                chars.next();
                let mut ignored = Spec::default();
                spec.precision = Some(star(&mut args, &mut ignored)?);
            } else {
                spec.precision = Some(digits(&mut chars));
            }
        }
        // Length modifiers are accepted and ignored.
        while matches!(chars.peek(), Some('h' | 'l' | 'L')) {
            chars.next();
        }

        let conversion = chars
            .next()
            .ok_or_else(|| ExcType::ValueError.err("incomplete format"))?;
        if conversion == '%' {
            out.push('%');
            continue;
        }
        let value = match mapped {
            Some(value) => value,
            None => args.next()?,
        };
        let body = convert(conversion, &value, &spec)?;
        out.push_str(&body);
    }

    if let Args::Positional(items, used) = &args {
        if *used < items.len() {
            return Err(ExcType::TypeError.err(
                "not all arguments converted during string formatting",
            ));
        }
    }
    Ok(out)
}

fn args_mapping<'a>(args: &Args<'a>) -> RunResult<&'a Value> {
    match args {
        Args::Mapping(value) => Ok(*value),
        Args::Positional(..) => Err(ExcType::TypeError.err("format requires a mapping")),
    }
}

fn lookup(mapping: &Value, key: &str) -> RunResult<Value> {
    let Value::Dict(dict) = mapping else {
        return Err(ExcType::TypeError.err("format requires a mapping"));
    };
    dict.borrow()
        .get_str(key)
        .cloned()
        .ok_or_else(|| RunError::Exc(ExcType::KeyError.instance(vec![Value::str(key)])))
}

fn digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> usize {
    let mut n = 0usize;
    while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
        n = n.saturating_mul(10).saturating_add(d as usize);
        chars.next();
    }
    n
}

fn star(args: &mut Args<'_>, spec: &mut Spec) -> RunResult<usize> {
    let value = args.next()?;
    let n = value
        .as_i64()
        .ok_or_else(|| ExcType::TypeError.err("* wants int"))?;
    if n < 0 {
        spec.left = true;
    }
    Ok(n.unsigned_abs() as usize)
}

fn convert(conversion: char, value: &Value, spec: &Spec) -> RunResult<String> {
    let body = match conversion {
        's' => truncate(to_str(value), spec.precision),
        'r' | 'a' => truncate(repr(value), spec.precision),
        'c' => match value {
            Value::Str(s) if s.chars().count() == 1 => s.to_string(),
            other => {
                let code = other
                    .as_i64()
                    .ok_or_else(|| ExcType::TypeError.err("%c requires int or char"))?;
                u32::try_from(code)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| ExcType::OverflowError.err("%c arg not in range(0x110000)"))?
                    .to_string()
            }
        },
        'd' | 'i' | 'u' => {
            let n = integer(value, conversion)?;
            return Ok(pad_number(n.is_negative(), n.magnitude().to_string(), "", spec));
        }
        'x' | 'X' | 'o' => {
            let n = integer(value, conversion)?;
            let mut digits = match conversion {
                'x' => format!("{:x}", n.magnitude()),
                'X' => format!("{:X}", n.magnitude()),
                _ => format!("{:o}", n.magnitude()),
            };
            if let Some(p) = spec.precision {
                while digits.len() < p {
                    digits.insert(0, '0');
                }
            }
            let prefix = match (spec.alternate, conversion) {
                (true, 'x') => "0x",
                (true, 'X') => "0X",
                (true, _) => "0o",
                _ => "",
            };
            return Ok(pad_number(n.is_negative(), digits, prefix, spec));
        }
        'e' | 'E' | 'f' | 'F' | 'g' | 'G' => {
            let x = float(value, conversion)?;
            let precision = spec.precision.unwrap_or(6);
            let mut digits = match conversion {
                'e' | 'E' => exponent_form(x.abs(), precision),
                'f' | 'F' => fixed_form(x.abs(), precision),
                _ => general_form(x.abs(), precision, spec.alternate),
            };
            if conversion.is_ascii_uppercase() {
                digits = digits.to_uppercase();
            }
            let negative = x.is_sign_negative() && !x.is_nan();
            return Ok(pad_number(negative, digits, "", spec));
        }
        other => {
            return Err(ExcType::ValueError.err(format!(
                "unsupported format character '{other}' (0x{:x})",
                other as u32
            )));
        }
    };
    Ok(pad(body, spec))
}

fn truncate(s: String, precision: Option<usize>) -> String {
    match precision {
        Some(p) => s.chars().take(p).collect(),
        None => s,
    }
}

fn integer(value: &Value, conversion: char) -> RunResult<BigInt> {
    if let Some(n) = value.as_bigint() {
        return Ok(n.into_owned());
    }
    if let Value::Float(f) = value {
        if f.is_finite() {
            if let Some(n) = num_traits::FromPrimitive::from_f64(f.trunc()) {
                return Ok(n);
            }
        }
    }
    Err(ExcType::TypeError.err(format!(
        "%{conversion} format: a number is required, not {}",
        value.type_name()
    )))
}

fn float(value: &Value, conversion: char) -> RunResult<f64> {
    match value.as_num() {
        Some(Num::Complex(..)) | None => Err(ExcType::TypeError.err(format!(
            "a float is required, not {} for %{conversion}",
            value.type_name()
        ))),
        Some(n) => Ok(n.to_f64()),
    }
}

fn special(x: f64) -> Option<String> {
    if x.is_nan() {
        Some("nan".to_string())
    } else if x.is_infinite() {
        Some("inf".to_string())
    } else {
        None
    }
}

fn fixed_form(x: f64, precision: usize) -> String {
    special(x).unwrap_or_else(|| format!("{x:.precision$}"))
}

/// `1.500000e+02` style, with at least two exponent digits.
fn exponent_form(x: f64, precision: usize) -> String {
    if let Some(s) = special(x) {
        return s;
    }
    let raw = format!("{x:.precision$e}");
    let (mantissa, exp) = raw.split_once('e').unwrap_or((&raw, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exp.abs())
}

fn general_form(x: f64, precision: usize, alternate: bool) -> String {
    if let Some(s) = special(x) {
        return s;
    }
    let p = precision.max(1);
    if x == 0.0 {
        return if alternate { format!("{:.*}", p - 1, 0.0) } else { "0".to_string() };
    }
    let probe = format!("{x:.prec$e}", prec = p - 1);
    let exp: i32 = probe
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    let body = if exp < -4 || exp >= p as i32 {
        exponent_form(x, p - 1)
    } else {
        fixed_form(x, (p as i32 - 1 - exp).max(0) as usize)
    };
    if alternate {
        return body;
    }
    strip_zeros(&body)
}

fn strip_zeros(body: &str) -> String {
    let (mantissa, exp) = match body.split_once('e') {
        Some((m, e)) => (m, Some(e)),
        None => (body, None),
    };
    let mantissa = if mantissa.contains('.') {
        mantissa.trim_end_matches('0').trim_end_matches('.')
    } else {
        mantissa
    };
    match exp {
        Some(e) => format!("{mantissa}e{e}"),
        None => mantissa.to_string(),
    }
}

fn pad_number(negative: bool, digits: String, prefix: &str, spec: &Spec) -> String {
    let sign = if negative {
        "-"
    } else if spec.plus {
        "+"
    } else if spec.space {
        " "
    } else {
        ""
    };
    let head = format!("{sign}{prefix}");
    let len = head.len() + digits.chars().count();
    if spec.zero && !spec.left && len < spec.width {
        let zeros = "0".repeat(spec.width - len);
        return format!("{head}{zeros}{digits}");
    }
    pad(format!("{head}{digits}"), spec)
}

fn pad(body: String, spec: &Spec) -> String {
    let len = body.chars().count();
    if len >= spec.width {
        return body;
    }
    let fill = " ".repeat(spec.width - len);
    if spec.left {
        format!("{body}{fill}")
    } else {
        format!("{fill}{body}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Dict;

    fn fmt(template: &str, args: Value) -> String {
        format(template, &args).unwrap()
    }

    #[test]
    fn basic_conversions() {
        assert_eq!(fmt("%s-%r", Value::tuple(vec![Value::str("a"), Value::str("b")])), "a-'b'");
        assert_eq!(fmt("%d%%", Value::Int(50)), "50%");
        assert_eq!(fmt("%5d|%-5d|%05d", Value::tuple(vec![Value::Int(42), Value::Int(42), Value::Int(-42)])), "   42|42   |-0042");
        assert_eq!(fmt("%x %X %#o", Value::tuple(vec![Value::Int(255), Value::Int(255), Value::Int(8)])), "ff FF 0o10");
        assert_eq!(fmt("%c", Value::Int(65)), "A");
    }

    #[test]
    fn floats() {
        assert_eq!(fmt("%.2f", Value::Float(3.14159)), "3.14");
        assert_eq!(fmt("%f", Value::Int(1)), "1.000000");
        assert_eq!(fmt("%e", Value::Float(150.0)), "1.500000e+02");
        assert_eq!(fmt("%g", Value::Float(0.0001)), "0.0001");
        assert_eq!(fmt("%g", Value::Float(1234567.0)), "1.23457e+06");
        assert_eq!(fmt("%g", Value::Float(2.5)), "2.5");
        assert_eq!(fmt("%+.1f", Value::Float(2.0)), "+2.0");
    }

    #[test]
    fn mapping_keys() {
        let mut dict = Dict::default();
        dict.set_str("name", Value::str("x"));
        dict.set_str("n", Value::Int(3));
        assert_eq!(fmt("%(name)s=%(n)d", Value::dict(dict)), "x=3");
    }

    #[test]
    fn argument_count_errors() {
        assert!(format("%s %s", &Value::tuple(vec![Value::Int(1)])).is_err());
        assert!(format("%s", &Value::tuple(vec![Value::Int(1), Value::Int(2)])).is_err());
        assert!(format("%d", &Value::str("x")).is_err());
    }
}
