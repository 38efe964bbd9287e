use std::fmt::Write as _;

use bytecode::CompareOp;

use crate::args::CallArgs;
use crate::builtins::collections::{sort_values, update_dict};
use crate::builtins::{expect_int, expect_str};
use crate::exceptions::{ExcType, RunError, RunResult};
use crate::interpreter::{GenStep, Interpreter};
use crate::operators::hash_key;
use crate::value::{DictRef, ListRef, SetRef, Value};

fn receiver_error(expected: &str, receiver: &Value) -> RunError {
    ExcType::TypeError.err(format!(
        "descriptor requires a '{expected}' object but received a '{}'",
        receiver.type_name()
    ))
}

fn list_of(receiver: &Value) -> RunResult<&ListRef> {
    match receiver {
        Value::List(list) => Ok(list),
        other => Err(receiver_error("list", other)),
    }
}

fn dict_of(receiver: &Value) -> RunResult<&DictRef> {
    match receiver {
        Value::Dict(dict) => Ok(dict),
        other => Err(receiver_error("dict", other)),
    }
}

fn set_of(receiver: &Value) -> RunResult<&SetRef> {
    match receiver {
        Value::Set(set) => Ok(set),
        other => Err(receiver_error("set", other)),
    }
}

fn str_of(receiver: &Value) -> RunResult<&str> {
    receiver.as_str().ok_or_else(|| receiver_error("str", receiver))
}

/// Position of the first element equal to `item`.
fn find(interp: &mut Interpreter, list: &ListRef, item: &Value) -> RunResult<Option<usize>> {
    let items = list.borrow().clone();
    for (i, candidate) in items.iter().enumerate() {
        if interp.compare_op(CompareOp::Eq, candidate, item)?.is_truthy() {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

// ── list ───────────────────────────────────────────────────────────

pub fn list_append(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("append", 1, 1)?;
    list_of(receiver)?.borrow_mut().push(args.positional[0].clone());
    Ok(Value::None)
}

pub fn list_extend(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("extend", 1, 1)?;
    let list = list_of(receiver)?;
    let items = interp.collect_iterable(&args.positional[0])?;
    list.borrow_mut().extend(items);
    Ok(Value::None)
}

pub fn list_pop(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("pop", 0, 1)?;
    let mut list = list_of(receiver)?.borrow_mut();
    if list.is_empty() {
        return Err(ExcType::IndexError.err("pop from empty list"));
    }
    let len = list.len() as i64;
    let index = args.get(0).map(expect_int).transpose()?.unwrap_or(-1);
    let index = if index < 0 { index + len } else { index };
    if !(0..len).contains(&index) {
        return Err(ExcType::IndexError.err("pop index out of range"));
    }
    Ok(list.remove(index as usize))
}

pub fn list_insert(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("insert", 2, 2)?;
    let mut list = list_of(receiver)?.borrow_mut();
    let len = list.len() as i64;
    let index = expect_int(&args.positional[0])?;
    let index = if index < 0 { (index + len).max(0) } else { index.min(len) };
    list.insert(index as usize, args.positional[1].clone());
    Ok(Value::None)
}

pub fn list_remove(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("remove", 1, 1)?;
    let list = list_of(receiver)?;
    match find(interp, list, &args.positional[0])? {
        Some(i) => {
            list.borrow_mut().remove(i);
            Ok(Value::None)
        }
        None => Err(ExcType::ValueError.err("list.remove(x): x not in list")),
    }
}

pub fn list_index(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("index", 1, 1)?;
    let item = &args.positional[0];
    match find(interp, list_of(receiver)?, item)? {
        Some(i) => Ok(Value::Int(i as i64)),
        None => Err(ExcType::ValueError.err(format!(
            "{} is not in list",
            interp.repr_value(item)?
        ))),
    }
}

pub fn list_reverse(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("reverse", 0, 0)?;
    list_of(receiver)?.borrow_mut().reverse();
    Ok(Value::None)
}

pub fn list_sort(interp: &mut Interpreter, receiver: &Value, mut args: CallArgs) -> RunResult<Value> {
    let key = args.take_keyword("key").filter(|k| !k.is_none());
    let reverse = args.take_keyword("reverse").is_some_and(|r| r.is_truthy());
    args.check("sort", 0, 0)?;
    let list = list_of(receiver)?;
    let items = std::mem::take(&mut *list.borrow_mut());
    let sorted = sort_values(interp, items, key, reverse)?;
    *list.borrow_mut() = sorted;
    Ok(Value::None)
}

// ── dict ───────────────────────────────────────────────────────────

pub fn dict_get(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("get", 1, 2)?;
    let key = hash_key(args.positional[0].clone())?;
    let found = dict_of(receiver)?.borrow().get(&key).cloned();
    Ok(found.or_else(|| args.get(1).cloned()).unwrap_or(Value::None))
}

pub fn dict_keys(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("keys", 0, 0)?;
    let dict = dict_of(receiver)?.borrow();
    Ok(Value::list(dict.keys().map(|k| k.value().clone()).collect()))
}

pub fn dict_values(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("values", 0, 0)?;
    let dict = dict_of(receiver)?.borrow();
    Ok(Value::list(dict.values().cloned().collect()))
}

pub fn dict_items(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("items", 0, 0)?;
    let dict = dict_of(receiver)?.borrow();
    Ok(Value::list(
        dict.iter()
            .map(|(k, v)| Value::tuple(vec![k.value().clone(), v.clone()]))
            .collect(),
    ))
}

pub fn dict_pop(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("pop", 1, 2)?;
    let key = hash_key(args.positional[0].clone())?;
    let removed = dict_of(receiver)?.borrow_mut().shift_remove(&key);
    match (removed, args.get(1)) {
        (Some(value), _) => Ok(value),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(RunError::Exc(ExcType::KeyError.instance(vec![key.into_value()]))),
    }
}

pub fn dict_setdefault(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("setdefault", 1, 2)?;
    let key = hash_key(args.positional[0].clone())?;
    let default = args.get(1).cloned().unwrap_or(Value::None);
    let mut dict = dict_of(receiver)?.borrow_mut();
    Ok(dict.entry(key).or_insert(default).clone())
}

pub fn dict_update(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    let CallArgs { positional, keywords } = args;
    let dict = dict_of(receiver)?;
    if let Some(source) = positional.first() {
        // Build into a scratch map so the source may be the receiver itself.
        let mut scratch = Default::default();
        update_dict(interp, &mut scratch, source)?;
        dict.borrow_mut().extend(scratch);
    }
    let mut dict = dict.borrow_mut();
    for (key, value) in keywords {
        dict.insert(key.into(), value);
    }
    Ok(Value::None)
}

// ── str ────────────────────────────────────────────────────────────

pub fn str_join(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("join", 1, 1)?;
    let sep = str_of(receiver)?;
    let items = interp.collect_iterable(&args.positional[0])?;
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(ExcType::TypeError.err(format!(
                "sequence item {i}: expected str instance, {} found",
                item.type_name()
            )));
        };
        if i > 0 {
            out.push_str(sep);
        }
        out.push_str(text);
    }
    Ok(Value::str(&out))
}

fn split_whitespace(text: &str, maxsplit: i64) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        if maxsplit >= 0 && parts.len() as i64 == maxsplit {
            parts.push(rest);
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(&rest[..end]);
                rest = rest[end..].trim_start();
            }
            None => {
                parts.push(rest);
                break;
            }
        }
    }
    parts
}

pub fn str_split(_: &mut Interpreter, receiver: &Value, mut args: CallArgs) -> RunResult<Value> {
    if let Some(sep) = args.take_keyword("sep") {
        args.positional.insert(0, sep);
    }
    if let Some(maxsplit) = args.take_keyword("maxsplit") {
        args.positional.push(maxsplit);
    }
    args.check("split", 0, 2)?;
    let text = str_of(receiver)?;
    let maxsplit = args.get(1).map(expect_int).transpose()?.unwrap_or(-1);
    let parts: Vec<&str> = match args.get(0).filter(|s| !s.is_none()) {
        None => split_whitespace(text, maxsplit),
        Some(sep) => {
            let sep = expect_str(sep, "separator")?;
            if sep.is_empty() {
                return Err(ExcType::ValueError.err("empty separator"));
            }
            if maxsplit < 0 {
                text.split(sep).collect()
            } else {
                text.splitn(maxsplit as usize + 1, sep).collect()
            }
        }
    };
    Ok(Value::list(parts.into_iter().map(Value::str).collect()))
}

pub fn str_strip(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("strip", 0, 1)?;
    let text = str_of(receiver)?;
    let stripped = match args.get(0).filter(|c| !c.is_none()) {
        None => text.trim(),
        Some(chars) => {
            let chars = expect_str(chars, "strip arg")?;
            text.trim_matches(|c: char| chars.contains(c))
        }
    };
    Ok(Value::str(stripped))
}

pub fn str_upper(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("upper", 0, 0)?;
    Ok(Value::str(&str_of(receiver)?.to_uppercase()))
}

pub fn str_lower(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("lower", 0, 0)?;
    Ok(Value::str(&str_of(receiver)?.to_lowercase()))
}

fn affix_matches(
    name: &str,
    text: &str,
    affix: &Value,
    test: fn(&str, &str) -> bool,
) -> RunResult<bool> {
    match affix {
        Value::Str(s) => Ok(test(text, s)),
        Value::Tuple(options) => {
            for option in options.iter() {
                if affix_matches(name, text, option, test)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(ExcType::TypeError.err(format!(
            "{name} first arg must be str or a tuple of str, not {}",
            other.type_name()
        ))),
    }
}

pub fn str_startswith(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("startswith", 1, 1)?;
    let found = affix_matches("startswith", str_of(receiver)?, &args.positional[0], |t, p| {
        t.starts_with(p)
    })?;
    Ok(Value::Bool(found))
}

pub fn str_endswith(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("endswith", 1, 1)?;
    let found = affix_matches("endswith", str_of(receiver)?, &args.positional[0], |t, s| {
        t.ends_with(s)
    })?;
    Ok(Value::Bool(found))
}

pub fn str_replace(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("replace", 2, 3)?;
    let text = str_of(receiver)?;
    let old = expect_str(&args.positional[0], "replace() argument 1")?;
    let new = expect_str(&args.positional[1], "replace() argument 2")?;
    let count = args.get(2).map(expect_int).transpose()?.unwrap_or(-1);
    let replaced = if count < 0 {
        text.replace(old, new)
    } else {
        text.replacen(old, new, count as usize)
    };
    Ok(Value::str(&replaced))
}

/// Parsed `[[fill]align][sign][0][width][.precision][type]`.
#[derive(Debug, Default, PartialEq)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    width: usize,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> RunResult<FormatSpec> {
    let invalid = || ExcType::ValueError.err("Invalid format specifier");
    let chars: Vec<char> = spec.chars().collect();
    let mut out = FormatSpec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = Some(chars[0]);
        out.align = Some(chars[1]);
        i = 2;
    } else if chars.first().copied().is_some_and(is_align) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c @ ('+' | '-' | ' ')) = chars.get(i) {
        out.sign = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        out.fill.get_or_insert('0');
        out.align.get_or_insert('=');
        i += 1;
    }
    let digits = |i: &mut usize| {
        let start = *i;
        while chars.get(*i).is_some_and(char::is_ascii_digit) {
            *i += 1;
        }
        chars[start..*i].iter().collect::<String>()
    };
    let width = digits(&mut i);
    out.width = if width.is_empty() { 0 } else { width.parse().map_err(|_| invalid())? };
    if chars.get(i) == Some(&'.') {
        i += 1;
        let precision = digits(&mut i);
        out.precision = Some(precision.parse().map_err(|_| invalid())?);
    }
    match chars.get(i..) {
        Some([]) => {}
        Some([kind]) => out.kind = Some(*kind),
        _ => return Err(invalid()),
    }
    Ok(out)
}

fn apply_spec(interp: &mut Interpreter, value: &Value, spec: &str) -> RunResult<String> {
    if spec.is_empty() {
        return interp.str_value(value);
    }
    let spec = parse_spec(spec)?;
    let numeric = value.as_num().is_some();
    let body = match (spec.kind, value) {
        (Some('d'), _) | (Some('x' | 'X' | 'o' | 'b'), _) => {
            let n = value.as_bigint().ok_or_else(|| unknown_code(spec.kind, value))?;
            let digits = match spec.kind {
                Some('x') => format!("{:x}", n.magnitude()),
                Some('X') => format!("{:X}", n.magnitude()),
                Some('o') => format!("{:o}", n.magnitude()),
                Some('b') => format!("{:b}", n.magnitude()),
                _ => n.magnitude().to_string(),
            };
            signed(n.sign() == num_bigint::Sign::Minus, digits, spec.sign)
        }
        (Some(kind @ ('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%')), _) => {
            let Some(num) = value.as_num() else {
                return Err(unknown_code(Some(kind), value));
            };
            let f = num.to_f64();
            let mut printf = String::from("%");
            if let Some(sign) = spec.sign.filter(|s| *s != '-') {
                printf.push(sign);
            }
            let precision = spec.precision.unwrap_or(6);
            if kind == '%' {
                let _ = write!(printf, ".{precision}f");
                let text = crate::operators::printf::format(&printf, &Value::Float(f * 100.0))?;
                format!("{text}%")
            } else {
                let _ = write!(printf, ".{precision}{kind}");
                crate::operators::printf::format(&printf, &Value::Float(f))?
            }
        }
        (None, _) if spec.precision.is_some() && numeric && !matches!(value, Value::Int(_) | Value::Bool(_)) => {
            let printf = format!("%.{}g", spec.precision.unwrap_or(6));
            crate::operators::printf::format(&printf, &Value::Float(value.as_num().map_or(0.0, |n| n.to_f64())))?
        }
        (None | Some('s'), _) => {
            let text = interp.str_value(value)?;
            match spec.precision {
                Some(p) => text.chars().take(p).collect(),
                None => text,
            }
        }
        (kind, _) => return Err(unknown_code(kind, value)),
    };
    Ok(pad(&body, &spec, numeric))
}

fn unknown_code(kind: Option<char>, value: &Value) -> RunError {
    ExcType::ValueError.err(format!(
        "Unknown format code '{}' for object of type '{}'",
        kind.unwrap_or('s'),
        value.type_name()
    ))
}

fn signed(negative: bool, digits: String, sign: Option<char>) -> String {
    match (negative, sign) {
        (true, _) => format!("-{digits}"),
        (false, Some('+')) => format!("+{digits}"),
        (false, Some(' ')) => format!(" {digits}"),
        _ => digits,
    }
}

fn pad(body: &str, spec: &FormatSpec, numeric: bool) -> String {
    let len = body.chars().count();
    if len >= spec.width {
        return body.to_string();
    }
    let fill = spec.fill.unwrap_or(' ');
    let gap = spec.width - len;
    let repeat = |n: usize| fill.to_string().repeat(n);
    match spec.align.unwrap_or(if numeric { '>' } else { '<' }) {
        '<' => format!("{body}{}", repeat(gap)),
        '^' => format!("{}{body}{}", repeat(gap / 2), repeat(gap - gap / 2)),
        '=' => {
            let split = body.find(|c: char| c != '-' && c != '+' && c != ' ').unwrap_or(0);
            format!("{}{}{}", &body[..split], repeat(gap), &body[split..])
        }
        _ => format!("{}{body}", repeat(gap)),
    }
}

/// `str.format` with positional, numbered and keyword fields, `!r`/`!s`
/// conversions and format specs.
pub fn str_format(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    let template = str_of(receiver)?;
    let mut out = String::new();
    let mut auto_index = 0;
    let mut chars = template.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        match c {
            '{' if chars.peek().map(|&(_, c)| c) == Some('{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek().map(|&(_, c)| c) == Some('}') => {
                chars.next();
                out.push('}');
            }
            '}' => {
                return Err(ExcType::ValueError.err(
                    "Single '}' encountered in format string",
                ));
            }
            '{' => {
                let mut field = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    field.push(c);
                }
                if !closed {
                    return Err(ExcType::ValueError.err(
                        "Single '{' encountered in format string",
                    ));
                }
                let (field, spec) = field.split_once(':').unwrap_or((field.as_str(), ""));
                let (name, conversion) = match field.split_once('!') {
                    Some((name, conv)) => (name, Some(conv)),
                    None => (field, None),
                };

                let value = if name.is_empty() {
                    let value = args.get(auto_index).cloned();
                    auto_index += 1;
                    value.ok_or_else(|| ExcType::IndexError.err("tuple index out of range"))?
                } else if let Ok(index) = name.parse::<usize>() {
                    args.get(index)
                        .cloned()
                        .ok_or_else(|| ExcType::IndexError.err("tuple index out of range"))?
                } else {
                    args.keywords
                        .iter()
                        .find(|(key, _)| &**key == name)
                        .map(|(_, value)| value.clone())
                        .ok_or_else(|| RunError::Exc(ExcType::KeyError.instance(vec![Value::str(name)])))?
                };

                let value = match conversion {
                    None => value,
                    Some("r") => Value::str(&interp.repr_value(&value)?),
                    Some("s") => Value::str(&interp.str_value(&value)?),
                    Some(other) => {
                        return Err(ExcType::ValueError.err(format!(
                            "Unknown conversion specifier {other}"
                        )));
                    }
                };
                out.push_str(&apply_spec(interp, &value, spec)?);
            }
            c => out.push(c),
        }
    }
    Ok(Value::str(&out))
}

// ── set ────────────────────────────────────────────────────────────

pub fn set_add(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("add", 1, 1)?;
    let key = hash_key(args.positional[0].clone())?;
    set_of(receiver)?.borrow_mut().insert(key);
    Ok(Value::None)
}

pub fn set_discard(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("discard", 1, 1)?;
    let key = hash_key(args.positional[0].clone())?;
    set_of(receiver)?.borrow_mut().shift_remove(&key);
    Ok(Value::None)
}

// ── generator ──────────────────────────────────────────────────────

fn advance(interp: &mut Interpreter, receiver: &Value, sent: Value) -> RunResult<Value> {
    let Value::Generator(generator) = receiver else {
        return Err(receiver_error("generator", receiver));
    };
    match interp.resume_generator(generator, sent)? {
        GenStep::Yielded(value) => Ok(value),
        GenStep::Returned(Value::None) => Err(RunError::Exc(ExcType::StopIteration.instance(vec![]))),
        GenStep::Returned(value) => Err(RunError::Exc(ExcType::StopIteration.instance(vec![value]))),
    }
}

pub fn generator_send(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("send", 1, 1)?;
    advance(interp, receiver, args.positional[0].clone())
}

pub fn generator_next(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> RunResult<Value> {
    args.check("__next__", 0, 0)?;
    advance(interp, receiver, Value::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_split() {
        assert_eq!(split_whitespace("  a b\t c  ", -1), ["a", "b", "c"]);
        assert_eq!(split_whitespace("a b  c ", 1), ["a", "b  c "]);
        assert!(split_whitespace("   ", -1).is_empty());
    }

    #[test]
    fn format_specs() {
        assert_eq!(
            parse_spec("*^10.3f").unwrap(),
            FormatSpec {
                fill: Some('*'),
                align: Some('^'),
                width: 10,
                precision: Some(3),
                kind: Some('f'),
                ..Default::default()
            }
        );
        assert_eq!(
            parse_spec("05d").unwrap(),
            FormatSpec {
                fill: Some('0'),
                align: Some('='),
                width: 5,
                kind: Some('d'),
                ..Default::default()
            }
        );
        assert!(parse_spec("10zz").is_err());
    }

    #[test]
    fn padding() {
        let spec = parse_spec(">5").unwrap();
        assert_eq!(pad("ab", &spec, false), "   ab");
        let spec = parse_spec("05").unwrap();
        assert_eq!(pad("-42", &spec, true), "-0042");
        let spec = parse_spec("^6").unwrap();
        assert_eq!(pad("ab", &spec, false), "  ab  ");
        let spec = parse_spec("4").unwrap();
        assert_eq!(pad("7", &spec, true), "   7");
        assert_eq!(pad("x", &spec, false), "x   ");
    }
}
