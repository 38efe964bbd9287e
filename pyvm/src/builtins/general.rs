use crate::args::CallArgs;
use crate::builtins::{expect_int, expect_str};
use crate::exceptions::{ExcType, RunResult};
use crate::interpreter::Interpreter;
use crate::value::Value;

fn separator(value: Option<Value>, default: &str, what: &str) -> RunResult<String> {
    match value {
        None | Some(Value::None) => Ok(default.to_string()),
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(ExcType::TypeError.err(format!(
            "{what} must be None or a string, not {}",
            other.type_name()
        ))),
    }
}

pub fn print(interp: &mut Interpreter, mut args: CallArgs) -> RunResult<Value> {
    let sep = separator(args.take_keyword("sep"), " ", "sep")?;
    let end = separator(args.take_keyword("end"), "\n", "end")?;
    args.take_keyword("flush");
    args.check("print", 0, usize::MAX)?;

    let mut line = String::new();
    for (i, value) in args.positional.iter().enumerate() {
        if i > 0 {
            line.push_str(&sep);
        }
        line.push_str(&interp.str_value(value)?);
    }
    line.push_str(&end);
    interp.emit(&line);
    Ok(Value::None)
}

pub fn len(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("len", 1, 1)?;
    let n = interp.len_of(&args.positional[0])?;
    Ok(Value::Int(n as i64))
}

pub fn repr(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("repr", 1, 1)?;
    Ok(Value::str(&interp.repr_value(&args.positional[0])?))
}

pub fn str(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("str", 0, 1)?;
    match args.get(0) {
        None => Ok(Value::str("")),
        Some(value @ Value::Str(_)) => Ok(value.clone()),
        Some(value) => Ok(Value::str(&interp.str_value(value)?)),
    }
}

pub fn bool(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("bool", 0, 1)?;
    match args.get(0) {
        Some(value) => Ok(Value::Bool(interp.truthy(value)?)),
        None => Ok(Value::Bool(false)),
    }
}

pub fn chr(_: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("chr", 1, 1)?;
    let code = expect_int(&args.positional[0])?;
    let c = u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| ExcType::ValueError.err("chr() arg not in range(0x110000)"))?;
    Ok(Value::str(c.encode_utf8(&mut [0; 4])))
}

pub fn ord(_: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("ord", 1, 1)?;
    match &args.positional[0] {
        Value::Bytes(b) if b.len() == 1 => Ok(Value::Int(b[0] as i64)),
        other => {
            let s = expect_str(other, "ord() argument")?;
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Int(c as i64)),
                _ => Err(ExcType::TypeError.err(format!(
                    "ord() expected a character, but string of length {} found",
                    s.chars().count()
                ))),
            }
        }
    }
}
