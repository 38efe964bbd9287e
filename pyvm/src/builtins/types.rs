use crate::args::CallArgs;
use crate::builtins::{builtin_index, expect_str};
use crate::exceptions::{ExcType, RunError, RunResult, exception_matches};
use crate::function::Class;
use crate::interpreter::Interpreter;
use crate::value::{Dict, Value};

fn is_instance(interp: &Interpreter, obj: &Value, class: &Value) -> RunResult<bool> {
    Ok(match class {
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if is_instance(interp, obj, class)? {
                    return Ok(true);
                }
            }
            false
        }
        Value::Builtin(idx) => {
            let name = idx.name();
            let actual = obj.type_name();
            actual == name || (name == "int" && actual == "bool")
        }
        Value::Class(class) => {
            if std::rc::Rc::ptr_eq(class, interp.object_class()) {
                return Ok(true);
            }
            match obj {
                Value::Instance(inst) => inst.class.is_subclass_of(class),
                Value::Exception(exc) => exc.class.as_ref().is_some_and(|c| c.is_subclass_of(class)),
                _ => false,
            }
        }
        Value::ExcType(_) => matches!(obj, Value::Exception(_)) && exception_matches(obj, class),
        other => {
            return Err(ExcType::TypeError.err(format!(
                "isinstance() arg 2 must be a type or tuple of types, not {}",
                other.type_name()
            )));
        }
    })
}

pub fn isinstance(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("isinstance", 2, 2)?;
    let found = is_instance(interp, &args.positional[0], &args.positional[1])?;
    Ok(Value::Bool(found))
}

fn is_attribute_error(exc: &Value) -> bool {
    match exc {
        Value::Exception(exc) => exc.kind.is_subclass_of(ExcType::AttributeError),
        _ => false,
    }
}

pub fn hasattr(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("hasattr", 2, 2)?;
    let name = expect_str(&args.positional[1], "hasattr(): attribute name")?;
    match interp.get_attr(&args.positional[0], name) {
        Ok(_) => Ok(Value::Bool(true)),
        Err(RunError::Exc(exc)) if is_attribute_error(&exc) => {
            interp.clear_pending(&exc);
            Ok(Value::Bool(false))
        }
        Err(e) => Err(e),
    }
}

pub fn getattr(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("getattr", 2, 3)?;
    let name = expect_str(&args.positional[1], "getattr(): attribute name")?;
    match (interp.get_attr(&args.positional[0], name), args.get(2)) {
        (Err(RunError::Exc(exc)), Some(default)) if is_attribute_error(&exc) => {
            interp.clear_pending(&exc);
            Ok(default.clone())
        }
        (result, _) => result,
    }
}

pub fn setattr(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("setattr", 3, 3)?;
    let name = expect_str(&args.positional[1], "setattr(): attribute name")?;
    interp.set_attr(&args.positional[0], name, args.positional[2].clone())?;
    Ok(Value::None)
}

pub fn callable(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("callable", 1, 1)?;
    let value = &args.positional[0];
    let callable = match value {
        Value::Function(_)
        | Value::BoundMethod(_)
        | Value::Builtin(_)
        | Value::NativeMethod(_)
        | Value::Class(_)
        | Value::ExcType(_) => true,
        Value::Instance(_) => interp.lookup_special(value, "__call__").is_some(),
        _ => false,
    };
    Ok(Value::Bool(callable))
}

/// `type(x)`: builtin constructors stand in for builtin types.
pub fn type_of(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("type", 1, 1)?;
    let value = &args.positional[0];
    Ok(match value {
        Value::Instance(inst) => Value::Class(inst.class.clone()),
        Value::Exception(exc) => exc.type_value(),
        Value::Class(_) | Value::ExcType(_) => Value::Builtin(builtin_index("type").ok_or(
            crate::exceptions::Fault::MissingBuiltins,
        )?),
        other => {
            let name = other.type_name();
            match builtin_index(&name) {
                Some(idx) => Value::Builtin(idx),
                None => Value::Class(Class::new(
                    &name,
                    vec![Value::Class(interp.object_class().clone())],
                    Dict::default(),
                )),
            }
        }
    })
}

/// `__build_class__(func, name, *bases)`
pub fn build_class(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    let CallArgs { positional, keywords } = args;
    if let Some((key, _)) = keywords.first() {
        return Err(ExcType::TypeError.err(format!(
            "__build_class__() got an unexpected keyword argument '{key}'"
        )));
    }
    let mut positional = positional.into_iter();
    let (Some(body), Some(name)) = (positional.next(), positional.next()) else {
        return Err(ExcType::TypeError.err("__build_class__: not enough arguments"));
    };
    let Value::Function(body) = body else {
        return Err(ExcType::TypeError.err("__build_class__: func must be a function"));
    };
    let name = expect_str(&name, "__build_class__: name")?.to_string();
    let class = interp.build_class(&body, &name, positional.collect())?;
    Ok(Value::Class(class))
}

/// `__import__(name, globals=None, locals=None, fromlist=(), level=0)`
pub fn import(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("__import__", 1, 5)?;
    let name = expect_str(&args.positional[0], "__import__(): name")?.to_string();
    Ok(Value::Module(interp.import_module(&name)?))
}
