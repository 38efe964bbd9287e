use std::rc::Rc;

use crate::code::CodeFlags;
use crate::exceptions::{ExcType, RunResult};
use crate::function::Function;
use crate::value::{Dict, HashKey, Namespace, Value};

/// Actual arguments of a call.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keywords: Vec<(Rc<str>, Value)>,
}

impl CallArgs {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn with_keywords(positional: Vec<Value>, keywords: Vec<(Rc<str>, Value)>) -> Self {
        Self {
            positional,
            keywords,
        }
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }

    /// Insert a receiver as the first positional argument.
    pub fn prepend(&mut self, receiver: Value) {
        self.positional.insert(0, receiver);
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.positional.get(idx)
    }

    pub fn take_keyword(&mut self, name: &str) -> Option<Value> {
        let idx = self.keywords.iter().position(|(k, _)| &**k == name)?;
        Some(self.keywords.remove(idx).1)
    }

    /// Enforce a builtin's positional arity and reject leftover keywords.
    pub fn check(&self, name: &str, min: usize, max: usize) -> RunResult<()> {
        if let Some((key, _)) = self.keywords.first() {
            return Err(ExcType::TypeError.err(format!(
                "{name}() got an unexpected keyword argument '{key}'"
            )));
        }
        let given = self.positional.len();
        if given >= min && given <= max {
            return Ok(());
        }
        let msg = if min == max {
            match min {
                0 => format!("{name}() takes no arguments ({given} given)"),
                1 => format!("{name}() takes exactly one argument ({given} given)"),
                n => format!("{name}() takes exactly {n} arguments ({given} given)"),
            }
        } else if given < min {
            format!("{name} expected at least {min} arguments, got {given}")
        } else {
            format!("{name} expected at most {max} arguments, got {given}")
        };
        Err(ExcType::TypeError.err(msg))
    }
}

/// Bind `args` against the parameters of `func`, producing the locals of
/// the new frame.
///
/// Parameters are laid out in `co_varnames` as positional, keyword-only,
/// then `*args` and `**kwargs` when the code flags declare them.
pub fn bind_arguments(func: &Function, args: CallArgs) -> RunResult<Dict> {
    let code = &func.code;
    let name = &func.name;
    let argcount = code.argcount as usize;
    let kwonly = code.kwonlyargcount as usize;
    let has_varargs = code.flags.contains(CodeFlags::VARARGS);
    let has_varkw = code.flags.contains(CodeFlags::VARKEYWORDS);
    let params = &code.varnames[..(argcount + kwonly).min(code.varnames.len())];

    let mut locals = Dict::default();
    let CallArgs {
        mut positional,
        keywords,
    } = args;
    let given = positional.len();

    let extra = if given > argcount {
        positional.split_off(argcount)
    } else {
        Vec::new()
    };
    for (param, value) in params.iter().zip(positional) {
        locals.insert_str(param.clone(), value);
    }

    let mut slot = argcount + kwonly;
    if has_varargs {
        if let Some(param) = code.varnames.get(slot) {
            locals.insert_str(param.clone(), Value::tuple(extra.clone()));
        }
        slot += 1;
    }

    let mut kwargs = has_varkw.then(Dict::default);
    for (key, value) in keywords {
        if params.iter().any(|p| *p == key) {
            if locals.contains_str(&key) {
                return Err(ExcType::TypeError.err(format!(
                    "{name}() got multiple values for argument '{key}'"
                )));
            }
            locals.insert_str(key, value);
        } else if let Some(kwargs) = kwargs.as_mut() {
            kwargs.insert(HashKey::from(key), value);
        } else {
            return Err(ExcType::TypeError.err(format!(
                "{name}() got an unexpected keyword argument '{key}'"
            )));
        }
    }
    if let (Some(kwargs), Some(param)) = (kwargs, code.varnames.get(slot)) {
        locals.insert_str(param.clone(), Value::dict(kwargs));
    }

    if !has_varargs && given > argcount {
        return Err(too_many_positional(func, given));
    }

    let first_default = argcount.saturating_sub(func.defaults.len());
    let mut missing = Vec::new();
    for (i, param) in params.iter().take(argcount).enumerate() {
        if locals.contains_str(param) {
            continue;
        }
        match i.checked_sub(first_default).and_then(|d| func.defaults.get(d)) {
            Some(default) => {
                locals.insert_str(param.clone(), default.clone());
            }
            None => missing.push(param.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(missing_arguments(name, "positional", &missing));
    }

    for param in params.iter().skip(argcount) {
        if locals.contains_str(param) {
            continue;
        }
        match func.kwdefaults.get_str(param) {
            Some(default) => {
                let default = default.clone();
                locals.insert_str(param.clone(), default);
            }
            None => missing.push(param.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(missing_arguments(name, "keyword-only", &missing));
    }

    Ok(locals)
}

fn too_many_positional(func: &Function, given: usize) -> crate::exceptions::RunError {
    let argcount = func.code.argcount as usize;
    let required = argcount.saturating_sub(func.defaults.len());
    let takes = if required < argcount {
        format!("from {required} to {argcount} positional arguments")
    } else if argcount == 1 {
        "1 positional argument".to_string()
    } else {
        format!("{argcount} positional arguments")
    };
    let verb = if given == 1 { "was" } else { "were" };
    ExcType::TypeError.err(format!(
        "{}() takes {takes} but {given} {verb} given",
        func.name
    ))
}

fn missing_arguments(name: &str, kind: &str, missing: &[Rc<str>]) -> crate::exceptions::RunError {
    let quoted: Vec<String> = missing.iter().map(|m| format!("'{m}'")).collect();
    let list = match quoted.as_slice() {
        [one] => one.clone(),
        [a, b] => format!("{a} and {b}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
        [] => String::new(),
    };
    let plural = if missing.len() == 1 { "" } else { "s" };
    ExcType::TypeError.err(format!(
        "{name}() missing {} required {kind} argument{plural}: {list}",
        missing.len()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::CodeBuilder;
    use crate::exceptions::RunError;
    use crate::format::to_str;
    use std::cell::RefCell;

    fn function(code: crate::code::CodeBuilder, defaults: Vec<Value>) -> Function {
        let code = code.build();
        Function {
            name: code.name.clone(),
            qualname: code.name.clone(),
            code,
            globals: Rc::new(RefCell::new(Dict::default())),
            defaults,
            kwdefaults: Dict::default(),
            closure: None,
            annotations: Dict::default(),
        }
    }

    fn message(err: RunError) -> String {
        match err {
            RunError::Exc(Value::Exception(exc)) => {
                assert_eq!(exc.kind, ExcType::TypeError);
                to_str(&Value::Exception(exc))
            }
            other => panic!("expected TypeError, got {other:?}"),
        }
    }

    fn int(locals: &Dict, name: &str) -> Option<i64> {
        locals.get_str(name).and_then(Value::as_i64)
    }

    fn two_params() -> CodeBuilder {
        CodeBuilder::new("f", vec![]).argcount(2).varnames(&["a", "b"])
    }

    #[test]
    fn exact_positional_call() {
        let f = function(two_params(), vec![]);
        let locals = bind_arguments(&f, CallArgs::new(vec![Value::Int(1), Value::Int(2)])).unwrap();
        let order: Vec<_> = locals.keys().filter_map(|k| k.value().as_str().map(str::to_owned)).collect();
        assert_eq!(order, ["a", "b"]);
        assert_eq!(int(&locals, "a"), Some(1));
        assert_eq!(int(&locals, "b"), Some(2));
    }

    #[test]
    fn missing_positional() {
        let f = function(two_params(), vec![]);
        let err = bind_arguments(&f, CallArgs::new(vec![Value::Int(1)])).unwrap_err();
        assert_eq!(message(err), "f() missing 1 required positional argument: 'b'");

        let err = bind_arguments(&f, CallArgs::default()).unwrap_err();
        assert_eq!(message(err), "f() missing 2 required positional arguments: 'a' and 'b'");
    }

    #[test]
    fn defaults_cover_trailing_parameters() {
        let f = function(two_params(), vec![Value::Int(9)]);
        let locals = bind_arguments(&f, CallArgs::new(vec![Value::Int(1)])).unwrap();
        assert_eq!(int(&locals, "b"), Some(9));

        let err = bind_arguments(
            &f,
            CallArgs::new(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        )
        .unwrap_err();
        assert_eq!(message(err), "f() takes from 1 to 2 positional arguments but 3 were given");
    }

    #[test]
    fn keywords() {
        let f = function(two_params(), vec![]);
        let args = CallArgs::with_keywords(vec![Value::Int(1)], vec![(Rc::from("b"), Value::Int(5))]);
        let locals = bind_arguments(&f, args).unwrap();
        assert_eq!(int(&locals, "b"), Some(5));

        let args = CallArgs::with_keywords(vec![Value::Int(1)], vec![(Rc::from("a"), Value::Int(5))]);
        let err = bind_arguments(&f, args).unwrap_err();
        assert_eq!(message(err), "f() got multiple values for argument 'a'");

        let args = CallArgs::with_keywords(vec![], vec![(Rc::from("z"), Value::Int(5))]);
        let err = bind_arguments(&f, args).unwrap_err();
        assert_eq!(message(err), "f() got an unexpected keyword argument 'z'");
    }

    #[test]
    fn star_parameters_collect_extras() {
        let code = CodeBuilder::new("g", vec![])
            .argcount(1)
            .varnames(&["a", "rest", "options"])
            .flags(CodeFlags::VARARGS | CodeFlags::VARKEYWORDS);
        let f = function(code, vec![]);
        let args = CallArgs::with_keywords(
            vec![Value::Int(1), Value::Int(2), Value::Int(3)],
            vec![(Rc::from("x"), Value::Int(4))],
        );
        let locals = bind_arguments(&f, args).unwrap();
        assert_eq!(crate::format::repr(&locals.get_str("rest").unwrap().clone()), "(2, 3)");
        assert_eq!(crate::format::repr(&locals.get_str("options").unwrap().clone()), "{'x': 4}");
    }

    #[test]
    fn keyword_only_parameters() {
        let code = CodeBuilder::new("h", vec![])
            .argcount(0)
            .kwonlyargcount(2)
            .varnames(&["k", "m"]);
        let mut f = function(code, vec![]);
        f.kwdefaults.set_str("m", Value::Int(3));

        let args = CallArgs::with_keywords(vec![], vec![(Rc::from("k"), Value::Int(1))]);
        let locals = bind_arguments(&f, args).unwrap();
        assert_eq!(int(&locals, "m"), Some(3));

        let err = bind_arguments(&f, CallArgs::default()).unwrap_err();
        assert_eq!(message(err), "h() missing 1 required keyword-only argument: 'k'");

        let err = bind_arguments(&f, CallArgs::new(vec![Value::Int(1)])).unwrap_err();
        assert_eq!(message(err), "h() takes 0 positional arguments but 1 was given");
    }

    #[test]
    fn builtin_arity() {
        let args = CallArgs::new(vec![Value::Int(1), Value::Int(2)]);
        assert!(args.check("len", 1, 1).is_err());
        assert!(args.check("range", 1, 3).is_ok());
        let args = CallArgs::with_keywords(vec![], vec![(Rc::from("x"), Value::None)]);
        assert!(args.check("f", 0, 0).is_err());
    }
}
