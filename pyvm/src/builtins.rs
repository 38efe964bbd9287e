use std::rc::Rc;

use strum::IntoEnumIterator;

use crate::args::CallArgs;
use crate::exceptions::{ExcType, RunResult};
use crate::function::Class;
use crate::interpreter::Interpreter;
use crate::value::{Dict, Namespace, Value};

mod collections;
mod general;
mod methods;
mod numeric;
mod types;

/// Position of a builtin function in [`BUILTINS`].
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuiltinIndex(u16);

pub type BuiltinFn = fn(&mut Interpreter, CallArgs) -> RunResult<Value>;

#[derive(Debug, Clone, Copy)]
pub struct BuiltinFunction {
    pub name: &'static str,
    pub func: BuiltinFn,
}

impl BuiltinFunction {
    pub const fn new(name: &'static str, func: BuiltinFn) -> Self {
        Self { name, func }
    }
}

pub const BUILTINS: &[BuiltinFunction] = &[
    BuiltinFunction::new("print", general::print),
    BuiltinFunction::new("len", general::len),
    BuiltinFunction::new("repr", general::repr),
    BuiltinFunction::new("str", general::str),
    BuiltinFunction::new("bool", general::bool),
    BuiltinFunction::new("chr", general::chr),
    BuiltinFunction::new("ord", general::ord),
    BuiltinFunction::new("abs", numeric::abs),
    BuiltinFunction::new("int", numeric::int),
    BuiltinFunction::new("float", numeric::float),
    BuiltinFunction::new("divmod", numeric::divmod),
    BuiltinFunction::new("pow", numeric::pow),
    BuiltinFunction::new("hex", numeric::hex),
    BuiltinFunction::new("min", numeric::min),
    BuiltinFunction::new("max", numeric::max),
    BuiltinFunction::new("sum", numeric::sum),
    BuiltinFunction::new("range", collections::range),
    BuiltinFunction::new("list", collections::list),
    BuiltinFunction::new("tuple", collections::tuple),
    BuiltinFunction::new("dict", collections::dict),
    BuiltinFunction::new("set", collections::set),
    BuiltinFunction::new("iter", collections::iter),
    BuiltinFunction::new("next", collections::next),
    BuiltinFunction::new("sorted", collections::sorted),
    BuiltinFunction::new("enumerate", collections::enumerate),
    BuiltinFunction::new("zip", collections::zip),
    BuiltinFunction::new("reversed", collections::reversed),
    BuiltinFunction::new("any", collections::any),
    BuiltinFunction::new("all", collections::all),
    BuiltinFunction::new("isinstance", types::isinstance),
    BuiltinFunction::new("hasattr", types::hasattr),
    BuiltinFunction::new("getattr", types::getattr),
    BuiltinFunction::new("setattr", types::setattr),
    BuiltinFunction::new("callable", types::callable),
    BuiltinFunction::new("type", types::type_of),
    BuiltinFunction::new("__build_class__", types::build_class),
    BuiltinFunction::new("__import__", types::import),
];

impl BuiltinIndex {
    pub fn name(self) -> &'static str {
        get_builtin(self).name
    }
}

pub fn get_builtin(idx: BuiltinIndex) -> &'static BuiltinFunction {
    &BUILTINS[idx.0 as usize]
}

pub fn builtin_index(name: &str) -> Option<BuiltinIndex> {
    BUILTINS
        .iter()
        .position(|b| b.name == name)
        .map(|i| BuiltinIndex(i as u16))
}

/// Position of a builtin-type method in [`METHODS`].
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodIndex(u16);

pub type MethodFn = fn(&mut Interpreter, &Value, CallArgs) -> RunResult<Value>;

#[derive(Debug, Clone, Copy)]
pub struct NativeMethodDef {
    /// Receiver type name.
    pub owner: &'static str,
    pub name: &'static str,
    pub func: MethodFn,
}

impl NativeMethodDef {
    pub const fn new(owner: &'static str, name: &'static str, func: MethodFn) -> Self {
        Self { owner, name, func }
    }
}

pub const METHODS: &[NativeMethodDef] = &[
    NativeMethodDef::new("list", "append", methods::list_append),
    NativeMethodDef::new("list", "extend", methods::list_extend),
    NativeMethodDef::new("list", "pop", methods::list_pop),
    NativeMethodDef::new("list", "insert", methods::list_insert),
    NativeMethodDef::new("list", "remove", methods::list_remove),
    NativeMethodDef::new("list", "index", methods::list_index),
    NativeMethodDef::new("list", "reverse", methods::list_reverse),
    NativeMethodDef::new("list", "sort", methods::list_sort),
    NativeMethodDef::new("dict", "get", methods::dict_get),
    NativeMethodDef::new("dict", "keys", methods::dict_keys),
    NativeMethodDef::new("dict", "values", methods::dict_values),
    NativeMethodDef::new("dict", "items", methods::dict_items),
    NativeMethodDef::new("dict", "pop", methods::dict_pop),
    NativeMethodDef::new("dict", "setdefault", methods::dict_setdefault),
    NativeMethodDef::new("dict", "update", methods::dict_update),
    NativeMethodDef::new("str", "join", methods::str_join),
    NativeMethodDef::new("str", "split", methods::str_split),
    NativeMethodDef::new("str", "strip", methods::str_strip),
    NativeMethodDef::new("str", "upper", methods::str_upper),
    NativeMethodDef::new("str", "lower", methods::str_lower),
    NativeMethodDef::new("str", "startswith", methods::str_startswith),
    NativeMethodDef::new("str", "endswith", methods::str_endswith),
    NativeMethodDef::new("str", "replace", methods::str_replace),
    NativeMethodDef::new("str", "format", methods::str_format),
    NativeMethodDef::new("set", "add", methods::set_add),
    NativeMethodDef::new("set", "discard", methods::set_discard),
    NativeMethodDef::new("generator", "send", methods::generator_send),
    NativeMethodDef::new("generator", "__next__", methods::generator_next),
];

impl MethodIndex {
    pub fn name(self) -> &'static str {
        get_method(self).name
    }
}

pub fn get_method(idx: MethodIndex) -> &'static NativeMethodDef {
    &METHODS[idx.0 as usize]
}

pub fn method_index(owner: &str, name: &str) -> Option<MethodIndex> {
    METHODS
        .iter()
        .position(|m| m.owner == owner && m.name == name)
        .map(|i| MethodIndex(i as u16))
}

/// The namespace every root frame gets as `__builtins__`.
pub fn builtins_dict(object_class: &Rc<Class>) -> Dict {
    let mut dict = Dict::default();
    dict.set_str("__name__", Value::str("builtins"));
    for (i, builtin) in BUILTINS.iter().enumerate() {
        dict.set_str(builtin.name, Value::Builtin(BuiltinIndex(i as u16)));
    }
    for kind in ExcType::iter() {
        dict.set_str(kind.name(), Value::ExcType(kind));
    }
    dict.set_str("object", Value::Class(object_class.clone()));
    dict
}

/// Convert an argument that must be an `int` (bools included).
pub(crate) fn expect_int(value: &Value) -> RunResult<i64> {
    match value {
        Value::Long(_) => Err(ExcType::OverflowError.err(
            "Python int too large to convert to C ssize_t",
        )),
        other => other.as_i64().ok_or_else(|| {
            ExcType::TypeError.err(format!(
                "'{}' object cannot be interpreted as an integer",
                other.type_name()
            ))
        }),
    }
}

pub(crate) fn expect_str<'a>(value: &'a Value, context: &str) -> RunResult<&'a str> {
    value.as_str().ok_or_else(|| {
        ExcType::TypeError.err(format!(
            "{context} must be str, not {}",
            value.type_name()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lookup() {
        let idx = builtin_index("len").unwrap();
        assert_eq!(idx.name(), "len");
        assert!(builtin_index("exec").is_none());
        let method = method_index("list", "append").unwrap();
        assert_eq!(method.name(), "append");
        assert!(method_index("tuple", "append").is_none());
    }

    #[test]
    fn names_are_unique() {
        for (i, a) in BUILTINS.iter().enumerate() {
            assert!(BUILTINS[i + 1..].iter().all(|b| b.name != a.name), "{}", a.name);
        }
    }

    #[test]
    fn namespace_contents() {
        let object = Class::new("object", vec![], Dict::default());
        let dict = builtins_dict(&object);
        assert!(matches!(dict.get_str("print"), Some(Value::Builtin(_))));
        assert!(matches!(
            dict.get_str("ZeroDivisionError"),
            Some(Value::ExcType(ExcType::ZeroDivisionError))
        ));
        assert!(matches!(dict.get_str("object"), Some(Value::Class(_))));
    }
}
