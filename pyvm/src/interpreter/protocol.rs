//! Operators and conversions that consult user-defined special methods
//! before falling back to the builtin tables.

use bytecode::{BinaryOp, CompareOp, UnaryOp};

use crate::args::CallArgs;
use crate::exceptions::{ExcType, RunError, RunResult};
use crate::format::repr_with;
use crate::operators;
use crate::value::Value;

use super::Interpreter;

/// Values whose operators may be overridden by methods on a user class.
fn is_user_object(value: &Value) -> bool {
    match value {
        Value::Instance(_) => true,
        Value::Exception(exc) => exc.class.is_some(),
        _ => false,
    }
}

fn reflected(op: CompareOp) -> CompareOp {
    match op {
        CompareOp::Lt => CompareOp::Gt,
        CompareOp::Gt => CompareOp::Lt,
        CompareOp::Le => CompareOp::Ge,
        CompareOp::Ge => CompareOp::Le,
        other => other,
    }
}

fn unary_dunder(op: UnaryOp) -> Option<&'static str> {
    match op {
        UnaryOp::Positive => Some("__pos__"),
        UnaryOp::Negative => Some("__neg__"),
        UnaryOp::Invert => Some("__invert__"),
        UnaryOp::Not => None,
    }
}

impl Interpreter {
    fn call_special(&mut self, method: Value, args: Vec<Value>) -> RunResult<Value> {
        self.call_value(method, CallArgs::new(args))
    }

    pub fn binary_op(&mut self, op: BinaryOp, lhs: &Value, rhs: &Value) -> RunResult<Value> {
        if !is_user_object(lhs) && !is_user_object(rhs) {
            return operators::binary(op, lhs, rhs);
        }
        let (name, reflected) = operators::binary_dunder(op);
        if let Some(method) = self.lookup_special(lhs, name) {
            return self.call_special(method, vec![rhs.clone()]);
        }
        if !reflected.is_empty() {
            if let Some(method) = self.lookup_special(rhs, reflected) {
                return self.call_special(method, vec![lhs.clone()]);
            }
        }
        if !is_user_object(lhs) {
            return operators::binary(op, lhs, rhs);
        }
        if op == BinaryOp::Subscr {
            return Err(ExcType::TypeError.err(format!(
                "'{}' object is not subscriptable",
                lhs.type_name()
            )));
        }
        Err(operators::unsupported(op, lhs, rhs))
    }

    /// `lhs op= rhs`. Lists extend in place; instances may define `__iadd__`
    /// and friends.
    pub fn inplace_op(&mut self, op: BinaryOp, lhs: &Value, rhs: &Value) -> RunResult<Value> {
        match lhs {
            Value::List(list) if op == BinaryOp::Add => {
                let items = self.collect_iterable(rhs)?;
                list.borrow_mut().extend(items);
                return Ok(lhs.clone());
            }
            _ if is_user_object(lhs) => {
                let (name, _) = operators::binary_dunder(op);
                let inplace = format!("__i{}", &name[2..]);
                if let Some(method) = self.lookup_special(lhs, &inplace) {
                    return self.call_special(method, vec![rhs.clone()]);
                }
            }
            _ => {}
        }
        self.binary_op(op, lhs, rhs)
    }

    pub fn compare_op(&mut self, op: CompareOp, lhs: &Value, rhs: &Value) -> RunResult<Value> {
        match op {
            CompareOp::In => return self.contains(rhs, lhs).map(Value::Bool),
            CompareOp::NotIn => return self.contains(rhs, lhs).map(|found| Value::Bool(!found)),
            _ => {}
        }
        match operators::compare_dunder(op) {
            Some(name) if is_user_object(lhs) || is_user_object(rhs) => {
                self.rich_compare(op, name, lhs, rhs)
            }
            _ => operators::compare(op, lhs, rhs),
        }
    }

    fn rich_compare(
        &mut self,
        op: CompareOp,
        name: &str,
        lhs: &Value,
        rhs: &Value,
    ) -> RunResult<Value> {
        if let Some(method) = self.lookup_special(lhs, name) {
            return self.call_special(method, vec![rhs.clone()]);
        }
        let swapped = reflected(op);
        if let Some(method) = operators::compare_dunder(swapped)
            .and_then(|name| self.lookup_special(rhs, name))
        {
            return self.call_special(method, vec![lhs.clone()]);
        }
        match op {
            CompareOp::Ne => {
                if let Some(method) = self.lookup_special(lhs, "__eq__") {
                    let equal = self.call_special(method, vec![rhs.clone()])?;
                    return Ok(Value::Bool(!self.truthy(&equal)?));
                }
                Ok(Value::Bool(!lhs.is(rhs)))
            }
            CompareOp::Eq => Ok(Value::Bool(lhs.is(rhs))),
            _ => Err(ExcType::TypeError.err(format!(
                "unorderable types: {}() {} {}()",
                lhs.type_name(),
                op.symbol(),
                rhs.type_name()
            ))),
        }
    }

    /// `item in container`
    pub fn contains(&mut self, container: &Value, item: &Value) -> RunResult<bool> {
        match container {
            Value::Instance(_) => {
                if let Some(method) = self.lookup_special(container, "__contains__") {
                    let found = self.call_special(method, vec![item.clone()])?;
                    return self.truthy(&found);
                }
                self.contains_by_iteration(container, item)
            }
            Value::Generator(_) | Value::Iterator(_) => {
                self.contains_by_iteration(container, item)
            }
            _ => operators::contains_item(container, item),
        }
    }

    fn contains_by_iteration(&mut self, container: &Value, item: &Value) -> RunResult<bool> {
        let iter = self.get_iter(container)?;
        while let Some(candidate) = self.iter_next(&iter)? {
            if candidate.is(item) || self.compare_op(CompareOp::Eq, &candidate, item)?.is_truthy() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn unary_op(&mut self, op: UnaryOp, value: &Value) -> RunResult<Value> {
        if op == UnaryOp::Not {
            return Ok(Value::Bool(!self.truthy(value)?));
        }
        if let Some(method) = unary_dunder(op).and_then(|name| self.lookup_special(value, name)) {
            return self.call_special(method, Vec::new());
        }
        operators::unary(op, value)
    }

    /// Truth value, honouring `__bool__` and `__len__` on instances.
    pub fn truthy(&mut self, value: &Value) -> RunResult<bool> {
        if !is_user_object(value) {
            return Ok(value.is_truthy());
        }
        if let Some(method) = self.lookup_special(value, "__bool__") {
            return match self.call_special(method, Vec::new())? {
                Value::Bool(b) => Ok(b),
                other => Err(ExcType::TypeError.err(format!(
                    "__bool__ should return bool, returned {}",
                    other.type_name()
                ))),
            };
        }
        if self.lookup_special(value, "__len__").is_some() {
            return Ok(self.len_of(value)? > 0);
        }
        Ok(true)
    }

    /// `len(value)`
    pub fn len_of(&mut self, value: &Value) -> RunResult<usize> {
        if let Some(method) = self.lookup_special(value, "__len__") {
            let result = self.call_special(method, Vec::new())?;
            return match result.as_i64() {
                Some(n) if n >= 0 => Ok(n as usize),
                Some(_) => Err(ExcType::ValueError.err("__len__() should return >= 0")),
                None => Err(ExcType::TypeError.err(format!(
                    "'{}' object cannot be interpreted as an integer",
                    result.type_name()
                ))),
            };
        }
        Ok(match value {
            Value::Str(s) => s.chars().count(),
            Value::Bytes(b) => b.len(),
            Value::Tuple(items) => items.len(),
            Value::List(items) => items.borrow().len(),
            Value::Dict(dict) => dict.borrow().len(),
            Value::Set(set) => set.borrow().len(),
            Value::FrozenSet(set) => set.len(),
            Value::Range(range) => range.len(),
            other => {
                return Err(ExcType::TypeError.err(format!(
                    "object of type '{}' has no len()",
                    other.type_name()
                )));
            }
        })
    }

    /// `repr(value)`, calling `__repr__` on instances at any nesting depth.
    pub fn repr_value(&mut self, value: &Value) -> RunResult<String> {
        let mut failure: Option<RunError> = None;
        let text = repr_with(value, &mut |item| {
            if failure.is_some() {
                return Some(String::new());
            }
            match self.user_repr(item) {
                Ok(text) => text,
                Err(e) => {
                    failure = Some(e);
                    Some(String::new())
                }
            }
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(text),
        }
    }

    fn user_repr(&mut self, value: &Value) -> RunResult<Option<String>> {
        let Some(method) = self.lookup_special(value, "__repr__") else {
            return Ok(None);
        };
        match self.call_special(method, Vec::new())? {
            Value::Str(s) => Ok(Some(s.to_string())),
            other => Err(ExcType::TypeError.err(format!(
                "__repr__ returned non-string (type {})",
                other.type_name()
            ))),
        }
    }

    /// `str(value)`
    pub fn str_value(&mut self, value: &Value) -> RunResult<String> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            Value::Instance(_) | Value::Exception(_) => {
                if let Some(method) = self.lookup_special(value, "__str__") {
                    return match self.call_special(method, Vec::new())? {
                        Value::Str(s) => Ok(s.to_string()),
                        other => Err(ExcType::TypeError.err(format!(
                            "__str__ returned non-string (type {})",
                            other.type_name()
                        ))),
                    };
                }
                match value {
                    Value::Exception(exc) => Ok(exc.message()),
                    _ => self.repr_value(value),
                }
            }
            _ => self.repr_value(value),
        }
    }

    /// `container[key] = value`
    pub fn store_item(&mut self, container: &Value, key: &Value, value: Value) -> RunResult<()> {
        if is_user_object(container) {
            let method = self.lookup_special(container, "__setitem__").ok_or_else(|| {
                ExcType::TypeError.err(format!(
                    "'{}' object does not support item assignment",
                    container.type_name()
                ))
            })?;
            self.call_special(method, vec![key.clone(), value])?;
            return Ok(());
        }
        operators::store_subscript(container, key, value)
    }

    /// `del container[key]`
    pub fn delete_item(&mut self, container: &Value, key: &Value) -> RunResult<()> {
        if is_user_object(container) {
            let method = self.lookup_special(container, "__delitem__").ok_or_else(|| {
                ExcType::TypeError.err(format!(
                    "'{}' object doesn't support item deletion",
                    container.type_name()
                ))
            })?;
            self.call_special(method, vec![key.clone()])?;
            return Ok(());
        }
        operators::delete_subscript(container, key)
    }
}
