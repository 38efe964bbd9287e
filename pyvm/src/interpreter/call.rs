//! Calls, class construction, attribute access and imports.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, info};

use crate::args::{CallArgs, bind_arguments};
use crate::builtins::{get_builtin, get_method, method_index};
use crate::exceptions::{ExcType, PyException, RunResult};
use crate::frame::build_frame;
use crate::function::{BoundMethod, Class, Function, Generator, Instance, Module, NativeMethod};
use crate::marshal::read_module;
use crate::value::{Dict, Namespace, Value};

use super::Interpreter;

/// Bind functions found on a class to the receiver they were looked up on.
fn bind(attr: Value, receiver: &Value, owner: Rc<Class>) -> Value {
    match attr {
        Value::Function(function) => Value::BoundMethod(Rc::new(BoundMethod {
            receiver: receiver.clone(),
            function,
            owner,
        })),
        other => other,
    }
}

fn no_attribute(obj: &Value, name: &str) -> crate::exceptions::RunError {
    let msg = match obj {
        Value::Class(class) => format!("type object '{}' has no attribute '{name}'", class.name),
        Value::ExcType(kind) => format!("type object '{}' has no attribute '{name}'", kind.name()),
        other => format!("'{}' object has no attribute '{name}'", other.type_name()),
    };
    ExcType::AttributeError.err(msg)
}

/// The user class behind an instance or a user exception.
fn user_class(value: &Value) -> Option<&Rc<Class>> {
    match value {
        Value::Instance(inst) => Some(&inst.class),
        Value::Exception(exc) => exc.class.as_ref(),
        _ => None,
    }
}

impl Interpreter {
    /// A special method found on the class of `value`, bound to it.
    pub fn lookup_special(&self, value: &Value, name: &str) -> Option<Value> {
        let (attr, owner) = user_class(value)?.lookup(name)?;
        Some(bind(attr, value, owner))
    }

    pub fn call_value(&mut self, callee: Value, mut args: CallArgs) -> RunResult<Value> {
        match callee {
            Value::Function(func) => self.call_function(&func, args),
            Value::BoundMethod(method) => {
                let matches = user_class(&method.receiver)
                    .is_some_and(|class| class.is_subclass_of(&method.owner));
                if !matches {
                    return Err(ExcType::TypeError.err(format!(
                        "{}() requires a '{}' object but received a '{}'",
                        method.function.name,
                        method.owner.name,
                        method.receiver.type_name()
                    )));
                }
                args.prepend(method.receiver.clone());
                self.call_function(&method.function, args)
            }
            Value::Builtin(idx) => (get_builtin(idx).func)(self, args),
            Value::NativeMethod(method) => {
                (get_method(method.method).func)(self, &method.receiver, args)
            }
            Value::Class(class) => self.instantiate(&class, args),
            Value::ExcType(kind) => {
                if !args.keywords.is_empty() {
                    return Err(ExcType::TypeError.err(format!(
                        "{}() does not take keyword arguments",
                        kind.name()
                    )));
                }
                Ok(kind.instance(args.positional))
            }
            Value::Instance(_) => match self.lookup_special(&callee, "__call__") {
                Some(method) => self.call_value(method, args),
                None => Err(not_callable(&callee)),
            },
            other => Err(not_callable(&other)),
        }
    }

    /// Call a user function. Generator functions return a fresh generator
    /// without running any of the body.
    pub fn call_function(&mut self, func: &Rc<Function>, args: CallArgs) -> RunResult<Value> {
        let locals = Rc::new(RefCell::new(bind_arguments(func, args)?));
        let frame = build_frame(
            func.code.clone(),
            self.frames.last_mut(),
            locals,
            Some(func.globals.clone()),
            func.closure.as_deref(),
        )?;
        if func.code.is_generator() {
            return Ok(Value::Generator(Generator::new(frame)));
        }
        self.run_frame(frame)
    }

    fn instantiate(&mut self, class: &Rc<Class>, args: CallArgs) -> RunResult<Value> {
        let object = match class.exc_base() {
            Some(kind) => Value::Exception(Rc::new(PyException::new(
                kind,
                Some(class.clone()),
                args.positional.clone(),
            ))),
            None => Value::Instance(Instance::new(class.clone())),
        };
        match self.lookup_special(&object, "__init__") {
            Some(init) => {
                let result = self.call_value(init, args)?;
                if !result.is_none() {
                    return Err(ExcType::TypeError.err(format!(
                        "__init__() should return None, not '{}'",
                        result.type_name()
                    )));
                }
            }
            None if !args.is_empty() && matches!(object, Value::Instance(_)) => {
                return Err(ExcType::TypeError.err("object() takes no parameters"));
            }
            None => {}
        }
        Ok(object)
    }

    /// Run a class body and create the class from the namespace it fills.
    pub fn build_class(
        &mut self,
        body: &Rc<Function>,
        name: &str,
        bases: Vec<Value>,
    ) -> RunResult<Rc<Class>> {
        if let Some(base) = bases
            .iter()
            .find(|base| !matches!(base, Value::Class(_) | Value::ExcType(_)))
        {
            return Err(ExcType::TypeError.err(format!(
                "class {name}: base must be a class, not '{}'",
                base.type_name()
            )));
        }
        let bases = if bases.is_empty() {
            vec![Value::Class(self.object_class.clone())]
        } else {
            bases
        };

        let ns = Rc::new(RefCell::new(Dict::default()));
        let frame = build_frame(
            body.code.clone(),
            self.frames.last_mut(),
            ns.clone(),
            Some(body.globals.clone()),
            body.closure.as_deref(),
        )?;
        self.run_frame(frame)?;
        let dict = std::mem::take(&mut *ns.borrow_mut());
        debug!("built class {name} with {} attributes", dict.len());
        Ok(Class::new(name, bases, dict))
    }

    // ── attributes ─────────────────────────────────────────────────

    pub fn get_attr(&mut self, obj: &Value, name: &str) -> RunResult<Value> {
        let found = match obj {
            Value::Instance(inst) => {
                let own = inst.dict.borrow().get_str(name).cloned();
                match (own, name) {
                    (Some(value), _) => Some(value),
                    (None, "__class__") => Some(Value::Class(inst.class.clone())),
                    (None, "__dict__") => Some(Value::Dict(inst.dict.clone())),
                    (None, _) => inst
                        .class
                        .lookup(name)
                        .map(|(attr, owner)| bind(attr, obj, owner)),
                }
            }
            Value::Exception(exc) => match name {
                "args" => Some(exc.args_tuple()),
                "__class__" => Some(exc.type_value()),
                "__cause__" => Some(exc.cause.borrow().clone().unwrap_or(Value::None)),
                _ => {
                    let own = exc.dict.borrow().get_str(name).cloned();
                    own.or_else(|| self.lookup_special(obj, name))
                }
            },
            Value::Class(class) => match name {
                "__name__" => Some(Value::Str(class.name.clone())),
                "__bases__" => Some(Value::tuple(class.bases.clone())),
                "__dict__" => Some(Value::Dict(class.dict.clone())),
                _ => class.lookup(name).map(|(attr, _)| attr),
            },
            Value::ExcType(kind) => match name {
                "__name__" => Some(Value::str(kind.name())),
                _ => None,
            },
            Value::Module(module) => module.dict.borrow().get_str(name).cloned(),
            Value::Function(func) => match name {
                "__name__" => Some(Value::Str(func.name.clone())),
                "__qualname__" => Some(Value::Str(func.qualname.clone())),
                "__code__" => Some(Value::Code(func.code.clone())),
                "__defaults__" if func.defaults.is_empty() => Some(Value::None),
                "__defaults__" => Some(Value::tuple(func.defaults.clone())),
                _ => None,
            },
            Value::BoundMethod(method) => match name {
                "__self__" => Some(method.receiver.clone()),
                "__func__" => Some(Value::Function(method.function.clone())),
                _ => None,
            },
            Value::Complex(re, im) => match name {
                "real" => Some(Value::Float(*re)),
                "imag" => Some(Value::Float(*im)),
                _ => None,
            },
            Value::Generator(generator) => match name {
                "__name__" => Some(Value::Str(generator.name.clone())),
                _ => None,
            },
            _ => None,
        };
        if let Some(value) = found {
            return Ok(value);
        }
        if user_class(obj).is_none() {
            if let Some(method) = method_index(&obj.type_name(), name) {
                return Ok(Value::NativeMethod(Rc::new(NativeMethod {
                    receiver: obj.clone(),
                    method,
                })));
            }
        }
        Err(no_attribute(obj, name))
    }

    pub fn set_attr(&mut self, obj: &Value, name: &str, value: Value) -> RunResult<()> {
        let dict = match obj {
            Value::Instance(inst) => &inst.dict,
            Value::Class(class) => &class.dict,
            Value::Module(module) => &module.dict,
            Value::Exception(exc) => match name {
                "args" => {
                    let args = self.collect_iterable(&value)?;
                    *exc.args.borrow_mut() = args;
                    return Ok(());
                }
                "__cause__" => {
                    *exc.cause.borrow_mut() = (!value.is_none()).then_some(value);
                    return Ok(());
                }
                _ => &exc.dict,
            },
            other => return Err(no_attribute(other, name)),
        };
        dict.borrow_mut().set_str(name, value);
        Ok(())
    }

    pub fn del_attr(&mut self, obj: &Value, name: &str) -> RunResult<()> {
        let dict = match obj {
            Value::Instance(inst) => &inst.dict,
            Value::Class(class) => &class.dict,
            Value::Module(module) => &module.dict,
            Value::Exception(exc) => &exc.dict,
            other => return Err(no_attribute(other, name)),
        };
        let removed = dict.borrow_mut().remove_str(name);
        match removed {
            Some(_) => Ok(()),
            None => Err(no_attribute(obj, name)),
        }
    }

    // ── imports ────────────────────────────────────────────────────

    /// Load, run and cache the module `name`. A module is registered before
    /// its body runs, so circular imports see the partial namespace.
    pub fn import_module(&mut self, name: &str) -> RunResult<Rc<Module>> {
        if let Some(module) = self.modules.get(name) {
            return Ok(module.clone());
        }
        let bytes = self.source.load(name).ok_or_else(|| {
            ExcType::ImportError.err(format!("No module named '{name}'"))
        })?;
        let loaded = read_module(&bytes).map_err(|e| {
            ExcType::ImportError.err(format!("bad module '{name}': {e}"))
        })?;
        info!("importing {name}");

        let ns = self.module_namespace(name);
        let module = Rc::new(Module {
            name: Rc::from(name),
            dict: ns.clone(),
        });
        self.modules.insert(module.name.clone(), module.clone());

        let result = build_frame(loaded.code, None, ns, None, None)
            .and_then(|frame| self.run_frame(frame));
        if let Err(e) = result {
            self.modules.remove(name);
            return Err(e);
        }
        Ok(module)
    }
}

fn not_callable(value: &Value) -> crate::exceptions::RunError {
    ExcType::TypeError.err(format!("'{}' object is not callable", value.type_name()))
}
