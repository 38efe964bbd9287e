use std::cell::{self, RefCell};
use std::rc::Rc;

use crate::builtins::MethodIndex;
use crate::code::Code;
use crate::exceptions::ExcType;
use crate::frame::{Cell, Frame};
use crate::value::{Dict, DictRef, Namespace, Value};

/// A user function created by `MAKE_FUNCTION` / `MAKE_CLOSURE`.
pub struct Function {
    pub code: Rc<Code>,
    pub globals: DictRef,
    /// Positional defaults, aligned to the last parameters.
    pub defaults: Vec<Value>,
    /// Keyword-only defaults by name.
    pub kwdefaults: Dict,
    pub closure: Option<Rc<[Rc<Cell>]>>,
    pub name: Rc<str>,
    pub qualname: Rc<str>,
    pub annotations: Dict,
}

/// A function bound to the receiver it was looked up on.
pub struct BoundMethod {
    pub receiver: Value,
    pub function: Rc<Function>,
    /// Class the function was found on; the receiver must be an instance.
    pub owner: Rc<Class>,
}

/// A builtin method bound to a builtin receiver, e.g. `[].append`.
pub struct NativeMethod {
    pub receiver: Value,
    pub method: MethodIndex,
}

pub struct Class {
    pub name: Rc<str>,
    /// `Value::Class` or `Value::ExcType` entries.
    pub bases: Vec<Value>,
    pub dict: DictRef,
}

impl Class {
    pub fn new(name: &str, bases: Vec<Value>, dict: Dict) -> Rc<Self> {
        Rc::new(Self {
            name: Rc::from(name),
            bases,
            dict: Rc::new(RefCell::new(dict)),
        })
    }

    /// Depth-first attribute lookup; returns the value and the class that
    /// defines it.
    pub fn lookup(self: &Rc<Self>, name: &str) -> Option<(Value, Rc<Class>)> {
        if let Some(value) = self.dict.borrow().get_str(name) {
            return Some((value.clone(), self.clone()));
        }
        self.bases.iter().find_map(|base| match base {
            Value::Class(base) => base.lookup(name),
            _ => None,
        })
    }

    /// The first builtin exception class among the bases, depth-first.
    pub fn exc_base(&self) -> Option<ExcType> {
        self.bases.iter().find_map(|base| match base {
            Value::ExcType(kind) => Some(*kind),
            Value::Class(base) => base.exc_base(),
            _ => None,
        })
    }

    pub fn is_subclass_of(self: &Rc<Self>, other: &Rc<Class>) -> bool {
        Rc::ptr_eq(self, other)
            || self.bases.iter().any(|base| match base {
                Value::Class(base) => base.is_subclass_of(other),
                _ => false,
            })
    }
}

pub struct Instance {
    pub class: Rc<Class>,
    pub dict: DictRef,
}

impl Instance {
    pub fn new(class: Rc<Class>) -> Rc<Self> {
        Rc::new(Self {
            class,
            dict: Rc::new(RefCell::new(Dict::default())),
        })
    }
}

pub struct Module {
    pub name: Rc<str>,
    pub dict: DictRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenState {
    Created,
    Suspended,
    Running,
    Finished,
}

/// A suspended generator frame.
///
/// The frame is moved out while the generator runs and put back when it
/// yields, so a running generator has no frame here.
pub struct Generator {
    pub name: Rc<str>,
    pub state: cell::Cell<GenState>,
    pub frame: RefCell<Option<Frame>>,
}

impl Generator {
    pub fn new(frame: Frame) -> Rc<Self> {
        let generator = Rc::new(Self {
            name: frame.code.name.clone(),
            state: cell::Cell::new(GenState::Created),
            frame: RefCell::new(None),
        });
        let mut frame = frame;
        frame.generator = Some(Rc::downgrade(&generator));
        *generator.frame.borrow_mut() = Some(frame);
        generator
    }

    pub fn state(&self) -> GenState {
        self.state.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_first_lookup() {
        let mut base_dict = Dict::default();
        base_dict.set_str("greet", Value::Int(1));
        base_dict.set_str("shared", Value::Int(2));
        let base = Class::new("Base", vec![], base_dict);

        let mut child_dict = Dict::default();
        child_dict.set_str("shared", Value::Int(3));
        let child = Class::new("Child", vec![Value::Class(base.clone())], child_dict);

        let (value, owner) = child.lookup("greet").unwrap();
        assert_eq!(value.as_i64(), Some(1));
        assert!(Rc::ptr_eq(&owner, &base));

        let (value, owner) = child.lookup("shared").unwrap();
        assert_eq!(value.as_i64(), Some(3));
        assert!(Rc::ptr_eq(&owner, &child));

        assert!(child.lookup("missing").is_none());
        assert!(child.is_subclass_of(&base));
        assert!(!base.is_subclass_of(&child));
    }

    #[test]
    fn exception_subclasses() {
        let err = Class::new("AppError", vec![Value::ExcType(ExcType::ValueError)], Dict::default());
        let sub = Class::new("DbError", vec![Value::Class(err)], Dict::default());
        assert_eq!(sub.exc_base(), Some(ExcType::ValueError));
        let plain = Class::new("Plain", vec![], Dict::default());
        assert_eq!(plain.exc_base(), None);
    }
}
