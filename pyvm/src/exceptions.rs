use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use bytecode::DecodeError;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::format::{repr, to_str};
use crate::function::Class;
use crate::marshal::MarshalError;
use crate::value::{Dict, DictRef, Value};

/// Builtin exception classes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    IntoStaticStr,
    EnumIter,
)]
pub enum ExcType {
    BaseException,
    SystemExit,
    KeyboardInterrupt,
    GeneratorExit,
    Exception,
    StopIteration,
    ArithmeticError,
    FloatingPointError,
    OverflowError,
    ZeroDivisionError,
    AssertionError,
    AttributeError,
    BufferError,
    EOFError,
    ImportError,
    LookupError,
    IndexError,
    KeyError,
    MemoryError,
    NameError,
    UnboundLocalError,
    OSError,
    FileNotFoundError,
    ReferenceError,
    RuntimeError,
    NotImplementedError,
    SyntaxError,
    IndentationError,
    SystemError,
    TypeError,
    ValueError,
    UnicodeError,
    Warning,
    UserWarning,
    DeprecationWarning,
    PendingDeprecationWarning,
    SyntaxWarning,
    RuntimeWarning,
    FutureWarning,
    ImportWarning,
    UnicodeWarning,
    BytesWarning,
    ResourceWarning,
}

impl ExcType {
    pub fn parent(self) -> Option<ExcType> {
        use ExcType::*;
        let parent = match self {
            BaseException => return None,
            SystemExit | KeyboardInterrupt | GeneratorExit | Exception => {
                BaseException
            }
            FloatingPointError | OverflowError | ZeroDivisionError => {
                ArithmeticError
            }
            IndexError | KeyError => LookupError,
            UnboundLocalError => NameError,
            FileNotFoundError => OSError,
            NotImplementedError => RuntimeError,
            IndentationError => SyntaxError,
            UnicodeError => ValueError,
            UserWarning | DeprecationWarning | PendingDeprecationWarning
            | SyntaxWarning | RuntimeWarning | FutureWarning | ImportWarning
            | UnicodeWarning | BytesWarning | ResourceWarning => Warning,
            _ => Exception,
        };
        Some(parent)
    }

    pub fn is_subclass_of(self, other: ExcType) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }

    pub fn name(self) -> &'static str {
        self.into()
    }

    /// A fresh instance carrying `args`.
    pub fn instance(self, args: Vec<Value>) -> Value {
        Value::Exception(Rc::new(PyException::new(self, None, args)))
    }

    /// A raisable error with a single message argument.
    pub fn err(self, msg: impl Into<String>) -> RunError {
        let msg: String = msg.into();
        RunError::Exc(self.instance(vec![Value::str(&msg)]))
    }
}

/// An exception instance.
pub struct PyException {
    /// Nearest builtin exception class.
    pub kind: ExcType,
    /// User-defined class, when raised from a subclass.
    pub class: Option<Rc<Class>>,
    pub args: RefCell<Vec<Value>>,
    pub dict: DictRef,
    /// `raise X from Y`
    pub cause: RefCell<Option<Value>>,
}

impl PyException {
    pub fn new(kind: ExcType, class: Option<Rc<Class>>, args: Vec<Value>) -> Self {
        Self {
            kind,
            class,
            args: RefCell::new(args),
            dict: Rc::new(RefCell::new(Dict::default())),
            cause: RefCell::new(None),
        }
    }

    pub fn type_name(&self) -> String {
        match &self.class {
            Some(class) => class.name.to_string(),
            None => self.kind.name().to_string(),
        }
    }

    /// The class value pushed alongside the instance by handlers.
    pub fn type_value(&self) -> Value {
        match &self.class {
            Some(class) => Value::Class(class.clone()),
            None => Value::ExcType(self.kind),
        }
    }

    pub fn args_tuple(&self) -> Value {
        Value::tuple(self.args.borrow().clone())
    }

    /// `str(exc)`
    pub fn message(&self) -> String {
        let args = self.args.borrow();
        match args.as_slice() {
            [] => String::new(),
            [single] if self.kind == ExcType::KeyError => repr(single),
            [single] => to_str(single),
            _ => repr(&Value::tuple(args.clone())),
        }
    }
}

/// Whether exception class or instance `exc` matches an `except` clause.
pub fn exception_matches(exc: &Value, handler: &Value) -> bool {
    match handler {
        Value::Tuple(items) => items.iter().any(|h| exception_matches(exc, h)),
        Value::ExcType(target) => match exc {
            Value::ExcType(kind) => kind.is_subclass_of(*target),
            Value::Class(class) => {
                class.exc_base().is_some_and(|k| k.is_subclass_of(*target))
            }
            Value::Exception(e) => e.kind.is_subclass_of(*target),
            _ => false,
        },
        Value::Class(target) => match exc {
            Value::Class(class) => class.is_subclass_of(target),
            Value::Exception(e) => {
                e.class.as_ref().is_some_and(|c| c.is_subclass_of(target))
            }
            _ => false,
        },
        _ => false,
    }
}

/// One line of a traceback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub filename: Rc<str>,
    pub line: u32,
    pub name: Rc<str>,
}

/// The pending exception and the frames it passed through, innermost first.
#[derive(Clone)]
pub struct ExcInfo {
    pub value: Value,
    pub traceback: Vec<TraceEntry>,
}

/// Unrecoverable interpreter states. These abort the run.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    StackUnderflow,
    StackOverflow { code: String, limit: usize },
    BlockStackInvariantViolation(&'static str),
    MissingCell(String),
    MissingBuiltins,
    UnknownOpcode(DecodeError),
    RecursionLimit(usize),
    FramesLeftOver(usize),
    DataLeftOnStack(usize),
    YieldOutsideGenerator,
    NoActiveFrame,
    BadArgument { opcode: &'static str, arg: u32 },
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::StackUnderflow => write!(f, "operand stack underflow"),
            Fault::StackOverflow { code, limit } => write!(
                f,
                "operand stack overflow in {code} (stacksize {limit})"
            ),
            Fault::BlockStackInvariantViolation(msg) => {
                write!(f, "block stack invariant violated: {msg}")
            }
            Fault::MissingCell(name) => write!(f, "no cell for free variable {name}"),
            Fault::MissingBuiltins => write!(f, "root frame has no __builtins__"),
            Fault::UnknownOpcode(e) => write!(f, "bad bytecode: {e}"),
            Fault::RecursionLimit(depth) => {
                write!(f, "maximum call depth of {depth} exceeded")
            }
            Fault::FramesLeftOver(n) => write!(f, "frames left over: {n}"),
            Fault::DataLeftOnStack(n) => {
                write!(f, "data left on stack: {n} values")
            }
            Fault::YieldOutsideGenerator => {
                write!(f, "yield executed outside a generator frame")
            }
            Fault::NoActiveFrame => write!(f, "no frame is executing"),
            Fault::BadArgument { opcode, arg } => {
                write!(f, "{opcode} argument {arg} is out of range")
            }
        }
    }
}

impl std::error::Error for Fault {}

/// Error raised by instruction handlers and calls.
#[derive(Clone)]
pub enum RunError {
    /// A language-level exception instance, catchable by handlers.
    Exc(Value),
    Fault(Fault),
}

pub type RunResult<T> = Result<T, RunError>;

impl From<Fault> for RunError {
    fn from(fault: Fault) -> Self {
        RunError::Fault(fault)
    }
}

impl fmt::Debug for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Exc(value) => write!(f, "Exc({value:?})"),
            RunError::Fault(fault) => write!(f, "Fault({fault:?})"),
        }
    }
}

/// An exception that escaped the root frame.
#[derive(Debug, Clone)]
pub struct UncaughtException {
    pub type_name: String,
    pub message: String,
    /// Outermost call first.
    pub traceback: Vec<TraceEntry>,
    /// Builtin class (or nearest builtin base) of the exception.
    pub kind: Option<ExcType>,
}

impl UncaughtException {
    pub fn new(value: &Value, traceback: &[TraceEntry]) -> Self {
        let (type_name, message, kind) = match value {
            Value::Exception(e) => (e.type_name(), e.message(), Some(e.kind)),
            other => (other.type_name().into_owned(), to_str(other), None),
        };
        Self {
            type_name,
            message,
            traceback: traceback.iter().rev().cloned().collect(),
            kind,
        }
    }
}

impl fmt::Display for UncaughtException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.traceback.is_empty() {
            writeln!(f, "Traceback (most recent call last):")?;
            for entry in &self.traceback {
                writeln!(
                    f,
                    "  File \"{}\", line {}, in {}",
                    entry.filename, entry.line, entry.name
                )?;
            }
        }
        if self.message.is_empty() {
            write!(f, "{}", self.type_name)
        } else {
            write!(f, "{}: {}", self.type_name, self.message)
        }
    }
}

impl std::error::Error for UncaughtException {}

/// Host-facing error of a module run.
#[derive(Debug)]
pub enum VmError {
    Load(MarshalError),
    Uncaught(UncaughtException),
    Fault(Fault),
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::Load(e) => write!(f, "failed to load module: {e}"),
            VmError::Uncaught(e) => write!(f, "{e}"),
            VmError::Fault(e) => write!(f, "fatal: {e}"),
        }
    }
}

impl std::error::Error for VmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VmError::Load(e) => Some(e),
            VmError::Uncaught(e) => Some(e),
            VmError::Fault(e) => Some(e),
        }
    }
}

impl From<MarshalError> for VmError {
    fn from(e: MarshalError) -> Self {
        VmError::Load(e)
    }
}

impl From<Fault> for VmError {
    fn from(e: Fault) -> Self {
        VmError::Fault(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn hierarchy() {
        assert!(ExcType::ZeroDivisionError.is_subclass_of(ExcType::ArithmeticError));
        assert!(ExcType::KeyError.is_subclass_of(ExcType::Exception));
        assert!(ExcType::UnboundLocalError.is_subclass_of(ExcType::NameError));
        assert!(!ExcType::KeyboardInterrupt.is_subclass_of(ExcType::Exception));
        assert!(ExcType::StopIteration.is_subclass_of(ExcType::BaseException));
        assert!(!ExcType::Exception.is_subclass_of(ExcType::ValueError));
    }

    #[test]
    fn names_round_trip_through_strum() {
        assert_eq!(ExcType::EOFError.name(), "EOFError");
        assert_eq!(ExcType::from_str("TypeError"), Ok(ExcType::TypeError));
        assert!(ExcType::from_str("NotAnError").is_err());
    }

    #[test]
    fn messages() {
        let exc = PyException::new(ExcType::ValueError, None, vec![Value::str("bad")]);
        assert_eq!(exc.message(), "bad");
        let exc = PyException::new(ExcType::KeyError, None, vec![Value::str("k")]);
        assert_eq!(exc.message(), "'k'");
        let exc = PyException::new(
            ExcType::ValueError,
            None,
            vec![Value::Int(1), Value::Int(2)],
        );
        assert_eq!(exc.message(), "(1, 2)");
    }

    #[test]
    fn matching_builtin_handlers() {
        let exc = ExcType::KeyError.instance(vec![]);
        assert!(exception_matches(&exc, &Value::ExcType(ExcType::LookupError)));
        assert!(!exception_matches(&exc, &Value::ExcType(ExcType::TypeError)));
        let handlers = Value::tuple(vec![
            Value::ExcType(ExcType::TypeError),
            Value::ExcType(ExcType::KeyError),
        ]);
        assert!(exception_matches(&Value::ExcType(ExcType::KeyError), &handlers));
    }

    #[test]
    fn uncaught_rendering() {
        let exc = ExcType::NameError.instance(vec![Value::str("name 'x' is not defined")]);
        let tb = vec![
            TraceEntry { filename: Rc::from("m.py"), line: 3, name: Rc::from("f") },
            TraceEntry { filename: Rc::from("m.py"), line: 7, name: Rc::from("<module>") },
        ];
        let text = UncaughtException::new(&exc, &tb).to_string();
        assert_eq!(
            text,
            "Traceback (most recent call last):\n  \
             File \"m.py\", line 7, in <module>\n  \
             File \"m.py\", line 3, in f\n\
             NameError: name 'x' is not defined"
        );
    }
}
