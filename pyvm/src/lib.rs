pub mod args;
pub mod builtins;
pub mod code;
pub mod exceptions;
pub mod format;
pub mod frame;
pub mod function;
pub mod interpreter;
pub mod io;
pub mod iter;
pub mod marshal;
pub mod modules;
pub mod operators;
pub mod settings;
pub mod value;

pub use code::{Code, CodeBuilder, CodeFlags};
pub use exceptions::{ExcType, Fault, UncaughtException, VmError};
pub use interpreter::{Interpreter, InterpreterCreateInfo};
pub use io::{CaptureSink, OutputSink, StdoutSink};
pub use marshal::{MarshalError, MarshalWriter, read_module};
pub use modules::{DirectorySource, MemorySource, ModuleSource};
pub use settings::VmSettings;
pub use value::Value;
