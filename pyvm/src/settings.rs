use std::path::PathBuf;

pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// Half of the 2 MiB stack Rust gives spawned threads.
pub const DEFAULT_NATIVE_STACK_BUDGET: usize = 1024 * 1024;

/// Interpreter configuration.
#[derive(Debug, Clone)]
pub struct VmSettings {
    /// Interpreted calls nested deeper than this abort the run.
    pub max_call_depth: usize,
    /// Bytes of host stack nested interpreted calls may use before the run
    /// aborts with the same fault. Must stay below the stack size of the
    /// thread running the interpreter.
    pub native_stack_budget: usize,
    /// Log every executed instruction at `trace` level.
    pub trace: bool,
    /// Directories searched for imported modules.
    pub search_paths: Vec<PathBuf>,
}

impl Default for VmSettings {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            native_stack_budget: DEFAULT_NATIVE_STACK_BUDGET,
            trace: false,
            search_paths: vec![PathBuf::from(".")],
        }
    }
}
