//! The bytecode interpreter: frame execution, block-stack unwinding and
//! exception state.

mod call;
mod dispatch;
mod protocol;

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use bytecode::{BytecodeDecoder, DecodeError, Instruction, OpClass};
use log::{debug, log_enabled, trace, Level};

use crate::builtins::builtins_dict;
use crate::code::Code;
use crate::exceptions::{
    ExcInfo, ExcType, Fault, RunError, RunResult, TraceEntry, UncaughtException, VmError,
};
use crate::format::{format_stack, repr};
use crate::frame::{BlockKind, Frame, build_frame};
use crate::function::{Class, GenState, Generator, Module};
use crate::io::{OutputSink, StdoutSink};
use crate::marshal::read_module;
use crate::modules::{DirectorySource, ModuleSource};
use crate::settings::VmSettings;
use crate::value::{Dict, DictRef, Namespace, Value};

pub use dispatch::{DispatchTable, Handler};

/// Why the current instruction interrupted sequential execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Why {
    Return,
    Break,
    Continue,
    Yield,
    Exception,
    /// An exception re-raised from saved state; unwinds like `Exception`
    /// without adding a traceback entry.
    Reraise,
}

/// How a frame stopped executing.
#[derive(Debug)]
pub enum FrameExit {
    Return(Value),
    Yield(Value),
}

/// Outcome of resuming a generator.
#[derive(Debug)]
pub enum GenStep {
    Yielded(Value),
    Returned(Value),
}

pub struct InterpreterCreateInfo {
    pub settings: VmSettings,
    pub output: Box<dyn OutputSink>,
    /// Where `import` finds modules. Defaults to the settings' search paths.
    pub source: Option<Box<dyn ModuleSource>>,
}

impl Default for InterpreterCreateInfo {
    fn default() -> Self {
        Self {
            settings: VmSettings::default(),
            output: Box::new(StdoutSink),
            source: None,
        }
    }
}

pub struct Interpreter {
    /// Call stack; the last frame is executing.
    frames: Vec<Frame>,
    return_value: Value,
    /// The exception currently propagating.
    exception: Option<ExcInfo>,
    /// Exceptions caught by active `except`/`finally` handlers, innermost
    /// last. Bare `raise` re-raises the last one.
    handled: Vec<ExcInfo>,
    builtins: DictRef,
    modules: AHashMap<Rc<str>, Rc<Module>>,
    source: Box<dyn ModuleSource>,
    output: Box<dyn OutputSink>,
    settings: VmSettings,
    dispatch: DispatchTable,
    object_class: Rc<Class>,
    depth: usize,
    /// Host stack address of the outermost interpreted frame.
    stack_base: usize,
}

impl Interpreter {
    pub fn new(info: InterpreterCreateInfo) -> Self {
        let InterpreterCreateInfo {
            settings,
            output,
            source,
        } = info;
        let source = source.unwrap_or_else(|| {
            Box::new(DirectorySource::new(settings.search_paths.clone()))
        });
        let object_class = Class::new("object", Vec::new(), Dict::default());
        let builtins = Rc::new(RefCell::new(builtins_dict(&object_class)));
        Self {
            frames: Vec::new(),
            return_value: Value::None,
            exception: None,
            handled: Vec::new(),
            builtins,
            modules: AHashMap::new(),
            source,
            output,
            settings,
            dispatch: DispatchTable::new(),
            object_class,
            depth: 0,
            stack_base: 0,
        }
    }

    pub fn settings(&self) -> &VmSettings {
        &self.settings
    }

    pub fn object_class(&self) -> &Rc<Class> {
        &self.object_class
    }

    /// Write program output to the host sink.
    pub fn emit(&mut self, text: &str) {
        self.output.emit(text);
    }

    /// A fresh module namespace wired to the builtins.
    pub fn module_namespace(&self, name: &str) -> DictRef {
        let mut ns = Dict::default();
        ns.set_str("__name__", Value::str(name));
        ns.set_str("__builtins__", Value::Dict(self.builtins.clone()));
        Rc::new(RefCell::new(ns))
    }

    /// Load a compiled module image and run it as `__main__`, returning the
    /// module namespace.
    pub fn run_module(&mut self, bytes: &[u8]) -> Result<DictRef, VmError> {
        let loaded = read_module(bytes)?;
        let ns = self.module_namespace("__main__");
        self.run_code(loaded.code, ns.clone())?;
        Ok(ns)
    }

    /// Run a module-level code object with `ns` as its globals and locals.
    pub fn run_code(&mut self, code: Rc<Code>, ns: DictRef) -> Result<(), VmError> {
        debug!("running {} from {}", code.name, code.filename);
        let result = build_frame(code, None, ns, None, None)
            .and_then(|frame| self.run_frame(frame));
        let outcome = match result {
            Ok(_) if !self.frames.is_empty() => {
                Err(VmError::Fault(Fault::FramesLeftOver(self.frames.len())))
            }
            Ok(_) => Ok(()),
            Err(RunError::Exc(value)) => {
                let traceback = match self.exception.take() {
                    Some(info) if info.value.is(&value) => info.traceback,
                    _ => Vec::new(),
                };
                Err(VmError::Uncaught(UncaughtException::new(&value, &traceback)))
            }
            Err(RunError::Fault(fault)) => Err(VmError::Fault(fault)),
        };
        if outcome.is_err() {
            self.reset();
        }
        outcome
    }

    fn reset(&mut self) {
        self.frames.clear();
        self.depth = 0;
        self.exception = None;
        self.handled.clear();
        self.return_value = Value::None;
    }

    // ── frame access ───────────────────────────────────────────────

    #[inline]
    fn frame(&mut self) -> Result<&mut Frame, Fault> {
        self.frames.last_mut().ok_or(Fault::NoActiveFrame)
    }

    #[inline]
    fn frame_ref(&self) -> Result<&Frame, Fault> {
        self.frames.last().ok_or(Fault::NoActiveFrame)
    }

    #[inline]
    fn push(&mut self, value: Value) -> Result<(), Fault> {
        self.frame()?.push(value)
    }

    #[inline]
    fn pop(&mut self) -> Result<Value, Fault> {
        self.frame()?.pop()
    }

    #[inline]
    fn top(&mut self) -> Result<Value, Fault> {
        Ok(self.frame()?.top()?.clone())
    }

    #[inline]
    fn jump(&mut self, target: usize) -> Result<(), Fault> {
        self.frame()?.lasti = target;
        Ok(())
    }

    // ── running frames ─────────────────────────────────────────────

    /// Push `frame`, execute it until it returns or yields, and pop it again.
    fn enter_frame(&mut self, mut frame: Frame) -> (Frame, RunResult<FrameExit>) {
        let here = stack_address();
        if self.depth == 0 {
            self.stack_base = here;
        }
        let used = self.stack_base.saturating_sub(here);
        if self.depth >= self.settings.max_call_depth || used > self.settings.native_stack_budget {
            return (frame, Err(Fault::RecursionLimit(self.depth).into()));
        }
        frame.caller_depth = self.frames.len().checked_sub(1);
        debug!("enter {} (depth {})", frame.code.name, self.depth + 1);
        self.depth += 1;
        self.frames.push(frame);
        let result = self.execute();
        self.depth -= 1;
        match self.frames.pop() {
            Some(frame) => {
                debug!("leave {}", frame.code.name);
                (frame, result)
            }
            None => unreachable_frame(),
        }
    }

    /// Run a non-generator frame to completion.
    pub fn run_frame(&mut self, frame: Frame) -> RunResult<Value> {
        let (frame, result) = self.enter_frame(frame);
        match result? {
            FrameExit::Return(value) => {
                if !frame.stack.is_empty() {
                    return Err(Fault::DataLeftOnStack(frame.stack.len()).into());
                }
                Ok(value)
            }
            FrameExit::Yield(_) => Err(Fault::YieldOutsideGenerator.into()),
        }
    }

    /// Resume `generator`, delivering `sent` as the value of the suspended
    /// `yield` expression.
    pub fn resume_generator(
        &mut self,
        generator: &Rc<Generator>,
        sent: Value,
    ) -> RunResult<GenStep> {
        match generator.state() {
            GenState::Running => {
                return Err(ExcType::ValueError.err("generator already executing"));
            }
            GenState::Finished => return Ok(GenStep::Returned(Value::None)),
            GenState::Created if !sent.is_none() => {
                return Err(ExcType::TypeError.err(
                    "can't send non-None value to a just-started generator",
                ));
            }
            GenState::Created | GenState::Suspended => {}
        }
        let Some(mut frame) = generator.frame.borrow_mut().take() else {
            generator.state.set(GenState::Finished);
            return Ok(GenStep::Returned(Value::None));
        };
        if generator.state() == GenState::Suspended {
            frame.push(sent)?;
        }

        generator.state.set(GenState::Running);
        let (frame, result) = self.enter_frame(frame);
        match result {
            Ok(FrameExit::Yield(value)) => {
                *generator.frame.borrow_mut() = Some(frame);
                generator.state.set(GenState::Suspended);
                Ok(GenStep::Yielded(value))
            }
            Ok(FrameExit::Return(value)) => {
                generator.state.set(GenState::Finished);
                Ok(GenStep::Returned(value))
            }
            Err(e) => {
                generator.state.set(GenState::Finished);
                Err(e)
            }
        }
    }

    /// The fetch/dispatch loop for the frame on top of the call stack.
    fn execute(&mut self) -> RunResult<FrameExit> {
        loop {
            let instr = self.fetch()?;
            if self.settings.trace && log_enabled!(Level::Trace) {
                self.trace_instruction(&instr);
            }

            let why = match self.dispatch_instruction(&instr) {
                Ok(why) => why,
                Err(RunError::Exc(value)) => {
                    self.record_exception(value);
                    Some(Why::Exception)
                }
                Err(RunError::Fault(fault)) => return Err(fault.into()),
            };
            let Some(why) = why else {
                continue;
            };
            if why == Why::Yield {
                return Ok(FrameExit::Yield(self.take_return_value()));
            }

            match self.unwind(why)? {
                None => continue,
                Some(Why::Return) => {
                    return Ok(FrameExit::Return(self.take_return_value()));
                }
                Some(Why::Exception | Why::Reraise) => {
                    let info = self.exception.as_ref().ok_or(
                        Fault::BlockStackInvariantViolation("exception without pending state"),
                    )?;
                    return Err(RunError::Exc(info.value.clone()));
                }
                Some(Why::Break | Why::Continue) => {
                    return Err(Fault::BlockStackInvariantViolation(
                        "break or continue outside a loop",
                    )
                    .into());
                }
                Some(Why::Yield) => return Err(Fault::YieldOutsideGenerator.into()),
            }
        }
    }

    fn take_return_value(&mut self) -> Value {
        std::mem::replace(&mut self.return_value, Value::None)
    }

    fn fetch(&mut self) -> Result<Instruction, Fault> {
        let frame = self.frame()?;
        let mut decoder = BytecodeDecoder::at(&frame.code.code, frame.lasti);
        let instr = decoder
            .decode_next()
            .map_err(Fault::UnknownOpcode)?
            .ok_or(Fault::UnknownOpcode(DecodeError::Truncated {
                offset: frame.lasti,
            }))?;
        frame.lasti = decoder.offset();
        Ok(instr)
    }

    fn dispatch_instruction(&mut self, instr: &Instruction) -> RunResult<Option<Why>> {
        match self.dispatch.class(instr.opcode) {
            OpClass::Unary(op) => {
                let value = self.pop()?;
                let result = self.unary_op(op, &value)?;
                self.push(result)?;
                Ok(None)
            }
            OpClass::Binary(op) => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let result = self.binary_op(op, &lhs, &rhs)?;
                self.push(result)?;
                Ok(None)
            }
            OpClass::Inplace(op) => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let result = self.inplace_op(op, &lhs, &rhs)?;
                self.push(result)?;
                Ok(None)
            }
            OpClass::Compare => dispatch::compare(self, instr),
            OpClass::Other => match self.dispatch.handler(instr.opcode) {
                Some(handler) => handler(self, instr),
                None => Err(Fault::UnknownOpcode(DecodeError::UnknownOpcode {
                    offset: instr.offset,
                    byte: instr.opcode as u8,
                })
                .into()),
            },
        }
    }

    fn trace_instruction(&self, instr: &Instruction) {
        let Some(frame) = self.frames.last() else {
            return;
        };
        let mut line = format!("{}:{instr}", frame.code.name);
        if let Some(detail) = instr.arg.and_then(|arg| describe_arg(frame, instr, arg)) {
            line.push_str(&format!(" ({detail})"));
        }
        trace!("{line}");
        let stack = format_stack(&frame.stack);
        if !stack.is_empty() {
            trace!("stack:\n{}", stack.trim_end());
        }
        if !frame.block_stack.is_empty() {
            trace!("blocks: {:?}", frame.block_stack);
        }
    }

    // ── exceptions ─────────────────────────────────────────────────

    /// Note that `value` is propagating through the current frame.
    fn record_exception(&mut self, value: Value) {
        let Some(frame) = self.frames.last() else {
            return;
        };
        let entry = TraceEntry {
            filename: frame.code.filename.clone(),
            line: frame.line(),
            name: frame.code.name.clone(),
        };
        match &mut self.exception {
            Some(info) if info.value.is(&value) => info.traceback.push(entry),
            _ => {
                self.exception = Some(ExcInfo {
                    value,
                    traceback: vec![entry],
                })
            }
        }
    }

    /// Forget `value` as the propagating exception after native code has
    /// swallowed it.
    pub fn clear_pending(&mut self, value: &Value) {
        if self.exception.as_ref().is_some_and(|info| info.value.is(value)) {
            self.exception = None;
        }
    }

    /// Pop blocks until one handles `why`. `None` means execution resumes
    /// in the current frame; otherwise `why` leaves the frame.
    fn unwind(&mut self, why: Why) -> RunResult<Option<Why>> {
        let why = if why == Why::Reraise { Why::Exception } else { why };
        loop {
            // Borrow only the call stack so the return value stays reachable.
            let frame = self.frames.last_mut().ok_or(Fault::NoActiveFrame)?;
            let Some(&block) = frame.block_stack.last() else {
                return Ok(Some(why));
            };

            if block.kind == BlockKind::Loop && why == Why::Continue {
                let target = self.return_value.as_i64().ok_or(Fault::BlockStackInvariantViolation(
                    "continue without a target",
                ))?;
                frame.lasti = target as usize;
                return Ok(None);
            }

            frame.block_stack.pop();
            if block.kind == BlockKind::ExceptHandler {
                self.unwind_except_handler(block.level)?;
                continue;
            }
            frame.stack.truncate(block.level);

            match (block.kind, why) {
                (BlockKind::Loop, Why::Break) => {
                    frame.lasti = block.handler;
                    return Ok(None);
                }
                (BlockKind::SetupExcept | BlockKind::Finally, Why::Exception) => {
                    let info = self.exception.take().ok_or(
                        Fault::BlockStackInvariantViolation("exception without pending state"),
                    )?;
                    self.enter_handler(block.handler, info)?;
                    return Ok(None);
                }
                (BlockKind::Finally, Why::Return | Why::Continue) => {
                    frame.push(self.return_value.clone())?;
                    frame.push(Value::Signal(why))?;
                    frame.lasti = block.handler;
                    return Ok(None);
                }
                (BlockKind::Finally, Why::Break) => {
                    frame.push(Value::Signal(why))?;
                    frame.lasti = block.handler;
                    return Ok(None);
                }
                _ => {}
            }
        }
    }

    /// Jump into an `except`/`finally` handler with `info` on the stack.
    fn enter_handler(&mut self, handler: usize, info: ExcInfo) -> RunResult<()> {
        let traceback = Value::Traceback(Rc::from(info.traceback.clone()));
        let kind = exc_type_of(&info.value);
        let frame = self.frame()?;
        frame.push_block(BlockKind::ExceptHandler, handler);
        for _ in 0..2 {
            frame.push(traceback.clone())?;
            frame.push(info.value.clone())?;
            frame.push(kind.clone())?;
        }
        frame.lasti = handler;
        self.handled.push(info);
        Ok(())
    }

    /// Drop the state an except-handler block saved at `level`.
    fn unwind_except_handler(&mut self, level: usize) -> RunResult<()> {
        let frame = self.frame()?;
        frame.stack.truncate(level + 3);
        frame.popn(3)?;
        self.handled.pop();
        Ok(())
    }
}

/// The class value reported alongside an exception instance.
fn exc_type_of(value: &Value) -> Value {
    match value {
        Value::Exception(exc) => exc.type_value(),
        Value::Instance(inst) => Value::Class(inst.class.clone()),
        _ => Value::ExcType(ExcType::BaseException),
    }
}

fn describe_arg(frame: &Frame, instr: &Instruction, arg: u32) -> Option<String> {
    use bytecode::ArgKind;
    let code = &frame.code;
    let idx = arg as usize;
    match instr.opcode.arg_kind() {
        ArgKind::Const => code.consts.get(idx).map(repr),
        ArgKind::Name => code.names.get(idx).map(|s| s.to_string()),
        ArgKind::Local => code.varnames.get(idx).map(|s| s.to_string()),
        ArgKind::Free => code.free_name(idx).map(|s| s.to_string()),
        _ => None,
    }
}

/// Address of a local in the caller's native frame. The stack grows down on
/// every supported target, so deeper calls return smaller addresses.
#[inline(never)]
fn stack_address() -> usize {
    let marker = 0u8;
    std::hint::black_box(&marker) as *const u8 as usize
}

#[cold]
fn unreachable_frame() -> ! {
    panic!("frame stack emptied while a frame was executing")
}

#[cfg(test)]
mod tests;
