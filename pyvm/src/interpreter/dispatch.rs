//! Opcode handlers.
//!
//! Unary, binary, in-place and comparison opcodes go through the operator
//! protocol in `protocol.rs`; every other opcode has a handler here. A
//! handler returns `Some(why)` when sequential execution must stop.

use std::rc::Rc;

use bytecode::{CompareOp, Instruction, OpClass, Opcode};
use strum::IntoEnumIterator;

use crate::args::CallArgs;
use crate::code::Code;
use crate::exceptions::{ExcInfo, ExcType, Fault, RunError, RunResult};
use crate::frame::{BlockKind, Cell, Frame};
use crate::function::Function;
use crate::iter::is_stop_iteration;
use crate::operators::hash_key;
use crate::value::{Dict, HashKey, Namespace, Set, Slice, Value};

use super::{GenStep, Interpreter, Why};

pub type Handler = fn(&mut Interpreter, &Instruction) -> RunResult<Option<Why>>;

/// Per-opcode handler and operator class, indexed by opcode byte.
pub struct DispatchTable {
    handlers: [Option<Handler>; 256],
    classes: [OpClass; 256],
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchTable {
    pub fn new() -> Self {
        let mut handlers: [Option<Handler>; 256] = [None; 256];
        let mut classes = [OpClass::Other; 256];
        for op in Opcode::iter() {
            classes[op as usize] = op.class();
            if classes[op as usize] == OpClass::Other {
                handlers[op as usize] = handler_for(op);
            }
        }
        Self { handlers, classes }
    }

    #[inline(always)]
    pub fn class(&self, op: Opcode) -> OpClass {
        self.classes[op as usize]
    }

    #[inline(always)]
    pub fn handler(&self, op: Opcode) -> Option<Handler> {
        self.handlers[op as usize]
    }
}

fn handler_for(op: Opcode) -> Option<Handler> {
    use Opcode::*;
    let handler: Handler = match op {
        PopTop => pop_top,
        RotTwo => rot_two,
        RotThree => rot_three,
        DupTop => dup_top,
        DupTopTwo => dup_top_two,
        Nop => nop,

        LoadConst => load_const,
        LoadName => load_name,
        StoreName => store_name,
        DeleteName => delete_name,
        LoadGlobal => load_global,
        StoreGlobal => store_global,
        DeleteGlobal => delete_global,
        LoadFast => load_fast,
        StoreFast => store_fast,
        DeleteFast => delete_fast,
        LoadClosure => load_closure,
        LoadDeref => load_deref,
        StoreDeref => store_deref,
        DeleteDeref => delete_deref,
        LoadClassderef => load_classderef,

        LoadAttr => load_attr,
        StoreAttr => store_attr,
        DeleteAttr => delete_attr,
        StoreSubscr => store_subscr,
        DeleteSubscr => delete_subscr,

        BuildTuple => build_tuple,
        BuildList => build_list,
        BuildSet => build_set,
        BuildMap => build_map,
        StoreMap => store_map,
        BuildSlice => build_slice,
        ListAppend => list_append,
        SetAdd => set_add,
        MapAdd => map_add,
        UnpackSequence => unpack_sequence,
        UnpackEx => unpack_ex,

        GetIter => get_iter,
        ForIter => for_iter,
        JumpForward | JumpAbsolute => jump,
        PopJumpIfFalse => pop_jump_if_false,
        PopJumpIfTrue => pop_jump_if_true,
        JumpIfFalseOrPop => jump_if_false_or_pop,
        JumpIfTrueOrPop => jump_if_true_or_pop,

        SetupLoop => setup_loop,
        SetupExcept => setup_except,
        SetupFinally => setup_finally,
        PopBlock => pop_block,
        BreakLoop => break_loop,
        ContinueLoop => continue_loop,
        PopExcept => pop_except,
        EndFinally => end_finally,
        RaiseVarargs => raise_varargs,
        SetupWith => setup_with,
        WithCleanup => with_cleanup,

        ReturnValue => return_value,
        YieldValue => yield_value,
        YieldFrom => yield_from,

        CallFunction => call_function,
        CallFunctionVar => call_function_var,
        CallFunctionKw => call_function_kw,
        CallFunctionVarKw => call_function_var_kw,
        MakeFunction => make_function,
        MakeClosure => make_closure,
        LoadBuildClass => load_build_class,

        ImportName => import_name,
        ImportFrom => import_from,
        ImportStar => import_star,
        PrintExpr => print_expr,

        // Folded into the following instruction by the decoder.
        ExtendedArg => return None,
        _ => return None,
    };
    Some(handler)
}

// ── helpers ────────────────────────────────────────────────────────

#[inline]
fn arg(instr: &Instruction) -> usize {
    instr.arg.unwrap_or_default() as usize
}

fn bad_arg(instr: &Instruction) -> Fault {
    Fault::BadArgument {
        opcode: instr.opcode.name(),
        arg: instr.arg.unwrap_or_default(),
    }
}

fn target(instr: &Instruction) -> Result<usize, Fault> {
    instr.jump_target().ok_or_else(|| bad_arg(instr))
}

fn expect_code(value: Value) -> RunResult<Rc<Code>> {
    match value {
        Value::Code(code) => Ok(code),
        other => Err(ExcType::SystemError.err(format!(
            "expected a code object, got '{}'",
            other.type_name()
        ))),
    }
}

fn expect_name(value: &Value, what: &str) -> RunResult<Rc<str>> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        other => Err(ExcType::TypeError.err(format!(
            "{what} must be a string, not '{}'",
            other.type_name()
        ))),
    }
}

/// Printable name of a callee, for argument errors.
fn callee_name(callee: &Value) -> String {
    match callee {
        Value::Function(func) => func.name.to_string(),
        Value::BoundMethod(method) => method.function.name.to_string(),
        Value::Builtin(idx) => idx.name().to_string(),
        Value::Class(class) => class.name.to_string(),
        other => other.type_name().into_owned(),
    }
}

fn unbound_local(name: &str) -> RunError {
    ExcType::UnboundLocalError.err(format!(
        "local variable '{name}' referenced before assignment"
    ))
}

fn unbound_free(name: &str) -> RunError {
    ExcType::NameError.err(format!(
        "free variable '{name}' referenced before assignment in enclosing scope"
    ))
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

impl Interpreter {
    fn pop_array<const N: usize>(&mut self) -> Result<[Value; N], Fault> {
        let values = self.frame()?.popn(N)?;
        values.try_into().map_err(|_| Fault::StackUnderflow)
    }

    fn popn(&mut self, n: usize) -> Result<Vec<Value>, Fault> {
        self.frame()?.popn(n)
    }

    fn peek(&mut self, n: usize) -> Result<Value, Fault> {
        Ok(self.frame()?.peek(n)?.clone())
    }

    fn constant(&self, instr: &Instruction) -> Result<Value, Fault> {
        let frame = self.frame_ref()?;
        frame.code.consts.get(arg(instr)).cloned().ok_or_else(|| bad_arg(instr))
    }

    fn name(&self, instr: &Instruction) -> Result<Rc<str>, Fault> {
        let frame = self.frame_ref()?;
        frame.code.names.get(arg(instr)).cloned().ok_or_else(|| bad_arg(instr))
    }

    fn varname(&self, instr: &Instruction) -> Result<Rc<str>, Fault> {
        let frame = self.frame_ref()?;
        frame.code.varnames.get(arg(instr)).cloned().ok_or_else(|| bad_arg(instr))
    }

    fn cell(&self, instr: &Instruction) -> Result<(Rc<str>, Rc<Cell>), Fault> {
        let frame = self.frame_ref()?;
        let idx = arg(instr);
        let name = frame.code.free_name(idx).cloned().ok_or_else(|| bad_arg(instr))?;
        Ok((name, frame.cell(idx)?.clone()))
    }

    /// Error for reading an empty cell: cell variables are locals of this
    /// frame, free variables belong to an enclosing scope.
    fn empty_cell(&self, instr: &Instruction, name: &str) -> RunError {
        let is_local = self
            .frame_ref()
            .is_ok_and(|frame| arg(instr) < frame.code.cellvars.len());
        if is_local { unbound_local(name) } else { unbound_free(name) }
    }

    fn pop_truthy(&mut self) -> RunResult<bool> {
        let value = self.pop()?;
        self.truthy(&value)
    }

    fn normalize_exception(&mut self, value: Value) -> RunResult<Value> {
        match value {
            Value::Exception(_) => Ok(value),
            Value::ExcType(kind) => Ok(kind.instance(Vec::new())),
            Value::Class(ref class) if class.exc_base().is_some() => {
                self.call_value(value.clone(), CallArgs::default())
            }
            _ => Err(ExcType::TypeError.err("exceptions must derive from BaseException")),
        }
    }
}

fn lookup_name(frame: &Frame, name: &str) -> Option<Value> {
    let local = frame.locals.borrow().get_str(name).cloned();
    local
        .or_else(|| frame.globals.borrow().get_str(name).cloned())
        .or_else(|| frame.builtins.borrow().get_str(name).cloned())
}

// ── stack manipulation ─────────────────────────────────────────────

fn pop_top(interp: &mut Interpreter, _: &Instruction) -> RunResult<Option<Why>> {
    interp.pop()?;
    Ok(None)
}

fn rot_two(interp: &mut Interpreter, _: &Instruction) -> RunResult<Option<Why>> {
    let [second, top] = interp.pop_array::<2>()?;
    interp.push(top)?;
    interp.push(second)?;
    Ok(None)
}

fn rot_three(interp: &mut Interpreter, _: &Instruction) -> RunResult<Option<Why>> {
    let [third, second, top] = interp.pop_array::<3>()?;
    interp.push(top)?;
    interp.push(third)?;
    interp.push(second)?;
    Ok(None)
}

fn dup_top(interp: &mut Interpreter, _: &Instruction) -> RunResult<Option<Why>> {
    let top = interp.top()?;
    interp.push(top)?;
    Ok(None)
}

fn dup_top_two(interp: &mut Interpreter, _: &Instruction) -> RunResult<Option<Why>> {
    let second = interp.peek(1)?;
    let top = interp.peek(0)?;
    interp.push(second)?;
    interp.push(top)?;
    Ok(None)
}

fn nop(_: &mut Interpreter, _: &Instruction) -> RunResult<Option<Why>> {
    Ok(None)
}

// ── names ──────────────────────────────────────────────────────────

fn load_const(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let value = interp.constant(instr)?;
    interp.push(value)?;
    Ok(None)
}

fn load_name(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let name = interp.name(instr)?;
    let value = lookup_name(interp.frame_ref()?, &name).ok_or_else(|| {
        ExcType::NameError.err(format!("name '{name}' is not defined"))
    })?;
    interp.push(value)?;
    Ok(None)
}

fn store_name(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let name = interp.name(instr)?;
    let value = interp.pop()?;
    interp.frame()?.locals.borrow_mut().insert_str(name, value);
    Ok(None)
}

fn delete_name(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let name = interp.name(instr)?;
    let removed = interp.frame()?.locals.borrow_mut().remove_str(&name);
    match removed {
        Some(_) => Ok(None),
        None => Err(ExcType::NameError.err(format!("name '{name}' is not defined"))),
    }
}

fn load_global(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let name = interp.name(instr)?;
    let frame = interp.frame_ref()?;
    let global = frame.globals.borrow().get_str(&name).cloned();
    let value = global
        .or_else(|| frame.builtins.borrow().get_str(&name).cloned())
        .ok_or_else(|| {
            ExcType::NameError.err(format!("global name '{name}' is not defined"))
        })?;
    interp.push(value)?;
    Ok(None)
}

fn store_global(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let name = interp.name(instr)?;
    let value = interp.pop()?;
    interp.frame()?.globals.borrow_mut().insert_str(name, value);
    Ok(None)
}

fn delete_global(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let name = interp.name(instr)?;
    let removed = interp.frame()?.globals.borrow_mut().remove_str(&name);
    match removed {
        Some(_) => Ok(None),
        None => Err(ExcType::NameError.err(format!(
            "global name '{name}' is not defined"
        ))),
    }
}

fn load_fast(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let name = interp.varname(instr)?;
    let value = interp.frame()?.locals.borrow().get_str(&name).cloned();
    interp.push(value.ok_or_else(|| unbound_local(&name))?)?;
    Ok(None)
}

fn store_fast(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let name = interp.varname(instr)?;
    let value = interp.pop()?;
    interp.frame()?.locals.borrow_mut().insert_str(name, value);
    Ok(None)
}

fn delete_fast(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let name = interp.varname(instr)?;
    let removed = interp.frame()?.locals.borrow_mut().remove_str(&name);
    match removed {
        Some(_) => Ok(None),
        None => Err(unbound_local(&name)),
    }
}

fn load_closure(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let (_, cell) = interp.cell(instr)?;
    interp.push(Value::Cell(cell))?;
    Ok(None)
}

fn load_deref(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let (name, cell) = interp.cell(instr)?;
    let value = cell.get().ok_or_else(|| interp.empty_cell(instr, &name))?;
    interp.push(value)?;
    Ok(None)
}

fn store_deref(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let (_, cell) = interp.cell(instr)?;
    cell.set(interp.pop()?);
    Ok(None)
}

fn delete_deref(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let (name, cell) = interp.cell(instr)?;
    match cell.clear() {
        Some(_) => Ok(None),
        None => Err(interp.empty_cell(instr, &name)),
    }
}

/// Class bodies see their own namespace before the enclosing cell.
fn load_classderef(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let (name, cell) = interp.cell(instr)?;
    let local = interp.frame()?.locals.borrow().get_str(&name).cloned();
    let value = match local.or_else(|| cell.get()) {
        Some(value) => value,
        None => return Err(interp.empty_cell(instr, &name)),
    };
    interp.push(value)?;
    Ok(None)
}

// ── attributes and subscripts ──────────────────────────────────────

fn load_attr(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let name = interp.name(instr)?;
    let obj = interp.pop()?;
    let value = interp.get_attr(&obj, &name)?;
    interp.push(value)?;
    Ok(None)
}

fn store_attr(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let name = interp.name(instr)?;
    let obj = interp.pop()?;
    let value = interp.pop()?;
    interp.set_attr(&obj, &name, value)?;
    Ok(None)
}

fn delete_attr(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let name = interp.name(instr)?;
    let obj = interp.pop()?;
    interp.del_attr(&obj, &name)?;
    Ok(None)
}

fn store_subscr(interp: &mut Interpreter, _: &Instruction) -> RunResult<Option<Why>> {
    let [value, container, key] = interp.pop_array::<3>()?;
    interp.store_item(&container, &key, value)?;
    Ok(None)
}

fn delete_subscr(interp: &mut Interpreter, _: &Instruction) -> RunResult<Option<Why>> {
    let [container, key] = interp.pop_array::<2>()?;
    interp.delete_item(&container, &key)?;
    Ok(None)
}

// ── building and unpacking ─────────────────────────────────────────

fn build_tuple(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let items = interp.popn(arg(instr))?;
    interp.push(Value::tuple(items))?;
    Ok(None)
}

fn build_list(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let items = interp.popn(arg(instr))?;
    interp.push(Value::list(items))?;
    Ok(None)
}

fn build_set(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let items = interp.popn(arg(instr))?;
    let mut set = Set::default();
    for item in items {
        set.insert(hash_key(item)?);
    }
    interp.push(Value::set(set))?;
    Ok(None)
}

fn build_map(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let dict = Dict::with_capacity_and_hasher(arg(instr), Default::default());
    interp.push(Value::dict(dict))?;
    Ok(None)
}

/// `[dict, value, key]` -> `[dict]`
fn store_map(interp: &mut Interpreter, _: &Instruction) -> RunResult<Option<Why>> {
    let [value, key] = interp.pop_array::<2>()?;
    let Value::Dict(dict) = interp.top()? else {
        return Err(ExcType::SystemError.err("STORE_MAP target is not a dict"));
    };
    dict.borrow_mut().insert(hash_key(key)?, value);
    Ok(None)
}

fn build_slice(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let slice = match arg(instr) {
        2 => {
            let [start, stop] = interp.pop_array::<2>()?;
            Slice { start, stop, step: Value::None }
        }
        3 => {
            let [start, stop, step] = interp.pop_array::<3>()?;
            Slice { start, stop, step }
        }
        _ => return Err(bad_arg(instr).into()),
    };
    interp.push(Value::Slice(Rc::new(slice)))?;
    Ok(None)
}

fn list_append(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let item = interp.pop()?;
    let Value::List(list) = interp.peek(arg(instr).saturating_sub(1))? else {
        return Err(ExcType::SystemError.err("LIST_APPEND target is not a list"));
    };
    list.borrow_mut().push(item);
    Ok(None)
}

fn set_add(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let item = interp.pop()?;
    let Value::Set(set) = interp.peek(arg(instr).saturating_sub(1))? else {
        return Err(ExcType::SystemError.err("SET_ADD target is not a set"));
    };
    set.borrow_mut().insert(hash_key(item)?);
    Ok(None)
}

fn map_add(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let key = interp.pop()?;
    let value = interp.pop()?;
    let Value::Dict(dict) = interp.peek(arg(instr).saturating_sub(1))? else {
        return Err(ExcType::SystemError.err("MAP_ADD target is not a dict"));
    };
    dict.borrow_mut().insert(hash_key(key)?, value);
    Ok(None)
}

fn unpack_sequence(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let expected = arg(instr);
    let seq = interp.pop()?;
    let items = interp.collect_iterable(&seq)?;
    if items.len() < expected {
        return Err(ExcType::ValueError.err(format!(
            "need more than {} value{} to unpack",
            items.len(),
            plural(items.len())
        )));
    }
    if items.len() > expected {
        return Err(ExcType::ValueError.err(format!(
            "too many values to unpack (expected {expected})"
        )));
    }
    for item in items.into_iter().rev() {
        interp.push(item)?;
    }
    Ok(None)
}

/// `a, *rest, b = seq`: the low byte counts targets before the starred
/// one, the high byte targets after it.
fn unpack_ex(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let before = arg(instr) & 0xFF;
    let after = arg(instr) >> 8;
    let seq = interp.pop()?;
    let mut items = interp.collect_iterable(&seq)?;
    if items.len() < before + after {
        return Err(ExcType::ValueError.err(format!(
            "need more than {} value{} to unpack",
            items.len(),
            plural(items.len())
        )));
    }
    let tail = items.split_off(items.len() - after);
    let middle = items.split_off(before);
    for item in tail.into_iter().rev() {
        interp.push(item)?;
    }
    interp.push(Value::list(middle))?;
    for item in items.into_iter().rev() {
        interp.push(item)?;
    }
    Ok(None)
}

// ── iteration and jumps ────────────────────────────────────────────

fn get_iter(interp: &mut Interpreter, _: &Instruction) -> RunResult<Option<Why>> {
    let iterable = interp.pop()?;
    let iter = interp.get_iter(&iterable)?;
    interp.push(iter)?;
    Ok(None)
}

fn for_iter(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let iter = interp.top()?;
    match interp.iter_next(&iter)? {
        Some(item) => interp.push(item)?,
        None => {
            interp.pop()?;
            interp.jump(target(instr)?)?;
        }
    }
    Ok(None)
}

fn jump(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    interp.jump(target(instr)?)?;
    Ok(None)
}

fn pop_jump_if_false(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    if !interp.pop_truthy()? {
        interp.jump(target(instr)?)?;
    }
    Ok(None)
}

fn pop_jump_if_true(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    if interp.pop_truthy()? {
        interp.jump(target(instr)?)?;
    }
    Ok(None)
}

fn jump_if_false_or_pop(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let value = interp.top()?;
    if interp.truthy(&value)? {
        interp.pop()?;
    } else {
        interp.jump(target(instr)?)?;
    }
    Ok(None)
}

fn jump_if_true_or_pop(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let value = interp.top()?;
    if interp.truthy(&value)? {
        interp.jump(target(instr)?)?;
    } else {
        interp.pop()?;
    }
    Ok(None)
}

pub(super) fn compare(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let op = u8::try_from(arg(instr))
        .ok()
        .and_then(CompareOp::from_repr)
        .ok_or_else(|| bad_arg(instr))?;
    let [lhs, rhs] = interp.pop_array::<2>()?;
    let result = interp.compare_op(op, &lhs, &rhs)?;
    interp.push(result)?;
    Ok(None)
}

// ── blocks and exceptions ──────────────────────────────────────────

fn setup_block(interp: &mut Interpreter, instr: &Instruction, kind: BlockKind) -> RunResult<Option<Why>> {
    let handler = target(instr)?;
    interp.frame()?.push_block(kind, handler);
    Ok(None)
}

fn setup_loop(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    setup_block(interp, instr, BlockKind::Loop)
}

fn setup_except(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    setup_block(interp, instr, BlockKind::SetupExcept)
}

fn setup_finally(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    setup_block(interp, instr, BlockKind::Finally)
}

fn pop_block(interp: &mut Interpreter, _: &Instruction) -> RunResult<Option<Why>> {
    let frame = interp.frame()?;
    let block = frame.pop_block()?;
    frame.stack.truncate(block.level);
    Ok(None)
}

fn break_loop(_: &mut Interpreter, _: &Instruction) -> RunResult<Option<Why>> {
    Ok(Some(Why::Break))
}

/// The loop head travels in the return-value slot while blocks unwind.
fn continue_loop(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    interp.return_value = Value::Int(target(instr)? as i64);
    Ok(Some(Why::Continue))
}

fn pop_except(interp: &mut Interpreter, _: &Instruction) -> RunResult<Option<Why>> {
    let block = interp.frame()?.pop_block()?;
    if block.kind != BlockKind::ExceptHandler {
        return Err(Fault::BlockStackInvariantViolation(
            "popped block is not an except handler",
        )
        .into());
    }
    interp.unwind_except_handler(block.level)?;
    Ok(None)
}

fn end_finally(interp: &mut Interpreter, _: &Instruction) -> RunResult<Option<Why>> {
    match interp.pop()? {
        Value::None => Ok(None),
        Value::Signal(why) => {
            if matches!(why, Why::Return | Why::Continue) {
                interp.return_value = interp.pop()?;
            }
            Ok(Some(why))
        }
        Value::ExcType(_) | Value::Class(_) => {
            let [traceback, value] = interp.pop_array::<2>()?;
            let traceback = match traceback {
                Value::Traceback(entries) => entries.to_vec(),
                _ => Vec::new(),
            };
            interp.exception = Some(ExcInfo { value, traceback });
            Ok(Some(Why::Reraise))
        }
        _ => Err(ExcType::SystemError.err("'finally' pops bad exception")),
    }
}

fn raise_varargs(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let (exc, cause) = match arg(instr) {
        0 => {
            let Some(info) = interp.handled.last().cloned() else {
                return Err(ExcType::RuntimeError.err("No active exception to reraise"));
            };
            interp.exception = Some(info);
            return Ok(Some(Why::Reraise));
        }
        1 => (interp.pop()?, None),
        2 => {
            let [exc, cause] = interp.pop_array::<2>()?;
            (exc, Some(cause))
        }
        _ => return Err(ExcType::SystemError.err("bad RAISE_VARARGS oparg")),
    };
    let exc = interp.normalize_exception(exc)?;
    if let (Some(cause), Value::Exception(raised)) = (cause, &exc) {
        let cause = match cause {
            Value::None => None,
            Value::Exception(_) | Value::ExcType(_) | Value::Class(_) => {
                Some(interp.normalize_exception(cause).map_err(|_| {
                    ExcType::TypeError.err("exception causes must derive from BaseException")
                })?)
            }
            _ => {
                return Err(ExcType::TypeError.err(
                    "exception causes must derive from BaseException",
                ));
            }
        };
        *raised.cause.borrow_mut() = cause;
    }
    Err(RunError::Exc(exc))
}

/// `[mgr]` -> `[exit, enter()]` with a finally block guarding the body.
fn setup_with(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let manager = interp.pop()?;
    let exit = interp.get_attr(&manager, "__exit__")?;
    interp.push(exit)?;
    let enter = interp.get_attr(&manager, "__enter__")?;
    let entered = interp.call_value(enter, CallArgs::default())?;
    setup_block(interp, instr, BlockKind::Finally)?;
    interp.push(entered)?;
    Ok(None)
}

fn with_cleanup(interp: &mut Interpreter, _: &Instruction) -> RunResult<Option<Why>> {
    let top = interp.top()?;
    let frame = interp.frame()?;
    let len = frame.stack.len();
    let none3 = || vec![Value::None, Value::None, Value::None];
    match top {
        Value::None => {
            let exit = frame.stack.remove(len.checked_sub(2).ok_or(Fault::StackUnderflow)?);
            interp.call_value(exit, CallArgs::new(none3()))?;
        }
        Value::Signal(why) => {
            let depth = if matches!(why, Why::Return | Why::Continue) { 3 } else { 2 };
            let exit = frame.stack.remove(len.checked_sub(depth).ok_or(Fault::StackUnderflow)?);
            interp.call_value(exit, CallArgs::new(none3()))?;
        }
        kind => {
            // [exit, tb2, v2, t2, tb, v, t]
            let exit = frame.stack.remove(len.checked_sub(7).ok_or(Fault::StackUnderflow)?);
            let handler = frame
                .block_stack
                .last_mut()
                .filter(|b| b.kind == BlockKind::ExceptHandler)
                .ok_or(Fault::BlockStackInvariantViolation(
                    "with cleanup outside an except handler",
                ))?;
            handler.level -= 1;
            let value = frame.peek(1)?.clone();
            let traceback = frame.peek(2)?.clone();
            let result = interp.call_value(exit, CallArgs::new(vec![kind, value, traceback]))?;
            if interp.truthy(&result)? {
                let block = interp.frame()?.pop_block()?;
                interp.unwind_except_handler(block.level)?;
                interp.push(Value::None)?;
            }
        }
    }
    Ok(None)
}

// ── returns and generators ─────────────────────────────────────────

fn return_value(interp: &mut Interpreter, _: &Instruction) -> RunResult<Option<Why>> {
    interp.return_value = interp.pop()?;
    Ok(Some(Why::Return))
}

fn yield_value(interp: &mut Interpreter, _: &Instruction) -> RunResult<Option<Why>> {
    interp.return_value = interp.pop()?;
    Ok(Some(Why::Yield))
}

/// Delegate to a sub-iterator. While it yields, the frame re-executes this
/// instruction on every resume.
fn yield_from(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let sent = interp.pop()?;
    let iter = interp.top()?;
    let step = match &iter {
        Value::Generator(generator) => interp.resume_generator(generator, sent)?,
        _ if sent.is_none() => match interp.iter_next(&iter)? {
            Some(item) => GenStep::Yielded(item),
            None => GenStep::Returned(Value::None),
        },
        _ => {
            let send = interp.get_attr(&iter, "send")?;
            match interp.call_value(send, CallArgs::new(vec![sent])) {
                Ok(item) => GenStep::Yielded(item),
                Err(RunError::Exc(exc)) if is_stop_iteration(&exc) => {
                    interp.clear_pending(&exc);
                    let value = match &exc {
                        Value::Exception(e) => e.args.borrow().first().cloned(),
                        _ => None,
                    };
                    GenStep::Returned(value.unwrap_or(Value::None))
                }
                Err(e) => return Err(e),
            }
        }
    };
    match step {
        GenStep::Yielded(item) => {
            interp.return_value = item;
            interp.jump(instr.offset)?;
            Ok(Some(Why::Yield))
        }
        GenStep::Returned(result) => {
            interp.pop()?;
            interp.push(result)?;
            Ok(None)
        }
    }
}

// ── calls and functions ────────────────────────────────────────────

/// Shared body of the `CALL_FUNCTION` family. The low byte of the argument
/// counts positional arguments, the high byte keyword pairs; `*args` and
/// `**kwargs` sit above them when present.
fn call_with(
    interp: &mut Interpreter,
    instr: &Instruction,
    var: bool,
    kw: bool,
) -> RunResult<Option<Why>> {
    let npos = arg(instr) & 0xFF;
    let nkw = (arg(instr) >> 8) & 0xFF;
    let kwargs = if kw { Some(interp.pop()?) } else { None };
    let varargs = if var { Some(interp.pop()?) } else { None };
    let pairs = interp.popn(2 * nkw)?;
    let mut positional = interp.popn(npos)?;
    let callee = interp.pop()?;

    let mut keywords: Vec<(Rc<str>, Value)> = Vec::with_capacity(nkw);
    for pair in pairs.chunks_exact(2) {
        keywords.push((expect_name(&pair[0], "keywords")?, pair[1].clone()));
    }
    if let Some(varargs) = varargs {
        let extra = interp.collect_iterable(&varargs).map_err(|_| {
            ExcType::TypeError.err(format!(
                "{}() argument after * must be a sequence, not {}",
                callee_name(&callee),
                varargs.type_name()
            ))
        })?;
        positional.extend(extra);
    }
    if let Some(kwargs) = kwargs {
        let Value::Dict(mapping) = &kwargs else {
            return Err(ExcType::TypeError.err(format!(
                "{}() argument after ** must be a mapping, not {}",
                callee_name(&callee),
                kwargs.type_name()
            )));
        };
        let entries: Vec<(HashKey, Value)> = mapping
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in entries {
            let key = expect_name(key.value(), "keywords")?;
            if keywords.iter().any(|(k, _)| *k == key) {
                return Err(ExcType::TypeError.err(format!(
                    "{}() got multiple values for keyword argument '{key}'",
                    callee_name(&callee)
                )));
            }
            keywords.push((key, value));
        }
    }

    let result = interp.call_value(callee, CallArgs::with_keywords(positional, keywords))?;
    interp.push(result)?;
    Ok(None)
}

fn call_function(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    call_with(interp, instr, false, false)
}

fn call_function_var(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    call_with(interp, instr, true, false)
}

fn call_function_kw(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    call_with(interp, instr, false, true)
}

fn call_function_var_kw(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    call_with(interp, instr, true, true)
}

fn new_function(interp: &mut Interpreter, instr: &Instruction, closure: bool) -> RunResult<Option<Why>> {
    let npos = arg(instr) & 0xFF;
    let nkw = (arg(instr) >> 8) & 0xFF;
    let nann = (arg(instr) >> 16) & 0x7FFF;

    let qualname = expect_name(&interp.pop()?, "function qualname")?;
    let code = expect_code(interp.pop()?)?;
    let closure = if closure {
        let Value::Tuple(cells) = interp.pop()? else {
            return Err(ExcType::SystemError.err("MAKE_CLOSURE expects a tuple of cells"));
        };
        let cells = cells
            .iter()
            .map(|cell| match cell {
                Value::Cell(cell) => Ok(cell.clone()),
                _ => Err(ExcType::SystemError.err("MAKE_CLOSURE expects a tuple of cells")),
            })
            .collect::<RunResult<Vec<_>>>()?;
        Some(Rc::from(cells))
    } else {
        None
    };

    let mut annotations = Dict::default();
    if nann > 0 {
        let names = interp.pop()?;
        let values = interp.popn(nann - 1)?;
        let Value::Tuple(names) = names else {
            return Err(ExcType::SystemError.err("annotation names must be a tuple"));
        };
        for (name, value) in names.iter().zip(values) {
            annotations.insert(hash_key(name.clone())?, value);
        }
    }

    let mut kwdefaults = Dict::default();
    for pair in interp.popn(2 * nkw)?.chunks_exact(2) {
        let key = expect_name(&pair[0], "keyword-only argument name")?;
        kwdefaults.insert_str(key, pair[1].clone());
    }
    let defaults = interp.popn(npos)?;

    let globals = interp.frame_ref()?.globals.clone();
    let function = Function {
        name: code.name.clone(),
        code,
        globals,
        defaults,
        kwdefaults,
        closure,
        qualname,
        annotations,
    };
    interp.push(Value::Function(Rc::new(function)))?;
    Ok(None)
}

fn make_function(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    new_function(interp, instr, false)
}

fn make_closure(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    new_function(interp, instr, true)
}

fn load_build_class(interp: &mut Interpreter, _: &Instruction) -> RunResult<Option<Why>> {
    let builder = interp.frame_ref()?.builtins.borrow().get_str("__build_class__").cloned();
    let builder = builder.ok_or_else(|| ExcType::NameError.err("__build_class__ not found"))?;
    interp.push(builder)?;
    Ok(None)
}

// ── modules and output ─────────────────────────────────────────────

fn import_name(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let name = interp.name(instr)?;
    // fromlist and level
    interp.pop_array::<2>()?;
    let module = interp.import_module(&name)?;
    interp.push(Value::Module(module))?;
    Ok(None)
}

fn import_from(interp: &mut Interpreter, instr: &Instruction) -> RunResult<Option<Why>> {
    let name = interp.name(instr)?;
    let module = interp.top()?;
    let value = match interp.get_attr(&module, &name) {
        Ok(value) => value,
        Err(RunError::Exc(exc)) => {
            interp.clear_pending(&exc);
            return Err(ExcType::ImportError.err(format!("cannot import name {name}")));
        }
        Err(e) => return Err(e),
    };
    interp.push(value)?;
    Ok(None)
}

fn import_star(interp: &mut Interpreter, _: &Instruction) -> RunResult<Option<Why>> {
    let Value::Module(module) = interp.pop()? else {
        return Err(ExcType::SystemError.err("IMPORT_STAR expects a module"));
    };
    let exported = module.dict.borrow().get_str("__all__").cloned();
    let names: Vec<Rc<str>> = match exported {
        Some(all) => interp
            .collect_iterable(&all)?
            .iter()
            .map(|name| expect_name(name, "__all__ entry"))
            .collect::<RunResult<_>>()?,
        None => module
            .dict
            .borrow()
            .keys()
            .filter_map(|key| key.value().as_str().map(Rc::from))
            .filter(|name: &Rc<str>| !name.starts_with('_'))
            .collect(),
    };
    for name in names {
        let value = module.dict.borrow().get_str(&name).cloned().ok_or_else(|| {
            ExcType::AttributeError.err(format!(
                "'module' object has no attribute '{name}'"
            ))
        })?;
        interp.frame()?.locals.borrow_mut().insert_str(name, value);
    }
    Ok(None)
}

fn print_expr(interp: &mut Interpreter, _: &Instruction) -> RunResult<Option<Why>> {
    let value = interp.pop()?;
    if !value.is_none() {
        let mut text = interp.repr_value(&value)?;
        text.push('\n');
        interp.emit(&text);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_opcode_is_dispatchable() {
        let table = DispatchTable::new();
        for op in Opcode::iter() {
            let routed = table.class(op) != OpClass::Other || table.handler(op).is_some();
            assert!(routed || op == Opcode::ExtendedArg, "{} has no handler", op.name());
        }
    }

    #[test]
    fn operator_opcodes_have_no_handler() {
        let table = DispatchTable::new();
        assert!(table.handler(Opcode::BinaryAdd).is_none());
        assert!(table.handler(Opcode::CompareOp).is_none());
        assert_eq!(table.class(Opcode::BinarySubscr), OpClass::Binary(bytecode::BinaryOp::Subscr));
    }
}
