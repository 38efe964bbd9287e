use std::rc::Rc;

use bytecode::{BytecodeBuilder, CompareOp, Opcode};

use super::{Interpreter, InterpreterCreateInfo, Why};
use crate::code::{Code, CodeBuilder, CodeFlags};
use crate::exceptions::{ExcType, Fault, UncaughtException, VmError};
use crate::frame::{BlockKind, build_frame};
use crate::io::CaptureSink;
use crate::marshal::MarshalWriter;
use crate::modules::MemorySource;
use crate::settings::{DEFAULT_MAX_CALL_DEPTH, VmSettings};
use crate::value::Value;

fn code(name: &str, b: BytecodeBuilder) -> CodeBuilder {
    CodeBuilder::new(name, b.into_bytes()).stacksize(16)
}

fn interpreter(source: MemorySource, settings: VmSettings) -> (Interpreter, CaptureSink) {
    let output = CaptureSink::new();
    let interp = Interpreter::new(InterpreterCreateInfo {
        settings,
        output: Box::new(output.clone()),
        source: Some(Box::new(source)),
    });
    (interp, output)
}

fn run_with(
    module: Rc<Code>,
    source: MemorySource,
    settings: VmSettings,
) -> (Result<(), VmError>, String) {
    let (mut interp, output) = interpreter(source, settings);
    let ns = interp.module_namespace("__main__");
    let result = interp.run_code(module, ns);
    (result, output.contents())
}

fn run(module: Rc<Code>) -> (Result<(), VmError>, String) {
    run_with(module, MemorySource::new(), VmSettings::default())
}

fn uncaught(result: Result<(), VmError>) -> UncaughtException {
    match result {
        Err(VmError::Uncaught(exc)) => exc,
        other => panic!("expected an uncaught exception, got {other:?}"),
    }
}

fn on_big_stack(f: impl FnOnce() + Send + 'static) {
    std::thread::Builder::new()
        .stack_size(64 * 1024 * 1024)
        .spawn(f)
        .unwrap()
        .join()
        .unwrap();
}

/// `def add(x): return x + n` closing over `n`, wrapped in `make(n)`.
fn make_adder() -> Rc<Code> {
    let mut b = BytecodeBuilder::new();
    b.load_fast(0).load_deref(0).op(Opcode::BinaryAdd).return_value();
    let add = code("add", b)
        .argcount(1)
        .varnames(&["x"])
        .freevars(&["n"])
        .flags(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS | CodeFlags::NESTED)
        .build();

    let mut b = BytecodeBuilder::new();
    b.load_closure(0).build_tuple(1).load_const(0).load_const(1);
    b.make_closure(0).store_fast(1).load_fast(1).return_value();
    code("make", b)
        .argcount(1)
        .varnames(&["n", "add"])
        .cellvars(&["n"])
        .consts(vec![Value::Code(add), Value::str("make.<locals>.add")])
        .build()
}

#[test]
fn arithmetic_and_print() {
    let mut b = BytecodeBuilder::new();
    b.load_const(0).load_const(1).op(Opcode::BinaryAdd).store_name(0);
    b.load_name(1).load_name(0).call_function(1, 0).pop_top();
    b.load_const(2).return_value();
    let module = code("<module>", b)
        .consts(vec![Value::Int(1), Value::Int(2), Value::None])
        .names(&["x", "print"])
        .build();

    let (result, out) = run(module);
    result.unwrap();
    assert_eq!(out, "3\n");
}

#[test]
fn break_unwinds_loop_block() {
    // total = 0
    // for i in range(10):
    //     if i == 3: break
    //     total = total + i
    // print(total)
    let mut b = BytecodeBuilder::new();
    b.load_const(0).store_name(0);
    let end = b.jump(Opcode::SetupLoop);
    b.load_name(1).load_const(1).call_function(1, 0).op(Opcode::GetIter);
    let head = b.current_offset();
    let exhausted = b.jump(Opcode::ForIter);
    b.store_name(2);
    b.load_name(2).load_const(2).compare_op(CompareOp::Eq);
    let skip = b.jump(Opcode::PopJumpIfFalse);
    b.op(Opcode::BreakLoop);
    b.bind(skip);
    b.load_name(0).load_name(2).op(Opcode::BinaryAdd).store_name(0);
    b.jump_to(Opcode::JumpAbsolute, head);
    b.bind(exhausted);
    b.pop_block();
    b.bind(end);
    b.load_name(3).load_name(0).call_function(1, 0).pop_top();
    b.load_const(3).return_value();
    let module = code("<module>", b)
        .consts(vec![Value::Int(0), Value::Int(10), Value::Int(3), Value::None])
        .names(&["total", "range", "i", "print"])
        .build();

    // A stale iterator left on the stack would fail the final stack check.
    let (result, out) = run(module);
    result.unwrap();
    assert_eq!(out, "3\n");
}

#[test]
fn break_keeps_values_below_the_loop() {
    // for i in range(3):
    //     for j in range(10):
    //         if j == 1: break
    //         print(i, j)
    let mut b = BytecodeBuilder::new();
    let outer_end = b.jump(Opcode::SetupLoop);
    b.load_name(0).load_const(0).call_function(1, 0).op(Opcode::GetIter);
    let outer_head = b.current_offset();
    let outer_done = b.jump(Opcode::ForIter);
    b.store_name(1);
    let inner_end = b.jump(Opcode::SetupLoop);
    b.load_name(0).load_const(1).call_function(1, 0).op(Opcode::GetIter);
    let inner_head = b.current_offset();
    let inner_done = b.jump(Opcode::ForIter);
    b.store_name(2);
    b.load_name(2).load_const(2).compare_op(CompareOp::Eq);
    let skip = b.jump(Opcode::PopJumpIfFalse);
    b.op(Opcode::BreakLoop);
    b.bind(skip);
    b.load_name(3).load_name(1).load_name(2).call_function(2, 0).pop_top();
    b.jump_to(Opcode::JumpAbsolute, inner_head);
    b.bind(inner_done);
    b.pop_block();
    b.bind(inner_end);
    b.jump_to(Opcode::JumpAbsolute, outer_head);
    b.bind(outer_done);
    b.pop_block();
    b.bind(outer_end);
    b.load_const(3).return_value();
    let module = code("<module>", b)
        .consts(vec![Value::Int(3), Value::Int(10), Value::Int(1), Value::None])
        .names(&["range", "i", "j", "print"])
        .build();

    // The outer iterator sits below the inner loop block and must survive.
    let (result, out) = run(module);
    result.unwrap();
    assert_eq!(out, "0 0\n1 0\n2 0\n");
}

/// An interpreter with one empty module frame whose operand stack holds
/// `below`.
fn interpreter_with_frame(below: &[Value]) -> Interpreter {
    let (mut interp, _) = interpreter(MemorySource::new(), VmSettings::default());
    let ns = interp.module_namespace("__main__");
    let module = code("<module>", BytecodeBuilder::new()).build();
    let mut frame = build_frame(module, None, ns, None, None).unwrap();
    for value in below {
        frame.push(value.clone()).unwrap();
    }
    interp.frames.push(frame);
    interp
}

#[test]
fn break_truncates_to_the_loop_level() {
    let mut interp = interpreter_with_frame(&[Value::Int(1), Value::Int(2)]);
    let frame = interp.frames.last_mut().unwrap();
    frame.push_block(BlockKind::Loop, 30);
    frame.push(Value::Int(3)).unwrap();
    frame.push(Value::Int(4)).unwrap();

    assert_eq!(interp.unwind(Why::Break).unwrap(), None);
    let frame = interp.frames.last().unwrap();
    assert_eq!(frame.lasti, 30);
    assert!(frame.block_stack.is_empty());
    assert_eq!(frame.stack.len(), 2);
    assert!(matches!(&frame.stack[..], [Value::Int(1), Value::Int(2)]));
}

#[test]
fn caught_exception_pushes_two_triples_under_a_handler_block() {
    let mut interp = interpreter_with_frame(&[Value::Int(1)]);
    let frame = interp.frames.last_mut().unwrap();
    frame.push_block(BlockKind::SetupExcept, 40);
    frame.push(Value::Int(2)).unwrap();
    frame.push(Value::Int(3)).unwrap();

    let exc = ExcType::ValueError.instance(vec![Value::str("bad")]);
    interp.record_exception(exc.clone());
    assert_eq!(interp.unwind(Why::Exception).unwrap(), None);

    let frame = interp.frames.last().unwrap();
    assert_eq!(frame.lasti, 40);
    assert_eq!(frame.block_stack.len(), 1);
    let block = frame.block_stack[0];
    assert_eq!(block.kind, BlockKind::ExceptHandler);
    assert_eq!(block.level, 1);

    // [1, tb, value, type, tb, value, type]
    assert_eq!(frame.stack.len(), 7);
    assert!(matches!(frame.stack[0], Value::Int(1)));
    for triple in frame.stack[1..].chunks(3) {
        assert!(matches!(&triple[0], Value::Traceback(tb) if tb.len() == 1));
        assert!(triple[1].is(&exc));
        assert!(matches!(triple[2], Value::ExcType(ExcType::ValueError)));
    }
    assert_eq!(interp.handled.len(), 1);
    assert!(interp.exception.is_none());
}

#[test]
fn continue_leaves_a_try_block_for_the_loop_head() {
    // total = 0
    // for i in range(5):
    //     try:
    //         if i == 2: continue
    //         total = total + i
    //     except:
    //         raise
    // print(total)
    let mut b = BytecodeBuilder::new();
    b.load_const(0).store_name(0);
    let end = b.jump(Opcode::SetupLoop);
    b.load_name(1).load_const(1).call_function(1, 0).op(Opcode::GetIter);
    let head = b.current_offset();
    let exhausted = b.jump(Opcode::ForIter);
    b.store_name(2);
    let handler = b.jump(Opcode::SetupExcept);
    b.load_name(2).load_const(2).compare_op(CompareOp::Eq);
    let skip = b.jump(Opcode::PopJumpIfFalse);
    b.jump_to(Opcode::ContinueLoop, head);
    b.bind(skip);
    b.load_name(0).load_name(2).op(Opcode::BinaryAdd).store_name(0);
    b.pop_block();
    b.jump_to(Opcode::JumpAbsolute, head);
    b.bind(handler);
    b.op(Opcode::EndFinally);
    b.jump_to(Opcode::JumpAbsolute, head);
    b.bind(exhausted);
    b.pop_block();
    b.bind(end);
    b.load_name(3).load_name(0).call_function(1, 0).pop_top();
    b.load_const(3).return_value();
    let module = code("<module>", b)
        .consts(vec![Value::Int(0), Value::Int(5), Value::Int(2), Value::None])
        .names(&["total", "range", "i", "print"])
        .build();

    let (result, out) = run(module);
    result.unwrap();
    assert_eq!(out, "8\n");
}

#[test]
fn continue_runs_finally_before_the_next_iteration() {
    // total = 0
    // for i in range(5):
    //     try:
    //         if i % 2: continue
    //         total = total + i
    //     finally:
    //         print(i)
    // print(total)
    let mut b = BytecodeBuilder::new();
    b.load_const(0).store_name(0);
    let end = b.jump(Opcode::SetupLoop);
    b.load_name(1).load_const(1).call_function(1, 0).op(Opcode::GetIter);
    let head = b.current_offset();
    let exhausted = b.jump(Opcode::ForIter);
    b.store_name(2);
    let finally = b.jump(Opcode::SetupFinally);
    b.load_name(2).load_const(2).op(Opcode::BinaryModulo);
    let skip = b.jump(Opcode::PopJumpIfFalse);
    b.jump_to(Opcode::ContinueLoop, head);
    b.bind(skip);
    b.load_name(0).load_name(2).op(Opcode::BinaryAdd).store_name(0);
    b.pop_block();
    b.load_const(3);
    b.bind(finally);
    b.load_name(3).load_name(2).call_function(1, 0).pop_top();
    b.op(Opcode::EndFinally);
    b.jump_to(Opcode::JumpAbsolute, head);
    b.bind(exhausted);
    b.pop_block();
    b.bind(end);
    b.load_name(3).load_name(0).call_function(1, 0).pop_top();
    b.load_const(3).return_value();
    let module = code("<module>", b)
        .consts(vec![Value::Int(0), Value::Int(5), Value::Int(2), Value::None])
        .names(&["total", "range", "i", "print"])
        .build();

    let (result, out) = run(module);
    result.unwrap();
    assert_eq!(out, "0\n1\n2\n3\n4\n6\n");
}

fn try_divide(except: &str) -> Rc<Code> {
    // try:
    //     1 / 0
    // except <except>:
    //     print("caught")
    let mut b = BytecodeBuilder::new();
    let handler = b.jump(Opcode::SetupExcept);
    b.load_const(0).load_const(1).op(Opcode::BinaryTrueDivide).pop_top();
    b.pop_block();
    let done = b.jump(Opcode::JumpForward);
    b.bind(handler);
    b.op(Opcode::DupTop).load_name(0).compare_op(CompareOp::ExceptionMatch);
    let reraise = b.jump(Opcode::PopJumpIfFalse);
    b.pop_top().pop_top().pop_top();
    b.load_name(1).load_const(2).call_function(1, 0).pop_top();
    b.op(Opcode::PopExcept);
    let handled = b.jump(Opcode::JumpForward);
    b.bind(reraise);
    b.op(Opcode::EndFinally);
    b.bind(done);
    b.bind(handled);
    b.load_const(3).return_value();
    code("<module>", b)
        .consts(vec![Value::Int(1), Value::Int(0), Value::str("caught"), Value::None])
        .names(&[except, "print"])
        .build()
}

#[test]
fn except_handler_catches_matching_exception() {
    let (mut interp, output) = interpreter(MemorySource::new(), VmSettings::default());
    let ns = interp.module_namespace("__main__");
    interp.run_code(try_divide("ZeroDivisionError"), ns).unwrap();
    assert_eq!(output.contents(), "caught\n");
    assert!(interp.handled.is_empty());
    assert!(interp.exception.is_none());
}

#[test]
fn except_handler_reraises_other_exceptions() {
    let (result, out) = run(try_divide("KeyError"));
    let exc = uncaught(result);
    assert_eq!(exc.kind, Some(ExcType::ZeroDivisionError));
    assert_eq!(exc.message, "division by zero");
    assert_eq!(exc.traceback.len(), 1);
    assert_eq!(out, "");
}

#[test]
fn uncaught_traceback_lists_outermost_first() {
    // def f(): 1 / 0
    // f()
    let mut b = BytecodeBuilder::new();
    b.load_const(0).load_const(1).op(Opcode::BinaryTrueDivide).return_value();
    let f = code("f", b)
        .consts(vec![Value::Int(1), Value::Int(0)])
        .filename("demo.py")
        .lines(2, Vec::new())
        .build();

    let mut b = BytecodeBuilder::new();
    b.load_const(0).load_const(1).make_function(0).store_name(0);
    b.load_name(0).call_function(0, 0).pop_top();
    b.load_const(2).return_value();
    let module = code("<module>", b)
        .consts(vec![Value::Code(f), Value::str("f"), Value::None])
        .names(&["f"])
        .filename("demo.py")
        .build();

    let exc = uncaught(run(module).0);
    let names: Vec<&str> = exc.traceback.iter().map(|e| &*e.name).collect();
    assert_eq!(names, ["<module>", "f"]);
    assert_eq!(exc.traceback[1].line, 2);
    let text = exc.to_string();
    assert!(text.starts_with("Traceback (most recent call last):\n"));
    assert!(text.ends_with("ZeroDivisionError: division by zero"));
}

#[test]
fn closures_capture_enclosing_cells() {
    // print(make(10)(5))
    let mut b = BytecodeBuilder::new();
    b.load_const(0).load_const(1).make_function(0).store_name(0);
    b.load_name(1).load_name(0).load_const(2).call_function(1, 0);
    b.load_const(3).call_function(1, 0).call_function(1, 0).pop_top();
    b.load_const(4).return_value();
    let module = code("<module>", b)
        .consts(vec![
            Value::Code(make_adder()),
            Value::str("make"),
            Value::Int(10),
            Value::Int(5),
            Value::None,
        ])
        .names(&["make", "print"])
        .build();

    let (result, out) = run(module);
    result.unwrap();
    assert_eq!(out, "15\n");
}

#[test]
fn sibling_closures_share_one_cell() {
    // def outer():
    //     x = 0
    //     def set(v):
    //         nonlocal x
    //         x = v
    //     def get(): return x
    //     set(7)
    //     return get()
    // print(outer())
    let nested = CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS | CodeFlags::NESTED;
    let mut b = BytecodeBuilder::new();
    b.load_fast(0).store_deref(0).load_const(0).return_value();
    let setter = code("set", b)
        .argcount(1)
        .varnames(&["v"])
        .freevars(&["x"])
        .consts(vec![Value::None])
        .flags(nested)
        .build();

    let mut b = BytecodeBuilder::new();
    b.load_deref(0).return_value();
    let getter = code("get", b).freevars(&["x"]).flags(nested).build();

    let mut b = BytecodeBuilder::new();
    b.load_const(0).store_deref(0);
    b.load_closure(0).build_tuple(1).load_const(1).load_const(2);
    b.make_closure(0).store_fast(0);
    b.load_closure(0).build_tuple(1).load_const(3).load_const(4);
    b.make_closure(0).store_fast(1);
    b.load_fast(0).load_const(5).call_function(1, 0).pop_top();
    b.load_fast(1).call_function(0, 0).return_value();
    let outer = code("outer", b)
        .varnames(&["set", "get"])
        .cellvars(&["x"])
        .consts(vec![
            Value::Int(0),
            Value::Code(setter),
            Value::str("outer.<locals>.set"),
            Value::Code(getter),
            Value::str("outer.<locals>.get"),
            Value::Int(7),
        ])
        .build();

    let mut b = BytecodeBuilder::new();
    b.load_const(0).load_const(1).make_function(0).store_name(0);
    b.load_name(1).load_name(0).call_function(0, 0).call_function(1, 0).pop_top();
    b.load_const(2).return_value();
    let module = code("<module>", b)
        .consts(vec![Value::Code(outer), Value::str("outer"), Value::None])
        .names(&["outer", "print"])
        .build();

    let (result, out) = run(module);
    result.unwrap();
    assert_eq!(out, "7\n");
}

fn subtract_with_default() -> Rc<Code> {
    // def f(a, b=2): return a - b
    let mut b = BytecodeBuilder::new();
    b.load_fast(0).load_fast(1).op(Opcode::BinarySubtract).return_value();
    code("f", b).argcount(2).varnames(&["a", "b"]).build()
}

#[test]
fn keyword_and_default_arguments() {
    // print(f(10), f(b=1, a=5))
    let mut b = BytecodeBuilder::new();
    b.load_const(0).load_const(1).load_const(2).make_function(1).store_name(0);
    b.load_name(1);
    b.load_name(0).load_const(3).call_function(1, 0);
    b.load_name(0).load_const(4).load_const(5).load_const(6).load_const(7);
    b.call_function(0, 2);
    b.call_function(2, 0).pop_top();
    b.load_const(8).return_value();
    let module = code("<module>", b)
        .consts(vec![
            Value::Int(2),
            Value::Code(subtract_with_default()),
            Value::str("f"),
            Value::Int(10),
            Value::str("b"),
            Value::Int(1),
            Value::str("a"),
            Value::Int(5),
            Value::None,
        ])
        .names(&["f", "print"])
        .build();

    let (result, out) = run(module);
    result.unwrap();
    assert_eq!(out, "8 4\n");
}

#[test]
fn missing_argument_is_a_type_error() {
    let mut b = BytecodeBuilder::new();
    b.load_const(0).load_const(1).make_function(0).store_name(0);
    b.load_name(0).call_function(0, 0).pop_top();
    b.load_const(2).return_value();
    let module = code("<module>", b)
        .consts(vec![
            Value::Code(subtract_with_default()),
            Value::str("f"),
            Value::None,
        ])
        .names(&["f"])
        .build();

    let exc = uncaught(run(module).0);
    assert_eq!(exc.kind, Some(ExcType::TypeError));
    assert_eq!(exc.message, "f() missing 1 required positional argument: 'a'");
}

#[test]
fn generators_suspend_and_resume() {
    // def gen():
    //     yield 1
    //     yield 2
    // for v in gen(): print(v)
    let mut b = BytecodeBuilder::new();
    b.load_const(0).op(Opcode::YieldValue).pop_top();
    b.load_const(1).op(Opcode::YieldValue).pop_top();
    b.load_const(2).return_value();
    let generator = code("gen", b)
        .flags(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS | CodeFlags::GENERATOR)
        .consts(vec![Value::Int(1), Value::Int(2), Value::None])
        .build();

    let mut b = BytecodeBuilder::new();
    b.load_const(0).load_const(1).make_function(0).store_name(0);
    let end = b.jump(Opcode::SetupLoop);
    b.load_name(0).call_function(0, 0).op(Opcode::GetIter);
    let head = b.current_offset();
    let exhausted = b.jump(Opcode::ForIter);
    b.store_name(1).load_name(2).load_name(1).call_function(1, 0).pop_top();
    b.jump_to(Opcode::JumpAbsolute, head);
    b.bind(exhausted);
    b.pop_block();
    b.bind(end);
    b.load_const(2).return_value();
    let module = code("<module>", b)
        .consts(vec![Value::Code(generator), Value::str("gen"), Value::None])
        .names(&["gen", "v", "print"])
        .build();

    let (result, out) = run(module);
    result.unwrap();
    assert_eq!(out, "1\n2\n");
}

#[test]
fn finally_runs_before_return() {
    // def f():
    //     try:
    //         return 1
    //     finally:
    //         print("cleanup")
    // print(f())
    let mut b = BytecodeBuilder::new();
    let cleanup = b.jump(Opcode::SetupFinally);
    b.load_const(1).return_value();
    b.pop_block().load_const(0);
    b.bind(cleanup);
    b.load_global(0).load_const(2).call_function(1, 0).pop_top();
    b.op(Opcode::EndFinally);
    b.load_const(0).return_value();
    let f = code("f", b)
        .consts(vec![Value::None, Value::Int(1), Value::str("cleanup")])
        .names(&["print"])
        .build();

    let mut b = BytecodeBuilder::new();
    b.load_const(0).load_const(1).make_function(0).store_name(0);
    b.load_name(1).load_name(0).call_function(0, 0).call_function(1, 0).pop_top();
    b.load_const(2).return_value();
    let module = code("<module>", b)
        .consts(vec![Value::Code(f), Value::str("f"), Value::None])
        .names(&["f", "print"])
        .build();

    let (result, out) = run(module);
    result.unwrap();
    assert_eq!(out, "cleanup\n1\n");
}

#[test]
fn classes_run_init_on_instantiation() {
    // class Point:
    //     def __init__(self, x):
    //         self.x = x
    // print(Point(4).x)
    let mut b = BytecodeBuilder::new();
    b.load_fast(1).load_fast(0).op_arg(Opcode::StoreAttr, 0);
    b.load_const(0).return_value();
    let init = code("__init__", b)
        .argcount(2)
        .varnames(&["self", "x"])
        .names(&["x"])
        .consts(vec![Value::None])
        .build();

    let mut b = BytecodeBuilder::new();
    b.load_name(0).store_name(1).load_const(0).store_name(2);
    b.load_const(1).load_const(2).make_function(0).store_name(3);
    b.load_const(3).return_value();
    let body = code("Point", b)
        .names(&["__name__", "__module__", "__qualname__", "__init__"])
        .consts(vec![
            Value::str("Point"),
            Value::Code(init),
            Value::str("Point.__init__"),
            Value::None,
        ])
        .build();

    let mut b = BytecodeBuilder::new();
    b.op(Opcode::LoadBuildClass).load_const(0).load_const(1).make_function(0);
    b.load_const(1).call_function(2, 0).store_name(0);
    b.load_name(1).load_name(0).load_const(2).call_function(1, 0);
    b.load_attr(2).call_function(1, 0).pop_top();
    b.load_const(3).return_value();
    let module = code("<module>", b)
        .consts(vec![Value::Code(body), Value::str("Point"), Value::Int(4), Value::None])
        .names(&["Point", "print", "x"])
        .build();

    let (result, out) = run(module);
    result.unwrap();
    assert_eq!(out, "4\n");
}

#[test]
fn unpacking_and_its_errors() {
    // a, b = (1, 2); print(b, a)
    let mut b = BytecodeBuilder::new();
    b.load_const(0).op_arg(Opcode::UnpackSequence, 2).store_name(0).store_name(1);
    b.load_name(2).load_name(1).load_name(0).call_function(2, 0).pop_top();
    b.load_const(1).return_value();
    let pair = Value::tuple(vec![Value::Int(1), Value::Int(2)]);
    let module = code("<module>", b)
        .consts(vec![pair, Value::None])
        .names(&["a", "b", "print"])
        .build();
    let (result, out) = run(module);
    result.unwrap();
    assert_eq!(out, "2 1\n");

    let mut b = BytecodeBuilder::new();
    b.load_const(0).op_arg(Opcode::UnpackSequence, 2).store_name(0).store_name(1);
    b.load_const(1).return_value();
    let triple = Value::tuple(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    let module = code("<module>", b)
        .consts(vec![triple, Value::None])
        .names(&["a", "b"])
        .build();
    let exc = uncaught(run(module).0);
    assert_eq!(exc.kind, Some(ExcType::ValueError));
    assert_eq!(exc.message, "too many values to unpack (expected 2)");
}

#[test]
fn import_from_memory_source() {
    let mut b = BytecodeBuilder::new();
    b.load_const(0).store_name(0).load_const(1).return_value();
    let helper = code("<module>", b)
        .consts(vec![Value::Int(42), Value::None])
        .names(&["value"])
        .build();
    let source = MemorySource::new().with("helper", MarshalWriter::write_module(&helper, 0).unwrap());

    // import helper; print(helper.value)
    let mut b = BytecodeBuilder::new();
    b.load_const(0).load_const(1).op_arg(Opcode::ImportName, 0).store_name(0);
    b.load_name(1).load_name(0).load_attr(2).call_function(1, 0).pop_top();
    b.load_const(1).return_value();
    let module = code("<module>", b)
        .consts(vec![Value::Int(0), Value::None])
        .names(&["helper", "print", "value"])
        .build();

    let (result, out) = run_with(module, source, VmSettings::default());
    result.unwrap();
    assert_eq!(out, "42\n");
}

#[test]
fn missing_module_raises_import_error() {
    let mut b = BytecodeBuilder::new();
    b.load_const(0).load_const(1).op_arg(Opcode::ImportName, 0).store_name(0);
    b.load_const(1).return_value();
    let module = code("<module>", b)
        .consts(vec![Value::Int(0), Value::None])
        .names(&["nowhere"])
        .build();

    let exc = uncaught(run(module).0);
    assert_eq!(exc.kind, Some(ExcType::ImportError));
    assert_eq!(exc.message, "No module named 'nowhere'");
}

#[test]
fn unbounded_recursion_hits_the_call_ceiling() {
    on_big_stack(|| {
        // def f(): return f()
        // f()
        let mut b = BytecodeBuilder::new();
        b.load_global(0).call_function(0, 0).return_value();
        let f = code("f", b).names(&["f"]).build();

        let mut b = BytecodeBuilder::new();
        b.load_const(0).load_const(1).make_function(0).store_name(0);
        b.load_name(0).call_function(0, 0).pop_top();
        b.load_const(2).return_value();
        let module = code("<module>", b)
            .consts(vec![Value::Code(f), Value::str("f"), Value::None])
            .names(&["f"])
            .build();

        let settings = VmSettings {
            max_call_depth: 40,
            native_stack_budget: 32 * 1024 * 1024,
            ..Default::default()
        };
        let (mut interp, _) = interpreter(MemorySource::new(), settings);
        let ns = interp.module_namespace("__main__");
        let result = interp.run_code(module, ns);
        assert!(
            matches!(result, Err(VmError::Fault(Fault::RecursionLimit(40)))),
            "{result:?}"
        );
        // The interpreter is usable again afterwards.
        assert!(interp.frames.is_empty());
        assert_eq!(interp.depth, 0);
    });
}

#[test]
fn default_settings_stop_recursion_on_a_standard_thread() {
    // Runs on the test harness thread, not a big one.
    let mut b = BytecodeBuilder::new();
    b.load_global(0).call_function(0, 0).return_value();
    let f = code("f", b).names(&["f"]).build();

    let mut b = BytecodeBuilder::new();
    b.load_const(0).load_const(1).make_function(0).store_name(0);
    b.load_name(0).call_function(0, 0).pop_top();
    b.load_const(2).return_value();
    let module = code("<module>", b)
        .consts(vec![Value::Code(f), Value::str("f"), Value::None])
        .names(&["f"])
        .build();

    let (mut interp, _) = interpreter(MemorySource::new(), VmSettings::default());
    let ns = interp.module_namespace("__main__");
    let result = interp.run_code(module, ns);
    match result {
        Err(VmError::Fault(Fault::RecursionLimit(depth))) => {
            assert!(depth > 1 && depth <= DEFAULT_MAX_CALL_DEPTH, "{depth}");
        }
        other => panic!("expected a recursion fault, got {other:?}"),
    }
    assert!(interp.frames.is_empty());
    assert_eq!(interp.depth, 0);
}

#[test]
fn stack_overflow_is_a_fault() {
    let mut b = BytecodeBuilder::new();
    b.load_const(0).load_const(0).load_const(0);
    let module = CodeBuilder::new("<module>", b.into_bytes())
        .stacksize(2)
        .consts(vec![Value::None])
        .build();
    let (result, _) = run(module);
    assert!(matches!(
        result,
        Err(VmError::Fault(Fault::StackOverflow { limit: 2, .. }))
    ));
}
