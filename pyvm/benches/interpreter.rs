//! Run with:
//!   cargo bench --bench interpreter

use std::rc::Rc;

use bytecode::{BytecodeBuilder, CompareOp, Opcode};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use pyvm::{
    CaptureSink, Code, CodeBuilder, Interpreter, InterpreterCreateInfo, MarshalWriter,
    MemorySource, Value, VmSettings, read_module,
};

fn create_interpreter() -> Interpreter {
    Interpreter::new(InterpreterCreateInfo {
        settings: VmSettings::default(),
        output: Box::new(CaptureSink::new()),
        source: Some(Box::new(MemorySource::new())),
    })
}

fn execute(interpreter: &mut Interpreter, module: &Rc<Code>) {
    let ns = interpreter.module_namespace("__main__");
    interpreter
        .run_code(module.clone(), ns)
        .expect("Benchmark failed");
}

/// total = 0
/// for i in range(1000): total = total + i
fn sum_loop() -> Rc<Code> {
    let mut b = BytecodeBuilder::new();
    b.load_const(0).store_name(0);
    let end = b.jump(Opcode::SetupLoop);
    b.load_name(1).load_const(1).call_function(1, 0).op(Opcode::GetIter);
    let head = b.current_offset();
    let exhausted = b.jump(Opcode::ForIter);
    b.store_name(2);
    b.load_name(0).load_name(2).op(Opcode::BinaryAdd).store_name(0);
    b.jump_to(Opcode::JumpAbsolute, head);
    b.bind(exhausted);
    b.pop_block();
    b.bind(end);
    b.load_const(2).return_value();
    CodeBuilder::new("<module>", b.into_bytes())
        .stacksize(8)
        .consts(vec![Value::Int(0), Value::Int(1000), Value::None])
        .names(&["total", "range", "i"])
        .build()
}

/// def countdown(n):
///     if n > 0: return countdown(n - 1)
///     return 0
/// countdown(100)
fn recursive_countdown() -> Rc<Code> {
    let mut b = BytecodeBuilder::new();
    b.load_fast(0).load_const(1).compare_op(CompareOp::Gt);
    let base = b.jump(Opcode::PopJumpIfFalse);
    b.load_global(0).load_fast(0).load_const(2).op(Opcode::BinarySubtract);
    b.call_function(1, 0).return_value();
    b.bind(base);
    b.load_const(1).return_value();
    let countdown = CodeBuilder::new("countdown", b.into_bytes())
        .stacksize(4)
        .argcount(1)
        .varnames(&["n"])
        .names(&["countdown"])
        .consts(vec![Value::None, Value::Int(0), Value::Int(1)])
        .build();

    let mut b = BytecodeBuilder::new();
    b.load_const(0).load_const(1).make_function(0).store_name(0);
    b.load_name(0).load_const(2).call_function(1, 0).pop_top();
    b.load_const(3).return_value();
    CodeBuilder::new("<module>", b.into_bytes())
        .stacksize(4)
        .consts(vec![
            Value::Code(countdown),
            Value::str("countdown"),
            Value::Int(100),
            Value::None,
        ])
        .names(&["countdown"])
        .build()
}

fn bench_sum_loop(c: &mut Criterion) {
    let mut interpreter = create_interpreter();
    let module = sum_loop();
    c.bench_function("sum_loop_1000", |b| {
        b.iter(|| execute(&mut interpreter, black_box(&module)));
    });
}

fn bench_recursive_countdown(c: &mut Criterion) {
    let mut interpreter = create_interpreter();
    let module = recursive_countdown();
    c.bench_function("recursive_countdown_100", |b| {
        b.iter(|| execute(&mut interpreter, black_box(&module)));
    });
}

fn bench_module_load(c: &mut Criterion) {
    let bytes = MarshalWriter::write_module(&recursive_countdown(), 0).expect("marshal failed");
    c.bench_function("read_module", |b| {
        b.iter(|| read_module(black_box(&bytes)).expect("load failed"));
    });
}

criterion_group!(
    benches,
    bench_sum_loop,
    bench_recursive_countdown,
    bench_module_load
);
criterion_main!(benches);
