use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;

use crate::code::Code;
use crate::exceptions::{Fault, RunError};
use crate::function::Generator;
use crate::value::{DictRef, Namespace, Value};

/// A shared variable slot used for closures. Empty when unbound.
#[derive(Default)]
pub struct Cell {
    contents: RefCell<Option<Value>>,
}

impl Cell {
    pub fn new(value: Option<Value>) -> Rc<Self> {
        Rc::new(Self {
            contents: RefCell::new(value),
        })
    }

    pub fn get(&self) -> Option<Value> {
        self.contents.borrow().clone()
    }

    pub fn set(&self, value: Value) {
        *self.contents.borrow_mut() = Some(value);
    }

    pub fn clear(&self) -> Option<Value> {
        self.contents.borrow_mut().take()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.borrow().is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Loop,
    SetupExcept,
    Finally,
    ExceptHandler,
}

/// An entry on a frame's block stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    /// Instruction offset to jump to on unwind.
    pub handler: usize,
    /// Operand stack depth at block entry.
    pub level: usize,
}

/// Execution state of one code object invocation.
pub struct Frame {
    pub code: Rc<Code>,
    pub globals: DictRef,
    pub locals: DictRef,
    pub builtins: DictRef,
    pub cells: AHashMap<Rc<str>, Rc<Cell>>,
    pub stack: Vec<Value>,
    pub block_stack: Vec<Block>,
    /// Offset of the next instruction to execute.
    pub lasti: usize,
    /// Index of the caller in the interpreter's call stack.
    pub caller_depth: Option<usize>,
    pub generator: Option<Weak<Generator>>,
}

impl Frame {
    #[inline]
    fn max_stack(&self) -> usize {
        self.code.stacksize as usize
    }

    /// Pushes a value onto the operand stack
    #[inline]
    pub fn push(&mut self, value: Value) -> Result<(), Fault> {
        if self.stack.len() >= self.max_stack() {
            return Err(Fault::StackOverflow {
                code: self.code.name.to_string(),
                limit: self.max_stack(),
            });
        }
        self.stack.push(value);
        Ok(())
    }

    /// Pops a value from the operand stack
    #[inline]
    pub fn pop(&mut self) -> Result<Value, Fault> {
        self.stack.pop().ok_or(Fault::StackUnderflow)
    }

    /// Pops `n` values, returned in push order.
    pub fn popn(&mut self, n: usize) -> Result<Vec<Value>, Fault> {
        let len = self.stack.len();
        if n > len {
            return Err(Fault::StackUnderflow);
        }
        Ok(self.stack.split_off(len - n))
    }

    /// The value `n` slots below the top (0 = top).
    pub fn peek(&self, n: usize) -> Result<&Value, Fault> {
        let len = self.stack.len();
        if n >= len {
            return Err(Fault::StackUnderflow);
        }
        Ok(&self.stack[len - 1 - n])
    }

    pub fn top(&self) -> Result<&Value, Fault> {
        self.peek(0)
    }

    pub fn push_block(&mut self, kind: BlockKind, handler: usize) {
        self.push_block_at(kind, handler, self.stack.len());
    }

    pub fn push_block_at(&mut self, kind: BlockKind, handler: usize, level: usize) {
        self.block_stack.push(Block {
            kind,
            handler,
            level,
        });
    }

    pub fn pop_block(&mut self) -> Result<Block, Fault> {
        self.block_stack
            .pop()
            .ok_or(Fault::BlockStackInvariantViolation("pop from empty block stack"))
    }

    /// Current source line, derived from the last executed instruction.
    pub fn line(&self) -> u32 {
        self.code.line_for_offset(self.lasti.saturating_sub(1))
    }

    /// The cell addressed by a free-kind instruction argument.
    pub fn cell(&self, idx: usize) -> Result<&Rc<Cell>, Fault> {
        let missing = || Fault::MissingCell(format!("#{idx}"));
        let name = self.code.free_name(idx).ok_or_else(missing)?;
        self.cells
            .get(name)
            .ok_or_else(|| Fault::MissingCell(name.to_string()))
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("code", &self.code.name)
            .field("lasti", &self.lasti)
            .field("stack", &self.stack)
            .field("block_stack", &self.block_stack)
            .finish()
    }
}

/// Create a frame for `code`.
///
/// A root frame (no `globals`) uses its locals as globals and reads
/// `__builtins__` from them; nested frames inherit the caller's builtins.
/// Cell variables are seeded from the bound locals and published to the
/// caller under the same name. Free variables come from `closure` when
/// given, otherwise from the caller's identically named cells.
pub fn build_frame(
    code: Rc<Code>,
    mut caller: Option<&mut Frame>,
    locals: DictRef,
    globals: Option<DictRef>,
    closure: Option<&[Rc<Cell>]>,
) -> Result<Frame, RunError> {
    let globals = globals.unwrap_or_else(|| locals.clone());

    let builtins = match &caller {
        Some(caller) => caller.builtins.clone(),
        None => root_builtins(&locals, &globals)?,
    };

    let mut cells =
        AHashMap::with_capacity(code.cellvars.len() + code.freevars.len());

    for name in &code.cellvars {
        let seed = locals.borrow().get_str(name).cloned();
        let cell = Cell::new(seed);
        if let Some(caller) = caller.as_deref_mut() {
            caller.cells.entry(name.clone()).or_insert_with(|| cell.clone());
        }
        cells.insert(name.clone(), cell);
    }

    for (i, name) in code.freevars.iter().enumerate() {
        let cell = match closure {
            Some(closure) => closure.get(i).cloned(),
            None => caller.as_deref().and_then(|c| c.cells.get(name).cloned()),
        };
        let cell = cell.ok_or_else(|| Fault::MissingCell(name.to_string()))?;
        cells.insert(name.clone(), cell);
    }

    Ok(Frame {
        stack: Vec::with_capacity(code.stacksize as usize),
        code,
        globals,
        locals,
        builtins,
        cells,
        block_stack: Vec::new(),
        lasti: 0,
        caller_depth: None,
        generator: None,
    })
}

fn root_builtins(locals: &DictRef, globals: &DictRef) -> Result<DictRef, Fault> {
    let found = locals.borrow().get_str("__builtins__").cloned();
    let found =
        found.or_else(|| globals.borrow().get_str("__builtins__").cloned());
    match found {
        Some(Value::Dict(dict)) => Ok(dict),
        Some(Value::Module(module)) => Ok(module.dict.clone()),
        _ => Err(Fault::MissingBuiltins),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::CodeBuilder;
    use crate::value::Dict;

    fn namespace_with_builtins() -> DictRef {
        let mut ns = Dict::default();
        ns.set_str("__builtins__", Value::dict(Dict::default()));
        Rc::new(RefCell::new(ns))
    }

    fn root(code: Rc<Code>) -> Frame {
        build_frame(code, None, namespace_with_builtins(), None, None)
            .expect("root frame")
    }

    #[test]
    fn stack_bounds_are_enforced() {
        let code = CodeBuilder::new("f", vec![]).stacksize(2).build();
        let mut frame = root(code);
        frame.push(Value::Int(1)).unwrap();
        frame.push(Value::Int(2)).unwrap();
        assert!(matches!(
            frame.push(Value::Int(3)),
            Err(Fault::StackOverflow { limit: 2, .. })
        ));
        assert_eq!(frame.popn(2).unwrap().len(), 2);
        assert!(matches!(frame.pop(), Err(Fault::StackUnderflow)));
    }

    #[test]
    fn popn_preserves_push_order() {
        let code = CodeBuilder::new("f", vec![]).stacksize(3).build();
        let mut frame = root(code);
        for i in 0..3 {
            frame.push(Value::Int(i)).unwrap();
        }
        let items: Vec<_> = frame.popn(2).unwrap().iter().filter_map(Value::as_i64).collect();
        assert_eq!(items, [1, 2]);
        assert_eq!(frame.peek(0).unwrap().as_i64(), Some(0));
    }

    #[test]
    fn root_frame_requires_builtins() {
        let code = CodeBuilder::new("m", vec![]).build();
        let locals = Rc::new(RefCell::new(Dict::default()));
        let err = build_frame(code, None, locals, None, None).unwrap_err();
        assert!(matches!(err, RunError::Fault(Fault::MissingBuiltins)));
    }

    #[test]
    fn root_frame_globals_are_locals() {
        let frame = root(CodeBuilder::new("m", vec![]).build());
        assert!(Rc::ptr_eq(&frame.globals, &frame.locals));
    }

    #[test]
    fn cells_are_seeded_and_published() {
        let mut caller = root(CodeBuilder::new("m", vec![]).build());
        let code = CodeBuilder::new("f", vec![]).cellvars(&["x"]).build();

        let mut locals = Dict::default();
        locals.set_str("x", Value::Int(7));
        let globals = caller.globals.clone();
        let frame = build_frame(
            code,
            Some(&mut caller),
            Rc::new(RefCell::new(locals)),
            Some(globals),
            None,
        )
        .unwrap();

        let cell = frame.cell(0).unwrap();
        assert_eq!(cell.get().and_then(|v| v.as_i64()), Some(7));
        assert!(Rc::ptr_eq(cell, &caller.cells["x"]));
        assert!(Rc::ptr_eq(&frame.builtins, &caller.builtins));
    }

    #[test]
    fn publishing_keeps_the_callers_own_cell() {
        let mut caller = root(CodeBuilder::new("m", vec![]).build());
        let own = Cell::new(Some(Value::Int(1)));
        caller.cells.insert(Rc::from("x"), own.clone());

        let code = CodeBuilder::new("f", vec![]).cellvars(&["x"]).build();
        let globals = Some(caller.globals.clone());
        let frame = build_frame(
            code,
            Some(&mut caller),
            Rc::new(RefCell::new(Dict::default())),
            globals,
            None,
        )
        .unwrap();

        assert!(Rc::ptr_eq(&caller.cells["x"], &own));
        assert!(!Rc::ptr_eq(frame.cell(0).unwrap(), &own));
        assert_eq!(own.get().and_then(|v| v.as_i64()), Some(1));
    }

    #[test]
    fn free_variables_prefer_closure() {
        let mut caller = root(CodeBuilder::new("m", vec![]).build());
        caller.cells.insert(Rc::from("y"), Cell::new(Some(Value::Int(1))));
        let closure = [Cell::new(Some(Value::Int(2)))];

        let code = CodeBuilder::new("g", vec![]).freevars(&["y"]).build();
        let globals = Some(caller.globals.clone());
        let frame = build_frame(
            code.clone(),
            Some(&mut caller),
            Rc::new(RefCell::new(Dict::default())),
            globals.clone(),
            Some(&closure[..]),
        )
        .unwrap();
        assert_eq!(frame.cell(0).unwrap().get().and_then(|v| v.as_i64()), Some(2));

        let frame = build_frame(
            code,
            Some(&mut caller),
            Rc::new(RefCell::new(Dict::default())),
            globals,
            None,
        )
        .unwrap();
        assert_eq!(frame.cell(0).unwrap().get().and_then(|v| v.as_i64()), Some(1));
    }

    #[test]
    fn missing_free_variable_is_a_fault() {
        let mut caller = root(CodeBuilder::new("m", vec![]).build());
        let code = CodeBuilder::new("g", vec![]).freevars(&["nope"]).build();
        let err = build_frame(
            code,
            Some(&mut caller),
            Rc::new(RefCell::new(Dict::default())),
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, RunError::Fault(Fault::MissingCell(name)) if name == "nope"));
    }

    #[test]
    fn block_stack() {
        let mut frame = root(CodeBuilder::new("m", vec![]).stacksize(1).build());
        frame.push(Value::None).unwrap();
        frame.push_block(BlockKind::Loop, 40);
        assert_eq!(
            frame.pop_block().unwrap(),
            Block { kind: BlockKind::Loop, handler: 40, level: 1 }
        );
        assert!(matches!(
            frame.pop_block(),
            Err(Fault::BlockStackInvariantViolation(_))
        ));
    }
}
