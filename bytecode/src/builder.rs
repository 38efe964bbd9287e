use crate::op::{ArgKind, CompareOp, Opcode};

/// A forward jump whose target has not yet been resolved.
///
/// Created by [`BytecodeBuilder::jump`] (and the `setup_*` helpers, whose
/// handler is a relative jump). Resolve it with [`BytecodeBuilder::bind`].
#[derive(Debug)]
#[must_use]
pub struct Label {
    /// Position of the u16 argument bytes in the buffer.
    arg_pos: usize,
    /// Position right after the jump instruction (base for relative jumps).
    base: usize,
    relative: bool,
}

/// Builds a CPython 3.4 bytecode byte sequence.
///
/// Arguments wider than 16 bits get an `EXTENDED_ARG` prefix.
pub struct BytecodeBuilder {
    buf: Vec<u8>,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Current byte offset in the bytecode stream.
    pub fn current_offset(&self) -> usize {
        self.buf.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    // ── emit helpers ───────────────────────────────────────────────

    fn emit_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Emit an argument-less opcode.
    pub fn op(&mut self, op: Opcode) -> &mut Self {
        debug_assert!(!op.has_arg(), "{} takes an argument", op.name());
        self.buf.push(op as u8);
        self
    }

    /// Emit an opcode with its argument.
    pub fn op_arg(&mut self, op: Opcode, arg: u32) -> &mut Self {
        debug_assert!(op.has_arg(), "{} takes no argument", op.name());
        if arg > u16::MAX as u32 {
            self.buf.push(Opcode::ExtendedArg as u8);
            self.emit_u16((arg >> 16) as u16);
        }
        self.buf.push(op as u8);
        self.emit_u16(arg as u16);
        self
    }

    // ── jumps ──────────────────────────────────────────────────────

    /// Emit a forward jump (or block setup) with a placeholder target.
    pub fn jump(&mut self, op: Opcode) -> Label {
        let relative = match op.arg_kind() {
            ArgKind::JumpRel => true,
            ArgKind::JumpAbs => false,
            _ => panic!("{} is not a jump", op.name()),
        };
        self.buf.push(op as u8);
        let arg_pos = self.buf.len();
        self.emit_u16(0);
        Label {
            arg_pos,
            base: self.buf.len(),
            relative,
        }
    }

    /// Point a pending jump at the current offset.
    pub fn bind(&mut self, label: Label) {
        let target = self.buf.len();
        let arg = if label.relative {
            target - label.base
        } else {
            target
        };
        self.buf[label.arg_pos..label.arg_pos + 2]
            .copy_from_slice(&(arg as u16).to_le_bytes());
    }

    /// Emit an absolute jump to an already known `target`, e.g. a loop head
    /// obtained from [`current_offset`](Self::current_offset).
    pub fn jump_to(&mut self, op: Opcode, target: usize) -> &mut Self {
        debug_assert_eq!(op.arg_kind(), ArgKind::JumpAbs);
        self.op_arg(op, target as u32)
    }

    // ── named shorthands ───────────────────────────────────────────

    pub fn load_const(&mut self, idx: u32) -> &mut Self {
        self.op_arg(Opcode::LoadConst, idx)
    }

    pub fn load_name(&mut self, idx: u32) -> &mut Self {
        self.op_arg(Opcode::LoadName, idx)
    }

    pub fn store_name(&mut self, idx: u32) -> &mut Self {
        self.op_arg(Opcode::StoreName, idx)
    }

    pub fn load_global(&mut self, idx: u32) -> &mut Self {
        self.op_arg(Opcode::LoadGlobal, idx)
    }

    pub fn load_attr(&mut self, idx: u32) -> &mut Self {
        self.op_arg(Opcode::LoadAttr, idx)
    }

    pub fn load_fast(&mut self, idx: u32) -> &mut Self {
        self.op_arg(Opcode::LoadFast, idx)
    }

    pub fn store_fast(&mut self, idx: u32) -> &mut Self {
        self.op_arg(Opcode::StoreFast, idx)
    }

    pub fn load_deref(&mut self, idx: u32) -> &mut Self {
        self.op_arg(Opcode::LoadDeref, idx)
    }

    pub fn store_deref(&mut self, idx: u32) -> &mut Self {
        self.op_arg(Opcode::StoreDeref, idx)
    }

    pub fn load_closure(&mut self, idx: u32) -> &mut Self {
        self.op_arg(Opcode::LoadClosure, idx)
    }

    pub fn build_tuple(&mut self, count: u32) -> &mut Self {
        self.op_arg(Opcode::BuildTuple, count)
    }

    pub fn build_list(&mut self, count: u32) -> &mut Self {
        self.op_arg(Opcode::BuildList, count)
    }

    pub fn compare_op(&mut self, op: CompareOp) -> &mut Self {
        self.op_arg(Opcode::CompareOp, op as u32)
    }

    /// `CALL_FUNCTION` with `positional` arguments and `keyword` pairs.
    pub fn call_function(&mut self, positional: u8, keyword: u8) -> &mut Self {
        self.op_arg(
            Opcode::CallFunction,
            positional as u32 | (keyword as u32) << 8,
        )
    }

    /// `MAKE_FUNCTION` with `defaults` positional defaults on the stack.
    pub fn make_function(&mut self, defaults: u8) -> &mut Self {
        self.op_arg(Opcode::MakeFunction, defaults as u32)
    }

    pub fn make_closure(&mut self, defaults: u8) -> &mut Self {
        self.op_arg(Opcode::MakeClosure, defaults as u32)
    }

    pub fn pop_top(&mut self) -> &mut Self {
        self.op(Opcode::PopTop)
    }

    pub fn pop_block(&mut self) -> &mut Self {
        self.op(Opcode::PopBlock)
    }

    pub fn return_value(&mut self) -> &mut Self {
        self.op(Opcode::ReturnValue)
    }
}

impl Default for BytecodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
