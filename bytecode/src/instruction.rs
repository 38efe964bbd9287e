use core::fmt;

use crate::op::{ArgKind, Opcode};

/// A decoded instruction.
///
/// `arg` already has any preceding `EXTENDED_ARG` folded in, and `offset`
/// points at the first byte of the instruction proper (after the prefix).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub opcode: Opcode,
    pub arg: Option<u32>,
}

impl Instruction {
    /// Encoded size in bytes, not counting an `EXTENDED_ARG` prefix.
    #[inline]
    pub const fn size(&self) -> usize {
        if self.opcode.has_arg() { 3 } else { 1 }
    }

    /// Offset of the instruction that follows this one.
    #[inline]
    pub const fn next_offset(&self) -> usize {
        self.offset + self.size()
    }

    /// Resolved jump target for relative and absolute jumps.
    pub fn jump_target(&self) -> Option<usize> {
        let arg = self.arg? as usize;
        match self.opcode.arg_kind() {
            ArgKind::JumpRel => Some(self.next_offset() + arg),
            ArgKind::JumpAbs => Some(arg),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>6} {:<20}", self.offset, self.opcode.name())?;
        if let Some(arg) = self.arg {
            write!(f, " {arg}")?;
            if let Some(target) = self.jump_target() {
                write!(f, " (to {target})")?;
            }
        }
        Ok(())
    }
}
