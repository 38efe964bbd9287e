use core::fmt;

use crate::instruction::Instruction;
use crate::op::Opcode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The byte at `offset` is not a known opcode.
    UnknownOpcode { offset: usize, byte: u8 },
    /// The stream ended inside an instruction's argument.
    Truncated { offset: usize },
    /// `EXTENDED_ARG` was followed by an opcode without an argument.
    DanglingExtendedArg { offset: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownOpcode { offset, byte } => {
                write!(f, "unknown opcode {byte} at offset {offset}")
            }
            DecodeError::Truncated { offset } => {
                write!(f, "truncated instruction at offset {offset}")
            }
            DecodeError::DanglingExtendedArg { offset } => {
                write!(f, "EXTENDED_ARG without argument-taking opcode at {offset}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decodes CPython 3.4 bytecode into [`Instruction`]s.
///
/// Unlike builder output, bytecode here comes from files on disk, so every
/// read is bounds-checked and failures are reported as [`DecodeError`].
pub struct BytecodeDecoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BytecodeDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Start decoding at `offset`, e.g. a frame's saved instruction pointer.
    pub fn at(bytes: &'a [u8], offset: usize) -> Self {
        Self { bytes, pos: offset }
    }

    /// Current byte offset in the stream.
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Whether the decoder has reached the end of the bytecode.
    #[inline(always)]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Decode the next instruction, or `Ok(None)` at end-of-stream.
    pub fn decode_next(&mut self) -> Result<Option<Instruction>, DecodeError> {
        if self.is_at_end() {
            return Ok(None);
        }
        let mut extended: u32 = 0;
        loop {
            let offset = self.pos;
            let byte = self.read_u8()?;
            let opcode = Opcode::from_u8(byte)
                .ok_or(DecodeError::UnknownOpcode { offset, byte })?;

            if !opcode.has_arg() {
                if extended != 0 {
                    return Err(DecodeError::DanglingExtendedArg { offset });
                }
                return Ok(Some(Instruction { offset, opcode, arg: None }));
            }

            let arg = self.read_u16(offset)? as u32 | extended;
            if opcode == Opcode::ExtendedArg {
                extended = arg << 16;
                if self.is_at_end() {
                    return Err(DecodeError::Truncated { offset: self.pos });
                }
                continue;
            }
            return Ok(Some(Instruction { offset, opcode, arg: Some(arg) }));
        }
    }

    #[inline(always)]
    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or(DecodeError::Truncated { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    #[inline(always)]
    fn read_u16(&mut self, offset: usize) -> Result<u16, DecodeError> {
        match self.bytes.get(self.pos..self.pos + 2) {
            Some(&[lo, hi]) => {
                self.pos += 2;
                Ok(u16::from_le_bytes([lo, hi]))
            }
            _ => Err(DecodeError::Truncated { offset }),
        }
    }
}

impl Iterator for BytecodeDecoder<'_> {
    type Item = Result<Instruction, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.decode_next() {
            Ok(Some(instr)) => Some(Ok(instr)),
            Ok(None) => None,
            Err(e) => {
                // Stop after the first error.
                self.pos = self.bytes.len();
                Some(Err(e))
            }
        }
    }
}
