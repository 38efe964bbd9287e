use std::fmt::Write;
use std::rc::Rc;

use bitflags::bitflags;
use bytecode::{ArgKind, BytecodeDecoder, CompareOp, Opcode, line_for_offset};

use crate::format::repr;
use crate::value::Value;

bitflags! {
    /// `co_flags` bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CodeFlags: u32 {
        const OPTIMIZED   = 0x0001;
        const NEWLOCALS   = 0x0002;
        const VARARGS     = 0x0004;
        const VARKEYWORDS = 0x0008;
        const NESTED      = 0x0010;
        const GENERATOR   = 0x0020;
        const NOFREE      = 0x0040;
    }
}

/// An immutable compiled code object.
pub struct Code {
    pub argcount: u32,
    pub kwonlyargcount: u32,
    pub nlocals: u32,
    pub stacksize: u32,
    pub flags: CodeFlags,
    pub code: Rc<[u8]>,
    pub consts: Vec<Value>,
    pub names: Vec<Rc<str>>,
    pub varnames: Vec<Rc<str>>,
    pub freevars: Vec<Rc<str>>,
    pub cellvars: Vec<Rc<str>>,
    pub filename: Rc<str>,
    pub name: Rc<str>,
    pub firstlineno: u32,
    pub lnotab: Rc<[u8]>,
}

impl Code {
    #[inline]
    pub fn is_generator(&self) -> bool {
        self.flags.contains(CodeFlags::GENERATOR)
    }

    /// Number of named parameters, including `*args` and `**kwargs`.
    pub fn total_args(&self) -> usize {
        let mut n = (self.argcount + self.kwonlyargcount) as usize;
        if self.flags.contains(CodeFlags::VARARGS) {
            n += 1;
        }
        if self.flags.contains(CodeFlags::VARKEYWORDS) {
            n += 1;
        }
        n
    }

    /// Name addressed by a free-kind argument: cell variables come first,
    /// then free variables.
    pub fn free_name(&self, idx: usize) -> Option<&Rc<str>> {
        let cells = self.cellvars.len();
        if idx < cells {
            self.cellvars.get(idx)
        } else {
            self.freevars.get(idx - cells)
        }
    }

    /// Source line of the instruction at `offset`.
    pub fn line_for_offset(&self, offset: usize) -> u32 {
        line_for_offset(&self.lnotab, self.firstlineno, offset)
    }

    /// `dis`-style listing of this code object and every nested one.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        self.disassemble_into(&mut out);
        out
    }

    fn disassemble_into(&self, out: &mut String) {
        let _ = writeln!(
            out,
            "Disassembly of <code object {} at \"{}\", line {}>:",
            self.name, self.filename, self.firstlineno
        );
        let mut last_line = None;
        for instr in BytecodeDecoder::new(&self.code) {
            let instr = match instr {
                Ok(instr) => instr,
                Err(e) => {
                    let _ = writeln!(out, "  <{e}>");
                    break;
                }
            };
            let line = self.line_for_offset(instr.offset);
            if last_line != Some(line) {
                if last_line.is_some() {
                    out.push('\n');
                }
                let _ = write!(out, "{line:>4}");
                last_line = Some(line);
            } else {
                out.push_str("    ");
            }
            let _ = write!(out, "{instr}");
            if let Some(arg) = instr.arg {
                if let Some(detail) = self.describe_arg(instr.opcode, arg) {
                    let _ = write!(out, " ({detail})");
                }
            }
            out.push('\n');
        }
        out.push('\n');

        for value in &self.consts {
            if let Value::Code(nested) = value {
                nested.disassemble_into(out);
            }
        }
    }

    fn describe_arg(&self, opcode: Opcode, arg: u32) -> Option<String> {
        let idx = arg as usize;
        match opcode.arg_kind() {
            ArgKind::Const => self.consts.get(idx).map(repr),
            ArgKind::Name => self.names.get(idx).map(|s| s.to_string()),
            ArgKind::Local => self.varnames.get(idx).map(|s| s.to_string()),
            ArgKind::Free => self.free_name(idx).map(|s| s.to_string()),
            ArgKind::Int if opcode == Opcode::CompareOp => CompareOp::from_repr(
                arg as u8,
            )
            .map(|op| op.symbol().to_string()),
            _ => None,
        }
    }
}

/// Field-by-field construction for code objects assembled in memory.
pub struct CodeBuilder {
    code: Code,
}

impl CodeBuilder {
    pub fn new(name: &str, bytes: Vec<u8>) -> Self {
        Self {
            code: Code {
                argcount: 0,
                kwonlyargcount: 0,
                nlocals: 0,
                stacksize: 0,
                flags: CodeFlags::NOFREE,
                code: Rc::from(bytes),
                consts: Vec::new(),
                names: Vec::new(),
                varnames: Vec::new(),
                freevars: Vec::new(),
                cellvars: Vec::new(),
                filename: Rc::from("<memory>"),
                name: Rc::from(name),
                firstlineno: 1,
                lnotab: Rc::from(Vec::new()),
            },
        }
    }

    pub fn argcount(mut self, n: u32) -> Self {
        self.code.argcount = n;
        self
    }

    pub fn kwonlyargcount(mut self, n: u32) -> Self {
        self.code.kwonlyargcount = n;
        self
    }

    pub fn stacksize(mut self, n: u32) -> Self {
        self.code.stacksize = n;
        self
    }

    pub fn flags(mut self, flags: CodeFlags) -> Self {
        self.code.flags = flags;
        self
    }

    pub fn consts(mut self, consts: Vec<Value>) -> Self {
        self.code.consts = consts;
        self
    }

    pub fn names(mut self, names: &[&str]) -> Self {
        self.code.names = names.iter().map(|&n| Rc::from(n)).collect();
        self
    }

    pub fn varnames(mut self, names: &[&str]) -> Self {
        self.code.varnames = names.iter().map(|&n| Rc::from(n)).collect();
        self.code.nlocals = names.len() as u32;
        self
    }

    pub fn cellvars(mut self, names: &[&str]) -> Self {
        self.code.cellvars = names.iter().map(|&n| Rc::from(n)).collect();
        self.code.flags.remove(CodeFlags::NOFREE);
        self
    }

    pub fn freevars(mut self, names: &[&str]) -> Self {
        self.code.freevars = names.iter().map(|&n| Rc::from(n)).collect();
        self.code.flags.remove(CodeFlags::NOFREE);
        self
    }

    pub fn filename(mut self, filename: &str) -> Self {
        self.code.filename = Rc::from(filename);
        self
    }

    pub fn lines(mut self, firstlineno: u32, lnotab: Vec<u8>) -> Self {
        self.code.firstlineno = firstlineno;
        self.code.lnotab = Rc::from(lnotab);
        self
    }

    pub fn build(self) -> Rc<Code> {
        Rc::new(self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytecode::{BytecodeBuilder, LineTableBuilder};

    #[test]
    fn free_names_cells_first() {
        let code = CodeBuilder::new("f", vec![])
            .cellvars(&["a", "b"])
            .freevars(&["c"])
            .build();
        assert_eq!(code.free_name(0).map(|s| &**s), Some("a"));
        assert_eq!(code.free_name(2).map(|s| &**s), Some("c"));
        assert_eq!(code.free_name(3), None);
        assert!(!code.flags.contains(CodeFlags::NOFREE));
    }

    #[test]
    fn total_args_counts_star_params() {
        let code = CodeBuilder::new("f", vec![])
            .argcount(2)
            .kwonlyargcount(1)
            .flags(CodeFlags::VARARGS | CodeFlags::VARKEYWORDS)
            .build();
        assert_eq!(code.total_args(), 5);
    }

    #[test]
    fn line_numbers_from_table() {
        let mut lines = LineTableBuilder::new(10);
        lines.add(4, 11);
        lines.add(9, 14);
        let code = CodeBuilder::new("f", vec![])
            .lines(10, lines.finish())
            .build();
        assert_eq!(code.line_for_offset(0), 10);
        assert_eq!(code.line_for_offset(4), 11);
        assert_eq!(code.line_for_offset(8), 11);
        assert_eq!(code.line_for_offset(12), 14);
    }

    #[test]
    fn disassembly_lists_nested_code() {
        let mut inner = BytecodeBuilder::new();
        inner.load_const(0).return_value();
        let inner = CodeBuilder::new("inner", inner.into_bytes())
            .consts(vec![Value::None])
            .build();

        let mut outer = BytecodeBuilder::new();
        outer.load_const(0).store_name(0);
        let outer = CodeBuilder::new("<module>", outer.into_bytes())
            .consts(vec![Value::Code(inner)])
            .names(&["x"])
            .build();

        let text = outer.disassemble();
        assert!(text.contains("code object <module>"));
        assert!(text.contains("STORE_NAME"));
        assert!(text.contains("(x)"));
        assert!(text.contains("code object inner"));
        assert!(text.contains("(None)"));
    }
}
