use std::fmt::{self, Write};

use crate::value::{Value, with_set};

/// Containers nested deeper than this print as `...`.
const MAX_PRINT_DEPTH: usize = 64;

/// `repr(value)` for builtin types. User `__repr__` methods are resolved by
/// the interpreter before falling back to this.
pub fn repr(value: &Value) -> String {
    let mut out = String::new();
    Printer::default().repr_into(value, &mut out);
    out
}

/// `str(value)`: strings print bare, exceptions print their message.
pub fn to_str(value: &Value) -> String {
    match value {
        Value::Str(s) => s.to_string(),
        Value::Exception(exc) => exc.message(),
        other => repr(other),
    }
}

/// `repr(value)` where `hook` may render instances and exceptions nested
/// anywhere inside the value; `None` falls back to the builtin rendering.
pub fn repr_with(value: &Value, hook: &mut dyn FnMut(&Value) -> Option<String>) -> String {
    let mut out = String::new();
    Printer {
        active: Vec::new(),
        hook: Some(hook),
    }
    .repr_into(value, &mut out);
    out
}

/// One line per operand stack slot, top of stack first.
pub fn format_stack(stack: &[Value]) -> String {
    let depth = stack.len();
    let mut output = String::new();
    for (i, value) in stack.iter().rev().enumerate() {
        let _ = writeln!(output, "[{:02}] {}", depth - i - 1, repr(value));
    }
    output
}

#[derive(Default)]
struct Printer<'h> {
    /// Identities of the containers currently being printed.
    active: Vec<usize>,
    hook: Option<&'h mut dyn FnMut(&Value) -> Option<String>>,
}

impl Printer<'_> {
    fn repr_into(&mut self, value: &Value, out: &mut String) {
        if let (Value::Instance(_) | Value::Exception(_), Some(hook)) = (value, self.hook.as_mut()) {
            if let Some(text) = hook(value) {
                out.push_str(&text);
                return;
            }
        }
        match value {
            Value::None => out.push_str("None"),
            Value::Ellipsis => out.push_str("Ellipsis"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Value::Long(b) => {
                let _ = write!(out, "{b}");
            }
            Value::Float(f) => out.push_str(&float_repr(*f)),
            Value::Complex(re, im) => out.push_str(&complex_repr(*re, *im)),
            Value::Str(s) => out.push_str(&str_repr(s)),
            Value::Bytes(b) => out.push_str(&bytes_repr(b)),
            Value::Tuple(items) => {
                if items.len() == 1 {
                    out.push('(');
                    self.repr_into(&items[0], out);
                    out.push_str(",)");
                } else {
                    self.sequence(value, items, "(", ")", out);
                }
            }
            Value::List(items) => {
                let items = items.borrow().clone();
                self.sequence(value, &items, "[", "]", out);
            }
            Value::Dict(dict) => {
                let entries: Vec<_> = dict
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.value().clone(), v.clone()))
                    .collect();
                self.guarded(value, "{...}", out, |p, out| {
                    out.push('{');
                    for (i, (k, v)) in entries.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        p.repr_into(k, out);
                        out.push_str(": ");
                        p.repr_into(v, out);
                    }
                    out.push('}');
                });
            }
            Value::Set(_) | Value::FrozenSet(_) => {
                let frozen = matches!(value, Value::FrozenSet(_));
                let items: Vec<Value> =
                    with_set(value, |s| s.iter().map(|k| k.value().clone()).collect());
                match (frozen, items.is_empty()) {
                    (false, true) => out.push_str("set()"),
                    (true, true) => out.push_str("frozenset()"),
                    (false, false) => self.sequence(value, &items, "{", "}", out),
                    (true, false) => {
                        out.push_str("frozenset(");
                        self.sequence(value, &items, "{", "}", out);
                        out.push(')');
                    }
                }
            }
            Value::Slice(slice) => {
                out.push_str("slice(");
                self.repr_into(&slice.start, out);
                out.push_str(", ");
                self.repr_into(&slice.stop, out);
                out.push_str(", ");
                self.repr_into(&slice.step, out);
                out.push(')');
            }
            Value::Range(r) => {
                if r.step == 1 {
                    let _ = write!(out, "range({}, {})", r.start, r.stop);
                } else {
                    let _ = write!(out, "range({}, {}, {})", r.start, r.stop, r.step);
                }
            }
            Value::Code(code) => {
                let _ = write!(
                    out,
                    "<code object {} at {:#x}, file \"{}\", line {}>",
                    code.name,
                    address(value),
                    code.filename,
                    code.firstlineno
                );
            }
            Value::Function(func) => {
                let _ = write!(out, "<function {} at {:#x}>", func.qualname, address(value));
            }
            Value::BoundMethod(method) => {
                let _ = write!(
                    out,
                    "<bound method {}.{} of ",
                    method.owner.name, method.function.name
                );
                self.repr_into(&method.receiver, out);
                out.push('>');
            }
            Value::Builtin(idx) => {
                let _ = write!(out, "<built-in function {}>", idx.name());
            }
            Value::NativeMethod(method) => {
                let _ = write!(
                    out,
                    "<built-in method {} of {} object at {:#x}>",
                    method.method.name(),
                    method.receiver.type_name(),
                    address(&method.receiver)
                );
            }
            Value::Class(class) => {
                let _ = write!(out, "<class '{}'>", class.name);
            }
            Value::ExcType(kind) => {
                let _ = write!(out, "<class '{}'>", kind.name());
            }
            Value::Instance(inst) => {
                let _ = write!(out, "<{} object at {:#x}>", inst.class.name, address(value));
            }
            Value::Module(module) => {
                let _ = write!(out, "<module '{}'>", module.name);
            }
            Value::Cell(cell) => match cell.get() {
                Some(inner) => {
                    let _ = write!(
                        out,
                        "<cell at {:#x}: {} object>",
                        address(value),
                        inner.type_name()
                    );
                }
                None => {
                    let _ = write!(out, "<cell at {:#x}: empty>", address(value));
                }
            },
            Value::Generator(generator) => {
                let _ = write!(
                    out,
                    "<generator object {} at {:#x}>",
                    generator.name,
                    address(value)
                );
            }
            Value::Iterator(_) => {
                let _ = write!(out, "<{} object at {:#x}>", value.type_name(), address(value));
            }
            Value::Exception(exc) => {
                out.push_str(&exc.type_name());
                let args = exc.args_tuple();
                self.repr_into(&args, out);
            }
            Value::Traceback(_) => {
                let _ = write!(out, "<traceback object at {:#x}>", address(value));
            }
            Value::Signal(why) => {
                let _ = write!(out, "<signal {why:?}>");
            }
        }
    }

    fn sequence(
        &mut self,
        container: &Value,
        items: &[Value],
        open: &str,
        close: &str,
        out: &mut String,
    ) {
        let placeholder = format!("{open}...{close}");
        self.guarded(container, &placeholder, out, |p, out| {
            out.push_str(open);
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                p.repr_into(item, out);
            }
            out.push_str(close);
        });
    }

    fn guarded(
        &mut self,
        container: &Value,
        placeholder: &str,
        out: &mut String,
        body: impl FnOnce(&mut Self, &mut String),
    ) {
        let id = container.identity().unwrap_or(0);
        if self.active.len() >= MAX_PRINT_DEPTH || self.active.contains(&id) {
            out.push_str(placeholder);
            return;
        }
        self.active.push(id);
        body(self, out);
        self.active.pop();
    }
}

fn address(value: &Value) -> usize {
    value.identity().unwrap_or(0)
}

/// Shortest round-tripping float text, switching to exponent notation
/// outside `1e-4 <= |f| < 1e16`.
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".into();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".into() } else { "-inf".into() };
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0.0".into() } else { "0.0".into() };
    }
    let sci = format!("{f:e}");
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if (-4..16).contains(&exponent) {
        let plain = format!("{f}");
        if plain.contains('.') { plain } else { plain + ".0" }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.abs())
    }
}

/// Float text without a trailing `.0`, as used inside complex reprs.
fn float_repr_short(f: f64) -> String {
    let text = float_repr(f);
    match text.strip_suffix(".0") {
        Some(trimmed) => trimmed.to_string(),
        None => text,
    }
}

pub fn complex_repr(re: f64, im: f64) -> String {
    if re == 0.0 && re.is_sign_positive() {
        return format!("{}j", float_repr_short(im));
    }
    let sign = if im < 0.0 || (im == 0.0 && im.is_sign_negative()) { '-' } else { '+' };
    format!(
        "({}{sign}{}j)",
        float_repr_short(re),
        float_repr_short(im.abs())
    )
}

pub fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

pub fn bytes_repr(bytes: &[u8]) -> String {
    let quote = if bytes.contains(&b'\'') && !bytes.contains(&b'"') { b'"' } else { b'\'' };
    let mut out = String::with_capacity(bytes.len() + 3);
    out.push('b');
    out.push(quote as char);
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b if b == quote => {
                out.push('\\');
                out.push(b as char);
            }
            0x20..=0x7e => out.push(b as char),
            b => {
                let _ = write!(out, "\\x{b:02x}");
            }
        }
    }
    out.push(quote as char);
    out
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_str(self))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&repr(self))
    }
}
