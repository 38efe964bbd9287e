//! Reader for the CPython 3.4 marshal format (version 3) and the `.pyc`
//! header that precedes it.
//!
//! Objects flagged with [`FLAG_REF`] are recorded in a backreference table
//! so later `r` entries can share them. Containers and code objects reserve
//! their slot before their children are read (matching the order in which
//! the writer numbers them); scalars are appended once read.

mod error;
mod writer;

use std::rc::Rc;

use log::{debug, warn};
use num_bigint::BigInt;

use crate::code::{Code, CodeFlags};
use crate::exceptions::ExcType;
use crate::value::{Dict, HashKey, Set, Value};

pub use error::{FormatError, MarshalError, StreamError};
pub use writer::MarshalWriter;

pub const FLAG_REF: u8 = 0x80;

/// Objects nested deeper than this are rejected.
pub const MAX_MARSHAL_DEPTH: usize = 1500;

/// Magic number of CPython 3.4 `.pyc` files (3310 followed by `\r\n`).
pub const PYTHON_34_MAGIC: u32 = u32::from_le_bytes([0xEE, 0x0C, b'\r', b'\n']);

/// Marshal type tags.
pub mod tag {
    pub const NULL: u8 = b'0';
    pub const NONE: u8 = b'N';
    pub const FALSE: u8 = b'F';
    pub const TRUE: u8 = b'T';
    pub const STOPITER: u8 = b'S';
    pub const ELLIPSIS: u8 = b'.';
    pub const INT: u8 = b'i';
    pub const LONG: u8 = b'l';
    pub const FLOAT: u8 = b'f';
    pub const BINARY_FLOAT: u8 = b'g';
    pub const COMPLEX: u8 = b'x';
    pub const BINARY_COMPLEX: u8 = b'y';
    pub const STRING: u8 = b's';
    pub const INTERNED: u8 = b't';
    pub const REF: u8 = b'r';
    pub const TUPLE: u8 = b'(';
    pub const LIST: u8 = b'[';
    pub const DICT: u8 = b'{';
    pub const CODE: u8 = b'c';
    pub const UNICODE: u8 = b'u';
    pub const SET: u8 = b'<';
    pub const FROZENSET: u8 = b'>';
    pub const ASCII: u8 = b'a';
    pub const ASCII_INTERNED: u8 = b'A';
    pub const SMALL_TUPLE: u8 = b')';
    pub const SHORT_ASCII: u8 = b'z';
    pub const SHORT_ASCII_INTERNED: u8 = b'Z';
}

/// The 12-byte `.pyc` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleHeader {
    pub magic: u32,
    pub mtime: u32,
    pub size: u32,
}

pub struct LoadedModule {
    pub header: ModuleHeader,
    pub code: Rc<Code>,
}

/// Parse a complete `.pyc` image: header, then a single code object.
pub fn read_module(bytes: &[u8]) -> Result<LoadedModule, MarshalError> {
    let mut reader = MarshalReader::new(bytes);
    let header = reader.read_header()?;
    match reader.read_object()? {
        Value::Code(code) => {
            debug!(
                "loaded module code {:?} from {:?} ({} refs)",
                code.name,
                code.filename,
                reader.refs.len()
            );
            Ok(LoadedModule { header, code })
        }
        other => Err(FormatError::UnexpectedType {
            expected: "code",
            found: other.type_name().into_owned(),
        }
        .into()),
    }
}

/// Parse one object from a bare marshal stream.
pub fn read_object(bytes: &[u8]) -> Result<Value, MarshalError> {
    MarshalReader::new(bytes).read_object()
}

pub struct MarshalReader<'a> {
    data: &'a [u8],
    pos: usize,
    refs: Vec<Option<Value>>,
    depth: usize,
}

impl<'a> MarshalReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            refs: Vec::new(),
            depth: 0,
        }
    }

    /// Current byte offset in the stream.
    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn read_header(&mut self) -> Result<ModuleHeader, MarshalError> {
        let raw = self.read_bytes(4)?;
        let magic = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        if &raw[2..4] != b"\r\n" {
            return Err(FormatError::BadMagic(magic).into());
        }
        if magic != PYTHON_34_MAGIC {
            warn!(
                "magic number {} is not CPython 3.4's {}",
                magic & 0xFFFF,
                PYTHON_34_MAGIC & 0xFFFF
            );
        }
        let mtime = self.read_u32()?;
        let size = self.read_u32()?;
        Ok(ModuleHeader { magic, mtime, size })
    }

    /// Read one object; a null tag here is an error.
    pub fn read_object(&mut self) -> Result<Value, MarshalError> {
        self.read_nullable()?
            .ok_or_else(|| FormatError::UnexpectedNull.into())
    }

    /// Read one object, returning `None` for the null tag.
    fn read_nullable(&mut self) -> Result<Option<Value>, MarshalError> {
        self.depth += 1;
        if self.depth > MAX_MARSHAL_DEPTH {
            self.depth -= 1;
            return Err(FormatError::RecursionLimitExceeded.into());
        }
        let result = self.read_tagged();
        self.depth -= 1;
        result
    }

    fn read_tagged(&mut self) -> Result<Option<Value>, MarshalError> {
        let code = self.read_u8().map_err(|_| StreamError::Eof)?;
        let flag = code & FLAG_REF != 0;
        let tag = code & !FLAG_REF;

        let value = match tag {
            tag::NULL => return Ok(None),
            tag::REF => return self.read_ref().map(Some),
            tag::TUPLE
            | tag::SMALL_TUPLE
            | tag::LIST
            | tag::DICT
            | tag::SET
            | tag::FROZENSET
            | tag::CODE => {
                let slot = flag.then(|| self.reserve_ref());
                let value = self.read_compound(tag)?;
                if let Some(slot) = slot {
                    self.refs[slot] = Some(value.clone());
                }
                value
            }
            _ => {
                let value = self.read_scalar(tag)?;
                if flag {
                    self.refs.push(Some(value.clone()));
                }
                value
            }
        };
        Ok(Some(value))
    }

    fn reserve_ref(&mut self) -> usize {
        self.refs.push(None);
        self.refs.len() - 1
    }

    fn read_ref(&mut self) -> Result<Value, MarshalError> {
        let idx = self.read_u32()?;
        match self.refs.get(idx as usize) {
            Some(Some(value)) => Ok(value.clone()),
            _ => Err(StreamError::InvalidReference(idx).into()),
        }
    }

    fn read_scalar(&mut self, tag: u8) -> Result<Value, MarshalError> {
        let value = match tag {
            tag::NONE => Value::None,
            tag::FALSE => Value::Bool(false),
            tag::TRUE => Value::Bool(true),
            tag::STOPITER => Value::ExcType(ExcType::StopIteration),
            tag::ELLIPSIS => Value::Ellipsis,
            tag::INT => Value::Int(self.read_i32()? as i64),
            tag::LONG => self.read_long()?,
            tag::FLOAT => Value::Float(self.read_text_float()?),
            tag::BINARY_FLOAT => Value::Float(self.read_binary_float()?),
            tag::COMPLEX => {
                let re = self.read_text_float()?;
                let im = self.read_text_float()?;
                Value::Complex(re, im)
            }
            tag::BINARY_COMPLEX => {
                let re = self.read_binary_float()?;
                let im = self.read_binary_float()?;
                Value::Complex(re, im)
            }
            tag::STRING => {
                let n = self.read_size()?;
                Value::Bytes(Rc::from(self.read_bytes(n)?))
            }
            tag::UNICODE | tag::INTERNED | tag::ASCII | tag::ASCII_INTERNED => {
                let n = self.read_size()?;
                Value::Str(self.read_str(n)?)
            }
            tag::SHORT_ASCII | tag::SHORT_ASCII_INTERNED => {
                let n = self.read_u8()? as usize;
                Value::Str(self.read_str(n)?)
            }
            other => return Err(FormatError::UnknownTypeTag(other).into()),
        };
        Ok(value)
    }

    fn read_compound(&mut self, tag: u8) -> Result<Value, MarshalError> {
        let value = match tag {
            tag::TUPLE => {
                let n = self.read_size()?;
                Value::tuple(self.read_items(n)?)
            }
            tag::SMALL_TUPLE => {
                let n = self.read_u8()? as usize;
                Value::tuple(self.read_items(n)?)
            }
            tag::LIST => {
                let n = self.read_size()?;
                Value::list(self.read_items(n)?)
            }
            tag::DICT => Value::dict(self.read_dict()?),
            tag::SET => {
                let n = self.read_size()?;
                Value::set(self.read_set(n)?)
            }
            tag::FROZENSET => {
                let n = self.read_size()?;
                Value::FrozenSet(Rc::new(self.read_set(n)?))
            }
            tag::CODE => Value::Code(self.read_code()?),
            other => return Err(FormatError::UnknownTypeTag(other).into()),
        };
        Ok(value)
    }

    fn read_items(&mut self, n: usize) -> Result<Vec<Value>, MarshalError> {
        let mut items = Vec::with_capacity(n.min(self.remaining()));
        for _ in 0..n {
            items.push(self.read_object()?);
        }
        Ok(items)
    }

    fn read_dict(&mut self) -> Result<Dict, MarshalError> {
        let mut dict = Dict::default();
        while let Some(key) = self.read_nullable()? {
            let value = self.read_object()?;
            dict.insert(hash_key(key)?, value);
        }
        Ok(dict)
    }

    fn read_set(&mut self, n: usize) -> Result<Set, MarshalError> {
        let mut set = Set::default();
        for _ in 0..n {
            let item = self.read_object()?;
            set.insert(hash_key(item)?);
        }
        Ok(set)
    }

    fn read_code(&mut self) -> Result<Rc<Code>, MarshalError> {
        let argcount = self.read_count()?;
        let kwonlyargcount = self.read_count()?;
        let nlocals = self.read_count()?;
        let stacksize = self.read_count()?;
        let flags = CodeFlags::from_bits_retain(self.read_u32()?);
        let code = expect_bytes(self.read_object()?)?;
        let consts = expect_tuple(self.read_object()?)?;
        let names = self.read_names()?;
        let varnames = self.read_names()?;
        let freevars = self.read_names()?;
        let cellvars = self.read_names()?;
        let filename = expect_str(self.read_object()?)?;
        let name = expect_str(self.read_object()?)?;
        let firstlineno = self.read_count()?;
        let lnotab = expect_bytes(self.read_object()?)?;

        Ok(Rc::new(Code {
            argcount,
            kwonlyargcount,
            nlocals,
            stacksize,
            flags,
            code,
            consts,
            names,
            varnames,
            freevars,
            cellvars,
            filename,
            name,
            firstlineno,
            lnotab,
        }))
    }

    fn read_names(&mut self) -> Result<Vec<Rc<str>>, MarshalError> {
        expect_tuple(self.read_object()?)?
            .into_iter()
            .map(expect_str)
            .collect()
    }

    /// Arbitrary-precision integer: signed digit count, then 15-bit digits
    /// least significant first.
    fn read_long(&mut self) -> Result<Value, MarshalError> {
        let n = self.read_i32()?;
        let size = n.unsigned_abs() as usize;
        if size > i32::MAX as usize {
            return Err(FormatError::SizeOutOfRange(n as i64).into());
        }
        let mut digits = Vec::with_capacity(size.min(self.remaining() / 2));
        for _ in 0..size {
            let digit = self.read_u16()?;
            if digit > 0x7FFF {
                return Err(FormatError::BadLongDigit(digit).into());
            }
            digits.push(digit);
        }
        if digits.last() == Some(&0) {
            return Err(FormatError::UnnormalizedLong.into());
        }

        let mut magnitude = BigInt::from(0);
        for &digit in digits.iter().rev() {
            magnitude = (magnitude << 15u32) + BigInt::from(digit);
        }
        let value = if n < 0 { -magnitude } else { magnitude };
        Ok(Value::from_bigint(value))
    }

    fn read_text_float(&mut self) -> Result<f64, MarshalError> {
        let n = self.read_u8()? as usize;
        let raw = self.read_bytes(n)?;
        let text = std::str::from_utf8(raw).map_err(|_| FormatError::InvalidUtf8)?;
        text.trim()
            .parse::<f64>()
            .map_err(|_| FormatError::InvalidLiteral(text.to_string()).into())
    }

    fn read_binary_float(&mut self) -> Result<f64, MarshalError> {
        let raw = self.read_bytes(8)?;
        let bits = u64::from_le_bytes([
            raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
        ]);
        if (bits >> 52) & 0x7FF == 0x7FF {
            return Err(FormatError::UnsupportedFloat.into());
        }
        Ok(f64::from_bits(bits))
    }

    fn read_str(&mut self, n: usize) -> Result<Rc<str>, MarshalError> {
        let raw = self.read_bytes(n)?;
        let text = std::str::from_utf8(raw).map_err(|_| FormatError::InvalidUtf8)?;
        Ok(Rc::from(text))
    }

    // ── primitive reads ───────────────────────────────────────────

    #[inline]
    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], MarshalError> {
        if n > self.remaining() {
            return Err(StreamError::TruncatedRead {
                wanted: n,
                available: self.remaining(),
            }
            .into());
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8, MarshalError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, MarshalError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, MarshalError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i32(&mut self) -> Result<i32, MarshalError> {
        Ok(self.read_u32()? as i32)
    }

    /// A 32-bit length prefix; negative values are rejected.
    fn read_size(&mut self) -> Result<usize, MarshalError> {
        let n = self.read_i32()?;
        if n < 0 {
            return Err(FormatError::SizeOutOfRange(n as i64).into());
        }
        Ok(n as usize)
    }

    fn read_count(&mut self) -> Result<u32, MarshalError> {
        Ok(self.read_size()? as u32)
    }
}

fn hash_key(value: Value) -> Result<HashKey, MarshalError> {
    HashKey::new(value)
        .map_err(|u| FormatError::Unhashable(u.0.into_owned()).into())
}

fn unexpected(expected: &'static str, found: &Value) -> MarshalError {
    FormatError::UnexpectedType {
        expected,
        found: found.type_name().into_owned(),
    }
    .into()
}

fn expect_bytes(value: Value) -> Result<Rc<[u8]>, MarshalError> {
    match value {
        Value::Bytes(b) => Ok(b),
        other => Err(unexpected("bytes", &other)),
    }
}

fn expect_str(value: Value) -> Result<Rc<str>, MarshalError> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(unexpected("str", &other)),
    }
}

fn expect_tuple(value: Value) -> Result<Vec<Value>, MarshalError> {
    match value {
        Value::Tuple(items) => Ok(items.to_vec()),
        other => Err(unexpected("tuple", &other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::CodeBuilder;
    use crate::format::repr;
    use bytecode::BytecodeBuilder;

    fn read(bytes: &[u8]) -> Value {
        read_object(bytes).expect("valid marshal data")
    }

    fn read_err(bytes: &[u8]) -> MarshalError {
        match read_object(bytes) {
            Ok(v) => panic!("expected error, got {}", repr(&v)),
            Err(e) => e,
        }
    }

    #[test]
    fn int32_sign_extension() {
        assert_eq!(read(b"i\x05\x00\x00\x00").as_i64(), Some(5));
        assert_eq!(read(b"i\xff\xff\xff\xff").as_i64(), Some(-1));
    }

    #[test]
    fn singletons() {
        assert!(read(b"N").is_none());
        assert!(matches!(read(b"T"), Value::Bool(true)));
        assert!(matches!(read(b"F"), Value::Bool(false)));
        assert!(matches!(read(b"."), Value::Ellipsis));
        assert!(matches!(read(b"S"), Value::ExcType(ExcType::StopIteration)));
    }

    #[test]
    fn long_integers() {
        // 2**15 = digits [0, 1]
        assert_eq!(read(b"l\x02\x00\x00\x00\x00\x00\x01\x00").as_i64(), Some(32768));
        // negative count gives a negative value
        assert_eq!(read(b"l\xff\xff\xff\xff\x07\x00").as_i64(), Some(-7));
        // 2**75 needs arbitrary precision
        let big = read(b"l\x06\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x01\x00");
        assert_eq!(repr(&big), "37778931862957161709568");
    }

    #[test]
    fn long_integer_errors() {
        assert_eq!(
            read_err(b"l\x01\x00\x00\x00\x00\x80"),
            MarshalError::Format(FormatError::BadLongDigit(0x8000))
        );
        assert_eq!(
            read_err(b"l\x02\x00\x00\x00\x01\x00\x00\x00"),
            MarshalError::Format(FormatError::UnnormalizedLong)
        );
    }

    #[test]
    fn floats_and_complex() {
        assert!(matches!(read(b"f\x032.5"), Value::Float(f) if f == 2.5));
        let mut g = vec![b'g'];
        g.extend_from_slice(&(-0.25f64).to_le_bytes());
        assert!(matches!(read(&g), Value::Float(f) if f == -0.25));
        assert!(matches!(read(b"x\x031.5\x02-2"), Value::Complex(re, im) if re == 1.5 && im == -2.0));

        let mut y = vec![b'y'];
        y.extend_from_slice(&1.0f64.to_le_bytes());
        y.extend_from_slice(&3.0f64.to_le_bytes());
        assert!(matches!(read(&y), Value::Complex(re, im) if re == 1.0 && im == 3.0));
    }

    #[test]
    fn special_binary_float_is_rejected() {
        let mut g = vec![b'g'];
        g.extend_from_slice(&f64::INFINITY.to_le_bytes());
        assert_eq!(read_err(&g), MarshalError::Format(FormatError::UnsupportedFloat));
    }

    #[test]
    fn strings() {
        assert_eq!(read(b"z\x02hi").as_str(), Some("hi"));
        assert_eq!(read(b"u\x03\x00\x00\x00h\xc3\xa9").as_str(), Some("hé"));
        assert!(matches!(read(b"s\x02\x00\x00\x00\x00\xff"), Value::Bytes(b) if b[..] == [0u8, 255]));
        assert_eq!(
            read_err(b"u\x01\x00\x00\x00\xff"),
            MarshalError::Format(FormatError::InvalidUtf8)
        );
    }

    #[test]
    fn dict_preserves_order() {
        let value = read(b"{z\x01bi\x01\x00\x00\x00z\x01ai\x02\x00\x00\x000");
        assert_eq!(repr(&value), "{'b': 1, 'a': 2}");
    }

    #[test]
    fn dict_null_value_is_an_error() {
        assert_eq!(
            read_err(b"{z\x01a0"),
            MarshalError::Format(FormatError::UnexpectedNull)
        );
    }

    #[test]
    fn unhashable_dict_key() {
        assert_eq!(
            read_err(b"{[\x00\x00\x00\x00N0"),
            MarshalError::Format(FormatError::Unhashable("list".into()))
        );
    }

    #[test]
    fn backreferences_share_identity() {
        // ( [flagged list] , r0 )
        let value = read(b")\x02\xdb\x00\x00\x00\x00r\x00\x00\x00\x00");
        let Value::Tuple(items) = value else {
            panic!("expected tuple");
        };
        match (&items[0], &items[1]) {
            (Value::List(a), Value::List(b)) => assert!(Rc::ptr_eq(a, b)),
            _ => panic!("expected two lists"),
        }
    }

    #[test]
    fn container_slots_are_numbered_before_children() {
        // flagged tuple (slot 0) holding a flagged string (slot 1), then refs
        let value = read(b"[\x03\x00\x00\x00\xa9\x01\xfa\x01xr\x01\x00\x00\x00r\x00\x00\x00\x00");
        assert_eq!(repr(&value), "[('x',), 'x', ('x',)]");
    }

    #[test]
    fn repeated_references_resolve_to_one_object() {
        // ( 'abc' as slot 0, r0, r0 )
        let value = read(b")\x03\xfa\x03abcr\x00\x00\x00\x00r\x00\x00\x00\x00");
        assert_eq!(repr(&value), "('abc', 'abc', 'abc')");
        let Value::Tuple(items) = value else {
            panic!("expected tuple");
        };
        assert!(items[0].is(&items[1]));
        assert!(items[1].is(&items[2]));

        // ( [1] as slot 0, r0, r0 )
        let value = read(
            b")\x03\xdb\x01\x00\x00\x00i\x01\x00\x00\x00r\x00\x00\x00\x00r\x00\x00\x00\x00",
        );
        let Value::Tuple(items) = value else {
            panic!("expected tuple");
        };
        match (&items[0], &items[1], &items[2]) {
            (Value::List(a), Value::List(b), Value::List(c)) => {
                assert!(Rc::ptr_eq(a, b) && Rc::ptr_eq(b, c));
            }
            _ => panic!("expected three lists"),
        }
    }

    #[test]
    fn frozenset_reserves_then_fills() {
        // A frozenset may not reference itself while being read.
        assert_eq!(
            read_err(b"\xbe\x01\x00\x00\x00r\x00\x00\x00\x00"),
            MarshalError::Stream(StreamError::InvalidReference(0))
        );
        let value = read(b")\x02\xbe\x01\x00\x00\x00i\x01\x00\x00\x00r\x00\x00\x00\x00");
        let Value::Tuple(items) = value else {
            panic!("expected tuple");
        };
        assert!(items[0].is(&items[1]));
    }

    #[test]
    fn reference_out_of_range() {
        assert_eq!(
            read_err(b"r\x00\x00\x00\x00"),
            MarshalError::Stream(StreamError::InvalidReference(0))
        );
    }

    #[test]
    fn unknown_tag_and_truncation() {
        assert_eq!(read_err(b"?"), MarshalError::Format(FormatError::UnknownTypeTag(b'?')));
        assert_eq!(read_err(b""), MarshalError::Stream(StreamError::Eof));
        assert!(matches!(
            read_err(b"i\x01\x00"),
            MarshalError::Stream(StreamError::TruncatedRead { wanted: 4, available: 2 })
        ));
        assert_eq!(
            read_err(b"(\xff\xff\xff\xff"),
            MarshalError::Format(FormatError::SizeOutOfRange(-1))
        );
    }

    #[test]
    fn nesting_depth_is_limited() {
        fn nested(depth: usize) -> Vec<u8> {
            let mut bytes = Vec::new();
            for _ in 0..depth - 1 {
                bytes.extend_from_slice(b")\x01");
            }
            bytes.push(b'N');
            bytes
        }
        // Deep recursion needs more than the default test thread stack.
        let handle = std::thread::Builder::new()
            .stack_size(256 << 20)
            .spawn(|| {
                let ok = read_object(&nested(MAX_MARSHAL_DEPTH)).is_ok();
                let err = read_object(&nested(MAX_MARSHAL_DEPTH + 1)).err();
                (ok, err)
            })
            .unwrap();
        let (ok, err) = handle.join().unwrap();
        assert!(ok);
        assert_eq!(
            err,
            Some(MarshalError::Format(FormatError::RecursionLimitExceeded))
        );
    }

    #[test]
    fn module_header_and_code() {
        let mut body = BytecodeBuilder::new();
        body.load_const(0).return_value();
        let code = CodeBuilder::new("<module>", body.into_bytes())
            .consts(vec![Value::None])
            .stacksize(1)
            .build();
        let bytes = MarshalWriter::write_module(&code, 1234).unwrap();

        let module = read_module(&bytes).unwrap();
        assert_eq!(module.header.magic, PYTHON_34_MAGIC);
        assert_eq!(module.header.mtime, 1234);
        assert_eq!(&*module.code.name, "<module>");
        assert_eq!(module.code.stacksize, 1);
        assert!(module.code.consts[0].is_none());
    }

    #[test]
    fn module_header_errors() {
        assert!(matches!(
            read_module(b"\xee\x0c\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00N"),
            Err(MarshalError::Format(FormatError::BadMagic(_)))
        ));
        assert!(matches!(
            read_module(b"\xee\x0c\r\n\x00\x00\x00\x00\x00\x00\x00\x00N"),
            Err(MarshalError::Format(FormatError::UnexpectedType { expected: "code", .. }))
        ));
    }
}
