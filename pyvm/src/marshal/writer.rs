use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{ToPrimitive, Zero};

use super::{FLAG_REF, FormatError, MarshalError, PYTHON_34_MAGIC, tag};
use crate::code::Code;
use crate::exceptions::ExcType;
use crate::value::Value;

/// Serializes values and code objects into the marshal format.
///
/// Objects are written by value. Sharing is only expressed when a caller
/// asks for it: [`write_flagged`](Self::write_flagged) registers an object
/// and returns its slot, [`write_ref`](Self::write_ref) refers back to it.
pub struct MarshalWriter {
    buf: Vec<u8>,
    next_ref: u32,
}

impl MarshalWriter {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            next_ref: 0,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// A complete `.pyc` image for `code`.
    pub fn write_module(code: &Code, mtime: u32) -> Result<Vec<u8>, MarshalError> {
        let mut writer = Self::new();
        writer.write_header(mtime, 0);
        writer.write_code(code)?;
        Ok(writer.into_bytes())
    }

    pub fn write_header(&mut self, mtime: u32, size: u32) {
        self.put_u32(PYTHON_34_MAGIC);
        self.put_u32(mtime);
        self.put_u32(size);
    }

    pub fn write_object(&mut self, value: &Value) -> Result<(), MarshalError> {
        self.write_tagged(value, 0)
    }

    /// Write `value` with the reference flag set; returns its slot.
    pub fn write_flagged(&mut self, value: &Value) -> Result<u32, MarshalError> {
        let slot = self.next_ref;
        self.next_ref += 1;
        self.write_tagged(value, FLAG_REF)?;
        Ok(slot)
    }

    pub fn write_ref(&mut self, slot: u32) {
        self.buf.push(tag::REF);
        self.put_u32(slot);
    }

    /// The null tag that terminates dicts.
    pub fn write_null(&mut self) {
        self.buf.push(tag::NULL);
    }

    pub fn write_code(&mut self, code: &Code) -> Result<(), MarshalError> {
        self.buf.push(tag::CODE);
        self.write_code_body(code)
    }

    fn write_tagged(&mut self, value: &Value, flag: u8) -> Result<(), MarshalError> {
        match value {
            Value::None => self.buf.push(tag::NONE | flag),
            Value::Bool(false) => self.buf.push(tag::FALSE | flag),
            Value::Bool(true) => self.buf.push(tag::TRUE | flag),
            Value::Ellipsis => self.buf.push(tag::ELLIPSIS | flag),
            Value::ExcType(ExcType::StopIteration) => {
                self.buf.push(tag::STOPITER | flag)
            }
            Value::Int(i) => match i32::try_from(*i) {
                Ok(small) => {
                    self.buf.push(tag::INT | flag);
                    self.put_u32(small as u32);
                }
                Err(_) => self.write_long(&BigInt::from(*i), flag),
            },
            Value::Long(big) => self.write_long(big, flag),
            Value::Float(f) => {
                self.buf.push(tag::BINARY_FLOAT | flag);
                self.buf.extend_from_slice(&f.to_le_bytes());
            }
            Value::Complex(re, im) => {
                self.buf.push(tag::BINARY_COMPLEX | flag);
                self.buf.extend_from_slice(&re.to_le_bytes());
                self.buf.extend_from_slice(&im.to_le_bytes());
            }
            Value::Str(s) => {
                if s.is_ascii() && s.len() <= u8::MAX as usize {
                    self.buf.push(tag::SHORT_ASCII | flag);
                    self.buf.push(s.len() as u8);
                } else {
                    self.buf.push(tag::UNICODE | flag);
                    self.put_u32(s.len() as u32);
                }
                self.buf.extend_from_slice(s.as_bytes());
            }
            Value::Bytes(b) => {
                self.buf.push(tag::STRING | flag);
                self.put_u32(b.len() as u32);
                self.buf.extend_from_slice(b);
            }
            Value::Tuple(items) => {
                if items.len() <= u8::MAX as usize {
                    self.buf.push(tag::SMALL_TUPLE | flag);
                    self.buf.push(items.len() as u8);
                } else {
                    self.buf.push(tag::TUPLE | flag);
                    self.put_u32(items.len() as u32);
                }
                for item in items.iter() {
                    self.write_object(item)?;
                }
            }
            Value::List(items) => {
                let items = items.borrow();
                self.buf.push(tag::LIST | flag);
                self.put_u32(items.len() as u32);
                for item in items.iter() {
                    self.write_object(item)?;
                }
            }
            Value::Dict(dict) => {
                self.buf.push(tag::DICT | flag);
                for (key, value) in dict.borrow().iter() {
                    self.write_object(key.value())?;
                    self.write_object(value)?;
                }
                self.write_null();
            }
            Value::Set(set) => {
                let set = set.borrow();
                self.buf.push(tag::SET | flag);
                self.put_u32(set.len() as u32);
                for key in set.iter() {
                    self.write_object(key.value())?;
                }
            }
            Value::FrozenSet(set) => {
                self.buf.push(tag::FROZENSET | flag);
                self.put_u32(set.len() as u32);
                for key in set.iter() {
                    self.write_object(key.value())?;
                }
            }
            Value::Code(code) => {
                self.buf.push(tag::CODE | flag);
                self.write_code_body(code)?;
            }
            other => {
                return Err(FormatError::UnexpectedType {
                    expected: "marshallable value",
                    found: other.type_name().into_owned(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn write_code_body(&mut self, code: &Code) -> Result<(), MarshalError> {
        self.put_u32(code.argcount);
        self.put_u32(code.kwonlyargcount);
        self.put_u32(code.nlocals);
        self.put_u32(code.stacksize);
        self.put_u32(code.flags.bits());
        self.write_object(&Value::Bytes(code.code.clone()))?;
        self.write_object(&Value::tuple(code.consts.clone()))?;
        for names in [&code.names, &code.varnames, &code.freevars, &code.cellvars] {
            let names = names.iter().cloned().map(Value::Str).collect();
            self.write_object(&Value::tuple(names))?;
        }
        self.write_object(&Value::Str(code.filename.clone()))?;
        self.write_object(&Value::Str(code.name.clone()))?;
        self.put_u32(code.firstlineno);
        self.write_object(&Value::Bytes(code.lnotab.clone()))
    }

    fn write_long(&mut self, value: &BigInt, flag: u8) {
        let mask = BigUint::from(0x7FFFu32);
        let mut digits = Vec::new();
        let mut magnitude = value.magnitude().clone();
        while !magnitude.is_zero() {
            digits.push((&magnitude & &mask).to_u16().unwrap_or(0));
            magnitude >>= 15u32;
        }
        let count = digits.len() as i32;
        let count = if value.sign() == Sign::Minus { -count } else { count };

        self.buf.push(tag::LONG | flag);
        self.put_u32(count as u32);
        for digit in digits {
            self.buf.extend_from_slice(&digit.to_le_bytes());
        }
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
}

impl Default for MarshalWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::repr;
    use crate::marshal::read_object;
    use std::rc::Rc;

    fn reread(value: &Value) -> Value {
        let mut writer = MarshalWriter::new();
        writer.write_object(value).unwrap();
        read_object(&writer.into_bytes()).unwrap()
    }

    #[test]
    fn small_int_layout() {
        let mut writer = MarshalWriter::new();
        writer.write_object(&Value::Int(5)).unwrap();
        assert_eq!(writer.into_bytes(), b"i\x05\x00\x00\x00");
    }

    #[test]
    fn long_layout() {
        let mut writer = MarshalWriter::new();
        writer.write_object(&Value::Int(-32768)).unwrap();
        // fits in i32, so it stays a plain int
        assert_eq!(writer.into_bytes()[0], tag::INT);

        let big: BigInt = BigInt::from(1) << 75u32;
        let mut writer = MarshalWriter::new();
        writer.write_object(&Value::from_bigint(-big)).unwrap();
        let bytes = writer.into_bytes();
        assert_eq!(&bytes[..5], b"l\xfa\xff\xff\xff");
        assert_eq!(&bytes[bytes.len() - 2..], b"\x01\x00");
        assert_eq!(repr(&read_object(&bytes).unwrap()), "-37778931862957161709568");
    }

    #[test]
    fn nested_containers() {
        let value = Value::tuple(vec![
            Value::str("é"),
            Value::list(vec![Value::Float(0.5), Value::None]),
            Value::Bytes(Rc::from(&b"ab"[..])),
        ]);
        assert_eq!(repr(&reread(&value)), "('é', [0.5, None], b'ab')");
    }

    #[test]
    fn flagged_objects_are_shared_on_read() {
        let mut writer = MarshalWriter::new();
        writer.write_object_header_for_test();
        let slot = writer.write_flagged(&Value::list(vec![])).unwrap();
        writer.write_ref(slot);
        let value = read_object(&writer.into_bytes()).unwrap();
        let Value::Tuple(items) = value else {
            panic!("expected tuple");
        };
        assert!(items[0].is(&items[1]));
    }

    #[test]
    fn functions_are_not_marshallable() {
        let mut writer = MarshalWriter::new();
        let err = writer
            .write_object(&Value::Builtin(crate::builtins::builtin_index("len").unwrap()))
            .unwrap_err();
        assert!(matches!(
            err,
            MarshalError::Format(FormatError::UnexpectedType { .. })
        ));
    }

    impl MarshalWriter {
        fn write_object_header_for_test(&mut self) {
            self.buf.push(tag::SMALL_TUPLE);
            self.buf.push(2);
        }
    }
}
