use std::borrow::Cow;
use std::cell::RefCell;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use ahash::{AHasher, RandomState};
use indexmap::{Equivalent, IndexMap, IndexSet};
use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};

use crate::builtins::BuiltinIndex;
use crate::code::Code;
use crate::exceptions::{ExcType, PyException, TraceEntry};
use crate::frame::Cell;
use crate::function::{
    BoundMethod, Class, Function, Generator, Instance, Module, NativeMethod,
};
use crate::interpreter::Why;
use crate::iter::PyIter;

/// Insertion-ordered mapping used for dicts, namespaces and class bodies.
pub type Dict = IndexMap<HashKey, Value, RandomState>;
pub type Set = IndexSet<HashKey, RandomState>;

pub type ListRef = Rc<RefCell<Vec<Value>>>;
pub type DictRef = Rc<RefCell<Dict>>;
pub type SetRef = Rc<RefCell<Set>>;

/// A runtime value.
///
/// Cloning is cheap: aggregates are reference counted, and identity (`is`)
/// is pointer identity for every shared variant.
#[derive(Clone)]
pub enum Value {
    None,
    Ellipsis,
    Bool(bool),
    Int(i64),
    /// Arbitrary precision integer that does not fit in `Int`.
    Long(Rc<BigInt>),
    Float(f64),
    Complex(f64, f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    Tuple(Rc<[Value]>),
    List(ListRef),
    Dict(DictRef),
    Set(SetRef),
    FrozenSet(Rc<Set>),
    Slice(Rc<Slice>),
    Range(Rc<Range>),
    Code(Rc<Code>),
    Function(Rc<Function>),
    BoundMethod(Rc<BoundMethod>),
    Builtin(BuiltinIndex),
    NativeMethod(Rc<NativeMethod>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    Module(Rc<Module>),
    Cell(Rc<Cell>),
    Generator(Rc<Generator>),
    Iterator(Rc<RefCell<PyIter>>),
    ExcType(ExcType),
    Exception(Rc<PyException>),
    Traceback(Rc<[TraceEntry]>),
    /// Control-flow marker left on the operand stack for `END_FINALLY`.
    Signal(Why),
}

pub struct Slice {
    pub start: Value,
    pub stop: Value,
    pub step: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    pub fn len(&self) -> usize {
        let (lo, hi, step) = if self.step > 0 {
            (self.start as i128, self.stop as i128, self.step as i128)
        } else {
            (self.stop as i128, self.start as i128, -(self.step as i128))
        };
        if lo >= hi {
            return 0;
        }
        ((hi - lo - 1) / step + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        // Elements lie between start and stop, so the sum fits.
        Some((self.start as i128 + self.step as i128 * index as i128) as i64)
    }
}

/// Borrowed view of a numeric value.
#[derive(Debug, Clone, Copy)]
pub enum Num<'a> {
    Int(i64),
    Long(&'a BigInt),
    Float(f64),
    Complex(f64, f64),
}

impl Num<'_> {
    pub fn to_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Long(b) => b.to_f64().unwrap_or(f64::NAN),
            Num::Float(f) => f,
            Num::Complex(re, _) => re,
        }
    }
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::from(items))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict(dict: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn set(set: Set) -> Value {
        Value::Set(Rc::new(RefCell::new(set)))
    }

    /// Build an integer value, keeping it in `Int` when it fits.
    pub fn from_bigint(value: BigInt) -> Value {
        match value.to_i64() {
            Some(i) => Value::Int(i),
            None => Value::Long(Rc::new(value)),
        }
    }

    pub fn as_num(&self) -> Option<Num<'_>> {
        match self {
            Value::Bool(b) => Some(Num::Int(*b as i64)),
            Value::Int(i) => Some(Num::Int(*i)),
            Value::Long(b) => Some(Num::Long(b)),
            Value::Float(f) => Some(Num::Float(*f)),
            Value::Complex(re, im) => Some(Num::Complex(*re, *im)),
            _ => None,
        }
    }

    /// Integer view (bools count), or `None` for every other type.
    pub fn as_bigint(&self) -> Option<Cow<'_, BigInt>> {
        match self {
            Value::Bool(b) => Some(Cow::Owned(BigInt::from(*b as i64))),
            Value::Int(i) => Some(Cow::Owned(BigInt::from(*i))),
            Value::Long(b) => Some(Cow::Borrowed(b)),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn type_name(&self) -> Cow<'static, str> {
        let name = match self {
            Value::None => "NoneType",
            Value::Ellipsis => "ellipsis",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::Long(_) => "int",
            Value::Float(_) => "float",
            Value::Complex(..) => "complex",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::FrozenSet(_) => "frozenset",
            Value::Slice(_) => "slice",
            Value::Range(_) => "range",
            Value::Code(_) => "code",
            Value::Function(_) => "function",
            Value::BoundMethod(_) => "method",
            Value::Builtin(_) | Value::NativeMethod(_) => {
                "builtin_function_or_method"
            }
            Value::Class(_) | Value::ExcType(_) => "type",
            Value::Instance(inst) => {
                return Cow::Owned(inst.class.name.to_string());
            }
            Value::Exception(exc) => return Cow::Owned(exc.type_name()),
            Value::Module(_) => "module",
            Value::Cell(_) => "cell",
            Value::Generator(_) => "generator",
            Value::Iterator(it) => it.borrow().type_name(),
            Value::Traceback(_) => "traceback",
            Value::Signal(_) => "signal",
        };
        Cow::Borrowed(name)
    }

    /// Truthiness of builtin types. Instances are always true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Long(_) => true,
            Value::Float(f) => *f != 0.0,
            Value::Complex(re, im) => *re != 0.0 || *im != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Set(s) => !s.borrow().is_empty(),
            Value::FrozenSet(s) => !s.is_empty(),
            Value::Range(r) => !r.is_empty(),
            _ => true,
        }
    }

    /// Address of the shared allocation, for identity and identity hashing.
    pub fn identity(&self) -> Option<usize> {
        let ptr = match self {
            Value::Long(v) => Rc::as_ptr(v).cast::<u8>(),
            Value::Str(v) => Rc::as_ptr(v).cast::<u8>(),
            Value::Bytes(v) => Rc::as_ptr(v).cast::<u8>(),
            Value::Tuple(v) => Rc::as_ptr(v).cast::<u8>(),
            Value::List(v) => Rc::as_ptr(v).cast::<u8>(),
            Value::Dict(v) => Rc::as_ptr(v).cast::<u8>(),
            Value::Set(v) => Rc::as_ptr(v).cast::<u8>(),
            Value::FrozenSet(v) => Rc::as_ptr(v).cast::<u8>(),
            Value::Slice(v) => Rc::as_ptr(v).cast::<u8>(),
            Value::Range(v) => Rc::as_ptr(v).cast::<u8>(),
            Value::Code(v) => Rc::as_ptr(v).cast::<u8>(),
            Value::Function(v) => Rc::as_ptr(v).cast::<u8>(),
            Value::BoundMethod(v) => Rc::as_ptr(v).cast::<u8>(),
            Value::NativeMethod(v) => Rc::as_ptr(v).cast::<u8>(),
            Value::Class(v) => Rc::as_ptr(v).cast::<u8>(),
            Value::Instance(v) => Rc::as_ptr(v).cast::<u8>(),
            Value::Module(v) => Rc::as_ptr(v).cast::<u8>(),
            Value::Cell(v) => Rc::as_ptr(v).cast::<u8>(),
            Value::Generator(v) => Rc::as_ptr(v).cast::<u8>(),
            Value::Iterator(v) => Rc::as_ptr(v).cast::<u8>(),
            Value::Exception(v) => Rc::as_ptr(v).cast::<u8>(),
            Value::Traceback(v) => Rc::as_ptr(v).cast::<u8>(),
            _ => return None,
        };
        Some(ptr as usize)
    }

    /// The `is` operator.
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Ellipsis, Value::Ellipsis) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::ExcType(a), Value::ExcType(b)) => a == b,
            (Value::Signal(a), Value::Signal(b)) => a == b,
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => {
                    a == b
                        && std::mem::discriminant(self)
                            == std::mem::discriminant(other)
                }
                _ => false,
            },
        }
    }
}

// ── equality ───────────────────────────────────────────────────────

/// Float value as an exact integer, when it has one.
fn float_as_bigint(f: f64) -> Option<BigInt> {
    if f.is_finite() && f.fract() == 0.0 {
        BigInt::from_f64(f)
    } else {
        None
    }
}

pub fn num_eq(a: Num<'_>, b: Num<'_>) -> bool {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => x == y,
        (Num::Long(x), Num::Long(y)) => x == y,
        (Num::Int(_), Num::Long(_)) | (Num::Long(_), Num::Int(_)) => false,
        (Num::Float(x), Num::Float(y)) => x == y,
        (Num::Int(i), Num::Float(f)) | (Num::Float(f), Num::Int(i)) => {
            float_as_bigint(f).is_some_and(|v| v == BigInt::from(i))
        }
        (Num::Long(l), Num::Float(f)) | (Num::Float(f), Num::Long(l)) => {
            float_as_bigint(f).is_some_and(|v| &v == l)
        }
        (Num::Complex(re1, im1), Num::Complex(re2, im2)) => {
            re1 == re2 && im1 == im2
        }
        (Num::Complex(re, im), other) | (other, Num::Complex(re, im)) => {
            im == 0.0 && num_eq(Num::Float(re), other)
        }
    }
}

/// Structural `==` for builtin types; identity for everything else.
pub fn values_eq(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (a.as_num(), b.as_num()) {
        return num_eq(x, y);
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        (Value::Tuple(x), Value::Tuple(y)) => seq_eq(x, y),
        (Value::List(x), Value::List(y)) => {
            Rc::ptr_eq(x, y) || seq_eq(&x.borrow(), &y.borrow())
        }
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter().all(|(k, v)| {
                    y.get(k).is_some_and(|other| values_eq(v, other))
                })
        }
        (
            Value::Set(_) | Value::FrozenSet(_),
            Value::Set(_) | Value::FrozenSet(_),
        ) => with_set(a, |x| {
            with_set(b, |y| x.len() == y.len() && x.iter().all(|k| y.contains(k)))
        }),
        (Value::Range(x), Value::Range(y)) => {
            let (lx, ly) = (x.len(), y.len());
            lx == ly && (lx == 0 || (x.start == y.start && (lx == 1 || x.step == y.step)))
        }
        _ => a.is(b),
    }
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_eq(x, y))
}

/// Run `f` against the element set of a set or frozenset value.
pub fn with_set<R>(value: &Value, f: impl FnOnce(&Set) -> R) -> R {
    match value {
        Value::Set(s) => f(&s.borrow()),
        Value::FrozenSet(s) => f(s),
        _ => f(&Set::default()),
    }
}

// ── hashing ────────────────────────────────────────────────────────

/// A value known to be hashable, usable as a dict key or set member.
///
/// `1`, `1.0` and `True` hash and compare equal.
#[derive(Debug, Clone)]
pub struct HashKey(Value);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unhashable(pub Cow<'static, str>);

impl HashKey {
    pub fn new(value: Value) -> Result<Self, Unhashable> {
        if is_hashable(&value) {
            Ok(Self(value))
        } else {
            Err(Unhashable(value.type_name()))
        }
    }

    pub fn str(s: &str) -> Self {
        Self(Value::str(s))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Rc<str>> for HashKey {
    fn from(s: Rc<str>) -> Self {
        Self(Value::Str(s))
    }
}

fn is_hashable(value: &Value) -> bool {
    match value {
        Value::List(_) | Value::Dict(_) | Value::Set(_) | Value::Slice(_) => {
            false
        }
        Value::Tuple(items) => items.iter().all(is_hashable),
        _ => true,
    }
}

fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Str(s) => s.hash(state),
        Value::Bool(b) => (*b as i64).hash(state),
        Value::Int(i) => i.hash(state),
        Value::Long(b) => b.hash(state),
        Value::Float(f) => match float_as_bigint(*f) {
            Some(b) => match b.to_i64() {
                Some(i) => i.hash(state),
                None => b.hash(state),
            },
            None => f.to_bits().hash(state),
        },
        Value::Complex(re, im) => {
            if *im == 0.0 {
                hash_value(&Value::Float(*re), state);
            } else {
                (re.to_bits(), im.to_bits()).hash(state);
            }
        }
        Value::Bytes(b) => b.hash(state),
        Value::Tuple(items) => {
            items.len().hash(state);
            for item in items.iter() {
                hash_value(item, state);
            }
        }
        Value::FrozenSet(set) => {
            // Order independent.
            let mut acc = 0u64;
            for key in set.iter() {
                let mut h = AHasher::default();
                key.hash(&mut h);
                acc ^= h.finish();
            }
            acc.hash(state);
        }
        Value::None => 0x4e6f_6e65u64.hash(state),
        Value::Ellipsis => 0x2e2e_2eu64.hash(state),
        Value::Builtin(idx) => idx.hash(state),
        Value::ExcType(t) => t.hash(state),
        Value::Signal(w) => w.hash(state),
        other => other.identity().hash(state),
    }
}

impl Hash for HashKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_value(&self.0, state);
    }
}

impl PartialEq for HashKey {
    fn eq(&self, other: &Self) -> bool {
        values_eq(&self.0, &other.0)
    }
}

impl Eq for HashKey {}

/// Allocation-free string lookup into a [`Dict`].
#[derive(Hash)]
pub struct StrKey<'a>(pub &'a str);

impl Equivalent<HashKey> for StrKey<'_> {
    fn equivalent(&self, key: &HashKey) -> bool {
        matches!(&key.0, Value::Str(s) if &**s == self.0)
    }
}

/// String-keyed access to namespaces.
pub trait Namespace {
    fn get_str(&self, name: &str) -> Option<&Value>;
    fn insert_str(&mut self, name: Rc<str>, value: Value);
    fn remove_str(&mut self, name: &str) -> Option<Value>;

    fn set_str(&mut self, name: &str, value: Value) {
        self.insert_str(Rc::from(name), value);
    }

    fn contains_str(&self, name: &str) -> bool {
        self.get_str(name).is_some()
    }
}

impl Namespace for Dict {
    fn get_str(&self, name: &str) -> Option<&Value> {
        self.get(&StrKey(name))
    }

    fn insert_str(&mut self, name: Rc<str>, value: Value) {
        self.insert(HashKey::from(name), value);
    }

    fn remove_str(&mut self, name: &str) -> Option<Value> {
        self.shift_remove(&StrKey(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(v: Value) -> HashKey {
        HashKey::new(v).expect("hashable")
    }

    #[test]
    fn numeric_keys_coincide() {
        let mut d = Dict::default();
        d.insert(key(Value::Int(1)), Value::str("int"));
        d.insert(key(Value::Float(1.0)), Value::str("float"));
        d.insert(key(Value::Bool(true)), Value::str("bool"));
        assert_eq!(d.len(), 1);
        assert_eq!(d.get(&key(Value::Int(1))).and_then(Value::as_str), Some("bool"));
    }

    #[test]
    fn string_lookup_without_allocation() {
        let mut d = Dict::default();
        d.set_str("alpha", Value::Int(1));
        d.set_str("beta", Value::Int(2));
        assert_eq!(d.get_str("beta").and_then(Value::as_i64), Some(2));
        assert!(d.get_str("gamma").is_none());
        assert_eq!(d.remove_str("alpha").and_then(|v| v.as_i64()), Some(1));
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn insertion_order_is_kept() {
        let mut d = Dict::default();
        for name in ["z", "a", "m"] {
            d.set_str(name, Value::None);
        }
        let keys: Vec<_> = d
            .keys()
            .map(|k| k.value().as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }

    #[test]
    fn unhashable_values() {
        assert_eq!(
            HashKey::new(Value::list(vec![])).err(),
            Some(Unhashable(Cow::Borrowed("list")))
        );
        let nested = Value::tuple(vec![Value::Int(1), Value::list(vec![])]);
        assert!(HashKey::new(nested).is_err());
        assert!(HashKey::new(Value::tuple(vec![Value::Int(1)])).is_ok());
    }

    #[test]
    fn identity_versus_equality() {
        let a = Value::list(vec![Value::Int(1)]);
        let b = Value::list(vec![Value::Int(1)]);
        assert!(values_eq(&a, &b));
        assert!(!a.is(&b));
        assert!(a.is(&a.clone()));
        assert!(values_eq(&Value::Int(2), &Value::Float(2.0)));
        assert!(!values_eq(&Value::Int(2), &Value::str("2")));
    }

    #[test]
    fn big_integers_normalize() {
        assert!(matches!(Value::from_bigint(BigInt::from(5)), Value::Int(5)));
        let big = BigInt::from(i64::MAX) + BigInt::from(1);
        assert!(matches!(Value::from_bigint(big), Value::Long(_)));
    }

    #[test]
    fn range_length() {
        let r = Range { start: 0, stop: 10, step: 3 };
        assert_eq!(r.len(), 4);
        assert_eq!(r.get(3), Some(9));
        assert_eq!(r.get(4), None);
        assert_eq!(Range { start: 5, stop: 0, step: -2 }.len(), 3);
        assert!(Range { start: 5, stop: 5, step: 1 }.is_empty());
        let wide = Range { start: i64::MIN, stop: i64::MAX, step: i64::MAX };
        assert_eq!(wide.len(), 3);
        assert_eq!(wide.get(2), Some(i64::MAX - 1));
        let down = Range { start: 0, stop: i64::MIN, step: i64::MIN };
        assert_eq!(down.len(), 1);
    }
}
