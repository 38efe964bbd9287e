use std::cell::RefCell;
use std::rc::Rc;

use crate::exceptions::{ExcType, RunError, RunResult};
use crate::function::GenState;
use crate::interpreter::{GenStep, Interpreter};
use crate::value::{ListRef, Range, Value, with_set};

/// Builtin iterator state.
pub enum PyIter {
    Tuple { items: Rc<[Value]>, index: usize },
    List { list: ListRef, index: usize },
    Range { range: Range, index: usize },
    Str { text: Rc<str>, pos: usize },
    Bytes { bytes: Rc<[u8]>, index: usize },
    /// Dict keys, set members and reversed sequences, copied up front.
    Snapshot {
        kind: SnapshotKind,
        items: Vec<Value>,
        index: usize,
    },
    Enumerate { inner: Value, count: i64 },
    Zip { inners: Vec<Value> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    DictKeys,
    Set,
    Reversed,
}

enum Step {
    Item(Value),
    Done,
    Enumerate(Value),
    Zip(Vec<Value>),
}

impl PyIter {
    pub fn type_name(&self) -> &'static str {
        match self {
            PyIter::Tuple { .. } => "tuple_iterator",
            PyIter::List { .. } => "list_iterator",
            PyIter::Range { .. } => "range_iterator",
            PyIter::Str { .. } => "str_iterator",
            PyIter::Bytes { .. } => "bytes_iterator",
            PyIter::Snapshot { kind, .. } => match kind {
                SnapshotKind::DictKeys => "dict_keyiterator",
                SnapshotKind::Set => "set_iterator",
                SnapshotKind::Reversed => "list_reverseiterator",
            },
            PyIter::Enumerate { .. } => "enumerate",
            PyIter::Zip { .. } => "zip",
        }
    }

    pub fn into_value(self) -> Value {
        Value::Iterator(Rc::new(RefCell::new(self)))
    }

    fn step(&mut self) -> Step {
        match self {
            PyIter::Tuple { items, index } => next_in(items, index),
            PyIter::List { list, index } => next_in(&list.borrow(), index),
            PyIter::Snapshot { items, index, .. } => next_in(items, index),
            PyIter::Range { range, index } => match range.get(*index) {
                Some(i) => {
                    *index += 1;
                    Step::Item(Value::Int(i))
                }
                None => Step::Done,
            },
            PyIter::Str { text, pos } => match text[*pos..].chars().next() {
                Some(c) => {
                    *pos += c.len_utf8();
                    Step::Item(Value::str(c.encode_utf8(&mut [0; 4])))
                }
                None => Step::Done,
            },
            PyIter::Bytes { bytes, index } => match bytes.get(*index) {
                Some(&b) => {
                    *index += 1;
                    Step::Item(Value::Int(b as i64))
                }
                None => Step::Done,
            },
            PyIter::Enumerate { inner, .. } => Step::Enumerate(inner.clone()),
            PyIter::Zip { inners } => Step::Zip(inners.clone()),
        }
    }
}

fn next_in(items: &[Value], index: &mut usize) -> Step {
    match items.get(*index) {
        Some(item) => {
            *index += 1;
            Step::Item(item.clone())
        }
        None => Step::Done,
    }
}

/// Iterator over the elements of a builtin iterable, or `None` when the
/// value needs the interpreter (instances) or is not iterable.
pub fn builtin_iter(value: &Value) -> Option<PyIter> {
    Some(match value {
        Value::Tuple(items) => PyIter::Tuple {
            items: items.clone(),
            index: 0,
        },
        Value::List(list) => PyIter::List {
            list: list.clone(),
            index: 0,
        },
        Value::Range(range) => PyIter::Range {
            range: **range,
            index: 0,
        },
        Value::Str(text) => PyIter::Str {
            text: text.clone(),
            pos: 0,
        },
        Value::Bytes(bytes) => PyIter::Bytes {
            bytes: bytes.clone(),
            index: 0,
        },
        Value::Dict(dict) => PyIter::Snapshot {
            kind: SnapshotKind::DictKeys,
            items: dict.borrow().keys().map(|k| k.value().clone()).collect(),
            index: 0,
        },
        Value::Set(_) | Value::FrozenSet(_) => PyIter::Snapshot {
            kind: SnapshotKind::Set,
            items: with_set(value, |s| s.iter().map(|k| k.value().clone()).collect()),
            index: 0,
        },
        _ => return None,
    })
}

impl Interpreter {
    /// `iter(value)`
    pub fn get_iter(&mut self, value: &Value) -> RunResult<Value> {
        match value {
            Value::Iterator(_) | Value::Generator(_) => return Ok(value.clone()),
            Value::Instance(_) => {
                if let Some(method) = self.lookup_special(value, "__iter__") {
                    return self.call_value(method, Default::default());
                }
            }
            _ => {
                if let Some(it) = builtin_iter(value) {
                    return Ok(it.into_value());
                }
            }
        }
        Err(ExcType::TypeError.err(format!(
            "'{}' object is not iterable",
            value.type_name()
        )))
    }

    /// Advance an iterator; `None` once it is exhausted.
    pub fn iter_next(&mut self, iter: &Value) -> RunResult<Option<Value>> {
        match iter {
            Value::Iterator(it) => {
                let step = it.borrow_mut().step();
                match step {
                    Step::Item(item) => Ok(Some(item)),
                    Step::Done => Ok(None),
                    Step::Enumerate(inner) => {
                        let Some(item) = self.iter_next(&inner)? else {
                            return Ok(None);
                        };
                        let mut state = it.borrow_mut();
                        let PyIter::Enumerate { count, .. } = &mut *state else {
                            return Ok(None);
                        };
                        let index = Value::Int(*count);
                        *count += 1;
                        Ok(Some(Value::tuple(vec![index, item])))
                    }
                    Step::Zip(inners) => {
                        let mut row = Vec::with_capacity(inners.len());
                        for inner in &inners {
                            match self.iter_next(inner)? {
                                Some(item) => row.push(item),
                                None => return Ok(None),
                            }
                        }
                        Ok(Some(Value::tuple(row)))
                    }
                }
            }
            Value::Generator(generator) => {
                if generator.state() == GenState::Finished {
                    return Ok(None);
                }
                match self.resume_generator(generator, Value::None) {
                    Ok(GenStep::Yielded(item)) => Ok(Some(item)),
                    Ok(GenStep::Returned(_)) => Ok(None),
                    Err(RunError::Exc(exc)) if is_stop_iteration(&exc) => {
                        self.clear_pending(&exc);
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            }
            Value::Instance(_) => {
                let method = self.lookup_special(iter, "__next__").ok_or_else(|| {
                    not_an_iterator(iter)
                })?;
                match self.call_value(method, Default::default()) {
                    Ok(item) => Ok(Some(item)),
                    Err(RunError::Exc(exc)) if is_stop_iteration(&exc) => {
                        self.clear_pending(&exc);
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            }
            other => Err(not_an_iterator(other)),
        }
    }

    /// Drain any iterable into a vector.
    pub fn collect_iterable(&mut self, value: &Value) -> RunResult<Vec<Value>> {
        match value {
            Value::Tuple(items) => return Ok(items.to_vec()),
            Value::List(list) => return Ok(list.borrow().clone()),
            _ => {}
        }
        let iter = self.get_iter(value)?;
        let mut items = Vec::new();
        while let Some(item) = self.iter_next(&iter)? {
            items.push(item);
        }
        Ok(items)
    }
}

fn not_an_iterator(value: &Value) -> RunError {
    ExcType::TypeError.err(format!("'{}' object is not an iterator", value.type_name()))
}

pub fn is_stop_iteration(exc: &Value) -> bool {
    match exc {
        Value::Exception(e) => e.kind == ExcType::StopIteration,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::repr;
    use crate::value::Dict;
    use crate::value::Namespace;

    fn drain(it: &mut PyIter) -> Vec<String> {
        let mut out = Vec::new();
        while let Step::Item(v) = it.step() {
            out.push(repr(&v));
        }
        out
    }

    #[test]
    fn sequences() {
        let mut it = builtin_iter(&Value::str("hé!")).unwrap();
        assert_eq!(drain(&mut it), ["'h'", "'é'", "'!'"]);
        let mut it = builtin_iter(&Value::Range(Rc::new(Range { start: 5, stop: 0, step: -2 }))).unwrap();
        assert_eq!(drain(&mut it), ["5", "3", "1"]);
        let mut it = builtin_iter(&Value::Bytes(Rc::from(&b"AB"[..]))).unwrap();
        assert_eq!(drain(&mut it), ["65", "66"]);
        assert!(builtin_iter(&Value::Int(3)).is_none());
    }

    #[test]
    fn list_iterator_sees_appends() {
        let list = Value::list(vec![Value::Int(1)]);
        let mut it = builtin_iter(&list).unwrap();
        assert!(matches!(it.step(), Step::Item(_)));
        if let Value::List(l) = &list {
            l.borrow_mut().push(Value::Int(2));
        }
        assert_eq!(drain(&mut it), ["2"]);
    }

    #[test]
    fn dict_keys_are_snapshotted() {
        let mut dict = Dict::default();
        dict.set_str("a", Value::Int(1));
        dict.set_str("b", Value::Int(2));
        let dict = Value::dict(dict);
        let mut it = builtin_iter(&dict).unwrap();
        assert_eq!(it.type_name(), "dict_keyiterator");
        if let Value::Dict(d) = &dict {
            d.borrow_mut().clear();
        }
        assert_eq!(drain(&mut it), ["'a'", "'b'"]);
    }
}
