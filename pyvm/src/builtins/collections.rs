use std::cmp::Ordering;
use std::rc::Rc;

use bytecode::CompareOp;

use crate::args::CallArgs;
use crate::builtins::expect_int;
use crate::exceptions::{ExcType, RunError, RunResult};
use crate::interpreter::Interpreter;
use crate::iter::{PyIter, SnapshotKind};
use crate::operators::hash_key;
use crate::value::{Dict, Range, Set, Value};

pub fn range(_: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("range", 1, 3)?;
    let bounds = args
        .positional
        .iter()
        .map(expect_int)
        .collect::<RunResult<Vec<_>>>()?;
    let (start, stop, step) = match *bounds.as_slice() {
        [stop] => (0, stop, 1),
        [start, stop] => (start, stop, 1),
        [start, stop, step, ..] => (start, stop, step),
        [] => (0, 0, 1),
    };
    if step == 0 {
        return Err(ExcType::ValueError.err("range() arg 3 must not be zero"));
    }
    Ok(Value::Range(Rc::new(Range { start, stop, step })))
}

pub fn list(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("list", 0, 1)?;
    let items = match args.get(0) {
        Some(iterable) => interp.collect_iterable(iterable)?,
        None => Vec::new(),
    };
    Ok(Value::list(items))
}

pub fn tuple(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("tuple", 0, 1)?;
    match args.get(0) {
        Some(value @ Value::Tuple(_)) => Ok(value.clone()),
        Some(iterable) => Ok(Value::tuple(interp.collect_iterable(iterable)?)),
        None => Ok(Value::tuple(Vec::new())),
    }
}

/// Insert every entry of a mapping or an iterable of pairs into `dict`.
pub(crate) fn update_dict(interp: &mut Interpreter, dict: &mut Dict, source: &Value) -> RunResult<()> {
    if let Value::Dict(other) = source {
        let entries: Vec<_> = other
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        dict.extend(entries);
        return Ok(());
    }
    for (i, pair) in interp.collect_iterable(source)?.into_iter().enumerate() {
        let items = interp.collect_iterable(&pair).map_err(|_| {
            ExcType::TypeError.err(format!(
                "cannot convert dictionary update sequence element #{i} to a sequence"
            ))
        })?;
        let [key, value]: [Value; 2] = items.try_into().map_err(|items: Vec<Value>| {
            ExcType::ValueError.err(format!(
                "dictionary update sequence element #{i} has length {}; 2 is required",
                items.len()
            ))
        })?;
        dict.insert(hash_key(key)?, value);
    }
    Ok(())
}

pub fn dict(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    let CallArgs { positional, keywords } = args;
    if positional.len() > 1 {
        return Err(ExcType::TypeError.err(format!(
            "dict expected at most 1 arguments, got {}",
            positional.len()
        )));
    }
    let mut dict = Dict::default();
    if let Some(source) = positional.first() {
        update_dict(interp, &mut dict, source)?;
    }
    for (key, value) in keywords {
        dict.insert(key.into(), value);
    }
    Ok(Value::dict(dict))
}

pub(crate) fn collect_set(interp: &mut Interpreter, iterable: &Value) -> RunResult<Set> {
    let mut set = Set::default();
    for item in interp.collect_iterable(iterable)? {
        set.insert(hash_key(item)?);
    }
    Ok(set)
}

pub fn set(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("set", 0, 1)?;
    let set = match args.get(0) {
        Some(iterable) => collect_set(interp, iterable)?,
        None => Set::default(),
    };
    Ok(Value::set(set))
}

pub fn iter(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("iter", 1, 1)?;
    interp.get_iter(&args.positional[0])
}

pub fn next(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("next", 1, 2)?;
    let iter = &args.positional[0];
    if !matches!(iter, Value::Iterator(_) | Value::Generator(_) | Value::Instance(_)) {
        return Err(ExcType::TypeError.err(format!(
            "'{}' object is not an iterator",
            iter.type_name()
        )));
    }
    match interp.iter_next(iter)? {
        Some(item) => Ok(item),
        None => match args.get(1) {
            Some(default) => Ok(default.clone()),
            None => Err(RunError::Exc(ExcType::StopIteration.instance(vec![]))),
        },
    }
}

/// Stable sort using `<`, optionally through a key function.
pub(crate) fn sort_values(
    interp: &mut Interpreter,
    items: Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> RunResult<Vec<Value>> {
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let rank = match &key {
            Some(key) => interp.call_value(key.clone(), CallArgs::new(vec![item.clone()]))?,
            None => item.clone(),
        };
        keyed.push((rank, item));
    }

    let mut failure = None;
    keyed.sort_by(|(a, _), (b, _)| {
        if failure.is_some() {
            return Ordering::Equal;
        }
        let (a, b) = if reverse { (b, a) } else { (a, b) };
        let result = interp
            .compare_op(CompareOp::Lt, a, b)
            .and_then(|lt| {
                if lt.is_truthy() {
                    return Ok(Ordering::Less);
                }
                let gt = interp.compare_op(CompareOp::Lt, b, a)?;
                Ok(if gt.is_truthy() { Ordering::Greater } else { Ordering::Equal })
            });
        result.unwrap_or_else(|e| {
            failure = Some(e);
            Ordering::Equal
        })
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(keyed.into_iter().map(|(_, item)| item).collect()),
    }
}

pub fn sorted(interp: &mut Interpreter, mut args: CallArgs) -> RunResult<Value> {
    let key = args.take_keyword("key").filter(|k| !k.is_none());
    let reverse = args.take_keyword("reverse").is_some_and(|r| r.is_truthy());
    args.check("sorted", 1, 1)?;
    let items = interp.collect_iterable(&args.positional[0])?;
    Ok(Value::list(sort_values(interp, items, key, reverse)?))
}

pub fn enumerate(interp: &mut Interpreter, mut args: CallArgs) -> RunResult<Value> {
    if let Some(start) = args.take_keyword("start") {
        args.positional.push(start);
    }
    args.check("enumerate", 1, 2)?;
    let count = args.get(1).map(expect_int).transpose()?.unwrap_or(0);
    let inner = interp.get_iter(&args.positional[0])?;
    Ok(PyIter::Enumerate { inner, count }.into_value())
}

pub fn zip(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("zip", 0, usize::MAX)?;
    let inners = args
        .positional
        .iter()
        .map(|iterable| interp.get_iter(iterable))
        .collect::<RunResult<Vec<_>>>()?;
    if inners.is_empty() {
        return Ok(PyIter::Tuple { items: Rc::from(Vec::new()), index: 0 }.into_value());
    }
    Ok(PyIter::Zip { inners }.into_value())
}

pub fn reversed(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("reversed", 1, 1)?;
    let seq = &args.positional[0];
    if let Some(method) = interp.lookup_special(seq, "__reversed__") {
        return interp.call_value(method, CallArgs::default());
    }
    if !matches!(
        seq,
        Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Bytes(_) | Value::Range(_)
    ) {
        return Err(ExcType::TypeError.err(format!(
            "argument to reversed() must be a sequence, not '{}'",
            seq.type_name()
        )));
    }
    let mut items = interp.collect_iterable(seq)?;
    items.reverse();
    Ok(PyIter::Snapshot { kind: SnapshotKind::Reversed, items, index: 0 }.into_value())
}

pub fn any(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("any", 1, 1)?;
    let iter = interp.get_iter(&args.positional[0])?;
    while let Some(item) = interp.iter_next(&iter)? {
        if interp.truthy(&item)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

pub fn all(interp: &mut Interpreter, args: CallArgs) -> RunResult<Value> {
    args.check("all", 1, 1)?;
    let iter = interp.get_iter(&args.positional[0])?;
    while let Some(item) = interp.iter_next(&iter)? {
        if !interp.truthy(&item)? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}
