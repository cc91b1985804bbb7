//! Container storage and indexing (`spec.md` §4.A).
//!
//! `ValueMap` backs `Dict`: insertion-ordered, hash-bucketed lookup with
//! content equality (not identity) deciding key matches, exactly as `spec.md`
//! §3 requires it to behave regardless of whether two equal keys arrived via
//! different representations (interned vs. concatenated `Str`, `i64` vs.
//! `BigInt`). Built on `hashbrown`, the same crate the grounding codebase
//! uses for its own VM-internal maps.

use crate::error::{VmError, VmResult};
use crate::value::hashing::{eq_value, hash_value};
use crate::value::{RecursionGuard, Value};
use hashbrown::HashMap as HbMap;

/// Insertion-ordered, custom-hash map. Entries are append-only in the
/// backing `Vec`; deletions leave a tombstone that `entries()` skips.
#[derive(Debug, Default)]
pub struct ValueMap {
    entries: Vec<Option<(Value, Value)>>,
    index: HbMap<u64, Vec<usize>>,
    len: usize,
}

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn find_slot(&self, key: &Value, guard: &RecursionGuard) -> VmResult<Option<usize>> {
        let h = hash_value(key, guard)?;
        if let Some(bucket) = self.index.get(&h) {
            for &idx in bucket {
                if let Some((k, _)) = &self.entries[idx] {
                    if eq_value(k, key, guard)? {
                        return Ok(Some(idx));
                    }
                }
            }
        }
        Ok(None)
    }

    pub fn get(&self, key: &Value, guard: &RecursionGuard) -> VmResult<Option<Value>> {
        Ok(match self.find_slot(key, guard)? {
            Some(idx) => self.entries[idx].as_ref().map(|(_, v)| v.clone()),
            None => None,
        })
    }

    pub fn contains_key(&self, key: &Value, guard: &RecursionGuard) -> VmResult<bool> {
        Ok(self.find_slot(key, guard)?.is_some())
    }

    /// Inserts or overwrites `key`; preserves the original insertion
    /// position on overwrite (Python dict semantics).
    pub fn insert(&mut self, key: Value, value: Value, guard: &RecursionGuard) -> VmResult<()> {
        if let Some(idx) = self.find_slot(&key, guard)? {
            self.entries[idx] = Some((key, value));
            return Ok(());
        }
        let h = hash_value(&key, guard)?;
        let idx = self.entries.len();
        self.entries.push(Some((key, value)));
        self.index.entry(h).or_default().push(idx);
        self.len += 1;
        Ok(())
    }

    pub fn remove(&mut self, key: &Value, guard: &RecursionGuard) -> VmResult<Option<Value>> {
        match self.find_slot(key, guard)? {
            Some(idx) => {
                let (_, v) = self.entries[idx].take().unwrap();
                self.len -= 1;
                Ok(Some(v))
            }
            None => Ok(None),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().filter_map(|e| e.as_ref().map(|(k, v)| (k, v)))
    }

    /// Consumes the map, yielding its `(key, value)` pairs without cloning.
    /// Used by iterative drop to drain a uniquely-owned dict's contents.
    pub fn into_entries(self) -> impl Iterator<Item = (Value, Value)> {
        self.entries.into_iter().flatten()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries().map(|(_, v)| v)
    }
}

/// `get_item(obj, index)` across the sequence/mapping types.
pub fn get_item(obj: &Value, index: &Value, guard: &RecursionGuard) -> VmResult<Value> {
    match obj {
        Value::Tuple(items) => index_seq(items, index, "tuple"),
        Value::List(items) => index_seq(&items.borrow(), index, "list"),
        Value::Str(s) => index_str(s, index),
        Value::Bytes(b) => index_bytes(b, index),
        Value::Dict(d) => {
            let d = d.borrow();
            d.get(index, guard)?.ok_or_else(|| {
                VmError::key_error(crate::value::hashing::repr_value(index, guard).unwrap_or_default())
            })
        }
        Value::Range(r) => {
            let Value::Int(i) = index else {
                return Err(VmError::type_error("range indices must be integers"));
            };
            let n = r.len();
            let idx = normalize_index(i, n)?;
            Ok(Value::Int(r.nth(idx)))
        }
        other => Err(VmError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub fn set_item(obj: &Value, index: &Value, value: Value, guard: &RecursionGuard) -> VmResult<()> {
    match obj {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let n = items.len() as u64;
            let Value::Int(i) = index else {
                return Err(VmError::type_error("list indices must be integers"));
            };
            let idx = normalize_index(i, n)? as usize;
            items[idx] = value;
            Ok(())
        }
        Value::Dict(d) => d.borrow_mut().insert(index.clone(), value, guard),
        other => Err(VmError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn normalize_index(i: &crate::value::Int, len: u64) -> VmResult<u64> {
    let raw = i.to_bigint();
    use num_traits::Signed;
    let len_big = num_bigint::BigInt::from(len);
    let idx = if raw.is_negative() { &raw + &len_big } else { raw };
    if idx.is_negative() || idx >= len_big {
        return Err(VmError::index_error("index out of range"));
    }
    use num_traits::ToPrimitive;
    Ok(idx.to_u64().unwrap())
}

fn index_seq(items: &[Value], index: &Value, type_name: &str) -> VmResult<Value> {
    match index {
        Value::Int(i) => {
            let idx = normalize_index(i, items.len() as u64)
                .map_err(|_| VmError::index_error(format!("{type_name} index out of range")))?;
            Ok(items[idx as usize].clone())
        }
        Value::Slice(s) => Ok(slice_seq(items, s)),
        other => Err(VmError::type_error(format!(
            "{type_name} indices must be integers or slices, not {}",
            other.type_name()
        ))),
    }
}

fn slice_seq(items: &[Value], slice: &crate::value::SliceValue) -> Value {
    let (start, stop, step) = resolve_slice(slice, items.len() as i64);
    let mut out = Vec::new();
    if step > 0 {
        let mut i = start;
        while i < stop {
            out.push(items[i as usize].clone());
            i += step;
        }
    } else if step < 0 {
        let mut i = start;
        while i > stop {
            out.push(items[i as usize].clone());
            i += step;
        }
    }
    Value::List(std::rc::Rc::new(std::cell::RefCell::new(out)))
}

fn resolve_slice(slice: &crate::value::SliceValue, len: i64) -> (i64, i64, i64) {
    let step = slice.step.as_ref().map(|s| s.to_i64_clamped()).unwrap_or(1);
    let step = if step == 0 { 1 } else { step };
    let clamp = |v: i64| -> i64 {
        if v < 0 {
            (v + len).max(if step < 0 { -1 } else { 0 })
        } else {
            v.min(len)
        }
    };
    let default_start = if step > 0 { 0 } else { len - 1 };
    let default_stop = if step > 0 { len } else { -1 };
    let start = slice.start.as_ref().map(|s| clamp(s.to_i64_clamped())).unwrap_or(default_start);
    let stop = slice.stop.as_ref().map(|s| clamp(s.to_i64_clamped())).unwrap_or(default_stop);
    (start, stop, step)
}

fn index_str(s: &str, index: &Value) -> VmResult<Value> {
    let chars: Vec<char> = s.chars().collect();
    match index {
        Value::Int(i) => {
            let idx = normalize_index(i, chars.len() as u64)
                .map_err(|_| VmError::index_error("string index out of range"))?;
            Ok(Value::str(chars[idx as usize].to_string()))
        }
        Value::Slice(slice) => {
            let (start, stop, step) = resolve_slice(slice, chars.len() as i64);
            let mut out = String::new();
            if step > 0 {
                let mut i = start;
                while i < stop {
                    out.push(chars[i as usize]);
                    i += step;
                }
            } else if step < 0 {
                let mut i = start;
                while i > stop {
                    out.push(chars[i as usize]);
                    i += step;
                }
            }
            Ok(Value::str(out))
        }
        other => Err(VmError::type_error(format!(
            "string indices must be integers, not '{}'",
            other.type_name()
        ))),
    }
}

fn index_bytes(b: &[u8], index: &Value) -> VmResult<Value> {
    match index {
        Value::Int(i) => {
            let idx = normalize_index(i, b.len() as u64)
                .map_err(|_| VmError::index_error("index out of range"))?;
            Ok(Value::int(b[idx as usize] as i64))
        }
        other => Err(VmError::type_error(format!(
            "byte indices must be integers, not '{}'",
            other.type_name()
        ))),
    }
}

/// Flattens any Monty iterable into a `Vec<Value>`, used by `for`-loops over
/// non-generator iterables and by argument-unpacking (`f(*xs)`).
pub fn iterate(value: &Value) -> VmResult<Vec<Value>> {
    Ok(match value {
        Value::Tuple(items) => (**items).clone(),
        Value::List(items) => items.borrow().clone(),
        Value::Set(items) => items.borrow().clone(),
        Value::FrozenSet(items) => (**items).clone(),
        Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
        Value::Bytes(b) => b.iter().map(|&byte| Value::int(byte as i64)).collect(),
        Value::Range(r) => (0..r.len()).map(|i| Value::Int(r.nth(i))).collect(),
        Value::Dict(d) => d.borrow().keys().cloned().collect(),
        other => {
            return Err(VmError::type_error(format!("'{}' object is not iterable", other.type_name())))
        }
    })
}
