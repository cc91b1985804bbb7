//! Bounded structural equality, hashing, and `repr` (`spec.md` §4.A).
//!
//! Deep comparison/hashing share a single recursion-depth counter owned by
//! the *current task*, not a thread-local — `spec.md` §9 "Per-task state" is
//! the defining constraint this module exists to satisfy. Exceeding the
//! configured depth raises `RecursionError`, never a native stack overflow.

use crate::error::{VmError, VmResult};
use crate::value::Value;
use std::cell::Cell;

/// The per-task recursion-depth counter threaded through `eq`, `hash`,
/// `repr`, and (conceptually) iterative drop. Cheap to construct; a `Task`
/// owns one and swaps it in/out on context switch (`spec.md` §4.E).
pub struct RecursionGuard {
    depth: Cell<u32>,
    limit: u32,
}

impl RecursionGuard {
    pub fn new(limit: Option<u32>) -> Self {
        Self { depth: Cell::new(0), limit: limit.unwrap_or(u32::MAX) }
    }

    pub fn depth(&self) -> u32 {
        self.depth.get()
    }

    /// Enters one level of structural recursion; the returned handle pops it
    /// back out on drop, so a `?`-early-return can't leak depth.
    fn enter(&self) -> VmResult<GuardHandle<'_>> {
        let next = self.depth.get() + 1;
        if next > self.limit {
            return Err(VmError::RecursionLimitExceeded { depth: next, limit: self.limit });
        }
        self.depth.set(next);
        Ok(GuardHandle { guard: self })
    }
}

struct GuardHandle<'a> {
    guard: &'a RecursionGuard,
}

impl Drop for GuardHandle<'_> {
    fn drop(&mut self) {
        self.guard.depth.set(self.guard.depth.get() - 1);
    }
}

/// Structural equality. Sequence types compare element-wise and order
/// matters; `Set`/`FrozenSet` ignore order (`spec.md` §3).
pub fn eq_value(a: &Value, b: &Value, guard: &RecursionGuard) -> VmResult<bool> {
    use Value::*;
    Ok(match (a, b) {
        (None, None) | (Ellipsis, Ellipsis) => true,
        (Bool(x), Bool(y)) => x == y,
        (Int(x), Int(y)) => x == y,
        (Float(x), Float(y)) => x == y,
        (Int(x), Float(y)) | (Float(y), Int(x)) => x.to_f64() == *y,
        (Bool(x), Int(y)) | (Int(y), Bool(x)) => Int::from_i64(*x as i64) == *y,
        (Str(x), Str(y)) => x == y,
        (Bytes(x), Bytes(y)) => x == y,
        (Tuple(x), Tuple(y)) => eq_seq(x, y, guard)?,
        (List(x), List(y)) => eq_seq(&x.borrow(), &y.borrow(), guard)?,
        (Set(x), Set(y)) => eq_set(&x.borrow(), &y.borrow(), guard)?,
        (FrozenSet(x), FrozenSet(y)) => eq_set(x, y, guard)?,
        (Set(x), FrozenSet(y)) | (FrozenSet(y), Set(x)) => eq_set(&x.borrow(), y, guard)?,
        (Dict(x), Dict(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            if x.len() != y.len() {
                false
            } else {
                let _h = guard.enter()?;
                let mut all_eq = true;
                for (k, v) in x.entries() {
                    match y.get(k, guard)? {
                        Some(other_v) if eq_value(v, &other_v, guard)? => {}
                        _ => {
                            all_eq = false;
                            break;
                        }
                    }
                }
                all_eq
            }
        }
        (Range(x), Range(y)) => x == y,
        (Slice(x), Slice(y)) => x == y,
        (Type(x), Type(y)) => x.id == y.id,
        (None, _) | (_, None) => false,
        _ => false,
    })
}

fn eq_seq(a: &[Value], b: &[Value], guard: &RecursionGuard) -> VmResult<bool> {
    if a.len() != b.len() {
        return Ok(false);
    }
    let _h = guard.enter()?;
    for (x, y) in a.iter().zip(b.iter()) {
        if !eq_value(x, y, guard)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn eq_set(a: &[Value], b: &[Value], guard: &RecursionGuard) -> VmResult<bool> {
    if a.len() != b.len() {
        return Ok(false);
    }
    let _h = guard.enter()?;
    for x in a {
        let mut found = false;
        for y in b {
            if eq_value(x, y, guard)? {
                found = true;
                break;
            }
        }
        if !found {
            return Ok(false);
        }
    }
    Ok(true)
}

/// `hash(x) == hash(y)` whenever `x == y`, across representations
/// (`spec.md` §3 invariant 2). `hash` is order-sensitive for sequences and
/// order-insensitive for sets; exceeding the recursion guard raises
/// `RecursionError` rather than overflowing the native stack.
pub fn hash_value(v: &Value, guard: &RecursionGuard) -> VmResult<u64> {
    use Value::*;
    use std::hash::{Hash, Hasher};
    Ok(match v {
        None => 0xF00D,
        Bool(b) => Int::from_i64(*b as i64).hash_value(),
        Int(i) => i.hash_value(),
        Float(f) => hash_float(*f),
        Str(s) => {
            let mut h = std::collections::hash_map::DefaultHasher::new();
            s.hash(&mut h);
            h.finish()
        }
        Bytes(b) => {
            let mut h = std::collections::hash_map::DefaultHasher::new();
            b.hash(&mut h);
            h.finish()
        }
        Tuple(items) => hash_seq(items, guard)?,
        FrozenSet(items) => hash_set(items, guard)?,
        Range(r) => hash_range(r),
        Type(t) => t.id as u64,
        Ellipsis => 0xE11E,
        other => {
            return Err(VmError::type_error(format!("unhashable type: '{}'", other.type_name())))
        }
    })
}

fn hash_float(f: f64) -> u64 {
    // hash(-0.0) == hash(0.0); hash(nan) is constant; integral floats hash
    // like the equal integer so `1 == 1.0` implies equal hashes.
    if f == 0.0 {
        return Int::from_i64(0).hash_value();
    }
    if f.is_nan() {
        return 0;
    }
    if f.fract() == 0.0 && f.abs() < 1e18 {
        return Int::from_i64(f as i64).hash_value();
    }
    f.to_bits()
}

fn hash_seq(items: &[Value], guard: &RecursionGuard) -> VmResult<u64> {
    let _h = guard.enter()?;
    let mut acc: u64 = 0x9E3779B97F4A7C15;
    for item in items {
        let h = hash_value(item, guard)?;
        acc = acc.wrapping_mul(1000003).wrapping_add(h);
    }
    Ok(acc ^ (items.len() as u64))
}

fn hash_set(items: &[Value], guard: &RecursionGuard) -> VmResult<u64> {
    let _h = guard.enter()?;
    let mut acc: u64 = 0;
    for item in items {
        acc ^= hash_value(item, guard)?;
    }
    Ok(acc)
}

fn hash_range(r: &crate::value::RangeValue) -> u64 {
    if r.len() == 0 {
        return hash_seq(&[], &RecursionGuard::new(None)).unwrap_or(0);
    }
    let mut acc: u64 = 0x9E3779B97F4A7C15;
    for part in [r.start.hash_value(), r.stop.hash_value(), r.step.hash_value(), r.len()] {
        acc = acc.wrapping_mul(1000003).wrapping_add(part);
    }
    acc
}

/// `repr`, bounded the same way as `eq`/`hash`.
pub fn repr_value(v: &Value, guard: &RecursionGuard) -> VmResult<String> {
    use Value::*;
    Ok(match v {
        None => "None".to_string(),
        Bool(true) => "True".to_string(),
        Bool(false) => "False".to_string(),
        Ellipsis => "Ellipsis".to_string(),
        Int(i) => i.to_string(),
        Float(f) => repr_float(*f),
        Str(s) => repr_str(s),
        Bytes(b) => format!("b'{}'", String::from_utf8_lossy(b)),
        Tuple(items) => {
            let _h = guard.enter()?;
            let parts: VmResult<Vec<_>> = items.iter().map(|x| repr_value(x, guard)).collect();
            let parts = parts?;
            if parts.len() == 1 {
                format!("({},)", parts[0])
            } else {
                format!("({})", parts.join(", "))
            }
        }
        List(items) => {
            let _h = guard.enter()?;
            let items = items.borrow();
            let parts: VmResult<Vec<_>> = items.iter().map(|x| repr_value(x, guard)).collect();
            format!("[{}]", parts?.join(", "))
        }
        Dict(d) => {
            let _h = guard.enter()?;
            let d = d.borrow();
            let mut parts = Vec::new();
            for (k, val) in d.entries() {
                parts.push(format!("{}: {}", repr_value(k, guard)?, repr_value(val, guard)?));
            }
            format!("{{{}}}", parts.join(", "))
        }
        Set(items) => {
            let items = items.borrow();
            if items.is_empty() {
                return Ok("set()".to_string());
            }
            let _h = guard.enter()?;
            let parts: VmResult<Vec<_>> = items.iter().map(|x| repr_value(x, guard)).collect();
            format!("{{{}}}", parts?.join(", "))
        }
        FrozenSet(items) => {
            let _h = guard.enter()?;
            let parts: VmResult<Vec<_>> = items.iter().map(|x| repr_value(x, guard)).collect();
            format!("frozenset({{{}}})", parts?.join(", "))
        }
        Range(r) => format!("range({}, {}, {})", r.start, r.stop, r.step),
        other => format!("<{} object>", other.type_name()),
    })
}

/// `str(x)`: identical to `repr` except a bare `Str` returns its own
/// content unquoted, matching the reference language's `str`/`repr` split.
pub fn str_value(v: &Value, guard: &RecursionGuard) -> VmResult<String> {
    match v {
        Value::Str(s) => Ok(s.to_string()),
        other => repr_value(other, guard),
    }
}

fn repr_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

fn repr_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}
