//! Heap allocation accounting and iterative teardown
//! (`spec.md` §4.A, component A; §9).
//!
//! Every container `Value` already carries its own refcount in the form of
//! an `Rc` pointer — there is no separate id table to keep in sync, unlike
//! the teacher crate's `reference_counter.rs`, which has to track ids
//! independently because its stack items are not themselves `Rc`-based.
//! What Monty still needs, and what this module provides, is the thing `Rc`
//! does *not* give you for free: a drop that does not recurse the native
//! call stack when the last reference to a deeply nested container goes
//! away. `Heap` itself is a thin live-allocation counter consulted by
//! `LimitTracker`.
//!
//! `drop_iteratively` is the fix for the defining bug this module exists to
//! avoid: naively letting a container's `Drop` glue run
//! (`Rc<RefCell<Vec<Value>>>` dropping its `Vec<Value>`, each `Value`
//! dropping its own children, ...) recurses one native stack frame per
//! nesting level. Instead, each popped container is drained *only if this
//! call holds the last strong reference to it* — `Rc::try_unwrap` succeeds
//! exactly then — moving its children onto the worklist instead of letting
//! the container drop them itself. A container that is not uniquely owned
//! is left alone entirely: other live owners still need its contents, and
//! there is nothing to tear down yet.

use crate::value::Value;
use std::cell::Cell;
use std::rc::Rc;

/// Live-allocation counter, consulted by `LimitTracker` for the
/// `max_allocations` budget (`spec.md` §6).
pub struct Heap {
    live: Cell<u64>,
}

pub type HeapId = u64;

impl Heap {
    pub fn new() -> Self {
        Self { live: Cell::new(0) }
    }

    pub fn register(&self) -> HeapId {
        let id = self.live.get();
        self.live.set(id + 1);
        id
    }

    pub fn live_count(&self) -> u64 {
        self.live.get()
    }

    /// Replaces `value` with `Value::None`, tearing down whatever it owned
    /// iteratively. Call this instead of letting `value` fall out of scope
    /// whenever it might be (or might contain) a deeply nested container.
    pub fn release(&self, value: Value) {
        if self.live.get() > 0 {
            self.live.set(self.live.get() - 1);
        }
        drop_iteratively(value);
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

/// Tears down `value` without growing the native call stack with nesting
/// depth. Safe to call on any value, including non-containers (it is then
/// equivalent to an ordinary `drop`).
pub fn drop_iteratively(value: Value) {
    let mut worklist: Vec<Value> = vec![value];
    while let Some(item) = worklist.pop() {
        drain_children(item, &mut worklist);
    }
}

/// Drops one value. If it uniquely owns a container, the container's
/// backing storage is drained (elements moved onto `worklist`, not cloned)
/// before the now-empty container is allowed to drop for real — an empty
/// `Vec`/`ValueMap` has nothing left for `Drop` to recurse into. If another
/// owner still holds a strong reference, the value is simply dropped as-is:
/// its contents stay alive for that other owner, so there is nothing here
/// to tear down yet.
fn drain_children(value: Value, worklist: &mut Vec<Value>) {
    match value {
        Value::Tuple(rc) => match Rc::try_unwrap(rc) {
            Ok(mut items) => worklist.extend(items.drain(..)),
            Err(_) => {}
        },
        Value::List(rc) => match Rc::try_unwrap(rc) {
            Ok(cell) => worklist.extend(cell.into_inner()),
            Err(_) => {}
        },
        Value::Set(rc) => match Rc::try_unwrap(rc) {
            Ok(cell) => worklist.extend(cell.into_inner()),
            Err(_) => {}
        },
        Value::FrozenSet(rc) => match Rc::try_unwrap(rc) {
            Ok(mut items) => worklist.extend(items.drain(..)),
            Err(_) => {}
        },
        Value::Dict(rc) => match Rc::try_unwrap(rc) {
            Ok(cell) => {
                let map = cell.into_inner();
                for (k, v) in map.into_entries() {
                    worklist.push(k);
                    worklist.push(v);
                }
            }
            Err(_) => {}
        },
        Value::Closure(rc) => match Rc::try_unwrap(rc) {
            Ok(closure) => {
                for cell in closure.cells {
                    match Rc::try_unwrap(cell) {
                        Ok(refcell) => worklist.push(refcell.into_inner()),
                        Err(_) => {}
                    }
                }
            }
            Err(_) => {}
        },
        Value::DataclassInstance(rc) => match Rc::try_unwrap(rc) {
            Ok(inst) => worklist.extend(inst.fields.into_inner()),
            Err(_) => {}
        },
        Value::Exception(rc) => match Rc::try_unwrap(rc) {
            Ok(exc) => {
                if let Ok(args) = Rc::try_unwrap(exc.args.into_inner()) {
                    worklist.extend(args);
                }
                if let Some(cause) = exc.cause.into_inner() {
                    worklist.push(cause);
                }
            }
            Err(_) => {}
        },
        // Non-container values, and containers with other live owners,
        // drop normally here: the `match` scrutinee went by value, so this
        // arm falls through to an ordinary (shallow) drop at end of scope.
        _ => {}
    }
}
