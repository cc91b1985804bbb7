//! Centralized resource accounting for a single engine run (`spec.md` §4.C).
//!
//! Every allocation and every instruction boundary passes through a
//! `LimitTracker`; this mirrors the grounding VM's habit of threading a single
//! accounting object (there, a reference counter plus gas calculator) through
//! the execution engine rather than scattering bookkeeping across call sites.

use crate::error::{VmError, VmResult};
use std::time::Instant;

/// Host-configurable resource caps. Every field is optional; `None` disables
/// that particular cap. Mirrors the five named fields of `spec.md` §4.C.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceLimits {
    pub max_allocations: Option<u64>,
    pub max_duration_secs: Option<f64>,
    pub max_memory: Option<u64>,
    pub gc_interval: Option<u64>,
    pub max_recursion_depth: Option<u32>,
}

impl ResourceLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_allocations(mut self, v: u64) -> Self {
        self.max_allocations = Some(v);
        self
    }

    pub fn with_max_duration_secs(mut self, v: f64) -> Self {
        self.max_duration_secs = Some(v);
        self
    }

    pub fn with_max_memory(mut self, v: u64) -> Self {
        self.max_memory = Some(v);
        self
    }

    pub fn with_gc_interval(mut self, v: u64) -> Self {
        self.gc_interval = Some(v);
        self
    }

    pub fn with_max_recursion_depth(mut self, v: u32) -> Self {
        self.max_recursion_depth = Some(v);
        self
    }

    /// Returns the current value of a named field, or `None` if unset/unknown.
    /// Matches `original_source`'s `ResourceLimits.get(name)`.
    pub fn get(&self, name: &str) -> Option<LimitValue> {
        match name {
            "max_allocations" => self.max_allocations.map(LimitValue::U64),
            "max_duration_secs" => self.max_duration_secs.map(LimitValue::F64),
            "max_memory" => self.max_memory.map(LimitValue::U64),
            "gc_interval" => self.gc_interval.map(LimitValue::U64),
            "max_recursion_depth" => self.max_recursion_depth.map(LimitValue::U32),
            _ => None,
        }
    }
}

/// A limit's value, returned by [`ResourceLimits::get`] without committing to
/// one numeric type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimitValue {
    U64(u64),
    U32(u32),
    F64(f64),
}

impl std::fmt::Display for LimitValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::U64(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
        }
    }
}

/// `repr`s only the fields the host actually set, as a mapping literal —
/// matches `original_source`'s `test_resource_limits_repr`
/// (`"{'max_duration_secs': 1.0}"`).
impl std::fmt::Display for ResourceLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut fields = Vec::new();
        if let Some(v) = self.max_allocations {
            fields.push(format!("'max_allocations': {v}"));
        }
        if let Some(v) = self.max_duration_secs {
            fields.push(format!("'max_duration_secs': {v}"));
        }
        if let Some(v) = self.max_memory {
            fields.push(format!("'max_memory': {v}"));
        }
        if let Some(v) = self.gc_interval {
            fields.push(format!("'gc_interval': {v}"));
        }
        if let Some(v) = self.max_recursion_depth {
            fields.push(format!("'max_recursion_depth': {v}"));
        }
        write!(f, "{{{}}}", fields.join(", "))
    }
}

/// Per-engine-run accountant. Not `Clone`/`Send`: a single run owns one
/// tracker, consulted from the (single-threaded) interpreter only.
pub struct LimitTracker {
    limits: ResourceLimits,
    allocations: u64,
    memory_used: u64,
    instructions_since_gc: u64,
    start: Instant,
}

impl LimitTracker {
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            allocations: 0,
            memory_used: 0,
            instructions_since_gc: 0,
            start: Instant::now(),
        }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn memory_used(&self) -> u64 {
        self.memory_used
    }

    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Charges `bytes` against `max_memory` and bumps the allocation count
    /// against `max_allocations`. Must be called before the new value
    /// becomes observable to the script (`spec.md` §3 invariant 5).
    pub fn charge_alloc(&mut self, bytes: u64) -> VmResult<()> {
        if let Some(max) = self.limits.max_allocations {
            if self.allocations >= max {
                return Err(VmError::AllocationLimitExceeded { count: self.allocations + 1, limit: max });
            }
        }
        if let Some(max) = self.limits.max_memory {
            let projected = self.memory_used + bytes;
            if projected > max {
                return Err(VmError::MemoryLimitExceeded { used: projected, limit: max });
            }
        }
        self.allocations += 1;
        self.memory_used += bytes;
        Ok(())
    }

    /// Credits `bytes` back on free (container drop, string release, ...).
    pub fn charge_free(&mut self, bytes: u64) {
        self.memory_used = self.memory_used.saturating_sub(bytes);
    }

    /// Predicts the byte cost of a bulk allocation (`pow`, `<<`, sequence
    /// `mul`) *before* performing it, so a huge result fails fast rather than
    /// after the allocation already happened (`spec.md` §4.C).
    pub fn check_predicted_bytes(&self, predicted_bytes: u64) -> VmResult<()> {
        if let Some(max) = self.limits.max_memory {
            let projected = self.memory_used + predicted_bytes;
            if projected > max {
                return Err(VmError::MemoryLimitExceeded { used: projected, limit: max });
            }
        }
        Ok(())
    }

    /// Called at each instruction boundary and suspension point to check the
    /// wall-clock cap and run a periodic sweep.
    pub fn tick(&mut self, instr_count: u64) -> VmResult<()> {
        self.instructions_since_gc += instr_count;
        if let Some(max_secs) = self.limits.max_duration_secs {
            let elapsed = self.start.elapsed().as_secs_f64();
            if elapsed > max_secs {
                return Err(VmError::DurationLimitExceeded { elapsed_secs: elapsed, limit_secs: max_secs });
            }
        }
        if let Some(interval) = self.limits.gc_interval {
            if interval > 0 && self.instructions_since_gc >= interval {
                self.instructions_since_gc = 0;
                log::trace!("LimitTracker: opportunistic sweep at instruction boundary");
            }
        }
        Ok(())
    }

    /// Called on frame push; must be paired with `leave_frame` on pop.
    pub fn enter_frame(&self, current_depth: u32) -> VmResult<()> {
        self.check_depth(current_depth)
    }

    pub fn leave_frame(&self) {}

    /// Checks an arbitrary recursion depth (frame call depth, or a
    /// structural-operation depth counter) against `max_recursion_depth`.
    pub fn check_depth(&self, depth: u32) -> VmResult<()> {
        if let Some(max) = self.limits.max_recursion_depth {
            if depth > max {
                return Err(VmError::RecursionLimitExceeded { depth, limit: max });
            }
        }
        Ok(())
    }
}
