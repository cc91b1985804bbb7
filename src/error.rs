//! Fault and exception-class vocabulary for the Monty execution engine.
//!
//! `VmError` is the internal Rust-level fault type returned by fallible engine
//! operations (allocation, dispatch, argument binding, ...). At the boundary
//! between the interpreter and script-visible state, every `VmError` is
//! converted into a script-level [`crate::value::Exception`] carrying one of
//! the [`ExceptionClass`] names, exactly as `spec.md` §7 describes.

use thiserror::Error;

/// Internal engine fault. Every instruction dispatch, allocation, and
/// argument-binding step returns `VmResult<T>`; the interpreter converts a
/// `VmError` into a raised script exception before unwinding continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VmError {
    /// A resource limit configured on [`crate::limits::ResourceLimits`] was exceeded.
    #[error("memory limit exceeded: used {used} bytes, limit {limit} bytes")]
    MemoryLimitExceeded { used: u64, limit: u64 },

    /// `max_allocations` was exceeded.
    #[error("allocation limit exceeded: {count} allocations, limit {limit}")]
    AllocationLimitExceeded { count: u64, limit: u64 },

    /// `max_duration_secs` elapsed. Resolves `spec.md` §9 Open Question (a):
    /// wall-clock exhaustion is reported through the same fault path as a
    /// memory cap, not a distinct class (see `DESIGN.md`).
    #[error("wall-clock limit exceeded: ran for {elapsed_secs}s, limit {limit_secs}s")]
    DurationLimitExceeded { elapsed_secs: f64, limit_secs: f64 },

    /// `max_recursion_depth` was exceeded, either by frame call depth or by a
    /// structural operation (`eq`/`hash`/`repr`/iterative drop).
    #[error("recursion depth exceeded: depth {depth}, limit {limit}")]
    RecursionLimitExceeded { depth: u32, limit: u32 },

    /// Stack underflow in the bytecode interpreter (a compiler-contract
    /// violation, not a script-visible fault).
    #[error("operand stack underflow: needed {requested}, had {available}")]
    StackUnderflow { requested: usize, available: usize },

    /// Division or modulo by zero.
    #[error("division by zero")]
    ZeroDivision,

    /// Arithmetic/sequence-repeat overflow a host would surface as `OverflowError`.
    #[error("overflow in operation: {operation}")]
    Overflow { operation: String },

    /// A raised or propagating script-level exception, carried opaquely
    /// through the Rust error path so `?` composes with VmError-returning
    /// helpers; the payload is reconstructed into a real `Exception` value
    /// by the caller which already holds the class registry.
    #[error("{class}: {message}")]
    Raised { class: ExceptionClass, message: String },

    /// Host-raised error (signal handler, external call) that must propagate
    /// unchanged through the envelope.
    #[error("host error: {message}")]
    Host { message: String },
}

pub type VmResult<T> = Result<T, VmError>;

/// The exception classes the interpreter knows how to raise natively.
/// User-defined classes registered by the host round-trip as
/// `ExceptionClass::Custom(name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExceptionClass {
    TypeError,
    ValueError,
    AttributeError,
    KeyError,
    IndexError,
    ZeroDivisionError,
    OverflowError,
    MemoryError,
    RecursionError,
    KeyboardInterrupt,
    StopIteration,
    RuntimeError,
    Custom(String),
}

impl ExceptionClass {
    pub fn name(&self) -> &str {
        match self {
            Self::TypeError => "TypeError",
            Self::ValueError => "ValueError",
            Self::AttributeError => "AttributeError",
            Self::KeyError => "KeyError",
            Self::IndexError => "IndexError",
            Self::ZeroDivisionError => "ZeroDivisionError",
            Self::OverflowError => "OverflowError",
            Self::MemoryError => "MemoryError",
            Self::RecursionError => "RecursionError",
            Self::KeyboardInterrupt => "KeyboardInterrupt",
            Self::StopIteration => "StopIteration",
            Self::RuntimeError => "RuntimeError",
            Self::Custom(name) => name,
        }
    }

    /// Whether `except Exception:` (a bare catch-all, not `except
    /// BaseException:`) is permitted to intercept this class.
    ///
    /// `spec.md` §7: resource faults are not catchable by a bare
    /// `except Exception` suppressing the budget.
    pub fn is_catchable_by_exception(&self) -> bool {
        !matches!(
            self,
            Self::MemoryError | Self::RecursionError | Self::KeyboardInterrupt
        )
    }
}

impl std::fmt::Display for ExceptionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl VmError {
    pub fn raised(class: ExceptionClass, message: impl Into<String>) -> Self {
        Self::Raised { class, message: message.into() }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::raised(ExceptionClass::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::raised(ExceptionClass::ValueError, message)
    }

    pub fn attribute_error(message: impl Into<String>) -> Self {
        Self::raised(ExceptionClass::AttributeError, message)
    }

    pub fn key_error(message: impl Into<String>) -> Self {
        Self::raised(ExceptionClass::KeyError, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::raised(ExceptionClass::IndexError, message)
    }

    /// The exception class a host sees this fault surface as, once it
    /// crosses into script-visible territory.
    pub fn exception_class(&self) -> ExceptionClass {
        match self {
            Self::MemoryLimitExceeded { .. }
            | Self::AllocationLimitExceeded { .. }
            | Self::DurationLimitExceeded { .. } => ExceptionClass::MemoryError,
            Self::RecursionLimitExceeded { .. } => ExceptionClass::RecursionError,
            Self::StackUnderflow { .. } => ExceptionClass::RuntimeError,
            Self::ZeroDivision => ExceptionClass::ZeroDivisionError,
            Self::Overflow { .. } => ExceptionClass::OverflowError,
            Self::Raised { class, .. } => class.clone(),
            Self::Host { .. } => ExceptionClass::RuntimeError,
        }
    }

    /// Whether this fault represents a hard resource cap that a script
    /// `except Exception:` handler must not be able to swallow.
    pub fn is_hard_resource_fault(&self) -> bool {
        matches!(
            self,
            Self::MemoryLimitExceeded { .. }
                | Self::AllocationLimitExceeded { .. }
                | Self::DurationLimitExceeded { .. }
                | Self::RecursionLimitExceeded { .. }
        )
    }
}
