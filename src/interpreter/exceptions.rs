//! Block-stack exception unwinding (`spec.md` §4.D "Exception model").
//!
//! A simplified, CPython-pre-3.11-style block-stack model: `SetupTry` pushes
//! a `Handler` recording where the except-chain begins and how deep the
//! operand stack was; unwinding truncates the stack back to that depth and
//! jumps there with the exception value on top, where compiled
//! `MatchException`/`JumpIfFalse` chains test it against each `except`
//! clause in turn. Simpler than a full exception table, and sufficient
//! since the compiler producing this bytecode is out of scope — only
//! `bytecode::builder::CodeBuilder` (test fixtures) ever emits it.

use crate::error::{ExceptionClass, VmError};
use crate::value::{ExceptionValue, Heap, TypeKind, TypeValue, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// One active `try` block on a frame's handler stack.
#[derive(Debug, Clone)]
pub struct Handler {
    /// Instruction index where the except-chain (or finally body) begins.
    pub target_ip: usize,
    /// Operand stack depth to truncate back to before jumping to `target_ip`.
    pub stack_depth: usize,
}

/// Registry of the built-in exception classes (`spec.md` §7), plus any
/// custom classes a script or host introduces. Exists so every raised
/// `TypeError` (say) shares one stable `Type` identity, the way `type(x) is
/// TypeError` must hold regardless of which call site raised it.
pub struct ExceptionTypeRegistry {
    builtins: HashMap<&'static str, Rc<TypeValue>>,
    custom: RefCell<HashMap<String, Rc<TypeValue>>>,
}

impl ExceptionTypeRegistry {
    pub fn new(heap: &Heap) -> Self {
        const NAMES: &[&str] = &[
            "TypeError",
            "ValueError",
            "AttributeError",
            "KeyError",
            "IndexError",
            "ZeroDivisionError",
            "OverflowError",
            "MemoryError",
            "RecursionError",
            "KeyboardInterrupt",
            "StopIteration",
            "RuntimeError",
        ];
        let mut builtins = HashMap::new();
        for name in NAMES {
            builtins.insert(
                *name,
                Rc::new(TypeValue { name: (*name).to_string(), id: heap.register(), kind: TypeKind::Exception }),
            );
        }
        Self { builtins, custom: RefCell::new(HashMap::new()) }
    }

    pub fn get(&self, class: &ExceptionClass) -> Rc<TypeValue> {
        match class {
            ExceptionClass::Custom(name) => self.custom_or_register(name),
            other => self.builtins.get(other.name()).cloned().expect("all built-in classes pre-registered"),
        }
    }

    pub fn by_name(&self, name: &str) -> Option<Rc<TypeValue>> {
        self.builtins.get(name).cloned().or_else(|| self.custom.borrow().get(name).cloned())
    }

    /// Every pre-registered built-in class and its `TypeValue`, for binding
    /// into a fresh module's global scope before a script runs.
    pub fn builtins(&self) -> impl Iterator<Item = (&'static str, Rc<TypeValue>)> + '_ {
        self.builtins.iter().map(|(name, t)| (*name, t.clone()))
    }

    fn custom_or_register(&self, name: &str) -> Rc<TypeValue> {
        if let Some(existing) = self.custom.borrow().get(name) {
            return existing.clone();
        }
        // Host-registered custom exception classes are expected to come in
        // through `Monty::register_exception_class` before `run()`; a name
        // that never went through that path still gets a usable, stably
        // identified type here rather than failing construction.
        let type_value = Rc::new(TypeValue { name: name.to_string(), id: 0, kind: TypeKind::Exception });
        self.custom.borrow_mut().insert(name.to_string(), type_value.clone());
        type_value
    }

    pub fn register_custom(&self, heap: &Heap, name: &str) -> Rc<TypeValue> {
        let type_value = Rc::new(TypeValue { name: name.to_string(), id: heap.register(), kind: TypeKind::Exception });
        self.custom.borrow_mut().insert(name.to_string(), type_value.clone());
        type_value
    }
}

/// Builds a fresh `Value::Exception` for an internal engine fault
/// (`spec.md` §4.D, §7). Every such fault carries exactly one string
/// argument; faults that need richer payloads are instead raised directly
/// as an already-constructed `Value::Exception` via a `Raise` instruction
/// and never pass through this path.
pub fn fault_to_exception(registry: &ExceptionTypeRegistry, err: &VmError) -> Value {
    let class = err.exception_class();
    let message = err.to_string();
    let type_value = registry.get(&class);
    Value::Exception(Rc::new(ExceptionValue {
        class: type_value,
        args: RefCell::new(Rc::new(vec![Value::str(message)])),
        cause: RefCell::new(None),
        traceback: RefCell::new(Vec::new()),
    }))
}

/// The inverse conversion, used when an exception that escaped every frame
/// must be reported back through a `VmResult`-returning boundary (e.g. the
/// scheduler's `drain_until_done`). Lossy for custom exception classes with
/// non-string args beyond the first, which is acceptable here: the caller
/// only needs the class and a display message, the full `Value::Exception`
/// is what actually reaches `MontyRuntimeError::exception()`.
pub fn exception_to_fault(exc: &Value) -> VmError {
    match exc {
        Value::Exception(e) => {
            let class = match e.class.name.as_str() {
                "TypeError" => ExceptionClass::TypeError,
                "ValueError" => ExceptionClass::ValueError,
                "AttributeError" => ExceptionClass::AttributeError,
                "KeyError" => ExceptionClass::KeyError,
                "IndexError" => ExceptionClass::IndexError,
                "ZeroDivisionError" => ExceptionClass::ZeroDivisionError,
                "OverflowError" => ExceptionClass::OverflowError,
                "MemoryError" => ExceptionClass::MemoryError,
                "RecursionError" => ExceptionClass::RecursionError,
                "KeyboardInterrupt" => ExceptionClass::KeyboardInterrupt,
                "StopIteration" => ExceptionClass::StopIteration,
                "RuntimeError" => ExceptionClass::RuntimeError,
                other => ExceptionClass::Custom(other.to_string()),
            };
            let message = e.args.borrow().first().map(|a| format!("{a:?}")).unwrap_or_default();
            VmError::raised(class, message)
        }
        other => VmError::Host { message: format!("non-exception value propagated: {other:?}") },
    }
}

/// Whether `exc` matches the class named by `candidate` (a `Value::Type`
/// with `TypeKind::Exception`), as tested by a compiled `except` clause.
pub fn exception_matches(exc: &ExceptionValue, candidate: &Value) -> bool {
    match candidate {
        Value::Type(t) => Rc::ptr_eq(&exc.class, t) || exc.class.name == t.name,
        _ => false,
    }
}
