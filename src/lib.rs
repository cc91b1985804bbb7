//! Monty: an embeddable, sandboxed interpreter for a Python-like scripting
//! subset (`spec.md` §1 Overview).
//!
//! The crate is a library, not a CLI — the host embeds [`Monty`], registers
//! whatever external callables, dataclass shapes, and exception classes the
//! script needs, then hands it a compiled [`CodeObject`] to run under a
//! [`ResourceLimits`] budget. Parsing/compiling source text into a
//! `CodeObject` is out of scope (`spec.md` §1 Non-goals); tests build code
//! objects directly with [`bytecode::builder::CodeBuilder`].

pub mod bytecode;
pub mod dataclass;
pub mod error;
pub mod host;
pub mod interpreter;
pub mod limits;
pub mod scheduler;
pub mod value;

use bytecode::CodeObject;
use error::VmError;
use host::{AsyncHostFn, SyncHostFn};
use interpreter::Interpreter;
use limits::ResourceLimits;
use scheduler::{Coroutine, Scheduler};
use value::{RecursionGuard, Value};

use std::cell::RefCell;
use std::rc::Rc;

pub use bytecode::{CodeFlags, Instruction};
pub use bytecode::builder::CodeBuilder;
pub use dataclass::DataclassFactory;
pub use error::ExceptionClass;
pub use host::{Signal, SignalHandle};
pub use value::{Heap, Int};

/// An embeddable Monty engine configuration. Accumulates host registrations
/// (external callables, dataclass shapes, custom exception classes) before
/// [`Monty::run`] builds the one-shot [`Interpreter`] that actually executes
/// a [`CodeObject`].
///
/// A fresh [`Interpreter`]/[`Scheduler`] pair is built per `run()` call —
/// matching `spec.md` §5's "single `run()` call" lifecycle rather than
/// letting state leak between runs.
pub struct Monty {
    limits: ResourceLimits,
    sync_fns: Vec<(String, SyncHostFn)>,
    async_fns: Vec<(String, AsyncHostFn)>,
    dataclasses: Vec<DataclassFactory>,
    exception_classes: Vec<String>,
    signal_source: Rc<RefCell<Option<host::Signal>>>,
}

impl Monty {
    pub fn new() -> Self {
        Self::with_limits(ResourceLimits::new())
    }

    pub fn with_limits(limits: ResourceLimits) -> Self {
        Self {
            limits,
            sync_fns: Vec::new(),
            async_fns: Vec::new(),
            dataclasses: Vec::new(),
            exception_classes: Vec::new(),
            signal_source: Rc::new(RefCell::new(None)),
        }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// A handle external callables registered on this engine can clone into
    /// their closures to raise a signal (`spec.md` §4.E, §8 scenario 7) for
    /// delivery at the next instruction boundary of the `run()` currently in
    /// flight.
    pub fn signal_handle(&self) -> SignalHandle {
        SignalHandle::new(self.signal_source.clone())
    }

    /// Registers a synchronous external callable under `name` (`spec.md`
    /// §4.F "Host bridge").
    pub fn register_external(&mut self, name: impl Into<String>, f: SyncHostFn) {
        self.sync_fns.push((name.into(), f));
    }

    /// Registers an asynchronous external callable: `f` returns a future id
    /// immediately, and the host later resolves it via
    /// [`host::HostBridge::resolve_future`]/`fail_future` from outside
    /// script execution.
    pub fn register_external_async(&mut self, name: impl Into<String>, f: AsyncHostFn) {
        self.async_fns.push((name.into(), f));
    }

    /// Registers a dataclass shape the script can construct by name
    /// (`spec.md` §4.D "Dataclass factory protocol").
    pub fn register_dataclass_factory(&mut self, factory: DataclassFactory) {
        self.dataclasses.push(factory);
    }

    /// Pre-declares a custom exception class name, so `type(x) is MyError`
    /// holds stably even if the class is never actually raised before being
    /// referenced in an `except` clause.
    pub fn register_exception_class(&mut self, name: impl Into<String>) {
        self.exception_classes.push(name.into());
    }

    /// Runs `code` as the script's top-level module body to completion,
    /// under this engine's configured limits and registrations. Builds a
    /// fresh [`Interpreter`] and [`Scheduler`]; the implicit root task is
    /// `code` itself, matching `spec.md` §4.E's "implicit top-level task".
    pub fn run(&self, code: Rc<CodeObject>) -> Result<Value, MontyRuntimeError> {
        self.signal_source.borrow_mut().take();
        let mut interp = Interpreter::new(self.limits.clone());
        interp.host.adopt_signal_source(self.signal_source.clone());
        // Host externals, built-in/registered exception classes, and
        // registered dataclass shapes are all bound into the module's
        // global scope under their own name, the same way a top-level `def`
        // or `class` statement would bind one — `LoadGlobal` has no
        // separate fallback into any of these registries.
        let guard = RecursionGuard::new(None);
        for (name, f) in &self.sync_fns {
            interp.host.register_sync(name.clone(), f.clone());
            let callable = Value::BuiltinFunction(Rc::new(value::BuiltinFunction {
                name: Rc::from(name.as_str()),
                kind: value::BuiltinKind::HostSync(Rc::from(name.as_str())),
            }));
            interp.globals.borrow_mut().insert(Value::str(name.clone()), callable, &guard).expect("interning a function name never fails");
        }
        for (name, f) in &self.async_fns {
            interp.host.register_async(name.clone(), f.clone());
            let callable = Value::BuiltinFunction(Rc::new(value::BuiltinFunction {
                name: Rc::from(name.as_str()),
                kind: value::BuiltinKind::HostAsync(Rc::from(name.as_str())),
            }));
            interp.globals.borrow_mut().insert(Value::str(name.clone()), callable, &guard).expect("interning a function name never fails");
        }
        for (name, type_value) in interp.exception_types.builtins().collect::<Vec<_>>() {
            interp.globals.borrow_mut().insert(Value::str(name), Value::Type(type_value), &guard).expect("interning a class name never fails");
        }
        for factory in &self.dataclasses {
            let type_value = interp.dataclasses.register(
                &interp.heap,
                DataclassFactory { name: factory.name.clone(), fields: factory.fields.clone(), frozen: factory.frozen },
            );
            interp.globals.borrow_mut().insert(Value::str(factory.name.clone()), Value::Type(type_value), &guard).expect("interning a class name never fails");
        }
        for name in &self.exception_classes {
            let type_value = interp.exception_types.register_custom(&interp.heap, name);
            interp.globals.borrow_mut().insert(Value::str(name.clone()), Value::Type(type_value), &guard).expect("interning a class name never fails");
        }

        let mut scheduler = Scheduler::new();
        let root = scheduler.spawn(
            Coroutine { qualname: code.qualname.clone(), code: code.clone(), closure_cells: Vec::new(), bound_locals: Vec::new(), frames: Vec::new() },
            self.limits.max_recursion_depth,
        );

        loop {
            if let Some(result) = scheduler.result_of(root) {
                return match result.clone() {
                    Ok(v) => Ok(v),
                    Err(exc) => Err(MontyRuntimeError::new(exc)),
                };
            }
            let Some(runnable) = scheduler.next_ready() else {
                let deadlock = VmError::Host { message: "scheduler deadlock: no task is ready to run".into() };
                return Err(MontyRuntimeError::new(interp.fault_to_exception(&deadlock)));
            };
            if let Err(fault) = interp.run_task_slice(&mut scheduler, runnable) {
                return Err(MontyRuntimeError::new(interp.fault_to_exception(&fault)));
            }
        }
    }
}

impl Default for Monty {
    fn default() -> Self {
        Self::new()
    }
}

/// The error [`Monty::run`] returns when the script raises an exception that
/// escapes every frame, or an engine fault propagates out of the run. Wraps
/// the real [`Value::Exception`] so a host can inspect its class and args
/// rather than only a formatted message.
#[derive(Debug, Clone)]
pub struct MontyRuntimeError {
    exception: Value,
}

impl MontyRuntimeError {
    fn new(exception: Value) -> Self {
        Self { exception }
    }

    /// The raw exception value that escaped the run.
    pub fn exception(&self) -> &Value {
        &self.exception
    }
}

impl std::fmt::Display for MontyRuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = RecursionGuard::new(None);
        match &self.exception {
            Value::Exception(exc) => {
                let message = exc
                    .args
                    .borrow()
                    .first()
                    .map(|a| value::hashing::str_value(a, &guard).unwrap_or_default())
                    .unwrap_or_default();
                write!(f, "{}: {message}", exc.class.name)
            }
            other => write!(f, "{}", value::hashing::repr_value(other, &guard).unwrap_or_default()),
        }
    }
}

impl std::error::Error for MontyRuntimeError {}
