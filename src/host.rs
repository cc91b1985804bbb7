//! Host bridge: external callables, futures, and signal delivery
//! (`spec.md` §4.F, §5 "Signals").
//!
//! Named after, and filling the same role as, the grounding crate's
//! `interop_service.rs` (syscalls bridging the VM to host-provided Neo
//! blockchain services) — here the "syscalls" are host functions the
//! embedder registers by name, synchronous or asynchronous.

use crate::error::{VmError, VmResult};
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

/// A synchronous external callable: runs to completion on the spot.
pub type SyncHostFn = Rc<dyn Fn(&[Value]) -> VmResult<Value>>;

/// An asynchronous external callable: returns a future id immediately; the
/// host resolves it later (possibly from another thread, handed back in via
/// [`HostBridge::resolve_future`]) while the interpreter's task is parked.
pub type AsyncHostFn = Rc<dyn Fn(&[Value]) -> VmResult<u64>>;

/// The value produced when `await`ing a host-bridged external call.
#[derive(Debug, Clone)]
pub enum FutureState {
    Pending,
    Resolved(Value),
    Failed(Value),
}

#[derive(Debug, Clone)]
pub struct FutureValue {
    pub id: u64,
    pub state: FutureState,
}

/// A host-delivered signal (`spec.md` §4.E "Signal delivery"). Checked only
/// at instruction boundaries and suspension points, never mid-instruction,
/// so `try/finally` sees well-defined behavior even under `SIGINT`.
#[derive(Debug, Clone)]
pub enum Signal {
    /// Default `SIGINT` handling: the script sees `KeyboardInterrupt`.
    KeyboardInterrupt,
    /// A host-registered signal handler chose to raise something else
    /// (`spec.md` §8 scenario 7: `ValueError('potato')`).
    Raised(Value),
}

/// A shared handle a host-registered callable can close over to schedule a
/// signal for delivery at the next instruction boundary (`spec.md` §4.E
/// "Signal delivery"). Cheap to clone; every clone shares the same slot.
///
/// Signals cannot be delivered from another OS thread the way `SIGINT`
/// normally would be — nothing in this crate is `Send` (`spec.md` §5) — so
/// delivery is necessarily reentrant: a registered external callable raises
/// through its own `SignalHandle` while it is itself being called from
/// inside `run()`, and the interpreter observes it at the next boundary.
#[derive(Clone)]
pub struct SignalHandle(Rc<RefCell<Option<Signal>>>);

impl SignalHandle {
    pub(crate) fn new(source: Rc<RefCell<Option<Signal>>>) -> Self {
        Self(source)
    }

    pub fn raise(&self, signal: Signal) {
        *self.0.borrow_mut() = Some(signal);
    }

    pub fn raise_keyboard_interrupt(&self) {
        self.raise(Signal::KeyboardInterrupt);
    }
}

/// Registry of host-registered callables, pending futures, and the one
/// outstanding signal slot. Owned by the engine for the lifetime of one
/// `run()`.
pub struct HostBridge {
    sync_fns: HashMap<String, SyncHostFn>,
    async_fns: HashMap<String, AsyncHostFn>,
    futures: RefCell<HashMap<u64, FutureState>>,
    next_future_id: Cell<u64>,
    pending_signal: Rc<RefCell<Option<Signal>>>,
}

impl HostBridge {
    pub fn new() -> Self {
        Self {
            sync_fns: HashMap::new(),
            async_fns: HashMap::new(),
            futures: RefCell::new(HashMap::new()),
            next_future_id: Cell::new(0),
            pending_signal: Rc::new(RefCell::new(None)),
        }
    }

    /// A handle the embedder can clone into a registered external callable
    /// so it can raise a signal for delivery at the next instruction
    /// boundary, from inside a call that is itself reentering `run()`.
    pub fn signal_handle(&self) -> SignalHandle {
        SignalHandle(self.pending_signal.clone())
    }

    /// Replaces this bridge's signal slot with one the embedder already
    /// holds a [`SignalHandle`] for, so a callable registered before this
    /// `run()` started can still reach the slot this particular run checks.
    pub fn adopt_signal_source(&mut self, source: Rc<RefCell<Option<Signal>>>) {
        self.pending_signal = source;
    }

    pub fn register_sync(&mut self, name: impl Into<String>, f: SyncHostFn) {
        self.sync_fns.insert(name.into(), f);
    }

    pub fn register_async(&mut self, name: impl Into<String>, f: AsyncHostFn) {
        self.async_fns.insert(name.into(), f);
    }

    pub fn call_sync(&self, name: &str, args: &[Value]) -> VmResult<Value> {
        let f = self
            .sync_fns
            .get(name)
            .ok_or_else(|| VmError::Host { message: format!("no host function registered as '{name}'") })?;
        f(args)
    }

    /// Starts an async host call; returns the fresh future id the
    /// interpreter should suspend the current task on.
    pub fn call_async(&self, name: &str, args: &[Value]) -> VmResult<u64> {
        let f = self
            .async_fns
            .get(name)
            .ok_or_else(|| VmError::Host { message: format!("no host function registered as '{name}'") })?;
        let id = f(args)?;
        self.futures.borrow_mut().entry(id).or_insert(FutureState::Pending);
        Ok(id)
    }

    pub fn new_future(&self) -> u64 {
        let id = self.next_future_id.get();
        self.next_future_id.set(id + 1);
        self.futures.borrow_mut().insert(id, FutureState::Pending);
        id
    }

    /// Called by the host (from outside script execution, e.g. after an I/O
    /// callback completes) to resolve a pending future.
    pub fn resolve_future(&self, id: u64, value: Value) {
        self.futures.borrow_mut().insert(id, FutureState::Resolved(value));
    }

    pub fn fail_future(&self, id: u64, exception: Value) {
        self.futures.borrow_mut().insert(id, FutureState::Failed(exception));
    }

    pub fn future_state(&self, id: u64) -> Option<FutureState> {
        self.futures.borrow().get(&id).cloned()
    }

    /// Raises `KeyboardInterrupt` (or a custom handler result) the next time
    /// the interpreter checks for a pending signal.
    pub fn raise_signal(&self, signal: Signal) {
        *self.pending_signal.borrow_mut() = Some(signal);
    }

    /// Takes the pending signal, if any, clearing it. Called only at
    /// instruction boundaries and suspension points (`spec.md` §9).
    pub fn take_pending_signal(&self) -> Option<Signal> {
        self.pending_signal.borrow_mut().take()
    }
}

impl Default for HostBridge {
    fn default() -> Self {
        Self::new()
    }
}
