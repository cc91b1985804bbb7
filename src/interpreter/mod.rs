//! Frame stack and instruction dispatch (`spec.md` §4.D).
//!
//! Mirrors the shape of the grounding crate's `execution_engine.rs`
//! (state + jump table + limits + reference counter + invocation stack) but
//! dispatches a flat `Instruction` enum directly via `match` instead of
//! through a registered-handler jump table, since there is no byte-encoded
//! opcode to look up (`bytecode` module doc comment).

pub mod call;
pub mod exceptions;

use crate::bytecode::{CodeObject, Instruction};
use crate::dataclass::DataclassRegistry;
use crate::error::{VmError, VmResult};
use crate::host::{HostBridge, Signal};
use crate::limits::{LimitTracker, ResourceLimits};
use crate::scheduler::{gather, BlockedOn, Coroutine, Scheduler, TaskId};
use crate::value::{container, Closure, FunctionValue, Heap, Int, RecursionGuard, TypeKind, ValueMap, Value};
use exceptions::{ExceptionTypeRegistry, Handler};
use std::cell::RefCell;
use std::rc::Rc;

/// One activation record. `locals` holds plain function-local slots;
/// `cells` holds the separate, always-boxed slots a closure captures —
/// keeping the two arrays distinct avoids the aliasing that would otherwise
/// arise from a parameter being both a fast local and a captured variable.
#[derive(Debug)]
pub struct Frame {
    pub code: Rc<CodeObject>,
    pub qualname: String,
    pub ip: usize,
    pub stack: Vec<Value>,
    pub locals: Vec<Value>,
    pub cells: Vec<Rc<RefCell<Value>>>,
    pub handlers: Vec<Handler>,
    pub exc_info: Vec<Value>,
    /// Set by a single-value `Await` when it suspends; consumed at the top
    /// of the instruction loop, before the next instruction fetch, once the
    /// scheduler judges this frame's task ready again.
    pub pending_await: Option<PendingAwait>,
    /// Set by `Gather` when it suspends; the task ids it is waiting on. By
    /// the time the scheduler makes this task ready again, every id in here
    /// is guaranteed `Done` (`Scheduler::wake_dependents` only wakes a
    /// `BlockedOn::Tasks` waiter once all of them finish).
    pub pending_gather: Option<Vec<TaskId>>,
}

impl Frame {
    pub fn new(code: Rc<CodeObject>, qualname: String, locals: Vec<Value>, cells: Vec<Rc<RefCell<Value>>>) -> Self {
        Self {
            code,
            qualname,
            ip: 0,
            stack: Vec::new(),
            locals,
            cells,
            handlers: Vec::new(),
            exc_info: Vec::new(),
            pending_await: None,
            pending_gather: None,
        }
    }

    fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or_else(|| VmError::StackUnderflow { requested: 1, available: 0 })
    }

    fn pop_n(&mut self, n: usize) -> VmResult<Vec<Value>> {
        if self.stack.len() < n {
            return Err(VmError::StackUnderflow { requested: n, available: self.stack.len() });
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }
}

/// What a suspended single-value `Await` is waiting on, recorded on the
/// frame so `run_frames` knows how to resolve it once the scheduler makes
/// this task ready again.
#[derive(Debug, Clone, Copy)]
pub enum PendingAwait {
    HostFuture(u64),
    Task(TaskId),
}

/// Outcome of driving a task's frame stack until it either finishes or
/// needs to suspend.
pub enum FrameStackOutcome {
    Returned(Value),
    Raised(Value),
    Suspended,
}

/// Owns everything shared by every task in one `run()`: the heap, the
/// resource accountant, globals, the host bridge, and the dataclass/
/// exception-class registries. Not `Clone`/`Send` — a single run owns one
/// interpreter, driven from one thread (`spec.md` §5).
pub struct Interpreter {
    pub heap: Heap,
    pub limits: LimitTracker,
    pub globals: Rc<RefCell<ValueMap>>,
    pub host: HostBridge,
    pub dataclasses: DataclassRegistry,
    pub exception_types: ExceptionTypeRegistry,
}

impl Interpreter {
    pub fn new(limits: ResourceLimits) -> Self {
        let heap = Heap::new();
        let exception_types = ExceptionTypeRegistry::new(&heap);
        Self {
            heap,
            limits: LimitTracker::new(limits),
            globals: Rc::new(RefCell::new(ValueMap::new())),
            host: HostBridge::new(),
            dataclasses: DataclassRegistry::new(),
            exception_types,
        }
    }

    pub fn fault_to_exception(&self, err: &VmError) -> Value {
        exceptions::fault_to_exception(&self.exception_types, err)
    }

    pub fn exception_to_fault(&self, exc: &Value) -> VmError {
        exceptions::exception_to_fault(exc)
    }

    /// Runs `task_id` until it finishes, suspends, or faults. Re-entered by
    /// [`crate::scheduler::drain_until_done`] each time the scheduler judges
    /// the task ready.
    pub fn run_task_slice(&mut self, scheduler: &mut Scheduler, task_id: TaskId) -> VmResult<()> {
        let guard = scheduler.task(task_id).expect("task id must be valid").guard.clone();
        let coroutine_rc = scheduler.task(task_id).expect("task id must be valid").coroutine.clone();

        {
            let mut coroutine = coroutine_rc.borrow_mut();
            if coroutine.frames.is_empty() {
                let locals = pad_locals(coroutine.bound_locals.clone(), &coroutine.code);
                let frame = Frame::new(coroutine.code.clone(), coroutine.qualname.clone(), locals, coroutine.closure_cells.clone());
                coroutine.frames.push(frame);
            }
        }

        let outcome = {
            let mut coroutine = coroutine_rc.borrow_mut();
            self.run_frames(&mut coroutine.frames, &guard, scheduler, task_id)?
        };

        match outcome {
            FrameStackOutcome::Returned(v) => {
                log::debug!("task {task_id}: returned");
                scheduler.mark_done(task_id, Ok(v));
            }
            FrameStackOutcome::Raised(exc) => {
                log::debug!("task {task_id}: raised and unwound to the top");
                scheduler.mark_done(task_id, Err(exc));
            }
            FrameStackOutcome::Suspended => log::trace!("task {task_id}: suspended"),
        }
        Ok(())
    }

    /// The core dispatch loop: executes instructions from `frames.last()`
    /// until the whole call stack returns, an exception escapes every
    /// frame, or the task suspends on an `await`/`gather`.
    fn run_frames(
        &mut self,
        frames: &mut Vec<Frame>,
        guard: &RecursionGuard,
        scheduler: &mut Scheduler,
        task_id: TaskId,
    ) -> VmResult<FrameStackOutcome> {
        'outer: loop {
            if frames.is_empty() {
                return Ok(FrameStackOutcome::Returned(Value::None));
            }

            // Resume-value delivery: a `Gather` that suspended is resolved
            // first (ids are guaranteed finished, see `pending_gather`'s
            // doc comment), then a plain single-value `await` resume.
            if let Some(task_ids) = frames.last_mut().unwrap().pending_gather.take() {
                match gather::collect_results(scheduler, &task_ids) {
                    Ok(v) => {
                        frames.last_mut().unwrap().stack.push(v);
                        continue 'outer;
                    }
                    Err(exc) => {
                        if !self.unwind(frames, exc.clone()) {
                            return Ok(FrameStackOutcome::Raised(exc));
                        }
                        continue 'outer;
                    }
                }
            }
            if let Some(pending) = frames.last_mut().unwrap().pending_await.take() {
                let result = match pending {
                    PendingAwait::HostFuture(id) => match self.host.future_state(id) {
                        Some(crate::host::FutureState::Resolved(v)) => Ok(v),
                        Some(crate::host::FutureState::Failed(exc)) => Err(exc),
                        _ => {
                            // Still pending: the scheduler shouldn't have
                            // woken this task, but re-block rather than spin.
                            frames.last_mut().unwrap().pending_await = Some(pending);
                            return Ok(FrameStackOutcome::Suspended);
                        }
                    },
                    PendingAwait::Task(child_id) => match scheduler.result_of(child_id).cloned() {
                        Some(result) => result,
                        None => {
                            frames.last_mut().unwrap().pending_await = Some(pending);
                            return Ok(FrameStackOutcome::Suspended);
                        }
                    },
                };
                match result {
                    Ok(v) => {
                        frames.last_mut().unwrap().stack.push(v);
                        continue 'outer;
                    }
                    Err(exc) => {
                        if !self.unwind(frames, exc.clone()) {
                            return Ok(FrameStackOutcome::Raised(exc));
                        }
                        continue 'outer;
                    }
                }
            }

            self.limits.check_depth(frames.len() as u32)?;
            self.limits.tick(1)?;
            if let Some(signal) = self.host.take_pending_signal() {
                let exc = self.signal_to_exception(signal);
                if !self.unwind(frames, exc.clone()) {
                    return Ok(FrameStackOutcome::Raised(exc));
                }
                continue 'outer;
            }

            let frame = frames.last_mut().unwrap();
            if frame.ip >= frame.code.instructions.len() {
                // Falling off the end without an explicit return: yields
                // `None`, matching a bare function body with no `return`.
                let value = Value::None;
                frames.pop();
                if let Some(caller) = frames.last_mut() {
                    caller.stack.push(value);
                    continue 'outer;
                }
                return Ok(FrameStackOutcome::Returned(value));
            }
            let instr = frame.code.instructions[frame.ip].clone();
            frame.ip += 1;

            match self.execute(frames, guard, scheduler, task_id, &instr) {
                Ok(StepOutcome::Continue) => continue 'outer,
                Ok(StepOutcome::Return(value)) => {
                    frames.pop();
                    if let Some(caller) = frames.last_mut() {
                        caller.stack.push(value);
                        continue 'outer;
                    }
                    return Ok(FrameStackOutcome::Returned(value));
                }
                Ok(StepOutcome::EnterFrame(new_frame)) => {
                    frames.push(*new_frame);
                    continue 'outer;
                }
                Ok(StepOutcome::Suspend) => return Ok(FrameStackOutcome::Suspended),
                Ok(StepOutcome::RaiseValue(exc)) => {
                    if !self.unwind(frames, exc.clone()) {
                        return Ok(FrameStackOutcome::Raised(exc));
                    }
                    continue 'outer;
                }
                Err(fault) => {
                    let exc = self.fault_to_exception(&fault);
                    if fault.is_hard_resource_fault() {
                        // `spec.md` §7: hard resource faults cannot be
                        // swallowed by a script `except Exception:` — skip
                        // every handler and propagate straight out.
                        log::warn!("task {task_id}: hard resource fault {fault}, bypassing handlers");
                        return Ok(FrameStackOutcome::Raised(exc));
                    }
                    if !self.unwind(frames, exc.clone()) {
                        return Ok(FrameStackOutcome::Raised(exc));
                    }
                    continue 'outer;
                }
            }
        }
    }

    fn signal_to_exception(&self, signal: Signal) -> Value {
        match signal {
            Signal::KeyboardInterrupt => {
                self.fault_to_exception(&VmError::raised(crate::error::ExceptionClass::KeyboardInterrupt, "".to_string()))
            }
            Signal::Raised(value) => value,
        }
    }

    /// Pops handler frames (innermost try block outward, across frames if
    /// necessary) until one accepts `exc`, truncating the operand stack and
    /// jumping to the handler's except-chain. Returns `false` if the
    /// exception escapes every frame.
    fn unwind(&mut self, frames: &mut Vec<Frame>, exc: Value) -> bool {
        loop {
            let Some(frame) = frames.last_mut() else { return false };
            if let Some(handler) = frame.handlers.pop() {
                frame.stack.truncate(handler.stack_depth);
                frame.stack.push(exc);
                frame.ip = handler.target_ip;
                return true;
            }
            frames.pop();
            if frames.is_empty() {
                return false;
            }
        }
    }

    fn execute(
        &mut self,
        frames: &mut Vec<Frame>,
        guard: &RecursionGuard,
        scheduler: &mut Scheduler,
        task_id: TaskId,
        instr: &Instruction,
    ) -> VmResult<StepOutcome> {
        use Instruction::*;
        let frame = frames.last_mut().unwrap();
        match instr {
            LoadConst(idx) => {
                frame.stack.push(frame.code.consts[*idx as usize].clone());
            }
            LoadLocal(idx) => {
                frame.stack.push(frame.locals[*idx as usize].clone());
            }
            StoreLocal(idx) => {
                frame.locals[*idx as usize] = frame.pop()?;
            }
            LoadCell(idx) => {
                frame.stack.push(frame.cells[*idx as usize].borrow().clone());
            }
            StoreCell(idx) => {
                let v = frame.pop()?;
                *frame.cells[*idx as usize].borrow_mut() = v;
            }
            LoadGlobal(idx) => {
                let name = frame.code.names[*idx as usize].clone();
                let value = self
                    .globals
                    .borrow()
                    .get(&Value::str(name.clone()), guard)?
                    .ok_or_else(|| VmError::raised(crate::error::ExceptionClass::RuntimeError, format!("name '{name}' is not defined")))?;
                frame.stack.push(value);
            }
            StoreGlobal(idx) => {
                let name = frame.code.names[*idx as usize].clone();
                let v = frame.pop()?;
                self.globals.borrow_mut().insert(Value::str(name), v, guard)?;
            }
            LoadAttr(idx) => {
                let name = frame.code.names[*idx as usize].clone();
                let obj = frame.pop()?;
                let value = obj.get_attr_str(&name, &self.heap)?;
                frame.stack.push(value);
            }
            StoreAttr(idx) => {
                let name = frame.code.names[*idx as usize].clone();
                let value = frame.pop()?;
                let obj = frame.pop()?;
                obj.set_attr(&name, value)?;
            }
            LoadSubscr => {
                let index = frame.pop()?;
                let obj = frame.pop()?;
                frame.stack.push(container::get_item(&obj, &index, guard)?);
            }
            StoreSubscr => {
                let index = frame.pop()?;
                let obj = frame.pop()?;
                let value = frame.pop()?;
                container::set_item(&obj, &index, value, guard)?;
            }
            DeleteSubscr => {
                let index = frame.pop()?;
                let obj = frame.pop()?;
                if let Value::Dict(d) = &obj {
                    d.borrow_mut().remove(&index, guard)?;
                } else if let Value::List(items) = &obj {
                    let Value::Int(i) = &index else {
                        return Err(VmError::type_error("list indices must be integers"));
                    };
                    use num_traits::ToPrimitive;
                    let idx = i.to_bigint().to_usize().ok_or_else(|| VmError::index_error("index out of range"))?;
                    let mut items = items.borrow_mut();
                    if idx >= items.len() {
                        return Err(VmError::index_error("list assignment index out of range"));
                    }
                    items.remove(idx);
                } else {
                    return Err(VmError::type_error(format!("'{}' object doesn't support item deletion", obj.type_name())));
                }
            }
            Pop => {
                frame.pop()?;
            }
            Dup => {
                let top = frame.stack.last().cloned().ok_or(VmError::StackUnderflow { requested: 1, available: 0 })?;
                frame.stack.push(top);
            }
            Swap => {
                let len = frame.stack.len();
                if len < 2 {
                    return Err(VmError::StackUnderflow { requested: 2, available: len });
                }
                frame.stack.swap(len - 1, len - 2);
            }
            RotThree => {
                let len = frame.stack.len();
                if len < 3 {
                    return Err(VmError::StackUnderflow { requested: 3, available: len });
                }
                frame.stack[len - 3..].rotate_right(1);
            }
            BuildTuple(n) => {
                let items = frame.pop_n(*n as usize)?;
                self.limits.charge_alloc(container_bytes(items.len()))?;
                frame.stack.push(Value::Tuple(Rc::new(items)));
            }
            BuildList(n) => {
                let items = frame.pop_n(*n as usize)?;
                self.limits.charge_alloc(container_bytes(items.len()))?;
                frame.stack.push(Value::List(Rc::new(RefCell::new(items))));
            }
            BuildSet(n) => {
                let items = frame.pop_n(*n as usize)?;
                let mut out: Vec<Value> = Vec::new();
                for item in items {
                    if !out.iter().map(|existing| crate::value::hashing::eq_value(existing, &item, guard)).collect::<VmResult<Vec<_>>>()?.into_iter().any(|b| b) {
                        out.push(item);
                    }
                }
                self.limits.charge_alloc(container_bytes(out.len()))?;
                frame.stack.push(Value::Set(Rc::new(RefCell::new(out))));
            }
            BuildDict(n) => {
                let pairs = frame.pop_n((*n as usize) * 2)?;
                let mut map = ValueMap::new();
                for chunk in pairs.chunks(2) {
                    map.insert(chunk[0].clone(), chunk[1].clone(), guard)?;
                }
                self.limits.charge_alloc(container_bytes(*n as usize))?;
                frame.stack.push(Value::Dict(Rc::new(RefCell::new(map))));
            }
            BuildSlice(flags) => {
                let has_step = flags & 0b100 != 0;
                let has_stop = flags & 0b010 != 0;
                let has_start = flags & 0b001 != 0;
                let step = if has_step { Some(expect_int(frame.pop()?)?) } else { None };
                let stop = if has_stop { Some(expect_int(frame.pop()?)?) } else { None };
                let start = if has_start { Some(expect_int(frame.pop()?)?) } else { None };
                frame.stack.push(Value::Slice(Rc::new(crate::value::SliceValue { start, stop, step })));
            }
            BuildString(n) => {
                let parts = frame.pop_n(*n as usize)?;
                let mut out = String::new();
                for part in parts {
                    out.push_str(&crate::value::hashing::str_value(&part, guard)?);
                }
                self.limits.charge_alloc(out.len() as u64 + 32)?;
                frame.stack.push(Value::str(out));
            }
            BinaryAdd | BinarySub | BinaryMul | BinaryTrueDiv | BinaryFloorDiv | BinaryMod | BinaryPow | BinaryLShift
            | BinaryRShift | BinaryAnd | BinaryOr | BinaryXor => {
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                let result = binary_op(instr, lhs, rhs, &self.limits)?;
                frame.stack.push(result);
            }
            UnaryNeg | UnaryPos | UnaryNot | UnaryInvert => {
                let operand = frame.pop()?;
                frame.stack.push(unary_op(instr, operand)?);
            }
            CompareEq | CompareNe | CompareLt | CompareLe | CompareGt | CompareGe | CompareIn | CompareNotIn
            | CompareIs | CompareIsNot => {
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                frame.stack.push(Value::Bool(compare(instr, &lhs, &rhs, guard)?));
            }
            JumpAbsolute(target) => {
                frame.ip = *target as usize;
            }
            JumpIfFalse(target) => {
                if !frame.pop()?.is_truthy()? {
                    frame.ip = *target as usize;
                }
            }
            JumpIfTrue(target) => {
                if frame.pop()?.is_truthy()? {
                    frame.ip = *target as usize;
                }
            }
            JumpIfFalseOrPop(target) => {
                if !frame.stack.last().unwrap().is_truthy()? {
                    frame.ip = *target as usize;
                } else {
                    frame.pop()?;
                }
            }
            JumpIfTrueOrPop(target) => {
                if frame.stack.last().unwrap().is_truthy()? {
                    frame.ip = *target as usize;
                } else {
                    frame.pop()?;
                }
            }
            UnpackSequence(count) => {
                let value = frame.pop()?;
                let items = container::iterate(&value)?;
                if items.len() != *count as usize {
                    return Err(VmError::value_error(format!(
                        "{} values to unpack (expected {count})",
                        if items.len() < *count as usize { "not enough" } else { "too many" }
                    )));
                }
                for item in items.into_iter().rev() {
                    frame.stack.push(item);
                }
            }
            Call { argc, kwnames, has_star, has_kwstar } => {
                return self.execute_call(frames, guard, scheduler, task_id, *argc, kwnames, *has_star, *has_kwstar);
            }
            ReturnValue => {
                let value = frame.pop()?;
                return Ok(StepOutcome::Return(value));
            }
            SetupTry { handler } => {
                frame.handlers.push(Handler { target_ip: *handler as usize, stack_depth: frame.stack.len() });
            }
            PopBlock => {
                frame.handlers.pop();
            }
            MatchException(idx) => {
                let exc_value = frame.pop()?;
                let candidate = frame.code.consts[*idx as usize].clone();
                let matched = match &exc_value {
                    Value::Exception(e) => exceptions::exception_matches(e, &candidate),
                    _ => false,
                };
                frame.stack.push(exc_value);
                frame.stack.push(Value::Bool(matched));
            }
            Raise => {
                let value = frame.pop()?;
                return Ok(StepOutcome::RaiseValue(value));
            }
            Reraise => {
                let value = frame.exc_info.last().cloned().ok_or_else(|| {
                    VmError::raised(crate::error::ExceptionClass::RuntimeError, "no active exception to re-raise".to_string())
                })?;
                return Ok(StepOutcome::RaiseValue(value));
            }
            EndFinally => {}
            PushExcInfo => {
                let top = frame.stack.last().cloned().ok_or(VmError::StackUnderflow { requested: 1, available: 0 })?;
                frame.exc_info.push(top);
            }
            PopExcInfo => {
                frame.exc_info.pop();
            }
            GetIter => {
                let value = frame.pop()?;
                let mut items = container::iterate(&value)?;
                items.reverse();
                frame.stack.push(Value::List(Rc::new(RefCell::new(items))));
            }
            ForIter(exhausted_target) => {
                let Value::List(iter_cell) = frame.stack.last().cloned().unwrap() else {
                    return Err(VmError::type_error("internal: ForIter expects a materialized iterator"));
                };
                let next = iter_cell.borrow_mut().pop();
                match next {
                    Some(item) => frame.stack.push(item),
                    None => {
                        frame.pop()?;
                        frame.ip = *exhausted_target as usize;
                    }
                }
            }
            GetAwaitable => {
                // No-op: awaitability is checked when `Await` actually
                // suspends; coroutines/futures/tasks are already in their
                // awaitable form on the stack.
            }
            Await => {
                return self.execute_await(frames, scheduler, task_id);
            }
            Gather(n) => {
                return self.execute_gather(frames, guard, scheduler, task_id, *n);
            }
            MakeFunction { code_index, num_defaults, num_cells } => {
                let code = match &frame.code.consts[*code_index as usize] {
                    Value::Function(f) => f.code.clone(),
                    other => return Err(VmError::Host { message: format!("MakeFunction target is not code: {other:?}") }),
                };
                let defaults = frame.pop_n(*num_defaults as usize)?;
                let cell_values = frame.pop_n(*num_cells as usize)?;
                let cells: Vec<Rc<RefCell<Value>>> = cell_values.into_iter().map(|v| Rc::new(RefCell::new(v))).collect();
                let function = Rc::new(FunctionValue {
                    name: code.name.clone(),
                    qualname: code.qualname.clone(),
                    code,
                    defaults,
                    kwdefaults: Vec::new(),
                });
                if cells.is_empty() {
                    frame.stack.push(Value::Function(function));
                } else {
                    frame.stack.push(Value::Closure(Rc::new(Closure { function, cells })));
                }
            }
            MakeClosureCell(_) => {
                frame.stack.push(Value::None);
            }
            ImportName(idx) => {
                let name = frame.code.names[*idx as usize].clone();
                return Err(VmError::raised(
                    crate::error::ExceptionClass::RuntimeError,
                    format!("import of '{name}' is not permitted by the host allowlist"),
                ));
            }
            FormatValue => {
                let value = frame.pop()?;
                frame.stack.push(Value::str(crate::value::hashing::str_value(&value, guard)?));
            }
            Nop => {}
        }
        Ok(StepOutcome::Continue)
    }

    fn execute_call(
        &mut self,
        frames: &mut Vec<Frame>,
        guard: &RecursionGuard,
        scheduler: &mut Scheduler,
        task_id: TaskId,
        argc: u32,
        kwnames: &Rc<[Rc<str>]>,
        has_star: bool,
        has_kwstar: bool,
    ) -> VmResult<StepOutcome> {
        let frame = frames.last_mut().unwrap();
        let kwstar_dict = if has_kwstar { Some(frame.pop()?) } else { None };
        let star_iterable = if has_star { Some(frame.pop()?) } else { None };
        let kw_values = frame.pop_n(kwnames.len())?;
        let pos_count = argc as usize - kwnames.len();
        let mut positional = frame.pop_n(pos_count)?;
        let callee = frame.pop()?;

        if let Some(iterable) = star_iterable {
            positional.extend(container::iterate(&iterable)?);
        }
        let mut keywords: Vec<(Rc<str>, Value)> = kwnames.iter().cloned().zip(kw_values).collect();
        if let Some(Value::Dict(d)) = kwstar_dict {
            for (k, v) in d.borrow().entries() {
                let Value::Str(name) = k else {
                    return Err(VmError::type_error("keywords must be strings"));
                };
                keywords.push((name.clone(), v.clone()));
            }
        }

        let (callee, positional) = call::unwrap_bound_method(callee, positional);

        match self.dispatch_callee(callee, positional, keywords, guard, scheduler, task_id)? {
            call::CallOutcome::Immediate(value) => {
                frames.last_mut().unwrap().stack.push(value);
                Ok(StepOutcome::Continue)
            }
            call::CallOutcome::EnterFrame(new_frame) => Ok(StepOutcome::EnterFrame(new_frame)),
            call::CallOutcome::MakeCoroutine(value) => {
                frames.last_mut().unwrap().stack.push(value);
                Ok(StepOutcome::Continue)
            }
        }
    }

    fn dispatch_callee(
        &mut self,
        callee: Value,
        positional: Vec<Value>,
        keywords: Vec<(Rc<str>, Value)>,
        _guard: &RecursionGuard,
        _scheduler: &mut Scheduler,
        _task_id: TaskId,
    ) -> VmResult<call::CallOutcome> {
        match callee {
            Value::Function(func) => {
                if func.code.flags.contains(crate::bytecode::CodeFlags::IS_COROUTINE) {
                    let locals = call::bind_arguments(&func.name, &func.code, &func.defaults, &func.kwdefaults, positional, keywords)?;
                    let coroutine = Coroutine {
                        qualname: func.qualname.clone(),
                        code: func.code.clone(),
                        closure_cells: Vec::new(),
                        bound_locals: locals,
                        frames: Vec::new(),
                    };
                    return Ok(call::CallOutcome::MakeCoroutine(Value::Coroutine(Rc::new(RefCell::new(coroutine)))));
                }
                let locals = call::bind_arguments(&func.name, &func.code, &func.defaults, &func.kwdefaults, positional, keywords)?;
                let frame = Frame::new(func.code.clone(), func.qualname.clone(), locals, Vec::new());
                Ok(call::CallOutcome::EnterFrame(Box::new(frame)))
            }
            Value::Closure(closure) => {
                let func = &closure.function;
                let locals = call::bind_arguments(&func.name, &func.code, &func.defaults, &func.kwdefaults, positional, keywords)?;
                let frame = Frame::new(func.code.clone(), func.qualname.clone(), locals, closure.cells.clone());
                Ok(call::CallOutcome::EnterFrame(Box::new(frame)))
            }
            Value::BuiltinFunction(builtin) => match &builtin.kind {
                crate::value::BuiltinKind::Native(f) => Ok(call::CallOutcome::Immediate(f(&positional, &keywords)?)),
                crate::value::BuiltinKind::HostSync(name) => {
                    Ok(call::CallOutcome::Immediate(self.host.call_sync(name, &positional)?))
                }
                crate::value::BuiltinKind::HostAsync(name) => {
                    let future_id = self.host.call_async(name, &positional)?;
                    let future = crate::host::FutureValue { id: future_id, state: crate::host::FutureState::Pending };
                    Ok(call::CallOutcome::Immediate(Value::Future(Rc::new(RefCell::new(future)))))
                }
            },
            Value::Type(t) => match &t.kind {
                TypeKind::Exception => {
                    let exc = Value::Exception(Rc::new(crate::value::ExceptionValue {
                        class: t.clone(),
                        args: RefCell::new(Rc::new(positional)),
                        cause: RefCell::new(None),
                        traceback: RefCell::new(Vec::new()),
                    }));
                    Ok(call::CallOutcome::Immediate(exc))
                }
                TypeKind::Dataclass { .. } => {
                    Ok(call::CallOutcome::Immediate(self.dataclasses.construct(&t, positional)?))
                }
                TypeKind::Builtin => Err(VmError::type_error(format!("'{}' object is not callable", t.name))),
            },
            other => Err(VmError::type_error(format!("'{}' object is not callable", other.type_name()))),
        }
    }

    fn execute_await(&mut self, frames: &mut Vec<Frame>, scheduler: &mut Scheduler, task_id: TaskId) -> VmResult<StepOutcome> {
        let frame = frames.last_mut().unwrap();
        let awaitable = frame.pop()?;
        match awaitable {
            Value::Future(future) => {
                let id = future.borrow().id;
                match self.host.future_state(id) {
                    Some(crate::host::FutureState::Resolved(v)) => {
                        frame.stack.push(v);
                        Ok(StepOutcome::Continue)
                    }
                    Some(crate::host::FutureState::Failed(exc)) => Ok(StepOutcome::RaiseValue(exc)),
                    _ => {
                        scheduler.block_on(task_id, BlockedOn::HostFuture(id));
                        frames.last_mut().unwrap().pending_await = Some(PendingAwait::HostFuture(id));
                        Ok(StepOutcome::Suspend)
                    }
                }
            }
            Value::Coroutine(coro) => {
                // Inlined child call: run it to completion as a nested task
                // sharing this one's recursion guard is not possible across
                // `Rc<RecursionGuard>` boundaries cheaply, so it is spawned
                // as its own task and this frame blocks on it — observably
                // identical to an inlined call since nothing else can run
                // concurrently anyway (`spec.md` §5).
                let code = coro.borrow().code.clone();
                let placeholder =
                    Coroutine { qualname: String::new(), code, closure_cells: Vec::new(), bound_locals: Vec::new(), frames: Vec::new() };
                let taken = std::mem::replace(&mut *coro.borrow_mut(), placeholder);
                let child_id = scheduler.spawn(taken, None);
                scheduler.block_on(task_id, BlockedOn::Tasks(vec![child_id]));
                frames.last_mut().unwrap().pending_await = Some(PendingAwait::Task(child_id));
                Ok(StepOutcome::Suspend)
            }
            Value::Task(handle) => {
                let child_id = handle.borrow().id;
                if let Some(result) = scheduler.result_of(child_id).cloned() {
                    match result {
                        Ok(v) => {
                            frames.last_mut().unwrap().stack.push(v);
                            Ok(StepOutcome::Continue)
                        }
                        Err(exc) => Ok(StepOutcome::RaiseValue(exc)),
                    }
                } else {
                    scheduler.block_on(task_id, BlockedOn::Tasks(vec![child_id]));
                    frames.last_mut().unwrap().pending_await = Some(PendingAwait::Task(child_id));
                    Ok(StepOutcome::Suspend)
                }
            }
            other => Err(VmError::type_error(format!(
                "object {} can't be used in 'await' expression",
                other.type_name()
            ))),
        }
    }

    fn execute_gather(
        &mut self,
        frames: &mut Vec<Frame>,
        _guard: &RecursionGuard,
        scheduler: &mut Scheduler,
        task_id: TaskId,
        n: u32,
    ) -> VmResult<StepOutcome> {
        let frame = frames.last_mut().unwrap();
        let awaitables = frame.pop_n(n as usize)?;
        let task_ids = gather::to_task_ids(scheduler, &awaitables, None)?;
        if gather::all_finished(scheduler, &task_ids) {
            return match gather::collect_results(scheduler, &task_ids) {
                Ok(v) => {
                    frames.last_mut().unwrap().stack.push(v);
                    Ok(StepOutcome::Continue)
                }
                Err(exc) => Ok(StepOutcome::RaiseValue(exc)),
            };
        }
        gather::block_on_all(scheduler, task_id, task_ids.clone());
        frames.last_mut().unwrap().pending_gather = Some(task_ids);
        Ok(StepOutcome::Suspend)
    }
}

enum StepOutcome {
    Continue,
    Return(Value),
    EnterFrame(Box<Frame>),
    Suspend,
    RaiseValue(Value),
}

fn pad_locals(mut locals: Vec<Value>, code: &CodeObject) -> Vec<Value> {
    locals.resize(code.varnames.len(), Value::None);
    locals
}

fn expect_int(v: Value) -> VmResult<Int> {
    match v {
        Value::Int(i) => Ok(i),
        Value::None => Ok(Int::from_i64(0)),
        other => Err(VmError::type_error(format!("slice indices must be integers, not '{}'", other.type_name()))),
    }
}

fn binary_op(instr: &Instruction, lhs: Value, rhs: Value, limits: &LimitTracker) -> VmResult<Value> {
    use Instruction::*;
    match (&lhs, &rhs) {
        (Value::Int(a), Value::Int(b)) => int_binary_op(instr, a, b, limits),
        (Value::Str(a), Value::Str(b)) if matches!(instr, BinaryAdd) => Ok(Value::str(format!("{a}{b}"))),
        (Value::Str(s), Value::Int(n)) if matches!(instr, BinaryMul) => Ok(Value::str(s.repeat(n.to_clamped_count()?))),
        (Value::List(items), Value::Int(n)) if matches!(instr, BinaryMul) => {
            let count = n.to_clamped_count()?;
            let base = items.borrow();
            let mut out = Vec::with_capacity(base.len() * count);
            for _ in 0..count {
                out.extend(base.iter().cloned());
            }
            Ok(Value::List(Rc::new(RefCell::new(out))))
        }
        (Value::List(a), Value::List(b)) if matches!(instr, BinaryAdd) => {
            let mut out = a.borrow().clone();
            out.extend(b.borrow().iter().cloned());
            Ok(Value::List(Rc::new(RefCell::new(out))))
        }
        (Value::Tuple(a), Value::Tuple(b)) if matches!(instr, BinaryAdd) => {
            let mut out = (**a).clone();
            out.extend(b.iter().cloned());
            Ok(Value::Tuple(Rc::new(out)))
        }
        _ => float_binary_op(instr, &lhs, &rhs),
    }
}

fn as_f64(v: &Value) -> VmResult<f64> {
    match v {
        Value::Float(f) => Ok(*f),
        Value::Int(i) => Ok(i.to_f64()),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        other => Err(VmError::type_error(format!("unsupported operand type: '{}'", other.type_name()))),
    }
}

fn float_binary_op(instr: &Instruction, lhs: &Value, rhs: &Value) -> VmResult<Value> {
    use Instruction::*;
    if !matches!(lhs, Value::Float(_) | Value::Int(_) | Value::Bool(_)) || !matches!(rhs, Value::Float(_) | Value::Int(_) | Value::Bool(_)) {
        let op_symbol = match instr {
            BinaryAdd => "+",
            BinarySub => "-",
            BinaryMul => "*",
            _ => "?",
        };
        return Err(VmError::type_error(format!(
            "unsupported operand type(s) for {op_symbol}: '{}' and '{}'",
            lhs.type_name(),
            rhs.type_name()
        )));
    }
    let a = as_f64(lhs)?;
    let b = as_f64(rhs)?;
    Ok(Value::Float(match instr {
        BinaryAdd => a + b,
        BinarySub => a - b,
        BinaryMul => a * b,
        BinaryTrueDiv => {
            if b == 0.0 {
                return Err(VmError::ZeroDivision);
            }
            a / b
        }
        BinaryFloorDiv => (a / b).floor(),
        // Floored modulo: `a - floor(a / b) * b`, so the result's sign
        // follows `b`'s, matching `Int::modulo`'s integer counterpart.
        BinaryMod => a - (a / b).floor() * b,
        BinaryPow => a.powf(b),
        _ => return Err(VmError::type_error("unsupported operand type for bitwise operator: 'float'")),
    }))
}

fn int_binary_op(instr: &Instruction, a: &Int, b: &Int, limits: &LimitTracker) -> VmResult<Value> {
    use Instruction::*;
    Ok(match instr {
        BinaryAdd => Value::Int(a.add(b)),
        BinarySub => Value::Int(a.sub(b)),
        BinaryMul => {
            limits.check_predicted_bytes(predicted_mul_bytes(a, b))?;
            Value::Int(a.mul(b))
        }
        BinaryTrueDiv => Value::Float(a.true_div(b)?),
        BinaryFloorDiv => Value::Int(a.floor_div(b)?),
        BinaryMod => Value::Int(a.modulo(b)?),
        BinaryPow => {
            if b.sign() == std::cmp::Ordering::Less {
                Value::Float((a.to_f64()).powf(b.to_f64()))
            } else {
                limits.check_predicted_bytes(predicted_pow_bytes(a, b))?;
                Value::Int(a.pow(b)?)
            }
        }
        BinaryLShift => {
            use num_traits::ToPrimitive;
            let bits = b.to_bigint().to_u32().ok_or_else(|| VmError::Overflow { operation: "shift amount".into() })?;
            limits.check_predicted_bytes(predicted_shift_bytes(a, bits))?;
            Value::Int(a.shl(bits))
        }
        BinaryRShift => {
            use num_traits::ToPrimitive;
            let bits = b.to_bigint().to_u32().ok_or_else(|| VmError::Overflow { operation: "shift amount".into() })?;
            Value::Int(a.shr(bits))
        }
        BinaryAnd => Value::Int(a.bit_and(b)),
        BinaryOr => Value::Int(a.bit_or(b)),
        BinaryXor => Value::Int(a.bit_xor(b)),
        _ => unreachable!("int_binary_op called with non-binary instruction"),
    })
}

/// Rough per-element byte cost of a freshly built tuple/list/set/dict,
/// charged against `max_memory`/`max_allocations` at construction time
/// (`spec.md` §4.C "Cost prediction for int operators" generalizes to every
/// allocating instruction, not just the arbitrary-precision int operators).
fn container_bytes(item_count: usize) -> u64 {
    (item_count as u64) * 16 + 32
}

/// log2-based upper bound on the limb growth of `a * b`, charged before the
/// multiply happens (`spec.md` §4.C "Cost prediction for int operators").
fn predicted_mul_bytes(a: &Int, b: &Int) -> u64 {
    ((a.bit_length() + b.bit_length()) / 8) + 8
}

fn predicted_pow_bytes(a: &Int, b: &Int) -> u64 {
    use num_traits::ToPrimitive;
    let exp = b.to_bigint().to_u64().unwrap_or(u64::MAX);
    (a.bit_length().saturating_mul(exp) / 8).saturating_add(8)
}

fn predicted_shift_bytes(a: &Int, bits: u32) -> u64 {
    ((a.bit_length() + bits as u64) / 8) + 8
}

fn unary_op(instr: &Instruction, operand: Value) -> VmResult<Value> {
    use Instruction::*;
    match instr {
        UnaryNot => Ok(Value::Bool(!operand.is_truthy()?)),
        UnaryNeg => match operand {
            Value::Int(i) => Ok(Value::Int(i.neg())),
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Bool(b) => Ok(Value::Int(Int::from_i64(-(b as i64)))),
            other => Err(VmError::type_error(format!("bad operand type for unary -: '{}'", other.type_name()))),
        },
        UnaryPos => match operand {
            Value::Int(_) | Value::Float(_) => Ok(operand),
            Value::Bool(b) => Ok(Value::Int(Int::from_i64(b as i64))),
            other => Err(VmError::type_error(format!("bad operand type for unary +: '{}'", other.type_name()))),
        },
        UnaryInvert => match operand {
            Value::Int(i) => Ok(Value::Int(i.bit_not())),
            other => Err(VmError::type_error(format!("bad operand type for unary ~: '{}'", other.type_name()))),
        },
        _ => unreachable!("unary_op called with non-unary instruction"),
    }
}

fn compare(instr: &Instruction, lhs: &Value, rhs: &Value, guard: &RecursionGuard) -> VmResult<bool> {
    use crate::value::hashing::eq_value;
    use Instruction::*;
    Ok(match instr {
        CompareEq => eq_value(lhs, rhs, guard)?,
        CompareNe => !eq_value(lhs, rhs, guard)?,
        CompareIs => values_are(lhs, rhs),
        CompareIsNot => !values_are(lhs, rhs),
        CompareIn => container::iterate(rhs)?.iter().map(|v| eq_value(v, lhs, guard)).collect::<VmResult<Vec<_>>>()?.into_iter().any(|b| b),
        CompareNotIn => !container::iterate(rhs)?.iter().map(|v| eq_value(v, lhs, guard)).collect::<VmResult<Vec<_>>>()?.into_iter().any(|b| b),
        CompareLt | CompareLe | CompareGt | CompareGe => {
            let ordering = ordered_compare(lhs, rhs)?;
            match instr {
                CompareLt => ordering == std::cmp::Ordering::Less,
                CompareLe => ordering != std::cmp::Ordering::Greater,
                CompareGt => ordering == std::cmp::Ordering::Greater,
                CompareGe => ordering != std::cmp::Ordering::Less,
                _ => unreachable!(),
            }
        }
        _ => unreachable!("compare called with non-comparison instruction"),
    })
}

fn values_are(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) | (Value::Ellipsis, Value::Ellipsis) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y),
        (Value::Set(x), Value::Set(y)) => Rc::ptr_eq(x, y),
        (Value::Type(x), Value::Type(y)) => Rc::ptr_eq(x, y),
        (Value::DataclassInstance(x), Value::DataclassInstance(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

fn ordered_compare(lhs: &Value, rhs: &Value) -> VmResult<std::cmp::Ordering> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => Ok(a.cmp(b)),
        (Value::Tuple(a), Value::Tuple(b)) => compare_seq(a, b),
        (Value::List(a), Value::List(b)) => compare_seq(&a.borrow(), &b.borrow()),
        _ => {
            let a = as_f64(lhs)?;
            let b = as_f64(rhs)?;
            a.partial_cmp(&b).ok_or_else(|| VmError::type_error("comparison involving NaN"))
        }
    }
}

fn compare_seq(a: &[Value], b: &[Value]) -> VmResult<std::cmp::Ordering> {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = ordered_compare(x, y)?;
        if ord != std::cmp::Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(a.len().cmp(&b.len()))
}
