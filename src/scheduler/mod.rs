//! Cooperative single-threaded scheduler (`spec.md` §4.E).
//!
//! Deliberately plain: a FIFO ready queue and a waiting set, not OS threads
//! or a green-thread runtime. Monty never runs two tasks' instructions
//! concurrently (`spec.md` §5); the only thing a "task switch" does here is
//! swap which `Frame` chain and [`crate::value::RecursionGuard`] the
//! interpreter is currently driving.

pub mod gather;

use crate::bytecode::CodeObject;
use crate::error::VmResult;
use crate::value::{RecursionGuard, Value};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

pub type TaskId = u64;

/// A suspended or running coroutine: a call to an `async def` function that
/// has not yet run to completion. Not `Clone` — a coroutine can be awaited
/// at most once, same as the reference language. `frames` is empty until
/// first resumed, at which point the interpreter builds the initial `Frame`
/// from `code`/`closure_cells`/`bound_locals`.
#[derive(Debug)]
pub struct Coroutine {
    pub qualname: String,
    pub code: Rc<CodeObject>,
    pub closure_cells: Vec<Rc<RefCell<Value>>>,
    pub bound_locals: Vec<Value>,
    pub frames: Vec<crate::interpreter::Frame>,
}

/// A value this task is blocked on: an external host future, or the set of
/// sibling tasks a `gather` is waiting for.
#[derive(Debug)]
pub enum BlockedOn {
    HostFuture(u64),
    Tasks(Vec<TaskId>),
}

/// One schedulable unit of work: a root coroutine plus its own recursion
/// depth counter and result slot (`spec.md` §4.E, §9 "Per-task state").
/// Two tasks recursing independently under the same `max_recursion_depth`
/// must not interfere — that is the entire reason this struct, and not a
/// single engine-wide counter, owns the `RecursionGuard`.
pub struct Task {
    pub id: TaskId,
    /// `Rc`-wrapped so a caller can clone it out before taking a mutable
    /// borrow of the `Scheduler` elsewhere (e.g. to spawn sibling tasks for
    /// `gather` while this task's slice is still running).
    pub guard: Rc<RecursionGuard>,
    pub status: TaskStatus,
    pub coroutine: Rc<RefCell<Coroutine>>,
}

pub enum TaskStatus {
    Ready,
    Blocked(BlockedOn),
    /// `Ok(value)` on normal completion; `Err(exception)` when the task's
    /// body raised and nothing inside it caught it.
    Done(Result<Value, Value>),
}

/// Script-visible handle to a running or completed [`Task`] (`asyncio.Task`
/// as seen from script land, `spec.md` §3).
#[derive(Debug)]
pub struct TaskHandle {
    pub id: TaskId,
    pub result: Option<Result<Value, Value>>,
}

/// Owns every [`Task`] created during one `run()`. The interpreter asks it
/// "who runs next" at every suspension point; nothing here ever runs two
/// tasks' bytecode at once.
pub struct Scheduler {
    next_task_id: TaskId,
    tasks: Vec<Task>,
    ready: VecDeque<TaskId>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self { next_task_id: 0, tasks: Vec::new(), ready: VecDeque::new() }
    }

    pub fn spawn(&mut self, coroutine: Coroutine, recursion_limit: Option<u32>) -> TaskId {
        let id = self.next_task_id;
        self.next_task_id += 1;
        self.tasks.push(Task {
            id,
            guard: Rc::new(RecursionGuard::new(recursion_limit)),
            status: TaskStatus::Ready,
            coroutine: Rc::new(RefCell::new(coroutine)),
        });
        self.ready.push_back(id);
        log::trace!("scheduler: spawned task {id}");
        id
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn result_of(&self, id: TaskId) -> Option<&Result<Value, Value>> {
        match self.task(id).map(|t| &t.status) {
            Some(TaskStatus::Done(r)) => Some(r),
            _ => None,
        }
    }

    /// Pops the next ready task, if any. Fair in the sense required by
    /// `spec.md` §5: a task that becomes ready is appended to the back of
    /// the queue and will eventually be popped.
    pub fn next_ready(&mut self) -> Option<TaskId> {
        self.ready.pop_front()
    }

    pub fn block_on(&mut self, id: TaskId, on: BlockedOn) {
        if let Some(task) = self.task_mut(id) {
            task.status = TaskStatus::Blocked(on);
        }
    }

    pub fn mark_ready(&mut self, id: TaskId) {
        if let Some(task) = self.task_mut(id) {
            if matches!(task.status, TaskStatus::Done(_)) {
                return;
            }
            task.status = TaskStatus::Ready;
        }
        if !self.ready.contains(&id) {
            self.ready.push_back(id);
        }
    }

    pub fn mark_done(&mut self, id: TaskId, result: Result<Value, Value>) {
        log::trace!("scheduler: task {id} done, ok={}", result.is_ok());
        if let Some(task) = self.task_mut(id) {
            task.status = TaskStatus::Done(result);
        }
        self.wake_dependents();
    }

    /// Wakes every task blocked on a set of tasks that have all finished.
    fn wake_dependents(&mut self) {
        let mut to_wake = Vec::new();
        for task in &self.tasks {
            if let TaskStatus::Blocked(BlockedOn::Tasks(waiting_on)) = &task.status {
                let all_done = waiting_on
                    .iter()
                    .all(|dep| matches!(self.task(*dep).map(|t| &t.status), Some(TaskStatus::Done(_))));
                if all_done {
                    to_wake.push(task.id);
                }
            }
        }
        for id in to_wake {
            self.mark_ready(id);
        }
    }

    /// Delivers a host future's resolution to whichever task is parked on it.
    pub fn resolve_future(&mut self, future_id: u64, _value: Value) {
        let waiter = self.tasks.iter().find(|t| matches!(&t.status, TaskStatus::Blocked(BlockedOn::HostFuture(id)) if *id == future_id)).map(|t| t.id);
        if let Some(id) = waiter {
            self.mark_ready(id);
        }
    }

    pub fn all_done(&self) -> bool {
        self.tasks.iter().all(|t| matches!(t.status, TaskStatus::Done(_)))
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `task_id` to completion by re-entering the interpreter each time it
/// (or some task it transitively depends on) becomes ready, until it is
/// `Done`. Used by `run()` for the implicit top-level task.
pub fn drain_until_done(
    scheduler: &mut Scheduler,
    interp: &mut crate::interpreter::Interpreter,
    task_id: TaskId,
) -> VmResult<Value> {
    loop {
        if let Some(result) = scheduler.result_of(task_id) {
            return match result.clone() {
                Ok(v) => Ok(v),
                Err(exc_value) => Err(interp.exception_to_fault(&exc_value)),
            };
        }
        let Some(runnable) = scheduler.next_ready() else {
            return Err(crate::error::VmError::Host {
                message: "scheduler deadlock: no task is ready to run".into(),
            });
        };
        interp.run_task_slice(scheduler, runnable)?;
    }
}
