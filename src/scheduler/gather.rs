//! `asyncio.gather` (`spec.md` §4.E "gather contract").
//!
//! Resolves Open Question (b) from `spec.md` §9: a failing child does not
//! cancel its siblings. Every gathered task runs to completion; once all
//! have finished, the *first* exception in argument order (not completion
//! order) is the one that propagates. This matches CPython's
//! `return_exceptions=False` default closely enough for the supported
//! subset and is simpler to reason about under cooperative scheduling than
//! eager cancellation.

use super::{BlockedOn, Scheduler, TaskId};
use crate::error::{VmError, VmResult};
use crate::value::Value;

/// Resolves each gathered argument to a `TaskId`, spawning a fresh task for
/// bare coroutines so `gather` can wait on it uniformly.
pub fn to_task_ids(scheduler: &mut Scheduler, awaitables: &[Value], recursion_limit: Option<u32>) -> VmResult<Vec<TaskId>> {
    let mut ids = Vec::with_capacity(awaitables.len());
    for value in awaitables {
        let id = match value {
            Value::Task(handle) => handle.borrow().id,
            Value::Coroutine(coro) => {
                // The `Value::Coroutine` wraps the to-be-run coroutine directly;
                // gather hands it to the scheduler by moving it into a fresh
                // task rather than cloning (a coroutine awaits at most once).
                let code = coro.borrow().code.clone();
                let placeholder = super::Coroutine {
                    qualname: String::new(),
                    code,
                    closure_cells: Vec::new(),
                    bound_locals: Vec::new(),
                    frames: Vec::new(),
                };
                let taken = std::mem::replace(&mut *coro.borrow_mut(), placeholder);
                scheduler.spawn(taken, recursion_limit)
            }
            other => {
                return Err(VmError::type_error(format!(
                    "An asyncio.Future, a coroutine or an awaitable is required, not '{}'",
                    other.type_name()
                )))
            }
        };
        ids.push(id);
    }
    Ok(ids)
}

/// Blocks the calling task on every id in `task_ids`. The interpreter must
/// re-enter the scheduler loop after this returns; this function only
/// records the dependency.
pub fn block_on_all(scheduler: &mut Scheduler, waiter: TaskId, task_ids: Vec<TaskId>) {
    let all_already_done = task_ids.iter().all(|id| scheduler.result_of(*id).is_some());
    if all_already_done {
        return;
    }
    scheduler.block_on(waiter, BlockedOn::Tasks(task_ids));
}

/// Once every gathered task has finished, collects results in argument
/// order, or the first (by argument order) exception if any failed.
pub fn collect_results(scheduler: &Scheduler, task_ids: &[TaskId]) -> Result<Value, Value> {
    let mut results = Vec::with_capacity(task_ids.len());
    for id in task_ids {
        match scheduler.result_of(*id) {
            Some(Ok(v)) => results.push(v.clone()),
            Some(Err(exc)) => return Err(exc.clone()),
            None => unreachable!("collect_results called before all gathered tasks finished"),
        }
    }
    Ok(Value::List(std::rc::Rc::new(std::cell::RefCell::new(results))))
}

pub fn all_finished(scheduler: &Scheduler, task_ids: &[TaskId]) -> bool {
    task_ids.iter().all(|id| scheduler.result_of(*id).is_some())
}
