//! Argument binding and the `Call` instruction's callee dispatch
//! (`spec.md` §4.D "Argument binding", "Built-in call protocol").

use super::Frame;
use crate::bytecode::CodeFlags;
use crate::error::{VmError, VmResult};
use crate::value::{BoundMethod, ValueMap, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// What executing a `Call` instruction does next: a builtin, bound method,
/// or dataclass constructor produces a value immediately; a user-defined
/// function instead pushes a new [`Frame`] that the dispatch loop must run
/// before the call "returns".
pub enum CallOutcome {
    Immediate(Value),
    EnterFrame(Box<Frame>),
    /// The callee is itself a coroutine function: produces a suspended
    /// `Value::Coroutine` rather than running anything yet (calling an
    /// `async def` does not start it — only `await` or `gather` does).
    MakeCoroutine(Value),
}

/// Binds `positional`/`keywords` against a function's code object and
/// default values, producing the frame's initial `locals` array. Raises
/// `TypeError` with the reference language's canonical messages
/// (`spec.md` §4.D).
pub fn bind_arguments(
    fn_name: &str,
    code: &crate::bytecode::CodeObject,
    defaults: &[Value],
    kwdefaults: &[(Rc<str>, Value)],
    positional: Vec<Value>,
    keywords: Vec<(Rc<str>, Value)>,
) -> VmResult<Vec<Value>> {
    let argcount = code.argcount as usize;
    let kwonly = code.kwonlyargcount as usize;
    let has_varargs = code.flags.contains(CodeFlags::HAS_VARARGS);
    let has_varkwargs = code.flags.contains(CodeFlags::HAS_VARKWARGS);

    let mut locals = vec![Value::None; code.varnames.len()];
    let mut filled = vec![false; argcount + kwonly];

    if positional.len() > argcount && !has_varargs {
        return Err(VmError::type_error(format!(
            "{fn_name}() takes {argcount} positional argument{} but {} were given",
            if argcount == 1 { "" } else { "s" },
            positional.len()
        )));
    }
    let bound_count = positional.len().min(argcount);
    for (i, value) in positional.iter().take(bound_count).enumerate() {
        locals[i] = value.clone();
        filled[i] = true;
    }
    let varargs_extra: Vec<Value> = if positional.len() > argcount {
        positional[argcount..].to_vec()
    } else {
        Vec::new()
    };

    let mut kwargs_extra: Vec<(Rc<str>, Value)> = Vec::new();
    for (name, value) in keywords {
        match code.varnames[..argcount + kwonly].iter().position(|v| *v == name) {
            Some(idx) => {
                if filled[idx] {
                    return Err(VmError::type_error(format!(
                        "{fn_name}() got multiple values for argument '{name}'"
                    )));
                }
                locals[idx] = value;
                filled[idx] = true;
            }
            None if has_varkwargs => kwargs_extra.push((name, value)),
            None => {
                return Err(VmError::type_error(format!(
                    "{fn_name}() got an unexpected keyword argument '{name}'"
                )))
            }
        }
    }

    let defaults_start = argcount.saturating_sub(defaults.len());
    for (i, default) in (defaults_start..argcount).zip(defaults) {
        if !filled[i] {
            locals[i] = default.clone();
            filled[i] = true;
        }
    }
    for (name, value) in kwdefaults {
        if let Some(idx) = code.varnames[argcount..argcount + kwonly]
            .iter()
            .position(|v| v == name)
            .map(|i| i + argcount)
        {
            if !filled[idx] {
                locals[idx] = value.clone();
                filled[idx] = true;
            }
        }
    }

    let missing: Vec<String> =
        (0..argcount + kwonly).filter(|&i| !filled[i]).map(|i| format!("'{}'", code.varnames[i])).collect();
    if !missing.is_empty() {
        return Err(VmError::type_error(format!(
            "{fn_name}() missing {} required positional argument{}: {}",
            missing.len(),
            if missing.len() == 1 { "" } else { "s" },
            join_with_and(&missing)
        )));
    }

    let mut next_slot = argcount + kwonly;
    if has_varargs {
        locals[next_slot] = Value::Tuple(Rc::new(varargs_extra));
        next_slot += 1;
    }
    if has_varkwargs {
        let mut map = ValueMap::new();
        let guard = crate::value::RecursionGuard::new(None);
        for (name, value) in kwargs_extra {
            map.insert(Value::str(name), value, &guard)?;
        }
        locals[next_slot] = Value::Dict(Rc::new(RefCell::new(map)));
    }

    Ok(locals)
}

/// `'x'` / `'x' and 'y'` / `'x', 'y', and 'z'` — the reference language's
/// conjunction style for missing-argument lists.
fn join_with_and(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [a] => a.clone(),
        [a, b] => format!("{a} and {b}"),
        _ => {
            let (last, rest) = items.split_last().unwrap();
            format!("{}, and {last}", rest.join(", "))
        }
    }
}

/// Resolves a bound method's implicit receiver into the effective callee
/// and positional argument list (`self` prepended).
pub fn unwrap_bound_method(callee: Value, mut positional: Vec<Value>) -> (Value, Vec<Value>) {
    if let Value::BoundMethod(bound) = &callee {
        let bound: &BoundMethod = bound;
        positional.insert(0, bound.receiver.clone());
        return (bound.function.clone(), positional);
    }
    (callee, positional)
}
