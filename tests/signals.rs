//! Signal delivery: a host-registered callable closes over a
//! [`monty::SignalHandle`] and raises through it from inside the very `run()`
//! it is being called from; the interpreter observes the pending signal at
//! the next instruction boundary (`spec.md` §4.E "Signal delivery").

use monty::bytecode::Instruction;
use monty::host::SyncHostFn;
use monty::value::{ExceptionValue, TypeKind, TypeValue, Value};
use monty::{CodeBuilder, Monty, Signal};
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn a_host_callable_raising_keyboard_interrupt_unwinds_the_script() {
    let mut monty = Monty::new();
    let handle = monty.signal_handle();
    let trigger: SyncHostFn = Rc::new(move |_args: &[Value]| {
        handle.raise_keyboard_interrupt();
        Ok(Value::None)
    });
    monty.register_external("trigger", trigger);

    let mut b = CodeBuilder::new("<module>");
    b.name("trigger");
    b.emit(Instruction::LoadGlobal(0));
    b.emit(Instruction::Call { argc: 0, kwnames: Rc::from(vec![]), has_star: false, has_kwstar: false });
    b.emit(Instruction::Pop);
    b.emit(Instruction::ReturnValue);

    let err = monty.run(Rc::new(b.build())).unwrap_err();
    let Value::Exception(exc) = err.exception() else { panic!("expected an exception value") };
    assert_eq!(exc.class.name, "KeyboardInterrupt");
}

#[test]
fn a_host_signal_handler_can_raise_a_custom_exception_instead() {
    let mut monty = Monty::new();
    let handle = monty.signal_handle();
    let exc_type = Rc::new(TypeValue { name: "ValueError".to_string(), id: 0, kind: TypeKind::Exception });
    let trigger: SyncHostFn = Rc::new(move |_args: &[Value]| {
        let exc = Value::Exception(Rc::new(ExceptionValue {
            class: exc_type.clone(),
            args: RefCell::new(Rc::new(vec![Value::str("potato")])),
            cause: RefCell::new(None),
            traceback: RefCell::new(Vec::new()),
        }));
        handle.raise(Signal::Raised(exc));
        Ok(Value::None)
    });
    monty.register_external("trigger", trigger);

    let mut b = CodeBuilder::new("<module>");
    b.name("trigger");
    b.emit(Instruction::LoadGlobal(0));
    b.emit(Instruction::Call { argc: 0, kwnames: Rc::from(vec![]), has_star: false, has_kwstar: false });
    b.emit(Instruction::Pop);
    b.emit(Instruction::ReturnValue);

    let err = monty.run(Rc::new(b.build())).unwrap_err();
    let Value::Exception(exc) = err.exception() else { panic!("expected an exception value") };
    assert_eq!(exc.class.name, "ValueError");
    assert_eq!(exc.args.borrow().first().cloned().map(|v| matches!(v, Value::Str(s) if s.as_ref() == "potato")), Some(true));
}
