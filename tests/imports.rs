//! `import` is rejected outright: the host allowlist is empty by
//! construction (`spec.md` §4.D "Imports"; no compiler-level module
//! resolution is in scope, so every `ImportName` is a `RuntimeError`).

use monty::bytecode::Instruction;
use monty::value::Value;
use monty::{CodeBuilder, Monty};
use std::rc::Rc;

#[test]
fn importing_any_module_raises_runtime_error() {
    let mut b = CodeBuilder::new("<module>");
    let os_idx = b.name("os");
    b.emit(Instruction::ImportName(os_idx));
    b.emit(Instruction::ReturnValue);

    let monty = Monty::new();
    let err = monty.run(Rc::new(b.build())).unwrap_err();
    let Value::Exception(exc) = err.exception() else { panic!("expected an exception value") };
    assert_eq!(exc.class.name, "RuntimeError");
}
