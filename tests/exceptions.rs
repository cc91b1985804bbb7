//! Block-stack try/except unwinding (`spec.md` §4.D "Exception model") and
//! the hard-resource-fault bypass (`spec.md` §7).

use monty::bytecode::Instruction;
use monty::value::{TypeKind, TypeValue, Value};
use monty::{CodeBuilder, Monty};
use std::rc::Rc;

/// A standalone exception class marker good enough for `MatchException`:
/// matching falls back to name equality when the `Rc` isn't the registry's
/// own instance (`interpreter::exceptions::exception_matches`).
fn exception_class(name: &str) -> Value {
    Value::Type(Rc::new(TypeValue { name: name.to_string(), id: 0, kind: TypeKind::Exception }))
}

#[test]
fn except_clause_catches_zero_division_and_recovers() {
    let mut b = CodeBuilder::new("<module>");
    let x = b.varname("x");
    let one = b.constant(Value::int(1));
    let zero = b.constant(Value::int(0));
    let minus_one = b.constant(Value::int(-1));
    let zero_division = b.constant(exception_class("ZeroDivisionError"));

    let setup_try = b.here();
    b.emit(Instruction::SetupTry { handler: 0 });
    b.emit(Instruction::LoadConst(one));
    b.emit(Instruction::LoadConst(zero));
    b.emit(Instruction::BinaryTrueDiv);
    b.emit(Instruction::StoreLocal(x));
    b.emit(Instruction::PopBlock);
    let jump_over_except = b.here();
    b.emit(Instruction::JumpAbsolute(0));

    let except_start = b.here();
    b.emit(Instruction::MatchException(zero_division));
    let jump_to_reraise = b.here();
    b.emit(Instruction::JumpIfFalse(0));
    b.emit(Instruction::PushExcInfo);
    b.emit(Instruction::Pop);
    b.emit(Instruction::LoadConst(minus_one));
    b.emit(Instruction::StoreLocal(x));
    b.emit(Instruction::PopExcInfo);
    let jump_to_end_from_handler = b.here();
    b.emit(Instruction::JumpAbsolute(0));

    let reraise_target = b.here();
    b.emit(Instruction::Raise);

    let after_except = b.here();
    b.emit(Instruction::LoadLocal(x));
    b.emit(Instruction::ReturnValue);

    let mut code = b.build();
    code.instructions[setup_try as usize] = Instruction::SetupTry { handler: except_start };
    code.instructions[jump_over_except as usize] = Instruction::JumpAbsolute(after_except);
    code.instructions[jump_to_reraise as usize] = Instruction::JumpIfFalse(reraise_target);
    code.instructions[jump_to_end_from_handler as usize] = Instruction::JumpAbsolute(after_except);

    let monty = Monty::new();
    let result = monty.run(Rc::new(code)).expect("the ZeroDivisionError should be caught");
    let Value::Int(n) = result else { panic!("expected an int, got {result:?}") };
    assert_eq!(n.to_i64_clamped(), -1);
}

#[test]
fn except_clause_for_the_wrong_class_lets_the_exception_escape() {
    let mut b = CodeBuilder::new("<module>");
    let one = b.constant(Value::int(1));
    let zero = b.constant(Value::int(0));
    let value_error = b.constant(exception_class("ValueError"));

    let setup_try = b.here();
    b.emit(Instruction::SetupTry { handler: 0 });
    b.emit(Instruction::LoadConst(one));
    b.emit(Instruction::LoadConst(zero));
    b.emit(Instruction::BinaryTrueDiv);
    b.emit(Instruction::PopBlock);
    let jump_over_except = b.here();
    b.emit(Instruction::JumpAbsolute(0));

    let except_start = b.here();
    b.emit(Instruction::MatchException(value_error));
    let jump_to_reraise = b.here();
    b.emit(Instruction::JumpIfFalse(0));
    b.emit(Instruction::Pop);
    b.emit(Instruction::ReturnValue);

    let reraise_target = b.here();
    b.emit(Instruction::Raise);

    let after_except = b.here();
    b.emit(Instruction::ReturnValue);

    let mut code = b.build();
    code.instructions[setup_try as usize] = Instruction::SetupTry { handler: except_start };
    code.instructions[jump_over_except as usize] = Instruction::JumpAbsolute(after_except);
    code.instructions[jump_to_reraise as usize] = Instruction::JumpIfFalse(reraise_target);

    let monty = Monty::new();
    let err = monty.run(Rc::new(code)).unwrap_err();
    let Value::Exception(exc) = err.exception() else { panic!("expected an exception value") };
    assert_eq!(exc.class.name, "ZeroDivisionError");
}
