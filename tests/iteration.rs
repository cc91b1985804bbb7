//! `for`-loop iteration over a materialized iterator (`spec.md` §4.D
//! "Iteration protocol"): `GetIter` reverses a container's items into a
//! `Value::List` acting as a stack, and `ForIter` pops from it each pass
//! until exhausted.

use monty::bytecode::Instruction;
use monty::value::Value;
use monty::{CodeBuilder, Monty};
use std::rc::Rc;

#[test]
fn for_loop_over_a_list_sums_its_elements() {
    let mut b = CodeBuilder::new("<module>");
    let total = b.varname("total");
    let item = b.varname("item");
    let zero = b.constant(Value::int(0));
    let one = b.constant(Value::int(1));
    let two = b.constant(Value::int(2));
    let three = b.constant(Value::int(3));

    b.emit(Instruction::LoadConst(zero));
    b.emit(Instruction::StoreLocal(total));

    b.emit(Instruction::LoadConst(one));
    b.emit(Instruction::LoadConst(two));
    b.emit(Instruction::LoadConst(three));
    b.emit(Instruction::BuildList(3));
    b.emit(Instruction::GetIter);

    let loop_start = b.here();
    let for_iter_index = b.here();
    b.emit(Instruction::ForIter(0));
    b.emit(Instruction::StoreLocal(item));
    b.emit(Instruction::LoadLocal(total));
    b.emit(Instruction::LoadLocal(item));
    b.emit(Instruction::BinaryAdd);
    b.emit(Instruction::StoreLocal(total));
    b.emit(Instruction::JumpAbsolute(loop_start));
    let loop_end = b.here();

    b.emit(Instruction::LoadLocal(total));
    b.emit(Instruction::ReturnValue);

    let mut code = b.build();
    code.instructions[for_iter_index as usize] = Instruction::ForIter(loop_end);

    let monty = Monty::new();
    let result = monty.run(Rc::new(code)).expect("summing a list should not raise");
    let Value::Int(n) = result else { panic!("expected an int, got {result:?}") };
    assert_eq!(n.to_i64_clamped(), 6);
}

#[test]
fn for_loop_over_an_empty_list_never_enters_the_body() {
    let mut b = CodeBuilder::new("<module>");
    let total = b.varname("total");
    let item = b.varname("item");
    let zero = b.constant(Value::int(0));
    let nine = b.constant(Value::int(9));

    b.emit(Instruction::LoadConst(zero));
    b.emit(Instruction::StoreLocal(total));
    b.emit(Instruction::BuildList(0));
    b.emit(Instruction::GetIter);

    let loop_start = b.here();
    let for_iter_index = b.here();
    b.emit(Instruction::ForIter(0));
    b.emit(Instruction::StoreLocal(item));
    b.emit(Instruction::LoadConst(nine));
    b.emit(Instruction::StoreLocal(total));
    b.emit(Instruction::JumpAbsolute(loop_start));
    let loop_end = b.here();

    b.emit(Instruction::LoadLocal(total));
    b.emit(Instruction::ReturnValue);

    let mut code = b.build();
    code.instructions[for_iter_index as usize] = Instruction::ForIter(loop_end);

    let monty = Monty::new();
    let result = monty.run(Rc::new(code)).expect("iterating an empty list should not raise");
    let Value::Int(n) = result else { panic!("expected an int, got {result:?}") };
    assert_eq!(n.to_i64_clamped(), 0, "loop body must never run for an empty iterable");
}
