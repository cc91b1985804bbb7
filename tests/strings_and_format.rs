//! f-string formatting: `FormatValue` stringifies one value, `BuildString`
//! concatenates the parts (`spec.md` §4.D "f-strings").

use monty::bytecode::Instruction;
use monty::value::Value;
use monty::{CodeBuilder, Monty};
use std::rc::Rc;

#[test]
fn fstring_interpolates_a_non_string_value_between_literal_parts() {
    // f"count: {42}!"
    let mut b = CodeBuilder::new("<module>");
    let prefix = b.constant(Value::str("count: "));
    let count = b.constant(Value::int(42));
    let suffix = b.constant(Value::str("!"));

    b.emit(Instruction::LoadConst(prefix));
    b.emit(Instruction::LoadConst(count));
    b.emit(Instruction::FormatValue);
    b.emit(Instruction::LoadConst(suffix));
    b.emit(Instruction::BuildString(3));
    b.emit(Instruction::ReturnValue);

    let monty = Monty::new();
    let result = monty.run(Rc::new(b.build())).expect("formatting an int into a string should not raise");
    let Value::Str(s) = result else { panic!("expected a str, got {result:?}") };
    assert_eq!(s.as_ref(), "count: 42!");
}

#[test]
fn build_string_with_a_single_part_is_a_no_op_concatenation() {
    let mut b = CodeBuilder::new("<module>");
    let only = b.constant(Value::str("solo"));
    b.emit(Instruction::LoadConst(only));
    b.emit(Instruction::BuildString(1));
    b.emit(Instruction::ReturnValue);

    let monty = Monty::new();
    let result = monty.run(Rc::new(b.build())).expect("should not raise");
    let Value::Str(s) = result else { panic!("expected a str, got {result:?}") };
    assert_eq!(s.as_ref(), "solo");
}
