//! Host-registered dataclass shapes (`spec.md` §4.D "Dataclass factory
//! protocol").

use monty::bytecode::Instruction;
use monty::value::Value;
use monty::{CodeBuilder, DataclassFactory, Monty};
use std::rc::Rc;

#[test]
fn constructs_a_mutable_dataclass_and_reads_a_field() {
    let mut b = CodeBuilder::new("<module>");
    b.name("Point");
    let x_attr = b.name("x");
    let one = b.constant(Value::int(1));
    let two = b.constant(Value::int(2));

    b.emit(Instruction::LoadGlobal(0));
    b.emit(Instruction::LoadConst(one));
    b.emit(Instruction::LoadConst(two));
    b.emit(Instruction::Call { argc: 2, kwnames: Rc::from(vec![]), has_star: false, has_kwstar: false });
    b.emit(Instruction::LoadAttr(x_attr));
    b.emit(Instruction::ReturnValue);

    let mut monty = Monty::new();
    monty.register_dataclass_factory(DataclassFactory {
        name: "Point".into(),
        fields: vec![Rc::from("x"), Rc::from("y")],
        frozen: false,
    });

    let result = monty.run(Rc::new(b.build())).expect("Point(1, 2).x should not raise");
    let Value::Int(n) = result else { panic!("expected an int, got {result:?}") };
    assert_eq!(n.to_i64_clamped(), 1);
}

#[test]
fn mutating_a_frozen_dataclass_field_raises_attribute_error() {
    let mut b = CodeBuilder::new("<module>");
    b.name("Point");
    let x_attr = b.name("x");
    let one = b.constant(Value::int(1));
    let two = b.constant(Value::int(2));
    let nine = b.constant(Value::int(9));

    b.emit(Instruction::LoadGlobal(0));
    b.emit(Instruction::LoadConst(one));
    b.emit(Instruction::LoadConst(two));
    b.emit(Instruction::Call { argc: 2, kwnames: Rc::from(vec![]), has_star: false, has_kwstar: false });
    b.emit(Instruction::LoadConst(nine));
    b.emit(Instruction::StoreAttr(x_attr));
    b.emit(Instruction::LoadConst(one));
    b.emit(Instruction::ReturnValue);

    let mut monty = Monty::new();
    monty.register_dataclass_factory(DataclassFactory {
        name: "Point".into(),
        fields: vec![Rc::from("x"), Rc::from("y")],
        frozen: true,
    });

    let err = monty.run(Rc::new(b.build())).unwrap_err();
    let Value::Exception(exc) = err.exception() else { panic!("expected an exception value") };
    assert_eq!(exc.class.name, "AttributeError");
}
