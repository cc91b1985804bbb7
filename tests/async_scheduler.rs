//! `await`/`asyncio.gather` suspension and resumption across the cooperative
//! scheduler (`spec.md` §4.E).

use monty::bytecode::{CodeFlags, Instruction};
use monty::value::{FunctionValue, Value};
use monty::{CodeBuilder, Monty};
use std::rc::Rc;

/// `async def answer(): return 42`
fn build_answer_coroutine() -> Rc<monty::bytecode::CodeObject> {
    let mut c = CodeBuilder::new("answer");
    c.flags(CodeFlags::IS_COROUTINE);
    let forty_two = c.constant(Value::int(42));
    c.emit(Instruction::LoadConst(forty_two));
    c.emit(Instruction::ReturnValue);
    Rc::new(c.build())
}

fn coroutine_function(name: &str, code: Rc<monty::bytecode::CodeObject>) -> Value {
    Value::Function(Rc::new(FunctionValue {
        name: name.to_string(),
        qualname: name.to_string(),
        code,
        defaults: Vec::new(),
        kwdefaults: Vec::new(),
    }))
}

#[test]
fn awaiting_a_coroutine_suspends_and_resumes_with_its_return_value() {
    let answer_code = build_answer_coroutine();

    let mut module = CodeBuilder::new("<module>");
    let placeholder = module.constant(coroutine_function("answer", answer_code));
    module.name("answer");
    module.emit(Instruction::MakeFunction { code_index: placeholder, num_defaults: 0, num_cells: 0 });
    module.emit(Instruction::StoreGlobal(0));
    module.emit(Instruction::LoadGlobal(0));
    module.emit(Instruction::Call { argc: 0, kwnames: Rc::from(vec![]), has_star: false, has_kwstar: false });
    module.emit(Instruction::GetAwaitable);
    module.emit(Instruction::Await);
    module.emit(Instruction::ReturnValue);

    let monty = Monty::new();
    let result = monty.run(Rc::new(module.build())).expect("await of a trivial coroutine should not raise");
    let Value::Int(n) = result else { panic!("expected an int, got {result:?}") };
    assert_eq!(n.to_i64_clamped(), 42);
}

#[test]
fn gather_collects_results_from_every_coroutine_in_argument_order() {
    let mut first = CodeBuilder::new("first");
    first.flags(CodeFlags::IS_COROUTINE);
    let one = first.constant(Value::int(1));
    first.emit(Instruction::LoadConst(one));
    first.emit(Instruction::ReturnValue);
    let first_code = Rc::new(first.build());

    let mut second = CodeBuilder::new("second");
    second.flags(CodeFlags::IS_COROUTINE);
    let two = second.constant(Value::int(2));
    second.emit(Instruction::LoadConst(two));
    second.emit(Instruction::ReturnValue);
    let second_code = Rc::new(second.build());

    let mut module = CodeBuilder::new("<module>");
    let first_placeholder = module.constant(coroutine_function("first", first_code));
    let second_placeholder = module.constant(coroutine_function("second", second_code));
    module.name("first");
    module.name("second");
    let zero_idx = module.name("__first_slot");
    let one_idx = module.name("__second_slot");

    module.emit(Instruction::MakeFunction { code_index: first_placeholder, num_defaults: 0, num_cells: 0 });
    module.emit(Instruction::StoreGlobal(zero_idx));
    module.emit(Instruction::MakeFunction { code_index: second_placeholder, num_defaults: 0, num_cells: 0 });
    module.emit(Instruction::StoreGlobal(one_idx));

    module.emit(Instruction::LoadGlobal(zero_idx));
    module.emit(Instruction::Call { argc: 0, kwnames: Rc::from(vec![]), has_star: false, has_kwstar: false });
    module.emit(Instruction::LoadGlobal(one_idx));
    module.emit(Instruction::Call { argc: 0, kwnames: Rc::from(vec![]), has_star: false, has_kwstar: false });
    module.emit(Instruction::Gather(2));
    module.emit(Instruction::ReturnValue);

    let monty = Monty::new();
    let result = monty.run(Rc::new(module.build())).expect("gather of two trivial coroutines should not raise");
    let Value::List(items) = result else { panic!("expected a list, got {result:?}") };
    let items = items.borrow();
    assert_eq!(items.len(), 2);
    let Value::Int(a) = &items[0] else { panic!("expected an int") };
    let Value::Int(b) = &items[1] else { panic!("expected an int") };
    assert_eq!(a.to_i64_clamped(), 1);
    assert_eq!(b.to_i64_clamped(), 2);
}

#[test]
fn gather_propagates_the_first_argument_order_exception() {
    let mut failing = CodeBuilder::new("failing");
    failing.flags(CodeFlags::IS_COROUTINE);
    let exc_type = failing.constant(Value::Type(Rc::new(monty::value::TypeValue {
        name: "ValueError".to_string(),
        id: 0,
        kind: monty::value::TypeKind::Exception,
    })));
    let message = failing.constant(Value::str("boom"));
    failing.emit(Instruction::LoadConst(exc_type));
    failing.emit(Instruction::LoadConst(message));
    failing.emit(Instruction::Call { argc: 1, kwnames: Rc::from(vec![]), has_star: false, has_kwstar: false });
    failing.emit(Instruction::Raise);
    let failing_code = Rc::new(failing.build());

    let mut ok = CodeBuilder::new("ok");
    ok.flags(CodeFlags::IS_COROUTINE);
    let three = ok.constant(Value::int(3));
    ok.emit(Instruction::LoadConst(three));
    ok.emit(Instruction::ReturnValue);
    let ok_code = Rc::new(ok.build());

    let mut module = CodeBuilder::new("<module>");
    let failing_placeholder = module.constant(coroutine_function("failing", failing_code));
    let ok_placeholder = module.constant(coroutine_function("ok", ok_code));
    let failing_slot = module.name("__failing_slot");
    let ok_slot = module.name("__ok_slot");

    module.emit(Instruction::MakeFunction { code_index: failing_placeholder, num_defaults: 0, num_cells: 0 });
    module.emit(Instruction::StoreGlobal(failing_slot));
    module.emit(Instruction::MakeFunction { code_index: ok_placeholder, num_defaults: 0, num_cells: 0 });
    module.emit(Instruction::StoreGlobal(ok_slot));

    module.emit(Instruction::LoadGlobal(failing_slot));
    module.emit(Instruction::Call { argc: 0, kwnames: Rc::from(vec![]), has_star: false, has_kwstar: false });
    module.emit(Instruction::LoadGlobal(ok_slot));
    module.emit(Instruction::Call { argc: 0, kwnames: Rc::from(vec![]), has_star: false, has_kwstar: false });
    module.emit(Instruction::Gather(2));
    module.emit(Instruction::ReturnValue);

    let monty = Monty::new();
    let err = monty.run(Rc::new(module.build())).unwrap_err();
    let Value::Exception(exc) = err.exception() else { panic!("expected an exception value") };
    assert_eq!(exc.class.name, "ValueError");
}
