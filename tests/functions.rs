//! Recursive user-defined function calls, driven through the frame stack
//! rather than native recursion (`spec.md` §4.D).

use monty::bytecode::Instruction;
use monty::value::{FunctionValue, Value};
use monty::{CodeBuilder, Monty};
use std::rc::Rc;

fn build_factorial_module() -> monty::bytecode::CodeObject {
    let mut fact = CodeBuilder::new("factorial");
    fact.argcount(1);
    let n = fact.varname("n");
    fact.name("factorial");
    let one = fact.constant(Value::int(1));

    fact.emit(Instruction::LoadLocal(n));
    fact.emit(Instruction::LoadConst(one));
    fact.emit(Instruction::CompareLe);
    let jump_if_false = fact.here();
    fact.emit(Instruction::JumpIfFalse(0));
    fact.emit(Instruction::LoadConst(one));
    fact.emit(Instruction::ReturnValue);
    let else_target = fact.here();
    fact.emit(Instruction::LoadLocal(n));
    fact.emit(Instruction::LoadGlobal(0));
    fact.emit(Instruction::LoadLocal(n));
    fact.emit(Instruction::LoadConst(one));
    fact.emit(Instruction::BinarySub);
    fact.emit(Instruction::Call { argc: 1, kwnames: Rc::from(vec![]), has_star: false, has_kwstar: false });
    fact.emit(Instruction::BinaryMul);
    fact.emit(Instruction::ReturnValue);

    let mut patched = fact.build();
    patched.instructions[jump_if_false as usize] = Instruction::JumpIfFalse(else_target);
    patched
}

#[test]
fn recursive_factorial_returns_120() {
    let fact_code = Rc::new(build_factorial_module());

    let mut module = CodeBuilder::new("<module>");
    let fact_placeholder = module.constant(Value::Function(Rc::new(FunctionValue {
        name: "factorial".into(),
        qualname: "factorial".into(),
        code: fact_code,
        defaults: Vec::new(),
        kwdefaults: Vec::new(),
    })));
    module.name("factorial");
    let five = module.constant(Value::int(5));
    module.emit(Instruction::MakeFunction { code_index: fact_placeholder, num_defaults: 0, num_cells: 0 });
    module.emit(Instruction::StoreGlobal(0));
    module.emit(Instruction::LoadGlobal(0));
    module.emit(Instruction::LoadConst(five));
    module.emit(Instruction::Call { argc: 1, kwnames: Rc::from(vec![]), has_star: false, has_kwstar: false });
    module.emit(Instruction::ReturnValue);

    let monty = Monty::new();
    let result = monty.run(Rc::new(module.build())).expect("factorial(5) should not raise");
    let Value::Int(n) = result else { panic!("expected an int, got {result:?}") };
    assert_eq!(n.to_i64_clamped(), 120);
}

#[test]
fn calling_an_undefined_global_raises_runtime_error() {
    let mut module = CodeBuilder::new("<module>");
    module.name("missing");
    module.emit(Instruction::LoadGlobal(0));
    module.emit(Instruction::ReturnValue);

    let monty = Monty::new();
    let err = monty.run(Rc::new(module.build())).unwrap_err();
    let Value::Exception(exc) = err.exception() else { panic!("expected an exception value") };
    assert_eq!(exc.class.name, "RuntimeError");
}

#[test]
fn deep_recursion_raises_recursion_error_instead_of_overflowing_the_native_stack() {
    // `countdown(n)` calls itself unconditionally until the recursion guard
    // trips; this must come back as a script-visible exception, not a
    // process crash, regardless of how deep `max_recursion_depth` allows.
    let mut countdown = CodeBuilder::new("countdown");
    countdown.argcount(1);
    let n = countdown.varname("n");
    countdown.name("countdown");
    let one = countdown.constant(Value::int(1));

    countdown.emit(Instruction::LoadGlobal(0));
    countdown.emit(Instruction::LoadLocal(n));
    countdown.emit(Instruction::LoadConst(one));
    countdown.emit(Instruction::BinaryAdd);
    countdown.emit(Instruction::Call { argc: 1, kwnames: Rc::from(vec![]), has_star: false, has_kwstar: false });
    countdown.emit(Instruction::ReturnValue);
    let countdown_code = Rc::new(countdown.build());

    let mut module = CodeBuilder::new("<module>");
    let placeholder = module.constant(Value::Function(Rc::new(FunctionValue {
        name: "countdown".into(),
        qualname: "countdown".into(),
        code: countdown_code,
        defaults: Vec::new(),
        kwdefaults: Vec::new(),
    })));
    module.name("countdown");
    let zero = module.constant(Value::int(0));
    module.emit(Instruction::MakeFunction { code_index: placeholder, num_defaults: 0, num_cells: 0 });
    module.emit(Instruction::StoreGlobal(0));
    module.emit(Instruction::LoadGlobal(0));
    module.emit(Instruction::LoadConst(zero));
    module.emit(Instruction::Call { argc: 1, kwnames: Rc::from(vec![]), has_star: false, has_kwstar: false });
    module.emit(Instruction::ReturnValue);

    let monty = Monty::with_limits(monty::limits::ResourceLimits::new().with_max_recursion_depth(64));
    let err = monty.run(Rc::new(module.build())).unwrap_err();
    let Value::Exception(exc) = err.exception() else { panic!("expected an exception value") };
    assert_eq!(exc.class.name, "RecursionError");
}
