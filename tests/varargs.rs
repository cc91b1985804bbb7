//! `*args`/`**kwargs` argument binding (`spec.md` §4.D "Argument binding").

use monty::bytecode::{CodeFlags, Instruction};
use monty::value::{FunctionValue, Value};
use monty::{CodeBuilder, Monty};
use std::rc::Rc;

#[test]
fn star_args_collects_the_overflow_positionals_into_a_tuple() {
    // def pack(*args): return args
    let mut pack = CodeBuilder::new("pack");
    pack.flags(CodeFlags::HAS_VARARGS);
    let args = pack.varname("args");
    pack.emit(Instruction::LoadLocal(args));
    pack.emit(Instruction::ReturnValue);
    let pack_code = Rc::new(pack.build());

    let mut module = CodeBuilder::new("<module>");
    let placeholder = module.constant(Value::Function(Rc::new(FunctionValue {
        name: "pack".into(),
        qualname: "pack".into(),
        code: pack_code,
        defaults: Vec::new(),
        kwdefaults: Vec::new(),
    })));
    module.name("pack");
    let ten = module.constant(Value::int(10));
    let twenty = module.constant(Value::int(20));
    let thirty = module.constant(Value::int(30));
    module.emit(Instruction::MakeFunction { code_index: placeholder, num_defaults: 0, num_cells: 0 });
    module.emit(Instruction::StoreGlobal(0));
    module.emit(Instruction::LoadGlobal(0));
    module.emit(Instruction::LoadConst(ten));
    module.emit(Instruction::LoadConst(twenty));
    module.emit(Instruction::LoadConst(thirty));
    module.emit(Instruction::Call { argc: 3, kwnames: Rc::from(vec![]), has_star: false, has_kwstar: false });
    module.emit(Instruction::ReturnValue);

    let monty = Monty::new();
    let result = monty.run(Rc::new(module.build())).expect("pack(10, 20, 30) should not raise");
    let Value::Tuple(items) = result else { panic!("expected a tuple, got {result:?}") };
    assert_eq!(items.len(), 3);
    let Value::Int(a) = &items[0] else { panic!("expected an int") };
    let Value::Int(b) = &items[1] else { panic!("expected an int") };
    let Value::Int(c) = &items[2] else { panic!("expected an int") };
    assert_eq!((a.to_i64_clamped(), b.to_i64_clamped(), c.to_i64_clamped()), (10, 20, 30));
}

#[test]
fn double_star_kwargs_collects_unmatched_keywords_into_a_dict() {
    // def describe(name, **extra): return extra
    let mut describe = CodeBuilder::new("describe");
    describe.argcount(1);
    describe.flags(CodeFlags::HAS_VARKWARGS);
    let _name = describe.varname("name");
    let extra = describe.varname("extra");
    describe.emit(Instruction::LoadLocal(extra));
    describe.emit(Instruction::ReturnValue);
    let describe_code = Rc::new(describe.build());

    let mut module = CodeBuilder::new("<module>");
    let placeholder = module.constant(Value::Function(Rc::new(FunctionValue {
        name: "describe".into(),
        qualname: "describe".into(),
        code: describe_code,
        defaults: Vec::new(),
        kwdefaults: Vec::new(),
    })));
    module.name("describe");
    let alice = module.constant(Value::str("alice"));
    let city = module.constant(Value::str("nyc"));
    let kwname_city: Rc<str> = Rc::from("city");
    module.emit(Instruction::MakeFunction { code_index: placeholder, num_defaults: 0, num_cells: 0 });
    module.emit(Instruction::StoreGlobal(0));
    module.emit(Instruction::LoadGlobal(0));
    module.emit(Instruction::LoadConst(alice));
    module.emit(Instruction::LoadConst(city));
    module.emit(Instruction::Call {
        argc: 2,
        kwnames: Rc::from(vec![kwname_city]),
        has_star: false,
        has_kwstar: false,
    });
    module.emit(Instruction::ReturnValue);

    let monty = Monty::new();
    let result = monty.run(Rc::new(module.build())).expect("describe('alice', city='nyc') should not raise");
    let Value::Dict(extra) = result else { panic!("expected a dict, got {result:?}") };
    let extra = extra.borrow();
    assert_eq!(extra.len(), 1);
    let entries: Vec<_> = extra.entries().collect();
    let (key, value) = entries[0];
    assert!(matches!(key, Value::Str(s) if s.as_ref() == "city"));
    assert!(matches!(value, Value::Str(s) if s.as_ref() == "nyc"));
}

#[test]
fn calling_with_too_many_positionals_and_no_star_args_raises_type_error() {
    let mut greet = CodeBuilder::new("greet");
    greet.argcount(1);
    let _name = greet.varname("name");
    greet.emit(Instruction::LoadLocal(0));
    greet.emit(Instruction::ReturnValue);
    let greet_code = Rc::new(greet.build());

    let mut module = CodeBuilder::new("<module>");
    let placeholder = module.constant(Value::Function(Rc::new(FunctionValue {
        name: "greet".into(),
        qualname: "greet".into(),
        code: greet_code,
        defaults: Vec::new(),
        kwdefaults: Vec::new(),
    })));
    module.name("greet");
    let a = module.constant(Value::str("a"));
    let b = module.constant(Value::str("b"));
    module.emit(Instruction::MakeFunction { code_index: placeholder, num_defaults: 0, num_cells: 0 });
    module.emit(Instruction::StoreGlobal(0));
    module.emit(Instruction::LoadGlobal(0));
    module.emit(Instruction::LoadConst(a));
    module.emit(Instruction::LoadConst(b));
    module.emit(Instruction::Call { argc: 2, kwnames: Rc::from(vec![]), has_star: false, has_kwstar: false });
    module.emit(Instruction::ReturnValue);

    let monty = Monty::new();
    let err = monty.run(Rc::new(module.build())).unwrap_err();
    let Value::Exception(exc) = err.exception() else { panic!("expected an exception value") };
    assert_eq!(exc.class.name, "TypeError");
}
