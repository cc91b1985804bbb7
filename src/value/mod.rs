//! The Monty value model (`spec.md` §3, §4.A).

pub mod bigint;
pub mod container;
pub mod hashing;
pub mod heap;

pub use bigint::Int;
pub use container::ValueMap;
pub use hashing::RecursionGuard;
pub use heap::{Heap, HeapId};

use crate::bytecode::CodeObject;
use crate::error::{VmError, VmResult};
use std::cell::RefCell;
use std::rc::Rc;

/// A Monty runtime value. Small immutables are unboxed inline; heap objects
/// are held by `Rc` so cloning a `Value` is always O(1) (`spec.md` §3).
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Ellipsis,
    Int(Int),
    Float(f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    Tuple(Rc<Vec<Value>>),
    List(Rc<RefCell<Vec<Value>>>),
    Dict(Rc<RefCell<ValueMap>>),
    Set(Rc<RefCell<Vec<Value>>>),
    FrozenSet(Rc<Vec<Value>>),
    Range(Rc<RangeValue>),
    Slice(Rc<SliceValue>),
    Function(Rc<FunctionValue>),
    Closure(Rc<Closure>),
    BuiltinFunction(Rc<BuiltinFunction>),
    BoundMethod(Rc<BoundMethod>),
    Type(Rc<TypeValue>),
    Exception(Rc<ExceptionValue>),
    Coroutine(Rc<RefCell<crate::scheduler::Coroutine>>),
    Future(Rc<RefCell<crate::host::FutureValue>>),
    Task(Rc<RefCell<crate::scheduler::TaskHandle>>),
    DataclassInstance(Rc<DataclassInstance>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeValue {
    pub start: Int,
    pub stop: Int,
    pub step: Int,
}

impl RangeValue {
    pub fn len(&self) -> u64 {
        let (start, stop, step) = (self.start.to_bigint(), self.stop.to_bigint(), self.step.to_bigint());
        use num_bigint::BigInt;
        use num_traits::{Signed, ToPrimitive, Zero};
        if step.is_zero() {
            return 0;
        }
        let diff = if step.is_positive() { &stop - &start } else { &start - &stop };
        if diff.is_negative() {
            return 0;
        }
        let step_abs = step.abs();
        let one = BigInt::from(1);
        (((diff - &one) / &step_abs) + &one).to_u64().unwrap_or(u64::MAX)
    }

    pub fn nth(&self, i: u64) -> Int {
        self.start.add(&self.step.mul(&Int::from_bigint(num_bigint::BigInt::from(i))))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SliceValue {
    pub start: Option<Int>,
    pub stop: Option<Int>,
    pub step: Option<Int>,
}

#[derive(Debug)]
pub struct FunctionValue {
    pub name: String,
    pub qualname: String,
    pub code: Rc<CodeObject>,
    pub defaults: Vec<Value>,
    pub kwdefaults: Vec<(Rc<str>, Value)>,
}

#[derive(Debug)]
pub struct Closure {
    pub function: Rc<FunctionValue>,
    pub cells: Vec<Rc<RefCell<Value>>>,
}

pub type NativeFn = fn(&[Value], &[(Rc<str>, Value)]) -> VmResult<Value>;

/// What calling a [`BuiltinFunction`] actually does: run in-process Rust
/// logic, or cross the host bridge (`spec.md` §4.F "External calls" — "from
/// script land they appear as ordinary Python functions").
pub enum BuiltinKind {
    Native(NativeFn),
    /// Calls `HostBridge::call_sync` and returns its result immediately.
    HostSync(Rc<str>),
    /// Calls `HostBridge::call_async`, producing a `Value::Future` the
    /// script can `await`.
    HostAsync(Rc<str>),
}

pub struct BuiltinFunction {
    pub name: Rc<str>,
    pub kind: BuiltinKind,
}

impl std::fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinFunction").field("name", &self.name).finish()
    }
}

#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub function: Value,
}

/// A type/class metaobject: `type(x)`, exception classes, and dataclass
/// types. Hashed and compared by identity (`spec.md` §3).
#[derive(Debug)]
pub struct TypeValue {
    pub name: String,
    pub id: HeapId,
    pub kind: TypeKind,
}

#[derive(Debug, Clone)]
pub enum TypeKind {
    Builtin,
    Exception,
    Dataclass { fields: Vec<Rc<str>>, frozen: bool },
}

impl PartialEq for TypeValue {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[derive(Debug)]
pub struct ExceptionValue {
    pub class: Rc<TypeValue>,
    pub args: RefCell<Rc<Vec<Value>>>,
    pub cause: RefCell<Option<Value>>,
    pub traceback: RefCell<Vec<TracebackEntry>>,
}

#[derive(Debug, Clone)]
pub struct TracebackEntry {
    pub function_name: String,
    pub line: u32,
}

#[derive(Debug)]
pub struct DataclassInstance {
    pub class: Rc<TypeValue>,
    pub field_names: Vec<Rc<str>>,
    pub fields: RefCell<Vec<Value>>,
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn int(v: i64) -> Self {
        Value::Int(Int::from_i64(v))
    }

    pub fn is_truthy(&self) -> VmResult<bool> {
        Ok(match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Ellipsis => true,
            Value::Int(i) => !i.is_zero(),
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Set(s) => !s.borrow().is_empty(),
            Value::FrozenSet(s) => !s.is_empty(),
            Value::Range(r) => r.len() > 0,
            _ => true,
        })
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::None => "NoneType".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Ellipsis => "ellipsis".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::Str(_) => "str".to_string(),
            Value::Bytes(_) => "bytes".to_string(),
            Value::Tuple(_) => "tuple".to_string(),
            Value::List(_) => "list".to_string(),
            Value::Dict(_) => "dict".to_string(),
            Value::Set(_) => "set".to_string(),
            Value::FrozenSet(_) => "frozenset".to_string(),
            Value::Range(_) => "range".to_string(),
            Value::Slice(_) => "slice".to_string(),
            Value::Function(_) | Value::Closure(_) => "function".to_string(),
            Value::BuiltinFunction(_) => "builtin_function_or_method".to_string(),
            Value::BoundMethod(_) => "method".to_string(),
            Value::Type(_) => "type".to_string(),
            Value::Exception(_) => "Exception".to_string(),
            Value::Coroutine(_) => "coroutine".to_string(),
            Value::Future(_) => "Future".to_string(),
            Value::Task(_) => "Task".to_string(),
            Value::DataclassInstance(inst) => inst.class.name.clone(),
        }
    }

    /// Whether this value's type is hashable *in principle* (content
    /// still has to clear the recursion-depth guard for containers).
    pub fn is_hashable_type(&self) -> bool {
        !matches!(
            self,
            Value::List(_) | Value::Dict(_) | Value::Set(_)
        ) && !matches!(self, Value::DataclassInstance(inst) if !is_frozen(inst))
    }

    pub fn get_attr(&self, name: &Value, heap: &Heap) -> VmResult<Value> {
        let name_str = match name {
            Value::Str(s) => s.clone(),
            other => {
                return Err(VmError::type_error(format!(
                    "attribute name must be string, not '{}'",
                    other.type_name()
                )))
            }
        };
        self.get_attr_str(&name_str, heap)
    }

    pub fn get_attr_str(&self, name: &str, _heap: &Heap) -> VmResult<Value> {
        match self {
            Value::Slice(s) => match name {
                "start" => Ok(s.start.clone().map(Value::Int).unwrap_or(Value::None)),
                "stop" => Ok(s.stop.clone().map(Value::Int).unwrap_or(Value::None)),
                "step" => Ok(s.step.clone().map(Value::Int).unwrap_or(Value::None)),
                _ => Err(VmError::attribute_error(format!(
                    "'slice' object has no attribute '{name}'"
                ))),
            },
            Value::Exception(exc) => match name {
                "args" => Ok(Value::Tuple(exc.args.borrow().clone())),
                "__cause__" => Ok(exc.cause.borrow().clone().unwrap_or(Value::None)),
                _ => Err(VmError::attribute_error(format!(
                    "'{}' object has no attribute '{name}'",
                    exc.class.name
                ))),
            },
            Value::DataclassInstance(inst) => {
                match inst.field_names.iter().position(|f| f.as_ref() == name) {
                    Some(idx) => Ok(inst.fields.borrow()[idx].clone()),
                    None => Err(VmError::attribute_error(format!(
                        "'{}' object has no attribute '{name}'",
                        inst.class.name
                    ))),
                }
            }
            _ => Err(VmError::attribute_error(format!(
                "'{}' object has no attribute '{name}'",
                self.type_name()
            ))),
        }
    }

    pub fn set_attr(&self, name: &str, value: Value) -> VmResult<()> {
        match self {
            Value::DataclassInstance(inst) => {
                let TypeKind::Dataclass { frozen, .. } = &inst.class.kind else {
                    unreachable!("dataclass instance with non-dataclass type");
                };
                if *frozen {
                    return Err(VmError::attribute_error(format!(
                        "'{}' object attribute '{name}' is read-only",
                        inst.class.name
                    )));
                }
                match inst.field_names.iter().position(|f| f.as_ref() == name) {
                    Some(idx) => {
                        inst.fields.borrow_mut()[idx] = value;
                        Ok(())
                    }
                    None => Err(VmError::attribute_error(format!(
                        "'{}' object has no attribute '{name}'",
                        inst.class.name
                    ))),
                }
            }
            _ => Err(VmError::attribute_error(format!(
                "'{}' object has no attribute '{name}'",
                self.type_name()
            ))),
        }
    }

    pub fn len(&self) -> VmResult<usize> {
        Ok(match self {
            Value::Str(s) => s.chars().count(),
            Value::Bytes(b) => b.len(),
            Value::Tuple(t) => t.len(),
            Value::List(l) => l.borrow().len(),
            Value::Dict(d) => d.borrow().len(),
            Value::Set(s) => s.borrow().len(),
            Value::FrozenSet(s) => s.len(),
            Value::Range(r) => r.len() as usize,
            other => {
                return Err(VmError::type_error(format!(
                    "object of type '{}' has no len()",
                    other.type_name()
                )))
            }
        })
    }
}

fn is_frozen(inst: &DataclassInstance) -> bool {
    matches!(&inst.class.kind, TypeKind::Dataclass { frozen: true, .. })
}
