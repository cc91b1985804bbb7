//! Dataclass factory protocol (`spec.md` §4.D "Dataclass factory protocol").
//!
//! The host registers record types by name, field list, and frozen-ness
//! before `run()`; the compiler/interpreter reference them the way it
//! references any other name in scope. Construction and attribute access
//! live on [`crate::value::Value`] itself (`get_attr_str`/`set_attr`); this
//! module only owns the registry and the `TypeValue` each registered class
//! resolves to.

use crate::value::{DataclassInstance, Heap, TypeKind, TypeValue, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// One host-declared dataclass shape: its field order and whether
/// instances are frozen (immutable, hashable) or mutable (unhashable,
/// `spec.md` §3 invariant 3).
pub struct DataclassFactory {
    pub name: String,
    pub fields: Vec<Rc<str>>,
    pub frozen: bool,
}

/// Registry of dataclass types known to this engine. Populated once before
/// `run()` via `Monty::register_dataclass_factory`; consulted whenever the
/// interpreter executes a call to a registered class name.
#[derive(Default)]
pub struct DataclassRegistry {
    types: RefCell<HashMap<String, Rc<TypeValue>>>,
}

impl DataclassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, heap: &Heap, factory: DataclassFactory) -> Rc<TypeValue> {
        let type_value = Rc::new(TypeValue {
            name: factory.name.clone(),
            id: heap.register(),
            kind: TypeKind::Dataclass { fields: factory.fields, frozen: factory.frozen },
        });
        self.types.borrow_mut().insert(factory.name, type_value.clone());
        type_value
    }

    pub fn get(&self, name: &str) -> Option<Rc<TypeValue>> {
        self.types.borrow().get(name).cloned()
    }

    /// Constructs an instance from positional field values, in declared
    /// field order — the only construction protocol the supported subset
    /// needs (keyword dataclass construction is handled by the interpreter's
    /// ordinary argument-binding machinery before this is called).
    pub fn construct(&self, class: &Rc<TypeValue>, values: Vec<Value>) -> crate::error::VmResult<Value> {
        let TypeKind::Dataclass { fields, .. } = &class.kind else {
            return Err(crate::error::VmError::type_error(format!("'{}' is not a dataclass", class.name)));
        };
        if values.len() != fields.len() {
            return Err(crate::error::VmError::type_error(format!(
                "{}() takes {} positional arguments but {} were given",
                class.name,
                fields.len(),
                values.len()
            )));
        }
        Ok(Value::DataclassInstance(Rc::new(DataclassInstance {
            class: class.clone(),
            field_names: fields.clone(),
            fields: RefCell::new(values),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_instance_rejects_set_attr_with_canonical_message() {
        let heap = Heap::new();
        let registry = DataclassRegistry::new();
        let class = registry.register(
            &heap,
            DataclassFactory { name: "Point".into(), fields: vec![Rc::from("x"), Rc::from("y")], frozen: true },
        );
        let instance = registry.construct(&class, vec![Value::int(1), Value::int(2)]).unwrap();
        let err = instance.set_attr("x", Value::int(99)).unwrap_err();
        assert_eq!(err.exception_class().name(), "AttributeError");
    }

    #[test]
    fn mutable_instance_allows_set_attr() {
        let heap = Heap::new();
        let registry = DataclassRegistry::new();
        let class = registry.register(
            &heap,
            DataclassFactory { name: "Counter".into(), fields: vec![Rc::from("n")], frozen: false },
        );
        let instance = registry.construct(&class, vec![Value::int(0)]).unwrap();
        instance.set_attr("n", Value::int(1)).unwrap();
        let Value::DataclassInstance(inst) = &instance else { unreachable!() };
        assert!(matches!(inst.fields.borrow()[0], Value::Int(_)));
    }
}
