//! Test-fixture assembler for [`CodeObject`]s.
//!
//! Stands in for the out-of-scope compiler (`spec.md` §1): integration tests
//! build `CodeObject`s directly with this builder instead of going through
//! source text. Chaining `emit_*` methods that return `&mut Self` mirrors the
//! grounding crate's `ScriptBuilder`.

use super::{CodeFlags, CodeObject, Instruction};
use crate::value::Value;
use std::rc::Rc;

pub struct CodeBuilder {
    name: String,
    qualname: String,
    argcount: u32,
    kwonlyargcount: u32,
    varnames: Vec<Rc<str>>,
    cellvars: Vec<Rc<str>>,
    freevars: Vec<Rc<str>>,
    consts: Vec<Value>,
    names: Vec<Rc<str>>,
    instructions: Vec<Instruction>,
    lines: Vec<u32>,
    flags: CodeFlags,
    current_line: u32,
}

impl CodeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            qualname: name.clone(),
            name,
            argcount: 0,
            kwonlyargcount: 0,
            varnames: Vec::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
            instructions: Vec::new(),
            lines: Vec::new(),
            flags: CodeFlags::empty(),
            current_line: 1,
        }
    }

    pub fn argcount(&mut self, n: u32) -> &mut Self {
        self.argcount = n;
        self
    }

    pub fn kwonlyargcount(&mut self, n: u32) -> &mut Self {
        self.kwonlyargcount = n;
        self
    }

    pub fn flags(&mut self, flags: CodeFlags) -> &mut Self {
        self.flags = flags;
        self
    }

    pub fn line(&mut self, line: u32) -> &mut Self {
        self.current_line = line;
        self
    }

    /// Interns `name` and returns its varname slot, creating one if new.
    pub fn varname(&mut self, name: &str) -> u32 {
        if let Some(idx) = self.varnames.iter().position(|v| v.as_ref() == name) {
            return idx as u32;
        }
        self.varnames.push(Rc::from(name));
        (self.varnames.len() - 1) as u32
    }

    pub fn cellvar(&mut self, name: &str) -> u32 {
        if let Some(idx) = self.cellvars.iter().position(|v| v.as_ref() == name) {
            return idx as u32;
        }
        self.cellvars.push(Rc::from(name));
        (self.cellvars.len() - 1) as u32
    }

    /// Interns `name` into the builder's name table (attribute/global/import
    /// names), returning its index.
    pub fn name(&mut self, name: &str) -> u32 {
        if let Some(idx) = self.names.iter().position(|v| v.as_ref() == name) {
            return idx as u32;
        }
        self.names.push(Rc::from(name));
        (self.names.len() - 1) as u32
    }

    /// Interns `value` as a constant, returning its index. Constants are not
    /// deduplicated by value equality (mutable containers as literals would
    /// make that unsound); callers that want sharing should reuse the index.
    pub fn constant(&mut self, value: Value) -> u32 {
        self.consts.push(value);
        (self.consts.len() - 1) as u32
    }

    pub fn emit(&mut self, instr: Instruction) -> &mut Self {
        self.instructions.push(instr);
        self.lines.push(self.current_line);
        self
    }

    /// The index the *next* emitted instruction will occupy — useful for
    /// computing jump targets before the jump's destination is emitted.
    pub fn here(&self) -> u32 {
        self.instructions.len() as u32
    }

    pub fn build(self) -> CodeObject {
        CodeObject {
            name: self.name,
            qualname: self.qualname,
            argcount: self.argcount,
            kwonlyargcount: self.kwonlyargcount,
            varnames: self.varnames,
            cellvars: self.cellvars,
            freevars: self.freevars,
            consts: self.consts,
            names: self.names,
            instructions: self.instructions,
            lines: self.lines,
            flags: self.flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_simple_add_and_return() {
        let mut b = CodeBuilder::new("<module>");
        let one = b.constant(Value::int(1));
        let two = b.constant(Value::int(2));
        b.emit(Instruction::LoadConst(one));
        b.emit(Instruction::LoadConst(two));
        b.emit(Instruction::BinaryAdd);
        b.emit(Instruction::ReturnValue);
        let code = b.build();
        assert_eq!(code.instructions.len(), 4);
        assert_eq!(code.consts.len(), 2);
    }

    #[test]
    fn jump_target_can_reference_a_not_yet_emitted_instruction() {
        let mut b = CodeBuilder::new("<module>");
        let target_placeholder = b.here();
        b.emit(Instruction::JumpIfFalse(0));
        b.emit(Instruction::Nop);
        let actual_target = b.here();
        // Patch: in a real compiler this would rewrite the emitted
        // instruction; here we just confirm `here()` tracked position.
        assert_eq!(target_placeholder, 0);
        assert_eq!(actual_target, 2);
    }
}
