//! Lexically nested variable frames (C4).

use std::collections::HashMap;

use crate::ast::NodeId;
use crate::error::EngineError;
use crate::value::{ArrayShape, Value, ValueType};

/// A single variable binding installed by a declaration.
#[derive(Clone, Debug)]
pub struct Binding {
    pub value_type: ValueType,
    pub value: Value,
    pub is_const: bool,
    pub shape: Option<ArrayShape>,
}

impl Binding {
    pub fn new(value_type: ValueType, value: Value, is_const: bool) -> Self {
        Self {
            value_type,
            value,
            is_const,
            shape: None,
        }
    }
}

/// A user-defined function, captured once while executing top-level
/// declarations. Functions are not `Value`s (§4.4), so they live alongside
/// bindings rather than inside a `Frame`.
#[derive(Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<NodeId>,
    pub body: NodeId,
}

type Frame = HashMap<String, Binding>;

/// Lexically nested variable frames with shadowing. `frames[0]` is the global
/// frame: pushed once at session start and never popped.
pub struct ScopeStack {
    frames: Vec<Frame>,
    functions: HashMap<String, FunctionDef>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::new()],
            functions: HashMap::new(),
        }
    }

    pub fn push(&mut self) {
        self.frames.push(Frame::new());
    }

    pub fn pop(&mut self) {
        debug_assert!(self.frames.len() > 1, "the global frame must never be popped");
        self.frames.pop();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Drops frames above `depth`, used to unwind a call's frames in one
    /// step regardless of how many nested blocks left theirs in place.
    pub fn truncate(&mut self, depth: usize) {
        debug_assert!(depth >= 1, "the global frame must never be popped");
        self.frames.truncate(depth);
    }

    /// Always inserts into the innermost (current) frame, shadowing any
    /// binding of the same name in an enclosing frame.
    pub fn declare(&mut self, name: impl Into<String>, binding: Binding) {
        self.frames
            .last_mut()
            .expect("ScopeStack always has at least the global frame")
            .insert(name.into(), binding);
    }

    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.frames.iter().rev().find_map(|f| f.get(name))
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Binding> {
        self.frames.iter_mut().rev().find_map(|f| f.get_mut(name))
    }

    /// Writes into the first (innermost) frame defining `name`.
    pub fn assign(&mut self, name: &str, value: Value) -> Result<(), EngineError> {
        match self.lookup_mut(name) {
            Some(binding) => {
                binding.value = value;
                Ok(())
            }
            None => Err(EngineError::name_error(format!("assignment to undeclared variable `{name}`"))),
        }
    }

    pub fn declare_function(&mut self, def: FunctionDef) {
        self.functions.insert(def.name.clone(), def);
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(name)
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}
