//! The in-memory AST (C2) and its compact binary codec (C3).

use std::fmt;

mod codec;
pub use codec::{decode, encode};

mod node;
pub use node::{CaseArm, Declarator, NodeKind};

/// A stable index into [`Ast::nodes`]. Assigned by the codec at decode time
/// and never reused or renumbered afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u16);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A single AST node: its stable id, its parent (`None` only for the root),
/// and its kind-specific payload.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
}

/// The decoded, immutable tree. `nodes[0]` is always the `Program` root
/// (§3 invariant). The AST is plain owned data — `Send + Sync` for free —
/// and never mutated once `decode` returns, matching §5's "the AST is
/// immutable after decode and may be safely read from any thread".
#[derive(Clone, Debug)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Ast {
    /// Builds an `Ast` from already-validated nodes. Used by the decoder and
    /// by hand-built test/demo ASTs (there is no lexer/parser in scope, §1).
    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0 as usize].kind
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Finds a top-level function definition by name (`setup`, `loop`, or a
    /// user function), scanning the Program root's direct children.
    pub fn find_function(&self, name: &str) -> Option<NodeId> {
        let NodeKind::Program { children } = self.kind(self.root()) else {
            return None;
        };
        children.iter().copied().find(|&id| match self.kind(id) {
            NodeKind::FunctionDefinition { declarator_name, .. } => declarator_name == name,
            _ => false,
        })
    }
}
