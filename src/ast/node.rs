//! Node kinds (C2). Each variant carries only the fields defined for that
//! kind in §3 — there is no common base type, so the polymorphic-value-
//! assignment bug the codec's design note (§9) warns about cannot recur: a
//! match arm either has the field or it doesn't.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::ast::NodeId;
use crate::value::ValueType;

/// A variable declarator: `name[dims] = initializer`.
#[derive(Clone, Debug)]
pub struct Declarator {
    pub name: String,
    pub array_dims: Vec<usize>,
    pub initializer: Option<NodeId>,
}

/// One `case`/`default` arm of a `Switch`. `value = None` marks `default`.
#[derive(Clone, Debug)]
pub struct CaseArm {
    pub value: Option<NodeId>,
    pub body: Vec<NodeId>,
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Program {
        children: Vec<NodeId>,
    },
    CompoundStatement {
        children: Vec<NodeId>,
    },
    VariableDeclaration {
        declared_type: ValueType,
        declarators: Vec<Declarator>,
        is_const: bool,
    },
    FunctionDefinition {
        return_type: ValueType,
        declarator_name: String,
        params: Vec<NodeId>,
        body: NodeId,
    },
    Parameter {
        param_type: ValueType,
        name: String,
        default: Option<NodeId>,
    },
    If {
        condition: NodeId,
        then_branch: NodeId,
        else_branch: Option<NodeId>,
    },
    While {
        condition: NodeId,
        body: NodeId,
    },
    DoWhile {
        condition: NodeId,
        body: NodeId,
    },
    For {
        init: Option<NodeId>,
        condition: Option<NodeId>,
        update: Option<NodeId>,
        body: NodeId,
    },
    RangeBasedFor {
        var_name: String,
        var_type: ValueType,
        iterable: NodeId,
        body: NodeId,
    },
    Switch {
        discriminant: NodeId,
        cases: Vec<CaseArm>,
    },
    Return {
        value: Option<NodeId>,
    },
    Break,
    Continue,
    Empty,
    BinaryOp {
        operator: String,
        left: NodeId,
        right: NodeId,
    },
    UnaryOp {
        operator: String,
        operand: NodeId,
        prefix: bool,
    },
    Assignment {
        operator: String,
        lvalue: NodeId,
        rvalue: NodeId,
    },
    FunctionCall {
        callee: NodeId,
        arguments: Vec<NodeId>,
    },
    MemberAccess {
        object: NodeId,
        property: String,
    },
    ArrayAccess {
        array: NodeId,
        index: NodeId,
    },
    Ternary {
        condition: NodeId,
        then_expr: NodeId,
        else_expr: NodeId,
    },
    Cast {
        target_type: ValueType,
        expr: NodeId,
    },
    ConstructorCall {
        type_name: String,
        args: Vec<NodeId>,
    },
    NumberLiteral {
        value: crate::value::Value,
    },
    StringLiteral {
        value: String,
    },
    CharLiteral {
        value: char,
    },
    Identifier {
        name: String,
    },
    Constant {
        name: String,
    },
    TypeNode {
        value_type: ValueType,
    },
}

impl NodeKind {
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Program { children } | NodeKind::CompoundStatement { children } => {
                children.clone()
            }
            NodeKind::VariableDeclaration { declarators, .. } => {
                declarators.iter().filter_map(|d| d.initializer).collect()
            }
            NodeKind::FunctionDefinition { params, body, .. } => {
                let mut v = params.clone();
                v.push(*body);
                v
            }
            NodeKind::Parameter { default, .. } => default.iter().copied().collect(),
            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let mut v = vec![*condition, *then_branch];
                v.extend(*else_branch);
                v
            }
            NodeKind::While { condition, body } | NodeKind::DoWhile { condition, body } => {
                vec![*condition, *body]
            }
            NodeKind::For {
                init,
                condition,
                update,
                body,
            } => [*init, *condition, *update]
                .into_iter()
                .flatten()
                .chain(std::iter::once(*body))
                .collect(),
            NodeKind::RangeBasedFor { iterable, body, .. } => vec![*iterable, *body],
            NodeKind::Switch { discriminant, cases } => {
                let mut v = vec![*discriminant];
                for case in cases {
                    v.extend(case.value);
                    v.extend(case.body.iter().copied());
                }
                v
            }
            NodeKind::Return { value } => value.iter().copied().collect(),
            NodeKind::Break | NodeKind::Continue | NodeKind::Empty => vec![],
            NodeKind::BinaryOp { left, right, .. } => vec![*left, *right],
            NodeKind::UnaryOp { operand, .. } => vec![*operand],
            NodeKind::Assignment { lvalue, rvalue, .. } => vec![*lvalue, *rvalue],
            NodeKind::FunctionCall { callee, arguments } => {
                let mut v = vec![*callee];
                v.extend(arguments.iter().copied());
                v
            }
            NodeKind::MemberAccess { object, .. } => vec![*object],
            NodeKind::ArrayAccess { array, index } => vec![*array, *index],
            NodeKind::Ternary {
                condition,
                then_expr,
                else_expr,
            } => vec![*condition, *then_expr, *else_expr],
            NodeKind::Cast { expr, .. } => vec![*expr],
            NodeKind::ConstructorCall { args, .. } => args.clone(),
            NodeKind::NumberLiteral { .. }
            | NodeKind::StringLiteral { .. }
            | NodeKind::CharLiteral { .. }
            | NodeKind::Identifier { .. }
            | NodeKind::Constant { .. }
            | NodeKind::TypeNode { .. } => vec![],
        }
    }

    pub fn tag(&self) -> NodeTag {
        match self {
            NodeKind::Program { .. } => NodeTag::Program,
            NodeKind::CompoundStatement { .. } => NodeTag::CompoundStatement,
            NodeKind::VariableDeclaration { .. } => NodeTag::VariableDeclaration,
            NodeKind::FunctionDefinition { .. } => NodeTag::FunctionDefinition,
            NodeKind::Parameter { .. } => NodeTag::Parameter,
            NodeKind::If { .. } => NodeTag::If,
            NodeKind::While { .. } => NodeTag::While,
            NodeKind::DoWhile { .. } => NodeTag::DoWhile,
            NodeKind::For { .. } => NodeTag::For,
            NodeKind::RangeBasedFor { .. } => NodeTag::RangeBasedFor,
            NodeKind::Switch { .. } => NodeTag::Switch,
            NodeKind::Return { .. } => NodeTag::Return,
            NodeKind::Break => NodeTag::Break,
            NodeKind::Continue => NodeTag::Continue,
            NodeKind::Empty => NodeTag::Empty,
            NodeKind::BinaryOp { .. } => NodeTag::BinaryOp,
            NodeKind::UnaryOp { .. } => NodeTag::UnaryOp,
            NodeKind::Assignment { .. } => NodeTag::Assignment,
            NodeKind::FunctionCall { .. } => NodeTag::FunctionCall,
            NodeKind::MemberAccess { .. } => NodeTag::MemberAccess,
            NodeKind::ArrayAccess { .. } => NodeTag::ArrayAccess,
            NodeKind::Ternary { .. } => NodeTag::Ternary,
            NodeKind::Cast { .. } => NodeTag::Cast,
            NodeKind::ConstructorCall { .. } => NodeTag::ConstructorCall,
            NodeKind::NumberLiteral { .. } => NodeTag::NumberLiteral,
            NodeKind::StringLiteral { .. } => NodeTag::StringLiteral,
            NodeKind::CharLiteral { .. } => NodeTag::CharLiteral,
            NodeKind::Identifier { .. } => NodeTag::Identifier,
            NodeKind::Constant { .. } => NodeTag::Constant,
            NodeKind::TypeNode { .. } => NodeTag::TypeNode,
        }
    }
}

/// The wire-level node-type tag (§4.3 Node table, `1-byte node-type`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum NodeTag {
    Program = 0,
    CompoundStatement = 1,
    VariableDeclaration = 2,
    FunctionDefinition = 3,
    Parameter = 4,
    If = 5,
    While = 6,
    DoWhile = 7,
    For = 8,
    RangeBasedFor = 9,
    Switch = 10,
    Return = 11,
    Break = 12,
    Continue = 13,
    Empty = 14,
    BinaryOp = 15,
    UnaryOp = 16,
    Assignment = 17,
    FunctionCall = 18,
    MemberAccess = 19,
    ArrayAccess = 20,
    Ternary = 21,
    Cast = 22,
    ConstructorCall = 23,
    NumberLiteral = 24,
    StringLiteral = 25,
    CharLiteral = 26,
    Identifier = 27,
    Constant = 28,
    TypeNode = 29,
}
