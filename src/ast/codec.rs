//! The compact binary AST codec (C3).
//!
//! All integers are little-endian. Layout (§4.3):
//!
//! ```text
//! header:       magic[4] version[2] flags[2] node_count[4] string_table_offset[4]
//! string table: count[4] { len[2] utf8[len] }*count
//! node table:   { tag[1] flags[1] index[2] parent[2] child_count[2]
//!                 value_block? node_extra? child_index[2]*child_count }*node_count
//! ```
//!
//! The reader helpers below (`read_u8`/`read_u16`/...) are the same small
//! byte-at-a-time style the teacher's `IdaGenericUnpack` trait uses for its
//! own fixed-width little-endian fields.

use std::io::{Read, Write};

use anyhow::{anyhow, bail, ensure, Context, Result};

use crate::ast::{Ast, Node, NodeId};
use crate::ast::node::{CaseArm, Declarator, NodeKind, NodeTag};
use crate::value::{Value, ValueType};

const MAGIC: [u8; 4] = *b"ACAS";
const VERSION: u16 = 1;

const FLAG_HAS_CHILDREN: u8 = 0x01;
const FLAG_HAS_VALUE: u8 = 0x02;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum ValueTag {
    String = 0,
    Int32 = 1,
    Int64 = 2,
    UInt32 = 3,
    Float32 = 4,
    Float64 = 5,
    Bool = 6,
    Null = 7,
}

impl ValueTag {
    fn from_byte(b: u8) -> Result<Self> {
        Ok(match b {
            0 => ValueTag::String,
            1 => ValueTag::Int32,
            2 => ValueTag::Int64,
            3 => ValueTag::UInt32,
            4 => ValueTag::Float32,
            5 => ValueTag::Float64,
            6 => ValueTag::Bool,
            7 => ValueTag::Null,
            other => bail!("unknown value-block tag {other:#x}"),
        })
    }
}

trait ReadExt: Read {
    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }
    fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }
    fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }
    fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
    fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }
    fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }
    fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }
    fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }
    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}
impl<R: Read + ?Sized> ReadExt for R {}

trait WriteExt: Write {
    fn write_u8_(&mut self, v: u8) -> Result<()> {
        Ok(self.write_all(&[v])?)
    }
    fn write_u16_(&mut self, v: u16) -> Result<()> {
        Ok(self.write_all(&v.to_le_bytes())?)
    }
    fn write_u32_(&mut self, v: u32) -> Result<()> {
        Ok(self.write_all(&v.to_le_bytes())?)
    }
    fn write_u64_(&mut self, v: u64) -> Result<()> {
        Ok(self.write_all(&v.to_le_bytes())?)
    }
}
impl<W: Write + ?Sized> WriteExt for W {}

/// Strings interned during decode. Indices are assigned in declaration order.
struct StringTable {
    entries: Vec<String>,
}

impl StringTable {
    fn get(&self, idx: u16) -> Result<&str> {
        self.entries
            .get(idx as usize)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("string index {idx} out of range (table has {} entries)", self.entries.len()))
    }
}

fn read_value_type<R: Read + ?Sized>(input: &mut R) -> Result<ValueType> {
    Ok(match input.read_u8()? {
        0 => ValueType::Int32,
        1 => ValueType::Int64,
        2 => ValueType::UInt32,
        3 => ValueType::Float32,
        4 => ValueType::Float64,
        5 => ValueType::Bool,
        6 => ValueType::Char,
        7 => ValueType::String,
        8 => ValueType::Void,
        9 => {
            let elem = read_value_type(input)?;
            let len = input.read_u32()? as usize;
            ValueType::Array(Box::new(elem), len)
        }
        10 => {
            let len = input.read_u16()? as usize;
            let bytes = input.read_bytes(len)?;
            ValueType::Struct(String::from_utf8(bytes).context("struct type name is not UTF-8")?)
        }
        other => bail!("unknown value-type tag {other:#x}"),
    })
}

fn write_value_type<W: Write + ?Sized>(out: &mut W, ty: &ValueType) -> Result<()> {
    match ty {
        ValueType::Int32 => out.write_u8_(0)?,
        ValueType::Int64 => out.write_u8_(1)?,
        ValueType::UInt32 => out.write_u8_(2)?,
        ValueType::Float32 => out.write_u8_(3)?,
        ValueType::Float64 => out.write_u8_(4)?,
        ValueType::Bool => out.write_u8_(5)?,
        ValueType::Char => out.write_u8_(6)?,
        ValueType::String => out.write_u8_(7)?,
        ValueType::Void => out.write_u8_(8)?,
        ValueType::Array(elem, len) => {
            out.write_u8_(9)?;
            write_value_type(out, elem)?;
            out.write_u32_(*len as u32)?;
        }
        ValueType::Struct(name) => {
            out.write_u8_(10)?;
            out.write_u16_(name.len() as u16)?;
            out.write_all(name.as_bytes())?;
        }
    }
    Ok(())
}

/// A node as read off the wire before pass two links children. Holds enough
/// to reconstruct the final [`NodeKind`] once the raw child-index list is
/// validated.
struct RawNode {
    tag: NodeTag,
    parent_raw: u16,
    value: Option<ValueBlock>,
    extra: Vec<u8>,
    children: Vec<u16>,
}

enum ValueBlock {
    Str(String),
    I32(i32),
    I64(i64),
    U32(u32),
    F32(f32),
    F64(f64),
    Bool(bool),
}

/// Decodes a compact AST byte stream into an [`Ast`] (§4.3 Decode algorithm).
pub fn decode(bytes: &[u8]) -> Result<Ast> {
    let mut input = bytes;

    let mut magic = [0u8; 4];
    input.read_exact(&mut magic).context("reading magic")?;
    ensure!(magic == MAGIC, "bad magic: expected {MAGIC:?}, got {magic:?}");
    let version = input.read_u16().context("reading version")?;
    ensure!(version == VERSION, "unsupported AST stream version {version}");
    let _flags = input.read_u16().context("reading header flags")?;
    let node_count = input.read_u32().context("reading node count")? as usize;
    let _string_table_offset = input.read_u32().context("reading string table offset")?;

    let string_count = input.read_u32().context("reading string table count")?;
    let mut strings = Vec::with_capacity(string_count as usize);
    for i in 0..string_count {
        let len = input.read_u16().with_context(|| format!("reading length of string {i}"))?;
        let bytes = input
            .read_bytes(len as usize)
            .with_context(|| format!("reading bytes of string {i}"))?;
        strings.push(String::from_utf8(bytes).with_context(|| format!("string {i} is not UTF-8"))?);
    }
    let strings = StringTable { entries: strings };

    // Pass one: sequential node records.
    let mut raw_nodes = Vec::with_capacity(node_count);
    for i in 0..node_count {
        let tag_byte = input.read_u8().with_context(|| format!("reading tag of node {i}"))?;
        let tag = NodeTag::try_from(tag_byte).map_err(|_| anyhow!("unknown node-type {tag_byte:#x} at node {i}"))?;
        let flags = input.read_u8().with_context(|| format!("reading flags of node {i}"))?;
        let index = input.read_u16().with_context(|| format!("reading index of node {i}"))?;
        ensure!(index as usize == i, "node {i} declares out-of-order index {index}");
        let parent_raw = input.read_u16().with_context(|| format!("reading parent of node {i}"))?;
        let child_count = input.read_u16().with_context(|| format!("reading child-count of node {i}"))?;

        let value = if flags & FLAG_HAS_VALUE != 0 {
            Some(read_value_block(&mut input, &strings).with_context(|| format!("reading value of node {i}"))?)
        } else {
            None
        };

        let extra = read_node_extra(&mut input, tag, &strings).with_context(|| format!("reading payload of node {i}"))?;

        ensure!(
            (child_count > 0) == (flags & FLAG_HAS_CHILDREN != 0),
            "node {i} child-count {child_count} inconsistent with HAS_CHILDREN flag"
        );
        let mut children = Vec::with_capacity(child_count as usize);
        for _ in 0..child_count {
            children.push(input.read_u16().with_context(|| format!("reading child index of node {i}"))?);
        }

        raw_nodes.push(RawNode {
            tag,
            parent_raw,
            value,
            extra,
            children,
        });
    }
    ensure!(input.is_empty(), "{} trailing bytes after node table", input.len());

    // Pass two: install values/extras into kind-specific fields and link
    // children. This is the "polymorphic value assignment" step (§4.3/§9):
    // each node type's data lands directly in its own match arm, never in a
    // shared base field.
    let mut nodes = Vec::with_capacity(raw_nodes.len());
    for (i, raw) in raw_nodes.iter().enumerate() {
        let kind = build_node_kind(i, raw, &strings)?;
        for &child in &raw.children {
            ensure!((child as usize) < raw_nodes.len(), "node {i} references out-of-range child {child}");
        }
        let parent = if i == 0 {
            ensure!(matches!(kind, NodeKind::Program { .. }), "root node (index 0) must be a Program");
            None
        } else {
            ensure!(raw.parent_raw != 0xFFFF, "non-root node {i} has no parent");
            ensure!((raw.parent_raw as usize) < raw_nodes.len(), "node {i} has out-of-range parent {}", raw.parent_raw);
            Some(NodeId(raw.parent_raw))
        };
        nodes.push(Node {
            id: NodeId(i as u16),
            parent,
            kind,
        });
    }

    Ok(Ast::from_nodes(nodes))
}

fn read_value_block<R: Read + ?Sized>(input: &mut R, strings: &StringTable) -> Result<ValueBlock> {
    Ok(match ValueTag::from_byte(input.read_u8()?)? {
        ValueTag::String => {
            let idx = input.read_u16()?;
            ValueBlock::Str(strings.get(idx)?.to_owned())
        }
        ValueTag::Int32 => ValueBlock::I32(input.read_i32()?),
        ValueTag::Int64 => ValueBlock::I64(input.read_i64()?),
        ValueTag::UInt32 => ValueBlock::U32(input.read_u32()?),
        ValueTag::Float32 => ValueBlock::F32(input.read_f32()?),
        ValueTag::Float64 => ValueBlock::F64(input.read_f64()?),
        ValueTag::Bool => ValueBlock::Bool(input.read_u8()? != 0),
        ValueTag::Null => bail!("NULL value block on a node that sets HAS_VALUE"),
    })
}

/// Reads the node-kind-specific fixed payload that sits between the value
/// block and the child-index list (declared types, operator flags, names not
/// carried by the generic value block, counts needed to slice up the
/// flattened child list). See the module doc and DESIGN.md for the layout
/// chosen per tag.
fn read_node_extra<R: Read + ?Sized>(input: &mut R, tag: NodeTag, strings: &StringTable) -> Result<Vec<u8>> {
    // Buffered as opaque bytes during pass one; pass two re-parses them with
    // full context (matches the two-pass structure §4.3 mandates).
    let mut buf = Vec::new();
    let mut tee = TeeReader { inner: input, buf: &mut buf };
    read_node_extra_inner(&mut tee, tag, strings)?;
    Ok(buf)
}

struct TeeReader<'a, R: ?Sized> {
    inner: &'a mut R,
    buf: &'a mut Vec<u8>,
}
impl<'a, R: Read + ?Sized> Read for TeeReader<'a, R> {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(out)?;
        self.buf.extend_from_slice(&out[..n]);
        Ok(n)
    }
}

fn read_node_extra_inner<R: Read + ?Sized>(input: &mut R, tag: NodeTag, strings: &StringTable) -> Result<()> {
    match tag {
        NodeTag::VariableDeclaration => {
            let _is_const = input.read_u8()?;
            let _declared_type = read_value_type(input)?;
            let count = input.read_u8()?;
            for _ in 0..count {
                let name_idx = input.read_u16()?;
                strings.get(name_idx)?;
                let dims = input.read_u8()?;
                for _ in 0..dims {
                    input.read_u32()?;
                }
                let _has_init = input.read_u8()?;
            }
            Ok(())
        }
        NodeTag::FunctionDefinition => {
            let _return_type = read_value_type(input)?;
            let name_idx = input.read_u16()?;
            strings.get(name_idx)?;
            Ok(())
        }
        NodeTag::Parameter => {
            let _param_type = read_value_type(input)?;
            let name_idx = input.read_u16()?;
            strings.get(name_idx)?;
            let _has_default = input.read_u8()?;
            Ok(())
        }
        NodeTag::For => {
            input.read_u8()?; // has_init
            input.read_u8()?; // has_condition
            input.read_u8()?; // has_update
            Ok(())
        }
        NodeTag::RangeBasedFor => {
            let name_idx = input.read_u16()?;
            strings.get(name_idx)?;
            let _var_type = read_value_type(input)?;
            Ok(())
        }
        NodeTag::Switch => {
            let case_count = input.read_u16()?;
            for _ in 0..case_count {
                input.read_u8()?; // has_value
                input.read_u16()?; // body_len
            }
            Ok(())
        }
        NodeTag::UnaryOp => {
            input.read_u8()?; // prefix
            Ok(())
        }
        NodeTag::MemberAccess => {
            let name_idx = input.read_u16()?;
            strings.get(name_idx)?;
            Ok(())
        }
        NodeTag::Cast => {
            let _target_type = read_value_type(input)?;
            Ok(())
        }
        NodeTag::ConstructorCall => {
            let name_idx = input.read_u16()?;
            strings.get(name_idx)?;
            Ok(())
        }
        NodeTag::TypeNode => {
            let _value_type = read_value_type(input)?;
            Ok(())
        }
        NodeTag::Program
        | NodeTag::CompoundStatement
        | NodeTag::If
        | NodeTag::While
        | NodeTag::DoWhile
        | NodeTag::Return
        | NodeTag::Break
        | NodeTag::Continue
        | NodeTag::Empty
        | NodeTag::BinaryOp
        | NodeTag::Assignment
        | NodeTag::FunctionCall
        | NodeTag::ArrayAccess
        | NodeTag::Ternary
        | NodeTag::NumberLiteral
        | NodeTag::StringLiteral
        | NodeTag::CharLiteral
        | NodeTag::Identifier
        | NodeTag::Constant => Ok(()),
    }
}

fn build_node_kind(index: usize, raw: &RawNode, strings: &StringTable) -> Result<NodeKind> {
    let mut extra = raw.extra.as_slice();
    let children = &raw.children;
    let next_child = |i: &mut usize| -> Result<NodeId> {
        let id = children
            .get(*i)
            .copied()
            .map(NodeId)
            .ok_or_else(|| anyhow!("node {index} ran out of children while decoding"));
        *i += 1;
        id
    };

    Ok(match raw.tag {
        NodeTag::Program => NodeKind::Program {
            children: children.iter().copied().map(NodeId).collect(),
        },
        NodeTag::CompoundStatement => NodeKind::CompoundStatement {
            children: children.iter().copied().map(NodeId).collect(),
        },
        NodeTag::VariableDeclaration => {
            let is_const = extra.read_u8()? != 0;
            let declared_type = read_value_type(&mut extra)?;
            let count = extra.read_u8()?;
            let mut declarators = Vec::with_capacity(count as usize);
            let mut ci = 0usize;
            for _ in 0..count {
                let name_idx = extra.read_u16()?;
                let name = strings.get(name_idx)?.to_owned();
                let dims_count = extra.read_u8()?;
                let mut array_dims = Vec::with_capacity(dims_count as usize);
                for _ in 0..dims_count {
                    array_dims.push(extra.read_u32()? as usize);
                }
                let has_init = extra.read_u8()? != 0;
                let initializer = if has_init { Some(next_child(&mut ci)?) } else { None };
                declarators.push(Declarator {
                    name,
                    array_dims,
                    initializer,
                });
            }
            NodeKind::VariableDeclaration {
                declared_type,
                declarators,
                is_const,
            }
        }
        NodeTag::FunctionDefinition => {
            let return_type = read_value_type(&mut extra)?;
            let name_idx = extra.read_u16()?;
            let declarator_name = strings.get(name_idx)?.to_owned();
            ensure!(!children.is_empty(), "node {index} FunctionDefinition has no body");
            let params = children[..children.len() - 1].iter().copied().map(NodeId).collect();
            let body = NodeId(*children.last().unwrap());
            NodeKind::FunctionDefinition {
                return_type,
                declarator_name,
                params,
                body,
            }
        }
        NodeTag::Parameter => {
            let param_type = read_value_type(&mut extra)?;
            let name_idx = extra.read_u16()?;
            let name = strings.get(name_idx)?.to_owned();
            let has_default = extra.read_u8()? != 0;
            NodeKind::Parameter {
                param_type,
                name,
                default: if has_default { Some(NodeId(children[0])) } else { None },
            }
        }
        NodeTag::If => {
            ensure!(children.len() == 2 || children.len() == 3, "node {index} If has {} children", children.len());
            NodeKind::If {
                condition: NodeId(children[0]),
                then_branch: NodeId(children[1]),
                else_branch: children.get(2).copied().map(NodeId),
            }
        }
        NodeTag::While => {
            ensure!(children.len() == 2, "node {index} While has {} children", children.len());
            NodeKind::While {
                condition: NodeId(children[0]),
                body: NodeId(children[1]),
            }
        }
        NodeTag::DoWhile => {
            ensure!(children.len() == 2, "node {index} DoWhile has {} children", children.len());
            NodeKind::DoWhile {
                condition: NodeId(children[0]),
                body: NodeId(children[1]),
            }
        }
        NodeTag::For => {
            let has_init = extra.read_u8()? != 0;
            let has_condition = extra.read_u8()? != 0;
            let has_update = extra.read_u8()? != 0;
            let mut ci = 0usize;
            let init = if has_init { Some(next_child(&mut ci)?) } else { None };
            let condition = if has_condition { Some(next_child(&mut ci)?) } else { None };
            let update = if has_update { Some(next_child(&mut ci)?) } else { None };
            let body = next_child(&mut ci)?;
            NodeKind::For {
                init,
                condition,
                update,
                body,
            }
        }
        NodeTag::RangeBasedFor => {
            let name_idx = extra.read_u16()?;
            let var_name = strings.get(name_idx)?.to_owned();
            let var_type = read_value_type(&mut extra)?;
            ensure!(children.len() == 2, "node {index} RangeBasedFor has {} children", children.len());
            NodeKind::RangeBasedFor {
                var_name,
                var_type,
                iterable: NodeId(children[0]),
                body: NodeId(children[1]),
            }
        }
        NodeTag::Switch => {
            let case_count = extra.read_u16()?;
            let mut case_specs = Vec::with_capacity(case_count as usize);
            for _ in 0..case_count {
                let has_value = extra.read_u8()? != 0;
                let body_len = extra.read_u16()?;
                case_specs.push((has_value, body_len));
            }
            let mut ci = 0usize;
            let discriminant = next_child(&mut ci)?;
            let mut cases = Vec::with_capacity(case_specs.len());
            for (has_value, body_len) in case_specs {
                let value = if has_value { Some(next_child(&mut ci)?) } else { None };
                let mut body = Vec::with_capacity(body_len as usize);
                for _ in 0..body_len {
                    body.push(next_child(&mut ci)?);
                }
                cases.push(CaseArm { value, body });
            }
            NodeKind::Switch { discriminant, cases }
        }
        NodeTag::Return => NodeKind::Return {
            value: children.first().copied().map(NodeId),
        },
        NodeTag::Break => NodeKind::Break,
        NodeTag::Continue => NodeKind::Continue,
        NodeTag::Empty => NodeKind::Empty,
        NodeTag::BinaryOp => {
            let operator = take_operator_string(raw, index, false)?;
            ensure!(children.len() == 2, "node {index} BinaryOp has {} children", children.len());
            NodeKind::BinaryOp {
                operator,
                left: NodeId(children[0]),
                right: NodeId(children[1]),
            }
        }
        NodeTag::UnaryOp => {
            let operator = take_operator_string(raw, index, false)?;
            let prefix = extra.read_u8()? != 0;
            ensure!(children.len() == 1, "node {index} UnaryOp has {} children", children.len());
            NodeKind::UnaryOp {
                operator,
                operand: NodeId(children[0]),
                prefix,
            }
        }
        NodeTag::Assignment => {
            let operator = take_operator_string(raw, index, true)?;
            ensure!(children.len() == 2, "node {index} Assignment has {} children", children.len());
            NodeKind::Assignment {
                operator,
                lvalue: NodeId(children[0]),
                rvalue: NodeId(children[1]),
            }
        }
        NodeTag::FunctionCall => {
            ensure!(!children.is_empty(), "node {index} FunctionCall has no callee");
            NodeKind::FunctionCall {
                callee: NodeId(children[0]),
                arguments: children[1..].iter().copied().map(NodeId).collect(),
            }
        }
        NodeTag::MemberAccess => {
            let name_idx = extra.read_u16()?;
            let property = strings.get(name_idx)?.to_owned();
            ensure!(children.len() == 1, "node {index} MemberAccess has {} children", children.len());
            NodeKind::MemberAccess {
                object: NodeId(children[0]),
                property,
            }
        }
        NodeTag::ArrayAccess => {
            ensure!(children.len() == 2, "node {index} ArrayAccess has {} children", children.len());
            NodeKind::ArrayAccess {
                array: NodeId(children[0]),
                index: NodeId(children[1]),
            }
        }
        NodeTag::Ternary => {
            ensure!(children.len() == 3, "node {index} Ternary has {} children", children.len());
            NodeKind::Ternary {
                condition: NodeId(children[0]),
                then_expr: NodeId(children[1]),
                else_expr: NodeId(children[2]),
            }
        }
        NodeTag::Cast => {
            let target_type = read_value_type(&mut extra)?;
            ensure!(children.len() == 1, "node {index} Cast has {} children", children.len());
            NodeKind::Cast {
                target_type,
                expr: NodeId(children[0]),
            }
        }
        NodeTag::ConstructorCall => {
            let name_idx = extra.read_u16()?;
            let type_name = strings.get(name_idx)?.to_owned();
            NodeKind::ConstructorCall {
                type_name,
                args: children.iter().copied().map(NodeId).collect(),
            }
        }
        NodeTag::NumberLiteral => {
            let value = match raw
                .value
                .as_ref()
                .ok_or_else(|| anyhow!("node {index} NumberLiteral missing value block"))?
            {
                ValueBlock::I32(v) => Value::I32(*v),
                ValueBlock::I64(v) => Value::I64(*v),
                ValueBlock::U32(v) => Value::U32(*v),
                ValueBlock::F32(v) => Value::F32(*v),
                ValueBlock::F64(v) => Value::F64(*v),
                ValueBlock::Bool(v) => Value::Bool(*v),
                ValueBlock::Str(_) => bail!("node {index} NumberLiteral has a STRING value block"),
            };
            NodeKind::NumberLiteral { value }
        }
        NodeTag::StringLiteral => {
            let ValueBlock::Str(s) = raw
                .value
                .as_ref()
                .ok_or_else(|| anyhow!("node {index} StringLiteral missing value block"))?
            else {
                bail!("node {index} StringLiteral value block is not a STRING");
            };
            NodeKind::StringLiteral { value: s.clone() }
        }
        NodeTag::CharLiteral => {
            let ValueBlock::I32(v) = raw
                .value
                .as_ref()
                .ok_or_else(|| anyhow!("node {index} CharLiteral missing value block"))?
            else {
                bail!("node {index} CharLiteral value block is not INT32");
            };
            let c = char::from_u32(*v as u32).ok_or_else(|| anyhow!("node {index} CharLiteral has invalid codepoint {v}"))?;
            NodeKind::CharLiteral { value: c }
        }
        NodeTag::Identifier => {
            let ValueBlock::Str(s) = raw
                .value
                .as_ref()
                .ok_or_else(|| anyhow!("node {index} Identifier missing value block"))?
            else {
                bail!("node {index} Identifier value block is not a STRING");
            };
            NodeKind::Identifier { name: s.clone() }
        }
        NodeTag::Constant => {
            let ValueBlock::Str(s) = raw
                .value
                .as_ref()
                .ok_or_else(|| anyhow!("node {index} Constant missing value block"))?
            else {
                bail!("node {index} Constant value block is not a STRING");
            };
            NodeKind::Constant { name: s.clone() }
        }
        NodeTag::TypeNode => {
            let value_type = read_value_type(&mut extra)?;
            NodeKind::TypeNode { value_type }
        }
    })
}

/// Extracts the operator string from a node's value block, applying the
/// empty-operator rule from §4.3/§9: `AssignmentNode` treats an empty string
/// as `"="` (legacy compatibility); every other operator node rejects it.
fn take_operator_string(raw: &RawNode, index: usize, is_assignment: bool) -> Result<String> {
    let ValueBlock::Str(s) = raw
        .value
        .as_ref()
        .ok_or_else(|| anyhow!("node {index} operator node missing value block"))?
    else {
        bail!("node {index} operator node value block is not a STRING");
    };
    if s.is_empty() {
        if is_assignment {
            return Ok("=".to_owned());
        }
        bail!("node {index} has an empty operator string");
    }
    Ok(s.clone())
}

/// Encodes an [`Ast`] back to the compact binary format (the inverse of
/// [`decode`]), used by the round-trip property (§8) and the `ast-tools`
/// CLI's `roundtrip` subcommand. Not on the interpreter's runtime hot path.
pub fn encode(ast: &Ast) -> Result<Vec<u8>> {
    let mut strings: Vec<String> = Vec::new();
    let mut intern = |s: &str| -> u16 {
        if let Some(pos) = strings.iter().position(|e| e == s) {
            pos as u16
        } else {
            strings.push(s.to_owned());
            (strings.len() - 1) as u16
        }
    };

    let mut node_bytes: Vec<Vec<u8>> = Vec::with_capacity(ast.len());
    for node in ast.nodes() {
        node_bytes.push(encode_node(ast, node, &mut intern)?);
    }

    let mut out = Vec::new();
    out.write_all(&MAGIC)?;
    out.write_u16_(VERSION)?;
    out.write_u16_(0)?; // flags
    out.write_u32_(ast.len() as u32)?;
    // String table offset is informational; computed after the header+string
    // table are known to be fixed-size per entry only in total, so we patch
    // it in at the end.
    let string_table_offset_pos = out.len();
    out.write_u32_(0)?;

    out.write_u32_(strings.len() as u32)?;
    for s in &strings {
        out.write_u16_(s.len() as u16)?;
        out.write_all(s.as_bytes())?;
    }

    let string_table_offset = out.len() as u32;
    out[string_table_offset_pos..string_table_offset_pos + 4].copy_from_slice(&string_table_offset.to_le_bytes());

    for bytes in node_bytes {
        out.extend_from_slice(&bytes);
    }

    Ok(out)
}

fn encode_node(
    ast: &Ast,
    node: &Node,
    intern: &mut impl FnMut(&str) -> u16,
) -> Result<Vec<u8>> {
    let mut value: Option<(ValueTag, Vec<u8>)> = None;
    let mut extra = Vec::new();
    let children: Vec<u16>;

    match &node.kind {
        NodeKind::Program { children: c } | NodeKind::CompoundStatement { children: c } => {
            children = c.iter().map(|n| n.0).collect();
        }
        NodeKind::VariableDeclaration {
            declared_type,
            declarators,
            is_const,
        } => {
            extra.write_u8_(*is_const as u8)?;
            write_value_type(&mut extra, declared_type)?;
            ensure!(declarators.len() <= u8::MAX as usize, "too many declarators");
            extra.write_u8_(declarators.len() as u8)?;
            let mut kids = Vec::new();
            for d in declarators {
                extra.write_u16_(intern(&d.name))?;
                extra.write_u8_(d.array_dims.len() as u8)?;
                for &dim in &d.array_dims {
                    extra.write_u32_(dim as u32)?;
                }
                extra.write_u8_(d.initializer.is_some() as u8)?;
                if let Some(init) = d.initializer {
                    kids.push(init.0);
                }
            }
            children = kids;
        }
        NodeKind::FunctionDefinition {
            return_type,
            declarator_name,
            params,
            body,
        } => {
            write_value_type(&mut extra, return_type)?;
            extra.write_u16_(intern(declarator_name))?;
            let mut kids: Vec<u16> = params.iter().map(|n| n.0).collect();
            kids.push(body.0);
            children = kids;
        }
        NodeKind::Parameter { param_type, name, default } => {
            write_value_type(&mut extra, param_type)?;
            extra.write_u16_(intern(name))?;
            extra.write_u8_(default.is_some() as u8)?;
            children = default.iter().map(|n| n.0).collect();
        }
        NodeKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            let mut kids = vec![condition.0, then_branch.0];
            kids.extend(else_branch.iter().map(|n| n.0));
            children = kids;
        }
        NodeKind::While { condition, body } | NodeKind::DoWhile { condition, body } => {
            children = vec![condition.0, body.0];
        }
        NodeKind::For {
            init,
            condition,
            update,
            body,
        } => {
            extra.write_u8_(init.is_some() as u8)?;
            extra.write_u8_(condition.is_some() as u8)?;
            extra.write_u8_(update.is_some() as u8)?;
            let mut kids: Vec<u16> = [*init, *condition, *update].into_iter().flatten().map(|n| n.0).collect();
            kids.push(body.0);
            children = kids;
        }
        NodeKind::RangeBasedFor {
            var_name,
            var_type,
            iterable,
            body,
        } => {
            extra.write_u16_(intern(var_name))?;
            write_value_type(&mut extra, var_type)?;
            children = vec![iterable.0, body.0];
        }
        NodeKind::Switch { discriminant, cases } => {
            extra.write_u16_(cases.len() as u16)?;
            for case in cases {
                extra.write_u8_(case.value.is_some() as u8)?;
                extra.write_u16_(case.body.len() as u16)?;
            }
            let mut kids = vec![discriminant.0];
            for case in cases {
                kids.extend(case.value.map(|n| n.0));
                kids.extend(case.body.iter().map(|n| n.0));
            }
            children = kids;
        }
        NodeKind::Return { value } => {
            children = value.iter().map(|n| n.0).collect();
        }
        NodeKind::Break | NodeKind::Continue | NodeKind::Empty => {
            children = Vec::new();
        }
        NodeKind::BinaryOp { operator, left, right } => {
            value = Some((ValueTag::String, encode_string_value(operator, intern)));
            children = vec![left.0, right.0];
        }
        NodeKind::UnaryOp { operator, operand, prefix } => {
            value = Some((ValueTag::String, encode_string_value(operator, intern)));
            extra.write_u8_(*prefix as u8)?;
            children = vec![operand.0];
        }
        NodeKind::Assignment { operator, lvalue, rvalue } => {
            value = Some((ValueTag::String, encode_string_value(operator, intern)));
            children = vec![lvalue.0, rvalue.0];
        }
        NodeKind::FunctionCall { callee, arguments } => {
            let mut kids = vec![callee.0];
            kids.extend(arguments.iter().map(|n| n.0));
            children = kids;
        }
        NodeKind::MemberAccess { object, property } => {
            extra.write_u16_(intern(property))?;
            children = vec![object.0];
        }
        NodeKind::ArrayAccess { array, index } => {
            children = vec![array.0, index.0];
        }
        NodeKind::Ternary {
            condition,
            then_expr,
            else_expr,
        } => {
            children = vec![condition.0, then_expr.0, else_expr.0];
        }
        NodeKind::Cast { target_type, expr } => {
            write_value_type(&mut extra, target_type)?;
            children = vec![expr.0];
        }
        NodeKind::ConstructorCall { type_name, args } => {
            extra.write_u16_(intern(type_name))?;
            children = args.iter().map(|n| n.0).collect();
        }
        NodeKind::NumberLiteral { value: v } => {
            value = Some(encode_number_value(v)?);
            children = Vec::new();
        }
        NodeKind::StringLiteral { value: s } => {
            value = Some((ValueTag::String, encode_string_value(s, intern)));
            children = Vec::new();
        }
        NodeKind::CharLiteral { value: c } => {
            value = Some((ValueTag::Int32, (*c as i32).to_le_bytes().to_vec()));
            children = Vec::new();
        }
        NodeKind::Identifier { name } => {
            value = Some((ValueTag::String, encode_string_value(name, intern)));
            children = Vec::new();
        }
        NodeKind::Constant { name } => {
            value = Some((ValueTag::String, encode_string_value(name, intern)));
            children = Vec::new();
        }
        NodeKind::TypeNode { value_type } => {
            write_value_type(&mut extra, value_type)?;
            children = Vec::new();
        }
    }

    let mut flags = 0u8;
    if !children.is_empty() {
        flags |= FLAG_HAS_CHILDREN;
    }
    if value.is_some() {
        flags |= FLAG_HAS_VALUE;
    }

    let mut out = Vec::new();
    out.write_u8_(node.kind.tag().into())?;
    out.write_u8_(flags)?;
    out.write_u16_(node.id.0)?;
    out.write_u16_(node.parent.map(|p| p.0).unwrap_or(0xFFFF))?;
    ensure!(children.len() <= u16::MAX as usize, "too many children");
    out.write_u16_(children.len() as u16)?;
    if let Some((tag, payload)) = value {
        out.write_u8_(tag as u8)?;
        out.extend_from_slice(&payload);
    }
    out.extend_from_slice(&extra);
    for c in children {
        out.write_u16_(c)?;
    }
    Ok(out)
}

fn encode_string_value(s: &str, intern: &mut impl FnMut(&str) -> u16) -> Vec<u8> {
    intern(s).to_le_bytes().to_vec()
}

fn encode_number_value(v: &Value) -> Result<(ValueTag, Vec<u8>)> {
    Ok(match v {
        Value::I32(n) => (ValueTag::Int32, n.to_le_bytes().to_vec()),
        Value::I64(n) => (ValueTag::Int64, n.to_le_bytes().to_vec()),
        Value::U32(n) => (ValueTag::UInt32, n.to_le_bytes().to_vec()),
        Value::F32(n) => (ValueTag::Float32, n.to_bits().to_le_bytes().to_vec()),
        Value::F64(n) => (ValueTag::Float64, n.to_bits().to_le_bytes().to_vec()),
        Value::Bool(b) => (ValueTag::Bool, vec![*b as u8]),
        other => bail!("NumberLiteral cannot hold {:?}", other.value_type()),
    })
}
