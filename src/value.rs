//! Tagged runtime values and the declared-type model (C1).
//!
//! Promotion order (narrowest to widest): `Bool < Char < I32 < U32 < I64 < F32
//! < F64`, with the fixed exception that `I32 op U32` promotes to `I64` rather
//! than `U32`, matching the C++ integer-promotion behaviour Arduino sketches
//! rely on (`-1 + 4_000_000_000u32` must not silently land in the unsigned
//! domain).

use std::fmt;

use serde::Serialize;

use crate::error::EngineError;

/// The shape of a declared Arduino C-style array: element count per dimension.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ArrayShape(pub Vec<usize>);

impl ArrayShape {
    pub fn scalar() -> Self {
        ArrayShape(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A declared Arduino/C++ type name, used for declarations, parameters, casts
/// and the zero-value a fresh declaration without an initializer receives.
#[derive(Clone, Debug, PartialEq)]
pub enum ValueType {
    Int32,
    Int64,
    UInt32,
    Float32,
    Float64,
    Bool,
    Char,
    String,
    Array(Box<ValueType>, usize),
    Struct(String),
    Void,
}

impl ValueType {
    pub fn default_value(&self) -> Value {
        match self {
            ValueType::Int32 => Value::I32(0),
            ValueType::Int64 => Value::I64(0),
            ValueType::UInt32 => Value::U32(0),
            ValueType::Float32 => Value::F32(0.0),
            ValueType::Float64 => Value::F64(0.0),
            ValueType::Bool => Value::Bool(false),
            ValueType::Char => Value::Char('\0'),
            ValueType::String => Value::Str(String::new()),
            ValueType::Array(elem, len) => {
                Value::Array(vec![elem.default_value(); *len], ArrayShape(vec![*len]))
            }
            ValueType::Struct(name) => Value::Struct(Default::default(), name.clone()),
            ValueType::Void => Value::Void,
        }
    }
}

/// A rank used only to pick the wider operand of a binary operation. Higher
/// ranks win, except the `I32`/`U32` tie-break handled explicitly in
/// [`promote`].
fn rank(v: &Value) -> u8 {
    match v {
        Value::Bool(_) => 0,
        Value::Char(_) => 1,
        Value::I32(_) => 2,
        Value::U32(_) => 3,
        Value::I64(_) => 4,
        Value::F32(_) => 5,
        Value::F64(_) => 6,
        Value::Str(_) | Value::Array(..) | Value::Struct(..) | Value::Void => 7,
    }
}

/// A runtime value. Arrays and structs are plain owned containers: the
/// engine never shares them across bindings, so copy-by-value (§3 Lifetimes)
/// falls out of ordinary `Clone`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    I32(i32),
    I64(i64),
    U32(u32),
    F32(f32),
    F64(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Array(Vec<Value>, #[serde(skip)] ArrayShape),
    Struct(
        std::collections::BTreeMap<String, Value>,
        #[serde(skip)] String,
    ),
    Void,
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::Int32,
            Value::I64(_) => ValueType::Int64,
            Value::U32(_) => ValueType::UInt32,
            Value::F32(_) => ValueType::Float32,
            Value::F64(_) => ValueType::Float64,
            Value::Bool(_) => ValueType::Bool,
            Value::Char(_) => ValueType::Char,
            Value::Str(_) => ValueType::String,
            Value::Array(items, shape) => Value::array_value_type(items, shape),
            Value::Struct(_, name) => ValueType::Struct(name.clone()),
            Value::Void => ValueType::Void,
        }
    }

    fn array_value_type(items: &[Value], shape: &ArrayShape) -> ValueType {
        let elem = items.first().map(Value::value_type).unwrap_or(ValueType::Void);
        let len = shape.0.first().copied().unwrap_or(items.len());
        ValueType::Array(Box::new(elem), len)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::I32(v) => *v != 0,
            Value::I64(v) => *v != 0,
            Value::U32(v) => *v != 0,
            Value::F32(v) => *v != 0.0,
            Value::F64(v) => *v != 0.0,
            Value::Bool(v) => *v,
            Value::Char(v) => *v != '\0',
            Value::Str(v) => !v.is_empty(),
            Value::Array(items, _) => !items.is_empty(),
            Value::Struct(..) => true,
            Value::Void => false,
        }
    }

    /// Stringifies the way Arduino's `Print` class stringifies an argument to
    /// `Serial.print`/`Serial.println`: integers in decimal, floats with two
    /// decimal places, booleans as `1`/`0`.
    pub fn to_arduino_string(&self) -> String {
        match self {
            Value::I32(v) => v.to_string(),
            Value::I64(v) => v.to_string(),
            Value::U32(v) => v.to_string(),
            Value::F32(v) => format!("{v:.2}"),
            Value::F64(v) => format!("{v:.2}"),
            Value::Bool(v) => if *v { "1" } else { "0" }.to_string(),
            Value::Char(v) => v.to_string(),
            Value::Str(v) => v.clone(),
            Value::Array(items, _) => items
                .iter()
                .map(Value::to_arduino_string)
                .collect::<Vec<_>>()
                .join(", "),
            Value::Struct(fields, name) => format!(
                "{name}{{{}}}",
                fields
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", v.to_arduino_string()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Value::Void => String::new(),
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I32(v) => Some(*v as i64),
            Value::I64(v) => Some(*v),
            Value::U32(v) => Some(*v as i64),
            Value::Bool(v) => Some(*v as i64),
            Value::Char(v) => Some(*v as i64),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I32(v) => Some(*v as f64),
            Value::I64(v) => Some(*v as f64),
            Value::U32(v) => Some(*v as f64),
            Value::F32(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            Value::Bool(v) => Some(*v as u8 as f64),
            Value::Char(v) => Some(*v as u32 as f64),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::I32(_) | Value::I64(_) | Value::U32(_) | Value::F32(_) | Value::F64(_) | Value::Bool(_) | Value::Char(_)
        )
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_arduino_string())
    }
}

/// The promoted pair used to evaluate a binary arithmetic/comparison
/// operator: both sides have been widened to a common representation.
enum Promoted {
    I32(i32, i32),
    U32(u32, u32),
    I64(i64, i64),
    F32(f32, f32),
    F64(f64, f64),
}

fn promote(lhs: &Value, rhs: &Value) -> Result<Promoted, EngineError> {
    if !lhs.is_numeric() || !rhs.is_numeric() {
        return Err(EngineError::type_error(format!(
            "operator applied to incompatible types {:?} and {:?}",
            lhs.value_type(),
            rhs.value_type()
        )));
    }
    // The fixed I32/U32 tie-break: promote to I64 rather than letting U32 win.
    if matches!((lhs, rhs), (Value::I32(_), Value::U32(_)) | (Value::U32(_), Value::I32(_))) {
        return Ok(Promoted::I64(lhs.as_i64().unwrap(), rhs.as_i64().unwrap()));
    }
    let winner = rank(lhs).max(rank(rhs));
    Ok(match winner {
        0 | 1 | 2 => Promoted::I32(lhs.as_i64().unwrap() as i32, rhs.as_i64().unwrap() as i32),
        3 => Promoted::U32(lhs.as_i64().unwrap() as u32, rhs.as_i64().unwrap() as u32),
        4 => Promoted::I64(lhs.as_i64().unwrap(), rhs.as_i64().unwrap()),
        5 => Promoted::F32(lhs.as_f64().unwrap() as f32, rhs.as_f64().unwrap() as f32),
        _ => Promoted::F64(lhs.as_f64().unwrap(), rhs.as_f64().unwrap()),
    })
}

/// Mixed-sign comparisons promote to signed 64-bit before comparing (§4.7
/// Tie-breaks), independent of the arithmetic promotion table above.
fn promote_for_compare(lhs: &Value, rhs: &Value) -> Result<Promoted, EngineError> {
    if matches!(lhs, Value::Str(_)) || matches!(rhs, Value::Str(_)) {
        return Err(EngineError::type_error(format!(
            "cannot compare {:?} and {:?}",
            lhs.value_type(),
            rhs.value_type()
        )));
    }
    promote(lhs, rhs)
}

pub fn add(lhs: &Value, rhs: &Value) -> Result<Value, EngineError> {
    if let (Value::Str(a), Value::Str(b)) = (lhs, rhs) {
        return Ok(Value::Str(format!("{a}{b}")));
    }
    if matches!(lhs, Value::Str(_)) || matches!(rhs, Value::Str(_)) {
        return Err(EngineError::type_error(
            "`+` between a string and a number is not supported; string concatenation is not implicit",
        ));
    }
    Ok(match promote(lhs, rhs)? {
        Promoted::I32(a, b) => Value::I32(a.wrapping_add(b)),
        Promoted::U32(a, b) => Value::U32(a.wrapping_add(b)),
        Promoted::I64(a, b) => Value::I64(a.wrapping_add(b)),
        Promoted::F32(a, b) => Value::F32(a + b),
        Promoted::F64(a, b) => Value::F64(a + b),
    })
}

macro_rules! arith_op {
    ($name:ident, $int_op:ident, $float_op:tt) => {
        pub fn $name(lhs: &Value, rhs: &Value) -> Result<Value, EngineError> {
            Ok(match promote(lhs, rhs)? {
                Promoted::I32(a, b) => Value::I32(a.$int_op(b)),
                Promoted::U32(a, b) => Value::U32(a.$int_op(b)),
                Promoted::I64(a, b) => Value::I64(a.$int_op(b)),
                Promoted::F32(a, b) => Value::F32(a $float_op b),
                Promoted::F64(a, b) => Value::F64(a $float_op b),
            })
        }
    };
}

arith_op!(sub, wrapping_sub, -);
arith_op!(mul, wrapping_mul, *);

pub fn div(lhs: &Value, rhs: &Value) -> Result<Value, EngineError> {
    Ok(match promote(lhs, rhs)? {
        Promoted::I32(a, b) => Value::I32(a.checked_div(b).ok_or_else(EngineError::divide_by_zero)?),
        Promoted::U32(a, b) => Value::U32(a.checked_div(b).ok_or_else(EngineError::divide_by_zero)?),
        Promoted::I64(a, b) => Value::I64(a.checked_div(b).ok_or_else(EngineError::divide_by_zero)?),
        Promoted::F32(a, b) => Value::F32(a / b),
        Promoted::F64(a, b) => Value::F64(a / b),
    })
}

pub fn rem(lhs: &Value, rhs: &Value) -> Result<Value, EngineError> {
    Ok(match promote(lhs, rhs)? {
        Promoted::I32(a, b) => Value::I32(a.checked_rem(b).ok_or_else(EngineError::divide_by_zero)?),
        Promoted::U32(a, b) => Value::U32(a.checked_rem(b).ok_or_else(EngineError::divide_by_zero)?),
        Promoted::I64(a, b) => Value::I64(a.checked_rem(b).ok_or_else(EngineError::divide_by_zero)?),
        Promoted::F32(a, b) => Value::F32(a % b),
        Promoted::F64(a, b) => Value::F64(a % b),
    })
}

pub fn compare(lhs: &Value, rhs: &Value) -> Result<std::cmp::Ordering, EngineError> {
    if let (Value::Str(a), Value::Str(b)) = (lhs, rhs) {
        return Ok(a.cmp(b));
    }
    Ok(match promote_for_compare(lhs, rhs)? {
        Promoted::I32(a, b) => a.cmp(&b),
        Promoted::U32(a, b) => a.cmp(&b),
        Promoted::I64(a, b) => a.cmp(&b),
        Promoted::F32(a, b) => a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal),
        Promoted::F64(a, b) => a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal),
    })
}

pub fn values_equal(lhs: &Value, rhs: &Value) -> Result<bool, EngineError> {
    if let (Value::Str(a), Value::Str(b)) = (lhs, rhs) {
        return Ok(a == b);
    }
    if let (Value::Bool(a), Value::Bool(b)) = (lhs, rhs) {
        return Ok(a == b);
    }
    Ok(compare(lhs, rhs)? == std::cmp::Ordering::Equal)
}

fn as_bitwise_operand(v: &Value, op: &str) -> Result<i64, EngineError> {
    v.as_i64()
        .ok_or_else(|| EngineError::type_error(format!("`{op}` requires integer operands")))
}

pub fn bitand(lhs: &Value, rhs: &Value) -> Result<Value, EngineError> {
    Ok(Value::I64(as_bitwise_operand(lhs, "&")? & as_bitwise_operand(rhs, "&")?))
}

pub fn bitor(lhs: &Value, rhs: &Value) -> Result<Value, EngineError> {
    Ok(Value::I64(as_bitwise_operand(lhs, "|")? | as_bitwise_operand(rhs, "|")?))
}

pub fn bitxor(lhs: &Value, rhs: &Value) -> Result<Value, EngineError> {
    Ok(Value::I64(as_bitwise_operand(lhs, "^")? ^ as_bitwise_operand(rhs, "^")?))
}

pub fn shl(lhs: &Value, rhs: &Value) -> Result<Value, EngineError> {
    let a = as_bitwise_operand(lhs, "<<")?;
    let b = as_bitwise_operand(rhs, "<<")?;
    Ok(Value::I64(a.wrapping_shl(b as u32)))
}

pub fn shr(lhs: &Value, rhs: &Value) -> Result<Value, EngineError> {
    let a = as_bitwise_operand(lhs, ">>")?;
    let b = as_bitwise_operand(rhs, ">>")?;
    Ok(Value::I64(a.wrapping_shr(b as u32)))
}

pub fn negate(v: &Value) -> Result<Value, EngineError> {
    Ok(match v {
        Value::I32(v) => Value::I32(v.wrapping_neg()),
        Value::I64(v) => Value::I64(v.wrapping_neg()),
        Value::U32(v) => Value::I64(-(*v as i64)),
        Value::F32(v) => Value::F32(-v),
        Value::F64(v) => Value::F64(-v),
        Value::Char(v) => Value::I32(-(*v as i32)),
        Value::Bool(v) => Value::I32(-(*v as i32)),
        other => {
            return Err(EngineError::type_error(format!(
                "unary `-` not supported on {:?}",
                other.value_type()
            )))
        }
    })
}

pub fn not(v: &Value) -> Value {
    Value::Bool(!v.is_truthy())
}

pub fn bitnot(v: &Value) -> Result<Value, EngineError> {
    Ok(Value::I64(!as_bitwise_operand(v, "~")?))
}

/// Casts `v` to `target`, applying Arduino's defined truncation/sign-extension
/// rules for numeric widths.
pub fn cast(v: &Value, target: &ValueType) -> Result<Value, EngineError> {
    Ok(match target {
        ValueType::Int32 => Value::I32(v.as_i64().ok_or_else(|| cast_error(v, target))? as i32),
        ValueType::Int64 => Value::I64(v.as_i64().ok_or_else(|| cast_error(v, target))?),
        ValueType::UInt32 => Value::U32(v.as_i64().ok_or_else(|| cast_error(v, target))? as u32),
        ValueType::Float32 => Value::F32(v.as_f64().ok_or_else(|| cast_error(v, target))? as f32),
        ValueType::Float64 => Value::F64(v.as_f64().ok_or_else(|| cast_error(v, target))?),
        ValueType::Bool => Value::Bool(v.is_truthy()),
        ValueType::Char => Value::Char(
            char::from_u32(v.as_i64().ok_or_else(|| cast_error(v, target))? as u32).unwrap_or('\0'),
        ),
        ValueType::String => Value::Str(v.to_arduino_string()),
        ValueType::Void => Value::Void,
        ValueType::Array(..) | ValueType::Struct(_) => {
            return Err(EngineError::type_error(format!(
                "cannot cast to {target:?}"
            )))
        }
    })
}

fn cast_error(v: &Value, target: &ValueType) -> EngineError {
    EngineError::type_error(format!("cannot cast {:?} to {target:?}", v.value_type()))
}
