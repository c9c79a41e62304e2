//! The request/response dispatcher (C6): allocates request ids, tracks
//! outstanding requests, and resolves them against host-delivered or mocked
//! responses.

use std::collections::HashMap;

use crate::command::{Command, RequestId};
use crate::error::EngineError;
use crate::value::{Value, ValueType};

/// What the engine needs to remember about a request it is waiting on:
/// the type the host's response must be coerced to.
#[derive(Clone, Debug)]
pub struct OutstandingRequest {
    pub expected_type: ValueType,
}

/// Tracks in-flight `_REQUEST`s keyed by the opaque id handed to the host.
pub struct Dispatcher {
    next_id: u64,
    outstanding: HashMap<RequestId, OutstandingRequest>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            outstanding: HashMap::new(),
        }
    }

    /// Allocates a fresh request id and records what type the eventual
    /// response must coerce to.
    pub fn open(&mut self, expected_type: ValueType) -> RequestId {
        let id = format!("req_{}", self.next_id);
        self.next_id += 1;
        self.outstanding.insert(id.clone(), OutstandingRequest { expected_type });
        id
    }

    pub fn is_outstanding(&self, request_id: &str) -> bool {
        self.outstanding.contains_key(request_id)
    }

    pub fn has_outstanding(&self) -> bool {
        !self.outstanding.is_empty()
    }

    /// Resolves `request_id` with a raw host-provided JSON value, coercing it
    /// to the type recorded at `open` time. Unknown/already-resolved ids are
    /// a recoverable `StateError` (§4.6: "ignored with a warning").
    pub fn resolve(&mut self, request_id: &str, raw: serde_json::Value) -> Result<Value, EngineError> {
        let request = self
            .outstanding
            .remove(request_id)
            .ok_or_else(|| EngineError::state_error(format!("response for unknown or already-resolved request `{request_id}`")))?;
        coerce_response(raw, &request.expected_type)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn coerce_response(raw: serde_json::Value, expected: &ValueType) -> Result<Value, EngineError> {
    let type_error = || EngineError::type_error(format!("response value {raw} cannot be coerced to {expected:?}"));
    Ok(match expected {
        ValueType::Int32 => Value::I32(raw.as_i64().ok_or_else(type_error)? as i32),
        ValueType::Int64 => Value::I64(raw.as_i64().ok_or_else(type_error)?),
        ValueType::UInt32 => Value::U32(raw.as_u64().ok_or_else(type_error)? as u32),
        ValueType::Float32 => Value::F32(raw.as_f64().ok_or_else(type_error)? as f32),
        ValueType::Float64 => Value::F64(raw.as_f64().ok_or_else(type_error)?),
        ValueType::Bool => Value::Bool(raw.as_bool().unwrap_or_else(|| raw.as_i64().map(|v| v != 0).unwrap_or(false))),
        ValueType::String => Value::Str(raw.as_str().ok_or_else(type_error)?.to_owned()),
        _ => return Err(type_error()),
    })
}

/// A deterministic stand-in for the host, used in sync mode (§4.6).
pub trait MockResponder {
    fn respond(&mut self, request: &Command) -> Value;
}

/// The default sync-mode responder: `0`/`false` for reads, a counter seeded
/// from the emitter's clock for `millis`/`micros`, so repeated runs of the
/// same program are byte-identical.
pub struct DeterministicMockResponder {
    clock: u64,
}

impl DeterministicMockResponder {
    pub fn new(seed: u64) -> Self {
        Self { clock: seed }
    }
}

impl MockResponder for DeterministicMockResponder {
    fn respond(&mut self, request: &Command) -> Value {
        match request {
            Command::AnalogReadRequest { .. } => Value::I32(0),
            Command::DigitalReadRequest { .. } => Value::Bool(false),
            Command::MillisRequest { .. } | Command::MicrosRequest { .. } => {
                self.clock += 1;
                Value::U32(self.clock as u32)
            }
            Command::LibraryMethodRequest { .. } => Value::Void,
            _ => Value::Void,
        }
    }
}
