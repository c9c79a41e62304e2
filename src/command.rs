//! The command record model and emitter (C5).
//!
//! Field order inside each variant is the canonical order from §6 and is
//! load-bearing: `serde_json` serialises a struct's fields in declaration
//! order, so the literal order below *is* the wire format. Don't reorder
//! these casually.

use serde::Serialize;

use crate::error::ErrorKind;
use crate::value::Value;

pub type RequestId = String;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    PinMode {
        pin: i32,
        mode: i32,
        timestamp: u64,
    },
    DigitalWrite {
        pin: i32,
        value: i32,
        timestamp: u64,
    },
    AnalogWrite {
        pin: i32,
        value: i32,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    DigitalReadRequest {
        pin: i32,
        request_id: RequestId,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    AnalogReadRequest {
        pin: i32,
        request_id: RequestId,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    MillisRequest { request_id: RequestId, timestamp: u64 },
    #[serde(rename_all = "camelCase")]
    MicrosRequest { request_id: RequestId, timestamp: u64 },
    #[serde(rename_all = "camelCase")]
    Delay {
        duration: u64,
        actual_delay: u64,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    DelayMicroseconds {
        duration: u64,
        actual_delay: u64,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    SerialBegin {
        arguments: Vec<Value>,
        baud_rate: u32,
        timestamp: u64,
        message: String,
    },
    SerialPrint {
        arguments: Vec<Value>,
        data: String,
        timestamp: u64,
        message: String,
    },
    SerialPrintln {
        arguments: Vec<Value>,
        data: String,
        timestamp: u64,
        message: String,
    },
    Tone {
        pin: i32,
        frequency: u32,
        duration: u32,
        timestamp: u64,
    },
    NoTone { pin: i32, timestamp: u64 },
    #[serde(rename_all = "camelCase")]
    LibraryMethodRequest {
        object: String,
        method: String,
        args: Vec<Value>,
        request_id: RequestId,
        timestamp: u64,
    },
    FunctionCall {
        function: String,
        message: String,
        iteration: u32,
        completed: bool,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    VarSet {
        variable: String,
        value: Value,
        timestamp: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_const: Option<bool>,
    },
    IfStatement {
        condition: Value,
        result: bool,
        branch: String,
        timestamp: u64,
    },
    LoopStart {
        function: String,
        iteration: u32,
        timestamp: u64,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    LoopEnd {
        function: String,
        iteration: u32,
        limit_reached: bool,
        iterations: u32,
        timestamp: u64,
        message: String,
    },
    VersionInfo {
        component: String,
        version: String,
        status: String,
        timestamp: u64,
    },
    ProgramStart { message: String, timestamp: u64 },
    ProgramEnd { message: String, timestamp: u64 },
    SetupStart { message: String, timestamp: u64 },
    SetupEnd { message: String, timestamp: u64 },
    Error {
        kind: ErrorKindWire,
        message: String,
        timestamp: u64,
    },
}

/// A thin serializable wrapper so `ERROR.kind` renders as the
/// `SCREAMING_SNAKE_CASE` name §7 specifies without making [`ErrorKind`]
/// itself depend on `serde`.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(into = "String")]
pub struct ErrorKindWire(pub ErrorKind);

impl From<ErrorKindWire> for String {
    fn from(w: ErrorKindWire) -> Self {
        w.0.as_str().to_owned()
    }
}

impl Command {
    /// Renders the command to the canonical JSON form (§6), `type` first and
    /// every other field in declaration order.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Owns the monotonic clock and the installed listener (C5). `emit` is the
/// only place a `Command`'s `timestamp` is ever set, so call sites cannot
/// violate the non-decreasing-timestamp invariant (§5 Ordering).
pub struct CommandEmitter {
    clock: u64,
    listener: Option<Box<dyn FnMut(&Command)>>,
    history: Vec<Command>,
}

impl CommandEmitter {
    pub fn new() -> Self {
        Self {
            clock: 0,
            listener: None,
            history: Vec::new(),
        }
    }

    pub fn set_listener(&mut self, listener: impl FnMut(&Command) + 'static) {
        self.listener = Some(Box::new(listener));
    }

    pub fn next_timestamp(&mut self) -> u64 {
        let t = self.clock;
        self.clock += 1;
        t
    }

    pub fn history(&self) -> &[Command] {
        &self.history
    }

    /// Stamps `timestamp` on `builder(timestamp)`'s result, invokes the
    /// listener, and appends to history.
    pub fn emit(&mut self, builder: impl FnOnce(u64) -> Command) -> &Command {
        let ts = self.next_timestamp();
        let command = builder(ts);
        if let Some(listener) = self.listener.as_mut() {
            listener(&command);
        }
        self.history.push(command);
        self.history.last().unwrap()
    }
}

impl Default for CommandEmitter {
    fn default() -> Self {
        Self::new()
    }
}
