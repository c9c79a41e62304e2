use std::fmt;

/// The stable kind of an execution-time fault, carried on every `ERROR` command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TypeError,
    NameError,
    DivideByZero,
    StackOverflow,
    BoundsError,
    StateError,
    TimeoutError,
    InternalError,
}

impl ErrorKind {
    /// `SCREAMING_SNAKE_CASE` name used in the serialised `ERROR` command.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TypeError => "TYPE_ERROR",
            ErrorKind::NameError => "NAME_ERROR",
            ErrorKind::DivideByZero => "DIVIDE_BY_ZERO",
            ErrorKind::StackOverflow => "STACK_OVERFLOW",
            ErrorKind::BoundsError => "BOUNDS_ERROR",
            ErrorKind::StateError => "STATE_ERROR",
            ErrorKind::TimeoutError => "TIMEOUT_ERROR",
            ErrorKind::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Only `StateError` (a spurious/duplicate response) is recoverable: it is
    /// logged and ignored rather than terminating the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ErrorKind::StateError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An execution-time fault. Unlike decode errors (plain `anyhow::Error`), this
/// carries a [`ErrorKind`] so the scheduler can decide recoverability and fill
/// the `ERROR` command before converting into `anyhow::Error` at API edges.
#[derive(Clone, Debug)]
pub struct EngineError {
    kind: ErrorKind,
    message: String,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn name_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NameError, message)
    }

    pub fn divide_by_zero() -> Self {
        Self::new(ErrorKind::DivideByZero, "division by zero")
    }

    pub fn stack_overflow(max_depth: usize) -> Self {
        Self::new(
            ErrorKind::StackOverflow,
            format!("call stack exceeded maximum depth of {max_depth}"),
        )
    }

    pub fn bounds_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BoundsError, message)
    }

    pub fn state_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StateError, message)
    }

    pub fn timeout_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TimeoutError, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for EngineError {}
