#![forbid(unsafe_code)]

//! A hardware-independent interpreter for a compact binary encoding of
//! Arduino/C++ sketch ASTs (§1). Decodes the AST (C2/C3), walks it with a
//! tree-walking evaluator (C7/C8) driven by a cooperative loop scheduler
//! (C9), and reports every observable effect as a `Command` on an external
//! listener (C5/C6) instead of touching real hardware.

pub mod ast;
pub mod command;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod scope;
pub mod value;

#[cfg(test)]
mod test;

use anyhow::{bail, ensure, Result};

pub use ast::Ast;
pub use command::{Command, CommandEmitter, RequestId};
pub use dispatcher::MockResponder;
pub use engine::Engine;
pub use error::{EngineError, ErrorKind};
pub use value::{Value, ValueType};

use engine::RunOutcome;

/// A host-delivered response to an outstanding `_REQUEST` command, resolved
/// against the `ValueType` recorded when the request was opened (§4.6).
pub type ResponseValue = serde_json::Value;

/// Interpreter configuration (§6). Every field has the effect documented on
/// its accessor's call sites in `engine`/`dispatcher`.
#[derive(Clone, Debug)]
pub struct InterpreterOptions {
    /// Hard cap on `loop()` invocations before the session self-terminates
    /// with `LOOP_END { limitReached: true }` (§4.9, §8 RecursionBound-style
    /// safety net for non-terminating sketches).
    pub max_loop_iterations: u32,
    /// When set, every `_REQUEST` is answered immediately by the installed
    /// [`MockResponder`] instead of being surfaced to the host as a real
    /// suspension (§4.6).
    pub sync_mode: bool,
    pub verbose: bool,
    pub debug: bool,
    /// Optional artificial pause between `tick()`s, honoured only by
    /// `run_to_completion`'s driving loop; real-time hosts ignore it and
    /// drive `tick()` on their own clock.
    pub step_delay: Option<std::time::Duration>,
    pub version: &'static str,
    /// Recursive user-function call depth before `STACK_OVERFLOW` (§4.7).
    pub max_call_depth: usize,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            max_loop_iterations: 10_000,
            sync_mode: true,
            verbose: false,
            debug: false,
            step_delay: None,
            version: env!("CARGO_PKG_VERSION"),
            max_call_depth: 64,
        }
    }
}

/// The session's coarse-grained lifecycle state, returned by
/// [`Interpreter::state`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterpreterState {
    NotStarted,
    Running,
    WaitingForResponse,
    Stopped,
    Finished,
}

/// What a single [`Interpreter::tick`] accomplished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// One `loop()` iteration completed; more may follow.
    Continued,
    /// The engine is waiting on a host response; call `handle_response` (or,
    /// in sync mode, `tick` resolves it internally and this is never seen).
    Suspended,
    /// `PROGRAM_END` was emitted; the session is over.
    Finished,
}

/// The host-facing session wrapper (§6): owns the [`Engine`], tracks
/// [`InterpreterState`], and in sync mode owns the [`MockResponder`] used to
/// answer every `_REQUEST` without a real host round-trip.
pub struct Interpreter {
    engine: Engine,
    state: InterpreterState,
    responder: Option<Box<dyn MockResponder>>,
}

impl Interpreter {
    pub fn new(ast: Ast, options: InterpreterOptions) -> Self {
        let sync_mode = options.sync_mode;
        Self {
            engine: Engine::new(ast, options),
            state: InterpreterState::NotStarted,
            responder: sync_mode.then(|| Box::new(dispatcher::DeterministicMockResponder::new(0)) as Box<dyn MockResponder>),
        }
    }

    /// Runs `VERSION_INFO`/`PROGRAM_START`/top-level declarations/`setup()`,
    /// leaving the session ready for `tick()` to drive `loop()`.
    pub fn start(&mut self) -> Result<()> {
        ensure!(self.state == InterpreterState::NotStarted, "start() called twice");
        self.engine.run_start();
        self.state = if self.engine.is_finished() {
            InterpreterState::Finished
        } else {
            InterpreterState::Running
        };
        Ok(())
    }

    /// Advances one `loop()` iteration. In sync mode, any suspension inside
    /// that iteration is resolved immediately through the configured
    /// [`MockResponder`] and never surfaced as [`TickOutcome::Suspended`].
    pub fn tick(&mut self) -> Result<TickOutcome> {
        ensure!(self.state != InterpreterState::NotStarted, "tick() called before start()");
        if self.state == InterpreterState::Finished || self.state == InterpreterState::Stopped {
            return Ok(TickOutcome::Finished);
        }

        let outcome = self.engine.run_loop_iteration().expect("run_loop_iteration is infallible");
        match outcome {
            RunOutcome::Finished if self.engine.is_finished() => {
                self.state = InterpreterState::Finished;
                Ok(TickOutcome::Finished)
            }
            RunOutcome::Finished => Ok(TickOutcome::Continued),
            RunOutcome::Suspended => self.resolve_suspension(),
        }
    }

    /// Repeatedly answers the outstanding request through the
    /// [`MockResponder`] (sync mode) until the suspended statement runs to
    /// completion or suspends again, then folds that back into a
    /// [`TickOutcome`]. In async mode this just records the suspension.
    fn resolve_suspension(&mut self) -> Result<TickOutcome> {
        self.state = InterpreterState::WaitingForResponse;
        let Some(responder) = self.responder.as_deref_mut() else {
            return Ok(TickOutcome::Suspended);
        };
        loop {
            let last = self
                .engine
                .emitter()
                .history()
                .last()
                .expect("a _REQUEST command was just emitted")
                .clone();
            match self.engine.mock_respond_and_resume(responder, &last)? {
                RunOutcome::Suspended => continue,
                RunOutcome::Finished if self.engine.is_finished() => {
                    self.state = InterpreterState::Finished;
                    return Ok(TickOutcome::Finished);
                }
                RunOutcome::Finished => {
                    self.state = InterpreterState::Running;
                    return Ok(TickOutcome::Continued);
                }
            }
        }
    }

    /// Requests termination between `loop()` iterations (§4.9). Takes effect
    /// on the next `tick()`.
    pub fn stop(&mut self) {
        if self.state == InterpreterState::Running || self.state == InterpreterState::WaitingForResponse {
            self.engine.stop_between_iterations();
            self.state = InterpreterState::Stopped;
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, InterpreterState::Running | InterpreterState::WaitingForResponse)
    }

    pub fn is_waiting_for_response(&self) -> bool {
        self.state == InterpreterState::WaitingForResponse
    }

    pub fn state(&self) -> InterpreterState {
        self.state
    }

    pub fn set_command_listener(&mut self, listener: impl FnMut(&Command) + 'static) {
        self.engine.emitter_mut().set_listener(listener);
    }

    /// The full command history recorded so far, independent of whether a
    /// listener is installed (`CommandEmitter` always records one).
    pub fn emitter(&self) -> &CommandEmitter {
        self.engine.emitter()
    }

    /// Installs the responder used to answer requests in sync mode,
    /// overriding the default [`dispatcher::DeterministicMockResponder`].
    pub fn set_response_handler(&mut self, handler: impl MockResponder + 'static) {
        self.responder = Some(Box::new(handler));
    }

    /// Delivers a host response in async mode (§6 `handleResponse`). A
    /// mismatched or unknown `request_id` is a recoverable `STATE_ERROR`,
    /// reported on the command stream rather than returned here.
    pub fn handle_response(&mut self, request_id: &str, value: ResponseValue) -> Result<()> {
        ensure!(self.state == InterpreterState::WaitingForResponse, "no outstanding request to answer");
        match self.engine.handle_response(request_id, value) {
            Ok(RunOutcome::Finished) if self.engine.is_finished() => self.state = InterpreterState::Finished,
            Ok(RunOutcome::Finished) => self.state = InterpreterState::Running,
            Ok(RunOutcome::Suspended) => self.state = InterpreterState::WaitingForResponse,
            Err(e) if e.kind().is_recoverable() => {}
            Err(e) => bail!(e),
        }
        Ok(())
    }

    /// Convenience driver for the `ast-tools` CLI and tests: ticks until
    /// [`TickOutcome::Finished`], answering suspensions through the
    /// configured responder. Errors if a real suspension occurs while not in
    /// sync mode (there is no host to answer it).
    pub fn run_to_completion(&mut self) -> Result<()> {
        self.start()?;
        while self.state != InterpreterState::Finished {
            match self.tick()? {
                TickOutcome::Finished => break,
                TickOutcome::Continued => {}
                TickOutcome::Suspended => {
                    bail!("run_to_completion requires sync_mode (no host to answer request)");
                }
            }
            if let Some(delay) = self.engine.options().step_delay {
                std::thread::sleep(delay);
            }
        }
        Ok(())
    }
}
