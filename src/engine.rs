//! The execution engine (C7 expression evaluator + C8 statement executor +
//! C9 loop scheduler), tying the AST, scope stack, dispatcher and command
//! emitter together.
//!
//! Implementation is split the way the teacher splits large modules: this
//! file owns the `Engine` struct and the loop scheduler; `engine/eval.rs` and
//! `engine/exec.rs` add `impl Engine` blocks for the expression evaluator and
//! statement executor, and `engine/builtins.rs` adds the Arduino builtin
//! dispatch table.

mod builtins;
mod eval;
mod exec;

use crate::ast::{Ast, NodeId};
use crate::command::{Command, RequestId};
use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::scope::{FunctionDef, ScopeStack};
use crate::value::Value;
use crate::{CommandEmitter, InterpreterOptions};

/// The non-local control-flow signal threaded through statement execution
/// (§4.8 "Control-flow signal (expanded)"), the `Err` arm of every
/// `exec_stmt`/`eval_expr` result.
#[derive(Debug)]
pub enum Flow {
    Break,
    Continue,
    Return(Value),
    Suspend(RequestId),
    Error(EngineError),
}

impl From<EngineError> for Flow {
    fn from(e: EngineError) -> Self {
        Flow::Error(e)
    }
}

/// What happened during one `tick()` / one `run_function_body` call.
pub enum RunOutcome {
    Finished,
    Suspended,
}

/// One step of the path from a function body down to the exact point where
/// it suspended, recorded outermost-first. Resuming replays this path
/// instead of restarting the function body from its first statement: each
/// container the path passes through re-enters at the recorded index rather
/// than from scratch, so statements that already ran before the suspend
/// point are not run again (§4.6).
///
/// Control constructs that do not carry their own indexed child list
/// (`While`/`DoWhile`/`For` bodies) are covered transparently: their own
/// re-entry on resume only re-evaluates a condition/update expression, which
/// is accepted as the same leaf-level granularity the engine has always had
/// for expressions (see DESIGN.md).
#[derive(Clone, Copy, Debug)]
pub(crate) enum ResumeStep {
    /// Re-enter a `CompoundStatement` (a function body or any nested block)
    /// directly at `index`, skipping earlier siblings.
    Compound { node: NodeId, index: usize },
    /// Re-enter an `If`'s already-chosen branch without re-evaluating the
    /// condition or re-emitting `IfStatement`.
    IfBranch { node: NodeId, taken_then: bool },
    /// Re-enter a `Switch`'s already-selected arm without re-evaluating the
    /// discriminant, starting at `case_index`/`stmt_index`.
    SwitchArm { node: NodeId, case_index: usize, stmt_index: usize },
    /// Re-enter a `For` loop's body without re-running `init`.
    ForLoop { node: NodeId },
    /// Re-enter a range-based `for`'s body at `item_index`, skipping items
    /// that already ran.
    RangeFor { node: NodeId, item_index: usize },
}

/// Remembers exactly where a `setup()`/`loop()` invocation suspended, as a
/// path from the function body down to the suspended statement, so
/// `handle_response` can resume without re-running anything that already ran.
struct PendingResume {
    function_body: NodeId,
    resume_path: Vec<ResumeStep>,
    request_id: RequestId,
}

pub struct Engine {
    pub(crate) ast: Ast,
    pub(crate) scopes: ScopeStack,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) emitter: CommandEmitter,
    pub(crate) options: InterpreterOptions,
    pub(crate) call_depth: usize,
    /// Set for exactly one `eval_expr` call after `handle_response`: the
    /// next async builtin encountered consumes it instead of suspending.
    pub(crate) resume_value: Option<Value>,
    /// Consumed top-down while replaying a resume: each container checks its
    /// own node id against the front entry to decide whether it's on the
    /// path being resumed.
    pub(crate) resume_cursor: Vec<ResumeStep>,
    /// Built bottom-up while a `Suspend` unwinds through nested containers;
    /// reversed into a `PendingResume.resume_path` once it reaches the
    /// function body.
    pub(crate) suspend_trace: Vec<ResumeStep>,
    pending: Option<PendingResume>,
    iteration: u32,
    loop_node: Option<NodeId>,
    finished: bool,
}

impl Engine {
    pub fn new(ast: Ast, options: InterpreterOptions) -> Self {
        Self {
            ast,
            scopes: ScopeStack::new(),
            dispatcher: Dispatcher::new(),
            emitter: CommandEmitter::new(),
            options,
            call_depth: 0,
            resume_value: None,
            resume_cursor: Vec::new(),
            suspend_trace: Vec::new(),
            pending: None,
            iteration: 0,
            loop_node: None,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn options(&self) -> &InterpreterOptions {
        &self.options
    }

    pub fn emitter_mut(&mut self) -> &mut CommandEmitter {
        &mut self.emitter
    }

    pub fn emitter(&self) -> &CommandEmitter {
        &self.emitter
    }

    pub fn is_waiting_for_response(&self) -> bool {
        self.pending.is_some()
    }

    /// §4.9: emit `VERSION_INFO`, `PROGRAM_START`, install top-level
    /// declarations, then `SETUP_START`/invoke `setup()`/`SETUP_END`. Errors
    /// during this phase are reported on the command stream (`ERROR` then
    /// `PROGRAM_END`) rather than returned, matching how every other
    /// execution error is surfaced.
    pub fn run_start(&mut self) {
        self.emitter.emit(|timestamp| Command::VersionInfo {
            component: "arduino-ast-interpreter".to_owned(),
            version: self.options.version.to_owned(),
            status: "ready".to_owned(),
            timestamp,
        });
        self.emitter.emit(|timestamp| Command::ProgramStart {
            message: "program started".to_owned(),
            timestamp,
        });

        if let Err(e) = self.install_top_level() {
            self.emit_error(e);
            self.emit_program_end("terminated by unrecoverable error");
            return;
        }

        self.emitter.emit(|timestamp| Command::SetupStart {
            message: "setup started".to_owned(),
            timestamp,
        });
        if let Some(setup) = self.ast.find_function("setup") {
            // Async suspension is only supported inside `loop()` (see
            // DESIGN.md): `setup()` runs to completion in one pass, matching
            // every literal scenario, where `setup()` only ever calls
            // synchronous builtins like `pinMode`/`Serial.begin`.
            if let RunOutcome::Suspended = self.run_function_body(setup, Vec::new()) {
                self.pending = None;
                self.emit_error(EngineError::internal_error("setup() may not call an asynchronous builtin"));
                self.emit_program_end("terminated by unrecoverable error");
                return;
            }
        }
        self.emitter.emit(|timestamp| Command::SetupEnd {
            message: "setup finished".to_owned(),
            timestamp,
        });

        self.loop_node = self.ast.find_function("loop");
        self.iteration = 0;
    }

    fn install_top_level(&mut self) -> Result<(), EngineError> {
        use crate::ast::NodeKind;
        let crate::ast::NodeKind::Program { children } = self.ast.kind(self.ast.root()).clone() else {
            return Err(EngineError::internal_error("AST root is not a Program"));
        };
        for child in children {
            match self.ast.kind(child).clone() {
                NodeKind::FunctionDefinition { declarator_name, params, body, .. } => {
                    self.scopes.declare_function(FunctionDef {
                        name: declarator_name,
                        params,
                        body,
                    });
                }
                NodeKind::VariableDeclaration { .. } => {
                    self.exec_stmt(child).map_err(flow_to_top_level_error)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Drives exactly one `loop()` invocation (or declares natural
    /// termination if there is no `loop()`). Called repeatedly by
    /// `Interpreter::tick` until the iteration bound is reached.
    pub fn run_loop_iteration(&mut self) -> Result<RunOutcome, ()> {
        let Some(loop_node) = self.loop_node else {
            self.emit_program_end("no loop() defined");
            return Ok(RunOutcome::Finished);
        };
        if self.iteration >= self.options.max_loop_iterations {
            self.emitter.emit(|timestamp| Command::LoopEnd {
                function: "loop".to_owned(),
                iteration: self.iteration,
                limit_reached: true,
                iterations: self.iteration,
                timestamp,
                message: "loop iteration limit reached".to_owned(),
            });
            self.emit_program_end("loop iteration limit reached");
            return Ok(RunOutcome::Finished);
        }
        self.iteration += 1;
        self.emitter.emit(|timestamp| Command::LoopStart {
            function: "loop".to_owned(),
            iteration: self.iteration,
            timestamp,
            message: format!("loop iteration {}", self.iteration),
        });
        self.emitter.emit(|timestamp| Command::FunctionCall {
            function: "loop".to_owned(),
            message: "loop started".to_owned(),
            iteration: self.iteration,
            completed: false,
            timestamp,
        });

        match self.run_function_body(loop_node, Vec::new()) {
            RunOutcome::Finished => {
                self.emit_loop_finished();
                Ok(RunOutcome::Finished)
            }
            RunOutcome::Suspended => Ok(RunOutcome::Suspended),
        }
    }

    fn emit_loop_finished(&mut self) {
        self.emitter.emit(|timestamp| Command::FunctionCall {
            function: "loop".to_owned(),
            message: "loop finished".to_owned(),
            iteration: self.iteration,
            completed: true,
            timestamp,
        });
    }

    /// Emits `LOOP_END { limitReached: false }` followed by `PROGRAM_END`,
    /// used for a host-initiated `stop()` between iterations (§4.9).
    pub fn stop_between_iterations(&mut self) {
        self.emitter.emit(|timestamp| Command::LoopEnd {
            function: "loop".to_owned(),
            iteration: self.iteration,
            limit_reached: false,
            iterations: self.iteration,
            timestamp,
            message: "stopped by host".to_owned(),
        });
        self.emit_program_end("stopped by host");
    }

    fn emit_program_end(&mut self, message: &str) {
        self.emitter.emit(|timestamp| Command::ProgramEnd {
            message: message.to_owned(),
            timestamp,
        });
        self.finished = true;
    }

    /// Executes `body` (a `CompoundStatement`), replaying `resume_path` if
    /// non-empty, catching `Return` as a normal end-of-invocation and
    /// `Suspend` as a pause to resume later along the path that led to it.
    fn run_function_body(&mut self, body: NodeId, resume_path: Vec<ResumeStep>) -> RunOutcome {
        let crate::ast::NodeKind::CompoundStatement { children } = self.ast.kind(body).clone() else {
            return RunOutcome::Finished;
        };
        self.resume_cursor = resume_path;
        self.suspend_trace.clear();
        match self.exec_compound(body, &children) {
            Ok(()) | Err(Flow::Return(_)) => RunOutcome::Finished,
            Err(Flow::Suspend(request_id)) => {
                let mut resume_path = std::mem::take(&mut self.suspend_trace);
                resume_path.reverse();
                self.pending = Some(PendingResume {
                    function_body: body,
                    resume_path,
                    request_id,
                });
                RunOutcome::Suspended
            }
            Err(Flow::Error(e)) => {
                let recoverable = e.kind().is_recoverable();
                self.emit_error(e);
                if !recoverable {
                    self.emit_program_end("terminated by unrecoverable error");
                }
                RunOutcome::Finished
            }
            Err(Flow::Break) | Err(Flow::Continue) => {
                self.emit_error(EngineError::internal_error("break/continue outside of a loop"));
                self.emit_program_end("terminated by unrecoverable error");
                RunOutcome::Finished
            }
        }
    }

    /// Executes `children` (the statements of the `CompoundStatement`
    /// identified by `node`, whether that's a function body or any nested
    /// block), honoring `resume_cursor`: if its front entry targets this
    /// exact node, execution starts at the recorded index instead of 0. On a
    /// `Suspend` propagating from a child, records this node's own position
    /// in `suspend_trace` before re-propagating.
    ///
    /// Owns this node's scope frame: pushes it on a fresh entry, leaves it in
    /// place (matching the frame a resumed re-entry expects to find) when
    /// suspending, and pops it exactly once otherwise.
    pub(crate) fn exec_compound(&mut self, node: NodeId, children: &[NodeId]) -> Result<(), Flow> {
        let start = match self.resume_cursor.first().copied() {
            Some(ResumeStep::Compound { node: n, index }) if n == node => {
                self.resume_cursor.remove(0);
                index
            }
            _ => {
                self.scopes.push();
                0
            }
        };
        for (i, &stmt) in children.iter().enumerate().skip(start) {
            match self.exec_stmt(stmt) {
                Ok(()) => {}
                Err(Flow::Suspend(request_id)) => {
                    self.suspend_trace.push(ResumeStep::Compound { node, index: i });
                    return Err(Flow::Suspend(request_id));
                }
                Err(other) => {
                    self.scopes.pop();
                    return Err(other);
                }
            }
        }
        self.scopes.pop();
        Ok(())
    }

    fn emit_error(&mut self, error: EngineError) {
        let kind = error.kind();
        let message = error.message().to_owned();
        if self.options.verbose {
            eprintln!("[arduino-ast-interpreter] {kind:?}: {message}");
        }
        self.emitter.emit(|timestamp| Command::Error {
            kind: crate::command::ErrorKindWire(kind),
            message,
            timestamp,
        });
    }

    /// Resolves `request_id` against the dispatcher and resumes the
    /// statement that suspended, continuing the rest of its enclosing
    /// function body (§4.6, §6 `handleResponse`).
    pub fn handle_response(&mut self, request_id: &str, raw: serde_json::Value) -> Result<RunOutcome, EngineError> {
        let Some(pending) = self.pending.take() else {
            return Err(EngineError::state_error("handle_response called with no outstanding request"));
        };
        if pending.request_id != request_id {
            // Not ours: per §4.6 this is ignored (treated as a recoverable
            // spurious response), the real pending request stays armed.
            self.pending = Some(pending);
            return Err(EngineError::state_error(format!(
                "response for `{request_id}` does not match the outstanding request `{}`",
                pending.request_id
            )));
        }
        let value = self.dispatcher.resolve(request_id, raw)?;
        self.resume_value = Some(value);
        // `setup()` can never suspend (see `run_start`), so any resumed body
        // here is always the current `loop()` invocation — finishing it
        // needs the same wrap-up `run_loop_iteration` emits inline.
        match self.run_function_body(pending.function_body, pending.resume_path) {
            RunOutcome::Finished => {
                self.emit_loop_finished();
                Ok(RunOutcome::Finished)
            }
            outcome @ RunOutcome::Suspended => Ok(outcome),
        }
    }

    pub fn mock_respond_and_resume(&mut self, responder: &mut dyn crate::dispatcher::MockResponder, last_request: &Command) -> Result<RunOutcome, EngineError> {
        let value = responder.respond(last_request);
        let raw = value_to_json(&value);
        let request_id = self
            .pending
            .as_ref()
            .map(|p| p.request_id.clone())
            .ok_or_else(|| EngineError::state_error("no outstanding request to mock-respond to"))?;
        self.handle_response(&request_id, raw)
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

fn flow_to_top_level_error(flow: Flow) -> EngineError {
    match flow {
        Flow::Error(e) => e,
        Flow::Suspend(_) => EngineError::internal_error("top-level declarations may not suspend"),
        Flow::Break | Flow::Continue | Flow::Return(_) => {
            EngineError::internal_error("break/continue/return outside of a function")
        }
    }
}
