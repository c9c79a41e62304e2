//! Statement execution (C8).

use crate::ast::{CaseArm, NodeId, NodeKind};
use crate::command::Command;
use crate::error::EngineError;
use crate::scope::Binding;
use crate::value::Value;

use super::{Engine, Flow, ResumeStep};

impl Engine {
    pub(crate) fn exec_stmt(&mut self, node: NodeId) -> Result<(), Flow> {
        if self.options.debug {
            eprintln!("[arduino-ast-interpreter] exec {node} {:?}", self.ast.kind(node));
        }
        match self.ast.kind(node).clone() {
            NodeKind::CompoundStatement { children } => self.exec_compound(node, &children),
            NodeKind::VariableDeclaration {
                declared_type,
                declarators,
                is_const,
            } => {
                for d in declarators {
                    let shape = (!d.array_dims.is_empty()).then(|| crate::value::ArrayShape(d.array_dims.clone()));
                    let value = match (d.initializer, &shape) {
                        (Some(init), _) => self.eval_expr(init)?,
                        (None, Some(shape)) => Value::Array(vec![declared_type.default_value(); shape.len()], shape.clone()),
                        (None, Option::None) => declared_type.default_value(),
                    };
                    let mut binding = Binding::new(declared_type.clone(), value.clone(), is_const);
                    binding.shape = shape;
                    self.scopes.declare(d.name.clone(), binding);
                    self.emit_var_set(&d.name, value, is_const);
                }
                Ok(())
            }
            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if let Some(ResumeStep::IfBranch { node: n, taken_then }) = self.resume_cursor.first().copied() {
                    if n == node {
                        self.resume_cursor.remove(0);
                        let branch = if taken_then {
                            then_branch
                        } else {
                            else_branch.expect("resume path took the else branch, but this If has none")
                        };
                        return self.exec_if_branch(node, branch, taken_then);
                    }
                }
                let cond_value = self.eval_expr(condition)?;
                let taken = cond_value.is_truthy();
                let branch = if taken {
                    "then"
                } else if else_branch.is_some() {
                    "else"
                } else {
                    "none"
                };
                self.emitter.emit(|timestamp| Command::IfStatement {
                    condition: cond_value.clone(),
                    result: taken,
                    branch: branch.to_owned(),
                    timestamp,
                });
                match if taken { Some(then_branch) } else { else_branch } {
                    Some(branch) => self.exec_if_branch(node, branch, taken),
                    None => Ok(()),
                }
            }
            NodeKind::While { condition, body } => {
                while self.eval_expr(condition)?.is_truthy() {
                    match self.exec_stmt(body) {
                        Ok(()) | Err(Flow::Continue) => {}
                        Err(Flow::Break) => break,
                        Err(other) => return Err(other),
                    }
                }
                Ok(())
            }
            NodeKind::DoWhile { condition, body } => {
                loop {
                    match self.exec_stmt(body) {
                        Ok(()) | Err(Flow::Continue) => {}
                        Err(Flow::Break) => break,
                        Err(other) => return Err(other),
                    }
                    if !self.eval_expr(condition)?.is_truthy() {
                        break;
                    }
                }
                Ok(())
            }
            NodeKind::For {
                init,
                condition,
                update,
                body,
            } => {
                let resuming = matches!(self.resume_cursor.first(), Some(ResumeStep::ForLoop { node: n }) if *n == node);
                if resuming {
                    self.resume_cursor.remove(0);
                } else {
                    self.scopes.push();
                    if let Some(init) = init {
                        if let Err(flow) = self.exec_stmt(init) {
                            self.scopes.pop();
                            return Err(flow);
                        }
                    }
                }
                let result = (|| {
                    loop {
                        if let Some(condition) = condition {
                            if !self.eval_expr(condition)?.is_truthy() {
                                break;
                            }
                        }
                        match self.exec_stmt(body) {
                            Ok(()) | Err(Flow::Continue) => {}
                            Err(Flow::Break) => break,
                            Err(other) => return Err(other),
                        }
                        if let Some(update) = update {
                            self.eval_expr(update)?;
                        }
                    }
                    Ok(())
                })();
                match &result {
                    Err(Flow::Suspend(_)) => self.suspend_trace.push(ResumeStep::ForLoop { node }),
                    _ => self.scopes.pop(),
                }
                result
            }
            NodeKind::RangeBasedFor {
                var_name,
                var_type,
                iterable,
                body,
            } => self.exec_range_based_for(node, &var_name, &var_type, iterable, body),
            NodeKind::Switch { discriminant, cases } => {
                if let Some(ResumeStep::SwitchArm { node: n, case_index, stmt_index }) = self.resume_cursor.first().copied() {
                    if n == node {
                        self.resume_cursor.remove(0);
                        return match self.exec_switch_arms(node, &cases, case_index, stmt_index) {
                            Ok(()) | Err(Flow::Break) => Ok(()),
                            Err(other) => Err(other),
                        };
                    }
                }
                let value = self.eval_expr(discriminant)?;
                let mut matched = false;
                let mut default_index = None;
                for (i, case) in cases.iter().enumerate() {
                    match case.value {
                        Some(case_value_node) => {
                            let case_value = self.eval_expr(case_value_node)?;
                            if !matched && crate::value::values_equal(&value, &case_value).map_err(Flow::Error)? {
                                matched = true;
                            }
                        }
                        None => default_index = Some(i),
                    }
                    if matched {
                        return match self.exec_switch_arms(node, &cases, i, 0) {
                            Ok(()) | Err(Flow::Break) => Ok(()),
                            Err(other) => Err(other),
                        };
                    }
                }
                if let Some(i) = default_index {
                    return match self.exec_switch_arms(node, &cases, i, 0) {
                        Ok(()) | Err(Flow::Break) => Ok(()),
                        Err(other) => Err(other),
                    };
                }
                Ok(())
            }
            NodeKind::Return { value } => {
                let v = match value {
                    Some(expr) => self.eval_expr(expr)?,
                    None => Value::Void,
                };
                Err(Flow::Return(v))
            }
            NodeKind::Break => Err(Flow::Break),
            NodeKind::Continue => Err(Flow::Continue),
            NodeKind::Empty => Ok(()),
            _ => {
                // Any other node appearing directly in a statement position is
                // an expression statement: evaluate for side effects, discard
                // the value.
                self.eval_expr(node)?;
                Ok(())
            }
        }
    }

    /// Executes an `If`'s already-chosen `branch`, tracking a resume step if
    /// it suspends so a later resume skips straight back into it.
    fn exec_if_branch(&mut self, node: NodeId, branch: NodeId, taken_then: bool) -> Result<(), Flow> {
        match self.exec_stmt(branch) {
            Err(Flow::Suspend(request_id)) => {
                self.suspend_trace.push(ResumeStep::IfBranch { node, taken_then });
                Err(Flow::Suspend(request_id))
            }
            other => other,
        }
    }

    /// Executes `case`/`default` arms of `cases` starting at `start_case`
    /// (and, within that first arm, `start_stmt`), falling through until a
    /// `Break` (caught and turned into `Ok`) or the arms run out.
    fn exec_switch_arms(&mut self, node: NodeId, cases: &[CaseArm], start_case: usize, start_stmt: usize) -> Result<(), Flow> {
        for (ci, arm) in cases.iter().enumerate().skip(start_case) {
            let stmt_start = if ci == start_case { start_stmt } else { 0 };
            for (si, &stmt) in arm.body.iter().enumerate().skip(stmt_start) {
                if let Err(flow) = self.exec_stmt(stmt) {
                    if let Flow::Suspend(_) = flow {
                        self.suspend_trace.push(ResumeStep::SwitchArm {
                            node,
                            case_index: ci,
                            stmt_index: si,
                        });
                    }
                    return Err(flow);
                }
            }
        }
        Ok(())
    }

    /// Executes a range-based `for`'s body once per item of the (freshly
    /// re-evaluated) iterable, skipping items already run when resuming.
    fn exec_range_based_for(
        &mut self,
        node: NodeId,
        var_name: &str,
        var_type: &crate::value::ValueType,
        iterable: NodeId,
        body: NodeId,
    ) -> Result<(), Flow> {
        let resume_here = matches!(self.resume_cursor.first(), Some(ResumeStep::RangeFor { node: n, .. }) if *n == node);
        let start_index = if resume_here {
            let Some(ResumeStep::RangeFor { item_index, .. }) = self.resume_cursor.first().copied() else {
                unreachable!("resume_here guarantees a RangeFor entry")
            };
            self.resume_cursor.remove(0);
            item_index
        } else {
            0
        };
        let Value::Array(items, _) = self.eval_expr(iterable)? else {
            return Err(EngineError::type_error("range-based for requires an array").into());
        };
        for (idx, item) in items.into_iter().enumerate().skip(start_index) {
            let resuming_this_item = resume_here && idx == start_index;
            if !resuming_this_item {
                self.scopes.push();
                self.scopes.declare(var_name.to_owned(), Binding::new(var_type.clone(), item, false));
            }
            // Frame left in place when resuming this item: it already holds
            // `var_name`'s binding from before the suspend.
            match self.exec_stmt(body) {
                Ok(()) => self.scopes.pop(),
                Err(Flow::Continue) => self.scopes.pop(),
                Err(Flow::Break) => {
                    self.scopes.pop();
                    break;
                }
                Err(Flow::Suspend(request_id)) => {
                    self.suspend_trace.push(ResumeStep::RangeFor { node, item_index: idx });
                    return Err(Flow::Suspend(request_id));
                }
                Err(other) => {
                    self.scopes.pop();
                    return Err(other);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn emit_var_set(&mut self, name: &str, value: Value, is_const: bool) {
        let is_const = if is_const { Some(true) } else { None };
        self.emitter.emit(|timestamp| Command::VarSet {
            variable: name.to_owned(),
            value: value.clone(),
            timestamp,
            is_const,
        });
    }
}
