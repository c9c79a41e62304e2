use rstest::rstest;

use crate::ast::{Ast, Node, NodeId, NodeKind};
use crate::value::{Value, ValueType};
use crate::{Interpreter, InterpreterOptions};

/// Hand-builds small ASTs for the scenarios below — there is no lexer/parser
/// in scope, so tests assemble the tree node by node the way a fuzzer or a
/// codec round-trip test would. `reserve`/`set` mirrors an arena: the caller
/// decides a node's id before its children exist, so the `Program` root can
/// always land at id 0 without a renumbering pass.
struct Builder {
    nodes: Vec<Option<Node>>,
}

impl Builder {
    fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    fn reserve(&mut self) -> NodeId {
        let id = NodeId(self.nodes.len() as u16);
        self.nodes.push(None);
        id
    }

    fn set(&mut self, id: NodeId, kind: NodeKind) {
        self.nodes[id.0 as usize] = Some(Node { id, parent: None, kind });
    }

    /// Reserves and sets in one call, for leaf/simple nodes built inline.
    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = self.reserve();
        self.set(id, kind);
        id
    }

    fn finish(self) -> Ast {
        let mut nodes: Vec<Node> = self.nodes.into_iter().map(|n| n.expect("every reserved id must be set")).collect();
        for i in 0..nodes.len() {
            let parent_id = nodes[i].id;
            for child in nodes[i].kind.children() {
                nodes[child.0 as usize].parent = Some(parent_id);
            }
        }
        Ast::from_nodes(nodes)
    }
}

fn number(b: &mut Builder, v: i32) -> NodeId {
    b.push(NodeKind::NumberLiteral { value: Value::I32(v) })
}

fn ident(b: &mut Builder, name: &str) -> NodeId {
    b.push(NodeKind::Identifier { name: name.to_owned() })
}

fn compound(b: &mut Builder, children: Vec<NodeId>) -> NodeId {
    b.push(NodeKind::CompoundStatement { children })
}

fn call(b: &mut Builder, name: &str, args: Vec<NodeId>) -> NodeId {
    let callee = ident(b, name);
    b.push(NodeKind::FunctionCall { callee, arguments: args })
}

fn func_def(b: &mut Builder, name: &str, body: NodeId) -> NodeId {
    b.push(NodeKind::FunctionDefinition {
        return_type: ValueType::Void,
        declarator_name: name.to_owned(),
        params: Vec::new(),
        body,
    })
}

fn var_decl(b: &mut Builder, ty: ValueType, name: &str, init: NodeId) -> NodeId {
    b.push(NodeKind::VariableDeclaration {
        declared_type: ty,
        declarators: vec![crate::ast::Declarator {
            name: name.to_owned(),
            array_dims: Vec::new(),
            initializer: Some(init),
        }],
        is_const: false,
    })
}

fn bin(b: &mut Builder, op: &str, left: NodeId, right: NodeId) -> NodeId {
    b.push(NodeKind::BinaryOp {
        operator: op.to_owned(),
        left,
        right,
    })
}

/// Wraps `setup`/`loop` bodies (already built) into a `Program` root at id 0.
fn program(b: &mut Builder, program_id: NodeId, setup_body: NodeId, loop_body: Option<NodeId>) {
    let setup = func_def(b, "setup", setup_body);
    let children = match loop_body {
        Some(loop_body) => {
            let loop_fn = func_def(b, "loop", loop_body);
            vec![setup, loop_fn]
        }
        None => vec![setup],
    };
    b.set(program_id, NodeKind::Program { children });
}

/// Runs `ast` to completion in sync mode with a command listener that
/// records each command's `type` tag, returning them in emission order.
fn run_and_capture_kinds(ast: Ast, max_loop_iterations: u32) -> Vec<String> {
    use std::cell::RefCell;
    use std::rc::Rc;

    let options = InterpreterOptions {
        max_loop_iterations,
        sync_mode: true,
        ..Default::default()
    };
    let kinds = Rc::new(RefCell::new(Vec::new()));
    let recorded = Rc::clone(&kinds);
    let mut interp = Interpreter::new(ast, options);
    interp.set_command_listener(move |command| {
        let json = command.to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        recorded.borrow_mut().push(parsed["type"].as_str().unwrap().to_owned());
    });
    interp.run_to_completion().unwrap();
    Rc::try_unwrap(kinds).unwrap().into_inner()
}

#[test]
fn bare_minimum_runs_setup_and_loop_then_terminates() {
    let mut b = Builder::new();
    let program_id = b.reserve();
    let setup_body = compound(&mut b, vec![]);
    let loop_body = compound(&mut b, vec![]);
    program(&mut b, program_id, setup_body, Some(loop_body));
    let ast = b.finish();

    let history = run_and_capture_kinds(ast, 2);
    assert_eq!(history.first().unwrap(), "VERSION_INFO");
    assert_eq!(history.last().unwrap(), "PROGRAM_END");
    assert!(history.contains(&"SETUP_START".to_owned()));
    assert!(history.contains(&"SETUP_END".to_owned()));
    assert_eq!(history.iter().filter(|k| *k == "LOOP_START").count(), 2);
}

#[test]
fn blink_emits_pin_mode_and_digital_write_commands() {
    let mut b = Builder::new();
    let program_id = b.reserve();

    let pin = number(&mut b, 13);
    let mode = number(&mut b, 1);
    let pin_mode_call = call(&mut b, "pinMode", vec![pin, mode]);
    let setup_body = compound(&mut b, vec![pin_mode_call]);

    let pin2 = number(&mut b, 13);
    let high = number(&mut b, 1);
    let write_high = call(&mut b, "digitalWrite", vec![pin2, high]);
    let pin3 = number(&mut b, 13);
    let low = number(&mut b, 0);
    let write_low = call(&mut b, "digitalWrite", vec![pin3, low]);
    let loop_body = compound(&mut b, vec![write_high, write_low]);

    program(&mut b, program_id, setup_body, Some(loop_body));
    let ast = b.finish();

    let history = run_and_capture_kinds(ast, 1);
    assert!(history.contains(&"PIN_MODE".to_owned()));
    assert_eq!(history.iter().filter(|k| *k == "DIGITAL_WRITE").count(), 2);
}

#[test]
fn divide_by_zero_terminates_with_error_then_program_end() {
    let mut b = Builder::new();
    let program_id = b.reserve();
    let setup_body = compound(&mut b, vec![]);

    let ten = number(&mut b, 10);
    let zero = number(&mut b, 0);
    let division = bin(&mut b, "/", ten, zero);
    let decl = var_decl(&mut b, ValueType::Int32, "x", division);
    let loop_body = compound(&mut b, vec![decl]);

    program(&mut b, program_id, setup_body, Some(loop_body));
    let ast = b.finish();

    let history = run_and_capture_kinds(ast, 5);
    assert!(history.contains(&"ERROR".to_owned()));
    assert_eq!(history.last().unwrap(), "PROGRAM_END");
    // the fault must stop the session outright, not merely the iteration
    assert_eq!(history.iter().filter(|k| *k == "LOOP_START").count(), 1);
}

#[test]
fn fade_assignment_emits_var_set_before_if_statement() {
    let mut b = Builder::new();
    let program_id = b.reserve();

    let brightness_init = number(&mut b, 0);
    let fade_init = number(&mut b, 5);
    let brightness_decl = var_decl(&mut b, ValueType::Int32, "brightness", brightness_init);
    let fade_decl = var_decl(&mut b, ValueType::Int32, "fadeAmount", fade_init);
    let setup_body = compound(&mut b, vec![]);

    let brightness_lhs = ident(&mut b, "brightness");
    let brightness_rhs = ident(&mut b, "brightness");
    let fade_amount = ident(&mut b, "fadeAmount");
    let sum = bin(&mut b, "+", brightness_rhs, fade_amount);
    let assignment = b.push(NodeKind::Assignment {
        operator: "=".to_owned(),
        lvalue: brightness_lhs,
        rvalue: sum,
    });
    let zero = number(&mut b, 0);
    let condition = bin(&mut b, "<", ident(&mut b, "brightness"), zero);
    let then_branch = compound(&mut b, vec![]);
    let if_stmt = b.push(NodeKind::If {
        condition,
        then_branch,
        else_branch: None,
    });
    let loop_body = compound(&mut b, vec![assignment, if_stmt]);

    // top-level decls run before `setup`/`loop`, so `program`'s children here
    // must list them ahead of the function definitions it builds.
    let setup = func_def(&mut b, "setup", setup_body);
    let loop_fn = func_def(&mut b, "loop", loop_body);
    b.set(program_id, NodeKind::Program {
        children: vec![brightness_decl, fade_decl, setup, loop_fn],
    });
    let ast = b.finish();

    let history = run_and_capture_kinds(ast, 1);
    let var_set_index = history.iter().position(|k| k == "VAR_SET").unwrap();
    let if_index = history.iter().position(|k| k == "IF_STATEMENT").unwrap();
    assert!(var_set_index < if_index);
}

#[test]
fn analog_read_serial_suspends_then_resumes_with_host_response() {
    let mut b = Builder::new();
    let program_id = b.reserve();
    let setup_body = compound(&mut b, vec![]);

    let a0 = number(&mut b, 0);
    let analog_read = call(&mut b, "analogRead", vec![a0]);
    let v_decl = var_decl(&mut b, ValueType::Int32, "v", analog_read);
    let v_arg = ident(&mut b, "v");
    let println_call = call(&mut b, "Serial.println", vec![v_arg]);
    let loop_body = compound(&mut b, vec![v_decl, println_call]);

    program(&mut b, program_id, setup_body, Some(loop_body));
    let ast = b.finish();

    let options = InterpreterOptions {
        max_loop_iterations: 1,
        sync_mode: false,
        ..Default::default()
    };
    let mut interp = Interpreter::new(ast, options);
    interp.start().unwrap();
    assert_eq!(interp.tick().unwrap(), crate::TickOutcome::Suspended);
    assert!(interp.is_waiting_for_response());

    let request_id = {
        let last = interp.emitter().history().last().unwrap().clone();
        let json: serde_json::Value = serde_json::from_str(&last.to_json().unwrap()).unwrap();
        json["requestId"].as_str().unwrap().to_owned()
    };
    interp.handle_response(&request_id, serde_json::json!(975)).unwrap();

    let kinds: Vec<String> = interp
        .emitter()
        .history()
        .iter()
        .map(|c| {
            let json: serde_json::Value = serde_json::from_str(&c.to_json().unwrap()).unwrap();
            json["type"].as_str().unwrap().to_owned()
        })
        .collect();
    assert!(kinds.contains(&"ANALOG_READ_REQUEST".to_owned()));
    assert!(kinds.contains(&"VAR_SET".to_owned()));
    assert!(kinds.contains(&"SERIAL_PRINTLN".to_owned()));
}

#[test]
fn suspend_inside_nested_if_does_not_replay_earlier_statements_on_resume() {
    let mut b = Builder::new();
    let program_id = b.reserve();
    let setup_body = compound(&mut b, vec![]);

    let before_msg = b.push(NodeKind::StringLiteral { value: "before".to_owned() });
    let println_before = call(&mut b, "Serial.println", vec![before_msg]);
    let a0 = number(&mut b, 0);
    let analog_read = call(&mut b, "analogRead", vec![a0]);
    let v_decl = var_decl(&mut b, ValueType::Int32, "v", analog_read);
    let v_arg = ident(&mut b, "v");
    let println_after = call(&mut b, "Serial.println", vec![v_arg]);
    let then_branch = compound(&mut b, vec![println_before, v_decl, println_after]);

    let truthy = number(&mut b, 1);
    let if_stmt = b.push(NodeKind::If {
        condition: truthy,
        then_branch,
        else_branch: None,
    });
    let loop_body = compound(&mut b, vec![if_stmt]);

    program(&mut b, program_id, setup_body, Some(loop_body));
    let ast = b.finish();

    let options = InterpreterOptions {
        max_loop_iterations: 1,
        sync_mode: false,
        ..Default::default()
    };
    let mut interp = Interpreter::new(ast, options);
    interp.start().unwrap();
    assert_eq!(interp.tick().unwrap(), crate::TickOutcome::Suspended);

    let request_id = {
        let last = interp.emitter().history().last().unwrap().clone();
        let json: serde_json::Value = serde_json::from_str(&last.to_json().unwrap()).unwrap();
        json["requestId"].as_str().unwrap().to_owned()
    };
    interp.handle_response(&request_id, serde_json::json!(512)).unwrap();

    let println_count = interp
        .emitter()
        .history()
        .iter()
        .filter(|c| {
            let json: serde_json::Value = serde_json::from_str(&c.to_json().unwrap()).unwrap();
            json["type"].as_str().unwrap() == "SERIAL_PRINTLN"
        })
        .count();
    // one for "before" (ran once, pre-suspend) and one for `v` (post-resume);
    // a resume that restarts the `if` body from scratch would double "before".
    assert_eq!(println_count, 2);
}

#[test]
fn unconditional_recursion_stops_at_max_call_depth() {
    let mut b = Builder::new();
    let program_id = b.reserve();

    // `void recurse() { recurse(); }`, called once from `loop()`.
    let recurse_fn_id = b.reserve();
    let recurse_call = call(&mut b, "recurse", vec![]);
    let recurse_body = compound(&mut b, vec![recurse_call]);
    b.set(recurse_fn_id, NodeKind::FunctionDefinition {
        return_type: ValueType::Void,
        declarator_name: "recurse".to_owned(),
        params: Vec::new(),
        body: recurse_body,
    });

    let setup_body = compound(&mut b, vec![]);
    let initial_call = call(&mut b, "recurse", vec![]);
    let loop_body = compound(&mut b, vec![initial_call]);
    let setup = func_def(&mut b, "setup", setup_body);
    let loop_fn = func_def(&mut b, "loop", loop_body);
    b.set(program_id, NodeKind::Program {
        children: vec![recurse_fn_id, setup, loop_fn],
    });
    let ast = b.finish();

    let options = InterpreterOptions {
        max_loop_iterations: 1,
        sync_mode: true,
        max_call_depth: 64,
        ..Default::default()
    };
    let mut interp = Interpreter::new(ast, options);
    interp.run_to_completion().unwrap();

    let records: Vec<serde_json::Value> = interp
        .emitter()
        .history()
        .iter()
        .map(|c| serde_json::from_str(&c.to_json().unwrap()).unwrap())
        .collect();
    let history: Vec<&str> = records.iter().map(|j| j["type"].as_str().unwrap()).collect();
    assert!(history.contains(&"ERROR"));
    assert_eq!(*history.last().unwrap(), "PROGRAM_END");

    // §8 Scenario 6: exactly 64 nested FUNCTION_CALL start records (one per
    // `recurse()` call depth up to `max_call_depth`), then the overflow error.
    let starts = records
        .iter()
        .filter(|j| j["type"] == "FUNCTION_CALL" && j["function"] == "recurse" && j["completed"] == false)
        .count();
    assert_eq!(starts, 64);
}

#[rstest]
#[case(Value::I32(2), Value::I32(3), Value::I32(5))]
#[case(Value::I32(-1), Value::U32(4_000_000_000), Value::I64(3_999_999_999))]
#[case(Value::F32(1.5), Value::I32(2), Value::F32(3.5))]
#[case(Value::Bool(true), Value::I32(1), Value::I32(2))]
fn add_promotes_operands(#[case] lhs: Value, #[case] rhs: Value, #[case] expected: Value) {
    assert_eq!(crate::value::add(&lhs, &rhs).unwrap(), expected);
}

#[test]
fn integer_division_by_zero_is_an_engine_error() {
    let err = crate::value::div(&Value::I32(1), &Value::I32(0)).unwrap_err();
    assert_eq!(err.kind(), crate::error::ErrorKind::DivideByZero);
}

#[test]
fn float_division_by_zero_is_infinity_not_an_error() {
    let result = crate::value::div(&Value::F64(1.0), &Value::F64(0.0)).unwrap();
    assert_eq!(result, Value::F64(f64::INFINITY));
}

#[test]
fn scope_shadowing_prefers_innermost_frame() {
    let mut scopes = crate::scope::ScopeStack::new();
    scopes.declare("x", crate::scope::Binding::new(ValueType::Int32, Value::I32(1), false));
    scopes.push();
    scopes.declare("x", crate::scope::Binding::new(ValueType::Int32, Value::I32(2), false));
    assert_eq!(scopes.lookup("x").unwrap().value, Value::I32(2));
    scopes.pop();
    assert_eq!(scopes.lookup("x").unwrap().value, Value::I32(1));
}

#[test]
fn scope_assign_writes_innermost_binding_without_creating_a_new_one() {
    let mut scopes = crate::scope::ScopeStack::new();
    scopes.declare("x", crate::scope::Binding::new(ValueType::Int32, Value::I32(1), false));
    scopes.push();
    scopes.assign("x", Value::I32(9)).unwrap();
    assert_eq!(scopes.lookup("x").unwrap().value, Value::I32(9));
    scopes.pop();
    assert_eq!(scopes.lookup("x").unwrap().value, Value::I32(9));
}

#[rstest]
#[case::bad_magic(&[b'X', b'X', b'X', b'X', 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0])]
#[case::unsupported_version(&[b'A', b'C', b'A', b'S', 99, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0])]
#[case::truncated_header(&[b'A', b'C', b'A', b'S', 1, 0])]
fn decode_rejects_malformed_header(#[case] bytes: &[u8]) {
    assert!(crate::ast::decode(bytes).is_err());
}

#[test]
fn decode_rejects_trailing_bytes() {
    let mut b = Builder::new();
    let program_id = b.reserve();
    b.set(program_id, NodeKind::Program { children: vec![] });
    let ast = b.finish();
    let mut bytes = crate::ast::encode(&ast).unwrap();
    bytes.push(0xFF);
    assert!(crate::ast::decode(&bytes).is_err());
}

#[test]
fn encode_decode_round_trips_a_small_tree() {
    let mut b = Builder::new();
    let program_id = b.reserve();
    let setup_body = compound(&mut b, vec![]);
    program(&mut b, program_id, setup_body, None);
    let ast = b.finish();

    let bytes = crate::ast::encode(&ast).unwrap();
    let decoded = crate::ast::decode(&bytes).unwrap();
    assert_eq!(decoded.len(), ast.len());
    assert!(matches!(decoded.kind(decoded.root()), NodeKind::Program { .. }));
}
