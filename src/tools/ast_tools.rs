//! Small CLI around the decoder and interpreter, for poking at `.aast` files
//! by hand (decode/inspect a tree, or run it to completion in sync mode and
//! watch the command stream).

use std::fs;
use std::path::PathBuf;

use anyhow::{ensure, Result};
use clap::{Parser, Subcommand};

use arduino_ast_interpreter::{Ast, Interpreter, InterpreterOptions};

/// Decode and run compact Arduino AST files.
#[derive(Clone, Debug, Parser)]
struct Args {
    #[command(subcommand)]
    operation: Operation,
}

#[derive(Clone, Debug, Subcommand)]
enum Operation {
    /// Decode a binary AST file and print the tree.
    Decode(DecodeArgs),
    /// Decode, then re-encode, and check the bytes round-trip exactly.
    Roundtrip(DecodeArgs),
    /// Run a binary AST file to completion (sync mode), printing every
    /// emitted command as one JSON object per line.
    Run(DecodeArgs),
}

#[derive(Clone, Debug, Parser)]
struct DecodeArgs {
    /// path to a compact binary AST file
    input: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    match &args.operation {
        Operation::Decode(decode_args) => decode(decode_args),
        Operation::Roundtrip(decode_args) => roundtrip(decode_args),
        Operation::Run(decode_args) => run(decode_args),
    }
}

fn load(args: &DecodeArgs) -> Result<Ast> {
    let bytes = fs::read(&args.input)?;
    arduino_ast_interpreter::ast::decode(&bytes)
}

fn decode(args: &DecodeArgs) -> Result<()> {
    let ast = load(args)?;
    for node in ast.nodes() {
        println!("{} parent={:?} {:?}", node.id, node.parent, node.kind);
    }
    Ok(())
}

fn roundtrip(args: &DecodeArgs) -> Result<()> {
    let original = fs::read(&args.input)?;
    let ast = arduino_ast_interpreter::ast::decode(&original)?;
    let reencoded = arduino_ast_interpreter::ast::encode(&ast)?;
    ensure!(original == reencoded, "round-trip mismatch: {} bytes in, {} bytes out", original.len(), reencoded.len());
    println!("ok: {} nodes, {} bytes", ast.len(), reencoded.len());
    Ok(())
}

fn run(args: &DecodeArgs) -> Result<()> {
    let ast = load(args)?;
    let mut options = InterpreterOptions::default();
    options.sync_mode = true;
    let mut interp = Interpreter::new(ast, options);
    interp.set_command_listener(|command| {
        if let Ok(json) = command.to_json() {
            println!("{json}");
        }
    });
    interp.run_to_completion()
}
