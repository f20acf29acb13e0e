//! Bytecode compiler for the Little language
//!
//! Little is a small statically-typed imperative language over sized
//! integers. This crate lexes and parses a whole program, type-checks it
//! against a compile-time mirror of the VM's operand stack, and emits a
//! flat bytecode image for the companion stack machine: a call to `main`,
//! `HALT`, then every function's code in source order with all call and
//! jump targets backpatched.

/// Syntax tree definitions
pub mod ast;
/// Tree-walking code generator
pub mod codegen;
/// Instruction decoder over an emitted image
pub mod decode;
/// Opcodes and the bytecode emitter
pub mod emit;
/// Error kinds and diagnostics
pub mod error;
/// Compile-time stack frame model
pub mod frame;
/// Tokenizer
pub mod lex;
/// Recursive-descent parser
pub mod parse;
/// The sized integer types and operand descriptors
pub mod ty;

pub use self::emit::Opcode;
pub use self::error::{CompileError, ErrorKind};
pub use self::ty::IntType;

/// Compile Little source text into a bytecode image.
pub fn compile(source: &[u8]) -> Result<Vec<u8>, CompileError> {
    let tokens = lex::tokenize(source)?;
    let tree = parse::parse(tokens)?;
    codegen::generate(&tree)
}
