//! A single-pass compiler for a small subset of C, emitting x86-64 assembly
//! in Intel syntax for the System V AMD64 ABI.
//!
//! The pipeline is lexer → parser → code generator, with no intermediate
//! representation between the AST and assembly text. All per-translation-unit
//! state lives in an explicit [`Compiler`] value threaded through the phases,
//! so independent compilations do not interfere and tests can construct
//! fresh contexts freely.
//!
//! ```
//! let mut out = Vec::new();
//! nanocc::compile("int main() { return 42; }", &mut out).unwrap();
//! assert!(String::from_utf8(out).unwrap().contains("main:"));
//! ```

pub mod util;
pub mod lexer;
pub mod types;
pub mod build_ast;
pub mod codegen;

use std::io::Write;
use thiserror::Error;

use types::ast::FuncDef;
use types::entity::{Entity, StringPool};
use util::NameMap;

/// Everything the compiler accumulates about one translation unit: function
/// definitions in source order, the global namespace, and the string pool.
/// Built by the parser, read by the code generator, dropped all at once.
#[derive(Debug, Default)]
pub struct Compiler {
  /// Function definitions, in source order.
  pub funcs: Vec<FuncDef>,
  /// The global namespace: functions and global variables. Insertion order
  /// is preserved so the data section comes out deterministic.
  pub entities: NameMap<Entity>,
  /// The deduplicating string-literal pool.
  pub strings: StringPool,
}

/// Any error from any phase, unified for the driver. Each phase reports
/// through its own type; this just forwards their messages.
#[derive(Debug, Error)]
pub enum Error {
  /// The lexer rejected the input.
  #[error(transparent)]
  Lex(#[from] lexer::LexError),
  /// The parser or type checker rejected the input.
  #[error(transparent)]
  Parse(#[from] build_ast::ParseError),
  /// The generator hit an internal invariant violation or I/O failure.
  #[error(transparent)]
  Codegen(#[from] codegen::CodegenError),
}

/// Compile one source text, writing the assembly translation unit to `out`.
pub fn compile(src: &str, out: &mut impl Write) -> Result<(), Error> {
  let toks = lexer::tokenize(src)?;
  let mut cx = Compiler::default();
  build_ast::parse(&toks, &mut cx)?;
  log::debug!(
    "{} function(s), {} entity(ies), {} pooled string(s)",
    cx.funcs.len(), cx.entities.len(), cx.strings.len()
  );
  codegen::write_asm(&cx, out)?;
  Ok(())
}
