//! The code generator: a naive stack-machine translation from the AST to
//! x86-64 assembly in Intel syntax, System V AMD64 ABI.
//!
//! Every expression emission leaves exactly one 8-byte value on top of the
//! hardware stack; every statement emission leaves the stack where it found
//! it. The generator tracks a simulated stack offset (`stackpos`) from the
//! 16-byte-aligned post-prologue baseline so that call sites can be padded
//! to the ABI's alignment requirement. Violations of the simulation's
//! invariants are internal errors, reported as [`CodegenError`] rather than
//! diagnostics.

use std::fmt::Display;
use std::io::{self, Write};
use arrayvec::ArrayVec;
use thiserror::Error;

use crate::Compiler;
use crate::types::ast::{Binop, Expr, ExprKind, FuncDef, Place, Stmt, Unop};
use crate::types::entity::Entity;
use crate::types::{Ty, TyKind};

/// A hardware register under its qword, dword, and byte names.
#[derive(Clone, Copy, Debug)]
struct Reg {
  q: &'static str,
  d: &'static str,
  b: &'static str,
}

const RAX: Reg = Reg { q: "rax", d: "eax", b: "al" };
const RDI: Reg = Reg { q: "rdi", d: "edi", b: "dil" };
const RSI: Reg = Reg { q: "rsi", d: "esi", b: "sil" };

/// The integer argument registers of the SysV calling convention, in
/// argument order. Arguments past the sixth travel on the stack.
const ARG_REGS: [Reg; 6] = [
  RDI,
  RSI,
  Reg { q: "rdx", d: "edx", b: "dl" },
  Reg { q: "rcx", d: "ecx", b: "cl" },
  Reg { q: "r8", d: "r8d", b: "r8b" },
  Reg { q: "r9", d: "r9d", b: "r9b" },
];

/// Internal invariant violations and output failures. The first four are
/// compiler bugs, not user errors.
#[derive(Debug, Error)]
pub enum CodegenError {
  /// The simulated stack pointer went below the baseline.
  #[error("internal error: expression stack underflow")]
  StackUnderflow,
  /// A statement left the simulated stack at a different depth.
  #[error("internal error: statement changed the stack depth ({before} -> {after})")]
  StackImbalance {
    /// Depth before the statement.
    before: u32,
    /// Depth after the statement.
    after: u32,
  },
  /// A call site was about to be emitted with a misaligned stack.
  #[error("internal error: call site misaligned (stackpos {stackpos})")]
  Misaligned {
    /// The simulated stack offset at the `call`.
    stackpos: u32,
  },
  /// An expression shape the generator has no translation for reached it.
  #[error("internal error: no lvalue translation for this expression")]
  NotLvalue,
  /// Writing the output failed.
  #[error("writing assembly output: {0}")]
  Io(#[from] io::Error),
}

/// Translate a fully parsed [`Compiler`] context to assembly text.
pub fn write_asm(cx: &Compiler, w: &mut impl Write) -> Result<(), CodegenError> {
  let mut sink = Codegen { w, stackpos: 0, labels: 0, epilogue: String::new() };
  writeln!(sink.w, ".intel_syntax noprefix")?;
  writeln!(sink.w, ".text")?;
  for f in &cx.funcs {
    sink.func(f)?;
  }

  let globals: Vec<_> = cx.entities.iter()
    .filter_map(|(name, e)| match e {
      Entity::Global(g) => Some((name, g)),
      Entity::Func(_) => None,
    })
    .collect();
  if !globals.is_empty() {
    writeln!(sink.w, ".data")?;
    for (name, g) in globals {
      writeln!(sink.w, "{name}:")?;
      match g.init {
        Some(v) if g.ty.size() == 1 => writeln!(sink.w, "  .byte {v}")?,
        Some(v) => writeln!(sink.w, "  .long {v}")?,
        None => writeln!(sink.w, "  .zero {}", g.ty.size())?,
      }
    }
  }

  if !cx.strings.is_empty() {
    writeln!(sink.w, ".section .rodata")?;
    for (id, s) in cx.strings.iter() {
      writeln!(sink.w, "{}:", id.label())?;
      writeln!(sink.w, "  .asciz \"{}\"", escape(s))?;
    }
  }
  Ok(())
}

/// Escape string contents for a gas `.asciz` directive. Non-printing bytes
/// use octal escapes, which gas accepts inside double quotes.
fn escape(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for b in s.bytes() {
    match b {
      b'"' => out.push_str("\\\""),
      b'\\' => out.push_str("\\\\"),
      b'\n' => out.push_str("\\n"),
      b'\t' => out.push_str("\\t"),
      0x20..=0x7e => out.push(char::from(b)),
      _ => out.push_str(&format!("\\{b:03o}")),
    }
  }
  out
}

struct Codegen<'a, W> {
  w: &'a mut W,
  /// Bytes pushed past the aligned post-prologue baseline. Always a
  /// multiple of 8; must be 0 at the end of every statement and a multiple
  /// of 16 at every `call`.
  stackpos: u32,
  /// Monotone counter for unique label suffixes.
  labels: u32,
  /// The epilogue label of the function being emitted.
  epilogue: String,
}

impl<W: Write> Codegen<'_, W> {
  fn push(&mut self, src: impl Display) -> Result<(), CodegenError> {
    writeln!(self.w, "  push {src}")?;
    self.stackpos += 8;
    Ok(())
  }

  fn pop(&mut self, dst: &str) -> Result<(), CodegenError> {
    self.stackpos = self.stackpos.checked_sub(8).ok_or(CodegenError::StackUnderflow)?;
    writeln!(self.w, "  pop {dst}")?;
    Ok(())
  }

  fn fresh(&mut self) -> u32 {
    let n = self.labels;
    self.labels += 1;
    n
  }

  fn func(&mut self, f: &FuncDef) -> Result<(), CodegenError> {
    log::debug!("emitting `{}` (frame {} bytes)", f.name, f.frame_size);
    self.epilogue = format!(".L.return.{}", f.name);
    self.stackpos = 0;
    writeln!(self.w, ".globl {}", f.name)?;
    writeln!(self.w, "{}:", f.name)?;
    writeln!(self.w, "  push rbp")?;
    writeln!(self.w, "  mov rbp, rsp")?;
    if f.frame_size > 0 {
      writeln!(self.w, "  sub rsp, {}", f.frame_size)?;
    }
    for (i, p) in f.params.iter().enumerate() {
      if let Some(&reg) = ARG_REGS.get(i) {
        self.store_at(&p.ty, p.offset, reg)?;
      } else {
        // The seventh and later arguments arrive above the return address.
        let src = 16 + 8 * (i - ARG_REGS.len());
        writeln!(self.w, "  mov rax, [rbp+{src}]")?;
        self.store_at(&p.ty, p.offset, RAX)?;
      }
    }
    self.stmt(&f.body)?;
    if self.stackpos != 0 {
      return Err(CodegenError::StackImbalance { before: 0, after: self.stackpos })
    }
    writeln!(self.w, "{}:", self.epilogue)?;
    writeln!(self.w, "  mov rsp, rbp")?;
    writeln!(self.w, "  pop rbp")?;
    writeln!(self.w, "  ret")?;
    Ok(())
  }

  // Statements

  fn stmt(&mut self, s: &Stmt) -> Result<(), CodegenError> {
    let before = self.stackpos;
    self.stmt_inner(s)?;
    if self.stackpos != before {
      return Err(CodegenError::StackImbalance { before, after: self.stackpos })
    }
    Ok(())
  }

  fn stmt_inner(&mut self, s: &Stmt) -> Result<(), CodegenError> {
    match s {
      Stmt::Blank => Ok(()),
      Stmt::Expr(e) => {
        self.rvalue(e)?;
        self.pop("rax")
      }
      Stmt::Decl { init: None, .. } => Ok(()),
      Stmt::Decl { ty, offset, init: Some(e), .. } => {
        // An initializer is an assignment whose value is discarded.
        writeln!(self.w, "  lea rax, [rbp{offset}]")?;
        self.push("rax")?;
        self.rvalue(e)?;
        self.pop("rdi")?;
        self.pop("rax")?;
        self.store(ty, RDI)
      }
      Stmt::Compound(stmts) => {
        for s in stmts { self.stmt(s)? }
        Ok(())
      }
      Stmt::If { cond, then, els } => {
        let n = self.fresh();
        match els {
          None => {
            self.branch_if_zero(cond, &format!(".L.end.{n}"))?;
            self.stmt(then)?;
          }
          Some(els) => {
            self.branch_if_zero(cond, &format!(".L.else.{n}"))?;
            self.stmt(then)?;
            writeln!(self.w, "  jmp .L.end.{n}")?;
            writeln!(self.w, ".L.else.{n}:")?;
            self.stmt(els)?;
          }
        }
        writeln!(self.w, ".L.end.{n}:")?;
        Ok(())
      }
      Stmt::While { cond, body } => {
        let n = self.fresh();
        writeln!(self.w, ".L.begin.{n}:")?;
        self.branch_if_zero(cond, &format!(".L.end.{n}"))?;
        self.stmt(body)?;
        writeln!(self.w, "  jmp .L.begin.{n}")?;
        writeln!(self.w, ".L.end.{n}:")?;
        Ok(())
      }
      Stmt::For { init, cond, step, body } => {
        let n = self.fresh();
        if let Some(e) = init {
          self.rvalue(e)?;
          self.pop("rax")?;
        }
        writeln!(self.w, ".L.begin.{n}:")?;
        if let Some(e) = cond {
          // An omitted condition never exits the loop.
          self.branch_if_zero(e, &format!(".L.end.{n}"))?;
        }
        self.stmt(body)?;
        if let Some(e) = step {
          self.rvalue(e)?;
          self.pop("rax")?;
        }
        writeln!(self.w, "  jmp .L.begin.{n}")?;
        writeln!(self.w, ".L.end.{n}:")?;
        Ok(())
      }
      Stmt::Return(e) => {
        if let Some(e) = e {
          self.rvalue(e)?;
          self.pop("rax")?;
        }
        // The epilogue resets rsp from rbp, so the simulated depth at the
        // jump does not need unwinding here.
        writeln!(self.w, "  jmp {}", self.epilogue)?;
        Ok(())
      }
    }
  }

  fn branch_if_zero(&mut self, cond: &Expr, target: &str) -> Result<(), CodegenError> {
    self.rvalue(cond)?;
    self.pop("rax")?;
    writeln!(self.w, "  cmp rax, 0")?;
    writeln!(self.w, "  je {target}")?;
    Ok(())
  }

  // Expressions

  /// Emit `e` as a value: exactly one 8-byte push.
  fn rvalue(&mut self, e: &Expr) -> Result<(), CodegenError> {
    match &e.kind {
      ExprKind::Num(n) => self.push(n),
      ExprKind::Str(_) | ExprKind::Var { .. } | ExprKind::Member(..) => {
        self.lvalue(e)?;
        self.load(&e.ty)
      }
      ExprKind::Unary(Unop::Deref, p) => {
        self.rvalue(p)?;
        self.load(&e.ty)
      }
      ExprKind::Unary(Unop::Addr, p) => self.lvalue(p),
      ExprKind::Unary(Unop::Neg, p) => {
        self.rvalue(p)?;
        self.pop("rax")?;
        writeln!(self.w, "  neg rax")?;
        self.push("rax")
      }
      ExprKind::Unary(Unop::Not, p) => {
        self.rvalue(p)?;
        self.pop("rax")?;
        writeln!(self.w, "  cmp rax, 0")?;
        writeln!(self.w, "  sete al")?;
        writeln!(self.w, "  movzx rax, al")?;
        self.push("rax")
      }
      ExprKind::Unary(Unop::Sizeof, p) => {
        // The operand is never evaluated; only its size is.
        self.push(p.ty.size())
      }
      ExprKind::Unary(op @ (Unop::PreInc | Unop::PreDec | Unop::PostInc | Unop::PostDec), p) =>
        self.step(*op, p),
      ExprKind::Binary(op, l, r) => self.binary(*op, l, r),
      ExprKind::Assign(l, r) => {
        self.lvalue(l)?;
        self.rvalue(r)?;
        self.pop("rdi")?;
        self.pop("rax")?;
        self.store(&l.ty, RDI)?;
        // Assignment is an expression; its value is the stored value.
        self.push("rdi")
      }
      ExprKind::Call { name, args } => self.call(name, args),
    }
  }

  /// Emit the address of `e`: exactly one 8-byte push.
  fn lvalue(&mut self, e: &Expr) -> Result<(), CodegenError> {
    match &e.kind {
      ExprKind::Var { place: Place::Frame(off), .. } => {
        writeln!(self.w, "  lea rax, [rbp{off}]")?;
        self.push("rax")
      }
      ExprKind::Var { place: Place::Label(l), .. } => {
        writeln!(self.w, "  lea rax, [rip+{l}]")?;
        self.push("rax")
      }
      ExprKind::Str(id) => {
        writeln!(self.w, "  lea rax, [rip+{}]", id.label())?;
        self.push("rax")
      }
      // The address of `*p` is the value of `p`.
      ExprKind::Unary(Unop::Deref, p) => self.rvalue(p),
      ExprKind::Member(base, offset) => {
        self.lvalue(base)?;
        if *offset != 0 {
          self.pop("rax")?;
          writeln!(self.w, "  add rax, {offset}")?;
          self.push("rax")?;
        }
        Ok(())
      }
      _ => Err(CodegenError::NotLvalue),
    }
  }

  /// Pop an address and push the value stored there, sized and sign-extended
  /// by type. Array- and struct-typed expressions stay as addresses: that is
  /// exactly array decay.
  fn load(&mut self, ty: &Ty) -> Result<(), CodegenError> {
    if let TyKind::Array(..) | TyKind::Struct(_) = **ty { return Ok(()) }
    self.pop("rax")?;
    match ty.size() {
      1 => writeln!(self.w, "  movsx rax, byte ptr [rax]")?,
      4 => writeln!(self.w, "  movsxd rax, dword ptr [rax]")?,
      _ => writeln!(self.w, "  mov rax, [rax]")?,
    }
    self.push("rax")
  }

  /// Store `val` through the address in `rax`, sized by type.
  fn store(&mut self, ty: &Ty, val: Reg) -> Result<(), CodegenError> {
    match ty.size() {
      1 => writeln!(self.w, "  mov byte ptr [rax], {}", val.b)?,
      4 => writeln!(self.w, "  mov dword ptr [rax], {}", val.d)?,
      _ => writeln!(self.w, "  mov [rax], {}", val.q)?,
    }
    Ok(())
  }

  /// Store `val` into the frame slot at `offset`, sized by type.
  fn store_at(&mut self, ty: &Ty, offset: i32, val: Reg) -> Result<(), CodegenError> {
    match ty.size() {
      1 => writeln!(self.w, "  mov byte ptr [rbp{offset}], {}", val.b)?,
      4 => writeln!(self.w, "  mov dword ptr [rbp{offset}], {}", val.d)?,
      _ => writeln!(self.w, "  mov [rbp{offset}], {}", val.q)?,
    }
    Ok(())
  }

  /// The four increment/decrement forms. The post forms push the original
  /// value, the pre forms the stepped value; pointers step by the element
  /// size.
  fn step(&mut self, op: Unop, p: &Expr) -> Result<(), CodegenError> {
    let delta = p.ty.pointee().map_or(1, |elem| i64::from(elem.size()));
    let insn = match op {
      Unop::PreInc | Unop::PostInc => "add",
      _ => "sub",
    };
    self.lvalue(p)?;
    self.pop("rax")?;
    self.push("rax")?;
    self.push("rax")?;
    self.load(&p.ty)?;
    self.pop("rdi")?;
    self.pop("rax")?;
    writeln!(self.w, "  mov rsi, rdi")?;
    writeln!(self.w, "  {insn} rsi, {delta}")?;
    self.store(&p.ty, RSI)?;
    match op {
      Unop::PostInc | Unop::PostDec => self.push("rdi"),
      _ => self.push("rsi"),
    }
  }

  fn binary(&mut self, op: Binop, l: &Expr, r: &Expr) -> Result<(), CodegenError> {
    self.rvalue(l)?;
    self.rvalue(r)?;
    self.pop("rdi")?;
    self.pop("rax")?;
    if let Some(cc) = op.cc() {
      writeln!(self.w, "  cmp rax, rdi")?;
      writeln!(self.w, "  set{cc} al")?;
      writeln!(self.w, "  movzx rax, al")?;
      return self.push("rax")
    }
    match op {
      Binop::Add | Binop::Sub => {
        let insn = if op == Binop::Add { "add" } else { "sub" };
        if let Some(elem) = l.ty.pointee() {
          if r.ty.pointee().is_some() {
            // Pointer difference: byte distance scaled down to elements.
            writeln!(self.w, "  sub rax, rdi")?;
            if elem.size() != 1 {
              writeln!(self.w, "  mov rdi, {}", elem.size())?;
              writeln!(self.w, "  cqo")?;
              writeln!(self.w, "  idiv rdi")?;
            }
          } else {
            if elem.size() != 1 {
              writeln!(self.w, "  imul rdi, {}", elem.size())?;
            }
            writeln!(self.w, "  {insn} rax, rdi")?;
          }
        } else if let Some(elem) = r.ty.pointee() {
          if elem.size() != 1 {
            writeln!(self.w, "  imul rax, {}", elem.size())?;
          }
          writeln!(self.w, "  {insn} rax, rdi")?;
        } else {
          writeln!(self.w, "  {insn} rax, rdi")?;
        }
      }
      Binop::Mul => writeln!(self.w, "  imul rax, rdi")?,
      Binop::Div => {
        writeln!(self.w, "  cqo")?;
        writeln!(self.w, "  idiv rdi")?;
      }
      _ => unreachable!("comparisons handled above"),
    }
    self.push("rax")
  }

  fn call(&mut self, name: &str, args: &[Box<Expr>]) -> Result<(), CodegenError> {
    let stack_args = u32::try_from(args.len().saturating_sub(ARG_REGS.len()))
      .expect("too many arguments");
    // Decide the padding before evaluating anything: the call instruction
    // must see a 16-byte-aligned rsp once the stack arguments are in place.
    let pad = (self.stackpos + 8 * stack_args) % 16 != 0;
    if pad {
      writeln!(self.w, "  sub rsp, 8")?;
      self.stackpos += 8;
    }
    // Right to left, so the leftmost argument ends up on top.
    for arg in args.iter().rev() {
      self.rvalue(arg)?;
    }
    let regs: ArrayVec<Reg, 6> = ARG_REGS.iter().copied().take(args.len()).collect();
    for reg in &regs {
      self.pop(reg.q)?;
    }
    if self.stackpos % 16 != 0 {
      return Err(CodegenError::Misaligned { stackpos: self.stackpos })
    }
    // No vector registers are used: tell varargs callees so.
    writeln!(self.w, "  mov rax, 0")?;
    writeln!(self.w, "  call {name}")?;
    if stack_args > 0 {
      writeln!(self.w, "  add rsp, {}", 8 * stack_args)?;
      self.stackpos -= 8 * stack_args;
    }
    if pad {
      writeln!(self.w, "  add rsp, 8")?;
      self.stackpos -= 8;
    }
    self.push("rax")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn asciz_escaping() {
    assert_eq!(escape("hi"), "hi");
    assert_eq!(escape("a\nb\t\"\\"), "a\\nb\\t\\\"\\\\");
    assert_eq!(escape("\0x"), "\\000x");
    assert_eq!(escape("\u{7f}"), "\\177");
  }
}
