//! Build the AST from the token stream.
//!
//! A single-pass recursive-descent parser. Identifier resolution and type
//! deduction happen while parsing: every expression node leaves this module
//! with a resolved [`Ty`] attached, locals have their frame offsets assigned
//! at declaration time from a function-wide counter, and calls are checked
//! for arity whenever the callee's signature is visible. The parser mutates
//! a [`Compiler`] context; it owns no state that outlives the pass.

use std::rc::Rc;
use if_chain::if_chain;
use itertools::Itertools;
use smallvec::SmallVec;
use thiserror::Error;

use crate::Compiler;
use crate::lexer::{Keyword, Punct, Token, TokenKind};
use crate::types::{self, StructDef, Ty, TyKind, TypeError, align_to, decay};
use crate::types::ast::{Binop, Expr, ExprKind, FuncDef, Param, Place, Stmt, Unop};
use crate::types::entity::{Entity, FnSig, GlobalVar};
use crate::util::NameMap;

/// Errors produced while parsing. All variants carry the byte offset of the
/// token the parser was looking at.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
  /// The grammar expected something else here.
  #[error("expected {wanted}, found {found} at byte {pos}")]
  Unexpected {
    /// Byte offset of the offending token.
    pos: usize,
    /// Rendering of the token that was found.
    found: String,
    /// What the grammar wanted.
    wanted: &'static str,
  },
  /// An identifier with no visible declaration.
  #[error("unknown identifier `{name}` at byte {pos}")]
  UnknownIdent {
    /// Byte offset of the identifier.
    pos: usize,
    /// The identifier.
    name: String,
  },
  /// A second declaration of a name in the same scope.
  #[error("`{name}` is already declared in this scope (at byte {pos})")]
  Redeclared {
    /// Byte offset of the redeclaration.
    pos: usize,
    /// The redeclared name.
    name: String,
  },
  /// A `struct` tag that has not been defined.
  #[error("unknown struct tag `{name}` at byte {pos}")]
  UnknownTag {
    /// Byte offset of the tag.
    pos: usize,
    /// The tag name.
    name: String,
  },
  /// Member access naming no member of the struct.
  #[error("no member `{name}` at byte {pos}")]
  NoMember {
    /// Byte offset of the member name.
    pos: usize,
    /// The requested member.
    name: String,
  },
  /// A call with the wrong number of arguments to a known function.
  #[error("`{name}` takes {expected} argument(s), {found} given (at byte {pos})")]
  Arity {
    /// Byte offset of the call.
    pos: usize,
    /// The callee.
    name: String,
    /// Parameter count of the signature.
    expected: usize,
    /// Argument count at the call site.
    found: usize,
  },
  /// Assignment to, or address of, something that is not a storage location.
  #[error("not an lvalue at byte {pos}")]
  NotLvalue {
    /// Byte offset of the offending expression.
    pos: usize,
  },
  /// A type error, located at a token.
  #[error("{err} at byte {pos}")]
  Type {
    /// Byte offset of the expression the error was detected at.
    pos: usize,
    /// The underlying type error.
    #[source] err: TypeError,
  },
}

/// Parse a whole translation unit into `cx`.
pub fn parse(toks: &[Token<'_>], cx: &mut Compiler) -> Result<(), ParseError> {
  let mut p = Parser {
    toks,
    pos: 0,
    cx,
    scopes: vec![],
    tags: vec![NameMap::new()],
    frame: 0,
  };
  while !p.at_eof() {
    p.top_level()?;
  }
  log::debug!("parsed {} function definition(s)", p.cx.funcs.len());
  Ok(())
}

struct Parser<'a, 'b> {
  toks: &'b [Token<'a>],
  pos: usize,
  cx: &'b mut Compiler,
  /// The scope chain, innermost last. The global namespace lives in
  /// `cx.entities` and is consulted after the chain.
  scopes: Vec<NameMap<Local>>,
  /// Struct tag bindings, one frame per scope. Pushed and popped in lockstep
  /// with `scopes` (plus a base frame for file scope), resolved
  /// innermost-outward like identifiers.
  tags: Vec<NameMap<Ty>>,
  /// Function-wide frame allocation counter, in bytes below `rbp`.
  frame: u32,
}

#[derive(Clone, Debug)]
struct Local {
  ty: Ty,
  offset: i32,
}

impl<'a> Parser<'a, '_> {
  fn tok(&self) -> &Token<'a> { &self.toks[self.pos] }
  fn kind(&self) -> &TokenKind<'a> { &self.tok().kind }
  fn here(&self) -> usize { self.tok().pos }
  fn at_eof(&self) -> bool { matches!(self.kind(), TokenKind::Eof) }

  fn unexpected(&self, wanted: &'static str) -> ParseError {
    ParseError::Unexpected { pos: self.here(), found: self.kind().to_string(), wanted }
  }

  fn type_err(&self, pos: usize, err: TypeError) -> ParseError {
    ParseError::Type { pos, err }
  }

  fn eat_punct(&mut self, p: Punct) -> bool {
    if *self.kind() == TokenKind::Punct(p) { self.pos += 1; true } else { false }
  }

  fn expect_punct(&mut self, p: Punct) -> Result<(), ParseError> {
    if self.eat_punct(p) { Ok(()) } else { Err(self.unexpected(p.as_str())) }
  }

  fn eat_kw(&mut self, kw: Keyword) -> bool {
    if *self.kind() == TokenKind::Kw(kw) { self.pos += 1; true } else { false }
  }

  fn eat_ident(&mut self) -> Option<&'a str> {
    if let TokenKind::Ident(name) = self.toks[self.pos].kind {
      self.pos += 1;
      Some(name)
    } else {
      None
    }
  }

  fn expect_ident(&mut self) -> Result<&'a str, ParseError> {
    self.eat_ident().ok_or_else(|| self.unexpected("an identifier"))
  }

  /// Whether the current token starts a `type_spec`.
  fn at_type_spec(&self) -> bool {
    matches!(self.kind(),
      TokenKind::Kw(Keyword::Int | Keyword::Char | Keyword::Struct))
  }

  // Declarations

  /// `type_spec := 'int' | 'char' | 'struct' IDENT? '{' members '}' | 'struct' IDENT`
  fn type_spec(&mut self) -> Result<Ty, ParseError> {
    if self.eat_kw(Keyword::Int) { return Ok(Rc::new(TyKind::Int)) }
    if self.eat_kw(Keyword::Char) { return Ok(Rc::new(TyKind::Char)) }
    if !self.eat_kw(Keyword::Struct) { return Err(self.unexpected("a type specifier")) }
    let tag_pos = self.here();
    let tag = self.eat_ident();
    if !self.eat_punct(Punct::LBrace) {
      let Some(tag) = tag else { return Err(self.unexpected("a struct tag or member list")) };
      return match self.lookup_tag(tag) {
        Some(ty) => Ok(ty.clone()),
        None => Err(ParseError::UnknownTag { pos: tag_pos, name: tag.to_owned() }),
      }
    }
    let mut members: Vec<(Box<str>, Ty)> = vec![];
    while !self.eat_punct(Punct::RBrace) {
      let base = self.type_spec()?;
      loop {
        let pos = self.here();
        let (name, ty) = self.declarator(base.clone())?;
        if members.iter().any(|(n, _)| **n == *name) {
          return Err(ParseError::Redeclared { pos, name: name.to_owned() })
        }
        members.push((name.into(), ty));
        if !self.eat_punct(Punct::Comma) { break }
      }
      self.expect_punct(Punct::Semi)?;
    }
    let ty = Rc::new(TyKind::Struct(StructDef::layout(members)));
    if let Some(tag) = tag {
      // Redefinition is only an error within the same scope; an inner scope
      // may shadow an outer tag.
      let frame = self.tags.last_mut().expect("a tag frame is always open");
      if frame.get(tag).is_some() {
        return Err(ParseError::Redeclared { pos: tag_pos, name: tag.to_owned() })
      }
      frame.insert(tag, ty.clone());
    }
    Ok(ty)
  }

  /// Resolve a struct tag against the scope chain, innermost first.
  fn lookup_tag(&self, tag: &str) -> Option<&Ty> {
    self.tags.iter().rev().find_map(|frame| frame.get(tag))
  }

  /// `declarator := '*'* IDENT ('[' NUM ']')*`, applied to a base type.
  fn declarator(&mut self, mut ty: Ty) -> Result<(&'a str, Ty), ParseError> {
    while self.eat_punct(Punct::Star) { ty = TyKind::ptr(ty) }
    let name = self.expect_ident()?;
    Ok((name, self.array_suffix(ty)?))
  }

  /// Like [`Parser::declarator`] but the identifier may be omitted, as in a
  /// prototype parameter.
  fn abstract_declarator(&mut self, mut ty: Ty) -> Result<(Option<&'a str>, Ty), ParseError> {
    while self.eat_punct(Punct::Star) { ty = TyKind::ptr(ty) }
    let name = self.eat_ident();
    Ok((name, self.array_suffix(ty)?))
  }

  fn array_suffix(&mut self, ty: Ty) -> Result<Ty, ParseError> {
    // `a[2][3]` is an array of 2 arrays of 3, so dimensions apply inside out.
    let mut dims = vec![];
    while self.eat_punct(Punct::LBracket) {
      let TokenKind::Num(n) = *self.kind() else {
        return Err(self.unexpected("an array length"))
      };
      self.pos += 1;
      dims.push(u32::try_from(n).map_err(|_| self.unexpected("a nonnegative length"))?);
      self.expect_punct(Punct::RBracket)?;
    }
    Ok(dims.iter().rev().fold(ty, |t, &n| Rc::new(TyKind::Array(t, n))))
  }

  /// `program := (funcdef | extern_declaration)*`, one item per call.
  fn top_level(&mut self) -> Result<(), ParseError> {
    let base = self.type_spec()?;
    // A bare `struct T { ... };` only defines the tag.
    if self.eat_punct(Punct::Semi) { return Ok(()) }
    let pos = self.here();
    let (name, ty) = self.declarator(base.clone())?;
    if self.eat_punct(Punct::LParen) {
      return self.function(pos, name, ty)
    }
    self.global_var(pos, name, ty)?;
    while self.eat_punct(Punct::Comma) {
      let pos = self.here();
      let (name, ty) = self.declarator(base.clone())?;
      self.global_var(pos, name, ty)?;
    }
    self.expect_punct(Punct::Semi)
  }

  fn global_var(&mut self, pos: usize, name: &'a str, ty: Ty) -> Result<(), ParseError> {
    if self.cx.entities.get(name).is_some() {
      return Err(ParseError::Redeclared { pos, name: name.to_owned() })
    }
    let has_init = *self.kind() == TokenKind::Punct(Punct::Assign);
    if has_init && !ty.is_basic() {
      return Err(self.type_err(pos, TypeError::BadAssign {
        lhs: ty.to_string(),
        rhs: "an initializer".to_owned(),
      }))
    }
    let init = if self.eat_punct(Punct::Assign) {
      let neg = self.eat_punct(Punct::Minus);
      let TokenKind::Num(n) = *self.kind() else {
        return Err(self.unexpected("a constant initializer"))
      };
      self.pos += 1;
      Some(if neg { -n } else { n })
    } else {
      None
    };
    self.cx.entities.insert(name, Entity::Global(GlobalVar { ty, init }));
    Ok(())
  }

  /// A function prototype or definition; the opening paren is consumed.
  fn function(&mut self, pos: usize, name: &'a str, ret: Ty) -> Result<(), ParseError> {
    if matches!(&*ret, TyKind::Array(..) | TyKind::Struct(_)) {
      return Err(ParseError::Unexpected {
        pos,
        found: ret.to_string(),
        wanted: "a basic or pointer return type",
      })
    }
    let mut params: Vec<(Option<&'a str>, Ty)> = vec![];
    if !self.eat_punct(Punct::RParen) {
      loop {
        let ppos = self.here();
        let base = self.type_spec()?;
        let (pname, pty) = self.abstract_declarator(base)?;
        // Array parameters decay to pointers, like every other value context.
        let pty = decay(&pty);
        if let TyKind::Struct(_) = *pty {
          return Err(ParseError::Unexpected {
            pos: ppos,
            found: pty.to_string(),
            wanted: "a basic or pointer parameter type",
          })
        }
        params.push((pname, pty));
        if !self.eat_punct(Punct::Comma) { break }
      }
      self.expect_punct(Punct::RParen)?;
    }
    let sig = FnSig {
      ret,
      params: params.iter().map(|(_, ty)| ty.clone()).collect(),
      defined: false,
    };
    if self.eat_punct(Punct::Semi) {
      // A prototype. Redeclaring a function with the same signature is
      // legal any number of times, before or after its definition; clashing
      // with any other entity or signature is not.
      let fresh = match self.cx.entities.get(name) {
        None => true,
        Some(Entity::Func(old)) if old.ret == sig.ret && old.params == sig.params => false,
        Some(_) => return Err(ParseError::Redeclared { pos, name: name.to_owned() }),
      };
      if fresh {
        self.cx.entities.insert(name, Entity::Func(sig));
      }
      return Ok(())
    }

    // A definition: only one body per name, and it must match any earlier
    // prototype.
    match self.cx.entities.get(name) {
      None => {}
      Some(Entity::Func(old))
        if !old.defined && old.ret == sig.ret && old.params == sig.params => {}
      Some(_) => return Err(ParseError::Redeclared { pos, name: name.to_owned() }),
    }
    self.cx.entities.insert(name, Entity::Func(FnSig { defined: true, ..sig.clone() }));

    if let Some(dup) = params.iter().filter_map(|(n, _)| *n).duplicates().next() {
      return Err(ParseError::Redeclared { pos, name: dup.to_owned() })
    }
    self.frame = 0;
    let mut scope = NameMap::new();
    let mut bound: SmallVec<[Param; 6]> = SmallVec::new();
    for (pname, pty) in params {
      let Some(pname) = pname else { return Err(self.unexpected("a named parameter")) };
      let offset = alloc_slot(&mut self.frame, &pty);
      scope.insert(pname, Local { ty: pty.clone(), offset });
      bound.push(Param { name: pname.into(), ty: pty, offset });
    }
    let params = bound;
    self.scopes.push(scope);
    self.tags.push(NameMap::new());
    let body = self.compound()?;
    self.tags.pop();
    self.scopes.pop();

    self.cx.funcs.push(FuncDef {
      name: name.into(),
      ret: sig.ret,
      params,
      body,
      frame_size: align_to(self.frame, 16),
    });
    Ok(())
  }

  // Statements

  /// `compound := '{' (declaration | statement)* '}'`
  fn compound(&mut self) -> Result<Stmt, ParseError> {
    self.expect_punct(Punct::LBrace)?;
    self.scopes.push(NameMap::new());
    self.tags.push(NameMap::new());
    let mut stmts = vec![];
    while !self.eat_punct(Punct::RBrace) {
      if self.at_eof() { return Err(self.unexpected("`}`")) }
      if self.at_type_spec() {
        self.declaration(&mut stmts)?;
      } else {
        stmts.push(self.statement()?);
      }
    }
    self.tags.pop();
    self.scopes.pop();
    Ok(Stmt::Compound(stmts))
  }

  /// `declaration := type_spec init_declarator (',' init_declarator)* ';'`
  fn declaration(&mut self, stmts: &mut Vec<Stmt>) -> Result<(), ParseError> {
    let base = self.type_spec()?;
    if self.eat_punct(Punct::Semi) { return Ok(()) }
    loop {
      let pos = self.here();
      let (name, ty) = self.declarator(base.clone())?;
      let scope = self.scopes.last_mut().expect("inside a function");
      if scope.get(name).is_some() {
        return Err(ParseError::Redeclared { pos, name: name.to_owned() })
      }
      let offset = alloc_slot(&mut self.frame, &ty);
      scope.insert(name, Local { ty: ty.clone(), offset });
      let init = if self.eat_punct(Punct::Assign) {
        let ipos = self.here();
        let rhs = self.assign()?;
        let lhs = Expr {
          kind: ExprKind::Var { name: name.into(), place: Place::Frame(offset) },
          ty: ty.clone(),
        };
        self.check_assignment(ipos, &lhs, &rhs)?;
        Some(rhs)
      } else {
        None
      };
      stmts.push(Stmt::Decl { name: name.into(), ty, offset, init });
      if !self.eat_punct(Punct::Comma) { break }
    }
    self.expect_punct(Punct::Semi)
  }

  fn statement(&mut self) -> Result<Stmt, ParseError> {
    if *self.kind() == TokenKind::Punct(Punct::LBrace) {
      return self.compound()
    }
    if self.eat_kw(Keyword::If) {
      self.expect_punct(Punct::LParen)?;
      let cond = self.assign()?;
      self.expect_punct(Punct::RParen)?;
      let then = Box::new(self.statement()?);
      let els = if self.eat_kw(Keyword::Else) {
        Some(Box::new(self.statement()?))
      } else {
        None
      };
      return Ok(Stmt::If { cond, then, els })
    }
    if self.eat_kw(Keyword::While) {
      self.expect_punct(Punct::LParen)?;
      let cond = self.assign()?;
      self.expect_punct(Punct::RParen)?;
      return Ok(Stmt::While { cond, body: Box::new(self.statement()?) })
    }
    if self.eat_kw(Keyword::For) {
      self.expect_punct(Punct::LParen)?;
      let init = self.opt_expr(Punct::Semi)?;
      let cond = self.opt_expr(Punct::Semi)?;
      let step = self.opt_expr(Punct::RParen)?;
      return Ok(Stmt::For { init, cond, step, body: Box::new(self.statement()?) })
    }
    if self.eat_kw(Keyword::Return) {
      if self.eat_punct(Punct::Semi) { return Ok(Stmt::Return(None)) }
      let e = self.assign()?;
      self.expect_punct(Punct::Semi)?;
      return Ok(Stmt::Return(Some(e)))
    }
    if self.eat_punct(Punct::Semi) { return Ok(Stmt::Blank) }
    let e = self.assign()?;
    self.expect_punct(Punct::Semi)?;
    Ok(Stmt::Expr(e))
  }

  /// An optional expression ended by `end` (for the `for` header).
  fn opt_expr(&mut self, end: Punct) -> Result<Option<Expr>, ParseError> {
    if self.eat_punct(end) { return Ok(None) }
    let e = self.assign()?;
    self.expect_punct(end)?;
    Ok(Some(e))
  }

  // Expressions

  /// `assign := equal ('=' assign)?` (right associative)
  fn assign(&mut self) -> Result<Expr, ParseError> {
    let lhs = self.equal()?;
    if !self.eat_punct(Punct::Assign) { return Ok(lhs) }
    let pos = self.here();
    let rhs = self.assign()?;
    self.check_assignment(pos, &lhs, &rhs)?;
    let ty = lhs.ty.clone();
    Ok(Expr { kind: ExprKind::Assign(Box::new(lhs), Box::new(rhs)), ty })
  }

  /// Lvalue and type checks for `lhs = rhs`. A literal `0` is assignable to
  /// any pointer; everything else defers to the type module.
  fn check_assignment(&self, pos: usize, lhs: &Expr, rhs: &Expr) -> Result<(), ParseError> {
    if !lhs.is_lvalue() { return Err(ParseError::NotLvalue { pos }) }
    if_chain! {
      if let TyKind::Ptr(_) = *lhs.ty;
      if let ExprKind::Num(0) = rhs.kind;
      then { return Ok(()) }
    }
    types::check_assign(&lhs.ty, &rhs.ty).map_err(|e| self.type_err(pos, e))
  }

  fn binary(&mut self, pos: usize, op: Binop, lhs: Expr, rhs: Expr) -> Result<Expr, ParseError> {
    let ty = types::deduce_type(op, &lhs.ty, &rhs.ty).map_err(|e| self.type_err(pos, e))?;
    Ok(Expr { kind: ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)), ty })
  }

  /// `equal := relational (('==' | '!=') relational)*`
  fn equal(&mut self) -> Result<Expr, ParseError> {
    let mut lhs = self.relational()?;
    loop {
      let pos = self.here();
      let op = if self.eat_punct(Punct::EqEq) { Binop::Eq }
        else if self.eat_punct(Punct::Ne) { Binop::Ne }
        else { return Ok(lhs) };
      let rhs = self.relational()?;
      lhs = self.binary(pos, op, lhs, rhs)?;
    }
  }

  /// `relational := add (('<' | '>' | '<=' | '>=') add)*`
  fn relational(&mut self) -> Result<Expr, ParseError> {
    let mut lhs = self.add()?;
    loop {
      let pos = self.here();
      let op = if self.eat_punct(Punct::Lt) { Binop::Lt }
        else if self.eat_punct(Punct::Le) { Binop::Le }
        else if self.eat_punct(Punct::Gt) { Binop::Gt }
        else if self.eat_punct(Punct::Ge) { Binop::Ge }
        else { return Ok(lhs) };
      let rhs = self.add()?;
      lhs = self.binary(pos, op, lhs, rhs)?;
    }
  }

  /// `add := mul (('+' | '-') mul)*`
  fn add(&mut self) -> Result<Expr, ParseError> {
    let mut lhs = self.mul()?;
    loop {
      let pos = self.here();
      let op = if self.eat_punct(Punct::Plus) { Binop::Add }
        else if self.eat_punct(Punct::Minus) { Binop::Sub }
        else { return Ok(lhs) };
      let rhs = self.mul()?;
      lhs = self.binary(pos, op, lhs, rhs)?;
    }
  }

  /// `mul := unary (('*' | '/') unary)*`
  fn mul(&mut self) -> Result<Expr, ParseError> {
    let mut lhs = self.unary()?;
    loop {
      let pos = self.here();
      let op = if self.eat_punct(Punct::Star) { Binop::Mul }
        else if self.eat_punct(Punct::Slash) { Binop::Div }
        else { return Ok(lhs) };
      let rhs = self.unary()?;
      lhs = self.binary(pos, op, lhs, rhs)?;
    }
  }

  /// `unary := ('+'|'-'|'*'|'&'|'!') unary | '++' unary | '--' unary
  ///         | 'sizeof' unary | postfix`
  fn unary(&mut self) -> Result<Expr, ParseError> {
    let pos = self.here();
    if self.eat_punct(Punct::Plus) {
      // Unary plus is the identity on its operand.
      return self.unary()
    }
    if self.eat_punct(Punct::Minus) {
      let e = self.unary()?;
      if !e.ty.is_basic() {
        return Err(self.type_err(pos, TypeError::BadUnary { op: "-", ty: e.ty.to_string() }))
      }
      return Ok(Expr { kind: ExprKind::Unary(Unop::Neg, Box::new(e)), ty: Rc::new(TyKind::Int) })
    }
    if self.eat_punct(Punct::Star) {
      let e = self.unary()?;
      return self.deref(pos, e)
    }
    if self.eat_punct(Punct::Amp) {
      let e = self.unary()?;
      if !e.is_lvalue() { return Err(ParseError::NotLvalue { pos }) }
      let ty = TyKind::ptr(e.ty.clone());
      return Ok(Expr { kind: ExprKind::Unary(Unop::Addr, Box::new(e)), ty })
    }
    if self.eat_punct(Punct::Not) {
      let e = self.unary()?;
      return Ok(Expr { kind: ExprKind::Unary(Unop::Not, Box::new(e)), ty: Rc::new(TyKind::Int) })
    }
    if self.eat_punct(Punct::Inc) {
      let e = self.unary()?;
      return self.step_op(pos, Unop::PreInc, e)
    }
    if self.eat_punct(Punct::Dec) {
      let e = self.unary()?;
      return self.step_op(pos, Unop::PreDec, e)
    }
    if self.eat_kw(Keyword::Sizeof) {
      // The operand is parsed but never evaluated; only its type matters.
      let e = self.unary()?;
      return Ok(Expr { kind: ExprKind::Unary(Unop::Sizeof, Box::new(e)), ty: Rc::new(TyKind::Int) })
    }
    self.postfix()
  }

  /// Shared checks for the four increment/decrement forms: the operand must
  /// be an lvalue of basic or pointer type.
  fn step_op(&self, pos: usize, op: Unop, e: Expr) -> Result<Expr, ParseError> {
    if !e.is_lvalue() { return Err(ParseError::NotLvalue { pos }) }
    if !e.ty.is_basic() && !matches!(*e.ty, TyKind::Ptr(_)) {
      return Err(self.type_err(pos, TypeError::BadUnary {
        op: if matches!(op, Unop::PreInc | Unop::PostInc) { "++" } else { "--" },
        ty: e.ty.to_string(),
      }))
    }
    let ty = e.ty.clone();
    Ok(Expr { kind: ExprKind::Unary(op, Box::new(e)), ty })
  }

  /// Build `*e`, failing unless the operand (after decay) is a pointer.
  fn deref(&self, pos: usize, e: Expr) -> Result<Expr, ParseError> {
    let Some(elem) = e.ty.pointee().cloned() else {
      return Err(self.type_err(pos, TypeError::DerefNonPtr { ty: e.ty.to_string() }))
    };
    Ok(Expr { kind: ExprKind::Unary(Unop::Deref, Box::new(e)), ty: elem })
  }

  /// `postfix := term ('[' assign ']' | '.' IDENT | '->' IDENT
  ///                  | '(' args ')' | '++' | '--')*`
  fn postfix(&mut self) -> Result<Expr, ParseError> {
    // A call is the one postfix form whose head is a bare name rather than a
    // value: there are no function pointers in this language.
    let mut e = if_chain! {
      if let TokenKind::Ident(name) = self.toks[self.pos].kind;
      if self.toks.get(self.pos + 1)
        .is_some_and(|t| t.kind == TokenKind::Punct(Punct::LParen));
      then {
        let pos = self.here();
        self.pos += 2;
        self.call(pos, name)?
      } else {
        self.term()?
      }
    };
    loop {
      let pos = self.here();
      if self.eat_punct(Punct::LBracket) {
        // `a[i]` is sugar for `*(a+i)`.
        let idx = self.assign()?;
        self.expect_punct(Punct::RBracket)?;
        let sum = self.binary(pos, Binop::Add, e, idx)?;
        e = self.deref(pos, sum)?;
      } else if self.eat_punct(Punct::Dot) {
        e = self.member(pos, e)?;
      } else if self.eat_punct(Punct::Arrow) {
        // `p->m` is `(*p).m`.
        let base = self.deref(pos, e)?;
        e = self.member(pos, base)?;
      } else if self.eat_punct(Punct::Inc) {
        e = self.step_op(pos, Unop::PostInc, e)?;
      } else if self.eat_punct(Punct::Dec) {
        e = self.step_op(pos, Unop::PostDec, e)?;
      } else {
        return Ok(e)
      }
    }
  }

  fn member(&mut self, pos: usize, base: Expr) -> Result<Expr, ParseError> {
    let name = self.expect_ident()?;
    if !base.is_lvalue() { return Err(ParseError::NotLvalue { pos }) }
    let TyKind::Struct(ref sd) = *base.ty else {
      return Err(ParseError::NoMember { pos, name: name.to_owned() })
    };
    let Some(m) = sd.members.get(name) else {
      return Err(ParseError::NoMember { pos, name: name.to_owned() })
    };
    let (ty, offset) = (m.ty.clone(), m.offset);
    Ok(Expr { kind: ExprKind::Member(Box::new(base), offset), ty })
  }

  /// A call; the name and opening paren are already consumed.
  fn call(&mut self, pos: usize, name: &'a str) -> Result<Expr, ParseError> {
    let mut args: SmallVec<[Box<Expr>; 4]> = SmallVec::new();
    if !self.eat_punct(Punct::RParen) {
      loop {
        args.push(Box::new(self.assign()?));
        if !self.eat_punct(Punct::Comma) { break }
      }
      self.expect_punct(Punct::RParen)?;
    }
    // Arity is only checkable when the callee is visible; an undeclared
    // callee is legal and left for the linker, with an `int` result.
    let ret = match self.cx.entities.get(name) {
      Some(Entity::Func(sig)) => {
        if sig.params.len() != args.len() {
          return Err(ParseError::Arity {
            pos,
            name: name.to_owned(),
            expected: sig.params.len(),
            found: args.len(),
          })
        }
        sig.ret.clone()
      }
      Some(Entity::Global(_)) =>
        return Err(ParseError::UnknownIdent { pos, name: name.to_owned() }),
      None => Rc::new(TyKind::Int),
    };
    Ok(Expr { kind: ExprKind::Call { name: name.into(), args }, ty: ret })
  }

  /// `term := NUM | STRING_LITERAL | IDENT | '(' assign ')'`
  fn term(&mut self) -> Result<Expr, ParseError> {
    let pos = self.here();
    if let TokenKind::Num(n) = *self.kind() {
      self.pos += 1;
      return Ok(Expr { kind: ExprKind::Num(n), ty: Rc::new(TyKind::Int) })
    }
    let toks = self.toks;
    if let TokenKind::Str(ref s) = toks[self.pos].kind {
      // A string literal is an array of char including the terminator, so
      // sizeof and decay behave like any other array.
      let len = u32::try_from(s.len() + 1).expect("string too long");
      let id = self.cx.strings.intern(s);
      self.pos += 1;
      return Ok(Expr {
        kind: ExprKind::Str(id),
        ty: Rc::new(TyKind::Array(Rc::new(TyKind::Char), len)),
      })
    }
    if let Some(name) = self.eat_ident() {
      for scope in self.scopes.iter().rev() {
        if let Some(local) = scope.get(name) {
          return Ok(Expr {
            kind: ExprKind::Var { name: name.into(), place: Place::Frame(local.offset) },
            ty: local.ty.clone(),
          })
        }
      }
      return match self.cx.entities.get(name) {
        Some(Entity::Global(g)) => Ok(Expr {
          kind: ExprKind::Var { name: name.into(), place: Place::Label(name.into()) },
          ty: g.ty.clone(),
        }),
        _ => Err(ParseError::UnknownIdent { pos, name: name.to_owned() }),
      }
    }
    if self.eat_punct(Punct::LParen) {
      let e = self.assign()?;
      self.expect_punct(Punct::RParen)?;
      return Ok(e)
    }
    Err(self.unexpected("an expression"))
  }
}

/// Assign the next slot for a value of type `ty` in a frame that has `frame`
/// bytes allocated so far. Slots are 8-byte aligned and at least 8 bytes so
/// every local can be addressed as a qword-aligned region.
fn alloc_slot(frame: &mut u32, ty: &Ty) -> i32 {
  let size = align_to(ty.size().max(8), 8);
  *frame = align_to(*frame, 8) + size;
  -i32::try_from(*frame).expect("frame too large")
}
