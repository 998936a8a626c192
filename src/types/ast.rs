//! The abstract syntax tree produced by the parser.
//!
//! The AST is a strict tree: nodes own their children through [`Box`], and
//! the only shared data are the reference-counted types attached to every
//! expression. Function-call nodes refer to their callee by name, not by
//! pointer, so there are no cycles; forward references are left for the
//! assembler to resolve.

use smallvec::SmallVec;
use super::Ty;
use super::entity::StrId;

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unop {
  /// Arithmetic negation `-e`.
  Neg,
  /// Logical not `!e`: 1 if the operand is zero, else 0.
  Not,
  /// Pointer dereference `*e`.
  Deref,
  /// Address-of `&e`; the operand must be an lvalue.
  Addr,
  /// Pre-increment `++e`; evaluates to the new value.
  PreInc,
  /// Pre-decrement `--e`; evaluates to the new value.
  PreDec,
  /// Post-increment `e++`; evaluates to the original value.
  PostInc,
  /// Post-decrement `e--`; evaluates to the original value.
  PostDec,
  /// `sizeof e`; the operand is not evaluated.
  Sizeof,
}

/// Binary operators. Assignment is not among them; it has its own node
/// because its left operand is an lvalue, not a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binop {
  /// `+`
  Add,
  /// `-`
  Sub,
  /// `*` (signed)
  Mul,
  /// `/` (signed)
  Div,
  /// `<`
  Lt,
  /// `<=`
  Le,
  /// `>`
  Gt,
  /// `>=`
  Ge,
  /// `==`
  Eq,
  /// `!=`
  Ne,
}

impl Binop {
  /// The source spelling, for diagnostics.
  #[must_use] pub fn as_str(self) -> &'static str {
    match self {
      Binop::Add => "+", Binop::Sub => "-", Binop::Mul => "*", Binop::Div => "/",
      Binop::Lt => "<", Binop::Le => "<=", Binop::Gt => ">", Binop::Ge => ">=",
      Binop::Eq => "==", Binop::Ne => "!=",
    }
  }

  /// The x86 condition-code suffix for comparison operators (`setl`,
  /// `sete`, ...), or `None` for arithmetic.
  #[must_use] pub fn cc(self) -> Option<&'static str> {
    match self {
      Binop::Lt => Some("l"), Binop::Le => Some("le"),
      Binop::Gt => Some("g"), Binop::Ge => Some("ge"),
      Binop::Eq => Some("e"), Binop::Ne => Some("ne"),
      Binop::Add | Binop::Sub | Binop::Mul | Binop::Div => None,
    }
  }
}

/// Where a resolved identifier lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Place {
  /// A local variable or parameter: a (negative) byte offset from `rbp`.
  Frame(i32),
  /// A global variable: addressed by symbolic label.
  Label(Box<str>),
}

/// An expression together with its resolved type.
#[derive(Clone, Debug)]
pub struct Expr {
  /// The expression proper.
  pub kind: ExprKind,
  /// The type deduced at parse time.
  pub ty: Ty,
}

impl Expr {
  /// Whether this expression denotes a storage location. Subscripts do not
  /// appear here because `a[i]` is desugared to `*(a+i)` at parse time.
  #[must_use] pub fn is_lvalue(&self) -> bool {
    matches!(self.kind,
      ExprKind::Var { .. } | ExprKind::Unary(Unop::Deref, _) | ExprKind::Member(..))
  }
}

/// The expression variants.
#[derive(Clone, Debug)]
pub enum ExprKind {
  /// An integer literal.
  Num(i64),
  /// A string literal, resolved to its pooled label.
  Str(StrId),
  /// A resolved identifier.
  Var {
    /// The source name, kept for diagnostics and traces.
    name: Box<str>,
    /// The resolved storage location.
    place: Place,
  },
  /// A unary operation.
  Unary(Unop, Box<Expr>),
  /// A binary operation.
  Binary(Binop, Box<Expr>, Box<Expr>),
  /// Assignment `lhs = rhs`; an expression whose value is the stored value.
  Assign(Box<Expr>, Box<Expr>),
  /// Member access: the aggregate lvalue plus the member's resolved byte
  /// offset. Both `s.m` and `s->m` lower to this (the latter through a
  /// dereference).
  Member(Box<Expr>, u32),
  /// A function call by name.
  Call {
    /// The callee label.
    name: Box<str>,
    /// Arguments in source order.
    args: SmallVec<[Box<Expr>; 4]>,
  },
}

/// A statement or declaration.
#[derive(Clone, Debug)]
pub enum Stmt {
  /// An expression statement; the value is discarded.
  Expr(Expr),
  /// A local declaration. The slot was assigned at parse time; a declaration
  /// with an initializer also stores like an assignment.
  Decl {
    /// The declared name.
    name: Box<str>,
    /// The declared type.
    ty: Ty,
    /// Frame offset of the slot (negative).
    offset: i32,
    /// Optional initializer expression.
    init: Option<Expr>,
  },
  /// A brace-enclosed statement sequence.
  Compound(Vec<Stmt>),
  /// `if (cond) then else els`.
  If {
    /// The controlling expression.
    cond: Expr,
    /// The consequent.
    then: Box<Stmt>,
    /// The optional alternative.
    els: Option<Box<Stmt>>,
  },
  /// `while (cond) body`.
  While {
    /// The controlling expression.
    cond: Expr,
    /// The loop body.
    body: Box<Stmt>,
  },
  /// `for (init; cond; step) body`; all three headers are optional, and an
  /// omitted condition means the loop only exits through `return`.
  For {
    /// Run once before the loop.
    init: Option<Expr>,
    /// Tested before each iteration.
    cond: Option<Expr>,
    /// Run after each iteration.
    step: Option<Expr>,
    /// The loop body.
    body: Box<Stmt>,
  },
  /// `return e;` or `return;`.
  Return(Option<Expr>),
  /// A lone `;`.
  Blank,
}

/// A function parameter, bound like a local in the outermost scope.
#[derive(Clone, Debug)]
pub struct Param {
  /// The parameter name.
  pub name: Box<str>,
  /// The parameter type.
  pub ty: Ty,
  /// Frame offset of the parameter's slot (negative).
  pub offset: i32,
}

/// A function definition.
#[derive(Clone, Debug)]
pub struct FuncDef {
  /// The function name, which is also its label.
  pub name: Box<str>,
  /// The return type.
  pub ret: Ty,
  /// Parameters in declaration order.
  pub params: SmallVec<[Param; 6]>,
  /// The body compound statement.
  pub body: Stmt,
  /// Frame size in bytes, already rounded up to 16.
  pub frame_size: u32,
}
