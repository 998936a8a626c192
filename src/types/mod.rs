//! The type system: representations, layout, and operator type deduction.
//!
//! Types are reference-counted and immutable; a [`Ty`] constructed once (for
//! example a struct definition) is shared by every expression node it is
//! attached to. The only two basic types are `char` and `int`; everything
//! else is built from pointers, arrays, and structs.

pub mod ast;
pub mod entity;

use std::fmt;
use std::rc::Rc;
use thiserror::Error;
use crate::util::NameMap;
use self::ast::Binop;

/// A reference-counted type. Cheap to clone, compared structurally.
pub type Ty = Rc<TyKind>;

/// One member of a struct: its type and its byte offset within the struct.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
  /// The member's type.
  pub ty: Ty,
  /// Byte offset of the member from the start of the struct.
  pub offset: u32,
}

/// A laid-out struct type. Members keep declaration order; offsets respect
/// each member's natural alignment and the total size is padded to the
/// largest member alignment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructDef {
  /// The members in declaration order, with resolved offsets.
  pub members: NameMap<Member>,
  /// Total size in bytes, padding included.
  pub size: u32,
  /// Alignment in bytes (the largest member alignment, at least 1).
  pub align: u32,
}

impl StructDef {
  /// Lay out a member list: assign each member the next offset aligned to
  /// its type, then pad the total to the struct alignment.
  #[must_use] pub fn layout(members: impl IntoIterator<Item = (Box<str>, Ty)>) -> Self {
    let mut align = 1;
    let mut offset = 0;
    let members = members.into_iter().map(|(name, ty)| {
      let a = ty.align();
      align = align.max(a);
      offset = align_to(offset, a);
      let m = Member { ty, offset };
      offset += m.ty.size();
      (name, m)
    }).collect();
    StructDef { members, size: align_to(offset, align), align }
  }
}

/// Round `n` up to the next multiple of `align` (a power of two).
#[must_use] pub fn align_to(n: u32, align: u32) -> u32 { (n + align - 1) & !(align - 1) }

/// The type of an expression or declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TyKind {
  /// `char`: a 1-byte signed integer.
  Char,
  /// `int`: a 4-byte signed integer.
  Int,
  /// A pointer to the element type.
  Ptr(Ty),
  /// A fixed-length array of the element type.
  Array(Ty, u32),
  /// A struct with named, laid-out members.
  Struct(StructDef),
}

impl TyKind {
  /// Shorthand for a pointer to `ty`.
  #[must_use] pub fn ptr(ty: Ty) -> Ty { Rc::new(TyKind::Ptr(ty)) }

  /// The size of a value of this type, in bytes.
  #[must_use] pub fn size(&self) -> u32 {
    match self {
      TyKind::Char => 1,
      TyKind::Int => 4,
      TyKind::Ptr(_) => 8,
      TyKind::Array(elem, len) => elem.size() * len,
      TyKind::Struct(sd) => sd.size,
    }
  }

  /// The natural alignment of this type, in bytes.
  #[must_use] pub fn align(&self) -> u32 {
    match self {
      TyKind::Char => 1,
      TyKind::Int => 4,
      TyKind::Ptr(_) => 8,
      TyKind::Array(elem, _) => elem.align(),
      TyKind::Struct(sd) => sd.align,
    }
  }

  /// Whether this is one of the two basic types, `char` or `int`.
  #[must_use] pub fn is_basic(&self) -> bool { matches!(self, TyKind::Char | TyKind::Int) }

  /// The pointee type after array decay: `T` for both `*T` and `T[n]`.
  #[must_use] pub fn pointee(&self) -> Option<&Ty> {
    match self {
      TyKind::Ptr(elem) | TyKind::Array(elem, _) => Some(elem),
      _ => None,
    }
  }
}

impl fmt::Display for TyKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TyKind::Char => write!(f, "char"),
      TyKind::Int => write!(f, "int"),
      TyKind::Ptr(elem) => write!(f, "{elem}*"),
      TyKind::Array(elem, len) => write!(f, "{elem}[{len}]"),
      TyKind::Struct(_) => write!(f, "struct"),
    }
  }
}

/// Convert an array type to a pointer to its first element; other types are
/// returned unchanged. This is the implicit conversion applied in every value
/// context except `sizeof` and the operand of `&`.
#[must_use] pub fn decay(ty: &Ty) -> Ty {
  match **ty {
    TyKind::Array(ref elem, _) => TyKind::ptr(elem.clone()),
    _ => ty.clone(),
  }
}

/// Errors from operator type deduction.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TypeError {
  /// The operand types are not compatible with the operator.
  #[error("invalid operands to `{op}` ({lhs} and {rhs})")]
  Mismatch {
    /// The operator spelling.
    op: &'static str,
    /// Rendered left operand type.
    lhs: String,
    /// Rendered right operand type.
    rhs: String,
  },
  /// Dereference of a value that is neither pointer nor array.
  #[error("cannot dereference a value of type {ty}")]
  DerefNonPtr {
    /// Rendered operand type.
    ty: String,
  },
  /// A unary operator applied to a type it does not accept.
  #[error("invalid operand to unary `{op}` ({ty})")]
  BadUnary {
    /// The operator spelling.
    op: &'static str,
    /// Rendered operand type.
    ty: String,
  },
  /// Assignment with an array-typed left-hand side.
  #[error("arrays cannot be assigned as a whole")]
  AssignArray,
  /// The right-hand side of an assignment is not assignable to the left.
  #[error("cannot assign {rhs} to an lvalue of type {lhs}")]
  BadAssign {
    /// Rendered left-hand type.
    lhs: String,
    /// Rendered right-hand type.
    rhs: String,
  },
}

fn mismatch(op: &'static str, lhs: &Ty, rhs: &Ty) -> TypeError {
  TypeError::Mismatch { op, lhs: lhs.to_string(), rhs: rhs.to_string() }
}

/// Deduce the result type of a binary operator applied to operands of the
/// given types. Arrays decay to pointers here. Commutative operators accept
/// their operands in either order.
pub fn deduce_type(op: Binop, lhs: &Ty, rhs: &Ty) -> Result<Ty, TypeError> {
  let (l, r) = (decay(lhs), decay(rhs));
  match op {
    Binop::Add | Binop::Sub => match (&*l, &*r) {
      (TyKind::Ptr(a), TyKind::Ptr(b)) if op == Binop::Sub && a == b =>
        Ok(Rc::new(TyKind::Int)),
      (TyKind::Ptr(_), TyKind::Ptr(_)) => Err(mismatch(op.as_str(), lhs, rhs)),
      (TyKind::Ptr(_), t) if t.is_basic() => Ok(l.clone()),
      (t, TyKind::Ptr(_)) if op == Binop::Add && t.is_basic() => Ok(r.clone()),
      (a, b) if a.is_basic() && b.is_basic() => Ok(Rc::new(TyKind::Int)),
      _ => Err(mismatch(op.as_str(), lhs, rhs)),
    },
    Binop::Mul | Binop::Div |
    Binop::Lt | Binop::Le | Binop::Gt | Binop::Ge | Binop::Eq | Binop::Ne =>
      if l.is_basic() && r.is_basic() {
        Ok(Rc::new(TyKind::Int))
      } else {
        Err(mismatch(op.as_str(), lhs, rhs))
      },
  }
}

/// Check that a value of type `src` may be stored into an lvalue of type
/// `dst`: basic into basic, or pointer into pointer of the same element
/// type (after array decay). The literal-zero-to-pointer case is handled by
/// the caller, which can see the expression. Arrays and structs are never
/// assignable as a whole.
pub fn check_assign(dst: &Ty, src: &Ty) -> Result<(), TypeError> {
  if let TyKind::Array(..) = **dst { return Err(TypeError::AssignArray) }
  let src = decay(src);
  let ok = match (&**dst, &*src) {
    (a, b) if a.is_basic() && b.is_basic() => true,
    (TyKind::Ptr(a), TyKind::Ptr(b)) => a == b,
    _ => false,
  };
  if ok { Ok(()) } else {
    Err(TypeError::BadAssign { lhs: dst.to_string(), rhs: src.to_string() })
  }
}
