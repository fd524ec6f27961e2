//! Operators, constants and debug records shared by the stack IR and the ref IR.

use crate::types::{JvmType, TypeSignature};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A literal pushed by `ldc`/`iconst`/`aconst_null` and friends, or held by a ref-IR
/// constant expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
    String(String),
    /// A class literal, e.g. `String.class`.
    Class(TypeSignature),
}

impl Constant {
    pub fn jvm_type(&self) -> JvmType {
        match self {
            Constant::Int(_) => JvmType::Int,
            Constant::Long(_) => JvmType::Long,
            Constant::Float(_) => JvmType::Float,
            Constant::Double(_) => JvmType::Double,
            Constant::Null | Constant::String(_) | Constant::Class(_) => JvmType::Reference,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Constant::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(v) => write!(f, "{}", v),
            Constant::Long(v) => write!(f, "{}L", v),
            Constant::Float(v) => write!(f, "{}F", v),
            Constant::Double(v) => write!(f, "{}D", v),
            Constant::Null => write!(f, "null"),
            Constant::String(s) => write!(f, "{:?}", s),
            Constant::Class(t) => write!(f, "{}.class", t.to_jni()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

impl BinOp {
    pub fn name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Rem => "rem",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Shl => "shl",
            BinOp::Shr => "shr",
            BinOp::Ushr => "ushr",
        }
    }

    /// Shifts take an INT count whatever the width of the shifted value.
    pub fn is_shift(self) -> bool {
        matches!(self, BinOp::Shl | BinOp::Shr | BinOp::Ushr)
    }

    /// Operators that only exist for INT and LONG.
    pub fn is_integral_only(self) -> bool {
        matches!(
            self,
            BinOp::And | BinOp::Or | BinOp::Xor | BinOp::Shl | BinOp::Shr | BinOp::Ushr
        )
    }

    /// Whether `op` over `ty` is an instruction the JVM has.
    pub fn accepts(self, ty: JvmType) -> bool {
        match ty {
            JvmType::Int | JvmType::Long => true,
            JvmType::Float | JvmType::Double => !self.is_integral_only(),
            JvmType::Reference => false,
        }
    }

    /// Type of the right-hand operand for a left operand of type `ty`.
    pub fn right_type(self, ty: JvmType) -> JvmType {
        if self.is_shift() {
            JvmType::Int
        } else {
            ty
        }
    }
}

/// Condition of a conditional branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CondOp {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl CondOp {
    pub fn name(self) -> &'static str {
        match self {
            CondOp::Eq => "eq",
            CondOp::Ne => "ne",
            CondOp::Lt => "lt",
            CondOp::Ge => "ge",
            CondOp::Gt => "gt",
            CondOp::Le => "le",
        }
    }


    /// References only support equality tests.
    pub fn accepts(self, ty: JvmType) -> bool {
        match ty {
            JvmType::Int => true,
            JvmType::Reference => matches!(self, CondOp::Eq | CondOp::Ne),
            _ => false,
        }
    }
}

/// The three-way comparisons producing -1/0/1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareKind {
    Lcmp,
    Fcmpl,
    Fcmpg,
    Dcmpl,
    Dcmpg,
}

impl CompareKind {
    pub fn operand_type(self) -> JvmType {
        match self {
            CompareKind::Lcmp => JvmType::Long,
            CompareKind::Fcmpl | CompareKind::Fcmpg => JvmType::Float,
            CompareKind::Dcmpl | CompareKind::Dcmpg => JvmType::Double,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompareKind::Lcmp => "lcmp",
            CompareKind::Fcmpl => "fcmpl",
            CompareKind::Fcmpg => "fcmpg",
            CompareKind::Dcmpl => "dcmpl",
            CompareKind::Dcmpg => "dcmpg",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvokeKind {
    Static,
    Virtual,
    Special,
    Interface,
}

impl InvokeKind {
    pub fn has_receiver(self) -> bool {
        !matches!(self, InvokeKind::Static)
    }

    pub fn name(self) -> &'static str {
        match self {
            InvokeKind::Static => "invokestatic",
            InvokeKind::Virtual => "invokevirtual",
            InvokeKind::Special => "invokespecial",
            InvokeKind::Interface => "invokeinterface",
        }
    }
}

/// Element kind selecting the typed array load/store opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArrayKind {
    Int,
    Long,
    Float,
    Double,
    Reference,
    /// Also used for boolean arrays (`baload`/`bastore`).
    Byte,
    Char,
    Short,
}

impl ArrayKind {
    pub fn jvm_type(self) -> JvmType {
        match self {
            ArrayKind::Int | ArrayKind::Byte | ArrayKind::Char | ArrayKind::Short => JvmType::Int,
            ArrayKind::Long => JvmType::Long,
            ArrayKind::Float => JvmType::Float,
            ArrayKind::Double => JvmType::Double,
            ArrayKind::Reference => JvmType::Reference,
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            ArrayKind::Int => "ia",
            ArrayKind::Long => "la",
            ArrayKind::Float => "fa",
            ArrayKind::Double => "da",
            ArrayKind::Reference => "aa",
            ArrayKind::Byte => "ba",
            ArrayKind::Char => "ca",
            ArrayKind::Short => "sa",
        }
    }
}

/// Per-local bookkeeping kept by both IRs. Locals are identified by their handle;
/// the name only survives for debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalInfo {
    pub name: Option<String>,
}

/// A local-variable debug range over positions `P` of a body whose locals are `L`.
/// `start` and `end` are both inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable<L, P> {
    pub local: L,
    pub name: String,
    pub descriptor: String,
    pub signature: Option<String>,
    pub start: P,
    pub end: P,
}
