use crate::ir::{ExprId, RefLocal};
use crate::ops::{ArrayKind, BinOp, CompareKind, Constant, InvokeKind};
use crate::types::{FieldRef, JvmType, MethodRef, TypeSignature};

/// An expression node. Operands are handles of other nodes in the same body, and each
/// node has at most one parent.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Placeholder for an operand still being lowered.
    Unresolved,
    Const(Constant),
    Local { local: RefLocal, ty: JvmType },
    StaticField(FieldRef),
    InstanceField { object: ExprId, field: FieldRef },
    ArrayElement { array: ExprId, index: ExprId, kind: ArrayKind },
    Binary { op: BinOp, ty: JvmType, left: ExprId, right: ExprId },
    Neg { ty: JvmType, value: ExprId },
    Convert { from: JvmType, to: TypeSignature, value: ExprId },
    Compare { kind: CompareKind, left: ExprId, right: ExprId },
    CheckCast { ty: TypeSignature, value: ExprId },
    InstanceOf { ty: TypeSignature, value: ExprId },
    ArrayLength(ExprId),
    /// A freshly allocated, not yet constructed, instance of a class.
    New(String),
    NewArray { elem: TypeSignature, length: ExprId },
    NewMultiArray { ty: TypeSignature, dims: Vec<ExprId> },
    Invoke { kind: InvokeKind, method: MethodRef, receiver: Option<ExprId>, args: Vec<ExprId> },
    InvokeDynamic {
        name: String,
        descriptor: String,
        bootstrap: MethodRef,
        bootstrap_args: Vec<Constant>,
        args: Vec<ExprId>,
    },
}

impl Expr {
    /// Operands in evaluation order.
    pub fn children(&self) -> Vec<ExprId> {
        match self {
            Expr::Unresolved
            | Expr::Const(_)
            | Expr::Local { .. }
            | Expr::StaticField(_)
            | Expr::New(_) => Vec::new(),
            Expr::InstanceField { object, .. } => vec![*object],
            Expr::ArrayElement { array, index, .. } => vec![*array, *index],
            Expr::Binary { left, right, .. } | Expr::Compare { left, right, .. } => vec![*left, *right],
            Expr::Neg { value, .. }
            | Expr::Convert { value, .. }
            | Expr::CheckCast { value, .. }
            | Expr::InstanceOf { value, .. } => vec![*value],
            Expr::ArrayLength(array) => vec![*array],
            Expr::NewArray { length, .. } => vec![*length],
            Expr::NewMultiArray { dims, .. } => dims.clone(),
            Expr::Invoke { receiver, args, .. } => receiver.iter().chain(args.iter()).copied().collect(),
            Expr::InvokeDynamic { args, .. } => args.clone(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut ExprId> {
        match self {
            Expr::Unresolved
            | Expr::Const(_)
            | Expr::Local { .. }
            | Expr::StaticField(_)
            | Expr::New(_) => Vec::new(),
            Expr::InstanceField { object, .. } => vec![object],
            Expr::ArrayElement { array, index, .. } => vec![array, index],
            Expr::Binary { left, right, .. } | Expr::Compare { left, right, .. } => vec![left, right],
            Expr::Neg { value, .. }
            | Expr::Convert { value, .. }
            | Expr::CheckCast { value, .. }
            | Expr::InstanceOf { value, .. } => vec![value],
            Expr::ArrayLength(array) => vec![array],
            Expr::NewArray { length, .. } => vec![length],
            Expr::NewMultiArray { dims, .. } => dims.iter_mut().collect(),
            Expr::Invoke { receiver, args, .. } => receiver.iter_mut().chain(args.iter_mut()).collect(),
            Expr::InvokeDynamic { args, .. } => args.iter_mut().collect(),
        }
    }

    /// Reading a constant or a local has no effect and cannot throw.
    pub fn is_pure(&self) -> bool {
        matches!(self, Expr::Const(_) | Expr::Local { .. })
    }

    /// Whether the node may appear on the left of an assignment.
    pub fn is_assignable(&self) -> bool {
        matches!(
            self,
            Expr::Local { .. } | Expr::StaticField(_) | Expr::InstanceField { .. } | Expr::ArrayElement { .. }
        )
    }

    pub fn as_local(&self) -> Option<RefLocal> {
        match self {
            Expr::Local { local, .. } => Some(*local),
            _ => None,
        }
    }

    pub fn as_const(&self) -> Option<&Constant> {
        match self {
            Expr::Const(c) => Some(c),
            _ => None,
        }
    }
}
