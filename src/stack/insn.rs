use crate::error::IrError;
use crate::ops::{ArrayKind, BinOp, CompareKind, CondOp, Constant, InvokeKind};
use crate::stack::{InsnId, StackLocal};
use crate::types::{FieldRef, JvmType, MethodRef, TypeSignature};
use bitflags::bitflags;
use std::fmt;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InsnFlags: u32 {
        /// Control may fall through to the next instruction in the sequence.
        const CAN_CONTINUE = 0x1;
        /// The instruction names one or more explicit targets.
        const BRANCH = 0x2;
        /// The instruction may raise an exception.
        const CAN_THROW = 0x4;
    }
}

/// The stack shuffles. Forms are picked from the categories of the values on the
/// stack, so `Dup2` over a LONG duplicates one entry and over two INTs duplicates two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shuffle {
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
}

impl Shuffle {
    pub fn name(self) -> &'static str {
        match self {
            Shuffle::Pop => "pop",
            Shuffle::Pop2 => "pop2",
            Shuffle::Dup => "dup",
            Shuffle::DupX1 => "dup_x1",
            Shuffle::DupX2 => "dup_x2",
            Shuffle::Dup2 => "dup2",
            Shuffle::Dup2X1 => "dup2_x1",
            Shuffle::Dup2X2 => "dup2_x2",
            Shuffle::Swap => "swap",
        }
    }

    /// Shuffles that change the relative order of the values they touch.
    pub fn reorders(self) -> bool {
        matches!(
            self,
            Shuffle::DupX1 | Shuffle::DupX2 | Shuffle::Dup2X1 | Shuffle::Dup2X2 | Shuffle::Swap
        )
    }

    /// Applies the shuffle to an abstract stack.
    ///
    /// `pop` removes the top entry and `wide` reports whether an entry is a two-slot
    /// value. Returns the entries taken off the stack (top first) and the entries to
    /// push back (bottom first).
    pub fn apply<T: Clone>(
        self,
        pop: &mut dyn FnMut() -> Result<T, IrError>,
        wide: &dyn Fn(&T) -> bool,
    ) -> Result<(Vec<T>, Vec<T>), IrError> {
        let shuffled = match self {
            Shuffle::Pop => {
                let v1 = narrow(self, pop()?, wide)?;
                (vec![v1], vec![])
            }
            Shuffle::Pop2 => {
                let v1 = pop()?;
                if wide(&v1) {
                    (vec![v1], vec![])
                } else {
                    let v2 = narrow(self, pop()?, wide)?;
                    (vec![v1, v2], vec![])
                }
            }
            Shuffle::Dup => {
                let v1 = narrow(self, pop()?, wide)?;
                (vec![v1.clone()], vec![v1.clone(), v1])
            }
            Shuffle::DupX1 => {
                let v1 = narrow(self, pop()?, wide)?;
                let v2 = narrow(self, pop()?, wide)?;
                (vec![v1.clone(), v2.clone()], vec![v1.clone(), v2, v1])
            }
            Shuffle::DupX2 => {
                let v1 = narrow(self, pop()?, wide)?;
                let v2 = pop()?;
                if wide(&v2) {
                    (vec![v1.clone(), v2.clone()], vec![v1.clone(), v2, v1])
                } else {
                    let v3 = narrow(self, pop()?, wide)?;
                    (
                        vec![v1.clone(), v2.clone(), v3.clone()],
                        vec![v1.clone(), v3, v2, v1],
                    )
                }
            }
            Shuffle::Dup2 => {
                let v1 = pop()?;
                if wide(&v1) {
                    (vec![v1.clone()], vec![v1.clone(), v1])
                } else {
                    let v2 = narrow(self, pop()?, wide)?;
                    (
                        vec![v1.clone(), v2.clone()],
                        vec![v2.clone(), v1.clone(), v2, v1],
                    )
                }
            }
            Shuffle::Dup2X1 => {
                let v1 = pop()?;
                if wide(&v1) {
                    let v2 = narrow(self, pop()?, wide)?;
                    (vec![v1.clone(), v2.clone()], vec![v1.clone(), v2, v1])
                } else {
                    let v2 = narrow(self, pop()?, wide)?;
                    let v3 = narrow(self, pop()?, wide)?;
                    (
                        vec![v1.clone(), v2.clone(), v3.clone()],
                        vec![v2.clone(), v1.clone(), v3, v2, v1],
                    )
                }
            }
            Shuffle::Dup2X2 => {
                let v1 = pop()?;
                if wide(&v1) {
                    let v2 = pop()?;
                    if wide(&v2) {
                        (vec![v1.clone(), v2.clone()], vec![v1.clone(), v2, v1])
                    } else {
                        let v3 = narrow(self, pop()?, wide)?;
                        (
                            vec![v1.clone(), v2.clone(), v3.clone()],
                            vec![v1.clone(), v3, v2, v1],
                        )
                    }
                } else {
                    let v2 = narrow(self, pop()?, wide)?;
                    let v3 = pop()?;
                    if wide(&v3) {
                        (
                            vec![v1.clone(), v2.clone(), v3.clone()],
                            vec![v2.clone(), v1.clone(), v3, v2, v1],
                        )
                    } else {
                        let v4 = narrow(self, pop()?, wide)?;
                        (
                            vec![v1.clone(), v2.clone(), v3.clone(), v4.clone()],
                            vec![v2.clone(), v1.clone(), v4, v3, v2, v1],
                        )
                    }
                }
            }
            Shuffle::Swap => {
                let v1 = narrow(self, pop()?, wide)?;
                let v2 = narrow(self, pop()?, wide)?;
                (vec![v1.clone(), v2.clone()], vec![v1, v2])
            }
        };
        Ok(shuffled)
    }
}

fn narrow<T>(shuffle: Shuffle, v: T, wide: &dyn Fn(&T) -> bool) -> Result<T, IrError> {
    if wide(&v) {
        fail!(TypeMismatch, "{} applied to a two-slot value", shuffle.name());
    }
    Ok(v)
}

/// One stack-machine instruction. Branch targets are instruction handles inside the
/// same `StackBody`; there are no byte offsets at this layer.
#[derive(Debug, Clone, PartialEq)]
pub enum StackOp {
    Nop,
    Const(Constant),
    Load { ty: JvmType, local: StackLocal },
    Store { ty: JvmType, local: StackLocal },
    Increment { local: StackLocal, amount: i32 },
    Shuffle(Shuffle),
    Binary { op: BinOp, ty: JvmType },
    Neg(JvmType),
    /// Primitive conversion (`i2l`, `d2f`, `i2b`, ...). `to` is a primitive descriptor.
    Convert { from: JvmType, to: TypeSignature },
    Compare(CompareKind),
    /// Compares the top value against 0 (INT) or null (REFERENCE).
    IfZero { cond: CondOp, ty: JvmType, target: InsnId },
    IfCompare { cond: CondOp, ty: JvmType, target: InsnId },
    Goto(InsnId),
    Switch { keys: Vec<i32>, targets: Vec<InsnId>, default: InsnId },
    /// `newarray`/`anewarray` of the given element type.
    NewArray(TypeSignature),
    /// `multianewarray` of the given array type with `dims` counts on the stack.
    NewMultiArray { ty: TypeSignature, dims: u8 },
    ArrayLength,
    ArrayLoad(ArrayKind),
    ArrayStore(ArrayKind),
    GetField { field: FieldRef, is_static: bool },
    PutField { field: FieldRef, is_static: bool },
    Invoke { kind: InvokeKind, method: MethodRef },
    InvokeDynamic { name: String, descriptor: String, bootstrap: MethodRef, bootstrap_args: Vec<Constant> },
    /// `new` of the class with the given internal name.
    New(String),
    CheckCast(TypeSignature),
    InstanceOf(TypeSignature),
    Return(Option<JvmType>),
    Throw,
    MonitorEnter,
    MonitorExit,
}

impl StackOp {
    pub fn flags(&self) -> InsnFlags {
        match self {
            StackOp::Goto(_) => InsnFlags::BRANCH,
            StackOp::Switch { .. } => InsnFlags::BRANCH,
            StackOp::IfZero { .. } | StackOp::IfCompare { .. } => {
                InsnFlags::BRANCH | InsnFlags::CAN_CONTINUE
            }
            StackOp::Return(_) => InsnFlags::CAN_THROW,
            StackOp::Throw => InsnFlags::CAN_THROW,
            StackOp::Nop
            | StackOp::Const(_)
            | StackOp::Load { .. }
            | StackOp::Store { .. }
            | StackOp::Increment { .. }
            | StackOp::Shuffle(_)
            | StackOp::Neg(_)
            | StackOp::Convert { .. }
            | StackOp::Compare(_) => InsnFlags::CAN_CONTINUE,
            StackOp::Binary { op, ty } => {
                if matches!(op, BinOp::Div | BinOp::Rem) && matches!(ty, JvmType::Int | JvmType::Long) {
                    InsnFlags::CAN_CONTINUE | InsnFlags::CAN_THROW
                } else {
                    InsnFlags::CAN_CONTINUE
                }
            }
            _ => InsnFlags::CAN_CONTINUE | InsnFlags::CAN_THROW,
        }
    }

    pub fn can_continue(&self) -> bool {
        self.flags().contains(InsnFlags::CAN_CONTINUE)
    }

    /// Explicit targets, in operand order (switch default last).
    pub fn targets(&self) -> Vec<InsnId> {
        match self {
            StackOp::Goto(t) => vec![*t],
            StackOp::IfZero { target, .. } | StackOp::IfCompare { target, .. } => vec![*target],
            StackOp::Switch { targets, default, .. } => {
                let mut all = targets.clone();
                all.push(*default);
                all
            }
            _ => Vec::new(),
        }
    }

    pub(crate) fn targets_mut(&mut self) -> Vec<&mut InsnId> {
        match self {
            StackOp::Goto(t) => vec![t],
            StackOp::IfZero { target, .. } | StackOp::IfCompare { target, .. } => vec![target],
            StackOp::Switch { targets, default, .. } => {
                let mut all: Vec<&mut InsnId> = targets.iter_mut().collect();
                all.push(default);
                all
            }
            _ => Vec::new(),
        }
    }
}

fn convert_suffix(to: &TypeSignature) -> char {
    match to {
        TypeSignature::Int => 'i',
        TypeSignature::Long => 'l',
        TypeSignature::Float => 'f',
        TypeSignature::Double => 'd',
        TypeSignature::Byte => 'b',
        TypeSignature::Char => 'c',
        TypeSignature::Short => 's',
        _ => '?',
    }
}

impl fmt::Display for StackOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackOp::Nop => write!(f, "nop"),
            StackOp::Const(c) => write!(f, "ldc {}", c),
            StackOp::Load { ty, local } => write!(f, "{}load {}", ty.prefix(), local),
            StackOp::Store { ty, local } => write!(f, "{}store {}", ty.prefix(), local),
            StackOp::Increment { local, amount } => write!(f, "iinc {} {}", local, amount),
            StackOp::Shuffle(s) => write!(f, "{}", s.name()),
            StackOp::Binary { op, ty } => write!(f, "{}{}", ty.prefix(), op.name()),
            StackOp::Neg(ty) => write!(f, "{}neg", ty.prefix()),
            StackOp::Convert { from, to } => write!(f, "{}2{}", from.prefix(), convert_suffix(to)),
            StackOp::Compare(k) => write!(f, "{}", k.name()),
            StackOp::IfZero { cond, ty, target } => match ty {
                JvmType::Reference if *cond == CondOp::Eq => write!(f, "ifnull {}", target),
                JvmType::Reference => write!(f, "ifnonnull {}", target),
                _ => write!(f, "if{} {}", cond.name(), target),
            },
            StackOp::IfCompare { cond, ty, target } => {
                write!(f, "if_{}cmp{} {}", ty.prefix(), cond.name(), target)
            }
            StackOp::Goto(t) => write!(f, "goto {}", t),
            StackOp::Switch { keys, targets, default } => {
                write!(f, "switch {{")?;
                for (k, t) in keys.iter().zip(targets) {
                    write!(f, " {}: {},", k, t)?;
                }
                write!(f, " default: {} }}", default)
            }
            StackOp::NewArray(elem) => {
                if elem.is_primitive() {
                    write!(f, "newarray {}", elem.to_java())
                } else {
                    write!(f, "anewarray {}", elem.to_jni())
                }
            }
            StackOp::NewMultiArray { ty, dims } => write!(f, "multianewarray {} {}", ty.to_jni(), dims),
            StackOp::ArrayLength => write!(f, "arraylength"),
            StackOp::ArrayLoad(k) => write!(f, "{}load", k.prefix()),
            StackOp::ArrayStore(k) => write!(f, "{}store", k.prefix()),
            StackOp::GetField { field, is_static } => {
                write!(f, "{} {}", if *is_static { "getstatic" } else { "getfield" }, field)
            }
            StackOp::PutField { field, is_static } => {
                write!(f, "{} {}", if *is_static { "putstatic" } else { "putfield" }, field)
            }
            StackOp::Invoke { kind, method } => write!(f, "{} {}", kind.name(), method),
            StackOp::InvokeDynamic { name, descriptor, .. } => {
                write!(f, "invokedynamic {}{}", name, descriptor)
            }
            StackOp::New(class) => write!(f, "new {}", class),
            StackOp::CheckCast(t) => write!(f, "checkcast {}", t.to_jni()),
            StackOp::InstanceOf(t) => write!(f, "instanceof {}", t.to_jni()),
            StackOp::Return(None) => write!(f, "return"),
            StackOp::Return(Some(ty)) => write!(f, "{}return", ty.prefix()),
            StackOp::Throw => write!(f, "athrow"),
            StackOp::MonitorEnter => write!(f, "monitorenter"),
            StackOp::MonitorExit => write!(f, "monitorexit"),
        }
    }
}
