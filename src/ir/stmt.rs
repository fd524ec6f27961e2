use crate::ir::{ExprId, StmtId};
use crate::ops::CondOp;
use crate::types::JvmType;

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `target := value`. The target is a local, field or array element.
    Assign { target: ExprId, value: ExprId },
    /// An invoke evaluated for its effect.
    Invoke(ExprId),
    Return(Option<ExprId>),
    Throw(ExprId),
    MonitorEnter(ExprId),
    MonitorExit(ExprId),
    Goto(StmtId),
    /// Jumps to `target` when `left cond right` holds. `ty` is INT or REFERENCE.
    If { cond: CondOp, ty: JvmType, left: ExprId, right: ExprId, target: StmtId },
    Switch { key: ExprId, cases: Vec<(i32, StmtId)>, default: StmtId },
}

impl Stmt {
    /// Whether control may fall through to the next statement.
    pub fn can_continue(&self) -> bool {
        !matches!(self, Stmt::Goto(_) | Stmt::Return(_) | Stmt::Throw(_) | Stmt::Switch { .. })
    }

    /// Explicit targets, switch default last.
    pub fn targets(&self) -> Vec<StmtId> {
        match self {
            Stmt::Goto(t) => vec![*t],
            Stmt::If { target, .. } => vec![*target],
            Stmt::Switch { cases, default, .. } => {
                cases.iter().map(|(_, t)| *t).chain(std::iter::once(*default)).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn targets_mut(&mut self) -> Vec<&mut StmtId> {
        match self {
            Stmt::Goto(t) => vec![t],
            Stmt::If { target, .. } => vec![target],
            Stmt::Switch { cases, default, .. } => {
                let mut all: Vec<&mut StmtId> = cases.iter_mut().map(|(_, t)| t).collect();
                all.push(default);
                all
            }
            _ => Vec::new(),
        }
    }

    /// Root expressions in evaluation order. An assignment's target comes first so
    /// that its object and index operands are evaluated before the value.
    pub fn exprs(&self) -> Vec<ExprId> {
        match self {
            Stmt::Assign { target, value } => vec![*target, *value],
            Stmt::Invoke(e) | Stmt::Throw(e) | Stmt::MonitorEnter(e) | Stmt::MonitorExit(e) => vec![*e],
            Stmt::Return(e) => e.iter().copied().collect(),
            Stmt::If { left, right, .. } => vec![*left, *right],
            Stmt::Switch { key, .. } => vec![*key],
            Stmt::Goto(_) => Vec::new(),
        }
    }

    pub fn exprs_mut(&mut self) -> Vec<&mut ExprId> {
        match self {
            Stmt::Assign { target, value } => vec![target, value],
            Stmt::Invoke(e) | Stmt::Throw(e) | Stmt::MonitorEnter(e) | Stmt::MonitorExit(e) => vec![e],
            Stmt::Return(e) => e.iter_mut().collect(),
            Stmt::If { left, right, .. } => vec![left, right],
            Stmt::Switch { key, .. } => vec![key],
            Stmt::Goto(_) => Vec::new(),
        }
    }
}
