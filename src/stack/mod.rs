//! The stack-machine IR: JVM-style instructions over an operand stack, with branch
//! targets held as instruction handles.

pub mod analysis;
pub mod frame;
pub mod insn;
pub mod visitor;

pub use frame::Stack;
pub use insn::{InsnFlags, Shuffle, StackOp};

use crate::error::IrError;
use crate::ops::{LocalInfo, LocalVariable};
use std::fmt;

/// Handle of an instruction inside a `StackBody`. Handles stay valid when instructions
/// are inserted; only the body's `code` order changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InsnId(pub(crate) u32);

impl InsnId {
    /// Placeholder target of a branch whose destination is not known yet.
    pub(crate) const PENDING: InsnId = InsnId(u32::MAX);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InsnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == InsnId::PENDING {
            write!(f, "L?")
        } else {
            write!(f, "L{}", self.0)
        }
    }
}

/// An untyped local slot of a stack body. Slot numbers are assigned by encoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackLocal(pub(crate) u32);

impl StackLocal {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StackLocal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A protected range `start..=end` (in code order) whose exceptions go to `handler`.
/// `exception` is the caught class in internal form, `None` catching everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackTryCatch {
    pub start: InsnId,
    pub end: InsnId,
    pub handler: InsnId,
    pub exception: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StackBody {
    insns: Vec<StackOp>,
    code: Vec<InsnId>,
    locals: Vec<LocalInfo>,
    pub this_local: Option<StackLocal>,
    pub params: Vec<StackLocal>,
    pub try_catches: Vec<StackTryCatch>,
    pub local_variables: Vec<LocalVariable<StackLocal, InsnId>>,
}

impl StackBody {
    pub fn new() -> Self {
        StackBody::default()
    }

    pub fn new_local(&mut self, name: Option<&str>) -> StackLocal {
        let local = StackLocal(self.locals.len() as u32);
        self.locals.push(LocalInfo { name: name.map(|n| n.to_string()) });
        local
    }

    pub fn locals(&self) -> &[LocalInfo] {
        &self.locals
    }

    pub fn local_info(&self, local: StackLocal) -> &LocalInfo {
        &self.locals[local.index()]
    }

    /// Appends `op` to the end of the code.
    pub fn push(&mut self, op: StackOp) -> InsnId {
        let id = self.alloc(op);
        self.code.push(id);
        id
    }

    /// Inserts `op` in front of `before`.
    pub fn insert_before(&mut self, before: InsnId, op: StackOp) -> Result<InsnId, IrError> {
        let pos = match self.code.iter().position(|&i| i == before) {
            Some(pos) => pos,
            None => fail!(UnresolvedTarget, "{} is not in the code", before),
        };
        let id = self.alloc(op);
        self.code.insert(pos, id);
        Ok(id)
    }

    fn alloc(&mut self, op: StackOp) -> InsnId {
        let id = InsnId(self.insns.len() as u32);
        self.insns.push(op);
        id
    }

    pub fn op(&self, id: InsnId) -> &StackOp {
        &self.insns[id.index()]
    }

    pub fn op_mut(&mut self, id: InsnId) -> &mut StackOp {
        &mut self.insns[id.index()]
    }

    /// Instruction handles in execution order.
    pub fn code(&self) -> &[InsnId] {
        &self.code
    }

    /// Ops in code order.
    pub fn ops(&self) -> impl Iterator<Item = &StackOp> + '_ {
        self.code.iter().map(move |&id| self.op(id))
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Code position of every instruction, indexed by `InsnId::index`.
    pub fn positions(&self) -> Vec<Option<usize>> {
        let mut positions = vec![None; self.insns.len()];
        for (pos, id) in self.code.iter().enumerate() {
            positions[id.index()] = Some(pos);
        }
        positions
    }

    /// Checks that control never runs off the end of the code and that every
    /// target, try/catch boundary and local range names an instruction in the code.
    pub fn validate(&self) -> Result<(), IrError> {
        let last = match self.code.last() {
            Some(&last) => last,
            None => fail!(Malformed, "stack body has no instructions"),
        };
        if self.op(last).can_continue() {
            fail!(Malformed, "control falls off the end after {}", self.op(last));
        }
        let positions = self.positions();
        let pos_of = |id: InsnId| -> Result<usize, IrError> {
            match positions.get(id.index()).copied().flatten() {
                Some(pos) => Ok(pos),
                None => fail!(UnresolvedTarget, "{} is not in the code", id),
            }
        };
        for &id in &self.code {
            for target in self.op(id).targets() {
                pos_of(target)?;
            }
        }
        for tc in &self.try_catches {
            if pos_of(tc.start)? > pos_of(tc.end)? {
                fail!(Malformed, "try range {}..{} is reversed", tc.start, tc.end);
            }
            pos_of(tc.handler)?;
        }
        for var in &self.local_variables {
            if pos_of(var.start)? > pos_of(var.end)? {
                fail!(Malformed, "range of local {} is reversed", var.name);
            }
        }
        Ok(())
    }
}

impl fmt::Display for StackBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &id in &self.code {
            writeln!(f, "{}: {}", id, self.op(id))?;
        }
        for tc in &self.try_catches {
            writeln!(
                f,
                ".catch {} {{{} .. {}}} {}",
                tc.exception.as_deref().unwrap_or("all"),
                tc.start,
                tc.end,
                tc.handler
            )?;
        }
        Ok(())
    }
}
