use crate::error::IrError;
use crate::ops::{ArrayKind, BinOp, CompareKind, CondOp, Constant, InvokeKind, LocalVariable};
use crate::stack::{InsnId, Shuffle, StackBody, StackLocal, StackOp, StackTryCatch};
use crate::types::{FieldRef, JvmType, MethodRef, TypeSignature};
use log::warn;
use std::fmt;

/// Typed callbacks for each stack instruction family.
///
/// Decoders drive an implementation to build a body; the lowerings implement it to
/// read one. `Target` is whatever names a branch destination for the implementor:
/// an `InsnId` when reading an existing body, a `Label` when writing a new one.
pub trait StackInsnVisitor {
    type Target: Copy;

    fn visit_nop(&mut self) -> Result<(), IrError> {
        Ok(())
    }
    fn visit_const(&mut self, value: &Constant) -> Result<(), IrError>;
    fn visit_load(&mut self, ty: JvmType, local: StackLocal) -> Result<(), IrError>;
    fn visit_store(&mut self, ty: JvmType, local: StackLocal) -> Result<(), IrError>;
    fn visit_increment(&mut self, local: StackLocal, amount: i32) -> Result<(), IrError>;
    fn visit_shuffle(&mut self, shuffle: Shuffle) -> Result<(), IrError>;
    fn visit_binary(&mut self, op: BinOp, ty: JvmType) -> Result<(), IrError>;
    fn visit_neg(&mut self, ty: JvmType) -> Result<(), IrError>;
    fn visit_convert(&mut self, from: JvmType, to: &TypeSignature) -> Result<(), IrError>;
    fn visit_compare(&mut self, kind: CompareKind) -> Result<(), IrError>;
    fn visit_if_zero(&mut self, cond: CondOp, ty: JvmType, target: Self::Target) -> Result<(), IrError>;
    fn visit_if_compare(&mut self, cond: CondOp, ty: JvmType, target: Self::Target) -> Result<(), IrError>;
    fn visit_goto(&mut self, target: Self::Target) -> Result<(), IrError>;
    fn visit_switch(
        &mut self,
        keys: &[i32],
        targets: &[Self::Target],
        default: Self::Target,
    ) -> Result<(), IrError>;
    fn visit_new_array(&mut self, elem: &TypeSignature) -> Result<(), IrError>;
    fn visit_new_multi_array(&mut self, ty: &TypeSignature, dims: u8) -> Result<(), IrError>;
    fn visit_array_length(&mut self) -> Result<(), IrError>;
    fn visit_array_load(&mut self, kind: ArrayKind) -> Result<(), IrError>;
    fn visit_array_store(&mut self, kind: ArrayKind) -> Result<(), IrError>;
    fn visit_get_field(&mut self, field: &FieldRef, is_static: bool) -> Result<(), IrError>;
    fn visit_put_field(&mut self, field: &FieldRef, is_static: bool) -> Result<(), IrError>;
    fn visit_invoke(&mut self, kind: InvokeKind, method: &MethodRef) -> Result<(), IrError>;
    fn visit_invoke_dynamic(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap: &MethodRef,
        bootstrap_args: &[Constant],
    ) -> Result<(), IrError>;
    fn visit_new(&mut self, class: &str) -> Result<(), IrError>;
    fn visit_check_cast(&mut self, ty: &TypeSignature) -> Result<(), IrError>;
    fn visit_instance_of(&mut self, ty: &TypeSignature) -> Result<(), IrError>;
    fn visit_return(&mut self, ty: Option<JvmType>) -> Result<(), IrError>;
    fn visit_throw(&mut self) -> Result<(), IrError>;
    fn visit_monitor_enter(&mut self) -> Result<(), IrError>;
    fn visit_monitor_exit(&mut self) -> Result<(), IrError>;
}

impl StackBody {
    /// Feeds instruction `id` to `v`.
    pub fn accept<V>(&self, id: InsnId, v: &mut V) -> Result<(), IrError>
    where
        V: StackInsnVisitor<Target = InsnId>,
    {
        match self.op(id) {
            StackOp::Nop => v.visit_nop(),
            StackOp::Const(c) => v.visit_const(c),
            StackOp::Load { ty, local } => v.visit_load(*ty, *local),
            StackOp::Store { ty, local } => v.visit_store(*ty, *local),
            StackOp::Increment { local, amount } => v.visit_increment(*local, *amount),
            StackOp::Shuffle(s) => v.visit_shuffle(*s),
            StackOp::Binary { op, ty } => v.visit_binary(*op, *ty),
            StackOp::Neg(ty) => v.visit_neg(*ty),
            StackOp::Convert { from, to } => v.visit_convert(*from, to),
            StackOp::Compare(kind) => v.visit_compare(*kind),
            StackOp::IfZero { cond, ty, target } => v.visit_if_zero(*cond, *ty, *target),
            StackOp::IfCompare { cond, ty, target } => v.visit_if_compare(*cond, *ty, *target),
            StackOp::Goto(target) => v.visit_goto(*target),
            StackOp::Switch { keys, targets, default } => v.visit_switch(keys, targets, *default),
            StackOp::NewArray(elem) => v.visit_new_array(elem),
            StackOp::NewMultiArray { ty, dims } => v.visit_new_multi_array(ty, *dims),
            StackOp::ArrayLength => v.visit_array_length(),
            StackOp::ArrayLoad(kind) => v.visit_array_load(*kind),
            StackOp::ArrayStore(kind) => v.visit_array_store(*kind),
            StackOp::GetField { field, is_static } => v.visit_get_field(field, *is_static),
            StackOp::PutField { field, is_static } => v.visit_put_field(field, *is_static),
            StackOp::Invoke { kind, method } => v.visit_invoke(*kind, method),
            StackOp::InvokeDynamic { name, descriptor, bootstrap, bootstrap_args } => {
                v.visit_invoke_dynamic(name, descriptor, bootstrap, bootstrap_args)
            }
            StackOp::New(class) => v.visit_new(class),
            StackOp::CheckCast(ty) => v.visit_check_cast(ty),
            StackOp::InstanceOf(ty) => v.visit_instance_of(ty),
            StackOp::Return(ty) => v.visit_return(*ty),
            StackOp::Throw => v.visit_throw(),
            StackOp::MonitorEnter => v.visit_monitor_enter(),
            StackOp::MonitorExit => v.visit_monitor_exit(),
        }
    }
}

/// A position in code being written, bound with `StackInsnWriter::mark`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":L{}", self.0)
    }
}

/// A branch operand waiting for its label.
#[derive(Debug)]
struct BranchFixup {
    insn: InsnId,
    slot: usize,
    label: Label,
}

#[derive(Debug)]
struct PendingTry {
    start: Label,
    end: Label,
    handler: Label,
    exception: Option<String>,
}

/// Builds a `StackBody` in code order.
///
/// Branches, try ranges and local ranges name `Label`s, which may be marked before or
/// after they are used; `finish` patches every use.
#[derive(Debug, Default)]
pub struct StackInsnWriter {
    body: StackBody,
    labels: Vec<Option<usize>>,
    fixups: Vec<BranchFixup>,
    tries: Vec<PendingTry>,
    vars: Vec<LocalVariable<StackLocal, Label>>,
}

impl StackInsnWriter {
    pub fn new() -> Self {
        StackInsnWriter::default()
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label((self.labels.len() - 1) as u32)
    }

    /// Binds `label` to the next instruction written.
    pub fn mark(&mut self, label: Label) -> Result<(), IrError> {
        let slot = match self.labels.get_mut(label.0 as usize) {
            Some(slot) => slot,
            None => fail!(UnresolvedCell, "label {} belongs to another writer", label),
        };
        if slot.is_some() {
            fail!(Malformed, "label {} marked twice", label);
        }
        *slot = Some(self.body.len());
        Ok(())
    }

    /// Number of instructions written so far.
    pub fn position(&self) -> usize {
        self.body.len()
    }

    pub fn new_local(&mut self, name: Option<&str>) -> StackLocal {
        self.body.new_local(name)
    }

    pub fn body_mut(&mut self) -> &mut StackBody {
        &mut self.body
    }

    /// Adds a try/catch covering the instructions from `start` up to, not including, `end`.
    pub fn add_try_catch(&mut self, start: Label, end: Label, handler: Label, exception: Option<&str>) {
        self.tries.push(PendingTry {
            start,
            end,
            handler,
            exception: exception.map(|e| e.to_string()),
        });
    }

    /// Adds a local-variable range from `start` up to, not including, `end`.
    pub fn add_local_variable(
        &mut self,
        local: StackLocal,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        start: Label,
        end: Label,
    ) {
        self.vars.push(LocalVariable {
            local,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            signature: signature.map(|s| s.to_string()),
            start,
            end,
        });
    }

    pub fn emit(&mut self, op: StackOp) -> InsnId {
        self.body.push(op)
    }

    fn emit_branch(&mut self, op: StackOp, labels: &[Label]) -> InsnId {
        let insn = self.body.push(op);
        for (slot, &label) in labels.iter().enumerate() {
            self.fixups.push(BranchFixup { insn, slot, label });
        }
        insn
    }

    fn bound(&self, label: Label) -> Result<usize, IrError> {
        match self.labels.get(label.0 as usize).copied().flatten() {
            Some(pos) => Ok(pos),
            None => fail!(UnresolvedCell, "label {} was never marked", label),
        }
    }

    /// The instruction a label points at.
    fn target(&self, label: Label) -> Result<InsnId, IrError> {
        let pos = self.bound(label)?;
        match self.body.code().get(pos) {
            Some(&id) => Ok(id),
            None => fail!(UnresolvedTarget, "label {} is past the last instruction", label),
        }
    }

    /// Inclusive instruction range for `start..end`, or `None` if it is empty.
    fn range(&self, start: Label, end: Label) -> Result<Option<(InsnId, InsnId)>, IrError> {
        let (s, e) = (self.bound(start)?, self.bound(end)?);
        if s >= e {
            return Ok(None);
        }
        let code = self.body.code();
        match (code.get(s), code.get(e - 1)) {
            (Some(&first), Some(&last)) => Ok(Some((first, last))),
            _ => fail!(UnresolvedTarget, "range {}..{} is past the last instruction", start, end),
        }
    }

    /// Resolves every label use and returns the body.
    pub fn finish(mut self) -> Result<StackBody, IrError> {
        for fixup in &self.fixups {
            let target = self.target(fixup.label)?;
            let op = self.body.op_mut(fixup.insn);
            *op.targets_mut()[fixup.slot] = target;
        }
        for t in &self.tries {
            let handler = self.target(t.handler)?;
            match self.range(t.start, t.end)? {
                Some((start, end)) => self.body.try_catches.push(StackTryCatch {
                    start,
                    end,
                    handler,
                    exception: t.exception.clone(),
                }),
                None => warn!("dropping empty try range {}..{}", t.start, t.end),
            }
        }
        for v in &self.vars {
            if let Some((start, end)) = self.range(v.start, v.end)? {
                self.body.local_variables.push(LocalVariable {
                    local: v.local,
                    name: v.name.clone(),
                    descriptor: v.descriptor.clone(),
                    signature: v.signature.clone(),
                    start,
                    end,
                });
            }
        }
        Ok(self.body)
    }
}

impl StackInsnVisitor for StackInsnWriter {
    type Target = Label;

    fn visit_nop(&mut self) -> Result<(), IrError> {
        self.emit(StackOp::Nop);
        Ok(())
    }

    fn visit_const(&mut self, value: &Constant) -> Result<(), IrError> {
        self.emit(StackOp::Const(value.clone()));
        Ok(())
    }

    fn visit_load(&mut self, ty: JvmType, local: StackLocal) -> Result<(), IrError> {
        self.emit(StackOp::Load { ty, local });
        Ok(())
    }

    fn visit_store(&mut self, ty: JvmType, local: StackLocal) -> Result<(), IrError> {
        self.emit(StackOp::Store { ty, local });
        Ok(())
    }

    fn visit_increment(&mut self, local: StackLocal, amount: i32) -> Result<(), IrError> {
        self.emit(StackOp::Increment { local, amount });
        Ok(())
    }

    fn visit_shuffle(&mut self, shuffle: Shuffle) -> Result<(), IrError> {
        self.emit(StackOp::Shuffle(shuffle));
        Ok(())
    }

    fn visit_binary(&mut self, op: BinOp, ty: JvmType) -> Result<(), IrError> {
        self.emit(StackOp::Binary { op, ty });
        Ok(())
    }

    fn visit_neg(&mut self, ty: JvmType) -> Result<(), IrError> {
        self.emit(StackOp::Neg(ty));
        Ok(())
    }

    fn visit_convert(&mut self, from: JvmType, to: &TypeSignature) -> Result<(), IrError> {
        self.emit(StackOp::Convert { from, to: to.clone() });
        Ok(())
    }

    fn visit_compare(&mut self, kind: CompareKind) -> Result<(), IrError> {
        self.emit(StackOp::Compare(kind));
        Ok(())
    }

    fn visit_if_zero(&mut self, cond: CondOp, ty: JvmType, target: Label) -> Result<(), IrError> {
        self.emit_branch(StackOp::IfZero { cond, ty, target: InsnId::PENDING }, &[target]);
        Ok(())
    }

    fn visit_if_compare(&mut self, cond: CondOp, ty: JvmType, target: Label) -> Result<(), IrError> {
        self.emit_branch(StackOp::IfCompare { cond, ty, target: InsnId::PENDING }, &[target]);
        Ok(())
    }

    fn visit_goto(&mut self, target: Label) -> Result<(), IrError> {
        self.emit_branch(StackOp::Goto(InsnId::PENDING), &[target]);
        Ok(())
    }

    fn visit_switch(&mut self, keys: &[i32], targets: &[Label], default: Label) -> Result<(), IrError> {
        if keys.len() != targets.len() {
            fail!(Malformed, "switch has {} keys but {} targets", keys.len(), targets.len());
        }
        let op = StackOp::Switch {
            keys: keys.to_vec(),
            targets: vec![InsnId::PENDING; targets.len()],
            default: InsnId::PENDING,
        };
        let mut labels = targets.to_vec();
        labels.push(default);
        self.emit_branch(op, &labels);
        Ok(())
    }

    fn visit_new_array(&mut self, elem: &TypeSignature) -> Result<(), IrError> {
        self.emit(StackOp::NewArray(elem.clone()));
        Ok(())
    }

    fn visit_new_multi_array(&mut self, ty: &TypeSignature, dims: u8) -> Result<(), IrError> {
        self.emit(StackOp::NewMultiArray { ty: ty.clone(), dims });
        Ok(())
    }

    fn visit_array_length(&mut self) -> Result<(), IrError> {
        self.emit(StackOp::ArrayLength);
        Ok(())
    }

    fn visit_array_load(&mut self, kind: ArrayKind) -> Result<(), IrError> {
        self.emit(StackOp::ArrayLoad(kind));
        Ok(())
    }

    fn visit_array_store(&mut self, kind: ArrayKind) -> Result<(), IrError> {
        self.emit(StackOp::ArrayStore(kind));
        Ok(())
    }

    fn visit_get_field(&mut self, field: &FieldRef, is_static: bool) -> Result<(), IrError> {
        self.emit(StackOp::GetField { field: field.clone(), is_static });
        Ok(())
    }

    fn visit_put_field(&mut self, field: &FieldRef, is_static: bool) -> Result<(), IrError> {
        self.emit(StackOp::PutField { field: field.clone(), is_static });
        Ok(())
    }

    fn visit_invoke(&mut self, kind: InvokeKind, method: &MethodRef) -> Result<(), IrError> {
        self.emit(StackOp::Invoke { kind, method: method.clone() });
        Ok(())
    }

    fn visit_invoke_dynamic(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap: &MethodRef,
        bootstrap_args: &[Constant],
    ) -> Result<(), IrError> {
        self.emit(StackOp::InvokeDynamic {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            bootstrap: bootstrap.clone(),
            bootstrap_args: bootstrap_args.to_vec(),
        });
        Ok(())
    }

    fn visit_new(&mut self, class: &str) -> Result<(), IrError> {
        self.emit(StackOp::New(class.to_string()));
        Ok(())
    }

    fn visit_check_cast(&mut self, ty: &TypeSignature) -> Result<(), IrError> {
        self.emit(StackOp::CheckCast(ty.clone()));
        Ok(())
    }

    fn visit_instance_of(&mut self, ty: &TypeSignature) -> Result<(), IrError> {
        self.emit(StackOp::InstanceOf(ty.clone()));
        Ok(())
    }

    fn visit_return(&mut self, ty: Option<JvmType>) -> Result<(), IrError> {
        self.emit(StackOp::Return(ty));
        Ok(())
    }

    fn visit_throw(&mut self) -> Result<(), IrError> {
        self.emit(StackOp::Throw);
        Ok(())
    }

    fn visit_monitor_enter(&mut self) -> Result<(), IrError> {
        self.emit(StackOp::MonitorEnter);
        Ok(())
    }

    fn visit_monitor_exit(&mut self) -> Result<(), IrError> {
        self.emit(StackOp::MonitorExit);
        Ok(())
    }
}
