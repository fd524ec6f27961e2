//! Stack-type analysis: the operand stack shape before every reachable instruction,
//! and which try/catch handlers guard reachable code.

use crate::error::{IrError, ResultExt};
use crate::ops::{ArrayKind, BinOp, CompareKind, CondOp, Constant, InvokeKind};
use crate::stack::visitor::StackInsnVisitor;
use crate::stack::{InsnId, Shuffle, Stack, StackBody, StackLocal};
use crate::types::{FieldRef, JvmType, MethodRef, MethodSignature, TypeSignature};
use log::{debug, trace};
use rangemap::RangeInclusiveSet;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct StackAnalysis {
    /// Stack before each instruction, by code position. `None` is dead code.
    frames: Vec<Option<Stack>>,
    positions: Vec<Option<usize>>,
    live: Vec<bool>,
}

impl StackAnalysis {
    pub fn analyze(body: &StackBody) -> Result<StackAnalysis, IrError> {
        if body.is_empty() {
            fail!(Malformed, "stack body has no instructions");
        }
        let mut walker = Walker {
            body,
            positions: body.positions(),
            frames: vec![None; body.len()],
            worklist: VecDeque::new(),
        };
        let mut live = vec![false; body.try_catches.len()];
        walker.worklist.push_back((0, Stack::new()));
        loop {
            walker.run()?;

            // A handler only runs if something it protects runs.
            let mut reachable: RangeInclusiveSet<usize> = RangeInclusiveSet::new();
            for (pos, frame) in walker.frames.iter().enumerate() {
                if frame.is_some() {
                    reachable.insert(pos..=pos);
                }
            }
            let mut grew = false;
            for (i, tc) in body.try_catches.iter().enumerate() {
                if live[i] {
                    continue;
                }
                let start = walker.position(tc.start)?;
                let end = walker.position(tc.end)?;
                if reachable.overlaps(&(start..=end)) {
                    live[i] = true;
                    grew = true;
                    let handler = walker.position(tc.handler)?;
                    walker.worklist.push_back((handler, Stack::caught_exception()));
                }
            }
            if !grew {
                break;
            }
        }

        let analysis = StackAnalysis { frames: walker.frames, positions: walker.positions, live };
        debug!(
            "stack analysis: {} of {} instructions reachable, {} of {} handlers live",
            analysis.frames.iter().filter(|f| f.is_some()).count(),
            analysis.frames.len(),
            analysis.live.iter().filter(|&&l| l).count(),
            analysis.live.len()
        );
        Ok(analysis)
    }

    /// Stack in effect just before `id`, `None` if `id` is unreachable.
    pub fn frame(&self, id: InsnId) -> Option<&Stack> {
        let pos = self.positions.get(id.index()).copied().flatten()?;
        self.frames[pos].as_ref()
    }

    pub fn frame_at(&self, pos: usize) -> Option<&Stack> {
        self.frames.get(pos).and_then(|f| f.as_ref())
    }

    pub fn is_reachable(&self, id: InsnId) -> bool {
        self.frame(id).is_some()
    }

    /// Whether try/catch block `index` protects any reachable instruction.
    pub fn is_live(&self, index: usize) -> bool {
        self.live.get(index).copied().unwrap_or(false)
    }

    /// Indices of the live try/catch blocks, in declaration order.
    pub fn live_try_catches(&self) -> impl Iterator<Item = usize> + '_ {
        self.live.iter().enumerate().filter(|(_, &l)| l).map(|(i, _)| i)
    }

    pub fn reachable_count(&self) -> usize {
        self.frames.iter().filter(|f| f.is_some()).count()
    }
}

struct Walker<'a> {
    body: &'a StackBody,
    positions: Vec<Option<usize>>,
    frames: Vec<Option<Stack>>,
    worklist: VecDeque<(usize, Stack)>,
}

impl<'a> Walker<'a> {
    fn position(&self, id: InsnId) -> Result<usize, IrError> {
        match self.positions.get(id.index()).copied().flatten() {
            Some(pos) => Ok(pos),
            None => fail!(UnresolvedTarget, "{} is not in the code", id),
        }
    }

    fn run(&mut self) -> Result<(), IrError> {
        while let Some((pos, stack)) = self.worklist.pop_front() {
            self.walk(pos, stack)?;
        }
        Ok(())
    }

    /// Follows straight-line code from `pos` until a visited instruction or a
    /// non-continuing one.
    fn walk(&mut self, mut pos: usize, mut stack: Stack) -> Result<(), IrError> {
        let body = self.body;
        let code = body.code();
        loop {
            if let Some(seen) = &self.frames[pos] {
                if *seen != stack {
                    fail!(TypeMismatch, "stack {} meets {} at {}", stack, seen, code[pos]);
                }
                return Ok(());
            }
            self.frames[pos] = Some(stack.clone());
            let id = code[pos];
            trace!("{} {}: {}", stack, id, body.op(id));

            let mut interp = TypeInterpreter { stack, branches: Vec::new() };
            body.accept(id, &mut interp)
                .context(|| format!("{} at {}", body.op(id), id))?;
            stack = interp.stack;
            for target in interp.branches {
                let target = self.position(target)?;
                self.worklist.push_back((target, stack.clone()));
            }
            if !body.op(id).can_continue() {
                return Ok(());
            }
            pos += 1;
            if pos >= code.len() {
                fail!(Malformed, "control falls off the end after {}", id);
            }
        }
    }
}

/// Applies the declared stack effect of one instruction to a `Stack`.
struct TypeInterpreter {
    stack: Stack,
    branches: Vec<InsnId>,
}

impl TypeInterpreter {
    fn push_type(&mut self, ty: &TypeSignature) -> Result<(), IrError> {
        match ty.jvm_type() {
            Some(t) => self.stack.push(t),
            None => fail!(Malformed, "cannot push a value of type {}", ty),
        }
        Ok(())
    }

    fn pop_args(&mut self, sig: &MethodSignature) -> Result<(), IrError> {
        for arg in sig.args.iter().rev() {
            match arg.jvm_type() {
                Some(t) => self.stack.pop_require(t)?,
                None => fail!(Malformed, "void argument"),
            }
        }
        Ok(())
    }

    fn push_result(&mut self, sig: &MethodSignature) {
        if let Some(t) = sig.result.jvm_type() {
            self.stack.push(t);
        }
    }
}

impl StackInsnVisitor for TypeInterpreter {
    type Target = InsnId;

    fn visit_const(&mut self, value: &Constant) -> Result<(), IrError> {
        self.stack.push(value.jvm_type());
        Ok(())
    }

    fn visit_load(&mut self, ty: JvmType, _local: StackLocal) -> Result<(), IrError> {
        self.stack.push(ty);
        Ok(())
    }

    fn visit_store(&mut self, ty: JvmType, _local: StackLocal) -> Result<(), IrError> {
        self.stack.pop_require(ty)
    }

    fn visit_increment(&mut self, _local: StackLocal, _amount: i32) -> Result<(), IrError> {
        Ok(())
    }

    fn visit_shuffle(&mut self, shuffle: Shuffle) -> Result<(), IrError> {
        let stack = &mut self.stack;
        let (_, pushed) = shuffle.apply(&mut || stack.pop(), &|t: &JvmType| t.is_wide())?;
        for t in pushed {
            self.stack.push(t);
        }
        Ok(())
    }

    fn visit_binary(&mut self, op: BinOp, ty: JvmType) -> Result<(), IrError> {
        if !op.accepts(ty) {
            fail!(TypeMismatch, "{} is not defined on {}", op.name(), ty);
        }
        self.stack.pop_require(op.right_type(ty))?;
        self.stack.pop_require(ty)?;
        self.stack.push(ty);
        Ok(())
    }

    fn visit_neg(&mut self, ty: JvmType) -> Result<(), IrError> {
        self.stack.pop_require(ty)?;
        self.stack.push(ty);
        Ok(())
    }

    fn visit_convert(&mut self, from: JvmType, to: &TypeSignature) -> Result<(), IrError> {
        self.stack.pop_require(from)?;
        self.push_type(to)
    }

    fn visit_compare(&mut self, kind: CompareKind) -> Result<(), IrError> {
        self.stack.pop_require(kind.operand_type())?;
        self.stack.pop_require(kind.operand_type())?;
        self.stack.push(JvmType::Int);
        Ok(())
    }

    fn visit_if_zero(&mut self, cond: CondOp, ty: JvmType, target: InsnId) -> Result<(), IrError> {
        if !cond.accepts(ty) {
            fail!(TypeMismatch, "if{} is not defined on {}", cond.name(), ty);
        }
        self.stack.pop_require(ty)?;
        self.branches.push(target);
        Ok(())
    }

    fn visit_if_compare(&mut self, cond: CondOp, ty: JvmType, target: InsnId) -> Result<(), IrError> {
        if !cond.accepts(ty) {
            fail!(TypeMismatch, "if_cmp{} is not defined on {}", cond.name(), ty);
        }
        self.stack.pop_require(ty)?;
        self.stack.pop_require(ty)?;
        self.branches.push(target);
        Ok(())
    }

    fn visit_goto(&mut self, target: InsnId) -> Result<(), IrError> {
        self.branches.push(target);
        Ok(())
    }

    fn visit_switch(&mut self, _keys: &[i32], targets: &[InsnId], default: InsnId) -> Result<(), IrError> {
        self.stack.pop_require(JvmType::Int)?;
        self.branches.extend_from_slice(targets);
        self.branches.push(default);
        Ok(())
    }

    fn visit_new_array(&mut self, _elem: &TypeSignature) -> Result<(), IrError> {
        self.stack.pop_require(JvmType::Int)?;
        self.stack.push(JvmType::Reference);
        Ok(())
    }

    fn visit_new_multi_array(&mut self, _ty: &TypeSignature, dims: u8) -> Result<(), IrError> {
        for _ in 0..dims {
            self.stack.pop_require(JvmType::Int)?;
        }
        self.stack.push(JvmType::Reference);
        Ok(())
    }

    fn visit_array_length(&mut self) -> Result<(), IrError> {
        self.stack.pop_require(JvmType::Reference)?;
        self.stack.push(JvmType::Int);
        Ok(())
    }

    fn visit_array_load(&mut self, kind: ArrayKind) -> Result<(), IrError> {
        self.stack.pop_require(JvmType::Int)?;
        self.stack.pop_require(JvmType::Reference)?;
        self.stack.push(kind.jvm_type());
        Ok(())
    }

    fn visit_array_store(&mut self, kind: ArrayKind) -> Result<(), IrError> {
        self.stack.pop_require(kind.jvm_type())?;
        self.stack.pop_require(JvmType::Int)?;
        self.stack.pop_require(JvmType::Reference)
    }

    fn visit_get_field(&mut self, field: &FieldRef, is_static: bool) -> Result<(), IrError> {
        if !is_static {
            self.stack.pop_require(JvmType::Reference)?;
        }
        self.push_type(&field.field_type()?)
    }

    fn visit_put_field(&mut self, field: &FieldRef, is_static: bool) -> Result<(), IrError> {
        match field.field_type()?.jvm_type() {
            Some(t) => self.stack.pop_require(t)?,
            None => fail!(Malformed, "void field {}", field),
        }
        if !is_static {
            self.stack.pop_require(JvmType::Reference)?;
        }
        Ok(())
    }

    fn visit_invoke(&mut self, kind: InvokeKind, method: &MethodRef) -> Result<(), IrError> {
        let sig = method.signature()?;
        self.pop_args(&sig)?;
        if kind.has_receiver() {
            self.stack.pop_require(JvmType::Reference)?;
        }
        self.push_result(&sig);
        Ok(())
    }

    fn visit_invoke_dynamic(
        &mut self,
        _name: &str,
        descriptor: &str,
        _bootstrap: &MethodRef,
        _bootstrap_args: &[Constant],
    ) -> Result<(), IrError> {
        let sig = MethodSignature::from_jni(descriptor)?;
        self.pop_args(&sig)?;
        self.push_result(&sig);
        Ok(())
    }

    fn visit_new(&mut self, _class: &str) -> Result<(), IrError> {
        self.stack.push(JvmType::Reference);
        Ok(())
    }

    fn visit_check_cast(&mut self, _ty: &TypeSignature) -> Result<(), IrError> {
        self.stack.pop_require(JvmType::Reference)?;
        self.stack.push(JvmType::Reference);
        Ok(())
    }

    fn visit_instance_of(&mut self, _ty: &TypeSignature) -> Result<(), IrError> {
        self.stack.pop_require(JvmType::Reference)?;
        self.stack.push(JvmType::Int);
        Ok(())
    }

    fn visit_return(&mut self, ty: Option<JvmType>) -> Result<(), IrError> {
        match ty {
            Some(t) => self.stack.pop_require(t),
            None => Ok(()),
        }
    }

    fn visit_throw(&mut self) -> Result<(), IrError> {
        self.stack.pop_require(JvmType::Reference)?;
        self.stack.clear();
        self.stack.push(JvmType::Reference);
        Ok(())
    }

    fn visit_monitor_enter(&mut self) -> Result<(), IrError> {
        self.stack.pop_require(JvmType::Reference)
    }

    fn visit_monitor_exit(&mut self) -> Result<(), IrError> {
        self.stack.pop_require(JvmType::Reference)
    }
}
