//! Stack IR to ref IR.
//!
//! The walk simulates the operand stack with `StackValue`s. A value's expression is
//! only placed once the whole body has been walked: a value read exactly once, with
//! nothing observable in between, is inlined into its reader; anything else is
//! stored into a temporary local right where it was produced.

use crate::convert::{collect_ranges, Bound, ConversionContext, Options, Site, UnitTable};
use crate::error::{IrError, ResultExt};
use crate::ir::{Expr, ExprId, RefBody, RefLocal, RefTryCatch, Stmt, StmtId};
use crate::ops::{ArrayKind, BinOp, CompareKind, CondOp, Constant, InvokeKind, LocalVariable};
use crate::stack::analysis::StackAnalysis;
use crate::stack::visitor::StackInsnVisitor;
use crate::stack::{InsnId, Shuffle, StackBody, StackLocal};
use crate::types::{FieldRef, JvmType, MethodRef, MethodSignature, TypeSignature};
use log::{debug, trace, warn};
use std::collections::{HashMap, VecDeque};

/// Lowers `source` with the default options.
pub fn convert(source: &StackBody) -> Result<RefBody, IrError> {
    convert_with(source, Options::default())
}

pub fn convert_with(source: &StackBody, options: Options) -> Result<RefBody, IrError> {
    BodyConverter::new(source, options)
        .and_then(|c| c.convert())
        .context(|| format!("stack body of {} instructions", source.len()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ValueId(usize);

/// A value on the simulated operand stack.
#[derive(Debug)]
struct StackValue {
    ty: JvmType,
    /// The computation, `None` for a caught exception.
    expr: Option<ExprId>,
    /// Code position of the producing instruction.
    producer: Option<usize>,
    /// Placeholder nodes standing for each read of the value.
    consumers: Vec<ExprId>,
    /// Set once the value is spilled.
    local: Option<RefLocal>,
    /// Further locals the value is copied into at its producer.
    copies: Vec<RefLocal>,
    birth: u64,
    is_const: bool,
    pure: bool,
    /// A caught exception whose local was replaced at a join.
    rebound: bool,
    /// Set on the second stack entry a dup family shuffle makes of a value.
    alias_of: Option<ValueId>,
}

/// What a converted instruction saw and did, consulted when a second path reaches it.
#[derive(Debug)]
struct StackDelta {
    entry: Vec<ValueId>,
    popped: usize,
    pushed: Vec<ValueId>,
}

/// One entry of a unit's output, in order.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Stmt(StmtId),
    /// Where a value is evaluated if it is not inlined into its reader.
    Def(ValueId),
}

/// Converts one stack instruction at a time into ref statements.
pub struct RefInsnWriter<'a> {
    source: &'a StackBody,
    body: RefBody,
    ctx: ConversionContext<usize, StackLocal, RefLocal>,
    positions: Vec<Option<usize>>,
    values: Vec<StackValue>,
    units: Vec<Vec<Slot>>,
    stack: Vec<ValueId>,
    branches: Vec<usize>,
    cur: usize,
    /// Bumped whenever something observable is emitted; a value born at an older
    /// sequence number can no longer be inlined.
    seq: u64,
    spills: usize,
}

impl<'a> RefInsnWriter<'a> {
    fn new(source: &'a StackBody) -> Self {
        RefInsnWriter {
            source,
            body: RefBody::new(),
            ctx: ConversionContext::new(),
            positions: source.positions(),
            values: Vec::new(),
            units: vec![Vec::new(); source.len()],
            stack: Vec::new(),
            branches: Vec::new(),
            cur: 0,
            seq: 0,
            spills: 0,
        }
    }

    fn map_local(&mut self, local: StackLocal) -> RefLocal {
        let source = self.source;
        let body = &mut self.body;
        self.ctx
            .map_local(local, || body.new_local(source.local_info(local).name.as_deref()))
    }

    fn temp(&mut self) -> RefLocal {
        self.body.new_local(None)
    }

    fn position(&self, id: InsnId) -> Result<usize, IrError> {
        match self.positions.get(id.index()).copied().flatten() {
            Some(pos) => Ok(pos),
            None => fail!(UnresolvedTarget, "{} is not in the code", id),
        }
    }

    fn new_value(&mut self, value: StackValue) -> ValueId {
        self.values.push(value);
        ValueId(self.values.len() - 1)
    }

    /// A caught exception, already held in a fresh local.
    fn caught_exception(&mut self) -> ValueId {
        let local = self.temp();
        let birth = self.seq;
        self.new_value(StackValue {
            ty: JvmType::Reference,
            expr: None,
            producer: None,
            consumers: Vec::new(),
            local: Some(local),
            copies: Vec::new(),
            birth,
            is_const: false,
            pure: true,
            rebound: false,
            alias_of: None,
        })
    }

    fn produce(&mut self, ty: JvmType, expr: Expr) -> ValueId {
        let is_const = matches!(expr, Expr::Const(_));
        let pure = expr.is_pure();
        let e = self.body.add(expr);
        let vid = self.new_value(StackValue {
            ty,
            expr: Some(e),
            producer: Some(self.cur),
            consumers: Vec::new(),
            local: None,
            copies: Vec::new(),
            birth: self.seq,
            is_const,
            pure,
            rebound: false,
            alias_of: None,
        });
        self.units[self.cur].push(Slot::Def(vid));
        self.stack.push(vid);
        vid
    }

    /// A further stack entry holding the same value as `vid`.
    ///
    /// Each entry can be bound to its own local at a join. A constant keeps its own
    /// copy of the expression; anything else is spilled so the entry can read it back.
    fn duplicate(&mut self, vid: ValueId) -> ValueId {
        let root = self.values[vid.0].alias_of.unwrap_or(vid);
        let (ty, is_const, expr) = {
            let v = &self.values[root.0];
            (v.ty, v.is_const, v.expr)
        };
        let expr = match expr {
            Some(e) if is_const => {
                let node = self.body.expr(e).clone();
                Some(self.body.add(node))
            }
            _ => {
                self.spill(root);
                None
            }
        };
        let birth = self.seq;
        let alias = self.new_value(StackValue {
            ty,
            expr,
            producer: Some(self.cur),
            consumers: Vec::new(),
            local: None,
            copies: Vec::new(),
            birth,
            is_const,
            pure: true,
            rebound: false,
            alias_of: Some(root),
        });
        self.units[self.cur].push(Slot::Def(alias));
        alias
    }

    fn pop_value(&mut self, ty: JvmType) -> Result<ValueId, IrError> {
        let vid = match self.stack.pop() {
            Some(vid) => vid,
            None => fail!(StackUnderflow, "pop from an empty stack"),
        };
        let found = self.values[vid.0].ty;
        if found != ty {
            fail!(TypeMismatch, "expected {} on top of stack, found {}", ty, found);
        }
        Ok(vid)
    }

    /// Records a read of `vid` and returns the placeholder standing for it.
    fn consume(&mut self, vid: ValueId) -> ExprId {
        let cell = self.body.add(Expr::Unresolved);
        let seq = self.seq;
        let v = &mut self.values[vid.0];
        v.consumers.push(cell);
        let fresh = v.consumers.len() == 1 && v.birth == seq;
        if !v.is_const && v.alias_of.is_none() && v.local.is_none() && !fresh {
            self.spill(vid);
        }
        cell
    }

    fn pop(&mut self, ty: JvmType) -> Result<ExprId, IrError> {
        let vid = self.pop_value(ty)?;
        Ok(self.consume(vid))
    }

    fn pop_args(&mut self, sig: &MethodSignature) -> Result<Vec<ExprId>, IrError> {
        let mut args = Vec::with_capacity(sig.args.len());
        for arg in sig.args.iter().rev() {
            match arg.jvm_type() {
                Some(ty) => args.push(self.pop(ty)?),
                None => fail!(Malformed, "void argument"),
            }
        }
        args.reverse();
        Ok(args)
    }

    fn spill(&mut self, vid: ValueId) {
        if self.values[vid.0].local.is_some() {
            return;
        }
        let local = self.temp();
        let v = &mut self.values[vid.0];
        v.local = Some(local);
        trace!("spilling value of {:?} into {}", v.producer, local);
        self.spills += 1;
        if !v.pure {
            self.seq += 1;
        }
    }

    /// A value dropped from the stack. Unless it is pure it will be evaluated as a
    /// statement at its producer.
    fn discard(&mut self, vid: ValueId) {
        if !self.values[vid.0].pure {
            self.seq += 1;
        }
    }

    fn emit(&mut self, stmt: Stmt) -> StmtId {
        let id = self.body.add_stmt(stmt);
        self.units[self.cur].push(Slot::Stmt(id));
        self.seq += 1;
        id
    }

    fn branch(&mut self, stmt: StmtId, index: usize, target: InsnId) -> Result<(), IrError> {
        let pos = self.position(target)?;
        self.ctx.register(pos, Bound::First, Site::Target { at: stmt.index(), index });
        self.branches.push(pos);
        Ok(())
    }

    fn field_type(field: &FieldRef) -> Result<JvmType, IrError> {
        match field.field_type()?.jvm_type() {
            Some(ty) => Ok(ty),
            None => fail!(Malformed, "void field {}", field),
        }
    }

    /// Binds `old` and `new`, which meet in the same stack slot at a join, to one local.
    fn join_values(&mut self, old: ValueId, new: ValueId) -> Result<(), IrError> {
        match (self.values[old.0].local, self.values[new.0].local) {
            (None, None) => {
                let t = self.temp();
                self.values[old.0].local = Some(t);
                self.values[new.0].local = Some(t);
                self.spills += 2;
            }
            (Some(l), None) => self.values[new.0].local = Some(l),
            (None, Some(l)) => self.values[old.0].local = Some(l),
            (Some(a), Some(b)) if a == b => {}
            (Some(a), Some(_)) => {
                let v = &mut self.values[new.0];
                if v.expr.is_none() && v.alias_of.is_none() {
                    if v.rebound {
                        fail!(IncompatibleJoin, "caught exception is needed in two locals");
                    }
                    v.local = Some(a);
                    v.rebound = true;
                } else if !v.copies.contains(&a) {
                    v.copies.push(a);
                }
            }
        }
        Ok(())
    }

    /// Fails if two different values on `stack` would be written to the same local.
    fn check_distinct(&self, stack: &[ValueId]) -> Result<(), IrError> {
        let mut owner: HashMap<RefLocal, ValueId> = HashMap::new();
        for &vid in stack {
            let v = &self.values[vid.0];
            for &l in v.local.iter().chain(v.copies.iter()) {
                match owner.get(&l) {
                    Some(&other) if other != vid => {
                        fail!(IncompatibleJoin, "two live stack values share local {}", l)
                    }
                    Some(_) => {}
                    None => {
                        owner.insert(l, vid);
                    }
                }
            }
        }
        Ok(())
    }

    /// Puts each value's expression where it is read, or a local read if it was spilled.
    fn fill_cells(&mut self, vid: ValueId) {
        let v = &self.values[vid.0];
        let consumers = v.consumers.clone();
        let root_local = v.alias_of.and_then(|root| self.values[root.0].local);
        if let Some(local) = v.local.or(root_local) {
            let ty = v.ty;
            for cell in consumers {
                *self.body.expr_mut(cell) = Expr::Local { local, ty };
            }
            return;
        }
        let e = match v.expr {
            Some(e) => e,
            None => {
                assert!(consumers.is_empty(), "value without an expression was read");
                return;
            }
        };
        match consumers.len() {
            0 => {}
            1 => {
                let node = std::mem::replace(self.body.expr_mut(e), Expr::Unresolved);
                *self.body.expr_mut(consumers[0]) = node;
            }
            _ => {
                assert!(v.is_const, "non-constant value inlined twice");
                let node = self.body.expr(e).clone();
                for cell in consumers {
                    *self.body.expr_mut(cell) = node.clone();
                }
            }
        }
    }

    /// Emits the statements a value needs at its producer.
    fn materialize(&mut self, vid: ValueId) {
        let v = &self.values[vid.0];
        let (ty, local, copies, unread) = (v.ty, v.local, v.copies.clone(), v.consumers.is_empty());
        if let (Some(root), Some(local)) = (v.alias_of, local) {
            let value = match (self.values[root.0].local, v.expr) {
                (Some(from), _) => self.body.local(from, ty),
                (None, Some(e)) => e,
                (None, None) => unreachable!("duplicated value was never spilled"),
            };
            let target = self.body.local(local, ty);
            self.body.push(Stmt::Assign { target, value });
            for copy in copies {
                let target = self.body.local(copy, ty);
                let value = self.body.local(local, ty);
                self.body.push(Stmt::Assign { target, value });
            }
            return;
        }
        let e = match v.expr {
            Some(e) => e,
            None => return,
        };
        if let Some(local) = local {
            let target = self.body.local(local, ty);
            self.body.push(Stmt::Assign { target, value: e });
            for copy in copies {
                let target = self.body.local(copy, ty);
                let value = self.body.local(local, ty);
                self.body.push(Stmt::Assign { target, value });
            }
        } else if unread {
            let node = self.body.expr(e);
            let is_invoke = matches!(node, Expr::Invoke { .. } | Expr::InvokeDynamic { .. });
            let pure = node.is_pure();
            if is_invoke {
                self.body.push(Stmt::Invoke(e));
            } else if !pure {
                let t = self.temp();
                let target = self.body.local(t, ty);
                self.body.push(Stmt::Assign { target, value: e });
            }
        }
    }
}

impl<'a> StackInsnVisitor for RefInsnWriter<'a> {
    type Target = InsnId;

    fn visit_const(&mut self, value: &Constant) -> Result<(), IrError> {
        self.produce(value.jvm_type(), Expr::Const(value.clone()));
        Ok(())
    }

    fn visit_load(&mut self, ty: JvmType, local: StackLocal) -> Result<(), IrError> {
        let local = self.map_local(local);
        self.produce(ty, Expr::Local { local, ty });
        Ok(())
    }

    fn visit_store(&mut self, ty: JvmType, local: StackLocal) -> Result<(), IrError> {
        let value = self.pop(ty)?;
        let local = self.map_local(local);
        let target = self.body.local(local, ty);
        self.emit(Stmt::Assign { target, value });
        Ok(())
    }

    fn visit_increment(&mut self, local: StackLocal, amount: i32) -> Result<(), IrError> {
        let local = self.map_local(local);
        let target = self.body.local(local, JvmType::Int);
        let left = self.body.local(local, JvmType::Int);
        let right = self.body.constant(Constant::Int(amount));
        let value = self.body.add(Expr::Binary { op: BinOp::Add, ty: JvmType::Int, left, right });
        self.emit(Stmt::Assign { target, value });
        Ok(())
    }

    fn visit_shuffle(&mut self, shuffle: Shuffle) -> Result<(), IrError> {
        let (popped, pushed) = {
            let stack = &mut self.stack;
            let values = &self.values;
            shuffle.apply(
                &mut || -> Result<ValueId, IrError> {
                    match stack.pop() {
                        Some(vid) => Ok(vid),
                        None => fail!(StackUnderflow, "{} on a short stack", shuffle.name()),
                    }
                },
                &|v: &ValueId| values[v.0].ty.is_wide(),
            )?
        };
        if shuffle.reorders() {
            for &vid in &popped {
                if !self.values[vid.0].is_const {
                    self.spill(vid);
                }
            }
        } else if pushed.is_empty() {
            for &vid in &popped {
                self.discard(vid);
            }
        }
        let mut seen = Vec::with_capacity(pushed.len());
        for vid in pushed {
            let entry = if seen.contains(&vid) { self.duplicate(vid) } else { vid };
            seen.push(vid);
            self.stack.push(entry);
        }
        Ok(())
    }

    fn visit_binary(&mut self, op: BinOp, ty: JvmType) -> Result<(), IrError> {
        if !op.accepts(ty) {
            fail!(TypeMismatch, "{} is not defined on {}", op.name(), ty);
        }
        let right = self.pop(op.right_type(ty))?;
        let left = self.pop(ty)?;
        self.produce(ty, Expr::Binary { op, ty, left, right });
        Ok(())
    }

    fn visit_neg(&mut self, ty: JvmType) -> Result<(), IrError> {
        let value = self.pop(ty)?;
        self.produce(ty, Expr::Neg { ty, value });
        Ok(())
    }

    fn visit_convert(&mut self, from: JvmType, to: &TypeSignature) -> Result<(), IrError> {
        let ty = match to.jvm_type() {
            Some(ty) => ty,
            None => fail!(Malformed, "conversion to {}", to),
        };
        let value = self.pop(from)?;
        self.produce(ty, Expr::Convert { from, to: to.clone(), value });
        Ok(())
    }

    fn visit_compare(&mut self, kind: CompareKind) -> Result<(), IrError> {
        let right = self.pop(kind.operand_type())?;
        let left = self.pop(kind.operand_type())?;
        self.produce(JvmType::Int, Expr::Compare { kind, left, right });
        Ok(())
    }

    fn visit_if_zero(&mut self, cond: CondOp, ty: JvmType, target: InsnId) -> Result<(), IrError> {
        if !cond.accepts(ty) {
            fail!(TypeMismatch, "if{} is not defined on {}", cond.name(), ty);
        }
        let left = self.pop(ty)?;
        let zero = match ty {
            JvmType::Reference => Constant::Null,
            _ => Constant::Int(0),
        };
        let right = self.body.constant(zero);
        let id = self.emit(Stmt::If { cond, ty, left, right, target: StmtId::PENDING });
        self.branch(id, 0, target)
    }

    fn visit_if_compare(&mut self, cond: CondOp, ty: JvmType, target: InsnId) -> Result<(), IrError> {
        if !cond.accepts(ty) {
            fail!(TypeMismatch, "if_cmp{} is not defined on {}", cond.name(), ty);
        }
        let right = self.pop(ty)?;
        let left = self.pop(ty)?;
        let id = self.emit(Stmt::If { cond, ty, left, right, target: StmtId::PENDING });
        self.branch(id, 0, target)
    }

    fn visit_goto(&mut self, target: InsnId) -> Result<(), IrError> {
        let id = self.emit(Stmt::Goto(StmtId::PENDING));
        self.branch(id, 0, target)
    }

    fn visit_switch(&mut self, keys: &[i32], targets: &[InsnId], default: InsnId) -> Result<(), IrError> {
        if keys.len() != targets.len() {
            fail!(Malformed, "switch has {} keys but {} targets", keys.len(), targets.len());
        }
        let key = self.pop(JvmType::Int)?;
        let cases = keys.iter().map(|&k| (k, StmtId::PENDING)).collect();
        let id = self.emit(Stmt::Switch { key, cases, default: StmtId::PENDING });
        for (i, &target) in targets.iter().enumerate() {
            self.branch(id, i, target)?;
        }
        self.branch(id, targets.len(), default)
    }

    fn visit_new_array(&mut self, elem: &TypeSignature) -> Result<(), IrError> {
        let length = self.pop(JvmType::Int)?;
        self.produce(JvmType::Reference, Expr::NewArray { elem: elem.clone(), length });
        Ok(())
    }

    fn visit_new_multi_array(&mut self, ty: &TypeSignature, dims: u8) -> Result<(), IrError> {
        let mut counts = Vec::with_capacity(dims as usize);
        for _ in 0..dims {
            counts.push(self.pop(JvmType::Int)?);
        }
        counts.reverse();
        self.produce(JvmType::Reference, Expr::NewMultiArray { ty: ty.clone(), dims: counts });
        Ok(())
    }

    fn visit_array_length(&mut self) -> Result<(), IrError> {
        let array = self.pop(JvmType::Reference)?;
        self.produce(JvmType::Int, Expr::ArrayLength(array));
        Ok(())
    }

    fn visit_array_load(&mut self, kind: ArrayKind) -> Result<(), IrError> {
        let index = self.pop(JvmType::Int)?;
        let array = self.pop(JvmType::Reference)?;
        self.produce(kind.jvm_type(), Expr::ArrayElement { array, index, kind });
        Ok(())
    }

    fn visit_array_store(&mut self, kind: ArrayKind) -> Result<(), IrError> {
        let value = self.pop(kind.jvm_type())?;
        let index = self.pop(JvmType::Int)?;
        let array = self.pop(JvmType::Reference)?;
        let target = self.body.add(Expr::ArrayElement { array, index, kind });
        self.emit(Stmt::Assign { target, value });
        Ok(())
    }

    fn visit_get_field(&mut self, field: &FieldRef, is_static: bool) -> Result<(), IrError> {
        let ty = Self::field_type(field)?;
        let expr = if is_static {
            Expr::StaticField(field.clone())
        } else {
            let object = self.pop(JvmType::Reference)?;
            Expr::InstanceField { object, field: field.clone() }
        };
        self.produce(ty, expr);
        Ok(())
    }

    fn visit_put_field(&mut self, field: &FieldRef, is_static: bool) -> Result<(), IrError> {
        let value = self.pop(Self::field_type(field)?)?;
        let target = if is_static {
            self.body.add(Expr::StaticField(field.clone()))
        } else {
            let object = self.pop(JvmType::Reference)?;
            self.body.add(Expr::InstanceField { object, field: field.clone() })
        };
        self.emit(Stmt::Assign { target, value });
        Ok(())
    }

    fn visit_invoke(&mut self, kind: InvokeKind, method: &MethodRef) -> Result<(), IrError> {
        let sig = method.signature()?;
        let args = self.pop_args(&sig)?;
        let receiver = if kind.has_receiver() {
            Some(self.pop(JvmType::Reference)?)
        } else {
            None
        };
        let expr = Expr::Invoke { kind, method: method.clone(), receiver, args };
        match sig.result.jvm_type() {
            Some(ty) => {
                self.produce(ty, expr);
            }
            None => {
                let e = self.body.add(expr);
                self.emit(Stmt::Invoke(e));
            }
        }
        Ok(())
    }

    fn visit_invoke_dynamic(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap: &MethodRef,
        bootstrap_args: &[Constant],
    ) -> Result<(), IrError> {
        let sig = MethodSignature::from_jni(descriptor)?;
        let args = self.pop_args(&sig)?;
        let expr = Expr::InvokeDynamic {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            bootstrap: bootstrap.clone(),
            bootstrap_args: bootstrap_args.to_vec(),
            args,
        };
        match sig.result.jvm_type() {
            Some(ty) => {
                self.produce(ty, expr);
            }
            None => {
                let e = self.body.add(expr);
                self.emit(Stmt::Invoke(e));
            }
        }
        Ok(())
    }

    fn visit_new(&mut self, class: &str) -> Result<(), IrError> {
        self.produce(JvmType::Reference, Expr::New(class.to_string()));
        Ok(())
    }

    fn visit_check_cast(&mut self, ty: &TypeSignature) -> Result<(), IrError> {
        let value = self.pop(JvmType::Reference)?;
        self.produce(JvmType::Reference, Expr::CheckCast { ty: ty.clone(), value });
        Ok(())
    }

    fn visit_instance_of(&mut self, ty: &TypeSignature) -> Result<(), IrError> {
        let value = self.pop(JvmType::Reference)?;
        self.produce(JvmType::Int, Expr::InstanceOf { ty: ty.clone(), value });
        Ok(())
    }

    fn visit_return(&mut self, ty: Option<JvmType>) -> Result<(), IrError> {
        let value = match ty {
            Some(ty) => Some(self.pop(ty)?),
            None => None,
        };
        self.emit(Stmt::Return(value));
        Ok(())
    }

    fn visit_throw(&mut self) -> Result<(), IrError> {
        let value = self.pop(JvmType::Reference)?;
        self.emit(Stmt::Throw(value));
        // The stack a handler sees: only the exception.
        self.stack.clear();
        let birth = self.seq;
        let thrown = self.new_value(StackValue {
            ty: JvmType::Reference,
            expr: None,
            producer: Some(self.cur),
            consumers: Vec::new(),
            local: None,
            copies: Vec::new(),
            birth,
            is_const: false,
            pure: true,
            rebound: false,
            alias_of: None,
        });
        self.stack.push(thrown);
        Ok(())
    }

    fn visit_monitor_enter(&mut self) -> Result<(), IrError> {
        let value = self.pop(JvmType::Reference)?;
        self.emit(Stmt::MonitorEnter(value));
        Ok(())
    }

    fn visit_monitor_exit(&mut self) -> Result<(), IrError> {
        let value = self.pop(JvmType::Reference)?;
        self.emit(Stmt::MonitorExit(value));
        Ok(())
    }
}

/// Drives a `RefInsnWriter` over every reachable instruction of a stack body.
pub struct BodyConverter<'a> {
    source: &'a StackBody,
    analysis: StackAnalysis,
    options: Options,
    writer: RefInsnWriter<'a>,
    deltas: Vec<Option<StackDelta>>,
    /// Live try/catch blocks covering each code position.
    covers: Vec<Vec<usize>>,
    worklist: VecDeque<(usize, Vec<ValueId>)>,
    /// The caught-exception value seeded for each live try/catch block.
    handler_values: Vec<(usize, ValueId)>,
}

impl<'a> BodyConverter<'a> {
    pub fn new(source: &'a StackBody, options: Options) -> Result<Self, IrError> {
        source.validate()?;
        let analysis = StackAnalysis::analyze(source)?;
        let writer = RefInsnWriter::new(source);
        let mut covers = vec![Vec::new(); source.len()];
        for i in analysis.live_try_catches() {
            let tc = &source.try_catches[i];
            let (start, end) = (writer.position(tc.start)?, writer.position(tc.end)?);
            for cover in &mut covers[start..=end] {
                cover.push(i);
            }
        }
        Ok(BodyConverter {
            source,
            analysis,
            options,
            writer,
            deltas: (0..source.len()).map(|_| None).collect(),
            covers,
            worklist: VecDeque::new(),
            handler_values: Vec::new(),
        })
    }

    pub fn convert(mut self) -> Result<RefBody, IrError> {
        let source = self.source;
        if let Some(this) = source.this_local {
            let local = self.writer.map_local(this);
            self.writer.body.this_local = Some(local);
        }
        for &param in &source.params {
            let local = self.writer.map_local(param);
            self.writer.body.params.push(local);
        }

        self.worklist.push_back((0, Vec::new()));
        self.run()?;
        let live: Vec<usize> = self.analysis.live_try_catches().collect();
        for &i in &live {
            let handler = self.writer.position(source.try_catches[i].handler)?;
            let exception = self.writer.caught_exception();
            self.handler_values.push((i, exception));
            self.worklist.push_back((handler, vec![exception]));
        }
        self.run()?;
        self.finish(&live)
    }

    fn run(&mut self) -> Result<(), IrError> {
        while let Some((pos, stack)) = self.worklist.pop_front() {
            self.walk(pos, stack)?;
        }
        Ok(())
    }

    fn walk(&mut self, mut pos: usize, mut stack: Vec<ValueId>) -> Result<(), IrError> {
        let source = self.source;
        let code = source.code();
        let mut prev: Option<usize> = None;
        loop {
            let id = code[pos];
            if !self.analysis.is_reachable(id) {
                fail!(Malformed, "walked into unreachable {}", id);
            }
            if let Some(delta) = &self.deltas[pos] {
                trace!(
                    "join at {}: popped {}, pushed {} on first visit",
                    id,
                    delta.popped,
                    delta.pushed.len()
                );
                let entry = delta.entry.clone();
                return self.merge(&entry, &stack).context(|| format!("join at {}", id));
            }
            if let Some(prev) = prev {
                if self.covers[prev] != self.covers[pos] {
                    self.writer.seq += 1;
                }
            }
            prev = Some(pos);

            self.writer.cur = pos;
            self.writer.stack = stack.clone();
            self.writer.branches.clear();
            trace!("{}: {}", id, source.op(id));
            source
                .accept(id, &mut self.writer)
                .context(|| format!("{} at {}", source.op(id), id))?;

            let after = self.writer.stack.clone();
            let common = stack.iter().zip(&after).take_while(|(a, b)| a == b).count();
            for &target in &self.writer.branches {
                self.worklist.push_back((target, after.clone()));
            }
            self.deltas[pos] = Some(StackDelta {
                popped: stack.len() - common,
                pushed: after[common..].to_vec(),
                entry: stack,
            });
            if !source.op(id).can_continue() {
                return Ok(());
            }
            pos += 1;
            if pos >= code.len() {
                fail!(Malformed, "control falls off the end after {}", id);
            }
            stack = after;
        }
    }

    /// Reconciles the stack a second path brings to an already converted instruction
    /// with the stack of the first visit.
    fn merge(&mut self, old: &[ValueId], new: &[ValueId]) -> Result<(), IrError> {
        if old.len() != new.len() {
            fail!(TypeMismatch, "stack of depth {} meets depth {}", new.len(), old.len());
        }
        for (&o, &n) in old.iter().zip(new) {
            let (ot, nt) = (self.writer.values[o.0].ty, self.writer.values[n.0].ty);
            if ot != nt {
                fail!(TypeMismatch, "{} meets {}", nt, ot);
            }
            if o != n {
                self.writer.join_values(o, n)?;
            }
        }
        self.writer.check_distinct(old)?;
        self.writer.check_distinct(new)
    }

    fn finish(mut self, live: &[usize]) -> Result<RefBody, IrError> {
        let source = self.source;
        let w = &mut self.writer;

        for v in 0..w.values.len() {
            w.fill_cells(ValueId(v));
        }

        let mut table = UnitTable {
            starts: vec![0; source.len()],
            ends: vec![0; source.len()],
            len: 0,
        };
        for pos in 0..source.len() {
            table.starts[pos] = w.body.len();
            for slot in std::mem::take(&mut w.units[pos]) {
                match slot {
                    Slot::Stmt(id) => w.body.append(id),
                    Slot::Def(vid) => w.materialize(vid),
                }
            }
            table.ends[pos] = w.body.len();
        }
        table.len = w.body.len();

        for (slot, &i) in live.iter().enumerate() {
            let tc = &source.try_catches[i];
            let (start, end, handler) = (w.position(tc.start)?, w.position(tc.end)?, w.position(tc.handler)?);
            w.ctx.register(start, Bound::First, Site::TryStart(slot));
            w.ctx.register(end, Bound::Last, Site::TryEnd(slot));
            w.ctx.register(handler, Bound::First, Site::Handler(slot));
        }
        if self.options.local_variables {
            for (j, var) in source.local_variables.iter().enumerate() {
                let (start, end) = (w.position(var.start)?, w.position(var.end)?);
                w.ctx.register(start, Bound::First, Site::VarStart(j));
                w.ctx.register(end, Bound::Last, Site::VarEnd(j));
            }
        }
        let resolved = w.ctx.resolve(|key, bound| table.lookup(key, bound))?;

        let code = w.body.code().to_vec();
        let mut handlers = vec![None; live.len()];
        for &(site, pos) in &resolved {
            match (site, pos) {
                (Site::Target { at, index }, Some(p)) => {
                    *w.body.stmt_mut(StmtId(at as u32)).targets_mut()[index] = code[p];
                }
                (Site::Handler(slot), Some(p)) => handlers[slot] = Some(code[p]),
                _ => {}
            }
        }

        let tries = collect_ranges(
            live.len(),
            &resolved,
            |s| match s {
                Site::TryStart(i) => Some(i),
                _ => None,
            },
            |s| match s {
                Site::TryEnd(i) => Some(i),
                _ => None,
            },
        );
        for (slot, &i) in live.iter().enumerate() {
            let tc = &source.try_catches[i];
            let exception = match self.handler_values.iter().find(|(t, _)| *t == i) {
                Some(&(_, vid)) => vid,
                None => unreachable!("live try/catch {} was never seeded", i),
            };
            let local = match w.values[exception.0].local {
                Some(local) => local,
                None => unreachable!("caught exception without a local"),
            };
            match (tries[slot], handlers[slot]) {
                (Some((s, e)), Some(handler)) => w.body.try_catches.push(RefTryCatch {
                    start: code[s],
                    end: code[e],
                    handler,
                    exception: tc.exception.clone(),
                    local,
                }),
                _ => warn!("dropping try range {}..{}: it holds no statements", tc.start, tc.end),
            }
        }

        if self.options.local_variables {
            let vars = collect_ranges(
                source.local_variables.len(),
                &resolved,
                |s| match s {
                    Site::VarStart(j) => Some(j),
                    _ => None,
                },
                |s| match s {
                    Site::VarEnd(j) => Some(j),
                    _ => None,
                },
            );
            for (var, range) in source.local_variables.iter().zip(vars) {
                match range {
                    Some((s, e)) => {
                        let local = w.map_local(var.local);
                        w.body.local_variables.push(LocalVariable {
                            local,
                            name: var.name.clone(),
                            descriptor: var.descriptor.clone(),
                            signature: var.signature.clone(),
                            start: code[s],
                            end: code[e],
                        });
                    }
                    None => debug!("dropping range of local {}: it holds no statements", var.name),
                }
            }
        }

        let mut body = std::mem::take(&mut w.body);
        body.compact();
        body.validate()?;
        debug!(
            "stack->ref: {} instructions ({} reachable) became {} statements, {} spills, {} try/catch blocks",
            source.len(),
            self.analysis.reachable_count(),
            body.len(),
            w.spills,
            body.try_catches.len()
        );
        Ok(body)
    }
}
