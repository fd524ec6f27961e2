//! Ref IR to stack IR.
//!
//! Expression trees are emitted depth first, operands before their operator, which is
//! already a valid stack order since a tree has no shared nodes. Exception handlers
//! need one extra step: the stack IR hands the exception over on top of the stack,
//! while each ref try/catch block names the local that receives it.

use crate::convert::{collect_ranges, Bound, ConversionContext, Options, Site, UnitTable};
use crate::error::{IrError, ResultExt};
use crate::ir::{Cfg, Expr, ExprId, RefBody, RefLocal, RefVisitor, Stmt, StmtId};
use crate::ops::{BinOp, Constant, LocalVariable};
use crate::stack::visitor::{Label, StackInsnVisitor, StackInsnWriter};
use crate::stack::{Shuffle, StackBody, StackLocal, StackTryCatch};
use crate::types::JvmType;
use log::{debug, trace, warn};
use num_traits::ToPrimitive;

/// Lowers `source` with the default options.
pub fn convert(source: &RefBody) -> Result<StackBody, IrError> {
    convert_with(source, Options::default())
}

pub fn convert_with(source: &RefBody, options: Options) -> Result<StackBody, IrError> {
    BodyConverter::new(source, options)
        .and_then(|c| c.convert())
        .context(|| format!("ref body of {} statements", source.len()))
}

/// The amount `local` changes by if `value` has the shape `local + k`, `k + local` or
/// `local - k` for an int literal `k` that fits an increment instruction.
fn increment_amount(body: &RefBody, local: RefLocal, value: ExprId) -> Option<i32> {
    let (op, left, right) = match body.expr(value) {
        Expr::Binary { op, ty: JvmType::Int, left, right } => (*op, *left, *right),
        _ => return None,
    };
    let is_local = |e: ExprId| body.expr(e).as_local() == Some(local);
    let literal = |e: ExprId| body.expr(e).as_const().and_then(Constant::as_int);
    let amount = match op {
        BinOp::Add if is_local(left) => literal(right),
        BinOp::Add if is_local(right) => literal(left),
        BinOp::Sub if is_local(left) => literal(right).and_then(|k| k.checked_neg()),
        _ => None,
    }?;
    amount.to_i16().map(|_| amount)
}

/// Whether `e` is the literal an `IfZero` compares against implicitly.
fn is_zero_literal(body: &RefBody, e: ExprId, ty: JvmType) -> bool {
    match (body.expr(e), ty) {
        (Expr::Const(Constant::Int(0)), JvmType::Int) => true,
        (Expr::Const(Constant::Null), JvmType::Reference) => true,
        _ => false,
    }
}

/// Emits the instructions for ref statements and expressions into a `StackInsnWriter`.
pub struct RefInsnReader<'w> {
    writer: &'w mut StackInsnWriter,
    locals: &'w mut ConversionContext<usize, RefLocal, StackLocal>,
    /// Label of each statement, by code position.
    labels: &'w [Label],
    positions: Vec<Option<usize>>,
    options: Options,
}

impl<'w> RefInsnReader<'w> {
    fn local(&mut self, body: &RefBody, local: RefLocal) -> StackLocal {
        let writer = &mut *self.writer;
        let name = body.local_info(local).name.clone();
        self.locals.map_local(local, || writer.new_local(name.as_deref()))
    }

    fn label(&self, id: StmtId) -> Result<Label, IrError> {
        match self.positions.get(id.index()).copied().flatten() {
            Some(pos) => Ok(self.labels[pos]),
            None => fail!(UnresolvedTarget, "{} is not in the code", id),
        }
    }

    fn assign(&mut self, body: &RefBody, target: ExprId, value: ExprId) -> Result<(), IrError> {
        match body.expr(target) {
            Expr::Local { local, ty } => {
                let (local, ty) = (*local, *ty);
                let slot = self.local(body, local);
                if self.options.increments && ty == JvmType::Int {
                    if let Some(amount) = increment_amount(body, local, value) {
                        trace!("increment of {} by {}", local, amount);
                        return self.writer.visit_increment(slot, amount);
                    }
                }
                self.visit_expr(body, value)?;
                self.writer.visit_store(ty, slot)
            }
            Expr::StaticField(field) => {
                self.visit_expr(body, value)?;
                self.writer.visit_put_field(field, true)
            }
            Expr::InstanceField { object, field } => {
                self.visit_expr(body, *object)?;
                self.visit_expr(body, value)?;
                self.writer.visit_put_field(field, false)
            }
            Expr::ArrayElement { array, index, kind } => {
                self.visit_expr(body, *array)?;
                self.visit_expr(body, *index)?;
                self.visit_expr(body, value)?;
                self.writer.visit_array_store(*kind)
            }
            _ => fail!(Malformed, "assignment to a non-assignable expression"),
        }
    }
}

impl<'w> RefVisitor for RefInsnReader<'w> {
    type Error = IrError;

    fn visit_stmt(&mut self, body: &RefBody, id: StmtId) -> Result<(), IrError> {
        match body.stmt(id) {
            Stmt::Assign { target, value } => self.assign(body, *target, *value),
            Stmt::Invoke(e) => {
                self.visit_expr(body, *e)?;
                match body.type_of(*e)? {
                    Some(ty) if ty.is_wide() => self.writer.visit_shuffle(Shuffle::Pop2),
                    Some(_) => self.writer.visit_shuffle(Shuffle::Pop),
                    None => Ok(()),
                }
            }
            Stmt::Return(None) => self.writer.visit_return(None),
            Stmt::Return(Some(e)) => {
                self.visit_expr(body, *e)?;
                let ty = body.value_type(*e)?;
                self.writer.visit_return(Some(ty))
            }
            Stmt::Throw(e) => {
                self.visit_expr(body, *e)?;
                self.writer.visit_throw()
            }
            Stmt::MonitorEnter(e) => {
                self.visit_expr(body, *e)?;
                self.writer.visit_monitor_enter()
            }
            Stmt::MonitorExit(e) => {
                self.visit_expr(body, *e)?;
                self.writer.visit_monitor_exit()
            }
            Stmt::Goto(target) => {
                let label = self.label(*target)?;
                self.writer.visit_goto(label)
            }
            Stmt::If { cond, ty, left, right, target } => {
                let label = self.label(*target)?;
                self.visit_expr(body, *left)?;
                if is_zero_literal(body, *right, *ty) {
                    self.writer.visit_if_zero(*cond, *ty, label)
                } else {
                    self.visit_expr(body, *right)?;
                    self.writer.visit_if_compare(*cond, *ty, label)
                }
            }
            Stmt::Switch { key, cases, default } => {
                self.visit_expr(body, *key)?;
                let keys: Vec<i32> = cases.iter().map(|(k, _)| *k).collect();
                let targets = cases
                    .iter()
                    .map(|(_, t)| self.label(*t))
                    .collect::<Result<Vec<Label>, IrError>>()?;
                let default = self.label(*default)?;
                self.writer.visit_switch(&keys, &targets, default)
            }
        }
    }

    fn visit_expr(&mut self, body: &RefBody, id: ExprId) -> Result<(), IrError> {
        self.walk_expr(body, id)?;
        match body.expr(id) {
            Expr::Unresolved => fail!(UnresolvedCell, "expression {} was never resolved", id.index()),
            Expr::Const(c) => self.writer.visit_const(c),
            Expr::Local { local, ty } => {
                let slot = self.local(body, *local);
                self.writer.visit_load(*ty, slot)
            }
            Expr::StaticField(field) => self.writer.visit_get_field(field, true),
            Expr::InstanceField { field, .. } => self.writer.visit_get_field(field, false),
            Expr::ArrayElement { kind, .. } => self.writer.visit_array_load(*kind),
            Expr::Binary { op, ty, .. } => self.writer.visit_binary(*op, *ty),
            Expr::Neg { ty, .. } => self.writer.visit_neg(*ty),
            Expr::Convert { from, to, .. } => self.writer.visit_convert(*from, to),
            Expr::Compare { kind, .. } => self.writer.visit_compare(*kind),
            Expr::CheckCast { ty, .. } => self.writer.visit_check_cast(ty),
            Expr::InstanceOf { ty, .. } => self.writer.visit_instance_of(ty),
            Expr::ArrayLength(_) => self.writer.visit_array_length(),
            Expr::New(class) => self.writer.visit_new(class),
            Expr::NewArray { elem, .. } => self.writer.visit_new_array(elem),
            Expr::NewMultiArray { ty, dims } => {
                let count = match u8::try_from(dims.len()) {
                    Ok(count) => count,
                    Err(_) => fail!(Malformed, "array of {} dimensions", dims.len()),
                };
                self.writer.visit_new_multi_array(ty, count)
            }
            Expr::Invoke { kind, method, .. } => self.writer.visit_invoke(*kind, method),
            Expr::InvokeDynamic { name, descriptor, bootstrap, bootstrap_args, .. } => {
                self.writer.visit_invoke_dynamic(name, descriptor, bootstrap, bootstrap_args)
            }
        }
    }
}

/// How the exception reaches the local of each try/catch block sharing a handler.
#[derive(Debug)]
enum HandlerEntry {
    /// A single store in front of the handler itself.
    Direct(RefLocal),
    /// One store-and-jump per distinct local, appended after the code.
    Trampolines(Vec<(RefLocal, Label)>),
}

/// Lays out a ref body as stack instructions.
pub struct BodyConverter<'a> {
    source: &'a RefBody,
    cfg: Cfg,
    options: Options,
}

impl<'a> BodyConverter<'a> {
    pub fn new(source: &'a RefBody, options: Options) -> Result<Self, IrError> {
        source.validate()?;
        let cfg = Cfg::build(source)?;
        Ok(BodyConverter { source, cfg, options })
    }

    pub fn convert(self) -> Result<StackBody, IrError> {
        let source = self.source;
        let len = source.len();
        let positions = source.positions();
        let pos_of = |id: StmtId| -> Result<usize, IrError> {
            match positions.get(id.index()).copied().flatten() {
                Some(pos) => Ok(pos),
                None => fail!(UnresolvedTarget, "{} is not in the code", id),
            }
        };

        let mut writer = StackInsnWriter::new();
        let mut ctx: ConversionContext<usize, RefLocal, StackLocal> = ConversionContext::new();
        if let Some(this) = source.this_local {
            let name = source.local_info(this).name.clone();
            let local = ctx.map_local(this, || writer.new_local(name.as_deref()));
            writer.body_mut().this_local = Some(local);
        }
        for &param in &source.params {
            let name = source.local_info(param).name.clone();
            let local = ctx.map_local(param, || writer.new_local(name.as_deref()));
            writer.body_mut().params.push(local);
        }
        let labels: Vec<Label> = (0..len).map(|_| writer.new_label()).collect();

        // Group the live try/catch blocks by handler, in order of first appearance.
        let live: Vec<usize> = self.cfg.live_try_catches().collect();
        let mut groups: Vec<(usize, Vec<usize>)> = Vec::new();
        for &i in &live {
            let handler = pos_of(source.try_catches[i].handler)?;
            match groups.iter_mut().find(|(h, _)| *h == handler) {
                Some((_, members)) => members.push(i),
                None => groups.push((handler, vec![i])),
            }
        }
        let mut entries: Vec<(usize, HandlerEntry)> = Vec::new();
        for (handler, members) in &groups {
            let mut distinct: Vec<RefLocal> = Vec::new();
            for &i in members {
                let local = source.try_catches[i].local;
                if !distinct.contains(&local) {
                    distinct.push(local);
                }
            }
            let entry = if distinct.len() == 1 && !self.cfg.has_normal_entry(*handler) {
                HandlerEntry::Direct(distinct[0])
            } else {
                HandlerEntry::Trampolines(distinct.into_iter().map(|l| (l, writer.new_label())).collect())
            };
            entries.push((*handler, entry));
        }

        let mut table = UnitTable {
            starts: vec![0; len],
            ends: vec![0; len],
            len: 0,
        };
        let mut trampolines: Vec<(RefLocal, Label, usize)> = Vec::new();
        {
            let mut reader = RefInsnReader {
                writer: &mut writer,
                locals: &mut ctx,
                labels: &labels,
                positions: positions.clone(),
                options: self.options,
            };
            for (pos, &id) in source.code().iter().enumerate() {
                reader.writer.mark(labels[pos])?;
                table.starts[pos] = reader.writer.position();
                if self.cfg.is_reachable(pos) {
                    if let Some((_, HandlerEntry::Direct(local))) = entries.iter().find(|(h, _)| *h == pos) {
                        let slot = reader.local(source, *local);
                        reader.writer.visit_store(JvmType::Reference, slot)?;
                    }
                    reader
                        .visit_stmt(source, id)
                        .context(|| format!("statement {} at {}", id, pos))?;
                } else {
                    trace!("skipping unreachable statement {}", id);
                }
                table.ends[pos] = reader.writer.position();
            }
            for (handler, entry) in &entries {
                if let HandlerEntry::Trampolines(locals) = entry {
                    for &(local, label) in locals {
                        reader.writer.mark(label)?;
                        let start = reader.writer.position();
                        let slot = reader.local(source, local);
                        reader.writer.visit_store(JvmType::Reference, slot)?;
                        reader.writer.visit_goto(labels[*handler])?;
                        trampolines.push((local, label, start));
                    }
                }
            }
        }

        // Trampolines are extra units after the statements.
        for &(_, _, start) in &trampolines {
            table.starts.push(start);
            table.ends.push(start + 2);
        }
        for (slot, &i) in live.iter().enumerate() {
            let tc = &source.try_catches[i];
            let handler = pos_of(tc.handler)?;
            let handler_key = match entries.iter().find(|(h, _)| *h == handler) {
                Some((_, HandlerEntry::Trampolines(locals))) => {
                    let label = match locals.iter().find(|(l, _)| *l == tc.local) {
                        Some(&(_, label)) => label,
                        None => unreachable!("no trampoline for {}", tc.local),
                    };
                    match trampolines.iter().position(|(_, l, _)| *l == label) {
                        Some(k) => len + k,
                        None => unreachable!("trampoline for {} was not emitted", tc.local),
                    }
                }
                _ => handler,
            };
            ctx.register(pos_of(tc.start)?, Bound::First, Site::TryStart(slot));
            ctx.register(pos_of(tc.end)?, Bound::Last, Site::TryEnd(slot));
            ctx.register(handler_key, Bound::First, Site::Handler(slot));
        }
        if self.options.local_variables {
            for (j, var) in source.local_variables.iter().enumerate() {
                ctx.register(pos_of(var.start)?, Bound::First, Site::VarStart(j));
                ctx.register(pos_of(var.end)?, Bound::Last, Site::VarEnd(j));
            }
        }

        let mut body = writer.finish()?;
        table.len = body.len();
        let resolved = ctx.resolve(|key, bound| table.lookup(key, bound))?;
        let code = body.code().to_vec();

        let mut handlers = vec![None; live.len()];
        for &(site, pos) in &resolved {
            if let (Site::Handler(slot), Some(p)) = (site, pos) {
                handlers[slot] = Some(code[p]);
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
            match (tries[slot], handlers[slot]) {
                (Some((s, e)), Some(handler)) => body.try_catches.push(StackTryCatch {
                    start: code[s],
                    end: code[e],
                    handler,
                    exception: tc.exception.clone(),
                }),
                _ => warn!("dropping try range {}..{}: it holds no instructions", tc.start, tc.end),
            }
        }
        if live.len() < source.try_catches.len() {
            debug!("dropped {} dead try/catch blocks", source.try_catches.len() - live.len());
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
                match (range, ctx.mapped(var.local)) {
                    (Some((s, e)), Some(local)) => body.local_variables.push(LocalVariable {
                        local,
                        name: var.name.clone(),
                        descriptor: var.descriptor.clone(),
                        signature: var.signature.clone(),
                        start: code[s],
                        end: code[e],
                    }),
                    _ => debug!("dropping range of local {}: it holds no instructions", var.name),
                }
            }
        }

        body.validate()?;
        debug!(
            "ref->stack: {} statements became {} instructions, {} trampolines",
            len,
            body.len(),
            trampolines.len()
        );
        Ok(body)
    }
}
