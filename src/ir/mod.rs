//! The ref IR: three-address statements over expression trees, no operand stack.

pub mod cfg;
pub mod expr;
pub mod stmt;
pub mod visit;

pub use cfg::Cfg;
pub use expr::Expr;
pub use stmt::Stmt;
pub use visit::RefVisitor;

use crate::error::IrError;
use crate::ops::{Constant, LocalInfo, LocalVariable};
use crate::types::{JvmType, MethodSignature};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub(crate) u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StmtId(pub(crate) u32);

impl StmtId {
    /// Target of a branch whose destination is not known yet.
    pub(crate) const PENDING: StmtId = StmtId(u32::MAX);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StmtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == StmtId::PENDING {
            write!(f, "S?")
        } else {
            write!(f, "S{}", self.0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefLocal(pub(crate) u32);

impl RefLocal {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RefLocal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A protected range `start..=end` whose exceptions are stored into `local` before
/// control moves to `handler`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefTryCatch {
    pub start: StmtId,
    pub end: StmtId,
    pub handler: StmtId,
    pub exception: Option<String>,
    pub local: RefLocal,
}

#[derive(Debug, Clone, Default)]
pub struct RefBody {
    exprs: Vec<Expr>,
    stmts: Vec<Stmt>,
    code: Vec<StmtId>,
    locals: Vec<LocalInfo>,
    pub this_local: Option<RefLocal>,
    pub params: Vec<RefLocal>,
    pub try_catches: Vec<RefTryCatch>,
    pub local_variables: Vec<LocalVariable<RefLocal, StmtId>>,
}

impl RefBody {
    pub fn new() -> Self {
        RefBody::default()
    }

    pub fn new_local(&mut self, name: Option<&str>) -> RefLocal {
        let local = RefLocal(self.locals.len() as u32);
        self.locals.push(LocalInfo { name: name.map(|n| n.to_string()) });
        local
    }

    pub fn locals(&self) -> &[LocalInfo] {
        &self.locals
    }

    pub fn local_info(&self, local: RefLocal) -> &LocalInfo {
        &self.locals[local.index()]
    }

    pub fn add(&mut self, expr: Expr) -> ExprId {
        self.exprs.push(expr);
        ExprId((self.exprs.len() - 1) as u32)
    }

    pub fn constant(&mut self, value: Constant) -> ExprId {
        self.add(Expr::Const(value))
    }

    pub fn local(&mut self, local: RefLocal, ty: JvmType) -> ExprId {
        self.add(Expr::Local { local, ty })
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id.index()]
    }

    /// Adds a statement to the arena without placing it in the code; see `append`.
    pub fn add_stmt(&mut self, stmt: Stmt) -> StmtId {
        self.stmts.push(stmt);
        StmtId((self.stmts.len() - 1) as u32)
    }

    /// Places an arena statement at the end of the code.
    pub fn append(&mut self, id: StmtId) {
        self.code.push(id);
    }

    pub fn push(&mut self, stmt: Stmt) -> StmtId {
        let id = self.add_stmt(stmt);
        self.append(id);
        id
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.index()]
    }

    pub fn stmt_mut(&mut self, id: StmtId) -> &mut Stmt {
        &mut self.stmts[id.index()]
    }

    /// Statement handles in execution order.
    pub fn code(&self) -> &[StmtId] {
        &self.code
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Code position of every statement, indexed by `StmtId::index`.
    pub fn positions(&self) -> Vec<Option<usize>> {
        let mut positions = vec![None; self.stmts.len()];
        for (pos, id) in self.code.iter().enumerate() {
            positions[id.index()] = Some(pos);
        }
        positions
    }

    /// Stack category of the value `id` evaluates to, `None` for a void invoke.
    pub fn type_of(&self, id: ExprId) -> Result<Option<JvmType>, IrError> {
        let ty = match self.expr(id) {
            Expr::Unresolved => fail!(UnresolvedCell, "expression {} is unresolved", id.0),
            Expr::Const(c) => c.jvm_type(),
            Expr::Local { ty, .. } => *ty,
            Expr::StaticField(field) | Expr::InstanceField { field, .. } => {
                return Ok(field.field_type()?.jvm_type());
            }
            Expr::ArrayElement { kind, .. } => kind.jvm_type(),
            Expr::Binary { ty, .. } | Expr::Neg { ty, .. } => *ty,
            Expr::Convert { to, .. } => return Ok(to.jvm_type()),
            Expr::Compare { .. } | Expr::InstanceOf { .. } | Expr::ArrayLength(_) => JvmType::Int,
            Expr::CheckCast { .. } | Expr::New(_) | Expr::NewArray { .. } | Expr::NewMultiArray { .. } => {
                JvmType::Reference
            }
            Expr::Invoke { method, .. } => return Ok(method.signature()?.result.jvm_type()),
            Expr::InvokeDynamic { descriptor, .. } => {
                return Ok(MethodSignature::from_jni(descriptor)?.result.jvm_type());
            }
        };
        Ok(Some(ty))
    }

    /// Like `type_of`, failing for void.
    pub fn value_type(&self, id: ExprId) -> Result<JvmType, IrError> {
        match self.type_of(id)? {
            Some(ty) => Ok(ty),
            None => fail!(TypeMismatch, "void expression used as a value"),
        }
    }

    /// Drops statements that are not in the code and expressions no statement
    /// reaches, renumbering what is left. References to dropped statements become
    /// dangling and are reported by `validate`.
    pub fn compact(&mut self) {
        let mut stmt_map = vec![StmtId::PENDING; self.stmts.len()];
        for (pos, id) in self.code.iter().enumerate() {
            stmt_map[id.index()] = StmtId(pos as u32);
        }
        let remap = |id: StmtId| stmt_map.get(id.index()).copied().unwrap_or(StmtId::PENDING);

        let mut expr_map: Vec<Option<ExprId>> = vec![None; self.exprs.len()];
        let mut exprs = Vec::new();
        let mut stmts = Vec::with_capacity(self.code.len());
        for &id in &self.code {
            let mut stmt = self.stmts[id.index()].clone();
            for root in stmt.exprs_mut() {
                *root = self.copy_tree(*root, &mut expr_map, &mut exprs);
            }
            for target in stmt.targets_mut() {
                *target = remap(*target);
            }
            stmts.push(stmt);
        }
        for tc in &mut self.try_catches {
            tc.start = remap(tc.start);
            tc.end = remap(tc.end);
            tc.handler = remap(tc.handler);
        }
        for var in &mut self.local_variables {
            var.start = remap(var.start);
            var.end = remap(var.end);
        }
        self.code = (0..stmts.len() as u32).map(StmtId).collect();
        self.stmts = stmts;
        self.exprs = exprs;
    }

    // Copies the tree under `id` into `out`, children first. A node reached twice is
    // mapped once, so sharing survives for `validate` to report.
    fn copy_tree(&self, id: ExprId, map: &mut Vec<Option<ExprId>>, out: &mut Vec<Expr>) -> ExprId {
        if let Some(done) = map[id.index()] {
            return done;
        }
        let mut node = self.exprs[id.index()].clone();
        for child in node.children_mut() {
            *child = self.copy_tree(*child, map, out);
        }
        out.push(node);
        let new_id = ExprId((out.len() - 1) as u32);
        map[id.index()] = Some(new_id);
        new_id
    }

    /// Checks that the body is complete: control never falls off the end, targets and
    /// ranges name statements in the code, assignment targets are assignable, no
    /// placeholder is left, and every expression node has a single parent.
    pub fn validate(&self) -> Result<(), IrError> {
        let last = match self.code.last() {
            Some(&last) => last,
            None => fail!(Malformed, "ref body has no statements"),
        };
        if self.stmt(last).can_continue() {
            fail!(Malformed, "control falls off the end after {}", last);
        }
        let positions = self.positions();
        let pos_of = |id: StmtId| -> Result<usize, IrError> {
            match positions.get(id.index()).copied().flatten() {
                Some(pos) => Ok(pos),
                None => fail!(UnresolvedTarget, "{} is not in the code", id),
            }
        };

        let mut seen = vec![false; self.exprs.len()];
        for &id in &self.code {
            let stmt = self.stmt(id);
            for target in stmt.targets() {
                pos_of(target)?;
            }
            if let Stmt::Assign { target, .. } = stmt {
                if !self.expr(*target).is_assignable() {
                    fail!(Malformed, "{} assigns to a non-assignable expression", id);
                }
            }
            for root in stmt.exprs() {
                self.check_tree(root, &mut seen)?;
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

    fn check_tree(&self, id: ExprId, seen: &mut Vec<bool>) -> Result<(), IrError> {
        match seen.get_mut(id.index()) {
            Some(flag) if *flag => fail!(Malformed, "expression {} has two parents", id.0),
            Some(flag) => *flag = true,
            None => fail!(Malformed, "expression {} does not exist", id.0),
        }
        if let Expr::Unresolved = self.expr(id) {
            fail!(UnresolvedCell, "expression {} was never resolved", id.0);
        }
        for child in self.expr(id).children() {
            self.check_tree(child, seen)?;
        }
        Ok(())
    }
}
