use crate::ir::{ExprId, RefBody, StmtId};

/// Trait for walking a `RefBody`.
///
/// Override `visit_stmt` or `visit_expr` to act on nodes and call `walk_stmt` /
/// `walk_expr` from them to recurse. The default recursion visits operands in
/// evaluation order: operand 1 before operand 2, receiver before arguments, array
/// before index before stored value.
///
/// # Example
///
/// ```
/// use jvm_ir::ir::{Expr, ExprId, RefBody, RefVisitor, Stmt};
/// use jvm_ir::ops::{BinOp, Constant};
/// use jvm_ir::types::JvmType;
///
/// struct ConstCounter {
///     count: usize,
/// }
///
/// impl RefVisitor for ConstCounter {
///     type Error = ();
///
///     fn visit_expr(&mut self, body: &RefBody, id: ExprId) -> Result<(), ()> {
///         if let Expr::Const(_) = body.expr(id) {
///             self.count += 1;
///         }
///         self.walk_expr(body, id)
///     }
/// }
///
/// let mut body = RefBody::new();
/// let x = body.new_local(Some("x"));
/// let two = body.constant(Constant::Int(2));
/// let three = body.constant(Constant::Int(3));
/// let sum = body.add(Expr::Binary { op: BinOp::Add, ty: JvmType::Int, left: two, right: three });
/// let target = body.local(x, JvmType::Int);
/// body.push(Stmt::Assign { target, value: sum });
/// body.push(Stmt::Return(None));
///
/// let mut counter = ConstCounter { count: 0 };
/// counter.visit_body(&body).unwrap();
/// assert_eq!(counter.count, 2);
/// ```
pub trait RefVisitor {
    type Error;

    fn visit_body(&mut self, body: &RefBody) -> Result<(), Self::Error> {
        for &id in body.code() {
            self.visit_stmt(body, id)?;
        }
        Ok(())
    }

    fn visit_stmt(&mut self, body: &RefBody, id: StmtId) -> Result<(), Self::Error> {
        self.walk_stmt(body, id)
    }

    fn visit_expr(&mut self, body: &RefBody, id: ExprId) -> Result<(), Self::Error> {
        self.walk_expr(body, id)
    }

    /// Visits the root expressions of a statement.
    fn walk_stmt(&mut self, body: &RefBody, id: StmtId) -> Result<(), Self::Error> {
        for e in body.stmt(id).exprs() {
            self.visit_expr(body, e)?;
        }
        Ok(())
    }

    /// Visits the operands of an expression.
    fn walk_expr(&mut self, body: &RefBody, id: ExprId) -> Result<(), Self::Error> {
        for child in body.expr(id).children() {
            self.visit_expr(body, child)?;
        }
        Ok(())
    }
}
