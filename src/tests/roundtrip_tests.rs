#[cfg(test)]
mod tests {
    use crate::convert::{to_ref, to_stack};
    use crate::ir::{RefVisitor, Stmt};
    use crate::ops::{BinOp, CondOp, Constant, InvokeKind};
    use crate::stack::analysis::StackAnalysis;
    use crate::stack::visitor::{StackInsnVisitor, StackInsnWriter};
    use crate::stack::{StackBody, StackOp};
    use crate::types::{JvmType, MethodRef};

    fn ops(body: &StackBody) -> Vec<StackOp> {
        body.ops().cloned().collect()
    }

    /// Counts statements by kind.
    #[derive(Default)]
    struct Census {
        assigns: usize,
        branches: usize,
        others: usize,
    }

    impl RefVisitor for Census {
        type Error = ();

        fn visit_stmt(&mut self, body: &crate::ir::RefBody, id: crate::ir::StmtId) -> Result<(), ()> {
            match body.stmt(id) {
                Stmt::Assign { .. } => self.assigns += 1,
                Stmt::Goto(_) | Stmt::If { .. } | Stmt::Switch { .. } => self.branches += 1,
                _ => self.others += 1,
            }
            self.walk_stmt(body, id)
        }
    }

    #[test]
    fn straight_line_arithmetic() {
        let mut w = StackInsnWriter::new();
        let x = w.new_local(Some("x"));
        w.visit_const(&Constant::Int(2)).unwrap();
        w.visit_const(&Constant::Int(3)).unwrap();
        w.visit_binary(BinOp::Add, JvmType::Int).unwrap();
        w.visit_store(JvmType::Int, x).unwrap();
        w.visit_load(JvmType::Int, x).unwrap();
        w.visit_return(Some(JvmType::Int)).unwrap();
        let source = w.finish().unwrap();

        let ref_body = to_ref::convert(&source).unwrap();
        let back = to_stack::convert(&ref_body).unwrap();
        assert_eq!(ops(&back), ops(&source));
        assert_eq!(back.local_info(back.code().iter().find_map(|&id| match back.op(id) {
            StackOp::Store { local, .. } => Some(*local),
            _ => None,
        }).unwrap()).name.as_deref(), Some("x"));
    }

    #[test]
    fn counting_loop() {
        let mut w = StackInsnWriter::new();
        let i = w.new_local(Some("i"));
        let (top, done) = (w.new_label(), w.new_label());
        w.visit_const(&Constant::Int(0)).unwrap();
        w.visit_store(JvmType::Int, i).unwrap();
        w.mark(top).unwrap();
        w.visit_load(JvmType::Int, i).unwrap();
        w.visit_const(&Constant::Int(10)).unwrap();
        w.visit_if_compare(CondOp::Ge, JvmType::Int, done).unwrap();
        w.visit_increment(i, 1).unwrap();
        w.visit_goto(top).unwrap();
        w.mark(done).unwrap();
        w.visit_load(JvmType::Int, i).unwrap();
        w.visit_return(Some(JvmType::Int)).unwrap();
        let source = w.finish().unwrap();

        let ref_body = to_ref::convert(&source).unwrap();
        let mut census = Census::default();
        census.visit_body(&ref_body).unwrap();
        assert_eq!((census.assigns, census.branches, census.others), (2, 2, 1));

        let back = to_stack::convert(&ref_body).unwrap();
        assert_eq!(ops(&back), ops(&source));
    }

    #[test]
    fn try_catch_survives_both_directions() {
        let f = MethodRef::new("Foo", "f", "()V");
        let mut w = StackInsnWriter::new();
        let e = w.new_local(Some("e"));
        let (start, end, handler) = (w.new_label(), w.new_label(), w.new_label());
        w.mark(start).unwrap();
        w.visit_invoke(InvokeKind::Static, &f).unwrap();
        w.mark(end).unwrap();
        w.visit_return(None).unwrap();
        w.mark(handler).unwrap();
        w.visit_store(JvmType::Reference, e).unwrap();
        w.visit_load(JvmType::Reference, e).unwrap();
        w.visit_throw().unwrap();
        w.add_try_catch(start, end, handler, Some("java/io/IOException"));
        let source = w.finish().unwrap();

        let ref_body = to_ref::convert(&source).unwrap();
        let back = to_stack::convert(&ref_body).unwrap();
        assert_eq!(back.try_catches.len(), 1);
        let tc = &back.try_catches[0];
        assert_eq!(tc.exception.as_deref(), Some("java/io/IOException"));
        assert_eq!(tc.start, back.code()[0]);
        assert!(matches!(back.op(tc.handler), StackOp::Store { ty: JvmType::Reference, .. }));
        assert_eq!(back.op(back.code()[back.len() - 1]), &StackOp::Throw);

        let analysis = StackAnalysis::analyze(&back).unwrap();
        assert_eq!(analysis.reachable_count(), back.len());
        assert!(analysis.is_live(0));

        // Each trip copies the exception out of the handler's temporary, but the
        // handler structure stays put.
        let again = to_stack::convert(&to_ref::convert(&back).unwrap()).unwrap();
        assert_eq!(again.try_catches.len(), 1);
        assert_eq!(again.len(), back.len() + 2);
        StackAnalysis::analyze(&again).unwrap();
    }

    #[test]
    fn join_round_trips_through_a_temporary() {
        let mut w = StackInsnWriter::new();
        let c = w.new_local(Some("c"));
        w.body_mut().params.push(c);
        let (other, join) = (w.new_label(), w.new_label());
        w.visit_load(JvmType::Int, c).unwrap();
        w.visit_if_zero(CondOp::Ne, JvmType::Int, other).unwrap();
        w.visit_const(&Constant::Int(1)).unwrap();
        w.visit_goto(join).unwrap();
        w.mark(other).unwrap();
        w.visit_const(&Constant::Int(2)).unwrap();
        w.mark(join).unwrap();
        w.visit_return(Some(JvmType::Int)).unwrap();
        let source = w.finish().unwrap();

        let ref_body = to_ref::convert(&source).unwrap();
        let back = to_stack::convert(&ref_body).unwrap();
        let analysis = StackAnalysis::analyze(&back).unwrap();
        assert_eq!(analysis.reachable_count(), back.len());
        let stores = ops(&back).iter().filter(|op| matches!(op, StackOp::Store { .. })).count();
        assert_eq!(stores, 2);
        assert_eq!(back.op(back.code()[back.len() - 1]), &StackOp::Return(Some(JvmType::Int)));
    }
}
