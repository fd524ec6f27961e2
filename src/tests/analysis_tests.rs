#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::ops::{BinOp, CondOp, Constant, InvokeKind};
    use crate::stack::analysis::StackAnalysis;
    use crate::stack::visitor::{StackInsnVisitor, StackInsnWriter};
    use crate::stack::Stack;
    use crate::types::{JvmType, MethodRef};

    fn int(value: i32) -> Constant {
        Constant::Int(value)
    }

    #[test]
    fn code_after_return_is_unreachable() {
        let mut w = StackInsnWriter::new();
        w.visit_const(&int(1)).unwrap();
        w.visit_return(Some(JvmType::Int)).unwrap();
        w.visit_const(&int(2)).unwrap();
        w.visit_return(Some(JvmType::Int)).unwrap();
        let body = w.finish().unwrap();

        let analysis = StackAnalysis::analyze(&body).unwrap();
        assert_eq!(analysis.reachable_count(), 2);
        assert!(analysis.is_reachable(body.code()[1]));
        assert!(analysis.frame_at(2).is_none());
        assert!(!analysis.is_reachable(body.code()[3]));
        assert_eq!(analysis.frame_at(1).unwrap().to_string(), "[INT]");
    }

    #[test]
    fn branches_carry_their_stack() {
        let mut w = StackInsnWriter::new();
        let x = w.new_local(Some("x"));
        let (other, join) = (w.new_label(), w.new_label());
        w.visit_load(JvmType::Int, x).unwrap();
        w.visit_if_zero(CondOp::Ne, JvmType::Int, other).unwrap();
        w.visit_const(&int(1)).unwrap();
        w.visit_goto(join).unwrap();
        w.mark(other).unwrap();
        w.visit_const(&int(2)).unwrap();
        w.mark(join).unwrap();
        w.visit_return(Some(JvmType::Int)).unwrap();
        let body = w.finish().unwrap();

        let analysis = StackAnalysis::analyze(&body).unwrap();
        assert_eq!(analysis.reachable_count(), 6);
        assert!(analysis.frame_at(4).unwrap().is_empty());
        assert_eq!(analysis.frame_at(5).unwrap().to_string(), "[INT]");
    }

    #[test]
    fn join_with_different_depths_is_rejected() {
        let mut w = StackInsnWriter::new();
        let x = w.new_local(Some("x"));
        let join = w.new_label();
        w.visit_const(&int(7)).unwrap();
        w.visit_load(JvmType::Int, x).unwrap();
        w.visit_if_zero(CondOp::Eq, JvmType::Int, join).unwrap();
        w.visit_shuffle(crate::stack::Shuffle::Pop).unwrap();
        w.mark(join).unwrap();
        w.visit_return(None).unwrap();
        let body = w.finish().unwrap();

        let err = StackAnalysis::analyze(&body).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn underflow_and_mismatch_are_reported() {
        let mut w = StackInsnWriter::new();
        w.visit_binary(BinOp::Add, JvmType::Int).unwrap();
        w.visit_return(Some(JvmType::Int)).unwrap();
        let body = w.finish().unwrap();
        let err = StackAnalysis::analyze(&body).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StackUnderflow);
        assert!(err.to_string().contains("for iadd"));

        let mut w = StackInsnWriter::new();
        let x = w.new_local(None);
        w.visit_const(&Constant::Long(1)).unwrap();
        w.visit_store(JvmType::Int, x).unwrap();
        w.visit_return(None).unwrap();
        let body = w.finish().unwrap();
        let err = StackAnalysis::analyze(&body).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn dead_handler_is_not_live() {
        let mut w = StackInsnWriter::new();
        let (start, end, handler) = (w.new_label(), w.new_label(), w.new_label());
        w.visit_return(None).unwrap();
        w.mark(start).unwrap();
        w.visit_nop().unwrap();
        w.mark(end).unwrap();
        w.visit_return(None).unwrap();
        w.mark(handler).unwrap();
        w.visit_shuffle(crate::stack::Shuffle::Pop).unwrap();
        w.visit_return(None).unwrap();
        w.add_try_catch(start, end, handler, Some("java/lang/Exception"));
        let body = w.finish().unwrap();

        let analysis = StackAnalysis::analyze(&body).unwrap();
        assert!(!analysis.is_live(0));
        assert_eq!(analysis.live_try_catches().count(), 0);
        assert!(analysis.frame_at(3).is_none());
        assert_eq!(analysis.reachable_count(), 1);
    }

    #[test]
    fn handler_reachable_only_through_another_handler() {
        let f = MethodRef::new("Foo", "f", "()V");
        let mut w = StackInsnWriter::new();
        let (start, end, outer) = (w.new_label(), w.new_label(), w.new_label());
        let (inner_end, inner) = (w.new_label(), w.new_label());
        // The first block guards the handler of the second.
        w.mark(start).unwrap();
        w.visit_invoke(InvokeKind::Static, &f).unwrap();
        w.mark(end).unwrap();
        w.visit_return(None).unwrap();
        w.mark(outer).unwrap();
        w.visit_invoke(InvokeKind::Static, &f).unwrap();
        w.mark(inner_end).unwrap();
        w.visit_throw().unwrap();
        w.mark(inner).unwrap();
        w.visit_throw().unwrap();
        w.add_try_catch(outer, inner_end, inner, None);
        w.add_try_catch(start, end, outer, None);
        let body = w.finish().unwrap();

        let analysis = StackAnalysis::analyze(&body).unwrap();
        assert!(analysis.is_live(0));
        assert!(analysis.is_live(1));
        assert_eq!(analysis.frame_at(2), Some(&Stack::caught_exception()));
        assert_eq!(analysis.frame_at(4), Some(&Stack::caught_exception()));
        assert_eq!(analysis.reachable_count(), 5);
    }

    #[test]
    fn falling_off_the_end_is_malformed() {
        let mut w = StackInsnWriter::new();
        let x = w.new_local(None);
        let top = w.new_label();
        w.mark(top).unwrap();
        w.visit_return(None).unwrap();
        w.visit_load(JvmType::Int, x).unwrap();
        w.visit_if_zero(CondOp::Eq, JvmType::Int, top).unwrap();
        let body = w.finish().unwrap();
        assert_eq!(body.validate().unwrap_err().kind(), ErrorKind::Malformed);
    }
}
