#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::ir::{Cfg, Expr, RefBody, RefLocal, RefTryCatch, Stmt, StmtId};
    use crate::ops::{BinOp, CondOp, Constant, InvokeKind};
    use crate::types::{JvmType, MethodRef};

    fn assign_int(body: &mut RefBody, x: RefLocal, value: i32) -> StmtId {
        let target = body.local(x, JvmType::Int);
        let value = body.constant(Constant::Int(value));
        body.push(Stmt::Assign { target, value })
    }

    fn call(body: &mut RefBody, name: &str) -> StmtId {
        let e = body.add(Expr::Invoke {
            kind: InvokeKind::Static,
            method: MethodRef::new("Foo", name, "()V"),
            receiver: None,
            args: Vec::new(),
        });
        body.push(Stmt::Invoke(e))
    }

    #[test]
    fn loop_blocks_and_edges() {
        let mut body = RefBody::new();
        let x = body.new_local(Some("x"));
        assign_int(&mut body, x, 0);
        let left = body.local(x, JvmType::Int);
        let right = body.constant(Constant::Int(10));
        let test = body.push(Stmt::If {
            cond: CondOp::Ge,
            ty: JvmType::Int,
            left,
            right,
            target: StmtId::PENDING,
        });
        let target = body.local(x, JvmType::Int);
        let l = body.local(x, JvmType::Int);
        let one = body.constant(Constant::Int(1));
        let value = body.add(Expr::Binary { op: BinOp::Add, ty: JvmType::Int, left: l, right: one });
        body.push(Stmt::Assign { target, value });
        body.push(Stmt::Goto(test));
        let result = body.local(x, JvmType::Int);
        let exit = body.push(Stmt::Return(Some(result)));
        if let Stmt::If { target, .. } = body.stmt_mut(test) {
            *target = exit;
        }
        body.validate().unwrap();

        let cfg = Cfg::build(&body).unwrap();
        assert_eq!(cfg.blocks().len(), 4);
        let head = cfg.block_of(1);
        assert_eq!(cfg.blocks()[head].start, 1);
        assert_eq!(cfg.blocks()[head].end, 2);
        let mut preds = cfg.blocks()[head].preds.clone();
        preds.sort();
        assert_eq!(preds, vec![cfg.block_of(0), cfg.block_of(2)]);
        assert_eq!(cfg.block_of(2), cfg.block_of(3));
        assert!(cfg.blocks()[head].succs.contains(&cfg.block_of(4)));
        assert!((0..5).all(|p| cfg.is_reachable(p)));
        assert!(cfg.has_normal_entry(1));
        assert!(cfg.has_normal_entry(3));
    }

    #[test]
    fn late_target_splits_a_block() {
        let mut body = RefBody::new();
        let x = body.new_local(Some("x"));
        assign_int(&mut body, x, 1);
        let second = assign_int(&mut body, x, 2);
        let left = body.local(x, JvmType::Int);
        let right = body.constant(Constant::Int(0));
        body.push(Stmt::If { cond: CondOp::Eq, ty: JvmType::Int, left, right, target: second });
        body.push(Stmt::Return(None));

        let cfg = Cfg::build(&body).unwrap();
        assert_eq!(cfg.blocks().len(), 3);
        assert_ne!(cfg.block_of(0), cfg.block_of(1));
        assert_eq!(cfg.block_of(1), cfg.block_of(2));
        let looped = cfg.block_of(1);
        assert!(cfg.blocks()[looped].preds.contains(&looped));
        assert!(cfg.blocks()[looped].preds.contains(&cfg.block_of(0)));
    }

    #[test]
    fn handler_is_reached_through_its_range() {
        let mut body = RefBody::new();
        let e = body.new_local(Some("e"));
        let start = call(&mut body, "f");
        body.push(Stmt::Return(None));
        let thrown = body.local(e, JvmType::Reference);
        let handler = body.push(Stmt::Throw(thrown));
        body.try_catches.push(RefTryCatch {
            start,
            end: start,
            handler,
            exception: Some("java/io/IOException".to_string()),
            local: e,
        });

        let cfg = Cfg::build(&body).unwrap();
        assert_eq!(cfg.blocks().len(), 3);
        let hb = cfg.block_of(2);
        assert_eq!(cfg.blocks()[cfg.block_of(0)].handlers, vec![hb]);
        assert_eq!(cfg.blocks()[hb].exc_preds, vec![cfg.block_of(0)]);
        assert!(cfg.is_reachable(2));
        assert!(!cfg.has_normal_entry(2));
        assert!(cfg.is_live(0));
    }

    #[test]
    fn unreachable_statements_and_dead_tries() {
        let mut body = RefBody::new();
        let x = body.new_local(Some("x"));
        let e = body.new_local(Some("e"));
        body.push(Stmt::Return(None));
        let dead = assign_int(&mut body, x, 1);
        body.push(Stmt::Return(None));
        let thrown = body.local(e, JvmType::Reference);
        let handler = body.push(Stmt::Throw(thrown));
        body.try_catches.push(RefTryCatch { start: dead, end: dead, handler, exception: None, local: e });

        let cfg = Cfg::build(&body).unwrap();
        assert!(cfg.is_reachable(0));
        assert!(!cfg.is_reachable(1));
        assert!(!cfg.is_reachable(3));
        assert!(!cfg.is_live(0));
        assert_eq!(cfg.live_try_catches().count(), 0);
    }

    #[test]
    fn targets_outside_the_code_are_rejected() {
        let mut body = RefBody::new();
        let orphan = body.add_stmt(Stmt::Return(None));
        body.push(Stmt::Goto(orphan));
        assert_eq!(Cfg::build(&body).unwrap_err().kind(), ErrorKind::UnresolvedTarget);
        assert_eq!(Cfg::build(&RefBody::new()).unwrap_err().kind(), ErrorKind::Malformed);
    }
}
