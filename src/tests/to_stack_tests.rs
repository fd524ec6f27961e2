#[cfg(test)]
mod tests {
    use crate::convert::{to_stack, Options};
    use crate::error::ErrorKind;
    use crate::ir::{Expr, ExprId, RefBody, RefLocal, RefTryCatch, Stmt, StmtId};
    use crate::ops::{BinOp, CondOp, Constant, InvokeKind};
    use crate::stack::analysis::StackAnalysis;
    use crate::stack::{StackBody, StackOp};
    use crate::types::{FieldRef, JvmType, MethodRef};

    fn int(body: &mut RefBody, value: i32) -> ExprId {
        body.constant(Constant::Int(value))
    }

    fn add(body: &mut RefBody, op: BinOp, left: ExprId, right: ExprId) -> ExprId {
        body.add(Expr::Binary { op, ty: JvmType::Int, left, right })
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

    /// `x := value; return`, with `x` and `y` as int parameters.
    fn assign_x(build: impl FnOnce(&mut RefBody, RefLocal, RefLocal) -> ExprId) -> RefBody {
        let mut body = RefBody::new();
        let x = body.new_local(Some("x"));
        let y = body.new_local(Some("y"));
        body.params = vec![x, y];
        let value = build(&mut body, x, y);
        let target = body.local(x, JvmType::Int);
        body.push(Stmt::Assign { target, value });
        body.push(Stmt::Return(None));
        body
    }

    fn ops(body: &StackBody) -> Vec<StackOp> {
        body.ops().cloned().collect()
    }

    #[test]
    fn increment_idioms() {
        let cases: Vec<(RefBody, i32)> = vec![
            (
                assign_x(|b, x, _| {
                    let l = b.local(x, JvmType::Int);
                    let k = int(b, 5);
                    add(b, BinOp::Add, l, k)
                }),
                5,
            ),
            (
                assign_x(|b, x, _| {
                    let k = int(b, 5);
                    let r = b.local(x, JvmType::Int);
                    add(b, BinOp::Add, k, r)
                }),
                5,
            ),
            (
                assign_x(|b, x, _| {
                    let l = b.local(x, JvmType::Int);
                    let k = int(b, 5);
                    add(b, BinOp::Sub, l, k)
                }),
                -5,
            ),
        ];
        for (body, amount) in cases {
            let out = to_stack::convert(&body).unwrap();
            let x = out.params[0];
            assert_eq!(ops(&out), vec![StackOp::Increment { local: x, amount }, StackOp::Return(None)]);
        }
    }

    #[test]
    fn non_literal_addend_is_not_an_increment() {
        let body = assign_x(|b, x, y| {
            let l = b.local(x, JvmType::Int);
            let r = b.local(y, JvmType::Int);
            add(b, BinOp::Add, l, r)
        });
        let out = to_stack::convert(&body).unwrap();
        let (x, y) = (out.params[0], out.params[1]);
        assert_eq!(
            ops(&out),
            vec![
                StackOp::Load { ty: JvmType::Int, local: x },
                StackOp::Load { ty: JvmType::Int, local: y },
                StackOp::Binary { op: BinOp::Add, ty: JvmType::Int },
                StackOp::Store { ty: JvmType::Int, local: x },
                StackOp::Return(None),
            ]
        );
    }

    #[test]
    fn increment_needs_the_assigned_local_and_a_short_literal() {
        // `5 - x` is not `x - 5`.
        let body = assign_x(|b, x, _| {
            let k = int(b, 5);
            let r = b.local(x, JvmType::Int);
            add(b, BinOp::Sub, k, r)
        });
        let out = to_stack::convert(&body).unwrap();
        assert_eq!(out.len(), 5);

        // `x := y + 1` adds to a different local.
        let body = assign_x(|b, _, y| {
            let l = b.local(y, JvmType::Int);
            let k = int(b, 1);
            add(b, BinOp::Add, l, k)
        });
        assert_eq!(to_stack::convert(&body).unwrap().len(), 5);

        let body = assign_x(|b, x, _| {
            let l = b.local(x, JvmType::Int);
            let k = int(b, 40_000);
            add(b, BinOp::Add, l, k)
        });
        assert_eq!(to_stack::convert(&body).unwrap().len(), 5);

        let body = assign_x(|b, x, _| {
            let l = b.local(x, JvmType::Int);
            let k = int(b, 1);
            add(b, BinOp::Add, l, k)
        });
        let options = Options { increments: false, ..Options::default() };
        let out = to_stack::convert_with(&body, options).unwrap();
        assert!(!ops(&out).iter().any(|op| matches!(op, StackOp::Increment { .. })));
    }

    #[test]
    fn operands_are_emitted_in_evaluation_order() {
        let mut body = RefBody::new();
        let this = body.new_local(Some("this"));
        let arr = body.new_local(Some("arr"));
        body.this_local = Some(this);
        body.params = vec![arr];

        let array = body.local(arr, JvmType::Reference);
        let index = int(&mut body, 0);
        let receiver = body.local(this, JvmType::Reference);
        let arg = int(&mut body, 7);
        let value = body.add(Expr::Invoke {
            kind: InvokeKind::Virtual,
            method: MethodRef::new("Foo", "scale", "(I)I"),
            receiver: Some(receiver),
            args: vec![arg],
        });
        let target = body.add(Expr::ArrayElement { array, index, kind: crate::ops::ArrayKind::Int });
        body.push(Stmt::Assign { target, value });

        let object = body.local(this, JvmType::Reference);
        let field = FieldRef::new("Foo", "count", "I");
        let target = body.add(Expr::InstanceField { object, field: field.clone() });
        let value = int(&mut body, 1);
        body.push(Stmt::Assign { target, value });
        body.push(Stmt::Return(None));

        let out = to_stack::convert(&body).unwrap();
        let (this, arr) = (out.this_local.unwrap(), out.params[0]);
        assert_eq!(
            ops(&out),
            vec![
                StackOp::Load { ty: JvmType::Reference, local: arr },
                StackOp::Const(Constant::Int(0)),
                StackOp::Load { ty: JvmType::Reference, local: this },
                StackOp::Const(Constant::Int(7)),
                StackOp::Invoke { kind: InvokeKind::Virtual, method: MethodRef::new("Foo", "scale", "(I)I") },
                StackOp::ArrayStore(crate::ops::ArrayKind::Int),
                StackOp::Load { ty: JvmType::Reference, local: this },
                StackOp::Const(Constant::Int(1)),
                StackOp::PutField { field, is_static: false },
                StackOp::Return(None),
            ]
        );
        StackAnalysis::analyze(&out).unwrap();
    }

    #[test]
    fn unused_results_are_popped() {
        let mut body = RefBody::new();
        let e = body.add(Expr::Invoke {
            kind: InvokeKind::Static,
            method: MethodRef::new("Foo", "now", "()J"),
            receiver: None,
            args: Vec::new(),
        });
        body.push(Stmt::Invoke(e));
        body.push(Stmt::Return(None));

        let out = to_stack::convert(&body).unwrap();
        assert_eq!(out.op(out.code()[1]), &StackOp::Shuffle(crate::stack::Shuffle::Pop2));
        StackAnalysis::analyze(&out).unwrap();
    }

    #[test]
    fn zero_comparisons_use_if_zero() {
        let mut body = RefBody::new();
        let x = body.new_local(Some("x"));
        let s = body.new_local(Some("s"));
        body.params = vec![x, s];
        let left = body.local(x, JvmType::Int);
        let right = int(&mut body, 0);
        let first = body.push(Stmt::If { cond: CondOp::Lt, ty: JvmType::Int, left, right, target: StmtId::PENDING });
        let left = body.local(s, JvmType::Reference);
        let right = body.constant(Constant::Null);
        let second = body.push(Stmt::If { cond: CondOp::Eq, ty: JvmType::Reference, left, right, target: StmtId::PENDING });
        let left = body.local(x, JvmType::Int);
        let right = int(&mut body, 3);
        let third = body.push(Stmt::If { cond: CondOp::Ne, ty: JvmType::Int, left, right, target: StmtId::PENDING });
        let exit = body.push(Stmt::Return(None));
        for id in [first, second, third] {
            for t in body.stmt_mut(id).targets_mut() {
                *t = exit;
            }
        }

        let out = to_stack::convert(&body).unwrap();
        let ret = out.code()[7];
        let got = ops(&out);
        assert_eq!(got[1], StackOp::IfZero { cond: CondOp::Lt, ty: JvmType::Int, target: ret });
        assert_eq!(got[3], StackOp::IfZero { cond: CondOp::Eq, ty: JvmType::Reference, target: ret });
        assert_eq!(got[6], StackOp::IfCompare { cond: CondOp::Ne, ty: JvmType::Int, target: ret });
        assert_eq!(got.len(), 8);
    }

    #[test]
    fn switch_targets_follow_statements() {
        let mut body = RefBody::new();
        let x = body.new_local(Some("x"));
        body.params = vec![x];
        let key = body.local(x, JvmType::Int);
        let switch = body.push(Stmt::Switch { key, cases: vec![(1, StmtId::PENDING), (5, StmtId::PENDING)], default: StmtId::PENDING });
        let one = int(&mut body, 10);
        let a = body.push(Stmt::Return(Some(one)));
        let five = int(&mut body, 50);
        let b = body.push(Stmt::Return(Some(five)));
        let zero = int(&mut body, 0);
        let c = body.push(Stmt::Return(Some(zero)));
        if let Stmt::Switch { cases, default, .. } = body.stmt_mut(switch) {
            cases[0].1 = a;
            cases[1].1 = b;
            *default = c;
        }

        let out = to_stack::convert(&body).unwrap();
        let code = out.code().to_vec();
        assert_eq!(
            out.op(code[1]),
            &StackOp::Switch { keys: vec![1, 5], targets: vec![code[2], code[4]], default: code[6] }
        );
        StackAnalysis::analyze(&out).unwrap();
    }

    #[test]
    fn single_handler_local_is_stored_in_place() {
        let mut body = RefBody::new();
        let e = body.new_local(Some("e"));
        let start = call(&mut body, "f");
        body.push(Stmt::Return(None));
        let thrown = body.local(e, JvmType::Reference);
        let handler = body.push(Stmt::Throw(thrown));
        body.try_catches.push(RefTryCatch { start, end: start, handler, exception: None, local: e });

        let out = to_stack::convert(&body).unwrap();
        let code = out.code().to_vec();
        assert_eq!(out.len(), 5);
        let stored = match out.op(code[2]) {
            StackOp::Store { ty: JvmType::Reference, local } => *local,
            other => panic!("unexpected handler entry {}", other),
        };
        assert_eq!(out.op(code[3]), &StackOp::Load { ty: JvmType::Reference, local: stored });
        assert_eq!(out.try_catches.len(), 1);
        assert_eq!(out.try_catches[0].start, code[0]);
        assert_eq!(out.try_catches[0].end, code[0]);
        assert_eq!(out.try_catches[0].handler, code[2]);
        StackAnalysis::analyze(&out).unwrap();
    }

    #[test]
    fn handler_with_normal_entry_gets_a_trampoline() {
        let mut body = RefBody::new();
        let e = body.new_local(Some("e"));
        let start = call(&mut body, "f");
        let jump = body.push(Stmt::Goto(StmtId::PENDING));
        let handler = body.push(Stmt::Return(None));
        *body.stmt_mut(jump) = Stmt::Goto(handler);
        body.try_catches.push(RefTryCatch { start, end: start, handler, exception: None, local: e });

        let out = to_stack::convert(&body).unwrap();
        let code = out.code().to_vec();
        assert_eq!(out.len(), 5);
        assert!(matches!(out.op(code[3]), StackOp::Store { ty: JvmType::Reference, .. }));
        assert_eq!(out.op(code[4]), &StackOp::Goto(code[2]));
        assert_eq!(out.try_catches[0].handler, code[3]);
        StackAnalysis::analyze(&out).unwrap();
    }

    #[test]
    fn shared_handler_with_two_locals_gets_two_trampolines() {
        let mut body = RefBody::new();
        let e1 = body.new_local(Some("e1"));
        let e2 = body.new_local(Some("e2"));
        let first = call(&mut body, "f");
        let second = call(&mut body, "g");
        body.push(Stmt::Return(None));
        let handler = call(&mut body, "recover");
        body.push(Stmt::Return(None));
        body.try_catches.push(RefTryCatch { start: first, end: first, handler, exception: None, local: e1 });
        body.try_catches.push(RefTryCatch { start: second, end: second, handler, exception: None, local: e2 });

        let out = to_stack::convert(&body).unwrap();
        let code = out.code().to_vec();
        assert_eq!(out.len(), 9);
        let recover = StackOp::Invoke { kind: InvokeKind::Static, method: MethodRef::new("Foo", "recover", "()V") };
        assert_eq!(ops(&out).iter().filter(|op| **op == recover).count(), 1);

        assert_eq!(out.try_catches.len(), 2);
        let (h1, h2) = (out.try_catches[0].handler, out.try_catches[1].handler);
        assert_eq!((h1, h2), (code[5], code[7]));
        let (l1, l2) = match (out.op(h1), out.op(h2)) {
            (StackOp::Store { local: a, .. }, StackOp::Store { local: b, .. }) => (*a, *b),
            other => panic!("unexpected trampolines {:?}", other),
        };
        assert_ne!(l1, l2);
        assert_eq!(out.local_info(l1).name.as_deref(), Some("e1"));
        assert_eq!(out.local_info(l2).name.as_deref(), Some("e2"));
        assert_eq!(out.op(code[6]), &StackOp::Goto(code[3]));
        assert_eq!(out.op(code[8]), &StackOp::Goto(code[3]));
        assert_eq!(out.try_catches[0].start, code[0]);
        assert_eq!(out.try_catches[1].start, code[1]);

        let analysis = StackAnalysis::analyze(&out).unwrap();
        assert_eq!(analysis.reachable_count(), 9);
    }

    #[test]
    fn unreachable_statements_and_dead_tries_are_dropped() {
        let mut body = RefBody::new();
        let e = body.new_local(Some("e"));
        body.push(Stmt::Return(None));
        let dead = call(&mut body, "dead");
        body.push(Stmt::Return(None));
        let thrown = body.local(e, JvmType::Reference);
        let handler = body.push(Stmt::Throw(thrown));
        body.try_catches.push(RefTryCatch { start: dead, end: dead, handler, exception: None, local: e });

        let out = to_stack::convert(&body).unwrap();
        assert_eq!(ops(&out), vec![StackOp::Return(None)]);
        assert!(out.try_catches.is_empty());
    }

    #[test]
    fn unresolved_expressions_are_rejected() {
        let mut body = RefBody::new();
        let hole = body.add(Expr::Unresolved);
        body.push(Stmt::Return(Some(hole)));
        let err = to_stack::convert(&body).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnresolvedCell);
        assert!(err.to_string().ends_with("ref body of 1 statements"));
    }

    #[test]
    fn shared_expression_nodes_are_rejected() {
        let mut body = RefBody::new();
        let x = body.new_local(Some("x"));
        let shared = body.local(x, JvmType::Int);
        let sum = add(&mut body, BinOp::Add, shared, shared);
        body.push(Stmt::Return(Some(sum)));
        let err = to_stack::convert(&body).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }
}
