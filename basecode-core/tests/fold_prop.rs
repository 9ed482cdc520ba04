mod common;

use basecode_ast::{AstBuilder, AstNode, Operator};
use basecode_core::{fold_constants, resolve_pending, ElementKind, Session, SessionOptions};
use common::*;
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Add,
    Mul,
    Sub,
}

fn expr_from_terms(b: &mut AstBuilder, first: u64, terms: &[(Op, u64)]) -> AstNode {
    let mut expr = int(b, first % 1000);
    for (op, value) in terms {
        let operator = match op {
            Op::Add => Operator::Add,
            Op::Mul => Operator::Multiply,
            Op::Sub => Operator::Subtract,
        };
        let rhs = int(b, value % 1000);
        expr = binop(b, expr, operator, rhs);
    }
    expr
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Add), Just(Op::Mul), Just(Op::Sub)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any chain of literal arithmetic folds to a single literal, and a
    /// second folding pass finds nothing left to do.
    #[test]
    fn constant_chains_fold_to_a_single_literal(
        first in 0u64..1000,
        terms in proptest::collection::vec((op_strategy(), 0u64..1000), 1..6),
    ) {
        let mut b = AstBuilder::new();
        let expr = expr_from_terms(&mut b, first, &terms);
        let d = decl(&mut b, "x", None, Some(expr), true);
        let m = module(&mut b, vec![d]);

        let mut session = Session::new(SessionOptions::default());
        session.compile(&[m]).expect("compile");

        prop_assert!(session
            .elements
            .find_by_kind(ElementKind::BinaryOperator)
            .is_empty());

        let len_after_first = session.elements.len();
        fold_constants(&mut session);
        prop_assert_eq!(session.elements.len(), len_after_first);
        prop_assert!(!session.result.is_failed());
    }

    /// A resolved program stays resolved: running the fixpoint again
    /// leaves the queues empty and reports nothing.
    #[test]
    fn resolver_stays_quiet_after_success(
        value in 0u64..10_000,
    ) {
        let mut b = AstBuilder::new();
        let init = int(&mut b, value);
        let d = decl(&mut b, "x", None, Some(init), false);
        let reference = sym(&mut b, "x");
        let d2 = decl(&mut b, "y", None, Some(reference), false);
        let m = module(&mut b, vec![d, d2]);

        let mut session = Session::new(SessionOptions::default());
        session.compile(&[m]).expect("compile");

        prop_assert_eq!(session.scopes.pending(), 0);
        resolve_pending(&mut session);
        prop_assert_eq!(session.scopes.pending(), 0);
        prop_assert!(!session.result.is_failed());
    }
}
