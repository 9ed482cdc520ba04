mod common;

use basecode_ast::{AstBuilder, AstNode, Operator};
use basecode_core::{ElementKind, ElementPayload, Session, SessionOptions};
use basecode_vm::Section;
use common::*;

fn program() -> Vec<AstNode> {
    let mut b = AstBuilder::new();
    let fourteen = int(&mut b, 14);
    let constant = decl(&mut b, "ruler", Some("s32"), Some(fourteen), true);
    let zero = int(&mut b, 0);
    let counter = decl(&mut b, "counter", Some("u64"), Some(zero), false);

    let one = int(&mut b, 1);
    let local = decl(&mut b, "scratch", Some("s32"), Some(one), false);
    let lhs = sym(&mut b, "scratch");
    let rhs = sym(&mut b, "a");
    let sum = binop(&mut b, lhs, Operator::Add, rhs);
    let ret = b.return_node(Some(sum), s());
    let bump = proc_decl(&mut b, "bump", vec![("a", "s32"), ("b", "s32")], Some("s32"), vec![local, ret]);

    let x = int(&mut b, 2);
    let y = int(&mut b, 3);
    let call_expr = call(&mut b, "bump", vec![x, y]);
    let result = decl(&mut b, "result", None, Some(call_expr), false);

    vec![module(&mut b, vec![constant, counter, bump, result])]
}

fn identifier_by_name(session: &Session, name: &str) -> Option<basecode_core::ElementId> {
    session
        .elements
        .find_by_kind(ElementKind::Identifier)
        .into_iter()
        .find(|id| {
            matches!(
                &session.elements.expect(*id).payload,
                ElementPayload::Identifier { symbol, .. } if symbol.name == name
            )
        })
}

#[test]
fn rebuilding_the_plan_is_deterministic() {
    let modules = program();
    let mut session = Session::new(SessionOptions::default());
    session.compile(&modules).expect("compile");

    let first = session.plan_variables();
    let second = session.plan_variables();

    let a: Vec<_> = first.plans().cloned().collect();
    let b: Vec<_> = second.plans().cloned().collect();
    assert_eq!(a, b, "labels and frame offsets must be reproducible");
}

#[test]
fn parameters_sit_above_the_frame_and_locals_below() {
    let modules = program();
    let mut session = Session::new(SessionOptions::default());
    session.compile(&modules).expect("compile");
    let plan = session.plan_variables();

    let a = identifier_by_name(&session, "a").expect("param a");
    let b = identifier_by_name(&session, "b").expect("param b");
    let scratch = identifier_by_name(&session, "scratch").expect("local");

    assert_eq!(plan.plan(a).unwrap().frame_offset, Some(24));
    assert_eq!(plan.plan(b).unwrap().frame_offset, Some(32));
    assert_eq!(plan.plan(scratch).unwrap().frame_offset, Some(-8));

    // frame residents never join a section
    assert_eq!(plan.plan(a).unwrap().section, None);
    assert_eq!(plan.plan(scratch).unwrap().section, None);
}

#[test]
fn module_variables_split_by_constness() {
    let modules = program();
    let mut session = Session::new(SessionOptions::default());
    session.compile(&modules).expect("compile");
    let plan = session.plan_variables();

    let ruler = identifier_by_name(&session, "ruler").unwrap();
    let counter = identifier_by_name(&session, "counter").unwrap();
    let result = identifier_by_name(&session, "result").unwrap();

    assert_eq!(plan.plan(ruler).unwrap().section, Some(Section::RoData));
    assert_eq!(plan.plan(counter).unwrap().section, Some(Section::Data));
    assert_eq!(plan.plan(result).unwrap().section, Some(Section::Data));
    assert_eq!(plan.plan(ruler).unwrap().label, "ruler");
}

#[test]
fn emitting_does_not_disturb_the_plan() {
    let modules = program();
    let mut session = Session::new(SessionOptions::default());
    session.compile(&modules).expect("compile");
    let before: Vec<_> = session.plan_variables().plans().cloned().collect();

    session.finalize().expect("emit");
    let after: Vec<_> = session.plan_variables().plans().cloned().collect();
    assert_eq!(before, after);
}
