mod common;

use basecode_ast::AstBuilder;
use basecode_core::{
    resolve_pending, ElementKind, ElementPayload, ErrorCode, Session, SessionOptions,
};
use common::*;

fn session() -> Session {
    Session::new(SessionOptions::default())
}

fn identifier_type_name(session: &Session, name: &str) -> Option<String> {
    for id in session.elements.find_by_kind(ElementKind::Identifier) {
        if let ElementPayload::Identifier {
            symbol,
            type_ref: Some(ty),
            ..
        } = &session.elements.expect(id).payload
        {
            if symbol.name == name {
                return Some(session.types.decl(*ty).name());
            }
        }
    }
    None
}

#[test]
fn untyped_declaration_infers_from_initializer() {
    let mut b = AstBuilder::new();
    let init = int(&mut b, 42);
    let d = decl(&mut b, "x", None, Some(init), false);
    let m = module(&mut b, vec![d]);

    let mut session = session();
    session.compile(&[m]).expect("compile");
    assert_eq!(identifier_type_name(&session, "x").as_deref(), Some("u8"));
}

#[test]
fn declared_type_wins_over_narrowing() {
    let mut b = AstBuilder::new();
    let init = int(&mut b, 42);
    let d = decl(&mut b, "x", Some("s32"), Some(init), false);
    let m = module(&mut b, vec![d]);

    let mut session = session();
    session.compile(&[m]).expect("compile");
    assert_eq!(identifier_type_name(&session, "x").as_deref(), Some("s32"));
}

#[test]
fn forward_type_reference_resolves_in_fixpoint() {
    // `p : point;` precedes the declaration of `point`
    let mut b = AstBuilder::new();
    let p = decl(&mut b, "p", Some("point"), None, false);
    let point = struct_decl(&mut b, "point", vec![("x", "s32"), ("y", "s32")]);
    let m = module(&mut b, vec![p, point]);

    let mut session = session();
    session.compile(&[m]).expect("compile");
    assert_eq!(identifier_type_name(&session, "p").as_deref(), Some("point"));
}

#[test]
fn unknown_identifier_reports_p081() {
    let mut b = AstBuilder::new();
    let reference = sym(&mut b, "missing");
    let init = decl(&mut b, "x", None, Some(reference), false);
    let m = module(&mut b, vec![init]);

    let mut session = session();
    let failure = session.compile(&[m]).unwrap_err();
    assert!(failure
        .related
        .iter()
        .any(|message| message.code == ErrorCode::P081));
}

#[test]
fn resolver_is_idempotent_once_resolved() {
    let mut b = AstBuilder::new();
    let init = int(&mut b, 7);
    let d = decl(&mut b, "x", None, Some(init), false);
    let m = module(&mut b, vec![d]);

    let mut session = session();
    session.compile(&[m]).expect("compile");

    assert_eq!(session.scopes.pending(), 0);
    let elements_before = session.elements.len();
    resolve_pending(&mut session);
    assert_eq!(session.scopes.pending(), 0);
    assert_eq!(session.elements.len(), elements_before);
    assert!(!session.result.is_failed());
}

#[test]
fn overload_picks_exact_match() {
    let mut b = AstBuilder::new();
    let narrow = proc_decl(&mut b, "f", vec![("a", "u8")], None, vec![]);
    let wide = proc_decl(&mut b, "f", vec![("a", "u32")], None, vec![]);
    let arg = int(&mut b, 3);
    let c = call(&mut b, "f", vec![arg]);
    let m = module(&mut b, vec![narrow, wide, c]);

    let mut session = session();
    session.compile(&[m]).expect("compile");

    let calls = session.elements.find_by_kind(ElementKind::ProcedureCall);
    assert_eq!(calls.len(), 1);
    let bound = match &session.elements.expect(calls[0]).payload {
        ElementPayload::ProcedureCall { proc_type, .. } => *proc_type,
        _ => None,
    };
    let name = session.types.decl(bound.expect("bound")).name();
    assert!(name.contains("proc(u8)"), "picked {name}");
}

#[test]
fn ambiguous_overload_reports_c077() {
    let mut b = AstBuilder::new();
    let first = proc_decl(&mut b, "f", vec![("a", "u16")], None, vec![]);
    let second = proc_decl(&mut b, "f", vec![("a", "u32")], None, vec![]);
    let arg = int(&mut b, 3);
    let c = call(&mut b, "f", vec![arg]);
    let m = module(&mut b, vec![first, second, c]);

    let mut session = session();
    let failure = session.compile(&[m]).unwrap_err();
    assert!(failure
        .related
        .iter()
        .any(|message| message.code == ErrorCode::C077));
}

#[test]
fn arity_mismatch_reports_no_match() {
    let mut b = AstBuilder::new();
    let f = proc_decl(&mut b, "f", vec![("a", "u8"), ("b", "u8")], None, vec![]);
    let arg = int(&mut b, 1);
    let c = call(&mut b, "f", vec![arg]);
    let m = module(&mut b, vec![f, c]);

    let mut session = session();
    let failure = session.compile(&[m]).unwrap_err();
    assert!(failure
        .related
        .iter()
        .any(|message| message.code == ErrorCode::P081));
}

#[test]
fn intrinsic_arity_is_validated_at_evaluation() {
    let mut b = AstBuilder::new();
    let a = int(&mut b, 1);
    let c = int(&mut b, 2);
    let bad = call(&mut b, "size_of", vec![a, c]);
    let d = decl(&mut b, "x", None, Some(bad), false);
    let m = module(&mut b, vec![d]);

    let mut session = session();
    let failure = session.compile(&[m]).unwrap_err();
    assert!(failure
        .related
        .iter()
        .any(|message| message.code == ErrorCode::P091));
}

#[test]
fn scalar_composite_assignment_mismatch_reports_c074() {
    let mut b = AstBuilder::new();
    let point = struct_decl(&mut b, "point", vec![("x", "s32"), ("y", "s32")]);
    let p = decl(&mut b, "p", Some("point"), None, false);
    let v = int(&mut b, 1);
    let bad = assign(&mut b, "p", v);
    let m = module(&mut b, vec![point, p, bad]);

    let mut session = session();
    let failure = session.compile(&[m]).unwrap_err();
    assert!(failure
        .related
        .iter()
        .any(|message| message.code == ErrorCode::C074));
}
