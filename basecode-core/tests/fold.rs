mod common;

use basecode_ast::{AstBuilder, Operator};
use basecode_core::{fold_constants, ElementKind, Session, SessionOptions};
use basecode_vm::{BlockEntry, Directive};
use common::*;

#[test]
fn arithmetic_literals_fold_into_rodata() {
    // x :: s32 := 2 + 3 * 4;
    let mut b = AstBuilder::new();
    let three = int(&mut b, 3);
    let four = int(&mut b, 4);
    let product = binop(&mut b, three, Operator::Multiply, four);
    let two = int(&mut b, 2);
    let sum = binop(&mut b, two, Operator::Add, product);
    let d = decl(&mut b, "x", Some("s32"), Some(sum), true);
    let m = module(&mut b, vec![d]);

    let mut session = Session::new(SessionOptions::default());
    let asm = session.run(&[m]).expect("compile and emit");

    // no operator elements survive folding
    assert!(session
        .elements
        .find_by_kind(ElementKind::BinaryOperator)
        .is_empty());

    let block = asm.find_block_by_label("x").expect("ro_data entry for x");
    let folded = block.entries.iter().any(|entry| {
        matches!(entry, BlockEntry::Directive(Directive::Dwords(values)) if values == &vec![14])
    });
    assert!(folded, "x must bake to the 4-byte value 14");
}

#[test]
fn size_of_folds_to_integer_literal() {
    let mut b = AstBuilder::new();
    let operand = sym(&mut b, "u32");
    let size_of = call(&mut b, "size_of", vec![operand]);
    let d = decl(&mut b, "x", Some("u32"), Some(size_of), true);
    let m = module(&mut b, vec![d]);

    let mut session = Session::new(SessionOptions::default());
    let asm = session.run(&[m]).expect("compile and emit");

    assert!(session
        .elements
        .find_by_kind(ElementKind::Intrinsic)
        .is_empty());
    let block = asm.find_block_by_label("x").expect("ro_data entry for x");
    let baked = block.entries.iter().any(|entry| {
        matches!(entry, BlockEntry::Directive(Directive::Dwords(values)) if values == &vec![4])
    });
    assert!(baked, "size_of(u32) must bake to 4");
}

#[test]
fn type_of_folds_to_type_literal() {
    let mut b = AstBuilder::new();
    let operand = sym(&mut b, "u32");
    let type_of = call(&mut b, "type_of", vec![operand]);
    let d = decl(&mut b, "t", None, Some(type_of), true);
    let m = module(&mut b, vec![d]);

    let mut session = Session::new(SessionOptions::default());
    session.compile(&[m]).expect("compile");
    assert!(session
        .elements
        .find_by_kind(ElementKind::Intrinsic)
        .is_empty());
    assert_eq!(
        session.elements.find_by_kind(ElementKind::TypeLiteral).len(),
        1
    );
}

#[test]
fn relational_literals_fold_to_booleans() {
    let mut b = AstBuilder::new();
    let two = int(&mut b, 2);
    let three = int(&mut b, 3);
    let less = binop(&mut b, two, Operator::LessThan, three);
    let d = decl(&mut b, "flag", Some("bool"), Some(less), true);
    let m = module(&mut b, vec![d]);

    let mut session = Session::new(SessionOptions::default());
    let asm = session.run(&[m]).expect("compile and emit");

    let block = asm.find_block_by_label("flag").expect("entry for flag");
    let baked = block.entries.iter().any(|entry| {
        matches!(entry, BlockEntry::Directive(Directive::Bytes(values)) if values == &vec![1])
    });
    assert!(baked, "2 < 3 must bake to true");
}

#[test]
fn negative_literals_keep_their_sign() {
    let mut b = AstBuilder::new();
    let five = int(&mut b, 5);
    let eight = int(&mut b, 8);
    let diff = binop(&mut b, five, Operator::Subtract, eight);
    let d = decl(&mut b, "x", Some("s32"), Some(diff), true);
    let m = module(&mut b, vec![d]);

    let mut session = Session::new(SessionOptions::default());
    let asm = session.run(&[m]).expect("compile and emit");

    let block = asm.find_block_by_label("x").expect("entry for x");
    let expected = (-3i32) as u32;
    let baked = block.entries.iter().any(|entry| {
        matches!(entry, BlockEntry::Directive(Directive::Dwords(values)) if values == &vec![expected])
    });
    assert!(baked, "5 - 8 must bake to -3 in two's complement");
}

#[test]
fn refolding_a_folded_tree_is_a_no_op() {
    let mut b = AstBuilder::new();
    let three = int(&mut b, 3);
    let four = int(&mut b, 4);
    let product = binop(&mut b, three, Operator::Multiply, four);
    let d = decl(&mut b, "x", Some("s32"), Some(product), true);
    let m = module(&mut b, vec![d]);

    let mut session = Session::new(SessionOptions::default());
    session.compile(&[m]).expect("compile");

    let len_after_first = session.elements.len();
    fold_constants(&mut session);
    assert_eq!(session.elements.len(), len_after_first);
    assert!(!session.result.is_failed());
}

#[test]
fn division_by_zero_is_left_for_the_runtime() {
    let mut b = AstBuilder::new();
    let one = int(&mut b, 1);
    let zero = int(&mut b, 0);
    let div = binop(&mut b, one, Operator::Divide, zero);
    let d = decl(&mut b, "x", Some("u32"), Some(div), false);
    let m = module(&mut b, vec![d]);

    let mut session = Session::new(SessionOptions::default());
    session.compile(&[m]).expect("compile");
    assert_eq!(
        session
            .elements
            .find_by_kind(ElementKind::BinaryOperator)
            .len(),
        1,
        "1 / 0 must survive folding untouched"
    );
}
