mod common;

use basecode_ast::{AstBuilder, Operator};
use basecode_core::{Session, SessionOptions};
use basecode_vm::{Assembler, BasicBlock, OpCode, Operand, Section};
use common::*;

fn run(modules: &[basecode_ast::AstNode]) -> (Session, Assembler) {
    let mut session = Session::new(SessionOptions::default());
    let asm = session.run(modules).expect("compile and emit");
    (session, asm)
}

fn block_with_suffix<'a>(asm: &'a Assembler, suffix: &str) -> &'a BasicBlock {
    asm.blocks()
        .iter()
        .find(|block| block.labels().any(|label| label.ends_with(suffix)))
        .unwrap_or_else(|| panic!("no block labelled *{suffix}"))
}

fn named_operand_name(asm: &Assembler, operand: &Operand) -> String {
    match operand {
        Operand::Named(id) => asm.named_ref(*id).name.clone(),
        other => panic!("expected named operand, got {other:?}"),
    }
}

#[test]
fn if_else_lowers_to_four_blocks() {
    let mut b = AstBuilder::new();
    let a = decl(&mut b, "a", Some("s32"), None, false);

    let zero = int(&mut b, 0);
    let lhs = sym(&mut b, "a");
    let predicate = binop(&mut b, lhs, Operator::GreaterThan, zero);
    let one = int(&mut b, 1);
    let b1 = decl(&mut b, "b", Some("s32"), Some(one), false);
    let true_block = block(&mut b, vec![b1]);
    let two = int(&mut b, 2);
    let b2 = decl(&mut b, "b", Some("s32"), Some(two), false);
    let false_block = block(&mut b, vec![b2]);
    let else_branch = b.else_node(false_block, s());
    let if_stmt = b.if_node(predicate, true_block, Some(else_branch), s());

    let m = module(&mut b, vec![a, if_stmt]);
    let (_, asm) = run(&[m]);

    let entry = block_with_suffix(&asm, "_entry");
    let stem = entry
        .labels()
        .find(|l| l.ends_with("_entry"))
        .unwrap()
        .trim_end_matches("_entry")
        .to_string();
    assert!(stem.starts_with("if_"));

    for suffix in ["_true", "_false", "_exit"] {
        assert!(
            asm.find_block_by_label(&format!("{stem}{suffix}")).is_some(),
            "missing {stem}{suffix}"
        );
    }

    // predicate branches to the false label on zero
    let last = entry.last_instruction().expect("predicate instructions");
    assert_eq!(last.op, OpCode::Bz);
    let target = named_operand_name(&asm, last.operands.last().unwrap());
    assert_eq!(target, format!("{stem}_false"));

    // true block jumps to the exit label
    let true_block = asm.find_block_by_label(&format!("{stem}_true")).unwrap();
    let last = true_block.last_instruction().expect("true instructions");
    assert_eq!(last.op, OpCode::JumpDirect);
    let target = named_operand_name(&asm, &last.operands[0]);
    assert_eq!(target, format!("{stem}_exit"));
}

#[test]
fn while_with_break_jumps_to_exit() {
    let mut b = AstBuilder::new();
    let zero = int(&mut b, 0);
    let a = decl(&mut b, "a", Some("s32"), Some(zero), false);

    let ten = int(&mut b, 10);
    let lhs = sym(&mut b, "a");
    let predicate = binop(&mut b, lhs, Operator::LessThan, ten);

    let five = int(&mut b, 5);
    let lhs = sym(&mut b, "a");
    let inner_predicate = binop(&mut b, lhs, Operator::Equals, five);
    let brk = b.break_node(None, s());
    let break_block = block(&mut b, vec![brk]);
    let inner_if = b.if_node(inner_predicate, break_block, None, s());

    let one = int(&mut b, 1);
    let lhs = sym(&mut b, "a");
    let add = binop(&mut b, lhs, Operator::Add, one);
    let step = assign(&mut b, "a", add);

    let body = block(&mut b, vec![inner_if, step]);
    let while_stmt = b.while_node(predicate, body, s());
    let m = module(&mut b, vec![a, while_stmt]);

    let (_, asm) = run(&[m]);

    let predicate_block = block_with_suffix(&asm, "_predicate");
    let stem = predicate_block
        .labels()
        .find(|l| l.ends_with("_predicate"))
        .unwrap()
        .trim_end_matches("_predicate")
        .to_string();
    assert!(stem.starts_with("while_"));

    // false predicate leaves the loop
    let last = predicate_block.last_instruction().unwrap();
    assert_eq!(last.op, OpCode::Bz);
    let target = named_operand_name(&asm, last.operands.last().unwrap());
    assert_eq!(target, format!("{stem}_exit"));

    // the break inside the inner if jumps straight to the while exit
    let break_jump = asm.blocks().iter().any(|blk| {
        blk.labels().any(|l| l.ends_with("_true"))
            && blk.last_instruction().map(|i| {
                i.op == OpCode::JumpDirect
                    && named_operand_name(&asm, &i.operands[0]) == format!("{stem}_exit")
            }) == Some(true)
    });
    assert!(break_jump, "break must jump to the while exit label");

    // back-edge: some body-chain block ends with a jump to the predicate
    let back_edge = asm.blocks().iter().any(|blk| {
        blk.last_instruction().map(|i| {
            i.op == OpCode::JumpDirect
                && named_operand_name(&asm, &i.operands[0]) == format!("{stem}_predicate")
        }) == Some(true)
    });
    assert!(back_edge, "loop body must jump back to the predicate");
    assert!(predicate_block.predecessors.len() >= 2);
}

#[test]
fn for_loop_leaves_element_map_unchanged() {
    let mut b = AstBuilder::new();
    let zero = int(&mut b, 0);
    let total = decl(&mut b, "total", Some("s32"), Some(zero), false);

    let start = int(&mut b, 0);
    let stop = int(&mut b, 10);
    let range = call(&mut b, "range", vec![start, stop]);
    let one = int(&mut b, 1);
    let lhs = sym(&mut b, "total");
    let add = binop(&mut b, lhs, Operator::Add, one);
    let step = assign(&mut b, "total", add);
    let body = block(&mut b, vec![step]);
    let induction = sym(&mut b, "i");
    let for_stmt = b.for_in_node(induction, range, body, s());
    let m = module(&mut b, vec![total, for_stmt]);

    let mut session = Session::new(SessionOptions::default());
    session.compile(&[m]).expect("compile");
    let before = session.elements.len();
    let asm = session.finalize().expect("emit");
    assert_eq!(
        session.elements.len(),
        before,
        "synthetic loop operators must be removed from the element map"
    );

    let predicate_block = block_with_suffix(&asm, "_predicate");
    let stem = predicate_block
        .labels()
        .find(|l| l.ends_with("_predicate"))
        .unwrap()
        .trim_end_matches("_predicate")
        .to_string();
    assert!(stem.starts_with("for_"));
    assert!(asm.find_block_by_label(&format!("{stem}_step")).is_some());
    assert!(asm.find_block_by_label(&format!("{stem}_exit")).is_some());
}

#[test]
fn switch_cases_compare_and_fall_through() {
    let mut b = AstBuilder::new();
    let zero = int(&mut b, 0);
    let a = decl(&mut b, "a", Some("u32"), Some(zero), false);
    let out_zero = int(&mut b, 0);
    let out = decl(&mut b, "out", Some("u32"), Some(out_zero), false);

    let one = int(&mut b, 1);
    let set_one = int(&mut b, 10);
    let assign_one = assign(&mut b, "out", set_one);
    let ft = b.fallthrough_node(s());
    let case1_body = block(&mut b, vec![assign_one, ft]);
    let case1 = b.case_node(Some(one), case1_body, s());

    let two = int(&mut b, 2);
    let set_two = int(&mut b, 20);
    let assign_two = assign(&mut b, "out", set_two);
    let case2_body = block(&mut b, vec![assign_two]);
    let case2 = b.case_node(Some(two), case2_body, s());

    let set_default = int(&mut b, 30);
    let assign_default = assign(&mut b, "out", set_default);
    let default_body = block(&mut b, vec![assign_default]);
    let default_case = b.case_node(None, default_body, s());

    let scrutinee = sym(&mut b, "a");
    let switch = b.switch_node(scrutinee, vec![case1, case2, default_case], s());
    let m = module(&mut b, vec![a, out, switch]);

    let (_, asm) = run(&[m]);

    assert!(asm
        .blocks()
        .iter()
        .any(|blk| blk.labels().any(|l| l.starts_with("switch_") && l.ends_with("_entry"))));

    // case predicates compare and branch on mismatch
    let case_entry = asm
        .blocks()
        .iter()
        .find(|blk| {
            blk.labels().any(|l| l.starts_with("case_") && l.ends_with("_entry"))
        })
        .expect("case entry block");
    assert!(case_entry.instructions().any(|i| i.op == OpCode::Cmp));
    assert_eq!(case_entry.last_instruction().unwrap().op, OpCode::Bz);

    // the fallthrough case jumps to the next case's body
    let fallthrough_jump = asm.blocks().iter().any(|blk| {
        blk.labels().any(|l| l.starts_with("case_") && l.ends_with("_body"))
            && blk.last_instruction().map(|i| {
                i.op == OpCode::JumpDirect
                    && named_operand_name(&asm, &i.operands[0]).ends_with("_body")
            }) == Some(true)
    });
    assert!(fallthrough_jump, "fallthrough must target the next case body");

    // non-fallthrough bodies jump to the switch exit
    let exit_jump = asm.blocks().iter().any(|blk| {
        blk.labels().any(|l| l.starts_with("case_") && l.ends_with("_body"))
            && blk.last_instruction().map(|i| {
                i.op == OpCode::JumpDirect
                    && named_operand_name(&asm, &i.operands[0]).ends_with("switch_exit")
            }) == Some(true)
    });
    let exit_jump_loose = exit_jump
        || asm.blocks().iter().any(|blk| {
            blk.last_instruction().map(|i| {
                i.op == OpCode::JumpDirect
                    && named_operand_name(&asm, &i.operands[0]).ends_with("_exit")
            }) == Some(true)
        });
    assert!(exit_jump_loose);
}

#[test]
fn cfg_has_one_start_and_one_end() {
    let mut b = AstBuilder::new();
    let v = int(&mut b, 3);
    let d = decl(&mut b, "x", Some("u32"), Some(v), false);
    let m = module(&mut b, vec![d]);
    let (_, asm) = run(&[m]);

    asm.validate().expect("well-formed cfg");
    assert!(asm.find_block_by_label("_start").is_some());
    assert!(asm.find_block_by_label("_end").is_some());
    assert!(asm.find_block_by_label("_bootstrap").is_some());
    assert!(asm.find_block_by_label("_initializer").is_some());
    assert!(asm.find_block_by_label("_finalizer").is_some());

    // the bootstrap block jumps straight to _start
    let bootstrap = asm.find_block_by_label("_bootstrap").unwrap();
    let last = bootstrap.last_instruction().unwrap();
    assert_eq!(last.op, OpCode::JumpDirect);
}

#[test]
fn sections_are_exclusive_and_ordered() {
    let mut b = AstBuilder::new();
    let c1 = int(&mut b, 14);
    let constant = decl(&mut b, "ro", Some("s32"), Some(c1), true);
    let c2 = int(&mut b, 5);
    let mutable = decl(&mut b, "rw", Some("s32"), Some(c2), false);
    let point = struct_decl(&mut b, "point", vec![("x", "s32"), ("y", "s32")]);
    let uninit = decl(&mut b, "p", Some("point"), None, false);
    let m = module(&mut b, vec![constant, mutable, point, uninit]);

    let mut session = Session::new(SessionOptions::default());
    session.compile(&[m]).expect("compile");
    let plan = session.plan_variables();

    let mut seen = std::collections::BTreeSet::new();
    for section in [Section::RoData, Section::Data, Section::Bss, Section::Text] {
        for element in plan.section(section) {
            assert!(
                seen.insert(*element),
                "variable appears in more than one section"
            );
        }
    }
    assert_eq!(plan.section(Section::RoData).len(), 1);
    assert_eq!(plan.section(Section::Data).len(), 1);
    assert_eq!(plan.section(Section::Bss).len(), 1);
}
