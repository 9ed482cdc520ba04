mod common;

use basecode_ast::{AstBuilder, Operator};
use basecode_core::{Session, SessionOptions};
use basecode_vm::{Assembler, BasicBlock, OpCode, Operand};
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

#[test]
fn call_pushes_arguments_right_to_left_with_return_slot() {
    let mut b = AstBuilder::new();
    let lhs = sym(&mut b, "a");
    let rhs = sym(&mut b, "b");
    let sum = binop(&mut b, lhs, Operator::Add, rhs);
    let ret = b.return_node(Some(sum), s());
    let add = proc_decl(
        &mut b,
        "add",
        vec![("a", "s32"), ("b", "s32")],
        Some("s32"),
        vec![ret],
    );
    let one = int(&mut b, 1);
    let two = int(&mut b, 2);
    let call_expr = call(&mut b, "add", vec![one, two]);
    let c = decl(&mut b, "c", None, Some(call_expr), false);
    let m = module(&mut b, vec![add, c]);

    let (_, asm) = run(&[m]);

    let prologue = block_with_suffix(&asm, "_prologue");
    let pushes: Vec<u64> = prologue
        .instructions()
        .filter(|i| i.op == OpCode::Push)
        .filter_map(|i| match &i.operands[0] {
            Operand::Imm { value, .. } => Some(*value),
            _ => None,
        })
        .collect();
    assert_eq!(pushes, vec![2, 1], "arguments push right-to-left");

    // the return slot is carved out of the stack last
    let last = prologue.last_instruction().unwrap();
    assert_eq!(last.op, OpCode::Sub);
    assert!(matches!(
        last.operands.as_slice(),
        [Operand::Sp, Operand::Sp, Operand::Imm { value: 8, .. }]
    ));

    // invoke calls the procedure's label
    let invoke = block_with_suffix(&asm, "_invoke");
    let last = invoke.last_instruction().unwrap();
    assert_eq!(last.op, OpCode::Call);

    // epilogue pops the result, then drops both argument slots
    let epilogue = block_with_suffix(&asm, "_epilogue");
    let ops: Vec<OpCode> = epilogue.instructions().map(|i| i.op).collect();
    assert_eq!(ops.first(), Some(&OpCode::Pop));
    assert!(epilogue.instructions().any(|i| {
        i.op == OpCode::Add
            && matches!(
                i.operands.as_slice(),
                [Operand::Sp, Operand::Sp, Operand::Imm { value: 16, .. }]
            )
    }));

    // the callee body exists under its own label
    let body = asm.find_block_by_label("add").expect("procedure body");
    assert!(body.instructions().any(|i| i.op == OpCode::Rts));
    assert!(body
        .instructions()
        .any(|i| i.op == OpCode::Store
            && i.operands.iter().any(|o| matches!(o, Operand::Offset(16)))));
}

#[test]
fn foreign_variadic_call_records_signature() {
    let mut b = AstBuilder::new();

    let fmt_symbol = sym(&mut b, "fmt");
    let fmt_type = ptr_tyid(&mut b, "u8");
    let fmt_decl = b.declaration_node(fmt_symbol, Some(fmt_type), None, false, s());
    let spread = b.spread_parameter_node(s());
    let params = b.parameter_list_node(vec![fmt_decl, spread], s());
    let mut proc = b.proc_expression_node(params, None, None, s());
    proc.is_foreign = true;
    let print = decl(&mut b, "print", None, Some(proc), true);

    let fmt = b.string_literal_node("%d\n", s());
    let value = int(&mut b, 42);
    let c = call(&mut b, "print", vec![fmt, value]);
    let m = module(&mut b, vec![print, c]);

    let (session, asm) = run(&[m]);

    let invoke = block_with_suffix(&asm, "_invoke");
    let last = invoke.last_instruction().unwrap();
    assert_eq!(last.op, OpCode::CallForeign);
    assert_eq!(last.operands.len(), 2, "address plus signature id");

    let address = match &last.operands[0] {
        Operand::Imm { value, .. } => *value,
        other => panic!("expected address operand, got {other:?}"),
    };
    let signature_id = match &last.operands[1] {
        Operand::Imm { value, .. } => *value as u32,
        other => panic!("expected signature operand, got {other:?}"),
    };

    let function = session.ffi.function(address).expect("descriptor");
    assert!(function.variadic);
    let signature = function
        .call_site_signatures
        .get(&signature_id)
        .expect("call-site signature");
    let names: Vec<String> = signature
        .iter()
        .map(|ty| session.types.decl(*ty).name())
        .collect();
    assert_eq!(names, vec!["string".to_string(), "u8".to_string()]);
}

#[test]
fn member_assignment_stores_through_base_and_offset() {
    let mut b = AstBuilder::new();
    let point = struct_decl(&mut b, "point", vec![("x", "s32"), ("y", "s32")]);
    let p = decl(&mut b, "p", Some("point"), None, false);
    let target = member(&mut b, "p", "y");
    let value = int(&mut b, 42);
    let store = b.assignment_node(target, value, s());
    let m = module(&mut b, vec![point, p, store]);

    let (_, asm) = run(&[m]);

    // the module's implicit block stores through (p_address, offset 4)
    let store = asm
        .blocks()
        .iter()
        .flat_map(|blk| blk.instructions())
        .find(|i| i.op == OpCode::Store && i.operands.iter().any(|o| *o == Operand::Offset(4)))
        .expect("store with field offset");
    assert!(matches!(store.operands[1], Operand::Imm { value: 42, .. }));

    // no intermediate byte copy for a scalar field store
    let copies = asm
        .blocks()
        .iter()
        .flat_map(|blk| blk.instructions())
        .filter(|i| i.op == OpCode::Copy)
        .count();
    assert_eq!(copies, 0);
}

#[test]
fn dead_procedures_are_not_emitted() {
    let mut b = AstBuilder::new();
    let used_ret = b.return_node(None, s());
    let used = proc_decl(&mut b, "used", vec![], None, vec![used_ret]);
    let unused_ret = b.return_node(None, s());
    let unused = proc_decl(&mut b, "unused", vec![], None, vec![unused_ret]);
    let c = call(&mut b, "used", vec![]);
    let m = module(&mut b, vec![used, unused, c]);

    let (_, asm) = run(&[m]);
    assert!(asm.find_block_by_label("used").is_some());
    assert!(asm.find_block_by_label("unused").is_none());
}

#[test]
fn interned_strings_share_one_table_entry() {
    let mut b = AstBuilder::new();
    let first = b.string_literal_node("hello", s());
    let d1 = decl(&mut b, "x", None, Some(first), false);
    let second = b.string_literal_node("hello", s());
    let d2 = decl(&mut b, "y", None, Some(second), false);
    let m = module(&mut b, vec![d1, d2]);

    let (session, asm) = run(&[m]);
    assert_eq!(session.interner.len(), 1);
    assert!(asm.find_block_by_label("_intern_str_lit_0").is_some());
    assert!(asm.find_block_by_label("_intern_str_lit_0_data").is_some());
}

#[test]
fn type_table_lists_used_types() {
    let mut b = AstBuilder::new();
    let v = int(&mut b, 3);
    let d = decl(&mut b, "x", Some("s32"), Some(v), true);
    let m = module(&mut b, vec![d]);

    let (session, asm) = run(&[m]);
    assert!(session.types.used_count() > 0);
    assert!(asm.find_block_by_label("_ti_array").is_some());
    assert!(asm.find_block_by_label("_ti_s32").is_some());
}
