use basecode_vm::{
    Assembler, CfgError, OpCode, OpSize, Operand, RegisterAllocator, RegisterClass,
};

fn asm_with_entry_points() -> Assembler {
    let mut asm = Assembler::new();
    let start = asm.make_basic_block("_start");
    let end = asm.make_basic_block("_end");
    asm.block_mut(end).exit();
    asm.add_edge(start, end);
    asm
}

#[test]
fn cfg_edges_are_symmetric() {
    let asm = asm_with_entry_points();
    asm.validate().expect("cfg");

    let start = asm.find_block_by_label("_start").unwrap();
    let end = asm.find_block_by_label("_end").unwrap();
    assert!(start.successors.contains(&end.id));
    assert!(end.predecessors.contains(&start.id));
}

#[test]
fn duplicate_labels_fail_validation() {
    let mut asm = asm_with_entry_points();
    asm.make_basic_block("_start");
    let errors = asm.validate().unwrap_err();
    assert!(errors
        .iter()
        .any(|e| matches!(e, CfgError::DuplicateLabel(label) if label == "_start")));
}

#[test]
fn missing_entry_point_fails_validation() {
    let mut asm = Assembler::new();
    asm.make_basic_block("loop");
    let errors = asm.validate().unwrap_err();
    assert!(errors
        .iter()
        .any(|e| matches!(e, CfgError::EntryPointCount { label, .. } if label == "_start")));
}

#[test]
fn terminal_instructions_close_blocks() {
    let mut asm = Assembler::new();
    let id = asm.make_basic_block("body");
    assert!(!asm.block(id).is_terminated());

    let target = asm.label_ref("exit");
    asm.block_mut(id).jump_direct(target);
    assert!(asm.block(id).terminated_by_jump());
    assert!(!asm.block(id).terminated_by_return());

    let other = asm.make_basic_block("tail");
    asm.block_mut(other).rts();
    assert!(asm.block(other).terminated_by_return());
}

#[test]
fn named_refs_are_deduplicated() {
    let mut asm = Assembler::new();
    let a = asm.label_ref("shared");
    let b = asm.label_ref("shared");
    assert_eq!(a, b);
}

#[test]
fn listing_serializes_for_tooling() {
    let mut asm = asm_with_entry_points();
    let start = asm.find_block_by_label("_start").unwrap().id;
    asm.block_mut(start).op(
        OpCode::Move,
        OpSize::Qword,
        vec![Operand::Fp, Operand::Sp],
    );
    let value = serde_json::to_value(&asm).expect("serialize");
    assert!(value.get("blocks").is_some());
    assert!(value.get("named_refs").is_some());
}

#[test]
fn display_renders_labels_and_mnemonics() {
    let mut asm = asm_with_entry_points();
    let start = asm.find_block_by_label("_start").unwrap().id;
    asm.block_mut(start)
        .op(OpCode::Move, OpSize::Qword, vec![Operand::Fp, Operand::Sp]);
    let listing = format!("{asm}");
    assert!(listing.contains("_start:"));
    assert!(listing.contains("move.qw FP, SP"));
    assert!(listing.contains("exit.qw"));
}

#[test]
fn register_pool_exhausts_and_recycles() {
    let mut pool = RegisterAllocator::new();
    let mut held = Vec::new();
    while let Some(reg) = pool.allocate(RegisterClass::Integer, OpSize::Qword) {
        held.push(reg);
    }
    assert_eq!(held.len(), 64);
    assert!(pool.allocate(RegisterClass::Integer, OpSize::Qword).is_none());
    // float file is independent
    assert!(pool
        .allocate(RegisterClass::FloatingPoint, OpSize::Qword)
        .is_some());

    pool.release(held.pop().unwrap());
    assert!(pool.allocate(RegisterClass::Integer, OpSize::Qword).is_some());
}

#[test]
fn operand_sizes_round_up() {
    assert_eq!(OpSize::for_byte_size(1), OpSize::Byte);
    assert_eq!(OpSize::for_byte_size(3), OpSize::Dword);
    assert_eq!(OpSize::for_byte_size(8), OpSize::Qword);
    assert_eq!(OpSize::for_byte_size(24), OpSize::Qword);
    assert_eq!(OpSize::Word.byte_count(), 2);
}
