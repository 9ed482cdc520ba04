#![forbid(unsafe_code)]

use serde::Serialize;

use crate::isa::{Instruction, NamedRefId, OpCode, OpSize, Operand, RegisterClass};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BlockId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Section {
    RoData,
    Data,
    Bss,
    Text,
}

impl Section {
    pub fn name(self) -> &'static str {
        match self {
            Section::RoData => "ro_data",
            Section::Data => "data",
            Section::Bss => "bss",
            Section::Text => "text",
        }
    }

    /// Emission order of the top-level section tables.
    pub fn ordered() -> [Section; 4] {
        [Section::RoData, Section::Data, Section::Bss, Section::Text]
    }
}

/// A data word that may be a literal or a reference patched by the
/// assembler (e.g. the type-info table pointing at name data labels).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DataValue {
    Int(u64),
    Ref(NamedRefId),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Directive {
    Align(u8),
    ReserveByte(usize),
    ReserveWord(usize),
    ReserveDword(usize),
    ReserveQword(usize),
    Bytes(Vec<u8>),
    Words(Vec<u16>),
    Dwords(Vec<u32>),
    Qwords(Vec<DataValue>),
    /// Length-prefixed string record: `label` heads the record, `data_label`
    /// marks the character data.
    Str {
        label: String,
        data_label: String,
        value: String,
    },
    Local {
        class: RegisterClass,
        name: String,
    },
    FrameOffset {
        name: String,
        offset: i64,
    },
    Reset,
    MetaBegin,
    MetaEnd,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum BlockEntry {
    Label(String),
    Comment(String),
    Blank,
    Directive(Directive),
    Instruction(Instruction),
}

/// A labelled straight-line run of instructions and data directives with
/// explicit CFG edges. Downstream validation in the assembler keys on the
/// edge lists being symmetric.
#[derive(Clone, Debug, Serialize)]
pub struct BasicBlock {
    pub id: BlockId,
    pub label: String,
    pub section: Option<Section>,
    pub entries: Vec<BlockEntry>,
    pub predecessors: Vec<BlockId>,
    pub successors: Vec<BlockId>,
}

impl BasicBlock {
    pub(crate) fn new(id: BlockId, label: &str) -> Self {
        let mut block = Self {
            id,
            label: label.to_string(),
            section: None,
            entries: Vec::new(),
            predecessors: Vec::new(),
            successors: Vec::new(),
        };
        if !label.is_empty() {
            block.entries.push(BlockEntry::Label(label.to_string()));
        }
        block
    }

    pub fn section(&mut self, section: Section) {
        self.section = Some(section);
    }

    pub fn label(&mut self, name: &str) {
        self.entries.push(BlockEntry::Label(name.to_string()));
    }

    pub fn comment(&mut self, text: &str) {
        self.entries.push(BlockEntry::Comment(text.to_string()));
    }

    pub fn blank_line(&mut self) {
        self.entries.push(BlockEntry::Blank);
    }

    pub fn align(&mut self, bytes: u8) {
        self.entries.push(BlockEntry::Directive(Directive::Align(bytes)));
    }

    pub fn reserve_byte(&mut self, count: usize) {
        self.entries
            .push(BlockEntry::Directive(Directive::ReserveByte(count)));
    }

    pub fn reserve_word(&mut self, count: usize) {
        self.entries
            .push(BlockEntry::Directive(Directive::ReserveWord(count)));
    }

    pub fn reserve_dword(&mut self, count: usize) {
        self.entries
            .push(BlockEntry::Directive(Directive::ReserveDword(count)));
    }

    pub fn reserve_qword(&mut self, count: usize) {
        self.entries
            .push(BlockEntry::Directive(Directive::ReserveQword(count)));
    }

    pub fn bytes(&mut self, values: Vec<u8>) {
        self.entries
            .push(BlockEntry::Directive(Directive::Bytes(values)));
    }

    pub fn words(&mut self, values: Vec<u16>) {
        self.entries
            .push(BlockEntry::Directive(Directive::Words(values)));
    }

    pub fn dwords(&mut self, values: Vec<u32>) {
        self.entries
            .push(BlockEntry::Directive(Directive::Dwords(values)));
    }

    pub fn qwords(&mut self, values: Vec<DataValue>) {
        self.entries
            .push(BlockEntry::Directive(Directive::Qwords(values)));
    }

    pub fn string(&mut self, label: &str, data_label: &str, value: &str) {
        self.entries.push(BlockEntry::Directive(Directive::Str {
            label: label.to_string(),
            data_label: data_label.to_string(),
            value: value.to_string(),
        }));
    }

    pub fn local(&mut self, class: RegisterClass, name: &str) {
        self.entries.push(BlockEntry::Directive(Directive::Local {
            class,
            name: name.to_string(),
        }));
    }

    pub fn frame_offset(&mut self, name: &str, offset: i64) {
        self.entries
            .push(BlockEntry::Directive(Directive::FrameOffset {
                name: name.to_string(),
                offset,
            }));
    }

    pub fn reset(&mut self) {
        self.entries.push(BlockEntry::Directive(Directive::Reset));
    }

    pub fn meta_begin(&mut self) {
        self.entries.push(BlockEntry::Directive(Directive::MetaBegin));
    }

    pub fn meta_end(&mut self) {
        self.entries.push(BlockEntry::Directive(Directive::MetaEnd));
    }

    pub fn instruction(&mut self, instruction: Instruction) {
        self.entries.push(BlockEntry::Instruction(instruction));
    }

    pub fn op(&mut self, op: OpCode, size: OpSize, operands: Vec<Operand>) {
        self.instruction(Instruction::new(op, size, operands));
    }

    pub fn nop(&mut self) {
        self.op(OpCode::Nop, OpSize::Qword, vec![]);
    }

    pub fn clr(&mut self, size: OpSize, target: Operand) {
        self.op(OpCode::Clr, size, vec![target]);
    }

    pub fn move_op(&mut self, size: OpSize, target: Operand, source: Operand) {
        self.op(OpCode::Move, size, vec![target, source]);
    }

    pub fn moves(&mut self, size: OpSize, target: Operand, source: Operand) {
        self.op(OpCode::Moves, size, vec![target, source]);
    }

    pub fn movez(&mut self, size: OpSize, target: Operand, source: Operand) {
        self.op(OpCode::Movez, size, vec![target, source]);
    }

    pub fn load(&mut self, size: OpSize, target: Operand, base: Operand, offset: i64) {
        let mut operands = vec![target, base];
        if offset != 0 {
            operands.push(Operand::Offset(offset));
        }
        self.op(OpCode::Load, size, operands);
    }

    pub fn store(&mut self, size: OpSize, base: Operand, value: Operand, offset: i64) {
        let mut operands = vec![base, value];
        if offset != 0 {
            operands.push(Operand::Offset(offset));
        }
        self.op(OpCode::Store, size, operands);
    }

    pub fn push_op(&mut self, size: OpSize, value: Operand) {
        self.op(OpCode::Push, size, vec![value]);
    }

    pub fn pop_op(&mut self, size: OpSize, target: Operand) {
        self.op(OpCode::Pop, size, vec![target]);
    }

    pub fn cmp(&mut self, size: OpSize, lhs: Operand, rhs: Operand) {
        self.op(OpCode::Cmp, size, vec![lhs, rhs]);
    }

    pub fn setcc(&mut self, op: OpCode, target: Operand) {
        debug_assert!(matches!(
            op,
            OpCode::Setz
                | OpCode::Setnz
                | OpCode::Seta
                | OpCode::Setae
                | OpCode::Setb
                | OpCode::Setbe
                | OpCode::Setl
                | OpCode::Setle
                | OpCode::Setg
                | OpCode::Setge
        ));
        self.op(op, OpSize::Byte, vec![target]);
    }

    pub fn bz(&mut self, size: OpSize, value: Operand, target: Operand) {
        self.op(OpCode::Bz, size, vec![value, target]);
    }

    pub fn bnz(&mut self, size: OpSize, value: Operand, target: Operand) {
        self.op(OpCode::Bnz, size, vec![value, target]);
    }

    pub fn jump_direct(&mut self, target: Operand) {
        self.op(OpCode::JumpDirect, OpSize::Qword, vec![target]);
    }

    pub fn call(&mut self, target: Operand) {
        self.op(OpCode::Call, OpSize::Qword, vec![target]);
    }

    pub fn call_foreign(&mut self, address: Operand, signature_id: Option<Operand>) {
        let mut operands = vec![address];
        if let Some(sig) = signature_id {
            operands.push(sig);
        }
        self.op(OpCode::CallForeign, OpSize::Qword, operands);
    }

    pub fn rts(&mut self) {
        self.op(OpCode::Rts, OpSize::Qword, vec![]);
    }

    pub fn exit(&mut self) {
        self.op(OpCode::Exit, OpSize::Qword, vec![]);
    }

    pub fn convert(
        &mut self,
        target_size: OpSize,
        target: Operand,
        source_size: OpSize,
        source: Operand,
    ) {
        self.op(
            OpCode::Convert,
            target_size,
            vec![target, source, Operand::imm(source_size.byte_count() as u64, OpSize::Byte)],
        );
    }

    pub fn last_instruction(&self) -> Option<&Instruction> {
        self.entries.iter().rev().find_map(|entry| match entry {
            BlockEntry::Instruction(instruction) => Some(instruction),
            _ => None,
        })
    }

    pub fn is_terminated(&self) -> bool {
        self.last_instruction()
            .map(|instruction| instruction.op.is_terminal())
            .unwrap_or(false)
    }

    pub fn terminated_by_jump(&self) -> bool {
        self.last_instruction()
            .map(|instruction| instruction.op == OpCode::JumpDirect)
            .unwrap_or(false)
    }

    pub fn terminated_by_return(&self) -> bool {
        self.last_instruction()
            .map(|instruction| instruction.op == OpCode::Rts)
            .unwrap_or(false)
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.entries.iter().filter_map(|entry| match entry {
            BlockEntry::Instruction(instruction) => Some(instruction),
            _ => None,
        })
    }

    /// Every label the block defines, including the heads of string
    /// records.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().flat_map(|entry| match entry {
            BlockEntry::Label(name) => vec![name.as_str()],
            BlockEntry::Directive(Directive::Str {
                label, data_label, ..
            }) => vec![label.as_str(), data_label.as_str()],
            _ => Vec::new(),
        })
    }
}
