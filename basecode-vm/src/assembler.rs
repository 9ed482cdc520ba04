#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::block::{BasicBlock, BlockEntry, BlockId, Directive};
use crate::isa::{NamedRef, NamedRefId, NamedRefKind, Operand};

/// CFG validation failures; the emitter treats any of these as an internal
/// invariant violation rather than a user diagnostic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CfgError {
    DuplicateLabel(String),
    MissingEdgeBack { block: BlockId, successor: BlockId },
    UnknownBlock(BlockId),
    EntryPointCount { label: String, count: usize },
}

impl fmt::Display for CfgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CfgError::DuplicateLabel(label) => write!(f, "duplicate label: {label}"),
            CfgError::MissingEdgeBack { block, successor } => write!(
                f,
                "block {} missing from predecessor list of block {}",
                block.0, successor.0
            ),
            CfgError::UnknownBlock(id) => write!(f, "edge references unknown block {}", id.0),
            CfgError::EntryPointCount { label, count } => {
                write!(f, "expected exactly one {label} block, found {count}")
            }
        }
    }
}

/// Owns every basic block and every named reference the emitter creates.
/// Blocks refer to labels and locals by `NamedRefId`, so references are
/// guaranteed to outlive the blocks that mention them.
#[derive(Debug, Default, Serialize)]
pub struct Assembler {
    blocks: Vec<BasicBlock>,
    named_refs: Vec<NamedRef>,
    #[serde(skip)]
    ref_index: HashMap<(NamedRefKind, String), NamedRefId>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_basic_block(&mut self, label: &str) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new(id, label));
        id
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.0 as usize]
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn find_block_by_label(&self, label: &str) -> Option<&BasicBlock> {
        self.blocks
            .iter()
            .find(|block| block.labels().any(|l| l == label))
    }

    pub fn make_named_ref(&mut self, kind: NamedRefKind, name: &str) -> NamedRefId {
        let key = (kind, name.to_string());
        if let Some(id) = self.ref_index.get(&key) {
            return *id;
        }
        let id = NamedRefId(self.named_refs.len() as u32);
        self.named_refs.push(NamedRef {
            kind,
            name: name.to_string(),
        });
        self.ref_index.insert(key, id);
        id
    }

    pub fn label_ref(&mut self, name: &str) -> Operand {
        Operand::Named(self.make_named_ref(NamedRefKind::Label, name))
    }

    pub fn local_ref(&mut self, name: &str) -> Operand {
        Operand::Named(self.make_named_ref(NamedRefKind::Local, name))
    }

    pub fn named_ref(&self, id: NamedRefId) -> &NamedRef {
        &self.named_refs[id.0 as usize]
    }

    pub fn named_refs(&self) -> &[NamedRef] {
        &self.named_refs
    }

    /// Records `successor` on `from` and the back-edge on `successor`.
    pub fn add_edge(&mut self, from: BlockId, successor: BlockId) {
        if !self.blocks[from.0 as usize].successors.contains(&successor) {
            self.blocks[from.0 as usize].successors.push(successor);
        }
        if !self.blocks[successor.0 as usize].predecessors.contains(&from) {
            self.blocks[successor.0 as usize].predecessors.push(from);
        }
    }

    /// Downstream contract: labels unique, edges symmetric, exactly one
    /// `_start` and one `_end`.
    pub fn validate(&self) -> Result<(), Vec<CfgError>> {
        let mut errors = Vec::new();
        let mut seen = HashMap::new();

        for block in &self.blocks {
            for label in block.labels() {
                if let Some(_previous) = seen.insert(label.to_string(), block.id) {
                    errors.push(CfgError::DuplicateLabel(label.to_string()));
                }
            }
        }

        for block in &self.blocks {
            for successor in &block.successors {
                match self.blocks.get(successor.0 as usize) {
                    None => errors.push(CfgError::UnknownBlock(*successor)),
                    Some(succ) => {
                        if !succ.predecessors.contains(&block.id) {
                            errors.push(CfgError::MissingEdgeBack {
                                block: block.id,
                                successor: *successor,
                            });
                        }
                    }
                }
            }
        }

        for label in ["_start", "_end"] {
            let count = self
                .blocks
                .iter()
                .flat_map(|block| block.labels())
                .filter(|l| *l == label)
                .count();
            if count != 1 {
                errors.push(CfgError::EntryPointCount {
                    label: label.to_string(),
                    count,
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn write_entry(&self, f: &mut fmt::Formatter<'_>, entry: &BlockEntry) -> fmt::Result {
        match entry {
            BlockEntry::Label(name) => writeln!(f, "{name}:"),
            BlockEntry::Comment(text) => writeln!(f, "    ; {text}"),
            BlockEntry::Blank => writeln!(f),
            BlockEntry::Directive(directive) => self.write_directive(f, directive),
            BlockEntry::Instruction(instruction) => {
                let mut rendered = format!("{instruction}");
                for operand in &instruction.operands {
                    if let Operand::Named(id) = operand {
                        rendered = rendered.replace(
                            &format!("@{}", id.0),
                            &self.named_refs[id.0 as usize].name,
                        );
                    }
                }
                writeln!(f, "    {rendered}")
            }
        }
    }

    fn write_directive(&self, f: &mut fmt::Formatter<'_>, directive: &Directive) -> fmt::Result {
        match directive {
            Directive::Align(bytes) => writeln!(f, "    .align {bytes}"),
            Directive::ReserveByte(count) => writeln!(f, "    .reserve b, {count}"),
            Directive::ReserveWord(count) => writeln!(f, "    .reserve w, {count}"),
            Directive::ReserveDword(count) => writeln!(f, "    .reserve dw, {count}"),
            Directive::ReserveQword(count) => writeln!(f, "    .reserve qw, {count}"),
            Directive::Bytes(values) => {
                let rendered: Vec<String> = values.iter().map(|v| format!("{v}")).collect();
                writeln!(f, "    .db {}", rendered.join(", "))
            }
            Directive::Words(values) => {
                let rendered: Vec<String> = values.iter().map(|v| format!("{v}")).collect();
                writeln!(f, "    .dw {}", rendered.join(", "))
            }
            Directive::Dwords(values) => {
                let rendered: Vec<String> = values.iter().map(|v| format!("{v}")).collect();
                writeln!(f, "    .dd {}", rendered.join(", "))
            }
            Directive::Qwords(values) => {
                let rendered: Vec<String> = values
                    .iter()
                    .map(|v| match v {
                        crate::block::DataValue::Int(value) => format!("{value}"),
                        crate::block::DataValue::Ref(id) => {
                            self.named_refs[id.0 as usize].name.clone()
                        }
                    })
                    .collect();
                writeln!(f, "    .dq {}", rendered.join(", "))
            }
            Directive::Str {
                label,
                data_label,
                value,
            } => {
                writeln!(f, "{label}:")?;
                writeln!(f, "    .dd {}", value.len())?;
                writeln!(f, "{data_label}:")?;
                writeln!(f, "    .str \"{value}\"")
            }
            Directive::Local { class, name } => {
                writeln!(f, "    .local {}, {name}", class.name())
            }
            Directive::FrameOffset { name, offset } => {
                writeln!(f, "    .frame_offset {name}, {offset}")
            }
            Directive::Reset => writeln!(f, "    .reset"),
            Directive::MetaBegin => writeln!(f, "    .meta_begin"),
            Directive::MetaEnd => writeln!(f, "    .meta_end"),
        }
    }
}

impl fmt::Display for Assembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut current_section = None;
        for block in &self.blocks {
            if block.section.is_some() && block.section != current_section {
                current_section = block.section;
                writeln!(f, ".section {}", current_section.unwrap().name())?;
            }
            for entry in &block.entries {
                self.write_entry(f, entry)?;
            }
        }
        Ok(())
    }
}
