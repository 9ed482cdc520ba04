#![forbid(unsafe_code)]

mod assembler;
mod block;
mod isa;

pub use assembler::{Assembler, CfgError};
pub use block::{BasicBlock, BlockEntry, BlockId, DataValue, Directive, Section};
pub use isa::{
    Instruction, NamedRef, NamedRefId, NamedRefKind, OpCode, OpSize, Operand, Register,
    RegisterAllocator, RegisterClass,
};
