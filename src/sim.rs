use thiserror::Error;

use crate::sim::memory::MemoryError;

pub mod cpu;
pub mod memory;
pub mod operation;
pub mod symbols;
pub mod types;

pub use cpu::{Disassembly, Simulator};
pub use memory::BinaryMemory;
pub use operation::{Branch, BranchKind, Operation};
pub use symbols::{Symbol, SymbolTable};
pub use types::{Value, U16, U32, U8};

/// Failures that stop a run because the simulation itself cannot go on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    #[error("unknown instruction {code:#06x} at {pc:#010x}")]
    UnknownInstruction { code: u16, pc: u32 },
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("read of unresolved relocation {name} at {address:#010x} (pc {pc:#010x})")]
    UnresolvedRelocationRead { address: u32, name: String, pc: u32 },
    #[error("instruction limit of {limit} reached")]
    InstructionLimit { limit: u64 },
    #[error("division by zero in {function} at {pc:#010x}")]
    DivisionByZero { function: String, pc: u32 },
    #[error("callback failed: {0}")]
    Callback(String),
}
