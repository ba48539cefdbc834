//! The register machine.
//!
//! - a flat, byte-addressed memory holding program and scratch data
//! - 256 general 64-bit registers, big-endian at rest
//! - 12 opcodes: TRAP, MUL/ADD/SUB (register and immediate), BZ/BP (both
//!   directions) and SETL

pub mod memory;
pub mod registers;
pub mod decode;
pub mod execute;

pub use memory::{Memory, MemoryError};
pub use registers::{Registers, RegisterSet};
pub use decode::{Instruction, InstructionWord, DecodeError};
pub use execute::{Machine, MachineState, ExecError, RunOutcome, StopReason};
