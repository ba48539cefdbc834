//! # mmixlet
//!
//! A minimal MMIX-flavoured register machine emulator.
//!
//! A program image is loaded into one flat byte memory and executed
//! instruction by instruction against 256 64-bit registers, until it halts,
//! hits a fatal decode error, or runs out of its step budget.

pub mod cpu;
pub mod asm;
pub mod loader;
pub mod config;
pub mod report;

#[cfg(feature = "tui")]
pub mod tui;

#[cfg(feature = "wasm")]
pub mod wasm;

// Re-export commonly used types
pub use cpu::{Machine, MachineState, ExecError, RunOutcome, StopReason, Memory, Registers, Instruction};
pub use asm::{assemble, disassemble, AssemblerError, ProgramImage, load_image, save_image};
pub use loader::{load_machine, LoadError};
pub use config::MachineConfig;
pub use report::RunReport;

#[cfg(feature = "tui")]
pub use tui::run_debugger;
