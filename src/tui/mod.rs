//! TUI debugger.
//!
//! Provides an interactive terminal-based debugger with:
//! - Register view (non-zero registers, host order)
//! - Hex memory view
//! - Step/run/breakpoint controls
//! - Disassembly view and captured TRAP output

mod app;
mod ui;

pub use app::{DebuggerApp, run_debugger};
