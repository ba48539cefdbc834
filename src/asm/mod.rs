//! Program tooling around the machine.
//!
//! This module provides:
//! - the binary image format read by the loader
//! - a simple two-pass assembler (text → image)
//! - a disassembler (image → readable text)

pub mod assembler;
pub mod disasm;
pub mod image;

pub use assembler::{assemble, assemble_image, AssemblerError};
pub use disasm::disassemble;
pub use image::{ProgramImage, ImageError, load_image, save_image};
