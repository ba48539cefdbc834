//! Program loader.
//!
//! Turns a program image plus a memory budget into a ready-to-run
//! [`Machine`]. The whole budget is allocated, not just the program size:
//! the space after the program is scratch memory.
//!
//! Initial state:
//! - `$0` = argument count
//! - `$1` = program size in bytes
//! - every other register zero, `ip = 0`

use crate::asm::image::{self, ImageError, ProgramImage};
use crate::cpu::memory::WORD_SIZE;
use crate::cpu::Machine;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// Register receiving the argument count.
pub const ARG_COUNT_REGISTER: u8 = 0;

/// Register receiving the program size in bytes.
pub const PROGRAM_SIZE_REGISTER: u8 = 1;

/// Load an image file and build a machine around it.
pub fn load_machine<P: AsRef<Path>>(
    path: P,
    memory_size: usize,
    arg_count: u64,
) -> Result<Machine, LoadError> {
    let path = path.as_ref();
    let unreadable = |reason: String| LoadError::ImageUnreadable {
        path: path.display().to_string(),
        reason,
    };

    let file = std::fs::File::open(path).map_err(|e| unreadable(e.to_string()))?;
    let machine = load_from_reader(&mut BufReader::new(file), memory_size, arg_count)
        .map_err(|e| match e {
            LoadError::ImageUnreadable { reason, .. } => unreadable(reason),
            other => other,
        })?;

    tracing::info!(
        path = %path.display(),
        words = machine.regs.get(PROGRAM_SIZE_REGISTER) / WORD_SIZE as u64,
        memory_size,
        "loaded image"
    );
    Ok(machine)
}

/// Load an image from any byte stream.
///
/// The declared size is checked against the budget before any instruction
/// word is read.
pub fn load_from_reader<R: Read>(
    reader: &mut R,
    memory_size: usize,
    arg_count: u64,
) -> Result<Machine, LoadError> {
    let count = image::read_header(reader).map_err(LoadError::from_image)?;
    check_budget(count as u64 * WORD_SIZE as u64, memory_size)?;

    let words = image::read_words(reader, count).map_err(LoadError::from_image)?;
    Machine::from_image(&ProgramImage::from_words(words), memory_size, arg_count)
}

fn check_budget(size: u64, budget: usize) -> Result<(), LoadError> {
    if size > budget as u64 {
        return Err(LoadError::ProgramTooLarge { size, budget });
    }
    Ok(())
}

impl Machine {
    /// Build a machine from an in-memory image.
    pub fn from_image(
        image: &ProgramImage,
        memory_size: usize,
        arg_count: u64,
    ) -> Result<Self, LoadError> {
        check_budget(image.byte_len(), memory_size)?;

        let mut machine = Machine::new(memory_size);
        machine
            .load_program(&image.words)
            .map_err(|_| LoadError::ProgramTooLarge {
                size: image.byte_len(),
                budget: memory_size,
            })?;

        machine.regs.set(ARG_COUNT_REGISTER, arg_count);
        machine.regs.set(PROGRAM_SIZE_REGISTER, image.byte_len());
        Ok(machine)
    }
}

/// Errors that can occur while loading a program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("cannot read image {path}: {reason}")]
    ImageUnreadable { path: String, reason: String },

    #[error("program size {size} exceeds memory budget {budget}")]
    ProgramTooLarge { size: u64, budget: usize },
}

impl LoadError {
    fn from_image(err: ImageError) -> Self {
        LoadError::ImageUnreadable {
            path: "<stream>".into(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;

    fn image_bytes(words: &[[u8; 4]]) -> Vec<u8> {
        ProgramImage::from_words(words.to_vec()).to_bytes().unwrap()
    }

    #[test]
    fn test_initial_state() {
        let bytes = image_bytes(&[[0, 0, 0, 0], [0xE3, 5, 0, 42]]);
        let machine = load_from_reader(&mut &bytes[..], 256, 3).unwrap();

        assert_eq!(machine.regs.get(0), 3);
        assert_eq!(machine.regs.get(1), 8);
        assert_eq!(machine.regs.stored(1), 8u64.to_be());
        assert_eq!(machine.regs.ip, 0);
        assert_eq!(machine.mem.len(), 256);
        assert_eq!(machine.mem.read_word(1).unwrap(), [0xE3, 5, 0, 42]);
        assert_eq!(machine.regs.non_zero().count(), 2);
    }

    #[test]
    fn test_halt_image_touches_only_loader_registers() {
        let bytes = image_bytes(&[[0, 0, 0, 0]]);
        let mut machine = load_from_reader(&mut &bytes[..], 64, 1).unwrap();

        let outcome = machine.run(10_000, &mut std::io::sink()).unwrap();

        assert_eq!(outcome.steps, 1);
        assert!(machine.is_halted());
        assert_eq!(machine.regs.non_zero().collect::<Vec<_>>(), vec![(0, 1), (1, 4)]);
    }

    #[test]
    fn test_exact_fit() {
        let bytes = image_bytes(&[[0; 4], [0; 4]]);
        assert!(load_from_reader(&mut &bytes[..], 8, 1).is_ok());
    }

    #[test]
    fn test_too_large_checked_before_body() {
        // header claims a huge program with no body behind it
        let bytes = [0xFFu8, 0xFF, 0xFF, 0xFF];
        let err = load_from_reader(&mut &bytes[..], 1024, 1).unwrap_err();

        assert_eq!(
            err,
            LoadError::ProgramTooLarge { size: 0xFFFF_FFFF * 4, budget: 1024 }
        );
    }

    #[test]
    fn test_truncated_body_is_unreadable() {
        let bytes = [0u8, 0, 0, 2, 1, 2, 3, 4];
        let err = load_from_reader(&mut &bytes[..], 1024, 1).unwrap_err();
        assert!(matches!(err, LoadError::ImageUnreadable { .. }));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.bin");

        let err = load_machine(&path, 1024, 1).unwrap_err();
        match err {
            LoadError::ImageUnreadable { path: p, .. } => assert!(p.ends_with("missing.bin")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&image_bytes(&[[0xE3, 5, 0x00, 0x2A], [0, 0, 0, 0]])).unwrap();
        file.flush().unwrap();

        let mut machine = load_machine(file.path(), 4096, 1).unwrap();
        let outcome = machine.run(10_000, &mut std::io::sink()).unwrap();

        assert_eq!(outcome.steps, 2);
        assert!(machine.is_halted());
        assert_eq!(machine.regs.get(5), 42);
    }

    #[test]
    fn test_from_image_too_large() {
        let image = ProgramImage::from_words(vec![[0; 4]; 3]);
        let err = Machine::from_image(&image, 11, 1).unwrap_err();
        assert_eq!(err, LoadError::ProgramTooLarge { size: 12, budget: 11 });
    }

    proptest! {
        #[test]
        fn prop_size_register_matches_program(len in 0usize..64, budget in 0usize..512) {
            let bytes = image_bytes(&vec![[0u8; 4]; len]);
            let result = load_from_reader(&mut &bytes[..], budget, 1);

            if len * 4 <= budget {
                let machine = result.unwrap();
                prop_assert_eq!(machine.regs.get(1), (len * 4) as u64);
            } else {
                let is_too_large = matches!(result, Err(LoadError::ProgramTooLarge { .. }));
                prop_assert!(is_too_large);
            }
        }
    }
}
