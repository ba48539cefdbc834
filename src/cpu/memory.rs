//! Machine memory.
//!
//! One flat, zero-initialised byte buffer. The program image is copied to
//! offset 0 and the rest is scratch space the program may use freely.
//! Every access goes through an explicit, bounds-checked accessor; nothing
//! reinterprets the buffer at a wider element type.

use serde::Serialize;
use thiserror::Error;

/// Size of one instruction word in bytes.
pub const WORD_SIZE: usize = 4;

/// Default memory size used by the CLI and the config layer.
pub const DEFAULT_MEMORY_SIZE: usize = 64 * 1024;

/// Flat byte-addressed machine memory.
#[derive(Clone, Serialize)]
pub struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    /// Create a zeroed memory of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
        }
    }

    /// Total size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for a zero-sized memory.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Read one byte.
    #[inline]
    pub fn read_u8(&self, offset: u64) -> Result<u8, MemoryError> {
        let index = self.index(offset, 1)?;
        Ok(self.bytes[index])
    }

    /// Read a 16-bit value stored big-endian at `offset`.
    #[inline]
    pub fn read_u16_be(&self, offset: u64) -> Result<u16, MemoryError> {
        let index = self.index(offset, 2)?;
        Ok(u16::from_be_bytes([self.bytes[index], self.bytes[index + 1]]))
    }

    /// Write one byte.
    #[inline]
    pub fn write_u8(&mut self, offset: u64, value: u8) -> Result<(), MemoryError> {
        let index = self.index(offset, 1)?;
        self.bytes[index] = value;
        Ok(())
    }

    /// Read the raw instruction word at word index `word`.
    pub fn read_word(&self, word: u64) -> Result<[u8; WORD_SIZE], MemoryError> {
        let offset = word
            .checked_mul(WORD_SIZE as u64)
            .ok_or(MemoryError::AddressOutOfRange { offset: u64::MAX, size: self.len() })?;
        let index = self.index(offset, WORD_SIZE)?;
        let mut raw = [0u8; WORD_SIZE];
        raw.copy_from_slice(&self.bytes[index..index + WORD_SIZE]);
        Ok(raw)
    }

    /// Write a raw instruction word at word index `word`.
    pub fn write_word(&mut self, word: u64, raw: [u8; WORD_SIZE]) -> Result<(), MemoryError> {
        let offset = word
            .checked_mul(WORD_SIZE as u64)
            .ok_or(MemoryError::AddressOutOfRange { offset: u64::MAX, size: self.len() })?;
        let index = self.index(offset, WORD_SIZE)?;
        self.bytes[index..index + WORD_SIZE].copy_from_slice(&raw);
        Ok(())
    }

    /// Bytes from `offset` up to the first NUL, or to the end of memory if
    /// there is none. The terminator is not included.
    pub fn read_c_string(&self, offset: u64) -> Result<&[u8], MemoryError> {
        let start = self.index(offset, 1)?;
        let tail = &self.bytes[start..];
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        Ok(&tail[..end])
    }

    /// Copy instruction words verbatim to the start of memory.
    pub fn load_program(&mut self, words: &[[u8; WORD_SIZE]]) -> Result<(), MemoryError> {
        let size = words.len() as u64 * WORD_SIZE as u64;
        if size > self.len() as u64 {
            return Err(MemoryError::ProgramTooLarge {
                size,
                available: self.len(),
            });
        }

        for (chunk, word) in self.bytes.chunks_exact_mut(WORD_SIZE).zip(words) {
            chunk.copy_from_slice(word);
        }

        Ok(())
    }

    /// Clear all memory to zeros.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    /// Borrow a window of memory (for debugging views). Clamped to the buffer.
    pub fn dump(&self, start: usize, count: usize) -> &[u8] {
        let start = start.min(self.len());
        let end = start.saturating_add(count).min(self.len());
        &self.bytes[start..end]
    }

    fn index(&self, offset: u64, width: usize) -> Result<usize, MemoryError> {
        let out_of_range = MemoryError::AddressOutOfRange {
            offset,
            size: self.len(),
        };
        let start = usize::try_from(offset).map_err(|_| out_of_range.clone())?;
        match start.checked_add(width) {
            Some(end) if end <= self.len() => Ok(start),
            _ => Err(out_of_range),
        }
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let non_zero = self.bytes.iter().filter(|&&b| b != 0).count();

        f.debug_struct("Memory")
            .field("non_zero_bytes", &non_zero)
            .field("size", &self.len())
            .finish()
    }
}

/// Errors that can occur during memory operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// Access falls (partly) outside the buffer.
    #[error("memory offset {offset:#x} out of range (size {size:#x})")]
    AddressOutOfRange { offset: u64, size: usize },

    /// Program does not fit in memory.
    #[error("program size {size} exceeds available space {available}")]
    ProgramTooLarge { size: u64, available: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_starts_zeroed() {
        let mem = Memory::new(64);
        assert_eq!(mem.len(), 64);
        assert!(mem.dump(0, 64).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_read_write_u8() {
        let mut mem = Memory::new(16);
        mem.write_u8(3, 0xAB).unwrap();
        assert_eq!(mem.read_u8(3).unwrap(), 0xAB);
    }

    #[test]
    fn test_read_u16_is_big_endian() {
        let mut mem = Memory::new(16);
        mem.write_u8(2, 0x12).unwrap();
        mem.write_u8(3, 0x34).unwrap();
        assert_eq!(mem.read_u16_be(2).unwrap(), 0x1234);
    }

    #[test]
    fn test_bounds() {
        let mem = Memory::new(8);
        assert!(mem.read_u8(7).is_ok());
        assert!(mem.read_u8(8).is_err());
        assert!(mem.read_u16_be(7).is_err());
        assert!(mem.read_word(1).is_ok());
        assert!(mem.read_word(2).is_err());
        assert!(mem.read_word(u64::MAX).is_err());
    }

    #[test]
    fn test_load_program_is_verbatim() {
        let mut mem = Memory::new(16);
        mem.load_program(&[[0xE3, 0x05, 0x00, 0x2A], [1, 2, 3, 4]]).unwrap();

        assert_eq!(mem.read_word(0).unwrap(), [0xE3, 0x05, 0x00, 0x2A]);
        assert_eq!(mem.read_word(1).unwrap(), [1, 2, 3, 4]);
        assert_eq!(mem.read_word(2).unwrap(), [0, 0, 0, 0]);
    }

    #[test]
    fn test_load_program_too_large() {
        let mut mem = Memory::new(7);
        let err = mem.load_program(&[[0; 4], [0; 4]]).unwrap_err();
        assert_eq!(err, MemoryError::ProgramTooLarge { size: 8, available: 7 });
    }

    #[test]
    fn test_c_string() {
        let mut mem = Memory::new(8);
        for (i, b) in b"hi\0x".iter().enumerate() {
            mem.write_u8(i as u64 + 2, *b).unwrap();
        }
        assert_eq!(mem.read_c_string(2).unwrap(), b"hi");
        assert_eq!(mem.read_c_string(5).unwrap(), b"x");
        // unterminated runs to the end of memory
        mem.write_u8(7, b'z').unwrap();
        assert_eq!(mem.read_c_string(7).unwrap(), b"z");
        assert!(mem.read_c_string(8).is_err());
    }
}
