//! Binary program image format.
//!
//! ```text
//! offset 0:  u32 big-endian     instruction count N
//! offset 4:  u32[N] big-endian  instruction words
//! ```
//!
//! Instruction words are kept as raw bytes; they are copied into machine
//! memory verbatim.

use crate::cpu::memory::WORD_SIZE;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

/// Size of the instruction count header in bytes.
pub const HEADER_SIZE: usize = 4;

/// A program image: the instruction words in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramImage {
    pub words: Vec<[u8; WORD_SIZE]>,
}

impl ProgramImage {
    /// Create a new empty image.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an image from raw words.
    pub fn from_words(words: Vec<[u8; WORD_SIZE]>) -> Self {
        Self { words }
    }

    /// Append a word.
    pub fn push(&mut self, word: [u8; WORD_SIZE]) {
        self.words.push(word);
    }

    /// Number of instruction words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Program size in bytes once loaded.
    pub fn byte_len(&self) -> u64 {
        self.words.len() as u64 * WORD_SIZE as u64
    }

    /// Serialize to the on-disk layout.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ImageError> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.words.len() * WORD_SIZE);
        write_image(&mut bytes, self)?;
        Ok(bytes)
    }
}

/// Read the instruction count header.
pub fn read_header<R: Read>(reader: &mut R) -> Result<u32, ImageError> {
    let mut header = [0u8; HEADER_SIZE];
    reader
        .read_exact(&mut header)
        .map_err(|e| ImageError::Io(format!("reading header: {}", e)))?;
    Ok(u32::from_be_bytes(header))
}

/// Read `count` instruction words following the header.
pub fn read_words<R: Read>(reader: &mut R, count: u32) -> Result<Vec<[u8; WORD_SIZE]>, ImageError> {
    // the header is untrusted; grow as words actually arrive
    let mut words = Vec::with_capacity((count as usize).min(1 << 16));

    for index in 0..count {
        let mut word = [0u8; WORD_SIZE];
        reader.read_exact(&mut word).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => ImageError::Truncated {
                expected: count,
                found: index,
            },
            _ => ImageError::Io(e.to_string()),
        })?;
        words.push(word);
    }

    Ok(words)
}

/// Read a whole image from a byte stream.
pub fn read_image<R: Read>(reader: &mut R) -> Result<ProgramImage, ImageError> {
    let count = read_header(reader)?;
    let words = read_words(reader, count)?;
    Ok(ProgramImage { words })
}

/// Load an image from disk.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<ProgramImage, ImageError> {
    let file = std::fs::File::open(path.as_ref())
        .map_err(|e| ImageError::Io(e.to_string()))?;
    read_image(&mut BufReader::new(file))
}

/// Write an image to a byte stream.
pub fn write_image<W: Write>(writer: &mut W, image: &ProgramImage) -> Result<(), ImageError> {
    let count = u32::try_from(image.words.len())
        .map_err(|_| ImageError::TooManyWords(image.words.len()))?;

    writer
        .write_all(&count.to_be_bytes())
        .map_err(|e| ImageError::Io(e.to_string()))?;
    for word in &image.words {
        writer
            .write_all(word)
            .map_err(|e| ImageError::Io(e.to_string()))?;
    }

    Ok(())
}

/// Save an image to disk.
pub fn save_image<P: AsRef<Path>>(path: P, image: &ProgramImage) -> Result<(), ImageError> {
    let file = std::fs::File::create(path.as_ref())
        .map_err(|e| ImageError::Io(e.to_string()))?;
    let mut writer = BufWriter::new(file);
    write_image(&mut writer, image)?;
    writer.flush().map_err(|e| ImageError::Io(e.to_string()))
}

/// Errors that can occur while reading or writing images.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("image truncated: header declares {expected} words, found {found}")]
    Truncated { expected: u32, found: u32 },

    #[error("too many words for one image: {0}")]
    TooManyWords(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_big_endian() {
        let image = ProgramImage::from_words(vec![[0xE3, 0x05, 0x00, 0x2A]]);
        let bytes = image.to_bytes().unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 1, 0xE3, 0x05, 0x00, 0x2A]);
    }

    #[test]
    fn test_read_image() {
        let bytes = [0u8, 0, 0, 2, 0x20, 1, 2, 3, 0, 0, 0, 0];
        let image = read_image(&mut &bytes[..]).unwrap();

        assert_eq!(image.len(), 2);
        assert_eq!(image.words[0], [0x20, 1, 2, 3]);
        assert_eq!(image.byte_len(), 8);
    }

    #[test]
    fn test_truncated_image() {
        let bytes = [0u8, 0, 0, 3, 0x20, 1, 2, 3, 0, 0];
        let err = read_image(&mut &bytes[..]).unwrap_err();
        assert_eq!(err, ImageError::Truncated { expected: 3, found: 1 });
    }

    #[test]
    fn test_missing_header() {
        let bytes = [0u8, 1];
        assert!(matches!(read_image(&mut &bytes[..]), Err(ImageError::Io(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prog.bin");
        let image = ProgramImage::from_words(vec![[0xE3, 1, 0, 7], [0, 0, 0, 0]]);

        save_image(&path, &image).unwrap();
        assert_eq!(load_image(&path).unwrap(), image);
    }
}
