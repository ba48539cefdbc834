//! Instruction decoder.
//!
//! Every instruction is one 4-byte word. The opcode is always byte 0; the
//! remaining bytes are read two ways at once:
//!
//! ```text
//!  byte:   0        1      2      3
//!        +--------+------+------+------+
//!        | opcode |  X   |  Y   |  Z   |   triple-register form
//!        +--------+------+------+------+
//!        | opcode |  X   |     YZ      |   register + immediate16 form
//!        +--------+------+-------------+
//! ```
//!
//! There is no format bit: the opcode alone decides which view is meaningful.
//! YZ is big-endian in the instruction stream.

use crate::cpu::memory::{Memory, MemoryError, WORD_SIZE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Both decodings of one fetched instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionWord {
    pub opcode: u8,
    pub x: u8,
    pub y: u8,
    pub z: u8,
    pub yz: u16,
}

impl InstructionWord {
    /// Fetch the word at instruction pointer `ip` (a word index).
    pub fn fetch(mem: &Memory, ip: u64) -> Result<Self, MemoryError> {
        mem.read_word(ip).map(Self::from_bytes)
    }

    /// Split raw bytes into both views.
    pub fn from_bytes(raw: [u8; WORD_SIZE]) -> Self {
        Self {
            opcode: raw[0],
            x: raw[1],
            y: raw[2],
            z: raw[3],
            yz: u16::from_be_bytes([raw[2], raw[3]]),
        }
    }
}

/// Decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    // ==================== System ====================

    /// Trap: halt, string write, or no-op depending on X/Y/Z.
    Trap { x: u8, y: u8, z: u8 },

    // ==================== Arithmetic ====================

    /// `$X = $Y * $Z`
    Mul { x: u8, y: u8, z: u8 },

    /// `$X = $Y * Z`
    MulI { x: u8, y: u8, imm: u8 },

    /// `$X = $Y + $Z`
    Add { x: u8, y: u8, z: u8 },

    /// `$X = $Y + Z`
    AddI { x: u8, y: u8, imm: u8 },

    /// `$X = $Y - $Z`
    Sub { x: u8, y: u8, z: u8 },

    /// `$X = $Y - Z`
    SubI { x: u8, y: u8, imm: u8 },

    // ==================== Branches ====================

    /// If `$X == 0`, move forward `offset` words.
    Bz { x: u8, offset: u16 },

    /// If `$X == 0`, move backward `offset` words.
    BzBack { x: u8, offset: u16 },

    /// If `$X > 0`, move forward `offset` words.
    Bp { x: u8, offset: u16 },

    /// If `$X > 0`, move backward `offset` words.
    BpBack { x: u8, offset: u16 },

    // ==================== Immediate load ====================

    /// `$X = YZ`, zero-extended.
    Setl { x: u8, imm: u16 },
}

/// Trap sub-call that halts the machine.
pub const TRAP_HALT: (u8, u8, u8) = (0, 0, 0);

/// Trap sub-call that writes a NUL-terminated string.
pub const TRAP_WRITE_STRING: (u8, u8, u8) = (0, 7, 1);

/// Opcode byte values.
pub struct Opcode;

impl Opcode {
    pub const TRAP: u8 = 0x00;
    pub const MUL: u8 = 0x18;
    pub const MULI: u8 = 0x19;
    pub const ADD: u8 = 0x20;
    pub const ADDI: u8 = 0x21;
    pub const SUB: u8 = 0x24;
    pub const SUBI: u8 = 0x25;
    pub const BZ: u8 = 0x42;
    pub const BZB: u8 = 0x43;
    pub const BP: u8 = 0x44;
    pub const BPB: u8 = 0x45;
    pub const SETL: u8 = 0xE3;
}

/// Decode an instruction word.
///
/// Opcodes outside the table are rejected, including the branch-if-negative
/// (0x40/0x41) and jump (0xF0/0xF1) encodings, which this machine does not
/// implement.
pub fn decode(word: InstructionWord) -> Result<Instruction, DecodeError> {
    let InstructionWord { opcode, x, y, z, yz } = word;

    let instruction = match opcode {
        Opcode::TRAP => Instruction::Trap { x, y, z },
        Opcode::MUL => Instruction::Mul { x, y, z },
        Opcode::MULI => Instruction::MulI { x, y, imm: z },
        Opcode::ADD => Instruction::Add { x, y, z },
        Opcode::ADDI => Instruction::AddI { x, y, imm: z },
        Opcode::SUB => Instruction::Sub { x, y, z },
        Opcode::SUBI => Instruction::SubI { x, y, imm: z },
        Opcode::BZ => Instruction::Bz { x, offset: yz },
        Opcode::BZB => Instruction::BzBack { x, offset: yz },
        Opcode::BP => Instruction::Bp { x, offset: yz },
        Opcode::BPB => Instruction::BpBack { x, offset: yz },
        Opcode::SETL => Instruction::Setl { x, imm: yz },
        _ => return Err(DecodeError::UnknownOpcode(opcode)),
    };

    Ok(instruction)
}

/// Encode an instruction back to its 4 raw bytes.
pub fn encode(instr: &Instruction) -> [u8; WORD_SIZE] {
    let triple = |op: u8, x: u8, y: u8, z: u8| [op, x, y, z];
    let wide = |op: u8, x: u8, yz: u16| {
        let [hi, lo] = yz.to_be_bytes();
        [op, x, hi, lo]
    };

    match *instr {
        Instruction::Trap { x, y, z } => triple(Opcode::TRAP, x, y, z),
        Instruction::Mul { x, y, z } => triple(Opcode::MUL, x, y, z),
        Instruction::MulI { x, y, imm } => triple(Opcode::MULI, x, y, imm),
        Instruction::Add { x, y, z } => triple(Opcode::ADD, x, y, z),
        Instruction::AddI { x, y, imm } => triple(Opcode::ADDI, x, y, imm),
        Instruction::Sub { x, y, z } => triple(Opcode::SUB, x, y, z),
        Instruction::SubI { x, y, imm } => triple(Opcode::SUBI, x, y, imm),
        Instruction::Bz { x, offset } => wide(Opcode::BZ, x, offset),
        Instruction::BzBack { x, offset } => wide(Opcode::BZB, x, offset),
        Instruction::Bp { x, offset } => wide(Opcode::BP, x, offset),
        Instruction::BpBack { x, offset } => wide(Opcode::BPB, x, offset),
        Instruction::Setl { x, imm } => wide(Opcode::SETL, x, imm),
    }
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_halt() {
        let instr = decode(InstructionWord::from_bytes([0, 0, 0, 0])).unwrap();
        assert_eq!(instr, Instruction::Trap { x: 0, y: 0, z: 0 });
    }

    #[test]
    fn test_decode_setl_reads_big_endian_immediate() {
        let instr = decode(InstructionWord::from_bytes([0xE3, 0x05, 0x00, 0x2A])).unwrap();
        assert_eq!(instr, Instruction::Setl { x: 5, imm: 42 });

        let instr = decode(InstructionWord::from_bytes([0xE3, 0x01, 0x12, 0x34])).unwrap();
        assert_eq!(instr, Instruction::Setl { x: 1, imm: 0x1234 });
    }

    #[test]
    fn test_decode_immediate_forms_use_z_byte() {
        let instr = decode(InstructionWord::from_bytes([0x21, 1, 2, 200])).unwrap();
        assert_eq!(instr, Instruction::AddI { x: 1, y: 2, imm: 200 });
    }

    #[test]
    fn test_fetch_matches_from_bytes() {
        let mut mem = Memory::new(8);
        mem.write_word(1, [0x44, 0x02, 0xAB, 0xCD]).unwrap();

        let fetched = InstructionWord::fetch(&mem, 1).unwrap();
        assert_eq!(fetched, InstructionWord::from_bytes([0x44, 0x02, 0xAB, 0xCD]));
        assert_eq!(fetched.yz, 0xABCD);
        assert!(InstructionWord::fetch(&mem, 2).is_err());
    }

    #[test]
    fn test_fetch_rejects_partial_and_overflowing_words() {
        // 6 bytes: word 1 is only half present
        let mem = Memory::new(6);

        assert!(InstructionWord::fetch(&mem, 0).is_ok());
        assert!(matches!(
            InstructionWord::fetch(&mem, 1),
            Err(MemoryError::AddressOutOfRange { offset: 4, size: 6 })
        ));
        assert!(matches!(
            InstructionWord::fetch(&mem, u64::MAX),
            Err(MemoryError::AddressOutOfRange { offset: u64::MAX, .. })
        ));
    }

    #[test]
    fn test_unsupported_opcodes_are_rejected() {
        for opcode in [0x40, 0x41, 0xF0, 0xF1, 0x99, 0xFF] {
            let err = decode(InstructionWord::from_bytes([opcode, 0, 0, 0])).unwrap_err();
            assert_eq!(err, DecodeError::UnknownOpcode(opcode));
        }
    }

    #[test]
    fn test_encode_decode_agree() {
        let cases = [
            Instruction::Trap { x: 0, y: 7, z: 1 },
            Instruction::Mul { x: 1, y: 2, z: 3 },
            Instruction::SubI { x: 9, y: 9, imm: 1 },
            Instruction::BpBack { x: 4, offset: 300 },
            Instruction::Setl { x: 255, imm: 0xFFFF },
        ];

        for instr in cases {
            let decoded = decode(InstructionWord::from_bytes(encode(&instr))).unwrap();
            assert_eq!(decoded, instr);
        }
    }
}
