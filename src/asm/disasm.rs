//! Disassembler.
//!
//! Converts instruction words back to the assembler's syntax.

use crate::cpu::decode::{decode, Instruction, InstructionWord};
use crate::cpu::memory::WORD_SIZE;

/// Disassemble a single instruction word to text.
pub fn disassemble_instruction(raw: [u8; WORD_SIZE]) -> String {
    match decode(InstructionWord::from_bytes(raw)) {
        Ok(decoded) => format_instruction(&decoded),
        Err(_) => "???".to_string(),
    }
}

/// Disassemble a slice of words into a listing.
pub fn disassemble(words: &[[u8; WORD_SIZE]]) -> String {
    let mut output = String::new();
    output.push_str("; Disassembly\n");
    output.push_str("; -----------\n\n");

    for (addr, raw) in words.iter().enumerate() {
        let line = disassemble_instruction(*raw);
        output.push_str(&format!("{:04}: {:<20} ; {}\n", addr, line, hex_word(raw)));
    }

    output
}

/// Format raw bytes as `e3 05 00 2a`.
pub fn hex_word(raw: &[u8; WORD_SIZE]) -> String {
    raw.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format a decoded instruction as assembly text.
pub fn format_instruction(instr: &Instruction) -> String {
    match *instr {
        Instruction::Trap { x, y, z } => format!("TRAP {},{},{}", x, y, z),

        Instruction::Mul { x, y, z } => format!("MUL  ${},${},${}", x, y, z),
        Instruction::MulI { x, y, imm } => format!("MUL  ${},${},{}", x, y, imm),
        Instruction::Add { x, y, z } => format!("ADD  ${},${},${}", x, y, z),
        Instruction::AddI { x, y, imm } => format!("ADD  ${},${},{}", x, y, imm),
        Instruction::Sub { x, y, z } => format!("SUB  ${},${},${}", x, y, z),
        Instruction::SubI { x, y, imm } => format!("SUB  ${},${},{}", x, y, imm),

        Instruction::Bz { x, offset } => format!("BZ   ${},{}", x, offset),
        Instruction::BzBack { x, offset } => format!("BZ   ${},-{}", x, offset),
        Instruction::Bp { x, offset } => format!("BP   ${},{}", x, offset),
        Instruction::BpBack { x, offset } => format!("BP   ${},-{}", x, offset),

        Instruction::Setl { x, imm } => format!("SETL ${},{}", x, imm),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assembler::assemble;

    #[test]
    fn test_disassemble_halt() {
        assert_eq!(disassemble_instruction([0, 0, 0, 0]), "TRAP 0,0,0");
    }

    #[test]
    fn test_disassemble_forms() {
        assert_eq!(disassemble_instruction([0x18, 1, 2, 3]), "MUL  $1,$2,$3");
        assert_eq!(disassemble_instruction([0x19, 1, 2, 3]), "MUL  $1,$2,3");
        assert_eq!(disassemble_instruction([0x45, 1, 0, 2]), "BP   $1,-2");
        assert_eq!(disassemble_instruction([0xE3, 5, 0, 42]), "SETL $5,42");
        assert_eq!(disassemble_instruction([0x99, 0, 0, 0]), "???");
    }

    #[test]
    fn test_listing_reassembles() {
        let words = assemble("SETL $1,3\nSUB $1,$1,1\nBP $1,-1\nTRAP 0,0,0").unwrap();

        let text: String = words
            .iter()
            .map(|w| disassemble_instruction(*w) + "\n")
            .collect();

        assert_eq!(assemble(&text).unwrap(), words);
        assert!(disassemble(&words).contains("0002: BP   $1,-1"));
    }
}
