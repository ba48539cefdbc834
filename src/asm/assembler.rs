//! Simple assembler for machine programs.
//!
//! Syntax:
//! ```text
//! ; Comment
//!         SETL $1,5        ; $1 = 5
//! LOOP:   ADD  $2,$2,3     ; immediate form when the last operand has no '$'
//!         SUB  $1,$1,1
//!         BP   $1,LOOP     ; label: relative offset and direction worked out
//!         BZ   $1,-3       ; explicit offset, negative means backward
//!         TRAP 0,0,0       ; halt
//!         WORD 0x00000000  ; raw data word
//! ```

use crate::asm::image::ProgramImage;
use crate::cpu::decode::{encode, Instruction};
use crate::cpu::memory::WORD_SIZE;
use std::collections::HashMap;
use thiserror::Error;

/// Assemble source code to a list of instruction words.
pub fn assemble(source: &str) -> Result<Vec<[u8; WORD_SIZE]>, AssemblerError> {
    let mut asm = Assembler::new();
    asm.assemble(source)
}

/// Assemble source code straight into a program image.
pub fn assemble_image(source: &str) -> Result<ProgramImage, AssemblerError> {
    assemble(source).map(ProgramImage::from_words)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchKind {
    Zero,
    Positive,
}

impl BranchKind {
    fn instruction(self, x: u8, offset: i64) -> Option<Instruction> {
        let distance = u16::try_from(offset.unsigned_abs()).ok()?;
        let backward = offset < 0;
        Some(match (self, backward) {
            (BranchKind::Zero, false) => Instruction::Bz { x, offset: distance },
            (BranchKind::Zero, true) => Instruction::BzBack { x, offset: distance },
            (BranchKind::Positive, false) => Instruction::Bp { x, offset: distance },
            (BranchKind::Positive, true) => Instruction::BpBack { x, offset: distance },
        })
    }
}

/// A branch whose target label is resolved in pass 2.
#[derive(Debug)]
struct Fixup {
    index: usize,
    label: String,
    line: usize,
    x: u8,
    kind: BranchKind,
}

/// The assembler state.
struct Assembler {
    /// Symbol table (label -> word address).
    symbols: HashMap<String, usize>,
    /// Branches waiting for their label.
    pending: Vec<Fixup>,
    /// Output words.
    output: Vec<[u8; WORD_SIZE]>,
}

impl Assembler {
    fn new() -> Self {
        Self {
            symbols: HashMap::new(),
            pending: Vec::new(),
            output: Vec::new(),
        }
    }

    fn assemble(&mut self, source: &str) -> Result<Vec<[u8; WORD_SIZE]>, AssemblerError> {
        // Pass 1: collect labels and generate code
        for (line_num, line) in source.lines().enumerate() {
            self.process_line(line, line_num + 1)?;
        }

        // Pass 2: resolve branch targets
        self.resolve_references()?;

        Ok(std::mem::take(&mut self.output))
    }

    fn process_line(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        // Remove comments
        let line = match line.find(';') {
            Some(idx) => &line[..idx],
            None => line,
        }
        .trim();

        if line.is_empty() {
            return Ok(());
        }

        // Label definition
        if let Some(colon_idx) = line.find(':') {
            let label = line[..colon_idx].trim().to_uppercase();
            if !is_identifier(&label) {
                return Err(AssemblerError::SyntaxError {
                    line: line_num,
                    message: format!("invalid label '{}'", label),
                });
            }
            if self.symbols.insert(label.clone(), self.output.len()).is_some() {
                return Err(AssemblerError::DuplicateLabel { line: line_num, label });
            }

            let rest = line[colon_idx + 1..].trim();
            if rest.is_empty() {
                return Ok(());
            }
            return self.process_instruction(rest, line_num);
        }

        self.process_instruction(line, line_num)
    }

    fn process_instruction(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        let (mnemonic, operands) = match line.split_once(char::is_whitespace) {
            Some((m, rest)) => (m.to_uppercase(), rest.trim()),
            None => (line.to_uppercase(), ""),
        };
        let args: Vec<&str> = if operands.is_empty() {
            Vec::new()
        } else {
            operands.split(',').map(str::trim).collect()
        };

        let word = match mnemonic.as_str() {
            // Directives
            "WORD" => {
                let [value] = expect_args::<1>(&args, &mnemonic, line_num)?;
                let value = parse_number(value, line_num)?;
                let value = u32::try_from(value)
                    .map_err(|_| AssemblerError::ValueOutOfRange { line: line_num, value })?;
                value.to_be_bytes()
            }

            // Instructions
            "TRAP" => {
                let [x, y, z] = expect_args::<3>(&args, &mnemonic, line_num)?;
                encode(&Instruction::Trap {
                    x: parse_byte(x, line_num)?,
                    y: parse_byte(y, line_num)?,
                    z: parse_byte(z, line_num)?,
                })
            }

            "MUL" | "ADD" | "SUB" => {
                let [x, y, z] = expect_args::<3>(&args, &mnemonic, line_num)?;
                let x = parse_register(x, line_num)?;
                let y = parse_register(y, line_num)?;
                let instr = if z.starts_with('$') {
                    let z = parse_register(z, line_num)?;
                    match mnemonic.as_str() {
                        "MUL" => Instruction::Mul { x, y, z },
                        "ADD" => Instruction::Add { x, y, z },
                        _ => Instruction::Sub { x, y, z },
                    }
                } else {
                    let imm = parse_byte(z, line_num)?;
                    match mnemonic.as_str() {
                        "MUL" => Instruction::MulI { x, y, imm },
                        "ADD" => Instruction::AddI { x, y, imm },
                        _ => Instruction::SubI { x, y, imm },
                    }
                };
                encode(&instr)
            }

            "BZ" | "BP" => {
                let [x, target] = expect_args::<2>(&args, &mnemonic, line_num)?;
                let x = parse_register(x, line_num)?;
                let kind = if mnemonic == "BZ" { BranchKind::Zero } else { BranchKind::Positive };

                if is_identifier(target) {
                    self.pending.push(Fixup {
                        index: self.output.len(),
                        label: target.to_uppercase(),
                        line: line_num,
                        x,
                        kind,
                    });
                    // Placeholder, patched in pass 2
                    [0; WORD_SIZE]
                } else {
                    let offset = parse_number(target, line_num)?;
                    let instr = kind
                        .instruction(x, offset)
                        .ok_or(AssemblerError::ValueOutOfRange { line: line_num, value: offset })?;
                    encode(&instr)
                }
            }

            "SETL" => {
                let [x, imm] = expect_args::<2>(&args, &mnemonic, line_num)?;
                let x = parse_register(x, line_num)?;
                let value = parse_number(imm, line_num)?;
                let imm = u16::try_from(value)
                    .map_err(|_| AssemblerError::ValueOutOfRange { line: line_num, value })?;
                encode(&Instruction::Setl { x, imm })
            }

            _ => {
                return Err(AssemblerError::UnknownMnemonic {
                    line: line_num,
                    mnemonic,
                })
            }
        };

        self.output.push(word);
        Ok(())
    }

    fn resolve_references(&mut self) -> Result<(), AssemblerError> {
        for fixup in &self.pending {
            let target = *self.symbols.get(&fixup.label).ok_or_else(|| {
                AssemblerError::UndefinedLabel {
                    line: fixup.line,
                    label: fixup.label.clone(),
                }
            })?;

            let offset = target as i64 - fixup.index as i64;
            let instr = fixup
                .kind
                .instruction(fixup.x, offset)
                .ok_or(AssemblerError::ValueOutOfRange { line: fixup.line, value: offset })?;
            self.output[fixup.index] = encode(&instr);
        }
        Ok(())
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn expect_args<'a, const N: usize>(
    args: &[&'a str],
    mnemonic: &str,
    line: usize,
) -> Result<[&'a str; N], AssemblerError> {
    <[&str; N]>::try_from(args).map_err(|_| AssemblerError::SyntaxError {
        line,
        message: format!("{} expects {} operands, found {}", mnemonic, N, args.len()),
    })
}

fn parse_number(text: &str, line: usize) -> Result<i64, AssemblerError> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };

    let magnitude = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else {
        digits.parse::<i64>()
    }
    .map_err(|_| AssemblerError::SyntaxError {
        line,
        message: format!("invalid number '{}'", text),
    })?;

    Ok(if negative { -magnitude } else { magnitude })
}

fn parse_byte(text: &str, line: usize) -> Result<u8, AssemblerError> {
    let value = parse_number(text, line)?;
    u8::try_from(value).map_err(|_| AssemblerError::ValueOutOfRange { line, value })
}

fn parse_register(text: &str, line: usize) -> Result<u8, AssemblerError> {
    let index = text.strip_prefix('$').ok_or_else(|| AssemblerError::SyntaxError {
        line,
        message: format!("expected register, found '{}'", text),
    })?;
    parse_byte(index, line)
}

/// Errors that can occur during assembly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblerError {
    #[error("syntax error on line {line}: {message}")]
    SyntaxError { line: usize, message: String },

    #[error("unknown mnemonic on line {line}: {mnemonic}")]
    UnknownMnemonic { line: usize, mnemonic: String },

    #[error("undefined label on line {line}: {label}")]
    UndefinedLabel { line: usize, label: String },

    #[error("duplicate label on line {line}: {label}")]
    DuplicateLabel { line: usize, label: String },

    #[error("value out of range on line {line}: {value}")]
    ValueOutOfRange { line: usize, value: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::Machine;

    #[test]
    fn test_assemble_simple() {
        let source = r#"
            ; Simple test program
            SETL $5,42
            MUL  $1,$2,$3
            MUL  $1,$2,3
            TRAP 0,0,0
        "#;

        let result = assemble(source).unwrap();
        assert_eq!(result, vec![
            [0xE3, 5, 0x00, 0x2A],
            [0x18, 1, 2, 3],
            [0x19, 1, 2, 3],
            [0x00, 0, 0, 0],
        ]);
    }

    #[test]
    fn test_numeric_branches() {
        let result = assemble("BP $1,-2\nBZ $2,0x10").unwrap();
        assert_eq!(result, vec![[0x45, 1, 0, 2], [0x42, 2, 0, 0x10]]);
    }

    #[test]
    fn test_assemble_with_labels() {
        let source = r#"
                SETL $1,4
        loop:   SUB  $1,$1,1
                BZ   $1,done
                BP   $1,loop
        done:   TRAP 0,0,0
        "#;

        let result = assemble(source).unwrap();
        assert_eq!(result[2], [0x42, 1, 0, 2]);
        assert_eq!(result[3], [0x45, 1, 0, 2]);

        let mut machine = Machine::new(64);
        machine.load_program(&result).unwrap();
        machine.run(100, &mut std::io::sink()).unwrap();
        assert!(machine.is_halted());
        assert_eq!(machine.regs.get(1), 0);
    }

    #[test]
    fn test_demo_programs() {
        let hello = assemble(include_str!("../../demos/hello.asm")).unwrap();
        let mut machine = Machine::new(256);
        machine.load_program(&hello).unwrap();
        let mut out = Vec::new();
        machine.run(100, &mut out).unwrap();
        assert_eq!(out, b"Hello\n");

        let factorial = assemble(include_str!("../../demos/factorial.asm")).unwrap();
        let mut machine = Machine::new(256);
        machine.load_program(&factorial).unwrap();
        machine.run(100, &mut std::io::sink()).unwrap();
        assert!(machine.is_halted());
        assert_eq!(machine.regs.get(2), 120);
    }

    #[test]
    fn test_assemble_data() {
        let result = assemble("WORD 0x12345678\nWORD 7").unwrap();
        assert_eq!(result, vec![[0x12, 0x34, 0x56, 0x78], [0, 0, 0, 7]]);
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            assemble("JMP 3").unwrap_err(),
            AssemblerError::UnknownMnemonic { line: 1, mnemonic: "JMP".into() }
        );
        assert_eq!(
            assemble("\nBZ $1,nowhere").unwrap_err(),
            AssemblerError::UndefinedLabel { line: 2, label: "NOWHERE".into() }
        );
        assert_eq!(
            assemble("ADD $1,$2,256").unwrap_err(),
            AssemblerError::ValueOutOfRange { line: 1, value: 256 }
        );
        assert_eq!(
            assemble("SETL $1,70000").unwrap_err(),
            AssemblerError::ValueOutOfRange { line: 1, value: 70000 }
        );
        assert!(matches!(
            assemble("ADD 1,$2,$3").unwrap_err(),
            AssemblerError::SyntaxError { line: 1, .. }
        ));
        assert!(matches!(
            assemble("SETL $1").unwrap_err(),
            AssemblerError::SyntaxError { line: 1, .. }
        ));
        assert!(matches!(
            assemble("a:\na: TRAP 0,0,0").unwrap_err(),
            AssemblerError::DuplicateLabel { line: 2, .. }
        ));
    }
}
