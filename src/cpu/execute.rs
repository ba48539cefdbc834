//! Execution engine.
//!
//! Implements the fetch-decode-execute cycle and all instruction behaviors.

use crate::asm::disasm::format_instruction;
use crate::cpu::decode::{self, DecodeError, Instruction, InstructionWord, TRAP_HALT, TRAP_WRITE_STRING};
use crate::cpu::memory::{Memory, MemoryError, WORD_SIZE};
use crate::cpu::registers::{Registers, TRAP_POINTER_REGISTER};
use serde::{Deserialize, Serialize};
use std::io::Write;
use thiserror::Error;

/// Machine execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineState {
    /// Ready to execute the next instruction.
    Running,
    /// A TRAP halt was executed. Final.
    Halted,
    /// A fatal execution error stopped the machine.
    Faulted,
}

/// Why a successful `run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The machine executed a TRAP halt.
    Halted,
    /// The step budget ran out; the machine can be resumed.
    BudgetExhausted,
}

/// Result of a successful `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Instructions executed by this call.
    pub steps: u64,
    pub stop: StopReason,
}

/// The machine: memory, registers and execution bookkeeping.
#[derive(Clone, Serialize)]
pub struct Machine {
    /// Register file and instruction pointer.
    pub regs: Registers,
    /// Main memory.
    pub mem: Memory,
    /// Current execution state.
    pub state: MachineState,
    /// Total instructions executed over the machine's lifetime.
    pub steps: u64,
    /// Last executed instruction (for debugging).
    last_instr: Option<Instruction>,
}

impl Machine {
    /// Create a machine with `memory_size` bytes of zeroed memory.
    pub fn new(memory_size: usize) -> Self {
        Self {
            regs: Registers::new(),
            mem: Memory::new(memory_size),
            state: MachineState::Running,
            steps: 0,
            last_instr: None,
        }
    }

    /// Reset registers, memory and bookkeeping. Memory size is kept.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.mem.clear();
        self.state = MachineState::Running;
        self.steps = 0;
        self.last_instr = None;
    }

    /// Copy instruction words to the start of memory.
    pub fn load_program(&mut self, words: &[[u8; WORD_SIZE]]) -> Result<(), MemoryError> {
        self.mem.load_program(words)
    }

    /// Execute a single instruction, sending TRAP output to `out`.
    ///
    /// Returns the instruction that was executed. On error the machine is
    /// left `Faulted` and the faulting instruction has changed nothing.
    pub fn step<W: Write>(&mut self, out: &mut W) -> Result<Instruction, ExecError> {
        if self.state != MachineState::Running {
            return Err(ExecError::NotRunning(self.state));
        }

        let ip = self.regs.ip;
        let result = self.fetch_decode(ip).and_then(|instr| {
            tracing::trace!(ip, text = %format_instruction(&instr), "execute");
            self.execute(instr, out).map(|()| instr)
        });

        match result {
            Ok(instr) => {
                self.steps += 1;
                self.last_instr = Some(instr);
                Ok(instr)
            }
            Err(e) => {
                tracing::warn!(ip, error = %e, "machine faulted");
                self.state = MachineState::Faulted;
                Err(e)
            }
        }
    }

    /// Run until halt, fault, or `max_steps` instructions have executed.
    pub fn run<W: Write>(&mut self, max_steps: u64, out: &mut W) -> Result<RunOutcome, ExecError> {
        if self.state == MachineState::Faulted {
            return Err(ExecError::NotRunning(self.state));
        }

        let mut steps = 0;

        while self.state == MachineState::Running && steps < max_steps {
            self.step(out)?;
            steps += 1;
        }

        let stop = if self.state == MachineState::Halted {
            tracing::debug!(steps, ip = self.regs.ip, "halted");
            StopReason::Halted
        } else {
            tracing::debug!(steps, ip = self.regs.ip, "step budget exhausted");
            StopReason::BudgetExhausted
        };

        Ok(RunOutcome { steps, stop })
    }

    /// [`Machine::run`] with TRAP output going to the process stdout.
    pub fn run_stdout(&mut self, max_steps: u64) -> Result<RunOutcome, ExecError> {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let outcome = self.run(max_steps, &mut lock);
        lock.flush().map_err(|e| ExecError::Output(e.to_string()))?;
        outcome
    }

    fn fetch_decode(&self, ip: u64) -> Result<Instruction, ExecError> {
        let word = InstructionWord::fetch(&self.mem, ip)
            .map_err(|_| ExecError::OutOfBoundsFetch { ip })?;

        decode::decode(word).map_err(|e| match e {
            DecodeError::UnknownOpcode(opcode) => ExecError::UnknownOpcode { opcode, ip },
        })
    }

    /// Execute a decoded instruction.
    fn execute<W: Write>(&mut self, instr: Instruction, out: &mut W) -> Result<(), ExecError> {
        match instr {
            // ==================== System ====================

            Instruction::Trap { x, y, z } => match (x, y, z) {
                TRAP_HALT => {
                    self.state = MachineState::Halted;
                    return Ok(());
                }
                TRAP_WRITE_STRING => self.trap_write_string(out)?,
                _ => {}
            },

            // ==================== Arithmetic ====================

            Instruction::Mul { x, y, z } => {
                self.regs.with_host_order(&[x, y, z], |r| {
                    r[x as usize] = r[y as usize].wrapping_mul(r[z as usize]);
                });
            }

            Instruction::MulI { x, y, imm } => {
                self.regs.with_host_order(&[x, y], |r| {
                    r[x as usize] = r[y as usize].wrapping_mul(imm as u64);
                });
            }

            Instruction::Add { x, y, z } => {
                self.regs.with_host_order(&[x, y, z], |r| {
                    r[x as usize] = r[y as usize].wrapping_add(r[z as usize]);
                });
            }

            Instruction::AddI { x, y, imm } => {
                self.regs.with_host_order(&[x, y], |r| {
                    r[x as usize] = r[y as usize].wrapping_add(imm as u64);
                });
            }

            Instruction::Sub { x, y, z } => {
                self.regs.with_host_order(&[x, y, z], |r| {
                    r[x as usize] = r[y as usize].wrapping_sub(r[z as usize]);
                });
            }

            Instruction::SubI { x, y, imm } => {
                self.regs.with_host_order(&[x, y], |r| {
                    r[x as usize] = r[y as usize].wrapping_sub(imm as u64);
                });
            }

            // ==================== Branches ====================

            Instruction::Bz { x, offset } => {
                if self.regs.with_host_order(&[x], |r| r[x as usize] == 0) {
                    self.regs.branch_forward(offset);
                    return Ok(());
                }
            }

            Instruction::BzBack { x, offset } => {
                if self.regs.with_host_order(&[x], |r| r[x as usize] == 0) {
                    self.regs.branch_backward(offset);
                    return Ok(());
                }
            }

            Instruction::Bp { x, offset } => {
                if self.regs.with_host_order(&[x], |r| r[x as usize] > 0) {
                    self.regs.branch_forward(offset);
                    return Ok(());
                }
            }

            Instruction::BpBack { x, offset } => {
                if self.regs.with_host_order(&[x], |r| r[x as usize] > 0) {
                    self.regs.branch_backward(offset);
                    return Ok(());
                }
            }

            // ==================== Immediate load ====================

            Instruction::Setl { x, imm } => {
                self.regs.with_host_order(&[x], |r| r[x as usize] = imm as u64);
            }
        }

        self.regs.advance_ip();
        Ok(())
    }

    /// TRAP 0,7,1: `$255 / 8` is a byte offset to a NUL-terminated string.
    fn trap_write_string<W: Write>(&mut self, out: &mut W) -> Result<(), ExecError> {
        let offset = self.regs.get(TRAP_POINTER_REGISTER) / 8;
        let bytes = self
            .mem
            .read_c_string(offset)
            .map_err(|_| ExecError::OutOfBoundsAccess { offset })?;

        out.write_all(bytes)
            .map_err(|e| ExecError::Output(e.to_string()))
    }

    /// Get the last executed instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }

    /// Check if the machine has halted.
    pub fn is_halted(&self) -> bool {
        self.state == MachineState::Halted
    }

    /// Check if the machine can execute more instructions.
    pub fn is_running(&self) -> bool {
        self.state == MachineState::Running
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("state", &self.state)
            .field("steps", &self.steps)
            .field("regs", &self.regs)
            .field("mem", &self.mem)
            .finish()
    }
}

/// Errors that stop execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("machine not running: {0:?}")]
    NotRunning(MachineState),

    #[error("unknown opcode {opcode:#04x} at ip {ip}")]
    UnknownOpcode { opcode: u8, ip: u64 },

    #[error("instruction fetch out of bounds at ip {ip}")]
    OutOfBoundsFetch { ip: u64 },

    #[error("memory access out of bounds at offset {offset:#x}")]
    OutOfBoundsAccess { offset: u64 },

    #[error("output error: {0}")]
    Output(String),
}
