//! WebAssembly bindings for the emulator.
//!
//! This module provides JavaScript-friendly wrappers around the core machine.

use wasm_bindgen::prelude::*;
use crate::{LoadError, Machine, MachineConfig, ProgramImage};
use crate::asm::assembler::assemble_image;
use crate::asm::disasm::{disassemble_instruction, format_instruction};
use crate::asm::image::read_image;

/// Initialize panic hook for better error messages in console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// WebAssembly-friendly machine wrapper.
#[wasm_bindgen]
pub struct WasmMachine {
    machine: Machine,
    image: ProgramImage,
    config: MachineConfig,
    output: Vec<u8>,
}

#[wasm_bindgen]
impl WasmMachine {
    /// Create an empty machine with the default memory size.
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        let config = MachineConfig::default();
        Self {
            machine: Machine::new(config.memory_size),
            image: ProgramImage::new(),
            config,
            output: Vec::new(),
        }
    }

    /// Change the memory size used by subsequent loads.
    #[wasm_bindgen]
    pub fn set_memory_size(&mut self, bytes: usize) {
        self.config.memory_size = bytes;
    }

    /// Load a program from assembly source code. Returns the word count.
    #[wasm_bindgen]
    pub fn load_asm(&mut self, source: &str) -> Result<usize, JsError> {
        let image = assemble_image(source)
            .map_err(|e| JsError::new(&e.to_string()))?;
        self.install(image)
    }

    /// Load a program from image bytes. Returns the word count.
    #[wasm_bindgen]
    pub fn load_image(&mut self, bytes: &[u8]) -> Result<usize, JsError> {
        let image = read_image(&mut &bytes[..])
            .map_err(|e| JsError::new(&e.to_string()))?;
        self.install(image)
    }

    fn install(&mut self, image: ProgramImage) -> Result<usize, JsError> {
        self.machine = self.build(&image).map_err(|e| JsError::new(&e.to_string()))?;
        self.image = image;
        self.output.clear();
        Ok(self.image.len())
    }

    /// Build a machine for `image` under the current config without touching
    /// the loaded program.
    fn build(&self, image: &ProgramImage) -> Result<Machine, LoadError> {
        Machine::from_image(image, self.config.memory_size, self.config.arg_count)
    }

    /// Rebuild the machine from the stored image. On failure the machine and
    /// image are left as they were.
    fn reload(&mut self) -> Result<(), LoadError> {
        self.machine = self.build(&self.image)?;
        self.output.clear();
        Ok(())
    }

    /// Step one instruction. Returns the disassembled instruction.
    #[wasm_bindgen]
    pub fn step(&mut self) -> Result<String, JsError> {
        let instr = self.machine.step(&mut self.output)
            .map_err(|e| JsError::new(&e.to_string()))?;

        Ok(format_instruction(&instr))
    }

    /// Run until halt or `max_steps`. Returns the total step count.
    #[wasm_bindgen]
    pub fn run(&mut self, max_steps: u32) -> Result<u64, JsError> {
        self.machine.run(max_steps as u64, &mut self.output)
            .map_err(|e| JsError::new(&e.to_string()))?;
        Ok(self.machine.steps)
    }

    /// Reset to the freshly loaded program.
    #[wasm_bindgen]
    pub fn reset(&mut self) -> Result<(), JsError> {
        self.reload().map_err(|e| JsError::new(&e.to_string()))
    }

    /// Check if the machine can keep running.
    #[wasm_bindgen]
    pub fn is_running(&self) -> bool {
        self.machine.is_running()
    }

    /// Check if the machine has halted.
    #[wasm_bindgen]
    pub fn is_halted(&self) -> bool {
        self.machine.is_halted()
    }

    /// Total executed instructions.
    #[wasm_bindgen]
    pub fn steps(&self) -> u64 {
        self.machine.steps
    }

    /// Instruction pointer, in words.
    #[wasm_bindgen]
    pub fn ip(&self) -> u64 {
        self.machine.regs.ip
    }

    /// Host-order value of a register.
    #[wasm_bindgen]
    pub fn register(&self, index: u8) -> u64 {
        self.machine.regs.get(index)
    }

    /// State as string.
    #[wasm_bindgen]
    pub fn state(&self) -> String {
        format!("{:?}", self.machine.state)
    }

    /// Byte at a memory offset (0 outside memory).
    #[wasm_bindgen]
    pub fn memory_at(&self, offset: u64) -> u8 {
        self.machine.mem.read_u8(offset).unwrap_or(0)
    }

    /// A window of memory.
    #[wasm_bindgen]
    pub fn memory_slice(&self, start: usize, len: usize) -> Vec<u8> {
        self.machine.mem.dump(start, len).to_vec()
    }

    /// TRAP output collected so far, drained.
    #[wasm_bindgen]
    pub fn take_output(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.output).into_owned();
        self.output.clear();
        text
    }

    /// Machine summary as a JSON string.
    #[wasm_bindgen]
    pub fn registers_json(&self) -> Result<String, JsError> {
        let report = crate::RunReport::capture(&self.machine, self.machine.steps, None, None);
        report.to_json().map_err(|e| JsError::new(&e.to_string()))
    }

    /// Non-zero registers as a JS array of `[index, value]` pairs.
    #[wasm_bindgen]
    pub fn registers_array(&self) -> js_sys::Array {
        self.machine
            .regs
            .non_zero()
            .map(|(index, value)| {
                js_sys::Array::of2(&JsValue::from(index), &js_sys::BigInt::from(value).into())
            })
            .collect()
    }
}

impl Default for WasmMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Assemble source code and return the image bytes.
#[wasm_bindgen]
pub fn wasm_assemble(source: &str) -> Result<Vec<u8>, JsError> {
    let image = assemble_image(source)
        .map_err(|e| JsError::new(&e.to_string()))?;
    image.to_bytes().map_err(|e| JsError::new(&e.to_string()))
}

/// Disassemble a single 32-bit word (big-endian byte order).
#[wasm_bindgen]
pub fn wasm_disassemble(word: u32) -> String {
    disassemble_instruction(word.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(source: &str) -> WasmMachine {
        let mut wasm = WasmMachine::new();
        let image = assemble_image(source).unwrap();
        wasm.machine = wasm.build(&image).unwrap();
        wasm.image = image;
        wasm
    }

    #[test]
    fn test_failed_reload_keeps_program() {
        let mut wasm = loaded("SETL $1,1\nTRAP 0,0,0");
        wasm.machine.run(10, &mut wasm.output).unwrap();

        wasm.set_memory_size(0);
        let err = wasm.reload().unwrap_err();
        assert_eq!(err, LoadError::ProgramTooLarge { size: 8, budget: 0 });

        // neither the image nor the halted machine was touched
        assert_eq!(wasm.image.len(), 2);
        assert!(wasm.machine.is_halted());
        assert_eq!(wasm.machine.regs.get(1), 1);

        wasm.set_memory_size(64);
        wasm.reload().unwrap();
        assert!(wasm.machine.is_running());
        assert_eq!(wasm.machine.regs.get(1), 8);
        wasm.machine.run(10, &mut wasm.output).unwrap();
        assert_eq!(wasm.machine.regs.get(1), 1);
    }
}
