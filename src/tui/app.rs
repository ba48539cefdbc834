//! Debugger application state and logic.

use crate::asm::disasm::disassemble_instruction;
use crate::cpu::memory::WORD_SIZE;
use crate::Machine;
use std::collections::HashSet;

/// Bytes shown per memory row.
pub const MEMORY_ROW_BYTES: usize = 8;

/// Debugger application state.
pub struct DebuggerApp {
    /// The machine being debugged.
    pub machine: Machine,
    /// Freshly loaded machine, restored on reset.
    initial: Machine,
    /// Breakpoints (by instruction pointer).
    pub breakpoints: HashSet<u64>,
    /// Is the debugger running continuously?
    pub running: bool,
    /// Should we quit?
    pub should_quit: bool,
    /// Status message to display.
    pub status: String,
    /// TRAP output produced so far.
    pub output: Vec<u8>,
    /// Memory view scroll offset, in rows.
    pub mem_scroll: usize,
}

impl DebuggerApp {
    /// Create a new debugger around a loaded machine.
    pub fn new(machine: Machine) -> Self {
        Self {
            initial: machine.clone(),
            machine,
            breakpoints: HashSet::new(),
            running: false,
            should_quit: false,
            status: "Ready. Press 's' to step, 'r' to run, 'q' to quit.".into(),
            output: Vec::new(),
            mem_scroll: 0,
        }
    }

    /// Step one instruction.
    pub fn step(&mut self) {
        if !self.machine.is_running() {
            self.status = format!("Machine stopped: {:?}", self.machine.state);
            self.running = false;
            return;
        }

        let ip = self.machine.regs.ip;
        match self.machine.step(&mut self.output) {
            Ok(instr) => {
                let text = crate::asm::disasm::format_instruction(&instr);
                self.status = format!("IP={:04}: {}", ip, text);
            }
            Err(e) => {
                self.status = format!("Error: {}", e);
                self.running = false;
            }
        }
    }

    /// Run until halt, breakpoint, or error.
    pub fn run(&mut self) {
        self.running = true;
        self.status = "Running...".into();
    }

    /// Run one iteration of continuous execution.
    pub fn tick(&mut self) {
        if !self.running {
            return;
        }

        if !self.machine.is_running() {
            self.running = false;
            self.status = format!("Stopped after {} steps", self.machine.steps);
            return;
        }

        self.step();

        // Stop before executing a breakpointed instruction
        let ip = self.machine.regs.ip;
        if self.running && self.breakpoints.contains(&ip) {
            self.running = false;
            self.status = format!("Breakpoint at IP={}", ip);
        }
    }

    /// Toggle breakpoint at the current instruction pointer.
    pub fn toggle_breakpoint(&mut self) {
        let ip = self.machine.regs.ip;
        if self.breakpoints.remove(&ip) {
            self.status = format!("Removed breakpoint at IP={}", ip);
        } else {
            self.breakpoints.insert(ip);
            self.status = format!("Set breakpoint at IP={}", ip);
        }
    }

    /// Restore the machine to its freshly loaded state.
    pub fn reset(&mut self) {
        self.machine = self.initial.clone();
        self.output.clear();
        self.running = false;
        self.status = "Reset. Ready.".into();
    }

    /// Number of memory rows available for scrolling.
    pub fn memory_rows(&self) -> usize {
        self.machine.mem.len().div_ceil(MEMORY_ROW_BYTES)
    }

    /// Get disassembly around the current instruction pointer.
    pub fn get_disassembly(&self, lines: usize) -> Vec<(u64, String, bool)> {
        let ip = self.machine.regs.ip;
        let start = ip.saturating_sub(lines as u64 / 2);

        (start..start.saturating_add(lines as u64))
            .filter_map(|addr| {
                let raw = self.machine.mem.read_word(addr).ok()?;
                Some((addr, disassemble_instruction(raw), addr == ip))
            })
            .collect()
    }

    /// Byte offset of the instruction the machine will execute next.
    pub fn ip_offset(&self) -> Option<usize> {
        usize::try_from(self.machine.regs.ip)
            .ok()?
            .checked_mul(WORD_SIZE)
    }
}

/// Run the debugger on a loaded machine.
pub fn run_debugger(machine: Machine) -> std::io::Result<()> {
    use crossterm::{
        event::{self, Event, KeyCode, KeyEventKind},
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
        ExecutableCommand,
    };
    use ratatui::prelude::*;
    use std::io::stdout;
    use std::time::Duration;

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut app = DebuggerApp::new(machine);

    loop {
        terminal.draw(|frame| {
            super::ui::draw(frame, &app);
        })?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') => app.should_quit = true,
                        KeyCode::Char('s') => {
                            app.running = false;
                            app.step();
                        }
                        KeyCode::Char('r') => app.run(),
                        KeyCode::Char('p') => {
                            app.running = false;
                            app.status = "Paused.".into();
                        }
                        KeyCode::Char('b') => app.toggle_breakpoint(),
                        KeyCode::Char('x') => app.reset(),
                        KeyCode::Up => {
                            app.mem_scroll = app.mem_scroll.saturating_sub(1);
                        }
                        KeyCode::Down => {
                            if app.mem_scroll + 1 < app.memory_rows() {
                                app.mem_scroll += 1;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        if app.running {
            app.tick();
        }

        if app.should_quit {
            break;
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assemble_image;

    fn app_for(source: &str) -> DebuggerApp {
        let image = assemble_image(source).unwrap();
        DebuggerApp::new(Machine::from_image(&image, 256, 1).unwrap())
    }

    #[test]
    fn test_step_and_reset() {
        let mut app = app_for("SETL $2,9\nTRAP 0,0,0");

        app.step();
        assert_eq!(app.machine.regs.get(2), 9);
        assert!(app.status.contains("SETL"));

        app.reset();
        assert_eq!(app.machine.regs.get(2), 0);
        assert_eq!(app.machine.regs.ip, 0);
        assert_eq!(app.machine.regs.get(1), 8);
    }

    #[test]
    fn test_breakpoint_stops_run() {
        let mut app = app_for("SETL $1,1\nSETL $2,2\nSETL $3,3\nTRAP 0,0,0");
        app.machine.regs.ip = 2;
        app.toggle_breakpoint();
        app.machine.regs.ip = 0;

        app.run();
        for _ in 0..10 {
            app.tick();
        }

        assert!(!app.running);
        assert_eq!(app.machine.regs.ip, 2);
        assert_eq!(app.machine.regs.get(3), 0);
    }

    #[test]
    fn test_disassembly_window() {
        let app = app_for("SETL $1,1\nTRAP 0,0,0");
        let lines = app.get_disassembly(4);

        assert_eq!(lines[0], (0, "SETL $1,1".to_string(), true));
        assert_eq!(lines[1].1, "TRAP 0,0,0");
        assert_eq!(lines.len(), 4);
    }
}
