//! Run summary.
//!
//! What the driver prints once a run is over, either as text or as JSON.
//! The report is written to its own stream so it never interleaves with TRAP
//! output on stdout.

use crate::cpu::{Machine, MachineState, StopReason};
use serde::Serialize;
use std::io::{self, Write};

/// Summary of a finished (or stopped) run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Instructions executed by the run.
    pub steps: u64,
    /// Why the run stopped, if it stopped cleanly.
    pub stop: Option<StopReason>,
    pub state: MachineState,
    pub ip: u64,
    /// Non-zero registers as `(index, host value)`.
    pub registers: Vec<(u8, u64)>,
    /// Fault message, if the run faulted.
    pub error: Option<String>,
}

impl RunReport {
    /// Capture the machine after a run.
    pub fn capture(machine: &Machine, steps: u64, stop: Option<StopReason>, error: Option<String>) -> Self {
        Self {
            steps,
            stop,
            state: machine.state,
            ip: machine.regs.ip,
            registers: machine.regs.non_zero().collect(),
            error,
        }
    }

    /// Render as pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Render as human-readable text.
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        text.push_str(&format!("Steps: {}\n", self.steps));
        text.push_str(&format!("State: {:?}\n", self.state));
        if let Some(stop) = self.stop {
            text.push_str(&format!("Stop:  {:?}\n", stop));
        }
        text.push_str(&format!("IP:    {}\n", self.ip));
        for (index, value) in &self.registers {
            text.push_str(&format!("${:<3} = {:#018x} ({})\n", index, value, value));
        }
        if let Some(error) = &self.error {
            text.push_str(&format!("Error: {}\n", error));
        }
        text
    }

    /// Write the report to `out`, as JSON or as text.
    pub fn write_to<W: Write>(&self, out: &mut W, json: bool) -> io::Result<()> {
        if json {
            let text = self.to_json().map_err(io::Error::from)?;
            writeln!(out, "{}", text)
        } else {
            writeln!(out)?;
            write!(out, "{}", self.to_text())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_and_render() {
        let mut machine = Machine::new(16);
        machine.load_program(&[[0xE3, 5, 0, 42], [0, 0, 0, 0]]).unwrap();
        let outcome = machine.run(10, &mut std::io::sink()).unwrap();

        let report = RunReport::capture(&machine, outcome.steps, Some(outcome.stop), None);

        assert_eq!(report.steps, 2);
        assert_eq!(report.registers, vec![(5, 42)]);
        assert!(report.to_text().contains("$5"));

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["state"], "Halted");
        assert_eq!(json["stop"], "Halted");
        assert_eq!(json["registers"][0][1], 42);
    }

    #[test]
    fn test_json_report_separate_from_trap_output() {
        let words = crate::asm::assemble(include_str!("../demos/hello.asm")).unwrap();
        let mut machine = Machine::new(1024);
        machine.load_program(&words).unwrap();

        let mut program_out = Vec::new();
        let outcome = machine.run(1000, &mut program_out).unwrap();
        let report = RunReport::capture(&machine, outcome.steps, Some(outcome.stop), None);

        let mut report_out = Vec::new();
        report.write_to(&mut report_out, true).unwrap();

        assert_eq!(program_out, b"Hello\n");
        let json: serde_json::Value = serde_json::from_slice(&report_out).unwrap();
        assert_eq!(json["stop"], "Halted");
        assert_eq!(json["steps"], outcome.steps);
    }

    #[test]
    fn test_text_report_starts_on_fresh_line() {
        let machine = Machine::new(16);
        let report = RunReport::capture(&machine, 0, None, Some("boom".into()));

        let mut out = Vec::new();
        report.write_to(&mut out, false).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("\nSteps: 0\n"));
        assert!(text.ends_with("Error: boom\n"));
    }
}
