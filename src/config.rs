//! Machine configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```json
//! { "memory_size": 1048576, "max_steps": 500000 }
//! ```

use crate::cpu::memory::DEFAULT_MEMORY_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Step budget used when none is given.
pub const DEFAULT_MAX_STEPS: u64 = 10_000;

/// Settings for one run of the machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MachineConfig {
    /// Memory size in bytes.
    pub memory_size: usize,
    /// Maximum instructions per run.
    pub max_steps: u64,
    /// Value placed in `$0` at load time.
    pub arg_count: u64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            memory_size: DEFAULT_MEMORY_SIZE,
            max_steps: DEFAULT_MAX_STEPS,
            arg_count: 1,
        }
    }
}

impl MachineConfig {
    /// Parse a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read a JSON config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_json_str(&text)
    }
}

/// Errors that can occur while reading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("invalid config: {0}")]
    Parse(String),
}
