//! Configuration structures for esm-linker.
//!
//! This module defines configuration options for the linker:
//! - [`LinkerConfig`]: Top-level configuration containing all settings
//! - [`ExecutionConfig`]: Default evaluation guards (timeout, interrupt)

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level linker configuration.
///
/// It can be loaded from TOML files (see [`LinkerConfig::from_toml`]) or
/// built in code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LinkerConfig {
    /// Default evaluation settings.
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// Evaluation configuration.
///
/// These settings are the defaults used when a module graph is run by the
/// host helpers. Explicit `evaluate` calls pass their own options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Evaluation timeout in milliseconds.
    ///
    /// `None` disables the timeout watchdog.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Terminate evaluation when the process receives `SIGINT`.
    #[serde(default = "defaults::break_on_sigint")]
    pub break_on_sigint: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            break_on_sigint: defaults::break_on_sigint(),
        }
    }
}

impl ExecutionConfig {
    /// Get the timeout as a `Duration`.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn break_on_sigint() -> bool {
        false
    }
}
