// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;

use crate::manager::ManagerConfig;
use crate::session::SessionDefaults;

/// Stdio worker supervising CLI agents behind PTYs.
#[derive(Debug, Parser)]
#[command(name = "corral", version, about)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "CORRAL_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (json or text). Logs go to stderr; stdout carries
    /// protocol frames.
    #[arg(long, env = "CORRAL_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Output lines retained per session for `logs`.
    #[arg(long, env = "CORRAL_LOG_LINES", default_value = "1000")]
    pub log_lines: usize,

    /// Enable stall detection for new sessions.
    #[arg(long, env = "CORRAL_STALL")]
    pub stall: bool,

    /// Stall timeout in milliseconds for new sessions.
    #[arg(long, env = "CORRAL_STALL_TIMEOUT_MS", default_value = "30000")]
    pub stall_timeout_ms: u64,

    /// Ready-settle debounce in milliseconds.
    #[arg(long, env = "CORRAL_READY_SETTLE_MS", default_value = "100")]
    pub ready_settle_ms: u64,

    /// Task-complete settle in milliseconds.
    #[arg(long, env = "CORRAL_TASK_SETTLE_MS", default_value = "1500")]
    pub task_settle_ms: u64,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("invalid log format: {} (expected json or text)", self.log_format);
        }
        if self.log_lines == 0 {
            anyhow::bail!("--log-lines must be at least 1");
        }
        Ok(())
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            log_capacity: self.log_lines,
            defaults: SessionDefaults {
                stall_enabled: self.stall,
                stall_timeout: Duration::from_millis(self.stall_timeout_ms),
                ready_settle: Duration::from_millis(self.ready_settle_ms),
                task_settle: Duration::from_millis(self.task_settle_ms),
            },
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
