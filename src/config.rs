//! Bridge configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Smallest accepted `max_line_bytes`; shorter caps cannot hold an
/// `EVENT` line in the helper's JSON form.
pub const MIN_LINE_BYTES: usize = 64;

/// Deadlines (milliseconds) for the handshake stages and for commands.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Time allowed for the helper to print its `OK <address>` line.
    #[serde(default = "default_handshake_ms")]
    pub handshake_ms: u64,
    /// Time allowed to open the duplex channel at the advertised address.
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,
    /// Per-command response deadline.
    #[serde(default = "default_command_ms")]
    pub command_ms: u64,
    /// Grace period for the `shutdown` command and voluntary process exit.
    #[serde(default = "default_shutdown_ms")]
    pub shutdown_ms: u64,
}

impl TimeoutConfig {
    /// Handshake-data deadline.
    #[must_use]
    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }

    /// Channel-connect deadline.
    #[must_use]
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    /// Per-command deadline.
    #[must_use]
    pub fn command(&self) -> Duration {
        Duration::from_millis(self.command_ms)
    }

    /// Shutdown grace period.
    #[must_use]
    pub fn shutdown(&self) -> Duration {
        Duration::from_millis(self.shutdown_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_ms: default_handshake_ms(),
            connect_ms: default_connect_ms(),
            command_ms: default_command_ms(),
            shutdown_ms: default_shutdown_ms(),
        }
    }
}

fn default_handshake_ms() -> u64 {
    5000
}

fn default_connect_ms() -> u64 {
    5000
}

fn default_command_ms() -> u64 {
    5000
}

fn default_shutdown_ms() -> u64 {
    1000
}

/// Wire-level limits and escalation thresholds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProtocolConfig {
    /// Longest accepted inbound line, terminator excluded.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Consecutive mismatched responses before the session fails; 0 disables.
    #[serde(default = "default_desync_limit")]
    pub desync_limit: u32,
    /// Consecutive command timeouts before the session fails; 0 disables.
    #[serde(default = "default_timeout_limit")]
    pub timeout_limit: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: default_max_line_bytes(),
            desync_limit: default_desync_limit(),
            timeout_limit: default_timeout_limit(),
        }
    }
}

fn default_max_line_bytes() -> usize {
    4096
}

fn default_desync_limit() -> u32 {
    3
}

fn default_timeout_limit() -> u32 {
    3
}

/// Top-level configuration parsed from a TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Path to the helper executable.
    pub helper_path: PathBuf,
    /// Extra arguments for the helper; empty by default.
    #[serde(default)]
    pub helper_args: Vec<String>,
    /// Deadlines.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Wire limits.
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

impl BridgeConfig {
    /// Build a configuration with default timeouts and limits.
    #[must_use]
    pub fn new(helper_path: impl Into<PathBuf>) -> Self {
        Self {
            helper_path: helper_path.into(),
            helper_args: Vec::new(),
            timeouts: TimeoutConfig::default(),
            protocol: ProtocolConfig::default(),
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.helper_path.as_os_str().is_empty() {
            return Err(AppError::Config("helper_path must not be empty".into()));
        }

        let timeouts = [
            ("handshake_ms", self.timeouts.handshake_ms),
            ("connect_ms", self.timeouts.connect_ms),
            ("command_ms", self.timeouts.command_ms),
            ("shutdown_ms", self.timeouts.shutdown_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, ms)| *ms == 0) {
            return Err(AppError::Config(format!(
                "timeouts.{name} must be greater than zero"
            )));
        }

        if self.protocol.max_line_bytes < MIN_LINE_BYTES {
            return Err(AppError::Config(format!(
                "protocol.max_line_bytes must be at least {MIN_LINE_BYTES}"
            )));
        }

        Ok(())
    }
}
