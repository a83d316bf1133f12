//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Reason a session failed irrecoverably.
///
/// Delivered to the observer exactly once and carried by
/// [`AppError::Failed`]. Every reason maps to a stable kebab-case code via
/// [`FailureReason::code`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The first stdout line of the helper was not `OK <address>`.
    InvalidHandshake(String),
    /// A handshake stage did not complete within its deadline.
    Timeout(String),
    /// The helper process exited (or closed stdout) unexpectedly.
    ProcessExited(String),
    /// The duplex channel could not be opened at the advertised address.
    ConnectFailed(String),
    /// The helper closed the duplex channel.
    ChannelClosed,
    /// Reading from or writing to the duplex channel failed.
    ChannelError(String),
    /// Too many consecutive responses did not match the pending command.
    ProtocolDesync(u32),
    /// Too many consecutive commands timed out.
    PeerUnresponsive(u32),
}

impl FailureReason {
    /// Stable machine-readable code for this reason.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidHandshake(_) => "invalid-handshake",
            Self::Timeout(_) => "timeout",
            Self::ProcessExited(_) => "process-exited",
            Self::ConnectFailed(_) => "connect-failed",
            Self::ChannelClosed => "channel-closed",
            Self::ChannelError(_) => "channel-error",
            Self::ProtocolDesync(_) => "protocol-desync",
            Self::PeerUnresponsive(_) => "peer-unresponsive",
        }
    }
}

impl Display for FailureReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let code = self.code();
        match self {
            Self::InvalidHandshake(line) => write!(f, "{code}: unexpected first line {line:?}"),
            Self::Timeout(stage) => write!(f, "{code}: {stage}"),
            Self::ProcessExited(detail)
            | Self::ConnectFailed(detail)
            | Self::ChannelError(detail) => write!(f, "{code}: {detail}"),
            Self::ChannelClosed => write!(f, "{code}: helper closed the channel"),
            Self::ProtocolDesync(count) => {
                write!(f, "{code}: {count} consecutive mismatched responses")
            }
            Self::PeerUnresponsive(count) => {
                write!(f, "{code}: {count} consecutive command timeouts")
            }
        }
    }
}

/// Application error enumeration covering all failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The helper executable could not be started.
    Spawn(String),
    /// The session failed and must be discarded.
    Failed(FailureReason),
    /// A command was issued while the session is not connected.
    NotConnected,
    /// A command was issued while another one is still pending.
    Busy,
    /// The helper answered the command with `ERROR <reason>`.
    Command(String),
    /// No response arrived before the command deadline.
    Timeout(String),
    /// A line from the helper could not be decoded.
    Decode(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether this error ends the session it came from.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Spawn(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Failed(reason) => write!(f, "session failed: {reason}"),
            Self::NotConnected => write!(f, "not-connected"),
            Self::Busy => write!(f, "busy"),
            Self::Command(reason) => write!(f, "command: {reason}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<FailureReason> for AppError {
    fn from(reason: FailureReason) -> Self {
        Self::Failed(reason)
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
