//! Session stage model and lifecycle helpers.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle stage of a helper session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Helper process is being spawned.
    Starting,
    /// Waiting for the `OK <address>` line on the helper's stdout.
    AwaitingHandshakeData,
    /// Opening the duplex channel at the advertised address.
    ConnectingChannel,
    /// Duplex channel open; commands may be sent.
    Connected,
    /// Irrecoverable failure; the session must be discarded.
    Failed,
    /// Torn down on request after being connected.
    Closed,
}

impl Stage {
    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }

    /// Determine whether a lifecycle transition is permitted.
    ///
    /// Stages only advance one step along
    /// `Starting → AwaitingHandshakeData → ConnectingChannel → Connected → Closed`;
    /// any non-terminal stage may drop to `Failed`.
    #[must_use]
    pub fn can_transition_to(self, next: Stage) -> bool {
        matches!(
            (self, next),
            (Self::Starting, Self::AwaitingHandshakeData)
                | (Self::AwaitingHandshakeData, Self::ConnectingChannel)
                | (Self::ConnectingChannel, Self::Connected)
                | (Self::Connected, Self::Closed)
                | (
                    Self::Starting
                        | Self::AwaitingHandshakeData
                        | Self::ConnectingChannel
                        | Self::Connected,
                    Self::Failed
                )
        )
    }

    /// Snake-case name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::AwaitingHandshakeData => "awaiting_handshake_data",
            Self::ConnectingChannel => "connecting_channel",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptive snapshot of a connected session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionInfo {
    /// Unique session identifier, used as the `session_id` log field.
    pub id: String,
    /// Helper process id, if the OS reported one.
    pub helper_pid: Option<u32>,
    /// Duplex channel address announced during the handshake.
    pub address: String,
    /// When the helper was spawned.
    pub started_at: DateTime<Utc>,
    /// When the duplex channel was opened.
    pub connected_at: DateTime<Utc>,
}

/// Generate a fresh session identifier.
#[must_use]
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}
