//! Helper startup handshake.
//!
//! After the helper process is spawned, the bridge walks an explicit state
//! machine before any command may be sent:
//!
//! 1. **Starting**: the process exists; the handshake deadline starts.
//! 2. **`AwaitingHandshakeData`**: bytes from the helper's stdout are
//!    accumulated until the first complete line. It must read
//!    `OK <address>`; anything else is an invalid handshake.
//! 3. **`ConnectingChannel`**: the duplex channel at `<address>` is opened
//!    through a [`ChannelConnector`] within the connect timeout.
//! 4. **Connected**: the handshake is done.
//!
//! Every waiting state also watches the process exit signal, so a helper
//! that dies mid-handshake fails the session immediately with
//! `process-exited` rather than waiting for a timeout. Bytes that arrive on
//! stdout after the handshake line are kept and handed back to the caller.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::errors::FailureReason;
use crate::models::Stage;
use crate::port::connector::{ChannelConnector, DuplexChannel};
use crate::port::line_buffer::LineBuffer;
use crate::port::spawner::{wait_for_exit, ExitSignal};
use crate::{AppError, Result};

/// Result of a successful handshake.
#[derive(Debug)]
pub struct Connected {
    /// Address announced by the helper.
    pub address: String,
    /// The opened duplex channel.
    pub channel: DuplexChannel,
}

/// Handshake state, one variant per stage the handshake can occupy.
#[derive(Debug)]
enum HandshakeState {
    Starting,
    AwaitingHandshakeData { deadline: Instant },
    ConnectingChannel { address: String },
    Connected(Connected),
    Failed(FailureReason),
}

impl HandshakeState {
    fn stage(&self) -> Stage {
        match self {
            Self::Starting => Stage::Starting,
            Self::AwaitingHandshakeData { .. } => Stage::AwaitingHandshakeData,
            Self::ConnectingChannel { .. } => Stage::ConnectingChannel,
            Self::Connected(_) => Stage::Connected,
            Self::Failed(_) => Stage::Failed,
        }
    }
}

/// Parse the handshake line. Returns the announced address.
///
/// # Errors
///
/// Returns `FailureReason::InvalidHandshake` when the line is not
/// `OK <address>` with a non-empty address.
pub fn parse_handshake_line(line: &str) -> std::result::Result<String, FailureReason> {
    match line.split_once(' ') {
        Some(("OK", address)) if !address.trim().is_empty() => Ok(address.trim().to_owned()),
        _ => Err(FailureReason::InvalidHandshake(format!(
            "expected `OK <address>`, got {line:?}"
        ))),
    }
}

/// Drives one helper through the handshake.
pub struct Handshake<R> {
    session_id: String,
    stdout: R,
    buffer: LineBuffer,
    exit: ExitSignal,
    connector: Arc<dyn ChannelConnector>,
    handshake_timeout: Duration,
    connect_timeout: Duration,
    stages: Vec<Stage>,
}

impl<R> Handshake<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Prepare a handshake over the helper's `stdout`.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        stdout: R,
        exit: ExitSignal,
        connector: Arc<dyn ChannelConnector>,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            stdout,
            buffer: LineBuffer::new(config.protocol.max_line_bytes),
            exit,
            connector,
            handshake_timeout: config.timeouts.handshake(),
            connect_timeout: config.timeouts.connect(),
            stages: Vec::new(),
        }
    }

    /// Stages visited so far, in order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Release the stdout stream together with any bytes read past the
    /// handshake line.
    pub fn into_parts(self) -> (R, BytesMut) {
        (self.stdout, self.buffer.into_remainder())
    }

    /// Run the state machine to completion.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Failed` carrying the reason the handshake stopped:
    /// `invalid-handshake`, `timeout`, `process-exited`, `connect-failed` or
    /// `channel-error`.
    pub async fn run(&mut self) -> Result<Connected> {
        let mut state = HandshakeState::Starting;
        self.stages.push(state.stage());
        debug!(session_id = %self.session_id, stage = %Stage::Starting, "handshake started");

        loop {
            state = match state {
                HandshakeState::Starting => self.on_starting(),
                HandshakeState::AwaitingHandshakeData { deadline } => {
                    self.on_awaiting_data(deadline).await
                }
                HandshakeState::ConnectingChannel { address } => {
                    self.on_connecting(address).await
                }
                HandshakeState::Connected(connected) => return Ok(connected),
                HandshakeState::Failed(reason) => return Err(AppError::Failed(reason)),
            };
            self.record(&state);
        }
    }

    fn record(&mut self, state: &HandshakeState) {
        let next = state.stage();
        let previous = self.stages.last().copied().unwrap_or(Stage::Starting);
        debug_assert!(
            previous.can_transition_to(next),
            "illegal handshake transition {previous} -> {next}"
        );
        self.stages.push(next);

        match state {
            HandshakeState::Failed(reason) => warn!(
                session_id = %self.session_id,
                from = %previous,
                reason = reason.code(),
                detail = %reason,
                "handshake failed"
            ),
            HandshakeState::Connected(connected) => info!(
                session_id = %self.session_id,
                address = %connected.address,
                "handshake complete"
            ),
            _ => debug!(
                session_id = %self.session_id,
                from = %previous,
                to = %next,
                "handshake stage changed"
            ),
        }
    }

    fn on_starting(&self) -> HandshakeState {
        HandshakeState::AwaitingHandshakeData {
            deadline: Instant::now() + self.handshake_timeout,
        }
    }

    async fn on_awaiting_data(&mut self, deadline: Instant) -> HandshakeState {
        let mut chunk = vec![0_u8; 1024];
        loop {
            match self.buffer.next_line() {
                Ok(Some(line)) => {
                    return match parse_handshake_line(&line) {
                        Ok(address) => HandshakeState::ConnectingChannel { address },
                        Err(reason) => HandshakeState::Failed(reason),
                    };
                }
                Ok(None) => {}
                Err(err) => {
                    return HandshakeState::Failed(FailureReason::InvalidHandshake(
                        err.to_string(),
                    ));
                }
            }

            let read = tokio::select! {
                biased;
                read = self.stdout.read(&mut chunk) => read,
                report = wait_for_exit(&mut self.exit) => {
                    return HandshakeState::Failed(FailureReason::ProcessExited(
                        report.description,
                    ));
                }
                () = tokio::time::sleep_until(deadline) => {
                    return HandshakeState::Failed(FailureReason::Timeout(format!(
                        "no handshake line within {:?}",
                        self.handshake_timeout
                    )));
                }
            };

            match read {
                Ok(0) => {
                    return HandshakeState::Failed(FailureReason::ProcessExited(
                        "helper closed stdout before the handshake line".into(),
                    ));
                }
                Ok(n) => self.buffer.push(&chunk[..n]),
                Err(err) => {
                    return HandshakeState::Failed(FailureReason::ChannelError(format!(
                        "reading helper stdout: {err}"
                    )));
                }
            }
        }
    }

    async fn on_connecting(&mut self, address: String) -> HandshakeState {
        let connector = Arc::clone(&self.connector);
        let attempt = tokio::select! {
            biased;
            report = wait_for_exit(&mut self.exit) => {
                return HandshakeState::Failed(FailureReason::ProcessExited(report.description));
            }
            result = tokio::time::timeout(
                self.connect_timeout,
                connector.connect(&address),
            ) => result,
        };

        match attempt {
            Ok(Ok(channel)) => HandshakeState::Connected(Connected { address, channel }),
            Ok(Err(err)) => {
                HandshakeState::Failed(FailureReason::ConnectFailed(format!("{address}: {err}")))
            }
            Err(_) => HandshakeState::Failed(FailureReason::Timeout(format!(
                "connecting to {address} took longer than {:?}",
                self.connect_timeout
            ))),
        }
    }
}
