//! Duplex channel writer task.
//!
//! Receives encoded command lines from the session actor and sends them
//! through a [`FramedWrite`] over the helper's channel. A write failure is
//! reported back to the actor as [`Inbound::Closed`] so the session fails
//! instead of waiting for a response that can never come.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::FailureReason;
use crate::port::codec::PortCodec;
use crate::port::connector::ChannelWriter;
use crate::port::reader::Inbound;
use crate::{AppError, Result};

/// Writer task: command lines in, framed bytes out.
///
/// The task exits cleanly when `cancel` fires or when `line_rx` is closed;
/// in the latter case the sink is closed so the helper sees EOF.
///
/// # Errors
///
/// Returns `AppError::Io("write failed: …")` when a write or flush fails.
/// The failure is also sent to the actor over `inbound_tx`.
pub async fn run_writer(
    session_id: String,
    writer: ChannelWriter,
    mut line_rx: mpsc::Receiver<String>,
    inbound_tx: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut framed = FramedWrite::new(writer, PortCodec::new());

    loop {
        let line = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(session_id, "channel writer: cancellation received, stopping");
                return Ok(());
            }
            line = line_rx.recv() => line,
        };

        let Some(line) = line else {
            debug!(session_id, "channel writer: line channel closed, shutting down");
            let _ = SinkExt::<&str>::close(&mut framed).await;
            return Ok(());
        };

        // `send` flushes, so the helper sees the command before we wait on it.
        if let Err(err) = framed.send(line.as_str()).await {
            warn!(session_id, %err, "channel writer: write failed");
            let _ = inbound_tx
                .send(Inbound::Closed(FailureReason::ChannelError(format!(
                    "write failed: {err}"
                ))))
                .await;
            return Err(AppError::Io(format!("write failed: {err}")));
        }

        debug!(session_id, line = %line, "command written");
    }
}
