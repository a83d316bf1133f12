//! Duplex channel reader task.
//!
//! Frames the helper's channel with [`LineFrames`], decodes each line and
//! forwards the result to the session actor as an [`Inbound`] message.
//! Chunk boundaries never matter: a line split across any number of reads
//! is delivered exactly once.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::FailureReason;
use crate::port::codec::LineFrames;
use crate::port::connector::ChannelReader;
use crate::port::protocol::{decode_line, Response};
use crate::{AppError, Result};

/// Message from the I/O tasks to the session actor.
#[derive(Debug)]
pub enum Inbound {
    /// One complete line and its decoded form.
    Line {
        /// Raw line, terminator stripped.
        raw: String,
        /// Decoded response, or the decode error.
        response: Result<Response>,
    },
    /// Bytes that could not be framed into a line (overlong or not UTF-8).
    Unframed(AppError),
    /// The channel ended; no further messages follow.
    Closed(FailureReason),
}

/// Reader task: channel bytes in, [`Inbound`] messages out.
///
/// Exits after sending [`Inbound::Closed`] on EOF or a read error, when
/// `cancel` fires, or when the actor stops listening. Bytes after the last
/// terminator are dropped at EOF.
pub async fn run_reader(
    session_id: String,
    reader: ChannelReader,
    inbound_tx: mpsc::Sender<Inbound>,
    max_line_bytes: usize,
    cancel: CancellationToken,
) {
    let mut framed = FramedRead::new(reader, LineFrames::new(max_line_bytes));

    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(session_id, "channel reader: cancellation received, stopping");
                return;
            }
            item = framed.next() => item,
        };

        let message = match item {
            Some(Ok(Ok(line))) => {
                let response = decode_line(&line);
                Inbound::Line {
                    raw: line,
                    response,
                }
            }
            Some(Ok(Err(err))) => {
                warn!(session_id, %err, "dropping unframeable input");
                Inbound::Unframed(err)
            }
            Some(Err(err)) => {
                warn!(session_id, %err, "channel reader: read failed");
                let _ = inbound_tx
                    .send(Inbound::Closed(FailureReason::ChannelError(format!(
                        "read failed: {err}"
                    ))))
                    .await;
                return;
            }
            None => {
                debug!(session_id, "channel reader: EOF");
                let _ = inbound_tx
                    .send(Inbound::Closed(FailureReason::ChannelClosed))
                    .await;
                return;
            }
        };

        if inbound_tx.send(message).await.is_err() {
            debug!(session_id, "channel reader: actor gone, stopping");
            return;
        }
    }
}
