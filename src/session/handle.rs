//! Caller-facing handle to a running session.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::models::{SessionInfo, Stage};
use crate::port::protocol::{Attribute, Cell, Command, Event};
use crate::session::actor::{Reply, Request};
use crate::{AppError, Result};

/// Cloneable handle to one session.
///
/// Every method funnels through the session actor, so concurrent callers
/// never interleave commands on the wire: while one command is pending,
/// others fail fast with [`AppError::Busy`]. When the last handle is
/// dropped the session shuts down gracefully.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    info: Arc<SessionInfo>,
    requests: mpsc::Sender<Request>,
    stage_rx: watch::Receiver<Stage>,
}

impl SessionHandle {
    pub(crate) fn new(
        info: SessionInfo,
        requests: mpsc::Sender<Request>,
        stage_rx: watch::Receiver<Stage>,
    ) -> Self {
        Self {
            info: Arc::new(info),
            requests,
            stage_rx,
        }
    }

    /// Identity and timing of this session.
    #[must_use]
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Current lifecycle stage.
    #[must_use]
    pub fn stage(&self) -> Stage {
        *self.stage_rx.borrow()
    }

    /// Wait until the session is `Failed` or `Closed` and return that stage.
    pub async fn closed(&self) -> Stage {
        let mut stage_rx = self.stage_rx.clone();
        let terminal = stage_rx
            .wait_for(|stage| stage.is_terminal())
            .await
            .map(|stage| *stage);
        terminal.unwrap_or_else(|_| *stage_rx.borrow())
    }

    /// Send one command and wait for its reply.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotConnected`]: the session is not `Connected`.
    /// - [`AppError::Busy`]: another command is pending.
    /// - [`AppError::Command`]: the helper answered `ERROR <reason>`.
    /// - [`AppError::Timeout`]: no response before the command deadline.
    /// - [`AppError::Decode`]: the command cannot be encoded (a `print`
    ///   without text) or the response line was malformed.
    /// - [`AppError::Failed`]: the session failed while the command was
    ///   pending.
    pub async fn send(&self, command: Command) -> Result<Reply> {
        command.validate()?;
        if self.stage() != Stage::Connected {
            return Err(AppError::NotConnected);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(Request::Send {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| AppError::NotConnected)?;
        reply_rx.await.map_err(|_| AppError::NotConnected)?
    }

    /// Close the session: `shutdown` the helper, close the channel and
    /// reap the process. Calling it on a session that already ended is a
    /// no-op.
    pub async fn shutdown(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .requests
            .send(Request::Shutdown { reply: reply_tx })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }

    /// Flush the back buffer to the terminal.
    ///
    /// # Errors
    ///
    /// As [`SessionHandle::send`].
    pub async fn present(&self) -> Result<()> {
        expect_ack(self.send(Command::Present).await?)
    }

    /// Clear the back buffer.
    ///
    /// # Errors
    ///
    /// As [`SessionHandle::send`].
    pub async fn clear(&self) -> Result<()> {
        expect_ack(self.send(Command::Clear).await?)
    }

    /// Write `text` at `(x, y)`. Line terminators become spaces.
    ///
    /// # Errors
    ///
    /// [`AppError::Decode`] for empty `text`; otherwise as
    /// [`SessionHandle::send`].
    pub async fn print(
        &self,
        x: i32,
        y: i32,
        fg: Attribute,
        bg: Attribute,
        text: &str,
    ) -> Result<()> {
        expect_ack(self.send(Command::print(x, y, fg, bg, text)?).await?)
    }

    /// Set a single cell.
    ///
    /// # Errors
    ///
    /// As [`SessionHandle::send`].
    pub async fn change_cell(
        &self,
        x: i32,
        y: i32,
        ch: char,
        fg: Attribute,
        bg: Attribute,
    ) -> Result<()> {
        expect_ack(self.send(Command::ChangeCell { x, y, ch, fg, bg }).await?)
    }

    /// Read back a single cell.
    ///
    /// # Errors
    ///
    /// As [`SessionHandle::send`].
    pub async fn get_cell(&self, x: i32, y: i32) -> Result<Cell> {
        match self.send(Command::GetCell { x, y }).await? {
            Reply::Cell(cell) => Ok(cell),
            other => Err(unexpected(&other)),
        }
    }

    /// Terminal width in cells.
    ///
    /// # Errors
    ///
    /// As [`SessionHandle::send`].
    pub async fn width(&self) -> Result<i32> {
        match self.send(Command::Width).await? {
            Reply::Width(width) => Ok(width),
            other => Err(unexpected(&other)),
        }
    }

    /// Terminal height in cells.
    ///
    /// # Errors
    ///
    /// As [`SessionHandle::send`].
    pub async fn height(&self) -> Result<i32> {
        match self.send(Command::Height).await? {
            Reply::Height(height) => Ok(height),
            other => Err(unexpected(&other)),
        }
    }

    /// Move the cursor.
    ///
    /// # Errors
    ///
    /// As [`SessionHandle::send`].
    pub async fn set_cursor(&self, x: i32, y: i32) -> Result<()> {
        expect_ack(self.send(Command::SetCursor { x, y }).await?)
    }

    /// Select the input mode.
    ///
    /// # Errors
    ///
    /// As [`SessionHandle::send`].
    pub async fn set_input_mode(&self, mode: i32) -> Result<()> {
        expect_ack(self.send(Command::SetInputMode(mode)).await?)
    }

    /// Select the output mode.
    ///
    /// # Errors
    ///
    /// As [`SessionHandle::send`].
    pub async fn set_output_mode(&self, mode: i32) -> Result<()> {
        expect_ack(self.send(Command::SetOutputMode(mode)).await?)
    }

    /// Attributes used by `clear`.
    ///
    /// # Errors
    ///
    /// As [`SessionHandle::send`].
    pub async fn set_clear_attributes(&self, fg: Attribute, bg: Attribute) -> Result<()> {
        expect_ack(self.send(Command::SetClearAttributes { fg, bg }).await?)
    }

    /// Ask the helper to echo `event` back as an `EVENT` line. Returns once
    /// the command is written; the event itself reaches the observer.
    ///
    /// # Errors
    ///
    /// As [`SessionHandle::send`].
    pub async fn debug_send_event(&self, event: Event) -> Result<()> {
        match self.send(Command::DebugSendEvent(event)).await? {
            Reply::Sent => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

fn expect_ack(reply: Reply) -> Result<()> {
    match reply {
        Reply::Ack => Ok(()),
        other => Err(unexpected(&other)),
    }
}

fn unexpected(reply: &Reply) -> AppError {
    AppError::Decode(format!("unexpected reply {reply:?}"))
}
