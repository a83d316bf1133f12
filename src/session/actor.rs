//! Session actor.
//!
//! One tokio task per session owns the pending-command slot, the writer
//! sender and the process handle. It `select!`s over, in priority order:
//! decoded inbound lines, the process exit signal, the pending command's
//! deadline, and caller requests. Because every state change happens on this
//! one task, at most one command is ever on the wire awaiting a response.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::errors::FailureReason;
use crate::models::Stage;
use crate::port::protocol::{Cell, Command, CommandKind, Expected, Response};
use crate::port::reader::Inbound;
use crate::port::spawner::{wait_for_exit, ExitSignal, ProcessHandle};
use crate::session::observer::SessionObserver;
use crate::{AppError, Result};

/// Successful answer to a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    /// `OK`.
    Ack,
    /// `OK_WIDTH`.
    Width(i32),
    /// `OK_HEIGHT`.
    Height(i32),
    /// `OK_CELL`.
    Cell(Cell),
    /// Fire-and-forget command written; no response expected.
    Sent,
}

impl Reply {
    fn from_response(response: Response) -> Result<Self> {
        match response {
            Response::Ok => Ok(Self::Ack),
            Response::Width(width) => Ok(Self::Width(width)),
            Response::Height(height) => Ok(Self::Height(height)),
            Response::Cell(cell) => Ok(Self::Cell(cell)),
            Response::Error(reason) => Err(AppError::Command(reason)),
            other => Err(AppError::Decode(format!(
                "{} is not a command reply",
                other.label()
            ))),
        }
    }
}

/// Caller request delivered to the actor.
#[derive(Debug)]
pub(crate) enum Request {
    /// Send one command and report its reply.
    Send {
        command: Command,
        reply: oneshot::Sender<Result<Reply>>,
    },
    /// Tear the session down gracefully.
    Shutdown { reply: oneshot::Sender<()> },
}

/// Timing and escalation knobs copied out of [`BridgeConfig`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct ActorSettings {
    pub command_timeout: Duration,
    pub shutdown_grace: Duration,
    pub desync_limit: u32,
    pub timeout_limit: u32,
}

impl From<&BridgeConfig> for ActorSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            command_timeout: config.timeouts.command(),
            shutdown_grace: config.timeouts.shutdown(),
            desync_limit: config.protocol.desync_limit,
            timeout_limit: config.protocol.timeout_limit,
        }
    }
}

/// The single outstanding command.
#[derive(Debug)]
struct PendingCommand {
    kind: CommandKind,
    reply: oneshot::Sender<Result<Reply>>,
    sent_at: Instant,
    deadline: Instant,
}

/// What woke the actor loop.
enum Wake {
    Inbound(Inbound),
    Exited(String),
    Deadline,
    Request(Option<Request>),
}

enum Flow {
    Continue,
    Stop,
}

/// Channels and handles the actor takes ownership of.
pub(crate) struct ActorParts {
    pub session_id: String,
    pub settings: ActorSettings,
    pub observer: Arc<dyn SessionObserver>,
    pub requests: mpsc::Receiver<Request>,
    pub inbound: mpsc::Receiver<Inbound>,
    pub line_tx: mpsc::Sender<String>,
    pub stage_tx: watch::Sender<Stage>,
    pub process: ProcessHandle,
    pub cancel: CancellationToken,
}

pub(crate) struct SessionActor {
    session_id: String,
    settings: ActorSettings,
    observer: Arc<dyn SessionObserver>,
    requests: mpsc::Receiver<Request>,
    inbound: mpsc::Receiver<Inbound>,
    line_tx: Option<mpsc::Sender<String>>,
    stage_tx: watch::Sender<Stage>,
    exit: ExitSignal,
    process: ProcessHandle,
    cancel: CancellationToken,
    pending: Option<PendingCommand>,
    mismatches: u32,
    timeouts: u32,
}

impl SessionActor {
    pub(crate) fn new(parts: ActorParts) -> Self {
        Self {
            exit: parts.process.exit_signal(),
            session_id: parts.session_id,
            settings: parts.settings,
            observer: parts.observer,
            requests: parts.requests,
            inbound: parts.inbound,
            line_tx: Some(parts.line_tx),
            stage_tx: parts.stage_tx,
            process: parts.process,
            cancel: parts.cancel,
            pending: None,
            mismatches: 0,
            timeouts: 0,
        }
    }

    /// Serve requests until the session fails or is closed.
    pub(crate) async fn run(mut self) {
        info!(session_id = %self.session_id, "session actor started");

        loop {
            let deadline = self.pending.as_ref().map(|pending| pending.deadline);
            let wake = tokio::select! {
                biased;
                Some(message) = self.inbound.recv() => Wake::Inbound(message),
                report = wait_for_exit(&mut self.exit) => Wake::Exited(report.description),
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() => Wake::Deadline,
                request = self.requests.recv() => Wake::Request(request),
            };

            let flow = match wake {
                Wake::Inbound(message) => self.on_inbound(message).await,
                Wake::Exited(description) => {
                    self.fail(FailureReason::ProcessExited(description)).await
                }
                Wake::Deadline => self.on_deadline().await,
                Wake::Request(Some(Request::Send { command, reply })) => {
                    self.on_send(command, reply).await
                }
                Wake::Request(Some(Request::Shutdown { reply })) => {
                    let flow = self.close().await;
                    let _ = reply.send(());
                    flow
                }
                Wake::Request(None) => {
                    debug!(session_id = %self.session_id, "all session handles dropped");
                    self.close().await
                }
            };

            if matches!(flow, Flow::Stop) {
                break;
            }
        }

        self.cancel.cancel();
        debug!(session_id = %self.session_id, stage = %self.stage(), "session actor stopped");
    }

    fn stage(&self) -> Stage {
        *self.stage_tx.borrow()
    }

    fn set_stage(&self, next: Stage) {
        let previous = self.stage();
        debug_assert!(
            previous.can_transition_to(next),
            "illegal session transition {previous} -> {next}"
        );
        self.stage_tx.send_replace(next);
        info!(session_id = %self.session_id, from = %previous, to = %next, "session stage changed");
    }

    async fn on_send(&mut self, command: Command, reply: oneshot::Sender<Result<Reply>>) -> Flow {
        if self.stage() != Stage::Connected {
            let _ = reply.send(Err(AppError::NotConnected));
            return Flow::Continue;
        }
        if let Some(pending) = &self.pending {
            debug!(
                session_id = %self.session_id,
                pending = pending.kind.name(),
                rejected = command.kind().name(),
                "command rejected, another is pending"
            );
            let _ = reply.send(Err(AppError::Busy));
            return Flow::Continue;
        }

        let kind = command.kind();
        if kind == CommandKind::Shutdown {
            let flow = self.close().await;
            let _ = reply.send(Ok(Reply::Ack));
            return flow;
        }

        let Some(line_tx) = self.line_tx.clone() else {
            let _ = reply.send(Err(AppError::NotConnected));
            return Flow::Continue;
        };
        let line = command.encode();
        debug!(
            session_id = %self.session_id,
            command = kind.name(),
            line = %line,
            "sending command"
        );

        if line_tx.send(line).await.is_err() {
            let reason = FailureReason::ChannelError("writer task stopped".into());
            let _ = reply.send(Err(AppError::Failed(reason.clone())));
            return self.fail(reason).await;
        }

        if kind.expected() == Expected::Nothing {
            let _ = reply.send(Ok(Reply::Sent));
        } else {
            let sent_at = Instant::now();
            self.pending = Some(PendingCommand {
                kind,
                reply,
                sent_at,
                deadline: sent_at + self.settings.command_timeout,
            });
        }
        Flow::Continue
    }

    async fn on_inbound(&mut self, message: Inbound) -> Flow {
        match message {
            Inbound::Line { raw, response } => match response {
                Ok(Response::Event(event)) => {
                    debug!(session_id = %self.session_id, line = %raw, "event received");
                    self.observer.on_event(event);
                    Flow::Continue
                }
                Ok(Response::Unrecognized(_)) => {
                    warn!(session_id = %self.session_id, line = %raw, "ignoring unrecognized line");
                    Flow::Continue
                }
                Ok(response) => self.on_response(response, &raw).await,
                Err(err) => {
                    self.on_undecodable(err, Some(&raw));
                    Flow::Continue
                }
            },
            Inbound::Unframed(err) => {
                self.on_undecodable(err, None);
                Flow::Continue
            }
            Inbound::Closed(reason) => {
                let reason = match (reason, self.process.exit_report()) {
                    (FailureReason::ChannelClosed, Some(report)) => {
                        FailureReason::ProcessExited(report.description)
                    }
                    (reason, _) => reason,
                };
                self.fail(reason).await
            }
        }
    }

    async fn on_response(&mut self, response: Response, raw: &str) -> Flow {
        let Some(pending) = &self.pending else {
            warn!(
                session_id = %self.session_id,
                line = %raw,
                "dropping response with no pending command"
            );
            return Flow::Continue;
        };

        if !response.answers(pending.kind.expected()) {
            self.mismatches += 1;
            warn!(
                session_id = %self.session_id,
                command = pending.kind.name(),
                got = response.label(),
                line = %raw,
                consecutive = self.mismatches,
                "response does not match pending command, dropped"
            );
            if self.settings.desync_limit > 0 && self.mismatches >= self.settings.desync_limit {
                return self.fail(FailureReason::ProtocolDesync(self.mismatches)).await;
            }
            return Flow::Continue;
        }

        if let Some(pending) = self.pending.take() {
            self.mismatches = 0;
            self.timeouts = 0;
            let elapsed_ms =
                u64::try_from(pending.sent_at.elapsed().as_millis()).unwrap_or(u64::MAX);
            debug!(
                session_id = %self.session_id,
                command = pending.kind.name(),
                line = %raw,
                elapsed_ms,
                "response received"
            );
            let _ = pending.reply.send(Reply::from_response(response));
        }
        Flow::Continue
    }

    fn on_undecodable(&mut self, err: AppError, raw: Option<&str>) {
        warn!(session_id = %self.session_id, line = ?raw, %err, "undecodable line from helper");
        if let Some(pending) = self.pending.take() {
            let _ = pending.reply.send(Err(err));
        }
    }

    async fn on_deadline(&mut self) -> Flow {
        let Some(pending) = self.pending.take() else {
            return Flow::Continue;
        };
        self.timeouts += 1;
        warn!(
            session_id = %self.session_id,
            command = pending.kind.name(),
            consecutive = self.timeouts,
            "command timed out"
        );
        let _ = pending.reply.send(Err(AppError::Timeout(format!(
            "no response to `{}` within {:?}",
            pending.kind.name(),
            self.settings.command_timeout
        ))));

        if self.settings.timeout_limit > 0 && self.timeouts >= self.settings.timeout_limit {
            return self.fail(FailureReason::PeerUnresponsive(self.timeouts)).await;
        }
        Flow::Continue
    }

    /// Irrecoverable failure: release the waiter, notify the observer once,
    /// kill the helper.
    async fn fail(&mut self, reason: FailureReason) -> Flow {
        if self.stage().is_terminal() {
            return Flow::Stop;
        }
        error!(
            session_id = %self.session_id,
            reason = reason.code(),
            detail = %reason,
            "session failed"
        );
        self.set_stage(Stage::Failed);

        if let Some(pending) = self.pending.take() {
            let _ = pending.reply.send(Err(AppError::Failed(reason.clone())));
        }
        self.observer.on_fatal(&reason);

        self.line_tx = None;
        self.cancel.cancel();
        self.reject_queued();
        let report = self.process.kill().await;
        debug!(session_id = %self.session_id, exit = %report.description, "helper released");
        Flow::Stop
    }

    /// Graceful teardown: ask the helper to exit, close the channel, then
    /// terminate the process if it lingers.
    async fn close(&mut self) -> Flow {
        if self.stage().is_terminal() {
            return Flow::Stop;
        }
        info!(session_id = %self.session_id, "closing session");

        if let Some(pending) = self.pending.take() {
            let _ = pending.reply.send(Err(AppError::NotConnected));
        }
        let acknowledged = self.request_helper_exit().await;
        self.set_stage(Stage::Closed);

        self.line_tx = None;
        self.cancel.cancel();
        self.reject_queued();
        let report = self.process.terminate(self.settings.shutdown_grace).await;
        info!(
            session_id = %self.session_id,
            acknowledged,
            exit = %report.description,
            "session closed"
        );
        Flow::Stop
    }

    /// Send `shutdown` and wait, bounded by the shutdown grace, for its `OK`
    /// or the channel closing. Events seen meanwhile are still delivered.
    async fn request_helper_exit(&mut self) -> bool {
        let Some(line_tx) = self.line_tx.clone() else {
            return false;
        };
        if line_tx.send(Command::Shutdown.encode()).await.is_err() {
            return false;
        }

        let grace = self.settings.shutdown_grace;
        let acknowledged = async {
            while let Some(message) = self.inbound.recv().await {
                match message {
                    Inbound::Line {
                        response: Ok(Response::Ok),
                        ..
                    } => return true,
                    Inbound::Line {
                        response: Ok(Response::Event(event)),
                        ..
                    } => self.observer.on_event(event),
                    Inbound::Closed(_) => return false,
                    _ => {}
                }
            }
            false
        };
        tokio::time::timeout(grace, acknowledged)
            .await
            .unwrap_or(false)
    }

    fn reject_queued(&mut self) {
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            match request {
                Request::Send { reply, .. } => {
                    let _ = reply.send(Err(AppError::NotConnected));
                }
                Request::Shutdown { reply } => {
                    let _ = reply.send(());
                }
            }
        }
    }
}
