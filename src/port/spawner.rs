//! Helper process spawning and supervision.
//!
//! Spawns the termbox helper with:
//! - no arguments unless `helper_args` is configured;
//! - `stdin` closed, `stdout` piped (the handshake channel) and `stderr`
//!   piped and forwarded line by line to `tracing`;
//! - `kill_on_drop(true)` so an abandoned helper never outlives us.
//!
//! After spawning, a supervision task owns the [`Child`] and publishes an
//! [`ExitReport`] on a `watch` channel the moment the process exits. That
//! signal is independent of the data channel, so both the handshake and the
//! session actor can react to a crash even while the socket is silent.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::port::codec::LineFrames;
use crate::{AppError, Result};

/// How the helper process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal number, if any (Unix only).
    pub signal: Option<i32>,
    /// Human-readable summary.
    pub description: String,
    /// When the exit was observed.
    pub exited_at: DateTime<Utc>,
}

impl ExitReport {
    fn from_status(status: ExitStatus) -> Self {
        let code = status.code();
        let signal = exit_signal(status);
        let description = match (code, signal) {
            (Some(0), _) => "exited normally (code 0)".to_owned(),
            (Some(c), _) => format!("exited with code {c}"),
            (None, Some(s)) => format!("terminated by signal {s}"),
            (None, None) => "terminated by signal".to_owned(),
        };
        Self {
            code,
            signal,
            description,
            exited_at: Utc::now(),
        }
    }

    fn unknown(reason: String) -> Self {
        Self {
            code: None,
            signal: None,
            description: reason,
            exited_at: Utc::now(),
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: ExitStatus) -> Option<i32> {
    None
}

/// Exit notification channel: `None` while the helper runs.
pub type ExitSignal = watch::Receiver<Option<ExitReport>>;

/// Resolve once `signal` carries an exit report.
///
/// A supervisor that disappears without publishing counts as an exit.
pub async fn wait_for_exit(signal: &mut ExitSignal) -> ExitReport {
    match signal.wait_for(Option::is_some).await {
        Ok(report) => report
            .clone()
            .unwrap_or_else(|| ExitReport::unknown("exit status unavailable".into())),
        Err(_) => ExitReport::unknown("supervisor stopped without a report".into()),
    }
}

/// Stop request sent to the supervision task.
#[derive(Debug, Clone, Copy)]
enum StopSignal {
    /// Polite request (`SIGTERM` on Unix).
    Terminate,
    /// Forced kill.
    Kill,
}

/// Handle to a supervised helper process.
///
/// Cloning is cheap; the process is killed once every clone is dropped.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    stop_tx: mpsc::UnboundedSender<StopSignal>,
    exit_rx: ExitSignal,
}

impl ProcessHandle {
    /// OS process id, if still known at spawn time.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Subscribe to the exit notification.
    #[must_use]
    pub fn exit_signal(&self) -> ExitSignal {
        self.exit_rx.clone()
    }

    /// Exit report, if the process has already exited.
    #[must_use]
    pub fn exit_report(&self) -> Option<ExitReport> {
        self.exit_rx.borrow().clone()
    }

    /// Whether the process has exited.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Wait until the process exits.
    pub async fn wait(&mut self) -> ExitReport {
        wait_for_exit(&mut self.exit_rx).await
    }

    /// Stop the process, escalating from waiting to `SIGTERM` to kill.
    ///
    /// Each step waits up to `grace` for the exit. Terminating a process that
    /// has already exited is a no-op returning the original report.
    pub async fn terminate(&mut self, grace: Duration) -> ExitReport {
        if let Some(report) = self.exit_report() {
            return report;
        }

        if let Ok(report) = tokio::time::timeout(grace, self.wait()).await {
            return report;
        }

        debug!(pid = ?self.pid, "helper still running after grace period, terminating");
        let _ = self.stop_tx.send(StopSignal::Terminate);
        if let Ok(report) = tokio::time::timeout(grace, self.wait()).await {
            return report;
        }

        warn!(pid = ?self.pid, "helper ignored terminate request, killing");
        let _ = self.stop_tx.send(StopSignal::Kill);
        self.wait().await
    }

    /// Kill the process without a grace period.
    pub async fn kill(&mut self) -> ExitReport {
        if let Some(report) = self.exit_report() {
            return report;
        }
        let _ = self.stop_tx.send(StopSignal::Kill);
        self.wait().await
    }
}

/// A freshly spawned helper: its supervisor handle plus the stdout stream
/// that carries the handshake line.
#[derive(Debug)]
pub struct HelperProcess {
    /// Supervisor handle.
    pub handle: ProcessHandle,
    /// Helper stdout, consumed by the handshake.
    pub stdout: ChildStdout,
}

/// Spawn the helper executable and start supervising it.
///
/// # Errors
///
/// - `AppError::Spawn("failed to spawn …")`: missing or unrunnable executable.
/// - `AppError::Spawn("failed to capture helper stdout")`: no stdout pipe.
pub fn spawn_helper(config: &BridgeConfig, session_id: &str) -> Result<HelperProcess> {
    let mut cmd = Command::new(&config.helper_path);
    cmd.args(&config.helper_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Spawn(format!(
            "failed to spawn {}: {err}",
            config.helper_path.display()
        ))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture helper stdout".into()))?;

    if let Some(stderr) = child.stderr.take() {
        let _ = forward_output(
            session_id.to_owned(),
            "stderr",
            &[],
            stderr,
            config.protocol.max_line_bytes,
        );
    }

    info!(
        session_id,
        pid = ?child.id(),
        helper = %config.helper_path.display(),
        "helper process spawned"
    );

    Ok(HelperProcess {
        handle: supervise(session_id.to_owned(), child),
        stdout,
    })
}

/// Take ownership of `child` and publish its exit on a watch channel.
///
/// The returned handle's [`ProcessHandle::terminate`] and
/// [`ProcessHandle::kill`] are routed to the supervision task, which is the
/// only owner of the [`Child`].
#[must_use]
pub fn supervise(session_id: String, mut child: Child) -> ProcessHandle {
    let pid = child.id();
    let (exit_tx, exit_rx) = watch::channel(None);
    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut handles_alive = true;
        let status = loop {
            tokio::select! {
                result = child.wait() => break result,
                signal = stop_rx.recv(), if handles_alive => {
                    match signal {
                        Some(StopSignal::Terminate) => send_terminate(&mut child, pid),
                        Some(StopSignal::Kill) => {
                            if let Err(err) = child.start_kill() {
                                warn!(session_id, %err, "failed to kill helper process");
                            }
                        }
                        None => {
                            debug!(session_id, "all process handles dropped, killing helper");
                            handles_alive = false;
                            let _ = child.start_kill();
                        }
                    }
                }
            }
        };

        let report = match status {
            Ok(status) => ExitReport::from_status(status),
            Err(err) => {
                warn!(session_id, %err, "error waiting for helper process");
                ExitReport::unknown(format!("wait error: {err}"))
            }
        };
        info!(
            session_id,
            exit_code = ?report.code,
            status = %report.description,
            exited_at = %report.exited_at.to_rfc3339(),
            "helper process exited"
        );
        let _ = exit_tx.send(Some(report));
    });

    ProcessHandle {
        pid,
        stop_tx,
        exit_rx,
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child, pid: Option<u32>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw) = pid.and_then(|p| i32::try_from(p).ok()) else {
        let _ = child.start_kill();
        return;
    };
    if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        debug!(pid = raw, %err, "SIGTERM failed, falling back to kill");
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child, _pid: Option<u32>) {
    let _ = child.start_kill();
}

/// Forward a helper output stream to `tracing` at `DEBUG`, one event per
/// line, until EOF.
///
/// `leftover` holds bytes already read from the stream by an earlier phase
/// (the handshake); it seeds the read buffer so those lines come out first.
/// Reading never stops early, so the helper cannot block on a full pipe.
pub fn forward_output<R>(
    session_id: String,
    stream: &'static str,
    leftover: &[u8],
    reader: R,
    max_line_bytes: usize,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut framed = FramedRead::new(reader, LineFrames::keeping_tail(max_line_bytes));
    framed.read_buffer_mut().extend_from_slice(leftover);
    tokio::spawn(async move {
        while let Some(item) = framed.next().await {
            match item {
                Ok(Ok(line)) => {
                    debug!(target: "helper_output", session_id, stream, line, "helper output");
                }
                Ok(Err(err)) => debug!(session_id, stream, %err, "unreadable helper output line"),
                Err(err) => {
                    debug!(session_id, stream, %err, "helper output stream failed");
                    break;
                }
            }
        }
    })
}
