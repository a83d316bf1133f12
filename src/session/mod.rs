//! Helper sessions.
//!
//! [`start_session`] spawns the helper, runs the handshake and hands back a
//! [`SessionHandle`] once the duplex channel is open. From then on a
//! dedicated actor task owns the channel, the pending-command slot and the
//! process; callers talk to it only through the handle.

pub mod actor;
pub mod handle;
pub mod observer;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use crate::config::BridgeConfig;
use crate::models::session::new_session_id;
use crate::models::{SessionInfo, Stage};
use crate::port::connector::{ChannelConnector, DuplexChannel, LocalSocketConnector};
use crate::port::handshake::Handshake;
use crate::port::reader::run_reader;
use crate::port::spawner::{forward_output, spawn_helper, ProcessHandle};
use crate::port::writer::run_writer;
use crate::{AppError, Result};

pub use actor::Reply;
pub use handle::SessionHandle;
pub use observer::{ChannelObserver, Notification, SessionObserver};

use actor::{ActorParts, ActorSettings, SessionActor};

/// Capacity of the reader → actor queue.
const INBOUND_CAPACITY: usize = 64;
/// Capacity of the actor → writer queue.
const OUTBOUND_CAPACITY: usize = 16;
/// Capacity of the handle → actor queue.
const REQUEST_CAPACITY: usize = 16;

/// Spawn the helper and connect over a local socket.
///
/// # Errors
///
/// - [`AppError::Config`]: `config` fails validation.
/// - [`AppError::Spawn`]: the helper could not be started.
/// - [`AppError::Failed`]: the handshake or channel connect failed; the
///   observer has been notified and the helper killed.
pub async fn start_session(
    config: &BridgeConfig,
    observer: Arc<dyn SessionObserver>,
) -> Result<SessionHandle> {
    start_session_with(config, observer, Arc::new(LocalSocketConnector)).await
}

/// [`start_session`] with a custom channel connector.
///
/// # Errors
///
/// As [`start_session`].
pub async fn start_session_with(
    config: &BridgeConfig,
    observer: Arc<dyn SessionObserver>,
    connector: Arc<dyn ChannelConnector>,
) -> Result<SessionHandle> {
    config.validate()?;

    let session_id = new_session_id();
    let span = info_span!("start_session", session_id = %session_id);
    let started_at = Utc::now();

    async move {
        let helper = spawn_helper(config, &session_id)?;
        let mut process = helper.handle;

        let mut handshake = Handshake::new(
            session_id.clone(),
            helper.stdout,
            process.exit_signal(),
            connector,
            config,
        );
        let connected = match handshake.run().await {
            Ok(connected) => connected,
            Err(err) => {
                if let AppError::Failed(reason) = &err {
                    observer.on_fatal(reason);
                }
                process.kill().await;
                return Err(err);
            }
        };

        let (stdout, leftover) = handshake.into_parts();
        let _ = forward_output(
            session_id.clone(),
            "stdout",
            &leftover,
            stdout,
            config.protocol.max_line_bytes,
        );

        let info = SessionInfo {
            id: session_id,
            helper_pid: process.pid(),
            address: connected.address,
            started_at,
            connected_at: Utc::now(),
        };
        Ok(attach_session(config, info, connected.channel, process, observer))
    }
    .instrument(span)
    .await
}

/// Run a session over an already-open channel to an already-supervised
/// helper. The session starts in [`Stage::Connected`].
#[must_use]
pub fn attach_session(
    config: &BridgeConfig,
    info: SessionInfo,
    channel: DuplexChannel,
    process: ProcessHandle,
    observer: Arc<dyn SessionObserver>,
) -> SessionHandle {
    let session_id = info.id.clone();
    let cancel = CancellationToken::new();
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let (line_tx, line_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let (request_tx, request_rx) = mpsc::channel(REQUEST_CAPACITY);
    let (stage_tx, stage_rx) = watch::channel(Stage::Connected);

    tokio::spawn(run_reader(
        session_id.clone(),
        channel.reader,
        inbound_tx.clone(),
        config.protocol.max_line_bytes,
        cancel.child_token(),
    ));
    tokio::spawn(run_writer(
        session_id.clone(),
        channel.writer,
        line_rx,
        inbound_tx,
        cancel.child_token(),
    ));

    let actor = SessionActor::new(ActorParts {
        session_id: session_id.clone(),
        settings: ActorSettings::from(config),
        observer,
        requests: request_rx,
        inbound: inbound_rx,
        line_tx,
        stage_tx,
        process,
        cancel,
    });
    tokio::spawn(
        actor
            .run()
            .instrument(info_span!("session", session_id = %session_id)),
    );

    info!(session_id = %info.id, address = %info.address, "session connected");
    SessionHandle::new(info, request_tx, stage_rx)
}
