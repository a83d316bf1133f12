//! End-to-end tests: spawn a real process, handshake over its stdout and
//! connect to the local socket it announces.
//!
//! `sh` scripts stand in for the helper binary. The test owns the listening
//! socket and plays the helper's side of the channel.

#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;

use tokio::net::UnixListener;

use termbox_bridge::config::BridgeConfig;
use termbox_bridge::models::Stage;
use termbox_bridge::session::{start_session, ChannelObserver, Notification};
use termbox_bridge::{AppError, FailureReason};

use super::test_helpers::{next_notification, test_config, FakeHelper, WAIT};

fn helper_script(script: String) -> BridgeConfig {
    let mut config = test_config();
    config.helper_args = vec!["-c".to_owned(), script];
    config
}

fn announcing(path: &Path, after: &str) -> BridgeConfig {
    helper_script(format!("echo OK {}; {after}", path.display()))
}

#[tokio::test]
async fn full_session_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("port.sock");
    let listener = UnixListener::bind(&socket).expect("bind socket");
    let config = announcing(&socket, "exec sleep 30");
    let (observer, mut notifications) = ChannelObserver::new();

    let (session, accepted) = tokio::join!(start_session(&config, Arc::new(observer)), async {
        tokio::time::timeout(WAIT, listener.accept())
            .await
            .expect("helper socket must be connected")
            .expect("accept")
    });
    let session = session.expect("session must start");
    let mut helper = FakeHelper::new(accepted.0);

    assert_eq!(session.stage(), Stage::Connected);
    assert_eq!(session.info().address, socket.display().to_string());
    assert!(session.info().helper_pid.is_some());

    let (width, ()) = tokio::join!(session.width(), async {
        assert_eq!(helper.expect_line().await, "width");
        helper.reply("OK_WIDTH 80").await;
    });
    assert_eq!(width, Ok(80));

    helper.reply("EVENT 1 0 0 120 0 0 0 0").await;
    match next_notification(&mut notifications).await {
        Notification::Event(event) => assert_eq!(event.character(), Some('x')),
        other => panic!("expected an event, got {other:?}"),
    }

    let ((), ()) = tokio::join!(session.shutdown(), async {
        assert_eq!(helper.expect_line().await, "shutdown");
        helper.reply("OK").await;
    });
    assert_eq!(session.stage(), Stage::Closed);
}

#[tokio::test]
async fn stdout_after_handshake_does_not_disturb_the_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("chatty.sock");
    let listener = UnixListener::bind(&socket).expect("bind socket");
    let config = announcing(&socket, "echo debug: ready; exec sleep 30");
    let (observer, _notifications) = ChannelObserver::new();

    let (session, accepted) = tokio::join!(start_session(&config, Arc::new(observer)), async {
        listener.accept().await.expect("accept")
    });
    let session = session.expect("session must start");
    let mut helper = FakeHelper::new(accepted.0);

    let (height, ()) = tokio::join!(session.height(), async {
        assert_eq!(helper.expect_line().await, "height");
        helper.reply("OK_HEIGHT 24").await;
    });
    assert_eq!(height, Ok(24));
}

#[tokio::test]
async fn garbage_handshake_fails_and_notifies_observer() {
    let config = helper_script("echo garbage; exec sleep 30".to_owned());
    let (observer, mut notifications) = ChannelObserver::new();

    let result = start_session(&config, Arc::new(observer)).await;

    match result {
        Err(AppError::Failed(reason)) => assert_eq!(reason.code(), "invalid-handshake"),
        other => panic!("expected invalid-handshake, got {other:?}"),
    }
    match next_notification(&mut notifications).await {
        Notification::Fatal(reason) => assert_eq!(reason.code(), "invalid-handshake"),
        other => panic!("expected a fatal notification, got {other:?}"),
    }
}

#[tokio::test]
async fn helper_exiting_before_handshake_is_process_exited() {
    let config = helper_script("exit 1".to_owned());
    let (observer, _notifications) = ChannelObserver::new();

    let result = start_session(&config, Arc::new(observer)).await;

    match result {
        Err(AppError::Failed(reason)) => assert_eq!(reason.code(), "process-exited"),
        other => panic!("expected process-exited, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_address_is_connect_failed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("nobody-listens.sock");
    let config = announcing(&missing, "exec sleep 30");
    let (observer, _notifications) = ChannelObserver::new();

    let result = start_session(&config, Arc::new(observer)).await;

    match result {
        Err(AppError::Failed(reason)) => assert_eq!(reason.code(), "connect-failed"),
        other => panic!("expected connect-failed, got {other:?}"),
    }
}

#[tokio::test]
async fn silent_helper_times_out() {
    let mut config = helper_script("exec sleep 30".to_owned());
    config.timeouts.handshake_ms = 200;
    let (observer, _notifications) = ChannelObserver::new();

    let result = start_session(&config, Arc::new(observer)).await;

    assert!(
        matches!(result, Err(AppError::Failed(FailureReason::Timeout(_)))),
        "got {result:?}"
    );
}

#[tokio::test]
async fn missing_helper_binary_is_a_spawn_error() {
    let mut config = test_config();
    config.helper_path = "/nonexistent/termbox_port".into();
    let (observer, _notifications) = ChannelObserver::new();

    let result = start_session(&config, Arc::new(observer)).await;

    assert!(matches!(result, Err(AppError::Spawn(_))), "got {result:?}");
}

#[tokio::test]
async fn invalid_config_is_rejected_before_spawning() {
    let mut config = test_config();
    config.timeouts.command_ms = 0;
    let (observer, _notifications) = ChannelObserver::new();

    let result = start_session(&config, Arc::new(observer)).await;

    assert!(matches!(result, Err(AppError::Config(_))), "got {result:?}");
}
