//! Unit tests for the session stage model.

use termbox_bridge::models::session::new_session_id;
use termbox_bridge::models::Stage;

const ALL: [Stage; 6] = [
    Stage::Starting,
    Stage::AwaitingHandshakeData,
    Stage::ConnectingChannel,
    Stage::Connected,
    Stage::Failed,
    Stage::Closed,
];

#[test]
fn handshake_stages_advance_one_step_at_a_time() {
    assert!(Stage::Starting.can_transition_to(Stage::AwaitingHandshakeData));
    assert!(Stage::AwaitingHandshakeData.can_transition_to(Stage::ConnectingChannel));
    assert!(Stage::ConnectingChannel.can_transition_to(Stage::Connected));
    assert!(Stage::Connected.can_transition_to(Stage::Closed));

    assert!(!Stage::Starting.can_transition_to(Stage::Connected));
    assert!(!Stage::AwaitingHandshakeData.can_transition_to(Stage::Connected));
    assert!(!Stage::Starting.can_transition_to(Stage::Closed));
}

#[test]
fn stages_never_move_backwards() {
    assert!(!Stage::Connected.can_transition_to(Stage::Starting));
    assert!(!Stage::ConnectingChannel.can_transition_to(Stage::AwaitingHandshakeData));
    assert!(!Stage::Connected.can_transition_to(Stage::ConnectingChannel));
}

#[test]
fn every_live_stage_may_fail() {
    for stage in [
        Stage::Starting,
        Stage::AwaitingHandshakeData,
        Stage::ConnectingChannel,
        Stage::Connected,
    ] {
        assert!(!stage.is_terminal());
        assert!(stage.can_transition_to(Stage::Failed), "{stage} -> failed");
    }
}

#[test]
fn terminal_stages_have_no_exits() {
    for terminal in [Stage::Failed, Stage::Closed] {
        assert!(terminal.is_terminal());
        for next in ALL {
            assert!(
                !terminal.can_transition_to(next),
                "{terminal} must not move to {next}"
            );
        }
    }
}

#[test]
fn stage_names_are_snake_case() {
    assert_eq!(Stage::AwaitingHandshakeData.to_string(), "awaiting_handshake_data");
    assert_eq!(Stage::ConnectingChannel.as_str(), "connecting_channel");
    assert_eq!(
        serde_json::to_string(&Stage::Connected).expect("serialize"),
        "\"connected\""
    );
}

#[test]
fn session_ids_are_unique() {
    assert_ne!(new_session_id(), new_session_id());
}
