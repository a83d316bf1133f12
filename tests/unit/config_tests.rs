use std::io::Write;
use std::time::Duration;

use termbox_bridge::config::{BridgeConfig, MIN_LINE_BYTES};
use termbox_bridge::AppError;

fn sample_toml() -> &'static str {
    r#"
helper_path = "/usr/local/bin/termbox_port"
helper_args = ["--debug"]

[timeouts]
handshake_ms = 2000
connect_ms = 1500
command_ms = 250
shutdown_ms = 500

[protocol]
max_line_bytes = 8192
desync_limit = 5
timeout_limit = 0
"#
}

#[test]
fn parses_full_config() {
    let config = BridgeConfig::from_toml_str(sample_toml()).expect("config must parse");

    assert_eq!(
        config.helper_path.to_str(),
        Some("/usr/local/bin/termbox_port")
    );
    assert_eq!(config.helper_args, vec!["--debug".to_owned()]);
    assert_eq!(config.timeouts.handshake(), Duration::from_millis(2000));
    assert_eq!(config.timeouts.connect(), Duration::from_millis(1500));
    assert_eq!(config.timeouts.command(), Duration::from_millis(250));
    assert_eq!(config.timeouts.shutdown(), Duration::from_millis(500));
    assert_eq!(config.protocol.max_line_bytes, 8192);
    assert_eq!(config.protocol.desync_limit, 5);
    assert_eq!(config.protocol.timeout_limit, 0);
}

#[test]
fn minimal_config_uses_defaults() {
    let config = BridgeConfig::from_toml_str(r#"helper_path = "termbox_port""#)
        .expect("minimal config must parse");

    assert_eq!(config, BridgeConfig::new("termbox_port"));
    assert!(config.helper_args.is_empty());
    assert_eq!(config.timeouts.handshake_ms, 5000);
    assert_eq!(config.timeouts.connect_ms, 5000);
    assert_eq!(config.timeouts.command_ms, 5000);
    assert_eq!(config.timeouts.shutdown_ms, 1000);
    assert_eq!(config.protocol.max_line_bytes, 4096);
    assert_eq!(config.protocol.desync_limit, 3);
    assert_eq!(config.protocol.timeout_limit, 3);
}

#[test]
fn missing_helper_path_is_rejected() {
    let result = BridgeConfig::from_toml_str("[timeouts]\ncommand_ms = 10\n");

    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn invalid_toml_is_a_config_error() {
    let result = BridgeConfig::from_toml_str("helper_path = ");

    match result {
        Err(AppError::Config(msg)) => assert!(msg.contains("invalid config"), "got: {msg}"),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn empty_helper_path_fails_validation() {
    let result = BridgeConfig::from_toml_str(r#"helper_path = """#);

    match result {
        Err(AppError::Config(msg)) => assert!(msg.contains("helper_path"), "got: {msg}"),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn zero_timeout_fails_validation() {
    let raw = "helper_path = \"termbox_port\"\n[timeouts]\nconnect_ms = 0\n";

    match BridgeConfig::from_toml_str(raw) {
        Err(AppError::Config(msg)) => assert!(msg.contains("timeouts.connect_ms"), "got: {msg}"),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn tiny_line_cap_fails_validation() {
    let mut config = BridgeConfig::new("termbox_port");
    config.protocol.max_line_bytes = MIN_LINE_BYTES - 1;

    assert!(matches!(config.validate(), Err(AppError::Config(_))));

    config.protocol.max_line_bytes = MIN_LINE_BYTES;
    assert!(config.validate().is_ok());
}

#[test]
fn load_from_path_reads_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(sample_toml().as_bytes()).expect("write config");

    let config = BridgeConfig::load_from_path(file.path()).expect("config must load");

    assert_eq!(config.protocol.desync_limit, 5);
}

#[test]
fn load_from_missing_path_is_a_config_error() {
    let dir = tempfile::tempdir().expect("temp dir");

    let result = BridgeConfig::load_from_path(dir.path().join("absent.toml"));

    assert!(matches!(result, Err(AppError::Config(_))));
}
