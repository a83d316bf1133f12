#![forbid(unsafe_code)]

//! `termbox-bridge`: drive a termbox helper process from the command line.
//!
//! Starts one session against the configured helper, performs the requested
//! action and shuts the session down again. Logs go to stderr so stdout
//! carries only command output.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use termbox_bridge::config::BridgeConfig;
use termbox_bridge::port::protocol::Command;
use termbox_bridge::session::{start_session, ChannelObserver, Notification, SessionHandle};
use termbox_bridge::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "termbox-bridge",
    about = "Supervise a termbox helper and talk to it over its line protocol",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Helper executable; overrides `helper_path` from the config file.
    #[arg(long)]
    helper: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Connect, print the terminal size and disconnect.
    Probe,

    /// Send one command line (e.g. `get_cell 3 4`) and print the reply.
    Send {
        /// Command line in wire format.
        line: String,
    },

    /// Stream helper events as JSON lines until interrupted.
    Events,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = load_config(args.config.as_deref(), args.helper)?;
    info!(helper = %config.helper_path.display(), "starting helper session");

    let (observer, mut notifications) = ChannelObserver::new();
    let session = start_session(&config, Arc::new(observer)).await?;

    let outcome = match args.command {
        Action::Probe => probe(&session).await,
        Action::Send { line } => send_line(&session, &line).await,
        Action::Events => {
            let shutdown = shutdown_signal();
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    () = &mut shutdown => {
                        info!("shutdown signal received");
                        break Ok(());
                    }
                    notification = notifications.recv() => match notification {
                        Some(Notification::Event(event)) => {
                            println!("{}", serde_json::to_string(&event).unwrap_or_default());
                        }
                        Some(Notification::Fatal(reason)) => break Err(AppError::Failed(reason)),
                        None => break Ok(()),
                    },
                }
            }
        }
    };

    session.shutdown().await;
    if let Err(err) = &outcome {
        error!(%err, "command failed");
    }
    outcome
}

fn load_config(path: Option<&Path>, helper: Option<PathBuf>) -> Result<BridgeConfig> {
    let mut config = match (path, &helper) {
        (Some(path), _) => BridgeConfig::load_from_path(path)?,
        (None, Some(helper)) => BridgeConfig::new(helper.clone()),
        (None, None) => {
            return Err(AppError::Config(
                "either --config or --helper is required".into(),
            ))
        }
    };
    if let Some(helper) = helper {
        config.helper_path = helper;
    }
    config.validate()?;
    Ok(config)
}

async fn probe(session: &SessionHandle) -> Result<()> {
    let width = session.width().await?;
    let height = session.height().await?;
    let info = session.info();
    println!(
        "{}",
        json!({
            "session_id": info.id,
            "address": info.address,
            "helper_pid": info.helper_pid,
            "width": width,
            "height": height,
        })
    );
    Ok(())
}

async fn send_line(session: &SessionHandle, line: &str) -> Result<()> {
    let command = Command::parse_line(line)?;
    let reply = session.send(command).await?;
    println!("{}", serde_json::to_string(&reply).unwrap_or_default());
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
