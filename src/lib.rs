#![forbid(unsafe_code)]

//! Supervisor and line-protocol client for an out-of-process termbox
//! rendering helper.
//!
//! The helper is spawned as a child process, announces a local socket
//! address on stdout, and then serves newline-delimited commands over that
//! socket while pushing asynchronous `EVENT` lines. [`session`] wraps the
//! whole lifecycle behind a [`session::SessionHandle`].

pub mod config;
pub mod errors;
pub mod models;
pub mod port;
pub mod session;

pub use config::BridgeConfig;
pub use errors::{AppError, FailureReason, Result};
