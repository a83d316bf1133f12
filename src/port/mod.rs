//! Helper process transport.
//!
//! Everything between a [`Command`](protocol::Command) value and bytes on
//! the wire lives here:
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based line framing
//!   and the `LineFrames` stream decoder used with `FramedRead`.
//! - `line_buffer`: chunk-to-line reassembly with a preserved remainder.
//! - `protocol`: command encoding and response/event decoding.
//! - `spawner`: helper process spawning, supervision and output forwarding.
//! - `handshake`: the `OK <address>` handshake state machine.
//! - `connector`: opening the duplex channel the helper advertises.
//! - `reader` / `writer`: per-session I/O tasks feeding the session actor.

pub mod codec;
pub mod connector;
pub mod handshake;
pub mod line_buffer;
pub mod protocol;
pub mod reader;
pub mod spawner;
pub mod writer;
