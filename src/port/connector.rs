//! Duplex channel opening.
//!
//! The helper announces an address during the handshake; a
//! [`ChannelConnector`] turns that address into a [`DuplexChannel`]. The
//! production connector treats the address as a filesystem path to a local
//! socket (a Unix domain socket, or a named pipe on Windows) and opens it
//! with `interprocess`.

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::io;
use std::pin::Pin;

use interprocess::local_socket::tokio::Stream as LocalStream;
use interprocess::local_socket::traits::tokio::Stream as _;
use interprocess::local_socket::{GenericFilePath, ToFsName};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Read half of a duplex channel.
pub type ChannelReader = Pin<Box<dyn AsyncRead + Send>>;

/// Write half of a duplex channel.
pub type ChannelWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Bidirectional byte channel to the helper, already split into halves.
pub struct DuplexChannel {
    /// Inbound half: responses and events.
    pub reader: ChannelReader,
    /// Outbound half: commands.
    pub writer: ChannelWriter,
}

impl DuplexChannel {
    /// Wrap separate read and write halves.
    #[must_use]
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        Self {
            reader: Box::pin(reader),
            writer: Box::pin(writer),
        }
    }

    /// Split a single bidirectional stream.
    #[must_use]
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer)
    }
}

impl Debug for DuplexChannel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexChannel").finish_non_exhaustive()
    }
}

/// Opens the duplex channel at a handshake-advertised address.
pub trait ChannelConnector: Send + Sync {
    /// Connect to `address`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the channel cannot be opened.
    fn connect<'a>(
        &'a self,
        address: &'a str,
    ) -> Pin<Box<dyn Future<Output = io::Result<DuplexChannel>> + Send + 'a>>;
}

/// Connector for filesystem-path local sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSocketConnector;

impl ChannelConnector for LocalSocketConnector {
    fn connect<'a>(
        &'a self,
        address: &'a str,
    ) -> Pin<Box<dyn Future<Output = io::Result<DuplexChannel>> + Send + 'a>> {
        Box::pin(async move {
            let name = address.to_fs_name::<GenericFilePath>()?;
            let stream = LocalStream::connect(name).await?;
            debug!(address, "local socket connected");
            let (reader, writer) = stream.split();
            Ok(DuplexChannel::new(reader, writer))
        })
    }
}
