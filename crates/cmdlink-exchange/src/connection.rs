use std::net::{SocketAddr, ToSocketAddrs};
#[cfg(unix)]
use std::path::Path;

use cmdlink_frame::FrameConfig;
use cmdlink_transport::TcpTransport;
#[cfg(unix)]
use cmdlink_transport::UnixDomainSocket;
use tracing::debug;

use crate::error::Result;
use crate::stream::MessageStream;

/// Server-side facts about one accepted connection, passed to handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Server-assigned identifier, `conn-N`.
    pub id: String,
    /// `unix-domain-socket` or `tcp`.
    pub transport: &'static str,
    /// `(uid, gid, pid)` of the peer process, where the platform reports it.
    pub peer_credentials: Option<(u32, u32, u32)>,
    /// Remote address for TCP peers.
    pub peer_addr: Option<SocketAddr>,
}

impl ConnectionInfo {
    /// Describe the connection behind `stream`.
    pub fn for_stream(id: impl Into<String>, stream: &MessageStream) -> Self {
        let inner = stream.get_ref();
        Self {
            id: id.into(),
            transport: inner.transport_name(),
            peer_credentials: inner.peer_credentials(),
            peer_addr: inner.peer_addr(),
        }
    }
}

/// Connect to a command server on a Unix domain socket.
#[cfg(unix)]
pub fn connect_unix(path: impl AsRef<Path>, config: FrameConfig) -> Result<MessageStream> {
    let path = path.as_ref();
    let stream = UnixDomainSocket::connect(path)?;
    debug!(path = %path.display(), "connected to command server");
    MessageStream::with_config(stream, config)
}

/// Connect to a command server over TCP.
pub fn connect_tcp(
    addr: impl ToSocketAddrs + std::fmt::Display,
    config: FrameConfig,
) -> Result<MessageStream> {
    let label = addr.to_string();
    let stream = TcpTransport::connect(addr)?;
    debug!(addr = %label, "connected to command server");
    MessageStream::with_config(stream, config)
}
