use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// TCP listener.
///
/// Nagle's algorithm is disabled on every accepted and connected stream:
/// exchanges alternate small frames in strict turns, so coalescing only adds
/// latency.
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Bind and listen on a TCP address (e.g. `127.0.0.1:7400`, port 0 for any).
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        let label = addr.to_string();
        let listener = TcpListener::bind(addr).map_err(|source| TransportError::Tcp {
            addr: label.clone(),
            source,
        })?;
        let local_addr = listener.local_addr()?;

        info!(%local_addr, "listening on tcp");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        stream.set_nodelay(true)?;
        debug!(%peer, "accepted tcp connection");
        Ok(IpcStream::from(stream))
    }

    /// Connect to a listening TCP address (blocking).
    pub fn connect(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<IpcStream> {
        let label = addr.to_string();
        let stream = TcpStream::connect(addr).map_err(|source| TransportError::Tcp {
            addr: label.clone(),
            source,
        })?;
        stream.set_nodelay(true)?;
        debug!(addr = %label, "connected over tcp");
        Ok(IpcStream::from(stream))
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
