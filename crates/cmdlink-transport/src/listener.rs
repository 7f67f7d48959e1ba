use std::fmt;

use crate::error::Result;
use crate::tcp::TcpTransport;
use crate::traits::IpcStream;
#[cfg(unix)]
use crate::uds::UnixDomainSocket;

/// Either kind of listener, so servers can accept without caring which.
pub enum IpcListener {
    #[cfg(unix)]
    Unix(UnixDomainSocket),
    Tcp(TcpTransport),
}

impl IpcListener {
    /// Accept the next connection (blocking).
    pub fn accept(&self) -> Result<IpcStream> {
        match self {
            #[cfg(unix)]
            IpcListener::Unix(socket) => socket.accept(),
            IpcListener::Tcp(socket) => socket.accept(),
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match self {
            #[cfg(unix)]
            IpcListener::Unix(_) => "unix-domain-socket",
            IpcListener::Tcp(_) => "tcp",
        }
    }
}

impl fmt::Display for IpcListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(unix)]
            IpcListener::Unix(socket) => write!(f, "unix:{}", socket.path().display()),
            IpcListener::Tcp(socket) => write!(f, "tcp:{}", socket.local_addr()),
        }
    }
}

#[cfg(unix)]
impl From<UnixDomainSocket> for IpcListener {
    fn from(socket: UnixDomainSocket) -> Self {
        IpcListener::Unix(socket)
    }
}

impl From<TcpTransport> for IpcListener {
    fn from(socket: TcpTransport) -> Self {
        IpcListener::Tcp(socket)
    }
}
