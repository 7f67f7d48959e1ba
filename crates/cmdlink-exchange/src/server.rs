use std::net::ToSocketAddrs;
#[cfg(unix)]
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cmdlink_frame::FrameConfig;
use cmdlink_transport::{IpcListener, IpcStream, TcpTransport, TransportError};
#[cfg(unix)]
use cmdlink_transport::UnixDomainSocket;
use tracing::{debug, info, warn};

use crate::connection::ConnectionInfo;
use crate::dispatcher::Dispatcher;
use crate::error::{ExchangeError, Result};
use crate::registry::CommandRegistry;
use crate::stream::MessageStream;

/// Server behavior settings.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Framing limits and timeouts applied to every accepted connection.
    pub frame: FrameConfig,
    /// Cap on concurrently served connections. Connections over the cap
    /// are accepted and closed straight away.
    pub max_connections: Option<usize>,
}

/// Accepts connections and serves each on its own thread.
pub struct CommandServer {
    listener: IpcListener,
    dispatcher: Arc<Dispatcher>,
    config: ServerConfig,
    next_conn_id: AtomicU64,
    active: Arc<AtomicUsize>,
}

impl CommandServer {
    /// Bind a Unix domain socket server.
    #[cfg(unix)]
    pub fn bind_unix(
        path: impl AsRef<Path>,
        registry: CommandRegistry,
        config: ServerConfig,
    ) -> Result<Self> {
        let socket = UnixDomainSocket::bind(path)?;
        Ok(Self::from_listener(socket.into(), registry, config))
    }

    /// Bind a TCP server.
    pub fn bind_tcp(
        addr: impl ToSocketAddrs + std::fmt::Display,
        registry: CommandRegistry,
        config: ServerConfig,
    ) -> Result<Self> {
        let socket = TcpTransport::bind(addr)?;
        Ok(Self::from_listener(socket.into(), registry, config))
    }

    pub fn from_listener(
        listener: IpcListener,
        registry: CommandRegistry,
        config: ServerConfig,
    ) -> Self {
        Self {
            listener,
            dispatcher: Arc::new(Dispatcher::new(Arc::new(registry))),
            config,
            next_conn_id: AtomicU64::new(1),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn listener(&self) -> &IpcListener {
        &self.listener
    }

    /// Connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Accept connections until `running` is cleared.
    ///
    /// The flag is checked between accepts; a blocked accept returns once
    /// the next client connects.
    pub fn run(&self, running: &AtomicBool) -> Result<()> {
        info!(listener = %self.listener, "command server running");
        while running.load(Ordering::SeqCst) {
            match self.accept_one() {
                Ok(_) => {}
                Err(err) if is_transient_accept(&err) => {
                    warn!(error = %err, "accept failed; continuing");
                }
                Err(err) => return Err(err),
            }
        }
        info!(listener = %self.listener, "command server stopped");
        Ok(())
    }

    /// Accept one connection and start serving it on a new thread.
    ///
    /// Returns `None` when the connection was refused for exceeding
    /// `max_connections`.
    pub fn accept_one(&self) -> Result<Option<JoinHandle<()>>> {
        let stream = self.listener.accept()?;
        let id = format!("conn-{}", self.next_conn_id.fetch_add(1, Ordering::Relaxed));

        if let Some(max) = self.config.max_connections {
            if self.active.load(Ordering::SeqCst) >= max {
                warn!(conn = %id, max, "connection limit reached; closing");
                if let Err(err) = stream.shutdown() {
                    debug!(conn = %id, error = %err, "shutdown of refused connection failed");
                }
                return Ok(None);
            }
        }

        let slot = ActiveSlot::claim(Arc::clone(&self.active));
        let dispatcher = Arc::clone(&self.dispatcher);
        let frame = self.config.frame.clone();
        let handle = thread::Builder::new()
            .name(id.clone())
            .spawn(move || {
                let _slot = slot;
                serve_connection(&dispatcher, stream, frame, id);
            })
            .map_err(TransportError::Io)?;
        Ok(Some(handle))
    }
}

fn serve_connection(dispatcher: &Dispatcher, stream: IpcStream, frame: FrameConfig, id: String) {
    let mut stream = match MessageStream::with_config(stream, frame) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(conn = %id, error = %err, "failed to set up connection");
            return;
        }
    };
    let conn = ConnectionInfo::for_stream(id, &stream);
    info!(
        conn = %conn.id,
        transport = conn.transport,
        peer_credentials = ?conn.peer_credentials,
        "connection accepted"
    );

    match dispatcher.serve(&mut stream, &conn) {
        Ok(served) => info!(conn = %conn.id, served, "connection closed"),
        Err(err) => warn!(conn = %conn.id, error = %err, "connection ended with error"),
    }
}

fn is_transient_accept(err: &ExchangeError) -> bool {
    matches!(err, ExchangeError::Transport(TransportError::Accept(_)))
}

/// Counts a connection as active for as long as it lives.
struct ActiveSlot(Arc<AtomicUsize>);

impl ActiveSlot {
    fn claim(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
