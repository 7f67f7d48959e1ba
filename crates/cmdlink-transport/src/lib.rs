//! Duplex byte-stream transports for the command exchange protocol.
//!
//! Provides a unified connected stream over:
//! - Unix domain sockets (Linux/macOS)
//! - TCP
//!
//! This is the lowest layer of cmdlink. Framing and command exchange build on
//! top of the [`IpcStream`] type provided here; the protocol only relies on
//! reads and writes being ordered per connection.

pub mod error;
pub mod listener;
pub mod tcp;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use listener::IpcListener;
pub use tcp::TcpTransport;
pub use traits::IpcStream;

#[cfg(unix)]
pub use uds::UnixDomainSocket;
