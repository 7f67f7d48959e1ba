//! Command dispatch and bidirectional exchange over framed streams.
//!
//! A client [`Exchanger`] sends a command name and an initial payload; the
//! server-side [`Dispatcher`] looks the name up in a [`CommandRegistry`],
//! acknowledges it, and lets the handler drive as many round trips as it
//! needs. Both sides finish every exchange by writing their end sentinel and
//! draining until they see the peer's, so the connection stays in sync for
//! the next command.

pub mod command;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod exchanger;
pub mod payload;
pub mod registry;
pub mod server;
pub mod stream;

#[cfg(unix)]
pub use connection::connect_unix;
pub use connection::{connect_tcp, ConnectionInfo};
pub use dispatcher::{Dispatcher, SessionOutcome, SessionState};
pub use error::{ErrCode, ExchangeError, Result, TypedError};
pub use exchanger::{ErrorDecision, ExchangeOptions, Exchanger, Step};
pub use payload::Payload;
pub use registry::{CommandRegistry, Completion, Handler, HandlerResult};
pub use server::{CommandServer, ServerConfig};
pub use stream::{MessageStream, Received};
