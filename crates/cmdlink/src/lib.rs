//! Named-command request/response exchange over framed sockets.
//!
//! A client names a command, the server acknowledges it, and the two sides
//! trade length-prefixed envelopes until one of them sends its end sentinel.
//!
//! # Crate Structure
//!
//! - [`transport`]: Unix domain socket and TCP streams and listeners
//! - [`frame`]: Length-prefixed envelope framing (JSON or bincode inside)
//! - [`exchange`]: Command registry, server dispatcher, client exchanger

/// Re-export transport types.
pub mod transport {
    pub use cmdlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use cmdlink_frame::*;
}

/// Re-export exchange types.
pub mod exchange {
    pub use cmdlink_exchange::*;
}
