use std::fmt;
use std::io::ErrorKind;

use cmdlink_frame::{Envelope, FrameError};
use cmdlink_transport::TransportError;

/// Numeric error code carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ErrCode(pub u32);

impl ErrCode {
    /// Unclassified failure, including handler faults.
    pub const UNKNOWN: ErrCode = ErrCode(1);
    /// The command name is not registered.
    pub const COMMAND_UNDEFINED: ErrCode = ErrCode(2);
    /// The command frame could not be read.
    pub const READ_COMMAND: ErrCode = ErrCode(3);
    /// A frame arrived that the protocol does not allow at that point.
    pub const PROTOCOL: ErrCode = ErrCode(4);

    /// Build a typed error with this code.
    pub fn error(self, message: impl Into<String>) -> TypedError {
        TypedError::new(self, message)
    }

    /// True when `err` carries this code.
    pub fn matches(self, err: &ExchangeError) -> bool {
        err.code() == Some(self)
    }

    pub fn name(self) -> Option<&'static str> {
        match self {
            ErrCode::UNKNOWN => Some("unknown"),
            ErrCode::COMMAND_UNDEFINED => Some("command_undefined"),
            ErrCode::READ_COMMAND => Some("read_command"),
            ErrCode::PROTOCOL => Some("protocol"),
            _ => None,
        }
    }
}

impl fmt::Display for ErrCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}({})", self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

/// A code + message pair that crosses the wire intact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} [{code}]")]
pub struct TypedError {
    pub code: ErrCode,
    pub message: String,
}

impl TypedError {
    pub fn new(code: ErrCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Compare the code.
    pub fn is(&self, code: ErrCode) -> bool {
        self.code == code
    }

    pub fn to_envelope(&self) -> Envelope {
        Envelope::error(self.code.0, self.message.clone())
    }

    /// Rebuild from an error envelope. Missing fields fall back to
    /// `UNKNOWN` and an empty message.
    pub fn from_envelope(envelope: Envelope) -> Self {
        Self {
            code: envelope.error_code.map(ErrCode).unwrap_or(ErrCode::UNKNOWN),
            message: envelope.message.unwrap_or_default(),
        }
    }
}

/// Errors that can occur while dispatching or driving an exchange.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error: I/O failure, peer reset, or an undecodable frame.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A typed error reported by the peer.
    #[error("remote error: {0}")]
    Remote(TypedError),

    /// The peer's end sentinel arrived where a data frame was required.
    #[error("exchange ended by peer")]
    UnexpectedEnd,

    /// The peer broke the exchange sequence.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A payload could not be converted to or from a typed value.
    #[error("payload conversion failed: {0}")]
    Payload(#[source] FrameError),
}

impl ExchangeError {
    /// The wire code this error maps to, if it has one.
    pub fn code(&self) -> Option<ErrCode> {
        match self {
            ExchangeError::Remote(err) => Some(err.code),
            ExchangeError::UnexpectedEnd | ExchangeError::Protocol(_) => Some(ErrCode::PROTOCOL),
            _ => None,
        }
    }

    /// The typed error reported by the peer, if that is what this is.
    pub fn remote(&self) -> Option<&TypedError> {
        match self {
            ExchangeError::Remote(err) => Some(err),
            _ => None,
        }
    }

    /// Convert to the typed error written back to a peer.
    pub fn to_typed(&self) -> TypedError {
        match self {
            ExchangeError::Remote(err) => err.clone(),
            other => TypedError::new(other.code().unwrap_or(ErrCode::UNKNOWN), other.to_string()),
        }
    }

    /// Transport and framing failures leave the connection unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExchangeError::Transport(_) | ExchangeError::Frame(_))
    }

    /// The peer reset or aborted the connection.
    pub fn is_peer_reset(&self) -> bool {
        match self {
            ExchangeError::Frame(err) => err.is_peer_reset(),
            ExchangeError::Transport(err) => err.io_source().is_some_and(|io| {
                matches!(
                    io.kind(),
                    ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
                )
            }),
            _ => false,
        }
    }

    /// The stream ended cleanly on a frame boundary.
    pub fn is_closed(&self) -> bool {
        matches!(self, ExchangeError::Frame(err) if err.is_closed())
    }
}

impl From<TypedError> for ExchangeError {
    fn from(err: TypedError) -> Self {
        ExchangeError::Remote(err)
    }
}

pub type Result<T> = std::result::Result<T, ExchangeError>;
