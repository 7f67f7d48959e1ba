use std::io::ErrorKind;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The envelope exceeds the configured maximum size.
    #[error("envelope too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: u64, max: usize },

    /// An I/O error occurred while reading or writing frames.
    ///
    /// A stream that ends part-way through a frame surfaces here as
    /// `UnexpectedEof`.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended cleanly on a frame boundary.
    #[error("connection closed")]
    ConnectionClosed,

    /// The envelope could not be serialized.
    #[error("envelope encode failed: {0}")]
    Encode(String),

    /// The envelope bytes could not be parsed.
    #[error("envelope decode failed: {0}")]
    Decode(String),

    /// The envelope parsed but breaks the kind/field invariants.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(&'static str),
}

impl FrameError {
    /// True when the peer dropped the connection under us
    /// (reset, abort, or broken pipe).
    pub fn is_peer_reset(&self) -> bool {
        matches!(
            self,
            FrameError::Io(err) if matches!(
                err.kind(),
                ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
            )
        )
    }

    /// True when the stream ended cleanly between frames.
    pub fn is_closed(&self) -> bool {
        matches!(self, FrameError::ConnectionClosed)
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_peer_reset_kinds() {
        for kind in [
            ErrorKind::ConnectionReset,
            ErrorKind::ConnectionAborted,
            ErrorKind::BrokenPipe,
        ] {
            assert!(FrameError::Io(std::io::Error::from(kind)).is_peer_reset());
        }
        assert!(!FrameError::Io(std::io::Error::from(ErrorKind::UnexpectedEof)).is_peer_reset());
        assert!(!FrameError::ConnectionClosed.is_peer_reset());
    }

    #[test]
    fn closed_is_not_an_io_failure() {
        assert!(FrameError::ConnectionClosed.is_closed());
        assert!(!FrameError::Io(std::io::Error::from(ErrorKind::UnexpectedEof)).is_closed());
    }
}
