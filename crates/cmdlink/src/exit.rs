use std::fmt;
use std::io;

use cmdlink_exchange::ExchangeError;
use cmdlink_frame::FrameError;
use cmdlink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
/// The server answered with a typed error.
pub const REMOTE_ERROR: i32 = 70;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::AddrInUse => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Tcp { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

pub fn exchange_error(context: &str, err: ExchangeError) -> CliError {
    match err {
        ExchangeError::Transport(err) => transport_error(context, err),
        ExchangeError::Frame(err) => frame_error(context, err),
        ExchangeError::Remote(err) => CliError::new(REMOTE_ERROR, format!("{context}: {err}")),
        ExchangeError::Payload(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        ExchangeError::UnexpectedEnd | ExchangeError::Protocol(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use cmdlink_exchange::ErrCode;

    use super::*;

    #[test]
    fn remote_errors_map_to_remote_code() {
        let err = exchange_error(
            "exchange failed",
            ExchangeError::Remote(ErrCode::COMMAND_UNDEFINED.error("command [/x] is not defined")),
        );
        assert_eq!(err.code, REMOTE_ERROR);
        assert!(err.message.contains("/x"));
    }

    #[test]
    fn missing_socket_is_transport_error() {
        let err = exchange_error(
            "connect failed",
            ExchangeError::Transport(TransportError::Connect {
                path: "/tmp/nope.sock".into(),
                source: io::Error::from(io::ErrorKind::NotFound),
            }),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
    }

    #[test]
    fn read_timeout_is_timeout() {
        let err = exchange_error(
            "exchange failed",
            ExchangeError::Frame(FrameError::Io(io::Error::from(io::ErrorKind::WouldBlock))),
        );
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn oversized_and_undecodable_payloads() {
        let too_large = frame_error("read", FrameError::PayloadTooLarge { size: 10, max: 1 });
        assert_eq!(too_large.code, DATA_INVALID);

        let bad_payload = exchange_error(
            "decode",
            ExchangeError::Payload(FrameError::Decode("bad".to_string())),
        );
        assert_eq!(bad_payload.code, DATA_INVALID);
    }
}
