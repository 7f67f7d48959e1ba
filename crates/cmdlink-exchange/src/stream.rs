use cmdlink_frame::{Encoding, Envelope, EnvelopeKind, FrameConfig, FrameReader, FrameWriter};
use cmdlink_transport::IpcStream;
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::{ExchangeError, Result, TypedError};
use crate::payload::Payload;

/// One frame as seen by the exchange layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A data frame.
    Message(Payload),
    /// The peer's end sentinel, with its optional closing payload.
    End(Payload),
    /// A typed error from the peer.
    Error(TypedError),
}

/// A duplex framed stream with per-exchange end-sentinel bookkeeping.
///
/// Reads and writes go through separate handles of the same connection.
/// Each exchange tracks whether this side has written its end sentinel and
/// whether the peer's has arrived; [`finish`](Self::finish) uses both to
/// leave the connection on a clean boundary for the next command.
pub struct MessageStream {
    reader: FrameReader<IpcStream>,
    writer: FrameWriter<IpcStream>,
    end_sent: bool,
    peer_ended: bool,
    discarded: usize,
}

impl MessageStream {
    pub fn new(stream: IpcStream) -> Result<Self> {
        Self::with_config(stream, FrameConfig::default())
    }

    /// Wrap a connected stream, applying the timeouts in `config`.
    pub fn with_config(stream: IpcStream, config: FrameConfig) -> Result<Self> {
        let read_half = stream.try_clone()?;
        let reader = FrameReader::with_config_ipc(read_half, config.clone())?;
        let writer = FrameWriter::with_config_ipc(stream, config)?;
        Ok(Self {
            reader,
            writer,
            end_sent: false,
            peer_ended: false,
            discarded: 0,
        })
    }

    /// A connected in-process pair over a Unix socketpair.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()
            .map_err(cmdlink_transport::TransportError::Io)?;
        Ok((
            Self::new(IpcStream::from(left))?,
            Self::new(IpcStream::from(right))?,
        ))
    }

    /// Reset the end-sentinel flags for a new command.
    pub fn begin_exchange(&mut self) {
        self.end_sent = false;
        self.peer_ended = false;
        self.discarded = 0;
    }

    /// Write a data frame.
    pub fn write_message(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        self.send(&Envelope::success(data.as_ref()))
    }

    /// Write `value` as a JSON data frame.
    pub fn write_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let payload = Payload::from_json(value)?;
        self.write_message(payload)
    }

    /// Write `value` as a bincode data frame.
    pub fn write_binary<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let payload = Payload::from_binary(value)?;
        self.write_message(payload)
    }

    /// Write an empty end sentinel.
    pub fn write_end(&mut self) -> Result<()> {
        self.write_end_with_data(b"")
    }

    /// Write the end sentinel carrying a closing payload.
    ///
    /// At most one end sentinel is written per exchange; later calls are
    /// no-ops.
    pub fn write_end_with_data(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        if self.end_sent {
            trace!("end sentinel already written");
            return Ok(());
        }
        self.end_sent = true;
        self.send(&Envelope::end(data.as_ref()))
    }

    /// Write a typed error frame.
    pub fn write_error(&mut self, err: &TypedError) -> Result<()> {
        self.send(&err.to_envelope())
    }

    /// Read the next frame (blocking).
    pub fn receive(&mut self) -> Result<Received> {
        let envelope = self.reader.read_envelope()?;
        Ok(match envelope.kind {
            EnvelopeKind::Success => Received::Message(Payload::from(envelope.into_data())),
            EnvelopeKind::End => {
                self.peer_ended = true;
                Received::End(Payload::from(envelope.into_data()))
            }
            EnvelopeKind::Error => Received::Error(TypedError::from_envelope(envelope)),
        })
    }

    /// Read the next data frame.
    ///
    /// A typed error from the peer becomes [`ExchangeError::Remote`] and the
    /// peer's end sentinel becomes [`ExchangeError::UnexpectedEnd`].
    pub fn receive_message(&mut self) -> Result<Payload> {
        match self.receive()? {
            Received::Message(payload) => Ok(payload),
            Received::Error(err) => Err(ExchangeError::Remote(err)),
            Received::End(_) => Err(ExchangeError::UnexpectedEnd),
        }
    }

    /// Close out the current exchange.
    ///
    /// Writes this side's end sentinel if it hasn't been written, then drains
    /// until the peer's arrives. Returns the peer's closing payload when the
    /// drain saw it.
    pub fn finish(&mut self) -> Result<Option<Payload>> {
        if !self.end_sent {
            if let Err(err) = self.write_end() {
                if err.is_closed() || err.is_peer_reset() {
                    debug!(error = %err, "peer gone before end sentinel");
                    return Ok(None);
                }
                return Err(err);
            }
        }
        self.drain()
    }

    /// Discard frames until the peer's end sentinel.
    ///
    /// Stops early, without error, when the connection closes or resets.
    pub fn drain(&mut self) -> Result<Option<Payload>> {
        let mut closing = None;
        while !self.peer_ended {
            match self.receive() {
                Ok(Received::End(payload)) => closing = Some(payload),
                Ok(Received::Message(payload)) => {
                    self.discarded += 1;
                    trace!(len = payload.len(), "discarded data frame while draining");
                }
                Ok(Received::Error(err)) => {
                    self.discarded += 1;
                    debug!(error = %err, "discarded error frame while draining");
                }
                Err(err) if err.is_closed() || err.is_peer_reset() => {
                    debug!(error = %err, "connection ended while draining");
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        if self.discarded > 0 {
            debug!(frames = self.discarded, "drained exchange");
        }
        Ok(closing)
    }

    /// Whether this side has written its end sentinel in this exchange.
    pub fn end_sent(&self) -> bool {
        self.end_sent
    }

    /// Whether the peer's end sentinel has arrived in this exchange.
    pub fn peer_ended(&self) -> bool {
        self.peer_ended
    }

    /// Frames thrown away by [`drain`](Self::drain) in this exchange.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Switch the encoding used for outgoing envelopes.
    pub fn set_encoding(&mut self, encoding: Encoding) {
        self.writer.set_encoding(encoding);
    }

    pub fn encoding(&self) -> Encoding {
        self.writer.encoding()
    }

    /// The underlying connection.
    pub fn get_ref(&self) -> &IpcStream {
        self.writer.get_ref()
    }

    /// Shut down both directions of the connection.
    pub fn shutdown(&self) -> Result<()> {
        self.writer.get_ref().shutdown()?;
        Ok(())
    }

    fn send(&mut self, envelope: &Envelope) -> Result<()> {
        self.writer.write_envelope(envelope)?;
        Ok(())
    }
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("stream", self.writer.get_ref())
            .field("encoding", &self.writer.encoding())
            .field("end_sent", &self.end_sent)
            .field("peer_ended", &self.peer_ended)
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrCode;

    #[test]
    fn frames_arrive_tagged() {
        let (mut a, mut b) = MessageStream::pair().unwrap();

        a.write_message(b"hello").unwrap();
        a.write_error(&ErrCode(42).error("nope")).unwrap();
        a.write_end_with_data(b"bye").unwrap();

        assert_eq!(b.receive().unwrap(), Received::Message(Payload::from("hello")));
        assert_eq!(b.receive().unwrap(), Received::Error(ErrCode(42).error("nope")));
        assert!(!b.peer_ended());
        assert_eq!(b.receive().unwrap(), Received::End(Payload::from("bye")));
        assert!(b.peer_ended());
    }

    #[test]
    fn end_sentinel_written_once_per_exchange() {
        let (mut a, mut b) = MessageStream::pair().unwrap();

        a.write_end().unwrap();
        a.write_end_with_data(b"ignored").unwrap();
        a.write_message(b"after").unwrap();

        assert_eq!(b.receive().unwrap(), Received::End(Payload::new()));
        assert_eq!(b.receive().unwrap(), Received::Message(Payload::from("after")));
        assert!(a.end_sent());

        a.begin_exchange();
        assert!(!a.end_sent());
    }

    #[test]
    fn receive_message_maps_error_and_end() {
        let (mut a, mut b) = MessageStream::pair().unwrap();

        a.write_error(&ErrCode::UNKNOWN.error("boom")).unwrap();
        a.write_end().unwrap();

        let err = b.receive_message().unwrap_err();
        assert!(ErrCode::UNKNOWN.matches(&err));
        assert!(matches!(
            b.receive_message().unwrap_err(),
            ExchangeError::UnexpectedEnd
        ));
    }

    #[test]
    fn finish_drains_to_peer_end() {
        let (mut a, mut b) = MessageStream::pair().unwrap();

        b.write_message(b"stale-1").unwrap();
        b.write_error(&ErrCode(9).error("stale")).unwrap();
        b.write_end_with_data(b"closing").unwrap();

        let closing = a.finish().unwrap();
        assert_eq!(closing, Some(Payload::from("closing")));
        assert_eq!(a.discarded(), 2);
        assert!(a.end_sent() && a.peer_ended());

        // a's end sentinel is waiting for b.
        assert_eq!(b.receive().unwrap(), Received::End(Payload::new()));
    }

    #[test]
    fn finish_is_idempotent() {
        let (mut a, mut b) = MessageStream::pair().unwrap();
        b.write_end().unwrap();

        assert_eq!(a.finish().unwrap(), Some(Payload::new()));
        assert_eq!(a.finish().unwrap(), None);

        assert_eq!(b.receive().unwrap(), Received::End(Payload::new()));
        b.write_message(b"next").unwrap();
        assert_eq!(a.receive().unwrap(), Received::Message(Payload::from("next")));
    }

    #[test]
    fn drain_stops_when_peer_closes() {
        let (mut a, mut b) = MessageStream::pair().unwrap();
        b.write_message(b"last words").unwrap();
        drop(b);

        assert_eq!(a.finish().unwrap(), None);
        assert!(!a.peer_ended());
    }

    #[test]
    fn typed_payload_writers() {
        let (mut a, mut b) = MessageStream::pair().unwrap();

        a.write_json(&serde_json::json!({"user": "a"})).unwrap();
        a.set_encoding(Encoding::Binary);
        a.write_binary(&(1u8, 2u8)).unwrap();

        let json: serde_json::Value = b.receive_message().unwrap().json().unwrap();
        assert_eq!(json["user"], "a");
        let pair: (u8, u8) = b.receive_message().unwrap().binary().unwrap();
        assert_eq!(pair, (1, 2));
        assert_eq!(a.encoding(), Encoding::Binary);
    }
}
