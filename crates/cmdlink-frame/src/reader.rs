use std::io::{ErrorKind, Read};

use bytes::Bytes;
use cmdlink_transport::IpcStream;
use tracing::trace;

use crate::codec::{check_length, FrameConfig, HEADER_SIZE};
use crate::encoding::Encoding;
use crate::envelope::Envelope;
use crate::error::{FrameError, Result};

/// Reads complete frames from any `Read` stream.
///
/// Reads exactly one header and exactly one envelope per call and never
/// reads ahead, so the stream can be handed to another reader between
/// exchanges without losing bytes.
pub struct FrameReader<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Read the next frame's envelope bytes (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when the stream ends on a
    /// frame boundary, and an `UnexpectedEof` I/O error when it ends inside one.
    pub fn read_frame(&mut self) -> Result<Bytes> {
        let mut header = [0u8; HEADER_SIZE];
        self.fill(&mut header, true)?;
        let len = check_length(u64::from_be_bytes(header), self.config.max_payload_size)?;

        let mut body = vec![0u8; len];
        self.fill(&mut body, false)?;
        trace!(len, "read frame");
        Ok(Bytes::from(body))
    }

    /// Read and decode the next envelope (blocking).
    pub fn read_envelope(&mut self) -> Result<Envelope> {
        let bytes = self.read_frame()?;
        Encoding::decode(&bytes)
    }

    fn fill(&mut self, buf: &mut [u8], at_boundary: bool) -> Result<()> {
        let mut filled = 0usize;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) if at_boundary && filled == 0 => return Err(FrameError::ConnectionClosed),
                Ok(0) => {
                    return Err(FrameError::Io(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        format!("stream ended after {filled} of {} bytes", buf.len()),
                    )))
                }
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(())
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<IpcStream> {
    /// Create a frame reader for `IpcStream` and apply read timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(|err| FrameError::Io(err.into_io()))?;
        Ok(Self::with_config(inner, config))
    }
}
