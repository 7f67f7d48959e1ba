//! Length-prefixed envelope framing for the command exchange protocol.
//!
//! Every message on the wire is:
//! - An 8-byte big-endian length
//! - An envelope of exactly that many bytes
//!
//! The envelope carries a success/error/end discriminant, an optional error
//! code and message, and opaque data bytes. Its inner encoding is either JSON
//! or bincode; readers detect which per frame.

pub mod codec;
pub mod encoding;
pub mod envelope;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_envelope, decode_frame, encode_envelope, encode_frame, FrameConfig,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use encoding::Encoding;
pub use envelope::{Envelope, EnvelopeKind};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
