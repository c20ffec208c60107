/// Protocol definitions for a room-based chat directory
///
/// Every exchange is a single text line of fields joined by the ASCII unit
/// separator (0x1F):
///
/// ```ignore
/// <opcode> <status> <error> <username> <timestamp> [<kind field>...]
/// ```
///
/// Where `opcode`, `status` and `error` are decimal numbers, `timestamp` is
/// RFC 3339 UTC and list-valued kind fields are joined with commas. A
/// connection carries exactly one request line and one response line.
use thiserror::Error;

mod codec;
mod model;
mod transport;

pub use codec::{decode, encode, encode_rejection, DecodeError, PacketCodec};
pub use model::{
    is_valid_name, is_valid_text, ErrorCode, Kind, Opcode, Packet, Status, FIELD_SEPARATOR,
    LIST_SEPARATOR,
};
pub use transport::{Listener, Reply, Responder, Transport, TransportError, DEFAULT_TIMEOUT};

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("lines parse error: {0}")]
    LinesParseError(#[from] tokio_util::codec::LinesCodecError),

    #[error("malformed packet: {0}")]
    Decode(#[from] DecodeError),

    #[error("field `{0}` cannot be put on the wire")]
    InvalidField(&'static str),

    #[error("timestamp cannot be formatted: {0}")]
    Timestamp(#[from] time::error::Format),
}

impl Error {
    /// Opcode of the offending record, when it got far enough to be recognized
    pub fn opcode(&self) -> Option<Opcode> {
        match self {
            Error::Decode(err) => err.opcode(),
            _ => None,
        }
    }
}
