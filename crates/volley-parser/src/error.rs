//! Error types for the event codec.
//!
//! Wire problems (a bad header, too few attachments, a frame of the wrong
//! kind) are fatal to the packet being decoded; the connection itself is
//! left to the caller.

use volley_transport::{FrameType, TransportError};

/// Errors that can occur while encoding or decoding an event.
#[derive(Debug, thiserror::Error)]
pub enum ParserError {
    /// The arguments could not be serialized to JSON.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// The JSON body didn't match the requested argument type.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// The text frame doesn't start with a valid event header: unknown
    /// type digit, attachment count without its `-`, or a bad id.
    #[error("invalid packet header: {0}")]
    InvalidHeader(String),

    /// The serialized arguments start with a digit, which the peer would
    /// read as an ack id. Wrap them in an array or object.
    #[error("arguments must not serialize to a leading digit")]
    BareNumber,

    /// The frame stream ended before every announced attachment arrived.
    #[error("expected {expected} attachments, got {received}")]
    MissingAttachments {
        /// Count announced by the header.
        expected: usize,
        /// Binary frames read before the stream ended.
        received: usize,
    },

    /// A frame of the wrong kind showed up (binary where the header text
    /// frame belongs, or text where an attachment belongs).
    #[error("unexpected {0} frame")]
    UnexpectedFrame(FrameType),

    /// A placeholder refers to an attachment index that was never sent.
    #[error("placeholder refers to attachment {num}, but only {available} arrived")]
    UnknownAttachment {
        /// Index carried by the placeholder.
        num: u64,
        /// Attachments received with the packet.
        available: usize,
    },

    /// [`decode_args`](crate::Decoder::decode_args) was called with no
    /// header decoded first.
    #[error("no packet header decoded")]
    NoPacket,

    /// The frame source has nothing more to read.
    #[error("end of frame stream")]
    EndOfStream,

    /// The underlying connection failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
