//! Event decoding.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use volley_transport::FrameType;

use crate::buffer::{self, Attachments};
use crate::{FrameRead, Header, PacketType, ParserError};

/// One event read off the wire, arguments still in JSON form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// The envelope. Binary types are kept as sent.
    pub header: Header,
    /// The JSON body; empty when the event had no arguments.
    pub body: Bytes,
    /// Binary attachments in order.
    pub attachments: Vec<Bytes>,
}

impl Decoded {
    /// Deserializes the body and splices the attachments back into its
    /// placeholders. Returns `None` when the event had no arguments.
    pub fn args<T>(&self) -> Result<Option<T>, ParserError>
    where
        T: DeserializeOwned + Attachments,
    {
        if self.body.is_empty() {
            return Ok(None);
        }
        let mut args: T = serde_json::from_slice(&self.body).map_err(ParserError::Decode)?;
        buffer::restore(&mut args, &self.attachments)?;
        Ok(Some(args))
    }
}

/// Reads events from a [`FrameRead`].
///
/// Decoding is split in two steps so a caller can route on the header
/// before picking the argument type:
///
/// ```text
/// let header = decoder.decode_header().await?;
/// let args: Option<Chat> = decoder.decode_args()?;
/// ```
#[derive(Debug)]
pub struct Decoder<R> {
    r: R,
    pending: Option<Decoded>,
}

impl<R: FrameRead> Decoder<R> {
    /// Creates a decoder reading from `r`.
    pub fn new(r: R) -> Self {
        Self { r, pending: None }
    }

    /// Borrows the underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.r
    }

    /// Returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.r
    }

    /// Reads one complete event: its text frame and every attachment it
    /// announces.
    pub async fn decode_packet(&mut self) -> Result<Decoded, ParserError> {
        let first = self.r.read_frame().await?.ok_or(ParserError::EndOfStream)?;
        if first.frame_type != FrameType::Text {
            return Err(ParserError::UnexpectedFrame(first.frame_type));
        }
        let (header, count, body) = parse_header(first.data)?;

        let mut attachments = Vec::with_capacity(count.min(16));
        while attachments.len() < count {
            match self.r.read_frame().await? {
                Some(frame) if frame.frame_type == FrameType::Binary => {
                    attachments.push(frame.data);
                }
                Some(frame) => return Err(ParserError::UnexpectedFrame(frame.frame_type)),
                None => {
                    tracing::debug!(
                        expected = count,
                        received = attachments.len(),
                        "frame stream ended mid-event"
                    );
                    return Err(ParserError::MissingAttachments {
                        expected: count,
                        received: attachments.len(),
                    });
                }
            }
        }

        Ok(Decoded {
            header,
            body,
            attachments,
        })
    }

    /// Reads the next event and returns its header. The arguments are
    /// kept for [`decode_args`](Self::decode_args).
    pub async fn decode_header(&mut self) -> Result<Header, ParserError> {
        let decoded = self.decode_packet().await?;
        let header = decoded.header.clone();
        self.pending = Some(decoded);
        Ok(header)
    }

    /// Deserializes the arguments of the event read by
    /// [`decode_header`](Self::decode_header).
    pub fn decode_args<T>(&mut self) -> Result<Option<T>, ParserError>
    where
        T: DeserializeOwned + Attachments,
    {
        self.pending.take().ok_or(ParserError::NoPacket)?.args()
    }

    /// Reads the next event and its arguments.
    pub async fn decode<T>(&mut self) -> Result<(Header, Option<T>), ParserError>
    where
        T: DeserializeOwned + Attachments,
    {
        let decoded = self.decode_packet().await?;
        let args = decoded.args()?;
        Ok((decoded.header, args))
    }
}

/// Splits a text frame into header, attachment count, and JSON body.
fn parse_header(data: Bytes) -> Result<(Header, usize, Bytes), ParserError> {
    let first = *data
        .first()
        .ok_or_else(|| ParserError::InvalidHeader("empty packet".into()))?;
    let packet_type = PacketType::from_byte(first).ok_or_else(|| {
        ParserError::InvalidHeader(format!("unknown packet type {:?}", first as char))
    })?;
    let mut pos = 1;

    let mut count = 0;
    if packet_type.is_binary() {
        let dash = data[pos..]
            .iter()
            .position(|&b| b == b'-')
            .ok_or_else(|| ParserError::InvalidHeader("attachment count without '-'".into()))?;
        count = parse_number(&data[pos..pos + dash], "attachment count")?;
        pos += dash + 1;
    }

    let mut namespace = String::new();
    if data.get(pos) == Some(&b'/') {
        let end = data[pos..]
            .iter()
            .position(|&b| b == b',')
            .map_or(data.len(), |i| pos + i);
        namespace = std::str::from_utf8(&data[pos..end])
            .map_err(|_| ParserError::InvalidHeader("namespace is not UTF-8".into()))?
            .to_string();
        pos = (end + 1).min(data.len());
    }

    let digits = data[pos..].iter().take_while(|b| b.is_ascii_digit()).count();
    let mut header = Header {
        packet_type,
        namespace,
        id: 0,
        need_ack: false,
    };
    if digits > 0 {
        header.id = parse_number(&data[pos..pos + digits], "ack id")?;
        header.need_ack = true;
        pos += digits;
    }

    Ok((header, count, data.slice(pos..)))
}

fn parse_number<T: std::str::FromStr>(digits: &[u8], what: &str) -> Result<T, ParserError> {
    std::str::from_utf8(digits)
        .ok()
        .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ParserError::InvalidHeader(format!("bad {what}")))
}
