//! Event encoding.
//!
//! Encoding runs in two phases: the arguments are walked first so the
//! buffer count is known, then the header is written.

use bytes::Bytes;
use serde::Serialize;
use volley_transport::Frame;

use crate::buffer::{self, Attachments};
use crate::{FrameWrite, Header, ParserError};

/// Writes events to a [`FrameWrite`].
#[derive(Debug)]
pub struct Encoder<W> {
    w: W,
}

impl<W: FrameWrite> Encoder<W> {
    /// Creates an encoder writing to `w`.
    pub fn new(w: W) -> Self {
        Self { w }
    }

    /// Borrows the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.w
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.w
    }

    /// Encodes one event.
    ///
    /// Every [`Buffer`](crate::Buffer) in `args` is numbered in place and
    /// sent as its own binary frame after the text frame. `Event` and
    /// `Ack` become `BinaryEvent`/`BinaryAck` when at least one buffer
    /// was found.
    ///
    /// Nothing is written when the header or the arguments can't be
    /// framed: a namespace must be empty or start with `/` and hold no
    /// `,`; arguments must not serialize to a bare number.
    pub async fn encode<T>(&mut self, header: &Header, args: Option<&mut T>) -> Result<(), ParserError>
    where
        T: Serialize + Attachments + ?Sized,
    {
        check_namespace(&header.namespace)?;
        let (buffers, body) = match args {
            Some(args) => {
                let buffers = buffer::attach(&mut *args);
                let body = serde_json::to_vec(&*args).map_err(ParserError::Encode)?;
                if body.first().is_some_and(u8::is_ascii_digit) {
                    return Err(ParserError::BareNumber);
                }
                (buffers, Some(body))
            }
            None => (Vec::new(), None),
        };

        let text = header_text(header, buffers.len(), body.as_deref());
        tracing::trace!(
            namespace = %header.namespace,
            attachments = buffers.len(),
            "encoding event"
        );
        self.w.write_frame(Frame::text(text)).await?;
        for data in buffers {
            self.w.write_frame(Frame::binary(data)).await?;
        }
        Ok(())
    }

    /// Encodes an event without arguments.
    pub async fn encode_header(&mut self, header: &Header) -> Result<(), ParserError> {
        self.encode::<()>(header, None).await
    }
}

fn check_namespace(namespace: &str) -> Result<(), ParserError> {
    if !namespace.is_empty() && !namespace.starts_with('/') {
        return Err(ParserError::InvalidHeader(format!(
            "namespace {namespace:?} must start with '/'"
        )));
    }
    if namespace.contains(',') {
        return Err(ParserError::InvalidHeader(format!(
            "namespace {namespace:?} must not contain ','"
        )));
    }
    Ok(())
}

/// Builds the text frame: type digit, `<count>-`, `<namespace>,`, id, body.
fn header_text(header: &Header, attachments: usize, body: Option<&[u8]>) -> Bytes {
    let packet_type = if attachments > 0 {
        header.packet_type.promoted()
    } else {
        header.packet_type
    };

    let mut out = Vec::with_capacity(header.namespace.len() + body.map_or(0, <[u8]>::len) + 24);
    out.push(packet_type.as_byte());
    if packet_type.is_binary() {
        out.extend_from_slice(attachments.to_string().as_bytes());
        out.push(b'-');
    }
    if !header.namespace.is_empty() {
        out.extend_from_slice(header.namespace.as_bytes());
        if header.need_ack || body.is_some() {
            out.push(b',');
        }
    }
    if header.need_ack {
        out.extend_from_slice(header.id.to_string().as_bytes());
    }
    if let Some(body) = body {
        out.extend_from_slice(body);
    }
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PacketType;

    fn text(header: &Header, attachments: usize, body: Option<&str>) -> String {
        let raw = header_text(header, attachments, body.map(str::as_bytes));
        String::from_utf8(raw.to_vec()).unwrap()
    }

    #[test]
    fn test_plain_event() {
        let h = Header::new(PacketType::Event);
        assert_eq!(text(&h, 0, Some(r#"["chat","hi"]"#)), r#"2["chat","hi"]"#);
    }

    #[test]
    fn test_namespace_comma_only_when_something_follows() {
        let h = Header::new(PacketType::Connect).with_namespace("/admin");
        assert_eq!(text(&h, 0, None), "0/admin");
        assert_eq!(text(&h, 0, Some("{}")), "0/admin,{}");

        let h = Header::new(PacketType::Ack).with_namespace("/admin").with_ack(0);
        assert_eq!(text(&h, 0, None), "3/admin,0");
    }

    #[test]
    fn test_ack_id_before_body() {
        let h = Header::new(PacketType::Event).with_ack(17);
        assert_eq!(text(&h, 0, Some("[1]")), "217[1]");
    }

    #[test]
    fn test_promotion_writes_count() {
        let h = Header::new(PacketType::Event).with_namespace("/f");
        assert_eq!(text(&h, 2, Some("[]")), "52-/f,[]");
        let h = Header::new(PacketType::Ack).with_ack(3);
        assert_eq!(text(&h, 1, Some("[]")), "61-3[]");
    }
}
