//! Polling payload codec: several frames in one HTTP body.
//!
//! Each frame becomes one segment:
//!
//! ```text
//! <marker><decimal length>:<bytes>
//!
//! marker  0  text frame, bytes are the frame payload (UTF-8)
//!         1  binary frame, bytes are the raw frame payload
//!         b  binary frame, bytes are the frame payload in base64
//! ```
//!
//! The length counts the bytes actually transmitted for the segment.
//! In `b64` mode every binary frame uses the `b` marker so the whole body
//! is text; the decoder accepts all three markers in either mode.

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::{BufMut, Bytes, BytesMut};

use crate::{Frame, FrameType, TransportError};

const TEXT_MARKER: u8 = b'0';
const BINARY_MARKER: u8 = b'1';
const BASE64_MARKER: u8 = b'b';

/// Longest length prefix accepted (in digits).
const MAX_LENGTH_DIGITS: usize = 10;

/// Content type of a body in raw binary mode.
pub const BINARY_CONTENT_TYPE: &str = "application/octet-stream";
/// Content type of a body in `b64` mode.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=UTF-8";

/// The content type matching an encoding mode.
pub fn content_type(b64: bool) -> &'static str {
    if b64 {
        TEXT_CONTENT_TYPE
    } else {
        BINARY_CONTENT_TYPE
    }
}

/// Concatenates frames into one body.
pub fn encode(frames: &[Frame], b64: bool) -> Bytes {
    let mut out = BytesMut::new();
    for frame in frames {
        match (frame.frame_type, b64) {
            (FrameType::Text, _) => put_segment(&mut out, TEXT_MARKER, &frame.data),
            (FrameType::Binary, false) => {
                put_segment(&mut out, BINARY_MARKER, &frame.data)
            }
            (FrameType::Binary, true) => {
                let encoded = STANDARD.encode(&frame.data);
                put_segment(&mut out, BASE64_MARKER, encoded.as_bytes());
            }
        }
    }
    out.freeze()
}

fn put_segment(out: &mut BytesMut, marker: u8, data: &[u8]) {
    out.put_u8(marker);
    out.put_slice(data.len().to_string().as_bytes());
    out.put_u8(b':');
    out.put_slice(data);
}

/// Splits a body back into frames.
///
/// # Errors
/// Returns [`TransportError::MalformedPayload`] on an unknown marker, a
/// missing or non-numeric length, a segment running past the end of the
/// body, invalid base64, or a text segment that isn't UTF-8.
pub fn decode(body: &[u8]) -> Result<Vec<Frame>, TransportError> {
    let mut frames = Vec::new();
    let mut rest = body;

    while let Some((&marker, tail)) = rest.split_first() {
        let colon = tail
            .iter()
            .take(MAX_LENGTH_DIGITS + 1)
            .position(|&b| b == b':')
            .ok_or_else(|| malformed("missing length terminator"))?;
        let digits = &tail[..colon];
        let len = parse_length(digits)?;
        let data_start = colon + 1;
        let data = tail
            .get(data_start..data_start + len)
            .ok_or_else(|| malformed("segment shorter than its length"))?;

        let frame = match marker {
            TEXT_MARKER => {
                if std::str::from_utf8(data).is_err() {
                    return Err(malformed("text segment is not UTF-8"));
                }
                Frame::text(Bytes::copy_from_slice(data))
            }
            BINARY_MARKER => Frame::binary(Bytes::copy_from_slice(data)),
            BASE64_MARKER => {
                let decoded = STANDARD
                    .decode(data)
                    .map_err(|e| malformed(&format!("bad base64: {e}")))?;
                Frame::binary(decoded)
            }
            other => {
                return Err(malformed(&format!(
                    "unknown segment marker 0x{other:02x}"
                )));
            }
        };
        frames.push(frame);
        rest = &tail[data_start + len..];
    }

    Ok(frames)
}

fn parse_length(digits: &[u8]) -> Result<usize, TransportError> {
    if digits.is_empty() {
        return Err(malformed("empty length"));
    }
    digits.iter().try_fold(0usize, |acc, &d| {
        if !d.is_ascii_digit() {
            return Err(malformed("non-digit in length"));
        }
        acc.checked_mul(10)
            .and_then(|acc| acc.checked_add(usize::from(d - b'0')))
            .ok_or_else(|| malformed("length overflow"))
    })
}

fn malformed(what: &str) -> TransportError {
    TransportError::MalformedPayload(what.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Frame> {
        vec![
            Frame::text("0"),
            Frame::text("4hello"),
            Frame::binary(vec![b'4', 1, 2, 3, 4]),
        ]
    }

    #[test]
    fn test_encode_binary_mode_layout() {
        let body = encode(&sample(), false);
        let mut expected = b"01:006:4hello15:4".to_vec();
        expected.extend_from_slice(&[1, 2, 3, 4]);
        assert_eq!(&body[..], &expected[..]);
    }

    #[test]
    fn test_encode_b64_mode_is_text() {
        let body = encode(&sample(), true);
        let text = std::str::from_utf8(&body).expect("b64 body must be text");
        // base64 of [0x34, 1, 2, 3, 4] is "NAECAwQ="
        assert_eq!(text, "01:006:4hellob8:NAECAwQ=");
    }

    #[test]
    fn test_decode_inverts_both_modes() {
        for b64 in [false, true] {
            let frames = decode(&encode(&sample(), b64)).unwrap();
            assert_eq!(frames, sample(), "b64 = {b64}");
        }
    }

    #[test]
    fn test_decode_empty_body_is_no_frames() {
        assert!(decode(b"").unwrap().is_empty());
    }

    #[test]
    fn test_decode_length_counts_bytes_not_chars() {
        let body = "07:4héllo".as_bytes();
        let frames = decode(body).unwrap();
        assert_eq!(&frames[0].data[..], "4héllo".as_bytes());
    }

    #[test]
    fn test_decode_rejects_unknown_marker() {
        let err = decode(b"x3:abc").unwrap_err();
        assert!(matches!(err, TransportError::MalformedPayload(_)));
    }

    #[test]
    fn test_decode_rejects_truncated_segment() {
        assert!(decode(b"05:4hi").is_err());
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        assert!(decode(b"0:4").is_err(), "empty length");
        assert!(decode(b"0a:4").is_err(), "non-digit length");
        assert!(decode(b"012345678901:4").is_err(), "no terminator in range");
        assert!(decode(b"06").is_err(), "missing terminator");
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        assert!(decode(b"b4:!!!!").is_err());
    }

    #[test]
    fn test_decode_rejects_non_utf8_text() {
        assert!(decode(&[b'0', b'2', b':', b'4', 0xff]).is_err());
    }

    #[test]
    fn test_content_type_follows_mode() {
        assert_eq!(content_type(false), BINARY_CONTENT_TYPE);
        assert_eq!(content_type(true), TEXT_CONTENT_TYPE);
    }
}
