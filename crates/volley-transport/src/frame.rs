//! The frame layer: the atomic unit handed to a substrate.
//!
//! A frame is a byte payload tagged as text or binary. It has no framing
//! of its own; each transport decides how frames map onto its wire
//! (one WebSocket message per frame, or length-prefixed segments inside
//! a polling body).

use std::fmt;

use bytes::Bytes;

/// Whether a frame carries text or raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// UTF-8 text.
    Text,
    /// Arbitrary bytes.
    Binary,
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Binary => f.write_str("binary"),
        }
    }
}

/// One text or binary payload exchanged with a substrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Text or binary.
    pub frame_type: FrameType,
    /// The frame payload. For frames built by the packet layer this starts
    /// with the packet type byte.
    pub data: Bytes,
}

impl Frame {
    /// Creates a text frame.
    pub fn text(data: impl Into<Bytes>) -> Self {
        Self {
            frame_type: FrameType::Text,
            data: data.into(),
        }
    }

    /// Creates a binary frame.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self {
            frame_type: FrameType::Binary,
            data: data.into(),
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_kind() {
        assert_eq!(Frame::text("4hi").frame_type, FrameType::Text);
        assert_eq!(Frame::binary(vec![4u8, 1]).frame_type, FrameType::Binary);
    }

    #[test]
    fn test_frame_type_display() {
        assert_eq!(FrameType::Text.to_string(), "text");
        assert_eq!(FrameType::Binary.to_string(), "binary");
    }
}
