//! The packet layer: one Engine.IO packet inside exactly one frame.
//!
//! Wire shape: the first byte of the frame is the packet type as an ASCII
//! digit (`'0' + type`), the remaining bytes are the packet's own payload,
//! opaque to this layer.
//!
//! ```text
//! "4hello"          → Message, b"hello"   (text frame)
//! [b'4', 1, 2, 3]   → Message, [1, 2, 3]  (binary frame)
//! ```

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Frame, FrameType, TransportError};

/// Engine.IO packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Session opened (carries the handshake data).
    Open = 0,
    /// Session closing.
    Close = 1,
    /// Heartbeat probe.
    Ping = 2,
    /// Heartbeat answer.
    Pong = 3,
    /// Application data.
    Message = 4,
    /// Transport upgrade completed.
    Upgrade = 5,
    /// Nothing to say; answers a poll that timed out.
    Noop = 6,
}

impl PacketType {
    /// The ASCII digit written on the wire.
    pub fn as_byte(self) -> u8 {
        b'0' + self as u8
    }

    /// Parses the ASCII digit written on the wire.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'0' => Some(Self::Open),
            b'1' => Some(Self::Close),
            b'2' => Some(Self::Ping),
            b'3' => Some(Self::Pong),
            b'4' => Some(Self::Message),
            b'5' => Some(Self::Upgrade),
            b'6' => Some(Self::Noop),
            _ => None,
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Message => "message",
            Self::Upgrade => "upgrade",
            Self::Noop => "noop",
        };
        f.write_str(name)
    }
}

/// A decoded Engine.IO packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Kind of the frame this packet travels in.
    pub frame_type: FrameType,
    /// Engine.IO packet type.
    pub packet_type: PacketType,
    /// Payload after the type byte.
    pub data: Bytes,
}

impl Packet {
    /// Creates a packet.
    pub fn new(
        frame_type: FrameType,
        packet_type: PacketType,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            frame_type,
            packet_type,
            data: data.into(),
        }
    }

    /// Wraps the packet into one frame.
    pub fn encode(&self) -> Frame {
        let mut buf = BytesMut::with_capacity(self.data.len() + 1);
        buf.put_u8(self.packet_type.as_byte());
        buf.put_slice(&self.data);
        Frame {
            frame_type: self.frame_type,
            data: buf.freeze(),
        }
    }

    /// Unwraps the packet carried by a frame.
    ///
    /// # Errors
    /// Returns [`TransportError::MalformedPacket`] if the frame is empty
    /// or its first byte isn't a known packet type.
    pub fn decode(frame: Frame) -> Result<Self, TransportError> {
        let Some(&first) = frame.data.first() else {
            return Err(TransportError::MalformedPacket("empty frame".into()));
        };
        let packet_type = PacketType::from_byte(first).ok_or_else(|| {
            TransportError::MalformedPacket(format!(
                "unknown packet type byte 0x{first:02x}"
            ))
        })?;
        Ok(Self {
            frame_type: frame.frame_type,
            packet_type,
            data: frame.data.slice(1..),
        })
    }
}
