//! Where encoded events go and where decoded ones come from.
//!
//! The codec only needs an ordered stream of text/binary frames. Any
//! [`Conn`] provides one through [`ConnFrames`]; [`FrameQueue`] keeps
//! frames in memory.

use std::collections::VecDeque;

use volley_transport::{Conn, Frame, PacketType};

use crate::ParserError;

/// A sink of frames.
pub trait FrameWrite {
    /// Writes one frame; frames arrive in call order.
    async fn write_frame(&mut self, frame: Frame) -> Result<(), ParserError>;
}

/// A source of frames. `Ok(None)` means the stream has ended.
pub trait FrameRead {
    /// Reads the next frame.
    async fn read_frame(&mut self) -> Result<Option<Frame>, ParserError>;
}

impl<T: FrameWrite + ?Sized> FrameWrite for &mut T {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), ParserError> {
        (**self).write_frame(frame).await
    }
}

impl<T: FrameRead + ?Sized> FrameRead for &mut T {
    async fn read_frame(&mut self) -> Result<Option<Frame>, ParserError> {
        (**self).read_frame().await
    }
}

// ---------------------------------------------------------------------------
// ConnFrames
// ---------------------------------------------------------------------------

/// Frames carried as `Message` packets on a [`Conn`].
///
/// Reading skips packets of other types (ping, pong, noop and so on)
/// and reports a closed connection as the end of the stream.
#[derive(Debug)]
pub struct ConnFrames<'a, C> {
    conn: &'a C,
}

impl<'a, C: Conn> ConnFrames<'a, C> {
    /// Wraps a connection.
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }
}

impl<C: Conn> FrameWrite for ConnFrames<'_, C> {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), ParserError> {
        let mut w = self
            .conn
            .next_writer(frame.frame_type, PacketType::Message)
            .await?;
        w.write_bytes(&frame.data);
        w.close().await?;
        Ok(())
    }
}

impl<C: Conn> FrameRead for ConnFrames<'_, C> {
    async fn read_frame(&mut self) -> Result<Option<Frame>, ParserError> {
        loop {
            let r = match self.conn.next_reader().await {
                Ok(r) => r,
                Err(e) if e.is_closed() => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            if r.packet_type() != PacketType::Message {
                tracing::trace!(packet_type = %r.packet_type(), "skipping non-message packet");
                continue;
            }
            let frame_type = r.frame_type();
            return Ok(Some(Frame {
                frame_type,
                data: r.into_data(),
            }));
        }
    }
}

// ---------------------------------------------------------------------------
// FrameQueue
// ---------------------------------------------------------------------------

/// An in-memory frame stream: writes push to the back, reads pop from
/// the front.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameQueue {
    frames: VecDeque<Frame>,
}

impl FrameQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a frame.
    pub fn push(&mut self, frame: Frame) {
        self.frames.push_back(frame);
    }

    /// Number of queued frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns `true` if no frames are queued.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The queued frames, oldest first.
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }
}

impl From<Vec<Frame>> for FrameQueue {
    fn from(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

impl FrameWrite for FrameQueue {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), ParserError> {
        self.frames.push_back(frame);
        Ok(())
    }
}

impl FrameRead for FrameQueue {
    async fn read_frame(&mut self) -> Result<Option<Frame>, ParserError> {
        Ok(self.frames.pop_front())
    }
}
