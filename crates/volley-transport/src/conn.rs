//! Plumbing shared by every [`Conn`](crate::Conn) implementation.
//!
//! Each transport runs its substrate behind two channels:
//!
//! ```text
//! substrate ──► inbound  mpsc<Frame>     ──► next_reader()
//! next_writer() ──► outbound mpsc<Outgoing> ──► substrate
//! ```
//!
//! The receiving half of `inbound` and the sending half of `outbound` sit
//! behind async mutexes. A [`FrameReader`] / [`FrameWriter`] owns the
//! mutex guard for as long as it lives, so a second `next_reader` or
//! `next_writer` waits for the first one to be closed (or dropped) and
//! two writers can never interleave bytes.
//!
//! A [`Shutdown`] signal wakes every waiter when the connection closes.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot, watch, Mutex, OwnedMutexGuard};

use crate::{Frame, FrameType, Packet, PacketType, TransportError};

// ---------------------------------------------------------------------------
// Addr
// ---------------------------------------------------------------------------

/// A network address as seen by one side of a connection.
///
/// Polling connections only know addresses as `host:port` strings (taken
/// from the URL or the `Host` header), so this is a string, possibly
/// empty (a polling client has no bound local address).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Addr(String);

impl Addr {
    /// Wraps a `host:port` string.
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// The address of an endpoint that has none.
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Name of the network, always `"tcp"`.
    pub fn network(&self) -> &'static str {
        "tcp"
    }

    /// The address text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for an empty address.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<SocketAddr> for Addr {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Closed {
    reason: String,
    by_peer: bool,
}

/// One-shot close signal. The first reason recorded wins.
#[derive(Debug)]
pub(crate) struct Shutdown {
    state: watch::Sender<Option<Closed>>,
}

impl Shutdown {
    pub(crate) fn new() -> Self {
        Self {
            state: watch::Sender::new(None),
        }
    }

    /// Closes from our side. Returns `false` if already closed.
    pub(crate) fn close_local(&self, reason: impl Into<String>) -> bool {
        self.close(reason.into(), false)
    }

    /// Records that the peer or the substrate ended the connection.
    pub(crate) fn close_remote(&self, reason: impl Into<String>) -> bool {
        self.close(reason.into(), true)
    }

    fn close(&self, reason: String, by_peer: bool) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(Closed { reason, by_peer });
            true
        })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.borrow().is_some()
    }

    fn closed_locally(&self) -> bool {
        self.state.borrow().as_ref().is_some_and(|c| !c.by_peer)
    }

    /// The error every operation returns once closed.
    pub(crate) fn error(&self) -> Option<TransportError> {
        self.state
            .borrow()
            .as_ref()
            .map(|c| TransportError::ConnectionClosed(c.reason.clone()))
    }

    /// Resolves once the connection is closed, with the close error.
    pub(crate) async fn closed(&self) -> TransportError {
        let mut rx = self.state.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(state) => TransportError::ConnectionClosed(
                state.as_ref().map(|c| c.reason.clone()).unwrap_or_default(),
            ),
            // The sender lives in `self`, so this can't happen.
            Err(_) => TransportError::ConnectionClosed("shutdown dropped".into()),
        }
    }

    fn check(&self) -> Result<(), TransportError> {
        match self.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Outgoing
// ---------------------------------------------------------------------------

/// A committed frame on its way to the substrate. The substrate side
/// answers on `ack` once the frame is handed over (or failed).
#[derive(Debug)]
pub(crate) struct Outgoing {
    pub(crate) frame: Frame,
    pub(crate) ack: oneshot::Sender<Result<(), TransportError>>,
}

impl Outgoing {
    pub(crate) fn complete(self, result: Result<(), TransportError>) {
        // The writer may have given up waiting; nobody to tell then.
        let _ = self.ack.send(result);
    }
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// The reader/writer sides of a connection plus its shutdown signal.
#[derive(Debug, Clone)]
pub(crate) struct Endpoints {
    reader: Arc<Mutex<mpsc::Receiver<Frame>>>,
    writer: Arc<Mutex<mpsc::Sender<Outgoing>>>,
    pub(crate) shutdown: Arc<Shutdown>,
}

/// The substrate-facing halves returned by [`Endpoints::new`].
pub(crate) struct Substrate {
    /// Push frames received from the peer here.
    pub(crate) inbound: mpsc::Sender<Frame>,
    /// Pull committed frames to send from here.
    pub(crate) outbound: mpsc::Receiver<Outgoing>,
}

impl Endpoints {
    pub(crate) fn new(capacity: usize) -> (Self, Substrate) {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
        let endpoints = Self {
            reader: Arc::new(Mutex::new(inbound_rx)),
            writer: Arc::new(Mutex::new(outbound_tx)),
            shutdown: Arc::new(Shutdown::new()),
        };
        let substrate = Substrate {
            inbound: inbound_tx,
            outbound: outbound_rx,
        };
        (endpoints, substrate)
    }

    /// Waits for the next frame from the peer.
    ///
    /// After a local close this fails immediately. After the peer went
    /// away, frames that already arrived are still handed out first.
    pub(crate) async fn next_reader(&self) -> Result<FrameReader, TransportError> {
        if self.shutdown.closed_locally() {
            self.shutdown.check()?;
        }

        let mut rx = tokio::select! {
            biased;
            guard = Arc::clone(&self.reader).lock_owned() => guard,
            err = self.shutdown.closed() => return Err(err),
        };

        let frame = tokio::select! {
            biased;
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => {
                    return Err(self.shutdown.error().unwrap_or_else(|| {
                        TransportError::ConnectionClosed("inbound stream ended".into())
                    }));
                }
            },
            err = self.shutdown.closed() => {
                if self.shutdown.closed_locally() {
                    return Err(err);
                }
                match rx.try_recv() {
                    Ok(frame) => frame,
                    Err(_) => return Err(err),
                }
            }
        };

        let packet = Packet::decode(frame)?;
        Ok(FrameReader {
            packet,
            pos: 0,
            _slot: rx,
        })
    }

    /// Waits until no other writer is outstanding, then opens one.
    pub(crate) async fn next_writer(
        &self,
        frame_type: FrameType,
        packet_type: PacketType,
    ) -> Result<FrameWriter, TransportError> {
        self.shutdown.check()?;
        let slot = tokio::select! {
            biased;
            err = self.shutdown.closed() => return Err(err),
            guard = Arc::clone(&self.writer).lock_owned() => guard,
        };
        Ok(FrameWriter {
            frame_type,
            packet_type,
            buf: BytesMut::new(),
            slot,
            shutdown: Arc::clone(&self.shutdown),
        })
    }
}

// ---------------------------------------------------------------------------
// FrameReader
// ---------------------------------------------------------------------------

/// One inbound packet, handed out by `Conn::next_reader`.
///
/// Holds the connection's read slot: the next `next_reader` call waits
/// until this reader is closed or dropped.
#[derive(Debug)]
pub struct FrameReader {
    packet: Packet,
    pos: usize,
    _slot: OwnedMutexGuard<mpsc::Receiver<Frame>>,
}

impl FrameReader {
    /// Kind of the frame the packet arrived in.
    pub fn frame_type(&self) -> FrameType {
        self.packet.frame_type
    }

    /// Engine.IO packet type.
    pub fn packet_type(&self) -> PacketType {
        self.packet.packet_type
    }

    /// The packet payload (after the type byte).
    pub fn data(&self) -> &Bytes {
        &self.packet.data
    }

    /// Everything not yet consumed through [`io::Read`].
    pub fn remaining(&self) -> &[u8] {
        &self.packet.data[self.pos..]
    }

    /// Releases the read slot, returning the payload.
    pub fn into_data(self) -> Bytes {
        self.packet.data
    }

    /// Releases the read slot, returning the whole packet.
    pub fn into_packet(self) -> Packet {
        self.packet
    }

    /// Releases the read slot.
    pub fn close(self) {}
}

impl io::Read for FrameReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let rest = &self.packet.data[self.pos..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.pos += n;
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// FrameWriter
// ---------------------------------------------------------------------------

/// One outbound packet being written, handed out by `Conn::next_writer`.
///
/// Bytes are buffered until [`close`](Self::close) commits them as a
/// single frame. Dropping the writer without closing it discards the
/// frame and frees the write slot.
#[derive(Debug)]
pub struct FrameWriter {
    frame_type: FrameType,
    packet_type: PacketType,
    buf: BytesMut,
    slot: OwnedMutexGuard<mpsc::Sender<Outgoing>>,
    shutdown: Arc<Shutdown>,
}

impl FrameWriter {
    /// Kind of the frame being written.
    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    /// Engine.IO packet type being written.
    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// Appends bytes to the packet payload.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Commits the frame and waits until the transport accepted it.
    ///
    /// # Errors
    /// - [`TransportError::InvalidFrame`]: a text frame that isn't UTF-8
    /// - [`TransportError::ConnectionClosed`]: the connection closed
    ///   before the frame was handed over
    /// - whatever the substrate reported while sending
    pub async fn close(self) -> Result<(), TransportError> {
        let Self {
            frame_type,
            packet_type,
            buf,
            slot,
            shutdown,
        } = self;

        if frame_type == FrameType::Text && std::str::from_utf8(&buf).is_err() {
            return Err(TransportError::InvalidFrame(
                "text frame payload is not valid UTF-8".into(),
            ));
        }

        let frame = Packet::new(frame_type, packet_type, buf.freeze()).encode();
        let (ack, done) = oneshot::channel();

        tokio::select! {
            biased;
            err = shutdown.closed() => return Err(err),
            sent = slot.send(Outgoing { frame, ack }) => {
                if sent.is_err() {
                    return Err(shutdown.error().unwrap_or_else(|| {
                        TransportError::ConnectionClosed("writer task ended".into())
                    }));
                }
            }
        }
        // The frame is queued in order; the next writer may start while
        // this one waits for its ack.
        drop(slot);

        tokio::select! {
            result = done => result.unwrap_or_else(|_| {
                Err(shutdown.error().unwrap_or_else(|| {
                    TransportError::ConnectionClosed("frame dropped".into())
                }))
            }),
            err = shutdown.closed() => Err(err),
        }
    }
}

impl io::Write for FrameWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
