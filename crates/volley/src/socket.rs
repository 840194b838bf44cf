//! `Socket`: the event codec bound to one connection.
//!
//! An event spans several frames (a text frame plus one binary frame per
//! attachment), so the socket serializes whole events: two tasks emitting
//! at once never interleave their frames, and two readers never split one
//! event between them.

use serde::Serialize;
use tokio::sync::Mutex;
use volley_parser::{Attachments, ConnFrames, Decoded, Decoder, Encoder, Header, PacketType};
use volley_transport::{Addr, Conn};

use crate::VolleyError;

/// Sends and receives events over a [`Conn`].
#[derive(Debug)]
pub struct Socket<C> {
    conn: C,
    namespace: String,
    write: Mutex<()>,
    read: Mutex<()>,
}

impl<C: Conn> Socket<C> {
    /// Wraps a connection. Events go to the default namespace.
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            namespace: String::new(),
            write: Mutex::new(()),
            read: Mutex::new(()),
        }
    }

    /// Sends events built by [`emit_event`](Self::emit_event) to
    /// `namespace` instead. A missing leading `/` is added.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Header::default().with_namespace(namespace).namespace;
        self
    }

    /// The namespace used by [`emit_event`](Self::emit_event).
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The underlying connection.
    pub fn conn(&self) -> &C {
        &self.conn
    }

    /// Sends one event. Buffers inside `args` are numbered in place.
    pub async fn emit<T>(&self, header: &Header, args: &mut T) -> Result<(), VolleyError>
    where
        T: Serialize + Attachments + ?Sized,
    {
        let _turn = self.write.lock().await;
        Encoder::new(ConnFrames::new(&self.conn))
            .encode(header, Some(args))
            .await?;
        Ok(())
    }

    /// Sends an event that carries no arguments (connect, disconnect).
    pub async fn emit_header(&self, header: &Header) -> Result<(), VolleyError> {
        let _turn = self.write.lock().await;
        Encoder::new(ConnFrames::new(&self.conn))
            .encode_header(header)
            .await?;
        Ok(())
    }

    /// Sends `[event, args]` as an `Event` on this socket's namespace.
    pub async fn emit_event<T>(&self, event: &str, args: &mut T) -> Result<(), VolleyError>
    where
        T: Serialize + Attachments + ?Sized,
    {
        let header = Header::new(PacketType::Event).with_namespace(self.namespace.clone());
        let mut body = (event, args);
        self.emit(&header, &mut body).await
    }

    /// Waits for the next complete event.
    pub async fn recv(&self) -> Result<Decoded, VolleyError> {
        let _turn = self.read.lock().await;
        let decoded = Decoder::new(ConnFrames::new(&self.conn))
            .decode_packet()
            .await?;
        tracing::debug!(
            packet_type = %decoded.header.packet_type,
            namespace = %decoded.header.namespace,
            attachments = decoded.attachments.len(),
            "event received"
        );
        Ok(decoded)
    }

    /// Closes the connection. Pending `recv` calls return an error.
    pub async fn close(&self) -> Result<(), VolleyError> {
        self.conn.close().await?;
        Ok(())
    }

    /// Our address as seen by the peer.
    pub fn local_addr(&self) -> Addr {
        self.conn.local_addr()
    }

    /// The peer's address.
    pub fn remote_addr(&self) -> Addr {
        self.conn.remote_addr()
    }
}
