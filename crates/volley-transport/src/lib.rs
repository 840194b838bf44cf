//! Transport layer for Volley.
//!
//! Provides the [`Transport`] and [`Conn`] traits that present different
//! substrates (HTTP long-polling, WebSocket) as one duplex, framed
//! connection, plus the frame and packet layers they carry.
//!
//! ```text
//! Conn::next_writer ─► Packet ─► Frame ─► substrate ─► Frame ─► Packet ─► Conn::next_reader
//! ```
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`
//! - `polling` (default): HTTP long-polling via `hyper` (server) and
//!   `reqwest` (client)

#![allow(async_fn_in_trait)]

mod conn;
mod error;
mod frame;
mod packet;
#[cfg(feature = "polling")]
pub mod polling;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use conn::{Addr, FrameReader, FrameWriter};
pub use error::{DialError, TransportError};
pub use frame::{Frame, FrameType};
pub use packet::{Packet, PacketType};
#[cfg(feature = "polling")]
pub use polling::{PollingConfig, PollingServer, PollingTransport};
#[cfg(feature = "websocket")]
pub use websocket::{
    WebSocketConfig, WebSocketConn, WebSocketListener, WebSocketTransport,
};

use std::time::{SystemTime, UNIX_EPOCH};

use http::HeaderMap;
use url::Url;

/// Query parameter naming the transport.
pub const TRANSPORT_QUERY: &str = "transport";
/// Query parameter carrying the client timestamp.
pub const TIMESTAMP_QUERY: &str = "t";
/// Query parameter asking for base64-encoded binary frames.
pub const B64_QUERY: &str = "b64";

/// A way of establishing [`Conn`]s over one kind of substrate.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Conn: Conn;
    /// What the server side needs to accept a connection.
    type Incoming;

    /// Name of the transport, as sent in the `transport` query parameter.
    fn name(&self) -> &'static str;

    /// Opens a client connection to `url`, sending `headers` with the
    /// handshake.
    async fn dial(
        &self,
        url: Url,
        headers: HeaderMap,
    ) -> Result<Self::Conn, TransportError>;

    /// Turns an inbound request into a server connection.
    async fn accept(
        &self,
        incoming: Self::Incoming,
    ) -> Result<Self::Conn, TransportError>;
}

/// One logical session carrying an ordered stream of packets.
///
/// At most one reader and one writer are outstanding at a time: a
/// second `next_reader`/`next_writer` call waits until the first
/// [`FrameReader`]/[`FrameWriter`] is closed or dropped.
pub trait Conn: Send + Sync + 'static {
    /// Waits for the next packet from the peer.
    async fn next_reader(&self) -> Result<FrameReader, TransportError>;

    /// Opens a writer for one packet; commit it with
    /// [`FrameWriter::close`].
    async fn next_writer(
        &self,
        frame_type: FrameType,
        packet_type: PacketType,
    ) -> Result<FrameWriter, TransportError>;

    /// Closes the connection, unblocking any pending read or write.
    ///
    /// Calling it again is a no-op.
    async fn close(&self) -> Result<(), TransportError>;

    /// Our address as seen by the peer (may be empty).
    fn local_addr(&self) -> Addr;

    /// The peer's address.
    fn remote_addr(&self) -> Addr;

    /// Headers the peer sent (request headers on the server, response
    /// headers on the client).
    fn remote_header(&self) -> HeaderMap;
}

/// Client timestamp for the `t` query parameter: Unix time in
/// nanoseconds, base 36.
pub fn timestamp() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    to_base36(nanos)
}

fn to_base36(mut n: u128) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Sets `key=value` on the URL query, replacing an existing value.
pub(crate) fn set_query(url: &mut Url, key: &str, value: &str) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != key)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut pairs = url.query_pairs_mut();
    pairs.clear();
    for (k, v) in &kept {
        pairs.append_pair(k, v);
    }
    pairs.append_pair(key, value);
}

/// `host:port` of a URL, with the scheme's default port filled in.
pub(crate) fn host_port(url: &Url) -> Result<Addr, TransportError> {
    let host = url
        .host_str()
        .ok_or_else(|| TransportError::InvalidUrl(format!("{url} has no host")))?;
    Ok(match url.port_or_known_default() {
        Some(port) => Addr::new(format!("{host}:{port}")),
        None => Addr::new(host),
    })
}
