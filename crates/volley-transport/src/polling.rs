//! HTTP long-polling transport.
//!
//! Emulates a duplex frame stream over independent HTTP exchanges:
//!
//! ```text
//! ┌──────────┐                                   ┌──────────┐
//! │  Client  │                                   │  Server  │
//! └────┬─────┘                                   └────┬─────┘
//!      │  GET ?transport=polling&t=..                 │
//!      │ ───────────────────────────────────────────► │  (held until the
//!      │                ... waits ...                 │   server writes or
//!      │  200  0|1|b<len>:<frame>...                  │   poll_timeout → noop)
//!      │ ◄─────────────────────────────────────────── │
//!      │                                              │
//!      │  POST ?transport=polling&sid=..              │
//!      │  body: 0|1|b<len>:<frame>...                 │
//!      │ ───────────────────────────────────────────► │  frames queued for
//!      │  200 ok                                      │  next_reader, in order
//!      │ ◄─────────────────────────────────────────── │
//! ```
//!
//! - [`PollingTransport`] dials [`ClientConn`]s and accepts
//!   [`ServerConn`]s.
//! - [`ServerConn::serve`] answers every HTTP exchange of one session.
//! - [`PollingServer`] keeps the session table and routes requests by
//!   their `sid` query parameter.

mod client;
pub mod payload;
mod server;
mod session;

pub use client::ClientConn;
pub use server::ServerConn;
pub use session::{PollingServer, SessionId};

use std::time::Duration;

use http::{header, HeaderMap, Request, Uri};
use url::Url;

use crate::{
    Addr, Conn, FrameReader, FrameType, FrameWriter, PacketType, Transport,
    TransportError, B64_QUERY,
};

/// Name of the polling transport.
pub const NAME: &str = "polling";

/// Query parameter carrying the session id.
pub const SID_QUERY: &str = "sid";

/// Response header carrying the session id.
pub const SID_HEADER: &str = "x-volley-sid";

// ---------------------------------------------------------------------------
// PollingConfig
// ---------------------------------------------------------------------------

/// Configuration for the polling transport.
///
/// Passed explicitly to [`PollingTransport::new`]; `Default` gives the
/// usual Engine.IO values.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// How long the server holds a read request open before answering it
    /// with a `Noop` packet.
    ///
    /// Default: 25 seconds.
    pub poll_timeout: Duration,

    /// Largest request body the server accepts.
    ///
    /// Default: 1 MB.
    pub max_body_size: usize,

    /// How many written frames may wait for the next read request before
    /// writers start to wait.
    ///
    /// Default: 1024.
    pub max_queued_frames: usize,

    /// Capacity of the per-connection frame channels.
    ///
    /// Default: 128.
    pub channel_capacity: usize,

    /// How long a server session may go without any request before it is
    /// closed. Keep it well above `poll_timeout`: a healthy client has a
    /// read request in flight almost all the time.
    ///
    /// Default: 50 seconds (twice `poll_timeout`).
    pub session_timeout: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(25),
            max_body_size: 1_000_000,
            max_queued_frames: 1024,
            channel_capacity: 128,
            session_timeout: Duration::from_secs(50),
        }
    }
}

// ---------------------------------------------------------------------------
// PollRequest
// ---------------------------------------------------------------------------

/// What the server needs from the first request of a session.
#[derive(Debug, Clone)]
pub struct PollRequest {
    /// Request URI (query holds `b64`).
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
    /// Address the request was sent to (the `Host` header).
    pub local_addr: Addr,
    /// Address the request came from.
    pub remote_addr: Addr,
}

impl PollRequest {
    /// Captures the parts of `req` a session needs. `remote_addr` is the
    /// peer socket address, which the HTTP server knows and the request
    /// doesn't.
    pub fn from_request<B>(req: &Request<B>, remote_addr: impl Into<Addr>) -> Self {
        let local_addr = req
            .headers()
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(Addr::new)
            .or_else(|| req.uri().authority().map(|a| Addr::new(a.as_str())))
            .unwrap_or_default();
        Self {
            uri: req.uri().clone(),
            headers: req.headers().clone(),
            local_addr,
            remote_addr: remote_addr.into(),
        }
    }

    /// Whether the client asked for base64 binary frames.
    pub fn b64(&self) -> bool {
        b64_requested(query_value(&self.uri, B64_QUERY).as_deref())
    }
}

/// `b64=1` turns base64 binary frames on; any other value leaves them off.
pub(crate) fn b64_requested(value: Option<&str>) -> bool {
    value == Some("1")
}

/// Looks up a query parameter on a request URI.
pub(crate) fn query_value(uri: &Uri, key: &str) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Looks up a query parameter on a URL.
pub(crate) fn query_value_url(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

// ---------------------------------------------------------------------------
// PollingTransport
// ---------------------------------------------------------------------------

/// The HTTP long-polling [`Transport`].
#[derive(Debug, Clone, Default)]
pub struct PollingTransport {
    config: PollingConfig,
    http: reqwest::Client,
}

impl PollingTransport {
    /// Creates a transport with the given configuration.
    pub fn new(config: PollingConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Uses a preconfigured HTTP client for dialing (proxies, timeouts...).
    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// The transport configuration.
    pub fn config(&self) -> &PollingConfig {
        &self.config
    }
}

impl Transport for PollingTransport {
    type Conn = PollingConn;
    type Incoming = PollRequest;

    fn name(&self) -> &'static str {
        NAME
    }

    async fn dial(
        &self,
        url: Url,
        headers: HeaderMap,
    ) -> Result<Self::Conn, TransportError> {
        let conn =
            ClientConn::dial(self.http.clone(), url, headers, &self.config)?;
        Ok(PollingConn::Client(conn))
    }

    async fn accept(
        &self,
        incoming: Self::Incoming,
    ) -> Result<Self::Conn, TransportError> {
        Ok(PollingConn::Server(ServerConn::new(incoming, self.config.clone())))
    }
}

/// Either end of a polling session, as produced through [`Transport`].
///
/// Use [`PollingTransport::dial_client`] / [`PollingTransport::accept_server`]
/// to get the concrete types directly.
#[derive(Debug, Clone)]
pub enum PollingConn {
    /// Dialed side.
    Client(ClientConn),
    /// Accepted side.
    Server(ServerConn),
}

impl PollingTransport {
    /// Dials a client connection. Nothing is sent until
    /// [`ClientConn::resume`].
    ///
    /// # Errors
    /// Returns [`TransportError::InvalidUrl`] for a non-HTTP URL.
    pub fn dial_client(
        &self,
        url: Url,
        headers: HeaderMap,
    ) -> Result<ClientConn, TransportError> {
        ClientConn::dial(self.http.clone(), url, headers, &self.config)
    }

    /// Accepts a server connection for the session `incoming` opens.
    pub fn accept_server(&self, incoming: PollRequest) -> ServerConn {
        ServerConn::new(incoming, self.config.clone())
    }
}

impl Conn for PollingConn {
    async fn next_reader(&self) -> Result<FrameReader, TransportError> {
        match self {
            Self::Client(c) => c.next_reader().await,
            Self::Server(s) => s.next_reader().await,
        }
    }

    async fn next_writer(
        &self,
        frame_type: FrameType,
        packet_type: PacketType,
    ) -> Result<FrameWriter, TransportError> {
        match self {
            Self::Client(c) => c.next_writer(frame_type, packet_type).await,
            Self::Server(s) => s.next_writer(frame_type, packet_type).await,
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        match self {
            Self::Client(c) => c.close().await,
            Self::Server(s) => s.close().await,
        }
    }

    fn local_addr(&self) -> Addr {
        match self {
            Self::Client(c) => c.local_addr(),
            Self::Server(s) => s.local_addr(),
        }
    }

    fn remote_addr(&self) -> Addr {
        match self {
            Self::Client(c) => c.remote_addr(),
            Self::Server(s) => s.remote_addr(),
        }
    }

    fn remote_header(&self) -> HeaderMap {
        match self {
            Self::Client(c) => c.remote_header(),
            Self::Server(s) => s.remote_header(),
        }
    }
}
