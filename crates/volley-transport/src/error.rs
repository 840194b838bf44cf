use http::{HeaderMap, StatusCode};

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A frame did not carry a valid packet: empty, or an unknown
    /// leading type byte.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// A polling request/response body could not be split into frames.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The connection was closed, locally or by the peer.
    ///
    /// Every operation on a closed connection fails with this, carrying
    /// the reason recorded by whoever closed it first.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The peer or the caller broke the exchange rules (e.g. a second
    /// poll while one is already held open).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A frame's declared kind doesn't fit its payload (e.g. a text frame
    /// that isn't UTF-8).
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The URL passed to `dial` can't be used by this transport.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// An HTTP exchange failed below the protocol.
    #[error("http request failed: {0}")]
    Http(String),

    /// The WebSocket failed after it was established.
    #[cfg(feature = "websocket")]
    #[error("websocket error: {0}")]
    WebSocket(#[source] Box<tokio_tungstenite::tungstenite::Error>),

    /// The client-side handshake was rejected or failed.
    #[error(transparent)]
    Dial(Box<DialError>),

    /// Binding or accepting a socket failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Returns `true` if this error means the connection is gone for good.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed(_))
    }
}

/// Error returned when dialing a server fails.
///
/// Handshake rejections usually come back as a plain HTTP response
/// (401, 403, 404...) before any frame is exchanged, so the status and
/// headers of that response are kept alongside the underlying error.
#[derive(Debug, thiserror::Error)]
#[error("dial failed{}: {source}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
pub struct DialError {
    /// Status of the server's response, if the server answered at all.
    pub status: Option<StatusCode>,
    /// Headers of the server's response (empty without a response).
    pub headers: HeaderMap,
    /// What went wrong.
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl From<DialError> for TransportError {
    fn from(err: DialError) -> Self {
        Self::Dial(Box::new(err))
    }
}
