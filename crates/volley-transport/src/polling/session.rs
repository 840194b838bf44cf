//! Session ids and the table routing HTTP requests to polling sessions.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Body;
use tokio::sync::{mpsc, Mutex};

use super::server::text_response;
use super::{query_value, PollRequest, PollingTransport, ServerConn, SID_QUERY};

/// An opaque session identifier.
///
/// Encoded as a 32-character hex string in the `sid` query parameter and
/// the `x-volley-sid` response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId([u8; 16]);

impl SessionId {
    /// A fresh id from the thread-local RNG.
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Lowercase hex, as sent on the wire.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses the wire form. Either case is accepted; anything but 32 hex
    /// digits is `None`.
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut id = [0u8; 16];
        hex::decode_to_slice(s, &mut id).ok()?;
        Some(Self(id))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// PollingServer
// ---------------------------------------------------------------------------

struct ServerInner {
    transport: PollingTransport,
    sessions: Mutex<BTreeMap<SessionId, ServerConn>>,
    accepted_tx: mpsc::UnboundedSender<ServerConn>,
    accepted_rx: Mutex<mpsc::UnboundedReceiver<ServerConn>>,
}

/// Routes HTTP requests to polling sessions.
///
/// A request without a `sid` opens a new session, which is handed out by
/// [`accept`](Self::accept). Requests carrying a `sid` go to that
/// session's [`ServerConn::serve`]. Sessions closed by either side or by
/// `session_timeout` are dropped from the table when a new one opens, or
/// on [`sweep`](Self::sweep).
///
/// ```rust,ignore
/// let server = PollingServer::new(PollingTransport::default());
/// // inside the hyper service:
/// let resp = server.handle(req, remote_addr).await;
/// // elsewhere:
/// while let Some(conn) = server.accept().await { /* ... */ }
/// ```
#[derive(Clone)]
pub struct PollingServer {
    inner: Arc<ServerInner>,
}

impl fmt::Debug for PollingServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingServer").finish_non_exhaustive()
    }
}

impl PollingServer {
    /// Creates an empty session table.
    pub fn new(transport: PollingTransport) -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(ServerInner {
                transport,
                sessions: Mutex::new(BTreeMap::new()),
                accepted_tx,
                accepted_rx: Mutex::new(accepted_rx),
            }),
        }
    }

    /// Answers one HTTP request, opening a session if it carries no `sid`.
    ///
    /// - unknown or unparsable `sid` → `400`
    /// - closed session → `410` (and the session is forgotten)
    pub async fn handle<B>(&self, req: Request<B>, remote_addr: SocketAddr) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let Some(sid) = query_value(req.uri(), SID_QUERY) else {
            let incoming = PollRequest::from_request(&req, remote_addr);
            let conn = self.inner.transport.accept_server(incoming);
            {
                let mut sessions = self.inner.sessions.lock().await;
                sessions.retain(|_, open| !open.is_closed());
                sessions.insert(conn.id(), conn.clone());
            }
            // Nobody accepting yet is fine; the session still answers.
            let _ = self.inner.accepted_tx.send(conn.clone());
            return conn.serve_opening(req).await;
        };

        let Some(id) = SessionId::from_hex(&sid) else {
            tracing::debug!(sid, "invalid session id");
            return text_response(StatusCode::BAD_REQUEST, "invalid session id");
        };

        let conn = self.inner.sessions.lock().await.get(&id).cloned();
        let Some(conn) = conn else {
            tracing::debug!(%id, "unknown session");
            return text_response(StatusCode::BAD_REQUEST, "unknown session");
        };

        if conn.is_closed() {
            self.inner.sessions.lock().await.remove(&id);
            tracing::debug!(%id, "request for closed session");
        }
        conn.serve(req).await
    }

    /// Waits for the next session opened by a client.
    pub async fn accept(&self) -> Option<ServerConn> {
        self.inner.accepted_rx.lock().await.recv().await
    }

    /// Looks up a live session.
    pub async fn session(&self, id: SessionId) -> Option<ServerConn> {
        self.inner.sessions.lock().await.get(&id).cloned()
    }

    /// Number of sessions in the table (closed ones included until swept).
    pub async fn len(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }

    /// Returns `true` if no session is open.
    pub async fn is_empty(&self) -> bool {
        self.inner.sessions.lock().await.is_empty()
    }

    /// Forgets closed sessions, returning how many were removed.
    pub async fn sweep(&self) -> usize {
        let mut sessions = self.inner.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, conn| !conn.is_closed());
        before - sessions.len()
    }
}
