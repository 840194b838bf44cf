//! Client side of a polling session.
//!
//! [`ClientConn::resume`] starts two loops:
//!
//! - the poll loop keeps one GET outstanding and pushes every frame it
//!   returns to the reader side (`Noop` keepalives are dropped);
//! - the send loop batches committed frames into one POST body and acks
//!   them once the server answered `200`.
//!
//! The session id is adopted from the first response's `x-volley-sid`
//! header; POSTs wait until it is known.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::{header, HeaderMap, Method, StatusCode};
use tokio::sync::{mpsc, watch};
use url::Url;

use super::{
    b64_requested, payload, query_value_url, PollingConfig, NAME, SID_HEADER, SID_QUERY,
};
use crate::conn::{Endpoints, Outgoing, Shutdown, Substrate};
use crate::{
    host_port, set_query, timestamp, Addr, Conn, Frame, FrameReader, FrameType,
    FrameWriter, PacketType, TransportError, B64_QUERY, TIMESTAMP_QUERY,
    TRANSPORT_QUERY,
};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// What both loops share. Holds no endpoint, so dropping the last
/// [`ClientConn`] lets the loops wind down.
struct Session {
    http: reqwest::Client,
    url: Url,
    request_header: HeaderMap,
    b64: bool,
    sid: watch::Sender<Option<String>>,
    remote_header: Mutex<HeaderMap>,
    shutdown: Arc<Shutdown>,
}

impl Session {
    fn request(&self, method: Method) -> reqwest::RequestBuilder {
        let mut url = self.url.clone();
        set_query(&mut url, TIMESTAMP_QUERY, &timestamp());
        if let Some(sid) = self.sid.borrow().as_deref() {
            set_query(&mut url, SID_QUERY, sid);
        }
        self.http
            .request(method, url)
            .headers(self.request_header.clone())
    }

    /// Records the response headers and adopts the session id.
    fn observe(&self, resp: &reqwest::Response) {
        *self.remote_header.lock().unwrap_or_else(|e| e.into_inner()) =
            resp.headers().clone();
        let Some(sid) = resp.headers().get(SID_HEADER).and_then(|v| v.to_str().ok())
        else {
            return;
        };
        self.sid.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            tracing::debug!(sid, "polling session id adopted");
            *current = Some(sid.to_string());
            true
        });
    }

    async fn wait_for_sid(&self) -> Result<(), TransportError> {
        let mut rx = self.sid.subscribe();
        tokio::select! {
            biased;
            err = self.shutdown.closed() => Err(err),
            ready = rx.wait_for(Option::is_some) => match ready {
                Ok(_) => Ok(()),
                Err(_) => Err(TransportError::ConnectionClosed("session dropped".into())),
            },
        }
    }

    async fn post(&self, body: Bytes) -> Result<(), TransportError> {
        let resp = self
            .request(Method::POST)
            .header(header::CONTENT_TYPE, payload::content_type(self.b64))
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        self.observe(&resp);
        match resp.status() {
            StatusCode::OK => Ok(()),
            StatusCode::GONE => Err(TransportError::ConnectionClosed(
                "session closed by server".into(),
            )),
            status => Err(TransportError::Http(format!("post answered {status}"))),
        }
    }

    /// One GET. `Ok(None)` means the server closed the session.
    async fn poll(&self) -> Result<Option<Vec<Frame>>, TransportError> {
        let resp = self
            .request(Method::GET)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        self.observe(&resp);
        match resp.status() {
            StatusCode::OK => {}
            StatusCode::GONE => return Ok(None),
            status => {
                return Err(TransportError::ProtocolViolation(format!(
                    "poll answered {status}"
                )));
            }
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        payload::decode(&body).map(Some)
    }
}

async fn poll_loop(session: Arc<Session>, inbound: mpsc::Sender<Frame>) {
    loop {
        let polled = tokio::select! {
            biased;
            _ = session.shutdown.closed() => return,
            polled = session.poll() => polled,
        };
        let frames = match polled {
            Ok(Some(frames)) => frames,
            Ok(None) => {
                tracing::info!("polling session closed by server");
                session.shutdown.close_remote("session closed by server");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "poll failed");
                session.shutdown.close_remote(e.to_string());
                return;
            }
        };

        let noop = PacketType::Noop.as_byte();
        for frame in frames {
            if frame.data.first() == Some(&noop) {
                continue;
            }
            tokio::select! {
                biased;
                _ = session.shutdown.closed() => return,
                sent = inbound.send(frame) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

async fn send_loop(session: Arc<Session>, mut outbound: mpsc::Receiver<Outgoing>) {
    loop {
        let first = tokio::select! {
            biased;
            _ = session.shutdown.closed() => break,
            out = outbound.recv() => match out {
                Some(out) => out,
                None => break,
            },
        };
        let mut batch = vec![first];
        while let Ok(out) = outbound.try_recv() {
            batch.push(out);
        }

        let result = match session.wait_for_sid().await {
            Ok(()) => {
                let frames: Vec<Frame> = batch.iter().map(|o| o.frame.clone()).collect();
                let body = payload::encode(&frames, session.b64);
                tracing::trace!(frames = frames.len(), "sending payload");
                tokio::select! {
                    biased;
                    err = session.shutdown.closed() => Err(err),
                    sent = session.post(body) => sent,
                }
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => batch.into_iter().for_each(|o| o.complete(Ok(()))),
            Err(e) => {
                let reason = e.to_string();
                if session.shutdown.close_remote(reason.clone()) {
                    tracing::warn!(error = %reason, "post failed");
                }
                for out in batch {
                    out.complete(Err(TransportError::ConnectionClosed(reason.clone())));
                }
                break;
            }
        }
    }
    outbound.close();
    while let Ok(out) = outbound.try_recv() {
        let err = session
            .shutdown
            .error()
            .unwrap_or_else(|| TransportError::ConnectionClosed("session ended".into()));
        out.complete(Err(err));
    }
}

// ---------------------------------------------------------------------------
// ClientConn
// ---------------------------------------------------------------------------

struct Inner {
    endpoints: Endpoints,
    session: Arc<Session>,
    substrate: Mutex<Option<Substrate>>,
    remote_addr: Addr,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.endpoints.shutdown.close_local("connection dropped");
    }
}

/// Client side of one polling session.
///
/// Nothing goes over the wire until [`resume`](Self::resume) is called;
/// frames written before that wait in the outbound queue.
#[derive(Clone)]
pub struct ClientConn {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ClientConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConn")
            .field("url", &self.inner.session.url.as_str())
            .field("b64", &self.inner.session.b64)
            .finish_non_exhaustive()
    }
}

impl ClientConn {
    pub(super) fn dial(
        http: reqwest::Client,
        mut url: Url,
        headers: HeaderMap,
        config: &PollingConfig,
    ) -> Result<Self, TransportError> {
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(TransportError::InvalidUrl(format!(
                    "polling needs http or https, got {other}"
                )));
            }
        }
        let remote_addr = host_port(&url)?;
        set_query(&mut url, TRANSPORT_QUERY, NAME);
        set_query(&mut url, TIMESTAMP_QUERY, &timestamp());
        let b64 = b64_requested(query_value_url(&url, B64_QUERY).as_deref());
        let sid = query_value_url(&url, SID_QUERY);

        let (endpoints, substrate) = Endpoints::new(config.channel_capacity);
        let session = Arc::new(Session {
            http,
            url,
            request_header: headers,
            b64,
            sid: watch::Sender::new(sid),
            remote_header: Mutex::new(HeaderMap::new()),
            shutdown: Arc::clone(&endpoints.shutdown),
        });
        tracing::info!(url = %session.url, b64, "polling client dialed");

        Ok(Self {
            inner: Arc::new(Inner {
                endpoints,
                session,
                substrate: Mutex::new(Some(substrate)),
                remote_addr,
            }),
        })
    }

    /// Starts exchanging frames with the server. Calling it again does
    /// nothing.
    ///
    /// Must be called inside a tokio runtime.
    pub fn resume(&self) {
        let substrate = self
            .inner
            .substrate
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(Substrate { inbound, outbound }) = substrate else {
            return;
        };
        tokio::spawn(poll_loop(Arc::clone(&self.inner.session), inbound));
        tokio::spawn(send_loop(Arc::clone(&self.inner.session), outbound));
    }

    /// The session id, once the server assigned one.
    pub fn session_id(&self) -> Option<String> {
        self.inner.session.sid.borrow().clone()
    }

    /// Whether binary frames travel base64-encoded.
    pub fn b64(&self) -> bool {
        self.inner.session.b64
    }

    /// The URL requests go to (without the per-request `t` and `sid`).
    pub fn url(&self) -> &Url {
        &self.inner.session.url
    }
}

impl Conn for ClientConn {
    async fn next_reader(&self) -> Result<FrameReader, TransportError> {
        self.inner.endpoints.next_reader().await
    }

    async fn next_writer(
        &self,
        frame_type: FrameType,
        packet_type: PacketType,
    ) -> Result<FrameWriter, TransportError> {
        self.inner.endpoints.next_writer(frame_type, packet_type).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.inner.endpoints.shutdown.close_local("closed by client") {
            tracing::info!(url = %self.inner.session.url, "polling client closed");
        }
        Ok(())
    }

    /// A polling client has no address of its own.
    fn local_addr(&self) -> Addr {
        Addr::empty()
    }

    fn remote_addr(&self) -> Addr {
        self.inner.remote_addr.clone()
    }

    fn remote_header(&self) -> HeaderMap {
        self.inner
            .session
            .remote_header
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
