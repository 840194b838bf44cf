//! Server side of a polling session.
//!
//! Outbound frames wait in a small state machine until a read request
//! (GET) picks them up:
//!
//! ```text
//!            write                         GET
//!   Idle ───────────► DataQueued ───────────────────► Idle (200 + frames)
//!    │  GET                ▲ write
//!    ▼                     │
//!   AwaitingData ──────────┘ (frames go straight to the held GET)
//!    │  poll_timeout
//!    ▼
//!   Idle (200 + noop)
//!
//!   close: any state ──► Closed (every request answered 410)
//! ```
//!
//! Write requests (POST) are decoded and pushed to the reader side in
//! order; one body is never interleaved with another.
//!
//! A session that sees no request for `session_timeout` is closed: the
//! client went away without saying so.

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use http::header::{self, HeaderValue};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::Instant;

use super::{payload, PollRequest, PollingConfig, SessionId, SID_HEADER};
use crate::conn::{Endpoints, Outgoing, Shutdown};
use crate::{
    Addr, Conn, Frame, FrameReader, FrameType, FrameWriter, Packet, PacketType,
    TransportError,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

enum PollState {
    Idle,
    AwaitingData(oneshot::Sender<Vec<Frame>>),
    DataQueued(Vec<Frame>),
    Closed,
}

/// What a GET found when it arrived.
enum PollStart {
    Ready(Vec<Frame>),
    Wait(oneshot::Receiver<Vec<Frame>>),
    Overlapping,
    Closed,
}

/// Frames written by the application, waiting for a GET.
struct Outbox {
    state: Mutex<PollState>,
    drained: Notify,
    max_queued: usize,
    shutdown: Arc<Shutdown>,
}

impl Outbox {
    fn lock(&self) -> MutexGuard<'_, PollState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues one frame, waiting while the queue is full.
    async fn push(&self, frame: Frame) -> Result<(), TransportError> {
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            {
                let mut state = self.lock();
                match mem::replace(&mut *state, PollState::Idle) {
                    PollState::Idle => {
                        *state = PollState::DataQueued(vec![frame]);
                        return Ok(());
                    }
                    PollState::AwaitingData(tx) => {
                        if let Err(frames) = tx.send(vec![frame]) {
                            // The held GET went away; keep the frame for the next one.
                            *state = PollState::DataQueued(frames);
                        }
                        return Ok(());
                    }
                    PollState::DataQueued(mut frames) if frames.len() < self.max_queued => {
                        frames.push(frame);
                        *state = PollState::DataQueued(frames);
                        return Ok(());
                    }
                    PollState::DataQueued(frames) => {
                        *state = PollState::DataQueued(frames);
                    }
                    PollState::Closed => {
                        *state = PollState::Closed;
                        return Err(self.closed_error());
                    }
                }
            }

            tokio::select! {
                _ = drained => {}
                err = self.shutdown.closed() => return Err(err),
            }
        }
    }

    fn start_poll(&self) -> PollStart {
        let start = {
            let mut state = self.lock();
            match mem::replace(&mut *state, PollState::Idle) {
                PollState::Closed => {
                    *state = PollState::Closed;
                    PollStart::Closed
                }
                PollState::DataQueued(frames) => PollStart::Ready(frames),
                PollState::AwaitingData(tx) if !tx.is_closed() => {
                    *state = PollState::AwaitingData(tx);
                    PollStart::Overlapping
                }
                PollState::Idle | PollState::AwaitingData(_) => {
                    let (tx, rx) = oneshot::channel();
                    *state = PollState::AwaitingData(tx);
                    PollStart::Wait(rx)
                }
            }
        };
        if matches!(start, PollStart::Ready(_)) {
            self.drained.notify_waiters();
        }
        start
    }

    /// Takes whatever is queued without waiting.
    fn take_queued(&self) -> Vec<Frame> {
        let frames = {
            let mut state = self.lock();
            match mem::replace(&mut *state, PollState::Idle) {
                PollState::DataQueued(frames) => frames,
                other => {
                    *state = other;
                    Vec::new()
                }
            }
        };
        if !frames.is_empty() {
            self.drained.notify_waiters();
        }
        frames
    }

    /// Gives up a held GET. Returns `false` if frames were handed to it
    /// in the meantime (or the session closed).
    fn abandon_poll(&self) -> bool {
        let mut state = self.lock();
        if matches!(*state, PollState::AwaitingData(_)) {
            *state = PollState::Idle;
            true
        } else {
            false
        }
    }

    fn close(&self) {
        // Dropping a pending sender wakes the held GET.
        *self.lock() = PollState::Closed;
        self.drained.notify_waiters();
    }

    fn closed_error(&self) -> TransportError {
        self.shutdown
            .error()
            .unwrap_or_else(|| TransportError::ConnectionClosed("session closed".into()))
    }
}

/// Moves committed frames from the writer side into the outbox.
async fn pump_outbound(outbox: Arc<Outbox>, mut outbound: mpsc::Receiver<Outgoing>) {
    loop {
        let out = tokio::select! {
            biased;
            _ = outbox.shutdown.closed() => break,
            out = outbound.recv() => match out {
                Some(out) => out,
                None => break,
            },
        };
        let result = outbox.push(out.frame.clone()).await;
        out.complete(result);
    }
    // Fail whatever was committed but never queued.
    outbound.close();
    while let Ok(out) = outbound.try_recv() {
        let err = outbox.closed_error();
        out.complete(Err(err));
    }
}

// ---------------------------------------------------------------------------
// Idle expiry
// ---------------------------------------------------------------------------

struct Seen {
    last: Instant,
    in_flight: usize,
}

/// When the client was last heard from.
struct Activity {
    seen: Mutex<Seen>,
}

impl Activity {
    fn new() -> Self {
        Self {
            seen: Mutex::new(Seen {
                last: Instant::now(),
                in_flight: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Seen> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Marks a request as in flight until the returned guard drops.
    fn exchange(self: &Arc<Self>) -> Exchange {
        let mut seen = self.lock();
        seen.last = Instant::now();
        seen.in_flight += 1;
        Exchange(Arc::clone(self))
    }

    /// The instant the session expires, or `None` while a request is in
    /// flight.
    fn deadline(&self, timeout: Duration) -> Option<Instant> {
        let seen = self.lock();
        (seen.in_flight == 0).then(|| seen.last + timeout)
    }
}

struct Exchange(Arc<Activity>);

impl Drop for Exchange {
    fn drop(&mut self) {
        let mut seen = self.0.lock();
        seen.last = Instant::now();
        seen.in_flight = seen.in_flight.saturating_sub(1);
    }
}

/// Closes the session once no request has arrived for `timeout`.
async fn expire_idle(
    id: SessionId,
    activity: Arc<Activity>,
    outbox: Arc<Outbox>,
    timeout: Duration,
) {
    loop {
        let wake = match activity.deadline(timeout) {
            Some(deadline) if deadline <= Instant::now() => break,
            Some(deadline) => deadline,
            // Re-check after a full interval; the request will have
            // refreshed `last` by then.
            None => Instant::now() + timeout,
        };
        tokio::select! {
            _ = outbox.shutdown.closed() => return,
            _ = tokio::time::sleep_until(wake) => {}
        }
    }

    if outbox.shutdown.close_remote("session timed out") {
        outbox.close();
        tracing::info!(%id, ?timeout, "polling session timed out");
    }
}

// ---------------------------------------------------------------------------
// ServerConn
// ---------------------------------------------------------------------------

struct Inner {
    id: SessionId,
    b64: bool,
    config: PollingConfig,
    endpoints: Endpoints,
    outbox: Arc<Outbox>,
    activity: Arc<Activity>,
    inbound: tokio::sync::Mutex<mpsc::Sender<Frame>>,
    local_addr: Addr,
    remote_addr: Addr,
    remote_header: Mutex<HeaderMap>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.endpoints.shutdown.close_local("session dropped") {
            self.outbox.close();
        }
    }
}

/// Server side of one polling session.
///
/// Cheap to clone; every clone is the same session. Feed each HTTP request
/// of the session to [`serve`](Self::serve).
#[derive(Clone)]
pub struct ServerConn {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ServerConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConn")
            .field("id", &self.inner.id)
            .field("b64", &self.inner.b64)
            .field("remote_addr", &self.inner.remote_addr)
            .finish_non_exhaustive()
    }
}

impl ServerConn {
    /// Opens a session for the client that sent `incoming`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(incoming: PollRequest, config: PollingConfig) -> Self {
        let (endpoints, substrate) = Endpoints::new(config.channel_capacity);
        let outbox = Arc::new(Outbox {
            state: Mutex::new(PollState::Idle),
            drained: Notify::new(),
            max_queued: config.max_queued_frames.max(1),
            shutdown: Arc::clone(&endpoints.shutdown),
        });
        tokio::spawn(pump_outbound(Arc::clone(&outbox), substrate.outbound));

        let id = SessionId::random();
        let activity = Arc::new(Activity::new());
        tokio::spawn(expire_idle(
            id,
            Arc::clone(&activity),
            Arc::clone(&outbox),
            config.session_timeout,
        ));
        let b64 = incoming.b64();
        tracing::info!(%id, b64, remote = %incoming.remote_addr, "polling session opened");

        Self {
            inner: Arc::new(Inner {
                id,
                b64,
                config,
                endpoints,
                outbox,
                activity,
                inbound: tokio::sync::Mutex::new(substrate.inbound),
                local_addr: incoming.local_addr,
                remote_addr: incoming.remote_addr,
                remote_header: Mutex::new(incoming.headers),
            }),
        }
    }

    /// The session id, sent to the client in the `x-volley-sid` header.
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Whether binary frames go out base64-encoded.
    pub fn b64(&self) -> bool {
        self.inner.b64
    }

    /// Returns `true` once the session is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.endpoints.shutdown.is_closed()
    }

    /// Answers one HTTP request of this session.
    ///
    /// - `GET` returns queued frames, or waits up to `poll_timeout` for
    ///   some and then answers a `Noop` packet. A second `GET` while one is
    ///   held gets `400`.
    /// - `POST` decodes the body and queues its frames for the reader:
    ///   `200 ok`, `400` if malformed, `413` if over `max_body_size`.
    /// - Any other method gets `405`.
    ///
    /// Once the session is closed every request gets `410 Gone`. A
    /// session with no request for `session_timeout` closes on its own.
    pub async fn serve<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let _exchange = self.inner.activity.exchange();
        self.set_remote_header(req.headers().clone());
        let method = req.method().clone();
        match method {
            Method::GET => self.poll().await,
            Method::POST => self.deliver(req.into_body()).await,
            _ => self.respond(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
        }
    }

    async fn poll(&self) -> Response<Full<Bytes>> {
        let inner = &self.inner;
        let mut rx = match inner.outbox.start_poll() {
            PollStart::Ready(frames) => return self.frames_response(&frames),
            PollStart::Closed => return self.gone(),
            PollStart::Overlapping => {
                tracing::warn!(id = %inner.id, "overlapping poll rejected");
                return self.respond(StatusCode::BAD_REQUEST, "overlapping poll");
            }
            PollStart::Wait(rx) => rx,
        };

        tokio::select! {
            frames = &mut rx => match frames {
                Ok(frames) => self.frames_response(&frames),
                Err(_) => self.gone(),
            },
            _ = tokio::time::sleep(inner.config.poll_timeout) => {
                if inner.outbox.abandon_poll() {
                    tracing::trace!(id = %inner.id, "poll timed out");
                    return self.frames_response(&[noop_frame()]);
                }
                match rx.try_recv() {
                    Ok(frames) => self.frames_response(&frames),
                    Err(_) => self.gone(),
                }
            }
        }
    }

    /// Answers the request that opened the session. A GET is answered
    /// right away (queued frames or a `Noop`) so the client learns the
    /// session id without waiting out a whole poll.
    pub(super) async fn serve_opening<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        if req.method() != Method::GET {
            return self.serve(req).await;
        }
        let _exchange = self.inner.activity.exchange();
        self.set_remote_header(req.headers().clone());
        let frames = self.inner.outbox.take_queued();
        if frames.is_empty() {
            self.frames_response(&[noop_frame()])
        } else {
            self.frames_response(&frames)
        }
    }

    async fn deliver<B>(&self, body: B) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let inner = &self.inner;
        if inner.endpoints.shutdown.is_closed() {
            return self.gone();
        }

        let body = match Limited::new(body, inner.config.max_body_size).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => {
                tracing::warn!(id = %inner.id, limit = inner.config.max_body_size, "request body too large");
                return self.respond(StatusCode::PAYLOAD_TOO_LARGE, "payload too large");
            }
            Err(e) => {
                tracing::warn!(id = %inner.id, error = %e, "failed to read request body");
                return self.respond(StatusCode::BAD_REQUEST, "unreadable body");
            }
        };

        let frames = match payload::decode(&body) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(id = %inner.id, error = %e, "malformed payload");
                return self.respond(StatusCode::BAD_REQUEST, "malformed payload");
            }
        };
        tracing::trace!(id = %inner.id, frames = frames.len(), "payload received");

        // Held for the whole body so concurrent POSTs don't interleave.
        let inbound = inner.inbound.lock().await;
        for frame in frames {
            tokio::select! {
                biased;
                _ = inner.endpoints.shutdown.closed() => return self.gone(),
                sent = inbound.send(frame) => {
                    if sent.is_err() {
                        return self.gone();
                    }
                }
            }
        }

        self.respond(StatusCode::OK, "ok")
    }

    fn set_remote_header(&self, headers: HeaderMap) {
        *self
            .inner
            .remote_header
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = headers;
    }

    fn frames_response(&self, frames: &[Frame]) -> Response<Full<Bytes>> {
        let b64 = self.inner.b64;
        let mut resp = self.respond_bytes(StatusCode::OK, payload::encode(frames, b64));
        resp.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(payload::content_type(b64)),
        );
        resp
    }

    fn gone(&self) -> Response<Full<Bytes>> {
        self.respond(StatusCode::GONE, "session closed")
    }

    fn respond(&self, status: StatusCode, text: &'static str) -> Response<Full<Bytes>> {
        let mut resp = text_response(status, text);
        self.stamp(&mut resp);
        resp
    }

    fn respond_bytes(&self, status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
        let mut resp = Response::new(Full::new(body));
        *resp.status_mut() = status;
        self.stamp(&mut resp);
        resp
    }

    fn stamp(&self, resp: &mut Response<Full<Bytes>>) {
        if let Ok(sid) = HeaderValue::try_from(self.inner.id.to_hex()) {
            resp.headers_mut().insert(SID_HEADER, sid);
        }
    }
}

fn noop_frame() -> Frame {
    Packet::new(FrameType::Text, PacketType::Noop, Bytes::new()).encode()
}

/// A short plain-text response.
pub(super) fn text_response(status: StatusCode, text: &'static str) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from_static(text.as_bytes())));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(payload::TEXT_CONTENT_TYPE),
    );
    resp
}

impl Conn for ServerConn {
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
        if self.inner.endpoints.shutdown.close_local("closed by server") {
            self.inner.outbox.close();
            tracing::info!(id = %self.inner.id, "polling session closed");
        }
        Ok(())
    }

    fn local_addr(&self) -> Addr {
        self.inner.local_addr.clone()
    }

    fn remote_addr(&self) -> Addr {
        self.inner.remote_addr.clone()
    }

    fn remote_header(&self) -> HeaderMap {
        self.inner
            .remote_header
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn session(b64: bool) -> ServerConn {
        let uri = if b64 {
            "/eio/?transport=polling&b64=1"
        } else {
            "/eio/?transport=polling"
        };
        let req = Request::get(uri)
            .header(header::HOST, "127.0.0.1:8000")
            .header("X-Eio-Test", "server")
            .body(())
            .unwrap();
        let config = PollingConfig {
            poll_timeout: Duration::from_millis(100),
            ..PollingConfig::default()
        };
        ServerConn::new(PollRequest::from_request(&req, Addr::new("127.0.0.1:4000")), config)
    }

    fn get() -> Request<Full<Bytes>> {
        Request::get("/eio/").body(Full::new(Bytes::new())).unwrap()
    }

    fn post(body: impl Into<Bytes>) -> Request<Full<Bytes>> {
        Request::post("/eio/").body(Full::new(body.into())).unwrap()
    }

    async fn body_of(resp: Response<Full<Bytes>>) -> Bytes {
        resp.into_body().collect().await.unwrap().to_bytes()
    }

    async fn write(conn: &ServerConn, frame_type: FrameType, data: &[u8]) {
        let mut w = conn.next_writer(frame_type, PacketType::Message).await.unwrap();
        w.write_bytes(data);
        w.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_get_returns_queued_frames() {
        let conn = session(false);
        write(&conn, FrameType::Text, b"hello").await;
        write(&conn, FrameType::Binary, &[1, 2]).await;

        let resp = conn.serve(get()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[SID_HEADER], conn.id().to_hex().as_str());
        let body = body_of(resp).await;
        let frames = payload::decode(&body).unwrap();
        assert_eq!(
            frames,
            vec![Frame::text("4hello"), Frame::binary(vec![b'4', 1, 2])]
        );
    }

    #[tokio::test]
    async fn test_held_get_receives_later_write() {
        let conn = session(true);
        let poller = conn.clone();
        let held = tokio::spawn(async move { poller.serve(get()).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        write(&conn, FrameType::Binary, &[9]).await;

        let resp = held.await.unwrap();
        assert_eq!(resp.headers()[header::CONTENT_TYPE], payload::TEXT_CONTENT_TYPE);
        let body = body_of(resp).await;
        assert_eq!(&body[..], b"b4:NAk=");
    }

    #[tokio::test]
    async fn test_idle_get_times_out_with_noop() {
        let conn = session(false);
        let resp = conn.serve(get()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(&body_of(resp).await[..], b"01:6");
    }

    #[tokio::test]
    async fn test_overlapping_get_is_rejected() {
        let conn = session(false);
        let poller = conn.clone();
        let held = tokio::spawn(async move { poller.serve(get()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = conn.serve(get()).await;
        assert_eq!(second.status(), StatusCode::BAD_REQUEST);
        assert_eq!(held.await.unwrap().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_frames_reach_reader_in_order() {
        let conn = session(false);
        let resp = conn.serve(post(&b"06:4hello03:4yo"[..])).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(&body_of(resp).await[..], b"ok");

        let first = conn.next_reader().await.unwrap().into_data();
        let second = conn.next_reader().await.unwrap().into_data();
        assert_eq!(&first[..], b"hello");
        assert_eq!(&second[..], b"yo");
    }

    #[tokio::test]
    async fn test_malformed_post_is_rejected() {
        let conn = session(false);
        let resp = conn.serve(post(&b"x1:a"[..])).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_oversized_post_is_rejected() {
        let conn = session(false);
        let body = vec![b'0'; conn.inner.config.max_body_size + 1];
        let resp = conn.serve(post(body)).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_other_methods_are_not_allowed() {
        let conn = session(false);
        let req = Request::put("/eio/").body(Full::new(Bytes::new())).unwrap();
        assert_eq!(conn.serve(req).await.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_close_releases_held_get_and_answers_gone() {
        let conn = session(false);
        let poller = conn.clone();
        let held = tokio::spawn(async move { poller.serve(get()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        conn.close().await.unwrap();
        assert_eq!(held.await.unwrap().status(), StatusCode::GONE);
        assert_eq!(conn.serve(post(&b"02:4a"[..])).await.status(), StatusCode::GONE);
        assert!(conn.next_reader().await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_addresses_and_headers() {
        let conn = session(false);
        assert_eq!(conn.local_addr().as_str(), "127.0.0.1:8000");
        assert_eq!(conn.remote_addr().as_str(), "127.0.0.1:4000");
        assert_eq!(conn.remote_header()["X-Eio-Test"], "server");
    }

    #[tokio::test]
    async fn test_full_outbox_makes_writer_wait() {
        let uri = "/eio/?transport=polling";
        let req = Request::get(uri).body(()).unwrap();
        let config = PollingConfig {
            max_queued_frames: 1,
            ..PollingConfig::default()
        };
        let conn = ServerConn::new(PollRequest::from_request(&req, Addr::empty()), config);
        write(&conn, FrameType::Text, b"one").await;

        let writer = conn.clone();
        let blocked = tokio::spawn(async move { write(&writer, FrameType::Text, b"two").await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!blocked.is_finished(), "second write must wait for a poll");

        let first = body_of(conn.serve(get()).await).await;
        assert_eq!(&first[..], b"04:4one");
        blocked.await.unwrap();
        let second = body_of(conn.serve(get()).await).await;
        assert_eq!(&second[..], b"04:4two");
    }

    fn expiring(poll_timeout: Duration, session_timeout: Duration) -> ServerConn {
        let req = Request::get("/eio/?transport=polling").body(()).unwrap();
        let config = PollingConfig {
            poll_timeout,
            session_timeout,
            ..PollingConfig::default()
        };
        ServerConn::new(PollRequest::from_request(&req, Addr::empty()), config)
    }

    #[tokio::test]
    async fn test_silent_session_times_out() {
        let conn = expiring(Duration::from_secs(1), Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(conn.is_closed());
        let err = conn.next_reader().await.unwrap_err();
        assert_eq!(err.to_string(), "connection closed: session timed out");
        assert!(conn
            .next_writer(FrameType::Text, PacketType::Message)
            .await
            .is_err());
        assert_eq!(conn.serve(get()).await.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn test_held_poll_keeps_session_alive() {
        let conn = expiring(Duration::from_millis(300), Duration::from_millis(100));
        let poller = conn.clone();
        let held = tokio::spawn(async move { poller.serve(get()).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!conn.is_closed(), "a held poll counts as activity");

        let resp = held.await.unwrap();
        assert_eq!(&body_of(resp).await[..], b"01:6");
        assert!(!conn.is_closed());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(conn.is_closed());
    }
}
