//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! One WebSocket message carries exactly one frame: text frames travel as
//! text messages, binary frames as binary messages. Ping/pong is left to
//! tungstenite.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use http::{HeaderMap, HeaderName, HeaderValue};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::conn::{Endpoints, Outgoing, Shutdown};
use crate::{
    host_port, set_query, timestamp, Addr, Conn, DialError, Frame, FrameReader,
    FrameType, FrameWriter, PacketType, Transport, TransportError,
    TIMESTAMP_QUERY, TRANSPORT_QUERY,
};

/// Name of the WebSocket transport.
pub const NAME: &str = "websocket";

/// Configuration for the WebSocket transport.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// How long the opening handshake may take, either side.
    ///
    /// Default: 10 seconds.
    pub handshake_timeout: Duration,

    /// Capacity of the per-connection frame channels.
    ///
    /// Default: 128.
    pub channel_capacity: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            channel_capacity: 128,
        }
    }
}

/// A TCP stream waiting for its WebSocket handshake, plus the extra
/// headers to send back in the handshake response.
#[derive(Debug)]
pub struct Upgrade {
    /// The raw connection.
    pub stream: TcpStream,
    /// Added to the `101 Switching Protocols` response.
    pub response_headers: HeaderMap,
}

impl Upgrade {
    /// Wraps an accepted TCP stream.
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            response_headers: HeaderMap::new(),
        }
    }

    /// Adds a header to the handshake response.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.response_headers.insert(name, value);
        self
    }
}

// ---------------------------------------------------------------------------
// WebSocketTransport
// ---------------------------------------------------------------------------

/// The WebSocket [`Transport`].
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Creates a transport with the given configuration.
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }

    /// The transport configuration.
    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }
}

impl Transport for WebSocketTransport {
    type Conn = WebSocketConn;
    type Incoming = Upgrade;

    fn name(&self) -> &'static str {
        NAME
    }

    /// Rewrites `http`/`https` to `ws`/`wss`, stamps `transport` and `t`
    /// on the query and runs the opening handshake.
    ///
    /// A refused handshake comes back as [`TransportError::Dial`] carrying
    /// the server's status and headers.
    async fn dial(
        &self,
        mut url: Url,
        headers: HeaderMap,
    ) -> Result<Self::Conn, TransportError> {
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(TransportError::InvalidUrl(format!(
                    "websocket needs http(s) or ws(s), got {other}"
                )));
            }
        };
        url.set_scheme(scheme).map_err(|()| {
            TransportError::InvalidUrl(format!("can't use {scheme} for {url}"))
        })?;
        set_query(&mut url, TRANSPORT_QUERY, NAME);
        set_query(&mut url, TIMESTAMP_QUERY, &timestamp());

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        request.headers_mut().extend(headers);

        let handshake = tokio::time::timeout(
            self.config.handshake_timeout,
            tokio_tungstenite::connect_async(request),
        );
        let (ws, response) = match handshake.await {
            Ok(Ok(pair)) => pair,
            Ok(Err(tungstenite::Error::Http(resp))) => {
                let status = resp.status();
                tracing::warn!(%url, %status, "websocket handshake rejected");
                return Err(DialError {
                    status: Some(status),
                    headers: resp.headers().clone(),
                    source: format!("handshake rejected with {status}").into(),
                }
                .into());
            }
            Ok(Err(e)) => {
                return Err(DialError {
                    status: None,
                    headers: HeaderMap::new(),
                    source: Box::new(e),
                }
                .into());
            }
            Err(_) => {
                return Err(DialError {
                    status: None,
                    headers: HeaderMap::new(),
                    source: "handshake timed out".into(),
                }
                .into());
            }
        };

        let (local_addr, remote_addr) = match ws.get_ref() {
            MaybeTlsStream::Plain(tcp) => (
                tcp.local_addr().map(Addr::from).unwrap_or_default(),
                tcp.peer_addr().map(Addr::from).or_else(|_| host_port(&url))?,
            ),
            _ => (Addr::empty(), host_port(&url)?),
        };
        tracing::info!(%url, %remote_addr, "websocket dialed");

        Ok(WebSocketConn::spawn(
            ws,
            local_addr,
            remote_addr,
            response.headers().clone(),
            self.config.channel_capacity,
        ))
    }

    async fn accept(
        &self,
        incoming: Self::Incoming,
    ) -> Result<Self::Conn, TransportError> {
        let Upgrade {
            stream,
            response_headers,
        } = incoming;
        let local_addr = stream.local_addr().map(Addr::from).unwrap_or_default();
        let remote_addr = stream.peer_addr().map(Addr::from).unwrap_or_default();

        let mut request_headers = HeaderMap::new();
        let callback = |req: &Request, mut resp: Response| {
            request_headers = req.headers().clone();
            resp.headers_mut().extend(response_headers);
            Ok::<_, ErrorResponse>(resp)
        };
        let handshake = tokio::time::timeout(
            self.config.handshake_timeout,
            tokio_tungstenite::accept_hdr_async(stream, callback),
        );
        let ws = match handshake.await {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => return Err(TransportError::WebSocket(Box::new(e))),
            Err(_) => {
                return Err(TransportError::ProtocolViolation(
                    "websocket handshake timed out".into(),
                ));
            }
        };
        tracing::debug!(%remote_addr, "accepted websocket connection");

        Ok(WebSocketConn::spawn(
            ws,
            local_addr,
            remote_addr,
            request_headers,
            self.config.channel_capacity,
        ))
    }
}

// ---------------------------------------------------------------------------
// WebSocketListener
// ---------------------------------------------------------------------------

/// Accepts WebSocket connections on a TCP port.
#[derive(Debug)]
pub struct WebSocketListener {
    listener: TcpListener,
    transport: WebSocketTransport,
    response_headers: HeaderMap,
}

impl WebSocketListener {
    /// Binds to `addr` (use port 0 to pick a free one).
    pub async fn bind(
        addr: &str,
        transport: WebSocketTransport,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr, "websocket transport listening");
        Ok(Self {
            listener,
            transport,
            response_headers: HeaderMap::new(),
        })
    }

    /// Headers added to every handshake response.
    pub fn with_response_headers(mut self, headers: HeaderMap) -> Self {
        self.response_headers = headers;
        self
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Waits for the next client and completes its handshake.
    pub async fn accept(&self) -> Result<WebSocketConn, TransportError> {
        let (stream, addr) = self.listener.accept().await?;
        tracing::debug!(%addr, "tcp connection accepted");
        let upgrade = Upgrade {
            stream,
            response_headers: self.response_headers.clone(),
        };
        self.transport.accept(upgrade).await
    }
}

// ---------------------------------------------------------------------------
// WebSocketConn
// ---------------------------------------------------------------------------

struct Inner {
    endpoints: Endpoints,
    local_addr: Addr,
    remote_addr: Addr,
    remote_header: HeaderMap,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.endpoints.shutdown.close_local("connection dropped");
    }
}

/// A single WebSocket connection.
#[derive(Clone)]
pub struct WebSocketConn {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WebSocketConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConn")
            .field("local_addr", &self.inner.local_addr)
            .field("remote_addr", &self.inner.remote_addr)
            .finish_non_exhaustive()
    }
}

impl WebSocketConn {
    fn spawn<S>(
        ws: WebSocketStream<S>,
        local_addr: Addr,
        remote_addr: Addr,
        remote_header: HeaderMap,
        capacity: usize,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (endpoints, substrate) = Endpoints::new(capacity);
        let (sink, stream) = ws.split();
        tokio::spawn(read_loop(
            stream,
            substrate.inbound,
            Arc::clone(&endpoints.shutdown),
        ));
        tokio::spawn(write_loop(
            sink,
            substrate.outbound,
            Arc::clone(&endpoints.shutdown),
        ));
        Self {
            inner: Arc::new(Inner {
                endpoints,
                local_addr,
                remote_addr,
                remote_header,
            }),
        }
    }

    /// Returns `true` once the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.endpoints.shutdown.is_closed()
    }
}

async fn read_loop<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    inbound: mpsc::Sender<Frame>,
    shutdown: Arc<Shutdown>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let msg = tokio::select! {
            biased;
            _ = shutdown.closed() => return,
            msg = stream.next() => msg,
        };
        let frame = match msg {
            Some(Ok(Message::Text(text))) => {
                Frame::text(Bytes::copy_from_slice(text.as_bytes()))
            }
            Some(Ok(Message::Binary(data))) => Frame::binary(data),
            Some(Ok(Message::Close(_))) | None => {
                tracing::debug!("websocket closed by peer");
                shutdown.close_remote("websocket closed by peer");
                return;
            }
            Some(Ok(_)) => continue, // ping/pong/raw frame
            Some(Err(e)) => {
                tracing::warn!(error = %e, "websocket read failed");
                shutdown.close_remote(format!("websocket error: {e}"));
                return;
            }
        };
        tokio::select! {
            biased;
            _ = shutdown.closed() => return,
            sent = inbound.send(frame) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbound: mpsc::Receiver<Outgoing>,
    shutdown: Arc<Shutdown>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let out = tokio::select! {
            biased;
            _ = shutdown.closed() => break,
            out = outbound.recv() => match out {
                Some(out) => out,
                None => break,
            },
        };
        let msg = match out.frame.frame_type {
            FrameType::Binary => Message::Binary(out.frame.data.clone()),
            FrameType::Text => match String::from_utf8(out.frame.data.to_vec()) {
                Ok(text) => Message::Text(text.into()),
                Err(_) => {
                    out.complete(Err(TransportError::InvalidFrame(
                        "text frame payload is not valid UTF-8".into(),
                    )));
                    continue;
                }
            },
        };
        match sink.send(msg).await {
            Ok(()) => out.complete(Ok(())),
            Err(e) => {
                tracing::warn!(error = %e, "websocket write failed");
                shutdown.close_remote(format!("websocket error: {e}"));
                out.complete(Err(TransportError::WebSocket(Box::new(e))));
                break;
            }
        }
    }

    // Best effort: tell the peer we're gone.
    let _ = sink.close().await;

    outbound.close();
    while let Ok(out) = outbound.try_recv() {
        let err = shutdown
            .error()
            .unwrap_or_else(|| TransportError::ConnectionClosed("websocket closed".into()));
        out.complete(Err(err));
    }
}

impl Conn for WebSocketConn {
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
        if self.inner.endpoints.shutdown.close_local("closed locally") {
            tracing::debug!(remote = %self.inner.remote_addr, "websocket closed");
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
        self.inner.remote_header.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WebSocketConfig::default();
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.channel_capacity, 128);
    }

    #[tokio::test]
    async fn test_dial_rejects_unknown_scheme() {
        let transport = WebSocketTransport::default();
        let url = Url::parse("ftp://127.0.0.1/").unwrap();
        let err = transport.dial(url, HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_dial_refused_has_no_status() {
        // Bind and drop to get a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap();
        let err = WebSocketTransport::default()
            .dial(url, HeaderMap::new())
            .await
            .unwrap_err();
        match err {
            TransportError::Dial(dial) => assert!(dial.status.is_none()),
            other => panic!("expected dial error, got {other:?}"),
        }
    }
}
