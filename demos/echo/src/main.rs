use std::convert::Infallible;
use std::net::SocketAddr;

use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use volley::prelude::*;
use volley::transport::{
    PollingConfig, PollingServer, PollingTransport, TransportError, WebSocketListener,
    WebSocketTransport,
};

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// `["chat", Message]` from a client comes back as `["echo", Message]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub from: String,
    pub text: String,
    pub attachment: Option<Buffer>,
}
attachments!(Message { from, text, attachment });

// ---------------------------------------------------------------------------
// Echo loop
// ---------------------------------------------------------------------------

async fn echo<C: Conn>(socket: Socket<C>) {
    let peer = socket.remote_addr();
    tracing::info!(%peer, "client connected");

    loop {
        let event = match socket.recv().await {
            Ok(event) => event,
            Err(e) if e.is_closed() => break,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "dropping connection");
                break;
            }
        };
        if !matches!(
            event.header.packet_type,
            PacketType::Event | PacketType::BinaryEvent
        ) {
            continue;
        }

        let (name, mut msg) = match event.args::<(String, Message)>() {
            Ok(Some(args)) => args,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "ignoring malformed event");
                continue;
            }
        };
        tracing::debug!(%peer, %name, from = %msg.from, "echoing");

        let header = Header::new(PacketType::Event).with_namespace(event.header.namespace.clone());
        if let Err(e) = socket.emit(&header, &mut ("echo", &mut msg)).await {
            tracing::warn!(%peer, error = %e, "echo failed");
            break;
        }
    }

    let _ = socket.close().await;
    tracing::info!(%peer, "client disconnected");
}

// ---------------------------------------------------------------------------
// Server bootstrap
// ---------------------------------------------------------------------------

async fn run_websocket(listener: WebSocketListener) {
    loop {
        match listener.accept().await {
            Ok(conn) => {
                tokio::spawn(echo(Socket::new(conn)));
            }
            Err(e) => tracing::warn!(error = %e, "websocket accept failed"),
        }
    }
}

async fn run_polling(tcp: TcpListener, server: PollingServer) {
    let sessions = server.clone();
    tokio::spawn(async move {
        while let Some(conn) = sessions.accept().await {
            tokio::spawn(echo(Socket::new(conn)));
        }
    });

    loop {
        let (stream, peer) = match tcp.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "http accept failed");
                continue;
            }
        };
        let server = server.clone();
        tokio::spawn(async move {
            let service = hyper::service::service_fn(move |req| {
                let server = server.clone();
                async move { Ok::<_, Infallible>(server.handle(req, peer).await) }
            });
            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                tracing::debug!(%peer, error = %e, "http connection ended");
            }
        });
    }
}

/// Binds both servers and spawns their accept loops.
async fn start(
    ws_addr: &str,
    polling_addr: &str,
) -> Result<(SocketAddr, SocketAddr), TransportError> {
    let listener = WebSocketListener::bind(ws_addr, WebSocketTransport::default()).await?;
    let ws_local = listener.local_addr()?;

    let tcp = TcpListener::bind(polling_addr).await?;
    let polling_local = tcp.local_addr()?;
    let server = PollingServer::new(PollingTransport::new(PollingConfig::default()));

    tokio::spawn(run_websocket(listener));
    tokio::spawn(run_polling(tcp, server));
    Ok((ws_local, polling_local))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (ws, polling) = start("0.0.0.0:8080", "0.0.0.0:8081").await?;
    tracing::info!(%ws, %polling, "echo server listening");

    tokio::signal::ctrl_c().await?;
    Ok(())
}
