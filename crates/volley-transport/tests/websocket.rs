//! Integration tests for the WebSocket transport.
//!
//! These tests run a real listener and dial it over loopback, so frames
//! actually cross a socket. A raw tokio-tungstenite client is used where
//! we need to see exactly what went over the wire.

#[cfg(feature = "websocket")]
mod websocket {
    use std::io::Read;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use http::{HeaderMap, HeaderValue};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_tungstenite::tungstenite::Message;
    use url::Url;
    use volley_transport::{
        Conn, FrameType, PacketType, Transport, TransportError, WebSocketConn,
        WebSocketListener, WebSocketTransport,
    };

    /// Binds a listener on a random port and returns it with its URL.
    async fn listen() -> (WebSocketListener, Url) {
        let mut headers = HeaderMap::new();
        headers.insert("x-eio-test", HeaderValue::from_static("server"));
        let listener = WebSocketListener::bind("127.0.0.1:0", WebSocketTransport::default())
            .await
            .expect("should bind")
            .with_response_headers(headers);
        let addr = listener.local_addr().unwrap();
        let url = Url::parse(&format!("http://{addr}/eio/")).unwrap();
        (listener, url)
    }

    /// Dials `url` with our own transport and accepts the other end.
    async fn pair() -> (WebSocketConn, WebSocketConn) {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move { listener.accept().await.expect("should accept") });

        let mut headers = HeaderMap::new();
        headers.insert("x-eio-test", HeaderValue::from_static("client"));
        let client = WebSocketTransport::default()
            .dial(url, headers)
            .await
            .expect("should dial");
        let server = server.await.unwrap();
        (client, server)
    }

    async fn send(conn: &WebSocketConn, frame_type: FrameType, data: &[u8]) {
        let mut w = conn
            .next_writer(frame_type, PacketType::Message)
            .await
            .expect("writer");
        w.write_bytes(data);
        w.close().await.expect("commit");
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (client, server) = pair().await;

        send(&client, FrameType::Text, b"hello").await;
        send(&client, FrameType::Binary, &[1, 2, 3]).await;

        let mut r = server.next_reader().await.unwrap();
        assert_eq!(r.frame_type(), FrameType::Text);
        assert_eq!(r.packet_type(), PacketType::Message);
        let mut text = String::new();
        r.read_to_string(&mut text).unwrap();
        assert_eq!(text, "hello");
        r.close();

        let r = server.next_reader().await.unwrap();
        assert_eq!(r.frame_type(), FrameType::Binary);
        assert_eq!(&r.data()[..], &[1, 2, 3]);
        r.close();

        send(&server, FrameType::Text, b"back").await;
        let r = client.next_reader().await.unwrap();
        assert_eq!(&r.into_data()[..], b"back");
    }

    #[tokio::test]
    async fn test_addresses_and_headers() {
        let (client, server) = pair().await;

        assert_eq!(client.remote_addr(), server.local_addr());
        assert_eq!(server.remote_addr(), client.local_addr());
        assert_eq!(server.remote_addr().network(), "tcp");

        assert_eq!(server.remote_header()["x-eio-test"], "client");
        assert_eq!(client.remote_header()["x-eio-test"], "server");
    }

    #[tokio::test]
    async fn test_dial_stamps_transport_query() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move { listener.accept().await });

        // A raw server would be needed to see the URL, so check the
        // effect instead: the handshake succeeds with the rewritten scheme.
        let client = WebSocketTransport::default()
            .dial(url, HeaderMap::new())
            .await
            .expect("http:// must be rewritten to ws://");
        assert!(server.await.unwrap().is_ok());
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_wire_format_is_one_message_per_frame() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move { listener.accept().await.unwrap() });

        let ws_url = format!("ws://{}{}", url.authority(), url.path());
        let (mut raw, _) = tokio_tungstenite::connect_async(ws_url).await.unwrap();
        let server = server.await.unwrap();

        send(&server, FrameType::Text, b"hi").await;
        send(&server, FrameType::Binary, &[7]).await;

        let first = raw.next().await.unwrap().unwrap();
        assert_eq!(first, Message::Text("4hi".into()));
        let second = raw.next().await.unwrap().unwrap();
        assert_eq!(second, Message::Binary(vec![b'4', 7].into()));

        raw.send(Message::Text("2probe".into())).await.unwrap();
        let r = server.next_reader().await.unwrap();
        assert_eq!(r.packet_type(), PacketType::Ping);
        assert_eq!(&r.data()[..], b"probe");
    }

    #[tokio::test]
    async fn test_peer_close_ends_reads() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move { listener.accept().await.unwrap() });

        let ws_url = format!("ws://{}{}", url.authority(), url.path());
        let (mut raw, _) = tokio_tungstenite::connect_async(ws_url).await.unwrap();
        let server = server.await.unwrap();

        raw.send(Message::Text("4last".into())).await.unwrap();
        raw.send(Message::Close(None)).await.unwrap();

        // Frames that arrived before the close are still delivered.
        let r = server.next_reader().await.unwrap();
        assert_eq!(&r.data()[..], b"last");
        r.close();

        let err = server.next_reader().await.unwrap_err();
        assert!(err.is_closed(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_local_close_unblocks_pending_read() {
        let (client, _server) = pair().await;
        let reader = client.clone();
        let pending = tokio::spawn(async move { reader.next_reader().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        client.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("read must return after close")
            .unwrap();
        assert!(matches!(result, Err(TransportError::ConnectionClosed(_))));

        // Closing twice is fine; writing afterwards is not.
        client.close().await.unwrap();
        assert!(client
            .next_writer(FrameType::Text, PacketType::Message)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_rejected_handshake_reports_status_and_headers() {
        // A plain HTTP server that refuses every upgrade.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            stream
                .write_all(
                    b"HTTP/1.1 403 Forbidden\r\nX-Reason: not allowed\r\nContent-Length: 0\r\n\r\n",
                )
                .await
                .unwrap();
        });

        let url = Url::parse(&format!("http://{addr}/eio/")).unwrap();
        let err = WebSocketTransport::default()
            .dial(url, HeaderMap::new())
            .await
            .unwrap_err();
        let TransportError::Dial(dial) = err else {
            panic!("expected a dial error, got {err:?}");
        };
        assert_eq!(dial.status.map(|s| s.as_u16()), Some(403));
        assert_eq!(dial.headers["x-reason"], "not allowed");
    }
}
