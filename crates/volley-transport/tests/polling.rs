//! Integration tests for the HTTP long-polling transport.
//!
//! A real hyper server hosts a [`PollingServer`]; clients are either our
//! own [`ClientConn`] or raw `reqwest` calls when the exact HTTP exchange
//! matters.

#[cfg(feature = "polling")]
mod polling {
    use std::convert::Infallible;
    use std::io::Read;
    use std::net::SocketAddr;
    use std::sync::OnceLock;
    use std::time::Duration;

    use http::{HeaderMap, HeaderValue, StatusCode};
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;
    use url::Url;
    use volley_transport::polling::{ClientConn, ServerConn, SID_HEADER};
    use volley_transport::{
        Conn, FrameType, PacketType, PollingConfig, PollingServer, PollingTransport,
        TransportError,
    };

    fn init_tracing() {
        static ONCE: OnceLock<()> = OnceLock::new();
        ONCE.get_or_init(|| {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
                )
                .with_test_writer()
                .init();
        });
    }

    // -- Test server harness ------------------------------------------------

    async fn start(config: PollingConfig) -> (SocketAddr, PollingServer) {
        init_tracing();
        let server = PollingServer::new(PollingTransport::new(config));
        let tcp = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = tcp.local_addr().expect("local_addr");

        let accept_server = server.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, peer)) = tcp.accept().await else {
                    break;
                };
                let server = accept_server.clone();
                tokio::spawn(async move {
                    let service = hyper::service::service_fn(move |req| {
                        let server = server.clone();
                        async move { Ok::<_, Infallible>(server.handle(req, peer).await) }
                    });
                    let conn = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service);
                    if let Err(e) = conn.await {
                        tracing::debug!("http connection from {peer} ended: {e}");
                    }
                });
            }
        });

        (addr, server)
    }

    fn fast() -> PollingConfig {
        PollingConfig {
            poll_timeout: Duration::from_millis(300),
            ..PollingConfig::default()
        }
    }

    /// Dials and resumes a client, then accepts the matching session.
    async fn connect(query: &str) -> (ClientConn, ServerConn, PollingServer) {
        connect_with(query, fast()).await
    }

    async fn connect_with(
        query: &str,
        config: PollingConfig,
    ) -> (ClientConn, ServerConn, PollingServer) {
        let (addr, server) = start(config.clone()).await;
        let url = Url::parse(&format!("http://{addr}/eio/{query}")).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-eio-test", HeaderValue::from_static("client"));
        let client = PollingTransport::new(config)
            .dial_client(url, headers)
            .expect("dial");
        client.resume();

        let conn = tokio::time::timeout(Duration::from_secs(2), server.accept())
            .await
            .expect("session must open")
            .expect("server alive");
        (client, conn, server)
    }

    async fn send<C: Conn>(conn: &C, frame_type: FrameType, data: &[u8]) {
        let mut w = conn
            .next_writer(frame_type, PacketType::Message)
            .await
            .expect("writer");
        w.write_bytes(data);
        w.close().await.expect("commit");
    }

    async fn send_packet<C: Conn>(
        conn: &C,
        frame_type: FrameType,
        packet_type: PacketType,
        data: &[u8],
    ) {
        let mut w = conn.next_writer(frame_type, packet_type).await.expect("writer");
        w.write_bytes(data);
        w.close().await.expect("commit");
    }

    async fn recv_packet<C: Conn>(conn: &C) -> (FrameType, PacketType, Vec<u8>) {
        let r = tokio::time::timeout(Duration::from_secs(2), conn.next_reader())
            .await
            .expect("packet must arrive")
            .expect("reader");
        (r.frame_type(), r.packet_type(), r.into_data().to_vec())
    }

    async fn recv<C: Conn>(conn: &C) -> (FrameType, Vec<u8>) {
        let mut r = tokio::time::timeout(Duration::from_secs(2), conn.next_reader())
            .await
            .expect("frame must arrive")
            .expect("reader");
        let mut data = Vec::new();
        r.read_to_end(&mut data).unwrap();
        (r.frame_type(), data)
    }

    async fn exchange(query: &str) {
        let (client, server, _table) = connect(query).await;

        send(&client, FrameType::Text, b"hello").await;
        send(&client, FrameType::Binary, &[1, 2, 3, 4]).await;
        assert_eq!(recv(&server).await, (FrameType::Text, b"hello".to_vec()));
        assert_eq!(recv(&server).await, (FrameType::Binary, vec![1, 2, 3, 4]));

        send(&server, FrameType::Binary, &[0, 255]).await;
        send(&server, FrameType::Text, "héllo".as_bytes()).await;
        assert_eq!(recv(&client).await, (FrameType::Binary, vec![0, 255]));
        assert_eq!(recv(&client).await, (FrameType::Text, "héllo".as_bytes().to_vec()));

        client.close().await.unwrap();
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_exchange_in_binary_mode() {
        exchange("").await;
    }

    #[tokio::test]
    async fn test_exchange_in_b64_mode() {
        exchange("?b64=1").await;
    }

    fn mixed() -> Vec<(FrameType, PacketType, Vec<u8>)> {
        vec![
            (FrameType::Text, PacketType::Open, Vec::new()),
            (FrameType::Text, PacketType::Message, b"hello".to_vec()),
            (FrameType::Binary, PacketType::Message, vec![1, 2, 3, 4]),
        ]
    }

    async fn mixed_exchange(query: &str) {
        let (client, server, _table) = connect(query).await;

        for (ft, pt, data) in mixed() {
            send_packet(&client, ft, pt, &data).await;
        }
        for expected in mixed() {
            assert_eq!(recv_packet(&server).await, expected);
        }

        for (ft, pt, data) in mixed() {
            send_packet(&server, ft, pt, &data).await;
        }
        for expected in mixed() {
            assert_eq!(recv_packet(&client).await, expected);
        }
    }

    #[tokio::test]
    async fn test_mixed_packets_in_binary_mode() {
        mixed_exchange("").await;
    }

    #[tokio::test]
    async fn test_mixed_packets_in_b64_mode() {
        mixed_exchange("?b64=1").await;
    }

    #[tokio::test]
    async fn test_addresses_and_headers() {
        let (client, server, _table) = connect("").await;
        send(&client, FrameType::Text, b"x").await;
        recv(&server).await;

        assert_eq!(server.local_addr(), client.remote_addr());
        assert!(client.local_addr().is_empty());
        assert!(!server.remote_addr().is_empty());
        assert_eq!(server.remote_header()["x-eio-test"], "client");
        assert_eq!(
            client.remote_header()[SID_HEADER],
            server.id().to_hex().as_str()
        );
        assert_eq!(client.session_id(), Some(server.id().to_hex()));
    }

    #[tokio::test]
    async fn test_keepalive_noops_are_invisible() {
        let (client, server, _table) = connect("").await;

        // Let a few polls time out before anything is written.
        tokio::time::sleep(Duration::from_millis(700)).await;
        send(&server, FrameType::Text, b"late").await;
        let (_, data) = recv(&client).await;
        assert_eq!(data, b"late");
    }

    #[tokio::test]
    async fn test_server_close_ends_client_reads() {
        let (client, server, _table) = connect("").await;
        server.close().await.unwrap();

        let err = tokio::time::timeout(Duration::from_secs(2), client.next_reader())
            .await
            .expect("client must notice the close")
            .unwrap_err();
        assert!(err.is_closed(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_departed_client_session_expires() {
        let config = PollingConfig {
            poll_timeout: Duration::from_millis(100),
            session_timeout: Duration::from_millis(300),
            ..PollingConfig::default()
        };
        let (client, server, table) = connect_with("", config).await;
        send(&client, FrameType::Text, b"bye").await;
        assert_eq!(recv(&server).await, (FrameType::Text, b"bye".to_vec()));

        client.close().await.unwrap();
        drop(client);

        let err = tokio::time::timeout(Duration::from_secs(2), server.next_reader())
            .await
            .expect("server must give up on a silent client")
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed(_)), "got {err:?}");
        assert!(server.is_closed());

        assert_eq!(table.sweep().await, 1);
        assert_eq!(table.len().await, 0);
    }

    #[tokio::test]
    async fn test_busy_session_outlives_session_timeout() {
        let config = PollingConfig {
            poll_timeout: Duration::from_millis(100),
            session_timeout: Duration::from_millis(300),
            ..PollingConfig::default()
        };
        let (client, server, _table) = connect_with("", config).await;

        // The client keeps polling, so the session stays open.
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(!server.is_closed());
        send(&server, FrameType::Text, b"still here").await;
        assert_eq!(recv(&client).await, (FrameType::Text, b"still here".to_vec()));
    }

    #[tokio::test]
    async fn test_raw_exchange_codes() {
        let (addr, _server) = start(fast()).await;
        let http = reqwest::Client::new();
        let base = format!("http://{addr}/eio/?transport=polling");

        // Opening poll answers right away with a noop and the session id.
        let resp = http.get(&base).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let sid = resp.headers()[SID_HEADER].to_str().unwrap().to_string();
        assert_eq!(&resp.bytes().await.unwrap()[..], b"01:6");

        let with_sid = format!("{base}&sid={sid}");

        // A held poll plus a second one: the second is refused.
        let held = tokio::spawn({
            let http = http.clone();
            let url = with_sid.clone();
            async move { http.get(url).send().await.unwrap().status() }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = http.get(&with_sid).send().await.unwrap();
        assert_eq!(second.status(), StatusCode::BAD_REQUEST);
        assert_eq!(held.await.unwrap(), StatusCode::OK);

        // Garbage body.
        let resp = http.post(&with_sid).body("nonsense").send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        // Unknown session.
        let unknown = format!("{base}&sid={}", "0".repeat(32));
        let resp = http.get(&unknown).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        // Other methods.
        let resp = http.put(&with_sid).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_oversized_post_is_refused() {
        let config = PollingConfig {
            max_body_size: 16,
            ..fast()
        };
        let (addr, _server) = start(config).await;
        let http = reqwest::Client::new();
        let base = format!("http://{addr}/eio/?transport=polling");
        let sid = http.get(&base).send().await.unwrap().headers()[SID_HEADER]
            .to_str()
            .unwrap()
            .to_string();

        let resp = http
            .post(format!("{base}&sid={sid}"))
            .body(vec![b'0'; 64])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
