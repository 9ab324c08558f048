//! Integration tests for the WebSocket transport.
//!
//! These spin up a real listener on an OS-assigned port and drive it
//! with a `tokio-tungstenite` client.

#[cfg(feature = "websocket")]
mod websocket {
    use futures_util::{SinkExt, StreamExt};
    use switchyard_transport::{
        CloseReason, Connection, Inbound, Transport, TransportConfig,
        TransportError, Upgrade, WebSocketConnection, WebSocketTransport,
    };
    use tokio_tungstenite::tungstenite::Message;

    type ClientWs = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    /// Binds a transport, connects one client, and returns both ends.
    async fn pair(config: TransportConfig) -> (WebSocketConnection, ClientWs) {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0", config)
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("local addr");

        let server = tokio::spawn(async move {
            let upgrade = transport.accept().await.expect("should accept");
            upgrade.complete().await.expect("handshake should succeed")
        });

        let (client, _) =
            tokio_tungstenite::connect_async(format!("ws://{addr}"))
                .await
                .expect("client should connect");
        let conn = server.await.expect("task should complete");
        (conn, client)
    }

    #[tokio::test]
    async fn test_send_and_receive_text() {
        let (conn, mut client) = pair(TransportConfig::default()).await;
        assert!(conn.remote_addr().ip().is_loopback());

        conn.send_text(r#"{"type":"hello"}"#)
            .await
            .expect("send should succeed");
        let msg = client.next().await.unwrap().unwrap();
        assert_eq!(msg.into_text().unwrap().as_str(), r#"{"type":"hello"}"#);

        client
            .send(Message::Text("from client".to_string().into()))
            .await
            .unwrap();
        let received = conn.recv().await.expect("recv").expect("data");
        assert_eq!(received, Inbound::Frame(b"from client".to_vec()));
    }

    #[tokio::test]
    async fn test_recv_classifies_binary_and_ping() {
        let (conn, mut client) = pair(TransportConfig::default()).await;

        client.send(Message::Ping(Default::default())).await.unwrap();
        client
            .send(Message::Binary(b"raw".to_vec().into()))
            .await
            .unwrap();

        assert_eq!(conn.recv().await.unwrap(), Some(Inbound::Ping));
        assert_eq!(
            conn.recv().await.unwrap(),
            Some(Inbound::Frame(b"raw".to_vec()))
        );
    }

    #[tokio::test]
    async fn test_recv_returns_none_on_client_close() {
        let (conn, mut client) = pair(TransportConfig::default()).await;

        client.send(Message::Close(None)).await.unwrap();

        let result = conn.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");
    }

    #[tokio::test]
    async fn test_ping_is_answered_with_pong() {
        let (conn, mut client) = pair(TransportConfig::default()).await;

        conn.ping().await.expect("ping should send");

        let reader = tokio::spawn(async move {
            let msg = client.next().await;
            // The queued pong goes out on the next flush.
            client.flush().await.unwrap();
            (client, msg)
        });
        let inbound = conn.recv().await.expect("recv").expect("pong");
        assert_eq!(inbound, Inbound::Pong);
        let (_client, msg) = reader.await.unwrap();
        assert!(matches!(msg, Some(Ok(Message::Ping(_)))));
    }

    #[tokio::test]
    async fn test_close_carries_code() {
        let (conn, mut client) = pair(TransportConfig::default()).await;

        conn.close(CloseReason::PolicyViolation("rate limited".into()))
            .await
            .expect("close should succeed");

        match client.next().await {
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(u16::from(frame.code), 1008);
                assert_eq!(frame.reason.as_str(), "rate limited");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oversized_message_rejected() {
        let config = TransportConfig {
            max_message_size: 64,
            ..TransportConfig::default()
        };
        let (conn, mut client) = pair(config).await;

        let big = "x".repeat(256);
        client.send(Message::Text(big.into())).await.unwrap();

        let err = conn.recv().await.expect_err("should reject");
        assert!(matches!(err, TransportError::MessageTooLarge { limit: 64 }));
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let transport =
            WebSocketTransport::bind("127.0.0.1:0", TransportConfig::default())
                .await
                .expect("should bind");
        let addr = transport.local_addr().unwrap().to_string();

        let second =
            WebSocketTransport::bind(&addr, TransportConfig::default()).await;
        assert!(matches!(second, Err(TransportError::BindFailed { .. })));
    }
}
