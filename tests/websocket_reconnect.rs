//! End-to-end tests against a real WebSocket server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use stream_guard::error::ErrorKind;
use stream_guard::stream::{DisconnectReason, StreamEvent, StreamManager, StreamSettings};
use stream_guard::transport::{Connector, WebSocketConnector};

mod common;
use common::{next_event, registry, settings, start_ws_server};

fn fast_settings() -> StreamSettings {
    StreamSettings {
        initial_backoff: Duration::from_millis(50),
        max_backoff: Duration::from_millis(200),
        ..settings()
    }
}

#[tokio::test]
async fn test_stream_survives_server_side_close() {
    let addr = start_ws_server(|index, mut ws| async move {
        if index == 0 {
            let _ = ws.send(Message::text("one")).await;
            let _ = ws.send(Message::binary(b"two".to_vec())).await;
            let _ = ws.close(None).await;
        } else {
            let _ = ws.send(Message::text("three")).await;
            while let Some(Ok(message)) = ws.next().await {
                if message.is_close() {
                    break;
                }
            }
        }
    })
    .await;

    let connector =
        WebSocketConnector::new(&format!("ws://{}/feed", addr), Duration::from_secs(5)).unwrap();
    let registry = registry(5);
    let (handle, mut events) =
        StreamManager::new("market_stream", connector, fast_settings(), &registry).start();

    let run = async {
        assert!(matches!(next_event(&mut events).await, StreamEvent::Connected { .. }));
        assert_eq!(next_event(&mut events).await, StreamEvent::Message(b"one".to_vec()));
        assert_eq!(next_event(&mut events).await, StreamEvent::Message(b"two".to_vec()));
        assert!(matches!(next_event(&mut events).await, StreamEvent::Error { .. }));
        assert_eq!(
            next_event(&mut events).await,
            StreamEvent::Disconnected {
                reason: DisconnectReason::RemoteClosed
            }
        );
        assert!(matches!(
            next_event(&mut events).await,
            StreamEvent::Reconnecting { attempt: 1, .. }
        ));
        assert!(matches!(next_event(&mut events).await, StreamEvent::Connected { .. }));
        assert_eq!(next_event(&mut events).await, StreamEvent::Message(b"three".to_vec()));
        assert!(handle.is_healthy());

        handle.disconnect().await;
        assert_eq!(
            next_event(&mut events).await,
            StreamEvent::Disconnected {
                reason: DisconnectReason::Requested
            }
        );
    };
    tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("stream test timed out");

    let stats = handle.stats();
    assert_eq!(stats.total_connections, 2);
    assert_eq!(stats.total_messages_received, 3);
    assert_eq!(stats.circuit_breaker.total_failures, 1);
}

#[tokio::test]
async fn test_refused_connection_is_classified() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connector =
        WebSocketConnector::new(&format!("ws://{}/feed", addr), Duration::from_secs(5)).unwrap();
    let err = connector.connect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
}

#[tokio::test]
async fn test_wss_attempts_tls_handshake() {
    // Accepts TCP and hangs up, so the TLS handshake sees an early EOF.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            drop(socket);
        }
    });

    let connector =
        WebSocketConnector::new(&format!("wss://{}/feed", addr), Duration::from_secs(5)).unwrap();
    let err = connector.connect().await.unwrap_err();
    assert_ne!(err.kind(), ErrorKind::InvalidRequest, "wss rejected as unsupported: {}", err);
    assert!(err.kind().is_transient(), "unexpected error: {}", err);
}

#[tokio::test]
async fn test_unreachable_endpoint_fails_after_budget() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connector =
        WebSocketConnector::new(&format!("ws://{}/feed", addr), Duration::from_secs(5)).unwrap();
    let registry = registry(100);
    let settings = StreamSettings {
        max_reconnect_attempts: 1,
        ..fast_settings()
    };
    let (handle, _events) = StreamManager::new("market_stream", connector, settings, &registry).start();

    let err = tokio::time::timeout(Duration::from_secs(10), handle.closed())
        .await
        .expect("stream never gave up")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReconnectExhausted);
    assert_eq!(handle.stats().total_errors, 2);
}
