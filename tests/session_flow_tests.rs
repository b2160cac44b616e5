//! End-to-end session scenarios against an in-process WebSocket server.

use futures::{SinkExt, StreamExt};
use oracle_live::config::{DEFAULT_MODEL, LiveBackend, SessionConfig};
use oracle_live::events::{CloseCause, ServerEvent, ToolResponse};
use oracle_live::transport::{SessionTransport, TransportState};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_async};

async fn bind() -> (TcpListener, LiveBackend) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("oracle_live=debug")
        .with_test_writer()
        .try_init();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = LiveBackend::endpoint(format!("ws://{}", listener.local_addr().unwrap()));
    (listener, backend)
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    accept_async(stream).await.unwrap()
}

/// Read `n` text messages, parsed as JSON envelopes.
async fn read_envelopes(ws: &mut WebSocketStream<TcpStream>, n: usize) -> Vec<Value> {
    let mut envelopes = Vec::new();
    while envelopes.len() < n {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                envelopes.push(serde_json::from_str(&text).unwrap());
            }
            Some(Ok(_)) => {}
            other => panic!("server expected a text message, got {:?}", other),
        }
    }
    envelopes
}

#[tokio::test]
async fn test_setup_precedes_queued_sends_in_fifo_order() {
    let (listener, backend) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        read_envelopes(&mut ws, 5).await
    });

    // Three sends before the connection even starts.
    let transport = SessionTransport::new();
    transport.send_text("first").await.unwrap();
    transport.send_text("second").await.unwrap();
    transport.send_text("third").await.unwrap();
    assert_eq!(transport.queued_len(), 3);
    assert_eq!(transport.state(), TransportState::Idle);

    transport.connect(&backend, DEFAULT_MODEL, &SessionConfig::new()).await.unwrap();
    assert_eq!(transport.state(), TransportState::Open);
    assert_eq!(transport.queued_len(), 0);

    // And one after open, which must come last.
    transport.send_text("fourth").await.unwrap();

    let received = server.await.unwrap();
    assert_eq!(received[0]["setup"]["model"], DEFAULT_MODEL);
    for (envelope, expected) in received[1..].iter().zip(["first", "second", "third", "fourth"]) {
        assert_eq!(envelope["clientContent"]["turns"][0]["parts"][0]["text"], expected);
        assert_eq!(envelope["clientContent"]["turnComplete"], true);
    }

    transport.disconnect().await;
}

#[tokio::test]
async fn test_tool_response_reaches_the_wire_correlated_by_id() {
    let (listener, backend) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        read_envelopes(&mut ws, 2).await
    });

    let transport = SessionTransport::new();
    transport.connect(&backend, DEFAULT_MODEL, &SessionConfig::new()).await.unwrap();
    transport
        .send_tool_response(&ToolResponse::new("abc123", "updateSpec", json!({"success": true})))
        .await
        .unwrap();

    let received = server.await.unwrap();
    let fr = &received[1]["toolResponse"]["functionResponses"][0];
    assert_eq!(fr["id"], "abc123");
    assert_eq!(fr["name"], "updateSpec");
    assert_eq!(fr["response"]["result"]["success"], true);

    transport.disconnect().await;
}

#[tokio::test]
async fn test_events_arrive_in_order_then_clean_close() {
    let (listener, backend) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        read_envelopes(&mut ws, 1).await; // setup

        ws.send(Message::Text(json!({"setupComplete": {}}).to_string().into())).await.unwrap();
        ws.send(Message::Text(
            json!({
                "serverContent": {
                    "modelTurn": { "parts": [
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AQIDBA==" } },
                        { "text": "What problem does it solve?" },
                    ]},
                    "turnComplete": true
                }
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();
        ws.send(Message::Text(
            json!({
                "toolCall": { "functionCalls": [
                    { "id": "call-1", "name": "updateSpec", "args": { "section": "overview" } }
                ]}
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();

        ws.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        })))
        .await
        .unwrap();
        // Drain until the peer finishes the close handshake.
        while let Some(Ok(_)) = ws.next().await {}
    });

    let transport = SessionTransport::new();
    transport.connect(&backend, DEFAULT_MODEL, &SessionConfig::new()).await.unwrap();

    assert_eq!(transport.next_event().await, Some(ServerEvent::SetupComplete));
    assert_eq!(
        transport.next_event().await,
        Some(ServerEvent::AudioDelta { data: vec![1, 2, 3, 4] })
    );
    assert_eq!(
        transport.next_event().await,
        Some(ServerEvent::TextDelta { text: "What problem does it solve?".to_string() })
    );
    assert_eq!(transport.next_event().await, Some(ServerEvent::TurnComplete));
    match transport.next_event().await {
        Some(ServerEvent::ToolCall(call)) => {
            assert_eq!(call.id, "call-1");
            assert_eq!(call.name, "updateSpec");
            assert_eq!(call.args["section"], "overview");
        }
        other => panic!("expected a tool call, got {:?}", other),
    }
    match transport.next_event().await {
        Some(ServerEvent::ConnectionClosed { code, cause, .. }) => {
            assert_eq!(code, 1000);
            assert_eq!(cause, CloseCause::Normal);
        }
        other => panic!("expected the close event, got {:?}", other),
    }
    assert_eq!(transport.next_event().await, None);

    server.await.unwrap();
}

#[tokio::test]
async fn test_quota_close_is_classified_and_later_sends_drop() {
    let (listener, backend) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        read_envelopes(&mut ws, 1).await; // setup

        ws.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Error,
            reason: "Quota exceeded for this API key".into(),
        })))
        .await
        .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let transport = SessionTransport::new();
    transport.connect(&backend, DEFAULT_MODEL, &SessionConfig::new()).await.unwrap();

    match transport.next_event().await {
        Some(ServerEvent::ConnectionClosed { code, reason, cause }) => {
            assert_eq!(code, 1011);
            assert!(reason.contains("Quota"));
            assert_eq!(cause, CloseCause::Quota);
        }
        other => panic!("expected the close event, got {:?}", other),
    }
    assert_eq!(transport.next_event().await, None);
    assert_eq!(transport.state(), TransportState::Closed);

    // The session is over; sends are silent no-ops and nothing queues.
    transport.send_text("too late").await.unwrap();
    assert_eq!(transport.queued_len(), 0);

    // The close event never fires twice, even through disconnect.
    transport.disconnect().await;
    assert_eq!(transport.next_event().await, None);

    server.await.unwrap();
}

#[tokio::test]
async fn test_abrupt_peer_drop_surfaces_abnormal_close() {
    let (listener, backend) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        read_envelopes(&mut ws, 1).await; // setup
        // Drop the socket with no close frame.
    });

    let transport = SessionTransport::new();
    transport.connect(&backend, DEFAULT_MODEL, &SessionConfig::new()).await.unwrap();
    server.await.unwrap();

    match transport.next_event().await {
        Some(ServerEvent::ConnectionClosed { cause, .. }) => {
            assert_eq!(cause, CloseCause::Error);
        }
        other => panic!("expected the close event, got {:?}", other),
    }
    assert_eq!(transport.next_event().await, None);
}

#[tokio::test]
async fn test_send_failure_surfaces_close_event_once() {
    let (listener, backend) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        read_envelopes(&mut ws, 1).await; // setup
        // Drop the socket with no close frame.
    });

    let transport = SessionTransport::new();
    transport.connect(&backend, DEFAULT_MODEL, &SessionConfig::new()).await.unwrap();
    server.await.unwrap();

    // The first few writes may land in the OS buffer; keep sending until
    // the dead connection surfaces.
    let mut send_failed = false;
    for _ in 0..100 {
        if transport.send_text("still there?").await.is_err() {
            send_failed = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(send_failed, "sends kept succeeding after the peer dropped");
    assert_eq!(transport.state(), TransportState::Closed);

    // The failure still surfaces as the session's one close event.
    match transport.next_event().await {
        Some(ServerEvent::ConnectionClosed { cause, .. }) => {
            assert_eq!(cause, CloseCause::Error);
        }
        other => panic!("expected the close event, got {:?}", other),
    }
    assert_eq!(transport.next_event().await, None);
}

#[tokio::test]
async fn test_connected_transport_is_single_use() {
    let (listener, backend) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        read_envelopes(&mut ws, 1).await; // setup
        while let Some(Ok(_)) = ws.next().await {}
    });

    let transport = SessionTransport::new();
    transport.connect(&backend, DEFAULT_MODEL, &SessionConfig::new()).await.unwrap();
    assert!(transport.connect(&backend, DEFAULT_MODEL, &SessionConfig::new()).await.is_err());

    transport.disconnect().await;
    assert!(transport.connect(&backend, DEFAULT_MODEL, &SessionConfig::new()).await.is_err());

    server.await.unwrap();
}
