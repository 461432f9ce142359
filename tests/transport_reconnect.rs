//! Transport integration tests
//!
//! These run the real transport against a loopback WebSocket server:
//! envelope delivery, malformed-frame tolerance, the history ring, the
//! backoff-to-Failed path, and disconnect-as-cancellation.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use aegis_sync::{ConnectionState, ReconnectPolicy, Transport};

const WAIT: Duration = Duration::from_secs(5);

/// Spawn a loopback push server that sends `frames` to the first client,
/// then stays open until the client goes away.
async fn spawn_push_server(frames: Vec<String>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            let mut ws = accept_async(stream).await.unwrap();
            for frame in frames {
                ws.send(Message::Text(frame)).await.unwrap();
            }
            // Drain until the client disconnects
            while let Some(Ok(_)) = ws.next().await {}
        }
    });

    format!("ws://{}/ws/system", addr)
}

/// An address nothing is listening on.
async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}/ws/system", addr)
}

fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        base_delay: Duration::from_millis(10),
        max_attempts: 5,
    }
}

#[tokio::test]
async fn test_connect_delivers_parsed_envelopes() {
    let url = spawn_push_server(vec![
        r#"{"type":"scan_update","payload":{"id":1,"status":"running"}}"#.into(),
        "this is not json".into(),
        r#"{"type":"scan_update","payload":{"id":2,"status":"queued"}}"#.into(),
    ])
    .await;

    let transport = Transport::new(fast_policy());
    let mut envelopes = transport.subscribe_envelopes();

    timeout(WAIT, transport.connect(&url)).await.unwrap().unwrap();
    assert_eq!(transport.state(), ConnectionState::Connected);

    // The malformed middle frame is dropped without breaking the stream
    let first = timeout(WAIT, envelopes.recv()).await.unwrap().unwrap();
    assert_eq!(first.tag, "scan_update");
    assert_eq!(first.payload["id"], 1);

    let second = timeout(WAIT, envelopes.recv()).await.unwrap().unwrap();
    assert_eq!(second.payload["id"], 2);

    // Both parsed frames landed in the history ring, the bad one did not
    assert_eq!(transport.history_len(), 2);

    transport.disconnect();
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_is_idempotent_while_connected() {
    let url = spawn_push_server(Vec::new()).await;
    let transport = Transport::new(fast_policy());

    timeout(WAIT, transport.connect(&url)).await.unwrap().unwrap();
    // A second connect on an open channel resolves without reconnecting
    timeout(WAIT, transport.connect(&url)).await.unwrap().unwrap();
    assert_eq!(transport.state(), ConnectionState::Connected);

    transport.disconnect();
}

#[tokio::test]
async fn test_send_reaches_the_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<String>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let _ = tx.send(text);
                break;
            }
        }
    });

    let transport = Transport::new(fast_policy());
    timeout(WAIT, transport.connect(&format!("ws://{}/ws/system", addr)))
        .await
        .unwrap()
        .unwrap();

    assert!(transport.send(r#"{"type":"ping"}"#));
    let received = timeout(WAIT, rx).await.unwrap().unwrap();
    assert_eq!(received, r#"{"type":"ping"}"#);

    transport.disconnect();
}

#[tokio::test]
async fn test_backoff_exhaustion_reaches_failed() {
    let url = dead_url().await;
    let transport = Transport::new(fast_policy());

    let err = timeout(WAIT, transport.connect(&url)).await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        aegis_sync::SyncError::ConnectionExhausted { attempts: 5 }
    ));
    assert_eq!(transport.state(), ConnectionState::Failed);

    // Terminal: no further automatic attempts flip the state
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(transport.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn test_manual_connect_resets_after_failed() {
    let transport = Transport::new(fast_policy());

    let dead = dead_url().await;
    let _ = timeout(WAIT, transport.connect(&dead)).await.unwrap();
    assert_eq!(transport.state(), ConnectionState::Failed);

    // Explicit connect() resets the attempt counter and recovers
    let live = spawn_push_server(Vec::new()).await;
    timeout(WAIT, transport.connect(&live)).await.unwrap().unwrap();
    assert_eq!(transport.state(), ConnectionState::Connected);

    transport.disconnect();
}

#[tokio::test]
async fn test_disconnect_cancels_pending_reconnect() {
    let url = dead_url().await;
    let transport = Transport::new(ReconnectPolicy {
        base_delay: Duration::from_secs(30),
        max_attempts: 5,
    });

    let mut state_rx = transport.subscribe_state();
    // Kick off the driver without waiting for the (doomed) open
    let connect = transport.connect(&url);
    tokio::pin!(connect);

    // Wait until the first failure parks the driver in Reconnecting
    let reached = timeout(WAIT, async {
        loop {
            tokio::select! {
                _ = &mut connect => {}
                changed = state_rx.changed() => {
                    changed.unwrap();
                    if *state_rx.borrow() == ConnectionState::Reconnecting {
                        break;
                    }
                }
            }
        }
    })
    .await;
    assert!(reached.is_ok(), "driver never reached Reconnecting");

    transport.disconnect();
    assert_eq!(transport.state(), ConnectionState::Disconnected);

    // The 30s reconnect sleep was aborted with the driver, nothing
    // transitions the machine afterwards
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}
