//! Resilient WebSocket transport for the push channel
//!
//! Owns one logical push connection and hides reconnect mechanics from
//! callers. Consumers observe connection state through a `watch` channel
//! and parsed envelopes through a `broadcast` channel; they never touch
//! the socket.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──open──► Connected
//!      ▲                          ▲                    │
//!      │                          │ attempt <= max     │ close/error
//! disconnect()                Reconnecting ◄───────────┘
//!                                 │ attempt > max
//!                                 ▼
//!                               Failed   (terminal until connect() again)
//! ```
//!
//! Reconnects use linear backoff: attempt n sleeps `base_delay * n`. The
//! sleep lives inside the driver task, so aborting the driver (what
//! `disconnect()` does) is the single authoritative cancellation point.
//!
//! A malformed inbound frame is logged and discarded; it never tears down
//! the connection or propagates an error to the rest of the system.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::config::ReconnectPolicy;
use crate::error::{Result, SyncError};
use crate::protocol::Envelope;

/// Diagnostic history depth: the last N received envelopes
pub const HISTORY_CAP: usize = 100;

/// Connection state of the push channel, transport-owned and read-only
/// for everyone else
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Bounded ring of recently received envelopes, oldest evicted first
pub struct MessageHistory {
    entries: VecDeque<Envelope>,
    cap: usize,
}

impl MessageHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn push(&mut self, envelope: Envelope) {
        if self.entries.len() == self.cap {
            self.entries.pop_front();
        }
        self.entries.push_back(envelope);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest-first snapshot of the retained envelopes.
    pub fn snapshot(&self) -> Vec<Envelope> {
        self.entries.iter().cloned().collect()
    }
}

struct Shared {
    policy: ReconnectPolicy,
    state_tx: watch::Sender<ConnectionState>,
    envelope_tx: broadcast::Sender<Envelope>,
    history: Mutex<MessageHistory>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
}

impl Shared {
    /// Parse one inbound text frame; malformed frames are dropped here.
    fn ingest(&self, text: &str) {
        match Envelope::parse(text) {
            Ok(envelope) => {
                self.history.lock().push(envelope.clone());
                // No receivers is fine, the history ring still records it
                let _ = self.envelope_tx.send(envelope);
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame");
            }
        }
    }
}

/// The resilient push channel transport
pub struct Transport {
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    pub fn new(policy: ReconnectPolicy) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (envelope_tx, _) = broadcast::channel(256);
        Self {
            shared: Arc::new(Shared {
                policy,
                state_tx,
                envelope_tx,
                history: Mutex::new(MessageHistory::new(HISTORY_CAP)),
                outbound: Mutex::new(None),
            }),
            driver: Mutex::new(None),
        }
    }

    /// Open the push channel and keep it alive.
    ///
    /// Idempotent while a driver is already Connecting/Connected/
    /// Reconnecting: the call just waits for the open. Errors immediately
    /// on a URL that cannot initiate a WebSocket connection, and with
    /// [`SyncError::ConnectionExhausted`] if the retry budget runs out
    /// before an open ever succeeds. Calling after Failed resets the
    /// attempt counter and starts over.
    pub async fn connect(&self, url: &str) -> Result<()> {
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(SyncError::Transport {
                message: format!("push channel URL '{}' is not a ws:// or wss:// URL", url),
            });
        }

        let mut state_rx = self.shared.state_tx.subscribe();
        {
            let mut driver = self.driver.lock();
            let alive = driver.as_ref().is_some_and(|h| !h.is_finished());
            let busy = matches!(
                *self.shared.state_tx.borrow(),
                ConnectionState::Connecting
                    | ConnectionState::Connected
                    | ConnectionState::Reconnecting
            );
            if !(alive && busy) {
                if let Some(stale) = driver.take() {
                    stale.abort();
                }
                self.shared.state_tx.send_replace(ConnectionState::Connecting);
                let shared = Arc::clone(&self.shared);
                let url = url.to_string();
                *driver = Some(tokio::spawn(async move {
                    drive(shared, url).await;
                }));
            }
        }

        loop {
            match *state_rx.borrow_and_update() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Failed => {
                    return Err(SyncError::ConnectionExhausted {
                        attempts: self.shared.policy.max_attempts,
                    })
                }
                ConnectionState::Disconnected => {
                    return Err(SyncError::Transport {
                        message: "disconnected before the channel opened".into(),
                    })
                }
                ConnectionState::Connecting | ConnectionState::Reconnecting => {}
            }
            if state_rx.changed().await.is_err() {
                return Err(SyncError::Transport {
                    message: "transport dropped while connecting".into(),
                });
            }
        }
    }

    /// Send a text frame if the channel is Connected.
    ///
    /// Anything else is silently dropped, not queued; callers needing
    /// guaranteed delivery must buffer themselves. Returns whether the
    /// frame was handed to the socket writer.
    pub fn send(&self, text: impl Into<String>) -> bool {
        if self.state() != ConnectionState::Connected {
            tracing::debug!("dropping outbound frame, channel not connected");
            return false;
        }
        match self.shared.outbound.lock().as_ref() {
            Some(tx) => tx.send(Message::Text(text.into())).is_ok(),
            None => false,
        }
    }

    /// Tear the channel down unconditionally.
    ///
    /// Aborts the driver task, which cancels any pending reconnect sleep,
    /// and releases the socket.
    pub fn disconnect(&self) {
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
        *self.shared.outbound.lock() = None;
        self.shared
            .state_tx
            .send_replace(ConnectionState::Disconnected);
        tracing::info!("push channel disconnected");
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Watch connection-state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Receive parsed envelopes as they arrive.
    pub fn subscribe_envelopes(&self) -> broadcast::Receiver<Envelope> {
        self.shared.envelope_tx.subscribe()
    }

    /// Oldest-first snapshot of the diagnostic history ring.
    pub fn history(&self) -> Vec<Envelope> {
        self.shared.history.lock().snapshot()
    }

    pub fn history_len(&self) -> usize {
        self.shared.history.lock().len()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
    }
}

/// Connection driver: owns the socket, the reconnect loop, and the backoff
/// sleeps. Runs until the retry budget is exhausted or the task is aborted
/// by `disconnect()`.
async fn drive(shared: Arc<Shared>, url: String) {
    let mut attempt: u32 = 0;
    loop {
        shared.state_tx.send_replace(ConnectionState::Connecting);
        match connect_async(url.as_str()).await {
            Ok((ws, _response)) => {
                tracing::info!(%url, "push channel open");
                attempt = 0;
                shared.state_tx.send_replace(ConnectionState::Connected);
                run_session(&shared, ws).await;
                *shared.outbound.lock() = None;
                tracing::warn!(%url, "push channel closed unexpectedly");
            }
            Err(e) => {
                tracing::warn!(%url, error = %e, "push channel connect failed");
            }
        }

        attempt += 1;
        if !shared.policy.allows(attempt) {
            tracing::error!(
                %url,
                attempts = shared.policy.max_attempts,
                "reconnect budget exhausted, manual connect() required"
            );
            shared.state_tx.send_replace(ConnectionState::Failed);
            return;
        }
        shared.state_tx.send_replace(ConnectionState::Reconnecting);
        tokio::time::sleep(shared.policy.delay_for(attempt)).await;
    }
}

/// Pump one open socket until it closes: outbound frames from `send()`,
/// inbound frames into the history ring and the envelope broadcast.
async fn run_session(shared: &Arc<Shared>, ws: WebSocketStream<MaybeTlsStream<TcpStream>>) {
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    *shared.outbound.lock() = Some(tx);

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                match outgoing {
                    Some(msg) => {
                        if sink.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => shared.ingest(&text),
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("server closed the push channel");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "push channel read error");
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(n: usize) -> Envelope {
        Envelope::parse(&format!(r#"{{"type":"pong","payload":{{"n":{}}}}}"#, n)).unwrap()
    }

    #[test]
    fn test_history_ring_caps_at_limit() {
        let mut history = MessageHistory::new(HISTORY_CAP);
        for n in 1..=150 {
            history.push(envelope(n));
        }
        assert_eq!(history.len(), 100);
        // Oldest retained entry is push #51
        let snapshot = history.snapshot();
        assert_eq!(snapshot[0].payload["n"], 51);
        assert_eq!(snapshot[99].payload["n"], 150);
    }

    #[test]
    fn test_initial_state_is_disconnected() {
        let transport = Transport::new(ReconnectPolicy::default());
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert_eq!(transport.history_len(), 0);
    }

    #[test]
    fn test_send_while_disconnected_is_dropped() {
        let transport = Transport::new(ReconnectPolicy::default());
        assert!(!transport.send(r#"{"type":"ping"}"#));
    }

    #[tokio::test]
    async fn test_connect_rejects_non_ws_url() {
        let transport = Transport::new(ReconnectPolicy::default());
        let err = transport.connect("https://not-a-socket").await.unwrap_err();
        assert!(matches!(err, SyncError::Transport { .. }));
        // A rejected initiate leaves the machine alone
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_is_unconditional() {
        let transport = Transport::new(ReconnectPolicy::default());
        transport.disconnect();
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }
}
