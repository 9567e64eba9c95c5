// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! acp-socket
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Best-effort operational alerting.
pub mod alert;

use alert::Alerter;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use serde::Deserialize;
use serde_json::{Value, json};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A seller-scoped event from the push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    /// The backend acknowledged our wallet subscription.
    RoomJoined,
    /// A job needs seller action (accept / payment request).
    NewTask(Value),
    /// A job is ready for execution/delivery.
    Evaluate(Value),
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Settings for the push channel.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// WebSocket endpoint (`ws://` / `wss://`).
    pub url: String,
    /// Wallet address used as the authentication credential.
    pub wallet_address: String,
    /// First reconnect delay.
    pub reconnect_base: Duration,
    /// Reconnect delay ceiling.
    pub reconnect_max: Duration,
    /// Outage duration that opens an incident.
    pub disconnect_alert_threshold: Duration,
    /// Consecutive failed reconnect attempts that open an incident.
    pub failed_reconnect_threshold: u32,
    /// Cadence of the connected/disconnected heartbeat log line.
    pub heartbeat_interval: Duration,
    /// Cadence of the outage monitor.
    pub monitor_interval: Duration,
}

impl SocketConfig {
    /// Config for a backend base URL (`http(s)://...`), with default timing.
    #[must_use]
    pub fn for_backend(base_url: &str, wallet_address: impl Into<String>) -> Self {
        Self {
            url: ws_url(base_url),
            wallet_address: wallet_address.into(),
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
            disconnect_alert_threshold: Duration::from_secs(120),
            failed_reconnect_threshold: 3,
            heartbeat_interval: Duration::from_secs(30),
            monitor_interval: Duration::from_secs(5),
        }
    }

    /// Incident identity for alert trigger/resolve pairs.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        format!("acp-seller-socket-{}", self.wallet_address)
    }
}

/// Derive the push-channel URL from a backend base URL.
#[must_use]
pub fn ws_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}/ws")
}

// ---------------------------------------------------------------------------
// Connection health
// ---------------------------------------------------------------------------

/// Shared connection-health state, updated by the pump loop and read by the
/// monitor and heartbeat loops.
#[derive(Debug, Default)]
pub struct ConnHealth {
    connected: AtomicBool,
    disconnected_since: Mutex<Option<Instant>>,
    failed_attempts: AtomicU32,
    incident_open: AtomicBool,
}

impl ConnHealth {
    /// Fresh state: not yet connected, no outage recorded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the channel is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// How long the channel has been down, measured from the first
    /// disconnect moment of the current outage.
    #[must_use]
    pub fn disconnected_for(&self) -> Option<Duration> {
        self.disconnected_since
            .lock()
            .expect("health lock poisoned")
            .map(|since| since.elapsed())
    }

    /// Consecutive failed reconnect attempts in the current outage.
    #[must_use]
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts.load(Ordering::SeqCst)
    }

    /// Record a successful connect. Returns `true` when an incident was open
    /// and the caller should emit a resolve.
    pub fn note_connected(&self) -> bool {
        self.connected.store(true, Ordering::SeqCst);
        self.failed_attempts.store(0, Ordering::SeqCst);
        *self.disconnected_since.lock().expect("health lock poisoned") = None;
        self.incident_open.swap(false, Ordering::SeqCst)
    }

    /// Record a disconnect. The outage start is kept from the first call of
    /// the current outage.
    pub fn note_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let mut since = self.disconnected_since.lock().expect("health lock poisoned");
        since.get_or_insert_with(Instant::now);
    }

    /// Record a failed reconnect attempt, returning the new count.
    pub fn note_connect_failed(&self) -> u32 {
        self.note_disconnected();
        self.failed_attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Atomically open the incident. Returns `true` only for the caller that
    /// actually opened it, deduplicating triggers within one outage.
    pub fn open_incident(&self) -> bool {
        !self.incident_open.swap(true, Ordering::SeqCst)
    }
}

/// One monitor pass: open an incident (and trigger the alerter once) when the
/// current outage has crossed either threshold.
pub async fn monitor_tick(health: &ConnHealth, alerter: &dyn Alerter, config: &SocketConfig) {
    if health.is_connected() {
        return;
    }
    let over_duration = health
        .disconnected_for()
        .is_some_and(|d| d >= config.disconnect_alert_threshold);
    let over_failures = health.failed_attempts() >= config.failed_reconnect_threshold;
    if (over_duration || over_failures) && health.open_incident() {
        let summary = format!(
            "ACP seller push channel down for wallet {} (failed attempts: {})",
            config.wallet_address,
            health.failed_attempts(),
        );
        alerter.trigger(&summary, &config.dedup_key()).await;
    }
}

// ---------------------------------------------------------------------------
// Wire envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
    #[serde(default, rename = "ackId")]
    ack_id: Option<u64>,
}

/// A decoded incoming frame: the seller-scoped event (if recognized) and the
/// ack the sender expects.
#[derive(Debug, PartialEq)]
pub struct DecodedFrame {
    /// Recognized event, `None` for event kinds this listener ignores.
    pub event: Option<SocketEvent>,
    /// Acknowledgement id to answer, when the sender asked for one.
    pub ack_id: Option<u64>,
}

/// Decode one text frame from the push channel.
pub fn decode_frame(text: &str) -> Result<DecodedFrame, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let event = match envelope.event.as_str() {
        "roomJoined" => Some(SocketEvent::RoomJoined),
        "onNewTask" => Some(SocketEvent::NewTask(envelope.data)),
        "onEvaluate" => Some(SocketEvent::Evaluate(envelope.data)),
        other => {
            debug!(target: "acp.socket", event = other, "ignoring unhandled event kind");
            None
        }
    };
    Ok(DecodedFrame {
        event,
        ack_id: envelope.ack_id,
    })
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// The push-channel listener: connects, authenticates, pumps events, and
/// keeps reconnecting until shut down.
pub struct SocketListener {
    config: SocketConfig,
    alerter: Arc<dyn Alerter>,
    events: mpsc::Sender<SocketEvent>,
    health: Arc<ConnHealth>,
}

impl SocketListener {
    /// Create a listener emitting into `events`.
    #[must_use]
    pub fn new(
        config: SocketConfig,
        alerter: Arc<dyn Alerter>,
        events: mpsc::Sender<SocketEvent>,
    ) -> Self {
        Self {
            config,
            alerter,
            events,
            health: Arc::new(ConnHealth::new()),
        }
    }

    /// Handle to the shared connection-health state.
    #[must_use]
    pub fn health(&self) -> Arc<ConnHealth> {
        Arc::clone(&self.health)
    }

    /// Run until the `shutdown` future completes.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        tokio::select! {
            () = &mut shutdown => {
                info!(target: "acp.socket", "push channel listener stopping");
            }
            () = self.pump_loop() => {}
            () = self.monitor_loop() => {}
            () = self.heartbeat_loop() => {}
        }
    }

    async fn pump_loop(&self) {
        let mut delay = self.config.reconnect_base;
        loop {
            match self.connect_and_pump().await {
                Ok(()) => {
                    // The connection was established and later closed; start
                    // the reconnect schedule from the base interval.
                    delay = self.config.reconnect_base;
                }
                Err(err) => {
                    let attempts = self.health.note_connect_failed();
                    warn!(
                        target: "acp.socket",
                        error = %err,
                        attempts,
                        "push channel connect failed"
                    );
                }
            }
            self.health.note_disconnected();
            sleep(delay).await;
            delay = (delay * 2).min(self.config.reconnect_max);
        }
    }

    /// Connect, authenticate, and pump frames until the connection ends.
    ///
    /// Returns `Err` only when the connect itself failed; a connection that
    /// was established and later dropped (including server-initiated close)
    /// returns `Ok` so the reconnect schedule restarts from the base delay.
    async fn connect_and_pump(&self) -> anyhow::Result<()> {
        let (ws, _) = connect_async(self.config.url.as_str()).await?;
        if self.health.note_connected() {
            self.alerter.resolve(&self.config.dedup_key()).await;
        }
        info!(target: "acp.socket", url = %self.config.url, "push channel connected");

        let (mut sink, mut stream) = ws.split();
        let auth = json!({ "walletAddress": self.config.wallet_address }).to_string();
        if let Err(err) = sink.send(Message::Text(auth.into())).await {
            warn!(target: "acp.socket", error = %err, "failed to send auth frame");
            return Ok(());
        }

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if !self.handle_text(&mut sink, text.as_str()).await {
                        return Ok(());
                    }
                }
                Ok(Message::Ping(payload)) => {
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Ok(Message::Close(_)) => {
                    info!(target: "acp.socket", "server closed push channel");
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(target: "acp.socket", error = %err, "push channel read failed");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Returns `false` when the event channel is gone and pumping should stop.
    async fn handle_text(&self, sink: &mut WsSink, text: &str) -> bool {
        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(target: "acp.socket", error = %err, "undecodable frame");
                return true;
            }
        };
        if let Some(ack_id) = frame.ack_id {
            let ack = json!({ "ackId": ack_id, "ok": true }).to_string();
            let _ = sink.send(Message::Text(ack.into())).await;
        }
        if let Some(event) = frame.event {
            if self.events.send(event).await.is_err() {
                warn!(target: "acp.socket", "event consumer dropped, stopping pump");
                return false;
            }
        }
        true
    }

    async fn monitor_loop(&self) {
        loop {
            sleep(self.config.monitor_interval).await;
            monitor_tick(&self.health, self.alerter.as_ref(), &self.config).await;
        }
    }

    async fn heartbeat_loop(&self) {
        loop {
            sleep(self.config.heartbeat_interval).await;
            let connected = self.health.is_connected();
            let down_ms = self
                .health
                .disconnected_for()
                .map(|d| d.as_millis() as u64);
            info!(
                target: "acp.socket",
                connected,
                down_ms,
                "push channel heartbeat"
            );
        }
    }
}
