// src/sync/channel.rs

//! Push channel to the backend's realtime endpoint.
//!
//! Owns one logical WebSocket connection, its lifecycle state machine,
//! the keepalive probe and the reconnection policy. Parsed snapshots are
//! fanned out to subscribers; the channel itself never interprets them —
//! in particular it never decides whether the application is "connected",
//! it only reports transport-level open/closed/error.

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message, WebSocketStream};
use url::Url;

use crate::sync::status::{StatusSnapshot, LIVENESS_PROBE, LIVENESS_REPLY};

/// Backoff policy for reestablishing a lost transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive attempts before the channel gives up and stays
    /// `Disconnected` until an explicit `connect()`. `None` retries
    /// forever with capped backoff.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: Some(5),
        }
    }
}

impl ReconnectPolicy {
    /// Backoff before reconnect attempt `attempt` (1-based), or `None`
    /// once the attempt bound is exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }
        let base_ms = self.base_delay.as_millis() as u64;
        let factor = 1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX);
        let delay_ms = base_ms
            .saturating_mul(factor)
            .min(self.max_delay.as_millis() as u64);
        Some(Duration::from_millis(delay_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

struct Lifecycle {
    phase: ChannelPhase,
    /// Bumped on every connect/disconnect; a running task that observes a
    /// newer generation silently exits.
    generation: u64,
    shutdown: Option<watch::Sender<bool>>,
}

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<StatusSnapshot>,
}

struct ChannelInner {
    endpoint: Url,
    policy: ReconnectPolicy,
    keepalive: Duration,
    lifecycle: Mutex<Lifecycle>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_subscriber: AtomicU64,
}

/// Handle to the single logical push connection. Cheap to clone; all
/// clones share the same connection and subscriber registry.
#[derive(Clone)]
pub struct ConnectionChannel {
    inner: Arc<ChannelInner>,
}

/// A registered observer. Receives every successfully parsed snapshot;
/// dropping it (or calling `unsubscribe`) removes exactly this observer.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<StatusSnapshot>,
    inner: Arc<ChannelInner>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<StatusSnapshot> {
        self.rx.recv().await
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut subscribers = self.inner.subscribers.lock().unwrap();
        subscribers.retain(|s| s.id != self.id);
    }
}

impl ConnectionChannel {
    pub fn new(endpoint: Url, policy: ReconnectPolicy, keepalive: Duration) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                endpoint,
                policy,
                keepalive,
                lifecycle: Mutex::new(Lifecycle {
                    phase: ChannelPhase::Disconnected,
                    generation: 0,
                    shutdown: None,
                }),
                subscribers: Mutex::new(Vec::new()),
                next_subscriber: AtomicU64::new(0),
            }),
        }
    }

    /// Open the transport. A no-op while already `Connecting` or
    /// `Connected`; from any other state this starts a fresh connection
    /// attempt (cancelling a pending reconnect timer if one is waiting).
    pub fn connect(&self) {
        if let Some((generation, shutdown_rx)) = self.inner.begin_connect() {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                inner.run(generation, shutdown_rx).await;
            });
        }
    }

    /// Close the transport and cancel all timers. Idempotent.
    pub fn disconnect(&self) {
        self.inner.shut_down();
    }

    pub fn phase(&self) -> ChannelPhase {
        self.inner.lifecycle.lock().unwrap().phase
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .push(Subscriber { id, tx });
        Subscription {
            id,
            rx,
            inner: self.inner.clone(),
        }
    }
}

impl ChannelInner {
    /// Claim the right to run a connection task. Returns `None` while one
    /// is already connecting or connected.
    fn begin_connect(&self) -> Option<(u64, watch::Receiver<bool>)> {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        match lifecycle.phase {
            ChannelPhase::Connecting | ChannelPhase::Connected => {
                debug!("connect ignored, channel already {:?}", lifecycle.phase);
                return None;
            }
            ChannelPhase::Disconnected | ChannelPhase::Reconnecting => {}
        }
        lifecycle.generation += 1;
        lifecycle.phase = ChannelPhase::Connecting;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        // Replacing the sender wakes any task still sleeping on the old one.
        lifecycle.shutdown = Some(shutdown_tx);
        Some((lifecycle.generation, shutdown_rx))
    }

    fn shut_down(&self) {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        lifecycle.phase = ChannelPhase::Disconnected;
        lifecycle.generation += 1;
        if let Some(shutdown) = lifecycle.shutdown.take() {
            let _ = shutdown.send(true);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lifecycle.lock().unwrap().generation == generation
    }

    /// Set the phase, unless a newer connect/disconnect took over.
    fn set_phase(&self, generation: u64, phase: ChannelPhase) -> bool {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if lifecycle.generation != generation {
            return false;
        }
        lifecycle.phase = phase;
        true
    }

    async fn run(self: Arc<Self>, generation: u64, mut shutdown: watch::Receiver<bool>) {
        let mut attempts: u32 = 0;
        loop {
            if !self.is_current(generation) {
                return;
            }
            info!("opening push channel to {}", self.endpoint);
            let result = tokio::select! {
                _ = shutdown.changed() => return,
                result = connect_async(self.endpoint.as_str()) => result,
            };
            match result {
                Ok((ws, _response)) => {
                    if !self.set_phase(generation, ChannelPhase::Connected) {
                        return;
                    }
                    attempts = 0;
                    info!("push channel established");
                    if self.drive(ws, &mut shutdown).await {
                        // Explicitly disconnected; phase already updated.
                        return;
                    }
                }
                Err(e) => {
                    warn!("push channel open failed: {}", e);
                }
            }
            if !self.is_current(generation) {
                return;
            }
            attempts += 1;
            match self.policy.delay_for(attempts) {
                Some(delay) => {
                    if !self.set_phase(generation, ChannelPhase::Reconnecting) {
                        return;
                    }
                    info!(
                        "reconnecting in {} ms (attempt {})",
                        delay.as_millis(),
                        attempts
                    );
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        _ = sleep(delay) => {}
                    }
                    if !self.set_phase(generation, ChannelPhase::Connecting) {
                        return;
                    }
                }
                None => {
                    warn!("giving up after {} reconnect attempts", attempts - 1);
                    self.set_phase(generation, ChannelPhase::Disconnected);
                    return;
                }
            }
        }
    }

    /// Pump one open transport until it dies or we are told to stop.
    /// Returns true on explicit shutdown, false when the transport was
    /// lost and the reconnect path should take over.
    async fn drive<S>(&self, ws: WebSocketStream<S>, shutdown: &mut watch::Receiver<bool>) -> bool
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut sink, mut stream) = ws.split();
        let mut keepalive = interval_at(Instant::now() + self.keepalive, self.keepalive);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return true;
                }
                _ = keepalive.tick() => {
                    debug!("sending liveness probe");
                    if let Err(e) = sink.send(Message::Text(LIVENESS_PROBE.to_string())).await {
                        warn!("liveness probe failed: {}", e);
                        return false;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Close(frame))) => {
                        info!("push channel closed by server: {:?}", frame);
                        return false;
                    }
                    // Control and binary frames carry no status updates.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("push channel error: {}", e);
                        return false;
                    }
                    None => {
                        info!("push channel stream ended");
                        return false;
                    }
                }
            }
        }
    }

    /// Inbound text frame: liveness replies are swallowed, everything else
    /// parses as a snapshot. Bad payloads are logged and dropped; they do
    /// not tear down the connection.
    fn handle_text(&self, text: &str) {
        if text == LIVENESS_REPLY {
            debug!("liveness reply received");
            return;
        }
        match serde_json::from_str::<StatusSnapshot>(text) {
            Ok(snapshot) => {
                if let Err(e) = snapshot.validate() {
                    warn!("dropping inconsistent status payload: {:#}", e);
                    return;
                }
                self.fan_out(snapshot);
            }
            Err(e) => warn!("dropping unparseable status payload: {}", e),
        }
    }

    /// Deliver to every live subscriber; ones whose receiver is gone are
    /// pruned without affecting the rest.
    fn fan_out(&self, snapshot: StatusSnapshot) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|s| s.tx.send(snapshot.clone()).is_ok());
    }
}
