// src/sync/gate.rs

//! Debounced, rate-limited trigger in front of the catalog pull.
//!
//! Two independent protections compose: a trailing debounce collapses a
//! burst of refresh requests into one call, and a minimum-interval gate
//! refuses pulls more frequent than the cooldown. Gated calls are silent
//! no-ops; `trigger()` never blocks.

use log::debug;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshConfig {
    /// Minimum gap between two pulls that actually reach the network.
    pub min_interval: Duration,
    /// Quiet window before a burst's trailing call fires.
    pub debounce: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(5_000),
            debounce: Duration::from_millis(500),
        }
    }
}

/// The gate's state (last run time, pending window) lives in one spawned
/// task fed by an unbounded trigger channel, so there are no timer handles
/// to leak: dropping the gate stops the task.
pub struct RefreshGate {
    trigger_tx: mpsc::UnboundedSender<()>,
    task: JoinHandle<()>,
}

impl RefreshGate {
    pub fn spawn<F, Fut>(config: RefreshConfig, action: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel::<()>();
        let task = tokio::spawn(async move {
            let mut last_run: Option<Instant> = None;
            while trigger_rx.recv().await.is_some() {
                // Trailing debounce: absorb triggers until the burst goes quiet.
                loop {
                    match timeout(config.debounce, trigger_rx.recv()).await {
                        Ok(Some(())) => continue,
                        Ok(None) => return,
                        Err(_) => break,
                    }
                }
                if let Some(last) = last_run {
                    if last.elapsed() < config.min_interval {
                        debug!("refresh skipped, last pull {:?} ago", last.elapsed());
                        continue;
                    }
                }
                action().await;
                last_run = Some(Instant::now());
            }
        });
        Self { trigger_tx, task }
    }

    /// Request a refresh. Collapsed and throttled by the gate.
    pub fn trigger(&self) {
        let _ = self.trigger_tx.send(());
    }
}

impl Drop for RefreshGate {
    fn drop(&mut self) {
        self.task.abort();
    }
}
