// src/sync/store.rs

//! Process-wide owner of the synchronized view of the backend.
//!
//! The store is the only component allowed to mutate the status snapshot,
//! the connectivity flag, the file catalog and the connection settings. It
//! merges pushed snapshots from the connection channel and pulled results
//! from the REST client into one coherent state, persists select fields
//! across restarts, and publishes a read-only view over a watch channel.

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::ApiClient;
use crate::cache::StateCache;
use crate::settings::ConnectionSettings;
use crate::sync::channel::ConnectionChannel;
use crate::sync::gate::{RefreshConfig, RefreshGate};
use crate::sync::status::{FileEntry, StatusSnapshot};

/// Read-only view published to consumers on every committed mutation.
#[derive(Debug, Clone, Default)]
pub struct StoreView {
    pub connected: bool,
    pub snapshot: Option<StatusSnapshot>,
    pub files: Vec<FileEntry>,
    pub loading: bool,
}

struct StoreState {
    connected: bool,
    snapshot: Option<StatusSnapshot>,
    files: Vec<FileEntry>,
    settings: ConnectionSettings,
    loading: bool,
    push_task: Option<JoinHandle<()>>,
}

struct StoreInner {
    api: ApiClient,
    channel: ConnectionChannel,
    cache: Arc<dyn StateCache>,
    state: Mutex<StoreState>,
    view_tx: watch::Sender<StoreView>,
    gate: RefreshGate,
}

/// Handle to the one store of an application session. Cheap to clone.
#[derive(Clone)]
pub struct SyncStore {
    inner: Arc<StoreInner>,
}

impl SyncStore {
    /// Build the store around an injected channel, REST client and cache,
    /// then hydrate from the cached state. When the cache says the last
    /// session was connected, the push channel is reopened immediately.
    pub async fn new(
        api: ApiClient,
        channel: ConnectionChannel,
        cache: Arc<dyn StateCache>,
        refresh: RefreshConfig,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<StoreInner>| {
            let weak = weak.clone();
            let gate = RefreshGate::spawn(refresh, move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.pull_files().await;
                    }
                }
            });
            StoreInner {
                api,
                channel,
                cache,
                state: Mutex::new(StoreState {
                    connected: false,
                    snapshot: None,
                    files: Vec::new(),
                    settings: ConnectionSettings::default(),
                    loading: false,
                    push_task: None,
                }),
                view_tx: watch::channel(StoreView::default()).0,
                gate,
            }
        });
        let store = Self { inner };
        store.hydrate().await;
        store
    }

    async fn hydrate(&self) {
        let connected = self.inner.cache.load_connected().await.unwrap_or(false);
        let snapshot = self.inner.cache.load_snapshot().await;
        if connected || snapshot.is_some() {
            debug!("hydrated cached state (connected: {})", connected);
        }
        {
            let mut state = self.inner.state.lock().unwrap();
            state.connected = connected;
            state.snapshot = snapshot;
        }
        self.inner.publish();
        if connected {
            StoreInner::wire_push(&self.inner);
        }
    }

    /// Watch the store; a new view is published on every committed change.
    pub fn subscribe(&self) -> watch::Receiver<StoreView> {
        self.inner.view_tx.subscribe()
    }

    pub fn view(&self) -> StoreView {
        self.inner.view_tx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        self.inner.state.lock().unwrap().settings.clone()
    }

    /// Replace the settings wholesale. Does not reconnect by itself.
    pub fn set_connection_settings(&self, next: ConnectionSettings) {
        debug!(
            "connection settings replaced (tracker {}:{})",
            next.tracker_ip, next.tracker_port
        );
        self.inner.state.lock().unwrap().settings = next;
    }

    /// Send the current settings to the backend's configure endpoint, then
    /// pull status once and derive connectivity from it. Returns the
    /// resulting connectivity; failures surface only as `false`.
    pub async fn connect_to_tracker(&self) -> bool {
        let settings = self.connection_settings();
        if let Err(e) = settings.validate() {
            warn!("invalid connection settings: {:#}", e);
            return false;
        }
        info!(
            "connecting to tracker {}:{}",
            settings.tracker_ip, settings.tracker_port
        );
        self.inner.set_loading(true);
        let connected = if self.inner.api.configure(&settings).await {
            let status = self.inner.api.fetch_status().await;
            StoreInner::commit_snapshot(&self.inner, status)
        } else {
            warn!("backend rejected tracker configuration");
            false
        };
        self.inner.set_loading(false);
        connected
    }

    /// Request a catalog refresh. Only proceeds while connected; bursts are
    /// collapsed and throttled by the refresh gate.
    pub fn refresh_files(&self) {
        if !self.is_connected() {
            debug!("refresh requested while disconnected");
            return;
        }
        self.inner.gate.trigger();
    }

    /// Ask the backend to start downloading a file from its peers.
    /// Progress arrives exclusively via subsequent pushed snapshots.
    pub async fn start_download(&self, filename: &str) -> bool {
        info!("requesting download of {}", filename);
        self.inner.api.request_download(filename).await
    }

    /// Fetch one shared file directly into the configured download
    /// directory, independent of the peer transfers tracked by the
    /// snapshot. Returns whether the transfer was written out.
    pub async fn download_to_client(&self, filename: &str) -> bool {
        let dir = self.connection_settings().download_dir;
        match self.inner.transfer_to_disk(filename, &dir).await {
            Ok(path) => {
                info!("saved {} to {}", filename, path.display());
                true
            }
            Err(e) => {
                warn!("direct download of {} failed: {:#}", filename, e);
                false
            }
        }
    }

    /// Tear down the push wiring and close the channel. The persisted
    /// connectivity flag is left as-is for the next session's hydration.
    pub fn shutdown(&self) {
        self.inner.unwire_push();
    }
}

impl StoreInner {
    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn publish(&self) {
        let view = {
            let state = self.state.lock().unwrap();
            StoreView {
                connected: state.connected,
                snapshot: state.snapshot.clone(),
                files: state.files.clone(),
                loading: state.loading,
            }
        };
        self.view_tx.send_replace(view);
    }

    fn set_loading(&self, loading: bool) {
        self.state.lock().unwrap().loading = loading;
        self.publish();
    }

    /// Replace the snapshot (last-write-wins, no field merging), derive
    /// connectivity from it, persist, and wire the push channel up or down
    /// when the flag flips. Used identically by the pull and push paths.
    fn commit_snapshot(inner: &Arc<StoreInner>, snapshot: StatusSnapshot) -> bool {
        let connected = snapshot.is_tracker_connected();
        let was_connected = {
            let mut state = inner.state.lock().unwrap();
            let was = state.connected;
            state.connected = connected;
            state.snapshot = Some(snapshot.clone());
            was
        };
        inner.publish();
        inner.persist(connected, Some(snapshot));
        if connected && !was_connected {
            StoreInner::wire_push(inner);
        } else if !connected && was_connected {
            inner.unwire_push();
        }
        connected
    }

    fn wire_push(inner: &Arc<StoreInner>) {
        info!("connectivity gained, opening push channel");
        inner.channel.connect();
        let mut subscription = inner.channel.subscribe();
        let weak = Arc::downgrade(inner);
        let task = tokio::spawn(async move {
            while let Some(snapshot) = subscription.recv().await {
                match weak.upgrade() {
                    Some(inner) => {
                        debug!("applying pushed status update");
                        StoreInner::commit_snapshot(&inner, snapshot);
                    }
                    None => break,
                }
            }
        });
        let previous = inner.state.lock().unwrap().push_task.replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        // One initial status pull plus a catalog refresh, so the view does
        // not have to wait for the first pushed update.
        let pull = inner.clone();
        tokio::spawn(async move {
            StoreInner::pull_status(&pull).await;
        });
        inner.gate.trigger();
    }

    fn unwire_push(&self) {
        info!("connectivity lost, closing push channel");
        let task = self.state.lock().unwrap().push_task.take();
        if let Some(task) = task {
            task.abort();
        }
        self.channel.disconnect();
    }

    async fn pull_status(inner: &Arc<StoreInner>) {
        let status = inner.api.fetch_status().await;
        StoreInner::commit_snapshot(inner, status);
    }

    /// The refresh gate's action: replace the catalog wholesale with the
    /// pulled result. Entries absent from the new pull are dropped.
    async fn pull_files(&self) {
        if !self.is_connected() {
            debug!("skipping catalog pull while disconnected");
            return;
        }
        self.set_loading(true);
        let files = self.api.fetch_files().await;
        {
            let mut state = self.state.lock().unwrap();
            debug!(
                "replacing catalog: {} -> {} entries",
                state.files.len(),
                files.len()
            );
            state.files = files;
        }
        self.set_loading(false);
    }

    /// Write-back is fire-and-forget; failures are logged by the cache.
    fn persist(&self, connected: bool, snapshot: Option<StatusSnapshot>) {
        let cache = self.cache.clone();
        tokio::spawn(async move {
            cache.save_connected(connected).await;
            if let Some(snapshot) = snapshot {
                cache.save_snapshot(&snapshot).await;
            }
        });
    }

    async fn transfer_to_disk(&self, filename: &str, dir: &Path) -> Result<PathBuf> {
        if filename.contains(['/', '\\']) {
            bail!(
                "Refusing to write outside the download directory: {}",
                filename
            );
        }
        let bytes = self.api.fetch_file(filename).await?;
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create download directory: {}", dir.display()))?;
        let path = dir.join(filename);
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}
