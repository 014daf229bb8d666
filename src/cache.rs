// src/cache.rs

//! Best-effort persistence of the last-known sync state across restarts.
//!
//! Two independent entries are cached: the connectivity flag and the last
//! StatusSnapshot. Both are read once when the store is built and written
//! on every change; a missing or unreadable entry just yields defaults.

use anyhow::{Context, Result};
use async_trait::async_trait;
use directories::ProjectDirs;
use log::{debug, warn};
use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::sync::status::StatusSnapshot;

static PROJECT_DIRS: Lazy<Option<ProjectDirs>> =
    Lazy::new(|| ProjectDirs::from("com", "PeerSync", "PeerSync"));

/// Storage backend for the cached state. Swappable so tests (and headless
/// runs without a writable cache directory) can use the in-memory variant.
#[async_trait]
pub trait StateCache: Send + Sync {
    async fn load_connected(&self) -> Option<bool>;
    async fn load_snapshot(&self) -> Option<StatusSnapshot>;
    async fn save_connected(&self, connected: bool);
    async fn save_snapshot(&self, snapshot: &StatusSnapshot);
}

/// File-backed cache under the platform cache directory.
pub struct FileStateCache {
    dir: PathBuf,
}

impl FileStateCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Open the cache at the platform default location, creating it.
    pub fn open_default() -> Result<Self> {
        let dirs = PROJECT_DIRS
            .as_ref()
            .context("Failed to get project directories")?;
        let dir = dirs.cache_dir().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;
        Ok(Self::new(dir))
    }

    fn connected_path(&self) -> PathBuf {
        self.dir.join("connected")
    }

    fn snapshot_path(&self) -> PathBuf {
        self.dir.join("snapshot.json")
    }

    async fn try_load_connected(&self) -> Result<bool> {
        let path = self.connected_path();
        let contents = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        contents
            .trim()
            .parse()
            .with_context(|| format!("Unexpected contents in {}", path.display()))
    }

    async fn try_load_snapshot(&self) -> Result<StatusSnapshot> {
        let path = self.snapshot_path();
        let contents = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse cached snapshot: {}", path.display()))
    }

    async fn try_save_connected(&self, connected: bool) -> Result<()> {
        let path = self.connected_path();
        tokio::fs::write(&path, connected.to_string())
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    async fn try_save_snapshot(&self, snapshot: &StatusSnapshot) -> Result<()> {
        let path = self.snapshot_path();
        let contents =
            serde_json::to_string(snapshot).context("Failed to serialize snapshot")?;
        tokio::fs::write(&path, contents)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

#[async_trait]
impl StateCache for FileStateCache {
    async fn load_connected(&self) -> Option<bool> {
        match self.try_load_connected().await {
            Ok(connected) => Some(connected),
            Err(e) => {
                debug!("no cached connectivity flag: {:#}", e);
                None
            }
        }
    }

    async fn load_snapshot(&self) -> Option<StatusSnapshot> {
        match self.try_load_snapshot().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                debug!("no cached snapshot: {:#}", e);
                None
            }
        }
    }

    async fn save_connected(&self, connected: bool) {
        if let Err(e) = self.try_save_connected(connected).await {
            warn!("failed to cache connectivity flag: {:#}", e);
        }
    }

    async fn save_snapshot(&self, snapshot: &StatusSnapshot) {
        if let Err(e) = self.try_save_snapshot(snapshot).await {
            warn!("failed to cache snapshot: {:#}", e);
        }
    }
}

/// In-memory cache for tests and for sessions without a usable cache dir.
#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<MemoryCacheState>,
}

#[derive(Default)]
struct MemoryCacheState {
    connected: Option<bool>,
    snapshot: Option<StatusSnapshot>,
}

impl MemoryCache {
    pub fn preloaded(connected: bool, snapshot: Option<StatusSnapshot>) -> Self {
        Self {
            inner: Mutex::new(MemoryCacheState {
                connected: Some(connected),
                snapshot,
            }),
        }
    }
}

#[async_trait]
impl StateCache for MemoryCache {
    async fn load_connected(&self) -> Option<bool> {
        self.inner.lock().unwrap().connected
    }

    async fn load_snapshot(&self) -> Option<StatusSnapshot> {
        self.inner.lock().unwrap().snapshot.clone()
    }

    async fn save_connected(&self, connected: bool) {
        self.inner.lock().unwrap().connected = Some(connected);
    }

    async fn save_snapshot(&self, snapshot: &StatusSnapshot) {
        self.inner.lock().unwrap().snapshot = Some(snapshot.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn round_trips_both_entries() {
        let dir = tempdir().unwrap();
        let cache = FileStateCache::new(dir.path().to_path_buf());

        assert_eq!(cache.load_connected().await, None);
        assert_eq!(cache.load_snapshot().await, None);

        let mut snapshot = StatusSnapshot::degraded();
        snapshot.tracker.address = "127.0.0.1:9000".to_string();
        snapshot.error = None;

        cache.save_connected(true).await;
        cache.save_snapshot(&snapshot).await;

        assert_eq!(cache.load_connected().await, Some(true));
        assert_eq!(cache.load_snapshot().await, Some(snapshot));
    }

    #[tokio::test]
    async fn entries_are_independent() {
        let dir = tempdir().unwrap();
        let cache = FileStateCache::new(dir.path().to_path_buf());

        cache.save_connected(false).await;
        assert_eq!(cache.load_connected().await, Some(false));
        // No snapshot was ever written; its absence is not an error.
        assert_eq!(cache.load_snapshot().await, None);
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_ignored() {
        let dir = tempdir().unwrap();
        let cache = FileStateCache::new(dir.path().to_path_buf());
        std::fs::write(cache.snapshot_path(), "not json").unwrap();
        assert_eq!(cache.load_snapshot().await, None);
    }
}
