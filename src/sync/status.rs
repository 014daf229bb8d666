// src/sync/status.rs

//! Data model for the server-reported status snapshot.
//!
//! The types here mirror the backend's JSON wire format exactly; the rest of
//! the sync layer treats a parsed `StatusSnapshot` as an immutable value and
//! replaces it wholesale on every update.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

/// Sentinel address the backend reports while no tracker session is active.
/// Connectivity is *derived* from this, not sent as a flag.
pub const NOT_CONNECTED: &str = "Not connected";

/// Outbound liveness probe sent on the push channel while connected.
pub const LIVENESS_PROBE: &str = "ping";

/// Reserved reply to the liveness probe; swallowed, never fanned out.
pub const LIVENESS_REPLY: &str = "pong";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    Pending,
    Downloading,
    Completed,
    Error,
}

/// One in-flight transfer as the server reports it. `filename` is the
/// unique key; `progress` stays in wire form and is parsed on demand.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DownloadProgress {
    pub filename: String,
    pub progress: String,
    pub seeders: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DownloadState>,
}

impl DownloadProgress {
    pub fn chunk_progress(&self) -> Result<ChunkProgress> {
        self.progress.parse()
    }
}

/// Parsed form of a `"45/100 chunks (45.0%)"` progress string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkProgress {
    pub completed: u64,
    pub total: u64,
    pub percent: f64,
}

impl FromStr for ChunkProgress {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (counts, rest) = s
            .split_once(' ')
            .ok_or_else(|| anyhow!("Malformed progress string: {:?}", s))?;
        let (completed, total) = counts
            .split_once('/')
            .ok_or_else(|| anyhow!("Malformed chunk counts in progress string: {:?}", s))?;
        let completed: u64 = completed
            .parse()
            .map_err(|_| anyhow!("Invalid completed chunk count: {:?}", s))?;
        let total: u64 = total
            .parse()
            .map_err(|_| anyhow!("Invalid total chunk count: {:?}", s))?;
        let percent: f64 = rest
            .split_once('(')
            .and_then(|(_, inner)| inner.strip_suffix("%)"))
            .ok_or_else(|| anyhow!("Missing percentage in progress string: {:?}", s))?
            .parse()
            .map_err(|_| anyhow!("Invalid percentage in progress string: {:?}", s))?;

        if completed > total {
            bail!("Completed chunks {} exceed total {}", completed, total);
        }
        if !(0.0..=100.0).contains(&percent) {
            bail!("Percentage {} out of range", percent);
        }
        Ok(ChunkProgress {
            completed,
            total,
            percent,
        })
    }
}

/// Current and completed transfers. Completed entries are implicitly
/// seeding.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct DownloadStatus {
    #[serde(rename = "current_downloads", default)]
    pub current: Vec<DownloadProgress>,
    #[serde(rename = "completed_downloads", default)]
    pub completed: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TrackerInfo {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_seeders: Option<u32>,
}

impl TrackerInfo {
    pub fn not_connected() -> Self {
        Self {
            address: NOT_CONNECTED.to_string(),
            active_seeders: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.address != NOT_CONNECTED
    }
}

impl Default for TrackerInfo {
    fn default() -> Self {
        Self::not_connected()
    }
}

/// The authoritative server-state value. Owned by the store; the channel
/// and the REST client only produce candidates and never retain them.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StatusSnapshot {
    #[serde(default)]
    pub downloads: DownloadStatus,
    #[serde(default)]
    pub tracker: TrackerInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusSnapshot {
    /// Documented fallback value when the status pull fails.
    pub fn degraded() -> Self {
        Self {
            downloads: DownloadStatus::default(),
            tracker: TrackerInfo::not_connected(),
            error: Some("Failed to connect to backend".to_string()),
        }
    }

    /// The derived-connectivity rule, applied identically to pushed and
    /// pulled snapshots.
    pub fn is_tracker_connected(&self) -> bool {
        self.tracker.is_connected()
    }

    /// A filename may appear in at most one of current/completed, and
    /// current entries need a non-empty filename. Snapshots violating this
    /// are dropped like any other parse failure.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for download in &self.downloads.current {
            if download.filename.is_empty() {
                bail!("Download entry with empty filename");
            }
            if !seen.insert(download.filename.as_str()) {
                bail!("Duplicate download entry: {}", download.filename);
            }
        }
        for filename in &self.downloads.completed {
            if seen.contains(filename.as_str()) {
                bail!(
                    "File {} listed as both current and completed",
                    filename
                );
            }
        }
        Ok(())
    }
}

/// One entry of the pulled file catalog. `GET /files` may return bare
/// strings; those normalize to an entry with unknown size/seeders.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FileEntry {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seeders: Option<u32>,
}
