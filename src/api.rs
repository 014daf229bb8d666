// src/api.rs

//! REST client for the backend's pull surface.
//!
//! Inner `try_*` functions propagate errors with context; the public
//! functions apply the degrade policy so no fault ever crosses this
//! boundary: a failed status pull yields the documented degraded snapshot,
//! a failed catalog pull an empty list, a failed action `false`.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::settings::ConnectionSettings;
use crate::sync::status::{FileEntry, StatusSnapshot};

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

#[derive(Debug, Deserialize)]
struct FilesResponse {
    #[serde(default)]
    files: Vec<FileEntryWire>,
}

/// `GET /files` returns either plain filenames or full entries.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FileEntryWire {
    Entry(FileEntry),
    Name(String),
}

impl From<FileEntryWire> for FileEntry {
    fn from(wire: FileEntryWire) -> Self {
        match wire {
            FileEntryWire::Entry(entry) => entry,
            FileEntryWire::Name(filename) => FileEntry {
                filename,
                size: None,
                seeders: None,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct DownloadRequest<'a> {
    filename: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigureRequest<'a> {
    tracker_ip: &'a str,
    tracker_port: &'a str,
    start_local_tracker: bool,
}

#[derive(Debug, Deserialize)]
struct ActionResponse {
    #[serde(default)]
    success: bool,
}

impl ApiClient {
    pub fn new(base: Url) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, segment: &str) -> Result<Url> {
        let joined = format!("{}/{}", self.base.as_str().trim_end_matches('/'), segment);
        Url::parse(&joined).with_context(|| format!("Invalid endpoint URL: {}", joined))
    }

    /// `GET /status`, degrading to the documented fallback on any failure.
    pub async fn fetch_status(&self) -> StatusSnapshot {
        match self.try_fetch_status().await {
            Ok(status) => status,
            Err(e) => {
                warn!("status pull failed: {:#}", e);
                StatusSnapshot::degraded()
            }
        }
    }

    async fn try_fetch_status(&self) -> Result<StatusSnapshot> {
        let url = self.endpoint("status")?;
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;
        if !response.status().is_success() {
            bail!("HTTP error: {}", response.status());
        }
        response
            .json::<StatusSnapshot>()
            .await
            .context("Failed to decode status response")
    }

    /// `GET /files`, normalized to `FileEntry` values; empty on failure.
    pub async fn fetch_files(&self) -> Vec<FileEntry> {
        match self.try_fetch_files().await {
            Ok(files) => files,
            Err(e) => {
                warn!("catalog pull failed: {:#}", e);
                Vec::new()
            }
        }
    }

    async fn try_fetch_files(&self) -> Result<Vec<FileEntry>> {
        let url = self.endpoint("files")?;
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;
        if !response.status().is_success() {
            bail!("HTTP error: {}", response.status());
        }
        let files = response
            .json::<FilesResponse>()
            .await
            .context("Failed to decode files response")?;
        Ok(files.files.into_iter().map(FileEntry::from).collect())
    }

    /// `POST /download`; whether the backend accepted the request.
    pub async fn request_download(&self, filename: &str) -> bool {
        match self.try_post_action("download", &DownloadRequest { filename }).await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("download request for {} failed: {:#}", filename, e);
                false
            }
        }
    }

    /// `POST /configure`; whether the backend accepted the settings.
    pub async fn configure(&self, settings: &ConnectionSettings) -> bool {
        let request = ConfigureRequest {
            tracker_ip: &settings.tracker_ip,
            tracker_port: &settings.tracker_port,
            start_local_tracker: settings.use_local_tracker,
        };
        match self.try_post_action("configure", &request).await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("configure request failed: {:#}", e);
                false
            }
        }
    }

    async fn try_post_action<T: Serialize>(&self, segment: &str, body: &T) -> Result<bool> {
        let url = self.endpoint(segment)?;
        let response = self
            .http
            .post(url.clone())
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;
        if !response.status().is_success() {
            bail!("HTTP error: {}", response.status());
        }
        let action = response
            .json::<ActionResponse>()
            .await
            .context("Failed to decode action response")?;
        Ok(action.success)
    }

    /// `GET /files/{filename}`: raw bytes of one shared file.
    pub async fn fetch_file(&self, filename: &str) -> Result<Bytes> {
        let url = self.endpoint(&format!("files/{}", urlencoding::encode(filename)))?;
        debug!("fetching {}", url);
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;
        if !response.status().is_success() {
            bail!("HTTP error: {}", response.status());
        }
        response
            .bytes()
            .await
            .with_context(|| format!("Failed to read response body from {}", url))
    }
}
