// Configuration Module

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::sync::channel::ReconnectPolicy;
use crate::sync::gate::RefreshConfig;

/// Client configuration loaded from a TOML file. Everything has a sensible
/// default so a missing file is not an error.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the backend's REST surface.
    pub backend_url: String,
    /// Realtime endpoint. When unset it is derived from `backend_url` by
    /// switching to the ws scheme and the `/ws` path.
    pub ws_url: Option<String>,
    /// Liveness probe interval on the push channel.
    pub keepalive_secs: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// Consecutive reconnect attempts before the channel gives up;
    /// 0 retries forever with capped backoff.
    pub reconnect_max_attempts: u32,
    /// Minimum gap between two catalog pulls.
    pub refresh_min_interval_ms: u64,
    /// Quiet window that collapses a burst of refresh requests.
    pub refresh_debounce_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8000/api".to_string(),
            ws_url: None,
            keepalive_secs: 30,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            reconnect_max_attempts: 5,
            refresh_min_interval_ms: 5_000,
            refresh_debounce_ms: 500,
        }
    }
}

impl ClientConfig {
    pub fn backend(&self) -> Result<Url> {
        Url::parse(&self.backend_url)
            .with_context(|| format!("Invalid backend URL: {}", self.backend_url))
    }

    /// Resolve the push endpoint, deriving it from the backend URL when not
    /// configured explicitly.
    pub fn push_endpoint(&self) -> Result<Url> {
        if let Some(ws_url) = &self.ws_url {
            return Url::parse(ws_url)
                .with_context(|| format!("Invalid realtime endpoint URL: {}", ws_url));
        }
        let mut url = self.backend()?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("Cannot derive a websocket URL from {}", self.backend_url))?;
        url.set_path("/ws");
        url.set_query(None);
        Ok(url)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            max_attempts: match self.reconnect_max_attempts {
                0 => None,
                n => Some(n),
            },
        }
    }

    pub fn refresh_config(&self) -> RefreshConfig {
        RefreshConfig {
            min_interval: Duration::from_millis(self.refresh_min_interval_ms),
            debounce: Duration::from_millis(self.refresh_debounce_ms),
        }
    }
}

pub fn get_config_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "PeerSync", "PeerSync")
        .context("Failed to get project directories")?;
    let config_dir = proj_dirs.config_dir();
    fs::create_dir_all(config_dir)?;
    Ok(config_dir.join("config.toml"))
}

pub fn load_config(config_path: &Path) -> Result<ClientConfig> {
    if config_path.exists() {
        let contents = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        let config: ClientConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        Ok(config)
    } else {
        // Return default config if file doesn't exist
        Ok(ClientConfig::default())
    }
}

pub fn save_config(config: &ClientConfig, config_path: &Path) -> Result<()> {
    let contents = toml::to_string_pretty(config).context("Failed to serialize config")?;
    fs::write(config_path, contents)
        .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load_config() -> Result<()> {
        let dir = tempdir()?;
        let config_path = dir.path().join("test_config.toml");

        let initial_config = ClientConfig {
            backend_url: "http://10.0.0.2:9000/api".to_string(),
            reconnect_max_attempts: 0,
            ..Default::default()
        };

        save_config(&initial_config, &config_path)?;
        assert!(config_path.exists());

        let loaded_config = load_config(&config_path)?;
        assert_eq!(initial_config, loaded_config);

        dir.close()?;
        Ok(())
    }

    #[test]
    fn test_load_default_config_if_not_exists() -> Result<()> {
        let dir = tempdir()?;
        let config_path = dir.path().join("non_existent_config.toml");

        let loaded_config = load_config(&config_path)?;
        assert_eq!(loaded_config, ClientConfig::default());

        dir.close()?;
        Ok(())
    }

    #[test]
    fn derives_push_endpoint_from_backend_url() {
        let config = ClientConfig::default();
        let endpoint = config.push_endpoint().unwrap();
        assert_eq!(endpoint.as_str(), "ws://127.0.0.1:8000/ws");

        let secure = ClientConfig {
            backend_url: "https://p2p.example.com/api".to_string(),
            ..Default::default()
        };
        assert_eq!(secure.push_endpoint().unwrap().as_str(), "wss://p2p.example.com/ws");
    }

    #[test]
    fn explicit_ws_url_wins() {
        let config = ClientConfig {
            ws_url: Some("ws://10.1.1.1:7000/push".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.push_endpoint().unwrap().as_str(),
            "ws://10.1.1.1:7000/push"
        );
    }

    #[test]
    fn zero_attempts_means_retry_forever() {
        let config = ClientConfig {
            reconnect_max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(config.reconnect_policy().max_attempts, None);
        assert_eq!(
            ClientConfig::default().reconnect_policy().max_attempts,
            Some(5)
        );
    }
}
