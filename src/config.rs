// Media Stream Core - remote media download-and-stream engine
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Configuration for the remote client, download coordinator, streaming proxy
//! and cache manager
//!
//! Every timing is stored in milliseconds so the JSON form stays readable;
//! accessors hand out `Duration`s. Defaults carry the production values.

use crate::error::{Result, StreamError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Remote client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Per-consumer buffer of the status event stream
    pub event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { event_buffer: 256 }
    }
}

/// Download coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Concurrent heavyweight download operations
    pub max_concurrent_downloads: usize,

    /// Files below this size (or unsized) use the synchronous strategy
    pub small_file_threshold: u64,

    /// Bound on the synchronous download request
    pub sync_timeout_ms: u64,

    /// Bound on the event-stream wait of the asynchronous strategy
    pub async_timeout_ms: u64,

    /// Bound on waiting for a first local path in `start_streaming`
    pub path_wait_timeout_ms: u64,
}

impl CoordinatorConfig {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn async_timeout(&self) -> Duration {
        Duration::from_millis(self.async_timeout_ms)
    }

    pub fn path_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.path_wait_timeout_ms)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 4,
            small_file_threshold: 1024 * 1024,
            sync_timeout_ms: 15_000,
            async_timeout_ms: 60_000,
            path_wait_timeout_ms: 10_000,
        }
    }
}

/// Streaming proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Loopback address the listener binds to (port 0 = OS-assigned)
    pub bind_address: String,

    /// Interval and attempt count of the startup port poll
    pub port_poll_interval_ms: u64,
    pub port_poll_attempts: u32,

    /// Wait for the remote session before answering 503
    pub session_ready_timeout_ms: u64,

    /// File-existence poll: interval and attempt count
    pub file_poll_interval_ms: u64,
    pub file_poll_attempts: u32,

    /// Bytes read from disk per body chunk
    pub chunk_size: usize,

    /// Poll interval when the reader caught up with the downloader
    pub stream_poll_interval_ms: u64,

    /// Every Nth idle poll also asks the remote for the file status
    pub status_check_every: u32,

    /// Idle time without new bytes before the stream is abandoned
    pub stall_timeout_ms: u64,

    /// Download priority used when a stream triggers the coordinator
    pub stream_priority: u8,
}

impl ProxyConfig {
    pub fn port_poll_interval(&self) -> Duration {
        Duration::from_millis(self.port_poll_interval_ms)
    }

    pub fn session_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.session_ready_timeout_ms)
    }

    pub fn file_poll_interval(&self) -> Duration {
        Duration::from_millis(self.file_poll_interval_ms)
    }

    pub fn stream_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stream_poll_interval_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port_poll_interval_ms: 100,
            port_poll_attempts: 20,
            session_ready_timeout_ms: 10_000,
            file_poll_interval_ms: 50,
            file_poll_attempts: 100,
            chunk_size: 64 * 1024,
            stream_poll_interval_ms: 10,
            status_check_every: 200,
            stall_timeout_ms: 50_000,
            stream_priority: 32,
        }
    }
}

/// Cache manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Recently played files kept on disk for instant previous/next
    pub history_capacity: usize,

    /// Delay before an evicted file is deleted, lets trailing reads finish
    pub eviction_grace_ms: u64,

    /// Directory holding extracted embedded art
    pub art_directory: PathBuf,

    /// Size cap of the art directory
    pub art_max_bytes: u64,

    /// Fraction of the cap a trim pass shrinks the art cache down to
    pub art_trim_ratio: f64,

    /// How long a failed art fetch suppresses retries
    pub failed_art_ttl_ms: u64,

    /// Capacity of the art update broadcast channel
    pub art_event_buffer: usize,
}

impl CacheConfig {
    pub fn eviction_grace(&self) -> Duration {
        Duration::from_millis(self.eviction_grace_ms)
    }

    pub fn failed_art_ttl(&self) -> Duration {
        Duration::from_millis(self.failed_art_ttl_ms)
    }

    /// Size a trim pass shrinks down to
    pub fn art_trim_target(&self) -> u64 {
        (self.art_max_bytes as f64 * self.art_trim_ratio) as u64
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            history_capacity: 5,
            eviction_grace_ms: 2_000,
            art_directory: std::env::temp_dir().join("media-stream-art"),
            art_max_bytes: 50 * 1024 * 1024,
            art_trim_ratio: 0.8,
            failed_art_ttl_ms: 5 * 60 * 1000,
            art_event_buffer: 64,
        }
    }
}

/// Complete configuration of the subsystem
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub client: ClientConfig,
    pub coordinator: CoordinatorConfig,
    pub proxy: ProxyConfig,
    pub cache: CacheConfig,
}

impl StreamConfig {
    /// Load configuration from a JSON file. Missing fields take defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            StreamError::ConfigurationError(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as pretty JSON
    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Reject values that would deadlock or disable a component
    pub fn validate(&self) -> Result<()> {
        if self.coordinator.max_concurrent_downloads == 0 {
            return Err(StreamError::ConfigurationError(
                "max_concurrent_downloads must be at least 1".to_string(),
            ));
        }
        if self.cache.history_capacity == 0 {
            return Err(StreamError::ConfigurationError(
                "history_capacity must be at least 1".to_string(),
            ));
        }
        if !(self.cache.art_trim_ratio > 0.0 && self.cache.art_trim_ratio <= 1.0) {
            return Err(StreamError::ConfigurationError(format!(
                "art_trim_ratio must be in (0, 1], got {}",
                self.cache.art_trim_ratio
            )));
        }
        if self.proxy.chunk_size == 0 || self.proxy.status_check_every == 0 {
            return Err(StreamError::ConfigurationError(
                "chunk_size and status_check_every must be non-zero".to_string(),
            ));
        }
        if self.client.event_buffer == 0 || self.cache.art_event_buffer == 0 {
            return Err(StreamError::ConfigurationError(
                "event buffers must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.coordinator.max_concurrent_downloads, 4);
        assert_eq!(config.coordinator.sync_timeout(), Duration::from_secs(15));
        assert_eq!(config.coordinator.async_timeout(), Duration::from_secs(60));
        assert_eq!(config.proxy.chunk_size, 65536);
        assert_eq!(config.proxy.stall_timeout(), Duration::from_secs(50));
        assert_eq!(config.cache.history_capacity, 5);
        assert_eq!(config.cache.art_trim_target(), 40 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_partial_json_takes_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stream.json");
        tokio::fs::write(&path, r#"{"cache": {"history_capacity": 3}}"#)
            .await
            .unwrap();

        let config = StreamConfig::load(&path).await.unwrap();
        assert_eq!(config.cache.history_capacity, 3);
        assert_eq!(config.cache.eviction_grace_ms, 2_000);
        assert_eq!(config.proxy.file_poll_attempts, 100);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stream.json");
        let mut config = StreamConfig::default();
        config.proxy.stream_priority = 16;
        config.save(&path).await.unwrap();

        let loaded = StreamConfig::load(&path).await.unwrap();
        assert_eq!(loaded.proxy.stream_priority, 16);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stream.json");
        tokio::fs::write(&path, r#"{"coordinator": {"max_concurrent_downloads": 0}}"#)
            .await
            .unwrap();

        let err = StreamConfig::load(&path).await.unwrap_err();
        assert!(matches!(err, StreamError::ConfigurationError(_)));
    }
}
