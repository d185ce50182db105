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


//! Cache manager: bounds local disk use of played media and art
//!
//! # Playback history
//! - Starting playback moves the file to the most recent end of the history
//! - Overflow evicts the oldest file: its resolved path is dropped at once,
//!   the remote delete follows after a grace delay so trailing reads finish
//! - A file played again within the grace delay is not deleted
//!
//! # Art
//! Trim and clear run in the background; failures are logged, never raised.

use crate::cache::art::{ArtCache, ArtUpdate};
use crate::cache::backoff::{Clock, FailedArtCache, SystemClock};
use crate::cache::history::PlaybackHistory;
use crate::client::FileId;
use crate::config::CacheConfig;
use crate::download::DownloadCoordinator;
use crate::error::Result;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

pub struct CacheManager {
    coordinator: Arc<DownloadCoordinator>,
    config: CacheConfig,
    history: Arc<Mutex<PlaybackHistory>>,
    art: Arc<ArtCache>,
}

impl CacheManager {
    pub fn new(coordinator: Arc<DownloadCoordinator>, config: CacheConfig) -> Self {
        Self::with_clock(coordinator, config, Arc::new(SystemClock))
    }

    /// Use a custom clock for the art failure backoff
    pub fn with_clock(
        coordinator: Arc<DownloadCoordinator>,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let art = Arc::new(ArtCache::new(&config, clock));
        let history = Arc::new(Mutex::new(PlaybackHistory::new(config.history_capacity)));
        Self {
            coordinator,
            config,
            history,
            art,
        }
    }

    /// Playback of a file started
    pub async fn set_active_playback(&self, file_id: FileId) {
        let evicted = {
            let mut history = self.history.lock().await;
            history.set_active(file_id)
        };

        for old in evicted {
            info!("Evicting {} from playback history", old);
            self.coordinator.forget(old);
            self.schedule_delete(old);
        }
    }

    /// Playback stopped. The history is kept for quick replay.
    pub async fn on_playback_stopped(&self) {
        self.history.lock().await.clear_active();
    }

    pub async fn active_playback(&self) -> Option<FileId> {
        self.history.lock().await.active()
    }

    /// History, oldest first
    pub async fn history(&self) -> Vec<FileId> {
        self.history.lock().await.entries()
    }

    /// Drop history, backoff and art, and ask the remote to free all storage
    pub async fn clear_all_cache(&self) -> Result<()> {
        let forgotten = {
            let mut history = self.history.lock().await;
            let entries = history.entries();
            history.clear();
            entries
        };
        for file_id in forgotten {
            self.coordinator.forget(file_id);
        }

        self.art.failures().clear();
        self.clear_embedded_art_cache();

        self.coordinator.client().optimize_storage_to_zero().await?;
        info!("Cleared all media caches");
        Ok(())
    }

    /// Enforce the art size cap in the background
    pub fn trim_embedded_art_cache(&self) {
        let art = Arc::clone(&self.art);
        tokio::spawn(async move {
            if let Err(e) = art.trim().await {
                warn!("Art cache trim failed: {}", e);
            }
        });
    }

    /// Delete all art in the background
    pub fn clear_embedded_art_cache(&self) {
        let art = Arc::clone(&self.art);
        tokio::spawn(async move {
            if let Err(e) = art.clear().await {
                warn!("Art cache clear failed: {}", e);
            }
        });
    }

    /// Extract embedded art of a played file. Failures only start a backoff.
    pub async fn extract_embedded_art(
        &self,
        source_a: &str,
        source_b: &str,
        audio_path: &Path,
    ) -> Option<PathBuf> {
        match self
            .art
            .extract_embedded_art(source_a, source_b, audio_path)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                warn!("Art extraction for {}:{} failed: {}", source_a, source_b, e);
                None
            }
        }
    }

    /// True while art of the source pair is backing off from a failure
    pub fn is_art_failed(&self, source_a: &str, source_b: &str) -> bool {
        self.art
            .failures()
            .is_failed(&FailedArtCache::key(source_a, source_b))
    }

    /// Start the backoff window for art of a source pair
    pub fn mark_art_failed(&self, source_a: &str, source_b: &str) {
        self.art
            .failures()
            .mark_failed(&FailedArtCache::key(source_a, source_b));
    }

    pub fn art(&self) -> &Arc<ArtCache> {
        &self.art
    }

    pub fn subscribe_art(&self) -> broadcast::Receiver<ArtUpdate> {
        self.art.subscribe()
    }

    fn schedule_delete(&self, file_id: FileId) {
        let client = Arc::clone(self.coordinator.client());
        let history = Arc::clone(&self.history);
        let grace = self.config.eviction_grace();

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;

            if history.lock().await.contains(file_id) {
                debug!("{} was played again, keeping it", file_id);
                return;
            }

            match client.delete_file(file_id).await {
                Ok(()) => debug!("Deleted evicted file {}", file_id),
                Err(e) => warn!("Failed to delete evicted file {}: {}", file_id, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{RemoteClient, SimulatedRemote, SimulatedRemoteOptions};
    use crate::config::{ClientConfig, CoordinatorConfig};
    use std::time::Duration;
    use tempfile::TempDir;

    async fn fixture(
        temp_dir: &TempDir,
        capacity: usize,
        grace_ms: u64,
    ) -> (Arc<SimulatedRemote>, Arc<DownloadCoordinator>, CacheManager) {
        let (remote, transport) =
            SimulatedRemote::start(SimulatedRemoteOptions::new(temp_dir.path()));
        let client = RemoteClient::connect(transport, &ClientConfig::default());
        let coordinator = Arc::new(DownloadCoordinator::new(client, CoordinatorConfig::default()));
        let config = CacheConfig {
            history_capacity: capacity,
            eviction_grace_ms: grace_ms,
            art_directory: temp_dir.path().join("art"),
            ..Default::default()
        };
        let manager = CacheManager::new(Arc::clone(&coordinator), config);
        (remote, coordinator, manager)
    }

    #[tokio::test]
    async fn test_stop_keeps_history() {
        let temp_dir = TempDir::new().unwrap();
        let (_remote, _coordinator, manager) = fixture(&temp_dir, 3, 10).await;

        manager.set_active_playback(FileId(1)).await;
        assert_eq!(manager.active_playback().await, Some(FileId(1)));

        manager.on_playback_stopped().await;
        assert_eq!(manager.active_playback().await, None);
        assert_eq!(manager.history().await, vec![FileId(1)]);
    }

    #[tokio::test]
    async fn test_replay_within_grace_is_not_deleted() {
        let temp_dir = TempDir::new().unwrap();
        let (remote, _coordinator, manager) = fixture(&temp_dir, 1, 50).await;

        manager.set_active_playback(FileId(1)).await;
        manager.set_active_playback(FileId(2)).await;
        // 1 is evicted, then played again before the grace delay ends
        manager.set_active_playback(FileId(1)).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        // Only 2 (evicted by the replay of 1) was deleted
        assert_eq!(remote.request_count("deleteFile"), 1);
    }

    #[tokio::test]
    async fn test_background_trim_shrinks_art_directory() {
        let temp_dir = TempDir::new().unwrap();
        let (_remote, transport) =
            SimulatedRemote::start(SimulatedRemoteOptions::new(temp_dir.path()));
        let client = RemoteClient::connect(transport, &ClientConfig::default());
        let coordinator = Arc::new(DownloadCoordinator::new(client, CoordinatorConfig::default()));
        let config = CacheConfig {
            art_directory: temp_dir.path().join("art"),
            art_max_bytes: 200,
            art_trim_ratio: 0.8,
            ..Default::default()
        };
        let target = config.art_trim_target();
        let manager = CacheManager::new(coordinator, config);

        // Written behind the cache's back, so nothing has trimmed yet
        let shard = temp_dir.path().join("art").join("ab");
        tokio::fs::create_dir_all(&shard).await.unwrap();
        for i in 0..5 {
            tokio::fs::write(shard.join(format!("{:032}.jpg", i)), vec![0u8; 100])
                .await
                .unwrap();
        }
        assert_eq!(manager.art().total_size().await.unwrap(), 500);

        manager.trim_embedded_art_cache();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let remaining = manager.art().total_size().await.unwrap();
        assert!(remaining <= target, "{} bytes left", remaining);
    }

    #[tokio::test]
    async fn test_art_failure_by_source_pair() {
        let temp_dir = TempDir::new().unwrap();
        let (_remote, _coordinator, manager) = fixture(&temp_dir, 3, 10).await;

        assert!(!manager.is_art_failed("lib", "7"));
        manager.mark_art_failed("lib", "7");
        assert!(manager.is_art_failed("lib", "7"));
        assert!(!manager.is_art_failed("lib", "8"));
    }

    #[tokio::test]
    async fn test_clear_all_cache() {
        let temp_dir = TempDir::new().unwrap();
        let (remote, _coordinator, manager) = fixture(&temp_dir, 3, 10).await;

        manager.set_active_playback(FileId(1)).await;
        manager.mark_art_failed("a", "b");
        manager.art().store("a", "c", b"jpeg").await.unwrap();

        manager.clear_all_cache().await.unwrap();
        assert!(manager.history().await.is_empty());
        assert_eq!(manager.active_playback().await, None);
        assert!(!manager.is_art_failed("a", "b"));
        assert_eq!(remote.request_count("optimizeStorage"), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.art().total_size().await.unwrap(), 0);
    }
}
