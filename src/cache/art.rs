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


//! Size-capped cache of art extracted from audio tags
//!
//! # Layout
//! `{art_directory}/{2 hex chars}/{32 hex chars}.jpg`, where the hex comes
//! from `sha256("{source_a}:{source_b}")`. The shard directory keeps any
//! single directory small.
//!
//! # Size cap
//! When the total size exceeds the cap, files are deleted oldest-modified
//! first until the total is at or below the trim target (80% of the cap by
//! default). Files that cannot be deleted are logged and skipped.

use crate::cache::backoff::{Clock, FailedArtCache};
use crate::config::CacheConfig;
use crate::error::{Result, StreamError};
use crate::file::FileManager;
use lofty::{Probe, TaggedFileExt};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Art became available for a source pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtUpdate {
    pub source_a: String,
    pub source_b: String,
    pub path: PathBuf,
}

/// Outcome of a trim pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimReport {
    pub removed: usize,
    pub freed_bytes: u64,
    pub remaining_bytes: u64,
}

pub struct ArtCache {
    files: FileManager,
    max_bytes: u64,
    trim_target: u64,
    failures: FailedArtCache,
    updates: broadcast::Sender<ArtUpdate>,
    maintenance: Mutex<()>,
}

impl ArtCache {
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let (updates, _) = broadcast::channel(config.art_event_buffer.max(1));
        Self {
            files: FileManager::new(config.art_directory.clone()),
            max_bytes: config.art_max_bytes,
            trim_target: config.art_trim_target(),
            failures: FailedArtCache::new(config.failed_art_ttl(), clock),
            updates,
            maintenance: Mutex::new(()),
        }
    }

    pub fn directory(&self) -> &Path {
        self.files.root()
    }

    /// Content-addressed location of the art of a source pair
    pub fn art_path(&self, source_a: &str, source_b: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(format!("{}:{}", source_a, source_b)));
        self.files
            .root()
            .join(&digest[..2])
            .join(format!("{}.jpg", &digest[..32]))
    }

    /// Art update events. Slow consumers lose the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<ArtUpdate> {
        self.updates.subscribe()
    }

    pub fn failures(&self) -> &FailedArtCache {
        &self.failures
    }

    /// Store art bytes for a pair, publish the update, then enforce the cap
    pub async fn store(&self, source_a: &str, source_b: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.art_path(source_a, source_b);
        FileManager::atomic_write(&path, data).await?;
        debug!("Stored art for {}:{} at {}", source_a, source_b, path.display());

        // No subscribers is fine
        let _ = self.updates.send(ArtUpdate {
            source_a: source_a.to_string(),
            source_b: source_b.to_string(),
            path: path.clone(),
        });

        if let Err(e) = self.trim().await {
            warn!("Art cache trim failed: {}", e);
        }
        Ok(path)
    }

    /// Extract the first embedded picture of an audio file as the art of a
    /// source pair.
    ///
    /// Returns `None` when the pair is backing off from an earlier failure
    /// or the file carries no picture (which starts a new backoff window).
    pub async fn extract_embedded_art(
        &self,
        source_a: &str,
        source_b: &str,
        audio_path: &Path,
    ) -> Result<Option<PathBuf>> {
        let key = FailedArtCache::key(source_a, source_b);
        if self.failures.is_failed(&key) {
            debug!("Skipping art of {}, inside backoff window", key);
            return Ok(None);
        }

        let path = self.art_path(source_a, source_b);
        if FileManager::file_exists(&path).await {
            return Ok(Some(path));
        }

        let audio = audio_path.to_path_buf();
        let picture = tokio::task::spawn_blocking(move || read_embedded_picture(&audio))
            .await
            .map_err(|e| StreamError::internal(format!("Art extraction task failed: {}", e)))?;

        match picture {
            Some(data) if !data.is_empty() => self.store(source_a, source_b, &data).await.map(Some),
            _ => {
                debug!("No embedded art in {}", audio_path.display());
                self.failures.mark_failed(&key);
                Ok(None)
            }
        }
    }

    /// Total size of all art files
    pub async fn total_size(&self) -> Result<u64> {
        Ok(self.files.list_files().await?.iter().map(|f| f.size).sum())
    }

    /// Shrink the cache below the trim target if it exceeds the cap
    pub async fn trim(&self) -> Result<TrimReport> {
        let _maintenance = self.maintenance.lock().await;

        let mut files = self.files.list_files().await?;
        let mut total: u64 = files.iter().map(|f| f.size).sum();
        let mut report = TrimReport {
            remaining_bytes: total,
            ..Default::default()
        };
        if total <= self.max_bytes {
            return Ok(report);
        }

        files.sort_by_key(|f| f.modified);
        for file in files {
            if total <= self.trim_target {
                break;
            }
            match FileManager::safe_delete(&file.path).await {
                Ok(()) => {
                    total = total.saturating_sub(file.size);
                    report.removed += 1;
                    report.freed_bytes += file.size;
                    if let Err(e) = self.files.cleanup_empty_directories(&file.path).await {
                        debug!("Shard cleanup after {} failed: {}", file.path.display(), e);
                    }
                }
                Err(e) => warn!("Failed to trim {}: {}", file.path.display(), e),
            }
        }

        report.remaining_bytes = total;
        info!(
            "Trimmed art cache: {} files, {} bytes freed, {} bytes left",
            report.removed, report.freed_bytes, report.remaining_bytes
        );
        Ok(report)
    }

    /// Delete every art file. Returns how many were deleted.
    pub async fn clear(&self) -> Result<usize> {
        let _maintenance = self.maintenance.lock().await;

        let mut removed = 0;
        for file in self.files.list_files().await? {
            match FileManager::safe_delete(&file.path).await {
                Ok(()) => {
                    removed += 1;
                    if let Err(e) = self.files.cleanup_empty_directories(&file.path).await {
                        debug!("Shard cleanup after {} failed: {}", file.path.display(), e);
                    }
                }
                Err(e) => warn!("Failed to delete {}: {}", file.path.display(), e),
            }
        }

        info!("Cleared art cache: {} files", removed);
        Ok(removed)
    }
}

/// First picture of the primary (or first) tag
fn read_embedded_picture(path: &Path) -> Option<Vec<u8>> {
    let tagged_file = Probe::open(path).ok()?.read().ok()?;
    let tag = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag())?;

    let picture = tag.pictures().first()?;
    Some(picture.data().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backoff::ManualClock;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn art_cache(temp_dir: &TempDir, max_bytes: u64) -> (ArtCache, Arc<ManualClock>) {
        let config = CacheConfig {
            art_directory: temp_dir.path().join("art"),
            art_max_bytes: max_bytes,
            ..Default::default()
        };
        let clock = Arc::new(ManualClock::default());
        (ArtCache::new(&config, clock.clone()), clock)
    }

    fn set_mtime(path: &Path, seconds: u64) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(seconds))
            .unwrap();
    }

    #[tokio::test]
    async fn test_art_path_layout() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = art_cache(&temp_dir, 1000);

        let path = cache.art_path("chat", "42");
        let digest = hex::encode(Sha256::digest("chat:42"));
        assert_eq!(
            path,
            temp_dir
                .path()
                .join("art")
                .join(&digest[..2])
                .join(format!("{}.jpg", &digest[..32]))
        );
        assert_ne!(path, cache.art_path("chat", "43"));
    }

    #[tokio::test]
    async fn test_trim_removes_oldest_until_target() {
        let temp_dir = TempDir::new().unwrap();
        // Cap large enough that storing never trims on its own
        let (mut cache, _) = art_cache(&temp_dir, 1_000_000);

        let mut paths = Vec::new();
        for i in 0..10u64 {
            let path = cache.store("src", &i.to_string(), &[0u8; 200]).await.unwrap();
            set_mtime(&path, 1_000 + i);
            paths.push(path);
        }
        assert_eq!(cache.total_size().await.unwrap(), 2000);

        cache.max_bytes = 1000;
        cache.trim_target = 800;
        let report = cache.trim().await.unwrap();

        assert_eq!(report.removed, 6);
        assert_eq!(report.remaining_bytes, 800);
        assert!(cache.total_size().await.unwrap() <= 800);
        for (i, path) in paths.iter().enumerate() {
            assert_eq!(path.exists(), i >= 6, "file {}", i);
        }
    }

    #[tokio::test]
    async fn test_trim_below_cap_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = art_cache(&temp_dir, 1000);
        cache.store("a", "b", &[1u8; 300]).await.unwrap();

        let report = cache.trim().await.unwrap();
        assert_eq!(report.removed, 0);
        assert_eq!(report.remaining_bytes, 300);
    }

    #[tokio::test]
    async fn test_store_publishes_update() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = art_cache(&temp_dir, 1000);
        let mut updates = cache.subscribe();

        let path = cache.store("chat", "7", b"jpeg").await.unwrap();
        let update = updates.recv().await.unwrap();
        assert_eq!(update.source_b, "7");
        assert_eq!(update.path, path);
    }

    #[tokio::test]
    async fn test_missing_art_backs_off() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, clock) = art_cache(&temp_dir, 1000);
        let audio = temp_dir.path().join("not-audio.mp3");
        tokio::fs::write(&audio, b"plain bytes").await.unwrap();

        assert_eq!(cache.extract_embedded_art("c", "1", &audio).await.unwrap(), None);
        assert!(cache.failures().is_failed("c:1"));

        clock.advance(Duration::from_secs(301));
        assert!(!cache.failures().is_failed("c:1"));
    }

    #[tokio::test]
    async fn test_existing_art_is_returned() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = art_cache(&temp_dir, 1000);
        let stored = cache.store("c", "2", b"jpeg").await.unwrap();

        let audio = temp_dir.path().join("missing.flac");
        let found = cache.extract_embedded_art("c", "2", &audio).await.unwrap();
        assert_eq!(found, Some(stored));
    }

    #[tokio::test]
    async fn test_clear_deletes_everything() {
        let temp_dir = TempDir::new().unwrap();
        let (cache, _) = art_cache(&temp_dir, 10_000);
        for i in 0..3 {
            cache.store("s", &i.to_string(), b"x").await.unwrap();
        }

        assert_eq!(cache.clear().await.unwrap(), 3);
        assert_eq!(cache.total_size().await.unwrap(), 0);
    }
}
