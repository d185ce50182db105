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


//! File operations for locally cached media and art
//!
//! # Key Operations
//! - Safe deletes with retry (a file may still be open by a trailing reader)
//! - Atomic writes (temp file + rename), so readers never see partial art
//! - Polling for a file to appear on disk
//! - Directory listing with size and modification time, for trimming
//! - Cleanup of empty shard directories

use crate::error::{Result, StreamError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::time::sleep;

/// Maximum retry attempts for file operations
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Delay between retry attempts
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Distinguishes temp files of concurrent atomic writes
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A regular file found under a managed directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

/// File manager rooted at one cache directory
#[derive(Debug, Clone)]
pub struct FileManager {
    root: PathBuf,
}

impl FileManager {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Delete a file, retrying transient failures. A missing file is not an
    /// error.
    pub async fn safe_delete(path: &Path) -> Result<()> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match Self::safe_delete_once(path).await {
                Ok(()) => return Ok(()),
                Err(e) if attempts >= MAX_RETRY_ATTEMPTS => {
                    return Err(StreamError::FileIoError(format!(
                        "Failed to delete file after {} attempts: {}: {}",
                        MAX_RETRY_ATTEMPTS,
                        path.display(),
                        e
                    )));
                }
                Err(_) => {
                    sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    async fn safe_delete_once(path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StreamError::FileIoError(format!(
                "Delete failed: {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Ensure directory exists, creating parent directories as needed
    pub async fn ensure_directory_exists(path: &Path) -> Result<()> {
        fs::create_dir_all(path).await.map_err(|e| {
            StreamError::FileIoError(format!(
                "Failed to create directory {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Check if file exists
    pub async fn file_exists(path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    /// Get file size in bytes
    pub async fn get_file_size(path: &Path) -> Result<u64> {
        let metadata = fs::metadata(path).await.map_err(|e| {
            StreamError::FileIoError(format!("Failed to get file size {}: {}", path.display(), e))
        })?;

        Ok(metadata.len())
    }

    /// Poll until `path` exists. Returns false when all attempts are used up.
    pub async fn wait_for_file(path: &Path, interval: Duration, attempts: u32) -> bool {
        for attempt in 0..attempts {
            if Self::file_exists(path).await {
                return true;
            }
            if attempt + 1 < attempts {
                sleep(interval).await;
            }
        }
        false
    }

    /// Atomic write: write to temp file in the target directory, then rename
    pub async fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        Self::ensure_directory_exists(parent).await?;

        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("file");
        let temp_path = parent.join(format!(
            ".{}.{}-{}.tmp",
            name,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        fs::write(&temp_path, contents).await.map_err(|e| {
            StreamError::FileIoError(format!(
                "Failed to write temp file {}: {}",
                temp_path.display(),
                e
            ))
        })?;

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StreamError::FileIoError(format!(
                "Failed to rename temp file {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            )));
        }

        Ok(())
    }

    /// All regular files below the root, depth first. A missing root is empty.
    pub async fn list_files(&self) -> Result<Vec<FileEntry>> {
        let mut files = Vec::new();
        if !Self::file_exists(&self.root).await {
            return Ok(files);
        }

        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await.map_err(|e| {
                StreamError::FileIoError(format!(
                    "Failed to read directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;

            while let Some(entry) = entries.next_entry().await? {
                let metadata = match entry.metadata().await {
                    Ok(metadata) => metadata,
                    // Deleted between listing and stat
                    Err(_) => continue,
                };

                if metadata.is_dir() {
                    pending.push(entry.path());
                } else if metadata.is_file() {
                    files.push(FileEntry {
                        path: entry.path(),
                        size: metadata.len(),
                        modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    });
                }
            }
        }

        Ok(files)
    }

    /// Remove empty parent directories of `path`, stopping at the root
    pub async fn cleanup_empty_directories(&self, path: &Path) -> Result<()> {
        let mut current = path.parent();

        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }

            let mut entries = match fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    current = dir.parent();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if entries.next_entry().await?.is_some() {
                break;
            }

            // A concurrent writer may have just created a file here
            if fs::remove_dir(dir).await.is_err() {
                break;
            }

            current = dir.parent();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_safe_delete() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.bin");
        fs::write(&file, b"content").await.unwrap();

        FileManager::safe_delete(&file).await.unwrap();
        assert!(!file.exists());

        // Deleting a missing file is fine
        FileManager::safe_delete(&file).await.unwrap();
    }

    #[tokio::test]
    async fn test_atomic_write_creates_parents() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("ab").join("art.jpg");

        FileManager::atomic_write(&file, b"jpeg").await.unwrap();
        assert_eq!(fs::read(&file).await.unwrap(), b"jpeg");

        // No temp files left behind
        let manager = FileManager::new(temp_dir.path().to_path_buf());
        let files = manager.list_files().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 4);
    }

    #[tokio::test]
    async fn test_wait_for_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("late.mp3");

        assert!(!FileManager::wait_for_file(&file, Duration::from_millis(1), 3).await);

        let writer = {
            let file = file.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(20)).await;
                fs::write(&file, b"x").await.unwrap();
            })
        };
        assert!(FileManager::wait_for_file(&file, Duration::from_millis(5), 200).await);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_list_missing_root_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let manager = FileManager::new(temp_dir.path().join("missing"));
        assert!(manager.list_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_empty_directories() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        let manager = FileManager::new(root.clone());

        let file = root.join("ab").join("cd.jpg");
        FileManager::atomic_write(&file, b"x").await.unwrap();
        FileManager::safe_delete(&file).await.unwrap();

        manager.cleanup_empty_directories(&file).await.unwrap();
        assert!(!root.join("ab").exists());
        assert!(root.exists());
    }
}
