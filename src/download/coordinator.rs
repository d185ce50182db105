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


//! Download coordinator: file id in, verified local path out
//!
//! # Resolution order
//! 1. Cached path, verified on disk (a vanished file is a cache miss)
//! 2. In-flight job for the same id: attach to it, no second remote request
//! 3. New job, bounded by a global permit pool (default 4)
//!
//! # Download strategies
//! - Unsized or small files (< 1 MiB): one synchronous remote request,
//!   bounded by 15 s
//! - Larger files: asynchronous start request, then wait (bounded by 60 s)
//!   on the status stream for the first completed event with a local path
//!
//! # Job lifetime
//! Jobs run as their own tokio tasks. A waiter that stops waiting never
//! cancels the job; only `cancel()` and `shutdown()` do. Permit release and
//! registry removal happen in a drop guard inside the task, whatever the
//! outcome.

use crate::client::{FileId, FileStatus, RemoteClient};
use crate::config::CoordinatorConfig;
use crate::error::{Result, StreamError};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use log::{debug, info, warn};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::AbortHandle;

type JobResult = Shared<BoxFuture<'static, Result<PathBuf>>>;

/// Registry entry of a running download job
struct DownloadJob {
    result: JobResult,
    started_at: DateTime<Utc>,
    abort: AbortHandle,
    generation: u64,
}

/// Snapshot of a running job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightDownload {
    pub file_id: FileId,
    pub started_at: DateTime<Utc>,
}

/// Deduplicating, concurrency-bounded download coordinator
pub struct DownloadCoordinator {
    client: Arc<RemoteClient>,
    config: CoordinatorConfig,
    resolved: Arc<DashMap<FileId, PathBuf>>,
    jobs: Arc<DashMap<FileId, DownloadJob>>,
    permits: Arc<Semaphore>,
    next_generation: AtomicU64,
}

impl DownloadCoordinator {
    pub fn new(client: Arc<RemoteClient>, config: CoordinatorConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_downloads.max(1)));
        Self {
            client,
            config,
            resolved: Arc::new(DashMap::new()),
            jobs: Arc::new(DashMap::new()),
            permits,
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn client(&self) -> &Arc<RemoteClient> {
        &self.client
    }

    /// Resolve a file id to a fully downloaded local path
    pub async fn resolve(&self, file_id: FileId, priority: u8) -> Result<PathBuf> {
        if let Some(path) = self.verified_path(file_id).await {
            debug!("Resolved {} from cache: {}", file_id, path.display());
            return Ok(path);
        }

        self.attach_or_start(file_id, priority).await
    }

    /// Resolve, recovering once from a stale file reference.
    ///
    /// File ids can go stale across remote sessions. On a stale-looking
    /// failure `refresh` is asked for a fresh id (typically re-resolved from
    /// a stable external key) and that id is resolved instead. Returns the id
    /// that was actually resolved together with its path.
    pub async fn resolve_or_refresh<F, Fut>(
        &self,
        file_id: FileId,
        priority: u8,
        refresh: F,
    ) -> Result<(FileId, PathBuf)>
    where
        F: FnOnce(FileId) -> Fut,
        Fut: Future<Output = Result<FileId>>,
    {
        match self.resolve(file_id, priority).await {
            Ok(path) => Ok((file_id, path)),
            Err(e) if e.is_stale_reference() => {
                info!("File {} looks stale ({}), refreshing reference", file_id, e);
                self.forget(file_id);
                let fresh = refresh(file_id).await?;
                let path = self.resolve(fresh, priority).await?;
                Ok((fresh, path))
            }
            Err(e) => Err(e),
        }
    }

    /// Make sure a download is running and return as soon as the file has a
    /// local path, without waiting for completion.
    pub async fn start_streaming(
        &self,
        file_id: FileId,
        priority: u8,
        wait: Duration,
    ) -> Result<FileStatus> {
        // Subscribe before asking, so no update between request and wait is lost
        let mut events = self.client.subscribe();

        let status = self.client.get_file(file_id).await?;
        if status.is_ready() {
            return Ok(status);
        }
        if status.is_dead() {
            return Err(StreamError::NotDownloadable(file_id));
        }

        // A registered job may still be queued on a permit without having
        // asked the remote for anything. Only a download the remote reports as
        // running makes the start request redundant.
        let running = status.has_local_path() || status.bytes_available > 0;
        let status = if running {
            status
        } else {
            self.client.download_file(file_id, priority, false).await?
        };
        if status.has_local_path() {
            return Ok(status);
        }
        if status.is_dead() {
            return Err(StreamError::NotDownloadable(file_id));
        }

        tokio::time::timeout(
            wait,
            wait_for_status(&self.client, &mut events, file_id, FileStatus::has_local_path),
        )
        .await
        .map_err(|_| StreamError::timeout("local file", wait))?
    }

    /// Drop a cached path. The file itself is left alone.
    pub fn forget(&self, file_id: FileId) {
        if self.resolved.remove(&file_id).is_some() {
            debug!("Forgot resolved path of {}", file_id);
        }
    }

    /// Cached path without disk verification
    pub fn cached_path(&self, file_id: FileId) -> Option<PathBuf> {
        self.resolved.get(&file_id).map(|path| path.clone())
    }

    /// Jobs currently running
    pub fn in_flight(&self) -> Vec<InFlightDownload> {
        let mut jobs: Vec<InFlightDownload> = self
            .jobs
            .iter()
            .map(|entry| InFlightDownload {
                file_id: *entry.key(),
                started_at: entry.value().started_at,
            })
            .collect();
        jobs.sort_by_key(|job| job.started_at);
        jobs
    }

    /// Abort the job for a file. Attached waiters observe `Cancelled`.
    pub async fn cancel(&self, file_id: FileId) -> bool {
        let Some((_, job)) = self.jobs.remove(&file_id) else {
            return false;
        };
        info!("Cancelling download of {}", file_id);
        job.abort.abort();

        if let Err(e) = self.client.cancel_download(file_id).await {
            warn!("Remote cancel of {} failed: {}", file_id, e);
        }
        true
    }

    /// Abort every job and refuse new ones
    pub fn shutdown(&self) {
        self.permits.close();
        let ids: Vec<FileId> = self.jobs.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, job)) = self.jobs.remove(&id) {
                job.abort.abort();
            }
        }
        info!("Download coordinator shut down");
    }

    async fn verified_path(&self, file_id: FileId) -> Option<PathBuf> {
        let path = self.cached_path(file_id)?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Some(path);
        }

        debug!("Cached path of {} vanished: {}", file_id, path.display());
        self.resolved.remove_if(&file_id, |_, cached| *cached == path);
        None
    }

    fn attach_or_start(&self, file_id: FileId, priority: u8) -> JobResult {
        match self.jobs.entry(file_id) {
            Entry::Occupied(job) => {
                debug!("Attaching to in-flight download of {}", file_id);
                job.get().result.clone()
            }
            Entry::Vacant(slot) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let task = JobTask {
                    client: Arc::clone(&self.client),
                    config: self.config.clone(),
                    resolved: Arc::clone(&self.resolved),
                    permits: Arc::clone(&self.permits),
                    file_id,
                    priority,
                    _guard: JobGuard {
                        jobs: Arc::clone(&self.jobs),
                        file_id,
                        generation,
                    },
                };

                let handle = tokio::spawn(task.run());
                let abort = handle.abort_handle();
                let result = async move {
                    match handle.await {
                        Ok(result) => result,
                        Err(e) if e.is_cancelled() => Err(StreamError::Cancelled),
                        Err(e) => Err(StreamError::internal(format!("Download task failed: {}", e))),
                    }
                }
                .boxed()
                .shared();

                slot.insert(DownloadJob {
                    result: result.clone(),
                    started_at: Utc::now(),
                    abort,
                    generation,
                });
                result
            }
        }
    }
}

/// Removes the registry entry when the job task ends or is aborted
struct JobGuard {
    jobs: Arc<DashMap<FileId, DownloadJob>>,
    file_id: FileId,
    generation: u64,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.jobs
            .remove_if(&self.file_id, |_, job| job.generation == self.generation);
    }
}

/// Everything one job needs, moved into its task
struct JobTask {
    client: Arc<RemoteClient>,
    config: CoordinatorConfig,
    resolved: Arc<DashMap<FileId, PathBuf>>,
    permits: Arc<Semaphore>,
    file_id: FileId,
    priority: u8,
    _guard: JobGuard,
}

impl JobTask {
    async fn run(self) -> Result<PathBuf> {
        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| StreamError::Cancelled)?;

        let result = self.download().await;
        match &result {
            Ok(path) => {
                info!("Resolved {} to {}", self.file_id, path.display());
                self.resolved.insert(self.file_id, path.clone());
            }
            Err(e) => warn!("Download of {} failed: {}", self.file_id, e),
        }
        result
    }

    async fn download(&self) -> Result<PathBuf> {
        let file_id = self.file_id;

        // Another job may have finished the file while this one waited
        let status = self.client.get_file(file_id).await?;
        if let Some(path) = ready_path(&status) {
            return Ok(path);
        }
        if status.is_dead() {
            return Err(StreamError::NotDownloadable(file_id));
        }

        if status.expected_size < self.config.small_file_threshold {
            self.download_synchronously().await
        } else {
            self.download_and_wait().await
        }
    }

    async fn download_synchronously(&self) -> Result<PathBuf> {
        let timeout = self.config.sync_timeout();
        debug!("Synchronous download of {}", self.file_id);

        let status = tokio::time::timeout(
            timeout,
            self.client.download_file(self.file_id, self.priority, true),
        )
        .await
        .map_err(|_| StreamError::timeout("synchronous download", timeout))??;

        match ready_path(&status) {
            Some(path) => Ok(path),
            None if !status.can_be_downloaded => Err(StreamError::NotDownloadable(self.file_id)),
            None => Err(StreamError::remote(format!(
                "Download of {} ended without a local file",
                self.file_id
            ))),
        }
    }

    async fn download_and_wait(&self) -> Result<PathBuf> {
        let timeout = self.config.async_timeout();
        debug!("Asynchronous download of {}", self.file_id);

        let mut events = self.client.subscribe();
        let status = self
            .client
            .download_file(self.file_id, self.priority, false)
            .await?;
        if let Some(path) = ready_path(&status) {
            return Ok(path);
        }
        if status.is_dead() {
            return Err(StreamError::NotDownloadable(self.file_id));
        }

        let status = tokio::time::timeout(
            timeout,
            wait_for_status(&self.client, &mut events, self.file_id, FileStatus::is_ready),
        )
        .await
        .map_err(|_| StreamError::timeout("asynchronous download", timeout))??;

        ready_path(&status).ok_or_else(|| StreamError::internal("Ready status without a path"))
    }
}

fn ready_path(status: &FileStatus) -> Option<PathBuf> {
    if status.is_downloading_completed {
        status.path()
    } else {
        None
    }
}

/// Wait on the status stream for the first status of `file_id` matching
/// `done`, failing fast once the file can no longer be downloaded. After a
/// lag the status is re-queried since events were lost.
async fn wait_for_status(
    client: &RemoteClient,
    events: &mut broadcast::Receiver<FileStatus>,
    file_id: FileId,
    done: fn(&FileStatus) -> bool,
) -> Result<FileStatus> {
    loop {
        let status = match events.recv().await {
            Ok(status) if status.id != file_id => continue,
            Ok(status) => status,
            Err(RecvError::Lagged(missed)) => {
                debug!("Status stream lagged by {} events, re-querying {}", missed, file_id);
                client.get_file(file_id).await?
            }
            Err(RecvError::Closed) => return Err(StreamError::ClientUnavailable),
        };

        if done(&status) {
            return Ok(status);
        }
        if status.is_dead() {
            return Err(StreamError::NotDownloadable(file_id));
        }
    }
}
