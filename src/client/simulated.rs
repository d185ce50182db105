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


//! In-process remote that serves registered byte contents
//!
//! Downloads are written into a cache directory at a throttled rate so a
//! consumer sees a file that grows over time, with a status update pushed
//! after every chunk. Used by the CLI demo server and the test suite.

use crate::client::transport::{OutboundMessage, RemoteResponder, Transport};
use crate::client::types::{FileId, FileStatus, Request, Response, SessionState};
use crate::error::{Result, StreamError};
use dashmap::DashMap;
use log::{debug, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Behaviour of a `SimulatedRemote`
#[derive(Debug, Clone)]
pub struct SimulatedRemoteOptions {
    /// Directory the "downloaded" files are written to
    pub cache_dir: PathBuf,

    /// Bytes written per tick
    pub bytes_per_tick: usize,

    /// Delay between two writes
    pub tick: Duration,

    /// Report a ready session immediately
    pub start_ready: bool,
}

impl SimulatedRemoteOptions {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            bytes_per_tick: 64 * 1024,
            tick: Duration::from_millis(5),
            start_ready: true,
        }
    }
}

struct SimulatedFile {
    name: String,
    content: Arc<Vec<u8>>,
    status: FileStatus,
    stall_at: Option<u64>,
    writer: Option<JoinHandle<()>>,
}

type FileTable = Arc<Mutex<HashMap<FileId, SimulatedFile>>>;

/// Remote side of a transport backed by in-memory contents
pub struct SimulatedRemote {
    files: FileTable,
    responder: RemoteResponder,
    options: SimulatedRemoteOptions,
    request_counts: DashMap<&'static str, usize>,
    server: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedRemote {
    /// Start serving. The returned transport goes to `RemoteClient::connect`.
    pub fn start(options: SimulatedRemoteOptions) -> (Arc<Self>, Transport) {
        let (transport, endpoint) = Transport::pair();
        let (requests, responder) = endpoint.split();

        if options.start_ready {
            responder.session_state(SessionState::Ready);
        }

        let remote = Arc::new(Self {
            files: Arc::new(Mutex::new(HashMap::new())),
            responder,
            options,
            request_counts: DashMap::new(),
            server: std::sync::Mutex::new(None),
        });

        let server = tokio::spawn(Self::serve(Arc::downgrade(&remote), requests));
        if let Ok(mut slot) = remote.server.lock() {
            *slot = Some(server);
        }

        (remote, transport)
    }

    async fn serve(remote: Weak<Self>, mut requests: mpsc::UnboundedReceiver<OutboundMessage>) {
        while let Some(message) = requests.recv().await {
            let Some(remote) = remote.upgrade() else {
                break;
            };
            remote.handle(message).await;
        }
        debug!("Simulated remote stopped serving");
    }

    async fn handle(&self, message: OutboundMessage) {
        *self.request_counts.entry(message.request.name()).or_insert(0) += 1;
        let request_id = message.request_id;

        match message.request {
            Request::GetFile { file_id } => {
                let result = self.status(file_id).await.ok_or_else(|| unknown(file_id));
                self.responder
                    .respond(request_id, result.map(Response::File));
            }
            Request::DownloadFile {
                file_id,
                synchronous,
                ..
            } => {
                let status = match self.begin_download(file_id).await {
                    Ok(status) => status,
                    Err(e) => {
                        self.responder.respond(request_id, Err(e));
                        return;
                    }
                };

                if !synchronous || status.is_downloading_completed || !status.can_be_downloaded {
                    self.responder
                        .respond(request_id, Ok(Response::File(status)));
                    return;
                }

                // Synchronous: answer once the writer finished
                let files = Arc::clone(&self.files);
                let responder = self.responder.clone();
                let tick = self.options.tick;
                tokio::spawn(async move {
                    let result = wait_for_completion(&files, file_id, tick).await;
                    responder.respond(request_id, result.map(Response::File));
                });
            }
            Request::CancelDownloadFile { file_id } => {
                let mut files = self.files.lock().await;
                if let Some(file) = files.get_mut(&file_id) {
                    if let Some(writer) = file.writer.take() {
                        writer.abort();
                        self.responder.file_updated(file.status.clone());
                    }
                }
                self.responder.respond(request_id, Ok(Response::Ok));
            }
            Request::DeleteFile { file_id } => {
                let mut files = self.files.lock().await;
                match files.get_mut(&file_id) {
                    Some(file) => {
                        self.reset(file).await;
                        self.responder.respond(request_id, Ok(Response::Ok));
                    }
                    None => {
                        self.responder.respond(request_id, Err(unknown(file_id)));
                    }
                }
            }
            Request::OptimizeStorage { max_size } => {
                let mut files = self.files.lock().await;
                let mut used: u64 = files.values().map(|f| f.status.bytes_available).sum();
                for file in files.values_mut() {
                    if used <= max_size {
                        break;
                    }
                    used = used.saturating_sub(file.status.bytes_available);
                    self.reset(file).await;
                }
                self.responder.respond(request_id, Ok(Response::Ok));
            }
        }
    }

    async fn begin_download(&self, file_id: FileId) -> std::result::Result<FileStatus, String> {
        let mut files = self.files.lock().await;
        let file = files.get_mut(&file_id).ok_or_else(|| unknown(file_id))?;

        if file.status.is_downloading_completed
            || !file.status.can_be_downloaded
            || file.writer.is_some()
        {
            return Ok(file.status.clone());
        }

        let job = WriteJob {
            files: Arc::clone(&self.files),
            responder: self.responder.clone(),
            file_id,
            path: self.local_path(file_id, &file.name),
            content: Arc::clone(&file.content),
            stall_at: file.stall_at,
            bytes_per_tick: self.options.bytes_per_tick.max(1),
            tick: self.options.tick,
        };
        file.writer = Some(tokio::spawn(job.run()));

        Ok(file.status.clone())
    }

    /// Stop writing and remove the local copy
    async fn reset(&self, file: &mut SimulatedFile) {
        if let Some(writer) = file.writer.take() {
            writer.abort();
        }
        if let Some(path) = file.status.path() {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!("Simulated delete of {}: {}", path.display(), e);
            }
        }
        file.status.local_path = None;
        file.status.bytes_available = 0;
        file.status.is_downloading_completed = false;
        self.responder.file_updated(file.status.clone());
    }

    fn local_path(&self, file_id: FileId, name: &str) -> PathBuf {
        self.options.cache_dir.join(format!("{}_{}", file_id, name))
    }

    // ========================================================================
    // Setup and inspection
    // ========================================================================

    /// Register a downloadable file
    pub async fn add_file(&self, file_id: FileId, name: &str, content: Vec<u8>) {
        let status = FileStatus {
            id: file_id,
            local_path: None,
            bytes_available: 0,
            expected_size: content.len() as u64,
            is_downloading_completed: false,
            can_be_downloaded: true,
        };
        self.files.lock().await.insert(
            file_id,
            SimulatedFile {
                name: name.to_string(),
                content: Arc::new(content),
                status,
                stall_at: None,
                writer: None,
            },
        );
    }

    /// Register the contents of a file on disk under its file name
    pub async fn add_file_from_path(&self, file_id: FileId, path: &Path) -> Result<()> {
        let content = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StreamError::invalid_input(format!("Invalid path: {:?}", path)))?;
        self.add_file(file_id, name, content).await;
        Ok(())
    }

    /// Make the file complete on disk without any download
    pub async fn preload(&self, file_id: FileId) -> Result<PathBuf> {
        let mut files = self.files.lock().await;
        let file = files
            .get_mut(&file_id)
            .ok_or_else(|| StreamError::FileNotFound(file_id.to_string()))?;
        let path = self.local_path(file_id, &file.name);
        tokio::fs::write(&path, file.content.as_slice()).await?;
        file.status.local_path = Some(path.to_string_lossy().into_owned());
        file.status.bytes_available = file.content.len() as u64;
        file.status.is_downloading_completed = true;
        Ok(path)
    }

    /// Report an unknown total size for this file
    pub async fn hide_size(&self, file_id: FileId) {
        if let Some(file) = self.files.lock().await.get_mut(&file_id) {
            file.status.expected_size = 0;
        }
    }

    /// Stop writing (without finishing) once `offset` bytes exist
    pub async fn set_stall_at(&self, file_id: FileId, offset: u64) {
        if let Some(file) = self.files.lock().await.get_mut(&file_id) {
            file.stall_at = Some(offset);
        }
    }

    /// Mark the file as no longer downloadable
    pub async fn set_not_downloadable(&self, file_id: FileId) {
        if let Some(file) = self.files.lock().await.get_mut(&file_id) {
            file.status.can_be_downloaded = false;
            if let Some(writer) = file.writer.take() {
                writer.abort();
            }
            self.responder.file_updated(file.status.clone());
        }
    }

    pub fn set_ready(&self) {
        self.responder.session_state(SessionState::Ready);
    }

    pub fn set_session_state(&self, state: SessionState) {
        self.responder.session_state(state);
    }

    /// Current status of a registered file
    pub async fn status(&self, file_id: FileId) -> Option<FileStatus> {
        self.files
            .lock()
            .await
            .get(&file_id)
            .map(|file| file.status.clone())
    }

    /// How many requests of a kind (`Request::name`) were received
    pub fn request_count(&self, name: &str) -> usize {
        self.request_counts
            .get(name)
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Stop serving requests
    pub fn shutdown(&self) {
        if let Ok(mut server) = self.server.lock() {
            if let Some(handle) = server.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for SimulatedRemote {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn unknown(file_id: FileId) -> String {
    format!("FILE_NOT_FOUND: {}", file_id)
}

async fn wait_for_completion(
    files: &FileTable,
    file_id: FileId,
    tick: Duration,
) -> std::result::Result<FileStatus, String> {
    loop {
        tokio::time::sleep(tick).await;
        let files = files.lock().await;
        let file = files.get(&file_id).ok_or_else(|| unknown(file_id))?;
        if file.status.is_downloading_completed {
            return Ok(file.status.clone());
        }
        if file.writer.is_none() {
            return Err(format!("DOWNLOAD_CANCELLED: {}", file_id));
        }
    }
}

/// Throttled writer of one file
struct WriteJob {
    files: FileTable,
    responder: RemoteResponder,
    file_id: FileId,
    path: PathBuf,
    content: Arc<Vec<u8>>,
    stall_at: Option<u64>,
    bytes_per_tick: usize,
    tick: Duration,
}

impl WriteJob {
    async fn run(self) {
        let mut out = match tokio::fs::File::create(&self.path).await {
            Ok(out) => out,
            Err(e) => {
                warn!("Simulated download of {} failed: {}", self.file_id, e);
                self.finish(None).await;
                return;
            }
        };

        let total = self.content.len();
        let limit = self
            .stall_at
            .map(|offset| (offset as usize).min(total))
            .unwrap_or(total);
        let mut written = 0usize;

        while written < total {
            if written >= limit {
                debug!("Simulated download of {} stalled at {}", self.file_id, written);
                std::future::pending::<()>().await;
            }

            tokio::time::sleep(self.tick).await;
            let end = (written + self.bytes_per_tick).min(limit);
            let chunk = &self.content[written..end];
            if let Err(e) = out.write_all(chunk).await {
                warn!("Simulated write of {} failed: {}", self.file_id, e);
                self.finish(None).await;
                return;
            }
            if let Err(e) = out.flush().await {
                warn!("Simulated flush of {} failed: {}", self.file_id, e);
            }
            written = end;

            let status = {
                let mut files = self.files.lock().await;
                let Some(file) = files.get_mut(&self.file_id) else {
                    return;
                };
                file.status.local_path = Some(self.path.to_string_lossy().into_owned());
                file.status.bytes_available = written as u64;
                file.status.clone()
            };
            self.responder.file_updated(status);
        }

        self.finish(Some(written as u64)).await;
    }

    /// Mark completion (`Some(bytes)`) or failure and release the writer slot
    async fn finish(&self, completed: Option<u64>) {
        let status = {
            let mut files = self.files.lock().await;
            let Some(file) = files.get_mut(&self.file_id) else {
                return;
            };
            file.writer = None;
            if let Some(bytes) = completed {
                file.status.local_path = Some(self.path.to_string_lossy().into_owned());
                file.status.bytes_available = bytes;
                file.status.is_downloading_completed = true;
            }
            file.status.clone()
        };
        self.responder.file_updated(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RemoteClient;
    use crate::config::ClientConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_synchronous_download_completes() {
        let temp_dir = TempDir::new().unwrap();
        let mut options = SimulatedRemoteOptions::new(temp_dir.path());
        options.bytes_per_tick = 100;
        options.tick = Duration::from_millis(1);
        let (remote, transport) = SimulatedRemote::start(options);
        let client = RemoteClient::connect(transport, &ClientConfig::default());

        let content: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        remote.add_file(FileId(1), "track.mp3", content.clone()).await;

        let status = client.download_file(FileId(1), 1, true).await.unwrap();
        assert!(status.is_ready());
        assert_eq!(status.bytes_available, 1000);

        let on_disk = tokio::fs::read(status.path().unwrap()).await.unwrap();
        assert_eq!(on_disk, content);
        assert_eq!(remote.request_count("downloadFile"), 1);
    }

    #[tokio::test]
    async fn test_delete_resets_status() {
        let temp_dir = TempDir::new().unwrap();
        let (remote, transport) = SimulatedRemote::start(SimulatedRemoteOptions::new(temp_dir.path()));
        let client = RemoteClient::connect(transport, &ClientConfig::default());

        remote.add_file(FileId(2), "a.flac", vec![1; 64]).await;
        let path = remote.preload(FileId(2)).await.unwrap();
        assert!(path.exists());

        client.delete_file(FileId(2)).await.unwrap();
        let status = client.get_file(FileId(2)).await.unwrap();
        assert!(!status.has_local_path());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_unknown_file_is_remote_error() {
        let temp_dir = TempDir::new().unwrap();
        let (_remote, transport) = SimulatedRemote::start(SimulatedRemoteOptions::new(temp_dir.path()));
        let client = RemoteClient::connect(transport, &ClientConfig::default());

        let err = client.get_file(FileId(404)).await.unwrap_err();
        assert!(matches!(err, StreamError::RemoteError(_)));
    }
}
