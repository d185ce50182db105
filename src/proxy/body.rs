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


//! Response body that follows a file while it is being downloaded
//!
//! # Read loop
//! - Bytes below the current on-disk length are read immediately, in chunks
//! - At the on-disk frontier the loop sleeps briefly and looks again
//! - Every Nth idle poll asks the remote for the file status: a completed
//!   download whose bytes are all on disk, or a download that can never
//!   complete, ends the stream
//! - No new bytes for the stall timeout ends the stream with an error
//!
//! The read cursor never passes the on-disk length, so only bytes the
//! downloader actually wrote are ever sent.

use crate::client::{FileId, RemoteClient};
use crate::config::ProxyConfig;
use crate::error::is_disconnect_kind;
use crate::proxy::range::ByteRange;
use bytes::Bytes;
use futures_util::Stream;
use log::{debug, error};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::Instant;

/// Why a stream stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Requested range fully sent
    Delivered,
    /// Download finished and every byte on disk was sent
    Completed,
    /// No new bytes within the stall timeout
    Stalled,
    /// Download can no longer complete
    Dead,
    /// Reading the local file failed
    Failed,
}

/// Everything the body stream needs
pub struct StreamSource {
    pub client: Arc<RemoteClient>,
    pub file_id: FileId,
    pub path: PathBuf,
    pub range: ByteRange,
    pub config: ProxyConfig,
}

/// Logs how a stream ended. Dropped without an end means the HTTP client
/// went away and the server dropped the body.
struct StreamLog {
    file_id: FileId,
    sent: u64,
    end: Option<StreamEnd>,
}

impl Drop for StreamLog {
    fn drop(&mut self) {
        match self.end {
            Some(end) => debug!(
                "Stream of {} ended ({:?}) after {} bytes",
                self.file_id, end, self.sent
            ),
            None => debug!(
                "Stream of {} dropped by client after {} bytes",
                self.file_id, self.sent
            ),
        }
    }
}

/// Build the progressive body stream
pub fn progressive_stream(
    source: StreamSource,
) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> {
    async_stream::stream! {
        let StreamSource { client, file_id, path, range, config } = source;
        let mut log = StreamLog { file_id, sent: 0, end: None };

        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                error!("Failed to open {}: {}", path.display(), e);
                log.end = Some(StreamEnd::Failed);
                yield Err(e);
                return;
            }
        };
        if let Err(e) = file.seek(SeekFrom::Start(range.start)).await {
            error!("Failed to seek {} to {}: {}", path.display(), range.start, e);
            log.end = Some(StreamEnd::Failed);
            yield Err(e);
            return;
        }

        let mut buffer = vec![0u8; config.chunk_size];
        let mut position = range.start;
        let mut idle_polls: u32 = 0;
        let mut last_progress = Instant::now();
        let stall_timeout = config.stall_timeout();

        loop {
            if range.is_delivered(position) {
                log.end = Some(StreamEnd::Delivered);
                break;
            }

            let on_disk = match file.metadata().await {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    report_read_error(file_id, &e);
                    log.end = Some(StreamEnd::Failed);
                    yield Err(e);
                    break;
                }
            };

            if position < on_disk {
                let mut want = (on_disk - position).min(buffer.len() as u64);
                if let Some(end) = range.end {
                    want = want.min(end - position + 1);
                }

                match file.read(&mut buffer[..want as usize]).await {
                    Ok(0) => {}
                    Ok(n) => {
                        position += n as u64;
                        log.sent += n as u64;
                        idle_polls = 0;
                        last_progress = Instant::now();
                        yield Ok(Bytes::copy_from_slice(&buffer[..n]));
                        continue;
                    }
                    Err(e) => {
                        report_read_error(file_id, &e);
                        log.end = Some(StreamEnd::Failed);
                        yield Err(e);
                        break;
                    }
                }
            }

            // Caught up with the downloader
            if last_progress.elapsed() >= stall_timeout {
                log.end = Some(StreamEnd::Stalled);
                yield Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("No new bytes of {} for {:?}", file_id, stall_timeout),
                ));
                break;
            }

            idle_polls = idle_polls.wrapping_add(1);
            if idle_polls % config.status_check_every.max(1) == 0 {
                match client.get_file(file_id).await {
                    Ok(status) => {
                        let complete_size = status.expected_size.max(status.bytes_available);
                        if status.is_downloading_completed && on_disk >= complete_size {
                            log.end = Some(StreamEnd::Completed);
                            break;
                        }
                        if status.is_dead() {
                            log.end = Some(StreamEnd::Dead);
                            yield Err(std::io::Error::new(
                                std::io::ErrorKind::Other,
                                format!("Download of {} can no longer complete", file_id),
                            ));
                            break;
                        }
                    }
                    Err(e) => debug!("Status check of {} failed: {}", file_id, e),
                }
            }

            tokio::time::sleep(config.stream_poll_interval()).await;
        }
    }
}

fn report_read_error(file_id: FileId, e: &std::io::Error) {
    if is_disconnect_kind(e.kind()) {
        debug!("Stream of {} interrupted: {}", file_id, e);
    } else {
        error!("Stream of {} failed: {}", file_id, e);
    }
}
