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


//! Loopback HTTP server streaming remote files to a local media player
//!
//! # Route
//! `GET /stream/:file_id?size={knownSize}`
//!
//! # Responses
//! - 206 with `Content-Range` and `Content-Length` when the total size is known
//! - 200 without a length when it is not
//! - 400 invalid id, 416 unsatisfiable range, 500 download or file errors,
//!   503 remote session not ready

use crate::client::FileId;
use crate::config::ProxyConfig;
use crate::download::DownloadCoordinator;
use crate::error::{Result, StreamError};
use crate::file::FileManager;
use crate::proxy::body::{progressive_stream, StreamSource};
use crate::proxy::range::parse_range;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::path::Path as FsPath;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// How long `stop()` lets open streams finish before aborting them
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct StreamQuery {
    size: Option<u64>,
}

/// Local streaming proxy
pub struct StreamingProxy {
    coordinator: Arc<DownloadCoordinator>,
    config: ProxyConfig,
    port_tx: watch::Sender<Option<u16>>,
    port_rx: watch::Receiver<Option<u16>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingProxy {
    pub fn new(coordinator: Arc<DownloadCoordinator>, config: ProxyConfig) -> Arc<Self> {
        let (port_tx, port_rx) = watch::channel(None);
        Arc::new(Self {
            coordinator,
            config,
            port_tx,
            port_rx,
            shutdown: Mutex::new(None),
            server: Mutex::new(None),
        })
    }

    /// Bind an ephemeral loopback port and start serving. Returns the port.
    pub async fn start(self: &Arc<Self>) -> Result<u16> {
        if let Some(port) = self.port() {
            return Ok(port);
        }

        let addr = format!("{}:0", self.config.bind_address);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            StreamError::ConfigurationError(format!("Failed to bind proxy on {}: {}", addr, e))
        })?;
        let port = listener.local_addr()?.port();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let router = Router::new()
            .route("/stream/:file_id", get(Self::handle_stream))
            .with_state(Arc::clone(self));

        let port_tx = self.port_tx.clone();
        let server = tokio::spawn(async move {
            port_tx.send_replace(Some(port));
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                error!("Streaming proxy server error: {}", e);
            }
            port_tx.send_replace(None);
        });

        store(&self.shutdown, shutdown_tx);
        store(&self.server, server);

        for _ in 0..self.config.port_poll_attempts.max(1) {
            if let Some(port) = self.port() {
                info!("Streaming proxy listening on {}:{}", self.config.bind_address, port);
                return Ok(port);
            }
            tokio::time::sleep(self.config.port_poll_interval()).await;
        }

        let waited = self.config.port_poll_interval() * self.config.port_poll_attempts;
        Err(StreamError::timeout("proxy startup", waited))
    }

    /// Bound port, `None` until started
    pub fn port(&self) -> Option<u16> {
        *self.port_rx.borrow()
    }

    /// Wait until the port is known
    pub async fn await_ready(&self, timeout: Duration) -> bool {
        let mut port = self.port_rx.clone();
        let ready = matches!(
            tokio::time::timeout(timeout, port.wait_for(|port| port.is_some())).await,
            Ok(Ok(_))
        );
        ready
    }

    /// URL a media player can open, empty if the proxy is not running
    pub fn proxy_url(&self, file_id: FileId, known_size: Option<u64>) -> String {
        let Some(port) = self.port() else {
            return String::new();
        };

        let base = format!(
            "http://{}:{}/stream/{}",
            self.config.bind_address, port, file_id
        );
        match known_size.filter(|size| *size > 0) {
            Some(size) => format!("{}?size={}", base, size),
            None => base,
        }
    }

    /// Stop accepting connections and let open streams finish briefly
    pub async fn stop(&self) {
        if let Some(shutdown) = take(&self.shutdown) {
            let _ = shutdown.send(());
        }

        if let Some(server) = take(&self.server) {
            let abort = server.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, server).await.is_err() {
                warn!("Streaming proxy did not drain in {:?}, aborting", SHUTDOWN_GRACE);
                abort.abort();
            }
        }

        self.port_tx.send_replace(None);
        info!("Streaming proxy stopped");
    }

    async fn handle_stream(
        State(proxy): State<Arc<StreamingProxy>>,
        Path(raw_id): Path<String>,
        Query(query): Query<StreamQuery>,
        headers: HeaderMap,
    ) -> Response {
        match proxy.serve(&raw_id, query.size, &headers).await {
            Ok(response) => response,
            Err(e) => error_response(&raw_id, e),
        }
    }

    async fn serve(
        &self,
        raw_id: &str,
        query_size: Option<u64>,
        headers: &HeaderMap,
    ) -> Result<Response> {
        let file_id: FileId = raw_id.parse()?;
        let client = self.coordinator.client();

        let session_wait = self.config.session_ready_timeout();
        if !client.await_ready(session_wait).await {
            return Err(StreamError::SessionNotReady {
                seconds: session_wait.as_secs(),
            });
        }

        let file_wait = self.config.file_poll_interval() * self.config.file_poll_attempts;
        let status = self
            .coordinator
            .start_streaming(file_id, self.config.stream_priority, file_wait)
            .await?;
        let path = status
            .path()
            .ok_or_else(|| StreamError::internal(format!("No local path for {}", file_id)))?;

        if !FileManager::wait_for_file(
            &path,
            self.config.file_poll_interval(),
            self.config.file_poll_attempts,
        )
        .await
        {
            return Err(StreamError::timeout("file appearance", file_wait));
        }

        // Query parameter, then remote size. The on-disk length only counts
        // once the download is complete; an unfinished file of unknown size
        // is served as 200 without a length.
        let mut size = query_size
            .filter(|s| *s > 0)
            .or(Some(status.expected_size).filter(|s| *s > 0));
        if size.is_none() && status.is_downloading_completed {
            size = FileManager::get_file_size(&path).await.ok().filter(|s| *s > 0);
        }

        let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
        let range = match parse_range(range_header, size) {
            Ok(range) => range,
            Err(StreamError::InvalidRange) => {
                debug!("Unsatisfiable range {:?} for {}", range_header, file_id);
                return Ok(range_not_satisfiable(size));
            }
            Err(e) => return Err(e),
        };

        debug!(
            "Streaming {} from {} ({:?}, size {:?})",
            file_id,
            path.display(),
            range,
            size
        );

        let mut response = axum::http::Response::builder()
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CONTENT_TYPE, content_type(&path));
        response = match (size, range.len()) {
            (Some(size), Some(len)) => response
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_RANGE, range.content_range(size))
                .header(header::CONTENT_LENGTH, len),
            _ => response.status(StatusCode::OK),
        };

        let body = Body::from_stream(progressive_stream(StreamSource {
            client: Arc::clone(client),
            file_id,
            path,
            range,
            config: self.config.clone(),
        }));

        response
            .body(body)
            .map_err(|e| StreamError::internal(format!("Failed to build response: {}", e)))
    }
}

fn range_not_satisfiable(size: Option<u64>) -> Response {
    let mut response = StatusCode::RANGE_NOT_SATISFIABLE.into_response();
    if let Some(size) = size {
        if let Ok(value) = format!("bytes */{}", size).parse() {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
    }
    response
}

fn error_response(raw_id: &str, e: StreamError) -> Response {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
        error!("Stream request for '{}' failed: {}", raw_id, e);
    } else {
        warn!("Stream request for '{}' rejected: {}", raw_id, e);
    }
    (status, e.to_string()).into_response()
}

/// MIME type from the backing file's extension
pub fn content_type(path: &FsPath) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("flac") => "audio/flac",
        Some("m4a" | "m4b" | "mp4" | "aac") => "audio/mp4",
        Some("ogg" | "oga" | "opus") => "audio/ogg",
        Some("wav") => "audio/wav",
        _ => "application/octet-stream",
    }
}

fn store<T>(slot: &Mutex<Option<T>>, value: T) {
    if let Ok(mut slot) = slot.lock() {
        *slot = Some(value);
    }
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().ok().and_then(|mut slot| slot.take())
}
