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


//! Request/response client over the message-passing transport
//!
//! # Dispatch
//! - Every request gets a correlation id and a oneshot slot in the pending table
//! - A single dispatcher task reads inbound messages, completes pending slots,
//!   republishes file updates on a broadcast channel and tracks session state
//! - When the transport closes, every pending request fails with
//!   `ClientUnavailable`
//!
//! # Event delivery
//! The status stream is best effort: each subscriber buffers up to
//! `ClientConfig::event_buffer` events and loses the oldest ones when it falls
//! behind. Consumers re-query `get_file` after a lag.

use crate::client::transport::{InboundMessage, OutboundMessage, Transport};
use crate::client::types::{FileId, FileStatus, Request, Response, SessionState};
use crate::config::ClientConfig;
use crate::error::{Result, StreamError};
use dashmap::DashMap;
use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

type PendingTable = DashMap<u64, oneshot::Sender<Result<Response>>>;

/// Shared remote content client
pub struct RemoteClient {
    outgoing: mpsc::UnboundedSender<OutboundMessage>,
    pending: Arc<PendingTable>,
    next_request_id: AtomicU64,
    events: broadcast::Sender<FileStatus>,
    session_tx: Arc<watch::Sender<SessionState>>,
    session_rx: watch::Receiver<SessionState>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteClient {
    /// Connect to the remote side and start the dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(transport: Transport, config: &ClientConfig) -> Arc<Self> {
        let Transport { outgoing, incoming } = transport;
        let pending: Arc<PendingTable> = Arc::new(DashMap::new());
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let (session_tx, session_rx) = watch::channel(SessionState::Connecting);
        let session_tx = Arc::new(session_tx);

        let dispatcher = tokio::spawn(Self::dispatch(
            incoming,
            Arc::clone(&pending),
            events.clone(),
            Arc::clone(&session_tx),
        ));

        Arc::new(Self {
            outgoing,
            pending,
            next_request_id: AtomicU64::new(1),
            events,
            session_tx,
            session_rx,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    /// Dispatcher loop: routes inbound messages until the transport closes
    async fn dispatch(
        mut incoming: mpsc::UnboundedReceiver<InboundMessage>,
        pending: Arc<PendingTable>,
        events: broadcast::Sender<FileStatus>,
        session_tx: Arc<watch::Sender<SessionState>>,
    ) {
        while let Some(message) = incoming.recv().await {
            match message {
                InboundMessage::Response { request_id, result } => {
                    match pending.remove(&request_id) {
                        Some((_, slot)) => {
                            // Receiver gone means the caller stopped waiting
                            let _ = slot.send(result.map_err(StreamError::RemoteError));
                        }
                        None => debug!("Dropping response for unknown request {}", request_id),
                    }
                }
                InboundMessage::FileUpdated(status) => {
                    // No subscribers is fine
                    let _ = events.send(status);
                }
                InboundMessage::SessionState(state) => {
                    debug!("Remote session state: {:?}", state);
                    session_tx.send_replace(state);
                }
            }
        }

        warn!("Remote transport closed");
        session_tx.send_replace(SessionState::Closed);
        Self::fail_pending(&pending);
    }

    fn fail_pending(pending: &PendingTable) {
        let ids: Vec<u64> = pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, slot)) = pending.remove(&id) {
                let _ = slot.send(Err(StreamError::ClientUnavailable));
            }
        }
    }

    /// Send a request and wait for its response.
    ///
    /// Dropping the returned future removes the pending slot.
    pub async fn send_request(&self, request: Request) -> Result<Response> {
        if self.is_closed() {
            return Err(StreamError::ClientUnavailable);
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (slot, response) = oneshot::channel();
        self.pending.insert(request_id, slot);
        let _guard = PendingGuard {
            pending: &self.pending,
            request_id,
        };

        // The dispatcher marks the session closed before failing pending
        // slots, so a slot inserted after that point is never answered.
        if self.is_closed() {
            return Err(StreamError::ClientUnavailable);
        }

        debug!("-> {} #{}", request.name(), request_id);
        self.outgoing
            .send(OutboundMessage {
                request_id,
                request,
            })
            .map_err(|_| StreamError::ClientUnavailable)?;

        response.await.map_err(|_| StreamError::ClientUnavailable)?
    }

    /// Subscribe to unsolicited file status updates
    pub fn subscribe(&self) -> broadcast::Receiver<FileStatus> {
        self.events.subscribe()
    }

    /// Current session state
    pub fn session_state(&self) -> SessionState {
        *self.session_rx.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.session_state() == SessionState::Ready
    }

    fn is_closed(&self) -> bool {
        self.session_state() == SessionState::Closed
    }

    /// Wait until the session is ready. Returns false on timeout or once the
    /// session closed.
    pub async fn await_ready(&self, timeout: Duration) -> bool {
        let mut session = self.session_rx.clone();
        let settled = tokio::time::timeout(
            timeout,
            session.wait_for(|state| *state != SessionState::Connecting),
        )
        .await;

        match settled {
            Ok(Ok(state)) => *state == SessionState::Ready,
            _ => false,
        }
    }

    /// Stop the dispatcher and fail every pending request
    pub fn close(&self) {
        if let Ok(mut dispatcher) = self.dispatcher.lock() {
            if let Some(handle) = dispatcher.take() {
                handle.abort();
            }
        }
        self.session_tx.send_replace(SessionState::Closed);
        Self::fail_pending(&self.pending);
    }

    /// Requests still waiting for an answer
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    // ========================================================================
    // Typed requests
    // ========================================================================

    /// Current status of a file
    pub async fn get_file(&self, file_id: FileId) -> Result<FileStatus> {
        self.send_request(Request::GetFile { file_id })
            .await?
            .into_file()
    }

    /// Start a download. Synchronous requests only complete once the remote
    /// finished the download (or failed it).
    pub async fn download_file(
        &self,
        file_id: FileId,
        priority: u8,
        synchronous: bool,
    ) -> Result<FileStatus> {
        self.send_request(Request::DownloadFile {
            file_id,
            priority,
            synchronous,
        })
        .await?
        .into_file()
    }

    pub async fn cancel_download(&self, file_id: FileId) -> Result<()> {
        self.send_request(Request::CancelDownloadFile { file_id })
            .await
            .map(|_| ())
    }

    /// Delete the local copy of a file
    pub async fn delete_file(&self, file_id: FileId) -> Result<()> {
        self.send_request(Request::DeleteFile { file_id })
            .await
            .map(|_| ())
    }

    /// Delete every remote-managed file on disk
    pub async fn optimize_storage_to_zero(&self) -> Result<()> {
        self.send_request(Request::OptimizeStorage { max_size: 0 })
            .await
            .map(|_| ())
    }
}

impl Drop for RemoteClient {
    fn drop(&mut self) {
        if let Ok(mut dispatcher) = self.dispatcher.lock() {
            if let Some(handle) = dispatcher.take() {
                handle.abort();
            }
        }
    }
}

/// Removes a pending slot when the request future finishes or is dropped
struct PendingGuard<'a> {
    pending: &'a PendingTable,
    request_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.request_id);
    }
}
