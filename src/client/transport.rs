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


//! Message-passing transport between `RemoteClient` and the remote side
//!
//! The client never talks to the remote library directly. Outgoing requests
//! carry a correlation id; the remote side answers with a message carrying
//! the same id, or pushes unsolicited file and session updates. Whatever
//! bridges the real remote library (FFI thread, JSON pipe) holds the
//! `RemoteEndpoint` half.

use crate::client::types::{FileStatus, Request, Response, SessionState};
use tokio::sync::mpsc;

/// Request sent to the remote side
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Correlation id echoed back in the response
    pub request_id: u64,
    pub request: Request,
}

/// Message received from the remote side
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// Answer to an `OutboundMessage`; errors carry the remote's message
    Response {
        request_id: u64,
        result: std::result::Result<Response, String>,
    },
    /// Unsolicited status change of a file
    FileUpdated(FileStatus),
    /// Session state change
    SessionState(SessionState),
}

/// Client half of the transport
#[derive(Debug)]
pub struct Transport {
    pub(crate) outgoing: mpsc::UnboundedSender<OutboundMessage>,
    pub(crate) incoming: mpsc::UnboundedReceiver<InboundMessage>,
}

impl Transport {
    /// Wrap channel ends created by a custom bridge
    pub fn new(
        outgoing: mpsc::UnboundedSender<OutboundMessage>,
        incoming: mpsc::UnboundedReceiver<InboundMessage>,
    ) -> Self {
        Self { outgoing, incoming }
    }

    /// Create a connected client half and remote half
    pub fn pair() -> (Transport, RemoteEndpoint) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        (
            Transport::new(out_tx, in_rx),
            RemoteEndpoint {
                requests: out_rx,
                responder: RemoteResponder { sender: in_tx },
            },
        )
    }
}

/// Remote half of the transport: receives requests, sends answers and updates
#[derive(Debug)]
pub struct RemoteEndpoint {
    requests: mpsc::UnboundedReceiver<OutboundMessage>,
    responder: RemoteResponder,
}

impl RemoteEndpoint {
    /// Next request from the client, `None` once the client is gone
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        self.requests.recv().await
    }

    /// Cloneable handle for answering from other tasks
    pub fn responder(&self) -> RemoteResponder {
        self.responder.clone()
    }

    /// Split into the request stream and the responder
    pub fn split(self) -> (mpsc::UnboundedReceiver<OutboundMessage>, RemoteResponder) {
        (self.requests, self.responder)
    }
}

/// Sending side of the remote half
#[derive(Debug, Clone)]
pub struct RemoteResponder {
    sender: mpsc::UnboundedSender<InboundMessage>,
}

impl RemoteResponder {
    /// Answer a request. Returns false once the client is gone.
    pub fn respond(&self, request_id: u64, result: std::result::Result<Response, String>) -> bool {
        self.sender
            .send(InboundMessage::Response { request_id, result })
            .is_ok()
    }

    /// Push a file status update
    pub fn file_updated(&self, status: FileStatus) -> bool {
        self.sender.send(InboundMessage::FileUpdated(status)).is_ok()
    }

    /// Push a session state change
    pub fn session_state(&self, state: SessionState) -> bool {
        self.sender.send(InboundMessage::SessionState(state)).is_ok()
    }
}
