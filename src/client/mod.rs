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


//! Remote content client
//!
//! The remote library downloads files into its own cache directory and
//! reports progress asynchronously. Everything here is a thin, typed layer
//! over a message transport:
//! - `types` - file ids, file status, requests and responses
//! - `transport` - the channel pair connecting client and remote
//! - `remote` - the correlating client with its status event stream
//! - `simulated` - an in-process remote used for demos and tests

pub mod remote;
pub mod simulated;
pub mod transport;
pub mod types;

pub use remote::RemoteClient;
pub use simulated::{SimulatedRemote, SimulatedRemoteOptions};
pub use transport::{InboundMessage, OutboundMessage, RemoteEndpoint, RemoteResponder, Transport};
pub use types::{FileId, FileStatus, Request, Response, SessionState};
