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


//! Streaming proxy
//!
//! Serves files over loopback HTTP while the remote is still writing them,
//! with byte-range support so players can seek.

pub mod body;
pub mod range;
pub mod server;

// Re-export commonly used types
pub use body::StreamEnd;
pub use range::{parse_range, ByteRange};
pub use server::{content_type, StreamingProxy};
