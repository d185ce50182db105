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


//! Cache management
//!
//! - `history` - bounded LRU of recently played files
//! - `backoff` - TTL memory of failed art fetches, with an injectable clock
//! - `art` - content-addressed, size-capped art directory
//! - `manager` - ties the policies to playback events

pub mod art;
pub mod backoff;
pub mod history;
pub mod manager;

// Re-export commonly used types
pub use art::{ArtCache, ArtUpdate, TrimReport};
pub use backoff::{Clock, FailedArtCache, ManualClock, SystemClock};
pub use history::PlaybackHistory;
pub use manager::CacheManager;
