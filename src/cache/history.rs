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


//! Bounded playback history in least-recently-used order

use crate::client::FileId;
use std::collections::VecDeque;

/// Recently played files, oldest first.
///
/// Never holds duplicates and never grows past its capacity. The active
/// file is always the most recent entry, so it is never the one evicted.
#[derive(Debug, Clone)]
pub struct PlaybackHistory {
    capacity: usize,
    entries: VecDeque<FileId>,
    active: Option<FileId>,
}

impl PlaybackHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity + 1),
            active: None,
        }
    }

    /// Mark a file as playing and move it to the most recent end.
    /// Returns the entries pushed out, oldest first.
    pub fn set_active(&mut self, file_id: FileId) -> Vec<FileId> {
        self.active = Some(file_id);
        self.touch(file_id)
    }

    /// Move a file to the most recent end without changing the active marker
    pub fn touch(&mut self, file_id: FileId) -> Vec<FileId> {
        self.entries.retain(|id| *id != file_id);
        self.entries.push_back(file_id);

        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.entries.pop_front() {
                evicted.push(oldest);
            }
        }
        evicted
    }

    pub fn clear_active(&mut self) {
        self.active = None;
    }

    pub fn active(&self) -> Option<FileId> {
        self.active
    }

    pub fn contains(&self, file_id: FileId) -> bool {
        self.entries.contains(&file_id)
    }

    /// Entries, oldest first
    pub fn entries(&self) -> Vec<FileId> {
        self.entries.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Forget everything, including the active marker
    pub fn clear(&mut self) {
        self.entries.clear();
        self.active = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_beyond_capacity() {
        let mut history = PlaybackHistory::new(3);
        for id in 1..=3 {
            assert!(history.set_active(FileId(id)).is_empty());
        }

        assert_eq!(history.set_active(FileId(4)), vec![FileId(1)]);
        assert_eq!(history.entries(), vec![FileId(2), FileId(3), FileId(4)]);
        assert_eq!(history.active(), Some(FileId(4)));
    }

    #[test]
    fn test_replay_moves_to_most_recent() {
        let mut history = PlaybackHistory::new(3);
        for id in [1, 2, 3, 1] {
            history.set_active(FileId(id));
        }
        assert_eq!(history.entries(), vec![FileId(2), FileId(3), FileId(1)]);

        // 2 is now the oldest
        assert_eq!(history.set_active(FileId(4)), vec![FileId(2)]);
    }

    #[test]
    fn test_invariants_hold_for_any_sequence() {
        let mut history = PlaybackHistory::new(5);
        let sequence = [3u64, 1, 4, 1, 5, 9, 2, 6, 5, 3, 5, 8, 9, 7, 9, 3, 2, 3, 8, 4];

        for id in sequence {
            let id = FileId(id);
            let evicted = history.set_active(id);

            let entries = history.entries();
            assert!(entries.len() <= 5);
            assert_eq!(entries.last(), Some(&id));
            assert!(!evicted.contains(&id));
            let mut unique = entries.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(unique.len(), entries.len());
        }
    }

    #[test]
    fn test_stop_keeps_history() {
        let mut history = PlaybackHistory::new(2);
        history.set_active(FileId(1));
        history.clear_active();

        assert_eq!(history.active(), None);
        assert!(history.contains(FileId(1)));

        history.clear();
        assert!(history.is_empty());
    }
}
