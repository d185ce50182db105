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


//! Time-bounded memory of failed art fetches
//!
//! A key marked failed is skipped until its TTL runs out. Expired entries are
//! purged lazily, when they are looked up.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Failure backoff keyed by source pair
pub struct FailedArtCache {
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
    failures: DashMap<String, DateTime<Utc>>,
}

impl FailedArtCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::max_value()),
            clock,
            failures: DashMap::new(),
        }
    }

    /// Backoff key of a source pair
    pub fn key(source_a: &str, source_b: &str) -> String {
        format!("{}:{}", source_a, source_b)
    }

    /// True while the key is inside its backoff window
    pub fn is_failed(&self, key: &str) -> bool {
        let Some(failed_at) = self.failures.get(key).map(|entry| *entry) else {
            return false;
        };

        if self.clock.now() - failed_at < self.ttl {
            return true;
        }

        self.failures
            .remove_if(key, |_, recorded| *recorded == failed_at);
        false
    }

    /// Start (or restart) the backoff window for a key
    pub fn mark_failed(&self, key: &str) {
        self.failures.insert(key.to_string(), self.clock.now());
    }

    pub fn clear(&self) {
        self.failures.clear();
    }

    /// Recorded failures, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_expires_after_ttl() {
        let clock = Arc::new(ManualClock::default());
        let cache = FailedArtCache::new(Duration::from_secs(300), clock.clone());
        let key = FailedArtCache::key("chat", "message");

        assert!(!cache.is_failed(&key));
        cache.mark_failed(&key);
        assert!(cache.is_failed(&key));

        clock.advance(Duration::from_secs(299));
        assert!(cache.is_failed(&key));

        clock.advance(Duration::from_secs(1));
        assert!(!cache.is_failed(&key));
        // Expired entry was purged by the check
        assert!(cache.is_empty());
    }

    #[test]
    fn test_mark_restarts_window() {
        let clock = Arc::new(ManualClock::default());
        let cache = FailedArtCache::new(Duration::from_secs(10), clock.clone());

        cache.mark_failed("a:b");
        clock.advance(Duration::from_secs(8));
        cache.mark_failed("a:b");
        clock.advance(Duration::from_secs(8));
        assert!(cache.is_failed("a:b"));
    }

    #[test]
    fn test_clear() {
        let cache = FailedArtCache::new(Duration::from_secs(10), Arc::new(SystemClock));
        cache.mark_failed("x:y");
        cache.clear();
        assert!(!cache.is_failed("x:y"));
    }
}
