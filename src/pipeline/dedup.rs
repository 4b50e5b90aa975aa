//! Duplicate-suppression LRU: bounded by count (`window_size`)
//! and by age (`window_seconds`), whichever binds first.

use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use lru::LruCache;

use crate::config::DedupConfig;

pub struct DedupWindow {
    seen: LruCache<u64, DateTime<Utc>>,
    window: chrono::Duration,
}

impl DedupWindow {
    pub fn new(config: &DedupConfig) -> Self {
        let capacity = NonZeroUsize::new(config.window_size.max(1)).expect("non-zero window_size");
        Self {
            seen: LruCache::new(capacity),
            window: chrono::Duration::seconds(config.window_seconds as i64),
        }
    }

    /// Returns `true` if `fingerprint` was already seen within the
    /// configured window, inserting/refreshing it either way.
    pub fn check_and_insert(&mut self, fingerprint: u64, now: DateTime<Utc>) -> bool {
        if let Some(seen_at) = self.seen.get(&fingerprint) {
            if now - *seen_at <= self.window {
                self.seen.put(fingerprint, now);
                return true;
            }
        }
        self.seen.put(fingerprint, now);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(window_size: usize, window_seconds: u64) -> DedupConfig {
        DedupConfig {
            window_size,
            window_seconds,
        }
    }

    #[test]
    fn second_occurrence_within_window_is_duplicate() {
        let mut window = DedupWindow::new(&config(10, 600));
        let now = Utc::now();
        assert!(!window.check_and_insert(42, now));
        assert!(window.check_and_insert(42, now + chrono::Duration::seconds(1)));
    }

    #[test]
    fn occurrence_outside_window_is_not_duplicate() {
        let mut window = DedupWindow::new(&config(10, 60));
        let now = Utc::now();
        assert!(!window.check_and_insert(42, now));
        assert!(!window.check_and_insert(42, now + chrono::Duration::seconds(120)));
    }

    #[test]
    fn eviction_by_capacity_forgets_oldest() {
        let mut window = DedupWindow::new(&config(2, 600));
        let now = Utc::now();
        assert!(!window.check_and_insert(1, now));
        assert!(!window.check_and_insert(2, now));
        assert!(!window.check_and_insert(3, now));
        // 1 was evicted to make room for 3
        assert!(!window.check_and_insert(1, now));
    }
}
