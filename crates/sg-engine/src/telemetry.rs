//! Blocked-request counters and the block-event sink
//!
//! The counters are persisted through an external [`CounterStore`] and are
//! monotonically non-decreasing. A block increments its counter at most once
//! per distinct resource URL per tab navigation; a new navigation in the tab
//! resets the de-duplication scope. Requests on one navigation may complete
//! in any order - the per-URL de-dup makes the increment idempotent
//! regardless.

use std::collections::{HashMap, HashSet};

use sg_core::types::BlockCategory;

/// Persisted counter key for blocked ads.
pub const ADS_BLOCKED_KEY: &str = "stats.ads_blocked";
/// Persisted counter key for blocked trackers.
pub const TRACKERS_BLOCKED_KEY: &str = "stats.trackers_blocked";

/// Durable uint64 storage provided by the host.
pub trait CounterStore: Send + 'static {
    fn get_uint64(&self, key: &str) -> u64;
    fn set_uint64(&mut self, key: &str, value: u64);
}

/// In-memory store for tests and the CLI.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    values: HashMap<String, u64>,
}

impl CounterStore for MemoryCounterStore {
    fn get_uint64(&self, key: &str) -> u64 {
        self.values.get(key).copied().unwrap_or(0)
    }

    fn set_uint64(&mut self, key: &str, value: u64) {
        self.values.insert(key.to_string(), value);
    }
}

/// De-duplicated block counting over a [`CounterStore`].
pub struct BlockedCounters {
    store: Box<dyn CounterStore>,
    /// tab id -> URLs already counted this navigation
    counted: HashMap<i32, HashSet<String>>,
}

impl BlockedCounters {
    pub fn new(store: Box<dyn CounterStore>) -> Self {
        Self {
            store,
            counted: HashMap::new(),
        }
    }

    /// Reset the de-dup scope for a tab (new navigation committed).
    pub fn reset_navigation(&mut self, tab_id: i32) {
        self.counted.remove(&tab_id);
    }

    /// Count one blocked resource. Returns false if this URL was already
    /// counted within the tab's current navigation.
    pub fn record(&mut self, tab_id: i32, url: &str, category: BlockCategory) -> bool {
        let seen = self.counted.entry(tab_id).or_default();
        if !seen.insert(url.to_string()) {
            return false;
        }

        let key = match category {
            BlockCategory::Ads => ADS_BLOCKED_KEY,
            BlockCategory::Trackers => TRACKERS_BLOCKED_KEY,
        };
        let value = self.store.get_uint64(key);
        self.store.set_uint64(key, value + 1);
        true
    }

    pub fn ads_blocked(&self) -> u64 {
        self.store.get_uint64(ADS_BLOCKED_KEY)
    }

    pub fn trackers_blocked(&self) -> u64 {
        self.store.get_uint64(TRACKERS_BLOCKED_KEY)
    }
}

// =============================================================================
// Block event sink
// =============================================================================

/// Fire-and-forget notification delivered once per counted block.
#[derive(Debug, Clone)]
pub struct BlockedEvent {
    pub url: String,
    pub tab_id: i32,
    pub frame_id: i32,
    pub category: BlockCategory,
    /// Raw text of the rule that triggered the block, when known.
    pub rule: Option<String>,
}

pub trait BlockEventSink: Send + 'static {
    fn on_blocked(&mut self, event: BlockedEvent);
}

/// Discards events.
pub struct NullEventSink;

impl BlockEventSink for NullEventSink {
    fn on_blocked(&mut self, _event: BlockedEvent) {}
}

/// Logs events at debug level.
pub struct LogEventSink;

impl BlockEventSink for LogEventSink {
    fn on_blocked(&mut self, event: BlockedEvent) {
        log::debug!(
            "blocked {:?} {} (tab {}, frame {})",
            event.category,
            event.url,
            event.tab_id,
            event.frame_id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters() -> BlockedCounters {
        BlockedCounters::new(Box::new(MemoryCounterStore::default()))
    }

    #[test]
    fn test_same_url_counted_once() {
        let mut c = counters();
        assert!(c.record(1, "https://a.com/adbanner.js", BlockCategory::Ads));
        assert!(!c.record(1, "https://a.com/adbanner.js", BlockCategory::Ads));
        assert_eq!(c.ads_blocked(), 1);
    }

    #[test]
    fn test_distinct_urls_counted_separately() {
        let mut c = counters();
        assert!(c.record(1, "https://a.com/adbanner.js?1", BlockCategory::Ads));
        assert!(c.record(1, "https://a.com/adbanner.js?2", BlockCategory::Ads));
        assert_eq!(c.ads_blocked(), 2);
    }

    #[test]
    fn test_navigation_resets_scope() {
        let mut c = counters();
        assert!(c.record(1, "https://a.com/adbanner.js", BlockCategory::Ads));
        c.reset_navigation(1);
        assert!(c.record(1, "https://a.com/adbanner.js", BlockCategory::Ads));
        assert_eq!(c.ads_blocked(), 2);
    }

    #[test]
    fn test_tabs_have_independent_scopes() {
        let mut c = counters();
        assert!(c.record(1, "https://a.com/adbanner.js", BlockCategory::Ads));
        assert!(c.record(2, "https://a.com/adbanner.js", BlockCategory::Ads));
        assert_eq!(c.ads_blocked(), 2);
    }

    #[test]
    fn test_categories_use_separate_counters() {
        let mut c = counters();
        c.record(1, "https://a.com/ad.js", BlockCategory::Ads);
        c.record(1, "https://t.com/pixel.gif", BlockCategory::Trackers);
        assert_eq!(c.ads_blocked(), 1);
        assert_eq!(c.trackers_blocked(), 1);
    }
}
