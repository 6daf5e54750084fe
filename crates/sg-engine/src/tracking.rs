//! Tracking-protection matching
//!
//! Runs before ad-block matching. A request is blocked as a tracker when its
//! host is in the compiled tracker table, it is third-party to the tab, and
//! it is not first-party-linked to the tab's base host. A small set of
//! trusted first-party-associated hosts (widget/CDN domains) is never
//! blocked by this check regardless of table contents.

use sg_compiler::TrackerTable;
use sg_core::cache::ThirdPartyHostCache;
use sg_core::psl::{get_etld1, is_third_party, walk_host_suffixes};
use sg_core::rules::host_matches_suffix;

/// First-party-associated hosts exempt from tracking protection.
const TRUSTED_FIRST_PARTY_HOSTS: &[&str] = &[
    "connect.facebook.net",
    "connect.facebook.com",
    "staticxx.facebook.com",
    "www.facebook.com",
    "scontent.xx.fbcdn.net",
    "pbs.twimg.com",
    "scontent-sjc2-1.xx.fbcdn.net",
    "platform.twitter.com",
    "syndication.twitter.com",
];

/// Tracker matcher with memoized first-party linkage.
pub struct TrackingProtection {
    table: TrackerTable,
    third_party_cache: ThirdPartyHostCache,
}

impl TrackingProtection {
    pub fn new() -> Self {
        Self {
            table: TrackerTable::empty(),
            third_party_cache: ThirdPartyHostCache::default(),
        }
    }

    /// Swap in a freshly compiled table. The linkage cache is derived from
    /// the table, so it drops with it.
    pub fn replace_table(&mut self, table: TrackerTable) {
        self.table = table;
        self.third_party_cache.clear();
    }

    /// Whether the request should be blocked as a tracker.
    pub fn should_block(&self, request_host: &str, tab_host: &str) -> bool {
        if tab_host.is_empty() || request_host.is_empty() {
            return false;
        }

        if TRUSTED_FIRST_PARTY_HOSTS
            .iter()
            .any(|h| h.eq_ignore_ascii_case(request_host))
        {
            return false;
        }

        if !is_third_party(tab_host, request_host) {
            return false;
        }

        if !self.table.is_tracker(request_host) {
            return false;
        }

        // A tracker that the table links to the tab's site is serving a
        // first-party function there.
        let linked = self.linked_hosts(tab_host);
        !linked
            .iter()
            .any(|h| host_matches_suffix(request_host, h))
    }

    /// First-party-linked hosts for the tab, memoized per base host.
    fn linked_hosts(&self, tab_host: &str) -> Vec<String> {
        let base_host = get_etld1(tab_host).to_string();
        self.third_party_cache.get_or_insert_with(&base_host, || {
            let mut hosts = Vec::new();
            for suffix in walk_host_suffixes(tab_host) {
                for host in self.table.first_party_hosts(suffix) {
                    if !hosts.contains(&host) {
                        hosts.push(host);
                    }
                }
            }
            hosts
        })
    }
}

impl Default for TrackingProtection {
    fn default() -> Self {
        Self::new()
    }
}
