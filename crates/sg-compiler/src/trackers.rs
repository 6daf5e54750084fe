//! Tracker relationship table
//!
//! The tracking-protection component delivers a table of known tracker hosts
//! plus, per base host, the third-party hosts that are first-party-linked to
//! it (CDNs, widget domains). Matching walks host suffixes so a tracker
//! entry covers its subdomains.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use sg_core::psl::walk_host_suffixes;

#[derive(Debug, Default, Deserialize)]
struct TrackerTableData {
    #[serde(default)]
    trackers: Vec<String>,
    #[serde(default)]
    first_party: HashMap<String, Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerTableError {
    #[error("tracker table is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Compiled tracker relationship table.
#[derive(Debug, Default)]
pub struct TrackerTable {
    trackers: HashSet<String>,
    first_party: HashMap<String, Vec<String>>,
}

impl TrackerTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn parse(json: &str) -> Result<Self, TrackerTableError> {
        let data: TrackerTableData = serde_json::from_str(json)?;
        Ok(Self {
            trackers: data
                .trackers
                .into_iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            first_party: data
                .first_party
                .into_iter()
                .map(|(base, hosts)| {
                    (
                        base.to_ascii_lowercase(),
                        hosts.into_iter().map(|h| h.to_ascii_lowercase()).collect(),
                    )
                })
                .collect(),
        })
    }

    /// Whether a host (or a parent domain of it) is a known tracker.
    pub fn is_tracker(&self, host: &str) -> bool {
        walk_host_suffixes(&host.to_ascii_lowercase())
            .any(|suffix| self.trackers.contains(suffix))
    }

    /// Third-party hosts first-party-linked to a base host.
    pub fn first_party_hosts(&self, base_host: &str) -> Vec<String> {
        self.first_party
            .get(&base_host.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    pub fn tracker_count(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty() && self.first_party.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"
    {
      "trackers": ["tracking.com", "beacon.net"],
      "first_party": {
        "social.com": ["cdn.social-static.net"]
      }
    }"#;

    #[test]
    fn test_tracker_lookup_covers_subdomains() {
        let table = TrackerTable::parse(TABLE).unwrap();
        assert!(table.is_tracker("tracking.com"));
        assert!(table.is_tracker("pixel.tracking.com"));
        assert!(!table.is_tracker("example.com"));
    }

    #[test]
    fn test_first_party_hosts() {
        let table = TrackerTable::parse(TABLE).unwrap();
        assert_eq!(
            table.first_party_hosts("social.com"),
            vec!["cdn.social-static.net".to_string()]
        );
        assert!(table.first_party_hosts("other.com").is_empty());
    }

    #[test]
    fn test_empty_table() {
        let table = TrackerTable::empty();
        assert!(!table.is_tracker("tracking.com"));
        assert!(table.is_empty());
    }
}
