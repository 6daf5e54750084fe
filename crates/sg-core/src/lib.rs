//! Shieldgate Core Library
//!
//! This crate provides the rule model and matching engine for the Shieldgate
//! content blocker: compiled filter rule sets, the per-request filter matcher
//! (network and cosmetic), CSP directive merging, and the bounded caches used
//! by the decision pipeline.
//!
//! # Architecture
//!
//! Filter lists are compiled once into an immutable [`FilterRuleSet`],
//! partitioned for fast lookup (host-anchored rules indexed by domain hash,
//! pattern rules scanned with a cheap literal prefilter). A [`FilterMatcher`]
//! owns one rule set plus the enabled tag state, which survives rule-set
//! replacement. Matching never mutates shared state and never panics on bad
//! input; at worst it reports "no match".
//!
//! # Modules
//!
//! - `hash`: Murmur3 hash functions for domain hashing
//! - `psl`: eTLD+1 extraction and third-party classification
//! - `url`: Fast URL parsing without allocations
//! - `cache`: bounded recently-used caches (ring-slot eviction)
//! - `rules`: rule model and compiled rule sets
//! - `matcher`: network and cosmetic matching
//! - `csp`: CSP directive merging
//! - `types`: shared type definitions

pub mod cache;
pub mod csp;
pub mod hash;
pub mod matcher;
pub mod psl;
pub mod rules;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use cache::{RecentlyUsedCache, ThirdPartyHostCache};
pub use hash::{hash64, hash_domain, Hash64};
pub use matcher::{CosmeticMatch, FilterMatcher, MatchResult};
pub use psl::{get_etld1, is_third_party};
pub use rules::{CosmeticRule, FilterRuleSet, NetworkRule};
pub use types::{
    BlockCategory, BlockDecision, CosmeticControl, PartyMask, RequestContext, ResourceType,
    Verdict,
};
