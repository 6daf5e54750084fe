//! Rule model and compiled rule sets
//!
//! A [`FilterRuleSet`] is the immutable, partitioned form of one filter list
//! (default, regional, or custom). Partitioning happens once at build time;
//! matchers only ever read. Updates replace the whole set.

use std::collections::HashMap;
use std::sync::Arc;

use crate::hash::{hash_domain, Hash64};
use crate::types::{PartyMask, ResourceType};

// =============================================================================
// Network rules
// =============================================================================

/// Rule action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    /// Exception rule (`@@...`) - allows the request
    Allow,
    /// Block rule - cancels the request
    Block,
}

/// Pattern anchor class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Anchor {
    /// Match anywhere in the URL
    #[default]
    None,
    /// `|` - match from the start of the URL
    Left,
    /// `||` - match at a hostname label boundary
    Hostname,
}

/// `$domain=` constraint: initiator-host include/exclude lists, stored as
/// domain hashes compared against the frame host's suffix walk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DomainConstraint {
    pub include: Vec<Hash64>,
    pub exclude: Vec<Hash64>,
}

impl DomainConstraint {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }
}

/// One compiled network rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRule {
    /// Original rule text (for logging and the block-event sink)
    pub raw: String,
    pub action: RuleAction,
    /// Pattern body with `*` wildcards and `^` separators; excludes anchors
    pub pattern: String,
    pub anchor: Anchor,
    /// Rule ends with `|`
    pub right_anchored: bool,
    /// Anchor host for hostname-anchored rules, lowercase; empty otherwise
    pub host: String,
    /// Applicable resource types; empty = all
    pub resource_types: ResourceType,
    /// Applicable parties; empty = both
    pub party: PartyMask,
    pub domains: Option<DomainConstraint>,
    /// `$tag=` - rule participates only while its tag is enabled
    pub tag: Option<String>,
    /// `$redirect=` - named resource served instead of blocking outright
    pub redirect: Option<String>,
    /// `$csp=` - policy injected on matching document requests
    pub csp: Option<String>,
    /// `$generichide` - exception suppressing generic cosmetic rules
    pub generichide: bool,
    /// `$specifichide` - exception suppressing hostname-specific cosmetic
    /// rules
    pub specifichide: bool,
}

impl NetworkRule {
    /// A block rule matching a bare pattern, with no modifiers.
    /// Handy for tests.
    pub fn pattern_block(pattern: &str) -> Self {
        Self {
            raw: pattern.to_string(),
            action: RuleAction::Block,
            pattern: pattern.to_string(),
            anchor: Anchor::None,
            right_anchored: false,
            host: String::new(),
            resource_types: ResourceType::empty(),
            party: PartyMask::empty(),
            domains: None,
            tag: None,
            redirect: None,
            csp: None,
            generichide: false,
            specifichide: false,
        }
    }
}

// =============================================================================
// Cosmetic rules
// =============================================================================

/// What a cosmetic rule does to matching elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CosmeticAction {
    /// `##selector` - hide matching elements
    Hide,
    /// `#@#selector` - cancel a Hide for this selector
    Unhide,
    /// `##selector:style(css)` - apply custom style
    Style(String),
    /// `##+js(name, args...)` - inject a named scriptlet
    Scriptlet,
}

/// One compiled cosmetic rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CosmeticRule {
    /// CSS selector, or `name, arg, ...` for scriptlet rules
    pub selector: String,
    pub action: CosmeticAction,
    /// Hosts the rule applies to; empty = generic
    pub include_hosts: Vec<String>,
    /// Hosts excluded via `~host`
    pub exclude_hosts: Vec<String>,
}

impl CosmeticRule {
    /// Generic rules carry no hostname qualifier.
    pub fn is_generic(&self) -> bool {
        self.include_hosts.is_empty()
    }

    /// Whether this rule applies to the given (lowercase) host.
    pub fn applies_to(&self, host: &str) -> bool {
        if self
            .exclude_hosts
            .iter()
            .any(|h| host_matches_suffix(host, h))
        {
            return false;
        }
        if self.include_hosts.is_empty() {
            return true;
        }
        self.include_hosts
            .iter()
            .any(|h| host_matches_suffix(host, h))
    }
}

/// Host equals the suffix or is a subdomain of it.
pub fn host_matches_suffix(host: &str, suffix: &str) -> bool {
    if host.len() == suffix.len() {
        return host.eq_ignore_ascii_case(suffix);
    }
    if host.len() > suffix.len() {
        let tail = &host[host.len() - suffix.len()..];
        return tail.eq_ignore_ascii_case(suffix)
            && host.as_bytes()[host.len() - suffix.len() - 1] == b'.';
    }
    false
}

// =============================================================================
// FilterRuleSet
// =============================================================================

/// Cosmetic rule partitions.
#[derive(Debug, Default)]
pub struct CosmeticPartition {
    /// Hostname-qualified hide rules
    pub specific: Vec<CosmeticRule>,
    /// Generic (`##`) hide rules
    pub generic: Vec<CosmeticRule>,
    /// `#@#` unhide rules
    pub exceptions: Vec<CosmeticRule>,
    /// `:style()` rules
    pub styles: Vec<CosmeticRule>,
    /// `+js()` scriptlet injections
    pub scriptlets: Vec<CosmeticRule>,
}

/// The compiled, immutable form of one filter list.
///
/// Network rules are partitioned by action and indexed so the common case
/// (hostname-anchored block rules) is a hash lookup rather than a scan.
#[derive(Debug, Default)]
pub struct FilterRuleSet {
    /// Hostname-anchored block rules, indexed by anchor-host hash
    host_blocks: HashMap<u64, Vec<NetworkRule>>,
    /// Remaining block rules, scanned
    pattern_blocks: Vec<NetworkRule>,
    /// Block rules gated by `$tag=`
    tagged: Vec<NetworkRule>,
    /// Exception rules (excluding the cosmetic-hide flags)
    exceptions: Vec<NetworkRule>,
    /// Exception rules carrying `$generichide` or `$specifichide`
    hide_exceptions: Vec<NetworkRule>,
    /// Rules carrying `$csp=`
    csp_rules: Vec<NetworkRule>,
    /// Cosmetic partitions
    cosmetic: CosmeticPartition,
    rule_count: usize,
}

impl FilterRuleSet {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Partition parsed rules into a compiled set.
    pub fn from_rules(network: Vec<NetworkRule>, cosmetic: Vec<CosmeticRule>) -> Arc<Self> {
        let mut set = Self::default();
        set.rule_count = network.len() + cosmetic.len();

        for rule in network {
            if rule.csp.is_some() {
                set.csp_rules.push(rule);
                continue;
            }
            match rule.action {
                RuleAction::Allow => {
                    if rule.generichide || rule.specifichide {
                        set.hide_exceptions.push(rule);
                    } else {
                        set.exceptions.push(rule);
                    }
                }
                RuleAction::Block => {
                    if rule.tag.is_some() {
                        set.tagged.push(rule);
                    } else if rule.anchor == Anchor::Hostname
                        && !rule.host.is_empty()
                        && rule.pattern.chars().all(|c| c == '^')
                    {
                        let key = hash_domain(&rule.host).to_u64();
                        set.host_blocks.entry(key).or_default().push(rule);
                    } else {
                        set.pattern_blocks.push(rule);
                    }
                }
            }
        }

        for rule in cosmetic {
            match rule.action {
                CosmeticAction::Hide => {
                    if rule.is_generic() {
                        set.cosmetic.generic.push(rule);
                    } else {
                        set.cosmetic.specific.push(rule);
                    }
                }
                CosmeticAction::Unhide => set.cosmetic.exceptions.push(rule),
                CosmeticAction::Style(_) => set.cosmetic.styles.push(rule),
                CosmeticAction::Scriptlet => set.cosmetic.scriptlets.push(rule),
            }
        }

        Arc::new(set)
    }

    pub fn host_blocks(&self, host_hash: u64) -> Option<&[NetworkRule]> {
        self.host_blocks.get(&host_hash).map(|v| v.as_slice())
    }

    pub fn pattern_blocks(&self) -> &[NetworkRule] {
        &self.pattern_blocks
    }

    pub fn tagged(&self) -> &[NetworkRule] {
        &self.tagged
    }

    pub fn exceptions(&self) -> &[NetworkRule] {
        &self.exceptions
    }

    pub fn hide_exceptions(&self) -> &[NetworkRule] {
        &self.hide_exceptions
    }

    pub fn csp_rules(&self) -> &[NetworkRule] {
        &self.csp_rules
    }

    pub fn cosmetic(&self) -> &CosmeticPartition {
        &self.cosmetic
    }

    pub fn len(&self) -> usize {
        self.rule_count
    }

    pub fn is_empty(&self) -> bool {
        self.rule_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_rule(host: &str) -> NetworkRule {
        NetworkRule {
            raw: format!("||{}^", host),
            action: RuleAction::Block,
            pattern: "^".to_string(),
            anchor: Anchor::Hostname,
            right_anchored: false,
            host: host.to_string(),
            resource_types: ResourceType::empty(),
            party: PartyMask::empty(),
            domains: None,
            tag: None,
            redirect: None,
            csp: None,
            generichide: false,
            specifichide: false,
        }
    }

    #[test]
    fn test_host_block_indexed() {
        let set = FilterRuleSet::from_rules(vec![host_rule("ads.example.com")], vec![]);
        let key = hash_domain("ads.example.com").to_u64();
        assert!(set.host_blocks(key).is_some());
        assert!(set.pattern_blocks().is_empty());
    }

    #[test]
    fn test_tagged_rules_partitioned() {
        let mut rule = host_rule("example.com");
        rule.tag = Some("social-embed".to_string());
        let set = FilterRuleSet::from_rules(vec![rule], vec![]);
        assert_eq!(set.tagged().len(), 1);
        let key = hash_domain("example.com").to_u64();
        assert!(set.host_blocks(key).is_none());
    }

    #[test]
    fn test_hide_exceptions_partitioned() {
        let mut generic = NetworkRule::pattern_block("b.com");
        generic.action = RuleAction::Allow;
        generic.generichide = true;
        let mut specific = NetworkRule::pattern_block("c.com");
        specific.action = RuleAction::Allow;
        specific.specifichide = true;
        let set = FilterRuleSet::from_rules(vec![generic, specific], vec![]);
        assert_eq!(set.hide_exceptions().len(), 2);
        assert!(set.exceptions().is_empty());
    }

    #[test]
    fn test_host_matches_suffix() {
        assert!(host_matches_suffix("sub.a.com", "a.com"));
        assert!(host_matches_suffix("a.com", "a.com"));
        assert!(!host_matches_suffix("nota.com", "a.com"));
        assert!(!host_matches_suffix("a.com", "sub.a.com"));
    }

    #[test]
    fn test_cosmetic_applies_to() {
        let rule = CosmeticRule {
            selector: ".ad".to_string(),
            action: CosmeticAction::Hide,
            include_hosts: vec!["b.com".to_string()],
            exclude_hosts: vec!["shop.b.com".to_string()],
        };
        assert!(rule.applies_to("b.com"));
        assert!(rule.applies_to("www.b.com"));
        assert!(!rule.applies_to("shop.b.com"));
        assert!(!rule.applies_to("a.com"));
    }
}
