//! Network and cosmetic rule matching
//!
//! This is the hot path - every request consults one [`FilterMatcher`] per
//! loaded rule set. The matcher owns the enabled-tag state, which survives
//! rule-set replacement, and never mutates the rule set itself.
//!
//! Matching is deterministic and total: malformed input at worst produces
//! "no match", never a panic.

use std::collections::HashSet;
use std::sync::Arc;

use crate::hash::hash_domain;
use crate::psl::{is_third_party, walk_host_suffixes};
use crate::rules::{
    host_matches_suffix, Anchor, CosmeticAction, FilterRuleSet, NetworkRule, RuleAction,
};
use crate::types::{PartyMask, RequestContext, ResourceType};
use crate::url::{get_host_position, is_separator_char};

// =============================================================================
// Results
// =============================================================================

/// Verdict of one rule set for one request.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    /// A blocking rule matched
    pub matched: bool,
    /// An exception rule matched (grants free passage)
    pub exception: bool,
    /// `$redirect=` resource name from the matched blocking rule
    pub redirect: Option<String>,
    /// `$csp=` policies applying to this request from this set
    pub csp: Vec<String>,
    /// Raw text of the matched blocking rule
    pub filter: Option<String>,
    /// Raw text of the matched exception rule
    pub exception_filter: Option<String>,
}

impl MatchResult {
    /// Blocked by this set alone: a block matched and no exception did.
    pub fn should_block(&self) -> bool {
        self.matched && !self.exception
    }
}

/// Cosmetic rules applying to one host from one rule set, pre-merge.
#[derive(Debug, Clone, Default)]
pub struct CosmeticMatch {
    /// Hostname-qualified hide selectors
    pub specific_selectors: Vec<String>,
    /// Generic hide selectors
    pub generic_selectors: Vec<String>,
    /// Unhidden selectors (`#@#`)
    pub exceptions: Vec<String>,
    /// (selector, css) style rules
    pub styles: Vec<(String, String)>,
    /// Raw `name, arg, ...` scriptlet bodies
    pub scriptlets: Vec<String>,
}

// =============================================================================
// FilterMatcher
// =============================================================================

/// Evaluates requests against one compiled rule set.
pub struct FilterMatcher {
    rule_set: Arc<FilterRuleSet>,
    enabled_tags: HashSet<String>,
}

impl FilterMatcher {
    pub fn new(rule_set: Arc<FilterRuleSet>) -> Self {
        Self {
            rule_set,
            enabled_tags: HashSet::new(),
        }
    }

    /// Swap in a freshly compiled rule set. Enabled tags are preserved.
    pub fn replace_rule_set(&mut self, rule_set: Arc<FilterRuleSet>) {
        self.rule_set = rule_set;
    }

    pub fn rule_set(&self) -> &Arc<FilterRuleSet> {
        &self.rule_set
    }

    pub fn enable_tag(&mut self, tag: &str, enabled: bool) {
        if enabled {
            self.enabled_tags.insert(tag.to_string());
        } else {
            self.enabled_tags.remove(tag);
        }
    }

    pub fn tag_exists(&self, tag: &str) -> bool {
        self.enabled_tags.contains(tag)
    }

    /// Match the request as issued.
    pub fn match_request(&self, ctx: &RequestContext) -> MatchResult {
        self.match_url(&ctx.url, &ctx.request_host, ctx)
    }

    /// Match a (possibly rewritten) URL/host pair in the context of `ctx`.
    /// Used to re-run matching against the canonical host after CNAME
    /// resolution.
    pub fn match_url(&self, url: &str, request_host: &str, ctx: &RequestContext) -> MatchResult {
        let mut result = MatchResult::default();
        if request_host.is_empty() {
            return result;
        }

        let third_party = is_third_party(&ctx.tab_host, request_host);

        // Host-indexed block rules: one hash lookup per host suffix.
        'outer: for suffix in walk_host_suffixes(request_host) {
            let key = hash_domain(suffix).to_u64();
            if let Some(rules) = self.rule_set.host_blocks(key) {
                for rule in rules {
                    if host_matches_suffix(request_host, &rule.host)
                        && self.rule_applies(rule, ctx, third_party)
                        && rule_pattern_matches(rule, url, request_host)
                    {
                        result.matched = true;
                        result.redirect = rule.redirect.clone();
                        result.filter = Some(rule.raw.clone());
                        break 'outer;
                    }
                }
            }
        }

        if !result.matched {
            for rule in self.rule_set.pattern_blocks() {
                if self.rule_applies(rule, ctx, third_party)
                    && rule_pattern_matches(rule, url, request_host)
                {
                    result.matched = true;
                    result.redirect = rule.redirect.clone();
                    result.filter = Some(rule.raw.clone());
                    break;
                }
            }
        }

        if !result.matched {
            for rule in self.rule_set.tagged() {
                if self.rule_applies(rule, ctx, third_party)
                    && rule_pattern_matches(rule, url, request_host)
                {
                    result.matched = true;
                    result.redirect = rule.redirect.clone();
                    result.filter = Some(rule.raw.clone());
                    break;
                }
            }
        }

        // Exceptions are evaluated unconditionally: a later pipeline stage
        // may need the free-passage answer even when this set did not block.
        for rule in self.rule_set.exceptions() {
            if self.rule_applies(rule, ctx, third_party)
                && rule_pattern_matches(rule, url, request_host)
            {
                result.exception = true;
                result.exception_filter = Some(rule.raw.clone());
                break;
            }
        }

        self.collect_csp(url, request_host, ctx, third_party, &mut result);

        result
    }

    /// Collect `$csp=` policies applying to this request from this set.
    /// Policies are injected on document responses only.
    fn collect_csp(
        &self,
        url: &str,
        request_host: &str,
        ctx: &RequestContext,
        third_party: bool,
        result: &mut MatchResult,
    ) {
        if !ctx.resource_type.intersects(ResourceType::DOCUMENT) {
            return;
        }

        let mut policies: Vec<&str> = Vec::new();
        let mut removed: HashSet<&str> = HashSet::new();
        let mut disable_all = false;

        for rule in self.rule_set.csp_rules() {
            if !self.rule_applies(rule, ctx, third_party)
                || !rule_pattern_matches(rule, url, request_host)
            {
                continue;
            }
            let policy = rule.csp.as_deref().unwrap_or("");
            match rule.action {
                RuleAction::Block => {
                    if !policy.is_empty() {
                        policies.push(policy);
                    }
                }
                RuleAction::Allow => {
                    if policy.is_empty() {
                        disable_all = true;
                    } else {
                        removed.insert(policy);
                    }
                }
            }
        }

        if disable_all {
            return;
        }
        for policy in policies {
            if !removed.contains(policy) {
                result.csp.push(policy.to_string());
            }
        }
    }

    /// Whether a `$generichide` exception in this set covers the tab URL.
    pub fn matches_generichide(&self, tab_url: &str, tab_host: &str) -> bool {
        self.rule_set
            .hide_exceptions()
            .iter()
            .any(|rule| rule.generichide && rule_pattern_matches(rule, tab_url, tab_host))
    }

    /// Whether a `$specifichide` exception in this set covers the tab URL.
    pub fn matches_specifichide(&self, tab_url: &str, tab_host: &str) -> bool {
        self.rule_set
            .hide_exceptions()
            .iter()
            .any(|rule| rule.specifichide && rule_pattern_matches(rule, tab_url, tab_host))
    }

    /// Cosmetic rules from this set applying to the given host.
    pub fn cosmetic_match(&self, tab_host: &str) -> CosmeticMatch {
        let mut result = CosmeticMatch::default();
        let cosmetic = self.rule_set.cosmetic();

        for rule in &cosmetic.specific {
            if rule.applies_to(tab_host) {
                result.specific_selectors.push(rule.selector.clone());
            }
        }
        for rule in &cosmetic.generic {
            if rule.applies_to(tab_host) {
                result.generic_selectors.push(rule.selector.clone());
            }
        }
        for rule in &cosmetic.exceptions {
            if rule.applies_to(tab_host) {
                result.exceptions.push(rule.selector.clone());
            }
        }
        for rule in &cosmetic.styles {
            if rule.applies_to(tab_host) {
                if let CosmeticAction::Style(css) = &rule.action {
                    result.styles.push((rule.selector.clone(), css.clone()));
                }
            }
        }
        for rule in &cosmetic.scriptlets {
            if rule.applies_to(tab_host) {
                result.scriptlets.push(rule.selector.clone());
            }
        }

        result
    }

    /// Modifier checks: tag gate, resource type, party, `$domain=`.
    fn rule_applies(&self, rule: &NetworkRule, ctx: &RequestContext, third_party: bool) -> bool {
        if let Some(tag) = &rule.tag {
            if !self.enabled_tags.contains(tag) {
                return false;
            }
        }

        if !rule.resource_types.is_empty() && !rule.resource_types.intersects(ctx.resource_type) {
            return false;
        }

        if !rule.party.is_empty() {
            let party = if third_party {
                PartyMask::THIRD_PARTY
            } else {
                PartyMask::FIRST_PARTY
            };
            if !rule.party.intersects(party) {
                return false;
            }
        }

        if let Some(constraint) = &rule.domains {
            if !constraint.include.is_empty() {
                let included = walk_host_suffixes(&ctx.tab_host)
                    .any(|s| constraint.include.contains(&hash_domain(s)));
                if !included {
                    return false;
                }
            }
            if !constraint.exclude.is_empty() {
                let excluded = walk_host_suffixes(&ctx.tab_host)
                    .any(|s| constraint.exclude.contains(&hash_domain(s)));
                if excluded {
                    return false;
                }
            }
        }

        true
    }
}

// =============================================================================
// Pattern verification
// =============================================================================

/// Verify the rule's pattern against the URL.
pub(crate) fn rule_pattern_matches(rule: &NetworkRule, url: &str, request_host: &str) -> bool {
    let pattern = rule.pattern.as_bytes();
    let url_bytes = url.as_bytes();

    match rule.anchor {
        Anchor::Hostname => {
            if rule.host.is_empty() || !host_matches_suffix(request_host, &rule.host) {
                return false;
            }
            if pattern.is_empty() && !rule.right_anchored {
                return true;
            }
            // The remainder continues right after the host in the URL.
            let host_end = match get_host_position(url) {
                Some((_, end)) => end,
                None => return false,
            };
            match_pattern_at(pattern, url_bytes, host_end, rule.right_anchored)
        }
        Anchor::Left => match_pattern_at(pattern, url_bytes, 0, rule.right_anchored),
        Anchor::None => {
            if pattern.is_empty() {
                return false;
            }
            (0..=url_bytes.len())
                .any(|start| match_pattern_at(pattern, url_bytes, start, rule.right_anchored))
        }
    }
}

/// Match a pattern body (`*` wildcards, `^` separators, literals) at a fixed
/// start position. `require_end` pins the match to the end of the URL.
fn match_pattern_at(pattern: &[u8], url: &[u8], start: usize, require_end: bool) -> bool {
    let mut pos = start;
    let mut pi = 0;

    while pi < pattern.len() {
        match pattern[pi] {
            b'*' => {
                while pi < pattern.len() && pattern[pi] == b'*' {
                    pi += 1;
                }
                if pi == pattern.len() {
                    // Trailing wildcard swallows the rest.
                    return true;
                }
                return (pos..=url.len())
                    .any(|next| match_pattern_at(&pattern[pi..], url, next, require_end));
            }
            b'^' => {
                if pos == url.len() {
                    // Separator also matches the end of the URL.
                    pi += 1;
                    continue;
                }
                if !is_separator_char(url[pos]) {
                    return false;
                }
                pos += 1;
                pi += 1;
            }
            c => {
                if pos >= url.len() || !url[pos].eq_ignore_ascii_case(&c) {
                    return false;
                }
                pos += 1;
                pi += 1;
            }
        }
    }

    !require_end || pos == url.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{CosmeticRule, DomainConstraint};

    fn ctx(url: &str, tab_url: &str, rt: ResourceType) -> RequestContext {
        RequestContext::from_urls(url, tab_url, rt)
    }

    fn rule(raw: &str, action: RuleAction, pattern: &str, anchor: Anchor, host: &str) -> NetworkRule {
        NetworkRule {
            raw: raw.to_string(),
            action,
            pattern: pattern.to_string(),
            anchor,
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

    fn matcher_of(network: Vec<NetworkRule>) -> FilterMatcher {
        FilterMatcher::new(FilterRuleSet::from_rules(network, vec![]))
    }

    #[test]
    fn test_plain_pattern_blocks() {
        let m = matcher_of(vec![NetworkRule::pattern_block("ad_banner.png")]);
        let c = ctx(
            "https://example.com/ad_banner.png",
            "https://example.com/",
            ResourceType::IMAGE,
        );
        assert!(m.match_request(&c).should_block());

        let c = ctx(
            "https://example.com/logo.png",
            "https://example.com/",
            ResourceType::IMAGE,
        );
        assert!(!m.match_request(&c).matched);
    }

    #[test]
    fn test_match_is_deterministic() {
        let m = matcher_of(vec![NetworkRule::pattern_block("adbanner.js")]);
        let c = ctx(
            "https://example.com/adbanner.js",
            "https://example.com/",
            ResourceType::SCRIPT,
        );
        let first = m.match_request(&c);
        for _ in 0..10 {
            let again = m.match_request(&c);
            assert_eq!(first.matched, again.matched);
            assert_eq!(first.exception, again.exception);
        }
    }

    #[test]
    fn test_exception_beats_block_within_set() {
        let m = matcher_of(vec![
            NetworkRule::pattern_block("ad_banner.png"),
            rule("@@ad_banner.png", RuleAction::Allow, "ad_banner.png", Anchor::None, ""),
        ]);
        let c = ctx(
            "https://example.com/ad_banner.png",
            "https://example.com/",
            ResourceType::IMAGE,
        );
        let result = m.match_request(&c);
        assert!(result.matched);
        assert!(result.exception);
        assert!(!result.should_block());
    }

    #[test]
    fn test_hostname_anchor_matches_subdomains() {
        let m = matcher_of(vec![rule("||a.com^", RuleAction::Block, "^", Anchor::Hostname, "a.com")]);

        let c = ctx("https://a.com/x.png", "https://b.com/", ResourceType::IMAGE);
        assert!(m.match_request(&c).matched);

        let c = ctx("https://sub.a.com/x.png", "https://b.com/", ResourceType::IMAGE);
        assert!(m.match_request(&c).matched);

        // "nota.com" is not a label match
        let c = ctx("https://nota.com/x.png", "https://b.com/", ResourceType::IMAGE);
        assert!(!m.match_request(&c).matched);
    }

    #[test]
    fn test_hostname_anchor_with_path_remainder() {
        let m = matcher_of(vec![rule(
            "||a.com/ads/",
            RuleAction::Block,
            "/ads/",
            Anchor::Hostname,
            "a.com",
        )]);
        let c = ctx("https://a.com/ads/x.png", "https://b.com/", ResourceType::IMAGE);
        assert!(m.match_request(&c).matched);

        let c = ctx("https://a.com/news/x.png", "https://b.com/", ResourceType::IMAGE);
        assert!(!m.match_request(&c).matched);
    }

    #[test]
    fn test_left_anchor_and_right_anchor() {
        let mut r = rule(
            "|https://a.com/x.js|",
            RuleAction::Block,
            "https://a.com/x.js",
            Anchor::Left,
            "",
        );
        r.right_anchored = true;
        let m = matcher_of(vec![r]);

        let c = ctx("https://a.com/x.js", "https://a.com/", ResourceType::SCRIPT);
        assert!(m.match_request(&c).matched);

        let c = ctx("https://a.com/x.js?v=2", "https://a.com/", ResourceType::SCRIPT);
        assert!(!m.match_request(&c).matched);
    }

    #[test]
    fn test_wildcard_and_separator() {
        let m = matcher_of(vec![NetworkRule::pattern_block("/banner*.png^")]);
        let c = ctx(
            "https://x.com/banner_wide.png?q=1",
            "https://x.com/",
            ResourceType::IMAGE,
        );
        assert!(m.match_request(&c).matched);

        let c = ctx(
            "https://x.com/banner_wide.pngx",
            "https://x.com/",
            ResourceType::IMAGE,
        );
        assert!(!m.match_request(&c).matched);
    }

    #[test]
    fn test_third_party_modifier() {
        let mut r = rule("||a.com$third-party", RuleAction::Block, "", Anchor::Hostname, "a.com");
        r.party = PartyMask::THIRD_PARTY;
        let m = matcher_of(vec![r]);

        // Same eTLD+1: first-party, not blocked
        let c = ctx(
            "https://test2.a.com/logo.png",
            "https://test.a.com/",
            ResourceType::IMAGE,
        );
        assert!(!m.match_request(&c).matched);

        // Cross-site: third-party, blocked
        let c = ctx("https://a.com/logo.png", "https://b.com/", ResourceType::IMAGE);
        assert!(m.match_request(&c).matched);
    }

    #[test]
    fn test_resource_type_modifier() {
        let mut r = NetworkRule::pattern_block("adbanner.js");
        r.resource_types = ResourceType::SCRIPT;
        let m = matcher_of(vec![r]);

        let c = ctx("https://a.com/adbanner.js", "https://a.com/", ResourceType::SCRIPT);
        assert!(m.match_request(&c).matched);

        let c = ctx("https://a.com/adbanner.js", "https://a.com/", ResourceType::IMAGE);
        assert!(!m.match_request(&c).matched);
    }

    #[test]
    fn test_domain_constraint() {
        let mut r = NetworkRule::pattern_block("adbanner.js");
        r.domains = Some(DomainConstraint {
            include: vec![hash_domain("a.com")],
            exclude: vec![],
        });
        let m = matcher_of(vec![r]);

        let c = ctx("https://x.com/adbanner.js", "https://a.com/page", ResourceType::SCRIPT);
        assert!(m.match_request(&c).matched);

        let c = ctx("https://x.com/adbanner.js", "https://b.com/page", ResourceType::SCRIPT);
        assert!(!m.match_request(&c).matched);
    }

    #[test]
    fn test_domain_constraint_exclude_wins() {
        let mut r = NetworkRule::pattern_block("adbanner.js");
        r.domains = Some(DomainConstraint {
            include: vec![hash_domain("a.com")],
            exclude: vec![hash_domain("sub.a.com")],
        });
        let m = matcher_of(vec![r]);

        let c = ctx(
            "https://x.com/adbanner.js",
            "https://sub.a.com/page",
            ResourceType::SCRIPT,
        );
        assert!(!m.match_request(&c).matched);
    }

    #[test]
    fn test_tagged_rule_gated_by_tag() {
        let mut r = rule("||example.com^$tag=social", RuleAction::Block, "^", Anchor::Hostname, "example.com");
        r.tag = Some("social".to_string());
        let mut m = matcher_of(vec![r]);

        let c = ctx("https://example.com/logo.png", "https://b.com/", ResourceType::IMAGE);
        assert!(!m.match_request(&c).matched);

        m.enable_tag("social", true);
        assert!(m.match_request(&c).matched);

        m.enable_tag("social", false);
        assert!(!m.match_request(&c).matched);
    }

    #[test]
    fn test_tags_survive_rule_set_replacement() {
        let mut m = matcher_of(vec![]);
        m.enable_tag("social", true);
        m.replace_rule_set(FilterRuleSet::from_rules(vec![], vec![]));
        assert!(m.tag_exists("social"));
    }

    #[test]
    fn test_csp_collection_and_exception() {
        let mut inject = rule(
            "||a.com^$csp=script-src 'self'",
            RuleAction::Block,
            "^",
            Anchor::Hostname,
            "a.com",
        );
        inject.csp = Some("script-src 'self'".to_string());
        let mut removed = rule(
            "@@||a.com/ok^$csp=script-src 'self'",
            RuleAction::Allow,
            "/ok^",
            Anchor::Hostname,
            "a.com",
        );
        removed.csp = Some("script-src 'self'".to_string());
        let m = matcher_of(vec![inject, removed]);

        let c = ctx("https://a.com/page", "https://a.com/page", ResourceType::MAIN_FRAME);
        let result = m.match_request(&c);
        assert_eq!(result.csp, vec!["script-src 'self'".to_string()]);
        assert!(!result.matched);

        let c = ctx("https://a.com/ok", "https://a.com/ok", ResourceType::MAIN_FRAME);
        let result = m.match_request(&c);
        assert!(result.csp.is_empty());
    }

    #[test]
    fn test_generichide_match() {
        let mut r = rule("@@||b.com$generichide", RuleAction::Allow, "", Anchor::Hostname, "b.com");
        r.generichide = true;
        let m = matcher_of(vec![r]);
        assert!(m.matches_generichide("https://b.com/page", "b.com"));
        assert!(!m.matches_generichide("https://a.com/page", "a.com"));
        assert!(!m.matches_specifichide("https://b.com/page", "b.com"));
    }

    #[test]
    fn test_specifichide_match() {
        let mut r = rule("@@||b.com$specifichide", RuleAction::Allow, "", Anchor::Hostname, "b.com");
        r.specifichide = true;
        let m = matcher_of(vec![r]);
        assert!(m.matches_specifichide("https://b.com/page", "b.com"));
        assert!(!m.matches_generichide("https://b.com/page", "b.com"));
    }

    #[test]
    fn test_cosmetic_match_partitions() {
        let cosmetic = vec![
            CosmeticRule {
                selector: "#ad-banner".to_string(),
                action: CosmeticAction::Hide,
                include_hosts: vec!["b.com".to_string()],
                exclude_hosts: vec![],
            },
            CosmeticRule {
                selector: ".ad".to_string(),
                action: CosmeticAction::Hide,
                include_hosts: vec![],
                exclude_hosts: vec![],
            },
            CosmeticRule {
                selector: ".ad".to_string(),
                action: CosmeticAction::Unhide,
                include_hosts: vec!["b.com".to_string()],
                exclude_hosts: vec![],
            },
            CosmeticRule {
                selector: ".sponsored".to_string(),
                action: CosmeticAction::Style("padding-bottom: 10px".to_string()),
                include_hosts: vec!["b.com".to_string()],
                exclude_hosts: vec![],
            },
            CosmeticRule {
                selector: "hijacktest".to_string(),
                action: CosmeticAction::Scriptlet,
                include_hosts: vec!["b.com".to_string()],
                exclude_hosts: vec![],
            },
        ];
        let m = FilterMatcher::new(FilterRuleSet::from_rules(vec![], cosmetic));

        let result = m.cosmetic_match("b.com");
        assert_eq!(result.specific_selectors, vec!["#ad-banner".to_string()]);
        assert_eq!(result.generic_selectors, vec![".ad".to_string()]);
        assert_eq!(result.exceptions, vec![".ad".to_string()]);
        assert_eq!(result.styles.len(), 1);
        assert_eq!(result.scriptlets, vec!["hijacktest".to_string()]);

        let result = m.cosmetic_match("a.com");
        assert!(result.specific_selectors.is_empty());
        assert_eq!(result.generic_selectors, vec![".ad".to_string()]);
        assert!(result.exceptions.is_empty());
    }
}
