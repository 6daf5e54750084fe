//! The per-request decision pipeline
//!
//! Stages, in order: short-circuits (shields off, ads allowed, missing
//! context), polyfill rewrite for known analytics endpoints, tracking
//! protection, ad-block matching across the default / regional / custom rule
//! sets, and - when the literal host produced no verdict and uncloaking is
//! enabled - an explicit suspension point for CNAME resolution, after which
//! matching re-runs against the canonical host.
//!
//! The pipeline is synchronous and single-owner; the engine task drives it
//! and owns the suspension bookkeeping. `classify_start` either returns a
//! final decision or parks with [`PipelineOutcome::NeedsCname`];
//! `classify_resume` finishes the parked request once the alias chain is in.
//!
//! Exception precedence across rule sets is global: a block from any set
//! stands only if no set's exception grants the request free passage.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use sg_compiler::{compile_filter_list, ResourceLibrary, TrackerTable};
use sg_core::cache::RecentlyUsedCache;
use sg_core::csp::merge_csp_policies;
use sg_core::matcher::FilterMatcher;
use sg_core::rules::FilterRuleSet;
use sg_core::types::{
    BlockCategory, BlockDecision, CosmeticControl, RequestContext, Verdict,
};
use sg_core::url::{extract_host, has_web_scheme, replace_host};

use crate::regional::{CatalogError, ListError, RegionalListManager};
use crate::resolver::Resolution;
use crate::tracking::TrackingProtection;

// =============================================================================
// Tags and configuration
// =============================================================================

/// Well-known tag names controlled by the social-widget preferences.
pub mod tags {
    pub const FACEBOOK_EMBEDS: &str = "fb-embeds";
    pub const TWITTER_EMBEDS: &str = "twitter-embeds";
    pub const LINKEDIN_EMBEDS: &str = "linked-in-embeds";
}

/// Engine-level configuration (feature flags and defaults).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// CNAME uncloaking feature flag. When off, the resolver is never
    /// consulted and only literal-host rules apply.
    pub cname_uncloaking: bool,
    /// Tags enabled at startup.
    pub default_enabled_tags: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cname_uncloaking: true,
            default_enabled_tags: vec![
                tags::FACEBOOK_EMBEDS.to_string(),
                tags::TWITTER_EMBEDS.to_string(),
            ],
        }
    }
}

// =============================================================================
// Polyfills
// =============================================================================

/// (host, path prefix) pairs rewritten to inert polyfills instead of
/// blocked outright.
const POLYFILL_TARGETS: &[(&str, &str, &str)] = &[
    (
        "www.googletagmanager.com",
        "/gtm.js",
        "(function() { window.dataLayer = window.dataLayer || []; window.dataLayer.push = function() {}; })();\n",
    ),
    (
        "www.googletagservices.com",
        "/tag/js/gpt.js",
        "(function() { var p = function() {}; window.googletag = { cmd: { push: p }, pubads: p }; })();\n",
    ),
];

// =============================================================================
// Pipeline outcome
// =============================================================================

/// Result of the first classification pass.
#[derive(Debug)]
pub enum PipelineOutcome {
    Final(BlockDecision),
    /// The literal host produced no verdict; resolution of its alias chain
    /// is needed before deciding.
    NeedsCname { host: String },
}

/// Combined ad-block verdict across all queried rule sets.
#[derive(Debug, Default)]
struct CombinedMatch {
    blocked: bool,
    exception: bool,
    redirect: Option<String>,
    csp: Vec<String>,
    filter: Option<String>,
}

// =============================================================================
// Cosmetic output
// =============================================================================

/// A scriptlet injection resolved against the resource library.
#[derive(Debug, Clone)]
pub struct ScriptletInjection {
    pub name: String,
    pub args: Vec<String>,
    /// Decoded script body; absent when the resource is unknown.
    pub body: Option<String>,
}

/// Cosmetic filtering output for one document.
#[derive(Debug, Clone, Default)]
pub struct CosmeticResources {
    pub hide_selectors: Vec<String>,
    pub style_rules: Vec<(String, String)>,
    pub scriptlets: Vec<ScriptletInjection>,
    /// Generic rules were suppressed by a `generichide` exception.
    pub generics_suppressed: bool,
    /// Hostname-specific rules were suppressed by a `specifichide`
    /// exception.
    pub specifics_suppressed: bool,
}

// =============================================================================
// DecisionPipeline
// =============================================================================

/// Owns the matchers, caches and list state for one profile. All access is
/// serialized by the engine task.
pub struct DecisionPipeline {
    config: EngineConfig,
    default_matcher: FilterMatcher,
    custom_matcher: FilterMatcher,
    regional: RegionalListManager,
    tracking: TrackingProtection,
    resources: ResourceLibrary,
    /// Memoizes URL -> rewritten data URL for redirects and polyfills.
    rewrite_cache: RecentlyUsedCache<String, String>,
    enabled_tags: Vec<String>,
}

impl DecisionPipeline {
    pub fn new(config: EngineConfig) -> Self {
        let mut pipeline = Self {
            config: config.clone(),
            default_matcher: FilterMatcher::new(FilterRuleSet::empty()),
            custom_matcher: FilterMatcher::new(FilterRuleSet::empty()),
            regional: RegionalListManager::new(),
            tracking: TrackingProtection::new(),
            resources: ResourceLibrary::empty(),
            rewrite_cache: RecentlyUsedCache::default(),
            enabled_tags: Vec::new(),
        };
        for tag in &config.default_enabled_tags {
            pipeline.enable_tag(tag, true);
        }
        pipeline
    }

    // -------------------------------------------------------------------------
    // Classification
    // -------------------------------------------------------------------------

    /// First pass: decide, or park for CNAME resolution.
    pub fn classify_start(&mut self, ctx: &RequestContext) -> PipelineOutcome {
        // Shields off or ads allowed: no matching at all.
        if !ctx.shields_enabled || ctx.ads_allowed {
            return PipelineOutcome::Final(BlockDecision::allow());
        }

        // A correct decision needs a tab origin and a real request host.
        if ctx.tab_host.is_empty() || ctx.request_host.is_empty() || !has_web_scheme(&ctx.url) {
            return PipelineOutcome::Final(BlockDecision::allow());
        }

        if let Some(decision) = self.polyfill_check(ctx) {
            return PipelineOutcome::Final(decision);
        }

        if self.tracking.should_block(&ctx.request_host, &ctx.tab_host) {
            return PipelineOutcome::Final(BlockDecision {
                verdict: Verdict::Block,
                csp: None,
                should_count: true,
                category: Some(BlockCategory::Trackers),
                matched_rule: None,
            });
        }

        let combined = self.adblock_combined(&ctx.url, &ctx.request_host, ctx);

        if combined.blocked && !combined.exception {
            return PipelineOutcome::Final(self.block_decision(ctx, combined));
        }

        if self.config.cname_uncloaking && !combined.exception {
            return PipelineOutcome::NeedsCname {
                host: ctx.request_host.clone(),
            };
        }

        PipelineOutcome::Final(self.allow_decision(combined))
    }

    /// Second pass, after the alias chain arrived. A block against the
    /// canonical host stands only if no exception covers the literal or the
    /// canonical URL form.
    pub fn classify_resume(&mut self, ctx: &RequestContext, resolution: &Resolution) -> BlockDecision {
        let literal = self.adblock_combined(&ctx.url, &ctx.request_host, ctx);

        let canonical_host = match resolution.canonical_host() {
            Some(host) if host != ctx.request_host => host.to_string(),
            // No usable alias (or resolution unavailable): literal verdict.
            _ => return self.allow_decision(literal),
        };

        let canonical_url = match replace_host(&ctx.url, &canonical_host) {
            Some(url) => url,
            None => return self.allow_decision(literal),
        };

        let canonical = self.adblock_combined(&canonical_url, &canonical_host, ctx);

        if canonical.blocked && !canonical.exception && !literal.exception {
            let mut csp = literal.csp;
            let mut combined = canonical;
            combined.csp.append(&mut csp);
            return self.block_decision(ctx, combined);
        }

        self.allow_decision(literal)
    }

    /// Query default, enabled regional, then custom rule sets.
    fn adblock_combined(&self, url: &str, request_host: &str, ctx: &RequestContext) -> CombinedMatch {
        let mut combined = CombinedMatch::default();

        let matchers = std::iter::once(&self.default_matcher)
            .chain(self.regional.enabled_matchers())
            .chain(std::iter::once(&self.custom_matcher));

        for matcher in matchers {
            let result = matcher.match_url(url, request_host, ctx);
            if result.matched && !combined.blocked {
                combined.blocked = true;
                combined.redirect = result.redirect;
                combined.filter = result.filter;
            }
            if result.exception {
                combined.exception = true;
            }
            combined.csp.extend(result.csp);
        }

        combined
    }

    fn block_decision(&mut self, ctx: &RequestContext, combined: CombinedMatch) -> BlockDecision {
        let verdict = match &combined.redirect {
            Some(name) => match self.rewrite_for(&ctx.url, name) {
                Some(data_url) => Verdict::Redirect(data_url),
                None => Verdict::Block,
            },
            None => Verdict::Block,
        };

        BlockDecision {
            verdict,
            csp: merge_csp_policies(&combined.csp),
            should_count: true,
            category: Some(BlockCategory::Ads),
            matched_rule: combined.filter,
        }
    }

    fn allow_decision(&self, combined: CombinedMatch) -> BlockDecision {
        BlockDecision {
            verdict: Verdict::Allow,
            csp: merge_csp_policies(&combined.csp),
            should_count: false,
            category: None,
            matched_rule: combined.filter,
        }
    }

    /// Serve an inert polyfill for known analytics endpoints instead of a
    /// hard block.
    fn polyfill_check(&mut self, ctx: &RequestContext) -> Option<BlockDecision> {
        for (host, path_prefix, body) in POLYFILL_TARGETS {
            if !ctx.request_host.eq_ignore_ascii_case(host) {
                continue;
            }
            let path_start = match ctx.url.find(host) {
                Some(pos) => pos + host.len(),
                None => continue,
            };
            if !ctx.url[path_start..].starts_with(path_prefix) {
                continue;
            }

            let data_url = match self.rewrite_cache.find(&ctx.url) {
                Some(cached) => cached.clone(),
                None => {
                    let rendered = format!(
                        "data:application/javascript;base64,{}",
                        BASE64.encode(body.as_bytes())
                    );
                    self.rewrite_cache.add(ctx.url.clone(), rendered.clone());
                    rendered
                }
            };

            return Some(BlockDecision {
                verdict: Verdict::Redirect(data_url),
                csp: None,
                should_count: true,
                category: Some(BlockCategory::Ads),
                matched_rule: None,
            });
        }
        None
    }

    /// Resolve a `$redirect=` resource to a data URL, memoized per request
    /// URL.
    fn rewrite_for(&mut self, url: &str, resource_name: &str) -> Option<String> {
        if let Some(cached) = self.rewrite_cache.find(&url.to_string()) {
            return Some(cached.clone());
        }
        let data_url = self.resources.data_url(resource_name)?;
        self.rewrite_cache.add(url.to_string(), data_url.clone());
        Some(data_url)
    }

    // -------------------------------------------------------------------------
    // Cosmetic filtering
    // -------------------------------------------------------------------------

    /// Merged cosmetic resources for a document, across all rule sets.
    pub fn cosmetic_resources(&self, tab_url: &str, control: CosmeticControl) -> CosmeticResources {
        let mut out = CosmeticResources::default();
        if control == CosmeticControl::Allow {
            return out;
        }

        let tab_host = match extract_host(tab_url) {
            Some(host) => host.to_ascii_lowercase(),
            None => return out,
        };

        let matchers: Vec<&FilterMatcher> = std::iter::once(&self.default_matcher)
            .chain(self.regional.enabled_matchers())
            .chain(std::iter::once(&self.custom_matcher))
            .collect();

        out.generics_suppressed = matchers
            .iter()
            .any(|m| m.matches_generichide(tab_url, &tab_host));
        out.specifics_suppressed = matchers
            .iter()
            .any(|m| m.matches_specifichide(tab_url, &tab_host));

        let mut exceptions: Vec<String> = Vec::new();
        let mut specific: Vec<String> = Vec::new();
        let mut generic: Vec<String> = Vec::new();

        for matcher in &matchers {
            let m = matcher.cosmetic_match(&tab_host);
            for s in m.exceptions {
                if !exceptions.contains(&s) {
                    exceptions.push(s);
                }
            }
            for s in m.specific_selectors {
                if !specific.contains(&s) {
                    specific.push(s);
                }
            }
            for s in m.generic_selectors {
                if !generic.contains(&s) {
                    generic.push(s);
                }
            }
            for (selector, css) in m.styles {
                if !out.style_rules.iter().any(|(sel, _)| *sel == selector) {
                    out.style_rules.push((selector, css));
                }
            }
            // Scriptlet injections are unaffected by generichide.
            for raw in m.scriptlets {
                let injection = self.resolve_scriptlet(&raw);
                if !out.scriptlets.iter().any(|s| s.name == injection.name) {
                    out.scriptlets.push(injection);
                }
            }
        }

        if !out.specifics_suppressed {
            for s in specific {
                if !exceptions.contains(&s) {
                    out.hide_selectors.push(s);
                }
            }
        }
        if !out.generics_suppressed {
            for s in generic {
                if !exceptions.contains(&s) && !out.hide_selectors.contains(&s) {
                    out.hide_selectors.push(s);
                }
            }
        }
        if out.specifics_suppressed {
            out.style_rules.clear();
        } else {
            out.style_rules.retain(|(sel, _)| !exceptions.contains(sel));
        }

        out
    }

    fn resolve_scriptlet(&self, raw: &str) -> ScriptletInjection {
        let mut parts = raw.split(',').map(|p| p.trim()).filter(|p| !p.is_empty());
        let name = parts.next().unwrap_or("").to_string();
        let args: Vec<String> = parts.map(|p| p.to_string()).collect();
        let body = self.resources.body_text(&name);
        ScriptletInjection { name, args, body }
    }

    // -------------------------------------------------------------------------
    // List and preference updates (serialized by the engine task)
    // -------------------------------------------------------------------------

    pub fn update_default_rules(&mut self, rules: &str, resources_json: &str) {
        self.default_matcher.replace_rule_set(compile_filter_list(rules));
        if !resources_json.is_empty() {
            match ResourceLibrary::parse(resources_json) {
                Ok(library) => self.resources = library,
                Err(e) => log::warn!("keeping previous resources: {}", e),
            }
        }
        self.rewrite_cache.clear();
    }

    pub fn update_custom_rules(&mut self, rules: &str) {
        self.custom_matcher.replace_rule_set(compile_filter_list(rules));
    }

    pub fn set_tracker_table(&mut self, table: TrackerTable) {
        self.tracking.replace_table(table);
    }

    pub fn set_regional_catalog(&mut self, json: &str) -> Result<(), CatalogError> {
        let catalog = crate::regional::parse_catalog(json)?;
        self.regional.set_catalog(catalog);
        Ok(())
    }

    pub fn select_locale(&mut self, locale: &str) -> Option<String> {
        let selected = self.regional.select_for_locale(locale);
        self.sync_tags_to_regional();
        selected
    }

    pub fn enable_regional_list(&mut self, uuid: &str, enabled: bool) -> Result<(), ListError> {
        let result = self.regional.enable_list(uuid, enabled);
        self.sync_tags_to_regional();
        result
    }

    pub fn regional_list_ready(&mut self, uuid: &str, rules: &str) {
        self.regional.on_list_ready(uuid, compile_filter_list(rules));
        self.sync_tags_to_regional();
    }

    pub fn enable_tag(&mut self, tag: &str, enabled: bool) {
        self.default_matcher.enable_tag(tag, enabled);
        self.custom_matcher.enable_tag(tag, enabled);
        self.regional.enable_tag_all(tag, enabled);
        if enabled {
            if !self.enabled_tags.iter().any(|t| t == tag) {
                self.enabled_tags.push(tag.to_string());
            }
        } else {
            self.enabled_tags.retain(|t| t != tag);
        }
    }

    pub fn tag_exists(&self, tag: &str) -> bool {
        self.default_matcher.tag_exists(tag)
    }

    /// Newly registered regional matchers start with empty tag state; bring
    /// them in line with the engine-wide set.
    fn sync_tags_to_regional(&mut self) {
        let tags = self.enabled_tags.clone();
        for tag in &tags {
            self.regional.enable_tag_all(tag, true);
        }
    }

    pub fn regional(&self) -> &RegionalListManager {
        &self.regional
    }

    pub fn is_supported_locale(&self, locale: &str) -> bool {
        self.regional.is_supported_locale(locale)
    }
}
