//! Shared type definitions for Shieldgate
//!
//! These types form the input/output contract of the decision pipeline:
//! a [`RequestContext`] goes in, a [`BlockDecision`] comes out.

use crate::psl;
use crate::url::extract_host;

// =============================================================================
// Resource Types (bit mask for type filtering)
// =============================================================================

bitflags::bitflags! {
    /// Resource type bit mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceType: u32 {
        const OTHER = 1 << 0;
        const SCRIPT = 1 << 1;
        const IMAGE = 1 << 2;
        const STYLESHEET = 1 << 3;
        const OBJECT = 1 << 4;
        const SUBDOCUMENT = 1 << 5;  // iframe/frame
        const MAIN_FRAME = 1 << 6;   // top-level document
        const XMLHTTPREQUEST = 1 << 7;
        const WEBSOCKET = 1 << 8;
        const FONT = 1 << 9;
        const MEDIA = 1 << 10;
        const PING = 1 << 11;

        /// All resource types
        const ALL = 0xFFF;
        /// Document types (main_frame + sub_frame)
        const DOCUMENT = Self::MAIN_FRAME.bits() | Self::SUBDOCUMENT.bits();
    }
}

impl ResourceType {
    /// Parse from the browser's request type string.
    pub fn from_label(s: &str) -> Self {
        match s {
            "main_frame" | "document" => Self::MAIN_FRAME,
            "sub_frame" | "subdocument" => Self::SUBDOCUMENT,
            "stylesheet" => Self::STYLESHEET,
            "script" => Self::SCRIPT,
            "image" => Self::IMAGE,
            "font" => Self::FONT,
            "object" => Self::OBJECT,
            "xmlhttprequest" | "xhr" => Self::XMLHTTPREQUEST,
            "ping" => Self::PING,
            "media" => Self::MEDIA,
            "websocket" => Self::WEBSOCKET,
            _ => Self::OTHER,
        }
    }
}

// =============================================================================
// Party Masks
// =============================================================================

bitflags::bitflags! {
    /// Party (first-party / third-party) mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PartyMask: u8 {
        /// Matches first-party requests
        const FIRST_PARTY = 1 << 0;
        /// Matches third-party requests
        const THIRD_PARTY = 1 << 1;
        /// Matches both
        const ALL = Self::FIRST_PARTY.bits() | Self::THIRD_PARTY.bits();
    }
}

// =============================================================================
// Request Context
// =============================================================================

/// Context for a single request being classified.
///
/// Created at request start, read-only afterwards. Hosts are extracted once
/// here so the matching hot path works on plain slices.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Full request URL
    pub url: String,
    /// Request hostname (lowercase, extracted from `url`; empty if none)
    pub request_host: String,
    /// Resource type of the request
    pub resource_type: ResourceType,
    /// URL of the top-level tab document
    pub tab_url: String,
    /// Hostname of the top-level tab document (empty if none)
    pub tab_host: String,
    /// Tab identifier (de-dup scope for counting)
    pub tab_id: i32,
    /// Frame identifier within the tab
    pub frame_id: i32,
    /// Shields enabled for the tab origin
    pub shields_enabled: bool,
    /// Ads explicitly allowed for the tab origin
    pub ads_allowed: bool,
}

impl RequestContext {
    /// Build a context from the request and tab URLs.
    pub fn from_urls(url: &str, tab_url: &str, resource_type: ResourceType) -> Self {
        let request_host = extract_host(url).unwrap_or("").to_ascii_lowercase();
        let tab_host = extract_host(tab_url).unwrap_or("").to_ascii_lowercase();
        Self {
            url: url.to_string(),
            request_host,
            resource_type,
            tab_url: tab_url.to_string(),
            tab_host,
            tab_id: 0,
            frame_id: 0,
            shields_enabled: true,
            ads_allowed: false,
        }
    }

    /// Assign the frame-tree identifiers.
    pub fn with_frame(mut self, tab_id: i32, frame_id: i32) -> Self {
        self.tab_id = tab_id;
        self.frame_id = frame_id;
        self
    }

    /// Whether the request target is third-party to the tab origin
    /// (eTLD+1 comparison).
    pub fn is_third_party(&self) -> bool {
        psl::is_third_party(&self.tab_host, &self.request_host)
    }
}

// =============================================================================
// Decisions
// =============================================================================

/// Final verdict for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Let the request proceed.
    Allow,
    /// Cancel the request.
    Block,
    /// Serve the given `data:` URL instead of the original request.
    Redirect(String),
}

/// Which counter a block is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCategory {
    Ads,
    Trackers,
}

/// The result of classifying one request.
#[derive(Debug, Clone)]
pub struct BlockDecision {
    pub verdict: Verdict,
    /// Merged CSP policy to inject on document responses, if any.
    pub csp: Option<String>,
    /// Whether this decision is eligible for counting (still subject to
    /// per-navigation de-duplication).
    pub should_count: bool,
    /// Counter attribution when blocked.
    pub category: Option<BlockCategory>,
    /// Raw text of the rule that determined the verdict (for logging).
    pub matched_rule: Option<String>,
}

impl BlockDecision {
    /// A plain allow with no side effects.
    pub fn allow() -> Self {
        Self {
            verdict: Verdict::Allow,
            csp: None,
            should_count: false,
            category: None,
            matched_rule: None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        !matches!(self.verdict, Verdict::Allow)
    }
}

impl Default for BlockDecision {
    fn default() -> Self {
        Self::allow()
    }
}

// =============================================================================
// Cosmetic filtering control
// =============================================================================

/// Per-origin cosmetic filtering preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CosmeticControl {
    /// Cosmetic filtering disabled for the origin.
    Allow,
    /// Cosmetic filtering enabled.
    Block,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_from_label() {
        assert_eq!(ResourceType::from_label("script"), ResourceType::SCRIPT);
        assert_eq!(ResourceType::from_label("xhr"), ResourceType::XMLHTTPREQUEST);
        assert_eq!(
            ResourceType::from_label("sub_frame"),
            ResourceType::SUBDOCUMENT
        );
        assert_eq!(ResourceType::from_label("bogus"), ResourceType::OTHER);
    }

    #[test]
    fn test_context_extracts_hosts() {
        let ctx = RequestContext::from_urls(
            "https://ads.example.com/banner.png",
            "https://news.site.com/",
            ResourceType::IMAGE,
        );
        assert_eq!(ctx.request_host, "ads.example.com");
        assert_eq!(ctx.tab_host, "news.site.com");
        assert!(ctx.is_third_party());
    }

    #[test]
    fn test_context_same_site_is_first_party() {
        let ctx = RequestContext::from_urls(
            "https://static.site.com/app.js",
            "https://www.site.com/",
            ResourceType::SCRIPT,
        );
        assert!(!ctx.is_third_party());
    }

    #[test]
    fn test_default_decision_is_allow() {
        let d = BlockDecision::default();
        assert!(!d.is_blocked());
        assert!(!d.should_count);
    }
}
