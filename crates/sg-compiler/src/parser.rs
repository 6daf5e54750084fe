//! EasyList-derived filter rule parser
//!
//! One pass over the list text; each line compiles independently. Malformed
//! rules are logged and skipped - a bad line never aborts compilation of the
//! rest of the list.

use std::net::IpAddr;
use std::sync::Arc;

use sg_core::hash::hash_domain;
use sg_core::rules::{
    Anchor, CosmeticAction, CosmeticRule, DomainConstraint, FilterRuleSet, NetworkRule, RuleAction,
};
use sg_core::types::{PartyMask, ResourceType};

/// Per-rule compile failure. The list parser logs these and moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty rule")]
    EmptyRule,
    #[error("unknown option `{0}`")]
    UnknownOption(String),
    #[error("invalid hostname anchor")]
    InvalidHostAnchor,
    #[error("empty `domain=` option")]
    EmptyDomainOption,
    #[error("`{0}` is only valid on exception rules")]
    HideFlagOnBlock(&'static str),
    #[error("empty selector")]
    EmptySelector,
    #[error("invalid host qualifier `{0}`")]
    InvalidHostQualifier(String),
    #[error("malformed scriptlet body")]
    MalformedScriptlet,
    #[error("unsupported syntax: {0}")]
    Unsupported(&'static str),
}

/// One successfully parsed line.
#[derive(Debug, Clone)]
pub enum ParsedRule {
    Network(NetworkRule),
    Cosmetic(CosmeticRule),
}

/// Result of parsing one list.
#[derive(Debug, Default)]
pub struct ParsedList {
    pub network: Vec<NetworkRule>,
    pub cosmetic: Vec<CosmeticRule>,
    /// Malformed lines that were skipped
    pub skipped: usize,
}

/// Parse a whole filter list.
pub fn parse_filter_list(text: &str) -> ParsedList {
    let mut out = ParsedList::default();

    for (line_no, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || is_comment_line(line) {
            continue;
        }

        match parse_rule(line) {
            Ok(ParsedRule::Network(rule)) => out.network.push(rule),
            Ok(ParsedRule::Cosmetic(rule)) => out.cosmetic.push(rule),
            Err(e) => {
                log::debug!("skipping rule at line {}: {} ({})", line_no + 1, line, e);
                out.skipped += 1;
            }
        }
    }

    out
}

/// Parse and partition a list in one step.
pub fn compile_filter_list(text: &str) -> Arc<FilterRuleSet> {
    let parsed = parse_filter_list(text);
    FilterRuleSet::from_rules(parsed.network, parsed.cosmetic)
}

/// Parse a single non-comment line.
pub fn parse_rule(line: &str) -> Result<ParsedRule, ParseError> {
    if let Some((hosts, selector)) = split_cosmetic(line, "#@#") {
        return parse_cosmetic_rule(hosts, selector, true).map(ParsedRule::Cosmetic);
    }
    if line.contains("#?#") {
        return Err(ParseError::Unsupported("procedural cosmetic rule"));
    }
    if let Some((hosts, selector)) = split_cosmetic(line, "##") {
        return parse_cosmetic_rule(hosts, selector, false).map(ParsedRule::Cosmetic);
    }

    parse_network_rule(line).map(ParsedRule::Network)
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with('!')
        || line.starts_with('[')
        || (line.starts_with('#') && !line.starts_with("##") && !line.starts_with("#@#"))
}

fn split_cosmetic<'a>(line: &'a str, marker: &str) -> Option<(&'a str, &'a str)> {
    let pos = line.find(marker)?;
    Some((&line[..pos], &line[pos + marker.len()..]))
}

// =============================================================================
// Network rules
// =============================================================================

fn parse_network_rule(line: &str) -> Result<NetworkRule, ParseError> {
    let raw = line.to_string();
    let mut action = RuleAction::Block;
    let mut rest = line;

    if let Some(stripped) = rest.strip_prefix("@@") {
        action = RuleAction::Allow;
        rest = stripped.trim_start();
    }

    let (pattern_part, options_text) = match rest.find('$') {
        Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
        None => (rest, None),
    };

    let mut options = ParsedOptions::default();
    if let Some(text) = options_text {
        options = parse_options(text, action)?;
    }

    let pattern_part = pattern_part.trim();
    if pattern_part.is_empty() {
        return Err(ParseError::EmptyRule);
    }

    // Hosts-file style: "0.0.0.0 adserver.example"
    if let Some(host) = parse_hosts_file_domain(pattern_part) {
        return Ok(assemble_rule(
            raw,
            action,
            String::new(),
            Anchor::Hostname,
            false,
            host,
            options,
        ));
    }

    let (anchor, body) = if let Some(rest) = pattern_part.strip_prefix("||") {
        (Anchor::Hostname, rest)
    } else if let Some(rest) = pattern_part.strip_prefix('|') {
        (Anchor::Left, rest)
    } else {
        (Anchor::None, pattern_part)
    };

    let (body, right_anchored) = match body.strip_suffix('|') {
        Some(stripped) => (stripped, true),
        None => (body, false),
    };

    if anchor == Anchor::Hostname {
        let (host, remainder) = split_host_anchor(body)?;
        return Ok(assemble_rule(
            raw,
            action,
            remainder.to_string(),
            Anchor::Hostname,
            right_anchored,
            host,
            options,
        ));
    }

    if body.is_empty() {
        return Err(ParseError::EmptyRule);
    }

    Ok(assemble_rule(
        raw,
        action,
        body.to_string(),
        anchor,
        right_anchored,
        String::new(),
        options,
    ))
}

fn assemble_rule(
    raw: String,
    action: RuleAction,
    pattern: String,
    anchor: Anchor,
    right_anchored: bool,
    host: String,
    options: ParsedOptions,
) -> NetworkRule {
    NetworkRule {
        raw,
        action,
        pattern,
        anchor,
        right_anchored,
        host,
        resource_types: options.resource_types,
        party: options.party,
        domains: options.domains,
        tag: options.tag,
        redirect: options.redirect,
        csp: options.csp,
        generichide: options.generichide,
        specifichide: options.specifichide,
    }
}

/// Split `host^remainder` out of the body of a `||` rule.
fn split_host_anchor(body: &str) -> Result<(String, &str), ParseError> {
    let body = body.strip_prefix('.').unwrap_or(body);

    let mut end = body.len();
    for (i, ch) in body.char_indices() {
        match ch {
            '^' | '/' | '*' | '?' | '#' | ':' => {
                end = i;
                break;
            }
            _ => {}
        }
    }

    let host = normalize_domain(&body[..end]).ok_or(ParseError::InvalidHostAnchor)?;
    Ok((host, &body[end..]))
}

fn parse_hosts_file_domain(line: &str) -> Option<String> {
    let mut parts = line.split_whitespace();
    let first = parts.next()?;
    let second = parts.next()?;

    if first.parse::<IpAddr>().is_ok() {
        return normalize_domain(second);
    }

    None
}

fn normalize_domain(host: &str) -> Option<String> {
    let trimmed = host.trim().trim_matches('.');
    if trimmed.is_empty() {
        return None;
    }

    if !trimmed
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
    {
        return None;
    }

    Some(trimmed.to_ascii_lowercase())
}

// =============================================================================
// Options
// =============================================================================

#[derive(Debug)]
struct ParsedOptions {
    resource_types: ResourceType,
    party: PartyMask,
    domains: Option<DomainConstraint>,
    tag: Option<String>,
    redirect: Option<String>,
    csp: Option<String>,
    generichide: bool,
    specifichide: bool,
}

impl Default for ParsedOptions {
    fn default() -> Self {
        Self {
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

#[derive(Default)]
struct ResourceTypeAccumulator {
    include: u32,
    exclude: u32,
}

fn parse_options(text: &str, action: RuleAction) -> Result<ParsedOptions, ParseError> {
    let mut out = ParsedOptions::default();
    let mut types = ResourceTypeAccumulator::default();
    let mut party_include = PartyMask::empty();
    let mut party_exclude = PartyMask::empty();

    for raw in text.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        if let Some(value) = option_value(raw, "domain=") {
            out.domains = Some(parse_domain_option(value)?);
            continue;
        }
        if let Some(value) = option_value(raw, "tag=") {
            if !value.is_empty() {
                out.tag = Some(value.to_ascii_lowercase());
            }
            continue;
        }
        if let Some(value) = option_value(raw, "redirect=") {
            if !value.is_empty() {
                out.redirect = Some(value.to_string());
            }
            continue;
        }
        if let Some(value) = option_value(raw, "csp=") {
            if !value.is_empty() {
                out.csp = Some(value.to_string());
            }
            continue;
        }

        let lower = raw.to_ascii_lowercase();
        let (negated, name) = match lower.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, lower.as_str()),
        };

        match name {
            "generichide" => {
                if action != RuleAction::Allow {
                    return Err(ParseError::HideFlagOnBlock("generichide"));
                }
                out.generichide = true;
            }
            "specifichide" => {
                if action != RuleAction::Allow {
                    return Err(ParseError::HideFlagOnBlock("specifichide"));
                }
                out.specifichide = true;
            }
            "third-party" | "thirdparty" | "3p" => {
                if negated {
                    party_exclude |= PartyMask::THIRD_PARTY;
                } else {
                    party_include |= PartyMask::THIRD_PARTY;
                }
            }
            "first-party" | "firstparty" | "1p" => {
                if negated {
                    party_exclude |= PartyMask::FIRST_PARTY;
                } else {
                    party_include |= PartyMask::FIRST_PARTY;
                }
            }
            _ => match resource_type_mask(name) {
                Some(mask) => {
                    if negated {
                        types.exclude |= mask;
                    } else {
                        types.include |= mask;
                    }
                }
                None => return Err(ParseError::UnknownOption(raw.to_string())),
            },
        }
    }

    out.resource_types = finalize_types(types);
    out.party = finalize_party(party_include, party_exclude);

    Ok(out)
}

fn option_value<'a>(raw: &'a str, name: &str) -> Option<&'a str> {
    if raw.len() >= name.len() && raw[..name.len()].eq_ignore_ascii_case(name) {
        Some(&raw[name.len()..])
    } else {
        None
    }
}

fn parse_domain_option(value: &str) -> Result<DomainConstraint, ParseError> {
    let mut constraint = DomainConstraint::default();

    for raw in value.split('|') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let (is_exclude, domain_raw) = match raw.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        let domain = normalize_domain(domain_raw).ok_or(ParseError::EmptyDomainOption)?;
        let hash = hash_domain(&domain);

        if is_exclude {
            constraint.exclude.push(hash);
        } else {
            constraint.include.push(hash);
        }
    }

    if constraint.is_empty() {
        return Err(ParseError::EmptyDomainOption);
    }

    Ok(constraint)
}

fn finalize_types(acc: ResourceTypeAccumulator) -> ResourceType {
    let all = ResourceType::ALL.bits();
    let include = acc.include & all;
    let exclude = acc.exclude & all;

    let mask = if include != 0 {
        include & !exclude
    } else if exclude != 0 {
        all & !exclude
    } else {
        0
    };

    if mask == all {
        return ResourceType::empty();
    }
    ResourceType::from_bits_truncate(mask)
}

fn finalize_party(include: PartyMask, exclude: PartyMask) -> PartyMask {
    let mask = if !include.is_empty() {
        include - exclude
    } else if !exclude.is_empty() {
        PartyMask::ALL - exclude
    } else {
        PartyMask::empty()
    };

    if mask == PartyMask::ALL {
        return PartyMask::empty();
    }
    mask
}

fn resource_type_mask(name: &str) -> Option<u32> {
    match name {
        "script" => Some(ResourceType::SCRIPT.bits()),
        "image" => Some(ResourceType::IMAGE.bits()),
        "stylesheet" => Some(ResourceType::STYLESHEET.bits()),
        "object" => Some(ResourceType::OBJECT.bits()),
        "subdocument" => Some(ResourceType::SUBDOCUMENT.bits()),
        "document" | "main_frame" => Some(ResourceType::MAIN_FRAME.bits()),
        "xmlhttprequest" | "xhr" => Some(ResourceType::XMLHTTPREQUEST.bits()),
        "media" => Some(ResourceType::MEDIA.bits()),
        "font" => Some(ResourceType::FONT.bits()),
        "ping" => Some(ResourceType::PING.bits()),
        "websocket" => Some(ResourceType::WEBSOCKET.bits()),
        "other" => Some(ResourceType::OTHER.bits()),
        _ => None,
    }
}

// =============================================================================
// Cosmetic rules
// =============================================================================

fn parse_cosmetic_rule(
    hosts: &str,
    selector: &str,
    is_exception: bool,
) -> Result<CosmeticRule, ParseError> {
    let selector = selector.trim();
    if selector.is_empty() {
        return Err(ParseError::EmptySelector);
    }

    let (include_hosts, exclude_hosts) = parse_host_qualifiers(hosts)?;

    if is_exception {
        return Ok(CosmeticRule {
            selector: selector.to_string(),
            action: CosmeticAction::Unhide,
            include_hosts,
            exclude_hosts,
        });
    }

    // Scriptlet injection: ##+js(name, args...)
    if let Some(body) = selector.strip_prefix("+js(") {
        let body = body.strip_suffix(')').ok_or(ParseError::MalformedScriptlet)?;
        let body = body.trim();
        if body.is_empty() {
            return Err(ParseError::MalformedScriptlet);
        }
        return Ok(CosmeticRule {
            selector: body.to_string(),
            action: CosmeticAction::Scriptlet,
            include_hosts,
            exclude_hosts,
        });
    }

    // Custom style: ##selector:style(css)
    if let Some(style_pos) = selector.rfind(":style(") {
        let css = selector[style_pos + ":style(".len()..]
            .strip_suffix(')')
            .ok_or(ParseError::EmptySelector)?;
        let base = selector[..style_pos].trim();
        if base.is_empty() {
            return Err(ParseError::EmptySelector);
        }
        return Ok(CosmeticRule {
            selector: base.to_string(),
            action: CosmeticAction::Style(css.trim().to_string()),
            include_hosts,
            exclude_hosts,
        });
    }

    Ok(CosmeticRule {
        selector: selector.to_string(),
        action: CosmeticAction::Hide,
        include_hosts,
        exclude_hosts,
    })
}

fn parse_host_qualifiers(hosts: &str) -> Result<(Vec<String>, Vec<String>), ParseError> {
    let mut include = Vec::new();
    let mut exclude = Vec::new();

    for raw in hosts.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let (is_exclude, host_raw) = match raw.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        let host =
            normalize_domain(host_raw).ok_or_else(|| ParseError::InvalidHostQualifier(raw.to_string()))?;

        if is_exclude {
            exclude.push(host);
        } else {
            include.push(host);
        }
    }

    Ok((include, exclude))
}
