//! CSP directive merging
//!
//! Multiple matched `$csp=` rules may target the same document. Their
//! policies are merged directive-by-directive: two `script-src` directives
//! contribute the union of their source tokens. Merging is additive - a more
//! specific rule never replaces another rule's directive, it only extends it.

/// Merge a list of CSP policy strings into one policy.
///
/// Directives keep first-seen order; tokens within a directive keep
/// first-seen order with duplicates dropped. Returns `None` for an empty
/// input.
pub fn merge_csp_policies(policies: &[String]) -> Option<String> {
    if policies.is_empty() {
        return None;
    }

    // (directive, tokens) in first-seen order
    let mut merged: Vec<(String, Vec<String>)> = Vec::new();

    for policy in policies {
        for directive in policy.split(';') {
            let directive = directive.trim();
            if directive.is_empty() {
                continue;
            }

            let mut parts = directive.split_whitespace();
            let name = match parts.next() {
                Some(name) => name.to_ascii_lowercase(),
                None => continue,
            };

            let idx = match merged.iter().position(|(n, _)| *n == name) {
                Some(idx) => idx,
                None => {
                    merged.push((name, Vec::new()));
                    merged.len() - 1
                }
            };

            let tokens = &mut merged[idx].1;
            for token in parts {
                if !tokens.iter().any(|t| t == token) {
                    tokens.push(token.to_string());
                }
            }
        }
    }

    if merged.is_empty() {
        return None;
    }

    let rendered = merged
        .iter()
        .map(|(name, tokens)| {
            if tokens.is_empty() {
                name.clone()
            } else {
                format!("{} {}", name, tokens.join(" "))
            }
        })
        .collect::<Vec<_>>()
        .join("; ");

    Some(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert_eq!(merge_csp_policies(&[]), None);
    }

    #[test]
    fn test_single_policy_passthrough() {
        let merged = merge_csp_policies(&["script-src 'none'".to_string()]).unwrap();
        assert_eq!(merged, "script-src 'none'");
    }

    #[test]
    fn test_union_of_source_tokens() {
        let merged = merge_csp_policies(&[
            "script-src 'nonce-x' 'unsafe-eval' 'self'".to_string(),
            "script-src 'nonce-x' 'unsafe-eval' 'unsafe-inline'".to_string(),
        ])
        .unwrap();
        assert_eq!(
            merged,
            "script-src 'nonce-x' 'unsafe-eval' 'self' 'unsafe-inline'"
        );
    }

    #[test]
    fn test_distinct_directives_kept_separate() {
        let merged = merge_csp_policies(&[
            "script-src 'self'; style-src 'unsafe-inline'".to_string(),
            "img-src 'none'".to_string(),
        ])
        .unwrap();
        assert_eq!(
            merged,
            "script-src 'self'; style-src 'unsafe-inline'; img-src 'none'"
        );
    }

    #[test]
    fn test_directive_name_case_insensitive() {
        let merged = merge_csp_policies(&[
            "Script-Src 'a'".to_string(),
            "script-src 'b'".to_string(),
        ])
        .unwrap();
        assert_eq!(merged, "script-src 'a' 'b'");
    }
}
