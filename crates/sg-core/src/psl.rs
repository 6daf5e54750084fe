//! eTLD+1 extraction and third-party classification
//!
//! Registrable-domain extraction drives the third-party test used by
//! `$third-party` modifiers and by tracking protection. A compact list of
//! common two-part public suffixes covers the hosts seen in filter lists;
//! unknown suffixes fall back to the last two labels.
//!
//! # Examples
//!
//! ```
//! use sg_core::psl::get_etld1;
//!
//! assert_eq!(get_etld1("sub.example.com"), "example.com");
//! assert_eq!(get_etld1("sub.example.co.uk"), "example.co.uk");
//! ```

/// Common two-part public suffixes.
const TWO_PART_SUFFIXES: &[&str] = &[
    "co.uk", "co.jp", "co.nz", "co.za", "co.in", "co.kr",
    "com.au", "com.br", "com.cn", "com.mx", "com.tw", "com.hk",
    "net.au", "net.nz",
    "org.uk", "org.au",
    "gov.uk", "gov.au",
    "ac.uk", "ac.jp",
    "ne.jp", "or.jp",
];

/// Get the eTLD+1 (registrable domain) of a hostname, as a suffix slice
/// of the input. Single-label hosts are returned unchanged.
pub fn get_etld1(host: &str) -> &str {
    let host = host.trim_end_matches('.');
    let n_labels = host.split('.').count();
    if n_labels <= 2 {
        return host;
    }

    // Last two labels; check whether they form a public suffix.
    let mut dots = host.rmatch_indices('.').map(|(i, _)| i);
    dots.next();
    let second_dot = match dots.next() {
        Some(i) => i,
        None => return host,
    };

    let last_two = &host[second_dot + 1..];
    if TWO_PART_SUFFIXES
        .iter()
        .any(|s| s.eq_ignore_ascii_case(last_two))
    {
        // eTLD is two labels; take three.
        return match dots.next() {
            Some(i) => &host[i + 1..],
            None => host,
        };
    }

    &host[second_dot + 1..]
}

/// Check if two hosts share the same eTLD+1.
pub fn is_same_site(host1: &str, host2: &str) -> bool {
    get_etld1(host1).eq_ignore_ascii_case(get_etld1(host2))
}

/// Check if a request host is third-party to the tab host.
/// An empty host on either side is treated as third-party (no relation
/// can be established).
pub fn is_third_party(tab_host: &str, request_host: &str) -> bool {
    if tab_host.is_empty() || request_host.is_empty() {
        return true;
    }
    !is_same_site(tab_host, request_host)
}

/// Get the parent domain (strip the leftmost label).
pub fn get_parent_domain(host: &str) -> Option<&str> {
    match host.find('.') {
        Some(idx) if idx + 1 < host.len() => Some(&host[idx + 1..]),
        _ => None,
    }
}

/// Iterator over host suffixes, from the full host down to the eTLD+1.
pub struct HostSuffixIter<'a> {
    current: &'a str,
    etld1_len: usize,
}

impl<'a> Iterator for HostSuffixIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_empty() || self.current.len() < self.etld1_len {
            return None;
        }

        let result = self.current;

        self.current = match get_parent_domain(self.current) {
            Some(parent) if parent.len() >= self.etld1_len => parent,
            _ => "",
        };

        Some(result)
    }
}

/// Walk host suffixes from most specific to least specific.
pub fn walk_host_suffixes(host: &str) -> HostSuffixIter<'_> {
    HostSuffixIter {
        current: host,
        etld1_len: get_etld1(host).len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_etld1_simple() {
        assert_eq!(get_etld1("example.com"), "example.com");
        assert_eq!(get_etld1("sub.example.com"), "example.com");
        assert_eq!(get_etld1("a.b.c.example.com"), "example.com");
    }

    #[test]
    fn test_etld1_two_part_suffix() {
        assert_eq!(get_etld1("example.co.uk"), "example.co.uk");
        assert_eq!(get_etld1("www.example.co.uk"), "example.co.uk");
    }

    #[test]
    fn test_etld1_single_label() {
        assert_eq!(get_etld1("localhost"), "localhost");
    }

    #[test]
    fn test_third_party_by_etld1() {
        // Same registrable domain is first-party even across subdomains
        assert!(!is_third_party("test.a.com", "test2.a.com"));
        assert!(is_third_party("b.com", "a.com"));
        assert!(is_third_party("", "a.com"));
    }

    #[test]
    fn test_get_parent_domain() {
        assert_eq!(get_parent_domain("sub.example.com"), Some("example.com"));
        assert_eq!(get_parent_domain("example.com"), Some("com"));
        assert_eq!(get_parent_domain("com"), None);
        assert_eq!(get_parent_domain(""), None);
    }

    #[test]
    fn test_walk_host_suffixes() {
        let suffixes: Vec<&str> = walk_host_suffixes("a.b.example.com").collect();
        assert_eq!(suffixes, vec!["a.b.example.com", "b.example.com", "example.com"]);
    }

    #[test]
    fn test_walk_host_suffixes_etld1_only() {
        let suffixes: Vec<&str> = walk_host_suffixes("example.com").collect();
        assert_eq!(suffixes, vec!["example.com"]);
    }
}
