//! Canonicalization of routing hostnames into lookup domains.
//!
//! A hostname is collapsed to its last two labels, so `a.b.example.com` and
//! `*.example.com` are both checked (and exported) as `example.com`. Hosts with
//! a single label are kept as they are.

/// Returns the domain that is looked up for `host`, or `None` if the host is
/// empty.
///
/// The result is lowercased and has any trailing root dot removed. Applying
/// this function to its own output returns the same value.
pub fn extract_domain(host: &str) -> Option<String> {
    let host = host.trim();
    let host = host.strip_prefix("*.").unwrap_or(host).trim_end_matches('.');
    if host.is_empty() {
        return None;
    }

    let host = host.to_ascii_lowercase();
    let labels = host.split('.').collect::<Vec<_>>();
    let start = labels.len().saturating_sub(2);
    Some(labels[start..].join("."))
}
