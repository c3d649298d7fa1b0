//! Machine display names.

const MAX_LABEL: usize = 63;

/// Normalize free text into a DNS label: lowercase ASCII letters, digits
/// and `-`, no leading or trailing dash, at most 63 bytes.
///
/// Returns `None` when nothing usable remains.
pub fn normalize_dns_label(raw: &str) -> Option<String> {
    let mut label = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            label.push(c);
        } else if !label.ends_with('-') {
            label.push('-');
        }
    }
    label.truncate(MAX_LABEL);
    let label = label.trim_matches('-');
    (!label.is_empty()).then(|| label.to_string())
}

/// Name derived from a reported hostname, falling back to `"node"`.
pub fn auto_name(hostname: &str) -> String {
    normalize_dns_label(hostname).unwrap_or_else(|| "node".to_string())
}
