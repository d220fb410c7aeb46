//! Response header safety caps.
//!
//! A worker serializing an app's response applies these limits before the
//! frame leaves the child, so a misbehaving handler cannot exhaust parent
//! memory through headers alone.

/// Maximum number of response header entries.
pub const MAX_RESPONSE_HEADERS: usize = 100;
/// Maximum size of a single header value, in bytes.
pub const MAX_HEADER_VALUE_BYTES: usize = 8 * 1024;
/// Maximum combined size of all header names and values, in bytes.
pub const MAX_HEADER_TOTAL_BYTES: usize = 64 * 1024;
/// Content type assumed when a handler sets none.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Apply the caps, preserving insertion order. Entries beyond the count cap,
/// entries with oversized values, and entries past the total budget are
/// dropped silently.
pub fn enforce_header_limits(headers: Vec<(String, String)>) -> Vec<(String, String)> {
    let mut out = Vec::with_capacity(headers.len().min(MAX_RESPONSE_HEADERS));
    let mut total = 0usize;
    for (name, value) in headers {
        if out.len() >= MAX_RESPONSE_HEADERS {
            break;
        }
        if value.len() > MAX_HEADER_VALUE_BYTES {
            continue;
        }
        let entry_len = name.len() + value.len();
        if total + entry_len > MAX_HEADER_TOTAL_BYTES {
            break;
        }
        total += entry_len;
        out.push((name, value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_header_count_preserving_order() {
        let headers: Vec<_> = (0..1000)
            .map(|i| (format!("h-{i}"), "v".repeat(32)))
            .collect();
        let out = enforce_header_limits(headers);
        assert_eq!(out.len(), MAX_RESPONSE_HEADERS);
        for (i, (name, _)) in out.iter().enumerate() {
            assert_eq!(name, &format!("h-{i}"));
        }
    }

    #[test]
    fn drops_oversized_values() {
        let headers = vec![
            ("small".to_string(), "ok".to_string()),
            ("big".to_string(), "x".repeat(1024 * 1024)),
            ("after".to_string(), "kept".to_string()),
        ];
        let out = enforce_header_limits(headers);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|(_, v)| v.len() <= MAX_HEADER_VALUE_BYTES));
        assert_eq!(out[1].0, "after");
    }

    #[test]
    fn stops_at_total_budget() {
        // 9 entries of 8 KiB values exceed 64 KiB combined.
        let headers: Vec<_> = (0..9)
            .map(|i| (format!("h{i}"), "v".repeat(MAX_HEADER_VALUE_BYTES)))
            .collect();
        let out = enforce_header_limits(headers);
        let total: usize = out.iter().map(|(n, v)| n.len() + v.len()).sum();
        assert!(total <= MAX_HEADER_TOTAL_BYTES);
        assert!(out.len() < 9);
    }
}
