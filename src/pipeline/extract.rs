//! Recovery of a JSON object from free-form generator output.
//!
//! Generators wrap their answer in prose, markdown fences or both, and may
//! mention braces inside string values.  The scan below tracks string and
//! escape state so those braces never unbalance the match.

use memchr::memchr;
use serde::de::IgnoredAny;

/// Return the first balanced `{ ... }` substring of `text` that parses as
/// JSON.
///
/// Each opening brace is tried in order.  When the balanced span starting at
/// a brace fails to parse (or never closes), the search resumes at the next
/// opening brace after that one, which may lie inside the failed span.  The
/// first parseable candidate wins even if a later one is larger.
pub fn extract_first_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut cursor = 0;
    while let Some(offset) = memchr(b'{', &bytes[cursor..]) {
        let start = cursor + offset;
        if let Some(end) = balanced_end(bytes, start) {
            // Both ends are ASCII braces, so the slice is on char boundaries.
            let candidate = &text[start..=end];
            if serde_json::from_str::<IgnoredAny>(candidate).is_ok() {
                return Some(candidate);
            }
            tracing::trace!(start, end, "discarding unparseable JSON candidate");
        }
        cursor = start + 1;
    }
    None
}

/// Index of the `}` that brings depth back to zero for the `{` at `start`.
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}
