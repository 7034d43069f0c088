//! UTF-8 safe string truncation.
//!
//! WebSocket close reasons are limited to 123 bytes. Slicing `&str` inside a
//! multi-byte character panics, so truncation walks back to a char boundary.

/// Maximum close-frame reason length in bytes (125 control payload − 2 code bytes).
pub const MAX_CLOSE_REASON_BYTES: usize = 123;

/// Truncate a string to at most `max_bytes` bytes at a char boundary.
#[inline]
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Truncate a close reason to [`MAX_CLOSE_REASON_BYTES`].
pub fn close_reason(s: &str) -> String {
    truncate_utf8(s, MAX_CLOSE_REASON_BYTES).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_within_limit() {
        assert_eq!(truncate_utf8("hello", 10), "hello");
    }

    #[test]
    fn ascii_truncated() {
        assert_eq!(truncate_utf8("hello world", 5), "hello");
    }

    #[test]
    fn multibyte_snaps_back_to_boundary() {
        // '设' is 3 bytes
        assert_eq!(truncate_utf8("ab设备", 4), "ab");
        assert_eq!(truncate_utf8("ab设备", 5), "ab设");
    }

    #[test]
    fn zero_limit_is_empty() {
        assert_eq!(truncate_utf8("abc", 0), "");
    }

    #[test]
    fn close_reason_caps_at_123_bytes() {
        let long = "é".repeat(100); // 200 bytes
        let reason = close_reason(&long);
        assert!(reason.len() <= MAX_CLOSE_REASON_BYTES);
        assert_eq!(reason.len(), 122);
        assert!(reason.chars().all(|c| c == 'é'));
    }

    #[test]
    fn close_reason_short_string_unchanged() {
        assert_eq!(close_reason("connect failed"), "connect failed");
    }
}
