//! Helpers for keeping radio text safe to log and safe to transmit.
//!
//! Mesh text arrives from arbitrary nodes and may contain newlines or control
//! characters; [`escape_log`] keeps every log record on one line. Outbound text
//! is bounded by the radio payload size, so [`truncate_utf8`] cuts on a char
//! boundary instead of splitting a multi-byte sequence.

use std::fmt::Write;

/// Longest escaped preview emitted into a log line.
const MAX_PREVIEW_CHARS: usize = 300;

/// Escape a string for single-line logging.
///
/// `\n`, `\r`, `\t` and backslash become two-character escapes, any other control
/// character becomes `\xNN`. Output is capped at 300 chars with a trailing `…`.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW_CHARS) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW_CHARS {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Return the longest prefix of `s` that fits in `max_bytes` without splitting a char.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut cut = max_bytes;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    &s[..cut]
}

/// Escaped log preview limited to `max_bytes` of the original text, `...` appended when cut.
pub fn preview(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return escape_log(s);
    }
    let mut out = escape_log(truncate_utf8(s, max_bytes.saturating_sub(3)));
    out.push_str("...");
    out
}

/// Lowercase hex of the first `max` bytes, for logging undecodable payloads.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    data.iter()
        .take(max)
        .fold(String::with_capacity(max * 2), |mut acc, b| {
            let _ = write!(&mut acc, "{:02x}", b);
            acc
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_newlines_and_controls() {
        assert_eq!(escape_log("ping\nline2\r\tx"), "ping\\nline2\\r\\tx");
        assert_eq!(escape_log("a\u{7}b"), "a\\x07b");
    }

    #[test]
    fn truncate_backs_off_to_char_boundary() {
        // 'é' is two bytes; a 4-byte cut would land inside it
        let s = "abcé";
        assert_eq!(truncate_utf8(s, 4), "abc");
        assert_eq!(truncate_utf8(s, 5), "abcé");
        assert_eq!(truncate_utf8("🙂x", 2), "");
    }

    #[test]
    fn preview_appends_ellipsis_only_when_cut() {
        assert_eq!(preview("hello", 10), "hello");
        assert_eq!(preview("12345🙂7890", 8), "12345...");
    }

    #[test]
    fn hex_snippet_limits_length() {
        assert_eq!(hex_snippet(&[0xde, 0xad, 0xbe, 0xef], 2), "dead");
        assert_eq!(hex_snippet(&[], 8), "");
    }
}
