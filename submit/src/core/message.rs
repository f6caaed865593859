//! Helpers for text that is sent back to the chat platform.

/// Zero-width space inserted after `@` so echoed text cannot ping anyone.
const ZERO_WIDTH_SPACE: char = '\u{200B}';

/// Neutralize `@mentions` in text that originates from untrusted output.
pub fn suppress_mentions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        out.push(ch);
        if ch == '@' {
            out.push(ZERO_WIDTH_SPACE);
        }
    }
    out
}

/// Human-readable size ceiling, in whole mebibytes (rounded down, minimum 1).
pub fn format_ceiling_mb(bytes: u64) -> String {
    let mb = (bytes / (1024 * 1024)).max(1);
    format!("{mb}MB")
}
