//! Input normalization
//!
//! Detectors and the cache key see the same normalized text, so a cached
//! verdict's spans always refer to what the detectors scanned.

/// Characters that render as nothing and are used to split trigger words
const INVISIBLE: &[char] = &['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}'];

/// Trim, drop invisible characters and collapse whitespace runs to one space
///
/// ```rust
/// use reflex::text::normalize;
///
/// assert_eq!(normalize("  ig\u{200B}nore \n\t previous  "), "ignore previous");
/// ```
pub fn normalize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;

    for ch in input.chars().filter(|c| !INVISIBLE.contains(c)) {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(ch);
    }

    out
}

/// Cut `input` to at most `max_chars` characters
///
/// Returns the kept prefix and whether anything was cut.
pub fn truncate_chars(input: &str, max_chars: usize) -> (&str, bool) {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => (&input[..idx], true),
        None => (input, false),
    }
}
