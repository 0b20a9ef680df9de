//! Cleanup of raw generated text into a candidate query.
//!
//! Strips markdown fences and language tags. Performs no safety checks; the
//! result is still untrusted until validated.

use regex::Regex;
use std::sync::OnceLock;

const FENCE: &str = "```";

/// Bare language tag at the start of the text, followed by whitespace.
fn language_tag() -> Option<&'static Regex> {
    static TAG: OnceLock<Option<Regex>> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"(?i)^(?:sql|postgresql|postgres|sqlite)\s+").ok())
        .as_ref()
}

/// Opening fence info string: empty or a known SQL language tag. Any other
/// first line belongs to the query.
fn fence_info() -> Option<&'static Regex> {
    static INFO: OnceLock<Option<Regex>> = OnceLock::new();
    INFO.get_or_init(|| Regex::new(r"(?i)^(?:sql|postgresql|postgres|sqlite)?$").ok())
        .as_ref()
}

/// Reduces raw generated text to a candidate query.
///
/// Repeats the cleanup until the text stops changing, so applying it twice
/// gives the same result as applying it once.
pub fn sanitize(raw: &str) -> String {
    let mut current = raw.to_string();
    loop {
        let next = sanitize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn sanitize_once(text: &str) -> String {
    let text = text.trim();
    let text = first_fenced_block(text).unwrap_or(text).trim();
    let text = match language_tag().and_then(|tag| tag.find(text)) {
        Some(tag) => &text[tag.end()..],
        None => text,
    };
    text.trim().to_string()
}

/// Content of the first fenced block, or `None` if there is no fence.
///
/// Drops the opening fence and its info line; drops the closing fence and
/// everything after it. Without a closing fence the rest of the text is kept.
fn first_fenced_block(text: &str) -> Option<&str> {
    let start = text.find(FENCE)?;
    let after_fence = &text[start + FENCE.len()..];

    let body = match after_fence.find('\n') {
        Some(newline)
            if fence_info().is_some_and(|info| info.is_match(after_fence[..newline].trim())) =>
        {
            &after_fence[newline + 1..]
        }
        _ => after_fence,
    };

    Some(match body.find(FENCE) {
        Some(end) => &body[..end],
        None => body,
    })
}
