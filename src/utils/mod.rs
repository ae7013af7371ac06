//! Common utilities and helper functions
//!
//! This module provides shared utilities used across the application.

use regex::Regex;
use std::sync::OnceLock;

/// Longest error message persisted on a guide
pub const MAX_ERROR_MESSAGE_CHARS: usize = 1000;

/// Normalize whitespace in text
pub fn normalize_whitespace(text: &str) -> String {
    static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();

    let re = WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("Invalid regex pattern"));

    re.replace_all(text.trim(), " ").to_string()
}

/// Truncate text to at most `max_chars` characters
///
/// Cuts on character boundaries, so multi-byte text is never split.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((idx, _)) if max_chars > 3 => {
            let keep = text
                .char_indices()
                .nth(max_chars - 3)
                .map_or(idx, |(i, _)| i);
            format!("{}...", &text[..keep])
        }
        Some((idx, _)) => text[..idx].to_string(),
    }
}

/// Normalize and bound a message before it is stored on a guide
pub fn error_message(text: &str) -> String {
    truncate_chars(&normalize_whitespace(text), MAX_ERROR_MESSAGE_CHARS)
}

/// Split items into consecutive batches of at most `size`, preserving order
///
/// A `size` of zero is treated as one.
pub fn partition_batches<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    items.chunks(size.max(1)).map(<[T]>::to_vec).collect()
}
