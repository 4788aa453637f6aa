//! Text normalization shared by the segmenter and the embedding cache.
//!
//! Cache keys are derived from the normalized form, so this normalization
//! must stay stable across versions or every cached embedding is orphaned:
//! 1. Collapse runs of Unicode whitespace into a single ASCII space
//! 2. Trim leading and trailing whitespace
//! 3. Preserve case, punctuation and all other characters

use sha2::{Digest, Sha256};

/// Collapse whitespace runs to single spaces and trim the ends.
pub fn normalize_text(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !normalized.is_empty() {
            normalized.push(' ');
        }
        normalized.push_str(word);
    }
    normalized
}

/// SHA-256 of the normalized text, used as the content half of a cache key.
pub fn content_hash(text: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(text).as_bytes());
    hasher.finalize().into()
}

/// Rough token count used for usage reporting.
pub fn approximate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}
