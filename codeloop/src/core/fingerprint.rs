//! Content fingerprints used for repetition detection.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// SHA-256 hex digest of `text`.
pub fn digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Collapse digit runs to `#` and whitespace runs to a single space.
pub fn normalize_signature(text: &str) -> String {
    let without_digits = DIGITS.replace_all(text.trim(), "#");
    WHITESPACE.replace_all(&without_digits, " ").into_owned()
}
