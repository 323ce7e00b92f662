//! Kubernetes label sanitizer: turns an arbitrary course/exercise/grader
//! name into a valid Kubernetes label value.
//!
//! A label value must start with an alphanumeric character, contain only
//! `[A-Za-z0-9_.-]`, and be at most 63 characters. This leaves one
//! character of headroom (62) for a caller-appended suffix; that keeps
//! that convention.

use unicode_normalization::UnicodeNormalization;

const MAX_LEN: usize = 62;

/// Fold `input` into a valid Kubernetes label value.
///
/// Order matters and mirrors the original exactly: NFKD-normalize and drop
/// non-ASCII, turn spaces into underscores, strip a leading run of
/// non-alphanumeric characters, drop every remaining disallowed character,
/// then truncate. Each step only removes ambiguity the previous step could
/// have introduced, so the function is idempotent (spec §8 invariant 5).
pub fn sanitize_label(input: &str) -> String {
    let ascii_folded: String = input.nfkd().filter(char::is_ascii).collect();
    let underscored: String = ascii_folded
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .collect();
    let leading_trimmed = underscored.trim_start_matches(|c: char| !c.is_ascii_alphanumeric());
    let filtered: String = leading_trimmed
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    filtered.chars().take(MAX_LEN).collect()
}
