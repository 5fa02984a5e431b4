//! URL slug generation

use once_cell::sync::Lazy;
use regex::Regex;

/// Runs of anything that is not a letter or digit (Unicode aware)
static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").unwrap());

/// Generate a URL-friendly slug from a title or name.
///
/// Lowercases, collapses every run of punctuation and whitespace into one
/// hyphen and trims hyphens from both ends. Non-ASCII letters are kept.
pub fn generate_slug(name: &str) -> String {
    let lowered = name.to_lowercase();
    SEPARATORS
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

/// `base`, or `base-N` for the N-th collision
pub fn numbered_slug(base: &str, n: u32) -> String {
    if n <= 1 {
        base.to_string()
    } else {
        format!("{}-{}", base, n)
    }
}
