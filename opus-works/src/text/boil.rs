//! Comparison keys ("boiled" strings)

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Orthographic equivalences, applied in order after lowercasing
const FOLDS: &[(&str, &str)] = &[
    ("sch", "sh"),
    ("ß", "ss"),
    ("sz", "ss"),
    ("œ", "oe"),
    ("oe", "o"),
    ("ü", "ue"),
    ("ue", "u"),
    ("ae", "a"),
];

/// Reduce a string to a case, accent and punctuation insensitive key
///
/// Only ever used for equality tests, never for display.
pub fn boil(s: &str) -> String {
    let mut folded = s.to_lowercase();
    for (from, to) in FOLDS {
        if folded.contains(from) {
            folded = folded.replace(from, to);
        }
    }

    let stripped: String = folded
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect();

    stripped.trim_end_matches(['s', '\'']).to_string()
}
