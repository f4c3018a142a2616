//! Roman numeral handling

use once_cell::sync::Lazy;
use regex::Regex;

const ROMAN_NUMERAL_MAP: &[(&str, u32)] = &[
    ("M", 1000),
    ("CM", 900),
    ("D", 500),
    ("CD", 400),
    ("C", 100),
    ("XC", 90),
    ("L", 50),
    ("XL", 40),
    ("X", 10),
    ("IX", 9),
    ("V", 5),
    ("IV", 4),
    ("I", 1),
];

const NUMERAL: &str = r"M{0,4}(?:CM|CD|D?C{0,3})(?:XC|XL|L?X{0,3})(?:IX|IV|V?I{0,3})";

/// Bare numeral followed by `. : , ;` or end of string
static NUMERAL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"\b({NUMERAL})\b([.:,;]|$)")).expect("static regex"));

/// Leading numeral used as a movement number ("IV. Finale")
static LEADING_ROMAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^\W*\b({NUMERAL})\b[\s.:,;]")).expect("static regex"));

/// Leading arabic movement number ("4. Finale", "2) Aria")
static LEADING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\W*\d+[.):-]").expect("static regex"));

/// Value of an uppercase roman numeral, or `None` if it is not one
///
/// Accepts I through MMMM in canonical subtractive form.
pub fn from_roman(s: &str) -> Option<u32> {
    if s.is_empty() || !CANONICAL_NUMERAL.is_match(s) {
        return None;
    }
    let mut rest = s;
    let mut value = 0;
    for (numeral, integer) in ROMAN_NUMERAL_MAP {
        while let Some(tail) = rest.strip_prefix(numeral) {
            value += integer;
            rest = tail;
        }
    }
    Some(value)
}

static CANONICAL_NUMERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^{NUMERAL}$")).expect("static regex"));

/// Replace bare roman numerals (followed by punctuation or end) with digits
///
/// The trailing punctuation is consumed along with the numeral, so
/// "Book II: Prelude" becomes "Book 2 Prelude".
pub fn replace_roman_numerals(s: &str) -> String {
    NUMERAL_PATTERN
        .replace_all(s, |caps: &regex::Captures<'_>| match from_roman(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Remove one leading roman or arabic movement number, if present
pub(crate) fn strip_numbering_once(s: &str) -> String {
    let without_roman = match LEADING_ROMAN.captures(s) {
        Some(caps) if !caps[1].is_empty() => &s[caps[0].len()..],
        _ => s,
    };
    LEADING_NUMBER.replace(without_roman, "").trim().to_string()
}

/// Strip leading movement numbering, repeated for nested numbering levels
pub fn strip_numbering(s: &str) -> String {
    let mut current = s.trim().to_string();
    for _ in 0..5 {
        let next = strip_numbering_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_roman() {
        assert_eq!(from_roman("IV"), Some(4));
        assert_eq!(from_roman("IX"), Some(9));
        assert_eq!(from_roman("MCMXCIV"), Some(1994));
        assert_eq!(from_roman("MMMM"), Some(4000));
        assert_eq!(from_roman("IIII"), None);
        assert_eq!(from_roman("iv"), None);
        assert_eq!(from_roman(""), None);
        assert_eq!(from_roman("ABC"), None);
    }

    #[test]
    fn test_replace_roman_numerals() {
        assert_eq!(replace_roman_numerals("Sonata No. IV"), "Sonata No. 4");
        assert_eq!(replace_roman_numerals("Book II: Prelude"), "Book 2 Prelude");
        assert_eq!(replace_roman_numerals("Act I."), "Act 1");
        // Not followed by punctuation or end of string
        assert_eq!(replace_roman_numerals("I love Paris"), "I love Paris");
        // Lowercase words are never numerals
        assert_eq!(replace_roman_numerals("mix."), "mix.");
    }

    #[test]
    fn test_strip_numbering() {
        assert_eq!(strip_numbering("II. Adagio"), "Adagio");
        assert_eq!(strip_numbering("4. Finale: Presto"), "Finale: Presto");
        assert_eq!(strip_numbering("Act I: No. 3"), "Act I: No. 3");
        assert_eq!(strip_numbering("I. 1. Allegro"), "Allegro");
        assert_eq!(strip_numbering("Allegro"), "Allegro");
    }
}
