//! User-supplied text rules: synonyms, replacements and noise words
//!
//! Lists arrive in the `(a, b) / (c, d)` text form. Each malformed entry is
//! rejected on its own and reported as a [`ConfigIssue`]. The rest still apply.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use tracing::warn;

/// Synonym tokens may only hold word characters or `&`
static SYNONYM_PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w&]").expect("static regex"));

/// Words that carry no meaning on their own when they are the only new token
pub const DEFAULT_CONNECTIVES: &[&str] = &[
    "a", "the", "in", "on", "at", "of", "after", "and", "de", "d'un", "d'une", "la", "le",
];

/// A rejected configuration entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub message: String,
}

impl ConfigIssue {
    fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(%message, "Rejected configuration entry");
        Self { message }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Two single words treated as equal when comparing
///
/// Both spellings compare as `canonical`. Display text keeps whichever
/// spelling the title used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synonym {
    pub variant: String,
    pub canonical: String,
}

/// A pattern rewritten in the title before comparison
#[derive(Debug, Clone)]
pub struct Replacement {
    pub pattern: Regex,
    pub replacement: String,
}

/// Compiled text rules and thresholds consumed by the diff engine
#[derive(Debug, Clone)]
pub struct TextRules {
    pub synonyms: Vec<Synonym>,
    pub replacements: Vec<Replacement>,
    /// Lowercased noise prefixes; a trailing space means "followed by a space"
    pub removewords: Vec<String>,
    pub connectives: Vec<String>,
    pub proximity: usize,
    pub end_proximity: usize,
    pub granularity: usize,
    /// Percentage (0-100) of the residual that may overlap the catalog text
    pub substring_match: u8,
}

impl Default for TextRules {
    fn default() -> Self {
        Self {
            synonyms: Vec::new(),
            replacements: Vec::new(),
            removewords: Vec::new(),
            connectives: DEFAULT_CONNECTIVES.iter().map(|s| s.to_string()).collect(),
            proximity: 2,
            end_proximity: 1,
            granularity: 1,
            substring_match: 66,
        }
    }
}

/// Split `(a, b) / (c, d)` text into raw entries
fn split_entries(text: &str) -> impl Iterator<Item = &str> {
    text.split('/')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
}

fn unquote(item: &str) -> String {
    item.trim()
        .trim_matches(|c| c == '\'' || c == ' ')
        .trim_matches('"')
        .to_string()
}

/// Parse one `(a, b)` entry into its two items
fn parse_pair(entry: &str) -> Option<(String, String)> {
    let inner = entry.trim_matches(|c| c == ' ' || c == '(' || c == ')');
    let items: Vec<&str> = inner.split(',').collect();
    match items.as_slice() {
        [a, b] => Some((unquote(a), unquote(b))),
        _ => None,
    }
}

impl TextRules {
    /// Parse a synonym list, rejecting malformed entries
    pub fn parse_synonyms(text: &str) -> (Vec<Synonym>, Vec<ConfigIssue>) {
        let mut synonyms = Vec::new();
        let mut issues = Vec::new();

        for entry in split_entries(text) {
            let Some((variant, canonical)) = parse_pair(entry) else {
                issues.push(ConfigIssue::new(format!(
                    "Error in synonym format for synonym {entry}"
                )));
                continue;
            };

            let bad: Vec<&String> = [&variant, &canonical]
                .into_iter()
                .filter(|t| t.is_empty() || SYNONYM_PUNCTUATION.is_match(t))
                .collect();
            if !bad.is_empty() {
                for token in bad {
                    issues.push(ConfigIssue::new(format!(
                        "Synonyms must be single words without punctuation - error in '{token}'"
                    )));
                }
                continue;
            }

            synonyms.push(Synonym { variant, canonical });
        }
        (synonyms, issues)
    }

    /// Parse a replacement list; the pattern may be a regular expression
    pub fn parse_replacements(text: &str) -> (Vec<Replacement>, Vec<ConfigIssue>) {
        let mut replacements = Vec::new();
        let mut issues = Vec::new();

        for entry in split_entries(text) {
            let Some((pattern, replacement)) = parse_pair(entry) else {
                issues.push(ConfigIssue::new(format!(
                    "Error in replacement format for replacement {entry}"
                )));
                continue;
            };
            if pattern.is_empty() {
                issues.push(ConfigIssue::new(format!(
                    "Empty pattern in replacement {entry}"
                )));
                continue;
            }

            // Plain words match on word boundaries; anything else is a regex
            let source = if pattern.chars().all(|c| c.is_alphanumeric() || c == ' ') {
                format!(r"\b{}\b", regex::escape(&pattern))
            } else {
                pattern.clone()
            };
            match Regex::new(&source) {
                Ok(pattern) => replacements.push(Replacement {
                    pattern,
                    replacement,
                }),
                Err(e) => issues.push(ConfigIssue::new(format!(
                    "Invalid replacement pattern '{pattern}': {e}"
                ))),
            }
        }
        (replacements, issues)
    }

    /// Parse a comma-separated noise-word list
    pub fn parse_removewords(text: &str) -> Vec<String> {
        text.split(',')
            .map(|w| w.trim_start().to_lowercase())
            .filter(|w| !w.trim().is_empty())
            .collect()
    }

    /// Canonical comparison spelling of a single token, if a synonym covers it
    pub fn canonical_synonym(&self, token: &str) -> Option<&str> {
        let lowered = token.to_lowercase();
        self.synonyms
            .iter()
            .find(|s| s.variant.to_lowercase() == lowered || s.canonical.to_lowercase() == lowered)
            .map(|s| s.canonical.as_str())
    }

    /// Apply every replacement to `text`, in list order
    pub fn apply_replacements(&self, text: &str) -> String {
        self.replacements
            .iter()
            .fold(text.to_string(), |acc, r| {
                r.pattern.replace_all(&acc, r.replacement.as_str()).into_owned()
            })
    }

    pub fn is_connective(&self, word: &str) -> bool {
        let lowered = word.to_lowercase();
        self.connectives.iter().any(|c| *c == lowered)
    }

    /// Remove one leading noise word from `text`, if any matches at a word boundary
    pub fn strip_removeword_prefix(&self, text: &str) -> Option<String> {
        let lowered = text.to_lowercase();
        for word in &self.removewords {
            if word.is_empty() || !lowered.starts_with(word.as_str()) {
                continue;
            }
            // Lowercasing can change byte lengths; only cut on a shared boundary
            if !text.is_char_boundary(word.len()) || text.len() != lowered.len() {
                continue;
            }
            let ends_on_word = word.chars().last().map_or(false, |c| c.is_alphanumeric());
            let next_is_word = text[word.len()..]
                .chars()
                .next()
                .map_or(false, |c| c.is_alphanumeric());
            if ends_on_word && next_is_word {
                continue;
            }
            return Some(text[word.len()..].trim().to_string());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_synonyms() {
        let (synonyms, issues) =
            TextRules::parse_synonyms("(1, one) / (2, two) / (3, three) / (&, and)");
        assert!(issues.is_empty());
        assert_eq!(synonyms.len(), 4);
        assert_eq!(synonyms[3].variant, "&");
        assert_eq!(synonyms[3].canonical, "and");
    }

    #[test]
    fn test_malformed_synonyms_rejected_individually() {
        let (synonyms, issues) =
            TextRules::parse_synonyms("(Aria, Arie) / (a, b, c) / (no., number) / (Sinfonia, Symphony)");
        assert_eq!(synonyms.len(), 2);
        assert_eq!(issues.len(), 2);
        assert!(issues[0].message.contains("format"));
        assert!(issues[1].message.contains("no."));
    }

    #[test]
    fn test_replacements_plain_and_regex() {
        let (replacements, issues) =
            TextRules::parse_replacements("(Sinfonie, Symphony) / (Op\\., Opus) / ([bad, x)");
        assert_eq!(replacements.len(), 2);
        assert_eq!(issues.len(), 1);

        let rules = TextRules {
            replacements,
            ..TextRules::default()
        };
        assert_eq!(rules.apply_replacements("Sinfonie Op. 9"), "Symphony Opus 9");
        // Word boundaries protect longer words
        assert_eq!(rules.apply_replacements("Sinfonien"), "Sinfonien");
    }

    #[test]
    fn test_canonical_synonym_is_symmetric() {
        let (synonyms, _) = TextRules::parse_synonyms("(Aria, Arie)");
        let rules = TextRules {
            synonyms,
            ..TextRules::default()
        };
        assert_eq!(rules.canonical_synonym("aria"), Some("Arie"));
        assert_eq!(rules.canonical_synonym("Arie"), Some("Arie"));
        assert_eq!(rules.canonical_synonym("Allegro"), None);
    }

    #[test]
    fn test_removeword_prefix_needs_word_boundary() {
        let rules = TextRules {
            removewords: TextRules::parse_removewords("part, no., the "),
            ..TextRules::default()
        };
        assert_eq!(rules.strip_removeword_prefix("Part 2"), Some("2".to_string()));
        assert_eq!(rules.strip_removeword_prefix("No. 5"), Some("5".to_string()));
        assert_eq!(rules.strip_removeword_prefix("Partita"), None);
        assert_eq!(rules.strip_removeword_prefix("Theme"), None);
    }
}
