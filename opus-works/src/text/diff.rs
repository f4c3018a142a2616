//! Residual text a title adds beyond a catalog name
//!
//! The steps run in this order:
//! 1. Strip leading numbering and noise words from both sides.
//! 2. Apply replacements.
//! 3. Compare with roman numerals and synonyms canonicalised.
//! 4. Give up early if the title is wholly contained in the catalog text.
//! 5. Try to cut the catalog text out of the title directly.
//! 6. Otherwise mark each title word as novel or not and close short gaps
//!    between novel words.
//! 7. Reassemble the novel runs from the original display text.
//!
//! An empty result means the title adds nothing.

use super::boil::boil;
use super::lcs::longest_common_substring;
use super::roman::strip_numbering_once;
use super::rules::TextRules;
use super::strip::{find_parent, strip_parent, ParentMatch, StripMode};
use super::tokens::TokenizedText;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

/// Clause separators used when the catalog text is split for granular stripping
static CLAUSE_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r";\s|:\s|\.\s|-\s").expect("static regex"));

/// Leading passes of numbering/noise removal (nested numbering is common)
const PREFIX_PASSES: usize = 5;

const TITLE_EDGE: &[char] = &[' ', ':', ';', '-', '.', ','];
const RESIDUAL_EDGE: &[char] = &['!', '&', '.', '-', ':', ';', ',', ' '];
const OPENERS: &[char] = &['(', '[', '{', '"', '\''];
const CLOSERS: &[char] = &[')', ']', '}', '"', '\''];
const BRACKET_PAIRS: &[(char, char)] = &[('(', ')'), ('[', ']'), ('{', '}')];

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Strip a quote character that appears exactly once
fn strip_lone_quotes(s: &str) -> String {
    let mut out = s.to_string();
    for quote in ['"', '\''] {
        if out.matches(quote).count() == 1 {
            out = out.trim_matches(quote).to_string();
        }
    }
    out
}

/// Remove edge punctuation, lone quotes and unbalanced or enclosing brackets
fn tidy(s: &str) -> String {
    let mut out = strip_lone_quotes(s.trim_matches(RESIDUAL_EDGE));

    for (open, close) in BRACKET_PAIRS {
        let has_open = out.contains(*open);
        let has_close = out.contains(*close);
        if has_open && !has_close {
            out = out.replace(*open, "");
        } else if has_close && !has_open {
            out = out.replace(*close, "");
        }
    }

    for (open, close) in BRACKET_PAIRS {
        if out.starts_with(*open) && out.ends_with(*close) {
            out = out
                .trim_start_matches(*open)
                .trim_end_matches(*close)
                .to_string();
        }
    }
    out.trim().to_string()
}

/// Split catalog text into clauses, at most `granularity` splits (0 = unlimited)
fn split_clauses(text: &str, granularity: usize) -> Vec<&str> {
    if granularity == 0 {
        CLAUSE_SEPARATOR.split(text).collect()
    } else {
        CLAUSE_SEPARATOR.splitn(text, granularity + 1).collect()
    }
}

/// Computes the residual of a title relative to catalog text
#[derive(Debug, Clone, Copy)]
pub struct TitleDiffer<'a> {
    rules: &'a TextRules,
}

impl<'a> TitleDiffer<'a> {
    pub fn new(rules: &'a TextRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &TextRules {
        self.rules
    }

    /// Text in `title` not already present in `catalog`; empty if none
    pub fn diff(&self, catalog: &str, title: &str) -> String {
        let mut mb = catalog.trim().to_string();
        let mut ti = strip_lone_quotes(title.trim_matches(TITLE_EDGE));
        if mb.is_empty() || ti.is_empty() {
            return String::new();
        }

        for _ in 0..PREFIX_PASSES {
            mb = self.strip_prefixes(&mb);
            ti = self.strip_prefixes(&ti);
        }

        let ti = self.rules.apply_replacements(&ti);
        let title_tokens = TokenizedText::new(&ti, self.rules);
        let catalog_tokens = TokenizedText::new(&mb, self.rules);

        let boiled_ti = boil(&title_tokens.compare);
        let boiled_mb = boil(&catalog_tokens.compare);
        let common = longest_common_substring(&boiled_mb, &boiled_ti);
        if char_len(&common) >= char_len(&boiled_ti) {
            trace!(catalog, title, "Title contained in catalog text");
            return String::new();
        }

        if !boiled_mb.is_empty() {
            if let Some(m) = find_parent(&title_tokens.compare, &catalog_tokens.compare, StripMode::Plain) {
                let residual = cut_display(&title_tokens, &m);
                trace!(catalog, title, %residual, "Catalog text cut from title");
                return tidy(&residual);
            }

            let mut remaining = title_tokens.compare.clone();
            for clause in split_clauses(&catalog_tokens.compare, self.rules.granularity) {
                if let Some(stripped) = strip_parent(&remaining, clause, StripMode::Plain) {
                    remaining = stripped;
                }
            }
            if remaining.trim().is_empty() {
                return String::new();
            }
        }

        let catalog_words: Vec<String> = catalog_tokens
            .tokens
            .iter()
            .map(|t| boil(&t.compare))
            .collect();
        let novel = self.novel_tokens(&title_tokens, &catalog_words);
        if !novel.iter().any(|n| *n) {
            return String::new();
        }

        let residual = reassemble(&title_tokens, &novel);
        if residual.is_empty() || self.too_similar(&mb, &residual) {
            return String::new();
        }

        let residual = collapse_repeats(&residual, catalog_words.last().map(String::as_str));
        let residual = tidy(&residual);
        trace!(catalog, title, %residual, "Diff computed");
        residual
    }

    fn strip_prefixes(&self, s: &str) -> String {
        let mut out = strip_numbering_once(s);
        if let Some(rest) = self.rules.strip_removeword_prefix(&out) {
            out = rest;
        }
        out.trim().to_string()
    }

    /// Mark novel title tokens, then apply singleton demotion and gap filling
    fn novel_tokens(&self, title: &TokenizedText, catalog_words: &[String]) -> Vec<bool> {
        let mut novel: Vec<bool> = title
            .tokens
            .iter()
            .map(|t| !catalog_words.contains(&boil(&t.compare)))
            .collect();
        let n = novel.len();

        let positions: Vec<usize> = (0..n).filter(|&i| novel[i]).collect();
        if let [only] = positions.as_slice() {
            let interior = *only > 0 && *only + 1 < n;
            if interior && self.rules.is_connective(&title.tokens[*only].text) {
                novel[*only] = false;
                return novel;
            }
        }

        for pair in positions.windows(2) {
            let (left, right) = (pair[0], pair[1]);
            let gap = right - left - 1;
            if gap == 0 {
                continue;
            }
            let threshold = if right + 1 == n {
                self.rules.end_proximity
            } else {
                self.rules.proximity
            };
            if gap < threshold {
                novel[left + 1..right].iter_mut().for_each(|flag| *flag = true);
            }
        }
        novel
    }

    /// Final guard: a residual mostly overlapping the catalog text adds nothing
    fn too_similar(&self, catalog: &str, residual: &str) -> bool {
        let boiled = boil(residual);
        let limit = char_len(&boiled) as f64 * f64::from(self.rules.substring_match.min(100)) / 100.0;
        let common = longest_common_substring(&boil(catalog), &boiled);
        char_len(&common) as f64 >= limit
    }
}

/// Cut a match found on comparison text out of the display text
fn cut_display(title: &TokenizedText, m: &ParentMatch) -> String {
    let rest_start = title.display_offset(m.rest.start);
    let rest = &title.display[rest_start..];
    if m.lead.is_empty() {
        rest.trim().to_string()
    } else {
        let lead_end = title.display_offset(m.lead.end);
        format!("{}...{}", &title.display[..lead_end], rest).trim().to_string()
    }
}

/// Join runs of novel tokens from the display text, separated by " ... "
fn reassemble(title: &TokenizedText, novel: &[bool]) -> String {
    let mut runs: Vec<String> = Vec::new();
    let mut i = 0;
    while i < novel.len() {
        if !novel[i] {
            i += 1;
            continue;
        }
        let first = i;
        while i + 1 < novel.len() && novel[i + 1] {
            i += 1;
        }
        let last = i;

        let mut start = title.tokens[first].span.start;
        if let Some(opener) = title.separator_before(first).chars().last() {
            if OPENERS.contains(&opener) {
                start -= opener.len_utf8();
            }
        }
        let mut end = title.tokens[last].span.end;
        if let Some(closer) = title.separator_after(last).chars().next() {
            if CLOSERS.contains(&closer) {
                end += closer.len_utf8();
            }
        }
        runs.push(title.display[start..end].to_string());
        i += 1;
    }
    runs.join(" ... ")
}

/// Drop immediately repeated words and a leading word equal to the catalog's last word
fn collapse_repeats(residual: &str, catalog_last: Option<&str>) -> String {
    let mut words: Vec<&str> = Vec::new();
    for word in residual.split(' ') {
        if let Some(prev) = words.last() {
            let boiled = boil(word);
            if word != "..." && !boiled.is_empty() && boiled == boil(prev) {
                continue;
            }
        }
        words.push(word);
    }

    if let (Some(first), Some(last)) = (words.first(), catalog_last) {
        if words.len() > 1 && !last.is_empty() && boil(first) == last {
            words.remove(0);
        }
    }
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> TextRules {
        let (synonyms, _) = TextRules::parse_synonyms("(1, one) / (2, two) / (3, three) / (&, and)");
        TextRules {
            synonyms,
            removewords: TextRules::parse_removewords(
                "part, act, scene, movement, movt, no., no , n., n , nr., nr , book , the , a , la , le , un , une , el , il , (part), tableau, from ",
            ),
            ..TextRules::default()
        }
    }

    fn diff(catalog: &str, title: &str) -> String {
        let rules = rules();
        TitleDiffer::new(&rules).diff(catalog, title)
    }

    #[test]
    fn test_identical_text_has_no_residual() {
        for x in ["Allegro", "Symphony No. 5 in C minor", "Ich habe genug: Recitativo", "II. Adagio"] {
            assert_eq!(diff(x, x), "", "{x}");
        }
    }

    #[test]
    fn test_substring_guard() {
        assert_eq!(diff("Symphony No. 5 in C minor", "symphony no 5"), "");
    }

    #[test]
    fn test_roman_and_arabic_numbers_are_equal() {
        assert_eq!(diff("Sonata No. IV", "Sonata No. 4"), "");
    }

    #[test]
    fn test_synonym_equivalence() {
        let (synonyms, issues) = TextRules::parse_synonyms("(Aria, Arie)");
        assert!(issues.is_empty());
        let rules = TextRules {
            synonyms,
            ..TextRules::default()
        };
        let differ = TitleDiffer::new(&rules);
        assert_eq!(differ.diff("Arie", "Aria"), "");
        assert_eq!(differ.diff("Arie", "Allegro"), "Allegro");
    }

    #[test]
    fn test_interior_word_retained() {
        assert_eq!(diff("Allegro vivace", "Allegro molto vivace"), "molto");
    }

    #[test]
    fn test_catalog_prefix_cut_from_title() {
        assert_eq!(diff("II. Adagio", "Adagio molto e cantabile"), "molto e cantabile");
    }

    #[test]
    fn test_gap_filled_between_novel_words() {
        // A single known word between novel words is kept with them
        assert_eq!(
            diff("Concerto Grosso", "Largo Concerto e allegro"),
            "Largo Concerto e allegro"
        );
    }

    #[test]
    fn test_connective_singleton_is_noise() {
        assert_eq!(diff("Prelude Fugue", "Prelude and Fugue"), "");
    }

    #[test]
    fn test_separate_runs_joined_with_ellipsis() {
        assert_eq!(
            diff("Kyrie eleison Christe", "Kyrie solemn eleison grand Christe finale"),
            "solemn eleison grand ... finale"
        );
    }

    #[test]
    fn test_tidy_unbalanced_brackets() {
        assert_eq!(tidy("(con moto"), "con moto");
        assert_eq!(tidy("[attacca]"), "attacca");
        assert_eq!(tidy("- Presto -"), "Presto");
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(diff("", "Allegro"), "");
        assert_eq!(diff("Allegro", " - "), "");
    }

    #[test]
    fn test_collapse_repeats() {
        assert_eq!(collapse_repeats("Presto presto finale", None), "Presto finale");
        assert_eq!(collapse_repeats("vivace con brio", Some("vivace")), "con brio");
    }
}
