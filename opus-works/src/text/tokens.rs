//! Word tokens with display and comparison forms
//!
//! A title is split into word tokens (plus standalone `&`). Each token keeps
//! its display text and a comparison form with roman numerals converted and
//! synonyms canonicalised. The comparison text is the display text with
//! every token swapped for its comparison form, and offsets can be mapped
//! back so that matches found on comparison text cut the display text.

use super::roman::from_roman;
use super::rules::TextRules;
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub compare: String,
    /// Byte span in the display text
    pub span: Range<usize>,
    /// Byte span in the comparison text
    pub compare_span: Range<usize>,
}

#[derive(Debug, Clone)]
pub struct TokenizedText {
    pub display: String,
    pub compare: String,
    pub tokens: Vec<Token>,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Byte spans of word runs and standalone ampersands
pub fn word_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;

    for (i, c) in text.char_indices() {
        if is_word_char(c) {
            start.get_or_insert(i);
            continue;
        }
        if let Some(s) = start.take() {
            spans.push(s..i);
        }
        if c == '&' {
            spans.push(i..i + c.len_utf8());
        }
    }
    if let Some(s) = start {
        spans.push(s..text.len());
    }
    spans
}

impl TokenizedText {
    pub fn new(display: &str, rules: &TextRules) -> Self {
        let spans = word_spans(display);
        let mut compare = String::with_capacity(display.len());
        let mut tokens = Vec::with_capacity(spans.len());
        let mut cursor = 0;

        for span in spans {
            compare.push_str(&display[cursor..span.start]);
            let text = &display[span.clone()];
            let form = comparison_form(text, &display[span.end..], rules);
            let compare_start = compare.len();
            compare.push_str(&form);
            tokens.push(Token {
                text: text.to_string(),
                compare: form,
                compare_span: compare_start..compare.len(),
                span: span.clone(),
            });
            cursor = span.end;
        }
        compare.push_str(&display[cursor..]);

        Self {
            display: display.to_string(),
            compare,
            tokens,
        }
    }

    /// Map a byte offset in the comparison text to the display text
    ///
    /// Offsets inside a token snap to its end, except its first byte.
    pub fn display_offset(&self, offset: usize) -> usize {
        let mut prev_compare_end = 0;
        let mut prev_display_end = 0;
        for token in &self.tokens {
            if offset < token.compare_span.start {
                return (prev_display_end + (offset - prev_compare_end)).min(token.span.start);
            }
            if offset == token.compare_span.start {
                return token.span.start;
            }
            if offset <= token.compare_span.end {
                return token.span.end;
            }
            prev_compare_end = token.compare_span.end;
            prev_display_end = token.span.end;
        }
        (prev_display_end + (offset - prev_compare_end)).min(self.display.len())
    }

    /// Display text between token `index` and the next token (or the end)
    pub fn separator_after(&self, index: usize) -> &str {
        let start = self.tokens[index].span.end;
        let end = self
            .tokens
            .get(index + 1)
            .map_or(self.display.len(), |t| t.span.start);
        &self.display[start..end]
    }

    /// Display text between the previous token (or the start) and token `index`
    pub fn separator_before(&self, index: usize) -> &str {
        let start = if index == 0 {
            0
        } else {
            self.tokens[index - 1].span.end
        };
        &self.display[start..self.tokens[index].span.start]
    }
}

/// Roman numeral followed by `. : , ;` or end becomes digits; synonyms canonicalise
fn comparison_form(token: &str, following: &str, rules: &TextRules) -> String {
    let numeral_position = following
        .chars()
        .next()
        .map_or(true, |c| matches!(c, '.' | ':' | ',' | ';'));
    let base = match from_roman(token) {
        Some(value) if numeral_position => value.to_string(),
        _ => token.to_string(),
    };
    match rules.canonical_synonym(&base) {
        Some(canonical) => canonical.to_string(),
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::rules::Synonym;

    fn rules() -> TextRules {
        TextRules {
            synonyms: vec![
                Synonym {
                    variant: "&".to_string(),
                    canonical: "and".to_string(),
                },
                Synonym {
                    variant: "Aria".to_string(),
                    canonical: "Arie".to_string(),
                },
            ],
            ..TextRules::default()
        }
    }

    #[test]
    fn test_word_spans() {
        let text = "Prelude & Fugue, BWV 846";
        let words: Vec<&str> = word_spans(text).into_iter().map(|r| &text[r]).collect();
        assert_eq!(words, vec!["Prelude", "&", "Fugue", "BWV", "846"]);
    }

    #[test]
    fn test_comparison_forms() {
        let t = TokenizedText::new("Aria & Book IV: Sarabande", &rules());
        assert_eq!(t.compare, "Arie and Book 4: Sarabande");
        assert_eq!(t.tokens[0].text, "Aria");
        assert_eq!(t.tokens[0].compare, "Arie");
    }

    #[test]
    fn test_numeral_needs_punctuation_or_end() {
        let t = TokenizedText::new("I love Act II", &rules());
        assert_eq!(t.compare, "I love Act 2");
    }

    #[test]
    fn test_display_offset_mapping() {
        let t = TokenizedText::new("Aria & Allegro", &rules());
        // "Arie and " is 9 bytes of comparison text; display "Aria & " is 7
        let compare_start = t.compare.find("Allegro").unwrap();
        assert_eq!(compare_start, 9);
        assert_eq!(t.display_offset(compare_start), 7);
        assert_eq!(&t.display[t.display_offset(compare_start)..], "Allegro");
        assert_eq!(t.display_offset(t.compare.len()), t.display.len());
    }

    #[test]
    fn test_separators() {
        let t = TokenizedText::new("(Andante) con moto", &rules());
        assert_eq!(t.separator_before(0), "(");
        assert_eq!(t.separator_after(0), ") ");
        assert_eq!(t.separator_after(2), "");
    }
}
