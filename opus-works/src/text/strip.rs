//! Fuzzy removal of a parent work's name from a child's name

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Mutex;
use tracing::debug;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W").expect("static regex"));

/// Upper bound on cached parent patterns; the cache is cleared when reached
const PATTERN_CACHE_LIMIT: usize = 4096;

/// Compiled parent patterns by (parent, mode); `None` records a failed compile
static PATTERNS: Lazy<Mutex<HashMap<(String, StripMode), Option<Regex>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// How much of the text after the parent name is consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StripMode {
    /// Parent name plus following separator; used for work/part relationships
    Extend,
    /// Parent name plus at most one following non-word character
    Plain,
}

/// Location of a parent name inside a work name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentMatch {
    /// Text before the parent name
    pub lead: Range<usize>,
    /// The matched parent name
    pub parent: Range<usize>,
    /// Separator after the parent name (empty in plain mode)
    pub separator: Range<usize>,
    /// Remaining text
    pub rest: Range<usize>,
}

impl ParentMatch {
    /// The work name with the parent cut out; "..." marks a non-prefix cut
    pub fn stripped(&self, work: &str) -> String {
        if self.lead.is_empty() {
            work[self.rest.clone()].to_string()
        } else {
            format!("{}...{}", &work[self.lead.clone()], &work[self.rest.clone()])
        }
    }

    pub fn separator_text<'a>(&self, work: &'a str) -> &'a str {
        &work[self.separator.clone()]
    }
}

/// Build the fuzzy pattern: punctuation and spacing in `parent` become gaps
/// of up to two non-word characters
fn parent_pattern(parent: &str) -> Option<String> {
    let cleaned = NON_WORD.replace_all(parent, " ");
    if cleaned.trim().is_empty() {
        return None;
    }
    let mut pattern = String::with_capacity(cleaned.len() * 2);
    for c in cleaned.chars() {
        if c.is_whitespace() {
            pattern.push_str(r"\W{0,2}");
        } else {
            pattern.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4])));
        }
    }
    Some(pattern)
}

fn compile_parent(parent: &str, mode: StripMode) -> Option<Regex> {
    let core = parent_pattern(parent)?;
    let source = match mode {
        StripMode::Extend => format!(r"(.*\s|^)(\W*{core}\w*)(\W*\s)(.*)"),
        StripMode::Plain => format!(r"(.*\s|^)(\W*{core}\w*\W?)(.*)"),
    };
    match RegexBuilder::new(&source).case_insensitive(true).build() {
        Ok(re) => Some(re),
        Err(e) => {
            debug!(parent, error = %e, "Parent pattern did not compile");
            None
        }
    }
}

/// Compiled pattern for `parent`, built once per (parent, mode)
fn parent_regex(parent: &str, mode: StripMode) -> Option<Regex> {
    let key = (parent.to_string(), mode);
    {
        let patterns = PATTERNS.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(cached) = patterns.get(&key) {
            return cached.clone();
        }
    }
    let compiled = compile_parent(parent, mode);
    let mut patterns = PATTERNS.lock().unwrap_or_else(|p| p.into_inner());
    if patterns.len() >= PATTERN_CACHE_LIMIT {
        patterns.clear();
    }
    patterns.insert(key, compiled.clone());
    compiled
}

/// Find `parent` inside `work`, tolerating punctuation and spacing differences
///
/// Matching is case-insensitive and prefers the last occurrence.
pub fn find_parent(work: &str, parent: &str, mode: StripMode) -> Option<ParentMatch> {
    let re = parent_regex(parent, mode)?;
    let caps = re.captures(work)?;
    let range = |i: usize| caps.get(i).map(|m| m.range());
    let lead = range(1).unwrap_or(0..0);
    let parent = range(2)?;
    let (separator, rest) = match mode {
        StripMode::Extend => (range(3)?, range(4)?),
        StripMode::Plain => (parent.end..parent.end, range(3)?),
    };
    Some(ParentMatch {
        lead,
        parent,
        separator,
        rest,
    })
}

/// Strip `parent` from `work`, or `None` if it does not occur
pub fn strip_parent(work: &str, parent: &str, mode: StripMode) -> Option<String> {
    find_parent(work, parent, mode).map(|m| m.stripped(work))
}
