//! Longest common substring and same-offset common sequence

use std::collections::HashMap;
use std::ops::Range;

/// Inputs whose averaged squared length crosses this use the suffix automaton
const AUTOMATON_THRESHOLD: usize = 1000;

/// Longest common substring of `s1` and `s2`, by characters
///
/// Ties resolve to the run that ends earliest in `s1`. Both the quadratic
/// table and the automaton path honor that rule, so they agree on every input.
pub fn longest_common_substring(s1: &str, s2: &str) -> String {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();
    if a.is_empty() || b.is_empty() {
        return String::new();
    }

    let total = a.len() + b.len();
    let range = if (total / 2).pow(2) * 2 > AUTOMATON_THRESHOLD {
        lcs_automaton(&a, &b)
    } else {
        lcs_table(&a, &b)
    };
    a[range].iter().collect()
}

/// Classic dynamic-programming table, one row at a time
fn lcs_table(a: &[char], b: &[char]) -> Range<usize> {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    let (mut longest, mut end) = (0usize, 0usize);

    for x in 1..=a.len() {
        for y in 1..=b.len() {
            if a[x - 1] == b[y - 1] {
                curr[y] = prev[y - 1] + 1;
                if curr[y] > longest {
                    longest = curr[y];
                    end = x;
                }
            } else {
                curr[y] = 0;
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    end - longest..end
}

struct State {
    len: usize,
    link: Option<usize>,
    next: HashMap<char, usize>,
}

/// Suffix automaton over `b`, scanned with `a`
///
/// Tracks the longest suffix of `a[..x]` that occurs in `b`, which yields the
/// same earliest-ending maximum as the table.
fn lcs_automaton(a: &[char], b: &[char]) -> Range<usize> {
    let mut states = vec![State {
        len: 0,
        link: None,
        next: HashMap::new(),
    }];
    let mut last = 0usize;

    for &c in b {
        let cur = states.len();
        states.push(State {
            len: states[last].len + 1,
            link: None,
            next: HashMap::new(),
        });
        let mut p = Some(last);
        while let Some(pi) = p {
            if states[pi].next.contains_key(&c) {
                break;
            }
            states[pi].next.insert(c, cur);
            p = states[pi].link;
        }
        match p {
            None => states[cur].link = Some(0),
            Some(pi) => {
                let q = states[pi].next[&c];
                if states[pi].len + 1 == states[q].len {
                    states[cur].link = Some(q);
                } else {
                    let clone = states.len();
                    states.push(State {
                        len: states[pi].len + 1,
                        link: states[q].link,
                        next: states[q].next.clone(),
                    });
                    let mut pp = Some(pi);
                    while let Some(ppi) = pp {
                        if states[ppi].next.get(&c) != Some(&q) {
                            break;
                        }
                        states[ppi].next.insert(c, clone);
                        pp = states[ppi].link;
                    }
                    states[q].link = Some(clone);
                    states[cur].link = Some(clone);
                }
            }
        }
        last = cur;
    }

    let (mut state, mut matched) = (0usize, 0usize);
    let (mut longest, mut end) = (0usize, 0usize);
    for (x, c) in a.iter().enumerate() {
        loop {
            if let Some(&next) = states[state].next.get(c) {
                state = next;
                matched += 1;
                break;
            }
            match states[state].link {
                Some(link) => {
                    state = link;
                    matched = states[state].len;
                }
                None => {
                    matched = 0;
                    break;
                }
            }
        }
        if matched > longest {
            longest = matched;
            end = x + 1;
        }
    }
    end - longest..end
}

/// Longest run that starts at the same index in both sequences
///
/// Start offsets from `min_start` to `max_start` (inclusive) are tried. When
/// they are equal the start is fixed, which makes this a common-prefix test
/// at that offset. Returns `None` when no run of length one or more exists.
pub fn longest_common_sequence<T: PartialEq>(
    list1: &[T],
    list2: &[T],
    min_start: usize,
    max_start: usize,
) -> Option<Range<usize>> {
    if max_start < min_start {
        return None;
    }
    let min_len = list1.len().min(list2.len());
    let last_start = max_start.min(min_len);

    let mut best: Option<Range<usize>> = None;
    for k in min_start..=last_start {
        let run = (k..min_len).take_while(|&i| list1[i] == list2[i]).count();
        let longest = best.as_ref().map_or(0, |r| r.len());
        if run > longest {
            best = Some(k..k + run);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lcs_basic() {
        assert_eq!(longest_common_substring("symphonyno5", "symphonyno5incminor"), "symphonyno5");
        assert_eq!(longest_common_substring("abcdef", "zcdez"), "cde");
        assert_eq!(longest_common_substring("abc", "xyz"), "");
        assert_eq!(longest_common_substring("", "xyz"), "");
    }

    #[test]
    fn test_lcs_tie_prefers_earliest_end() {
        assert_eq!(longest_common_substring("abxcd", "cdab"), "ab");
    }

    #[test]
    fn test_table_and_automaton_agree() {
        let pairs = [
            ("abxcd", "cdab"),
            ("allegromoltovivace", "allegrovivace"),
            ("mississippi", "sissy"),
            ("aaaa", "aa"),
            ("concertoforpianoandorchestrano2", "pianoconcertono2inbflat"),
        ];
        for (s1, s2) in pairs {
            let a: Vec<char> = s1.chars().collect();
            let b: Vec<char> = s2.chars().collect();
            assert_eq!(lcs_table(&a, &b), lcs_automaton(&a, &b), "{s1} / {s2}");
        }
    }

    #[test]
    fn test_long_inputs_use_automaton_consistently() {
        let s1 = "symphonie fantastique episode de la vie d'un artiste ".repeat(4);
        let s2 = "la vie d'un artiste en cinq parties, reverie passions".repeat(3);
        let a: Vec<char> = s1.chars().collect();
        let b: Vec<char> = s2.chars().collect();
        let expected: String = a[lcs_table(&a, &b)].iter().collect();
        assert_eq!(longest_common_substring(&s1, &s2), expected);
    }

    #[test]
    fn test_common_sequence_fixed_start() {
        let a = ["Symphony", "No.", "9:", "I."];
        let b = ["Symphony", "No.", "9:", "II."];
        assert_eq!(longest_common_sequence(&a, &b, 0, 0), Some(0..3));

        let c = ["Adagio"];
        assert_eq!(longest_common_sequence(&a, &c, 0, 0), None);
    }

    #[test]
    fn test_common_sequence_window() {
        let a = ["x", "b", "c", "d"];
        let b = ["y", "b", "c", "z"];
        assert_eq!(longest_common_sequence(&a, &b, 0, 0), None);
        assert_eq!(longest_common_sequence(&a, &b, 0, 3), Some(1..3));
        assert_eq!(longest_common_sequence(&a, &b, 2, 1), None);
    }
}
