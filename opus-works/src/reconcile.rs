//! Title reconciliation
//!
//! Turns catalog work names into per-level part names (the parent's name
//! stripped from the child's) and enriches them with whatever the track's
//! literal title adds, producing the groupheading and extended part.

use crate::config::{Level0Source, WorksConfig};
use crate::error::{IssueKind, TrackIssue};
use crate::hierarchy::ReleaseView;
use crate::publish::TrackWorks;
use crate::text::{find_parent, longest_common_sequence, StripMode, TextRules, TitleDiffer};
use crate::types::WorkKey;
use tracing::trace;

/// Characters trimmed between a work name and its part
pub(crate) const NAME_SEPARATORS: &[char] = &[':', ',', '.', ';', '-', ' '];

/// Guard for the grandparent recursion in [`TitleReconciler::strip_parent_from_work`]
const MAX_ANCESTOR_HOPS: usize = 16;

/// Shape of the top-level work a track sits under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopInfo {
    pub key: WorkKey,
    pub name: String,
    /// Depth of the top-level node
    pub levels: usize,
    pub single: bool,
}

fn braced(diff: &str) -> String {
    if diff.is_empty() {
        String::new()
    } else {
        format!(" {{{diff}}}")
    }
}

/// Join parts from level `from` down to level 1 as "part_n: ...: part_1"
fn inter_parts(parts: &[String], suffixes: Option<&[String]>, upto: usize) -> String {
    (1..upto)
        .rev()
        .map(|r| {
            let part = parts.get(r).map(String::as_str).unwrap_or("");
            let suffix = suffixes
                .and_then(|s| s.get(r - 1))
                .map(String::as_str)
                .unwrap_or("");
            format!("{part}{suffix}")
        })
        .collect::<Vec<_>>()
        .join(": ")
}

pub struct TitleReconciler<'a> {
    config: &'a WorksConfig,
    differ: TitleDiffer<'a>,
}

impl<'a> TitleReconciler<'a> {
    pub fn new(config: &'a WorksConfig, rules: &'a TextRules) -> Self {
        Self {
            config,
            differ: TitleDiffer::new(rules),
        }
    }

    pub fn differ(&self) -> &TitleDiffer<'a> {
        &self.differ
    }

    pub fn rules(&self) -> &TextRules {
        self.differ.rules()
    }

    /// Remove `parent` from `work`
    ///
    /// Returns the stripped work name and the full parent name, which may be
    /// longer than `parent` when the work name carries a fuller "work: part"
    /// prefix. With `extend` and a `parent_key`, an unmatched parent is
    /// retried with each further ancestor's name before falling back to the
    /// longest common leading word run.
    pub fn strip_parent_from_work(
        &self,
        view: &ReleaseView<'_>,
        work: &str,
        parent: &str,
        part_level: usize,
        extend: bool,
        parent_key: Option<&WorkKey>,
    ) -> (String, String) {
        let mode = if extend { StripMode::Extend } else { StripMode::Plain };
        if let Some(m) = find_parent(work, parent, mode) {
            let mut stripped = m.stripped(work);
            let mut full_parent = parent.to_string();
            if extend && m.separator_text(work) != ": " && work.matches(": ").count() >= part_level {
                if let Some((head, tail)) = work.split_once(": ") {
                    if head.len() < parent.len() {
                        stripped = work[m.rest.clone()].to_string();
                    } else {
                        stripped = tail.to_string();
                        full_parent = head.to_string();
                    }
                }
            }
            return (stripped, full_parent);
        }

        if extend {
            let mut ancestor = parent_key.and_then(|k| view.parent(k));
            let mut hops = 0;
            while let Some(key) = ancestor {
                if hops >= MAX_ANCESTOR_HOPS {
                    break;
                }
                let name = view.name(&key);
                if let Some(m) = find_parent(work, &name, StripMode::Extend) {
                    trace!(work, ancestor = %name, "Stripped ancestor name instead of parent");
                    return (m.stripped(work), parent.to_string());
                }
                ancestor = view.parent(&key);
                hops += 1;
            }
        }

        (strip_common_lead(work, parent), parent.to_string())
    }

    /// Record `parent_key` at `part_level` and the stripped child name below it
    pub fn set_metadata(
        &self,
        view: &mut ReleaseView<'_>,
        tw: &mut TrackWorks,
        part_level: usize,
        work_key: &WorkKey,
        parent_key: &WorkKey,
    ) {
        let parent = view.name(parent_key);
        tw.work_ids.insert(part_level, parent_key.clone());
        tw.hierarchy.works.insert(part_level, parent.clone());

        let node = view.node(work_key).unwrap_or_default();
        let mut names = view.names(work_key);
        if names.is_empty() {
            names.push(tw.title.clone());
        }

        let mut stripped = Vec::with_capacity(names.len());
        for work in &names {
            let (part, full_parent) = if node.arrangement || node.partial {
                (self.differ.diff(&parent, work), parent.clone())
            } else {
                self.strip_parent_from_work(view, work, &parent, part_level, true, Some(parent_key))
            };
            stripped.push(part);
            if full_parent != parent {
                let full_parent = full_parent.trim().to_string();
                tw.hierarchy.works.insert(part_level, full_parent.clone());
                if view.parent(parent_key).is_none() {
                    tw.work_top = Some(full_parent.clone());
                }
                view.set_name(parent_key, full_parent);
            }
        }
        tw.hierarchy
            .parts
            .insert(part_level - 1, stripped.join("; "));
    }

    /// Split a title into (work, movement) on ": " when the track is a movement
    pub fn derive_from_title(&self, tw: &TrackWorks, title: &str) -> (String, String) {
        if tw.work_part_levels == 0 || !title.contains(':') {
            return (String::new(), title.to_string());
        }
        let colons = title.matches(':').count();
        let split = if tw.part_levels >= colons {
            title.rsplit_once(": ")
        } else {
            title.split_once(": ")
        };
        match split {
            Some((work, movement)) => (work.to_string(), movement.to_string()),
            None => (String::new(), title.to_string()),
        }
    }

    /// Build groupheadings and extended names from the level names
    pub fn extend_metadata(
        &self,
        view: &ReleaseView<'_>,
        tw: &mut TrackWorks,
        ref_height: usize,
    ) {
        let config = self.config;
        let part_levels = tw.part_levels;
        let ref_level = part_levels.saturating_sub(ref_height);
        let title_depth = tw.title_work_levels;
        let use_level0 = config.level0_source == Level0Source::LevelZero;
        let vanilla_part = tw.hierarchy.part(0).unwrap_or_default().to_string();
        let bottom = tw.work_ids.get(&0).and_then(|k| view.node(k)).unwrap_or_default();

        let arrangements_text = config.arrangements_text.trim();
        if config.arrangements && !arrangements_text.is_empty() {
            for level in 0..ref_level {
                let arranged = tw
                    .work_ids
                    .get(&level)
                    .and_then(|k| view.node(k))
                    .is_some_and(|n| n.arrangement);
                if !arranged {
                    continue;
                }
                tw.arrangement = true;
                let mut targets = vec![&mut tw.hierarchy];
                if use_level0 && tw.level0.works.contains_key(&level) {
                    targets.push(&mut tw.level0);
                }
                for names in targets {
                    for map in [&mut names.works, &mut names.parts] {
                        if let Some(name) = map.get_mut(&level) {
                            *name = format!("{arrangements_text} {name}");
                        }
                    }
                }
            }
        }

        let partial_text = config.partial_text.trim();
        if config.partial && !partial_text.is_empty() && bottom.partial {
            tw.partial = true;
            let mut targets = vec![&mut tw.hierarchy];
            if use_level0 && tw.level0.works.contains_key(&0) {
                targets.push(&mut tw.level0);
            }
            for names in targets {
                for map in [&mut names.works, &mut names.parts] {
                    if let Some(name) = map.get_mut(&0) {
                        *name = name
                            .split("; ")
                            .map(|n| format!("{partial_text} {n}"))
                            .collect::<Vec<_>>()
                            .join("; ");
                    }
                }
            }
        }

        if config.medley {
            for level in 0..=ref_level {
                let members = tw
                    .work_ids
                    .get(&level)
                    .and_then(|k| view.node(k))
                    .map(|n| n.medley_members)
                    .unwrap_or_default();
                if members.is_empty() {
                    continue;
                }
                tw.medley = true;
                if let Some(name) = tw.hierarchy.works.get_mut(&level) {
                    name.push_str(&format!(" ({} {})", config.medley_text.trim(), members.join(", ")));
                }
            }
        }

        let mut part: Vec<String> = (0..part_levels)
            .map(|l| tw.hierarchy.part(l).unwrap_or_default().to_string())
            .collect();
        let mut work: Vec<String> = (0..=part_levels)
            .map(|l| tw.hierarchy.work(l).unwrap_or_default().to_string())
            .collect();

        if use_level0 {
            for level in 0..=part_levels {
                if let Some(name) = tw.level0.work(level).filter(|n| !n.is_empty()) {
                    work[level] = name.to_string();
                }
                if level < part.len() {
                    if let Some(name) = tw.level0.part(level).filter(|n| !n.is_empty()) {
                        part[level] = name.to_string();
                    }
                }
            }
        }

        let (mut groupheading, work_main, inter_work, work_titles);
        if part_levels > 0 {
            work_main = work[ref_level].clone();
            work_titles = tw.titles.work(ref_level).map(str::to_string);
            if ref_level > 1 {
                let inter = inter_parts(&part, None, ref_level);
                groupheading = format!("{}:: {}", work[ref_level], inter);
                inter_work = Some(inter);
            } else {
                groupheading = work[1].clone();
                inter_work = Some(String::new());
            }
        } else {
            groupheading = work[0].clone();
            work_main = groupheading.clone();
            inter_work = None;
            work_titles = None;
        }

        let part_main = if part_levels > 0 && tw.hierarchy.parts.contains_key(&0) {
            part[0].clone()
        } else {
            work[0].clone()
        };
        tw.part = Some(part_main.clone());

        let medley_text = config.medley_text.trim();
        if bottom.medley && config.medley && !medley_text.is_empty() {
            tw.medley = true;
            groupheading = format!("{medley_text} {groupheading}");
        }

        tw.groupheading = Some(groupheading.clone());
        tw.work = Some(work_main.clone());
        tw.inter_work = inter_work.clone();
        tw.title_work = work_titles;

        if !groupheading.is_empty() {
            let mut ext_groupheading = groupheading.clone();
            let mut ext_work = work_main;
            let mut ext_inter_work = inter_work.unwrap_or_default();
            let mut inter_title_work = String::new();
            let mut title_groupheading = None;

            if let Some(title_depth) = title_depth.filter(|_| ref_level > 0) {
                let mut diff_work = vec![String::new(); ref_level];
                let mut diff_part = vec![String::new(); ref_level];
                for d in 1..=ref_level.min(title_depth) {
                    let Some(title_work) = tw.titles.work(d).map(str::to_string) else {
                        continue;
                    };
                    diff_work[d - 1] = self.differ.diff(&work[d], &title_work);
                    if d > 1 {
                        if let Some(lower) = tw.titles.work(d - 1).map(str::to_string) {
                            let (title_part, _) =
                                self.strip_parent_from_work(view, &lower, &title_work, 0, false, None);
                            let title_part = title_part.trim().to_string();
                            diff_part[d - 1] = self.differ.diff(&part[d - 1], &title_part);
                            tw.titles.parts.insert(d - 1, title_part);
                        }
                    }
                }

                if part_levels > 0 && title_depth >= 1 {
                    let addn_work: Vec<String> = diff_work.iter().map(|d| braced(d)).collect();
                    let addn_part: Vec<String> = diff_part.iter().map(|d| braced(d)).collect();
                    ext_groupheading = format!("{}{}", work[1], addn_work[0]);
                    ext_work = format!("{}{}", work[ref_level], addn_work[ref_level - 1]);
                    ext_inter_work = String::new();
                    title_groupheading = tw.titles.work(1).map(str::to_string);
                    if ref_level > 1 {
                        ext_inter_work = inter_parts(&part, Some(&addn_part), ref_level);
                        ext_groupheading = format!(
                            "{}{}:: {}",
                            work[ref_level],
                            addn_work[ref_level - 1],
                            ext_inter_work
                        );
                    }
                    if title_depth > 1 {
                        let top = title_depth.min(ref_level);
                        let title_parts: Vec<String> = (0..top)
                            .map(|l| tw.titles.part(l).unwrap_or_default().to_string())
                            .collect();
                        inter_title_work = inter_parts(&title_parts, Some(&addn_part), top);
                        title_groupheading = Some(format!(
                            "{}{}:: {}",
                            tw.titles.work(top).unwrap_or_default(),
                            addn_work[top - 1],
                            inter_title_work
                        ));
                    }
                }
            }

            tw.extended_groupheading = Some(ext_groupheading).filter(|g| !g.is_empty());
            tw.extended_work = Some(ext_work);
            tw.extended_inter_work = Some(ext_inter_work).filter(|w| !w.is_empty());
            tw.inter_title_work = Some(inter_title_work).filter(|w| !w.is_empty());
            tw.title_groupheading = title_groupheading.filter(|g| !g.is_empty());
        }

        if !part_main.is_empty() {
            let movement = tw
                .titles
                .part(0)
                .map(str::to_string)
                .unwrap_or_else(|| tw.title.clone());
            let mut diff = self.differ.diff(&work[0], &movement);
            if diff.is_empty() && vanilla_part.is_empty() {
                diff = self.differ.diff(&part_main, &movement);
            }
            let mut diff2 = diff.clone();
            let mut no_diff = if diff.is_empty() {
                true
            } else if tw.hierarchy.works.contains_key(&1) && !bottom.partial {
                diff2 = self.differ.diff(&work[1], &diff);
                diff2.is_empty()
            } else {
                false
            };
            if bottom.medley && config.medley && !diff2.trim().is_empty() {
                no_diff = false;
            }

            if no_diff {
                if part_levels > 0 {
                    tw.extended_part = Some(part_main.clone());
                } else {
                    tw.extended_part = Some(work[0].clone());
                    tw.extended_groupheading = None;
                }
            } else if part_levels > 0 {
                tw.extended_part = Some(format!("{} {{{}}}", part_main, diff2.trim()));
            } else {
                tw.extended_part = Some(movement);
            }
        }

        if tw.groupheading.as_deref() == tw.part.as_deref() {
            tw.groupheading = None;
        }
        if tw.title_groupheading.is_some() && tw.title_groupheading.as_deref() == tw.titles.part(0) {
            tw.title_groupheading = None;
        }
    }

    /// Warn that a level fell back to hierarchy names
    pub fn level0_warn(tw: &mut TrackWorks, level: usize) {
        tw.issues.push(TrackIssue::warning(
            IssueKind::Ambiguity,
            format!("Unable to use level 0 as work name source in level {level} - using hierarchy instead"),
        ));
    }
}

/// Strip the longest run of leading words shared with `parent` (at least two)
fn strip_common_lead(work: &str, parent: &str) -> String {
    let work_words: Vec<&str> = work.split_whitespace().collect();
    let parent_words: Vec<&str> = parent.split_whitespace().collect();
    let normalise = |w: &&str| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
    let a: Vec<String> = work_words.iter().map(normalise).collect();
    let b: Vec<String> = parent_words.iter().map(normalise).collect();

    match longest_common_sequence(&a, &b, 0, 0) {
        Some(run) if run.len() >= 2 && run.end < work_words.len() => work_words[run.end..]
            .join(" ")
            .trim_start_matches(NAME_SEPARATORS)
            .to_string(),
        _ => work.to_string(),
    }
}
