//! Top-down walk of a release's trackback tree
//!
//! Leaves stamp their tracks with the level-0 work and the top-level work.
//! Each interior node then records itself as the parent level of every track
//! below it and derives alternative level names from the common structure
//! of its tracks' titles and level-0 work names.

use super::tree::Trackback;
use super::ReleaseView;
use crate::config::{Level0Source, WorksConfig};
use crate::publish::TrackWorks;
use crate::reconcile::{TitleReconciler, TopInfo, NAME_SEPARATORS};
use crate::text::{longest_common_sequence, TextRules};
use crate::types::TrackRef;
use std::collections::BTreeMap;
use tracing::debug;

/// Which names a structure-derived level set is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameSource {
    Title,
    Level0,
}

/// Tracks collected below a node, with their heights and name candidates
#[derive(Debug, Default)]
struct Gathered {
    tracks: Vec<(TrackRef, usize)>,
    titles: Vec<String>,
    works: Vec<String>,
    numbers: Vec<u32>,
}

impl Gathered {
    fn push(&mut self, track: TrackRef, height: usize, tw: &TrackWorks) {
        self.tracks.push((track, height));
        self.titles.push(tw.title.clone());
        self.works.push(tw.hierarchy.work(0).unwrap_or_default().to_string());
        self.numbers.push(tw.track_number);
    }

    fn extend(&mut self, other: Gathered) {
        self.tracks.extend(other.tracks);
        self.titles.extend(other.titles);
        self.works.extend(other.works);
        self.numbers.extend(other.numbers);
    }
}

/// Common leading text of a set of names
enum Common {
    None,
    /// Number of shared leading words
    Words(usize),
    /// Text found inside the single name
    Text(String),
}

/// Byte offset just past the `words`-th whitespace separated word
fn word_end(text: &str, words: usize) -> usize {
    let mut count = 0;
    let mut in_word = false;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if in_word {
                count += 1;
                in_word = false;
                if count == words {
                    return i;
                }
            }
        } else {
            in_word = true;
        }
    }
    text.len()
}

/// Drop a trailing remove-word ("Act", "Part", ...) from a derived work name
fn trim_removeword_suffix(work: &mut String, rules: &TextRules) {
    for entry in &rules.removewords {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let suffix = format!(" {entry}");
        let lower = work.to_lowercase();
        if lower.len() == work.len() && lower.ends_with(&suffix) {
            work.truncate(work.len() - suffix.len());
            let trimmed = work.trim_end_matches(NAME_SEPARATORS).len();
            work.truncate(trimmed);
        }
    }
}

pub struct HierarchyAssembler<'a> {
    config: &'a WorksConfig,
    reconciler: TitleReconciler<'a>,
    view: ReleaseView<'a>,
}

impl<'a> HierarchyAssembler<'a> {
    pub fn new(config: &'a WorksConfig, rules: &'a TextRules, view: ReleaseView<'a>) -> Self {
        Self {
            config,
            reconciler: TitleReconciler::new(config, rules),
            view,
        }
    }

    pub fn view(&self) -> &ReleaseView<'a> {
        &self.view
    }

    /// Assign level names to every track reachable in `tree`
    pub fn assemble(&mut self, tree: &Trackback, tracks: &mut BTreeMap<TrackRef, TrackWorks>) {
        let single = tree.roots.len() == 1;
        for &root in &tree.roots {
            let node = tree.node(root);
            let levels = node.depth;
            let ref_level = if levels >= 3 {
                levels - usize::from(single)
            } else {
                levels
            };
            let ref_height = levels - ref_level;
            let top = TopInfo {
                key: node.key.clone(),
                name: self.view.name(&node.key).trim().to_string(),
                levels,
                single,
            };
            debug!(top = %top.key, levels, ref_level, "Processing top-level work");

            let gathered = self.process_node(tree, root, &top, tracks);
            for (track, _) in &gathered.tracks {
                if let Some(tw) = tracks.get_mut(track) {
                    self.reconciler.extend_metadata(&self.view, tw, ref_height);
                    tw.select_style(self.config.style);
                }
            }
        }
    }

    fn process_node(
        &mut self,
        tree: &Trackback,
        index: usize,
        top: &TopInfo,
        tracks: &mut BTreeMap<TrackRef, TrackWorks>,
    ) -> Gathered {
        let node = tree.node(index);
        let mut gathered = Gathered::default();

        let name = self.view.name(&node.key).trim().to_string();
        for track in &node.tracks {
            let Some(tw) = tracks.get_mut(track) else {
                continue;
            };
            tw.work_ids.insert(0, node.key.clone());
            tw.hierarchy.works.insert(0, name.clone());
            tw.part_levels = node.height;
            tw.work_part_levels = top.levels;
            tw.workid_top = Some(top.key.clone());
            tw.work_top = Some(top.name.clone());
            tw.single_work_album = top.single;
            gathered.push(track.clone(), node.height, tw);
        }

        if node.is_leaf() {
            return gathered;
        }

        let mut below = Gathered::default();
        for &child in &node.children {
            let child_key = tree.node(child).key.clone();
            let answer = self.process_node(tree, child, top, tracks);
            for (track, track_height) in answer.tracks {
                let Some(tw) = tracks.get_mut(&track) else {
                    continue;
                };
                let part_level = track_height - node.height;
                self.reconciler
                    .set_metadata(&mut self.view, tw, part_level, &child_key, &node.key);
                below.push(track, track_height, tw);
            }
        }

        if !below.tracks.is_empty() {
            let width = node.children.len();
            self.derive_from_structure(tracks, &below, node.height, node.depth, width, NameSource::Title);
            if self.config.level0_source == Level0Source::LevelZero {
                self.derive_from_structure(tracks, &below, node.height, node.depth, width, NameSource::Level0);
            }
        }
        gathered.extend(below);
        gathered
    }

    /// Derive level names from what the tracks below a node have in common
    fn derive_from_structure(
        &self,
        tracks: &mut BTreeMap<TrackRef, TrackWorks>,
        below: &Gathered,
        height: usize,
        depth: usize,
        width: usize,
        source: NameSource,
    ) {
        let names = match source {
            NameSource::Title => &below.titles,
            NameSource::Level0 => &below.works,
        };
        let mut sorted_numbers = below.numbers.clone();
        sorted_numbers.sort_unstable();

        let common = if names.len() == 1 {
            let (track, track_height) = &below.tracks[0];
            let subset = if *track_height <= height {
                names[0].clone()
            } else if source == NameSource::Title {
                tracks
                    .get(track)
                    .map(|tw| {
                        let catalog = tw.hierarchy.work(0).unwrap_or_default();
                        let diff = self.reconciler.differ().diff(catalog, &names[0]);
                        if diff.is_empty() {
                            String::new()
                        } else {
                            self.reconciler.derive_from_title(tw, &diff).0
                        }
                    })
                    .unwrap_or_default()
            } else {
                String::new()
            };
            if subset.is_empty() {
                Common::None
            } else {
                Common::Text(subset)
            }
        } else {
            let mut compare: Vec<&str> = names[0].split_whitespace().collect();
            for name in names {
                let words: Vec<&str> = name.split_whitespace().collect();
                match longest_common_sequence(&compare, &words, 0, 0) {
                    Some(run) => compare.truncate(run.end),
                    None => {
                        compare.clear();
                        break;
                    }
                }
            }
            if compare.is_empty() {
                Common::None
            } else {
                Common::Words(compare.len())
            }
        };

        for (i, (track, track_height)) in below.tracks.iter().enumerate() {
            let Some(tw) = tracks.get_mut(track) else {
                continue;
            };
            let name = &names[i];
            let part_level = track_height - height;
            let common_end = match &common {
                Common::None => None,
                Common::Words(n) => Some(word_end(name, *n)),
                Common::Text(text) => name.find(text.as_str()).map(|p| p + text.len()),
            };
            self.derive_for_track(tw, name, common_end, part_level, depth, width, source);

            if source == NameSource::Title && part_level == 1 {
                let position = sorted_numbers
                    .iter()
                    .position(|&n| n == below.numbers[i])
                    .unwrap_or(i);
                tw.movement_number = Some(position + 1);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn derive_for_track(
        &self,
        tw: &mut TrackWorks,
        name: &str,
        common_end: Option<usize>,
        part_level: usize,
        depth: usize,
        width: usize,
        source: NameSource,
    ) {
        let top_level = tw.part_levels;
        let mut fallback_levels = Vec::new();
        let strip = |work: &str, parent: &str, level: usize| {
            self.reconciler
                .strip_parent_from_work(&self.view, work, parent, level, true, None)
                .0
        };

        {
            let TrackWorks {
                hierarchy,
                titles,
                level0,
                title_work_levels,
                title_part_levels,
                ..
            } = &mut *tw;
            let canon = &*hierarchy;
            let derived = match source {
                NameSource::Title => titles,
                NameSource::Level0 => level0,
            };

            if let Some(end) = common_end {
                let mut work = name[..end].trim_end_matches(NAME_SEPARATORS).to_string();
                let before = work.len();
                trim_removeword_suffix(&mut work, self.reconciler.rules());
                let end = if work.len() < before { work.len() } else { end };
                derived.works.insert(part_level, work.clone());

                if part_level > 0 && source == NameSource::Level0 {
                    let lower = derived.work(part_level - 1).map(str::to_string);
                    if lower.as_deref() == Some(work.as_str()) {
                        let canonical = canon.work(part_level).unwrap_or_default().to_string();
                        let part = strip(lower.as_deref().unwrap_or_default(), &canonical, part_level);
                        derived.parts.insert(part_level - 1, part);
                        derived.works.insert(part_level, canonical);
                        fallback_levels.push(part_level);
                    } else if let Some(lower) = lower.filter(|l| !l.is_empty()) {
                        derived.parts.insert(part_level - 1, strip(&lower, &work, part_level));
                    }
                    for level in (0..part_level).rev() {
                        if derived.works.contains_key(&level) {
                            continue;
                        }
                        let work_name = canon.work(level).unwrap_or_default().to_string();
                        let upper = derived.work(level + 1).unwrap_or_default().to_string();
                        derived.parts.insert(level, strip(&work_name, &upper, level));
                        derived.works.insert(level, work_name);
                        if level != 0 {
                            fallback_levels.push(level);
                        }
                    }
                }

                if part_level == 1 {
                    let movement = name
                        .get(end..)
                        .unwrap_or_default()
                        .trim()
                        .trim_start_matches(NAME_SEPARATORS)
                        .to_string();
                    derived.parts.insert(0, movement);
                }

                if source == NameSource::Title {
                    let repeated = part_level >= 1
                        && width == 1
                        && derived.work(part_level - 1).is_some()
                        && derived.work(part_level) == derived.work(part_level - 1);
                    if !repeated {
                        *title_work_levels = Some(depth);
                        *title_part_levels = Some(part_level);
                    }
                }
            } else if part_level >= top_level && source == NameSource::Level0 {
                for level in 0..=part_level {
                    if !derived.works.contains_key(&level) {
                        if let Some(work) = canon.work(level) {
                            derived.works.insert(level, work.to_string());
                        }
                    }
                    if !derived.parts.contains_key(&level) {
                        if let Some(part) = canon.part(level) {
                            derived.parts.insert(level, part.to_string());
                            if level > 0 {
                                fallback_levels.push(level);
                            }
                        }
                    }
                }
            }
        }

        for level in fallback_levels {
            TitleReconciler::level0_warn(tw, level);
        }
    }
}
