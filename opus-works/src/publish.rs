//! Per-track results and their annotation form
//!
//! [`TrackWorks`] accumulates everything the assembler and reconciler derive
//! for one track. [`TrackWorks::annotations`] flattens it into the named
//! values handed to tag mapping.

use crate::config::NameStyle;
use crate::error::IssueLog;
use crate::text::strip_numbering;
use crate::types::{Contributor, ReleaseId, TrackRef, WorkDates, WorkKey, YearRange};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Work and part names per hierarchy level (0 = the recording's own work)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelNames {
    pub works: BTreeMap<usize, String>,
    pub parts: BTreeMap<usize, String>,
}

impl LevelNames {
    pub fn work(&self, level: usize) -> Option<&str> {
        self.works.get(&level).map(String::as_str)
    }

    pub fn part(&self, level: usize) -> Option<&str> {
        self.parts.get(&level).map(String::as_str)
    }
}

/// Names selected for publication by the configured style
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishedNames {
    pub groupheading: Option<String>,
    pub work: Option<String>,
    pub inter_work: Option<String>,
    pub part: String,
    pub movement: String,
}

/// Everything resolved for one track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackWorks {
    pub track: TrackRef,
    /// Working title (composer prefix removed)
    pub title: String,
    pub track_number: u32,

    /// Catalog hierarchy names
    pub hierarchy: LevelNames,
    /// Names derived from track titles
    pub titles: LevelNames,
    /// Names derived from level-0 work names
    pub level0: LevelNames,
    pub work_ids: BTreeMap<usize, WorkKey>,
    pub title_work_levels: Option<usize>,
    pub title_part_levels: Option<usize>,

    pub work_top: Option<String>,
    pub workid_top: Option<WorkKey>,
    pub single_work_album: bool,
    pub part_levels: usize,
    pub work_part_levels: usize,
    pub movement_number: Option<usize>,

    pub part: Option<String>,
    pub groupheading: Option<String>,
    pub work: Option<String>,
    pub inter_work: Option<String>,
    pub title_work: Option<String>,
    pub extended_part: Option<String>,
    pub extended_groupheading: Option<String>,
    pub extended_work: Option<String>,
    pub extended_inter_work: Option<String>,
    pub title_groupheading: Option<String>,
    pub inter_title_work: Option<String>,
    pub published: PublishedNames,

    pub arrangement: bool,
    pub partial: bool,
    pub medley: bool,
    pub key: Option<String>,
    pub genres: Vec<String>,
    pub dates: WorkDates,
    pub issues: IssueLog,
}

/// A single annotation value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AnnotationValue {
    Text(String),
    List(Vec<String>),
}

impl From<&str> for AnnotationValue {
    fn from(value: &str) -> Self {
        AnnotationValue::Text(value.to_string())
    }
}

impl From<String> for AnnotationValue {
    fn from(value: String) -> Self {
        AnnotationValue::Text(value)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn ranges(values: &[YearRange]) -> Vec<String> {
    values
        .iter()
        .filter(|r| !r.is_empty())
        .map(ToString::to_string)
        .collect()
}

impl TrackWorks {
    pub fn new(track: TrackRef, title: impl Into<String>, track_number: u32) -> Self {
        Self {
            track,
            title: title.into(),
            track_number,
            hierarchy: LevelNames::default(),
            titles: LevelNames::default(),
            level0: LevelNames::default(),
            work_ids: BTreeMap::new(),
            title_work_levels: None,
            title_part_levels: None,
            work_top: None,
            workid_top: None,
            single_work_album: false,
            part_levels: 0,
            work_part_levels: 0,
            movement_number: None,
            part: None,
            groupheading: None,
            work: None,
            inter_work: None,
            title_work: None,
            extended_part: None,
            extended_groupheading: None,
            extended_work: None,
            extended_inter_work: None,
            title_groupheading: None,
            inter_title_work: None,
            published: PublishedNames::default(),
            arrangement: false,
            partial: false,
            medley: false,
            key: None,
            genres: Vec::new(),
            dates: WorkDates::default(),
            issues: IssueLog::default(),
        }
    }

    /// Whether the hierarchy walk reached this track
    pub fn is_resolved(&self) -> bool {
        self.work_ids.contains_key(&0)
    }

    /// Pick the published names for `style`
    pub fn select_style(&mut self, style: NameStyle) {
        let (part, groupheading, work, inter_work) = match style {
            NameStyle::Titles => (
                self.titles
                    .part(0)
                    .map(str::to_string)
                    .unwrap_or_else(|| self.title.clone()),
                self.title_groupheading.clone(),
                self.title_work.clone(),
                self.inter_title_work.clone(),
            ),
            NameStyle::Works => (
                self.part
                    .clone()
                    .or_else(|| self.hierarchy.part(0).map(str::to_string))
                    .unwrap_or_else(|| self.title.clone()),
                self.groupheading.clone(),
                self.work.clone(),
                self.inter_work.clone(),
            ),
            NameStyle::Extended => (
                self.extended_part
                    .clone()
                    .unwrap_or_else(|| self.title.clone()),
                self.extended_groupheading.clone(),
                self.extended_work.clone(),
                self.extended_inter_work.clone(),
            ),
        };
        let movement = strip_numbering(&part);
        self.published = PublishedNames {
            groupheading: groupheading.filter(|g| !g.is_empty()),
            work: work.filter(|w| !w.is_empty()),
            inter_work: inter_work.filter(|w| !w.is_empty()),
            part,
            movement,
        };
    }

    /// Flatten into named annotation values
    pub fn annotations(&self) -> BTreeMap<String, AnnotationValue> {
        let mut out: BTreeMap<String, AnnotationValue> = BTreeMap::new();
        let mut text = |name: String, value: &str| {
            if !value.is_empty() {
                out.insert(name, AnnotationValue::from(value));
            }
        };

        for (level, name) in &self.hierarchy.works {
            text(format!("work_{level}"), name);
        }
        for (level, name) in &self.hierarchy.parts {
            text(format!("part_{level}"), name);
        }
        for (level, name) in &self.titles.works {
            text(format!("title_work_{level}"), name);
        }
        for (level, name) in &self.titles.parts {
            text(format!("title_part_{level}"), name);
        }
        for (level, name) in &self.level0.works {
            text(format!("level0_work_{level}"), name);
        }
        for (level, name) in &self.level0.parts {
            text(format!("level0_part_{level}"), name);
        }
        if let Some(top) = &self.work_top {
            text("work_top".to_string(), top);
        }
        if let Some(groupheading) = &self.published.groupheading {
            text("groupheading".to_string(), groupheading);
        }
        if let Some(work) = &self.published.work {
            text("work".to_string(), work);
        }
        if let Some(inter_work) = &self.published.inter_work {
            text("inter_work".to_string(), inter_work);
        }
        text("part".to_string(), &self.published.part);
        text("movement".to_string(), &self.published.movement);
        if let Some(extended) = non_empty(&self.extended_part) {
            text("extended_part".to_string(), extended);
        }
        if let Some(extended) = non_empty(&self.extended_groupheading) {
            text("extended_groupheading".to_string(), extended);
        }
        if let Some(heading) = non_empty(&self.title_groupheading) {
            text("title_groupheading".to_string(), heading);
        }
        if let Some(key) = &self.key {
            text("key".to_string(), key);
        }
        if self.is_resolved() {
            text("part_levels".to_string(), &self.part_levels.to_string());
            text("work_part_levels".to_string(), &self.work_part_levels.to_string());
            text("single_work_album".to_string(), &self.single_work_album.to_string());
        }
        if let Some(n) = self.movement_number {
            text("movement_number".to_string(), &n.to_string());
        }
        for (flag, set) in [
            ("arrangement", self.arrangement),
            ("partial", self.partial),
            ("medley", self.medley),
        ] {
            if set {
                text(flag.to_string(), "true");
            }
        }

        let mut list = |name: &str, values: Vec<String>| {
            if !values.is_empty() {
                out.insert(name.to_string(), AnnotationValue::List(values));
            }
        };
        for (level, key) in &self.work_ids {
            list(&format!("workid_{level}"), key.ids().to_vec());
        }
        if let Some(top) = &self.workid_top {
            list("workid_top", top.ids().to_vec());
        }
        list("genres", self.genres.clone());
        list("composed", ranges(&self.dates.composed));
        list("published", ranges(&self.dates.published));
        list("premiered", ranges(&self.dates.premiered));
        list("errors", self.issues.errors().map(|i| i.message.clone()).collect());
        list("warnings", self.issues.warnings().map(|i| i.message.clone()).collect());
        out
    }
}

/// Contributor tuples per work, for artist resolution
pub type ContributorMap = BTreeMap<WorkKey, Vec<Contributor>>;

/// Result for one finished release
#[derive(Debug, Clone)]
pub struct ReleaseWorks {
    pub release_id: ReleaseId,
    /// Ordered by disc and track
    pub tracks: Vec<TrackWorks>,
    pub contributors: ContributorMap,
}

impl ReleaseWorks {
    pub fn track(&self, disc: u32, track: u32) -> Option<&TrackWorks> {
        self.tracks
            .iter()
            .find(|t| t.track.position.disc == disc && t.track.position.track == track)
    }

    pub fn to_json(&self) -> Value {
        let tracks: Vec<Value> = self
            .tracks
            .iter()
            .map(|t| {
                json!({
                    "disc": t.track.position.disc,
                    "track": t.track.position.track,
                    "title": t.title,
                    "annotations": t.annotations(),
                })
            })
            .collect();
        let contributors: BTreeMap<String, Vec<Value>> = self
            .contributors
            .iter()
            .map(|(key, list)| {
                let tuples = list
                    .iter()
                    .map(|c| json!([c.role, c.name, c.sort_name]))
                    .collect();
                (key.to_string(), tuples)
            })
            .collect();
        json!({
            "release": self.release_id.0,
            "tracks": tracks,
            "contributors": contributors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{IssueKind, TrackIssue};
    use crate::types::TrackPosition;

    fn track_works() -> TrackWorks {
        TrackWorks::new(
            TrackRef {
                release: ReleaseId::from("r"),
                position: TrackPosition { disc: 1, track: 2 },
            },
            "Adagio molto e cantabile",
            2,
        )
    }

    #[test]
    fn test_extended_style_selection() {
        let mut tw = track_works();
        tw.extended_part = Some("II. Adagio {molto e cantabile}".to_string());
        tw.extended_groupheading = Some("Symphony No. 9".to_string());
        tw.part = Some("II. Adagio".to_string());
        tw.select_style(NameStyle::Extended);
        assert_eq!(tw.published.part, "II. Adagio {molto e cantabile}");
        assert_eq!(tw.published.movement, "Adagio {molto e cantabile}");
        assert_eq!(tw.published.groupheading.as_deref(), Some("Symphony No. 9"));

        tw.select_style(NameStyle::Works);
        assert_eq!(tw.published.part, "II. Adagio");
        assert_eq!(tw.published.groupheading, None);
    }

    #[test]
    fn test_works_style_falls_back_to_catalog_part() {
        let mut tw = track_works();
        tw.hierarchy.parts.insert(0, "II. Adagio".to_string());
        tw.select_style(NameStyle::Works);
        assert_eq!(tw.published.part, "II. Adagio");
        assert_eq!(tw.published.movement, "Adagio");

        tw.hierarchy.parts.clear();
        tw.select_style(NameStyle::Works);
        assert_eq!(tw.published.part, "Adagio molto e cantabile");
    }

    #[test]
    fn test_titles_style_falls_back_to_title() {
        let mut tw = track_works();
        tw.select_style(NameStyle::Titles);
        assert_eq!(tw.published.part, "Adagio molto e cantabile");
    }

    #[test]
    fn test_annotations() {
        let mut tw = track_works();
        tw.hierarchy.works.insert(0, "Symphony No. 9: II. Adagio".to_string());
        tw.hierarchy.works.insert(1, "Symphony No. 9".to_string());
        tw.hierarchy.parts.insert(0, "II. Adagio".to_string());
        tw.work_ids.insert(0, WorkKey::single("m2"));
        tw.work_ids.insert(1, WorkKey::single("s9"));
        tw.part_levels = 1;
        tw.work_part_levels = 1;
        tw.single_work_album = true;
        tw.movement_number = Some(2);
        tw.issues.push(TrackIssue::error(IssueKind::LookupFailure, "lost"));
        tw.select_style(NameStyle::Works);

        let a = tw.annotations();
        assert_eq!(a["work_1"], AnnotationValue::from("Symphony No. 9"));
        assert_eq!(a["part_0"], AnnotationValue::from("II. Adagio"));
        assert_eq!(a["workid_1"], AnnotationValue::List(vec!["s9".to_string()]));
        assert_eq!(a["single_work_album"], AnnotationValue::from("true"));
        assert_eq!(a["movement_number"], AnnotationValue::from("2"));
        assert_eq!(a["movement"], AnnotationValue::from("Adagio"));
        assert_eq!(a["errors"], AnnotationValue::List(vec!["lost".to_string()]));
        assert!(!a.contains_key("warnings"));
        assert!(!a.contains_key("arrangement"));
    }
}
