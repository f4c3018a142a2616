//! Core data types shared by the cache, lookup queue and hierarchy builder

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw catalog work identifier (a MusicBrainz work MBID)
pub type WorkId = String;

/// Release identifier (a MusicBrainz release MBID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReleaseId(pub String);

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReleaseId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Set of equivalent work identifiers used as the cache key
///
/// Identifiers are trimmed, sorted and de-duplicated on construction, so two
/// keys are equal exactly when their identifier sets are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkKey(Vec<WorkId>);

impl WorkKey {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ids: Vec<WorkId> = ids
            .into_iter()
            .map(|id| id.as_ref().trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        ids.sort();
        ids.dedup();
        Self(ids)
    }

    pub fn single(id: impl AsRef<str>) -> Self {
        Self::new([id])
    }

    pub fn ids(&self) -> &[WorkId] {
        &self.0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.binary_search_by(|other| other.as_str().cmp(id)).is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn union(&self, other: &WorkKey) -> WorkKey {
        WorkKey::new(self.0.iter().chain(other.0.iter()))
    }

    pub fn is_superset_of(&self, other: &WorkKey) -> bool {
        other.0.iter().all(|id| self.contains(id))
    }
}

impl fmt::Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("; "))
    }
}

/// Position of a track within its release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackPosition {
    pub disc: u32,
    pub track: u32,
}

/// A (track, release) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackRef {
    pub release: ReleaseId,
    pub position: TrackPosition,
}

impl fmt::Display for TrackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}-{}",
            self.release, self.position.disc, self.position.track
        )
    }
}

/// A work linked directly to a recording
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingWork {
    pub id: WorkId,
    #[serde(default)]
    pub title: String,
    /// Relation attributes, e.g. "partial", "medley", "live"
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub ordering_key: Option<u32>,
}

impl RecordingWork {
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.eq_ignore_ascii_case(name))
    }
}

/// One track as supplied by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInput {
    pub release_id: String,
    pub recording_id: String,
    pub title: String,
    #[serde(default = "one")]
    pub disc_number: u32,
    #[serde(default = "one")]
    pub total_discs: u32,
    pub track_number: u32,
    /// Tracks on this disc
    pub total_tracks: u32,
    /// Tracks on the whole release
    pub release_track_count: u32,
    /// Composer sort names ("Beethoven, Ludwig van")
    #[serde(default)]
    pub composer_sort_names: Vec<String>,
    #[serde(default)]
    pub works: Vec<RecordingWork>,
}

fn one() -> u32 {
    1
}

impl TrackInput {
    pub fn track_ref(&self) -> TrackRef {
        TrackRef {
            release: ReleaseId(self.release_id.clone()),
            position: TrackPosition {
                disc: self.disc_number,
                track: self.track_number,
            },
        }
    }

    /// Whether this is the last track by disc and track numbering
    pub fn is_last_track(&self) -> bool {
        self.disc_number >= self.total_discs && self.track_number >= self.total_tracks
    }
}

/// A reference to another work in a relation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRef {
    pub id: WorkId,
    pub title: String,
}

/// A parent ("part of") relation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRelation {
    pub work: WorkRef,
    pub ordering_key: Option<u32>,
    pub attributes: Vec<String>,
}

impl ParentRelation {
    pub fn is_collection(&self) -> bool {
        self.attributes
            .iter()
            .any(|a| a.eq_ignore_ascii_case("part of collection"))
    }
}

/// A contributor attached directly to a work
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Contributor {
    pub role: String,
    pub name: String,
    pub sort_name: String,
}

/// Begin/end years of a dated event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct YearRange {
    pub begin: Option<i32>,
    pub end: Option<i32>,
}

impl YearRange {
    pub fn is_empty(&self) -> bool {
        self.begin.is_none() && self.end.is_none()
    }
}

impl fmt::Display for YearRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.begin, self.end) {
            (Some(b), Some(e)) if b != e => write!(f, "{b}-{e}"),
            (Some(b), _) => write!(f, "{b}"),
            (None, Some(e)) => write!(f, "{e}"),
            (None, None) => Ok(()),
        }
    }
}

/// Dates associated with a work
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkDates {
    pub composed: Vec<YearRange>,
    pub published: Vec<YearRange>,
    pub premiered: Vec<YearRange>,
}

impl WorkDates {
    pub fn is_empty(&self) -> bool {
        self.composed.is_empty() && self.published.is_empty() && self.premiered.is_empty()
    }
}

/// Parsed relation data returned for one work lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSet {
    pub work_id: WorkId,
    pub title: String,
    pub alias: Option<String>,
    pub parents: Vec<ParentRelation>,
    pub arrangement_of: Vec<WorkRef>,
    pub medley_of: Vec<WorkRef>,
    pub contributors: Vec<Contributor>,
    pub tags: Vec<String>,
    pub key: Option<String>,
    pub dates: WorkDates,
}
