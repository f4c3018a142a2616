//! opus-works: classical work hierarchy resolution
//!
//! Resolves the movement → part → work → top-level work hierarchy of each
//! track on a release from catalog work relations, then reconciles the
//! catalog names with the release's literal track titles.
//!
//! - [`text`]: comparison keys, sequence alignment and the title diff engine
//! - [`cache`]: the process-wide [`WorkGraphCache`]
//! - [`lookup`]: the [`WorkLookup`] boundary, the MusicBrainz client and the
//!   de-duplicating [`LookupQueue`]
//! - [`hierarchy`]: per-release trackback trees and level assignment
//! - [`reconcile`]: part names, groupheadings and extended names
//! - [`processor`]: drives all of the above per release

pub mod cache;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod lookup;
pub mod processor;
pub mod publish;
pub mod reconcile;
pub mod text;
pub mod types;

pub use cache::{WorkGraphCache, WorkNode};
pub use config::{Level0Source, MusicBrainzConfig, NameStyle, TomlConfig, WorksConfig};
pub use error::{IssueKind, LookupError, Result, Severity, TrackIssue, WorksError};
pub use lookup::{LookupQueue, LookupRequest, MusicBrainzWorkClient, RequestVariant, WorkLookup};
pub use processor::{LookupCompletion, WorkPartsProcessor};
pub use publish::{AnnotationValue, ReleaseWorks, TrackWorks};
pub use types::{RecordingWork, RelationSet, ReleaseId, TrackInput, TrackRef, WorkKey};
