//! Work lookups: the network boundary and the request coordinator

pub mod client;
pub mod queue;

use crate::error::LookupError;
use crate::types::{RelationSet, WorkId};
use async_trait::async_trait;

pub use client::MusicBrainzWorkClient;
pub use queue::{EnqueueOutcome, LookupQueue};

/// Which form of request to send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestVariant {
    /// Full request with credentials (includes user tags)
    Authenticated,
    /// Narrower request without credentials
    Anonymous,
}

/// One lookup for one raw work identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRequest {
    pub work_id: WorkId,
    /// Number of failed attempts before this one
    pub attempt: u32,
    pub variant: RequestVariant,
}

impl LookupRequest {
    pub fn new(work_id: impl Into<WorkId>, variant: RequestVariant) -> Self {
        Self {
            work_id: work_id.into(),
            attempt: 0,
            variant,
        }
    }

    /// Same request, one attempt later
    pub fn retry(&self, variant: RequestVariant) -> Self {
        Self {
            work_id: self.work_id.clone(),
            attempt: self.attempt + 1,
            variant,
        }
    }
}

/// Fetches the relations of a single work
#[async_trait]
pub trait WorkLookup: Send + Sync {
    /// Variant used for first attempts
    fn preferred_variant(&self) -> RequestVariant {
        RequestVariant::Authenticated
    }

    async fn lookup_work(&self, request: &LookupRequest) -> Result<RelationSet, LookupError>;
}
