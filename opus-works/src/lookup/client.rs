//! MusicBrainz work lookup client
//!
//! Fetches a work with its relations from the MusicBrainz JSON web service
//! and maps the response into a [`RelationSet`]. Requests are rate limited
//! with a direct `governor` limiter (MusicBrainz allows 1 request/second).

use super::{LookupRequest, RequestVariant, WorkLookup};
use crate::config::MusicBrainzConfig;
use crate::error::LookupError;
use crate::types::{Contributor, ParentRelation, RelationSet, WorkDates, WorkRef, YearRange};
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, info};

const BASE_INCLUDES: &str = "work-rels+artist-rels+label-rels+place-rels+tags+aliases";

/// Artist relation types kept as work contributors
const CONTRIBUTOR_ROLES: &[&str] = &[
    "composer",
    "arranger",
    "instrument arranger",
    "orchestrator",
    "librettist",
    "lyricist",
    "writer",
];

#[derive(Debug, Deserialize)]
struct MBWork {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    attributes: Vec<MBAttribute>,
    #[serde(default)]
    aliases: Vec<MBAlias>,
    #[serde(default)]
    tags: Vec<MBTag>,
    #[serde(rename = "user-tags", default)]
    user_tags: Vec<MBTag>,
    /// Absent when the response carries no relation structure at all
    relations: Option<Vec<MBRelation>>,
}

#[derive(Debug, Deserialize)]
struct MBAttribute {
    #[serde(rename = "type")]
    attribute_type: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct MBAlias {
    name: String,
    #[serde(default)]
    primary: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct MBTag {
    name: String,
    #[serde(default)]
    count: i64,
}

#[derive(Debug, Deserialize)]
struct MBRelation {
    #[serde(rename = "type")]
    relation_type: String,
    #[serde(default)]
    direction: String,
    #[serde(rename = "ordering-key")]
    ordering_key: Option<u32>,
    #[serde(default)]
    attributes: Vec<String>,
    begin: Option<String>,
    end: Option<String>,
    work: Option<MBRelatedWork>,
    artist: Option<MBArtist>,
}

#[derive(Debug, Deserialize)]
struct MBRelatedWork {
    id: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct MBArtist {
    name: String,
    #[serde(rename = "sort-name", default)]
    sort_name: String,
}

/// Leading year of a partial ISO date ("1824-05-07" -> 1824)
fn year_of(date: Option<&str>) -> Option<i32> {
    let date = date?.trim();
    date.get(..4)?.parse().ok()
}

fn year_range(relation: &MBRelation) -> YearRange {
    YearRange {
        begin: year_of(relation.begin.as_deref()),
        end: year_of(relation.end.as_deref()),
    }
}

fn push_range(ranges: &mut Vec<YearRange>, range: YearRange) {
    if !range.is_empty() && !ranges.contains(&range) {
        ranges.push(range);
    }
}

impl MBWork {
    fn into_relations(self) -> Result<RelationSet, LookupError> {
        if self.id.trim().is_empty() {
            return Err(LookupError::Malformed("work without id".to_string()));
        }
        let relations = self.relations.ok_or_else(|| {
            LookupError::Malformed(format!("no relation list for work {}", self.id))
        })?;

        let mut set = RelationSet {
            work_id: self.id,
            title: self.title,
            ..RelationSet::default()
        };

        set.alias = self
            .aliases
            .iter()
            .find(|a| a.primary.unwrap_or(false))
            .map(|a| a.name.clone());
        set.key = self
            .attributes
            .iter()
            .find(|a| a.attribute_type.eq_ignore_ascii_case("key"))
            .map(|a| a.value.clone());

        let mut tags = self.tags;
        tags.sort_by(|a, b| b.count.cmp(&a.count));
        for tag in tags.into_iter().chain(self.user_tags) {
            if !set.tags.contains(&tag.name) {
                set.tags.push(tag.name);
            }
        }

        let mut dates = WorkDates::default();
        for relation in relations {
            let backward = relation.direction == "backward";
            match relation.relation_type.as_str() {
                "parts" if backward => {
                    if let Some(work) = relation.work {
                        set.parents.push(ParentRelation {
                            work: WorkRef {
                                id: work.id,
                                title: work.title,
                            },
                            ordering_key: relation.ordering_key,
                            attributes: relation.attributes,
                        });
                    }
                }
                "arrangement" if backward => {
                    if let Some(work) = relation.work {
                        set.arrangement_of.push(WorkRef {
                            id: work.id,
                            title: work.title,
                        });
                    }
                }
                "medley" if !backward => {
                    if let Some(work) = relation.work {
                        set.medley_of.push(WorkRef {
                            id: work.id,
                            title: work.title,
                        });
                    }
                }
                "premiere" => push_range(&mut dates.premiered, year_range(&relation)),
                "publishing" => push_range(&mut dates.published, year_range(&relation)),
                role if CONTRIBUTOR_ROLES.contains(&role) => {
                    if role == "composer" {
                        push_range(&mut dates.composed, year_range(&relation));
                    }
                    let Some(artist) = relation.artist else {
                        continue;
                    };
                    let role = if role == "instrument arranger" && !relation.attributes.is_empty() {
                        format!("{} ({})", role, relation.attributes.join(", "))
                    } else {
                        role.to_string()
                    };
                    let contributor = Contributor {
                        role,
                        sort_name: if artist.sort_name.is_empty() {
                            artist.name.clone()
                        } else {
                            artist.sort_name
                        },
                        name: artist.name,
                    };
                    if !set.contributors.contains(&contributor) {
                        set.contributors.push(contributor);
                    }
                }
                _ => {}
            }
        }
        set.dates = dates;
        Ok(set)
    }
}

/// Map a non-success status to a lookup error
fn status_error(status: u16, work_id: &str, body: String) -> LookupError {
    match status {
        401 | 403 => LookupError::Unauthorized,
        404 => LookupError::NotFound(work_id.to_string()),
        429 | 503 => LookupError::RateLimited,
        _ => LookupError::Api(status, body),
    }
}

/// Parse a work lookup response body
pub fn parse_work_response(body: &str) -> Result<RelationSet, LookupError> {
    let work: MBWork =
        serde_json::from_str(body).map_err(|e| LookupError::Malformed(e.to_string()))?;
    work.into_relations()
}

/// MusicBrainz API client for work relations
pub struct MusicBrainzWorkClient {
    http_client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl MusicBrainzWorkClient {
    pub fn new(config: &MusicBrainzConfig) -> Result<Self, LookupError> {
        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(opus_common::config::get_user_agent);
        let http_client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LookupError::Network(e.to_string()))?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.trim().is_empty()),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    fn work_url(&self, work_id: &str, variant: RequestVariant) -> String {
        let includes = match variant {
            RequestVariant::Authenticated => format!("{BASE_INCLUDES}+user-tags"),
            RequestVariant::Anonymous => BASE_INCLUDES.to_string(),
        };
        format!("{}/work/{}?inc={}&fmt=json", self.base_url, work_id, includes)
    }
}

#[async_trait]
impl WorkLookup for MusicBrainzWorkClient {
    fn preferred_variant(&self) -> RequestVariant {
        if self.token.is_some() {
            RequestVariant::Authenticated
        } else {
            RequestVariant::Anonymous
        }
    }

    async fn lookup_work(&self, request: &LookupRequest) -> Result<RelationSet, LookupError> {
        self.rate_limiter.until_ready().await;

        let url = self.work_url(&request.work_id, request.variant);
        debug!(work_id = %request.work_id, attempt = request.attempt, url = %url, "Querying MusicBrainz work");

        let mut builder = self.http_client.get(&url);
        if let (RequestVariant::Authenticated, Some(token)) = (request.variant, &self.token) {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LookupError::Timeout
            } else {
                LookupError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), &request.work_id, body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| LookupError::Network(e.to_string()))?;
        let relations = parse_work_response(&body)?;

        info!(
            work_id = %relations.work_id,
            title = %relations.title,
            parents = relations.parents.len(),
            "Retrieved work from MusicBrainz"
        );
        Ok(relations)
    }
}
