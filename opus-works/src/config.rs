//! Configuration for work hierarchy resolution
//!
//! Loaded from the `[works]` and `[musicbrainz]` sections of the opus TOML
//! file. Every field has a built-in default, so an empty or missing file is
//! a valid configuration.

use crate::text::rules::{ConfigIssue, TextRules, DEFAULT_CONNECTIVES};
use opus_common::config::LoggingConfig;
use serde::Deserialize;

pub const DEFAULT_REMOVEWORDS: &str = "part, act, scene, movement, movt, no., no , n., n , nr., nr , book , the , a , la , le , un , une , el , il , (part), tableau, from ";
pub const DEFAULT_SYNONYMS: &str = "(1, one) / (2, two) / (3, three) / (&, and)";

/// Which name set feeds the published work/part names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NameStyle {
    /// Names derived from track titles
    Titles,
    /// Catalog names only
    Works,
    /// Catalog names extended with new title text
    #[default]
    Extended,
}

/// Source for work names at each level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Level0Source {
    /// Derive from the common prefixes of level-0 work names where possible
    #[default]
    LevelZero,
    /// Always use the catalog hierarchy names
    Hierarchy,
}

/// Work resolution settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorksConfig {
    /// Traverse "part of collection" relations as parents
    pub include_collections: bool,
    pub proximity: usize,
    pub end_proximity: usize,
    pub granularity: usize,
    /// 0-100
    pub substring_match: u8,
    pub removewords: String,
    pub synonyms: String,
    pub replacements: String,
    pub connectives: Vec<String>,
    pub style: NameStyle,
    pub level0_source: Level0Source,
    pub partial: bool,
    pub partial_text: String,
    pub arrangements: bool,
    pub arrangements_text: String,
    pub medley: bool,
    pub medley_text: String,
    /// Keep partial-recording shadow nodes in the shared cache
    pub cache_partial_recordings: bool,
    pub max_retries: u32,
}

impl Default for WorksConfig {
    fn default() -> Self {
        Self {
            include_collections: true,
            proximity: 2,
            end_proximity: 1,
            granularity: 1,
            substring_match: 66,
            removewords: DEFAULT_REMOVEWORDS.to_string(),
            synonyms: DEFAULT_SYNONYMS.to_string(),
            replacements: String::new(),
            connectives: DEFAULT_CONNECTIVES.iter().map(|s| s.to_string()).collect(),
            style: NameStyle::default(),
            level0_source: Level0Source::default(),
            partial: true,
            partial_text: "(part)".to_string(),
            arrangements: true,
            arrangements_text: "Arrangement:".to_string(),
            medley: true,
            medley_text: "Medley of:".to_string(),
            cache_partial_recordings: false,
            max_retries: 6,
        }
    }
}

impl WorksConfig {
    /// Compile the text rules, collecting rejected entries
    pub fn text_rules(&self) -> (TextRules, Vec<ConfigIssue>) {
        let (synonyms, mut issues) = TextRules::parse_synonyms(&self.synonyms);
        let (replacements, replacement_issues) = TextRules::parse_replacements(&self.replacements);
        issues.extend(replacement_issues);

        let mut removewords = TextRules::parse_removewords(&self.removewords);
        if self.partial && !self.partial_text.trim().is_empty() {
            let partial = self.partial_text.trim().to_lowercase();
            if !removewords.contains(&partial) {
                removewords.push(partial);
            }
        }

        let rules = TextRules {
            synonyms,
            replacements,
            removewords,
            connectives: self.connectives.iter().map(|c| c.to_lowercase()).collect(),
            proximity: self.proximity,
            end_proximity: self.end_proximity,
            granularity: self.granularity,
            substring_match: self.substring_match.min(100),
        };
        (rules, issues)
    }
}

/// MusicBrainz web service settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MusicBrainzConfig {
    pub base_url: String,
    /// Overrides the standard opus user agent
    pub user_agent: Option<String>,
    /// Bearer token; enables the authenticated request variant
    pub token: Option<String>,
    pub requests_per_second: u32,
    pub timeout_secs: u64,
}

impl Default for MusicBrainzConfig {
    fn default() -> Self {
        Self {
            base_url: "https://musicbrainz.org/ws/2".to_string(),
            user_agent: None,
            token: None,
            requests_per_second: 1,
            timeout_secs: 15,
        }
    }
}

/// Top-level TOML document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub logging: LoggingConfig,
    pub works: WorksConfig,
    pub musicbrainz: MusicBrainzConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorksConfig::default();
        assert_eq!(config.proximity, 2);
        assert_eq!(config.end_proximity, 1);
        assert_eq!(config.substring_match, 66);
        assert_eq!(config.max_retries, 6);
        assert!(config.include_collections);
        assert_eq!(config.style, NameStyle::Extended);
    }

    #[test]
    fn test_partial_text_becomes_removeword() {
        let (rules, issues) = WorksConfig::default().text_rules();
        assert!(issues.is_empty());
        assert!(rules.removewords.contains(&"(part)".to_string()));
        assert_eq!(rules.synonyms.len(), 4);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: TomlConfig = opus_common::config::parse_toml_config(
            r#"
            [works]
            proximity = 3
            style = "titles"
            synonyms = "(Aria, Arie) / (bad entry)"

            [musicbrainz]
            token = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(config.works.proximity, 3);
        assert_eq!(config.works.end_proximity, 1);
        assert_eq!(config.works.style, NameStyle::Titles);
        assert_eq!(config.musicbrainz.token.as_deref(), Some("secret"));
        assert_eq!(config.logging.level, "info");

        let (rules, issues) = config.works.text_rules();
        assert_eq!(rules.synonyms.len(), 1);
        assert_eq!(issues.len(), 1);
    }
}
