//! Background-tab searches: open a page, wait for its containers, read a fixed
//! set of facts, close the tab.

pub mod button;
pub mod memory;
pub mod testing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::core::config::SearchConfig;
use crate::core::session::SessionTornDown;
use crate::dom::DomHost;

pub use button::{ButtonSearch, SearchPlan, SearchReport};
pub use memory::{SnapshotTab, SnapshotTabHost};
pub use testing::{TestingReport, TestingSearch};

#[derive(Debug, Error)]
pub enum TabError {
    #[error("no browser available: {0}")]
    Unavailable(String),
    #[error("failed to open {url}: {reason}")]
    Navigation { url: String, reason: String },
    #[error("page script failed: {0}")]
    Script(String),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Tab(#[from] TabError),
    #[error(transparent)]
    Cancelled(#[from] SessionTornDown),
    #[error("driver license is empty")]
    EmptyLicense,
}

/// A page opened in the background. Queried like any other DOM host.
#[async_trait]
pub trait BackgroundTab: DomHost {
    /// Type `value` into the first `input_selector` match and click the first
    /// `button_selector` match. `false` when either element is missing.
    async fn submit(&self, input_selector: &str, value: &str, button_selector: &str) -> Result<bool, TabError>;

    async fn close(&self) -> Result<(), TabError>;
}

#[async_trait]
pub trait TabHost: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn BackgroundTab>, TabError>;
}

/// One report block of the button search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Preset {
    Tags,
    Profession,
    /// Custom tag set by number.
    CustomTags(usize),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown preset '{0}' (expected tags, profession or custom_tags:N)")]
pub struct PresetParseError(String);

impl FromStr for Preset {
    type Err = PresetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "tags" => Ok(Preset::Tags),
            "profession" => Ok(Preset::Profession),
            _ => s
                .strip_prefix("custom_tags:")
                .and_then(|n| n.trim().parse().ok())
                .map(Preset::CustomTags)
                .ok_or_else(|| PresetParseError(s.to_string())),
        }
    }
}

impl TryFrom<String> for Preset {
    type Error = PresetParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Preset> for String {
    fn from(value: Preset) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preset::Tags => f.write_str("tags"),
            Preset::Profession => f.write_str("profession"),
            Preset::CustomTags(n) => write!(f, "custom_tags:{n}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub poll_interval: Duration,
    pub tag_attempts: u32,
    pub profession_attempts: u32,
    pub settle: Duration,
    pub close_delay: Duration,
    pub presets: Vec<Preset>,
    pub custom_tags: BTreeMap<usize, Vec<String>>,
    pub search_driver_info: bool,
    pub testing_url: String,
    pub testing_poll: Duration,
    pub testing_attempts: u32,
}

impl SearchSettings {
    pub fn from_config(cfg: &SearchConfig) -> Self {
        let presets = cfg
            .resolve_presets()
            .iter()
            .filter_map(|p| match p.parse() {
                Ok(preset) => Some(preset),
                Err(e) => {
                    tracing::warn!("search config: {}", e);
                    None
                }
            })
            .collect();

        Self {
            poll_interval: cfg.resolve_poll_interval(),
            tag_attempts: cfg.resolve_tag_attempts(),
            profession_attempts: cfg.resolve_profession_attempts(),
            settle: cfg.resolve_settle(),
            close_delay: cfg.resolve_close_delay(),
            presets,
            custom_tags: cfg.resolve_custom_tags(),
            search_driver_info: cfg.resolve_search_driver_info(),
            testing_url: cfg.resolve_testing_url(),
            testing_poll: cfg.resolve_testing_poll(),
            testing_attempts: cfg.resolve_testing_attempts(),
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self::from_config(&SearchConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_parse_and_print() {
        assert_eq!("tags".parse::<Preset>(), Ok(Preset::Tags));
        assert_eq!(" profession ".parse::<Preset>(), Ok(Preset::Profession));
        assert_eq!("custom_tags:3".parse::<Preset>(), Ok(Preset::CustomTags(3)));
        assert!("custom_tags:x".parse::<Preset>().is_err());
        assert!("colors".parse::<Preset>().is_err());
        assert_eq!(Preset::CustomTags(2).to_string(), "custom_tags:2");
    }

    #[test]
    fn presets_deserialize_from_strings() {
        let presets: Vec<Preset> = serde_json::from_str(r#"["custom_tags:1", "tags"]"#).unwrap();
        assert_eq!(presets, vec![Preset::CustomTags(1), Preset::Tags]);
        assert!(serde_json::from_str::<Vec<Preset>>(r#"["nope"]"#).is_err());
    }

    #[test]
    fn defaults_match_the_search_page_timings() {
        let s = SearchSettings::default();
        assert_eq!(s.poll_interval, Duration::from_millis(90));
        assert_eq!(s.tag_attempts, 27);
        assert_eq!(s.settle, Duration::from_millis(450));
        assert_eq!(
            s.presets,
            vec![Preset::Tags, Preset::Profession, Preset::CustomTags(1)]
        );
        assert!(s.search_driver_info);
    }

    #[test]
    fn bad_presets_are_skipped_and_custom_tags_capped() {
        let cfg: SearchConfig = serde_json::from_str(
            r#"{ "presets": ["tags", "bogus"], "custom_tags": { "1": ["a","b","c","d","e"], "x": ["z"] } }"#,
        )
        .unwrap();
        let s = SearchSettings::from_config(&cfg);
        assert_eq!(s.presets, vec![Preset::Tags]);
        assert_eq!(s.custom_tags.len(), 1);
        assert_eq!(s.custom_tags[&1].len(), 4);
    }
}
