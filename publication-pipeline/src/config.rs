use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::rate_gate::RateGateConfig;
use crate::rss_utils::url::is_valid_http_url;
use crate::types::{FetchConfig, PipelineError, Result};

const DAY_SECS: u64 = 24 * 60 * 60;

fn default_true() -> bool {
    true
}

fn secs(value: u64) -> TimeDelta {
    TimeDelta::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default = "PipelineConfig::default_database_url")]
    pub database_url: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub drafting: DraftingConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl PipelineConfig {
    fn default_database_url() -> String {
        "sqlite://publications.db".to_string()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: PipelineConfig =
            serde_json::from_str(raw).map_err(|e| PipelineError::Config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(PipelineError::Config("database_url must not be empty".into()));
        }
        self.scheduler.validate()?;
        self.drafting.validate()?;

        let mut names = HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !names.insert(source.name.as_str()) {
                return Err(PipelineError::Config(format!("duplicate source name {}", source.name)));
            }
        }
        Ok(())
    }

    pub fn active_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|source| source.active)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Minimum spacing between two scheduler runs over all sources.
    pub execution_period_secs: u64,
    pub tick_interval_secs: u64,
    /// How long a cancelled tick waits for in-flight pollers.
    pub shutdown_grace_secs: u64,
    /// Re-read the config file this often. `None` disables reloading.
    pub reload_interval_secs: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            execution_period_secs: DAY_SECS,
            tick_interval_secs: 60,
            shutdown_grace_secs: 30,
            reload_interval_secs: None,
        }
    }
}

impl SchedulerConfig {
    pub fn execution_period(&self) -> TimeDelta {
        secs(self.execution_period_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn reload_interval(&self) -> Option<Duration> {
        self.reload_interval_secs.map(Duration::from_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.execution_period_secs == 0 {
            return Err(PipelineError::Config("scheduler.execution_period_secs must be positive".into()));
        }
        if self.tick_interval_secs == 0 {
            return Err(PipelineError::Config("scheduler.tick_interval_secs must be positive".into()));
        }
        if self.reload_interval_secs == Some(0) {
            return Err(PipelineError::Config("scheduler.reload_interval_secs must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DraftingConfig {
    pub active: bool,
    pub cycle_sleep_secs: u64,
    /// Chat-completion endpoint. Without it drafts use the baseline service.
    pub service: Option<DraftingServiceConfig>,
}

impl Default for DraftingConfig {
    fn default() -> Self {
        Self {
            active: true,
            cycle_sleep_secs: 5,
            service: None,
        }
    }
}

impl DraftingConfig {
    pub fn cycle_sleep(&self) -> Duration {
        Duration::from_secs(self.cycle_sleep_secs)
    }

    fn validate(&self) -> Result<()> {
        if let Some(service) = &self.service {
            if !is_valid_http_url(&service.base_url) {
                return Err(PipelineError::Config(format!("drafting.service.base_url {} is not an http(s) URL", service.base_url)));
            }
            if service.model.trim().is_empty() {
                return Err(PipelineError::Config("drafting.service.model must not be empty".into()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DraftingServiceConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default = "DraftingServiceConfig::default_api_key_secret")]
    pub api_key_secret: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "DraftingServiceConfig::default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "DraftingServiceConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl DraftingServiceConfig {
    fn default_api_key_secret() -> String {
        "OPENAI_API_KEY".to_string()
    }

    fn default_max_tokens() -> u32 {
        800
    }

    fn default_timeout_secs() -> u64 {
        60
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GateSettings {
    pub limit: Option<u32>,
    pub request_period_secs: u64,
    pub execution_period_secs: u64,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            limit: None,
            request_period_secs: 30 * DAY_SECS,
            execution_period_secs: DAY_SECS,
        }
    }
}

impl GateSettings {
    pub fn to_gate_config(&self) -> RateGateConfig {
        RateGateConfig {
            limit: self.limit,
            request_period: secs(self.request_period_secs),
            execution_period: secs(self.execution_period_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub minimum_length: usize,
    #[serde(default)]
    pub gate: GateSettings,
    pub kind: SourceKind,
}

impl SourceConfig {
    fn validate(&self) -> Result<()> {
        let invalid = |reason: String| PipelineError::Config(format!("source {:?}: {}", self.name, reason));

        if self.name.trim().is_empty() || self.name.chars().any(char::is_whitespace) {
            return Err(invalid("name must be non-empty and contain no whitespace".into()));
        }
        if self.gate.request_period_secs == 0 {
            return Err(invalid("gate.request_period_secs must be positive".into()));
        }
        if self.gate.execution_period_secs == 0 {
            return Err(invalid("gate.execution_period_secs must be positive".into()));
        }
        match &self.kind {
            SourceKind::Feed(feed) => {
                if !is_valid_http_url(&feed.url) {
                    return Err(invalid(format!("{} is not an http(s) URL", feed.url)));
                }
            }
            SourceKind::RapidApi(api) => {
                if !is_valid_http_url(&api.url) {
                    return Err(invalid(format!("{} is not an http(s) URL", api.url)));
                }
                if api.topics.is_empty() {
                    return Err(invalid("rapid_api sources need at least one topic".into()));
                }
                if api.max_pages == 0 {
                    return Err(invalid("max_pages must be positive".into()));
                }
            }
            SourceKind::FileDrop(drop) => {
                if drop.input_dir == drop.output_dir {
                    return Err(invalid("input_dir and output_dir must differ".into()));
                }
                if drop.extensions.is_empty() {
                    return Err(invalid("file_drop sources need at least one extension".into()));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    Feed(FeedSourceConfig),
    RapidApi(RapidApiSourceConfig),
    FileDrop(FileDropSourceConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedSourceConfig {
    pub url: String,
    /// Scrape each entry's page instead of relying on the feed body.
    #[serde(default)]
    pub fetch_full_content: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RapidApiSourceConfig {
    pub url: String,
    pub host: String,
    #[serde(default = "RapidApiSourceConfig::default_api_key_secret")]
    pub api_key_secret: String,
    #[serde(default)]
    pub method: HttpMethod,
    pub topics: Vec<String>,
    #[serde(default = "RapidApiSourceConfig::default_query_param")]
    pub query_param: String,
    #[serde(default = "RapidApiSourceConfig::default_page_param")]
    pub page_param: String,
    #[serde(default = "RapidApiSourceConfig::default_max_results")]
    pub max_results: u32,
    #[serde(default = "RapidApiSourceConfig::default_max_pages")]
    pub max_pages: u32,
    #[serde(default)]
    pub fields: ResultFields,
    #[serde(default)]
    pub download_images: bool,
}

impl RapidApiSourceConfig {
    fn default_api_key_secret() -> String {
        "RAPID_API_KEY".to_string()
    }

    fn default_query_param() -> String {
        "query".to_string()
    }

    fn default_page_param() -> String {
        "page".to_string()
    }

    fn default_max_results() -> u32 {
        25
    }

    fn default_max_pages() -> u32 {
        1
    }
}

/// Where to find things in a search response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResultFields {
    pub results: String,
    pub title: String,
    pub link: String,
    pub summary: Option<String>,
    /// Inline article text. When absent or empty the link is scraped.
    pub content: Option<String>,
    pub image: Option<String>,
}

impl Default for ResultFields {
    fn default() -> Self {
        Self {
            results: "news".to_string(),
            title: "title".to_string(),
            link: "url".to_string(),
            summary: Some("body".to_string()),
            content: None,
            image: Some("image".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileDropSourceConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default = "FileDropSourceConfig::default_extensions")]
    pub extensions: Vec<String>,
}

impl FileDropSourceConfig {
    fn default_extensions() -> Vec<String> {
        vec!["txt".to_string(), "md".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "database_url": "sqlite://test.db",
        "scheduler": { "execution_period_secs": 3600, "tick_interval_secs": 30 },
        "drafting": {
            "cycle_sleep_secs": 5,
            "service": { "base_url": "https://api.openai.com/v1", "model": "gpt-4o-mini" }
        },
        "sources": [
            {
                "name": "hacker-news",
                "minimum_length": 200,
                "kind": { "type": "feed", "url": "https://news.ycombinator.com/rss", "fetch_full_content": true }
            },
            {
                "name": "google-news",
                "gate": { "limit": 100, "request_period_secs": 2592000, "execution_period_secs": 86400 },
                "kind": {
                    "type": "rapid_api",
                    "url": "https://google-news13.p.rapidapi.com/search",
                    "host": "google-news13.p.rapidapi.com",
                    "topics": ["rust", "databases"],
                    "query_param": "keyword"
                }
            },
            {
                "name": "manual",
                "minimum_length": 50,
                "kind": { "type": "file_drop", "input_dir": "/srv/in", "output_dir": "/srv/done" }
            }
        ]
    }"#;

    #[test]
    fn test_parse_sample_config() {
        let config = PipelineConfig::from_json(SAMPLE).unwrap();
        assert_eq!(config.sources.len(), 3);
        assert_eq!(config.scheduler.execution_period(), TimeDelta::hours(1));
        assert_eq!(config.scheduler.shutdown_grace_secs, 30);
        assert_eq!(config.fetch, FetchConfig::default());

        let google = &config.sources[1];
        assert_eq!(google.gate.to_gate_config().limit, Some(100));
        match &google.kind {
            SourceKind::RapidApi(api) => {
                assert_eq!(api.api_key_secret, "RAPID_API_KEY");
                assert_eq!(api.max_results, 25);
                assert_eq!(api.method, HttpMethod::Get);
                assert_eq!(api.fields.results, "news");
            }
            other => panic!("unexpected kind {:?}", other),
        }

        let drafting = config.drafting.service.as_ref().unwrap();
        assert_eq!(drafting.api_key_secret, "OPENAI_API_KEY");
        assert_eq!(config.active_sources().count(), 3);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let raw = r#"{ "sources": [], "scheduler": { "tick_interval_secs": 5, "sleep_time": 1 } }"#;
        assert!(matches!(PipelineConfig::from_json(raw), Err(PipelineError::Config(_))));

        let raw = r#"{ "sources": [ { "name": "x", "kind": { "type": "feed", "url": "https://a.b/rss", "colour": 1 } } ] }"#;
        assert!(PipelineConfig::from_json(raw).is_err());
    }

    #[test]
    fn test_validation_failures() {
        let duplicate = r#"{ "sources": [
            { "name": "a", "kind": { "type": "feed", "url": "https://a.b/rss" } },
            { "name": "a", "kind": { "type": "feed", "url": "https://c.d/rss" } }
        ] }"#;
        assert!(PipelineConfig::from_json(duplicate).is_err());

        let no_topics = r#"{ "sources": [
            { "name": "api", "kind": { "type": "rapid_api", "url": "https://x.p.rapidapi.com", "host": "x", "topics": [] } }
        ] }"#;
        assert!(PipelineConfig::from_json(no_topics).is_err());

        let bad_url = r#"{ "sources": [ { "name": "a", "kind": { "type": "feed", "url": "file:///etc/passwd" } } ] }"#;
        assert!(PipelineConfig::from_json(bad_url).is_err());

        let zero_global_period = r#"{ "scheduler": { "execution_period_secs": 0 } }"#;
        assert!(matches!(PipelineConfig::from_json(zero_global_period), Err(PipelineError::Config(_))));

        let zero_source_period = r#"{ "sources": [
            { "name": "a", "gate": { "execution_period_secs": 0 }, "kind": { "type": "feed", "url": "https://a.b/rss" } }
        ] }"#;
        assert!(matches!(PipelineConfig::from_json(zero_source_period), Err(PipelineError::Config(_))));

        assert!(PipelineConfig::from_json("{}").is_ok());
    }
}
