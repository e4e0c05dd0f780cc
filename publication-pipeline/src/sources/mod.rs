pub mod file_drop;
pub mod queue_drain;
pub mod rapid_api;
pub mod rss_feed;

pub use file_drop::{ExtractedDocument, FileDropSource, PlainTextExtractor, TextExtractor};
pub use queue_drain::QueueDrainSource;
pub use rapid_api::RapidApiSource;
pub use rss_feed::RssFeedSource;

use crate::clock::Clock;
use crate::config::{SourceConfig, SourceKind};
use crate::fetcher::Fetcher;
use crate::rate_gate::RateGate;
use crate::secrets::require_secret;
use crate::traits::{SourcePoller, SOURCE_SCHEMA_PREFIX};
use crate::types::Result;
use interfaces::SecretStore;
use std::sync::Arc;
use tracing::info;

/// Build the poller described by `config`. Missing credentials are fatal.
pub async fn build_source(
    config: &SourceConfig,
    fetcher: Arc<Fetcher>,
    secrets: &dyn SecretStore,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn SourcePoller>> {
    let gate_config = config.gate.to_gate_config();
    let source: Arc<dyn SourcePoller> = match &config.kind {
        SourceKind::Feed(feed) => {
            let gate = RateGate::new(format!("{}-{}", SOURCE_SCHEMA_PREFIX, config.name), gate_config, clock);
            Arc::new(
                RssFeedSource::new(&config.name, &feed.url, fetcher, gate)
                    .with_minimum_length(config.minimum_length)
                    .with_full_content(feed.fetch_full_content),
            )
        }
        SourceKind::RapidApi(api) => {
            let api_key = require_secret(secrets, &api.api_key_secret).await?;
            let gate = RateGate::new(format!("{}-rapid-{}", SOURCE_SCHEMA_PREFIX, config.name), gate_config, clock);
            Arc::new(
                RapidApiSource::new(&config.name, api.clone(), api_key, fetcher, gate)
                    .with_minimum_length(config.minimum_length),
            )
        }
        SourceKind::FileDrop(drop) => {
            let gate = RateGate::new(format!("{}-{}", SOURCE_SCHEMA_PREFIX, config.name), gate_config, clock);
            Arc::new(
                FileDropSource::new(&config.name, drop.input_dir.clone(), drop.output_dir.clone(), gate)
                    .with_extensions(drop.extensions.clone())
                    .with_minimum_length(config.minimum_length),
            )
        }
    };
    info!("Configured source {} ({})", config.name, source.config_schema_name());
    Ok(source)
}

/// Build every active source in `configs`, failing on the first error.
pub async fn build_sources(
    configs: &[SourceConfig],
    fetcher: Arc<Fetcher>,
    secrets: &dyn SecretStore,
    clock: Arc<dyn Clock>,
) -> Result<Vec<Arc<dyn SourcePoller>>> {
    let mut sources = Vec::new();
    for config in configs.iter().filter(|config| config.active) {
        sources.push(build_source(config, fetcher.clone(), secrets, clock.clone()).await?);
    }
    Ok(sources)
}
