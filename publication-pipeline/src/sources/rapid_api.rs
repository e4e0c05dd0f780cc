use crate::config::{HttpMethod, RapidApiSourceConfig};
use crate::fetcher::{Fetcher, Gated};
use crate::rate_gate::RateGate;
use crate::traits::{deliver, MaterialSink, SourcePoller, SOURCE_SCHEMA_PREFIX};
use crate::types::{Material, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Follow a dotted path such as `"image.url"` into a JSON value.
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, key| current.get(key))
}

fn lookup_str(value: &Value, path: &str) -> Option<String> {
    lookup(value, path)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Topic search against a RapidAPI-hosted endpoint, scraping each hit's page
/// when the API does not return article text itself.
pub struct RapidApiSource {
    name: String,
    config: RapidApiSourceConfig,
    api_key: String,
    minimum_length: usize,
    fetcher: Arc<Fetcher>,
    gate: RateGate,
}

impl RapidApiSource {
    pub fn new(
        name: impl Into<String>,
        config: RapidApiSourceConfig,
        api_key: impl Into<String>,
        fetcher: Arc<Fetcher>,
        gate: RateGate,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            api_key: api_key.into(),
            minimum_length: 0,
            fetcher,
            gate,
        }
    }

    pub fn with_minimum_length(mut self, minimum_length: usize) -> Self {
        self.minimum_length = minimum_length;
        self
    }

    async fn search(&self, topic: &str, page: u32) -> Result<Gated<Value>> {
        let config = &self.config;
        debug!("Searching {} for {:?} (page {})", self.name, topic, page);

        self.fetcher
            .fetch_json(&self.gate, &config.url, |client| {
                let request = match config.method {
                    HttpMethod::Get => client.get(&config.url).query(&[
                        (config.query_param.as_str(), topic.to_string()),
                        (config.page_param.as_str(), page.to_string()),
                    ]),
                    HttpMethod::Post => client.post(&config.url).json(&serde_json::json!({
                        config.query_param.as_str(): topic,
                        config.page_param.as_str(): page,
                    })),
                };
                request
                    .header("x-rapidapi-key", &self.api_key)
                    .header("x-rapidapi-host", &config.host)
            })
            .await
    }

    /// Build a material from one search hit. Content comes from the inline
    /// field when present, otherwise from the linked page.
    async fn to_material(&self, result: &Value) -> Result<Gated<Option<Material>>> {
        let fields = &self.config.fields;
        let Some(title) = lookup_str(result, &fields.title) else {
            return Ok(Gated::Ready(None));
        };
        let link = lookup_str(result, &fields.link);
        let summary = fields.summary.as_deref().and_then(|path| lookup_str(result, path));

        let inline = fields.content.as_deref().and_then(|path| lookup_str(result, path));
        let content = match (inline, &link) {
            (Some(content), _) => content,
            (None, Some(link)) => match self.fetcher.fetch_page_text(&self.gate, link).await {
                Ok(Gated::Ready(text)) => text,
                Ok(Gated::LimitReached) => return Ok(Gated::LimitReached),
                Err(e) => {
                    warn!("Failed to scrape {} for {}: {}", link, self.name, e);
                    String::new()
                }
            },
            (None, None) => String::new(),
        };

        let mut material = Material::new(&self.name, title, content);
        material.link = link;
        material.summary = summary;

        if self.config.download_images {
            if let Some(image_url) = fields.image.as_deref().and_then(|path| lookup_str(result, path)) {
                match self.fetcher.fetch_bytes(&self.gate, &image_url).await {
                    Ok(Gated::Ready(bytes)) => material.image = Some(bytes),
                    Ok(Gated::LimitReached) => return Ok(Gated::LimitReached),
                    Err(e) => warn!("Failed to download image {} for {}: {}", image_url, self.name, e),
                }
            }
        }

        Ok(Gated::Ready(Some(material)))
    }
}

#[async_trait]
impl SourcePoller for RapidApiSource {
    fn source_name(&self) -> String {
        self.name.clone()
    }

    fn config_schema_name(&self) -> String {
        format!("{}-rapid-{}", SOURCE_SCHEMA_PREFIX, self.name)
    }

    fn rate_gate(&self) -> &RateGate {
        &self.gate
    }

    async fn poll(&self, cancel: &CancellationToken, sink: &dyn MaterialSink) -> Result<usize> {
        let mut delivered = 0;

        for topic in &self.config.topics {
            for page in 1..=self.config.max_pages {
                if cancel.is_cancelled() {
                    info!("{} cancelled after {} items", self.name, delivered);
                    return Ok(delivered);
                }

                let response = match self.search(topic, page).await {
                    Ok(Gated::Ready(response)) => response,
                    Ok(Gated::LimitReached) => {
                        info!("Limit reached for {}; stopping with {} items", self.name, delivered);
                        return Ok(delivered);
                    }
                    Err(e) => {
                        warn!("Search for {:?} on {} failed: {}", topic, self.name, e);
                        break;
                    }
                };

                let results = lookup(&response, &self.config.fields.results)
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                if results.is_empty() {
                    debug!("No more results for {:?} on {}", topic, self.name);
                    break;
                }

                for result in results.iter().take(self.config.max_results as usize) {
                    if cancel.is_cancelled() {
                        info!("{} cancelled after {} items", self.name, delivered);
                        return Ok(delivered);
                    }
                    match self.to_material(result).await? {
                        Gated::Ready(Some(material)) => {
                            if deliver(sink, material, self.minimum_length).await.is_accepted() {
                                delivered += 1;
                            }
                        }
                        Gated::Ready(None) => debug!("Skipping untitled result from {}", self.name),
                        Gated::LimitReached => {
                            info!("Limit reached for {}; stopping with {} items", self.name, delivered);
                            return Ok(delivered);
                        }
                    }
                }
            }
        }

        info!("Delivered {} items from {}", delivered, self.name);
        Ok(delivered)
    }
}
