use crate::fetcher::{Fetcher, Gated};
use crate::parser::FeedParser;
use crate::rate_gate::RateGate;
use crate::traits::{deliver, MaterialSink, SourcePoller};
use crate::types::{PipelineError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Default)]
struct FeedCache {
    etag: Option<String>,
    last_modified: Option<String>,
}

/// RSS/Atom feed source
pub struct RssFeedSource {
    name: String,
    url: String,
    minimum_length: usize,
    fetch_full_content: bool,
    fetcher: Arc<Fetcher>,
    gate: RateGate,
    parser: Mutex<FeedParser>,
    cache: Mutex<FeedCache>,
}

impl RssFeedSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, fetcher: Arc<Fetcher>, gate: RateGate) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            minimum_length: 0,
            fetch_full_content: false,
            fetcher,
            gate,
            parser: Mutex::new(FeedParser::new()),
            cache: Mutex::new(FeedCache::default()),
        }
    }

    pub fn with_minimum_length(mut self, minimum_length: usize) -> Self {
        self.minimum_length = minimum_length;
        self
    }

    pub fn with_full_content(mut self, fetch_full_content: bool) -> Self {
        self.fetch_full_content = fetch_full_content;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SourcePoller for RssFeedSource {
    fn source_name(&self) -> String {
        self.name.clone()
    }

    fn rate_gate(&self) -> &RateGate {
        &self.gate
    }

    async fn poll(&self, cancel: &CancellationToken, sink: &dyn MaterialSink) -> Result<usize> {
        info!("Pulling feed {}: {}", self.name, self.url);

        let (etag, last_modified) = {
            let cache = self.cache.lock().await;
            (cache.etag.clone(), cache.last_modified.clone())
        };
        let document = match self
            .fetcher
            .fetch_document(&self.gate, &self.url, etag.as_deref(), last_modified.as_deref())
            .await?
        {
            Gated::Ready(document) => document,
            Gated::LimitReached => return Ok(0),
        };

        let Some(body) = document.body else {
            debug!("Feed {} not modified since last poll", self.name);
            return Ok(0);
        };
        if !FeedParser::is_valid_feed_content(&body) {
            return Err(PipelineError::Parse(format!("{} did not return an RSS/Atom document", self.url)));
        }

        let parsed = self.parser.lock().await.parse_feed(&body)?;

        // Entries are only marked seen once handled, so anything left over is
        // offered again by the next poll.
        let mut delivered = 0;
        let mut outstanding = parsed.entries.len();
        for entry in &parsed.entries {
            if cancel.is_cancelled() {
                info!("Feed {} cancelled after {} items", self.name, delivered);
                break;
            }

            let mut material = FeedParser::to_material(entry, &self.name);
            if self.fetch_full_content {
                match self.fetcher.fetch_page_text(&self.gate, &entry.url).await {
                    Ok(Gated::Ready(text)) if !text.is_empty() => material.content = text,
                    Ok(Gated::Ready(_)) => {}
                    Ok(Gated::LimitReached) => {
                        info!("Limit reached for {}; stopping with {} items", self.name, delivered);
                        break;
                    }
                    Err(e) => warn!("Failed to scrape {} for {}: {}", entry.url, self.name, e),
                }
            }

            let outcome = deliver(sink, material, self.minimum_length).await;
            if outcome.is_accepted() {
                delivered += 1;
            }
            if outcome.is_settled() {
                self.parser.lock().await.mark_seen(entry);
                outstanding -= 1;
            }
        }

        // A conditional request may only skip the document once every entry in it
        // has been handled.
        if outstanding == 0 {
            let mut cache = self.cache.lock().await;
            cache.etag = document.etag;
            cache.last_modified = document.last_modified;
        }

        info!("Delivered {} items from feed {}", delivered, self.name);
        Ok(delivered)
    }
}
