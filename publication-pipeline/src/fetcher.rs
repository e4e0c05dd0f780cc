use crate::rate_gate::RateGate;
use crate::rss_utils::feed::extract_text_from_html;
use crate::types::{FetchConfig, PipelineError, Result};
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Outcome of a call that had to pass a [`RateGate`] first.
#[derive(Debug)]
pub enum Gated<T> {
    Ready(T),
    LimitReached,
}

#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// `None` on 304 Not Modified.
    pub body: Option<String>,
    pub status: u16,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub response_time_ms: u64,
}

/// Shared HTTP client. Every attempt, retries included, takes one request
/// from the caller's rate gate.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn backoff(&self) -> ExponentialBackoff<backoff::SystemClock> {
        ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 32),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(self.config.retry_delay_seconds * 60)),
            ..Default::default()
        }
    }

    fn is_retryable(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    /// Send the request produced by `build`, retrying transport failures, 429
    /// and 5xx with exponential backoff. Returns the final response, which may
    /// still be a non-success status.
    pub async fn execute<F>(&self, gate: &RateGate, url: &str, build: F) -> Result<Gated<Response>>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut backoff = self.backoff();
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if !gate.try_acquire().await {
                return Ok(Gated::LimitReached);
            }

            match build(&self.client).send().await {
                Ok(response) => {
                    let status = response.status();
                    if !Self::is_retryable(status) {
                        return Ok(Gated::Ready(response));
                    }
                    last_error = Some(PipelineError::HttpStatus { status: status.as_u16(), url: url.to_string() });
                    if attempt == self.config.max_retries {
                        return Ok(Gated::Ready(response));
                    }
                }
                Err(e) => {
                    last_error = Some(PipelineError::Http(e));
                }
            }

            if attempt < self.config.max_retries {
                if let Some(delay) = backoff.next_backoff() {
                    warn!("Attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }
            break;
        }

        error!("Failed to fetch {} after {} attempts", url, self.config.max_retries + 1);
        Err(last_error.unwrap_or_else(|| PipelineError::General(format!("Request to {} failed", url))))
    }

    fn ensure_success(response: &Response, url: &str) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(PipelineError::HttpStatus { status: status.as_u16(), url: url.to_string() })
        }
    }

    fn ensure_size(&self, response: &Response) -> Result<()> {
        if let Some(content_length) = response.content_length() {
            let size_mb = content_length as usize / (1024 * 1024);
            if size_mb > self.config.max_body_size_mb {
                return Err(PipelineError::BodyTooLarge { size_mb });
            }
        }
        Ok(())
    }

    /// Conditional GET used for feeds.
    pub async fn fetch_document(
        &self,
        gate: &RateGate,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<Gated<FetchedDocument>> {
        let start_time = Instant::now();
        debug!("Fetching document: {}", url);

        let response = match self
            .execute(gate, url, |client| {
                let mut request = client.get(url);
                if let Some(etag) = etag {
                    request = request.header("If-None-Match", etag);
                }
                if let Some(last_modified) = last_modified {
                    request = request.header("If-Modified-Since", last_modified);
                }
                request
            })
            .await?
        {
            Gated::Ready(response) => response,
            Gated::LimitReached => return Ok(Gated::LimitReached),
        };

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            debug!("Document not modified: {}", url);
            return Ok(Gated::Ready(FetchedDocument {
                body: None,
                status: status.as_u16(),
                etag: etag.map(|s| s.to_string()),
                last_modified: last_modified.map(|s| s.to_string()),
                response_time_ms: start_time.elapsed().as_millis() as u64,
            }));
        }
        Self::ensure_success(&response, url)?;
        self.ensure_size(&response)?;

        // Extract headers for caching
        let new_etag = header_value(&response, "etag");
        let new_last_modified = header_value(&response, "last-modified");

        let body = response.text().await?;
        info!("Successfully fetched {} ({} bytes)", url, body.len());
        Ok(Gated::Ready(FetchedDocument {
            body: Some(body),
            status: status.as_u16(),
            etag: new_etag,
            last_modified: new_last_modified,
            response_time_ms: start_time.elapsed().as_millis() as u64,
        }))
    }

    /// GET a web page and reduce it to plain text.
    pub async fn fetch_page_text(&self, gate: &RateGate, url: &str) -> Result<Gated<String>> {
        debug!("Fetching full content from: {}", url);
        let response = match self.execute(gate, url, |client| client.get(url)).await? {
            Gated::Ready(response) => response,
            Gated::LimitReached => return Ok(Gated::LimitReached),
        };
        Self::ensure_success(&response, url)?;
        self.ensure_size(&response)?;

        let html = response.text().await?;
        Ok(Gated::Ready(extract_text_from_html(&html)))
    }

    pub async fn fetch_json<F>(&self, gate: &RateGate, url: &str, build: F) -> Result<Gated<serde_json::Value>>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let response = match self.execute(gate, url, build).await? {
            Gated::Ready(response) => response,
            Gated::LimitReached => return Ok(Gated::LimitReached),
        };
        Self::ensure_success(&response, url)?;
        self.ensure_size(&response)?;
        Ok(Gated::Ready(response.json().await?))
    }

    pub async fn fetch_bytes(&self, gate: &RateGate, url: &str) -> Result<Gated<Vec<u8>>> {
        let response = match self.execute(gate, url, |client| client.get(url)).await? {
            Gated::Ready(response) => response,
            Gated::LimitReached => return Ok(Gated::LimitReached),
        };
        Self::ensure_success(&response, url)?;
        self.ensure_size(&response)?;
        Ok(Gated::Ready(response.bytes().await?.to_vec()))
    }
}

fn header_value(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}
