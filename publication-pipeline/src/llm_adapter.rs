use crate::config::DraftingServiceConfig;
use crate::types::{DraftRequest, Result};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use interfaces::DraftingService;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

const DEFAULT_SYSTEM_PROMPT: &str = "You write short, factual social media posts about technology news. \
Summarise the material in your own words, keep the key facts, and do not invent details.";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// User prompt for one draft: the material plus whatever context we have.
pub fn build_prompt(request: &DraftRequest) -> String {
    let mut prompt = format!("Title: {}\nSource: {}\n", request.title, request.information_source);
    if let Some(link) = &request.link {
        prompt.push_str(&format!("Link: {}\n", link));
    }
    if let Some(summary) = &request.summary {
        prompt.push_str(&format!("Summary: {}\n", summary));
    }
    prompt.push_str(&format!("\nMaterial:\n{}\n", request.material.trim()));
    if let Some(previous) = &request.previous_content {
        prompt.push_str(&format!("\nImprove on this earlier draft:\n{}\n", previous.trim()));
    }
    prompt
}

/// Drafting through an OpenAI-compatible `/chat/completions` endpoint.
pub struct ChatCompletionDraftingService {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    system_prompt: String,
    max_tokens: u32,
}

impl ChatCompletionDraftingService {
    pub fn new(config: &DraftingServiceConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: api_key.into(),
            system_prompt: config.system_prompt.clone().unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl DraftingService for ChatCompletionDraftingService {
    fn service_name(&self) -> String {
        format!("chat-completion ({})", self.model)
    }

    async fn generate(&self, request: &DraftRequest) -> anyhow::Result<String> {
        let prompt = build_prompt(request);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: &self.system_prompt },
                ChatMessage { role: "user", content: &prompt },
            ],
            max_tokens: self.max_tokens,
        };

        debug!("Requesting draft for {} from {}", request.publication_id, self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("drafting request failed")?
            .error_for_status()
            .context("drafting service rejected the request")?;

        let parsed: ChatResponse = response.json().await.context("unreadable drafting response")?;
        parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| anyhow!("drafting response for {} had no content", request.publication_id))
    }
}

/// Drafting service for development and testing
pub struct MockDraftingService {
    name: String,
    response_delay_ms: u64,
    failing_titles: HashSet<String>,
    calls: AtomicUsize,
}

impl MockDraftingService {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response_delay_ms: 0,
            failing_titles: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.response_delay_ms = delay_ms;
        self
    }

    /// Fail every request whose title is `title`.
    pub fn failing_on(mut self, title: impl Into<String>) -> Self {
        self.failing_titles.insert(title.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DraftingService for MockDraftingService {
    fn service_name(&self) -> String {
        format!("mock ({})", self.name)
    }

    async fn generate(&self, request: &DraftRequest) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.response_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.response_delay_ms)).await;
        }
        if self.failing_titles.contains(&request.title) {
            return Err(anyhow!("mock drafting failure for {}", request.title));
        }
        Ok(format!("Draft: {}", request.title))
    }
}
