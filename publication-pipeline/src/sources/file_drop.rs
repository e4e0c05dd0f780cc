use crate::rate_gate::RateGate;
use crate::rss_utils::feed::{extract_text_from_html, first_line_title};
use crate::traits::{deliver, MaterialSink, SourcePoller};
use crate::types::{Material, PipelineError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDocument {
    pub title: Option<String>,
    pub text: String,
}

/// Turns a dropped file's bytes into text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path, bytes: &[u8]) -> Result<ExtractedDocument>;
}

/// Plain text and markdown; `.html`/`.htm` files are reduced to visible text.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path, bytes: &[u8]) -> Result<ExtractedDocument> {
        let raw = std::str::from_utf8(bytes)
            .map_err(|e| PipelineError::Parse(format!("{} is not UTF-8 text: {}", path.display(), e)))?;

        let is_html = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"));
        if is_html {
            return Ok(ExtractedDocument { title: None, text: extract_text_from_html(raw) });
        }

        Ok(ExtractedDocument {
            title: first_line_title(raw),
            text: raw.trim().to_string(),
        })
    }
}

/// Picks up documents dropped into a directory and moves each one to the
/// output directory once handled.
pub struct FileDropSource {
    name: String,
    input_dir: PathBuf,
    output_dir: PathBuf,
    extensions: Vec<String>,
    minimum_length: usize,
    extractor: Arc<dyn TextExtractor>,
    gate: RateGate,
}

impl FileDropSource {
    pub fn new(name: impl Into<String>, input_dir: PathBuf, output_dir: PathBuf, gate: RateGate) -> Self {
        Self {
            name: name.into(),
            input_dir,
            output_dir,
            extensions: vec!["txt".to_string(), "md".to_string()],
            minimum_length: 0,
            extractor: Arc::new(PlainTextExtractor),
            gate,
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_minimum_length(mut self, minimum_length: usize) -> Self {
        self.minimum_length = minimum_length;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|wanted| wanted.eq_ignore_ascii_case(ext)))
    }

    async fn pending_files(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.input_dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && self.matches_extension(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    async fn move_to_output(&self, path: &Path) -> Result<()> {
        let Some(file_name) = path.file_name() else {
            return Ok(());
        };
        tokio::fs::create_dir_all(&self.output_dir).await?;
        tokio::fs::rename(path, self.output_dir.join(file_name)).await?;
        debug!("Moved {} to {}", path.display(), self.output_dir.display());
        Ok(())
    }
}

#[async_trait]
impl SourcePoller for FileDropSource {
    fn source_name(&self) -> String {
        self.name.clone()
    }

    fn rate_gate(&self) -> &RateGate {
        &self.gate
    }

    async fn poll(&self, cancel: &CancellationToken, sink: &dyn MaterialSink) -> Result<usize> {
        let files = self.pending_files().await?;
        info!("Found {} files in {}", files.len(), self.input_dir.display());

        let mut delivered = 0;
        for path in files {
            if cancel.is_cancelled() {
                info!("{} cancelled after {} items", self.name, delivered);
                break;
            }
            if !self.gate.try_acquire().await {
                break;
            }

            let document = match tokio::fs::read(&path).await.map_err(PipelineError::from).and_then(|bytes| self.extractor.extract(&path, &bytes)) {
                Ok(document) => document,
                Err(e) => {
                    warn!("Failed to extract {}: {}", path.display(), e);
                    continue;
                }
            };

            let title = document.title.unwrap_or_else(|| {
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().replace(['_', '-'], " "))
                    .unwrap_or_default()
            });
            let material = Material::new(&self.name, title, document.text);
            let outcome = deliver(sink, material, self.minimum_length).await;
            if outcome.is_accepted() {
                delivered += 1;
            }
            if !outcome.is_settled() {
                debug!("Leaving {} in the drop folder for the next poll", path.display());
                continue;
            }

            if let Err(e) = self.move_to_output(&path).await {
                warn!("Failed to move {} out of the drop folder: {}", path.display(), e);
            }
        }

        info!("Delivered {} items from {}", delivered, self.name);
        Ok(delivered)
    }
}
