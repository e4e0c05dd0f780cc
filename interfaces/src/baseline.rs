use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::defs::DraftRequest;
use crate::defs::DraftingService;

const EXCERPT_CHARS: usize = 600;

struct Outline {
    pub headline: String,
    pub lede: Option<String>,
    pub excerpt: String,
}

fn outline(request: &DraftRequest) -> Result<Outline> {
    let headline = request.title.trim();
    if headline.is_empty() {
        bail!("publication {} has no title to draft from", request.publication_id);
    }
    let excerpt = excerpt(&request.material, EXCERPT_CHARS);
    Ok(Outline {
        headline: headline.to_owned(),
        lede: request.summary.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned),
        excerpt,
    })
}

/// First `limit` characters of `text`, cut back to a word boundary.
fn excerpt(text: &str, limit: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= limit {
        return collapsed;
    }
    let cut: String = collapsed.chars().take(limit).collect();
    match cut.rfind(' ') {
        Some(boundary) => format!("{}…", &cut[..boundary]),
        None => format!("{}…", cut),
    }
}

fn compose(outline: &Outline, request: &DraftRequest) -> String {
    let mut parts = vec![outline.headline.clone()];
    if let Some(lede) = &outline.lede {
        parts.push(lede.clone());
    }
    if !outline.excerpt.is_empty() {
        parts.push(outline.excerpt.clone());
    }
    match &request.link {
        Some(link) => parts.push(format!("Source: {} ({})", request.information_source, link)),
        None => parts.push(format!("Source: {}", request.information_source)),
    }
    parts.join("\n\n")
}

/// Deterministic drafting without a model: headline, summary, excerpt and
/// attribution. Used when no drafting endpoint is configured.
pub struct BaselineDraftingService;

#[async_trait]
impl DraftingService for BaselineDraftingService {
    fn service_name(&self) -> String {
        "baseline".to_owned()
    }

    async fn generate(&self, request: &DraftRequest) -> Result<String> {
        let outline = outline(request)?;
        Ok(compose(&outline, request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn request(title: &str, material: &str) -> DraftRequest {
        DraftRequest {
            publication_id: Uuid::new_v4(),
            title: title.to_owned(),
            information_source: "google-news".to_owned(),
            link: Some("https://example.com/a".to_owned()),
            summary: Some("A short summary.".to_owned()),
            material: material.to_owned(),
            previous_content: None,
        }
    }

    #[tokio::test]
    async fn test_baseline_composes_draft() {
        let draft = BaselineDraftingService.generate(&request("Rust 2.0", "Some   body\ntext")).await.unwrap();
        assert!(draft.starts_with("Rust 2.0\n\nA short summary.\n\nSome body text"));
        assert!(draft.ends_with("Source: google-news (https://example.com/a)"));
    }

    #[tokio::test]
    async fn test_baseline_rejects_untitled() {
        assert!(BaselineDraftingService.generate(&request(" ", "body")).await.is_err());
    }

    #[test]
    fn test_excerpt_cuts_on_word_boundary() {
        assert_eq!(excerpt("alpha beta gamma", 12), "alpha beta…");
        assert_eq!(excerpt("short", 12), "short");
    }
}
