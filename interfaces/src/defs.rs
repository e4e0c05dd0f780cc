use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A raw candidate item discovered by a source. It is not yet a publication.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub title: String,
    pub content: String,
    pub summary: Option<String>,
    pub link: Option<String>,
    pub image: Option<Vec<u8>>,
    pub information_source: String,
}

impl Material {
    pub fn new(information_source: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            information_source: information_source.into(),
            ..Default::default()
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_image(mut self, image: Vec<u8>) -> Self {
        self.image = Some(image);
        self
    }

    /// A material is worth persisting only with a title and content strictly
    /// longer than the source's minimum length (counted in characters).
    pub fn is_valid(&self, minimum_length: usize) -> bool {
        !self.title.trim().is_empty() && self.content.chars().count() > minimum_length
    }
}

/// Lifecycle of a publication. Transitions only ever move forward:
/// DRAFT -> PENDING_APPROVAL -> PUBLISHED | DISCARDED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublicationState {
    Draft,
    PendingApproval,
    Published,
    Discarded,
}

impl PublicationState {
    pub const ALL: [PublicationState; 4] = [
        PublicationState::Draft,
        PublicationState::PendingApproval,
        PublicationState::Published,
        PublicationState::Discarded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PublicationState::Draft => "DRAFT",
            PublicationState::PendingApproval => "PENDING_APPROVAL",
            PublicationState::Published => "PUBLISHED",
            PublicationState::Discarded => "DISCARDED",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            PublicationState::Draft => 0,
            PublicationState::PendingApproval => 1,
            PublicationState::Published | PublicationState::Discarded => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    pub fn can_transition_to(&self, next: PublicationState) -> bool {
        self.rank() < next.rank()
    }

    /// States a publication may be in for a move into `self` to be legal.
    pub fn predecessors(&self) -> Vec<PublicationState> {
        Self::ALL
            .into_iter()
            .filter(|state| state.can_transition_to(*self))
            .collect()
    }
}

impl fmt::Display for PublicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown publication state: {0}")]
pub struct UnknownState(pub String);

impl FromStr for PublicationState {
    type Err = UnknownState;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "DRAFT" => Ok(PublicationState::Draft),
            "PENDING_APPROVAL" => Ok(PublicationState::PendingApproval),
            "PUBLISHED" => Ok(PublicationState::Published),
            "DISCARDED" => Ok(PublicationState::Discarded),
            _ => Err(UnknownState(s.to_owned())),
        }
    }
}

/// A persisted item moving through the approval lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub id: Uuid,
    pub title: String,
    pub content: Option<String>,
    pub image: Option<Vec<u8>>,
    pub state: PublicationState,
    pub information_source: String,
    pub link: Option<String>,
    pub summary: Option<String>,
    /// The discovered text the drafting step works from.
    pub material: String,
    pub creation_date: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Insert payload. There is no state field: every publication enters as DRAFT.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewPublication {
    pub title: String,
    pub content: Option<String>,
    pub image: Option<Vec<u8>>,
    pub information_source: String,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub material: String,
}

impl From<Material> for NewPublication {
    fn from(material: Material) -> Self {
        Self {
            title: material.title,
            content: None,
            image: material.image,
            information_source: material.information_source,
            link: material.link,
            summary: material.summary,
            material: material.content,
        }
    }
}

/// What the drafting service sees: a publication without its image bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftRequest {
    pub publication_id: Uuid,
    pub title: String,
    pub information_source: String,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub material: String,
    pub previous_content: Option<String>,
}

impl From<&Publication> for DraftRequest {
    fn from(publication: &Publication) -> Self {
        Self {
            publication_id: publication.id,
            title: publication.title.clone(),
            information_source: publication.information_source.clone(),
            link: publication.link.clone(),
            summary: publication.summary.clone(),
            material: publication.material.clone(),
            previous_content: publication.content.clone(),
        }
    }
}

// Object style note:
// Drafting services and capability stores are shared across long-running
// tasks, so implementations are held behind `Arc<dyn Trait>` and must be
// `Send + Sync`. Keep per-call state on the stack, not in the struct.

#[async_trait]
pub trait DraftingService: Send + Sync {
    fn service_name(&self) -> String;

    /// Produce the publication body for a draft. Errors are transient from
    /// the caller's point of view: the draft stays as it was.
    async fn generate(&self, request: &DraftRequest) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    #[error("{capability} unavailable: {reason}")]
    Unavailable { capability: &'static str, reason: String },

    #[error("{capability} has no entry for {key}")]
    NotFound { capability: &'static str, key: String },
}

impl CapabilityError {
    pub fn unavailable(capability: &'static str, reason: impl Into<String>) -> Self {
        CapabilityError::Unavailable { capability, reason: reason.into() }
    }

    pub fn not_found(capability: &'static str, key: impl Into<String>) -> Self {
        CapabilityError::NotFound { capability, key: key.into() }
    }
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, key: &str) -> std::result::Result<Vec<u8>, CapabilityError>;
    async fn put(&self, key: &str, value: &[u8]) -> std::result::Result<(), CapabilityError>;

    async fn get_string(&self, key: &str) -> std::result::Result<String, CapabilityError> {
        let bytes = self.get(key).await?;
        String::from_utf8(bytes).map_err(|e| CapabilityError::unavailable("secret store", format!("{} is not UTF-8: {}", key, e)))
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> std::result::Result<Vec<u8>, CapabilityError>;
    async fn put(&self, key: &str, value: &[u8]) -> std::result::Result<(), CapabilityError>;
}
