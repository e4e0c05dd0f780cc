use std::collections::HashSet;
use std::sync::Arc;

use interfaces::{DraftingService, PublicationState};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::DraftingConfig;
use crate::cursor::{CursorError, PublicationCursor};
use crate::store::PublicationStore;
use crate::types::{DraftRequest, Publication};
use crate::utils::preview;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DraftingReport {
    pub drafted: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

/// Drives DRAFT publications through the drafting service and hands them to
/// PENDING_APPROVAL.
pub struct DraftingLoop {
    store: Arc<dyn PublicationStore>,
    service: Arc<dyn DraftingService>,
    config: DraftingConfig,
}

impl DraftingLoop {
    pub fn new(store: Arc<dyn PublicationStore>, service: Arc<dyn DraftingService>, config: DraftingConfig) -> Self {
        Self { store, service, config }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        info!("Starting drafting loop with service {}", self.service.service_name());
        loop {
            if self.config.active {
                match self.process_cycle(&cancel).await {
                    Ok(report) if report.drafted.is_empty() && report.failed.is_empty() => debug!("No drafts to process"),
                    Ok(report) => info!(
                        "Drafting cycle finished: {} drafted, {} failed",
                        report.drafted.len(),
                        report.failed.len()
                    ),
                    Err(e) => error!("Drafting cycle failed: {}", e),
                }
            } else {
                debug!("Drafting loop is not active");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.cycle_sleep()) => {}
            }
        }
        info!("Drafting loop stopped");
    }

    /// Walk every DRAFT publication once, oldest first. Failed items stay in
    /// DRAFT for the next cycle.
    pub async fn process_cycle(&self, cancel: &CancellationToken) -> Result<DraftingReport, CursorError> {
        let mut report = DraftingReport::default();
        let mut cursor = PublicationCursor::new(self.store.clone(), PublicationState::Draft);
        let mut attempted = HashSet::new();

        cursor.refresh().await?;
        loop {
            if cancel.is_cancelled() {
                info!("Drafting cycle cancelled after {} drafts", report.drafted.len());
                break;
            }

            let publication = match cursor.next().await {
                Ok(publication) => publication,
                Err(e) if e.is_empty() => break,
                Err(CursorError::Stale { id }) => {
                    debug!("Draft {} changed under the cursor; moving on", id);
                    continue;
                }
                Err(e) => return Err(e),
            };
            // Failed drafts stay in the set, so the cursor comes back round to them.
            if !attempted.insert(publication.id) {
                break;
            }

            let id = publication.id;
            if self.draft_one(&cursor, &publication).await {
                report.drafted.push(id);
            } else {
                report.failed.push(id);
            }
        }
        Ok(report)
    }

    async fn draft_one(&self, cursor: &PublicationCursor, publication: &Publication) -> bool {
        let request = DraftRequest::from(publication);
        let content = match self.service.generate(&request).await {
            Ok(content) if !content.trim().is_empty() => content,
            Ok(_) => {
                warn!("Drafting service returned nothing for {} ({})", publication.id, publication.title);
                return false;
            }
            Err(e) => {
                warn!("Failed to draft {} ({}): {:#}", publication.id, publication.title, e);
                return false;
            }
        };

        if let Err(e) = cursor.update_content(content.as_str()).await {
            warn!("Failed to save draft content for {}: {}", publication.id, e);
            return false;
        }
        if let Err(e) = cursor.update_state(PublicationState::PendingApproval).await {
            warn!("Failed to submit {} for approval: {}", publication.id, e);
            return false;
        }

        info!("Publication {} ready for approval: {}", publication.id, preview(&content, 80));
        true
    }
}
