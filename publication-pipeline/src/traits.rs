use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::rate_gate::RateGate;
use crate::types::{Material, Result};

/// Prefix of every source's config schema name.
pub const SOURCE_SCHEMA_PREFIX: &str = "information-sources";

/// Where pollers hand off validated materials.
#[async_trait]
pub trait MaterialSink: Send + Sync {
    async fn accept(&self, material: Material) -> Result<()>;
}

/// Trait for pulling candidate materials from one origin (feeds, APIs, drop
/// folders, queues).
#[async_trait]
pub trait SourcePoller: Send + Sync {
    /// Human-readable name, also the `information_source` of its materials
    fn source_name(&self) -> String;

    /// Key the source's run state is persisted under
    fn config_schema_name(&self) -> String {
        format!("{}-{}", SOURCE_SCHEMA_PREFIX, self.source_name())
    }

    /// Gate every network call of a poll goes through
    fn rate_gate(&self) -> &RateGate;

    /// Run one discovery cycle and return how many materials were delivered.
    ///
    /// A refused gate acquisition ends the cycle early with the count so far.
    /// Cancellation is checked between items and also ends the cycle early.
    async fn poll(&self, cancel: &CancellationToken, sink: &dyn MaterialSink) -> Result<usize>;
}

/// What became of one material handed to [`deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Stored by the sink
    Accepted,
    /// Failed the validity rule; retrying will not help
    Invalid,
    /// The sink refused it; the item may be retried later
    Failed,
}

impl Delivery {
    pub fn is_accepted(self) -> bool {
        self == Delivery::Accepted
    }

    /// Whether the source is done with the item, either way.
    pub fn is_settled(self) -> bool {
        self != Delivery::Failed
    }
}

/// Hand `material` to `sink` if it passes the validity rule. Sink failures are
/// logged and reported as [`Delivery::Failed`] so one bad item never aborts a
/// cycle.
pub async fn deliver(sink: &dyn MaterialSink, material: Material, minimum_length: usize) -> Delivery {
    if !material.is_valid(minimum_length) {
        debug!(
            "Dropping material from {} ({:?}): needs a title and more than {} characters",
            material.information_source, material.title, minimum_length
        );
        return Delivery::Invalid;
    }

    let source = material.information_source.clone();
    let title = material.title.clone();
    match sink.accept(material).await {
        Ok(()) => Delivery::Accepted,
        Err(e) => {
            warn!("Failed to store material {:?} from {}: {}", title, source, e);
            Delivery::Failed
        }
    }
}
