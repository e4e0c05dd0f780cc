pub mod blobs;
pub mod clock;
pub mod config;
pub mod cursor;
pub mod database;
pub mod drafting;
pub mod fetcher;
pub mod intake;
pub mod llm_adapter;
pub mod parser;
pub mod rate_gate;
pub mod rss_utils;
pub mod scheduler;
pub mod secrets;
pub mod sources;
pub mod state;
pub mod store;
pub mod traits;
pub mod types;
pub mod utils;

pub use blobs::FsBlobStore;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{PipelineConfig, SourceConfig, SourceKind};
pub use cursor::{CursorError, PublicationCursor};
pub use database::Database;
pub use drafting::{DraftingLoop, DraftingReport};
pub use fetcher::{Fetcher, Gated};
pub use intake::PublicationIntake;
pub use llm_adapter::{ChatCompletionDraftingService, MockDraftingService};
pub use parser::FeedParser;
pub use rate_gate::{RateGate, RateGateConfig, SourceRunState};
pub use scheduler::{SourceOutcome, SourceScheduler, TickReport};
pub use secrets::EnvSecretStore;
pub use sources::{FileDropSource, QueueDrainSource, RapidApiSource, RssFeedSource};
pub use state::{RunStateStore, SqliteRunStateStore};
pub use store::{PublicationStore, PublicationUpdate, SqlitePublicationStore};
pub use traits::{Delivery, MaterialSink, SourcePoller};
pub use types::*;
