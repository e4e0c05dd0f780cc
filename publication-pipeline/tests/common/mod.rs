#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use publication_pipeline::traits::deliver;
use publication_pipeline::{
    Database, ManualClock, Material, MaterialSink, NewPublication, PipelineError, PublicationStore, RateGate,
    RateGateConfig, Result, SourcePoller, SqlitePublicationStore,
};
use tokio_util::sync::CancellationToken;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

pub struct TestStore {
    pub database: Database,
    pub clock: Arc<ManualClock>,
    pub store: Arc<dyn PublicationStore>,
}

pub async fn test_store() -> TestStore {
    init_tracing();
    let database = Database::in_memory().await.unwrap();
    let clock = Arc::new(ManualClock::new(start_time()));
    let store: Arc<dyn PublicationStore> =
        Arc::new(SqlitePublicationStore::new(&database).with_clock(clock.clone()));
    TestStore { database, clock, store }
}

pub fn new_publication(title: &str) -> NewPublication {
    NewPublication::from(material("test-source", title))
}

pub fn material(source: &str, title: &str) -> Material {
    Material::new(source, title, format!("Material body for {}", title))
}

/// Insert `titles` one minute apart so creation order is unambiguous.
pub async fn seed(fixture: &TestStore, titles: &[&str]) -> Vec<uuid::Uuid> {
    let mut ids = Vec::new();
    for title in titles {
        ids.push(fixture.store.insert(new_publication(title)).await.unwrap());
        fixture.clock.advance(TimeDelta::minutes(1));
    }
    ids
}

pub fn gate(name: &str, limit: Option<u32>, clock: Arc<ManualClock>) -> RateGate {
    RateGate::new(
        format!("information-sources-{}", name),
        RateGateConfig {
            limit,
            request_period: TimeDelta::days(30),
            execution_period: TimeDelta::days(1),
        },
        clock,
    )
}

/// Poller that hands out a fixed list of materials, one gate request each.
pub struct StaticSource {
    name: String,
    materials: Vec<Material>,
    fail_with: Option<String>,
    delay: Duration,
    ignore_cancel: bool,
    polls: AtomicUsize,
    gate: RateGate,
}

impl StaticSource {
    pub fn new(name: &str, count: usize, gate: RateGate) -> Self {
        let materials = (1..=count).map(|i| material(name, &format!("{} story {}", name, i))).collect();
        Self {
            name: name.to_string(),
            materials,
            fail_with: None,
            delay: Duration::ZERO,
            ignore_cancel: false,
            polls: AtomicUsize::new(0),
            gate,
        }
    }

    pub fn failing(mut self, reason: &str) -> Self {
        self.fail_with = Some(reason.to_string());
        self
    }

    /// Sleep this long before each item.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Keep going after cancellation, like a poller stuck in a slow call.
    pub fn ignoring_cancel(mut self) -> Self {
        self.ignore_cancel = true;
        self
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourcePoller for StaticSource {
    fn source_name(&self) -> String {
        self.name.clone()
    }

    fn rate_gate(&self) -> &RateGate {
        &self.gate
    }

    async fn poll(&self, cancel: &CancellationToken, sink: &dyn MaterialSink) -> Result<usize> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.fail_with {
            return Err(PipelineError::General(reason.clone()));
        }

        let mut delivered = 0;
        for material in &self.materials {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if cancel.is_cancelled() && !self.ignore_cancel {
                break;
            }
            if !self.gate.try_acquire().await {
                break;
            }
            if deliver(sink, material.clone(), 0).await.is_accepted() {
                delivered += 1;
            }
        }
        Ok(delivered)
    }
}

/// Sink that keeps everything it accepts.
#[derive(Default)]
pub struct CollectingSink {
    materials: std::sync::Mutex<Vec<Material>>,
}

impl CollectingSink {
    pub fn materials(&self) -> Vec<Material> {
        self.materials.lock().unwrap().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.materials().into_iter().map(|material| material.title).collect()
    }
}

#[async_trait]
impl MaterialSink for CollectingSink {
    async fn accept(&self, material: Material) -> Result<()> {
        self.materials.lock().unwrap().push(material);
        Ok(())
    }
}

/// Sink that refuses everything while `down` is set.
#[derive(Default)]
pub struct FlakySink {
    down: AtomicBool,
    inner: CollectingSink,
}

impl FlakySink {
    pub fn down() -> Self {
        let sink = Self::default();
        sink.set_down(true);
        sink
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn titles(&self) -> Vec<String> {
        self.inner.titles()
    }
}

#[async_trait]
impl MaterialSink for FlakySink {
    async fn accept(&self, material: Material) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(PipelineError::General("database unavailable".to_string()));
        }
        self.inner.accept(material).await
    }
}

pub fn test_fetcher() -> Arc<publication_pipeline::Fetcher> {
    let config = publication_pipeline::FetchConfig {
        user_agent: "Publication-Pipeline-Test/1.0".to_string(),
        timeout_seconds: 5,
        max_retries: 0,
        retry_delay_seconds: 0,
        ..Default::default()
    };
    Arc::new(publication_pipeline::Fetcher::new(config).unwrap())
}
