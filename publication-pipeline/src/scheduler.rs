use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::rate_gate::{RateGate, RateGateConfig, SourceRunState};
use crate::state::RunStateStore;
use crate::traits::{MaterialSink, SourcePoller};
use crate::types::Result;

/// Run-state key of the scheduler's own record.
pub const SCHEDULER_STATE_KEY: &str = "information";

#[derive(Debug, Clone, PartialEq)]
pub struct SourceOutcome {
    pub source: String,
    pub items_found: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Set when the tick passed the global execution-period gate.
    pub started_at: Option<DateTime<Utc>>,
    pub outcomes: Vec<SourceOutcome>,
    /// Sources still fresh from their previous run.
    pub skipped: Vec<String>,
    /// Sources abandoned after cancellation outlived the grace period.
    pub stragglers: Vec<String>,
}

impl TickReport {
    pub fn ran(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn outcome(&self, source: &str) -> Option<&SourceOutcome> {
        self.outcomes.iter().find(|outcome| outcome.source == source)
    }

    pub fn items_found(&self) -> usize {
        self.outcomes.iter().map(|outcome| outcome.items_found).sum()
    }
}

/// Periodically polls every active source in parallel, one task per source.
pub struct SourceScheduler {
    sources: RwLock<Vec<Arc<dyn SourcePoller>>>,
    gate: RateGate,
    run_state: Arc<dyn RunStateStore>,
    sink: Arc<dyn MaterialSink>,
    config: SchedulerConfig,
}

impl SourceScheduler {
    pub fn new(
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
        run_state: Arc<dyn RunStateStore>,
        sink: Arc<dyn MaterialSink>,
    ) -> Self {
        let gate = RateGate::new(
            SCHEDULER_STATE_KEY,
            RateGateConfig::unlimited(config.execution_period()),
            clock,
        );
        Self {
            sources: RwLock::new(Vec::new()),
            gate,
            run_state,
            sink,
            config,
        }
    }

    /// Add `source`, replacing any source with the same name. Takes effect
    /// on the next tick.
    pub async fn add_source(&self, source: Arc<dyn SourcePoller>) {
        let name = source.source_name();
        let mut sources = self.sources.write().await;
        sources.retain(|existing| existing.source_name() != name);
        sources.push(source);
        info!("Added source: {}", name);
    }

    pub async fn remove_source(&self, name: &str) -> bool {
        let mut sources = self.sources.write().await;
        let before = sources.len();
        sources.retain(|existing| existing.source_name() != name);
        let removed = sources.len() != before;
        if removed {
            info!("Removed source: {}", name);
        }
        removed
    }

    /// Replace the whole active set, as after a configuration reload.
    pub async fn set_sources(&self, sources: Vec<Arc<dyn SourcePoller>>) {
        let names: Vec<String> = sources.iter().map(|source| source.source_name()).collect();
        *self.sources.write().await = sources;
        info!("Active sources are now: {:?}", names);
    }

    pub async fn source_names(&self) -> Vec<String> {
        self.sources.read().await.iter().map(|source| source.source_name()).collect()
    }

    pub async fn run_states(&self) -> Result<Vec<(String, SourceRunState)>> {
        self.run_state.list().await
    }

    /// Make `name` (a source name or a run-state key) due on the next tick.
    pub async fn force_rerun(&self, name: &str) -> Result<bool> {
        let live = self
            .sources
            .read()
            .await
            .iter()
            .find(|source| source.source_name() == name || source.config_schema_name() == name)
            .cloned();

        match live {
            Some(source) => {
                source.rate_gate().clear_last_run().await;
                self.run_state.clear_last_run(&source.config_schema_name()).await
            }
            None if name == SCHEDULER_STATE_KEY => {
                self.gate.clear_last_run().await;
                self.run_state.clear_last_run(name).await
            }
            None => self.run_state.clear_last_run(name).await,
        }
    }

    /// Tick until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Starting source scheduler with {} sources", self.sources.read().await.len());
        loop {
            match self.tick(&cancel).await {
                Ok(report) if report.ran() => info!(
                    "Scheduler tick finished: {} items from {} sources, {} skipped, {} stragglers",
                    report.items_found(),
                    report.outcomes.len(),
                    report.skipped.len(),
                    report.stragglers.len()
                ),
                Ok(_) => debug!("Scheduler tick skipped: execution period not elapsed"),
                Err(e) => error!("Scheduler tick failed: {}", e),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.tick_interval()) => {}
            }
        }
        info!("Source scheduler stopped");
    }

    /// One scheduler cycle: load persisted state, check the global gate,
    /// fan out due sources, wait for them, save state.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<TickReport> {
        let mut report = TickReport::default();
        if cancel.is_cancelled() {
            return Ok(report);
        }

        let sources = self.sources.read().await.clone();
        self.load_state(&sources).await?;

        if !self.gate.should_run_again().await {
            return Ok(report);
        }

        // The scheduler's own run time is durable before any poller starts.
        let started_at = self.gate.now();
        let mut global = self.gate.snapshot().await;
        global.last_run_time = Some(started_at);
        self.run_state.save(SCHEDULER_STATE_KEY, &global).await?;
        self.gate.restore(global).await;
        report.started_at = Some(started_at);

        let mut handles: Vec<(String, JoinHandle<SourceOutcome>)> = Vec::new();
        for source in &sources {
            let name = source.source_name();
            if !source.rate_gate().should_run_again().await {
                debug!("Source {} ran recently; skipping", name);
                report.skipped.push(name);
                continue;
            }

            let source = source.clone();
            let sink = self.sink.clone();
            let token = cancel.child_token();
            handles.push((name, tokio::spawn(async move { poll_source(source, sink, token).await })));
        }

        self.wait_for(handles, cancel, &mut report).await;
        self.save_state(&sources, &report.stragglers).await;
        Ok(report)
    }

    async fn wait_for(
        &self,
        handles: Vec<(String, JoinHandle<SourceOutcome>)>,
        cancel: &CancellationToken,
        report: &mut TickReport,
    ) {
        let mut unfinished = Vec::new();
        for (name, mut handle) in handles {
            if !cancel.is_cancelled() {
                tokio::select! {
                    biased;
                    joined = &mut handle => {
                        report.outcomes.push(joined_outcome(name, joined));
                        continue;
                    }
                    _ = cancel.cancelled() => {}
                }
            }
            unfinished.push((name, handle));
        }
        if unfinished.is_empty() {
            return;
        }

        info!("Cancellation requested; waiting up to {:?} for {} sources", self.config.shutdown_grace(), unfinished.len());
        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace();
        for (name, mut handle) in unfinished {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(joined) => report.outcomes.push(joined_outcome(name, joined)),
                Err(_) => {
                    // Dropping the handle detaches the task; it is not aborted.
                    warn!("Source {} did not stop within the grace period; abandoning it", name);
                    report.stragglers.push(name);
                }
            }
        }
    }

    async fn load_state(&self, sources: &[Arc<dyn SourcePoller>]) -> Result<()> {
        if let Some(state) = self.run_state.load(SCHEDULER_STATE_KEY).await? {
            self.gate.restore(state).await;
        }
        for source in sources {
            let key = source.config_schema_name();
            match self.run_state.load(&key).await {
                Ok(Some(state)) => source.rate_gate().restore(state).await,
                Ok(None) => {}
                Err(e) => warn!("Failed to load run state for {}: {}", key, e),
            }
        }
        Ok(())
    }

    /// Persist every gate except those of `stragglers`, whose pollers may still
    /// be mutating them.
    async fn save_state(&self, sources: &[Arc<dyn SourcePoller>], stragglers: &[String]) {
        for source in sources {
            if stragglers.contains(&source.source_name()) {
                continue;
            }
            let key = source.config_schema_name();
            let state = source.rate_gate().snapshot().await;
            if let Err(e) = self.run_state.save(&key, &state).await {
                warn!("Failed to save run state for {}: {}", key, e);
            }
        }
    }
}

/// Poll one source to completion. Errors stay inside the outcome so one
/// failing source never affects its siblings.
async fn poll_source(source: Arc<dyn SourcePoller>, sink: Arc<dyn MaterialSink>, cancel: CancellationToken) -> SourceOutcome {
    let name = source.source_name();
    info!("Polling source: {}", name);

    match source.poll(&cancel, sink.as_ref()).await {
        Ok(items_found) => {
            if cancel.is_cancelled() {
                info!("Source {} stopped early with {} items; not marking it as run", name, items_found);
            } else {
                source.rate_gate().record_run().await;
                info!("Source {} finished with {} items", name, items_found);
            }
            SourceOutcome { source: name, items_found, error: None }
        }
        Err(e) => {
            error!("Source {} failed: {}", name, e);
            SourceOutcome { source: name, items_found: 0, error: Some(e.to_string()) }
        }
    }
}

fn joined_outcome(name: String, joined: std::result::Result<SourceOutcome, JoinError>) -> SourceOutcome {
    joined.unwrap_or_else(|e| {
        error!("Source task {} panicked: {}", name, e);
        SourceOutcome { source: name, items_found: 0, error: Some(format!("poller task failed: {}", e)) }
    })
}
