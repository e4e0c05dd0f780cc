use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::clock::Clock;

/// Persisted per-source bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRunState {
    pub last_run_time: Option<DateTime<Utc>>,
    pub request_count: u32,
    pub request_window_start: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateGateConfig {
    /// Maximum requests per window. `None` is unlimited.
    pub limit: Option<u32>,
    pub request_period: TimeDelta,
    pub execution_period: TimeDelta,
}

impl RateGateConfig {
    pub fn unlimited(execution_period: TimeDelta) -> Self {
        Self {
            limit: None,
            request_period: TimeDelta::days(30),
            execution_period,
        }
    }
}

/// Request budget and re-run freshness for one source.
///
/// Window rollover, the limit check and the increment happen under one lock,
/// so concurrent callers can never push `request_count` past `limit`.
pub struct RateGate {
    name: String,
    config: RateGateConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<SourceRunState>,
}

impl RateGate {
    pub fn new(name: impl Into<String>, config: RateGateConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            state: Mutex::new(SourceRunState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RateGateConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Take one request from the budget. `false` means the limit is reached
    /// for the current window; that is a normal outcome, not an error.
    pub async fn try_acquire(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let window_expired = match state.request_window_start {
            None => true,
            Some(start) => now - start >= self.config.request_period,
        };
        if window_expired {
            if state.request_window_start.is_some() {
                debug!("Request window rolled over for {} after {} requests", self.name, state.request_count);
            }
            state.request_count = 0;
            state.request_window_start = Some(now);
        }

        match self.config.limit {
            Some(limit) if state.request_count >= limit => {
                info!("Limit reached for {} ({} requests in current window)", self.name, state.request_count);
                false
            }
            _ => {
                state.request_count = state.request_count.saturating_add(1);
                true
            }
        }
    }

    pub async fn remaining(&self) -> Option<u32> {
        let limit = self.config.limit?;
        let state = self.state.lock().await;
        let window_open = state
            .request_window_start
            .is_some_and(|start| self.clock.now() - start < self.config.request_period);
        if window_open {
            Some(limit.saturating_sub(state.request_count))
        } else {
            Some(limit)
        }
    }

    pub async fn should_run_again(&self) -> bool {
        let state = self.state.lock().await;
        match state.last_run_time {
            None => true,
            Some(last) => self.clock.now() - last >= self.config.execution_period,
        }
    }

    pub async fn record_run(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        self.record_run_at(now).await;
        now
    }

    pub async fn record_run_at(&self, at: DateTime<Utc>) {
        self.state.lock().await.last_run_time = Some(at);
    }

    pub async fn clear_last_run(&self) {
        self.state.lock().await.last_run_time = None;
    }

    pub async fn snapshot(&self) -> SourceRunState {
        self.state.lock().await.clone()
    }

    pub async fn restore(&self, state: SourceRunState) {
        *self.state.lock().await = state;
    }
}
