use crate::rate_gate::RateGate;
use crate::traits::{deliver, MaterialSink, SourcePoller};
use crate::types::{Material, Result};
use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Drains materials pushed in-process by other components.
pub struct QueueDrainSource {
    name: String,
    receiver: Mutex<mpsc::Receiver<Material>>,
    batch_size: usize,
    minimum_length: usize,
    gate: RateGate,
}

impl QueueDrainSource {
    pub fn channel(name: impl Into<String>, capacity: usize, gate: RateGate) -> (mpsc::Sender<Material>, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let source = Self {
            name: name.into(),
            receiver: Mutex::new(receiver),
            batch_size: capacity.max(1),
            minimum_length: 0,
            gate,
        };
        (sender, source)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_minimum_length(mut self, minimum_length: usize) -> Self {
        self.minimum_length = minimum_length;
        self
    }
}

#[async_trait]
impl SourcePoller for QueueDrainSource {
    fn source_name(&self) -> String {
        self.name.clone()
    }

    fn rate_gate(&self) -> &RateGate {
        &self.gate
    }

    async fn poll(&self, cancel: &CancellationToken, sink: &dyn MaterialSink) -> Result<usize> {
        let mut receiver = self.receiver.lock().await;
        let mut delivered = 0;

        for _ in 0..self.batch_size {
            if cancel.is_cancelled() {
                break;
            }
            match receiver.try_recv() {
                Ok(mut material) => {
                    if material.information_source.is_empty() {
                        material.information_source = self.name.clone();
                    }
                    if deliver(sink, material, self.minimum_length).await.is_accepted() {
                        delivered += 1;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("All senders for {} are gone", self.name);
                    break;
                }
            }
        }

        info!("Drained {} items from {}", delivered, self.name);
        Ok(delivered)
    }
}
