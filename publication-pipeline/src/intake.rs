use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::store::PublicationStore;
use crate::traits::MaterialSink;
use crate::types::{Material, NewPublication, Result};

/// Sink that turns validated materials into DRAFT publications.
pub struct PublicationIntake {
    store: Arc<dyn PublicationStore>,
}

impl PublicationIntake {
    pub fn new(store: Arc<dyn PublicationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MaterialSink for PublicationIntake {
    async fn accept(&self, material: Material) -> Result<()> {
        let source = material.information_source.clone();
        let id = self.store.insert(NewPublication::from(material)).await?;
        info!("Ingested material from {} as draft {}", source, id);
        Ok(())
    }
}
