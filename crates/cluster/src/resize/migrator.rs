//! Destination-side fragment migration

use std::sync::Arc;
use tracing::{debug, info};

use fm_core::{FragmentKey, NodeUri, ResizeInstruction};
use fm_storage::{FragmentStore, StoreError};

use crate::transport::{FragmentClient, TransportError};

/// Migration error, reported back to the coordinator as text
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("apply schema: {0}")]
    Schema(#[source] StoreError),
    #[error("retrieve {key} from {owner}: {source}")]
    Retrieve {
        key: FragmentKey,
        owner: NodeUri,
        source: TransportError,
    },
    #[error("import {key}: {source}")]
    Import { key: FragmentKey, source: StoreError },
}

/// Executes resize instructions against the local store
pub struct FragmentMigrator {
    store: Arc<dyn FragmentStore>,
    client: Arc<dyn FragmentClient>,
}

impl FragmentMigrator {
    pub fn new(store: Arc<dyn FragmentStore>, client: Arc<dyn FragmentClient>) -> Self {
        Self { store, client }
    }

    /// Apply the instruction's schema, then copy each source in order.
    /// Stops at the first failing source. Returns the number of fragments
    /// imported.
    pub async fn follow(&self, instruction: &ResizeInstruction) -> Result<usize, MigrationError> {
        self.store
            .apply_schema(&instruction.schema)
            .map_err(MigrationError::Schema)?;

        for source in &instruction.sources {
            let key = source.fragment_key();
            let data = self
                .client
                .retrieve_fragment(&source.owner, &key)
                .await
                .map_err(|source_err| MigrationError::Retrieve {
                    key: key.clone(),
                    owner: source.owner.clone(),
                    source: source_err,
                })?;

            self.store
                .import_fragment(&key, &data)
                .map_err(|e| MigrationError::Import {
                    key: key.clone(),
                    source: e,
                })?;
            debug!(
                "Job {}: imported {} ({} bytes) from {}",
                instruction.job_id,
                key,
                data.len(),
                source.owner
            );
        }

        info!(
            "Job {}: {} migrated {} fragments",
            instruction.job_id,
            instruction.destination,
            instruction.sources.len()
        );
        Ok(instruction.sources.len())
    }
}
