//! Topology persistence
//!
//! The topology lives in `.topology` inside the node's data directory and is
//! rewritten on every confirmed membership change.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use fm_core::{Topology, TopologyError};

pub const TOPOLOGY_FILE: &str = ".topology";

/// Storage error
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("topology file {path:?}: {source}")]
    Topology {
        path: PathBuf,
        #[source]
        source: TopologyError,
    },
}

pub struct TopologyStorage {
    data_dir: PathBuf,
    path: PathBuf,
}

impl TopologyStorage {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        let path = data_dir.join(TOPOLOGY_FILE);
        Self { data_dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ensure data directory exists
    pub async fn ensure_dir(&self) -> Result<(), StorageError> {
        if !self.data_dir.exists() {
            fs::create_dir_all(&self.data_dir).await?;
            info!("Created data directory: {:?}", self.data_dir);
        }
        Ok(())
    }

    /// Load the persisted topology, `None` if it was never written
    pub async fn load(&self) -> Result<Option<Topology>, StorageError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No topology file at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let topology = Topology::decode(&bytes).map_err(|source| StorageError::Topology {
            path: self.path.clone(),
            source,
        })?;
        info!("Loaded topology: {} nodes", topology.len());
        Ok(Some(topology))
    }

    pub async fn save(&self, topology: &Topology) -> Result<(), StorageError> {
        self.ensure_dir().await?;

        let bytes = topology.encode().map_err(|source| StorageError::Topology {
            path: self.path.clone(),
            source,
        })?;

        // Write to temp file first, then atomically rename
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, &bytes).await?;
        fs::rename(&temp_path, &self.path).await?;

        info!("Saved topology: {} nodes", topology.len());
        Ok(())
    }
}
