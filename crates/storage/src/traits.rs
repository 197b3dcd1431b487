//! Fragment store trait definitions

use bytes::Bytes;
use fm_core::{FragmentKey, Schema, SchemaError};

/// Fragment store error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("index not found: {0}")]
    IndexNotFound(String),
    #[error("view not found: {0}")]
    ViewNotFound(String),
    #[error("fragment not found: {0}")]
    FragmentNotFound(FragmentKey),
    #[error("invalid schema: {0}")]
    InvalidSchema(#[from] SchemaError),
    #[error("column {column} is outside shard {shard}")]
    ColumnOutOfRange { column: u64, shard: u64 },
    #[error("corrupt fragment stream: {0}")]
    Corrupt(String),
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    Checksum { expected: u32, actual: u32 },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Local fragment storage as seen by the cluster layer
///
/// Shared between the local write path and the migrator, so every method
/// takes `&self` and implementations synchronize internally.
pub trait FragmentStore: Send + Sync {
    /// Create missing containers from `schema` and merge its shard sets.
    /// Existing containers and data are left alone.
    fn apply_schema(&self, schema: &Schema) -> StoreResult<()>;

    /// Snapshot of the current schema
    fn schema(&self) -> Schema;

    /// Record a shard as available for its view, creating containers.
    /// Returns true if the shard was new.
    fn add_available_shard(&self, key: &FragmentKey) -> StoreResult<bool>;

    fn fragment_exists(&self, key: &FragmentKey) -> bool;

    /// Create an empty fragment. The view must exist.
    /// Returns true if the fragment was created.
    fn create_fragment_if_not_exists(&self, key: &FragmentKey) -> StoreResult<bool>;

    /// Read-only snapshot of a fragment as an opaque byte stream
    fn export_fragment(&self, key: &FragmentKey) -> StoreResult<Bytes>;

    /// Merge an exported stream into the fragment, creating it if absent.
    /// The view must exist.
    fn import_fragment(&self, key: &FragmentKey, data: &[u8]) -> StoreResult<()>;

    /// Set one bit. Returns true if it changed.
    fn set_bit(&self, key: &FragmentKey, row: u64, column: u64) -> StoreResult<bool>;

    /// Number of set bits in a fragment
    fn bit_count(&self, key: &FragmentKey) -> StoreResult<usize>;
}
