//! In-memory fragment holder

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use fm_core::{FragmentKey, Schema, SHARD_WIDTH};

use crate::fragment::Fragment;
use crate::traits::{FragmentStore, StoreError, StoreResult};

#[derive(Default)]
struct HolderInner {
    schema: Schema,
    fragments: HashMap<FragmentKey, Fragment>,
}

impl HolderInner {
    fn require_view(&self, key: &FragmentKey) -> StoreResult<()> {
        let index = self
            .schema
            .index(&key.index)
            .ok_or_else(|| StoreError::IndexNotFound(key.index.clone()))?;
        let has_view = index
            .frames
            .get(&key.frame)
            .is_some_and(|f| f.views.contains_key(&key.view));
        if has_view {
            Ok(())
        } else {
            Err(StoreError::ViewNotFound(format!(
                "{}/{}/{}",
                key.index, key.frame, key.view
            )))
        }
    }
}

/// Fragment store backed by process memory
///
/// One lock guards both the schema and the fragments, so a fragment never
/// exists without its view.
#[derive(Default)]
pub struct Holder {
    inner: RwLock<HolderInner>,
}

impl Holder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Columns set in `row` of a fragment
    pub fn row(&self, key: &FragmentKey, row: u64) -> StoreResult<Vec<u64>> {
        let inner = self.inner.read();
        inner
            .fragments
            .get(key)
            .map(|f| f.row(row))
            .ok_or_else(|| StoreError::FragmentNotFound(key.clone()))
    }
}

impl FragmentStore for Holder {
    fn apply_schema(&self, schema: &Schema) -> StoreResult<()> {
        schema.validate()?;
        let mut inner = self.inner.write();
        inner.schema.merge(schema);
        debug!("Applied schema with {} indexes", schema.indexes.len());
        Ok(())
    }

    fn schema(&self) -> Schema {
        self.inner.read().schema.clone()
    }

    fn add_available_shard(&self, key: &FragmentKey) -> StoreResult<bool> {
        fm_core::validate_name(&key.index)?;
        fm_core::validate_name(&key.frame)?;
        fm_core::validate_name(&key.view)?;
        Ok(self.inner.write().schema.add_shard(key))
    }

    fn fragment_exists(&self, key: &FragmentKey) -> bool {
        self.inner.read().fragments.contains_key(key)
    }

    fn create_fragment_if_not_exists(&self, key: &FragmentKey) -> StoreResult<bool> {
        let mut inner = self.inner.write();
        inner.require_view(key)?;
        if inner.fragments.contains_key(key) {
            return Ok(false);
        }
        inner.fragments.insert(key.clone(), Fragment::new());
        inner.schema.add_shard(key);
        debug!("Created fragment {}", key);
        Ok(true)
    }

    fn export_fragment(&self, key: &FragmentKey) -> StoreResult<Bytes> {
        let inner = self.inner.read();
        inner
            .fragments
            .get(key)
            .ok_or_else(|| StoreError::FragmentNotFound(key.clone()))?
            .export()
    }

    fn import_fragment(&self, key: &FragmentKey, data: &[u8]) -> StoreResult<()> {
        let incoming = Fragment::decode(data)?;
        let mut inner = self.inner.write();
        inner.require_view(key)?;
        let n = incoming.len();
        inner.fragments.entry(key.clone()).or_default().merge(incoming);
        inner.schema.add_shard(key);
        debug!("Imported {} bits into fragment {}", n, key);
        Ok(())
    }

    fn set_bit(&self, key: &FragmentKey, row: u64, column: u64) -> StoreResult<bool> {
        if column / SHARD_WIDTH != key.shard {
            return Err(StoreError::ColumnOutOfRange {
                column,
                shard: key.shard,
            });
        }
        let mut inner = self.inner.write();
        inner
            .fragments
            .get_mut(key)
            .map(|f| f.set_bit(row, column))
            .ok_or_else(|| StoreError::FragmentNotFound(key.clone()))
    }

    fn bit_count(&self, key: &FragmentKey) -> StoreResult<usize> {
        let inner = self.inner.read();
        inner
            .fragments
            .get(key)
            .map(|f| f.len())
            .ok_or_else(|| StoreError::FragmentNotFound(key.clone()))
    }
}
