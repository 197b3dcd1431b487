//! Schema snapshot
//!
//! Indexes contain frames, frames contain views, and each view tracks the set
//! of shards that hold data somewhere in the cluster. Resize instructions carry
//! a full snapshot so the destination can create containers before any
//! fragment bytes arrive.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Number of columns covered by one shard
pub const SHARD_WIDTH: u64 = 1 << 20;

const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid name: {0:?}")]
    InvalidName(String),
}

/// Names must match `[a-z][a-z0-9_-]{0,63}`.
pub fn validate_name(name: &str) -> Result<(), SchemaError> {
    let mut chars = name.chars();
    let valid = name.len() <= MAX_NAME_LEN
        && chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidName(name.to_string()))
    }
}

/// Address of one fragment: a single shard of one view
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FragmentKey {
    pub index: String,
    pub frame: String,
    pub view: String,
    pub shard: u64,
}

impl FragmentKey {
    pub fn new(
        index: impl Into<String>,
        frame: impl Into<String>,
        view: impl Into<String>,
        shard: u64,
    ) -> Self {
        Self {
            index: index.into(),
            frame: frame.into(),
            view: view.into(),
            shard,
        }
    }
}

impl fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.index, self.frame, self.view, self.shard)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSchema {
    pub shards: BTreeSet<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSchema {
    pub views: BTreeMap<String, ViewSchema>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub frames: BTreeMap<String, FrameSchema>,
}

impl IndexSchema {
    /// Highest shard present in any view of this index
    pub fn max_shard(&self) -> Option<u64> {
        self.frames
            .values()
            .flat_map(|f| f.views.values())
            .filter_map(|v| v.shards.last().copied())
            .max()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub indexes: BTreeMap<String, IndexSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of `ensure_view`
    pub fn with_view(mut self, index: &str, frame: &str, view: &str) -> Self {
        self.ensure_view(index, frame, view);
        self
    }

    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.get(name)
    }

    pub fn view(&self, index: &str, frame: &str, view: &str) -> Option<&ViewSchema> {
        self.indexes
            .get(index)?
            .frames
            .get(frame)?
            .views
            .get(view)
    }

    pub fn has_view(&self, index: &str, frame: &str, view: &str) -> bool {
        self.view(index, frame, view).is_some()
    }

    pub fn max_shard(&self, index: &str) -> Option<u64> {
        self.indexes.get(index)?.max_shard()
    }

    /// Create the view and its parents if they do not exist yet
    pub fn ensure_view(&mut self, index: &str, frame: &str, view: &str) -> &mut ViewSchema {
        self.indexes
            .entry(index.to_string())
            .or_default()
            .frames
            .entry(frame.to_string())
            .or_default()
            .views
            .entry(view.to_string())
            .or_default()
    }

    /// Record `key.shard` as available, creating containers as needed.
    /// Returns true if the shard was not known before.
    pub fn add_shard(&mut self, key: &FragmentKey) -> bool {
        self.ensure_view(&key.index, &key.frame, &key.view)
            .shards
            .insert(key.shard)
    }

    /// Every (index, frame, view, shard) the schema knows about, in order
    pub fn fragments(&self) -> impl Iterator<Item = FragmentKey> + '_ {
        self.indexes.iter().flat_map(|(index, is)| {
            is.frames.iter().flat_map(move |(frame, fs)| {
                fs.views.iter().flat_map(move |(view, vs)| {
                    vs.shards
                        .iter()
                        .map(move |&shard| FragmentKey::new(index, frame, view, shard))
                })
            })
        })
    }

    /// Union `other` into this schema; nothing is ever removed.
    pub fn merge(&mut self, other: &Schema) {
        for (index, is) in &other.indexes {
            for (frame, fs) in &is.frames {
                for (view, vs) in &fs.views {
                    self.ensure_view(index, frame, view)
                        .shards
                        .extend(vs.shards.iter().copied());
                }
            }
            // Keep empty indexes and frames too
            let entry = self.indexes.entry(index.clone()).or_default();
            for frame in is.frames.keys() {
                entry.frames.entry(frame.clone()).or_default();
            }
        }
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        for (index, is) in &self.indexes {
            validate_name(index)?;
            for (frame, fs) in &is.frames {
                validate_name(frame)?;
                for view in fs.views.keys() {
                    validate_name(view)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("i").is_ok());
        assert!(validate_name("my-index_2").is_ok());
        assert!(validate_name(&"a".repeat(64)).is_ok());
        assert!(validate_name(&"a".repeat(65)).is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name("2abc").is_err());
        assert!(validate_name("Abc").is_err());
        assert!(validate_name("a.b").is_err());
    }

    #[test]
    fn test_add_shard_and_max() {
        let mut schema = Schema::new();
        assert!(schema.add_shard(&FragmentKey::new("i", "f", "standard", 3)));
        assert!(!schema.add_shard(&FragmentKey::new("i", "f", "standard", 3)));
        schema.add_shard(&FragmentKey::new("i", "g", "standard", 9));
        assert_eq!(schema.max_shard("i"), Some(9));
        assert_eq!(schema.max_shard("missing"), None);
        assert_eq!(schema.fragments().count(), 2);
    }

    #[test]
    fn test_merge_unions_shards() {
        let mut a = Schema::new().with_view("i", "f", "standard");
        a.add_shard(&FragmentKey::new("i", "f", "standard", 1));

        let mut b = Schema::new().with_view("j", "f", "standard");
        b.add_shard(&FragmentKey::new("i", "f", "standard", 2));

        a.merge(&b);
        let shards: Vec<u64> = a
            .view("i", "f", "standard")
            .unwrap()
            .shards
            .iter()
            .copied()
            .collect();
        assert_eq!(shards, vec![1, 2]);
        assert!(a.has_view("j", "f", "standard"));
    }

    #[test]
    fn test_fragments_are_ordered() {
        let mut schema = Schema::new();
        schema.add_shard(&FragmentKey::new("b", "f", "v", 0));
        schema.add_shard(&FragmentKey::new("a", "f", "v", 5));
        schema.add_shard(&FragmentKey::new("a", "f", "v", 1));
        let keys: Vec<String> = schema.fragments().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["a/f/v/1", "a/f/v/5", "b/f/v/0"]);
    }
}
