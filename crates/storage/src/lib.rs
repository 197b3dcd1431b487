//! Fragment storage for fragmesh nodes
//!
//! - `FragmentStore`: the contract the cluster and the migrator consume
//! - `Fragment`: one shard of one view, with its export stream format
//! - `Holder`: in-memory store keyed by index/frame/view/shard

pub mod fragment;
pub mod holder;
pub mod traits;

pub use fragment::Fragment;
pub use holder::Holder;
pub use traits::{FragmentStore, StoreError, StoreResult};
