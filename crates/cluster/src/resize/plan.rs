use std::collections::BTreeMap;

use fm_core::{JobId, NodeUri, ResizeInstruction, ResizeSource, Schema};

use crate::placement::Placement;

/// Instructions needed to move from `from` ownership to `to` ownership.
///
/// Every fragment in `schema` whose new owners include a node that did not
/// own it before gets a source pointing at its first previous owner. Sources
/// are grouped into one instruction per destination, in destination order.
/// Fragments with no previous owner have nothing to copy and are skipped.
pub fn resize_instructions(
    job_id: JobId,
    coordinator: &NodeUri,
    from: &Placement,
    to: &Placement,
    schema: &Schema,
) -> Vec<ResizeInstruction> {
    let mut sources: BTreeMap<NodeUri, Vec<ResizeSource>> = BTreeMap::new();

    for key in schema.fragments() {
        let old_owners = from.shard_nodes(&key.index, key.shard);
        let Some(owner) = old_owners.first() else {
            continue;
        };
        for dest in to.shard_nodes(&key.index, key.shard) {
            if old_owners.contains(&dest) {
                continue;
            }
            sources
                .entry(dest)
                .or_default()
                .push(ResizeSource::new(owner.clone(), key.clone()));
        }
    }

    sources
        .into_iter()
        .map(|(destination, sources)| ResizeInstruction {
            job_id,
            destination,
            coordinator: coordinator.clone(),
            schema: schema.clone(),
            sources,
        })
        .collect()
}
