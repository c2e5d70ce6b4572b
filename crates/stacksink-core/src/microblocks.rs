//! Microblock reconstruction.
//!
//! Microblocks are never delivered as header records; they are implied by
//! the `(microblock_hash, microblock_sequence)` fields on each streamed
//! transaction. Grouping those fields back into one record per microblock
//! recovers the stream.

use std::collections::BTreeMap;

use tracing::warn;

use crate::msg::CoreNodeTxMessage;
use crate::records::{DbBlock, DbMicroblock};

/// Block-level context shared by all reconstructed microblocks.
#[derive(Debug, Clone)]
pub struct MicroblockParentContext {
    pub parent_index_block_hash: String,
    pub parent_burn_block_height: u32,
    pub parent_burn_block_hash: String,
    pub parent_burn_block_time: i64,
}

impl MicroblockParentContext {
    pub fn from_anchor(block: &DbBlock) -> Self {
        Self {
            parent_index_block_hash: block.parent_index_block_hash.clone(),
            parent_burn_block_height: block.burn_block_height,
            parent_burn_block_hash: block.burn_block_hash.clone(),
            parent_burn_block_time: block.burn_block_time,
        }
    }
}

/// Group streamed transactions into one microblock record per
/// `(hash, sequence)` pair, ordered by sequence.
///
/// With `anchor` present the microblocks are confirmed and carry the anchor
/// block's identity; without it they are unconfirmed and carry the empty
/// sentinels the store later fills.
///
/// Sequence gaps are tolerated (orphaned microblocks are expected during
/// reorgs) but surfaced as a warning.
pub fn reconstruct_microblocks(
    txs: &[CoreNodeTxMessage],
    parent: &MicroblockParentContext,
    anchor: Option<&DbBlock>,
) -> Vec<DbMicroblock> {
    // Earliest representative per sequence wins; the node emits one hash per
    // sequence within a single message.
    let mut groups: BTreeMap<u16, (String, String)> = BTreeMap::new();
    for tx in txs {
        let (Some(sequence), Some(hash)) = (tx.microblock_sequence, tx.microblock_hash.as_ref())
        else {
            continue;
        };
        // An anchored tx with the sentinel hash belongs to the block body.
        if hash.is_empty() {
            continue;
        }
        groups.entry(sequence).or_insert_with(|| {
            (
                hash.clone(),
                tx.microblock_parent_hash.clone().unwrap_or_default(),
            )
        });
    }

    if let (Some(first), Some(last)) = (
        groups.keys().next().copied(),
        groups.keys().last().copied(),
    ) {
        let expected = (last - first) as usize + 1;
        if groups.len() != expected {
            warn!(
                first,
                last,
                present = groups.len(),
                "microblock sequence gap; continuing with orphaned stream"
            );
        }
    }

    groups
        .into_iter()
        .map(|(sequence, (hash, parent_hash))| DbMicroblock {
            microblock_hash: hash,
            microblock_sequence: sequence,
            microblock_parent_hash: parent_hash,
            parent_index_block_hash: parent.parent_index_block_hash.clone(),
            parent_burn_block_height: parent.parent_burn_block_height,
            parent_burn_block_hash: parent.parent_burn_block_hash.clone(),
            parent_burn_block_time: parent.parent_burn_block_time,
            block_height: anchor.map(|b| b.block_height as i64).unwrap_or(-1),
            parent_block_height: anchor.map(|b| b.block_height.saturating_sub(1)).unwrap_or(0),
            parent_block_hash: anchor
                .map(|b| b.parent_block_hash.clone())
                .unwrap_or_default(),
            index_block_hash: anchor
                .map(|b| b.index_block_hash.clone())
                .unwrap_or_default(),
            block_hash: anchor.map(|b| b.block_hash.clone()).unwrap_or_default(),
            canonical: true,
            microblock_canonical: anchor.is_some(),
        })
        .collect()
}
