//! Domain records and update bundles.
//!
//! These are the typed rows the handlers build and the store persists. Every
//! canonical-flagged record is inserted with `canonical = true`; the store
//! flips canonicality during reorg resolution.

use serde::{Deserialize, Serialize};

use stacksink_codec::{AnchorMode, PostConditionMode, TxPayload};

// ─── Execution cost ───────────────────────────────────────────────────────────

/// Runtime cost of a block or transaction, as reported by the node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCost {
    pub read_count: u64,
    pub read_length: u64,
    pub runtime: u64,
    pub write_count: u64,
    pub write_length: u64,
}

// ─── Blocks and microblocks ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbBlock {
    pub block_hash: String,
    pub index_block_hash: String,
    pub parent_index_block_hash: String,
    pub parent_block_hash: String,
    pub parent_microblock_hash: String,
    pub parent_microblock_sequence: u16,
    pub block_height: u32,
    pub burn_block_time: i64,
    pub burn_block_hash: String,
    pub burn_block_height: u32,
    pub miner_txid: String,
    pub execution_cost: ExecutionCost,
    pub canonical: bool,
}

/// A streamed microblock. Until an anchor block confirms it,
/// `index_block_hash`/`block_hash` are empty sentinels and
/// `block_height = -1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbMicroblock {
    pub microblock_hash: String,
    pub microblock_sequence: u16,
    pub microblock_parent_hash: String,
    pub parent_index_block_hash: String,
    pub parent_burn_block_height: u32,
    pub parent_burn_block_hash: String,
    pub parent_burn_block_time: i64,
    pub block_height: i64,
    pub parent_block_height: u32,
    pub parent_block_hash: String,
    pub index_block_hash: String,
    pub block_hash: String,
    pub canonical: bool,
    pub microblock_canonical: bool,
}

// ─── Transactions ─────────────────────────────────────────────────────────────

/// Final status of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DbTxStatus {
    Success,
    AbortByResponse,
    AbortByPostCondition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbTx {
    pub tx_id: String,
    pub tx_index: u32,
    pub index_block_hash: String,
    pub block_hash: String,
    /// `-1` for transactions streamed in unconfirmed microblocks.
    pub block_height: i64,
    pub burn_block_time: i64,
    pub nonce: u64,
    pub type_id: stacksink_codec::tx::TxTypeId,
    pub sender_address: String,
    pub sponsor_address: Option<String>,
    pub fee: u64,
    pub anchor_mode: AnchorMode,
    pub post_condition_mode: PostConditionMode,
    pub post_conditions: Vec<u8>,
    pub raw_tx: Vec<u8>,
    pub payload: TxPayload,
    pub microblock_hash: Option<String>,
    pub microblock_sequence: Option<u16>,
    pub event_count: u32,
    pub canonical: bool,
    pub origin_hash_mode: u8,
    pub status: DbTxStatus,
    pub raw_result: String,
    pub execution_cost: ExecutionCost,
    pub contract_abi: Option<serde_json::Value>,
}

// ─── Events ───────────────────────────────────────────────────────────────────

/// Direction of an asset movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DbAssetOp {
    Transfer { sender: String, recipient: String },
    Mint { recipient: String },
    Burn { sender: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DbEventPayload {
    SmartContractLog {
        contract_identifier: String,
        topic: String,
        value: Vec<u8>,
    },
    StxLock {
        locked_amount: u128,
        unlock_height: u32,
        locked_address: String,
    },
    StxAsset {
        op: DbAssetOp,
        amount: u128,
    },
    FungibleTokenAsset {
        op: DbAssetOp,
        asset_identifier: String,
        amount: u128,
    },
    NonFungibleTokenAsset {
        op: DbAssetOp,
        asset_identifier: String,
        value: Vec<u8>,
    },
}

/// One typed side-effect of a transaction, renumbered per transaction after
/// normalization (see the events module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbEvent {
    pub event_index: u32,
    pub tx_id: String,
    pub tx_index: u32,
    pub block_height: i64,
    pub canonical: bool,
    pub payload: DbEventPayload,
}

// ─── Rewards ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbMinerReward {
    pub block_hash: String,
    pub index_block_hash: String,
    pub from_index_block_hash: String,
    pub mature_block_height: u32,
    pub recipient: String,
    pub coinbase_amount: u128,
    pub tx_fees_anchored: u128,
    pub tx_fees_streamed_confirmed: u128,
    pub tx_fees_streamed_produced: u128,
    pub canonical: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbBurnchainReward {
    pub burn_block_hash: String,
    pub burn_block_height: u32,
    pub burn_amount: u128,
    pub reward_recipient: String,
    pub reward_amount: u128,
    pub reward_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbRewardSlotHolder {
    pub burn_block_hash: String,
    pub burn_block_height: u32,
    pub address: String,
    pub slot_index: u32,
}

// ─── Mempool ──────────────────────────────────────────────────────────────────

/// Lifecycle status of a mempool transaction. The drop statuses mirror the
/// reasons the node reports; anything unrecognized maps to `Dropped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MempoolTxStatus {
    Pending,
    ReplaceByFee,
    ReplaceAcrossFork,
    TooExpensive,
    StaleGarbageCollect,
    Problematic,
    Dropped,
}

impl MempoolTxStatus {
    /// Total mapping from the node's free-form drop reason string.
    pub fn from_drop_reason(reason: &str) -> Self {
        match reason.trim() {
            "ReplaceByFee" | "replace_by_fee" => Self::ReplaceByFee,
            "ReplaceAcrossFork" | "replace_across_fork" => Self::ReplaceAcrossFork,
            "TooExpensive" | "too_expensive" => Self::TooExpensive,
            "StaleGarbageCollect" | "stale_garbage_collect" => Self::StaleGarbageCollect,
            "Problematic" | "problematic" => Self::Problematic,
            _ => Self::Dropped,
        }
    }
}

/// A transaction observed in the mempool: the transaction shell plus receipt
/// bookkeeping. Inserts are idempotent on `tx_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbMempoolTx {
    pub tx_id: String,
    pub raw_tx: Vec<u8>,
    pub type_id: stacksink_codec::tx::TxTypeId,
    pub nonce: u64,
    pub sender_address: String,
    pub sponsor_address: Option<String>,
    pub fee: u64,
    pub origin_hash_mode: u8,
    pub payload: TxPayload,
    /// Seconds since epoch, stamped locally at receipt.
    pub receipt_time: i64,
    pub pruned: bool,
    pub status: MempoolTxStatus,
}

// ─── Name system ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BnsName {
    pub name: String,
    pub namespace_id: String,
    pub address: String,
    pub registered_at: u32,
    /// `0` when the operation does not carry an expiry (renewals without a
    /// zonefile); readers resolve it from the namespace lifetime.
    pub expire_block: u32,
    pub zonefile_hash: String,
    pub zonefile: Option<String>,
    pub tx_id: String,
    pub status: String,
    pub canonical: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BnsNamespace {
    pub namespace_id: String,
    pub address: String,
    pub base: u64,
    pub coeff: u64,
    pub launched_at: Option<u32>,
    pub lifetime: u32,
    pub no_vowel_discount: u64,
    pub nonalpha_discount: u64,
    pub ready_block: u32,
    pub reveal_block: u32,
    pub buckets: String,
    pub tx_id: String,
    pub canonical: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BnsSubdomain {
    pub fully_qualified_subdomain: String,
    pub namespace_id: String,
    pub name: String,
    pub owner: String,
    pub zonefile: String,
    pub zonefile_hash: String,
    pub block_height: u32,
    pub tx_id: String,
    pub canonical: bool,
}

/// A zonefile attachment for a name operation, with subdomain records
/// derived from its TXT entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbAttachment {
    pub op: String,
    pub name: String,
    pub namespace: String,
    pub zonefile_hash: String,
    /// Hex content with the leading `0x` stripped.
    pub zonefile: String,
    pub tx_id: String,
    pub index_block_hash: String,
    pub block_height: u32,
    pub attachment_index: u32,
    pub subdomains: Vec<BnsSubdomain>,
}

// ─── Raw event log ────────────────────────────────────────────────────────────

/// One verbatim `(path, payload)` pair from the node, append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEventRecord {
    pub seq: u64,
    pub path: String,
    /// Compact single-line JSON.
    pub payload: String,
}

// ─── Update bundles ───────────────────────────────────────────────────────────

/// A transaction with its normalized events and extracted name records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbTxBundle {
    pub tx: DbTx,
    pub events: Vec<DbEvent>,
    pub names: Vec<BnsName>,
    pub namespaces: Vec<BnsNamespace>,
}

/// The complete causal content of one anchor block, committed atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockUpdate {
    pub block: DbBlock,
    pub microblocks: Vec<DbMicroblock>,
    pub miner_rewards: Vec<DbMinerReward>,
    pub txs: Vec<DbTxBundle>,
}

/// A batch of unconfirmed microblocks with their streamed transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroblockUpdate {
    pub microblocks: Vec<DbMicroblock>,
    pub txs: Vec<DbTxBundle>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_reason_mapping_is_total() {
        assert_eq!(
            MempoolTxStatus::from_drop_reason("ReplaceByFee"),
            MempoolTxStatus::ReplaceByFee
        );
        assert_eq!(
            MempoolTxStatus::from_drop_reason("stale_garbage_collect"),
            MempoolTxStatus::StaleGarbageCollect
        );
        assert_eq!(
            MempoolTxStatus::from_drop_reason("SomeFutureReason"),
            MempoolTxStatus::Dropped
        );
        assert_eq!(
            MempoolTxStatus::from_drop_reason(""),
            MempoolTxStatus::Dropped
        );
    }
}
