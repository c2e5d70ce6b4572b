//! The store contract the ingestion core depends on.
//!
//! Each update call carries one message's complete causal bundle and must
//! commit atomically. Canonical-chain resolution lives behind this trait:
//! the core always inserts with `canonical = true` and the store flips
//! canonicality when a new anchor block's parent chain diverges.

use async_trait::async_trait;

use crate::error::IngestError;
use crate::records::{
    BlockUpdate, DbAttachment, DbBurnchainReward, DbMempoolTx, DbRewardSlotHolder,
    MempoolTxStatus, MicroblockUpdate, RawEventRecord,
};

#[async_trait]
pub trait IngestStore: Send + Sync {
    /// Commit one anchor block's bundle atomically, resolving reorgs.
    async fn update_block(&self, update: BlockUpdate) -> Result<(), IngestError>;

    /// Commit a batch of unconfirmed microblocks atomically.
    async fn update_microblocks(&self, update: MicroblockUpdate) -> Result<(), IngestError>;

    /// Insert burn-chain rewards for one burn block.
    /// Paired with `update_reward_slot_holders` for the same block.
    async fn update_burnchain_rewards(
        &self,
        rewards: Vec<DbBurnchainReward>,
    ) -> Result<(), IngestError>;

    async fn update_reward_slot_holders(
        &self,
        holders: Vec<DbRewardSlotHolder>,
    ) -> Result<(), IngestError>;

    /// Upsert mempool transactions; idempotent on `tx_id`.
    async fn update_mempool_txs(&self, txs: Vec<DbMempoolTx>) -> Result<(), IngestError>;

    /// Move the given mempool transactions to a dropped status.
    async fn drop_mempool_txs(
        &self,
        status: MempoolTxStatus,
        tx_ids: Vec<String>,
    ) -> Result<(), IngestError>;

    /// Commit one batch of zonefile attachments (with derived subdomains).
    async fn update_attachments(&self, attachments: Vec<DbAttachment>) -> Result<(), IngestError>;

    /// Append one raw `(path, payload)` pair; returns the assigned sequence.
    /// Uses its own connection so it never blocks the typed write path.
    async fn store_raw_event_request(&self, path: &str, payload: &str)
        -> Result<u64, IngestError>;

    /// All raw records in ascending sequence order (export source).
    async fn raw_event_requests(&self) -> Result<Vec<RawEventRecord>, IngestError>;

    /// Delete raw records after a pruned-mode replay; returns rows removed.
    async fn prune_raw_event_requests(&self) -> Result<u64, IngestError>;

    /// `true` when no chain data has ever been ingested (replay safety check).
    async fn is_empty(&self) -> Result<bool, IngestError>;

    /// Destroy all stored data (replay `wipe-db` mode).
    async fn wipe(&self) -> Result<(), IngestError>;
}
