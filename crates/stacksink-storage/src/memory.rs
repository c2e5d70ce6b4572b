//! In-memory storage backend.
//!
//! Holds every table in RAM behind one mutex. All data is lost when the
//! process exits. The canonical-chain bookkeeping matches the Postgres
//! backend so tests exercise real reorg semantics.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use stacksink_core::error::IngestError;
use stacksink_core::records::{
    BlockUpdate, BnsName, BnsNamespace, BnsSubdomain, DbAttachment, DbBlock, DbBurnchainReward,
    DbEvent, DbMempoolTx, DbMicroblock, DbMinerReward, DbRewardSlotHolder, DbTx, MempoolTxStatus,
    MicroblockUpdate, RawEventRecord,
};
use stacksink_core::store::IngestStore;

#[derive(Default)]
struct Inner {
    commit_seq: u64,
    raw_seq: u64,
    blocks: Vec<DbBlock>,
    /// `index_block_hash` → commit sequence, for arrival-order assertions.
    block_commits: HashMap<String, u64>,
    microblocks: Vec<DbMicroblock>,
    txs: Vec<DbTx>,
    events: Vec<DbEvent>,
    miner_rewards: Vec<DbMinerReward>,
    burn_rewards: Vec<DbBurnchainReward>,
    slot_holders: Vec<DbRewardSlotHolder>,
    mempool: HashMap<String, DbMempoolTx>,
    names: Vec<BnsName>,
    namespaces: Vec<BnsNamespace>,
    subdomains: Vec<BnsSubdomain>,
    attachments: Vec<DbAttachment>,
    raw_events: Vec<RawEventRecord>,
}

/// Everything except the raw-event log and local receipt timestamps, for
/// state-equivalence assertions (replay round trips).
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub blocks: Vec<DbBlock>,
    pub microblocks: Vec<DbMicroblock>,
    pub txs: Vec<DbTx>,
    pub events: Vec<DbEvent>,
    pub miner_rewards: Vec<DbMinerReward>,
    pub burn_rewards: Vec<DbBurnchainReward>,
    pub slot_holders: Vec<DbRewardSlotHolder>,
    pub mempool: Vec<DbMempoolTx>,
    pub names: Vec<BnsName>,
    pub namespaces: Vec<BnsNamespace>,
    pub subdomains: Vec<BnsSubdomain>,
    pub attachments: Vec<DbAttachment>,
}

/// In-memory ingest store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Test/introspection helpers ───────────────────────────────────────────

    pub fn block_count(&self) -> usize {
        self.inner.lock().unwrap().blocks.len()
    }

    pub fn tx_count(&self) -> usize {
        self.inner.lock().unwrap().txs.len()
    }

    pub fn event_count(&self) -> usize {
        self.inner.lock().unwrap().events.len()
    }

    pub fn mempool_len(&self) -> usize {
        self.inner.lock().unwrap().mempool.len()
    }

    pub fn mempool_tx(&self, tx_id: &str) -> Option<DbMempoolTx> {
        self.inner.lock().unwrap().mempool.get(tx_id).cloned()
    }

    pub fn canonical_block_at(&self, height: u32) -> Option<DbBlock> {
        self.inner
            .lock()
            .unwrap()
            .blocks
            .iter()
            .find(|b| b.block_height == height && b.canonical)
            .cloned()
    }

    pub fn block(&self, index_block_hash: &str) -> Option<DbBlock> {
        self.inner
            .lock()
            .unwrap()
            .blocks
            .iter()
            .find(|b| b.index_block_hash == index_block_hash)
            .cloned()
    }

    /// Commit sequence assigned when the block was applied.
    pub fn block_commit_seq(&self, index_block_hash: &str) -> Option<u64> {
        self.inner
            .lock()
            .unwrap()
            .block_commits
            .get(index_block_hash)
            .copied()
    }

    pub fn events_for_tx(&self, tx_id: &str) -> Vec<DbEvent> {
        let mut events: Vec<DbEvent> = self
            .inner
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| e.tx_id == tx_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.event_index);
        events
    }

    pub fn tx(&self, tx_id: &str) -> Option<DbTx> {
        self.inner
            .lock()
            .unwrap()
            .txs
            .iter()
            .find(|t| t.tx_id == tx_id)
            .cloned()
    }

    pub fn microblock(&self, microblock_hash: &str) -> Option<DbMicroblock> {
        self.inner
            .lock()
            .unwrap()
            .microblocks
            .iter()
            .find(|m| m.microblock_hash == microblock_hash)
            .cloned()
    }

    pub fn names_for(&self, name: &str, namespace: &str) -> Vec<BnsName> {
        self.inner
            .lock()
            .unwrap()
            .names
            .iter()
            .filter(|n| n.name == name && n.namespace_id == namespace)
            .cloned()
            .collect()
    }

    pub fn burn_rewards_at(&self, burn_block_hash: &str) -> Vec<DbBurnchainReward> {
        self.inner
            .lock()
            .unwrap()
            .burn_rewards
            .iter()
            .filter(|r| r.burn_block_hash == burn_block_hash)
            .cloned()
            .collect()
    }

    pub fn slot_holders_at(&self, burn_block_hash: &str) -> Vec<DbRewardSlotHolder> {
        self.inner
            .lock()
            .unwrap()
            .slot_holders
            .iter()
            .filter(|h| h.burn_block_hash == burn_block_hash)
            .cloned()
            .collect()
    }

    /// Chain state with local timestamps normalized, for equality checks
    /// across an export/replay round trip.
    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.lock().unwrap();
        let mut mempool: Vec<DbMempoolTx> = inner.mempool.values().cloned().collect();
        mempool.sort_by(|a, b| a.tx_id.cmp(&b.tx_id));
        for tx in &mut mempool {
            tx.receipt_time = 0;
        }
        StateSnapshot {
            blocks: inner.blocks.clone(),
            microblocks: inner.microblocks.clone(),
            txs: inner.txs.clone(),
            events: inner.events.clone(),
            miner_rewards: inner.miner_rewards.clone(),
            burn_rewards: inner.burn_rewards.clone(),
            slot_holders: inner.slot_holders.clone(),
            mempool,
            names: inner.names.clone(),
            namespaces: inner.namespaces.clone(),
            subdomains: inner.subdomains.clone(),
            attachments: inner.attachments.clone(),
        }
    }
}

// ─── Canonicality walks ───────────────────────────────────────────────────────

/// Flip one block and everything tied to it.
fn set_block_canonical(inner: &mut Inner, index_block_hash: &str, canonical: bool) {
    let tx_ids: HashSet<String> = inner
        .txs
        .iter()
        .filter(|t| t.index_block_hash == index_block_hash)
        .map(|t| t.tx_id.clone())
        .collect();

    for block in &mut inner.blocks {
        if block.index_block_hash == index_block_hash {
            block.canonical = canonical;
        }
    }
    for tx in &mut inner.txs {
        if tx.index_block_hash == index_block_hash {
            tx.canonical = canonical;
        }
    }
    for event in &mut inner.events {
        if tx_ids.contains(&event.tx_id) {
            event.canonical = canonical;
        }
    }
    for reward in &mut inner.miner_rewards {
        if reward.index_block_hash == index_block_hash {
            reward.canonical = canonical;
        }
    }
    for microblock in &mut inner.microblocks {
        if microblock.index_block_hash == index_block_hash {
            microblock.canonical = canonical;
        }
    }
    for name in &mut inner.names {
        if tx_ids.contains(&name.tx_id) {
            name.canonical = canonical;
        }
    }
    for ns in &mut inner.namespaces {
        if tx_ids.contains(&ns.tx_id) {
            ns.canonical = canonical;
        }
    }
    for sub in &mut inner.subdomains {
        if tx_ids.contains(&sub.tx_id) {
            sub.canonical = canonical;
        }
    }
}

/// Detach a block and all its still-canonical descendants.
fn detach_branch(inner: &mut Inner, index_block_hash: &str) {
    let mut frontier = vec![index_block_hash.to_string()];
    while let Some(hash) = frontier.pop() {
        set_block_canonical(inner, &hash, false);
        let children: Vec<String> = inner
            .blocks
            .iter()
            .filter(|b| b.parent_index_block_hash == hash && b.canonical)
            .map(|b| b.index_block_hash.clone())
            .collect();
        frontier.extend(children);
    }
}

/// Make the chain ending at `block` canonical: re-attach non-canonical
/// ancestors and detach the branches they displace.
fn resolve_reorg(inner: &mut Inner, block: &DbBlock) {
    // Displace any canonical sibling at the same height.
    let siblings: Vec<String> = inner
        .blocks
        .iter()
        .filter(|b| {
            b.block_height == block.block_height
                && b.canonical
                && b.index_block_hash != block.index_block_hash
        })
        .map(|b| b.index_block_hash.clone())
        .collect();
    for sibling in siblings {
        debug!(height = block.block_height, %sibling, "reorg: detaching sibling branch");
        detach_branch(inner, &sibling);
    }

    // Walk ancestors; re-attach any that a previous reorg detached.
    let mut cursor = block.parent_index_block_hash.clone();
    loop {
        let Some(parent) = inner
            .blocks
            .iter()
            .find(|b| b.index_block_hash == cursor)
            .cloned()
        else {
            break;
        };
        if parent.canonical {
            break;
        }
        let displaced: Vec<String> = inner
            .blocks
            .iter()
            .filter(|b| {
                b.block_height == parent.block_height
                    && b.canonical
                    && b.index_block_hash != parent.index_block_hash
            })
            .map(|b| b.index_block_hash.clone())
            .collect();
        for hash in displaced {
            detach_branch(inner, &hash);
        }
        set_block_canonical(inner, &parent.index_block_hash, true);
        cursor = parent.parent_index_block_hash.clone();
    }
}

/// Fill anchor identity on the streamed microblocks this block confirms and
/// orphan the rest of that stream.
fn confirm_microblocks(inner: &mut Inner, block: &DbBlock) {
    let confirms = crate::names_a_microblock(&block.parent_microblock_hash);
    for mb in &mut inner.microblocks {
        if mb.parent_index_block_hash != block.parent_index_block_hash || !mb.index_block_hash.is_empty()
        {
            continue;
        }
        let accepted = confirms && mb.microblock_sequence <= block.parent_microblock_sequence;
        if accepted {
            mb.index_block_hash = block.index_block_hash.clone();
            mb.block_hash = block.block_hash.clone();
            mb.block_height = i64::from(block.block_height);
            mb.parent_block_height = block.block_height.saturating_sub(1);
            mb.parent_block_hash = block.parent_block_hash.clone();
            mb.microblock_canonical = true;
            mb.canonical = block.canonical;
        } else {
            mb.microblock_canonical = false;
        }
    }
}

/// Remove rows from an earlier delivery of the same block, making
/// re-delivery idempotent.
fn remove_block_rows(inner: &mut Inner, index_block_hash: &str) {
    let tx_ids: HashSet<String> = inner
        .txs
        .iter()
        .filter(|t| t.index_block_hash == index_block_hash)
        .map(|t| t.tx_id.clone())
        .collect();
    inner.blocks.retain(|b| b.index_block_hash != index_block_hash);
    inner.txs.retain(|t| t.index_block_hash != index_block_hash);
    inner.events.retain(|e| !tx_ids.contains(&e.tx_id));
    inner
        .miner_rewards
        .retain(|r| r.index_block_hash != index_block_hash);
    inner.names.retain(|n| !tx_ids.contains(&n.tx_id));
    inner.namespaces.retain(|n| !tx_ids.contains(&n.tx_id));
    inner.subdomains.retain(|s| !tx_ids.contains(&s.tx_id));
}

// ─── IngestStore impl ─────────────────────────────────────────────────────────

#[async_trait]
impl IngestStore for MemoryStore {
    async fn update_block(&self, update: BlockUpdate) -> Result<(), IngestError> {
        let mut inner = self.inner.lock().unwrap();
        let inner = &mut *inner;
        inner.commit_seq += 1;
        let seq = inner.commit_seq;

        remove_block_rows(inner, &update.block.index_block_hash);
        resolve_reorg(inner, &update.block);
        confirm_microblocks(inner, &update.block);

        inner
            .block_commits
            .insert(update.block.index_block_hash.clone(), seq);
        inner.blocks.push(update.block);

        for mb in update.microblocks {
            let exists = inner.microblocks.iter().any(|m| {
                m.microblock_hash == mb.microblock_hash
                    && m.parent_index_block_hash == mb.parent_index_block_hash
                    && !m.index_block_hash.is_empty()
            });
            if !exists {
                inner
                    .microblocks
                    .retain(|m| !(m.microblock_hash == mb.microblock_hash && m.index_block_hash.is_empty()));
                inner.microblocks.push(mb);
            }
        }

        inner.miner_rewards.extend(update.miner_rewards);
        for bundle in update.txs {
            // Confirmed transactions leave the mempool.
            if let Some(pooled) = inner.mempool.get_mut(&bundle.tx.tx_id) {
                pooled.pruned = true;
            }
            inner.txs.push(bundle.tx);
            inner.events.extend(bundle.events);
            inner.names.extend(bundle.names);
            inner.namespaces.extend(bundle.namespaces);
        }
        Ok(())
    }

    async fn update_microblocks(&self, update: MicroblockUpdate) -> Result<(), IngestError> {
        let mut inner = self.inner.lock().unwrap();
        inner.commit_seq += 1;
        for mb in update.microblocks {
            let exists = inner
                .microblocks
                .iter()
                .any(|m| m.microblock_hash == mb.microblock_hash);
            if !exists {
                inner.microblocks.push(mb);
            }
        }
        for bundle in update.txs {
            if !inner.txs.iter().any(|t| t.tx_id == bundle.tx.tx_id) {
                inner.txs.push(bundle.tx);
                inner.events.extend(bundle.events);
                inner.names.extend(bundle.names);
                inner.namespaces.extend(bundle.namespaces);
            }
        }
        Ok(())
    }

    async fn update_burnchain_rewards(
        &self,
        rewards: Vec<DbBurnchainReward>,
    ) -> Result<(), IngestError> {
        let mut inner = self.inner.lock().unwrap();
        inner.commit_seq += 1;
        if let Some(first) = rewards.first() {
            let key = (first.burn_block_hash.clone(), first.burn_block_height);
            inner
                .burn_rewards
                .retain(|r| (r.burn_block_hash.clone(), r.burn_block_height) != key);
        }
        inner.burn_rewards.extend(rewards);
        Ok(())
    }

    async fn update_reward_slot_holders(
        &self,
        holders: Vec<DbRewardSlotHolder>,
    ) -> Result<(), IngestError> {
        let mut inner = self.inner.lock().unwrap();
        inner.commit_seq += 1;
        if let Some(first) = holders.first() {
            let key = (first.burn_block_hash.clone(), first.burn_block_height);
            inner
                .slot_holders
                .retain(|h| (h.burn_block_hash.clone(), h.burn_block_height) != key);
        }
        inner.slot_holders.extend(holders);
        Ok(())
    }

    async fn update_mempool_txs(&self, txs: Vec<DbMempoolTx>) -> Result<(), IngestError> {
        let mut inner = self.inner.lock().unwrap();
        inner.commit_seq += 1;
        for tx in txs {
            // Idempotent on tx_id: the first receipt wins.
            inner.mempool.entry(tx.tx_id.clone()).or_insert(tx);
        }
        Ok(())
    }

    async fn drop_mempool_txs(
        &self,
        status: MempoolTxStatus,
        tx_ids: Vec<String>,
    ) -> Result<(), IngestError> {
        let mut inner = self.inner.lock().unwrap();
        inner.commit_seq += 1;
        for tx_id in tx_ids {
            if let Some(tx) = inner.mempool.get_mut(&tx_id) {
                tx.status = status;
                tx.pruned = true;
            }
        }
        Ok(())
    }

    async fn update_attachments(&self, attachments: Vec<DbAttachment>) -> Result<(), IngestError> {
        let mut inner = self.inner.lock().unwrap();
        inner.commit_seq += 1;
        for attachment in attachments {
            inner.subdomains.extend(attachment.subdomains.iter().cloned());
            inner.attachments.push(attachment);
        }
        Ok(())
    }

    async fn store_raw_event_request(
        &self,
        path: &str,
        payload: &str,
    ) -> Result<u64, IngestError> {
        let mut inner = self.inner.lock().unwrap();
        inner.raw_seq += 1;
        let seq = inner.raw_seq;
        inner.raw_events.push(RawEventRecord {
            seq,
            path: path.to_string(),
            payload: payload.to_string(),
        });
        Ok(seq)
    }

    async fn raw_event_requests(&self) -> Result<Vec<RawEventRecord>, IngestError> {
        Ok(self.inner.lock().unwrap().raw_events.clone())
    }

    async fn prune_raw_event_requests(&self) -> Result<u64, IngestError> {
        let mut inner = self.inner.lock().unwrap();
        let removed = inner.raw_events.len() as u64;
        inner.raw_events.clear();
        Ok(removed)
    }

    async fn is_empty(&self) -> Result<bool, IngestError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.blocks.is_empty()
            && inner.txs.is_empty()
            && inner.mempool.is_empty()
            && inner.raw_events.is_empty())
    }

    async fn wipe(&self) -> Result<(), IngestError> {
        let mut inner = self.inner.lock().unwrap();
        *inner = Inner::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stacksink_core::records::{DbTxBundle, DbTxStatus, ExecutionCost};
    use stacksink_codec::{AnchorMode, PostConditionMode, TxPayload, TxTypeId};

    fn block(height: u32, ibh: &str, parent_ibh: &str) -> DbBlock {
        DbBlock {
            block_hash: format!("0xbh-{ibh}"),
            index_block_hash: ibh.to_string(),
            parent_index_block_hash: parent_ibh.to_string(),
            parent_block_hash: format!("0xbh-{parent_ibh}"),
            parent_microblock_hash: String::new(),
            parent_microblock_sequence: 0,
            block_height: height,
            burn_block_time: 1_600_000_000,
            burn_block_hash: "0xburn".into(),
            burn_block_height: height + 800,
            miner_txid: "0xminer".into(),
            execution_cost: ExecutionCost::default(),
            canonical: true,
        }
    }

    fn tx(tx_id: &str, ibh: &str, height: i64) -> DbTx {
        DbTx {
            tx_id: tx_id.to_string(),
            tx_index: 0,
            index_block_hash: ibh.to_string(),
            block_hash: format!("0xbh-{ibh}"),
            block_height: height,
            burn_block_time: 1_600_000_000,
            nonce: 0,
            type_id: TxTypeId::Coinbase,
            sender_address: "SP2SENDER".into(),
            sponsor_address: None,
            fee: 0,
            anchor_mode: AnchorMode::Any,
            post_condition_mode: PostConditionMode::Deny,
            post_conditions: vec![0, 0, 0, 0],
            raw_tx: vec![],
            payload: TxPayload::Coinbase { payload: [0u8; 32] },
            microblock_hash: None,
            microblock_sequence: None,
            event_count: 0,
            canonical: true,
            origin_hash_mode: 0,
            status: DbTxStatus::Success,
            raw_result: "0x03".into(),
            execution_cost: ExecutionCost::default(),
            contract_abi: None,
        }
    }

    fn bundle(tx_id: &str, ibh: &str, height: i64) -> DbTxBundle {
        DbTxBundle {
            tx: tx(tx_id, ibh, height),
            events: vec![],
            names: vec![],
            namespaces: vec![],
        }
    }

    fn block_update(height: u32, ibh: &str, parent_ibh: &str, tx_ids: &[&str]) -> BlockUpdate {
        BlockUpdate {
            block: block(height, ibh, parent_ibh),
            microblocks: vec![],
            miner_rewards: vec![],
            txs: tx_ids
                .iter()
                .map(|id| bundle(id, ibh, i64::from(height)))
                .collect(),
        }
    }

    fn mempool_tx(tx_id: &str, receipt_time: i64) -> DbMempoolTx {
        DbMempoolTx {
            tx_id: tx_id.to_string(),
            raw_tx: vec![0x00],
            type_id: TxTypeId::TokenTransfer,
            nonce: 1,
            sender_address: "SP2SENDER".into(),
            sponsor_address: None,
            fee: 200,
            origin_hash_mode: 0,
            payload: TxPayload::Coinbase { payload: [0u8; 32] },
            receipt_time,
            pruned: false,
            status: MempoolTxStatus::Pending,
        }
    }

    #[tokio::test]
    async fn commit_sequence_tracks_arrival_order() {
        let store = MemoryStore::new();
        store.update_block(block_update(1, "0xa", "0x0", &["0xt1"])).await.unwrap();
        store.update_block(block_update(2, "0xb", "0xa", &["0xt2"])).await.unwrap();
        assert!(store.block_commit_seq("0xa").unwrap() < store.block_commit_seq("0xb").unwrap());
    }

    #[tokio::test]
    async fn reorg_flips_sibling_branch_and_reattaches() {
        let store = MemoryStore::new();
        // main chain: a(1) ── b(2); fork: b2(2) ── c2(3)
        store.update_block(block_update(1, "0xa", "0x0", &["0xt-a"])).await.unwrap();
        store.update_block(block_update(2, "0xb", "0xa", &["0xt-b"])).await.unwrap();

        store.update_block(block_update(2, "0xb2", "0xa", &["0xt-b2"])).await.unwrap();
        // the new block wins its height; the old branch flips off
        assert!(!store.block("0xb").unwrap().canonical);
        assert!(store.block("0xb2").unwrap().canonical);
        assert!(!store.tx("0xt-b").unwrap().canonical);

        // extending the old branch re-attaches it and detaches b2
        store.update_block(block_update(3, "0xc", "0xb", &["0xt-c"])).await.unwrap();
        assert!(store.block("0xb").unwrap().canonical);
        assert!(!store.block("0xb2").unwrap().canonical);
        assert!(store.tx("0xt-b").unwrap().canonical);
        assert!(!store.tx("0xt-b2").unwrap().canonical);
        assert_eq!(store.canonical_block_at(3).unwrap().index_block_hash, "0xc");
    }

    #[tokio::test]
    async fn duplicate_block_delivery_is_idempotent() {
        let store = MemoryStore::new();
        let update = block_update(1, "0xa", "0x0", &["0xt1"]);
        store.update_block(update.clone()).await.unwrap();
        store.update_block(update).await.unwrap();
        assert_eq!(store.block_count(), 1);
        assert_eq!(store.tx_count(), 1);
    }

    #[tokio::test]
    async fn mempool_insert_is_idempotent_on_txid() {
        let store = MemoryStore::new();
        store.update_mempool_txs(vec![mempool_tx("0xm1", 111)]).await.unwrap();
        store.update_mempool_txs(vec![mempool_tx("0xm1", 222)]).await.unwrap();
        assert_eq!(store.mempool_len(), 1);
        // first receipt wins
        assert_eq!(store.mempool_tx("0xm1").unwrap().receipt_time, 111);
    }

    #[tokio::test]
    async fn dropped_mempool_txs_change_status() {
        let store = MemoryStore::new();
        store
            .update_mempool_txs(vec![mempool_tx("0xm1", 1), mempool_tx("0xm2", 1)])
            .await
            .unwrap();
        store
            .drop_mempool_txs(MempoolTxStatus::ReplaceByFee, vec!["0xm1".into()])
            .await
            .unwrap();
        assert_eq!(
            store.mempool_tx("0xm1").unwrap().status,
            MempoolTxStatus::ReplaceByFee
        );
        assert!(store.mempool_tx("0xm1").unwrap().pruned);
        assert_eq!(store.mempool_tx("0xm2").unwrap().status, MempoolTxStatus::Pending);
    }

    #[tokio::test]
    async fn mined_tx_prunes_its_mempool_entry() {
        let store = MemoryStore::new();
        store.update_mempool_txs(vec![mempool_tx("0xt1", 1)]).await.unwrap();
        store.update_block(block_update(1, "0xa", "0x0", &["0xt1"])).await.unwrap();
        assert!(store.mempool_tx("0xt1").unwrap().pruned);
    }

    #[tokio::test]
    async fn anchor_block_confirms_streamed_microblocks() {
        let store = MemoryStore::new();
        let streamed = DbMicroblock {
            microblock_hash: "0xmb0".into(),
            microblock_sequence: 0,
            microblock_parent_hash: "0x00".into(),
            parent_index_block_hash: "0xa".into(),
            parent_burn_block_height: 900,
            parent_burn_block_hash: "0xburn".into(),
            parent_burn_block_time: 1_600_000_000,
            block_height: -1,
            parent_block_height: 0,
            parent_block_hash: String::new(),
            index_block_hash: String::new(),
            block_hash: String::new(),
            canonical: true,
            microblock_canonical: false,
        };
        let orphaned = DbMicroblock {
            microblock_hash: "0xmb1".into(),
            microblock_sequence: 1,
            microblock_parent_hash: "0xmb0".into(),
            ..streamed.clone()
        };
        store
            .update_microblocks(MicroblockUpdate {
                microblocks: vec![streamed, orphaned],
                txs: vec![],
            })
            .await
            .unwrap();

        // anchor at height 2 confirms only sequence 0
        let mut update = block_update(2, "0xb", "0xa", &[]);
        update.block.parent_microblock_hash = "0xmb0".into();
        update.block.parent_microblock_sequence = 0;
        store.update_block(update).await.unwrap();

        let confirmed = store.microblock("0xmb0").unwrap();
        assert!(confirmed.microblock_canonical);
        assert_eq!(confirmed.index_block_hash, "0xb");
        assert_eq!(confirmed.block_height, 2);

        let orphan = store.microblock("0xmb1").unwrap();
        assert!(!orphan.microblock_canonical);
        assert_eq!(orphan.index_block_hash, "");
    }

    #[tokio::test]
    async fn burn_block_redelivery_replaces_rows() {
        let store = MemoryStore::new();
        let reward = |i: u32| DbBurnchainReward {
            burn_block_hash: "0xburn".into(),
            burn_block_height: 900,
            burn_amount: 5000,
            reward_recipient: format!("addr{i}"),
            reward_amount: 100,
            reward_index: i,
        };
        store.update_burnchain_rewards(vec![reward(0), reward(1)]).await.unwrap();
        store.update_burnchain_rewards(vec![reward(0), reward(1)]).await.unwrap();
        assert_eq!(store.burn_rewards_at("0xburn").len(), 2);
    }

    #[tokio::test]
    async fn wipe_then_is_empty() {
        let store = MemoryStore::new();
        store.update_block(block_update(1, "0xa", "0x0", &["0xt1"])).await.unwrap();
        store.store_raw_event_request("/new_block", "{}").await.unwrap();
        assert!(!store.is_empty().await.unwrap());
        store.wipe().await.unwrap();
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn raw_event_log_is_append_only_and_ordered() {
        let store = MemoryStore::new();
        assert_eq!(store.store_raw_event_request("/a", "{}").await.unwrap(), 1);
        assert_eq!(store.store_raw_event_request("/b", "{}").await.unwrap(), 2);
        let records = store.raw_event_requests().await.unwrap();
        assert_eq!(records.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(records[1].path, "/b");
        assert_eq!(store.prune_raw_event_requests().await.unwrap(), 2);
        assert!(store.raw_event_requests().await.unwrap().is_empty());
    }
}
