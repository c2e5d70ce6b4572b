//! Message handlers: one per endpoint.
//!
//! Every handler follows the same discipline: validate and decode, build a
//! single update bundle of domain records, then invoke exactly one store
//! transaction. Failures abort the whole message; the node retries.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use stacksink_codec::{decode_tx, txid, DecodedTx};

use crate::bns::{self, BnsTxContext};
use crate::error::IngestError;
use crate::events::{dispatch_events, BundleSet};
use crate::microblocks::{reconstruct_microblocks, MicroblockParentContext};
use crate::msg::{
    parse_amount, parse_hex, CoreNodeAttachmentMessage, CoreNodeBlockMessage,
    CoreNodeBurnBlockMessage, CoreNodeDropMempoolTxMessage, CoreNodeMicroblockMessage,
    CoreNodeTxMessage, CoreTxStatus,
};
use crate::records::{
    BlockUpdate, DbAttachment, DbBlock, DbBurnchainReward, DbMempoolTx, DbMinerReward,
    DbRewardSlotHolder, DbTx, DbTxStatus, ExecutionCost, MempoolTxStatus, MicroblockUpdate,
};
use crate::store::IngestStore;

/// Identity of the containing block, or sentinels for streamed transactions
/// whose confirming anchor block has not arrived yet.
struct BlockIdentity {
    index_block_hash: String,
    block_hash: String,
    block_height: i64,
    burn_block_time: i64,
}

impl BlockIdentity {
    fn unconfirmed() -> Self {
        Self {
            index_block_hash: String::new(),
            block_hash: String::new(),
            block_height: -1,
            burn_block_time: -1,
        }
    }
}

/// Stateless message-to-store pipeline. One instance serves every endpoint;
/// all invocations are serialized by the queue in front of it.
pub struct Ingester {
    store: Arc<dyn IngestStore>,
    chain_id: u32,
}

impl Ingester {
    pub fn new(store: Arc<dyn IngestStore>, chain_id: u32) -> Self {
        Self { store, chain_id }
    }

    pub fn store(&self) -> Arc<dyn IngestStore> {
        Arc::clone(&self.store)
    }

    fn check_chain_id(&self, decoded: &DecodedTx) -> Result<(), IngestError> {
        if decoded.chain_id != self.chain_id {
            return Err(IngestError::ChainIdMismatch {
                expected: self.chain_id,
                actual: decoded.chain_id,
            });
        }
        Ok(())
    }

    /// `/new_block`
    pub async fn handle_block(&self, msg: CoreNodeBlockMessage) -> Result<(), IngestError> {
        let mut block = DbBlock {
            block_hash: msg.block_hash.clone(),
            index_block_hash: msg.index_block_hash.clone(),
            parent_index_block_hash: msg.parent_index_block_hash.clone(),
            parent_block_hash: msg.parent_block_hash.clone(),
            parent_microblock_hash: msg.parent_microblock.clone(),
            parent_microblock_sequence: msg.parent_microblock_sequence,
            block_height: msg.block_height,
            burn_block_time: msg.burn_block_time,
            burn_block_hash: msg.burn_block_hash.clone(),
            burn_block_height: msg.burn_block_height,
            miner_txid: msg.miner_txid.clone(),
            execution_cost: ExecutionCost::default(),
            canonical: true,
        };

        let identity = BlockIdentity {
            index_block_hash: msg.index_block_hash.clone(),
            block_hash: msg.block_hash.clone(),
            block_height: i64::from(msg.block_height),
            burn_block_time: msg.burn_block_time,
        };
        let mut set = BundleSet::new();
        for tx_msg in &msg.transactions {
            let tx = self.decode_db_tx(tx_msg, &identity)?;
            block.execution_cost = sum_cost(block.execution_cost, tx.execution_cost);
            set.insert(tx);
        }

        dispatch_events(&msg.events, &mut set)?;
        apply_renewal_fallback(&mut set);

        let microblocks = reconstruct_microblocks(
            &msg.transactions,
            &MicroblockParentContext::from_anchor(&block),
            Some(&block),
        );

        let miner_rewards = msg
            .matured_miner_rewards
            .iter()
            .map(|reward| {
                Ok(DbMinerReward {
                    block_hash: msg.block_hash.clone(),
                    index_block_hash: msg.index_block_hash.clone(),
                    from_index_block_hash: reward.from_index_block_hash.clone(),
                    mature_block_height: msg.block_height,
                    recipient: reward.recipient.clone(),
                    coinbase_amount: parse_amount("coinbase amount", &reward.coinbase_amount)?,
                    tx_fees_anchored: parse_amount("anchored fees", &reward.tx_fees_anchored)?,
                    tx_fees_streamed_confirmed: parse_amount(
                        "streamed confirmed fees",
                        &reward.tx_fees_streamed_confirmed,
                    )?,
                    tx_fees_streamed_produced: parse_amount(
                        "streamed produced fees",
                        &reward.tx_fees_streamed_produced,
                    )?,
                    canonical: true,
                })
            })
            .collect::<Result<Vec<_>, IngestError>>()?;

        let txs = set.finish();
        info!(
            block_height = msg.block_height,
            index_block_hash = %msg.index_block_hash,
            tx_count = txs.len(),
            microblock_count = microblocks.len(),
            "applying anchor block"
        );
        self.store
            .update_block(BlockUpdate {
                block,
                microblocks,
                miner_rewards,
                txs,
            })
            .await
    }

    /// `/new_microblocks`
    pub async fn handle_microblocks(
        &self,
        msg: CoreNodeMicroblockMessage,
    ) -> Result<(), IngestError> {
        let identity = BlockIdentity::unconfirmed();
        let mut set = BundleSet::new();
        for tx_msg in &msg.transactions {
            set.insert(self.decode_db_tx(tx_msg, &identity)?);
        }
        dispatch_events(&msg.events, &mut set)?;
        apply_renewal_fallback(&mut set);

        let parent = MicroblockParentContext {
            parent_index_block_hash: msg.parent_index_block_hash.clone(),
            parent_burn_block_height: msg.burn_block_height,
            parent_burn_block_hash: msg.burn_block_hash.clone(),
            parent_burn_block_time: msg.burn_block_timestamp,
        };
        let microblocks = reconstruct_microblocks(&msg.transactions, &parent, None);

        let txs = set.finish();
        info!(
            parent_index_block_hash = %msg.parent_index_block_hash,
            microblock_count = microblocks.len(),
            tx_count = txs.len(),
            "applying unconfirmed microblocks"
        );
        self.store
            .update_microblocks(MicroblockUpdate { microblocks, txs })
            .await
    }

    /// `/new_burn_block`
    pub async fn handle_burn_block(&self, msg: CoreNodeBurnBlockMessage) -> Result<(), IngestError> {
        let rewards = msg
            .reward_recipients
            .iter()
            .enumerate()
            .map(|(i, r)| DbBurnchainReward {
                burn_block_hash: msg.burn_block_hash.clone(),
                burn_block_height: msg.burn_block_height,
                burn_amount: u128::from(msg.burn_amount),
                reward_recipient: r.recipient.clone(),
                reward_amount: u128::from(r.amt),
                reward_index: i as u32,
            })
            .collect::<Vec<_>>();
        let holders = msg
            .reward_slot_holders
            .iter()
            .enumerate()
            .map(|(i, address)| DbRewardSlotHolder {
                burn_block_hash: msg.burn_block_hash.clone(),
                burn_block_height: msg.burn_block_height,
                address: address.clone(),
                slot_index: i as u32,
            })
            .collect::<Vec<_>>();

        debug!(
            burn_block_height = msg.burn_block_height,
            rewards = rewards.len(),
            slot_holders = holders.len(),
            "applying burn block"
        );
        self.store.update_burnchain_rewards(rewards).await?;
        self.store.update_reward_slot_holders(holders).await
    }

    /// `/new_mempool_tx`
    pub async fn handle_mempool_txs(&self, raw_txs: Vec<String>) -> Result<(), IngestError> {
        let receipt_time = Utc::now().timestamp();
        let mut txs = Vec::with_capacity(raw_txs.len());
        for raw_hex in &raw_txs {
            let raw = parse_hex("raw mempool transaction", raw_hex)?;
            let decoded = decode_tx(&raw)
                .map_err(|e| IngestError::from_codec("raw mempool transaction", e))?;
            self.check_chain_id(&decoded)?;
            txs.push(DbMempoolTx {
                tx_id: txid(&raw),
                raw_tx: raw,
                type_id: decoded.payload.type_id(),
                nonce: decoded.nonce(),
                sender_address: decoded.sender_address().to_c32(),
                sponsor_address: decoded.sponsor_address().map(|a| a.to_c32()),
                fee: decoded.fee(),
                origin_hash_mode: decoded.origin_hash_mode(),
                payload: decoded.payload,
                receipt_time,
                pruned: false,
                status: MempoolTxStatus::Pending,
            });
        }
        debug!(count = txs.len(), "applying mempool transactions");
        self.store.update_mempool_txs(txs).await
    }

    /// `/drop_mempool_tx`
    pub async fn handle_drop_mempool_txs(
        &self,
        msg: CoreNodeDropMempoolTxMessage,
    ) -> Result<(), IngestError> {
        let status = MempoolTxStatus::from_drop_reason(&msg.reason);
        debug!(
            reason = %msg.reason,
            ?status,
            count = msg.dropped_txids.len(),
            "dropping mempool transactions"
        );
        self.store.drop_mempool_txs(status, msg.dropped_txids).await
    }

    /// `/attachments/new`
    pub async fn handle_attachments(
        &self,
        msgs: Vec<CoreNodeAttachmentMessage>,
    ) -> Result<(), IngestError> {
        let mut attachments = Vec::new();
        for msg in &msgs {
            if !bns::is_bns_contract(&msg.contract_id) {
                continue;
            }
            let metadata_bytes = parse_hex("attachment metadata", &msg.metadata)?;
            let metadata = stacksink_codec::ClarityValue::decode(&metadata_bytes)
                .map_err(|e| IngestError::from_codec("attachment metadata", e))?;
            let Some((op, name, namespace)) = bns::extract_attachment_metadata(&metadata) else {
                debug!(contract_id = %msg.contract_id, "skipping attachment with unrecognized op");
                continue;
            };

            let zonefile_hex = msg.content.strip_prefix("0x").unwrap_or(&msg.content);
            let zonefile_text = parse_hex("attachment content", &msg.content)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())?;
            let subdomains = bns::parse_zonefile_subdomains(
                &zonefile_text,
                &name,
                &namespace,
                &msg.tx_id,
                msg.block_height,
            );

            attachments.push(DbAttachment {
                op,
                name,
                namespace,
                zonefile_hash: msg.content_hash.clone(),
                zonefile: zonefile_hex.to_string(),
                tx_id: msg.tx_id.clone(),
                index_block_hash: msg.index_block_hash.clone(),
                block_height: msg.block_height,
                attachment_index: msg.attachment_index,
                subdomains,
            });
        }
        debug!(count = attachments.len(), "applying attachments");
        self.store.update_attachments(attachments).await
    }

    /// Decode one node-reported transaction into its domain record.
    fn decode_db_tx(
        &self,
        tx_msg: &CoreNodeTxMessage,
        identity: &BlockIdentity,
    ) -> Result<DbTx, IngestError> {
        let raw = parse_hex("raw transaction", &tx_msg.raw_tx)?;
        let decoded =
            decode_tx(&raw).map_err(|e| IngestError::from_codec("raw transaction", e))?;
        self.check_chain_id(&decoded)?;

        let sender_address = decoded.sender_address().to_c32();
        let sponsor_address = decoded.sponsor_address().map(|a| a.to_c32());
        let nonce = decoded.nonce();
        let fee = decoded.fee();
        let origin_hash_mode = decoded.origin_hash_mode();

        Ok(DbTx {
            tx_id: tx_msg.txid.clone(),
            tx_index: tx_msg.tx_index,
            index_block_hash: identity.index_block_hash.clone(),
            block_hash: identity.block_hash.clone(),
            block_height: identity.block_height,
            burn_block_time: identity.burn_block_time,
            nonce,
            type_id: decoded.payload.type_id(),
            sender_address,
            sponsor_address,
            fee,
            anchor_mode: decoded.anchor_mode,
            post_condition_mode: decoded.post_condition_mode,
            post_conditions: decoded.post_conditions.clone(),
            raw_tx: raw,
            payload: decoded.payload,
            microblock_hash: tx_msg.microblock_hash.clone().filter(|h| !h.is_empty()),
            microblock_sequence: tx_msg.microblock_sequence,
            event_count: 0,
            canonical: true,
            origin_hash_mode,
            status: match tx_msg.status {
                CoreTxStatus::Success => DbTxStatus::Success,
                CoreTxStatus::AbortByResponse => DbTxStatus::AbortByResponse,
                CoreTxStatus::AbortByPostCondition => DbTxStatus::AbortByPostCondition,
            },
            raw_result: tx_msg.raw_result.clone(),
            execution_cost: tx_msg.execution_cost,
            contract_abi: tx_msg.contract_abi.clone(),
        })
    }
}

/// Synthesize the name record for renewals that emitted no log.
fn apply_renewal_fallback(set: &mut BundleSet) {
    for builder in set.iter_mut() {
        if builder.names.iter().any(|n| n.status == "name-renewal") {
            continue;
        }
        let ctx = BnsTxContext {
            tx_id: &builder.tx.tx_id,
            sender: &builder.tx.sender_address,
            block_height: builder.tx.block_height.max(0) as u32,
        };
        if let Some(name) = bns::extract_renewal_from_contract_call(&builder.tx.payload, ctx) {
            builder.names.push(name);
        }
    }
}

fn sum_cost(a: ExecutionCost, b: ExecutionCost) -> ExecutionCost {
    ExecutionCost {
        read_count: a.read_count + b.read_count,
        read_length: a.read_length + b.read_length,
        runtime: a.runtime + b.runtime,
        write_count: a.write_count + b.write_count,
        write_length: a.write_length + b.write_length,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{DbAttachment, RawEventRecord};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Captures every store call for assertions.
    #[derive(Default)]
    struct RecordingStore {
        pub block_updates: Mutex<Vec<BlockUpdate>>,
        pub microblock_updates: Mutex<Vec<MicroblockUpdate>>,
        pub burn_rewards: Mutex<Vec<Vec<DbBurnchainReward>>>,
        pub slot_holders: Mutex<Vec<Vec<DbRewardSlotHolder>>>,
        pub mempool: Mutex<Vec<Vec<DbMempoolTx>>>,
        pub drops: Mutex<Vec<(MempoolTxStatus, Vec<String>)>>,
        pub attachments: Mutex<Vec<Vec<DbAttachment>>>,
    }

    #[async_trait]
    impl IngestStore for RecordingStore {
        async fn update_block(&self, update: BlockUpdate) -> Result<(), IngestError> {
            self.block_updates.lock().unwrap().push(update);
            Ok(())
        }
        async fn update_microblocks(&self, update: MicroblockUpdate) -> Result<(), IngestError> {
            self.microblock_updates.lock().unwrap().push(update);
            Ok(())
        }
        async fn update_burnchain_rewards(
            &self,
            rewards: Vec<DbBurnchainReward>,
        ) -> Result<(), IngestError> {
            self.burn_rewards.lock().unwrap().push(rewards);
            Ok(())
        }
        async fn update_reward_slot_holders(
            &self,
            holders: Vec<DbRewardSlotHolder>,
        ) -> Result<(), IngestError> {
            self.slot_holders.lock().unwrap().push(holders);
            Ok(())
        }
        async fn update_mempool_txs(&self, txs: Vec<DbMempoolTx>) -> Result<(), IngestError> {
            self.mempool.lock().unwrap().push(txs);
            Ok(())
        }
        async fn drop_mempool_txs(
            &self,
            status: MempoolTxStatus,
            tx_ids: Vec<String>,
        ) -> Result<(), IngestError> {
            self.drops.lock().unwrap().push((status, tx_ids));
            Ok(())
        }
        async fn update_attachments(
            &self,
            attachments: Vec<DbAttachment>,
        ) -> Result<(), IngestError> {
            self.attachments.lock().unwrap().push(attachments);
            Ok(())
        }
        async fn store_raw_event_request(
            &self,
            _path: &str,
            _payload: &str,
        ) -> Result<u64, IngestError> {
            Ok(0)
        }
        async fn raw_event_requests(&self) -> Result<Vec<RawEventRecord>, IngestError> {
            Ok(vec![])
        }
        async fn prune_raw_event_requests(&self) -> Result<u64, IngestError> {
            Ok(0)
        }
        async fn is_empty(&self) -> Result<bool, IngestError> {
            Ok(true)
        }
        async fn wipe(&self) -> Result<(), IngestError> {
            Ok(())
        }
    }

    fn ingester() -> (Arc<RecordingStore>, Ingester) {
        let store = Arc::new(RecordingStore::default());
        let ingester = Ingester::new(store.clone(), 1);
        (store, ingester)
    }

    /// Raw coinbase transaction bytes: mainnet, chain id 1, standard
    /// singlesig auth.
    fn coinbase_raw(chain_id: u32, nonce: u64) -> Vec<u8> {
        let mut raw = vec![0x00];
        raw.extend_from_slice(&chain_id.to_be_bytes());
        raw.push(0x04); // standard auth
        raw.push(0x00); // p2pkh
        raw.extend_from_slice(&[7u8; 20]);
        raw.extend_from_slice(&nonce.to_be_bytes());
        raw.extend_from_slice(&0u64.to_be_bytes());
        raw.push(0x00);
        raw.extend_from_slice(&[0u8; 65]);
        raw.push(0x03); // anchor: any
        raw.push(0x02); // deny
        raw.extend_from_slice(&0u32.to_be_bytes());
        raw.push(0x04); // coinbase
        raw.extend_from_slice(&[0xaa; 32]);
        raw
    }

    fn block_msg(raw_tx: &[u8]) -> CoreNodeBlockMessage {
        serde_json::from_value(serde_json::json!({
            "block_hash": "0xbh",
            "index_block_hash": "0xib",
            "parent_index_block_hash": "0xpib",
            "parent_block_hash": "0xpbh",
            "parent_microblock": "0x00",
            "parent_microblock_sequence": 0,
            "block_height": 100,
            "burn_block_time": 1600000000,
            "burn_block_hash": "0xburn",
            "burn_block_height": 900,
            "miner_txid": "0xminer",
            "transactions": [{
                "txid": "0xt1",
                "tx_index": 0,
                "status": "success",
                "raw_result": "0x03",
                "raw_tx": format!("0x{}", hex::encode(raw_tx)),
                "execution_cost": {
                    "read_count": 1, "read_length": 2, "runtime": 3,
                    "write_count": 4, "write_length": 5
                }
            }],
            "events": []
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn coinbase_block_with_no_events() {
        let (store, ingester) = ingester();
        ingester.handle_block(block_msg(&coinbase_raw(1, 0))).await.unwrap();

        let updates = store.block_updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        let update = &updates[0];
        assert_eq!(update.block.block_height, 100);
        assert_eq!(update.block.execution_cost.runtime, 3);
        assert!(update.block.canonical);
        assert_eq!(update.txs.len(), 1);
        let bundle = &update.txs[0];
        assert_eq!(bundle.tx.event_count, 0);
        assert!(bundle.events.is_empty());
        assert_eq!(bundle.tx.block_height, 100);
        assert_eq!(bundle.tx.index_block_hash, "0xib");
        assert!(update.microblocks.is_empty());
        assert!(update.miner_rewards.is_empty());
    }

    #[tokio::test]
    async fn chain_id_mismatch_aborts_the_message() {
        let (store, ingester) = ingester();
        let err = ingester
            .handle_block(block_msg(&coinbase_raw(0x8000_0000, 0)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::ChainIdMismatch { expected: 1, actual: 0x8000_0000 }
        ));
        assert!(store.block_updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn burn_block_rewards_are_indexed_in_emission_order() {
        let (store, ingester) = ingester();
        let msg: CoreNodeBurnBlockMessage = serde_json::from_value(serde_json::json!({
            "burn_block_hash": "0xburn",
            "burn_block_height": 900,
            "burn_amount": 5000,
            "reward_recipients": [
                {"recipient": "addr1", "amt": 400},
                {"recipient": "addr2", "amt": 600}
            ],
            "reward_slot_holders": ["addr1", "addr2", "addr3"]
        }))
        .unwrap();
        ingester.handle_burn_block(msg).await.unwrap();

        let rewards = store.burn_rewards.lock().unwrap();
        assert_eq!(rewards[0].len(), 2);
        assert_eq!(
            rewards[0].iter().map(|r| r.reward_index).collect::<Vec<_>>(),
            vec![0, 1]
        );
        let holders = store.slot_holders.lock().unwrap();
        assert_eq!(
            holders[0].iter().map(|h| h.slot_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[tokio::test]
    async fn mempool_txs_get_computed_txid_and_pending_status() {
        let (store, ingester) = ingester();
        let raw = coinbase_raw(1, 3);
        ingester
            .handle_mempool_txs(vec![format!("0x{}", hex::encode(&raw))])
            .await
            .unwrap();

        let batches = store.mempool.lock().unwrap();
        let tx = &batches[0][0];
        assert_eq!(tx.tx_id, txid(&raw));
        assert_eq!(tx.nonce, 3);
        assert_eq!(tx.status, MempoolTxStatus::Pending);
        assert!(!tx.pruned);
        assert!(tx.receipt_time > 0);
    }

    #[tokio::test]
    async fn drop_reason_translates_to_status() {
        let (store, ingester) = ingester();
        let msg: CoreNodeDropMempoolTxMessage = serde_json::from_value(serde_json::json!({
            "dropped_txids": ["0xa", "0xb", "0xc"],
            "reason": "ReplaceByFee"
        }))
        .unwrap();
        ingester.handle_drop_mempool_txs(msg).await.unwrap();

        let drops = store.drops.lock().unwrap();
        assert_eq!(drops[0].0, MempoolTxStatus::ReplaceByFee);
        assert_eq!(drops[0].1.len(), 3);
    }

    #[tokio::test]
    async fn attachments_filter_to_registry_contract() {
        let (store, ingester) = ingester();
        // metadata: (tuple (op "register") (name "alice") (namespace "id"))
        let mut metadata = vec![0x0c, 0, 0, 0, 3];
        for (key, val) in [("name", "alice"), ("namespace", "id"), ("op", "register")] {
            metadata.push(key.len() as u8);
            metadata.extend_from_slice(key.as_bytes());
            metadata.push(0x0d);
            metadata.extend_from_slice(&(val.len() as u32).to_be_bytes());
            metadata.extend_from_slice(val.as_bytes());
        }
        let zonefile = hex::encode(b"alice TXT \"owner=SP3ALICE\" \"zf0=AAA\"\n");

        let make = |contract_id: &str| {
            serde_json::from_value::<CoreNodeAttachmentMessage>(serde_json::json!({
                "attachment_index": 0,
                "index_block_hash": "0xib",
                "block_height": 100,
                "content_hash": "0xhash",
                "contract_id": contract_id,
                "metadata": format!("0x{}", hex::encode(&metadata)),
                "tx_id": "0xt9",
                "content": format!("0x{zonefile}")
            }))
            .unwrap()
        };

        ingester
            .handle_attachments(vec![
                make("SP000000000000000000002Q6VF78.bns"),
                make("SP123.not-the-registry"),
            ])
            .await
            .unwrap();

        let batches = store.attachments.lock().unwrap();
        assert_eq!(batches[0].len(), 1);
        let att = &batches[0][0];
        assert_eq!(att.op, "register");
        assert_eq!(att.name, "alice");
        assert_eq!(att.zonefile, zonefile);
        assert_eq!(att.subdomains.len(), 1);
        assert_eq!(att.subdomains[0].owner, "SP3ALICE");
    }
}
