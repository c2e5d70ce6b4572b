//! Event extraction and per-transaction index normalization.
//!
//! The node reports events in block-relative index order. Ingestion drops
//! uncommitted events, scatters the rest into their owning transaction's
//! per-kind buckets, then per transaction merges the buckets back, re-sorts
//! by the original index and renumbers `0..N`. The original relative order
//! among one transaction's events is preserved exactly.

use std::collections::HashMap;

use stacksink_codec::ClarityValue;

use crate::bns::{self, BnsExtract, BnsTxContext};
use crate::error::IngestError;
use crate::msg::{parse_amount, parse_hex, CoreNodeEvent, CoreNodeEventMessage};
use crate::records::{BnsName, BnsNamespace, DbAssetOp, DbEvent, DbEventPayload, DbTx, DbTxBundle};

// ─── Per-transaction builder ──────────────────────────────────────────────────

/// Accumulates one transaction's events (bucketed by kind, keyed by their
/// original block-relative index) and extracted name records.
pub struct TxBundleBuilder {
    pub tx: DbTx,
    contract_logs: Vec<(u32, DbEventPayload)>,
    stx_events: Vec<(u32, DbEventPayload)>,
    stx_lock_events: Vec<(u32, DbEventPayload)>,
    ft_events: Vec<(u32, DbEventPayload)>,
    nft_events: Vec<(u32, DbEventPayload)>,
    pub names: Vec<BnsName>,
    pub namespaces: Vec<BnsNamespace>,
}

impl TxBundleBuilder {
    pub fn new(tx: DbTx) -> Self {
        Self {
            tx,
            contract_logs: vec![],
            stx_events: vec![],
            stx_lock_events: vec![],
            ft_events: vec![],
            nft_events: vec![],
            names: vec![],
            namespaces: vec![],
        }
    }

    fn push(&mut self, original_index: u32, payload: DbEventPayload) {
        let bucket = match &payload {
            DbEventPayload::SmartContractLog { .. } => &mut self.contract_logs,
            DbEventPayload::StxLock { .. } => &mut self.stx_lock_events,
            DbEventPayload::StxAsset { .. } => &mut self.stx_events,
            DbEventPayload::FungibleTokenAsset { .. } => &mut self.ft_events,
            DbEventPayload::NonFungibleTokenAsset { .. } => &mut self.nft_events,
        };
        bucket.push((original_index, payload));
    }

    /// Merge the buckets, restore node-emission order, renumber from zero
    /// and stamp the transaction's `event_count`.
    pub fn finish(mut self) -> DbTxBundle {
        let mut merged: Vec<(u32, DbEventPayload)> = Vec::with_capacity(
            self.contract_logs.len()
                + self.stx_events.len()
                + self.stx_lock_events.len()
                + self.ft_events.len()
                + self.nft_events.len(),
        );
        merged.append(&mut self.contract_logs);
        merged.append(&mut self.stx_events);
        merged.append(&mut self.stx_lock_events);
        merged.append(&mut self.ft_events);
        merged.append(&mut self.nft_events);
        // Stable: events sharing an original index keep their input order.
        merged.sort_by_key(|(original_index, _)| *original_index);

        self.tx.event_count = merged.len() as u32;
        let events = merged
            .into_iter()
            .enumerate()
            .map(|(new_index, (_, payload))| DbEvent {
                event_index: new_index as u32,
                tx_id: self.tx.tx_id.clone(),
                tx_index: self.tx.tx_index,
                block_height: self.tx.block_height,
                canonical: true,
                payload,
            })
            .collect();

        DbTxBundle {
            tx: self.tx,
            events,
            names: self.names,
            namespaces: self.namespaces,
        }
    }
}

// ─── Bundle set ───────────────────────────────────────────────────────────────

/// The transactions of one message, in arrival order, addressable by txid.
/// Events reference their owner through this map, never through pointers.
#[derive(Default)]
pub struct BundleSet {
    builders: Vec<TxBundleBuilder>,
    index: HashMap<String, usize>,
}

impl BundleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tx: DbTx) {
        self.index.insert(tx.tx_id.clone(), self.builders.len());
        self.builders.push(TxBundleBuilder::new(tx));
    }

    pub fn get_mut(&mut self, tx_id: &str) -> Option<&mut TxBundleBuilder> {
        let idx = *self.index.get(tx_id)?;
        self.builders.get_mut(idx)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TxBundleBuilder> {
        self.builders.iter_mut()
    }

    pub fn finish(self) -> Vec<DbTxBundle> {
        self.builders.into_iter().map(TxBundleBuilder::finish).collect()
    }
}

// ─── Dispatch ─────────────────────────────────────────────────────────────────

/// Route every committed event to its owning transaction, running the
/// name-system extractor on registry contract logs along the way.
pub fn dispatch_events(
    events: &[CoreNodeEventMessage],
    set: &mut BundleSet,
) -> Result<(), IngestError> {
    for msg in events {
        if !msg.committed {
            continue;
        }
        let builder = set
            .get_mut(&msg.txid)
            .ok_or_else(|| IngestError::ReferenceMissing {
                event_index: msg.event_index,
                tx_id: msg.txid.clone(),
            })?;
        let payload = convert_event(&msg.payload)?;

        if let DbEventPayload::SmartContractLog {
            contract_identifier,
            topic,
            value,
        } = &payload
        {
            if bns::is_bns_contract(contract_identifier) {
                let decoded = ClarityValue::decode(value)
                    .map_err(|e| IngestError::from_codec("registry log value", e))?;
                let ctx = BnsTxContext {
                    tx_id: &builder.tx.tx_id,
                    sender: &builder.tx.sender_address,
                    block_height: builder.tx.block_height.max(0) as u32,
                };
                match bns::extract_from_contract_log(contract_identifier, topic, &decoded, ctx) {
                    Some(BnsExtract::Name(name)) => builder.names.push(name),
                    Some(BnsExtract::Namespace(ns)) => builder.namespaces.push(ns),
                    None => {}
                }
            }
        }

        builder.push(msg.event_index, payload);
    }
    Ok(())
}

fn convert_event(event: &CoreNodeEvent) -> Result<DbEventPayload, IngestError> {
    Ok(match event {
        CoreNodeEvent::ContractEvent { contract_event } => DbEventPayload::SmartContractLog {
            contract_identifier: contract_event.contract_identifier.clone(),
            topic: contract_event.topic.clone(),
            value: parse_hex("contract log value", &contract_event.raw_value)?,
        },
        CoreNodeEvent::StxLockEvent { stx_lock_event } => DbEventPayload::StxLock {
            locked_amount: parse_amount("stx lock amount", &stx_lock_event.locked_amount)?,
            unlock_height: stx_lock_event.unlock_height,
            locked_address: stx_lock_event.locked_address.clone(),
        },
        CoreNodeEvent::StxTransferEvent { stx_transfer_event } => DbEventPayload::StxAsset {
            op: DbAssetOp::Transfer {
                sender: stx_transfer_event.sender.clone(),
                recipient: stx_transfer_event.recipient.clone(),
            },
            amount: parse_amount("stx transfer amount", &stx_transfer_event.amount)?,
        },
        CoreNodeEvent::StxMintEvent { stx_mint_event } => DbEventPayload::StxAsset {
            op: DbAssetOp::Mint {
                recipient: stx_mint_event.recipient.clone(),
            },
            amount: parse_amount("stx mint amount", &stx_mint_event.amount)?,
        },
        CoreNodeEvent::StxBurnEvent { stx_burn_event } => DbEventPayload::StxAsset {
            op: DbAssetOp::Burn {
                sender: stx_burn_event.sender.clone(),
            },
            amount: parse_amount("stx burn amount", &stx_burn_event.amount)?,
        },
        CoreNodeEvent::FtTransferEvent { ft_transfer_event } => {
            DbEventPayload::FungibleTokenAsset {
                op: DbAssetOp::Transfer {
                    sender: ft_transfer_event.sender.clone(),
                    recipient: ft_transfer_event.recipient.clone(),
                },
                asset_identifier: ft_transfer_event.asset_identifier.clone(),
                amount: parse_amount("ft transfer amount", &ft_transfer_event.amount)?,
            }
        }
        CoreNodeEvent::FtMintEvent { ft_mint_event } => DbEventPayload::FungibleTokenAsset {
            op: DbAssetOp::Mint {
                recipient: ft_mint_event.recipient.clone(),
            },
            asset_identifier: ft_mint_event.asset_identifier.clone(),
            amount: parse_amount("ft mint amount", &ft_mint_event.amount)?,
        },
        CoreNodeEvent::FtBurnEvent { ft_burn_event } => DbEventPayload::FungibleTokenAsset {
            op: DbAssetOp::Burn {
                sender: ft_burn_event.sender.clone(),
            },
            asset_identifier: ft_burn_event.asset_identifier.clone(),
            amount: parse_amount("ft burn amount", &ft_burn_event.amount)?,
        },
        CoreNodeEvent::NftTransferEvent { nft_transfer_event } => {
            DbEventPayload::NonFungibleTokenAsset {
                op: DbAssetOp::Transfer {
                    sender: nft_transfer_event.sender.clone(),
                    recipient: nft_transfer_event.recipient.clone(),
                },
                asset_identifier: nft_transfer_event.asset_identifier.clone(),
                value: parse_hex("nft value", &nft_transfer_event.raw_value)?,
            }
        }
        CoreNodeEvent::NftMintEvent { nft_mint_event } => DbEventPayload::NonFungibleTokenAsset {
            op: DbAssetOp::Mint {
                recipient: nft_mint_event.recipient.clone(),
            },
            asset_identifier: nft_mint_event.asset_identifier.clone(),
            value: parse_hex("nft value", &nft_mint_event.raw_value)?,
        },
        CoreNodeEvent::NftBurnEvent { nft_burn_event } => DbEventPayload::NonFungibleTokenAsset {
            op: DbAssetOp::Burn {
                sender: nft_burn_event.sender.clone(),
            },
            asset_identifier: nft_burn_event.asset_identifier.clone(),
            value: parse_hex("nft value", &nft_burn_event.raw_value)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{DbTxStatus, ExecutionCost};
    use stacksink_codec::{AnchorMode, PostConditionMode, TxPayload, TxTypeId};

    fn test_tx(tx_id: &str, tx_index: u32) -> DbTx {
        DbTx {
            tx_id: tx_id.to_string(),
            tx_index,
            index_block_hash: "0xib".into(),
            block_hash: "0xbh".into(),
            block_height: 100,
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

    fn stx_event(txid: &str, index: u32, committed: bool, amount: &str) -> CoreNodeEventMessage {
        serde_json::from_value(serde_json::json!({
            "txid": txid,
            "event_index": index,
            "committed": committed,
            "type": "stx_transfer_event",
            "stx_transfer_event": {"sender": "SP1", "recipient": "SP2", "amount": amount}
        }))
        .unwrap()
    }

    fn ft_event(txid: &str, index: u32) -> CoreNodeEventMessage {
        serde_json::from_value(serde_json::json!({
            "txid": txid,
            "event_index": index,
            "committed": true,
            "type": "ft_mint_event",
            "ft_mint_event": {
                "asset_identifier": "SP3.token::tok",
                "recipient": "SP2",
                "amount": "7"
            }
        }))
        .unwrap()
    }

    #[test]
    fn renumbers_per_tx_preserving_relative_order() {
        // Block-relative indexes [3(T2), 0(T1), 2(T2), 1(T1)]:
        // T1 keeps [0,1], T2 keeps [2,3], both renumbered to [0,1].
        let mut set = BundleSet::new();
        set.insert(test_tx("0xt1", 0));
        set.insert(test_tx("0xt2", 1));

        let events = vec![
            stx_event("0xt2", 3, true, "33"),
            stx_event("0xt1", 0, true, "10"),
            ft_event("0xt2", 2),
            stx_event("0xt1", 1, true, "11"),
        ];
        dispatch_events(&events, &mut set).unwrap();
        let bundles = set.finish();

        let t1 = &bundles[0];
        assert_eq!(t1.tx.event_count, 2);
        assert_eq!(
            t1.events.iter().map(|e| e.event_index).collect::<Vec<_>>(),
            vec![0, 1]
        );
        match (&t1.events[0].payload, &t1.events[1].payload) {
            (
                DbEventPayload::StxAsset { amount: a0, .. },
                DbEventPayload::StxAsset { amount: a1, .. },
            ) => {
                assert_eq!((*a0, *a1), (10, 11));
            }
            other => panic!("wrong payloads: {other:?}"),
        }

        let t2 = &bundles[1];
        assert_eq!(t2.tx.event_count, 2);
        assert_eq!(
            t2.events.iter().map(|e| e.event_index).collect::<Vec<_>>(),
            vec![0, 1]
        );
        // original order [2 (ft), 3 (stx)] preserved after the merge
        assert!(matches!(
            t2.events[0].payload,
            DbEventPayload::FungibleTokenAsset { .. }
        ));
        assert!(matches!(t2.events[1].payload, DbEventPayload::StxAsset { .. }));
    }

    #[test]
    fn uncommitted_events_are_dropped() {
        let mut set = BundleSet::new();
        set.insert(test_tx("0xt1", 0));
        let events = vec![
            stx_event("0xt1", 0, false, "1"),
            stx_event("0xt1", 1, true, "2"),
        ];
        dispatch_events(&events, &mut set).unwrap();
        let bundles = set.finish();
        assert_eq!(bundles[0].tx.event_count, 1);
        assert_eq!(bundles[0].events.len(), 1);
        assert!(matches!(
            bundles[0].events[0].payload,
            DbEventPayload::StxAsset { amount: 2, .. }
        ));
    }

    #[test]
    fn missing_owner_tx_is_fatal() {
        let mut set = BundleSet::new();
        set.insert(test_tx("0xt1", 0));
        let events = vec![stx_event("0xghost", 0, true, "1")];
        let err = dispatch_events(&events, &mut set).unwrap_err();
        assert!(matches!(
            err,
            IngestError::ReferenceMissing { event_index: 0, tx_id } if tx_id == "0xghost"
        ));
    }

    #[test]
    fn zero_event_tx_has_zero_count() {
        let mut set = BundleSet::new();
        set.insert(test_tx("0xt1", 0));
        let bundles = set.finish();
        assert_eq!(bundles[0].tx.event_count, 0);
        assert!(bundles[0].events.is_empty());
    }

    #[test]
    fn registry_log_produces_name_record() {
        // (tuple (op "name-register") (name "muneeb") (namespace "btc")) as
        // serialized clarity bytes, delivered through the contract event.
        let mut tuple_bytes = vec![0x0c, 0, 0, 0, 3];
        for (key, val) in [("op", "name-register"), ("name", "muneeb"), ("namespace", "btc")] {
            tuple_bytes.push(key.len() as u8);
            tuple_bytes.extend_from_slice(key.as_bytes());
            tuple_bytes.push(0x0d);
            tuple_bytes.extend_from_slice(&(val.len() as u32).to_be_bytes());
            tuple_bytes.extend_from_slice(val.as_bytes());
        }

        let event: CoreNodeEventMessage = serde_json::from_value(serde_json::json!({
            "txid": "0xt1",
            "event_index": 0,
            "committed": true,
            "type": "contract_event",
            "contract_event": {
                "contract_identifier": crate::bns::BNS_CONTRACT_MAINNET,
                "topic": "print",
                "raw_value": format!("0x{}", hex::encode(&tuple_bytes))
            }
        }))
        .unwrap();

        let mut set = BundleSet::new();
        set.insert(test_tx("0xt1", 0));
        dispatch_events(&[event], &mut set).unwrap();
        let bundles = set.finish();

        assert_eq!(bundles[0].names.len(), 1);
        assert_eq!(bundles[0].names[0].name, "muneeb");
        assert_eq!(bundles[0].names[0].address, "SP2SENDER");
        // the log itself is still a stored event
        assert_eq!(bundles[0].tx.event_count, 1);
    }
}
