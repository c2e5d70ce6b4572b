//! Node message schemas.
//!
//! One explicit serde schema per endpoint body. Event payloads are a closed,
//! internally tagged enum: an unknown `type` fails the whole message rather
//! than being silently admitted.

use serde::Deserialize;

use crate::error::IngestError;
use crate::records::ExecutionCost;

// ─── Shared pieces ────────────────────────────────────────────────────────────

/// Node-reported transaction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreTxStatus {
    Success,
    AbortByResponse,
    AbortByPostCondition,
}

/// One mined or streamed transaction as the node reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct CoreNodeTxMessage {
    pub txid: String,
    pub tx_index: u32,
    pub status: CoreTxStatus,
    pub raw_result: String,
    /// Hex, `0x`-prefixed.
    pub raw_tx: String,
    #[serde(default)]
    pub execution_cost: ExecutionCost,
    #[serde(default)]
    pub microblock_sequence: Option<u16>,
    #[serde(default)]
    pub microblock_hash: Option<String>,
    #[serde(default)]
    pub microblock_parent_hash: Option<String>,
    #[serde(default)]
    pub contract_abi: Option<serde_json::Value>,
}

/// A typed event with its block-relative index and commit flag.
#[derive(Debug, Clone, Deserialize)]
pub struct CoreNodeEventMessage {
    pub txid: String,
    pub event_index: u32,
    pub committed: bool,
    #[serde(flatten)]
    pub payload: CoreNodeEvent,
}

/// The closed set of event kinds the node emits.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreNodeEvent {
    ContractEvent { contract_event: ContractLogEntry },
    StxTransferEvent { stx_transfer_event: StxTransferEntry },
    StxMintEvent { stx_mint_event: StxMintEntry },
    StxBurnEvent { stx_burn_event: StxBurnEntry },
    StxLockEvent { stx_lock_event: StxLockEntry },
    FtTransferEvent { ft_transfer_event: FtTransferEntry },
    FtMintEvent { ft_mint_event: FtMintEntry },
    FtBurnEvent { ft_burn_event: FtBurnEntry },
    NftTransferEvent { nft_transfer_event: NftTransferEntry },
    NftMintEvent { nft_mint_event: NftMintEntry },
    NftBurnEvent { nft_burn_event: NftBurnEntry },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractLogEntry {
    pub contract_identifier: String,
    pub topic: String,
    /// Hex-serialized Clarity value, `0x`-prefixed.
    pub raw_value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StxTransferEntry {
    pub sender: String,
    pub recipient: String,
    pub amount: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StxMintEntry {
    pub recipient: String,
    pub amount: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StxBurnEntry {
    pub sender: String,
    pub amount: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StxLockEntry {
    pub locked_amount: String,
    pub unlock_height: u32,
    pub locked_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FtTransferEntry {
    pub asset_identifier: String,
    pub sender: String,
    pub recipient: String,
    pub amount: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FtMintEntry {
    pub asset_identifier: String,
    pub recipient: String,
    pub amount: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FtBurnEntry {
    pub asset_identifier: String,
    pub sender: String,
    pub amount: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NftTransferEntry {
    pub asset_identifier: String,
    pub sender: String,
    pub recipient: String,
    pub raw_value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NftMintEntry {
    pub asset_identifier: String,
    pub recipient: String,
    pub raw_value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NftBurnEntry {
    pub asset_identifier: String,
    pub sender: String,
    pub raw_value: String,
}

// ─── /new_block ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct CoreNodeMaturedRewardMessage {
    pub recipient: String,
    pub coinbase_amount: String,
    pub tx_fees_anchored: String,
    pub tx_fees_streamed_confirmed: String,
    pub tx_fees_streamed_produced: String,
    pub from_index_block_hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoreNodeBlockMessage {
    pub block_hash: String,
    pub index_block_hash: String,
    pub parent_index_block_hash: String,
    pub parent_block_hash: String,
    pub parent_microblock: String,
    pub parent_microblock_sequence: u16,
    pub block_height: u32,
    pub burn_block_time: i64,
    pub burn_block_hash: String,
    pub burn_block_height: u32,
    pub miner_txid: String,
    pub transactions: Vec<CoreNodeTxMessage>,
    pub events: Vec<CoreNodeEventMessage>,
    #[serde(default)]
    pub matured_miner_rewards: Vec<CoreNodeMaturedRewardMessage>,
}

// ─── /new_microblocks ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct CoreNodeMicroblockMessage {
    pub parent_index_block_hash: String,
    pub burn_block_hash: String,
    pub burn_block_height: u32,
    pub burn_block_timestamp: i64,
    pub transactions: Vec<CoreNodeTxMessage>,
    pub events: Vec<CoreNodeEventMessage>,
}

// ─── /new_burn_block ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RewardRecipientMessage {
    pub recipient: String,
    pub amt: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoreNodeBurnBlockMessage {
    pub burn_block_hash: String,
    pub burn_block_height: u32,
    pub burn_amount: u64,
    pub reward_recipients: Vec<RewardRecipientMessage>,
    pub reward_slot_holders: Vec<String>,
}

// ─── /drop_mempool_tx ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct CoreNodeDropMempoolTxMessage {
    pub dropped_txids: Vec<String>,
    pub reason: String,
}

// ─── /attachments/new ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct CoreNodeAttachmentMessage {
    pub attachment_index: u32,
    pub index_block_hash: String,
    pub block_height: u32,
    pub content_hash: String,
    pub contract_id: String,
    /// Hex-serialized Clarity tuple `{op, name, namespace}`.
    pub metadata: String,
    pub tx_id: String,
    /// Hex zonefile content.
    pub content: String,
}

// ─── Parse helpers ────────────────────────────────────────────────────────────

/// Parse a decimal amount string into `u128`.
pub fn parse_amount(context: &'static str, s: &str) -> Result<u128, IngestError> {
    s.parse::<u128>()
        .map_err(|e| IngestError::decode(context, format!("bad amount {s:?}: {e}")))
}

/// Decode a hex field, tolerating a leading `0x`.
pub fn parse_hex(context: &'static str, s: &str) -> Result<Vec<u8>, IngestError> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(stripped).map_err(|e| IngestError::decode(context, format!("bad hex: {e}")))
}
