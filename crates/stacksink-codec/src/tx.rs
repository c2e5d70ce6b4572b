//! Stacks wire-format transaction decoder.
//!
//! Decodes the raw transaction bytes the node attaches to block, microblock
//! and mempool messages. The decode is total over the closed set of tags
//! below; any unknown tag or truncation is a `CodecError` and the caller
//! aborts the whole message.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512_256};

use crate::address::{
    StacksAddress, C32_VERSION_MAINNET_P2PKH, C32_VERSION_MAINNET_P2SH,
    C32_VERSION_TESTNET_P2PKH, C32_VERSION_TESTNET_P2SH,
};
use crate::clarity::{ClarityValue, PrincipalData};
use crate::error::CodecError;
use crate::reader::ByteReader;

/// Transaction id: SHA-512/256 over the raw transaction bytes, hex with a
/// `0x` prefix. Used for mempool messages, which carry no txid of their own.
pub fn txid(raw: &[u8]) -> String {
    let digest = Sha512_256::digest(raw);
    format!("0x{}", hex::encode(digest))
}

// ─── Wire enums ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionVersion {
    Mainnet,
    Testnet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum AnchorMode {
    OnChainOnly = 0x01,
    OffChainOnly = 0x02,
    Any = 0x03,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PostConditionMode {
    Allow = 0x01,
    Deny = 0x02,
}

/// Numeric payload discriminant, stable across storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TxTypeId {
    TokenTransfer = 0x00,
    SmartContract = 0x01,
    ContractCall = 0x02,
    PoisonMicroblock = 0x03,
    Coinbase = 0x04,
    VersionedSmartContract = 0x06,
}

// ─── Authorization ────────────────────────────────────────────────────────────

const AUTH_STANDARD: u8 = 0x04;
const AUTH_SPONSORED: u8 = 0x05;

const HASH_MODE_P2PKH: u8 = 0x00;
const HASH_MODE_P2SH: u8 = 0x01;
const HASH_MODE_P2WPKH: u8 = 0x02;
const HASH_MODE_P2WSH: u8 = 0x03;

/// One spending condition of the authorization. Signature material is
/// consumed during decode but not retained; ingestion never verifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingCondition {
    pub hash_mode: u8,
    pub signer: [u8; 20],
    pub nonce: u64,
    pub fee: u64,
}

impl SpendingCondition {
    /// The c32 address of this condition under the given network version.
    pub fn address(&self, version: TransactionVersion) -> StacksAddress {
        let addr_version = match (version, self.hash_mode) {
            (TransactionVersion::Mainnet, HASH_MODE_P2PKH | HASH_MODE_P2WPKH) => {
                C32_VERSION_MAINNET_P2PKH
            }
            (TransactionVersion::Mainnet, _) => C32_VERSION_MAINNET_P2SH,
            (TransactionVersion::Testnet, HASH_MODE_P2PKH | HASH_MODE_P2WPKH) => {
                C32_VERSION_TESTNET_P2PKH
            }
            (TransactionVersion::Testnet, _) => C32_VERSION_TESTNET_P2SH,
        };
        StacksAddress {
            version: addr_version,
            hash160: self.signer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxAuth {
    Standard(SpendingCondition),
    Sponsored {
        origin: SpendingCondition,
        sponsor: SpendingCondition,
    },
}

impl TxAuth {
    pub fn origin(&self) -> &SpendingCondition {
        match self {
            Self::Standard(origin) | Self::Sponsored { origin, .. } => origin,
        }
    }

    pub fn sponsor(&self) -> Option<&SpendingCondition> {
        match self {
            Self::Standard(_) => None,
            Self::Sponsored { sponsor, .. } => Some(sponsor),
        }
    }
}

// ─── Payload ──────────────────────────────────────────────────────────────────

const PAYLOAD_TOKEN_TRANSFER: u8 = 0x00;
const PAYLOAD_SMART_CONTRACT: u8 = 0x01;
const PAYLOAD_CONTRACT_CALL: u8 = 0x02;
const PAYLOAD_POISON_MICROBLOCK: u8 = 0x03;
const PAYLOAD_COINBASE: u8 = 0x04;
const PAYLOAD_VERSIONED_SMART_CONTRACT: u8 = 0x06;

/// A microblock header, as carried by a poison-microblock payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicroblockHeader {
    pub version: u8,
    pub sequence: u16,
    pub prev_block: [u8; 32],
    pub tx_merkle_root: [u8; 32],
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxPayload {
    TokenTransfer {
        recipient: PrincipalData,
        amount: u64,
        memo: Vec<u8>,
    },
    SmartContract {
        name: String,
        code_body: String,
    },
    ContractCall {
        address: StacksAddress,
        contract_name: String,
        function_name: String,
        function_args: Vec<ClarityValue>,
    },
    PoisonMicroblock {
        header_1: MicroblockHeader,
        header_2: MicroblockHeader,
    },
    Coinbase {
        payload: [u8; 32],
    },
    VersionedSmartContract {
        clarity_version: u8,
        name: String,
        code_body: String,
    },
}

impl TxPayload {
    pub fn type_id(&self) -> TxTypeId {
        match self {
            Self::TokenTransfer { .. } => TxTypeId::TokenTransfer,
            Self::SmartContract { .. } => TxTypeId::SmartContract,
            Self::ContractCall { .. } => TxTypeId::ContractCall,
            Self::PoisonMicroblock { .. } => TxTypeId::PoisonMicroblock,
            Self::Coinbase { .. } => TxTypeId::Coinbase,
            Self::VersionedSmartContract { .. } => TxTypeId::VersionedSmartContract,
        }
    }
}

// ─── DecodedTx ────────────────────────────────────────────────────────────────

/// A fully decoded transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedTx {
    pub version: TransactionVersion,
    pub chain_id: u32,
    pub auth: TxAuth,
    pub anchor_mode: AnchorMode,
    pub post_condition_mode: PostConditionMode,
    /// Raw post-condition span (count word included), kept verbatim.
    pub post_conditions: Vec<u8>,
    pub post_condition_count: u32,
    pub payload: TxPayload,
}

impl DecodedTx {
    pub fn sender_address(&self) -> StacksAddress {
        self.auth.origin().address(self.version)
    }

    pub fn sponsor_address(&self) -> Option<StacksAddress> {
        self.auth.sponsor().map(|s| s.address(self.version))
    }

    pub fn nonce(&self) -> u64 {
        self.auth.origin().nonce
    }

    /// Fee is paid by the sponsor when one is present.
    pub fn fee(&self) -> u64 {
        match &self.auth {
            TxAuth::Standard(origin) => origin.fee,
            TxAuth::Sponsored { sponsor, .. } => sponsor.fee,
        }
    }

    pub fn origin_hash_mode(&self) -> u8 {
        self.auth.origin().hash_mode
    }
}

/// Decode a complete raw transaction. Trailing bytes are an error.
pub fn decode_tx(raw: &[u8]) -> Result<DecodedTx, CodecError> {
    let mut r = ByteReader::new(raw);

    let version = match r.read_u8()? {
        0x00 => TransactionVersion::Mainnet,
        0x80 => TransactionVersion::Testnet,
        other => {
            return Err(CodecError::UnknownTag {
                what: "transaction version",
                tag: other,
                offset: 0,
            })
        }
    };
    let chain_id = r.read_u32()?;

    let auth_offset = r.pos();
    let auth = match r.read_u8()? {
        AUTH_STANDARD => TxAuth::Standard(read_spending_condition(&mut r)?),
        AUTH_SPONSORED => TxAuth::Sponsored {
            origin: read_spending_condition(&mut r)?,
            sponsor: read_spending_condition(&mut r)?,
        },
        other => {
            return Err(CodecError::UnknownTag {
                what: "authorization type",
                tag: other,
                offset: auth_offset,
            })
        }
    };

    let anchor_offset = r.pos();
    let anchor_mode = match r.read_u8()? {
        0x01 => AnchorMode::OnChainOnly,
        0x02 => AnchorMode::OffChainOnly,
        0x03 => AnchorMode::Any,
        other => {
            return Err(CodecError::UnknownTag {
                what: "anchor mode",
                tag: other,
                offset: anchor_offset,
            })
        }
    };

    let pc_mode_offset = r.pos();
    let post_condition_mode = match r.read_u8()? {
        0x01 => PostConditionMode::Allow,
        0x02 => PostConditionMode::Deny,
        other => {
            return Err(CodecError::UnknownTag {
                what: "post-condition mode",
                tag: other,
                offset: pc_mode_offset,
            })
        }
    };

    let pc_start = r.pos();
    let post_condition_count = r.read_u32()?;
    for _ in 0..post_condition_count {
        skip_post_condition(&mut r)?;
    }
    let post_conditions = raw[pc_start..r.pos()].to_vec();

    let payload = read_payload(&mut r)?;
    r.expect_eof("transaction")?;

    Ok(DecodedTx {
        version,
        chain_id,
        auth,
        anchor_mode,
        post_condition_mode,
        post_conditions,
        post_condition_count,
        payload,
    })
}

fn read_spending_condition(r: &mut ByteReader<'_>) -> Result<SpendingCondition, CodecError> {
    let offset = r.pos();
    let hash_mode = r.read_u8()?;
    let signer = r.read_array::<20>()?;
    let nonce = r.read_u64()?;
    let fee = r.read_u64()?;
    match hash_mode {
        HASH_MODE_P2PKH | HASH_MODE_P2WPKH => {
            let _key_encoding = r.read_u8()?;
            let _signature = r.read_bytes(65)?;
        }
        HASH_MODE_P2SH | HASH_MODE_P2WSH => {
            let field_count = r.read_u32()?;
            for _ in 0..field_count {
                let field_offset = r.pos();
                match r.read_u8()? {
                    // public key (compressed / uncompressed marker)
                    0x00 | 0x01 => {
                        r.read_bytes(33)?;
                    }
                    // signature (compressed / uncompressed marker)
                    0x02 | 0x03 => {
                        r.read_bytes(65)?;
                    }
                    other => {
                        return Err(CodecError::UnknownTag {
                            what: "authorization field",
                            tag: other,
                            offset: field_offset,
                        })
                    }
                }
            }
            let _signatures_required = r.read_u16()?;
        }
        other => {
            return Err(CodecError::UnknownTag {
                what: "hash mode",
                tag: other,
                offset,
            })
        }
    }
    Ok(SpendingCondition {
        hash_mode,
        signer,
        nonce,
        fee,
    })
}

/// Read a principal with its own wire tag (0x05 standard / 0x06 contract),
/// the encoding token-transfer recipients use.
fn read_principal(r: &mut ByteReader<'_>) -> Result<PrincipalData, CodecError> {
    let offset = r.pos();
    match r.read_u8()? {
        0x05 => {
            let version = r.read_u8()?;
            let hash160 = r.read_array::<20>()?;
            Ok(PrincipalData::Standard(StacksAddress::new(version, hash160)?))
        }
        0x06 => {
            let version = r.read_u8()?;
            let hash160 = r.read_array::<20>()?;
            let name = r.read_clarity_name()?;
            Ok(PrincipalData::Contract {
                address: StacksAddress::new(version, hash160)?,
                name,
            })
        }
        other => Err(CodecError::UnknownTag {
            what: "principal",
            tag: other,
            offset,
        }),
    }
}

/// Parse past one post condition; the raw span is kept by the caller.
fn skip_post_condition(r: &mut ByteReader<'_>) -> Result<(), CodecError> {
    let offset = r.pos();
    let asset_type = r.read_u8()?;
    skip_post_condition_principal(r)?;
    match asset_type {
        // STX: condition code + amount
        0x00 => {
            r.read_u8()?;
            r.read_u64()?;
        }
        // fungible: asset info + condition code + amount
        0x01 => {
            skip_asset_info(r)?;
            r.read_u8()?;
            r.read_u64()?;
        }
        // non-fungible: asset info + asset value + condition code
        0x02 => {
            skip_asset_info(r)?;
            ClarityValue::read(r, 0)?;
            r.read_u8()?;
        }
        other => {
            return Err(CodecError::UnknownTag {
                what: "post-condition asset type",
                tag: other,
                offset,
            })
        }
    }
    Ok(())
}

fn skip_post_condition_principal(r: &mut ByteReader<'_>) -> Result<(), CodecError> {
    let offset = r.pos();
    match r.read_u8()? {
        // origin principal, no body
        0x01 => Ok(()),
        // standard principal
        0x02 => {
            r.read_bytes(21)?;
            Ok(())
        }
        // contract principal
        0x03 => {
            r.read_bytes(21)?;
            r.read_clarity_name()?;
            Ok(())
        }
        other => Err(CodecError::UnknownTag {
            what: "post-condition principal",
            tag: other,
            offset,
        }),
    }
}

fn skip_asset_info(r: &mut ByteReader<'_>) -> Result<(), CodecError> {
    r.read_bytes(21)?;
    r.read_clarity_name()?;
    r.read_clarity_name()?;
    Ok(())
}

fn read_code_body(r: &mut ByteReader<'_>) -> Result<String, CodecError> {
    let len = r.read_u32()? as usize;
    let bytes = r.read_bytes(len)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|e| CodecError::invalid("contract code body", e.to_string()))
}

fn read_microblock_header(r: &mut ByteReader<'_>) -> Result<MicroblockHeader, CodecError> {
    Ok(MicroblockHeader {
        version: r.read_u8()?,
        sequence: r.read_u16()?,
        prev_block: r.read_array::<32>()?,
        tx_merkle_root: r.read_array::<32>()?,
        signature: r.read_bytes(65)?.to_vec(),
    })
}

fn read_payload(r: &mut ByteReader<'_>) -> Result<TxPayload, CodecError> {
    let offset = r.pos();
    match r.read_u8()? {
        PAYLOAD_TOKEN_TRANSFER => {
            let recipient = read_principal(r)?;
            let amount = r.read_u64()?;
            let memo = r.read_bytes(34)?.to_vec();
            Ok(TxPayload::TokenTransfer {
                recipient,
                amount,
                memo,
            })
        }
        PAYLOAD_SMART_CONTRACT => Ok(TxPayload::SmartContract {
            name: r.read_clarity_name()?,
            code_body: read_code_body(r)?,
        }),
        PAYLOAD_CONTRACT_CALL => {
            let version = r.read_u8()?;
            let hash160 = r.read_array::<20>()?;
            let contract_name = r.read_clarity_name()?;
            let function_name = r.read_clarity_name()?;
            let arg_count = r.read_u32()? as usize;
            let mut function_args = Vec::with_capacity(arg_count.min(64));
            for _ in 0..arg_count {
                function_args.push(ClarityValue::read(r, 0)?);
            }
            Ok(TxPayload::ContractCall {
                address: StacksAddress::new(version, hash160)?,
                contract_name,
                function_name,
                function_args,
            })
        }
        PAYLOAD_POISON_MICROBLOCK => Ok(TxPayload::PoisonMicroblock {
            header_1: read_microblock_header(r)?,
            header_2: read_microblock_header(r)?,
        }),
        PAYLOAD_COINBASE => Ok(TxPayload::Coinbase {
            payload: r.read_array::<32>()?,
        }),
        PAYLOAD_VERSIONED_SMART_CONTRACT => Ok(TxPayload::VersionedSmartContract {
            clarity_version: r.read_u8()?,
            name: r.read_clarity_name()?,
            code_body: read_code_body(r)?,
        }),
        other => Err(CodecError::UnknownTag {
            what: "payload",
            tag: other,
            offset,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Standard singlesig spending condition bytes: signer hash, nonce, fee.
    fn singlesig_condition(signer_byte: u8, nonce: u64, fee: u64) -> Vec<u8> {
        let mut out = vec![HASH_MODE_P2PKH];
        out.extend_from_slice(&[signer_byte; 20]);
        out.extend_from_slice(&nonce.to_be_bytes());
        out.extend_from_slice(&fee.to_be_bytes());
        out.push(0x00); // key encoding
        out.extend_from_slice(&[0u8; 65]); // signature
        out
    }

    /// Header bytes shared by all test transactions: mainnet, chain id 1,
    /// standard auth, any anchor mode, deny post-condition mode, zero
    /// post conditions.
    fn tx_prefix(nonce: u64, fee: u64) -> Vec<u8> {
        let mut out = vec![0x00]; // mainnet
        out.extend_from_slice(&1u32.to_be_bytes());
        out.push(AUTH_STANDARD);
        out.extend_from_slice(&singlesig_condition(7, nonce, fee));
        out.push(0x03); // anchor: any
        out.push(0x02); // post-condition mode: deny
        out.extend_from_slice(&0u32.to_be_bytes());
        out
    }

    #[test]
    fn decodes_coinbase() {
        let mut raw = tx_prefix(0, 0);
        raw.push(PAYLOAD_COINBASE);
        raw.extend_from_slice(&[0xaa; 32]);

        let tx = decode_tx(&raw).unwrap();
        assert_eq!(tx.version, TransactionVersion::Mainnet);
        assert_eq!(tx.chain_id, 1);
        assert_eq!(tx.payload.type_id(), TxTypeId::Coinbase);
        assert_eq!(tx.nonce(), 0);
        assert!(tx.sponsor_address().is_none());
        assert!(tx.sender_address().to_c32().starts_with("SP"));
    }

    #[test]
    fn decodes_token_transfer() {
        let mut raw = tx_prefix(5, 180);
        raw.push(PAYLOAD_TOKEN_TRANSFER);
        raw.push(0x05); // standard principal recipient
        raw.push(22);
        raw.extend_from_slice(&[0u8; 20]);
        raw.extend_from_slice(&5000u64.to_be_bytes());
        raw.extend_from_slice(&[0u8; 34]); // memo

        let tx = decode_tx(&raw).unwrap();
        assert_eq!(tx.nonce(), 5);
        assert_eq!(tx.fee(), 180);
        match &tx.payload {
            TxPayload::TokenTransfer {
                recipient, amount, ..
            } => {
                assert_eq!(*amount, 5000);
                assert_eq!(recipient.to_string(), "SP000000000000000000002Q6VF78");
            }
            other => panic!("wrong payload: {other:?}"),
        }
    }

    #[test]
    fn decodes_sponsored_contract_call() {
        let mut raw = vec![0x00];
        raw.extend_from_slice(&1u32.to_be_bytes());
        raw.push(AUTH_SPONSORED);
        raw.extend_from_slice(&singlesig_condition(1, 9, 0));
        raw.extend_from_slice(&singlesig_condition(2, 3, 250));
        raw.push(0x03);
        raw.push(0x01); // allow
        raw.extend_from_slice(&0u32.to_be_bytes());
        raw.push(PAYLOAD_CONTRACT_CALL);
        raw.push(22);
        raw.extend_from_slice(&[0u8; 20]);
        raw.push(3);
        raw.extend_from_slice(b"bns");
        raw.push(12);
        raw.extend_from_slice(b"name-renewal");
        raw.extend_from_slice(&1u32.to_be_bytes());
        // one uint arg
        raw.push(0x01);
        raw.extend_from_slice(&42u128.to_be_bytes());

        let tx = decode_tx(&raw).unwrap();
        assert_eq!(tx.nonce(), 9);
        // sponsor pays
        assert_eq!(tx.fee(), 250);
        assert!(tx.sponsor_address().is_some());
        match &tx.payload {
            TxPayload::ContractCall {
                contract_name,
                function_name,
                function_args,
                ..
            } => {
                assert_eq!(contract_name, "bns");
                assert_eq!(function_name, "name-renewal");
                assert_eq!(function_args[0].as_u128(), Some(42));
            }
            other => panic!("wrong payload: {other:?}"),
        }
    }

    #[test]
    fn captures_post_condition_span_verbatim() {
        let mut raw = tx_prefix(0, 0);
        // replace the zero post-condition count with one STX condition
        let count_at = raw.len() - 4;
        raw.truncate(count_at);
        raw.extend_from_slice(&1u32.to_be_bytes());
        raw.push(0x00); // STX
        raw.push(0x01); // origin principal
        raw.push(0x03); // condition code
        raw.extend_from_slice(&100u64.to_be_bytes());
        raw.push(PAYLOAD_COINBASE);
        raw.extend_from_slice(&[0x11; 32]);

        let tx = decode_tx(&raw).unwrap();
        assert_eq!(tx.post_condition_count, 1);
        // count word + asset type + principal tag + code + amount
        assert_eq!(tx.post_conditions.len(), 4 + 1 + 1 + 1 + 8);
    }

    #[test]
    fn truncated_input_is_an_error() {
        let mut raw = tx_prefix(0, 0);
        raw.push(PAYLOAD_COINBASE);
        raw.extend_from_slice(&[0xaa; 16]); // half the coinbase buffer
        assert!(matches!(
            decode_tx(&raw).unwrap_err(),
            CodecError::UnexpectedEof { .. }
        ));
    }

    #[test]
    fn unknown_payload_tag_is_an_error() {
        let mut raw = tx_prefix(0, 0);
        raw.push(0x5f);
        assert!(matches!(
            decode_tx(&raw).unwrap_err(),
            CodecError::UnknownTag { what: "payload", .. }
        ));
    }

    #[test]
    fn trailing_bytes_are_an_error() {
        let mut raw = tx_prefix(0, 0);
        raw.push(PAYLOAD_COINBASE);
        raw.extend_from_slice(&[0xaa; 32]);
        raw.push(0xff);
        assert!(matches!(
            decode_tx(&raw).unwrap_err(),
            CodecError::TrailingBytes { .. }
        ));
    }

    #[test]
    fn txid_is_stable_and_prefixed() {
        let a = txid(b"abc");
        let b = txid(b"abc");
        let c = txid(b"abd");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("0x"));
        assert_eq!(a.len(), 2 + 64);
    }
}
