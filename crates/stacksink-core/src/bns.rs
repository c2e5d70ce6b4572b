//! Name-system extractor.
//!
//! Derives name/namespace/subdomain records from the well-known name
//! registry contracts. Three paths feed it: `print` contract logs, the
//! renewal contract-call fallback (the node emits no log when a renewal
//! carries no zonefile hash), and attachment metadata tuples.

use stacksink_codec::{ClarityValue, TxPayload};
use tracing::debug;

use crate::records::{BnsName, BnsNamespace, BnsSubdomain};

/// Mainnet name registry contract.
pub const BNS_CONTRACT_MAINNET: &str = "SP000000000000000000002Q6VF78.bns";
/// Testnet name registry contract.
pub const BNS_CONTRACT_TESTNET: &str = "ST000000000000000000002AMW42H.bns";

/// Log topics the registry emits for name operations.
const NAME_OPS: [&str; 5] = [
    "name-register",
    "name-update",
    "name-transfer",
    "name-renewal",
    "name-revoke",
];

/// Attachment ops that carry a zonefile.
const ATTACHMENT_OPS: [&str; 4] = ["register", "update", "transfer", "renewal"];

pub fn is_bns_contract(contract_id: &str) -> bool {
    contract_id == BNS_CONTRACT_MAINNET || contract_id == BNS_CONTRACT_TESTNET
}

/// Host-transaction context shared by all extraction paths.
#[derive(Debug, Clone, Copy)]
pub struct BnsTxContext<'a> {
    pub tx_id: &'a str,
    pub sender: &'a str,
    pub block_height: u32,
}

/// A record produced from one contract log.
#[derive(Debug, Clone)]
pub enum BnsExtract {
    Name(BnsName),
    Namespace(BnsNamespace),
}

/// Inspect a `print` log from the registry contract. Unknown operation
/// codes are ignored without error; the registry also prints internal
/// bookkeeping we do not track.
pub fn extract_from_contract_log(
    contract_id: &str,
    topic: &str,
    value: &ClarityValue,
    ctx: BnsTxContext<'_>,
) -> Option<BnsExtract> {
    if !is_bns_contract(contract_id) || topic != "print" {
        return None;
    }
    let meta = metadata_tuple(value)?;
    let op = meta.tuple_get("op")?.as_name_string()?;

    if NAME_OPS.contains(&op.as_str()) {
        let name = meta.tuple_get("name")?.as_name_string()?;
        let namespace_id = meta.tuple_get("namespace")?.as_name_string()?;
        let address = meta
            .tuple_get("owner")
            .or_else(|| meta.tuple_get("tx-sender"))
            .and_then(|v| v.as_principal())
            .map(|p| p.to_string())
            .unwrap_or_else(|| ctx.sender.to_string());
        let zonefile_hash = meta
            .tuple_get("zonefile-hash")
            .and_then(|v| v.as_buffer())
            .map(hex::encode)
            .unwrap_or_default();
        let expire_block = meta
            .tuple_get("expire-block")
            .and_then(|v| v.as_u128())
            .map(|v| v as u32)
            .unwrap_or(0);
        return Some(BnsExtract::Name(BnsName {
            name,
            namespace_id,
            address,
            registered_at: ctx.block_height,
            expire_block,
            zonefile_hash,
            zonefile: None,
            tx_id: ctx.tx_id.to_string(),
            status: op,
            canonical: true,
        }));
    }

    if op == "namespace-ready" || op == "namespace-reveal" {
        let namespace_id = meta.tuple_get("namespace")?.as_name_string()?;
        let address = meta
            .tuple_get("owner")
            .or_else(|| meta.tuple_get("tx-sender"))
            .and_then(|v| v.as_principal())
            .map(|p| p.to_string())
            .unwrap_or_else(|| ctx.sender.to_string());
        let lifetime = tuple_u32(meta, "lifetime").unwrap_or(0);
        let price = meta.tuple_get("price-function");
        let base = price.and_then(|p| tuple_u64(p, "base")).unwrap_or(0);
        let coeff = price.and_then(|p| tuple_u64(p, "coeff")).unwrap_or(0);
        let nonalpha_discount = price
            .and_then(|p| tuple_u64(p, "nonalpha-discount"))
            .unwrap_or(0);
        let no_vowel_discount = price
            .and_then(|p| tuple_u64(p, "no-vowel-discount"))
            .unwrap_or(0);
        let buckets = price
            .and_then(|p| p.tuple_get("buckets"))
            .and_then(bucket_string)
            .unwrap_or_default();
        let (launched_at, ready_block) = if op == "namespace-ready" {
            (Some(ctx.block_height), ctx.block_height)
        } else {
            (None, 0)
        };
        return Some(BnsExtract::Namespace(BnsNamespace {
            namespace_id,
            address,
            base,
            coeff,
            launched_at,
            lifetime,
            no_vowel_discount,
            nonalpha_discount,
            ready_block,
            reveal_block: tuple_u32(meta, "reveal-block").unwrap_or(ctx.block_height),
            buckets,
            tx_id: ctx.tx_id.to_string(),
            canonical: true,
        }));
    }

    debug!(op, "ignoring unrecognized registry log operation");
    None
}

/// The registry prints either a flat tuple or the attachment envelope
/// `{attachment: {metadata: {…}}}`; accept both.
fn metadata_tuple(value: &ClarityValue) -> Option<&ClarityValue> {
    if value.tuple_get("op").is_some() {
        return Some(value);
    }
    value.tuple_get("attachment")?.tuple_get("metadata")
}

fn tuple_u32(value: &ClarityValue, key: &str) -> Option<u32> {
    value.tuple_get(key)?.as_u128().map(|v| v as u32)
}

fn tuple_u64(value: &ClarityValue, key: &str) -> Option<u64> {
    value.tuple_get(key)?.as_u128().map(|v| v as u64)
}

fn bucket_string(value: &ClarityValue) -> Option<String> {
    match value.unwrap_inner() {
        ClarityValue::List(items) => Some(
            items
                .iter()
                .filter_map(|i| i.as_u128())
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(","),
        ),
        _ => None,
    }
}

/// Renewal fallback: a `name-renewal` call with no zonefile hash emits no
/// log, so the name record is synthesized from the call arguments.
///
/// Argument order: `(namespace, name, stx-to-burn, new-owner?, zonefile-hash?)`.
pub fn extract_renewal_from_contract_call(
    payload: &TxPayload,
    ctx: BnsTxContext<'_>,
) -> Option<BnsName> {
    let TxPayload::ContractCall {
        address,
        contract_name,
        function_name,
        function_args,
    } = payload
    else {
        return None;
    };
    if function_name != "name-renewal"
        || !is_bns_contract(&format!("{}.{contract_name}", address.to_c32()))
    {
        return None;
    }

    let namespace_id = function_args.first()?.as_name_string()?;
    let name = function_args.get(1)?.as_name_string()?;
    let address = function_args
        .get(3)
        .and_then(|v| v.as_principal())
        .map(|p| p.to_string())
        .unwrap_or_else(|| ctx.sender.to_string());
    let zonefile_hash = function_args
        .get(4)
        .and_then(|v| v.as_buffer())
        .map(hex::encode)
        .unwrap_or_default();

    Some(BnsName {
        name,
        namespace_id,
        address,
        registered_at: ctx.block_height,
        expire_block: 0,
        zonefile_hash,
        zonefile: None,
        tx_id: ctx.tx_id.to_string(),
        status: "name-renewal".to_string(),
        canonical: true,
    })
}

/// Decode an attachment metadata tuple into `(op, name, namespace)`.
/// Returns `None` for ops outside the recognized set.
pub fn extract_attachment_metadata(metadata: &ClarityValue) -> Option<(String, String, String)> {
    let op = metadata.tuple_get("op")?.as_name_string()?;
    if !ATTACHMENT_OPS.contains(&op.as_str()) {
        return None;
    }
    let name = metadata.tuple_get("name")?.as_name_string()?;
    let namespace = metadata.tuple_get("namespace")?.as_name_string()?;
    Some((op, name, namespace))
}

/// Scan a zonefile for subdomain TXT records.
///
/// Each TXT entry names a subdomain and carries `key=value` pairs inside its
/// quoted strings; `owner=` identifies the holder and `zfN=` parts carry the
/// subdomain's own zonefile, stored concatenated and undecoded.
pub fn parse_zonefile_subdomains(
    zonefile: &str,
    name: &str,
    namespace: &str,
    tx_id: &str,
    block_height: u32,
) -> Vec<BnsSubdomain> {
    let mut out = Vec::new();
    for line in zonefile.lines() {
        let Some(txt_at) = line.find(" TXT ") else {
            continue;
        };
        let label = match line.split_whitespace().next() {
            Some(l) if !l.is_empty() && l != "@" => l.trim_end_matches('.'),
            _ => continue,
        };

        let mut owner = None;
        let mut zf_parts: Vec<(u32, String)> = Vec::new();
        let joined = line[txt_at + 5..]
            .split('"')
            .skip(1)
            .step_by(2)
            .collect::<Vec<_>>()
            .join(" ");
        for pair in joined.split_whitespace() {
            let Some((key, val)) = pair.split_once('=') else {
                continue;
            };
            if key == "owner" {
                owner = Some(val.to_string());
            } else if let Some(idx) = key.strip_prefix("zf") {
                if let Ok(idx) = idx.parse::<u32>() {
                    zf_parts.push((idx, val.to_string()));
                }
            }
        }
        let Some(owner) = owner else {
            continue;
        };
        zf_parts.sort_by_key(|(idx, _)| *idx);

        // Labels may be relative or already fully qualified.
        let suffix = format!(".{name}.{namespace}");
        let fully_qualified = if label.ends_with(&suffix) {
            label.to_string()
        } else {
            format!("{label}{suffix}")
        };

        out.push(BnsSubdomain {
            fully_qualified_subdomain: fully_qualified,
            namespace_id: namespace.to_string(),
            name: name.to_string(),
            owner,
            zonefile: zf_parts.into_iter().map(|(_, part)| part).collect(),
            zonefile_hash: String::new(),
            block_height,
            tx_id: tx_id.to_string(),
            canonical: true,
        });
    }
    out
}
