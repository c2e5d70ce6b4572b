//! Stacks address rendering (c32check).
//!
//! An address is a version byte plus a hash160. The text form is
//! `S` + c32(version) + c32(hash160 ‖ checksum) where the checksum is the
//! first four bytes of a double SHA-256 over `version ‖ hash160`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CodecError;

/// Crockford-style alphabet used by c32check (no I, L, O, U).
const C32_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Mainnet single-sig address version.
pub const C32_VERSION_MAINNET_P2PKH: u8 = 22;
/// Mainnet multi-sig address version.
pub const C32_VERSION_MAINNET_P2SH: u8 = 20;
/// Testnet single-sig address version.
pub const C32_VERSION_TESTNET_P2PKH: u8 = 26;
/// Testnet multi-sig address version.
pub const C32_VERSION_TESTNET_P2SH: u8 = 21;

/// A raw Stacks address: version byte + hash160 of the signer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StacksAddress {
    pub version: u8,
    pub hash160: [u8; 20],
}

impl StacksAddress {
    pub fn new(version: u8, hash160: [u8; 20]) -> Result<Self, CodecError> {
        if version >= 32 {
            return Err(CodecError::invalid(
                "address version",
                format!("{version} out of c32 range"),
            ));
        }
        Ok(Self { version, hash160 })
    }

    /// Render as a c32check string (`SP…` / `ST…`).
    pub fn to_c32(&self) -> String {
        let mut check_input = Vec::with_capacity(21);
        check_input.push(self.version);
        check_input.extend_from_slice(&self.hash160);
        let once = Sha256::digest(&check_input);
        let twice = Sha256::digest(once);

        let mut payload = Vec::with_capacity(24);
        payload.extend_from_slice(&self.hash160);
        payload.extend_from_slice(&twice[0..4]);

        let mut out = String::with_capacity(41);
        out.push('S');
        out.push(C32_ALPHABET[self.version as usize] as char);
        out.push_str(&c32_encode(&payload));
        out
    }
}

impl std::fmt::Display for StacksAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_c32())
    }
}

/// Base-32 encode with the c32 alphabet. Leading zero bytes are preserved
/// as leading `0` characters, matching the reference c32check encoding.
fn c32_encode(data: &[u8]) -> String {
    let mut out: Vec<u8> = Vec::with_capacity(data.len() * 8 / 5 + 1);
    let mut carry: u32 = 0;
    let mut carry_bits: u32 = 0;

    for byte in data.iter().rev() {
        carry |= (*byte as u32) << carry_bits;
        carry_bits += 8;
        while carry_bits >= 5 {
            out.push(C32_ALPHABET[(carry & 0x1f) as usize]);
            carry >>= 5;
            carry_bits -= 5;
        }
    }
    if carry_bits > 0 {
        out.push(C32_ALPHABET[(carry & 0x1f) as usize]);
    }

    // Drop zero digits produced by the bit packing…
    while out.last() == Some(&b'0') {
        out.pop();
    }
    // …then re-add exactly one per leading zero byte of the input.
    for byte in data {
        if *byte == 0 {
            out.push(b'0');
        } else {
            break;
        }
    }

    out.reverse();
    String::from_utf8(out).expect("c32 alphabet is ASCII")
}
