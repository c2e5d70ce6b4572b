//! stacksink-codec — pure binary decoders for the Stacks wire formats.
//!
//! # Architecture
//!
//! ```text
//! raw tx bytes ──► tx::decode_tx ──► DecodedTx { auth, payload, … }
//! value blobs  ──► clarity::decode_value ──► ClarityValue (recursive)
//!                        │
//!                        └── address::StacksAddress (c32check rendering)
//! ```
//!
//! Everything in this crate is a pure function over byte slices: no I/O, no
//! async, no global state. Truncated or malformed input always surfaces as a
//! `CodecError`, never a panic.

pub mod address;
pub mod clarity;
pub mod error;
pub mod reader;
pub mod tx;

pub use address::StacksAddress;
pub use clarity::{ClarityValue, PrincipalData};
pub use error::CodecError;
pub use reader::ByteReader;
pub use tx::{
    decode_tx, txid, AnchorMode, DecodedTx, MicroblockHeader, PostConditionMode,
    SpendingCondition, TransactionVersion, TxAuth, TxPayload, TxTypeId,
};
