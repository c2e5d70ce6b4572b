//! Clarity value decoder.
//!
//! Parses the chain's tagged binary value format into a recursive
//! [`ClarityValue`]. The name-system extractor uses this to reach into
//! contract-log payloads and attachment metadata tuples.
//!
//! # Wire tags
//!
//! ```text
//! 0x00 int        0x01 uint         0x02 buffer      0x03 true
//! 0x04 false      0x05 principal    0x06 contract    0x07 (ok …)
//! 0x08 (err …)    0x09 none         0x0a (some …)    0x0b list
//! 0x0c tuple      0x0d string-ascii 0x0e string-utf8
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::StacksAddress;
use crate::error::CodecError;
use crate::reader::ByteReader;

/// Maximum nesting depth accepted by the decoder. Contract-emitted values
/// never come close; the limit guards against adversarially nested blobs.
pub const MAX_VALUE_DEPTH: usize = 32;

const TAG_INT: u8 = 0x00;
const TAG_UINT: u8 = 0x01;
const TAG_BUFFER: u8 = 0x02;
const TAG_BOOL_TRUE: u8 = 0x03;
const TAG_BOOL_FALSE: u8 = 0x04;
const TAG_PRINCIPAL_STANDARD: u8 = 0x05;
const TAG_PRINCIPAL_CONTRACT: u8 = 0x06;
const TAG_RESPONSE_OK: u8 = 0x07;
const TAG_RESPONSE_ERR: u8 = 0x08;
const TAG_OPTIONAL_NONE: u8 = 0x09;
const TAG_OPTIONAL_SOME: u8 = 0x0a;
const TAG_LIST: u8 = 0x0b;
const TAG_TUPLE: u8 = 0x0c;
const TAG_STRING_ASCII: u8 = 0x0d;
const TAG_STRING_UTF8: u8 = 0x0e;

/// A principal: either a standard address or a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrincipalData {
    Standard(StacksAddress),
    Contract { address: StacksAddress, name: String },
}

impl std::fmt::Display for PrincipalData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard(addr) => write!(f, "{addr}"),
            Self::Contract { address, name } => write!(f, "{address}.{name}"),
        }
    }
}

/// A decoded Clarity value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClarityValue {
    Int(i128),
    UInt(u128),
    Buffer(Vec<u8>),
    Bool(bool),
    Principal(PrincipalData),
    ResponseOk(Box<ClarityValue>),
    ResponseErr(Box<ClarityValue>),
    OptionalNone,
    OptionalSome(Box<ClarityValue>),
    List(Vec<ClarityValue>),
    Tuple(BTreeMap<String, ClarityValue>),
    StringAscii(String),
    StringUtf8(String),
}

impl ClarityValue {
    /// Decode a value from a complete byte blob; trailing bytes are an error.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = ByteReader::new(bytes);
        let value = Self::read(&mut r, 0)?;
        r.expect_eof("clarity value")?;
        Ok(value)
    }

    /// Decode one value from the reader, leaving the cursor after it.
    pub fn read(r: &mut ByteReader<'_>, depth: usize) -> Result<Self, CodecError> {
        if depth > MAX_VALUE_DEPTH {
            return Err(CodecError::DepthExceeded {
                limit: MAX_VALUE_DEPTH,
            });
        }
        let offset = r.pos();
        let tag = r.read_u8()?;
        match tag {
            TAG_INT => Ok(Self::Int(r.read_i128()?)),
            TAG_UINT => Ok(Self::UInt(r.read_u128()?)),
            TAG_BUFFER => {
                let len = r.read_u32()? as usize;
                Ok(Self::Buffer(r.read_bytes(len)?.to_vec()))
            }
            TAG_BOOL_TRUE => Ok(Self::Bool(true)),
            TAG_BOOL_FALSE => Ok(Self::Bool(false)),
            TAG_PRINCIPAL_STANDARD => Ok(Self::Principal(read_standard_principal(r)?)),
            TAG_PRINCIPAL_CONTRACT => {
                let PrincipalData::Standard(address) = read_standard_principal(r)? else {
                    unreachable!("read_standard_principal only returns Standard");
                };
                let name = r.read_clarity_name()?;
                Ok(Self::Principal(PrincipalData::Contract { address, name }))
            }
            TAG_RESPONSE_OK => Ok(Self::ResponseOk(Box::new(Self::read(r, depth + 1)?))),
            TAG_RESPONSE_ERR => Ok(Self::ResponseErr(Box::new(Self::read(r, depth + 1)?))),
            TAG_OPTIONAL_NONE => Ok(Self::OptionalNone),
            TAG_OPTIONAL_SOME => Ok(Self::OptionalSome(Box::new(Self::read(r, depth + 1)?))),
            TAG_LIST => {
                let count = r.read_u32()? as usize;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(Self::read(r, depth + 1)?);
                }
                Ok(Self::List(items))
            }
            TAG_TUPLE => {
                let count = r.read_u32()? as usize;
                let mut fields = BTreeMap::new();
                for _ in 0..count {
                    let key = r.read_clarity_name()?;
                    let value = Self::read(r, depth + 1)?;
                    fields.insert(key, value);
                }
                Ok(Self::Tuple(fields))
            }
            TAG_STRING_ASCII => {
                let len = r.read_u32()? as usize;
                let bytes = r.read_bytes(len)?;
                if !bytes.iter().all(|b| b.is_ascii()) {
                    return Err(CodecError::invalid("string-ascii", "non-ASCII byte"));
                }
                Ok(Self::StringAscii(
                    std::str::from_utf8(bytes)
                        .map_err(|e| CodecError::invalid("string-ascii", e.to_string()))?
                        .to_string(),
                ))
            }
            TAG_STRING_UTF8 => {
                let len = r.read_u32()? as usize;
                let bytes = r.read_bytes(len)?.to_vec();
                Ok(Self::StringUtf8(String::from_utf8(bytes).map_err(|e| {
                    CodecError::invalid("string-utf8", e.to_string())
                })?))
            }
            other => Err(CodecError::UnknownTag {
                what: "clarity value",
                tag: other,
                offset,
            }),
        }
    }

    /// Unwrap `(some …)` / `(ok …)` wrappers down to the inner value.
    pub fn unwrap_inner(&self) -> &ClarityValue {
        match self {
            Self::OptionalSome(inner) | Self::ResponseOk(inner) => inner.unwrap_inner(),
            other => other,
        }
    }

    pub fn as_tuple(&self) -> Option<&BTreeMap<String, ClarityValue>> {
        match self.unwrap_inner() {
            Self::Tuple(fields) => Some(fields),
            _ => None,
        }
    }

    /// Tuple field lookup, unwrapping optional/ok wrappers on the result.
    pub fn tuple_get(&self, key: &str) -> Option<&ClarityValue> {
        self.as_tuple().and_then(|f| f.get(key)).map(|v| v.unwrap_inner())
    }

    pub fn as_u128(&self) -> Option<u128> {
        match self.unwrap_inner() {
            Self::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&[u8]> {
        match self.unwrap_inner() {
            Self::Buffer(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_principal(&self) -> Option<&PrincipalData> {
        match self.unwrap_inner() {
            Self::Principal(p) => Some(p),
            _ => None,
        }
    }

    /// String content of `string-ascii`/`string-utf8`, or an ASCII buffer.
    /// Name-system tuples use buffers and strings interchangeably for names.
    pub fn as_name_string(&self) -> Option<String> {
        match self.unwrap_inner() {
            Self::StringAscii(s) | Self::StringUtf8(s) => Some(s.clone()),
            Self::Buffer(bytes) => std::str::from_utf8(bytes).ok().map(str::to_string),
            _ => None,
        }
    }
}

fn read_standard_principal(r: &mut ByteReader<'_>) -> Result<PrincipalData, CodecError> {
    let version = r.read_u8()?;
    let hash160 = r.read_array::<20>()?;
    Ok(PrincipalData::Standard(StacksAddress::new(
        version, hash160,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uint_bytes(v: u128) -> Vec<u8> {
        let mut out = vec![TAG_UINT];
        out.extend_from_slice(&v.to_be_bytes());
        out
    }

    fn ascii_bytes(s: &str) -> Vec<u8> {
        let mut out = vec![TAG_STRING_ASCII];
        out.extend_from_slice(&(s.len() as u32).to_be_bytes());
        out.extend_from_slice(s.as_bytes());
        out
    }

    #[test]
    fn decodes_uint() {
        let v = ClarityValue::decode(&uint_bytes(12345)).unwrap();
        assert_eq!(v, ClarityValue::UInt(12345));
    }

    #[test]
    fn decodes_negative_int() {
        let mut bytes = vec![TAG_INT];
        bytes.extend_from_slice(&(-7i128).to_be_bytes());
        assert_eq!(ClarityValue::decode(&bytes).unwrap(), ClarityValue::Int(-7));
    }

    #[test]
    fn decodes_tuple_with_mixed_fields() {
        // (tuple (op "name-register") (expire u100))
        let mut bytes = vec![TAG_TUPLE, 0, 0, 0, 2];
        bytes.push(2);
        bytes.extend_from_slice(b"op");
        bytes.extend_from_slice(&ascii_bytes("name-register"));
        bytes.push(6);
        bytes.extend_from_slice(b"expire");
        bytes.extend_from_slice(&uint_bytes(100));

        let v = ClarityValue::decode(&bytes).unwrap();
        assert_eq!(
            v.tuple_get("op").and_then(|o| o.as_name_string()).unwrap(),
            "name-register"
        );
        assert_eq!(v.tuple_get("expire").and_then(|e| e.as_u128()), Some(100));
        assert!(v.tuple_get("missing").is_none());
    }

    #[test]
    fn decodes_principals() {
        let mut bytes = vec![TAG_PRINCIPAL_STANDARD, 22];
        bytes.extend_from_slice(&[0u8; 20]);
        let v = ClarityValue::decode(&bytes).unwrap();
        assert_eq!(
            v.as_principal().unwrap().to_string(),
            "SP000000000000000000002Q6VF78"
        );

        let mut bytes = vec![TAG_PRINCIPAL_CONTRACT, 22];
        bytes.extend_from_slice(&[0u8; 20]);
        bytes.push(3);
        bytes.extend_from_slice(b"bns");
        let v = ClarityValue::decode(&bytes).unwrap();
        assert_eq!(
            v.as_principal().unwrap().to_string(),
            "SP000000000000000000002Q6VF78.bns"
        );
    }

    #[test]
    fn unwraps_some_and_ok() {
        let mut bytes = vec![TAG_RESPONSE_OK, TAG_OPTIONAL_SOME];
        bytes.extend_from_slice(&uint_bytes(9));
        let v = ClarityValue::decode(&bytes).unwrap();
        assert_eq!(v.as_u128(), Some(9));
    }

    #[test]
    fn rejects_unknown_tag() {
        let err = ClarityValue::decode(&[0x7f]).unwrap_err();
        assert!(matches!(
            err,
            CodecError::UnknownTag { tag: 0x7f, offset: 0, .. }
        ));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut bytes = uint_bytes(1);
        bytes.push(0xff);
        assert!(matches!(
            ClarityValue::decode(&bytes).unwrap_err(),
            CodecError::TrailingBytes { .. }
        ));
    }

    #[test]
    fn rejects_excessive_nesting() {
        let mut bytes = vec![TAG_OPTIONAL_SOME; MAX_VALUE_DEPTH + 2];
        bytes.extend_from_slice(&uint_bytes(0));
        assert!(matches!(
            ClarityValue::decode(&bytes).unwrap_err(),
            CodecError::DepthExceeded { .. }
        ));
    }

    #[test]
    fn buffer_names_read_as_strings() {
        let mut bytes = vec![TAG_BUFFER, 0, 0, 0, 5];
        bytes.extend_from_slice(b"hello");
        let v = ClarityValue::decode(&bytes).unwrap();
        assert_eq!(v.as_name_string().unwrap(), "hello");
    }
}
