//! Structural decoding of the binary-encoded transaction carried in `params`.
//!
//! Only the envelope shape is checked: a legacy RLP list, or a one-byte type
//! prefix followed by an RLP list, with the list header covering exactly the
//! remaining bytes. Field contents are the engine's business.

use serde_json::Value;
use thiserror::Error;

const RLP_SHORT_LIST_OFFSET: u8 = 0xc0;
const RLP_LONG_LIST_OFFSET: u8 = 0xf7;
const RLP_LONG_LENGTH_THRESHOLD: usize = 56;
const TYPED_TRANSACTION_MAX_TYPE: u8 = 0x7f;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransactionDecodeError {
    #[error("missing transaction params")]
    MissingParams,
    #[error("params must be a hex string or a single-element array holding one")]
    UnexpectedParamsShape,
    #[error("invalid transaction hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("transaction bytes are empty")]
    Empty,
    #[error("unexpected leading byte 0x{0:02x}, expected a typed envelope or RLP list")]
    UnexpectedLeadingByte(u8),
    #[error("typed transaction 0x{0:02x} is missing its payload")]
    MissingTypedPayload(u8),
    #[error("expected an RLP list, found leading byte 0x{0:02x}")]
    NotAList(u8),
    #[error("RLP list header is truncated")]
    TruncatedHeader,
    #[error("RLP list length is not canonically encoded")]
    NonCanonicalLength,
    #[error("RLP list declares {declared} payload bytes but {actual} remain")]
    LengthMismatch { declared: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Legacy,
    Typed(u8),
}

/// Transaction bytes that passed the structural envelope check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTransaction {
    bytes: Vec<u8>,
    kind: TransactionKind,
}

impl EncodedTransaction {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, TransactionDecodeError> {
        let kind = check_transaction_envelope(&bytes)?;
        Ok(Self { bytes, kind })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Accepts `"0x…"`, `"…"` or `["0x…"]`.
pub fn decode_transaction_params(params: &Value) -> Result<EncodedTransaction, TransactionDecodeError> {
    let encoded = match params {
        Value::Null => return Err(TransactionDecodeError::MissingParams),
        Value::String(encoded) => encoded.as_str(),
        Value::Array(items) => match items.as_slice() {
            [Value::String(encoded)] => encoded.as_str(),
            [] => return Err(TransactionDecodeError::MissingParams),
            _ => return Err(TransactionDecodeError::UnexpectedParamsShape),
        },
        _ => return Err(TransactionDecodeError::UnexpectedParamsShape),
    };
    let trimmed = encoded.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let bytes = hex::decode(digits)?;
    EncodedTransaction::from_bytes(bytes)
}

fn check_transaction_envelope(bytes: &[u8]) -> Result<TransactionKind, TransactionDecodeError> {
    let Some(&leading) = bytes.first() else {
        return Err(TransactionDecodeError::Empty);
    };
    if leading >= RLP_SHORT_LIST_OFFSET {
        check_rlp_list(bytes)?;
        return Ok(TransactionKind::Legacy);
    }
    if leading > TYPED_TRANSACTION_MAX_TYPE {
        return Err(TransactionDecodeError::UnexpectedLeadingByte(leading));
    }
    let payload = &bytes[1..];
    if payload.is_empty() {
        return Err(TransactionDecodeError::MissingTypedPayload(leading));
    }
    check_rlp_list(payload)?;
    Ok(TransactionKind::Typed(leading))
}

fn check_rlp_list(bytes: &[u8]) -> Result<(), TransactionDecodeError> {
    let (header_len, declared) = rlp_list_header(bytes)?;
    let actual = bytes.len() - header_len;
    if declared != actual {
        return Err(TransactionDecodeError::LengthMismatch { declared, actual });
    }
    Ok(())
}

/// Returns `(header_len, payload_len)` for the list starting at `bytes[0]`.
fn rlp_list_header(bytes: &[u8]) -> Result<(usize, usize), TransactionDecodeError> {
    let Some(&prefix) = bytes.first() else {
        return Err(TransactionDecodeError::TruncatedHeader);
    };
    if prefix < RLP_SHORT_LIST_OFFSET {
        return Err(TransactionDecodeError::NotAList(prefix));
    }
    if prefix <= RLP_LONG_LIST_OFFSET {
        return Ok((1, usize::from(prefix - RLP_SHORT_LIST_OFFSET)));
    }

    let length_of_length = usize::from(prefix - RLP_LONG_LIST_OFFSET);
    if length_of_length > std::mem::size_of::<usize>() {
        return Err(TransactionDecodeError::NonCanonicalLength);
    }
    let Some(length_bytes) = bytes.get(1..1 + length_of_length) else {
        return Err(TransactionDecodeError::TruncatedHeader);
    };
    if length_bytes[0] == 0 {
        return Err(TransactionDecodeError::NonCanonicalLength);
    }
    let declared = length_bytes
        .iter()
        .fold(0_usize, |acc, byte| (acc << 8) | usize::from(*byte));
    if declared < RLP_LONG_LENGTH_THRESHOLD {
        return Err(TransactionDecodeError::NonCanonicalLength);
    }
    Ok((1 + length_of_length, declared))
}
