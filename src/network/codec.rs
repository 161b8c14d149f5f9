//! Wire encoding for block and transaction proposals.
//!
//! Two encodings share the listening port and are told apart by the first byte:
//!
//! - framed: `[version = 1][u32 big-endian body length][bincode Message]`
//! - legacy: `B|<endpointId>|<blockJSON>` or
//!   `T|<canonical>|<signatureBase64>|<publicKeyHex>|<transactionId>`,
//!   terminated by the end of the stream.

use crate::core::{Block, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use data_encoding::{BASE64, HEXLOWER, HEXLOWER_PERMISSIVE};
use serde::{Deserialize, Serialize};
use std::io::Read;

pub const FRAME_VERSION: u8 = 1;
pub const FRAME_HEADER_LEN: usize = 5;
const BLOCK_TAG: u8 = b'B';
const TRANSACTION_TAG: u8 = b'T';
const FIELD_SEPARATOR: char = '|';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Framed,
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum Message {
    /// The current tip pushed to a miner endpoint for it to build upon
    BlockProposal { endpoint_id: u32, block: Block },
    /// A signed transfer awaiting verification
    TransactionProposal {
        payload: String,
        signature: Vec<u8>,
        public_key: Vec<u8>,
        transaction_id: u64,
    },
}

impl Message {
    pub fn block_proposal(endpoint_id: u32, block: Block) -> Message {
        Message::BlockProposal { endpoint_id, block }
    }

    /// Proposal for `transaction`, signed over its canonical payload
    pub fn transaction_proposal(
        transaction: &Transaction,
        signature: Vec<u8>,
        public_key: Vec<u8>,
    ) -> Message {
        Message::TransactionProposal {
            payload: transaction.canonical_payload(),
            signature,
            public_key,
            transaction_id: transaction.get_id(),
        }
    }
}

pub fn encode(message: &Message, format: WireFormat) -> Result<Vec<u8>> {
    match format {
        WireFormat::Framed => encode_framed(message),
        WireFormat::Legacy => encode_legacy(message),
    }
}

pub fn encode_framed(message: &Message) -> Result<Vec<u8>> {
    let body = serialize(message)?;
    let len = u32::try_from(body.len())
        .map_err(|_| BlockchainError::Codec(format!("{} byte frame too large", body.len())))?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.push(FRAME_VERSION);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub fn encode_legacy(message: &Message) -> Result<Vec<u8>> {
    let text = match message {
        Message::BlockProposal { endpoint_id, block } => {
            format!("B|{endpoint_id}|{}", block.to_json()?)
        }
        Message::TransactionProposal {
            payload,
            signature,
            public_key,
            transaction_id,
        } => format!(
            "T|{payload}|{}|{}|{transaction_id}",
            BASE64.encode(signature),
            HEXLOWER.encode(public_key)
        ),
    };
    Ok(text.into_bytes())
}

pub fn decode_framed(bytes: &[u8]) -> Result<Message> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(BlockchainError::Codec("truncated frame header".to_string()));
    }
    if bytes[0] != FRAME_VERSION {
        return Err(BlockchainError::Codec(format!(
            "unsupported frame version {}",
            bytes[0]
        )));
    }
    let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    let body = &bytes[FRAME_HEADER_LEN..];
    if body.len() != len {
        return Err(BlockchainError::Codec(format!(
            "frame declares {len} bytes but carries {}",
            body.len()
        )));
    }
    decode_body(body)
}

fn decode_body(body: &[u8]) -> Result<Message> {
    deserialize(body).map_err(|e| BlockchainError::Codec(format!("invalid frame body: {e}")))
}

pub fn decode_legacy(bytes: &[u8]) -> Result<Message> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| BlockchainError::Codec(format!("message is not UTF-8: {e}")))?;

    let (tag, rest) = text
        .split_once(FIELD_SEPARATOR)
        .ok_or_else(|| BlockchainError::Codec("missing type tag".to_string()))?;

    match tag.as_bytes() {
        [BLOCK_TAG] => decode_legacy_block(rest),
        [TRANSACTION_TAG] => decode_legacy_transaction(rest),
        _ => Err(BlockchainError::Codec(format!("unknown type tag {tag:?}"))),
    }
}

fn decode_legacy_block(fields: &str) -> Result<Message> {
    // The JSON payload is everything after the endpoint id
    let (endpoint, json) = fields
        .split_once(FIELD_SEPARATOR)
        .ok_or_else(|| BlockchainError::Codec("block message needs 2 fields".to_string()))?;
    let endpoint_id = endpoint
        .parse::<u32>()
        .map_err(|e| BlockchainError::Codec(format!("invalid endpoint id {endpoint:?}: {e}")))?;
    let block = Block::from_json(json)?;
    Ok(Message::BlockProposal { endpoint_id, block })
}

fn decode_legacy_transaction(fields: &str) -> Result<Message> {
    // Split from the right: only the canonical payload may itself contain '|'
    let mut parts = fields.rsplitn(4, FIELD_SEPARATOR);
    let (Some(id), Some(public_key), Some(signature), Some(payload)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(BlockchainError::Codec(
            "transaction message needs 4 fields".to_string(),
        ));
    };

    let transaction_id = id
        .parse::<u64>()
        .map_err(|e| BlockchainError::Codec(format!("invalid transaction id {id:?}: {e}")))?;
    let signature = BASE64
        .decode(signature.as_bytes())
        .map_err(|e| BlockchainError::Codec(format!("invalid signature base64: {e}")))?;
    let public_key = HEXLOWER_PERMISSIVE
        .decode(public_key.as_bytes())
        .map_err(|e| BlockchainError::Codec(format!("invalid public key hex: {e}")))?;

    Ok(Message::TransactionProposal {
        payload: payload.to_string(),
        signature,
        public_key,
        transaction_id,
    })
}

/// Read one message from `reader`, never buffering more than `max_len` bytes.
pub fn read_message<R: Read>(reader: &mut R, max_len: usize) -> Result<Message> {
    let mut first = [0u8; 1];
    if reader.read(&mut first)? == 0 {
        return Err(BlockchainError::Codec("empty message".to_string()));
    }

    match first[0] {
        FRAME_VERSION => {
            let mut len_bytes = [0u8; 4];
            reader.read_exact(&mut len_bytes)?;
            let len = u32::from_be_bytes(len_bytes) as usize;
            if len > max_len {
                return Err(BlockchainError::Codec(format!(
                    "frame of {len} bytes exceeds limit of {max_len}"
                )));
            }
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body)?;
            decode_body(&body)
        }
        BLOCK_TAG | TRANSACTION_TAG => {
            let mut buf = vec![first[0]];
            // One byte past the limit tells an oversized message from an exact fit
            reader.take(max_len as u64).read_to_end(&mut buf)?;
            if buf.len() > max_len {
                return Err(BlockchainError::Codec(format!(
                    "message exceeds limit of {max_len} bytes"
                )));
            }
            decode_legacy(&buf)
        }
        other => Err(BlockchainError::Codec(format!(
            "unrecognised leading byte {other:#04x}"
        ))),
    }
}
