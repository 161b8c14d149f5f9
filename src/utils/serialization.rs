// Bincode 2 storage and framing encoding shared by the ledger and the wire codec
use crate::error::{BlockchainError, Result};

/// Upper bound on what one decode may allocate. Collection lengths are checked
/// against it before any allocation, so a forged length fails cleanly.
pub const DECODE_LIMIT: usize = 64 * 1024 * 1024;

/// Serialize data using bincode 2.0 with standard configuration
pub fn serialize<T: bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    let config = bincode::config::standard();
    bincode::encode_to_vec(data, config)
        .map_err(|e| BlockchainError::Serialization(format!("Serialization failed: {e}")))
}

/// Deserialize data using bincode 2.0 with standard configuration, bounded by
/// [`DECODE_LIMIT`]. The whole slice must be consumed.
pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: bincode::Decode<()>,
{
    let config = bincode::config::standard().with_limit::<DECODE_LIMIT>();
    let (data, read) = bincode::decode_from_slice(bytes, config)
        .map_err(|e| BlockchainError::Serialization(format!("Deserialization failed: {e}")))?;
    if read != bytes.len() {
        return Err(BlockchainError::Serialization(format!(
            "Deserialization left {} trailing bytes",
            bytes.len() - read
        )));
    }
    Ok(data)
}
