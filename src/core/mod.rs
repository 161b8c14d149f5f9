//! Core chain functionality
//!
//! Blocks, settlement transactions, miner endpoints, the hash used for both
//! proof-of-work and chain linkage, the nonce search, the chain-extension
//! rule and transaction signatures.

pub mod block;
pub mod endpoint;
pub mod hash;
pub(crate) mod json;
pub mod proof_of_work;
pub mod signature;
pub mod transaction;
pub mod validator;

pub use block::Block;
pub use endpoint::MinerEndpoint;
pub use hash::{hash, link_hash, meets_difficulty};
pub use proof_of_work::{
    search, CancellationToken, MinerState, ProofOfWork, CANCEL_CHECK_INTERVAL, DEFAULT_DIFFICULTY,
};
pub use transaction::{Transaction, TRANSFER_KIND};
pub use validator::{validate_extension, ChainValidator, Rejection};
