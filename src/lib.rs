//! # Settlement Chain - My Mining Core for a Trading Platform
//!
//! This is the blockchain side of a trading platform: every transfer the
//! trading side records is signed, verified, mined into a block and settled
//! between wallets. When I come back to this code, here's what I need to remember:
//!
//! ## What I Built
//! - **Proof of Work**: SHA-256 nonce search over the previous block's link hash
//! - **Chain Validation**: a candidate must sit exactly one above the tip and link to it
//! - **Signed Transfers**: ECDSA P-256 signatures over a canonical payload
//! - **Miner Pool**: bounded workers with per-height cancellation once a block lands
//! - **Two Wire Formats**: the old `B|...`/`T|...` text messages and length-prefixed frames
//! - **Settlement**: fees go to the winning miner endpoint, amounts move between wallets
//!
//! ## How I Organized My Code
//! - `core/`: blocks, transactions, hashing, proof of work, validation, signatures
//! - `wallet/`: key pairs, addresses and per-currency balances
//! - `network/`: wire codec, listener, miner pool and outbound client
//! - `storage/`: the ledger traits and the Sled ledger behind them
//! - `config/`: TOML configuration passed to whatever needs it
//! - `utils/`: cryptographic helpers and bincode serialization
//! - `cli/`: command-line interface for provisioning and running a node
//!
//! ## Key Design Decisions I Made
//! - One authoritative node; miner endpoints are static entries in the ledger
//! - Every ledger mutation goes through a single writer lock
//! - A block is appended in one Sled transaction spanning blocks, transactions and miners
//! - Settlement commits transfer by transfer, so a bad transfer leaves earlier ones applied
//!
//! ## When I Need to Understand Something
//! 1. Start with `main.rs` to see the CLI commands
//! 2. Look at `network/server.rs` for how proposals are handled
//! 3. Check `storage/sled_ledger.rs` for block acceptance and settlement
//! 4. Review `core/proof_of_work.rs` and `core/validator.rs` for the mining rules

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::{Config, MinerEntry};
pub use crate::core::{
    hash, link_hash, Block, CancellationToken, ChainValidator, MinerEndpoint, ProofOfWork,
    Transaction,
};
pub use error::{BlockchainError, Result};
pub use network::{BroadcastClient, Message, MinerPool, Server, WireFormat};
pub use storage::{LedgerGateway, Settlement, SledLedger};
pub use utils::{current_timestamp, new_key_pair, sha256_digest};
pub use wallet::{address_from_public_key, Wallet};
