//! Networking between the ledger node and its miner endpoints
//!
//! One listening port accepts block and transaction proposals in either wire
//! encoding. Block proposals are mined by a bounded worker pool; the outbound
//! client pushes signed transactions and the chain tip.

pub mod client;
pub mod codec;
pub mod miner_pool;
pub mod server;

pub use client::BroadcastClient;
pub use codec::{read_message, Message, WireFormat};
pub use miner_pool::MinerPool;
pub use server::Server;
