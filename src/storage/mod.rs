//! Ledger storage
//!
//! The gateway traits the mining core talks to, and the Sled-backed ledger
//! that implements them for a single authoritative node.

pub mod ledger;
pub mod sled_ledger;

pub use ledger::{LedgerGateway, Settlement};
pub use sled_ledger::SledLedger;
