//! Wallet key material and balances
//!
//! P-256 key pairs (PKCS#8 private, SPKI public), address derivation, and the
//! per-currency balances settlement moves between wallets.

#[allow(clippy::module_inception)]
pub mod wallet;

pub use wallet::{address_from_public_key, Wallet};
