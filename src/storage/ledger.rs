use crate::core::{Block, MinerEndpoint, Transaction};
use crate::error::Result;
use crate::wallet::Wallet;

/// The authoritative store behind the mining core.
///
/// Implementations own the canonical blocks, transactions, miner endpoints and
/// wallets, and must serialize concurrent `add_block` calls so that at most one
/// candidate per height is ever accepted.
pub trait LedgerGateway: Send + Sync {
    fn get_latest_block(&self) -> Result<Block>;

    /// Append `candidate` if it extends the tip. On acceptance every pending
    /// transaction is drained into the block, marked non-pending, and its fee
    /// credited to `endpoint_id`. Returns `None` when the candidate is rejected.
    fn add_block(&self, candidate: Block, endpoint_id: u32) -> Result<Option<Vec<Transaction>>>;

    fn mark_transaction_valid(&self, transaction_id: u64) -> Result<()>;

    fn list_miner_endpoints(&self) -> Result<Vec<MinerEndpoint>>;

    fn find_wallet_by_address(&self, address: &str) -> Result<Option<Wallet>>;

    fn find_wallet_by_user(&self, user_id: u64) -> Result<Option<Wallet>>;

    fn pending_transactions(&self) -> Result<Vec<Transaction>>;

    fn pending_count(&self) -> Result<usize> {
        Ok(self.pending_transactions()?.len())
    }
}

/// Applies the balance transfers of transactions drained into an accepted block.
pub trait Settlement: Send + Sync {
    fn transfer_funds(&self, transactions: &[Transaction]) -> Result<()>;
}
