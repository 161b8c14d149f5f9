// This is the embedded ledger that backs my mining core
// I keep every record in its own Sled tree and push every write through one writer lock,
// so two miners finishing the same height can never both become the tip

use crate::core::{validate_extension, Block, MinerEndpoint, Transaction};
use crate::error::{BlockchainError, Result};
use crate::storage::{LedgerGateway, Settlement};
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use log::{debug, info, warn};
use sled::transaction::{ConflictableTransactionResult, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

// Tree names for each record type
const BLOCKS_TREE: &str = "blocks"; // height (big-endian) -> Block
const TRANSACTIONS_TREE: &str = "transactions"; // id (big-endian) -> Transaction
const MINERS_TREE: &str = "miners"; // endpoint id (big-endian) -> MinerEndpoint
const WALLETS_TREE: &str = "wallets"; // address -> Wallet
const WALLET_USERS_TREE: &str = "wallet_users"; // user id (big-endian) -> address
const META_TREE: &str = "meta";
const TIP_HEIGHT_KEY: &str = "tip_height";

#[derive(Clone)]
pub struct SledLedger {
    db: Db,
    blocks: Tree,
    transactions: Tree,
    miners: Tree,
    wallets: Tree,
    wallet_users: Tree,
    meta: Tree,
    writer: Arc<Mutex<()>>, // Single-writer discipline for every mutation
    db_path: PathBuf,
}

fn u64_key(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

fn u32_key(value: u32) -> [u8; 4] {
    value.to_be_bytes()
}

fn storage_error(e: TransactionError<BlockchainError>) -> BlockchainError {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => e.into(),
    }
}

impl SledLedger {
    // When I set up a node for the first time, the chain starts at a fresh genesis block
    pub fn create<P: AsRef<Path>>(path: P) -> Result<SledLedger> {
        Self::create_with_genesis(path, Block::generate_genesis_block()?)
    }

    // An existing ledger keeps its tip; `genesis` is only written into an empty database
    pub fn create_with_genesis<P: AsRef<Path>>(path: P, genesis: Block) -> Result<SledLedger> {
        let ledger = Self::open_trees(path.as_ref())?;
        if ledger.meta.get(TIP_HEIGHT_KEY)?.is_none() {
            info!("Creating genesis block at height {}", genesis.get_height());
            let height_key = u64_key(genesis.get_height());
            let genesis_bytes = serialize(&genesis)?;
            (&ledger.blocks, &ledger.meta)
                .transaction(
                    |(blocks, meta)| -> ConflictableTransactionResult<(), BlockchainError> {
                        blocks.insert(&height_key[..], genesis_bytes.as_slice())?;
                        meta.insert(TIP_HEIGHT_KEY, &height_key[..])?;
                        Ok(())
                    },
                )
                .map_err(storage_error)?;
        }
        Ok(ledger)
    }

    // When I restart a node I require the chain to already exist
    pub fn open<P: AsRef<Path>>(path: P) -> Result<SledLedger> {
        let ledger = Self::open_trees(path.as_ref())?;
        if ledger.meta.get(TIP_HEIGHT_KEY)?.is_none() {
            return Err(BlockchainError::Database(format!(
                "No existing ledger found at {}. Run init first.",
                path.as_ref().display()
            )));
        }
        Ok(ledger)
    }

    fn open_trees(path: &Path) -> Result<SledLedger> {
        let db = sled::open(path)
            .map_err(|e| BlockchainError::Database(format!("Failed to open database: {e}")))?;
        Ok(SledLedger {
            blocks: db.open_tree(BLOCKS_TREE)?,
            transactions: db.open_tree(TRANSACTIONS_TREE)?,
            miners: db.open_tree(MINERS_TREE)?,
            wallets: db.open_tree(WALLETS_TREE)?,
            wallet_users: db.open_tree(WALLET_USERS_TREE)?,
            meta: db.open_tree(META_TREE)?,
            db,
            writer: Arc::new(Mutex::new(())),
            db_path: path.to_path_buf(),
        })
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, ()>> {
        self.writer
            .lock()
            .map_err(|_| BlockchainError::Database("Ledger writer lock poisoned".to_string()))
    }

    pub fn get_db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn tip_height(&self) -> Result<u64> {
        let bytes = self
            .meta
            .get(TIP_HEIGHT_KEY)?
            .ok_or_else(|| BlockchainError::Database("Tip height missing".to_string()))?;
        let raw: [u8; 8] = bytes
            .as_ref()
            .try_into()
            .map_err(|_| BlockchainError::Database("Corrupt tip height".to_string()))?;
        Ok(u64::from_be_bytes(raw))
    }

    pub fn get_block(&self, height: u64) -> Result<Option<Block>> {
        match self.blocks.get(u64_key(height))? {
            Some(bytes) => Ok(Some(deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    // Every block in height order, oldest first
    pub fn blocks(&self) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        for entry in self.blocks.iter() {
            let (_, bytes) = entry?;
            blocks.push(deserialize(bytes.as_ref())?);
        }
        Ok(blocks)
    }

    // The trading side records transfers here; they start pending and unverified
    pub fn add_pending_transaction(&self, mut transaction: Transaction) -> Result<Transaction> {
        let _guard = self.lock_writer()?;
        let id = self.db.generate_id()? + 1;
        transaction.assign_id(id);
        self.transactions
            .insert(u64_key(id), serialize(&transaction)?)?;
        debug!("Recorded pending transaction {id}");
        Ok(transaction)
    }

    pub fn get_transaction(&self, transaction_id: u64) -> Result<Option<Transaction>> {
        match self.transactions.get(u64_key(transaction_id))? {
            Some(bytes) => Ok(Some(deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    // Static provisioning of the miner registry; an existing endpoint keeps its balance
    pub fn register_miner_endpoint(&self, id: u32, address: &str) -> Result<MinerEndpoint> {
        let _guard = self.lock_writer()?;
        if let Some(existing) = self.get_miner_endpoint(id)? {
            if existing.get_address() != address {
                warn!(
                    "Miner endpoint {id} already registered at {}, ignoring {address}",
                    existing.get_address()
                );
            }
            return Ok(existing);
        }
        let endpoint = MinerEndpoint::new(id, address);
        self.miners.insert(u32_key(id), serialize(&endpoint)?)?;
        info!("Registered miner endpoint {id} at {address}");
        Ok(endpoint)
    }

    pub fn get_miner_endpoint(&self, id: u32) -> Result<Option<MinerEndpoint>> {
        match self.miners.get(u32_key(id))? {
            Some(bytes) => Ok(Some(deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    pub fn store_wallet(&self, wallet: &Wallet) -> Result<()> {
        let _guard = self.lock_writer()?;
        self.write_wallets(&[wallet])
    }

    // Seed a balance, e.g. when a user deposits funds on the trading side
    pub fn deposit(&self, address: &str, currency: &str, amount: u64) -> Result<Wallet> {
        let _guard = self.lock_writer()?;
        let mut wallet = self
            .find_wallet_by_address(address)?
            .ok_or_else(|| BlockchainError::NotFound(format!("wallet {address}")))?;
        wallet.credit(currency, amount)?;
        self.write_wallets(&[&wallet])?;
        Ok(wallet)
    }

    // Callers must hold the writer lock
    fn write_wallets(&self, wallets: &[&Wallet]) -> Result<()> {
        let mut records = Vec::with_capacity(wallets.len());
        for wallet in wallets {
            records.push((
                wallet.get_address().to_string(),
                u64_key(wallet.get_user_id()),
                serialize(*wallet)?,
            ));
        }

        (&self.wallets, &self.wallet_users)
            .transaction(
                |(wallets, users)| -> ConflictableTransactionResult<(), BlockchainError> {
                    for (address, user_key, bytes) in &records {
                        wallets.insert(address.as_str(), bytes.as_slice())?;
                        users.insert(&user_key[..], address.as_str())?;
                    }
                    Ok(())
                },
            )
            .map_err(storage_error)
    }
}

impl LedgerGateway for SledLedger {
    fn get_latest_block(&self) -> Result<Block> {
        let height = self.tip_height()?;
        self.get_block(height)?
            .ok_or_else(|| BlockchainError::Database(format!("Tip block {height} missing")))
    }

    fn add_block(&self, candidate: Block, endpoint_id: u32) -> Result<Option<Vec<Transaction>>> {
        // Everything from reading the tip to moving it happens under the writer lock
        let _guard = self.lock_writer()?;

        let tip = self.get_latest_block()?;
        if let Err(rejection) = validate_extension(&tip, &candidate) {
            info!("Rejected block from endpoint {endpoint_id}: {rejection}");
            return Ok(None);
        }

        // I drain every pending transaction into the new block
        let mut drained = self.pending_transactions()?;
        let mut total_fees: u64 = 0;
        for transaction in drained.iter_mut() {
            transaction.mark_included();
            total_fees = total_fees.checked_add(transaction.get_fee()).ok_or_else(|| {
                BlockchainError::Transaction("Total block fees overflow".to_string())
            })?;
        }

        // The submitting endpoint earns the fees; an unknown endpoint earns nothing
        let credited = match self.get_miner_endpoint(endpoint_id)? {
            Some(mut endpoint) => {
                endpoint.credit(total_fees)?;
                Some((u32_key(endpoint_id), serialize(&endpoint)?))
            }
            None => {
                warn!("Endpoint {endpoint_id} is not registered, {total_fees} in fees not credited");
                None
            }
        };

        let height = candidate.get_height();
        let height_key = u64_key(height);
        let block = candidate.with_transactions(drained.clone());
        let block_bytes = serialize(&block)?;
        let mut transaction_records = Vec::with_capacity(drained.len());
        for transaction in &drained {
            transaction_records.push((u64_key(transaction.get_id()), serialize(transaction)?));
        }

        (&self.blocks, &self.transactions, &self.miners, &self.meta)
            .transaction(
                |(blocks, transactions, miners, meta)| -> ConflictableTransactionResult<(), BlockchainError> {
                    blocks.insert(&height_key[..], block_bytes.as_slice())?;
                    for (key, bytes) in &transaction_records {
                        transactions.insert(&key[..], bytes.as_slice())?;
                    }
                    if let Some((key, bytes)) = &credited {
                        miners.insert(&key[..], bytes.as_slice())?;
                    }
                    meta.insert(TIP_HEIGHT_KEY, &height_key[..])?;
                    Ok(())
                },
            )
            .map_err(storage_error)?;

        info!(
            "Block {height} appended: {} transactions, {total_fees} in fees to endpoint {endpoint_id}",
            drained.len()
        );
        Ok(Some(drained))
    }

    fn mark_transaction_valid(&self, transaction_id: u64) -> Result<()> {
        let _guard = self.lock_writer()?;
        let mut transaction = self
            .get_transaction(transaction_id)?
            .ok_or_else(|| BlockchainError::NotFound(format!("transaction {transaction_id}")))?;
        transaction.mark_valid();
        self.transactions
            .insert(u64_key(transaction_id), serialize(&transaction)?)?;
        Ok(())
    }

    fn list_miner_endpoints(&self) -> Result<Vec<MinerEndpoint>> {
        let mut endpoints = Vec::new();
        for entry in self.miners.iter() {
            let (_, bytes) = entry?;
            endpoints.push(deserialize(bytes.as_ref())?);
        }
        Ok(endpoints)
    }

    fn find_wallet_by_address(&self, address: &str) -> Result<Option<Wallet>> {
        match self.wallets.get(address)? {
            Some(bytes) => Ok(Some(deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    fn find_wallet_by_user(&self, user_id: u64) -> Result<Option<Wallet>> {
        match self.wallet_users.get(u64_key(user_id))? {
            Some(address) => {
                let address = String::from_utf8(address.to_vec()).map_err(|e| {
                    BlockchainError::Database(format!("Invalid wallet address index: {e}"))
                })?;
                self.find_wallet_by_address(&address)
            }
            None => Ok(None),
        }
    }

    fn pending_transactions(&self) -> Result<Vec<Transaction>> {
        let mut pending = Vec::new();
        for entry in self.transactions.iter() {
            let (_, bytes) = entry?;
            let transaction: Transaction = deserialize(bytes.as_ref())?;
            if transaction.is_pending() {
                pending.push(transaction);
            }
        }
        Ok(pending)
    }
}

impl Settlement for SledLedger {
    // Each transfer commits on its own: a failure leaves earlier transfers applied
    fn transfer_funds(&self, transactions: &[Transaction]) -> Result<()> {
        for transaction in transactions {
            let _guard = self.lock_writer()?;

            let mut sender = self
                .find_wallet_by_user(transaction.get_user_id())?
                .ok_or_else(|| {
                    BlockchainError::Wallet(format!(
                        "Sender wallet not found for user {}",
                        transaction.get_user_id()
                    ))
                })?;
            let mut recipient = self
                .find_wallet_by_address(transaction.get_to())?
                .ok_or_else(|| {
                    BlockchainError::Wallet(format!(
                        "Recipient wallet not found: {}",
                        transaction.get_to()
                    ))
                })?;

            let currency = transaction.get_currency();
            let amount = transaction.get_amount();
            if sender.get_address() == recipient.get_address() {
                if sender.get_balance(currency) < amount {
                    return Err(BlockchainError::Transaction(format!(
                        "Balance is not sufficient for transaction {}",
                        transaction.get_id()
                    )));
                }
                debug!("Transaction {} moves funds to its own sender", transaction.get_id());
                continue;
            }

            sender.debit(currency, amount)?;
            recipient.credit(currency, amount)?;
            self.write_wallets(&[&sender, &recipient])?;

            info!(
                "Settled transaction {}: {amount} {currency} from {} to {}",
                transaction.get_id(),
                sender.get_address(),
                recipient.get_address()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash;
    use tempfile::tempdir;

    fn ledger_at_height_five() -> (SledLedger, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let genesis = Block::new(5, "abc".to_string(), 10).unwrap();
        let ledger = SledLedger::create_with_genesis(temp_dir.path().join("ledger"), genesis).unwrap();
        (ledger, temp_dir)
    }

    fn pending(ledger: &SledLedger, fee: u64) -> Transaction {
        let tx = Transaction::new_transfer(1, "from", "to", "BTC", 10, fee).unwrap();
        ledger.add_pending_transaction(tx).unwrap()
    }

    #[test]
    fn test_create_writes_genesis_once() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("ledger");

        let ledger = SledLedger::create(&path).unwrap();
        let genesis = ledger.get_latest_block().unwrap();
        assert_eq!(genesis.get_height(), 0);
        assert_eq!(ledger.get_db_path(), path.as_path());
        drop(ledger);

        let reopened = SledLedger::create(&path).unwrap();
        assert_eq!(reopened.get_latest_block().unwrap(), genesis);
    }

    #[test]
    fn test_open_requires_existing_chain() {
        let temp_dir = tempdir().unwrap();
        assert!(SledLedger::open(temp_dir.path().join("empty")).is_err());
    }

    #[test]
    fn test_accepts_successor_and_drains_pending() {
        let (ledger, _dir) = ledger_at_height_five();
        ledger.register_miner_endpoint(12345, "127.0.0.1").unwrap();
        let before: Vec<u64> = (1..=3).map(|fee| pending(&ledger, fee).get_id()).collect();

        let candidate = Block::new(6, hash(10, "abc"), 6778).unwrap();
        let drained = ledger.add_block(candidate, 12345).unwrap().unwrap();

        let drained_ids: Vec<u64> = drained.iter().map(|t| t.get_id()).collect();
        assert_eq!(drained_ids, before);
        assert!(drained.iter().all(|t| !t.is_pending()));
        assert_eq!(ledger.pending_count().unwrap(), 0);

        let tip = ledger.get_latest_block().unwrap();
        assert_eq!(tip.get_height(), 6);
        assert_eq!(tip.get_transactions().len(), 3);

        let endpoint = ledger.get_miner_endpoint(12345).unwrap().unwrap();
        assert_eq!(endpoint.get_balance(), 6);
    }

    #[test]
    fn test_rejects_stale_height_and_bad_link() {
        let (ledger, _dir) = ledger_at_height_five();
        pending(&ledger, 1);
        let tip_before = ledger.get_latest_block().unwrap();

        let stale = Block::new(5, hash(10, "abc"), 1).unwrap();
        assert!(ledger.add_block(stale, 1).unwrap().is_none());

        let mislinked = Block::new(6, "abc".to_string(), 1).unwrap();
        assert!(ledger.add_block(mislinked, 1).unwrap().is_none());

        assert_eq!(ledger.get_latest_block().unwrap(), tip_before);
        assert_eq!(ledger.pending_count().unwrap(), 1);
    }

    #[test]
    fn test_second_candidate_for_same_height_is_stale() {
        let (ledger, _dir) = ledger_at_height_five();
        let first = Block::new(6, hash(10, "abc"), 6778).unwrap();
        let second = Block::new(6, hash(10, "abc"), 6778).unwrap();

        assert!(ledger.add_block(first, 1).unwrap().is_some());
        assert!(ledger.add_block(second, 2).unwrap().is_none());
    }

    #[test]
    fn test_unknown_endpoint_still_appends() {
        let (ledger, _dir) = ledger_at_height_five();
        pending(&ledger, 4);

        let candidate = Block::new(6, hash(10, "abc"), 6778).unwrap();
        let drained = ledger.add_block(candidate, 999).unwrap().unwrap();

        assert_eq!(drained.len(), 1);
        assert!(ledger.list_miner_endpoints().unwrap().is_empty());
    }

    #[test]
    fn test_mark_transaction_valid() {
        let (ledger, _dir) = ledger_at_height_five();
        let tx = pending(&ledger, 1);

        ledger.mark_transaction_valid(tx.get_id()).unwrap();
        let stored = ledger.get_transaction(tx.get_id()).unwrap().unwrap();
        assert!(stored.is_valid());
        assert!(stored.is_pending());

        assert!(matches!(
            ledger.mark_transaction_valid(9_999),
            Err(BlockchainError::NotFound(_))
        ));
    }

    #[test]
    fn test_wallet_lookup_by_address_and_user() {
        let (ledger, _dir) = ledger_at_height_five();
        let wallet = Wallet::new(42).unwrap();
        ledger.store_wallet(&wallet).unwrap();

        let by_user = ledger.find_wallet_by_user(42).unwrap().unwrap();
        let by_address = ledger
            .find_wallet_by_address(wallet.get_address())
            .unwrap()
            .unwrap();
        assert_eq!(by_user.get_address(), wallet.get_address());
        assert_eq!(by_address.get_public_key(), wallet.get_public_key());
        assert!(ledger.find_wallet_by_user(7).unwrap().is_none());
    }

    #[test]
    fn test_transfer_funds_moves_balances() {
        let (ledger, _dir) = ledger_at_height_five();
        let alice = Wallet::new(1).unwrap();
        let bob = Wallet::new(2).unwrap();
        ledger.store_wallet(&alice).unwrap();
        ledger.store_wallet(&bob).unwrap();
        ledger.deposit(alice.get_address(), "BTC", 100).unwrap();

        let tx = Transaction::new_transfer(1, alice.get_address(), bob.get_address(), "BTC", 30, 1)
            .unwrap();
        ledger.transfer_funds(&[tx]).unwrap();

        let alice = ledger.find_wallet_by_user(1).unwrap().unwrap();
        let bob = ledger.find_wallet_by_user(2).unwrap().unwrap();
        assert_eq!(alice.get_balance("BTC"), 70);
        assert_eq!(bob.get_balance("BTC"), 30);
    }

    #[test]
    fn test_transfer_funds_partial_failure_keeps_earlier_transfers() {
        let (ledger, _dir) = ledger_at_height_five();
        let alice = Wallet::new(1).unwrap();
        let bob = Wallet::new(2).unwrap();
        ledger.store_wallet(&alice).unwrap();
        ledger.store_wallet(&bob).unwrap();
        ledger.deposit(alice.get_address(), "BTC", 50).unwrap();

        let ok = Transaction::new_transfer(1, alice.get_address(), bob.get_address(), "BTC", 40, 0)
            .unwrap();
        let too_much =
            Transaction::new_transfer(1, alice.get_address(), bob.get_address(), "BTC", 40, 0)
                .unwrap();

        assert!(ledger.transfer_funds(&[ok, too_much]).is_err());
        let bob = ledger.find_wallet_by_user(2).unwrap().unwrap();
        assert_eq!(bob.get_balance("BTC"), 40);
    }

    #[test]
    fn test_transfer_to_unknown_recipient_fails() {
        let (ledger, _dir) = ledger_at_height_five();
        let alice = Wallet::new(1).unwrap();
        ledger.store_wallet(&alice).unwrap();
        ledger.deposit(alice.get_address(), "BTC", 50).unwrap();

        let tx = Transaction::new_transfer(1, alice.get_address(), "nobody", "BTC", 5, 0).unwrap();
        assert!(matches!(
            ledger.transfer_funds(&[tx]),
            Err(BlockchainError::Wallet(_))
        ));
    }
}
