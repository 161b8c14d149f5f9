// This file holds the settlement transaction record that moves through my chain
// A transaction is created pending+invalid by the trading side, becomes valid once
// its signature checks out, and stops being pending when a mined block absorbs it

use crate::core::json;
use crate::error::{BlockchainError, Result};
use crate::utils::current_timestamp;
use serde::{Deserialize, Serialize};

// The only kind the trading side currently produces
pub const TRANSFER_KIND: &str = "Transfer";

// Field names follow the trading application's JSON so block payloads stay compatible
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
#[serde(rename_all = "PascalCase")]
pub struct Transaction {
    id: u64, // Assigned by the ledger when the transaction is recorded
    #[serde(deserialize_with = "json::millis_from_number_or_iso8601")]
    date: i64, // Creation time in milliseconds since the epoch
    #[serde(rename = "Type")]
    kind: String,
    currency: String,
    #[serde(deserialize_with = "json::units_from_number")]
    amount: u64, // Minor units of `currency`
    #[serde(rename = "TransactionFee", deserialize_with = "json::units_from_number")]
    fee: u64, // Credited to the miner endpoint whose block absorbs this transaction
    from: String,
    to: String,
    is_pending: bool,
    is_valid: bool,
    user_id: u64, // Owner of the sending wallet
}

impl Transaction {
    // When the trading side asks me to move funds, I start from a pending, unverified record
    pub fn new_transfer(
        user_id: u64,
        from: &str,
        to: &str,
        currency: &str,
        amount: u64,
        fee: u64,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::Transaction(
                "Transaction amount must be positive".to_string(),
            ));
        }
        if currency.is_empty() {
            return Err(BlockchainError::Transaction(
                "Transaction currency must not be empty".to_string(),
            ));
        }

        Ok(Transaction {
            id: 0,
            date: current_timestamp()?,
            kind: TRANSFER_KIND.to_string(),
            currency: currency.to_string(),
            amount,
            fee,
            from: from.to_string(),
            to: to.to_string(),
            is_pending: true,
            is_valid: false,
            user_id,
        })
    }

    /// The exact bytes a sender signs: from, to, amount and currency joined
    /// without separators. Existing signatures depend on this ordering.
    pub fn canonical_payload(&self) -> String {
        format!("{}{}{}{}", self.from, self.to, self.amount, self.currency)
    }

    pub fn get_id(&self) -> u64 {
        self.id
    }

    pub fn get_date(&self) -> i64 {
        self.date
    }

    pub fn get_kind(&self) -> &str {
        self.kind.as_str()
    }

    pub fn get_currency(&self) -> &str {
        self.currency.as_str()
    }

    pub fn get_amount(&self) -> u64 {
        self.amount
    }

    pub fn get_fee(&self) -> u64 {
        self.fee
    }

    pub fn get_from(&self) -> &str {
        self.from.as_str()
    }

    pub fn get_to(&self) -> &str {
        self.to.as_str()
    }

    pub fn is_pending(&self) -> bool {
        self.is_pending
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn get_user_id(&self) -> u64 {
        self.user_id
    }

    // The ledger owns id assignment and the two status flags
    pub(crate) fn assign_id(&mut self, id: u64) {
        self.id = id;
        self.is_pending = true;
        self.is_valid = false;
    }

    pub(crate) fn mark_valid(&mut self) {
        self.is_valid = true;
    }

    pub(crate) fn mark_included(&mut self) {
        self.is_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transfer_starts_pending_and_invalid() {
        let tx = Transaction::new_transfer(7, "alice", "bob", "BTC", 25, 1).unwrap();

        assert!(tx.is_pending());
        assert!(!tx.is_valid());
        assert_eq!(tx.get_kind(), TRANSFER_KIND);
        assert_eq!(tx.get_user_id(), 7);
        assert!(tx.get_date() > 0);
    }

    #[test]
    fn test_new_transfer_rejects_zero_amount() {
        assert!(Transaction::new_transfer(1, "a", "b", "BTC", 0, 1).is_err());
        assert!(Transaction::new_transfer(1, "a", "b", "", 5, 1).is_err());
    }

    #[test]
    fn test_canonical_payload_has_no_separators() {
        let tx = Transaction::new_transfer(1, "addrA", "addrB", "ETH", 1500, 3).unwrap();
        assert_eq!(tx.canonical_payload(), "addrAaddrB1500ETH");
    }

    #[test]
    fn test_json_uses_trading_field_names() {
        let tx = Transaction::new_transfer(1, "a", "b", "BTC", 5, 2).unwrap();
        let json = serde_json::to_string(&tx).unwrap();

        assert!(json.contains("\"TransactionFee\":2"));
        assert!(json.contains("\"Type\":\"Transfer\""));
        assert!(json.contains("\"IsPending\":true"));

        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tx);
    }

    #[test]
    fn test_status_transitions() {
        let mut tx = Transaction::new_transfer(1, "a", "b", "BTC", 5, 2).unwrap();
        tx.assign_id(9);
        tx.mark_valid();
        tx.mark_included();

        assert_eq!(tx.get_id(), 9);
        assert!(tx.is_valid());
        assert!(!tx.is_pending());
    }
}
