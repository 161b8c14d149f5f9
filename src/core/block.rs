use crate::core::{json, Transaction};
use crate::error::Result;
use crate::utils::current_timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A block of the settlement chain.
///
/// The chain link is weak: a successor declares
/// `hash(nonce, previous_hash)` of this block as its own `previous_hash`, so
/// neither the id nor the transactions are ever hashed into the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
#[serde(rename_all = "PascalCase")]
pub struct Block {
    #[serde(deserialize_with = "json::id_from_text_or_number")]
    id: String,
    height: u64,
    previous_hash: String,
    nonce: u64,
    #[serde(
        rename = "TimeStamp",
        deserialize_with = "json::millis_from_number_or_iso8601"
    )]
    timestamp: i64,
    #[serde(default)]
    transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(height: u64, previous_hash: String, nonce: u64) -> Result<Block> {
        Ok(Block {
            id: Uuid::new_v4().to_string(),
            height,
            previous_hash,
            nonce,
            timestamp: current_timestamp()?,
            transactions: vec![],
        })
    }

    pub fn generate_genesis_block() -> Result<Block> {
        Block::new(0, String::new(), 0)
    }

    pub fn from_json(json: &str) -> Result<Block> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn get_id(&self) -> &str {
        self.id.as_str()
    }

    pub fn get_height(&self) -> u64 {
        self.height
    }

    pub fn get_previous_hash(&self) -> &str {
        self.previous_hash.as_str()
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub(crate) fn with_transactions(mut self, transactions: Vec<Transaction>) -> Block {
        self.transactions = transactions;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_block() {
        let genesis = Block::generate_genesis_block().unwrap();

        assert_eq!(genesis.get_height(), 0);
        assert_eq!(genesis.get_nonce(), 0);
        assert_eq!(genesis.get_previous_hash(), "");
        assert!(genesis.get_transactions().is_empty());
    }

    #[test]
    fn test_new_blocks_get_distinct_ids() {
        let a = Block::new(1, "abc".to_string(), 4).unwrap();
        let b = Block::new(1, "abc".to_string(), 4).unwrap();
        assert_ne!(a.get_id(), b.get_id());
    }

    #[test]
    fn test_json_round_trip_uses_pascal_case() {
        let tx = Transaction::new_transfer(3, "a", "b", "BTC", 10, 1).unwrap();
        let block = Block::new(6, "ff00".to_string(), 812)
            .unwrap()
            .with_transactions(vec![tx]);

        let json = block.to_json().unwrap();
        assert!(json.contains("\"PreviousHash\":\"ff00\""));
        assert!(json.contains("\"TimeStamp\":"));

        assert_eq!(Block::from_json(&json).unwrap(), block);
    }

    #[test]
    fn test_json_without_transactions_field() {
        let json = r#"{"Id":"x","Height":2,"PreviousHash":"aa","Nonce":5,"TimeStamp":1}"#;
        let block = Block::from_json(json).unwrap();

        assert_eq!(block.get_height(), 2);
        assert!(block.get_transactions().is_empty());
    }

    #[test]
    fn test_json_from_trading_application() {
        let json = r#"{
            "Id": 3,
            "TimeStamp": "2024-05-01T10:00:00.123+02:00",
            "PreviousHash": "abc",
            "Height": 5,
            "Nonce": 10,
            "Transactions": [{
                "Id": 41,
                "Date": "2024-05-01T09:59:58.5",
                "Type": "Transfer",
                "Currency": "BTC",
                "Amount": 25.0,
                "TransactionFee": 1.0,
                "From": "alice",
                "To": "bob",
                "IsPending": true,
                "IsValid": true,
                "UserId": 7,
                "User": null
            }]
        }"#;

        let block = Block::from_json(json).unwrap();
        assert_eq!(block.get_id(), "3");
        assert_eq!(block.get_timestamp(), 1_714_550_400_123);
        assert_eq!(block.get_height(), 5);

        let tx = &block.get_transactions()[0];
        assert_eq!(tx.get_id(), 41);
        assert_eq!(tx.get_date(), 1_714_557_598_500);
        assert_eq!(tx.get_amount(), 25);
        assert_eq!(tx.get_fee(), 1);
        assert_eq!(tx.get_user_id(), 7);
    }

    #[test]
    fn test_from_json_rejects_fractional_amount() {
        let json = r#"{"Id":1,"Height":1,"PreviousHash":"","Nonce":0,"TimeStamp":0,
            "Transactions":[{"Id":1,"Date":0,"Type":"Transfer","Currency":"BTC",
            "Amount":0.5,"TransactionFee":0,"From":"a","To":"b","IsPending":true,
            "IsValid":false,"UserId":1}]}"#;
        assert!(Block::from_json(json).is_err());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(Block::from_json("{\"Height\":").is_err());
        assert!(Block::from_json("[]").is_err());
    }
}
