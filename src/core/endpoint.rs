use crate::error::{BlockchainError, Result};
use serde::{Deserialize, Serialize};

/// A registered miner: where block proposals are pushed and who earns the fees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct MinerEndpoint {
    id: u32,
    address: String,
    balance: u64,
}

impl MinerEndpoint {
    pub fn new(id: u32, address: &str) -> MinerEndpoint {
        MinerEndpoint {
            id,
            address: address.to_string(),
            balance: 0,
        }
    }

    pub fn get_id(&self) -> u32 {
        self.id
    }

    pub fn get_address(&self) -> &str {
        self.address.as_str()
    }

    pub fn get_balance(&self) -> u64 {
        self.balance
    }

    pub(crate) fn credit(&mut self, fees: u64) -> Result<()> {
        self.balance = self.balance.checked_add(fees).ok_or_else(|| {
            BlockchainError::Transaction(format!("Fee credit overflows endpoint {}", self.id))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_accumulates() {
        let mut endpoint = MinerEndpoint::new(12345, "127.0.0.1");
        endpoint.credit(3).unwrap();
        endpoint.credit(4).unwrap();
        assert_eq!(endpoint.get_balance(), 7);
    }

    #[test]
    fn test_credit_overflow_is_an_error() {
        let mut endpoint = MinerEndpoint::new(1, "127.0.0.1");
        endpoint.credit(u64::MAX).unwrap();
        assert!(endpoint.credit(1).is_err());
        assert_eq!(endpoint.get_balance(), u64::MAX);
    }
}
