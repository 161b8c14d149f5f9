use crate::error::{BlockchainError, Result};
use crate::utils::{new_key_pair, public_key_from_pkcs8, sha256_digest, spki_from_public_key};
use data_encoding::BASE64;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A trading wallet as the chain sees it: key material, address and balances.
///
/// The private key is kept as a PKCS#8 document and wiped when the value drops.
#[derive(Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode, Zeroize, ZeroizeOnDrop)]
pub struct Wallet {
    #[zeroize(skip)]
    user_id: u64,
    #[zeroize(skip)]
    address: String,
    pkcs8: Vec<u8>,
    #[zeroize(skip)]
    public_key: Vec<u8>,
    #[zeroize(skip)]
    balances: HashMap<String, u64>,
}

impl Wallet {
    pub fn new(user_id: u64) -> Result<Wallet> {
        let pkcs8 = new_key_pair()?;
        Wallet::from_pkcs8(user_id, pkcs8)
    }

    pub fn from_pkcs8(user_id: u64, pkcs8: Vec<u8>) -> Result<Wallet> {
        let point = public_key_from_pkcs8(&pkcs8)?;
        let public_key = spki_from_public_key(&point)?;
        let address = address_from_public_key(&public_key);
        Ok(Wallet {
            user_id,
            address,
            pkcs8,
            public_key,
            balances: HashMap::new(),
        })
    }

    pub fn get_user_id(&self) -> u64 {
        self.user_id
    }

    pub fn get_address(&self) -> &str {
        self.address.as_str()
    }

    /// SubjectPublicKeyInfo DER of the wallet key
    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn get_pkcs8(&self) -> &[u8] {
        self.pkcs8.as_slice()
    }

    pub fn get_balance(&self, currency: &str) -> u64 {
        self.balances.get(currency).copied().unwrap_or(0)
    }

    pub fn get_balances(&self) -> &HashMap<String, u64> {
        &self.balances
    }

    pub(crate) fn credit(&mut self, currency: &str, amount: u64) -> Result<()> {
        let balance = self.balances.entry(currency.to_string()).or_insert(0);
        *balance = balance.checked_add(amount).ok_or_else(|| {
            BlockchainError::Wallet(format!("{currency} balance overflow for {}", self.address))
        })?;
        Ok(())
    }

    pub(crate) fn debit(&mut self, currency: &str, amount: u64) -> Result<()> {
        let available = self.get_balance(currency);
        if available < amount {
            return Err(BlockchainError::Transaction(format!(
                "Balance is not sufficient: {currency} required {amount}, available {available}"
            )));
        }
        self.balances
            .insert(currency.to_string(), available - amount);
        Ok(())
    }
}

/// Wallet address: base64 of the SHA-256 of the SPKI public key
pub fn address_from_public_key(spki_public_key: &[u8]) -> String {
    BASE64.encode(sha256_digest(spki_public_key).as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_wallet_has_spki_key_and_address() {
        let wallet = Wallet::new(3).unwrap();

        assert_eq!(wallet.get_user_id(), 3);
        assert_eq!(wallet.get_public_key().len(), 91);
        assert_eq!(
            wallet.get_address(),
            address_from_public_key(wallet.get_public_key())
        );
        // 32-byte digest in padded base64
        assert_eq!(wallet.get_address().len(), 44);
    }

    #[test]
    fn test_from_pkcs8_is_stable() {
        let wallet = Wallet::new(1).unwrap();
        let again = Wallet::from_pkcs8(1, wallet.get_pkcs8().to_vec()).unwrap();
        assert_eq!(wallet.get_address(), again.get_address());
        assert!(Wallet::from_pkcs8(1, vec![1, 2, 3]).is_err());
    }

    #[test]
    fn test_credit_and_debit() {
        let mut wallet = Wallet::new(1).unwrap();
        wallet.credit("BTC", 10).unwrap();
        wallet.debit("BTC", 4).unwrap();

        assert_eq!(wallet.get_balance("BTC"), 6);
        assert_eq!(wallet.get_balance("ETH"), 0);
        assert!(wallet.debit("BTC", 7).is_err());
        assert_eq!(wallet.get_balance("BTC"), 6);
    }
}
