//! Deterministic hashing for the proof-of-work puzzle and the chain link.

use crate::core::Block;
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;

/// SHA-256 over `previous_hash` followed by the decimal `nonce`, as lowercase hex.
pub fn hash(nonce: u64, previous_hash: &str) -> String {
    let data = format!("{previous_hash}{nonce}");
    HEXLOWER.encode(sha256_digest(data.as_bytes()).as_slice())
}

/// The value a successor of `block` must declare as its `previous_hash`.
pub fn link_hash(block: &Block) -> String {
    hash(block.get_nonce(), block.get_previous_hash())
}

/// True when `hash` starts with `difficulty` `'0'` characters.
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_known_value() {
        assert_eq!(
            hash(10, "abc"),
            "a81c43c82465f2becf61da46f2108b893802cb3d2fb83ef70216ed41b5d873d7"
        );
        // Genesis link: empty previous hash and nonce 0
        assert_eq!(
            hash(0, ""),
            "5feceb66ffc86f38d952786c6d696c79c2dbc239dd4e91b46729d73a27fb57e9"
        );
    }

    #[test]
    fn test_hash_is_deterministic_lowercase_hex() {
        let first = hash(42, "deadbeef");
        let second = hash(42, "deadbeef");

        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_ne!(first, hash(43, "deadbeef"));
    }

    #[test]
    fn test_link_hash_uses_nonce_and_previous_hash_only() {
        let a = Block::new(5, "abc".to_string(), 10).unwrap();
        let b = Block::new(9, "abc".to_string(), 10).unwrap();

        assert_eq!(link_hash(&a), hash(10, "abc"));
        assert_eq!(link_hash(&a), link_hash(&b));
    }

    #[test]
    fn test_meets_difficulty() {
        assert!(meets_difficulty("000abc", 3));
        assert!(!meets_difficulty("00abc0", 3));
        assert!(meets_difficulty("abc", 0));
        assert!(!meets_difficulty("00", 3));
    }
}
