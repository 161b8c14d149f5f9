use crate::core::hash::{hash, link_hash, meets_difficulty};
use crate::core::Block;
use crate::error::{BlockchainError, Result};
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Required leading `'0'` hex characters when nothing else is configured
pub const DEFAULT_DIFFICULTY: usize = 3;

/// How many nonces are tried between two looks at the cancellation token
pub const CANCEL_CHECK_INTERVAL: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerState {
    Idle,
    Searching,
    Found(u64),
    Cancelled,
}

/// Shared stop flag for one search. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> CancellationToken {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Nonce search over `hash(nonce, link_hash)` for one proposal
pub struct ProofOfWork {
    link_hash: String,
    difficulty: usize,
    state: MinerState,
}

impl ProofOfWork {
    pub fn new(link_hash: String, difficulty: usize) -> ProofOfWork {
        ProofOfWork {
            link_hash,
            difficulty,
            state: MinerState::Idle,
        }
    }

    /// Search seeded from the chain link of the proposed tip
    pub fn for_proposal(proposal: &Block, difficulty: usize) -> ProofOfWork {
        ProofOfWork::new(link_hash(proposal), difficulty)
    }

    pub fn state(&self) -> MinerState {
        self.state
    }

    pub fn get_link_hash(&self) -> &str {
        self.link_hash.as_str()
    }

    /// Walk nonces from 1 upward until the difficulty is met or `token` fires.
    pub fn run(&mut self, token: &CancellationToken) -> Option<u64> {
        self.state = MinerState::Searching;
        debug!(
            "Mining on link {} with difficulty {}",
            self.link_hash, self.difficulty
        );

        let mut nonce: u64 = 1;
        loop {
            if (nonce - 1) % CANCEL_CHECK_INTERVAL == 0 && token.is_cancelled() {
                info!("Search on link {} cancelled at nonce {nonce}", self.link_hash);
                self.state = MinerState::Cancelled;
                return None;
            }
            if meets_difficulty(&hash(nonce, &self.link_hash), self.difficulty) {
                self.state = MinerState::Found(nonce);
                return Some(nonce);
            }
            nonce += 1;
        }
    }

    /// Whether `nonce` solves the puzzle for `link_hash`
    pub fn validate(link_hash: &str, nonce: u64, difficulty: usize) -> bool {
        meets_difficulty(&hash(nonce, link_hash), difficulty)
    }

    /// The block a successful search proposes on top of `proposal`
    pub fn assemble_candidate(proposal: &Block, nonce: u64) -> Result<Block> {
        let height = proposal.get_height().checked_add(1).ok_or_else(|| {
            BlockchainError::InvalidBlock(format!(
                "no height above {} to build on",
                proposal.get_height()
            ))
        })?;
        Block::new(height, link_hash(proposal), nonce)
    }
}

/// Uncancellable search: the smallest positive nonce meeting `difficulty`.
pub fn search(link_hash: &str, difficulty: usize) -> u64 {
    let mut nonce: u64 = 1;
    while !meets_difficulty(&hash(nonce, link_hash), difficulty) {
        nonce += 1;
    }
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_force_minimum(link: &str, difficulty: usize) -> u64 {
        (1..)
            .find(|n| hash(*n, link).starts_with(&"0".repeat(difficulty)))
            .unwrap()
    }

    #[test]
    fn test_search_returns_minimal_nonce() {
        let link = hash(10, "abc");

        for difficulty in 1..=2 {
            let nonce = search(&link, difficulty);
            assert_eq!(nonce, brute_force_minimum(&link, difficulty));
            for smaller in 1..nonce {
                assert!(!ProofOfWork::validate(&link, smaller, difficulty));
            }
        }
        assert_eq!(search(&link, 1), 11);
        assert_eq!(search(&link, 2), 246);
    }

    #[test]
    fn test_run_matches_search_and_records_state() {
        let link = hash(10, "abc");
        let mut pow = ProofOfWork::new(link.clone(), 3);
        assert_eq!(pow.state(), MinerState::Idle);

        let nonce = pow.run(&CancellationToken::new());

        assert_eq!(nonce, Some(6778));
        assert_eq!(pow.state(), MinerState::Found(6778));
        assert!(ProofOfWork::validate(&link, 6778, 3));
    }

    #[test]
    fn test_run_stops_when_cancelled() {
        let token = CancellationToken::new();
        token.cancel();

        let mut pow = ProofOfWork::new(hash(1, "x"), 64);
        assert_eq!(pow.run(&token), None);
        assert_eq!(pow.state(), MinerState::Cancelled);
    }

    #[test]
    fn test_token_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();

        assert!(token.is_cancelled());
        assert!(token.same_as(&clone));
        assert!(!token.same_as(&CancellationToken::new()));
    }

    #[test]
    fn test_assemble_candidate() {
        let proposal = Block::new(5, "abc".to_string(), 10).unwrap();
        let candidate = ProofOfWork::assemble_candidate(&proposal, 6778).unwrap();

        assert_eq!(candidate.get_height(), 6);
        assert_eq!(candidate.get_nonce(), 6778);
        assert_eq!(candidate.get_previous_hash(), hash(10, "abc"));
        assert!(candidate.get_transactions().is_empty());
    }

    #[test]
    fn test_assemble_candidate_at_maximum_height() {
        let proposal = Block::new(u64::MAX, "abc".to_string(), 10).unwrap();
        assert!(matches!(
            ProofOfWork::assemble_candidate(&proposal, 1),
            Err(BlockchainError::InvalidBlock(_))
        ));
    }
}
