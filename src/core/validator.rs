use crate::core::hash::link_hash;
use crate::core::{Block, Transaction};
use crate::error::Result;
use crate::storage::LedgerGateway;
use log::info;
use std::fmt;
use std::sync::Arc;

/// Why a candidate does not extend the current tip
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    HeightMismatch { tip: u64, candidate: u64 },
    LinkMismatch { expected: String, declared: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::HeightMismatch { tip, candidate } => write!(
                f,
                "candidate height {candidate} does not follow tip height {tip}"
            ),
            Rejection::LinkMismatch { expected, declared } => write!(
                f,
                "declared previous hash {declared} does not match tip link {expected}"
            ),
        }
    }
}

/// Accept iff `candidate` sits exactly one above `tip` and declares the tip's link hash.
pub fn validate_extension(tip: &Block, candidate: &Block) -> std::result::Result<(), Rejection> {
    if tip.get_height().checked_add(1) != Some(candidate.get_height()) {
        return Err(Rejection::HeightMismatch {
            tip: tip.get_height(),
            candidate: candidate.get_height(),
        });
    }

    let expected = link_hash(tip);
    if candidate.get_previous_hash() != expected {
        return Err(Rejection::LinkMismatch {
            expected,
            declared: candidate.get_previous_hash().to_string(),
        });
    }

    Ok(())
}

/// Submits mined candidates to the ledger, which applies [`validate_extension`]
/// under its single writer.
#[derive(Clone)]
pub struct ChainValidator {
    ledger: Arc<dyn LedgerGateway>,
}

impl ChainValidator {
    pub fn new(ledger: Arc<dyn LedgerGateway>) -> ChainValidator {
        ChainValidator { ledger }
    }

    /// `Some(drained)` when the block became the new tip, `None` when it was
    /// stale or mislinked. Rejection is an outcome, not an error.
    pub fn submit(&self, candidate: Block, endpoint_id: u32) -> Result<Option<Vec<Transaction>>> {
        let height = candidate.get_height();
        let outcome = self.ledger.add_block(candidate, endpoint_id)?;
        match &outcome {
            Some(drained) => info!(
                "Block {height} from endpoint {endpoint_id} accepted with {} transactions",
                drained.len()
            ),
            None => info!("Block {height} from endpoint {endpoint_id} discarded"),
        }
        Ok(outcome)
    }
}
