//! Tamper detection over a materialised chain. Read-only: nothing stored is trusted, every
//! hash is recomputed.

use crate::constants::{DEFAULT_VERIFY_GENESIS, GENESIS_PREVIOUS_HASH};
use crate::pow::meets_difficulty;
use crate::{Block, Hash};
use std::fmt;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityReason {
    /// The block's own hash lacks the required leading zeros.
    InsufficientWork,
    /// `previous_hash` differs from the recomputed hash of the preceding block.
    PreviousHashMismatch,
    /// The block's index differs from its position in the chain.
    IndexMismatch,
    /// The first block is not an empty index-0 block linked to `"0"`.
    MalformedGenesis,
}

impl fmt::Display for IntegrityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            IntegrityReason::InsufficientWork => "hash does not meet the difficulty target",
            IntegrityReason::PreviousHashMismatch => {
                "previous hash does not match the preceding block"
            }
            IntegrityReason::IndexMismatch => "index does not match the block's position",
            IntegrityReason::MalformedGenesis => "genesis block is malformed",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("integrity problem at block {index}: {reason}")]
    Problem { index: u64, reason: IntegrityReason },

    #[error("block index {index} does not exist")]
    NotFound { index: u64 },

    #[error("cannot check the first block")]
    GenesisNotCheckable,
}

impl IntegrityError {
    /// Position of the offending block, when there is one.
    pub fn index(&self) -> Option<u64> {
        match self {
            IntegrityError::Problem { index, .. } => Some(*index),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntegrityVerifier {
    difficulty: u32,
    verify_genesis: bool,
}

impl IntegrityVerifier {
    /// Genesis is checked unless [`verify_genesis`](Self::verify_genesis) turns it off.
    pub fn new(difficulty: u32) -> Self {
        Self {
            difficulty,
            verify_genesis: DEFAULT_VERIFY_GENESIS,
        }
    }

    pub fn verify_genesis(mut self, verify: bool) -> Self {
        self.verify_genesis = verify;
        self
    }

    /// Checks every block after genesis in ascending order and reports the lowest failing
    /// position. For each block the proof of work is checked before the link to its
    /// predecessor. An empty chain passes.
    pub fn scan_all(&self, blocks: &[Block]) -> Result<(), IntegrityError> {
        let Some(genesis) = blocks.first() else {
            return Ok(());
        };
        let mut previous = genesis.hash();
        if self.verify_genesis {
            self.check_genesis(genesis, &previous)
                .inspect_err(|err| warn!(%err, "integrity scan failed"))?;
        }
        for (position, block) in blocks.iter().enumerate().skip(1) {
            let hash = block.hash();
            self.check_link(position as u64, block, &hash, &previous)
                .inspect_err(|err| warn!(%err, "integrity scan failed"))?;
            previous = hash;
        }
        Ok(())
    }

    /// Same checks as [`scan_all`](Self::scan_all) for the single pair `(index - 1, index)`.
    pub fn scan_one(&self, blocks: &[Block], index: u64) -> Result<(), IntegrityError> {
        if index == 0 {
            return Err(IntegrityError::GenesisNotCheckable);
        }
        let position =
            usize::try_from(index).map_err(|_| IntegrityError::NotFound { index })?;
        let (Some(previous), Some(block)) = (blocks.get(position - 1), blocks.get(position)) else {
            return Err(IntegrityError::NotFound { index });
        };
        self.check_link(index, block, &block.hash(), &previous.hash())
    }

    fn check_link(
        &self,
        position: u64,
        block: &Block,
        hash: &Hash,
        previous: &Hash,
    ) -> Result<(), IntegrityError> {
        let problem = |reason| IntegrityError::Problem {
            index: position,
            reason,
        };
        if !meets_difficulty(hash, self.difficulty) {
            return Err(problem(IntegrityReason::InsufficientWork));
        }
        if block.previous_hash != hex::encode(previous) {
            return Err(problem(IntegrityReason::PreviousHashMismatch));
        }
        if block.index != position {
            return Err(problem(IntegrityReason::IndexMismatch));
        }
        Ok(())
    }

    fn check_genesis(&self, genesis: &Block, hash: &Hash) -> Result<(), IntegrityError> {
        let problem = |reason| IntegrityError::Problem { index: 0, reason };
        if genesis.index != 0
            || genesis.previous_hash != GENESIS_PREVIOUS_HASH
            || !genesis.transactions.is_empty()
        {
            return Err(problem(IntegrityReason::MalformedGenesis));
        }
        if !meets_difficulty(hash, self.difficulty) {
            return Err(problem(IntegrityReason::InsufficientWork));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow::{seal_block, SealControl};
    use crate::Transaction;

    const DIFFICULTY: u32 = 2;

    fn build_chain(len: u64) -> Vec<Block> {
        let control = SealControl::default();
        let (genesis, _) = seal_block(Block::genesis(1_600_000_000), DIFFICULTY, &control).unwrap();
        let mut blocks = vec![genesis];
        for index in 1..len {
            let txs = vec![
                Transaction::unsigned(format!("user{index}"), "Bob", index as f64),
                Transaction::unsigned("Bob", format!("user{index}"), 0.5),
            ];
            let previous = blocks[index as usize - 1].hash_hex();
            let candidate = Block::new(index, txs, 1_600_000_000 + index * 60, previous);
            let (sealed, _) = seal_block(candidate, DIFFICULTY, &control).unwrap();
            blocks.push(sealed);
        }
        blocks
    }

    fn verifier() -> IntegrityVerifier {
        IntegrityVerifier::new(DIFFICULTY)
    }

    #[test]
    fn fresh_chain_passes() {
        let blocks = build_chain(5);
        assert_eq!(verifier().scan_all(&blocks), Ok(()));
        for index in 1..5 {
            assert_eq!(verifier().scan_one(&blocks, index), Ok(()));
        }
    }

    #[test]
    fn empty_and_genesis_only_chains_pass() {
        assert_eq!(verifier().scan_all(&[]), Ok(()));
        assert_eq!(verifier().scan_all(&build_chain(1)), Ok(()));
    }

    #[test]
    fn tampered_amount_is_caught_at_block_or_successor() {
        let mut blocks = build_chain(5);
        let tx = &blocks[2].transactions[0];
        blocks[2].transactions[0] =
            Transaction::unsigned(tx.sender(), tx.receiver(), tx.amount() + 1.0);

        let err = verifier().scan_all(&blocks).unwrap_err();
        let index = err.index().unwrap();
        assert!(index == 2 || index == 3, "unexpected failure at {index}");
        // same mutation, same report
        assert_eq!(verifier().scan_all(&blocks).unwrap_err(), err);
        // block 3 no longer links to the rewritten block 2
        assert_eq!(
            verifier().scan_one(&blocks, 3),
            Err(IntegrityError::Problem {
                index: 3,
                reason: IntegrityReason::PreviousHashMismatch
            })
        );
    }

    #[test]
    fn tampered_nonce_without_remining_is_caught() {
        let mut blocks = build_chain(4);
        let mut nonce = blocks[1].nonce;
        // find a nonce that breaks the work requirement
        loop {
            nonce += 1;
            let mut probe = blocks[1].clone();
            probe.nonce = nonce;
            if !meets_difficulty(&probe.hash(), DIFFICULTY) {
                blocks[1] = probe;
                break;
            }
        }
        assert_eq!(
            verifier().scan_all(&blocks),
            Err(IntegrityError::Problem {
                index: 1,
                reason: IntegrityReason::InsufficientWork
            })
        );
    }

    #[test]
    fn remined_tampered_block_breaks_the_next_link() {
        let mut blocks = build_chain(4);
        let mut forged = blocks[1].clone();
        forged.transactions[0] = Transaction::unsigned("Mallory", "Mallory", 1_000.0);
        let (forged, _) = seal_block(forged, DIFFICULTY, &SealControl::default()).unwrap();
        blocks[1] = forged;
        assert_eq!(
            verifier().scan_all(&blocks),
            Err(IntegrityError::Problem {
                index: 2,
                reason: IntegrityReason::PreviousHashMismatch
            })
        );
    }

    #[test]
    fn swapped_blocks_are_caught() {
        let mut blocks = build_chain(5);
        blocks.swap(2, 3);
        let err = verifier().scan_all(&blocks).unwrap_err();
        assert_eq!(err.index(), Some(2));
    }

    #[test]
    fn removed_block_is_caught() {
        let mut blocks = build_chain(5);
        blocks.remove(2);
        assert_eq!(
            verifier().scan_all(&blocks),
            Err(IntegrityError::Problem {
                index: 2,
                reason: IntegrityReason::PreviousHashMismatch
            })
        );
    }

    #[test]
    fn lowest_failing_index_is_reported() {
        let mut blocks = build_chain(6);
        blocks[4].previous_hash = "f".repeat(64);
        blocks[2].previous_hash = "e".repeat(64);
        assert_eq!(verifier().scan_all(&blocks).unwrap_err().index(), Some(2));
    }

    #[test]
    fn genesis_policy() {
        let mut blocks = build_chain(3);
        blocks[0].previous_hash = "1".into();
        assert_eq!(
            verifier().scan_all(&blocks),
            Err(IntegrityError::Problem {
                index: 0,
                reason: IntegrityReason::MalformedGenesis
            })
        );
        // without the policy only the link from block 1 is at stake
        let lenient = IntegrityVerifier::new(DIFFICULTY).verify_genesis(false);
        let err = lenient.scan_all(&blocks).unwrap_err();
        assert_eq!(err.index(), Some(1));
    }

    #[test]
    fn scan_one_rejects_genesis_and_missing_blocks() {
        let blocks = build_chain(3);
        assert_eq!(
            verifier().scan_one(&blocks, 0),
            Err(IntegrityError::GenesisNotCheckable)
        );
        assert_eq!(
            verifier().scan_one(&blocks, 3),
            Err(IntegrityError::NotFound { index: 3 })
        );
        assert_eq!(
            verifier().scan_one(&blocks, u64::MAX),
            Err(IntegrityError::NotFound { index: u64::MAX })
        );
    }

    #[test]
    fn index_mismatch_is_reported() {
        let mut blocks = build_chain(3);
        // re-seal block 2 with a wrong index but a correct link
        let mut wrong = blocks[2].clone();
        wrong.index = 7;
        let (wrong, _) = seal_block(wrong, DIFFICULTY, &SealControl::default()).unwrap();
        blocks[2] = wrong;
        assert_eq!(
            verifier().scan_all(&blocks),
            Err(IntegrityError::Problem {
                index: 2,
                reason: IntegrityReason::IndexMismatch
            })
        );
    }
}
