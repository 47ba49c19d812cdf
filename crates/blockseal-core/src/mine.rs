use crate::constants::CANCEL_CHECK_INTERVAL;
use crate::error::SealError;
use crate::pow::{self, hash_with_nonce, meets_difficulty, prefix_hasher, SealControl};
use crate::{Block, Hash};
use rayon::prelude::*;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

enum Search {
    Found(u64),
    Stopped(SealError),
}

/// Seals a block by searching nonces in parallel until its hash has at least `difficulty`
/// leading hex zeros. Any winning nonce may be returned, not necessarily the smallest.
pub fn seal_block_parallel(
    mut block: Block,
    difficulty: u32,
    control: &SealControl,
) -> Result<(Block, Hash), SealError> {
    let base = prefix_hasher(&block);

    // Rayon splits the range into contiguous chunks, so every worker keeps crossing multiples
    // of the check interval.
    let outcome = (0u64..u64::MAX).into_par_iter().find_map_any(|nonce| {
        if nonce % CANCEL_CHECK_INTERVAL == 0 {
            if let Err(err) = control.check() {
                return Some(Search::Stopped(err));
            }
        }
        let hash = hash_with_nonce(&base, nonce);
        meets_difficulty(&hash, difficulty).then_some(Search::Found(nonce))
    });

    match outcome {
        Some(Search::Found(nonce)) => {
            block.nonce = nonce;
            let hash = block.hash();
            Ok((block, hash))
        }
        Some(Search::Stopped(err)) => Err(err),
        None => Err(SealError::NonceSpaceExhausted),
    }
}

/// Proof-of-work policy: difficulty, search strategy and time budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sealer {
    difficulty: u32,
    parallel: bool,
    timeout: Option<Duration>,
}

impl Sealer {
    pub fn new(difficulty: u32) -> Self {
        Self {
            difficulty,
            parallel: false,
            timeout: None,
        }
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn seal(
        &self,
        block: Block,
        cancel: &CancellationToken,
    ) -> Result<(Block, Hash), SealError> {
        let control = SealControl::new(cancel.clone()).with_timeout(self.timeout);
        debug!(
            index = block.index,
            difficulty = self.difficulty,
            parallel = self.parallel,
            "searching for nonce"
        );
        let (block, hash) = if self.parallel {
            seal_block_parallel(block, self.difficulty, &control)?
        } else {
            pow::seal_block(block, self.difficulty, &control)?
        };
        info!(
            index = block.index,
            nonce = block.nonce,
            hash = %hex::encode(hash),
            "sealed block"
        );
        Ok((block, hash))
    }
}
