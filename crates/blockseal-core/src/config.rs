use crate::constants::{DEFAULT_DIFFICULTY, DEFAULT_VERIFY_GENESIS, HASH_HEX_SIZE};
use crate::error::ConfigError;
use crate::integrity::IntegrityVerifier;
use crate::mine::Sealer;
use std::time::Duration;

/// Per-ledger policy. Passed to [`crate::Ledger::open`] so chains with different policies can
/// coexist in one process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Required leading hex zeros of every block hash.
    pub difficulty: u32,
    /// Search nonces on the rayon pool instead of the calling thread.
    pub parallel_sealing: bool,
    /// Abandon a nonce search after this long.
    pub seal_timeout: Option<Duration>,
    /// Also hold the genesis block to its proof of work and shape during integrity scans.
    pub verify_genesis: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            parallel_sealing: false,
            seal_timeout: None,
            verify_genesis: DEFAULT_VERIFY_GENESIS,
        }
    }
}

impl LedgerConfig {
    pub fn with_difficulty(difficulty: u32) -> Self {
        Self {
            difficulty,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.difficulty as usize > HASH_HEX_SIZE {
            return Err(ConfigError::DifficultyTooHigh(self.difficulty));
        }
        Ok(())
    }

    pub fn sealer(&self) -> Sealer {
        Sealer::new(self.difficulty)
            .parallel(self.parallel_sealing)
            .timeout(self.seal_timeout)
    }

    pub fn verifier(&self) -> IntegrityVerifier {
        IntegrityVerifier::new(self.difficulty).verify_genesis(self.verify_genesis)
    }
}
