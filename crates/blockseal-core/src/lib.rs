//! Single-authority, append-only ledger of proof-of-work sealed blocks.
//!
//! The block hash is never stored. It is always recomputed from a fixed, explicit byte encoding
//! of the block (see [`Block::hash_bytes`]) so that independent implementations agree on it.

pub mod chain;
pub mod config;
pub mod constants;
pub mod error;
pub mod integrity;
pub mod mine;
pub mod signature;
pub mod snapshot;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

pub use chain::{ChainState, Ledger};
pub use config::LedgerConfig;
pub use error::{ChainError, ConfigError, SealError, SignatureError, StorageError};
pub use integrity::{IntegrityError, IntegrityReason, IntegrityVerifier};
pub use mine::Sealer;
pub use snapshot::{ChainSnapshot, MemoryStore, Storage};
pub use tokio_util::sync::CancellationToken;

use constants::{AUTH_TAG_SIGNED, AUTH_TAG_UNSIGNED, GENESIS_PREVIOUS_HASH};

pub type Hash = [u8; 32];

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// How a transaction proves who sent it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Authentication {
    /// Admitted without any check.
    Unsigned,
    /// OpenSSH-encoded RSA public key and an RSA-PSS signature over the signing message.
    Signed {
        public_key: Vec<u8>,
        signature: Vec<u8>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "snapshot::TransactionRecord",
    into = "snapshot::TransactionRecord"
)]
pub struct Transaction {
    sender: String,
    receiver: String,
    amount: f64,
    authentication: Authentication,
}

impl Transaction {
    pub fn unsigned(sender: impl Into<String>, receiver: impl Into<String>, amount: f64) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            amount,
            authentication: Authentication::Unsigned,
        }
    }

    pub fn signed(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        amount: f64,
        public_key: Vec<u8>,
        signature: Vec<u8>,
    ) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            amount,
            authentication: Authentication::Signed {
                public_key,
                signature,
            },
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn authentication(&self) -> &Authentication {
        &self.authentication
    }

    pub fn is_signed(&self) -> bool {
        matches!(self.authentication, Authentication::Signed { .. })
    }

    /// Appends sender, receiver, amount and the authentication fields, in that order.
    fn write_canonical(&self, out: &mut Vec<u8>) {
        put_bytes(out, self.sender.as_bytes());
        put_bytes(out, self.receiver.as_bytes());
        out.extend_from_slice(&self.amount.to_bits().to_le_bytes());
        match &self.authentication {
            Authentication::Unsigned => out.push(AUTH_TAG_UNSIGNED),
            Authentication::Signed {
                public_key,
                signature,
            } => {
                out.push(AUTH_TAG_SIGNED);
                put_bytes(out, public_key);
                put_bytes(out, signature);
            }
        }
    }
}

/// Length-prefixed (u64 little-endian) byte string.
fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(bytes);
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    pub transactions: Vec<Transaction>,
    pub timestamp: u64,
    pub previous_hash: String,
    pub nonce: u64,
}

impl Block {
    pub fn new(
        index: u64,
        transactions: Vec<Transaction>,
        timestamp: u64,
        previous_hash: impl Into<String>,
    ) -> Self {
        Self {
            index,
            transactions,
            timestamp,
            previous_hash: previous_hash.into(),
            nonce: 0,
        }
    }

    /// Unsealed index-0 block with no transactions.
    pub fn genesis(timestamp: u64) -> Self {
        Self::new(0, Vec::new(), timestamp, GENESIS_PREVIOUS_HASH)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// Canonical encoding of everything except the nonce. The nonce is always the trailing
    /// eight bytes, which lets the sealer hash this prefix once per search.
    pub fn hash_prefix(&self) -> Vec<u8> {
        let mut bytes =
            Vec::with_capacity(64 + self.previous_hash.len() + 64 * self.transactions.len());
        bytes.extend_from_slice(&self.index.to_le_bytes());
        bytes.extend_from_slice(&(self.transactions.len() as u64).to_le_bytes());
        for tx in &self.transactions {
            tx.write_canonical(&mut bytes);
        }
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        put_bytes(&mut bytes, self.previous_hash.as_bytes());
        bytes
    }

    /// Canonical encoding: index, transactions in list order, timestamp, previous hash, nonce.
    pub fn hash_bytes(&self) -> Vec<u8> {
        let mut bytes = self.hash_prefix();
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes
    }

    pub fn hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.hash_bytes());
        finalize(hasher)
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash())
    }
}

fn finalize(hasher: Sha256) -> Hash {
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..]);
    out
}

pub mod pow {
    use super::{finalize, Block, Hash};
    use crate::constants::{CANCEL_CHECK_INTERVAL, HASH_HEX_SIZE};
    use crate::error::SealError;
    use sha2::{Digest, Sha256};
    use std::time::{Duration, Instant};
    use tokio_util::sync::CancellationToken;

    /// Stop conditions for a nonce search.
    #[derive(Clone, Debug, Default)]
    pub struct SealControl {
        token: CancellationToken,
        deadline: Option<Instant>,
    }

    impl SealControl {
        pub fn new(token: CancellationToken) -> Self {
            Self {
                token,
                deadline: None,
            }
        }

        pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
            self.deadline = timeout.map(|t| Instant::now() + t);
            self
        }

        pub fn check(&self) -> Result<(), SealError> {
            if self.token.is_cancelled() {
                return Err(SealError::Cancelled);
            }
            match self.deadline {
                Some(deadline) if Instant::now() >= deadline => Err(SealError::DeadlineExceeded),
                _ => Ok(()),
            }
        }
    }

    /// Number of leading `'0'` characters in the hex rendering of `hash`.
    pub fn count_leading_zero_nibbles(hash: &Hash) -> u32 {
        let mut total = 0u32;
        for b in hash {
            if *b == 0 {
                total += 2;
            } else {
                if *b < 0x10 {
                    total += 1;
                }
                break;
            }
        }
        total
    }

    pub fn meets_difficulty(hash: &Hash, difficulty: u32) -> bool {
        count_leading_zero_nibbles(hash) >= difficulty
    }

    /// The claimed hash has enough leading zeros and really is the hash of `block`.
    pub fn is_valid_proof(block: &Block, claimed: &Hash, difficulty: u32) -> bool {
        meets_difficulty(claimed, difficulty) && *claimed == block.hash()
    }

    /// [`is_valid_proof`] over a hex-encoded claim.
    pub fn is_valid_proof_hex(block: &Block, claimed: &str, difficulty: u32) -> bool {
        let zeros = difficulty.min(HASH_HEX_SIZE as u32) as usize;
        claimed.len() >= zeros
            && claimed.bytes().take(zeros).all(|c| c == b'0')
            && claimed == block.hash_hex()
    }

    /// Hasher state primed with everything but the nonce.
    pub(crate) fn prefix_hasher(block: &Block) -> Sha256 {
        let mut hasher = Sha256::new();
        hasher.update(block.hash_prefix());
        hasher
    }

    pub(crate) fn hash_with_nonce(base: &Sha256, nonce: u64) -> Hash {
        let mut hasher = base.clone();
        hasher.update(nonce.to_le_bytes());
        finalize(hasher)
    }

    /// Seal `block` by trying nonces 0, 1, 2, ... until its hash has at least `difficulty`
    /// leading hex zeros. Deterministic: the smallest winning nonce is returned.
    pub fn seal_block(
        mut block: Block,
        difficulty: u32,
        control: &SealControl,
    ) -> Result<(Block, Hash), SealError> {
        let base = prefix_hasher(&block);
        let mut nonce = 0u64;
        loop {
            if nonce % CANCEL_CHECK_INTERVAL == 0 {
                control.check()?;
            }
            let hash = hash_with_nonce(&base, nonce);
            if meets_difficulty(&hash, difficulty) {
                block.nonce = nonce;
                return Ok((block, hash));
            }
            nonce = nonce
                .checked_add(1)
                .ok_or(SealError::NonceSpaceExhausted)?;
        }
    }
}
