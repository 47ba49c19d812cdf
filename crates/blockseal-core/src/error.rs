//! Error types shared by the ledger crates.

use thiserror::Error;

/// Failures of the persisted snapshot. Low-level I/O and decode faults are folded in here so
/// callers always see a storage condition rather than a raw backend error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no persisted chain found at {0}")]
    Missing(String),

    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed chain snapshot: {0}")]
    Malformed(String),

    #[error("database error: {0}")]
    Database(String),
}

/// Why a nonce search stopped without a result.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SealError {
    #[error("proof-of-work search was cancelled")]
    Cancelled,

    #[error("proof-of-work search exceeded its deadline")]
    DeadlineExceeded,

    #[error("nonce space exhausted without meeting the difficulty target")]
    NonceSpaceExhausted,
}

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("public key is not an OpenSSH RSA key: {0}")]
    InvalidPublicKey(String),

    #[error("private key is not a PKCS#8 PEM RSA key: {0}")]
    InvalidPrivateKey(String),

    #[error("signature does not match the transaction")]
    Mismatch,

    #[error("signed message does not match the transaction content")]
    MessageMismatch,

    #[error("could not encode signing message: {0}")]
    Encoding(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("difficulty {0} exceeds the 64 hex digits of a SHA-256 hash")]
    DifficultyTooHigh(u32),
}

/// Errors returned by chain operations.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("cannot create a block: there are no pending transactions")]
    EmptyPendingPool,

    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),

    #[error("proof of work for block {index} failed its own validity check")]
    InvalidProof { index: u64 },

    #[error("block {index} does not exist")]
    NotFound { index: u64 },

    #[error("amount {0} is not a finite number")]
    NonFiniteAmount(f64),

    #[error("chain has no genesis block")]
    NotInitialized,

    #[error("chain already has a genesis block")]
    AlreadyInitialized,

    #[error("chain tip moved while block {index} was being sealed")]
    TipMoved { index: u64 },

    #[error(transparent)]
    Seal(#[from] SealError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = ChainError> = std::result::Result<T, E>;
