//! Persisted form of a chain and the narrow interface storage backends implement.
//!
//! The trait lives in core so the chain logic can be tested without a filesystem and the
//! storage crate can depend on core without a cycle.

use crate::error::StorageError;
use crate::{Authentication, Block, Transaction};
use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Whole-chain snapshot: `{"pendingTransactions": [...], "blocks": [...]}`. Hashes are never
/// persisted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSnapshot {
    pub pending_transactions: Vec<Transaction>,
    pub blocks: Vec<Block>,
}

/// Wire shape of a transaction. Key and signature are base64 and travel together.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub sender: String,
    pub receiver: String,
    pub amount: f64,
    #[serde(default, alias = "public_key")]
    pub public_key: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

impl From<Transaction> for TransactionRecord {
    fn from(tx: Transaction) -> Self {
        let (public_key, signature) = match tx.authentication {
            Authentication::Unsigned => (None, None),
            Authentication::Signed {
                public_key,
                signature,
            } => (
                Some(BASE64_ENGINE.encode(public_key)),
                Some(BASE64_ENGINE.encode(signature)),
            ),
        };
        Self {
            sender: tx.sender,
            receiver: tx.receiver,
            amount: tx.amount,
            public_key,
            signature,
        }
    }
}

impl TryFrom<TransactionRecord> for Transaction {
    type Error = StorageError;

    fn try_from(record: TransactionRecord) -> Result<Self, Self::Error> {
        if !record.amount.is_finite() {
            return Err(StorageError::Malformed(format!(
                "amount {} is not a finite number",
                record.amount
            )));
        }
        match (record.public_key, record.signature) {
            (None, None) => Ok(Transaction::unsigned(
                record.sender,
                record.receiver,
                record.amount,
            )),
            (Some(public_key), Some(signature)) => Ok(Transaction::signed(
                record.sender,
                record.receiver,
                record.amount,
                decode_base64("publicKey", &public_key)?,
                decode_base64("signature", &signature)?,
            )),
            _ => Err(StorageError::Malformed(
                "transaction carries only one of publicKey and signature".into(),
            )),
        }
    }
}

fn decode_base64(field: &str, value: &str) -> Result<Vec<u8>, StorageError> {
    BASE64_ENGINE
        .decode(value)
        .map_err(|err| StorageError::Malformed(format!("{field} is not valid base64: {err}")))
}

/// Load and save are the only contact points with persistence. Both move the whole chain.
pub trait Storage: Send + Sync {
    /// Returns [`StorageError::Missing`] when nothing has been saved yet.
    fn load(&self) -> Result<ChainSnapshot, StorageError>;
    fn save(&self, snapshot: &ChainSnapshot) -> Result<(), StorageError>;
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    fn load(&self) -> Result<ChainSnapshot, StorageError> {
        (**self).load()
    }

    fn save(&self, snapshot: &ChainSnapshot) -> Result<(), StorageError> {
        (**self).save(snapshot)
    }
}

/// Process-local store, for tests and ephemeral ledgers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Option<ChainSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: ChainSnapshot) -> Self {
        Self {
            inner: Mutex::new(Some(snapshot)),
        }
    }
}

impl Storage for MemoryStore {
    fn load(&self) -> Result<ChainSnapshot, StorageError> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| StorageError::Missing("memory".into()))
    }

    fn save(&self, snapshot: &ChainSnapshot) -> Result<(), StorageError> {
        *self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(snapshot.clone());
        Ok(())
    }
}
