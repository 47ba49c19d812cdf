//! Block sequence plus pending pool, and the single-writer ledger that persists them.

use crate::config::LedgerConfig;
use crate::error::{ChainError, Result, SignatureError, StorageError};
use crate::integrity::IntegrityError;
use crate::mine::Sealer;
use crate::pow::is_valid_proof;
use crate::signature::{signing_message, verify_transaction};
use crate::snapshot::{ChainSnapshot, Storage};
use crate::{unix_now, Block, Hash, Transaction};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// In-memory chain. Appended blocks are never modified; sealing drains the pool into exactly
/// one new block.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChainState {
    blocks: Vec<Block>,
    pending: Vec<Transaction>,
}

impl ChainState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a persisted snapshot. Only shape is checked here; tampering is the
    /// integrity scan's concern.
    pub fn from_snapshot(snapshot: ChainSnapshot) -> Result<Self, StorageError> {
        if let Some(first) = snapshot.blocks.first() {
            if !first.is_genesis() {
                return Err(StorageError::Malformed(format!(
                    "first block has index {}, expected 0",
                    first.index
                )));
            }
        }
        Ok(Self {
            blocks: snapshot.blocks,
            pending: snapshot.pending_transactions,
        })
    }

    pub fn to_snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            pending_transactions: self.pending.clone(),
            blocks: self.blocks.clone(),
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn pending(&self) -> &[Transaction] {
        &self.pending
    }

    pub fn last_block(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Append to the pending pool. Authenticity is checked upstream; the amount must be
    /// finite so the pool stays persistable.
    pub fn admit(&mut self, tx: Transaction) -> Result<()> {
        if !tx.amount().is_finite() {
            return Err(ChainError::NonFiniteAmount(tx.amount()));
        }
        self.pending.push(tx);
        Ok(())
    }

    /// Candidate for the next block: the whole pool in order, linked to the current tip.
    /// Returns the candidate and how many pending transactions it consumes.
    pub fn prepare_next_block(&self, timestamp: u64) -> Result<(Block, usize)> {
        let last = self.last_block().ok_or(ChainError::NotInitialized)?;
        if self.pending.is_empty() {
            return Err(ChainError::EmptyPendingPool);
        }
        let candidate = Block::new(
            last.index + 1,
            self.pending.clone(),
            timestamp,
            last.hash_hex(),
        );
        Ok((candidate, self.pending.len()))
    }

    /// Append a sealed block produced from [`prepare_next_block`](Self::prepare_next_block)
    /// and drop the `consumed` transactions it carries from the front of the pool.
    pub fn commit_block(
        &mut self,
        block: Block,
        hash: &Hash,
        consumed: usize,
        difficulty: u32,
    ) -> Result<()> {
        let last = self.last_block().ok_or(ChainError::NotInitialized)?;
        if block.index != last.index + 1 || block.previous_hash != last.hash_hex() {
            return Err(ChainError::TipMoved { index: block.index });
        }
        if !is_valid_proof(&block, hash, difficulty) {
            error!(
                index = block.index,
                nonce = block.nonce,
                claimed = %hex::encode(hash),
                actual = %block.hash_hex(),
                "sealer produced an invalid proof of work"
            );
            return Err(ChainError::InvalidProof { index: block.index });
        }
        self.pending.drain(..consumed.min(self.pending.len()));
        self.blocks.push(block);
        Ok(())
    }

    /// Append a sealed genesis block to an empty chain.
    pub fn commit_genesis(&mut self, genesis: Block, hash: &Hash, difficulty: u32) -> Result<()> {
        if !self.is_empty() {
            return Err(ChainError::AlreadyInitialized);
        }
        if !is_valid_proof(&genesis, hash, difficulty) {
            error!(nonce = genesis.nonce, "sealer produced an invalid genesis proof");
            return Err(ChainError::InvalidProof { index: 0 });
        }
        self.blocks.push(genesis);
        Ok(())
    }

    /// Create and seal the genesis block. Only valid on an empty chain.
    pub fn create_genesis(&mut self, sealer: &Sealer, cancel: &CancellationToken) -> Result<Block> {
        if !self.is_empty() {
            return Err(ChainError::AlreadyInitialized);
        }
        let (genesis, hash) = sealer.seal(Block::genesis(unix_now()), cancel)?;
        self.commit_genesis(genesis.clone(), &hash, sealer.difficulty())?;
        Ok(genesis)
    }

    /// Seal the whole pending pool into the next block. On error nothing changes.
    pub fn seal_next_block(
        &mut self,
        sealer: &Sealer,
        cancel: &CancellationToken,
    ) -> Result<Block> {
        let (candidate, consumed) = self.prepare_next_block(unix_now())?;
        let (sealed, hash) = sealer.seal(candidate, cancel)?;
        self.commit_block(sealed.clone(), &hash, consumed, sealer.difficulty())?;
        Ok(sealed)
    }
}

/// Persistent, thread-safe ledger.
///
/// Mutations are serialised: admissions take the state lock only briefly, while sealing
/// holds a separate lock for the whole nonce search and touches the state lock only to take
/// a snapshot and to commit. Each committed mutation is saved in full before it becomes
/// visible.
pub struct Ledger<S: Storage> {
    store: Arc<S>,
    config: LedgerConfig,
    state: RwLock<ChainState>,
    sealing: Mutex<()>,
}

impl<S: Storage> Ledger<S> {
    /// Load the chain from `store`. A store with nothing saved yields an empty chain.
    pub fn open(store: Arc<S>, config: LedgerConfig) -> Result<Self> {
        config.validate()?;
        let state = match store.load() {
            Ok(snapshot) => ChainState::from_snapshot(snapshot)?,
            Err(StorageError::Missing(location)) => {
                debug!(%location, "no persisted chain, starting empty");
                ChainState::new()
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Self::with_state(store, config, state))
    }

    /// Like [`open`](Self::open), but a store with nothing saved is an error
    /// (`StorageError::Missing`) instead of an empty chain.
    pub fn open_existing(store: Arc<S>, config: LedgerConfig) -> Result<Self> {
        config.validate()?;
        let state = ChainState::from_snapshot(store.load()?)?;
        Ok(Self::with_state(store, config, state))
    }

    fn with_state(store: Arc<S>, config: LedgerConfig, state: ChainState) -> Self {
        info!(
            blocks = state.blocks().len(),
            pending = state.pending().len(),
            difficulty = config.difficulty,
            "ledger opened"
        );
        Self {
            store,
            config,
            state: RwLock::new(state),
            sealing: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Consistent copy of the whole chain.
    pub fn state(&self) -> ChainState {
        self.read_state().clone()
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        self.read_state().to_snapshot()
    }

    pub fn height(&self) -> Option<u64> {
        self.read_state().last_block().map(|b| b.index)
    }

    pub fn last_block(&self) -> Option<Block> {
        self.read_state().last_block().cloned()
    }

    pub fn block(&self, index: u64) -> Result<Block> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.read_state().blocks().get(i).cloned())
            .ok_or(ChainError::NotFound { index })
    }

    pub fn pending(&self) -> Vec<Transaction> {
        self.read_state().pending().to_vec()
    }

    /// Add a transaction to the pending pool. Only the amount is checked, never the signature.
    pub fn admit(&self, tx: Transaction) -> Result<()> {
        let mut state = self.write_state();
        let mut next = state.clone();
        next.admit(tx)?;
        self.persist(&next)?;
        *state = next;
        debug!(pending = state.pending().len(), "transaction admitted");
        Ok(())
    }

    /// Authenticate and admit. When the transport supplies the message that was signed it
    /// must be exactly the signing message of the transaction's own fields.
    pub fn submit(&self, tx: Transaction, message: Option<&[u8]>) -> Result<()> {
        let authenticated = match message {
            Some(message) if tx.is_signed() => {
                let expected = signing_message(tx.sender(), tx.receiver(), tx.amount())?;
                if message == expected.as_slice() {
                    verify_transaction(&tx)
                } else {
                    Err(SignatureError::MessageMismatch)
                }
            }
            _ => verify_transaction(&tx),
        };
        if let Err(err) = authenticated {
            warn!(sender = tx.sender(), %err, "rejected transaction");
            return Err(ChainError::InvalidSignature(err));
        }
        self.admit(tx)
    }

    /// Create and seal the genesis block. Fails with `AlreadyInitialized` on a non-empty
    /// chain; use [`reset`](Self::reset) to start over.
    pub fn create_genesis(&self) -> Result<Block> {
        let _sealing = self.lock_sealing();
        if !self.read_state().is_empty() {
            return Err(ChainError::AlreadyInitialized);
        }
        let sealer = self.config.sealer();
        let (genesis, hash) =
            sealer.seal(Block::genesis(unix_now()), &CancellationToken::new())?;

        let mut state = self.write_state();
        let mut next = state.clone();
        next.commit_genesis(genesis.clone(), &hash, sealer.difficulty())?;
        self.persist(&next)?;
        *state = next;
        info!(hash = %hex::encode(hash), "genesis block created");
        Ok(genesis)
    }

    /// Discard the whole chain, pending pool included, and start again from a new genesis.
    pub fn reset(&self) -> Result<Block> {
        let _sealing = self.lock_sealing();
        let sealer = self.config.sealer();
        let (genesis, hash) =
            sealer.seal(Block::genesis(unix_now()), &CancellationToken::new())?;

        let mut next = ChainState::new();
        next.commit_genesis(genesis.clone(), &hash, sealer.difficulty())?;
        let mut state = self.write_state();
        self.persist(&next)?;
        let discarded = state.blocks().len();
        *state = next;
        warn!(discarded, "chain reset to a new genesis block");
        Ok(genesis)
    }

    pub fn seal_next_block(&self) -> Result<Block> {
        self.seal_next_block_with(&CancellationToken::new())
    }

    /// Seal the pending pool into the next block. The nonce search runs without the state
    /// lock, so admissions continue meanwhile; those late arrivals stay pending.
    pub fn seal_next_block_with(&self, cancel: &CancellationToken) -> Result<Block> {
        let _sealing = self.lock_sealing();
        let (candidate, consumed) = self.read_state().prepare_next_block(unix_now())?;
        let sealer = self.config.sealer();
        let (sealed, hash) = sealer.seal(candidate, cancel)?;

        let mut state = self.write_state();
        let mut next = state.clone();
        next.commit_block(sealed.clone(), &hash, consumed, sealer.difficulty())?;
        self.persist(&next)?;
        *state = next;
        info!(
            index = sealed.index,
            transactions = sealed.transactions.len(),
            pending = state.pending().len(),
            "block appended"
        );
        Ok(sealed)
    }

    pub fn verify_integrity(&self) -> Result<(), IntegrityError> {
        self.config.verifier().scan_all(self.read_state().blocks())
    }

    pub fn verify_block(&self, index: u64) -> Result<(), IntegrityError> {
        self.config.verifier().scan_one(self.read_state().blocks(), index)
    }

    fn persist(&self, state: &ChainState) -> Result<(), StorageError> {
        self.store.save(&state.to_snapshot())
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ChainState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ChainState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_sealing(&self) -> MutexGuard<'_, ()> {
        self.sealing.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
