//! Commands that work directly on a chain file, without a node.

use blockseal_core::{ChainError, IntegrityError, Ledger, Storage, Transaction};

pub(crate) const NO_PROBLEMS: &str = "No integrity problems found";

/// Renders an integrity outcome the way both verify commands print it.
pub(crate) fn integrity_message(result: Result<(), IntegrityError>) -> String {
    match result {
        Ok(()) => NO_PROBLEMS.to_string(),
        Err(IntegrityError::Problem { index, .. }) => format!("Integrity problem at block {index}"),
        Err(IntegrityError::NotFound { index }) => format!("Block index {index} does not exist"),
        Err(IntegrityError::GenesisNotCheckable) => "Cannot check the first block".to_string(),
    }
}

pub(crate) fn reset<S: Storage>(ledger: &Ledger<S>) -> Result<String, ChainError> {
    let genesis = ledger.reset()?;
    Ok(format!("Chain reset, genesis block {}", genesis.hash_hex()))
}

/// Local admission skips authentication entirely.
pub(crate) fn add_pending<S: Storage>(
    ledger: &Ledger<S>,
    sender: String,
    receiver: String,
    amount: f64,
) -> Result<String, ChainError> {
    ledger.admit(Transaction::unsigned(sender, receiver, amount))?;
    Ok(format!("{} pending transaction(s)", ledger.pending().len()))
}

pub(crate) fn create_block<S: Storage>(ledger: &Ledger<S>) -> Result<String, ChainError> {
    match ledger.seal_next_block() {
        Ok(block) => Ok(format!("Block {} sealed: {}", block.index, block.hash_hex())),
        Err(ChainError::EmptyPendingPool) => Ok("No pending transactions".to_string()),
        Err(err) => Err(err),
    }
}

pub(crate) fn verify_integrity<S: Storage>(ledger: &Ledger<S>) -> String {
    integrity_message(ledger.verify_integrity())
}

pub(crate) fn verify_block<S: Storage>(ledger: &Ledger<S>, index: u64) -> String {
    integrity_message(ledger.verify_block(index))
}

pub(crate) fn show<S: Storage>(ledger: &Ledger<S>) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&ledger.snapshot())
}
