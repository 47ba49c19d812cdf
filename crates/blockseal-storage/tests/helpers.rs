#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use blockseal_core::{Ledger, LedgerConfig, Storage, Transaction};
use blockseal_storage::{JsonFileStore, SledStore};
use tempfile::{tempdir, TempDir};

pub const DIFFICULTY: u32 = 1;

pub fn create_temp_json_store() -> (TempDir, JsonFileStore) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let path = temp_dir.path().join("chain.json");
    (temp_dir, JsonFileStore::new(path))
}

pub fn create_temp_sled_store() -> (TempDir, SledStore) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("sled");
    (
        temp_dir,
        SledStore::open(&db_path).expect("Failed to open SledStore"),
    )
}

/// Genesis plus `blocks` sealed blocks of two transactions each, and one transaction left
/// pending.
pub fn populate<S: Storage>(store: Arc<S>, blocks: u64) -> Ledger<S> {
    let ledger = Ledger::open(store, LedgerConfig::with_difficulty(DIFFICULTY))
        .expect("Failed to open ledger");
    ledger.create_genesis().expect("Failed to create genesis");
    for i in 0..blocks {
        ledger
            .admit(Transaction::unsigned(format!("user{i}"), "bank", i as f64 + 0.5))
            .unwrap();
        ledger
            .admit(Transaction::signed(
                "bank",
                format!("user{i}"),
                1.0,
                b"ssh-rsa AAAA".to_vec(),
                vec![i as u8; 4],
            ))
            .unwrap();
        ledger.seal_next_block().expect("Failed to seal block");
    }
    ledger
        .admit(Transaction::unsigned("late", "bank", 9.0))
        .unwrap();
    ledger
}

pub fn teardown(temp_dir: TempDir) {
    let path: PathBuf = temp_dir.path().to_path_buf();
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&path);
    assert!(!path.exists(), "Temp directory should be removed");
}
