//! Storage backends for the ledger snapshot.
pub mod json_store;
pub mod sled_store;

pub use blockseal_core::{ChainSnapshot, Storage, StorageError};
pub use json_store::JsonFileStore;
pub use sled_store::SledStore;
