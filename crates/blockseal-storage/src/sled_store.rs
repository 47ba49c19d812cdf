use blockseal_core::{ChainSnapshot, Hash, Storage, StorageError};
use sled::{Batch, Db};
use std::path::Path;
use tracing::{debug, info};

const KEY_SNAPSHOT: &[u8] = b"snapshot";
const KEY_TIP_HEIGHT: &[u8] = b"tip_height";
const KEY_TIP_HASH: &[u8] = b"tip_hash";

fn db_err(err: sled::Error) -> StorageError {
  StorageError::Database(err.to_string())
}

/// Snapshot kept in an embedded sled database, bincode-encoded, with the tip height and hash
/// alongside for cheap lookups. All three keys change in one atomic batch.
#[derive(Clone)]
pub struct SledStore {
  db: Db,
}

impl SledStore {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
    let db = sled::open(path).map_err(db_err)?;
    info!("sled store opened");
    Ok(Self { db })
  }

  /// Deleted when dropped.
  pub fn temporary() -> Result<Self, StorageError> {
    let db = sled::Config::new()
      .temporary(true)
      .open()
      .map_err(db_err)?;
    Ok(Self { db })
  }

  pub fn tip_height(&self) -> Result<Option<u64>, StorageError> {
    self
      .db
      .get(KEY_TIP_HEIGHT)
      .map_err(db_err)?
      .map(|v| -> Result<u64, StorageError> {
        let arr: [u8; 8] = v.as_ref().try_into().map_err(|_| {
          StorageError::Malformed(format!("tip height has {} bytes", v.len()))
        })?;
        Ok(u64::from_be_bytes(arr))
      })
      .transpose()
  }

  pub fn tip_hash(&self) -> Result<Option<Hash>, StorageError> {
    self
      .db
      .get(KEY_TIP_HASH)
      .map_err(db_err)?
      .map(|v| -> Result<Hash, StorageError> {
        v.as_ref()
          .try_into()
          .map_err(|_| StorageError::Malformed(format!("tip hash has {} bytes", v.len())))
      })
      .transpose()
  }

  /// Forget everything saved so far.
  pub fn clear(&self) -> Result<(), StorageError> {
    self.db.clear().map_err(db_err)?;
    self.db.flush().map_err(db_err)?;
    Ok(())
  }

  pub fn close(&self) -> Result<(), StorageError> {
    self.db.flush().map_err(db_err)?;
    Ok(())
  }
}

impl Storage for SledStore {
  fn load(&self) -> Result<ChainSnapshot, StorageError> {
    let bytes = self
      .db
      .get(KEY_SNAPSHOT)
      .map_err(db_err)?
      .ok_or_else(|| StorageError::Missing("sled snapshot".into()))?;
    let snapshot: ChainSnapshot =
      bincode::deserialize(&bytes).map_err(|err| StorageError::Malformed(err.to_string()))?;
    debug!(blocks = snapshot.blocks.len(), "chain loaded from sled");
    Ok(snapshot)
  }

  fn save(&self, snapshot: &ChainSnapshot) -> Result<(), StorageError> {
    let bytes =
      bincode::serialize(snapshot).map_err(|err| StorageError::Malformed(err.to_string()))?;

    let mut batch = Batch::default();
    batch.insert(KEY_SNAPSHOT, bytes);
    match snapshot.blocks.last() {
      Some(tip) => {
        batch.insert(KEY_TIP_HEIGHT, &tip.index.to_be_bytes());
        batch.insert(KEY_TIP_HASH, &tip.hash());
      }
      None => {
        batch.remove(KEY_TIP_HEIGHT);
        batch.remove(KEY_TIP_HASH);
      }
    }
    self.db.apply_batch(batch).map_err(db_err)?;
    self.db.flush().map_err(db_err)?;
    debug!(blocks = snapshot.blocks.len(), "chain saved to sled");
    Ok(())
  }
}
