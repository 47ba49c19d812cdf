use blockseal_core::{ChainSnapshot, Storage, StorageError};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The whole chain as one JSON document on disk. Saves go through a sibling temp file and a
/// rename, so a crash never leaves a half-written chain behind.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Storage for JsonFileStore {
    fn load(&self) -> Result<ChainSnapshot, StorageError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::Missing(self.path.display().to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        let snapshot: ChainSnapshot = serde_json::from_slice(&bytes)
            .map_err(|err| StorageError::Malformed(format!("{}: {err}", self.path.display())))?;
        debug!(
            path = %self.path.display(),
            blocks = snapshot.blocks.len(),
            "chain loaded"
        );
        Ok(snapshot)
    }

    fn save(&self, snapshot: &ChainSnapshot) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(snapshot)
            .map_err(|err| StorageError::Malformed(err.to_string()))?;
        let temp = self.temp_path();
        fs::write(&temp, bytes)?;
        fs::rename(&temp, &self.path)?;
        debug!(
            path = %self.path.display(),
            blocks = snapshot.blocks.len(),
            "chain saved"
        );
        Ok(())
    }
}
