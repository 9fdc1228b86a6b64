//! JSON persistence for the gateway configuration and profile store
//!
//! Writes go through a temp file plus rename so a crash never leaves a
//! half-written profile file behind.

use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::GatewayConfig;
use super::error::{StorageError, StorageResult};
use super::host::ProfilePersistence;
use super::profile::ProfileStore;

/// Write data atomically to a file
///
/// Creates the parent directory if needed, writes a temporary sibling,
/// syncs it, then renames it over `path`.
pub fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    let failed = |detail: String| StorageError::AtomicWriteFailed {
        path: path.to_path_buf(),
        detail,
    };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)
        .map_err(|err| failed(format!("create {:?}: {}", temp_path, err)))?;
    file.write_all(data)
        .map_err(|err| failed(format!("write: {}", err)))?;
    file.sync_all()
        .map_err(|err| failed(format!("sync: {}", err)))?;
    drop(file);

    fs::rename(&temp_path, path)
        .map_err(|err| failed(format!("rename {:?}: {}", temp_path, err)))?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        if let Ok(dir) = OpenOptions::new().read(true).open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}

/// Write gateway configuration
pub fn write_config(path: &Path, config: &GatewayConfig) -> StorageResult<()> {
    let json = serde_json::to_vec_pretty(config)?;
    write_atomic(path, &json)
}

/// Load gateway configuration
pub fn load_config(path: &Path) -> StorageResult<GatewayConfig> {
    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

/// Profile persistence backed by a JSON file
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    /// Persist profiles at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the profile file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProfilePersistence for JsonFilePersistence {
    fn load(&self) -> StorageResult<ProfileStore> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no profile file found, starting empty");
                return Ok(ProfileStore::new());
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&data).map_err(|err| {
            if err.is_data() {
                StorageError::InvalidStore(err.to_string())
            } else {
                StorageError::Json(err)
            }
        })
    }

    fn save(&self, store: &ProfileStore) -> StorageResult<()> {
        let json = serde_json::to_vec_pretty(store)?;
        write_atomic(&self.path, &json)
    }
}

/// In-memory profile persistence
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    store: Mutex<ProfileStore>,
    saves: Mutex<usize>,
}

impl MemoryPersistence {
    /// Start from an existing store
    pub fn new(store: ProfileStore) -> Self {
        Self {
            store: Mutex::new(store),
            saves: Mutex::new(0),
        }
    }

    /// Last saved store
    pub fn snapshot(&self) -> ProfileStore {
        self.store.lock().clone()
    }

    /// Number of completed saves
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl ProfilePersistence for MemoryPersistence {
    fn load(&self) -> StorageResult<ProfileStore> {
        Ok(self.store.lock().clone())
    }

    fn save(&self, store: &ProfileStore) -> StorageResult<()> {
        *self.store.lock() = store.clone();
        *self.saves.lock() += 1;
        Ok(())
    }
}

impl<P: ProfilePersistence + ?Sized> ProfilePersistence for std::sync::Arc<P> {
    fn load(&self) -> StorageResult<ProfileStore> {
        (**self).load()
    }

    fn save(&self, store: &ProfileStore) -> StorageResult<()> {
        (**self).save(store)
    }
}
