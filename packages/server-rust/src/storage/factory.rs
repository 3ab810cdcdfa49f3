//! Selects and opens the [`ChannelStore`] backend for a deployment.

use std::path::PathBuf;
use std::sync::Arc;

use crate::storage::engines::MemoryChannelStore;
use crate::traits::ChannelStore;

/// Which channel store backend to open.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StorageBackend {
    /// Volatile in-process store.
    #[default]
    Memory,
    /// `redb` database file at the given path.
    #[cfg(feature = "redb")]
    Redb(PathBuf),
}

impl StorageBackend {
    /// Picks `redb` when a data file is configured, memory otherwise.
    #[must_use]
    pub fn from_data_path(path: Option<PathBuf>) -> Self {
        match path {
            #[cfg(feature = "redb")]
            Some(path) => Self::Redb(path),
            #[cfg(not(feature = "redb"))]
            Some(_) => Self::Memory,
            None => Self::Memory,
        }
    }
}

/// Opens the configured backend.
///
/// # Errors
///
/// Returns an error if a persistent backend cannot be opened.
pub fn open_store(backend: &StorageBackend) -> anyhow::Result<Arc<dyn ChannelStore>> {
    match backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryChannelStore::new())),
        #[cfg(feature = "redb")]
        StorageBackend::Redb(path) => Ok(Arc::new(
            crate::storage::engines::RedbChannelStore::open(path)?,
        )),
    }
}
