use std::path::PathBuf;

use crate::config::Config;
use color_eyre::Result;
use dirs::data_dir;
use picvault_core::store::DocumentStore;
use picvault_storage::{file_store::FileDocumentStore, firestore::FirestoreStore};
use tracing::debug;

/// Resolve the default data directory for picvault.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("picvault"))
}

/// Pick the document store: Firestore when configured, otherwise local files.
pub fn store_from_config(config: &Config) -> Result<Box<dyn DocumentStore>> {
    if let Some(fs) = &config.firestore {
        debug!(project = %fs.project_id, "using firestore document store");
        return Ok(Box::new(FirestoreStore::new(fs.clone())));
    }

    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    debug!(?root, "using local document store");
    Ok(Box::new(FileDocumentStore::new(root)))
}
