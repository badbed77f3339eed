use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::records::EncryptedRecord;

/// Errors produced by document store implementations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Local or transport-level storage failure.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
    /// The remote answered with a non-success status.
    #[error("remote returned {status}: {reason}")]
    Remote { status: u16, reason: String },
    /// The operation did not finish before its deadline.
    #[error("{operation} timed out after {after_ms} ms")]
    Timeout {
        operation: &'static str,
        after_ms: u128,
    },
}

/// Per-user document. Only `urls` is owned by picvault; every other field is
/// preserved across merge writes. `urls` is `None` when the document exists
/// but has never held a collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<EncryptedRecord>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserDocument {
    /// Stored records, empty when the document has no `urls` field.
    pub fn records(&self) -> &[EncryptedRecord] {
        self.urls.as_deref().unwrap_or_default()
    }
}

/// Keyed document store holding at most one document per user id.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short backend name used for logging and diagnostics.
    fn name(&self) -> &'static str;

    /// Fetch the document for a user; `None` when it does not exist.
    async fn get(&self, user_id: &str) -> Result<Option<UserDocument>, StoreError>;

    /// Merge write: replace the `urls` field, leave the rest of the document untouched.
    /// Creates the document when missing.
    async fn set_urls(&self, user_id: &str, urls: &[EncryptedRecord]) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn get(&self, user_id: &str) -> Result<Option<UserDocument>, StoreError> {
        (**self).get(user_id).await
    }

    async fn set_urls(&self, user_id: &str, urls: &[EncryptedRecord]) -> Result<(), StoreError> {
        (**self).set_urls(user_id, urls).await
    }
}

/// In-memory document store for tests and smoke runs. Counts calls so tests can
/// assert that no remote access happened.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDocumentStore {
    inner: Arc<Mutex<HashMap<String, UserDocument>>>,
    reads: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document directly, bypassing the call counters.
    pub fn insert(&self, user_id: &str, document: UserDocument) {
        if let Ok(mut map) = self.inner.lock() {
            map.insert(user_id.to_string(), document);
        }
    }

    /// Inspect the stored document without counting a read.
    pub fn document(&self, user_id: &str) -> Option<UserDocument> {
        self.inner
            .lock()
            .ok()
            .and_then(|map| map.get(user_id).cloned())
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, user_id: &str) -> Result<Option<UserDocument>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let map = self.inner.lock().map_err(|err| StoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        Ok(map.get(user_id).cloned())
    }

    async fn set_urls(&self, user_id: &str, urls: &[EncryptedRecord]) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut map = self.inner.lock().map_err(|err| StoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        map.entry(user_id.to_string()).or_default().urls = Some(urls.to_vec());
        Ok(())
    }
}
