use std::sync::Arc;

use picvault_core::records::Record;
use tokio::sync::watch;

/// What the display layer sees: the decrypted collection, the user it was
/// loaded for, and a version that increases on every replacement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorState {
    pub owner: Option<String>,
    pub version: u64,
    pub records: Vec<Record>,
}

impl MirrorState {
    /// True when these records were loaded for `user_id`.
    pub fn belongs_to(&self, user_id: &str) -> bool {
        self.owner.as_deref() == Some(user_id)
    }
}

/// Local projection of one user's remote collection. Replaced wholesale, never
/// merged. Clones share the same state.
#[derive(Debug, Clone)]
pub struct RecordMirror {
    tx: Arc<watch::Sender<MirrorState>>,
}

impl Default for RecordMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordMirror {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(MirrorState::default());
        Self { tx: Arc::new(tx) }
    }

    /// Replace the whole collection and notify subscribers. The owner is kept.
    pub fn set_urls(&self, records: Vec<Record>) {
        self.tx.send_modify(|state| {
            state.version += 1;
            state.records = records;
        });
    }

    /// Replace the collection with `user_id`'s records.
    pub fn load(&self, user_id: &str, records: Vec<Record>) {
        self.tx.send_modify(|state| {
            state.version += 1;
            state.owner = Some(user_id.to_string());
            state.records = records;
        });
    }

    pub fn clear(&self) {
        self.set_urls(Vec::new());
    }

    pub fn snapshot(&self) -> MirrorState {
        self.tx.borrow().clone()
    }

    pub fn records(&self) -> Vec<Record> {
        self.tx.borrow().records.clone()
    }

    pub fn version(&self) -> u64 {
        self.tx.borrow().version
    }

    pub fn owner(&self) -> Option<String> {
        self.tx.borrow().owner.clone()
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.tx.borrow().records.iter().any(|r| r.url == url)
    }

    pub fn subscribe(&self) -> watch::Receiver<MirrorState> {
        self.tx.subscribe()
    }
}
