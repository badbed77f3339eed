//! Read-modify-write synchronization between the encrypted remote collection
//! and the local [`RecordMirror`].
//!
//! Every mutating call reads the whole remote collection, applies its change,
//! re-encrypts everything and writes the `urls` field back in one merge write.
//! There is no version check: concurrent writers for the same user race and the
//! last write wins.

pub mod mirror;
pub mod validator;

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::Arc,
    time::Duration,
};

use futures::stream::{self, StreamExt};
use picvault_core::{
    records::{EncryptedRecord, Record, TagUpdate, UrlOutcome},
    store::{DocumentStore, StoreError},
    validator::ImageValidator,
};
use picvault_crypto::FieldCipher;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

pub use mirror::{MirrorState, RecordMirror};
pub use validator::HttpImageValidator;

/// Upper bound on validations in flight during one `add_images` call.
const MAX_CONCURRENT_VALIDATIONS: usize = 16;

/// Errors returned by the synchronizer entry points. Remote failures are not
/// errors here; they are reported through [`SyncStatus`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("a signed-in user id is required")]
    MissingUser,
}

/// What happened to the remote document and the mirror during a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Nothing needed writing.
    Skipped,
    /// The collection was written and the mirror reloaded.
    Persisted,
    /// The mirror was refreshed from the remote; nothing was written.
    Reloaded,
    /// The baseline could not be read; nothing was written and the mirror is untouched.
    ReadFailed(StoreError),
    /// The write failed; the mirror was left as it was.
    WriteFailed(StoreError),
}

/// Result of [`Synchronizer::add_images`]. `outcomes` follow the candidate
/// order and reflect admission, not persistence; check `status` for that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddReport {
    pub outcomes: Vec<UrlOutcome>,
    pub status: SyncStatus,
}

/// Decrypted view of a remote collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub records: Vec<Record>,
    /// Stored records that failed to decrypt. Written back verbatim.
    pub undecryptable: Vec<EncryptedRecord>,
}

/// Outcome of reading a user's remote collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// No document exists yet, or it has no `urls` field.
    Empty,
    /// The store could not be read.
    Unavailable(StoreError),
    Collection(Snapshot),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Deadline for each store read or write.
    pub store_timeout: Duration,
    /// Deadline for validating one candidate URL.
    pub validation_timeout: Duration,
    /// Largest image body the HTTP validator downloads.
    pub max_image_bytes: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(10),
            validation_timeout: Duration::from_secs(10),
            max_image_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Orchestrates fetch, mutate, encrypt, persist and mirror reload for one
/// document store.
pub struct Synchronizer<S: DocumentStore, V: ImageValidator> {
    store: Arc<S>,
    validator: V,
    mirror: RecordMirror,
    settings: SyncSettings,
}

impl<S: DocumentStore, V: ImageValidator> Synchronizer<S, V> {
    pub fn new(store: S, validator: V) -> Self {
        Self {
            store: Arc::new(store),
            validator,
            mirror: RecordMirror::new(),
            settings: SyncSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn mirror(&self) -> &RecordMirror {
        &self.mirror
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Read and decrypt the remote collection without touching the mirror.
    #[instrument(skip_all)]
    pub async fn fetch(&self, user_id: Option<&str>) -> Result<FetchOutcome, SyncError> {
        let user_id = require_user(user_id)?;
        Ok(self
            .fetch_with(user_id, &FieldCipher::for_user(user_id))
            .await)
    }

    /// Decrypted records, or an empty list when the store cannot be read.
    pub async fn fetch_and_decrypt_urls(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<Record>, SyncError> {
        Ok(match self.fetch(user_id).await? {
            FetchOutcome::Collection(snapshot) => snapshot.records,
            FetchOutcome::Empty | FetchOutcome::Unavailable(_) => Vec::new(),
        })
    }

    /// Validate candidates concurrently and append the admitted ones.
    ///
    /// A candidate is admitted when it decodes as an image, is not in the remote
    /// collection and is not in the mirror. The mirror only counts when it was
    /// loaded for this user. Both checks use snapshots taken before validation
    /// starts, so duplicates within one call are not caught.
    #[instrument(skip_all, fields(candidates = candidates.len()))]
    pub async fn add_images(
        &self,
        user_id: Option<&str>,
        candidates: &[String],
    ) -> Result<AddReport, SyncError> {
        let user_id = require_user(user_id)?;
        let cipher = FieldCipher::for_user(user_id);

        let existing = match self.fetch_with(user_id, &cipher).await {
            FetchOutcome::Unavailable(err) => {
                warn!(%err, "refusing to add without a readable baseline");
                return Ok(AddReport {
                    outcomes: candidates
                        .iter()
                        .map(|url| UrlOutcome::new(url.as_str(), false))
                        .collect(),
                    status: SyncStatus::ReadFailed(err),
                });
            }
            FetchOutcome::Empty => Snapshot::default(),
            FetchOutcome::Collection(snapshot) => snapshot,
        };

        let remote_urls: HashSet<&str> = existing.records.iter().map(|r| r.url.as_str()).collect();
        let mirrored = self.mirror.snapshot();
        let mirror_urls: HashSet<&str> = if mirrored.belongs_to(user_id) {
            mirrored.records.iter().map(|r| r.url.as_str()).collect()
        } else {
            HashSet::new()
        };

        let (remote_urls, mirror_urls) = (&remote_urls, &mirror_urls);
        let admitted: Vec<bool> = stream::iter(candidates)
            .map(|url| async move {
                self.validate(url).await
                    && !remote_urls.contains(url.as_str())
                    && !mirror_urls.contains(url.as_str())
            })
            .buffered(MAX_CONCURRENT_VALIDATIONS)
            .collect()
            .await;

        let outcomes: Vec<UrlOutcome> = candidates
            .iter()
            .zip(&admitted)
            .map(|(url, ok)| UrlOutcome::new(url.as_str(), *ok))
            .collect();

        if !admitted.iter().any(|ok| *ok) {
            debug!("no candidate admitted; skipping write");
            return Ok(AddReport {
                outcomes,
                status: SyncStatus::Skipped,
            });
        }

        let mut records = existing.records.clone();
        records.extend(
            outcomes
                .iter()
                .filter(|o| o.success)
                .map(|o| Record::new(o.url.as_str())),
        );

        let status = self
            .persist(user_id, &cipher, &records, &existing.undecryptable)
            .await;
        Ok(AddReport { outcomes, status })
    }

    /// Replace tags, toggle likes and remove records in one read-modify-write.
    #[instrument(skip_all, fields(
        tag_updates = urls_with_tags.len(),
        removals = urls_to_remove.len(),
        toggles = urls_to_toggle_liked.len(),
    ))]
    pub async fn edit_urls(
        &self,
        user_id: Option<&str>,
        urls_with_tags: &[TagUpdate],
        urls_to_remove: &[String],
        urls_to_toggle_liked: &[String],
    ) -> Result<SyncStatus, SyncError> {
        let user_id = require_user(user_id)?;
        let cipher = FieldCipher::for_user(user_id);

        let existing = match self.fetch_with(user_id, &cipher).await {
            FetchOutcome::Unavailable(err) => {
                warn!(%err, "refusing to edit without a readable baseline");
                return Ok(SyncStatus::ReadFailed(err));
            }
            FetchOutcome::Empty => Snapshot::default(),
            FetchOutcome::Collection(snapshot) => snapshot,
        };

        let records = apply_edits(
            existing.records,
            urls_with_tags,
            urls_to_remove,
            urls_to_toggle_liked,
        );
        Ok(self
            .persist(user_id, &cipher, &records, &existing.undecryptable)
            .await)
    }

    /// Refresh the mirror from the remote collection. Never writes.
    #[instrument(skip_all)]
    pub async fn write_urls_to_store(&self, user_id: Option<&str>) -> Result<SyncStatus, SyncError> {
        let user_id = require_user(user_id)?;
        Ok(self.reload(user_id, &FieldCipher::for_user(user_id)).await)
    }

    async fn reload(&self, user_id: &str, cipher: &FieldCipher) -> SyncStatus {
        match self.fetch_with(user_id, cipher).await {
            FetchOutcome::Unavailable(err) => {
                warn!(%err, "mirror reload failed; keeping previous contents");
                SyncStatus::ReadFailed(err)
            }
            FetchOutcome::Empty => {
                self.mirror.load(user_id, Vec::new());
                SyncStatus::Reloaded
            }
            FetchOutcome::Collection(snapshot) => {
                self.mirror.load(user_id, snapshot.records);
                SyncStatus::Reloaded
            }
        }
    }

    async fn persist(
        &self,
        user_id: &str,
        cipher: &FieldCipher,
        records: &[Record],
        undecryptable: &[EncryptedRecord],
    ) -> SyncStatus {
        let mut encrypted: Vec<EncryptedRecord> =
            records.iter().map(|r| cipher.encrypt_record(r)).collect();
        encrypted.extend_from_slice(undecryptable);

        let write = self
            .with_deadline("write", self.store.set_urls(user_id, &encrypted))
            .await;
        if let Err(err) = write {
            warn!(%err, "failed to persist collection; mirror left stale");
            return SyncStatus::WriteFailed(err);
        }
        info!(
            store = self.store.name(),
            records = encrypted.len(),
            "collection persisted"
        );

        // Reload from the store rather than trusting the local list.
        if let SyncStatus::ReadFailed(err) = self.reload(user_id, cipher).await {
            warn!(%err, "persisted but could not reload mirror");
        }
        SyncStatus::Persisted
    }

    async fn fetch_with(&self, user_id: &str, cipher: &FieldCipher) -> FetchOutcome {
        let document = match self.with_deadline("read", self.store.get(user_id)).await {
            Ok(Some(document)) => document,
            Ok(None) => return FetchOutcome::Empty,
            Err(err) => {
                warn!(store = self.store.name(), %err, "failed to read remote collection");
                return FetchOutcome::Unavailable(err);
            }
        };

        let Some(stored_records) = document.urls else {
            return FetchOutcome::Empty;
        };

        let mut snapshot = Snapshot::default();
        for (index, stored) in stored_records.into_iter().enumerate() {
            match cipher.decrypt_record(&stored) {
                Ok(record) => snapshot.records.push(record),
                Err(err) => {
                    warn!(index, %err, "skipping undecryptable record");
                    snapshot.undecryptable.push(stored);
                }
            }
        }
        debug!(
            records = snapshot.records.len(),
            undecryptable = snapshot.undecryptable.len(),
            "remote collection decrypted"
        );
        FetchOutcome::Collection(snapshot)
    }

    async fn validate(&self, url: &str) -> bool {
        tokio::time::timeout(
            self.settings.validation_timeout,
            self.validator.is_valid_image_url(url),
        )
        .await
        .unwrap_or_else(|_| {
            debug!("validation timed out");
            false
        })
    }

    async fn with_deadline<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        let limit = self.settings.store_timeout;
        tokio::time::timeout(limit, fut)
            .await
            .unwrap_or_else(|_| {
                Err(StoreError::Timeout {
                    operation,
                    after_ms: limit.as_millis(),
                })
            })
    }
}

/// Apply tag replacements and like toggles, then drop removed URLs. Order of
/// the surviving records is preserved; unknown URLs are ignored.
pub fn apply_edits(
    records: Vec<Record>,
    urls_with_tags: &[TagUpdate],
    urls_to_remove: &[String],
    urls_to_toggle_liked: &[String],
) -> Vec<Record> {
    // Last update wins when a URL is listed twice.
    let tags: HashMap<&str, &Vec<String>> = urls_with_tags
        .iter()
        .map(|u| (u.url.as_str(), &u.tags))
        .collect();
    let toggles: HashSet<&str> = urls_to_toggle_liked.iter().map(String::as_str).collect();
    let removals: HashSet<&str> = urls_to_remove.iter().map(String::as_str).collect();

    records
        .into_iter()
        .filter(|r| !removals.contains(r.url.as_str()))
        .map(|mut record| {
            if let Some(new_tags) = tags.get(record.url.as_str()) {
                record.tags = (*new_tags).clone();
            }
            if toggles.contains(record.url.as_str()) {
                record.liked = !record.liked;
            }
            record
        })
        .collect()
}

fn require_user(user_id: Option<&str>) -> Result<&str, SyncError> {
    match user_id {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(SyncError::MissingUser),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use picvault_core::{
        records::EncryptedField,
        store::{InMemoryDocumentStore, UserDocument},
        validator::StaticImageValidator,
    };
    use serde_json::{Map, Value};

    use super::*;

    const USER: Option<&str> = Some("user-1");
    const CAT: &str = "https://img.example/cat.png";
    const DOG: &str = "https://img.example/dog.png";

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn sync_with(
        store: &InMemoryDocumentStore,
    ) -> Synchronizer<InMemoryDocumentStore, StaticImageValidator> {
        Synchronizer::new(
            store.clone(),
            StaticImageValidator::accepting([CAT, DOG]),
        )
    }

    /// Store whose reads and writes can be switched to fail.
    #[derive(Default, Clone)]
    struct FlakyStore {
        inner: InMemoryDocumentStore,
        fail_reads: Arc<AtomicBool>,
        fail_writes: Arc<AtomicBool>,
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn get(&self, user_id: &str) -> Result<Option<UserDocument>, StoreError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StoreError::Storage {
                    reason: "read down".into(),
                });
            }
            self.inner.get(user_id).await
        }

        async fn set_urls(
            &self,
            user_id: &str,
            urls: &[EncryptedRecord],
        ) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Storage {
                    reason: "write down".into(),
                });
            }
            self.inner.set_urls(user_id, urls).await
        }
    }

    /// Store that never answers in time.
    struct StalledStore;

    /// Reads answer immediately, writes never finish in time.
    #[derive(Default, Clone)]
    struct StalledWriteStore {
        inner: InMemoryDocumentStore,
    }

    #[async_trait]
    impl DocumentStore for StalledWriteStore {
        fn name(&self) -> &'static str {
            "stalled-write"
        }

        async fn get(&self, user_id: &str) -> Result<Option<UserDocument>, StoreError> {
            self.inner.get(user_id).await
        }

        async fn set_urls(
            &self,
            _user_id: &str,
            _urls: &[EncryptedRecord],
        ) -> Result<(), StoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    /// Validator that never finishes on its own.
    struct HangingValidator;

    #[async_trait]
    impl ImageValidator for HangingValidator {
        async fn is_valid_image_url(&self, _url: &str) -> bool {
            tokio::time::sleep(Duration::from_secs(30)).await;
            true
        }
    }

    #[async_trait]
    impl DocumentStore for StalledStore {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn get(&self, _user_id: &str) -> Result<Option<UserDocument>, StoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }

        async fn set_urls(
            &self,
            _user_id: &str,
            _urls: &[EncryptedRecord],
        ) -> Result<(), StoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn add_persists_encrypted_and_reloads_mirror() {
        let store = InMemoryDocumentStore::new();
        let sync = sync_with(&store);

        let report = sync.add_images(USER, &urls(&[CAT])).await.expect("add");
        assert_eq!(report.outcomes, vec![UrlOutcome::new(CAT, true)]);
        assert_eq!(report.status, SyncStatus::Persisted);

        let stored = store.document("user-1").expect("document");
        assert_eq!(stored.records().len(), 1);
        assert_ne!(stored.records()[0].url.as_str(), CAT);
        assert!(!stored.records()[0].liked);

        let state = sync.mirror().snapshot();
        assert_eq!(state.records, vec![Record::new(CAT)]);
        assert_eq!(state.version, 1);
    }

    #[tokio::test]
    async fn adding_same_url_twice_fails_second_time() {
        let store = InMemoryDocumentStore::new();
        let sync = sync_with(&store);

        sync.add_images(USER, &urls(&[CAT])).await.expect("first add");
        let second = sync.add_images(USER, &urls(&[CAT])).await.expect("second add");

        assert_eq!(second.outcomes, vec![UrlOutcome::new(CAT, false)]);
        assert_eq!(second.status, SyncStatus::Skipped);
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_without_write() {
        let store = InMemoryDocumentStore::new();
        let sync = sync_with(&store);

        let report = sync
            .add_images(USER, &urls(&["not-an-image"]))
            .await
            .expect("add");
        assert_eq!(report.outcomes, vec![UrlOutcome::new("not-an-image", false)]);
        assert_eq!(report.status, SyncStatus::Skipped);
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn mixed_batch_keeps_order_and_appends_after_existing() {
        let store = InMemoryDocumentStore::new();
        let sync = sync_with(&store);
        sync.add_images(USER, &urls(&[CAT])).await.expect("seed");

        let report = sync
            .add_images(USER, &urls(&["bogus", DOG, CAT]))
            .await
            .expect("add");
        assert_eq!(
            report.outcomes,
            vec![
                UrlOutcome::new("bogus", false),
                UrlOutcome::new(DOG, true),
                UrlOutcome::new(CAT, false),
            ]
        );
        let fetched = sync.fetch_and_decrypt_urls(USER).await.expect("fetch");
        assert_eq!(fetched, vec![Record::new(CAT), Record::new(DOG)]);
    }

    #[tokio::test]
    async fn duplicate_candidates_in_one_call_are_not_cross_checked() {
        let store = InMemoryDocumentStore::new();
        let sync = sync_with(&store);

        let report = sync
            .add_images(USER, &urls(&[CAT, CAT]))
            .await
            .expect("add");
        assert!(report.outcomes.iter().all(|o| o.success));
        assert_eq!(sync.fetch_and_decrypt_urls(USER).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn url_already_in_mirror_is_not_admitted() {
        let store = InMemoryDocumentStore::new();
        let sync = sync_with(&store);
        sync.mirror().load("user-1", vec![Record::new(DOG)]);

        let report = sync.add_images(USER, &urls(&[DOG])).await.expect("add");
        assert_eq!(report.outcomes, vec![UrlOutcome::new(DOG, false)]);
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn mirror_of_another_user_does_not_block_admission() {
        let store = InMemoryDocumentStore::new();
        let sync = Synchronizer::new(store.clone(), StaticImageValidator::accept_all());

        let alice = sync.add_images(Some("alice"), &urls(&[CAT])).await.expect("alice");
        assert_eq!(alice.outcomes, vec![UrlOutcome::new(CAT, true)]);
        assert!(sync.mirror().snapshot().belongs_to("alice"));

        let bob = sync.add_images(Some("bob"), &urls(&[CAT])).await.expect("bob");
        assert_eq!(bob.outcomes, vec![UrlOutcome::new(CAT, true)]);
        assert_eq!(bob.status, SyncStatus::Persisted);
        assert!(sync.mirror().snapshot().belongs_to("bob"));
        assert_eq!(store.document("bob").expect("document").records().len(), 1);
    }

    #[tokio::test]
    async fn missing_user_touches_nothing() {
        let store = InMemoryDocumentStore::new();
        let sync = sync_with(&store);

        for user in [None, Some("")] {
            assert_eq!(
                sync.add_images(user, &urls(&[CAT])).await,
                Err(SyncError::MissingUser)
            );
            assert_eq!(
                sync.edit_urls(user, &[], &urls(&[CAT]), &[]).await,
                Err(SyncError::MissingUser)
            );
            assert_eq!(
                sync.write_urls_to_store(user).await,
                Err(SyncError::MissingUser)
            );
            assert_eq!(
                sync.fetch_and_decrypt_urls(user).await,
                Err(SyncError::MissingUser)
            );
        }
        assert_eq!(store.reads(), 0);
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn removed_url_is_gone_after_fetch() {
        let store = InMemoryDocumentStore::new();
        let sync = sync_with(&store);
        sync.add_images(USER, &urls(&[CAT, DOG])).await.expect("add");

        let status = sync
            .edit_urls(USER, &[], &urls(&[CAT]), &[])
            .await
            .expect("edit");
        assert_eq!(status, SyncStatus::Persisted);

        let fetched = sync.fetch_and_decrypt_urls(USER).await.expect("fetch");
        assert_eq!(fetched, vec![Record::new(DOG)]);
        assert_eq!(sync.mirror().records(), fetched);
    }

    #[tokio::test]
    async fn tag_updates_replace_wholesale() {
        let store = InMemoryDocumentStore::new();
        let sync = sync_with(&store);
        sync.add_images(USER, &urls(&[CAT])).await.expect("add");

        sync.edit_urls(USER, &[TagUpdate::new(CAT, urls(&["a"]))], &[], &[])
            .await
            .expect("first edit");
        sync.edit_urls(USER, &[TagUpdate::new(CAT, urls(&["b"]))], &[], &[])
            .await
            .expect("second edit");

        let fetched = sync.fetch_and_decrypt_urls(USER).await.expect("fetch");
        assert_eq!(fetched[0].tags, urls(&["b"]));
    }

    #[tokio::test]
    async fn double_toggle_restores_liked() {
        let store = InMemoryDocumentStore::new();
        let sync = sync_with(&store);
        sync.add_images(USER, &urls(&[CAT])).await.expect("add");

        sync.edit_urls(USER, &[], &[], &urls(&[CAT])).await.expect("toggle");
        assert!(sync.fetch_and_decrypt_urls(USER).await.unwrap()[0].liked);

        sync.edit_urls(USER, &[], &[], &urls(&[CAT])).await.expect("toggle back");
        assert!(!sync.fetch_and_decrypt_urls(USER).await.unwrap()[0].liked);
    }

    #[tokio::test]
    async fn tags_and_like_apply_to_same_record() {
        let store = InMemoryDocumentStore::new();
        let sync = sync_with(&store);
        sync.add_images(USER, &urls(&[CAT])).await.expect("add");

        sync.edit_urls(
            USER,
            &[TagUpdate::new(CAT, urls(&["x", "x", "y"]))],
            &[],
            &urls(&[CAT]),
        )
        .await
        .expect("edit");

        let record = &sync.mirror().records()[0];
        assert!(record.liked);
        assert_eq!(record.tags, urls(&["x", "x", "y"]));
    }

    #[tokio::test]
    async fn unreadable_baseline_blocks_writes() {
        let store = FlakyStore::default();
        let sync = Synchronizer::new(store.clone(), StaticImageValidator::accept_all());
        sync.add_images(USER, &urls(&[CAT])).await.expect("seed");
        store.fail_reads.store(true, Ordering::SeqCst);

        let report = sync.add_images(USER, &urls(&[DOG])).await.expect("add");
        assert!(matches!(report.status, SyncStatus::ReadFailed(_)));
        assert_eq!(report.outcomes, vec![UrlOutcome::new(DOG, false)]);

        let status = sync
            .edit_urls(USER, &[], &urls(&[CAT]), &[])
            .await
            .expect("edit");
        assert!(matches!(status, SyncStatus::ReadFailed(_)));
        assert_eq!(store.inner.writes(), 1);

        // Fail-open for plain reads, and the mirror keeps its last good state.
        assert!(sync.fetch_and_decrypt_urls(USER).await.unwrap().is_empty());
        assert!(matches!(
            sync.write_urls_to_store(USER).await,
            Ok(SyncStatus::ReadFailed(_))
        ));
        assert_eq!(sync.mirror().records(), vec![Record::new(CAT)]);
    }

    #[tokio::test]
    async fn failed_write_reports_success_flags_but_leaves_mirror_stale() {
        let store = FlakyStore::default();
        let sync = Synchronizer::new(store.clone(), StaticImageValidator::accept_all());
        store.fail_writes.store(true, Ordering::SeqCst);

        let report = sync.add_images(USER, &urls(&[CAT])).await.expect("add");
        assert_eq!(report.outcomes, vec![UrlOutcome::new(CAT, true)]);
        assert!(matches!(report.status, SyncStatus::WriteFailed(_)));
        assert_eq!(sync.mirror().version(), 0);
        assert!(store.inner.document("user-1").is_none());
    }

    #[tokio::test]
    async fn stalled_store_times_out() {
        let sync = Synchronizer::new(StalledStore, StaticImageValidator::accept_all())
            .with_settings(SyncSettings {
                store_timeout: Duration::from_millis(20),
                ..SyncSettings::default()
            });

        assert!(matches!(
            sync.fetch(USER).await,
            Ok(FetchOutcome::Unavailable(StoreError::Timeout {
                operation: "read",
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn stalled_write_times_out_and_leaves_mirror() {
        let store = StalledWriteStore::default();
        let sync = Synchronizer::new(store.clone(), StaticImageValidator::accept_all())
            .with_settings(SyncSettings {
                store_timeout: Duration::from_millis(20),
                ..SyncSettings::default()
            });

        let report = sync.add_images(USER, &urls(&[CAT])).await.expect("add");
        assert_eq!(report.outcomes, vec![UrlOutcome::new(CAT, true)]);
        assert!(matches!(
            report.status,
            SyncStatus::WriteFailed(StoreError::Timeout {
                operation: "write",
                ..
            })
        ));
        assert_eq!(sync.mirror().snapshot(), MirrorState::default());
        assert!(store.inner.document("user-1").is_none());
    }

    #[tokio::test]
    async fn hanging_validation_counts_as_invalid() {
        let store = InMemoryDocumentStore::new();
        let sync = Synchronizer::new(store.clone(), HangingValidator).with_settings(SyncSettings {
            validation_timeout: Duration::from_millis(20),
            ..SyncSettings::default()
        });

        let started = std::time::Instant::now();
        let report = sync.add_images(USER, &urls(&[CAT, DOG])).await.expect("add");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            report.outcomes,
            vec![UrlOutcome::new(CAT, false), UrlOutcome::new(DOG, false)]
        );
        assert_eq!(report.status, SyncStatus::Skipped);
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn document_without_urls_field_is_empty() {
        let store = InMemoryDocumentStore::new();
        let mut extra = Map::new();
        extra.insert("displayName".into(), Value::from("ada"));
        store.insert(
            "user-1",
            UserDocument {
                urls: None,
                extra,
            },
        );
        let sync = sync_with(&store);

        assert_eq!(sync.fetch(USER).await, Ok(FetchOutcome::Empty));

        sync.add_images(USER, &urls(&[CAT])).await.expect("add");
        let stored = store.document("user-1").expect("document");
        assert_eq!(stored.records().len(), 1);
        assert!(matches!(
            sync.fetch(USER).await,
            Ok(FetchOutcome::Collection(_))
        ));
    }

    #[tokio::test]
    async fn undecryptable_records_are_skipped_and_preserved() {
        let store = InMemoryDocumentStore::new();
        let corrupt = EncryptedRecord {
            url: EncryptedField::new("not-a-field"),
            liked: true,
            tags: vec![],
        };
        store.insert(
            "user-1",
            UserDocument {
                urls: Some(vec![corrupt.clone()]),
                extra: Map::new(),
            },
        );
        let sync = sync_with(&store);

        match sync.fetch(USER).await.expect("fetch") {
            FetchOutcome::Collection(snapshot) => {
                assert!(snapshot.records.is_empty());
                assert_eq!(snapshot.undecryptable, vec![corrupt.clone()]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        sync.add_images(USER, &urls(&[CAT])).await.expect("add");
        let stored = store.document("user-1").expect("document");
        assert_eq!(stored.records().len(), 2);
        assert_eq!(stored.records()[1], corrupt);
        assert_eq!(sync.mirror().records(), vec![Record::new(CAT)]);
    }

    #[tokio::test]
    async fn writes_keep_other_document_fields() {
        let store = InMemoryDocumentStore::new();
        let mut extra = Map::new();
        extra.insert("displayName".into(), Value::from("ada"));
        store.insert(
            "user-1",
            UserDocument {
                urls: Some(vec![]),
                extra,
            },
        );
        let sync = sync_with(&store);

        sync.add_images(USER, &urls(&[CAT])).await.expect("add");
        let stored = store.document("user-1").expect("document");
        assert_eq!(stored.extra.get("displayName"), Some(&Value::from("ada")));
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let store = InMemoryDocumentStore::new();
        let sync = sync_with(&store);
        sync.add_images(USER, &urls(&[CAT])).await.expect("add");

        // Same ciphertexts under another user id do not decrypt to the original.
        let stolen = store.document("user-1").expect("document");
        store.insert("user-2", stolen);
        let seen = sync
            .fetch_and_decrypt_urls(Some("user-2"))
            .await
            .expect("fetch");
        assert!(seen.iter().all(|r| r.url != CAT));
    }

    #[tokio::test]
    async fn write_urls_to_store_refreshes_mirror() {
        let store = InMemoryDocumentStore::new();
        let writer = sync_with(&store);
        let reader = sync_with(&store);
        writer.add_images(USER, &urls(&[CAT])).await.expect("add");

        assert!(reader.mirror().records().is_empty());
        assert_eq!(
            reader.write_urls_to_store(USER).await,
            Ok(SyncStatus::Reloaded)
        );
        assert_eq!(reader.mirror().records(), vec![Record::new(CAT)]);
        assert_eq!(store.writes(), 1);
    }

    #[test]
    fn apply_edits_ignores_unknown_urls_and_keeps_order() {
        let records = vec![Record::new("a"), Record::new("b"), Record::new("c")];
        let edited = apply_edits(
            records,
            &[TagUpdate::new("zzz", urls(&["t"]))],
            &urls(&["b", "missing"]),
            &urls(&["c", "nope"]),
        );
        assert_eq!(edited.len(), 2);
        assert_eq!(edited[0], Record::new("a"));
        assert_eq!(edited[1].url, "c");
        assert!(edited[1].liked);
    }
}
