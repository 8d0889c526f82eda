/*!
Persistence orchestrator: coordinates the live record store with the
background pipeline.

The live store is only ever touched from the task that calls into the
orchestrator (the privileged context). Everything that reaches the disk or
the cipher runs on the orchestrator's [`SerialWorker`]. The only things that
cross between the two are owned values: a `Vec<Record>` snapshot on the way
out and a [`LoadOutcome`] on the way back.

```text
persist:  fetch_records (caller) -> encode + encrypt + commit (worker)
restore:  read + decrypt + decode (worker) -> restore_records (caller)
delete:   remove payload (worker)
```
*/

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

#[cfg(feature = "metrics")]
use crate::observability::with_metrics;
use crate::cipher::PayloadCipher;
use crate::config::PersistConfig;
use crate::container;
use crate::reader::{DurableReader, LoadOutcome};
use crate::record::Record;
use crate::storage::{LocalFileStorage, StorageAdapter};
use crate::worker::SerialWorker;
use crate::writer::DurableWriter;
use crate::{PersistError, Result};

/// The live, in-memory record store
///
/// Only called from the privileged context. Implementations do not need to be
/// `Send` or `Sync`; the orchestrator never moves the store to another thread.
#[cfg_attr(test, mockall::automock)]
pub trait RecordStore {
    /// Snapshot every record currently held by the store
    fn fetch_records(&self) -> Vec<Record>;

    /// Insert a batch of previously persisted records
    fn restore_records(&self, records: Vec<Record>);
}

/// Result of a persist request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// A new payload replaced the previous one
    Committed { records: usize, payload_bytes: usize },
    /// No usable cipher; nothing was written
    Skipped,
    /// The commit failed and the previous payload was left in place
    Failed(String),
}

/// Result of a restore request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// This many records were handed to the store
    Restored(usize),
    /// Nothing usable was stored, or no cipher was available
    Empty,
    /// A deletion was requested while the restore was in flight
    Discarded,
    /// There was no store to restore into, so the payload was deleted
    Deleted,
}

/// Coordinates persist, restore, and delete for one logical store
///
/// # Example
/// ```rust,no_run
/// use sessionvault_core::{
///     create_local_orchestrator, AesGcmCipher, PersistConfig, Record, RecordStore,
/// };
/// use std::cell::RefCell;
///
/// struct Jar(RefCell<Vec<Record>>);
///
/// impl RecordStore for Jar {
///     fn fetch_records(&self) -> Vec<Record> {
///         self.0.borrow().clone()
///     }
///     fn restore_records(&self, records: Vec<Record>) {
///         self.0.borrow_mut().extend(records);
///     }
/// }
///
/// # async fn run() -> sessionvault_core::Result<()> {
/// let config = PersistConfig::with_base_dir("/var/lib/browser/incognito");
/// let orchestrator = create_local_orchestrator(config, AesGcmCipher::new([0u8; 32]))?;
///
/// let jar = Jar(RefCell::new(vec![Record::new("id", "1", "a.com", "/")]));
/// orchestrator.persist(&jar).await;
///
/// let fresh = Jar(RefCell::new(Vec::new()));
/// orchestrator.restore(Some(&fresh)).await;
/// # Ok(())
/// # }
/// ```
pub struct PersistenceOrchestrator<S, C>
where
    S: StorageAdapter + 'static,
    C: PayloadCipher + 'static,
{
    config: PersistConfig,
    storage: Arc<S>,
    writer: DurableWriter<S, C>,
    reader: Arc<DurableReader<S, C>>,
    worker: SerialWorker,
    deletion_epoch: AtomicU64,
    persist_epoch: AtomicU64,
}

impl<S, C> PersistenceOrchestrator<S, C>
where
    S: StorageAdapter + 'static,
    C: PayloadCipher + 'static,
{
    /// Create an orchestrator and start its background worker
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: PersistConfig, storage: S, cipher: C) -> Result<Self> {
        config.validate()?;

        let storage = Arc::new(storage);
        let cipher = Arc::new(cipher);
        let writer = DurableWriter::new(
            Arc::clone(&storage),
            Arc::clone(&cipher),
            config.file_name.clone(),
        );
        let reader = Arc::new(DurableReader::new(
            Arc::clone(&storage),
            cipher,
            config.file_name.clone(),
            config.magic_token.clone(),
        ));
        let worker = SerialWorker::spawn(format!("sessionvault:{}", config.file_name))?;

        Ok(Self {
            config,
            storage,
            writer,
            reader,
            worker,
            deletion_epoch: AtomicU64::new(0),
            persist_epoch: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &PersistConfig {
        &self.config
    }

    /// Snapshot `store` and commit the snapshot in the background
    ///
    /// Failures are logged and reported in the outcome; they are not retried.
    /// The next natural trigger simply persists again.
    pub async fn persist<R>(&self, store: &R) -> PersistOutcome
    where
        R: RecordStore + ?Sized,
    {
        let records = store.fetch_records();
        let count = records.len();
        debug!(records = count, "Fetched snapshot for persist");

        let writer = self.writer.clone();
        let magic = self.config.magic_token.clone();
        self.persist_epoch.fetch_add(1, Ordering::SeqCst);
        let submitted = self.worker.submit(move || {
            let plaintext = container::encode(&magic, &records)?;
            writer.commit(&plaintext)
        });

        match await_job(submitted, "persist").await.and_then(|committed| committed) {
            Ok(payload_bytes) => {
                info!(records = count, payload_bytes, "Persisted records");
                #[cfg(feature = "metrics")]
                with_metrics(|m| m.record_commit(payload_bytes));
                PersistOutcome::Committed {
                    records: count,
                    payload_bytes,
                }
            }
            Err(PersistError::CipherUnavailable) => {
                debug!("Cipher unavailable, records not persisted");
                PersistOutcome::Skipped
            }
            Err(e) => {
                warn!(error = %e, "Failed to persist records");
                #[cfg(feature = "metrics")]
                with_metrics(|m| m.record_commit_failure());
                PersistOutcome::Failed(e.to_string())
            }
        }
    }

    /// Restore the payload into `store`, or delete it when there is no store
    pub async fn restore<R>(&self, store: Option<&R>) -> RestoreOutcome
    where
        R: RecordStore + ?Sized,
    {
        match store {
            Some(store) => self.begin_restore().complete(store).await,
            None => {
                if let Err(e) = self.delete().await {
                    warn!(error = %e, "Failed to delete orphaned payload");
                }
                RestoreOutcome::Deleted
            }
        }
    }

    /// Queue the background half of a restore
    ///
    /// The returned token must be completed on the privileged context to hand
    /// the records to the store. Any deletion requested in between wins.
    pub fn begin_restore(&self) -> PendingRestore<'_, S, C> {
        let epoch = self.deletion_epoch.load(Ordering::SeqCst);
        let persist_epoch = self.persist_epoch.load(Ordering::SeqCst);
        let reader = Arc::clone(&self.reader);
        let receiver = self.worker.submit(move || reader.load_outcome());
        PendingRestore {
            orchestrator: self,
            epoch,
            persist_epoch,
            receiver,
        }
    }

    /// Request deletion of the payload
    ///
    /// Takes effect for pending restores immediately; the file itself is
    /// removed once the worker reaches the request.
    pub fn schedule_delete(&self) -> Result<oneshot::Receiver<Result<()>>> {
        self.deletion_epoch.fetch_add(1, Ordering::SeqCst);
        let storage = Arc::clone(&self.storage);
        let path = self.config.file_name.clone();
        self.worker.submit(move || storage.delete(&path))
    }

    /// Delete the payload and wait for the deletion to finish
    pub async fn delete(&self) -> Result<()> {
        await_job(self.schedule_delete(), "delete").await??;
        debug!(path = %self.config.file_name, "Payload deleted");
        Ok(())
    }

    /// Delete the payload if the store that owned it is gone
    ///
    /// # Returns
    /// True if a deletion was scheduled
    pub fn delete_if_orphaned<R>(&self, store: Option<&R>) -> bool
    where
        R: RecordStore + ?Sized,
    {
        if store.is_some() {
            return false;
        }
        match self.schedule_delete() {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Failed to schedule payload deletion");
                false
            }
        }
    }

    fn deletion_requested_since(&self, epoch: u64) -> bool {
        self.deletion_epoch.load(Ordering::SeqCst) != epoch
    }

    fn persist_requested_since(&self, epoch: u64) -> bool {
        self.persist_epoch.load(Ordering::SeqCst) != epoch
    }
}

/// Completion token for a restore whose background half has been queued
#[must_use = "a pending restore does nothing until completed"]
pub struct PendingRestore<'a, S, C>
where
    S: StorageAdapter + 'static,
    C: PayloadCipher + 'static,
{
    orchestrator: &'a PersistenceOrchestrator<S, C>,
    epoch: u64,
    persist_epoch: u64,
    receiver: Result<oneshot::Receiver<LoadOutcome>>,
}

impl<S, C> PendingRestore<'_, S, C>
where
    S: StorageAdapter + 'static,
    C: PayloadCipher + 'static,
{
    /// Wait for the payload and hand its records to `store`
    pub async fn complete<R>(self, store: &R) -> RestoreOutcome
    where
        R: RecordStore + ?Sized,
    {
        let orchestrator = self.orchestrator;
        let outcome = match await_job(self.receiver, "restore").await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Restore job did not complete");
                return RestoreOutcome::Empty;
            }
        };

        if orchestrator.deletion_requested_since(self.epoch) {
            debug!("Deletion requested during restore, discarding records");
            #[cfg(feature = "metrics")]
            with_metrics(|m| m.record_discarded_restore());
            return RestoreOutcome::Discarded;
        }

        let records = match outcome {
            LoadOutcome::Loaded(records) => records,
            LoadOutcome::Unreadable(_) => {
                #[cfg(feature = "metrics")]
                with_metrics(|m| m.record_unreadable_payload());
                return RestoreOutcome::Empty;
            }
            LoadOutcome::Missing | LoadOutcome::CipherUnavailable | LoadOutcome::ReadFailed(_) => {
                return RestoreOutcome::Empty;
            }
        };

        let count = records.len();
        if count > 0 {
            store.restore_records(records);
        }
        info!(records = count, "Restored records");
        #[cfg(feature = "metrics")]
        with_metrics(|m| m.record_restored(count));

        if orchestrator.config.consume_on_restore {
            // A persist queued after the read owns the payload now
            if orchestrator.persist_requested_since(self.persist_epoch) {
                debug!("Payload rewritten during restore, not consuming it");
            } else if let Err(e) = orchestrator.schedule_delete() {
                warn!(error = %e, "Failed to schedule deletion of restored payload");
            }
        }
        RestoreOutcome::Restored(count)
    }
}

/// Wait for a queued job's value
async fn await_job<T>(submitted: Result<oneshot::Receiver<T>>, job: &str) -> Result<T> {
    submitted?
        .await
        .map_err(|_| PersistError::worker(format!("{job} job did not complete")))
}

/// Create an orchestrator storing its payload on the local filesystem
///
/// The payload lives at `config.base_dir/config.file_name`.
pub fn create_local_orchestrator<C>(
    config: PersistConfig,
    cipher: C,
) -> Result<PersistenceOrchestrator<LocalFileStorage, C>>
where
    C: PayloadCipher + 'static,
{
    let storage = config.local_storage();
    PersistenceOrchestrator::new(config, storage, cipher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{AesGcmCipher, UnavailableCipher};
    use crate::record::Priority;
    use crate::storage::MemoryStorage;
    use std::cell::RefCell;

    const KEY: [u8; 32] = [9u8; 32];

    #[derive(Default)]
    struct FakeStore {
        records: RefCell<Vec<Record>>,
    }

    impl FakeStore {
        fn with(records: Vec<Record>) -> Self {
            Self {
                records: RefCell::new(records),
            }
        }

        fn records(&self) -> Vec<Record> {
            self.records.borrow().clone()
        }
    }

    impl RecordStore for FakeStore {
        fn fetch_records(&self) -> Vec<Record> {
            self.records.borrow().clone()
        }

        fn restore_records(&self, records: Vec<Record>) {
            self.records.borrow_mut().extend(records);
        }
    }

    fn sample_records() -> Vec<Record> {
        vec![
            Record::new("id", "1", "a.com", "/")
                .with_times(100, 200, 150)
                .with_secure(true)
                .with_priority(Priority::Medium),
            Record::new("s", "x", "b.com", "/")
                .with_times(300, -1, 300)
                .with_http_only(true)
                .with_priority(Priority::Low),
        ]
    }

    fn orchestrator(
        storage: &MemoryStorage,
        config: PersistConfig,
    ) -> PersistenceOrchestrator<MemoryStorage, AesGcmCipher> {
        PersistenceOrchestrator::new(config, storage.clone(), AesGcmCipher::new(KEY)).unwrap()
    }

    #[tokio::test]
    async fn test_persist_then_restore() {
        let storage = MemoryStorage::new();
        let orchestrator = orchestrator(&storage, PersistConfig::default_local());

        let live = FakeStore::with(sample_records());
        let outcome = orchestrator.persist(&live).await;
        assert!(matches!(
            outcome,
            PersistOutcome::Committed { records: 2, .. }
        ));
        assert!(storage.exists("COOKIES.DAT"));

        let fresh = FakeStore::default();
        let outcome = orchestrator.restore(Some(&fresh)).await;
        assert_eq!(outcome, RestoreOutcome::Restored(2));
        assert_eq!(fresh.records(), sample_records());
    }

    #[tokio::test]
    async fn test_restored_payload_is_consumed() {
        let storage = MemoryStorage::new();
        let orchestrator = orchestrator(&storage, PersistConfig::default_local());
        orchestrator
            .persist(&FakeStore::with(sample_records()))
            .await;

        let first = FakeStore::default();
        assert_eq!(
            orchestrator.restore(Some(&first)).await,
            RestoreOutcome::Restored(2)
        );

        // The consuming delete is queued ahead of this read
        let second = FakeStore::default();
        assert_eq!(
            orchestrator.restore(Some(&second)).await,
            RestoreOutcome::Empty
        );
        assert!(second.records().is_empty());
        assert!(!storage.exists("COOKIES.DAT"));
    }

    #[tokio::test]
    async fn test_persist_during_restore_is_not_consumed() {
        let storage = MemoryStorage::new();
        let orchestrator = orchestrator(&storage, PersistConfig::default_local());
        orchestrator
            .persist(&FakeStore::with(sample_records()))
            .await;

        let pending = orchestrator.begin_restore();
        let newer = vec![Record::new("z", "9", "c.com", "/")];
        let outcome = orchestrator.persist(&FakeStore::with(newer.clone())).await;
        assert!(matches!(
            outcome,
            PersistOutcome::Committed { records: 1, .. }
        ));

        let first = FakeStore::default();
        assert_eq!(pending.complete(&first).await, RestoreOutcome::Restored(2));
        assert_eq!(first.records(), sample_records());

        // The newer commit survives and is what the next restore sees
        let second = FakeStore::default();
        assert_eq!(
            orchestrator.restore(Some(&second)).await,
            RestoreOutcome::Restored(1)
        );
        assert_eq!(second.records(), newer);
    }

    #[tokio::test]
    async fn test_payload_kept_when_not_consuming() {
        let storage = MemoryStorage::new();
        let config = PersistConfig::default_local().with_consume_on_restore(false);
        let orchestrator = orchestrator(&storage, config);
        orchestrator
            .persist(&FakeStore::with(sample_records()))
            .await;

        for _ in 0..2 {
            let store = FakeStore::default();
            assert_eq!(
                orchestrator.restore(Some(&store)).await,
                RestoreOutcome::Restored(2)
            );
        }
        assert!(storage.exists("COOKIES.DAT"));
    }

    #[tokio::test]
    async fn test_persist_replaces_previous_payload() {
        let storage = MemoryStorage::new();
        let orchestrator = orchestrator(&storage, PersistConfig::default_local());

        orchestrator
            .persist(&FakeStore::with(sample_records()))
            .await;
        let newer = vec![Record::new("z", "9", "c.com", "/")];
        orchestrator.persist(&FakeStore::with(newer.clone())).await;

        let store = FakeStore::default();
        orchestrator.restore(Some(&store)).await;
        assert_eq!(store.records(), newer);
    }

    #[tokio::test]
    async fn test_persist_without_cipher_is_skipped() {
        let storage = MemoryStorage::new();
        storage.write_atomic(b"older payload", "COOKIES.DAT").unwrap();
        let orchestrator = PersistenceOrchestrator::new(
            PersistConfig::default_local(),
            storage.clone(),
            UnavailableCipher::new(),
        )
        .unwrap();

        let outcome = orchestrator
            .persist(&FakeStore::with(sample_records()))
            .await;
        assert_eq!(outcome, PersistOutcome::Skipped);
        assert_eq!(
            storage.read("COOKIES.DAT").unwrap(),
            Some(b"older payload".to_vec())
        );
    }

    #[tokio::test]
    async fn test_persist_invalid_record_fails_without_writing() {
        let storage = MemoryStorage::new();
        let orchestrator = orchestrator(&storage, PersistConfig::default_local());

        let broken = FakeStore::with(vec![Record::new("id", "1", "", "/")]);
        let outcome = orchestrator.persist(&broken).await;
        assert!(matches!(outcome, PersistOutcome::Failed(_)));
        assert!(!storage.exists("COOKIES.DAT"));
    }

    #[tokio::test]
    async fn test_restore_without_cipher_leaves_store_untouched() {
        let storage = MemoryStorage::new();
        storage.write_atomic(b"sealed payload", "COOKIES.DAT").unwrap();
        let orchestrator = PersistenceOrchestrator::new(
            PersistConfig::default_local(),
            storage.clone(),
            UnavailableCipher::new(),
        )
        .unwrap();

        let mut store = MockRecordStore::new();
        store.expect_restore_records().times(0);
        store.expect_fetch_records().times(0);

        let outcome = orchestrator.restore(Some(&store)).await;
        assert_eq!(outcome, RestoreOutcome::Empty);
        assert!(storage.exists("COOKIES.DAT"));
    }

    #[tokio::test]
    async fn test_unreadable_payload_is_removed() {
        let storage = MemoryStorage::new();
        storage
            .write_atomic(b"not a sealed payload at all", "COOKIES.DAT")
            .unwrap();
        let orchestrator = orchestrator(&storage, PersistConfig::default_local());

        let mut store = MockRecordStore::new();
        store.expect_restore_records().times(0);

        assert_eq!(
            orchestrator.restore(Some(&store)).await,
            RestoreOutcome::Empty
        );
        assert!(!storage.exists("COOKIES.DAT"));
    }

    #[tokio::test]
    async fn test_restore_without_store_deletes_payload() {
        let storage = MemoryStorage::new();
        let orchestrator = orchestrator(&storage, PersistConfig::default_local());
        orchestrator
            .persist(&FakeStore::with(sample_records()))
            .await;

        let outcome = orchestrator.restore(None::<&FakeStore>).await;
        assert_eq!(outcome, RestoreOutcome::Deleted);
        assert!(!storage.exists("COOKIES.DAT"));
    }

    #[tokio::test]
    async fn test_deletion_wins_over_pending_restore() {
        let storage = MemoryStorage::new();
        let orchestrator = orchestrator(&storage, PersistConfig::default_local());
        orchestrator
            .persist(&FakeStore::with(sample_records()))
            .await;

        let store = FakeStore::default();
        let pending = orchestrator.begin_restore();
        let deleted = orchestrator.schedule_delete().unwrap();

        assert_eq!(pending.complete(&store).await, RestoreOutcome::Discarded);
        assert!(deleted.await.unwrap().is_ok());
        assert!(store.records().is_empty());
        assert!(!storage.exists("COOKIES.DAT"));
    }

    #[tokio::test]
    async fn test_delete_if_orphaned() {
        let storage = MemoryStorage::new();
        let orchestrator = orchestrator(&storage, PersistConfig::default_local());
        orchestrator
            .persist(&FakeStore::with(sample_records()))
            .await;

        let live = FakeStore::default();
        assert!(!orchestrator.delete_if_orphaned(Some(&live)));
        assert!(orchestrator.delete_if_orphaned(None::<&FakeStore>));

        // Serial queue: this read runs after the deletion
        assert_eq!(
            orchestrator.restore(Some(&live)).await,
            RestoreOutcome::Empty
        );
        assert!(!storage.exists("COOKIES.DAT"));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let _guard = runtime.enter();

        let config = PersistConfig::default_local().with_magic_token(Vec::new());
        let result =
            PersistenceOrchestrator::new(config, MemoryStorage::new(), AesGcmCipher::new(KEY));
        assert!(matches!(result, Err(PersistError::Validation(_))));
    }
}
