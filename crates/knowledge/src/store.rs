//! Canonical record store.
//!
//! The store owns every published [`InvoiceAnalysisRecord`] and the vector
//! index derived from them. Publication is atomic: the index entry and the
//! canonical entry are written under the store's write lock, so a reader
//! either sees a record fully present and searchable or not at all.
//!
//! Lock order is always store, then index. Index upkeep runs after the
//! store lock is released.
//!
//! Scans run over an `Arc` snapshot of the ordered record list. Writers
//! copy the list only while a scan still holds the previous snapshot, so
//! scans never block writers and never see torn state.

use crate::config::LedgerConfig;
use crate::ivf::IvfIndex;
use crate::snapshot;
use crate::types::{InvoiceAnalysisRecord, RecordRef};
use crate::vector_index::VectorIndex;
use reimburse_core::{AppError, AppResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct StoreInner {
    by_id: HashMap<String, RecordRef>,
    ordered: Arc<Vec<RecordRef>>,
}

/// Thread-safe store of analyzed invoices.
pub struct RecordStore {
    dimension: usize,
    excerpt_max_chars: usize,
    inner: RwLock<StoreInner>,
    index: Arc<dyn VectorIndex>,
    clock: AtomicU64,
    snapshot_path: Option<PathBuf>,
    closed: AtomicBool,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("dimension", &self.dimension)
            .field("records", &self.len())
            .field("snapshot_path", &self.snapshot_path)
            .finish()
    }
}

impl RecordStore {
    /// Create an empty in-memory store over `index`.
    pub fn new(index: Arc<dyn VectorIndex>, excerpt_max_chars: usize) -> Self {
        Self {
            dimension: index.dimension(),
            excerpt_max_chars,
            inner: RwLock::new(StoreInner::default()),
            index,
            clock: AtomicU64::new(1),
            snapshot_path: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Open a store backed by the snapshot at `snapshot_path`.
    ///
    /// Records are loaded in publication order and the index is rebuilt from
    /// them. A missing snapshot yields an empty store.
    pub fn open(config: &LedgerConfig, snapshot_path: impl Into<PathBuf>) -> AppResult<Self> {
        let snapshot_path = snapshot_path.into();
        let dimension = config.embedding.dimensions;
        let index: Arc<dyn VectorIndex> = Arc::new(IvfIndex::new(dimension, config.index.clone()));

        let mut store = Self::new(index, config.pipeline.excerpt_max_chars);
        store.snapshot_path = Some(snapshot_path.clone());

        if let Some(snapshot) = snapshot::read_snapshot(&snapshot_path)? {
            if snapshot.dimension != dimension {
                return Err(AppError::Config(format!(
                    "Snapshot {:?} holds {}-dimensional embeddings but embedding.dimensions is {}",
                    snapshot_path, snapshot.dimension, dimension
                )));
            }

            let mut max_created = 0;
            {
                let mut inner = store.write()?;
                let mut ordered = Vec::with_capacity(snapshot.records.len());
                for record in snapshot.records {
                    store.validate(&record)?;
                    if inner.by_id.contains_key(&record.id) {
                        return Err(AppError::DuplicateId(record.id));
                    }
                    max_created = max_created.max(record.created_at);
                    let record = Arc::new(record);
                    inner.by_id.insert(record.id.clone(), Arc::clone(&record));
                    ordered.push(record);
                }
                store.index.rebuild(&ordered)?;
                inner.ordered = Arc::new(ordered);
            }
            store.clock.store(max_created + 1, Ordering::SeqCst);

            tracing::info!(
                path = ?snapshot_path,
                records = store.len(),
                "Opened ledger snapshot"
            );
        }

        Ok(store)
    }

    fn read(&self) -> AppResult<RwLockReadGuard<'_, StoreInner>> {
        self.inner
            .read()
            .map_err(|_| AppError::Knowledge("record store lock poisoned".to_string()))
    }

    fn write(&self) -> AppResult<RwLockWriteGuard<'_, StoreInner>> {
        self.inner
            .write()
            .map_err(|_| AppError::Knowledge("record store lock poisoned".to_string()))
    }

    fn validate(&self, record: &InvoiceAnalysisRecord) -> AppResult<()> {
        if record.id.trim().is_empty() {
            return Err(AppError::InvalidRecord("record id cannot be empty".to_string()));
        }
        if record.embedding.len() != self.dimension {
            return Err(AppError::InvalidRecord(format!(
                "record {} has a {}-dimensional embedding, store expects {}",
                record.id,
                record.embedding.len(),
                self.dimension
            )));
        }
        if record.embedding.iter().any(|x| !x.is_finite()) {
            return Err(AppError::InvalidRecord(format!(
                "record {} has a non-finite embedding value",
                record.id
            )));
        }
        if record.source_excerpt.chars().count() > self.excerpt_max_chars {
            return Err(AppError::InvalidRecord(format!(
                "record {} excerpt exceeds {} characters",
                record.id, self.excerpt_max_chars
            )));
        }
        Ok(())
    }

    /// Publish a record.
    ///
    /// # Errors
    /// - `DuplicateId` if a record with the same id exists; the stored record
    ///   is left unchanged
    /// - `InvalidRecord` on dimension, id or excerpt violations
    /// - `Config` once the store has been torn down
    pub fn put(&self, record: InvoiceAnalysisRecord) -> AppResult<RecordRef> {
        if self.is_closed() {
            return Err(closed_error());
        }
        self.validate(&record)?;

        let record = {
            let mut inner = self.write()?;
            // Teardown flips `closed` under this lock
            if self.is_closed() {
                return Err(closed_error());
            }
            if inner.by_id.contains_key(&record.id) {
                return Err(AppError::DuplicateId(record.id));
            }

            self.index
                .insert(&record.id, &record.embedding, record.created_at)?;

            let record = Arc::new(record);
            inner.by_id.insert(record.id.clone(), Arc::clone(&record));
            Arc::make_mut(&mut inner.ordered).push(Arc::clone(&record));
            record
        };

        tracing::debug!(id = %record.id, invoice = %record.invoice_id, "Published record");

        if let Err(e) = self.index.maintain() {
            tracing::warn!(error = %e, "Vector index maintenance failed");
        }
        Ok(record)
    }

    /// Look up a record by id.
    pub fn get(&self, id: &str) -> AppResult<RecordRef> {
        self.read()?
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    /// Lazily iterate records accepted by `predicate`, in publication order.
    ///
    /// The scan sees the records published when it was created; later writes
    /// are not visible to it. Call [`Scan::restart`] to iterate again.
    pub fn scan<F>(&self, predicate: F) -> AppResult<Scan<F>>
    where
        F: Fn(&InvoiceAnalysisRecord) -> bool,
    {
        Ok(Scan {
            records: self.all()?,
            position: 0,
            predicate,
        })
    }

    /// Every record in publication order.
    pub fn all(&self) -> AppResult<Arc<Vec<RecordRef>>> {
        Ok(Arc::clone(&self.read()?.ordered))
    }

    pub fn len(&self) -> usize {
        self.read().map(|inner| inner.by_id.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn excerpt_max_chars(&self) -> usize {
        self.excerpt_max_chars
    }

    /// Next logical publication timestamp.
    pub fn next_created_at(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Rebuild the index from the canonical records.
    ///
    /// Holds the store's write lock so no record is published mid-rebuild.
    pub fn rebuild_index(&self) -> AppResult<usize> {
        let inner = self.write()?;
        self.index.rebuild(&inner.ordered)?;
        Ok(inner.ordered.len())
    }

    /// Persist the current records, if the store has a snapshot path.
    pub fn save_snapshot(&self) -> AppResult<()> {
        match &self.snapshot_path {
            Some(path) => snapshot::write_snapshot(path, self.dimension, &self.all()?),
            None => Ok(()),
        }
    }

    /// Persist and close the store. Later `put` calls fail.
    pub fn teardown(&self) -> AppResult<()> {
        {
            let _inner = self.write()?;
            if self.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
        }
        self.save_snapshot()?;
        tracing::info!(records = self.len(), "Closed record store");
        Ok(())
    }
}

fn closed_error() -> AppError {
    AppError::Config("record store is closed (store unreachable)".to_string())
}

/// Restartable iterator over a consistent snapshot of the store.
pub struct Scan<F> {
    records: Arc<Vec<RecordRef>>,
    position: usize,
    predicate: F,
}

impl<F> Scan<F> {
    /// Rewind to the first record of the same snapshot.
    pub fn restart(&mut self) {
        self.position = 0;
    }
}

impl<F> Iterator for Scan<F>
where
    F: Fn(&InvoiceAnalysisRecord) -> bool,
{
    type Item = RecordRef;

    fn next(&mut self) -> Option<RecordRef> {
        while let Some(record) = self.records.get(self.position) {
            self.position += 1;
            if (self.predicate)(record) {
                return Some(Arc::clone(record));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::types::Status;
    use tempfile::TempDir;

    fn store() -> RecordStore {
        RecordStore::new(Arc::new(IvfIndex::new(3, IndexConfig::default())), 100)
    }

    fn record(id: &str, status: Status, created_at: u64) -> InvoiceAnalysisRecord {
        InvoiceAnalysisRecord {
            id: id.to_string(),
            invoice_id: format!("{}.txt", id),
            employee_name: "Lee Chen".to_string(),
            status,
            reason: "policy".to_string(),
            source_excerpt: "hotel".to_string(),
            date: None,
            embedding: vec![1.0, 0.0, 0.0],
            created_at,
        }
    }

    #[test]
    fn test_put_get() {
        let store = store();
        store.put(record("a", Status::Approved, 1)).unwrap();
        assert_eq!(store.get("a").unwrap().status, Status::Approved);
        assert_eq!(store.index().len(), 1);
        assert!(matches!(store.get("zzz"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let store = store();
        store.put(record("a", Status::Approved, 1)).unwrap();
        let err = store.put(record("a", Status::Declined, 2)).unwrap_err();

        assert!(matches!(err, AppError::DuplicateId(ref id) if id == "a"));
        assert_eq!(store.get("a").unwrap().status, Status::Approved);
        assert_eq!(store.len(), 1);
        assert_eq!(store.index().len(), 1);
    }

    #[test]
    fn test_invalid_records_rejected_and_not_indexed() {
        let store = store();

        let mut wrong_dim = record("a", Status::Approved, 1);
        wrong_dim.embedding = vec![1.0];
        assert!(matches!(store.put(wrong_dim), Err(AppError::InvalidRecord(_))));

        let mut long = record("b", Status::Approved, 1);
        long.source_excerpt = "x".repeat(101);
        assert!(matches!(store.put(long), Err(AppError::InvalidRecord(_))));

        assert!(store.put(record(" ", Status::Approved, 1)).is_err());
        assert!(store.is_empty());
        assert!(store.index().is_empty());
    }

    #[test]
    fn test_scan_is_snapshot_and_restartable() {
        let store = store();
        store.put(record("a", Status::Declined, 1)).unwrap();
        store.put(record("b", Status::Approved, 2)).unwrap();

        let mut scan = store.scan(|r| r.status == Status::Declined).unwrap();
        store.put(record("c", Status::Declined, 3)).unwrap();

        let first: Vec<String> = scan.by_ref().map(|r| r.id.clone()).collect();
        assert_eq!(first, vec!["a"]);

        scan.restart();
        assert_eq!(scan.count(), 1);

        let fresh: Vec<String> = store
            .scan(|r| r.status == Status::Declined)
            .unwrap()
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(fresh, vec!["a", "c"]);
    }

    #[test]
    fn test_teardown_blocks_put() {
        let store = store();
        store.teardown().unwrap();
        assert!(matches!(
            store.put(record("a", Status::Approved, 1)),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_teardown_racing_puts_keeps_every_accepted_record() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("snapshot.json");
        let mut config = LedgerConfig::default();
        config.embedding.dimensions = 3;
        let store = RecordStore::open(&config, &path).unwrap();

        let accepted: Vec<String> = std::thread::scope(|scope| {
            let writers: Vec<_> = (0..4)
                .map(|w| {
                    let store = &store;
                    scope.spawn(move || {
                        let mut ok = Vec::new();
                        for i in 0..50 {
                            let id = format!("w{}-{}", w, i);
                            let created_at = store.next_created_at();
                            if store.put(record(&id, Status::Approved, created_at)).is_ok() {
                                ok.push(id);
                            }
                        }
                        ok
                    })
                })
                .collect();
            store.teardown().unwrap();
            writers
                .into_iter()
                .flat_map(|handle| handle.join().unwrap())
                .collect()
        });

        let reopened = RecordStore::open(&config, &path).unwrap();
        assert_eq!(reopened.len(), accepted.len());
        for id in &accepted {
            assert!(reopened.get(id).is_ok(), "{} missing after reopen", id);
        }
    }

    #[test]
    fn test_put_trains_index_after_release() {
        let index = Arc::new(IvfIndex::new(
            3,
            IndexConfig {
                exact_threshold: 4,
                max_clusters: 4,
                kmeans_iterations: 2,
            },
        ));
        let store = RecordStore::new(index.clone(), 100);
        for i in 0..10 {
            store
                .put(record(&format!("r{}", i), Status::Approved, i + 1))
                .unwrap();
        }
        assert!(index.cluster_count() > 0);
        assert_eq!(store.index().len(), 10);
    }

    #[test]
    fn test_open_restores_records_and_clock() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("snapshot.json");
        let mut config = LedgerConfig::default();
        config.embedding.dimensions = 3;

        {
            let store = RecordStore::open(&config, &path).unwrap();
            assert!(store.is_empty());
            let t1 = store.next_created_at();
            let t2 = store.next_created_at();
            store.put(record("a", Status::Approved, t1)).unwrap();
            store.put(record("b", Status::Declined, t2)).unwrap();
            store.teardown().unwrap();
        }

        let reopened = RecordStore::open(&config, &path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.index().len(), 2);
        let ids: Vec<String> = reopened.all().unwrap().iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(reopened.next_created_at() > 2);
    }

    #[test]
    fn test_open_rejects_dimension_change() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("snapshot.json");
        let mut config = LedgerConfig::default();
        config.embedding.dimensions = 3;
        {
            let store = RecordStore::open(&config, &path).unwrap();
            store.put(record("a", Status::Approved, 1)).unwrap();
            store.save_snapshot().unwrap();
        }

        config.embedding.dimensions = 8;
        assert!(matches!(
            RecordStore::open(&config, &path),
            Err(AppError::Config(_))
        ));
    }
}
