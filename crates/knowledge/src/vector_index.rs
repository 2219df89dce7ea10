//! Vector index abstraction.
//!
//! The index is a derived projection of the record store: it only holds ids,
//! vectors and publication timestamps, and can always be rebuilt from the
//! store's records.

use crate::types::RecordRef;
use reimburse_core::AppResult;
use std::collections::HashSet;

/// Search tuning for a single query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchParams {
    /// Maximum number of hits
    pub k: usize,
    /// Clusters probed before widening to reach `k` candidates
    pub nprobe: usize,
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
}

/// Shape of the index, for statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub entries: usize,
    pub clusters: usize,
}

/// Trait for vector index backends.
///
/// Implementations use interior locking: writes (`insert`, `rebuild`,
/// `clear`) are serialized while searches read the last committed state.
pub trait VectorIndex: Send + Sync {
    /// Vector dimension every entry must have.
    fn dimension(&self) -> usize;

    /// Add an entry. Inserting an existing id replaces it.
    fn insert(&self, id: &str, embedding: &[f32], created_at: u64) -> AppResult<()>;

    /// Return up to `params.k` ids ranked by cosine similarity to `query`.
    ///
    /// When `allowed` is given, only those ids are candidates. Ties are
    /// broken by newer `created_at` first, then by id.
    fn search(
        &self,
        query: &[f32],
        params: &SearchParams,
        allowed: Option<&HashSet<String>>,
    ) -> AppResult<Vec<SearchHit>>;

    /// Replace the whole index with `records`, replayed in the given order.
    fn rebuild(&self, records: &[RecordRef]) -> AppResult<()>;

    /// Run deferred upkeep such as cluster retraining.
    ///
    /// Callers invoke it without holding their own locks so the work never
    /// blocks readers of the index or the store.
    fn maintain(&self) -> AppResult<()> {
        Ok(())
    }

    /// Remove every entry.
    fn clear(&self) -> AppResult<()>;

    fn stats(&self) -> IndexStats;

    fn len(&self) -> usize {
        self.stats().entries
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
