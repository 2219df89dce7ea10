//! Inverted-file (IVF) vector index.
//!
//! Vectors are L2-normalized on insert so cosine similarity is a plain inner
//! product. Entries are grouped into clusters around k-means centroids; a
//! search ranks the centroids against the query and scores only the entries
//! of the nearest clusters.
//!
//! Small workloads skip clustering entirely: when the index (or the allowed
//! candidate set) holds at most `exact_threshold` entries, search is an exact
//! scan.
//!
//! Training is deterministic (evenly spaced seeds, fixed iteration count), so
//! replaying the same inserts in the same order always produces the same
//! index. Clusters are retrained only when the entry count doubles past the
//! last training size. Inserts never train: [`VectorIndex::maintain`] copies
//! the vectors under a short lock, runs k-means unlocked and swaps the result
//! in, assigning entries that arrived or changed in the meantime.

use crate::config::IndexConfig;
use crate::similarity::{dot, normalize};
use crate::types::RecordRef;
use crate::vector_index::{IndexStats, SearchHit, SearchParams, VectorIndex};
use reimburse_core::{AppError, AppResult};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    vector: Vec<f32>,
    created_at: u64,
}

#[derive(Debug, Clone, Default)]
struct IvfState {
    entries: Vec<Entry>,
    positions: HashMap<String, usize>,
    centroids: Vec<Vec<f32>>,
    /// Entry positions per centroid
    lists: Vec<Vec<usize>>,
    /// Cluster of each entry, parallel to `entries`; empty until trained
    assignment: Vec<usize>,
    trained_at: usize,
    /// Bumped by `clear` and `rebuild`; a retrain of an older epoch is dropped
    epoch: u64,
    training: bool,
}

/// Entry vectors copied for a retrain.
#[derive(Debug)]
struct TrainingJob {
    epoch: u64,
    vectors: Vec<Vec<f32>>,
}

/// Centroids and per-vector clusters from one k-means run.
#[derive(Debug)]
struct Clustering {
    centroids: Vec<Vec<f32>>,
    assignment: Vec<usize>,
}

/// In-memory IVF index with single-writer / multi-reader locking.
#[derive(Debug)]
pub struct IvfIndex {
    dimension: usize,
    settings: IndexConfig,
    state: RwLock<IvfState>,
}

impl IvfIndex {
    pub fn new(dimension: usize, settings: IndexConfig) -> Self {
        Self {
            dimension,
            settings,
            state: RwLock::new(IvfState::default()),
        }
    }

    fn read(&self) -> AppResult<RwLockReadGuard<'_, IvfState>> {
        self.state
            .read()
            .map_err(|_| AppError::Knowledge("vector index lock poisoned".to_string()))
    }

    fn write(&self) -> AppResult<RwLockWriteGuard<'_, IvfState>> {
        self.state
            .write()
            .map_err(|_| AppError::Knowledge("vector index lock poisoned".to_string()))
    }

    fn check_dimension(&self, vector: &[f32], what: &str) -> AppResult<()> {
        if vector.len() != self.dimension {
            return Err(AppError::InvalidRecord(format!(
                "{} has dimension {}, index expects {}",
                what,
                vector.len(),
                self.dimension
            )));
        }
        Ok(())
    }

    fn insert_into(&self, state: &mut IvfState, id: &str, embedding: &[f32], created_at: u64) {
        let mut vector = embedding.to_vec();
        normalize(&mut vector);

        if let Some(&pos) = state.positions.get(id) {
            tracing::warn!(id = %id, "Replacing existing vector index entry");
            state.entries[pos].vector = vector;
            state.entries[pos].created_at = created_at;

            if !state.centroids.is_empty() {
                let old = state.assignment[pos];
                state.lists[old].retain(|&p| p != pos);
                let cluster = nearest_centroid(&state.centroids, &state.entries[pos].vector);
                state.assignment[pos] = cluster;
                state.lists[cluster].push(pos);
            }
            return;
        }

        let pos = state.entries.len();
        state.entries.push(Entry {
            id: id.to_string(),
            vector,
            created_at,
        });
        state.positions.insert(id.to_string(), pos);

        if !state.centroids.is_empty() {
            let cluster = nearest_centroid(&state.centroids, &state.entries[pos].vector);
            state.assignment.push(cluster);
            state.lists[cluster].push(pos);
        }
    }

    fn retrain_due(&self, state: &IvfState) -> bool {
        let len = state.entries.len();
        len > self.settings.exact_threshold && len >= state.trained_at.saturating_mul(2)
    }

    /// Run k-means over `vectors`. Touches no index state.
    fn kmeans(&self, vectors: &[Vec<f32>]) -> Clustering {
        let n = vectors.len();
        let clusters = ((n as f64).sqrt().round() as usize).clamp(1, self.settings.max_clusters.max(1));

        let mut centroids: Vec<Vec<f32>> =
            (0..clusters).map(|i| vectors[i * n / clusters].clone()).collect();
        let mut assignment = vec![0usize; n];

        for _ in 0..self.settings.kmeans_iterations.max(1) {
            for (pos, vector) in vectors.iter().enumerate() {
                assignment[pos] = nearest_centroid(&centroids, vector);
            }

            let mut sums = vec![vec![0.0f32; self.dimension]; clusters];
            let mut counts = vec![0usize; clusters];
            for (pos, vector) in vectors.iter().enumerate() {
                let c = assignment[pos];
                counts[c] += 1;
                for (s, x) in sums[c].iter_mut().zip(vector) {
                    *s += x;
                }
            }

            for (c, sum) in sums.into_iter().enumerate() {
                // Empty clusters keep their previous centroid
                if counts[c] > 0 {
                    let mut centroid = sum;
                    normalize(&mut centroid);
                    centroids[c] = centroid;
                }
            }
        }

        for (pos, vector) in vectors.iter().enumerate() {
            assignment[pos] = nearest_centroid(&centroids, vector);
        }

        Clustering {
            centroids,
            assignment,
        }
    }

    /// Swap `clustering` into `state`.
    ///
    /// `trained` holds the vectors the clustering was computed from, a prefix
    /// of the current entries. Entries past it or replaced since are assigned
    /// to their nearest new centroid.
    fn install(state: &mut IvfState, clustering: Clustering, trained: &[Vec<f32>]) {
        let Clustering {
            centroids,
            mut assignment,
        } = clustering;

        for (pos, entry) in state.entries.iter().enumerate() {
            match trained.get(pos) {
                Some(seen) if *seen == entry.vector => {}
                Some(_) => assignment[pos] = nearest_centroid(&centroids, &entry.vector),
                None => assignment.push(nearest_centroid(&centroids, &entry.vector)),
            }
        }

        let mut lists = vec![Vec::new(); centroids.len()];
        for (pos, &c) in assignment.iter().enumerate() {
            lists[c].push(pos);
        }

        tracing::debug!(
            entries = state.entries.len(),
            trained = trained.len(),
            clusters = centroids.len(),
            "Trained vector index clusters"
        );

        state.centroids = centroids;
        state.lists = lists;
        state.assignment = assignment;
        state.trained_at = trained.len();
    }

    /// Train in place, for states no reader can see yet.
    fn train_now(&self, state: &mut IvfState) {
        let vectors: Vec<Vec<f32>> = state.entries.iter().map(|e| e.vector.clone()).collect();
        let clustering = self.kmeans(&vectors);
        Self::install(state, clustering, &vectors);
    }

    /// Claim a due retrain and copy the vectors it runs on.
    ///
    /// Returns `None` when no retrain is due or another one is running.
    fn begin_training(&self) -> AppResult<Option<TrainingJob>> {
        let mut state = self.write()?;
        if state.training || !self.retrain_due(&state) {
            return Ok(None);
        }
        state.training = true;
        Ok(Some(TrainingJob {
            epoch: state.epoch,
            vectors: state.entries.iter().map(|e| e.vector.clone()).collect(),
        }))
    }

    fn finish_training(&self, job: TrainingJob, clustering: Clustering) -> AppResult<()> {
        let mut state = self.write()?;
        if state.epoch != job.epoch {
            tracing::debug!("Dropped retrain of a cleared or rebuilt index");
            return Ok(());
        }
        state.training = false;
        Self::install(&mut state, clustering, &job.vectors);
        Ok(())
    }

    /// Entry positions to score for this query.
    fn candidates(
        &self,
        state: &IvfState,
        query: &[f32],
        params: &SearchParams,
        allowed: Option<&HashSet<String>>,
    ) -> Vec<usize> {
        if let Some(allowed) = allowed {
            if allowed.len() <= self.settings.exact_threshold {
                return allowed
                    .iter()
                    .filter_map(|id| state.positions.get(id).copied())
                    .collect();
            }
        }

        let permitted = |pos: &usize| match allowed {
            Some(set) => set.contains(&state.entries[*pos].id),
            None => true,
        };

        if state.centroids.is_empty() || state.entries.len() <= self.settings.exact_threshold {
            return (0..state.entries.len()).filter(permitted).collect();
        }

        let mut ranked: Vec<(usize, f32)> = state
            .centroids
            .iter()
            .enumerate()
            .map(|(c, centroid)| (c, dot(centroid, query) + 0.0))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let nprobe = params.nprobe.max(1);
        let mut out = Vec::new();
        for (probed, (cluster, _)) in ranked.iter().enumerate() {
            if probed >= nprobe && out.len() >= params.k {
                break;
            }
            out.extend(state.lists[*cluster].iter().copied().filter(permitted));
        }
        out
    }

    /// Number of clusters currently trained.
    pub fn cluster_count(&self) -> usize {
        self.read().map(|s| s.centroids.len()).unwrap_or(0)
    }
}

fn nearest_centroid(centroids: &[Vec<f32>], vector: &[f32]) -> usize {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (c, centroid) in centroids.iter().enumerate() {
        let score = dot(centroid, vector);
        if score > best_score {
            best = c;
            best_score = score;
        }
    }
    best
}

/// Score descending, then newer first, then id ascending.
fn rank(a: &(f32, &Entry), b: &(f32, &Entry)) -> Ordering {
    b.0.total_cmp(&a.0)
        .then(b.1.created_at.cmp(&a.1.created_at))
        .then_with(|| a.1.id.cmp(&b.1.id))
}

impl VectorIndex for IvfIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn insert(&self, id: &str, embedding: &[f32], created_at: u64) -> AppResult<()> {
        self.check_dimension(embedding, "embedding")?;
        let mut state = self.write()?;
        self.insert_into(&mut state, id, embedding, created_at);
        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        params: &SearchParams,
        allowed: Option<&HashSet<String>>,
    ) -> AppResult<Vec<SearchHit>> {
        self.check_dimension(query, "query")?;
        if params.k == 0 {
            return Ok(Vec::new());
        }

        let mut query = query.to_vec();
        normalize(&mut query);

        let state = self.read()?;
        let candidates = self.candidates(&state, &query, params, allowed);

        let mut scored: Vec<(f32, &Entry)> = candidates
            .into_iter()
            .map(|pos| {
                let entry = &state.entries[pos];
                // `+ 0.0` folds -0.0 into 0.0 so equal scores tie
                (dot(&entry.vector, &query) + 0.0, entry)
            })
            .collect();
        scored.sort_by(rank);
        scored.truncate(params.k);

        Ok(scored
            .into_iter()
            .map(|(score, entry)| SearchHit {
                id: entry.id.clone(),
                score,
            })
            .collect())
    }

    fn rebuild(&self, records: &[RecordRef]) -> AppResult<()> {
        let mut fresh = IvfState::default();
        for record in records {
            self.check_dimension(&record.embedding, "embedding")?;
            self.insert_into(&mut fresh, &record.id, &record.embedding, record.created_at);
            if self.retrain_due(&fresh) {
                self.train_now(&mut fresh);
            }
        }

        let mut state = self.write()?;
        fresh.epoch = state.epoch + 1;
        *state = fresh;
        tracing::info!(
            entries = state.entries.len(),
            clusters = state.centroids.len(),
            "Rebuilt vector index"
        );
        Ok(())
    }

    fn maintain(&self) -> AppResult<()> {
        let Some(job) = self.begin_training()? else {
            return Ok(());
        };
        let clustering = self.kmeans(&job.vectors);
        self.finish_training(job, clustering)
    }

    fn clear(&self) -> AppResult<()> {
        let mut state = self.write()?;
        let epoch = state.epoch + 1;
        *state = IvfState {
            epoch,
            ..IvfState::default()
        };
        Ok(())
    }

    fn stats(&self) -> IndexStats {
        self.read()
            .map(|s| IndexStats {
                entries: s.entries.len(),
                clusters: s.centroids.len(),
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(exact_threshold: usize) -> IndexConfig {
        IndexConfig {
            exact_threshold,
            max_clusters: 16,
            kmeans_iterations: 6,
        }
    }

    /// Deterministic pseudo-random vectors (xorshift).
    fn vectors(count: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut s = seed.max(1);
        let mut next = || {
            s ^= s << 13;
            s ^= s >> 7;
            s ^= s << 17;
            (s % 2000) as f32 / 1000.0 - 1.0
        };
        (0..count).map(|_| (0..dim).map(|_| next()).collect()).collect()
    }

    fn filled(count: usize, exact_threshold: usize) -> (IvfIndex, Vec<Vec<f32>>) {
        let index = IvfIndex::new(8, settings(exact_threshold));
        let data = vectors(count, 8, 42);
        for (i, v) in data.iter().enumerate() {
            index.insert(&format!("r{:04}", i), v, i as u64).unwrap();
            index.maintain().unwrap();
        }
        (index, data)
    }

    fn exact_top(data: &[Vec<f32>], query: &[f32], k: usize) -> Vec<String> {
        let q = crate::similarity::normalized(query);
        let mut scored: Vec<(f32, usize)> = data
            .iter()
            .enumerate()
            .map(|(i, v)| (dot(&crate::similarity::normalized(v), &q), i))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));
        scored
            .into_iter()
            .take(k)
            .map(|(_, i)| format!("r{:04}", i))
            .collect()
    }

    #[test]
    fn test_exact_below_threshold() {
        let (index, data) = filled(50, 100);
        assert_eq!(index.cluster_count(), 0);

        let params = SearchParams { k: 5, nprobe: 1 };
        let hits = index.search(&data[7], &params, None).unwrap();
        let ids: Vec<String> = hits.into_iter().map(|h| h.id).collect();
        assert_eq!(ids, exact_top(&data, &data[7], 5));
    }

    #[test]
    fn test_trains_past_threshold_and_doubles() {
        let (index, _) = filled(65, 32);
        // Trained at 33, then again at 66 would be next
        let state = index.read().unwrap();
        assert_eq!(state.trained_at, 33);
        assert!(!state.centroids.is_empty());
        let listed: usize = state.lists.iter().map(Vec::len).sum();
        assert_eq!(listed, 65);
    }

    #[test]
    fn test_recall_monotonic_in_nprobe() {
        let (index, data) = filled(400, 32);
        let clusters = index.cluster_count();
        assert!(clusters > 1);

        let queries = vectors(10, 8, 7);
        let k = 10;
        let mut previous = 0usize;
        for nprobe in 1..=clusters {
            let params = SearchParams { k, nprobe };
            let mut found = 0;
            for q in &queries {
                let truth: HashSet<String> = exact_top(&data, q, k).into_iter().collect();
                let hits = index.search(q, &params, None).unwrap();
                assert!(hits.len() <= k);
                found += hits.iter().filter(|h| truth.contains(&h.id)).count();
            }
            assert!(found >= previous, "recall dropped at nprobe={}", nprobe);
            previous = found;
        }
        // Probing every cluster is exhaustive
        assert_eq!(previous, queries.len() * k);
    }

    #[test]
    fn test_allowed_set_restricts_results() {
        let (index, data) = filled(300, 32);
        let allowed: HashSet<String> = ["r0003", "r0150", "r0299"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let params = SearchParams { k: 10, nprobe: 1 };
        let hits = index.search(&data[0], &params, Some(&allowed)).unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| allowed.contains(&h.id)));
    }

    #[test]
    fn test_large_allowed_set_still_reaches_k() {
        let (index, data) = filled(300, 16);
        let allowed: HashSet<String> = (0..300)
            .filter(|i| i % 2 == 0)
            .map(|i| format!("r{:04}", i))
            .collect();

        let params = SearchParams { k: 20, nprobe: 1 };
        let hits = index.search(&data[5], &params, Some(&allowed)).unwrap();
        assert_eq!(hits.len(), 20);
        assert!(hits.iter().all(|h| allowed.contains(&h.id)));
    }

    #[test]
    fn test_ties_prefer_newer_then_id() {
        let index = IvfIndex::new(2, settings(100));
        index.insert("b-old", &[1.0, 0.0], 1).unwrap();
        index.insert("a-new", &[2.0, 0.0], 5).unwrap();
        index.insert("c-new", &[3.0, 0.0], 5).unwrap();

        let params = SearchParams { k: 3, nprobe: 1 };
        let ids: Vec<String> = index
            .search(&[1.0, 0.0], &params, None)
            .unwrap()
            .into_iter()
            .map(|h| h.id)
            .collect();
        assert_eq!(ids, vec!["a-new", "c-new", "b-old"]);
    }

    #[test]
    fn test_signed_zero_scores_tie() {
        let index = IvfIndex::new(2, settings(100));
        index.insert("older", &[0.0, 1.0], 1).unwrap();
        index.insert("newer", &[0.0, -1.0], 2).unwrap();

        let params = SearchParams { k: 2, nprobe: 1 };
        let hits = index.search(&[-1.0, 0.0], &params, None).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["newer", "older"]);
        assert!(hits.iter().all(|h| h.score == 0.0 && h.score.is_sign_positive()));
    }

    #[test]
    fn test_insert_defers_training_to_maintain() {
        let index = IvfIndex::new(8, settings(16));
        for (i, v) in vectors(40, 8, 3).iter().enumerate() {
            index.insert(&format!("r{:04}", i), v, i as u64).unwrap();
        }
        assert_eq!(index.cluster_count(), 0);

        index.maintain().unwrap();
        assert!(index.cluster_count() > 0);
        assert_eq!(index.read().unwrap().trained_at, 40);
    }

    #[test]
    fn test_retrain_leaves_index_usable_and_assigns_late_entries() {
        let index = IvfIndex::new(8, settings(32));
        let data = vectors(80, 8, 42);
        for (i, v) in data.iter().take(40).enumerate() {
            index.insert(&format!("r{:04}", i), v, i as u64).unwrap();
        }

        let job = index.begin_training().unwrap().expect("retrain is due");
        assert!(index.begin_training().unwrap().is_none());

        // Searches and inserts proceed while the clusters are computed
        let params = SearchParams { k: 5, nprobe: 1 };
        assert_eq!(index.search(&data[3], &params, None).unwrap().len(), 5);
        for (i, v) in data.iter().enumerate().skip(40) {
            index.insert(&format!("r{:04}", i), v, i as u64).unwrap();
        }
        index.insert("r0000", &data[79], 80).unwrap();

        let clustering = index.kmeans(&job.vectors);
        index.finish_training(job, clustering).unwrap();

        let state = index.read().unwrap();
        assert_eq!(state.trained_at, 40);
        assert!(!state.training);
        assert_eq!(state.assignment.len(), 80);
        let listed: usize = state.lists.iter().map(Vec::len).sum();
        assert_eq!(listed, 80);
        for (pos, entry) in state.entries.iter().enumerate() {
            assert_eq!(
                state.assignment[pos],
                nearest_centroid(&state.centroids, &entry.vector)
            );
        }
    }

    #[test]
    fn test_retrain_of_cleared_index_is_dropped() {
        let index = IvfIndex::new(8, settings(16));
        for (i, v) in vectors(40, 8, 5).iter().enumerate() {
            index.insert(&format!("r{:04}", i), v, i as u64).unwrap();
        }

        let job = index.begin_training().unwrap().expect("retrain is due");
        index.clear().unwrap();
        let clustering = index.kmeans(&job.vectors);
        index.finish_training(job, clustering).unwrap();

        assert_eq!(
            index.stats(),
            IndexStats {
                entries: 0,
                clusters: 0
            }
        );
    }

    #[test]
    fn test_duplicate_insert_last_write_wins() {
        let index = IvfIndex::new(2, settings(100));
        index.insert("x", &[1.0, 0.0], 1).unwrap();
        index.insert("x", &[0.0, 1.0], 2).unwrap();
        assert_eq!(index.len(), 1);

        let params = SearchParams { k: 1, nprobe: 1 };
        let hits = index.search(&[0.0, 1.0], &params, None).unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let index = IvfIndex::new(4, settings(10));
        assert!(matches!(
            index.insert("x", &[1.0, 0.0], 0),
            Err(AppError::InvalidRecord(_))
        ));
        let params = SearchParams { k: 1, nprobe: 1 };
        assert!(index.search(&[1.0], &params, None).is_err());
    }

    #[test]
    fn test_clear() {
        let (index, _) = filled(40, 16);
        index.clear().unwrap();
        assert!(index.is_empty());
        assert_eq!(index.cluster_count(), 0);
    }
}
