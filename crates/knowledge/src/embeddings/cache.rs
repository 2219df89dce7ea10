//! Bounded in-memory embedding cache.
//!
//! Keys are SHA-256 digests of the model name and the text, so identical
//! excerpts and repeated queries are embedded once. Eviction is FIFO.

use crate::embeddings::provider::EmbeddingProvider;
use reimburse_core::{AppError, AppResult};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

type CacheKey = [u8; 32];

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, Vec<f32>>,
    order: VecDeque<CacheKey>,
}

/// Embedding provider decorator that memoizes results.
#[derive(Debug)]
pub struct CachedEmbeddingProvider {
    inner: Arc<dyn EmbeddingProvider>,
    capacity: usize,
    state: Mutex<CacheState>,
}

impl CachedEmbeddingProvider {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, capacity: usize) -> Self {
        Self {
            inner,
            capacity,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn key(&self, text: &str) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(self.inner.model_name().as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        hasher.finalize().into()
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, CacheState>> {
        self.state
            .lock()
            .map_err(|_| AppError::Knowledge("embedding cache lock poisoned".to_string()))
    }

    /// Number of cached vectors.
    pub fn len(&self) -> usize {
        self.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for CachedEmbeddingProvider {
    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        let keys: Vec<CacheKey> = texts.iter().map(|t| self.key(t)).collect();

        let mut results: Vec<Option<Vec<f32>>> = {
            let state = self.lock()?;
            keys.iter().map(|k| state.entries.get(k).cloned()).collect()
        };

        let missing: Vec<usize> = (0..texts.len()).filter(|&i| results[i].is_none()).collect();
        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed_batch(&batch).await?;
            if fresh.len() != batch.len() {
                return Err(AppError::Knowledge(format!(
                    "Embedding provider returned {} vectors for {} texts",
                    fresh.len(),
                    batch.len()
                )));
            }

            let mut state = self.lock()?;
            for (&i, vector) in missing.iter().zip(fresh) {
                if !state.entries.contains_key(&keys[i]) {
                    state.order.push_back(keys[i]);
                    state.entries.insert(keys[i], vector.clone());
                }
                results[i] = Some(vector);
            }
            while state.order.len() > self.capacity {
                if let Some(oldest) = state.order.pop_front() {
                    state.entries.remove(&oldest);
                }
            }
        }

        tracing::trace!(
            hits = texts.len() - missing.len(),
            misses = missing.len(),
            "Embedding cache lookup"
        );

        Ok(results.into_iter().flatten().collect())
    }
}
