//! Offline trigram embedding provider.

use crate::embeddings::provider::EmbeddingProvider;
use crate::similarity::normalize;
use reimburse_core::AppResult;
use std::collections::HashMap;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "this", "that", "are", "was", "were", "have", "has",
    "had", "its", "their", "they", "them", "which", "but", "not", "per", "all", "any",
];

/// Hashed character-trigram embeddings for local, offline operation.
///
/// Each token contributes to the bucket of its whole-word hash and to one
/// bucket per character trigram, so spelling variants ("reimburse",
/// "reimbursed") land close together. Identical input always produces the
/// identical vector. Numbers are kept as tokens, which lets amounts and
/// dates influence similarity.
#[derive(Debug)]
pub struct TrigramProvider {
    dimensions: usize,
}

impl TrigramProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn bucket(&self, bytes: &[u8], multiplier: u64) -> usize {
        let hash = bytes
            .iter()
            .fold(0xcbf2_9ce4_8422_2325u64, |acc, &b| {
                acc.wrapping_mul(multiplier).wrapping_add(u64::from(b))
            });
        (hash % self.dimensions as u64) as usize
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];
        if self.dimensions == 0 {
            return embedding;
        }

        let lower = text.to_lowercase();
        let mut frequencies: HashMap<&str, u32> = HashMap::new();
        for token in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty() && (t.chars().count() > 2 || t.chars().all(|c| c.is_ascii_digit())))
            .filter(|t| !STOP_WORDS.contains(t))
        {
            *frequencies.entry(token).or_insert(0) += 1;
        }

        for (token, count) in frequencies {
            let weight = (count as f32).sqrt();
            let chars: Vec<char> = token.chars().collect();

            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                embedding[self.bucket(trigram.as_bytes(), 37)] += weight;
            }

            embedding[self.bucket(token.as_bytes(), 31)] += count as f32;
        }

        normalize(&mut embedding);
        embedding
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for TrigramProvider {
    fn provider_name(&self) -> &str {
        "trigram"
    }

    fn model_name(&self) -> &str {
        "trigram-v1"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.vectorize(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::{cosine, l2_norm};

    #[tokio::test]
    async fn test_unit_length_and_dimensions() {
        let provider = TrigramProvider::new(256);
        let embedding = provider
            .embed("Hotel stay in Berlin, 2 nights, 240 EUR")
            .await
            .unwrap();

        assert_eq!(embedding.len(), 256);
        assert!((l2_norm(&embedding) - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_deterministic() {
        let provider = TrigramProvider::new(128);
        let a = provider.embed("Taxi to client office").await.unwrap();
        let b = provider.embed("Taxi to client office").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_related_texts_score_higher() {
        let provider = TrigramProvider::new(384);
        let query = provider.embed("declined hotel invoices").await.unwrap();
        let hotel = provider
            .embed("Status: Declined. Hotel invoice exceeds nightly cap")
            .await
            .unwrap();
        let meal = provider
            .embed("Status: Approved. Team lunch within meal allowance")
            .await
            .unwrap();

        assert!(cosine(&query, &hotel) > cosine(&query, &meal));
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let provider = TrigramProvider::new(64);
        let embedding = provider.embed("").await.unwrap();
        assert_eq!(embedding.len(), 64);
        assert!(embedding.iter().all(|&x| x == 0.0));
    }

    #[tokio::test]
    async fn test_utf8_safety() {
        let provider = TrigramProvider::new(64);
        let embedding = provider
            .embed("Übernachtung München 🏨 für Schulung")
            .await
            .unwrap();
        assert!((l2_norm(&embedding) - 1.0).abs() < 1e-3);
    }
}
