//! Embedding engine for the ledger.
//!
//! Provides provider-agnostic embedding generation. Providers are selected by
//! [`EmbeddingConfig::provider`] and optionally wrapped in a bounded cache.

pub mod cache;
pub mod config;
pub mod provider;
pub mod providers;

pub use cache::CachedEmbeddingProvider;
pub use config::EmbeddingConfig;
pub use provider::{create_provider, EmbeddingProvider};
