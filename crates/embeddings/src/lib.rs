pub mod cache;
pub mod config;
pub mod embedder;
pub mod engine;

pub use cache::{CacheStats, CachedEmbedder};
pub use config::{EmbeddingConfig, ExecutionDevice, ModelSpec};
pub use embedder::{Embedder, cosine_similarity};
pub use engine::EmbeddingEngine;
