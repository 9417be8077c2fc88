use std::{path::Path, sync::Arc};

use anyhow::Context;
use common::{AppConfig, DocumentStore};
use embeddings::{CachedEmbedder, EmbeddingConfig, EmbeddingEngine};
use ranking::{FeaturePipeline, RecallEvaluator};
use search_core::{KeywordExtractor, RetrievalFusion, TantivyDocumentStore, VectorStorage};

const EMBEDDING_CACHE_ENTRIES: usize = 4_096;

/// Collaborators wired from one [`AppConfig`].
pub struct Engine {
    pub config: AppConfig,
    pub store: Arc<TantivyDocumentStore>,
    pub keywords: Arc<KeywordExtractor>,
    pub embedder: Arc<CachedEmbedder>,
}

impl Engine {
    pub fn open(config: AppConfig) -> anyhow::Result<Self> {
        let store = Arc::new(TantivyDocumentStore::open_or_create_on_disk(
            Path::new(&config.index_dir),
            config.language,
        )?);
        let keywords = Arc::new(KeywordExtractor::new(
            store.clone(),
            config.keywords.fields.clone(),
        ));
        let engine = EmbeddingEngine::new(EmbeddingConfig {
            vector_dim: config.ann.dim,
            ..EmbeddingConfig::for_language(config.language)
        });
        tracing::info!(
            language = config.language.code(),
            pseudo = engine.is_pseudo(),
            device = engine.device_mode(),
            "embedding engine ready"
        );
        let embedder = Arc::new(CachedEmbedder::new(Arc::new(engine), EMBEDDING_CACHE_ENTRIES));
        Ok(Self {
            config,
            store,
            keywords,
            embedder,
        })
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    pub fn open_vectors(&self, path: Option<&Path>) -> anyhow::Result<Arc<VectorStorage>> {
        let path = path.unwrap_or_else(|| Path::new(&self.config.vector_path));
        let vectors = VectorStorage::open(Some(path), self.config.ann.clone())
            .with_context(|| format!("failed to open vector storage {}", path.display()))?;
        Ok(Arc::new(vectors))
    }

    pub fn fusion(&self, vectors: Arc<VectorStorage>) -> Arc<RetrievalFusion> {
        Arc::new(RetrievalFusion::new(
            self.store(),
            self.keywords.clone(),
            self.embedder.clone(),
            vectors,
        ))
    }

    pub fn evaluator(&self, vectors: Arc<VectorStorage>) -> RecallEvaluator {
        RecallEvaluator::new(
            self.store(),
            self.fusion(vectors),
            self.config.retrieval.relevance_cutoff,
        )
    }

    pub fn log_cache_stats(&self) {
        let stats = self.embedder.stats();
        tracing::info!(hits = stats.hits, misses = stats.misses, "embedding cache");
    }

    pub fn features(&self) -> FeaturePipeline {
        FeaturePipeline::new(self.store(), self.keywords.clone(), self.embedder.clone())
    }
}
