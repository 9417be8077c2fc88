use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{FieldTermConfig, Language};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub language: Language,
    pub index_dir: String,
    pub vector_path: String,
    pub ann: AnnConfig,
    pub keywords: KeywordConfig,
    pub retrieval: RetrievalConfig,
    pub training: TrainingConfig,
}

/// Graph and query parameters of the vector storage. `ef` must stay above
/// every `k` the caller requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AnnConfig {
    pub dim: usize,
    pub max_elements: usize,
    pub ef_construction: usize,
    pub m: usize,
    pub ef: usize,
    pub num_threads: usize,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KeywordConfig {
    pub fields: Vec<FieldTermConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub lexical_size: usize,
    pub semantic_size: usize,
    pub relevance_cutoff: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    pub split_ratio: f64,
    pub seed: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            language: Language::German,
            index_dir: "data/index".to_string(),
            vector_path: "data/storage.bin".to_string(),
            ann: AnnConfig::default(),
            keywords: KeywordConfig::default(),
            retrieval: RetrievalConfig::default(),
            training: TrainingConfig::default(),
        }
    }
}

impl Default for AnnConfig {
    fn default() -> Self {
        Self {
            dim: 768,
            max_elements: 20_000,
            ef_construction: 200,
            m: 100,
            ef: 150,
            num_threads: 0,
            batch_size: 1_000,
        }
    }
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            fields: vec![FieldTermConfig::title_default(), FieldTermConfig::body_default()],
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            lexical_size: 200,
            semantic_size: 100,
            relevance_cutoff: 4,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            split_ratio: 0.7,
            seed: 42,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let mut cfg = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed reading config file: {}", path.display()))?;
            toml::from_str::<Self>(&raw)
                .with_context(|| format!("failed parsing config file: {}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(lang) = std::env::var("NEWSIR_LANGUAGE") {
            cfg.language = Language::from_name(&lang)
                .with_context(|| format!("unsupported NEWSIR_LANGUAGE: {lang}"))?;
        }
        if let Ok(dir) = std::env::var("NEWSIR_INDEX_DIR") {
            cfg.index_dir = dir;
        }
        if let Ok(vectors) = std::env::var("NEWSIR_VECTOR_PATH") {
            cfg.vector_path = vectors;
        }
        if let Ok(max) = std::env::var("NEWSIR_MAX_ELEMENTS") {
            cfg.ann.max_elements = max.parse().unwrap_or(cfg.ann.max_elements);
        }
        if let Ok(ef) = std::env::var("NEWSIR_EF") {
            cfg.ann.ef = ef.parse().unwrap_or(cfg.ann.ef);
        }
        if let Ok(threads) = std::env::var("NEWSIR_NUM_THREADS") {
            cfg.ann.num_threads = threads.parse().unwrap_or(cfg.ann.num_threads);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects settings that would silently produce wrong recall numbers.
    pub fn validate(&self) -> Result<()> {
        if self.retrieval.semantic_size > self.ann.ef {
            anyhow::bail!(
                "semantic_size {} exceeds ann.ef {}; raise ef above the largest k",
                self.retrieval.semantic_size,
                self.ann.ef
            );
        }
        if self.ann.dim == 0 || self.ann.m < 2 || self.ann.batch_size == 0 {
            anyhow::bail!("ann.dim, ann.batch_size must be positive and ann.m at least 2");
        }
        if !(0.0..=1.0).contains(&self.training.split_ratio) {
            anyhow::bail!(
                "training.split_ratio must be within [0, 1], got {}",
                self.training.split_ratio
            );
        }
        if self.keywords.fields.is_empty() {
            anyhow::bail!("keywords.fields must name at least one field");
        }
        Ok(())
    }
}
