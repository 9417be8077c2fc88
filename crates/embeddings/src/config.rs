use common::Language;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionDevice {
    Cpu,
    GpuPreferred,
}

/// Sentence model selected for a corpus language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: &'static str,
    pub default_path: &'static str,
    pub vector_dim: usize,
    pub max_sequence_length: usize,
}

impl ModelSpec {
    pub const fn for_language(language: Language) -> Self {
        match language {
            Language::German => Self {
                name: "bert-base-german-cased",
                default_path: "models/bert-base-german-cased.onnx",
                vector_dim: 768,
                max_sequence_length: 512,
            },
            Language::English => Self {
                name: "msmarco-distilbert-base-v2",
                default_path: "models/msmarco-distilbert-base-v2.onnx",
                vector_dim: 768,
                max_sequence_length: 512,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingConfig {
    pub language: Language,
    pub model_path: String,
    pub tokenizer_path: Option<String>,
    pub vector_dim: usize,
    pub max_sequence_length: usize,
    pub batch_size: usize,
    pub execution_device: ExecutionDevice,
    pub allow_pseudo_fallback: bool,
}

impl EmbeddingConfig {
    /// Resolves the model for `language` once, applying `NEWSIR_*` overrides.
    pub fn for_language(language: Language) -> Self {
        let spec = ModelSpec::for_language(language);
        let model_path =
            std::env::var("NEWSIR_MODEL_PATH").unwrap_or_else(|_| spec.default_path.to_string());
        let tokenizer_path = std::env::var("NEWSIR_TOKENIZER_PATH").ok().or_else(|| {
            let candidate = std::path::Path::new(&model_path).with_extension("tokenizer.json");
            if candidate.exists() {
                Some(candidate.display().to_string())
            } else {
                None
            }
        });
        Self {
            language,
            model_path,
            tokenizer_path,
            vector_dim: spec.vector_dim,
            max_sequence_length: spec.max_sequence_length,
            batch_size: 8,
            execution_device: ExecutionDevice::from_env(),
            allow_pseudo_fallback: std::env::var("NEWSIR_ALLOW_PSEUDO_EMBED")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(cfg!(test)),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self::for_language(Language::default())
    }
}

impl ExecutionDevice {
    pub fn from_env() -> Self {
        let raw = std::env::var("EMBEDDING_DEVICE").unwrap_or_default();
        if raw.eq_ignore_ascii_case("gpu") || raw.eq_ignore_ascii_case("cuda") {
            Self::GpuPreferred
        } else {
            Self::Cpu
        }
    }
}
