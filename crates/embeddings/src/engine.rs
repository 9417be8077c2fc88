use std::{collections::HashMap, path::Path, sync::Arc};

use anyhow::{Context, Result, anyhow};
use ort::{session::Session, value::Tensor};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokenizers::{EncodeInput, Tokenizer};

use crate::{
    Embedder,
    config::{EmbeddingConfig, ExecutionDevice},
};

/// Sentence encoder for the configured language model.
///
/// Falls back to a deterministic hashed bag-of-words encoder when
/// `allow_pseudo_fallback` is set, so pipelines can run without model files.
pub struct EmbeddingEngine {
    config: EmbeddingConfig,
    device_used: ExecutionDevice,
    backend: EmbeddingBackend,
}

enum EmbeddingBackend {
    Onnx(OnnxBackend),
    Pseudo,
    Unavailable(String),
}

struct OnnxBackend {
    session: Mutex<Session>,
    tokenizer: Option<Arc<Tokenizer>>,
}

struct EncodedBatch {
    input_ids: Vec<i64>,
    attention_mask: Vec<i64>,
    batch_size: usize,
    seq_len: usize,
}

impl EmbeddingEngine {
    pub fn new(config: EmbeddingConfig) -> Self {
        let device_used = resolve_device(config.execution_device);
        let backend = match build_backend(&config) {
            Ok(backend) => backend,
            Err(err) => {
                tracing::warn!(
                    model = %config.model_path,
                    error = %err,
                    "embedding model unavailable"
                );
                EmbeddingBackend::Unavailable(err.to_string())
            }
        };
        Self {
            config,
            device_used,
            backend,
        }
    }

    pub const fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    pub const fn device_mode(&self) -> &'static str {
        match self.device_used {
            ExecutionDevice::Cpu => "cpu",
            ExecutionDevice::GpuPreferred => "gpu",
        }
    }

    pub const fn is_pseudo(&self) -> bool {
        matches!(self.backend, EmbeddingBackend::Pseudo)
    }

    pub fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        match &self.backend {
            EmbeddingBackend::Onnx(backend) => {
                let mut out = Vec::with_capacity(inputs.len());
                for chunk in inputs.chunks(self.config.batch_size.max(1)) {
                    out.extend(backend.embed_batch(chunk, &self.config)?);
                }
                Ok(out)
            }
            EmbeddingBackend::Pseudo => Ok(inputs
                .iter()
                .map(|input| pseudo_embed(input, self.config.vector_dim))
                .collect::<Vec<_>>()),
            EmbeddingBackend::Unavailable(msg) => Err(anyhow!(
                "embedding unavailable: {msg}. set NEWSIR_ALLOW_PSEUDO_EMBED=true only for local test scaffolding"
            )),
        }
    }
}

impl Embedder for EmbeddingEngine {
    fn dim(&self) -> usize {
        self.config.vector_dim
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| anyhow!("embedding model returned no vector"))
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_batch(texts)
    }
}

impl OnnxBackend {
    fn embed_batch(&self, inputs: &[String], cfg: &EmbeddingConfig) -> Result<Vec<Vec<f32>>> {
        let encoded = encode_inputs(inputs, cfg, self.tokenizer.as_ref())?;
        let mut session = self.session.lock();

        let shape = vec![encoded.batch_size as i64, encoded.seq_len as i64];
        let ids_tensor = Tensor::<i64>::from_array((shape.clone(), encoded.input_ids.clone()))?;
        let mask_tensor =
            Tensor::<i64>::from_array((shape.clone(), encoded.attention_mask.clone()))?;
        let token_type_tensor = Tensor::<i64>::from_array((
            shape,
            vec![0i64; encoded.batch_size * encoded.seq_len],
        ))?;

        let mut model_inputs = HashMap::new();
        for input in session.inputs() {
            let name = input.name().to_lowercase();
            let value = if name.contains("attention") && name.contains("mask") {
                mask_tensor.clone().upcast()
            } else if name.contains("token_type") {
                token_type_tensor.clone().upcast()
            } else {
                ids_tensor.clone().upcast()
            };
            model_inputs.insert(input.name().to_string(), value);
        }

        let mut outputs = session.run(model_inputs)?;
        let first_key = outputs
            .keys()
            .next()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("embedding model returned no outputs"))?;
        let output = outputs
            .remove(first_key)
            .ok_or_else(|| anyhow!("embedding model output extraction failed"))?;
        let (shape, values) = output
            .try_extract_tensor::<f32>()
            .map_err(|err| anyhow!("embedding output decode failed: {err}"))?;

        mean_pool(
            shape,
            values,
            &encoded,
            cfg.vector_dim,
        )
    }
}

/// Masked mean pooling over the token axis. Rank-2 outputs are taken as
/// already pooled sentence vectors.
fn mean_pool(
    shape: &[i64],
    values: &[f32],
    encoded: &EncodedBatch,
    target_dim: usize,
) -> Result<Vec<Vec<f32>>> {
    let batch_size = encoded.batch_size;
    let seq_len = encoded.seq_len;
    if shape.len() < 2 {
        return Err(anyhow!(
            "embedding output rank {} is unsupported",
            shape.len()
        ));
    }
    if shape[0] <= 0 {
        return Err(anyhow!(
            "embedding output batch dimension is invalid: {}",
            shape[0]
        ));
    }

    let hidden = usize::try_from(shape[shape.len() - 1]).unwrap_or(0);
    if hidden == 0 {
        return Err(anyhow!("embedding output hidden dimension is invalid"));
    }

    if shape.len() == 2 {
        if values.len() < batch_size * hidden {
            return Err(anyhow!(
                "embedding output tensor too small for expected shape {batch_size}x{hidden}"
            ));
        }
        return Ok(values
            .chunks(hidden)
            .take(batch_size)
            .map(|row| fit_vector_dim(row, target_dim))
            .collect());
    }

    let model_seq_len = usize::try_from(shape[shape.len() - 2]).unwrap_or(seq_len);
    if values.len() < batch_size * model_seq_len * hidden {
        return Err(anyhow!("embedding output tensor too small for pooled decoding"));
    }

    let mut out = Vec::with_capacity(batch_size);
    for batch in 0..batch_size {
        let mut pooled = vec![0.0f32; hidden];
        let mut denom = 0.0f32;
        for token in 0..model_seq_len {
            let mask_index = batch * seq_len + token.min(seq_len.saturating_sub(1));
            if encoded.attention_mask.get(mask_index).copied().unwrap_or(0) == 0 {
                continue;
            }
            denom += 1.0;
            let base = (batch * model_seq_len + token) * hidden;
            for (slot, value) in pooled.iter_mut().zip(&values[base..base + hidden]) {
                *slot += value;
            }
        }
        if denom > 0.0 {
            for value in &mut pooled {
                *value /= denom;
            }
        }
        out.push(fit_vector_dim(&pooled, target_dim));
    }
    Ok(out)
}

fn fit_vector_dim(values: &[f32], target_dim: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; target_dim];
    let n = values.len().min(target_dim);
    out[..n].copy_from_slice(&values[..n]);
    out
}

fn build_backend(config: &EmbeddingConfig) -> Result<EmbeddingBackend> {
    let model_path = Path::new(&config.model_path);
    if !model_path.exists() {
        if config.allow_pseudo_fallback {
            tracing::info!(model = %model_path.display(), "model missing, using pseudo embeddings");
            return Ok(EmbeddingBackend::Pseudo);
        }
        return Err(anyhow!(
            "embedding model not found at {}",
            model_path.display()
        ));
    }

    let session = Session::builder()
        .context("failed to create ONNX session builder")?
        .commit_from_file(model_path)
        .with_context(|| format!("failed to load ONNX model {}", model_path.display()))?;
    let tokenizer = load_tokenizer(config)?;
    tracing::info!(
        language = config.language.code(),
        model = %model_path.display(),
        tokenizer = tokenizer.is_some(),
        "embedding model loaded"
    );

    Ok(EmbeddingBackend::Onnx(OnnxBackend {
        session: Mutex::new(session),
        tokenizer,
    }))
}

fn load_tokenizer(config: &EmbeddingConfig) -> Result<Option<Arc<Tokenizer>>> {
    let Some(path) = config.tokenizer_path.as_ref() else {
        return Ok(None);
    };
    let tokenizer = Tokenizer::from_file(path)
        .map_err(|err| anyhow!("failed loading tokenizer from {path}: {err}"))?;
    Ok(Some(Arc::new(tokenizer)))
}

fn encode_inputs(
    inputs: &[String],
    config: &EmbeddingConfig,
    tokenizer: Option<&Arc<Tokenizer>>,
) -> Result<EncodedBatch> {
    let seq_len = config.max_sequence_length.max(1);
    let mut input_ids = vec![0i64; inputs.len() * seq_len];
    let mut attention_mask = vec![0i64; inputs.len() * seq_len];

    if let Some(tokenizer) = tokenizer {
        let encoded_inputs = inputs
            .iter()
            .map(|text| EncodeInput::Single(text.as_str().into()))
            .collect::<Vec<_>>();
        let encodings = tokenizer
            .encode_batch(encoded_inputs, true)
            .map_err(|err| anyhow!("tokenization failed: {err}"))?;
        for (row, encoding) in encodings.iter().enumerate() {
            for (col, token_id) in encoding.get_ids().iter().take(seq_len).enumerate() {
                input_ids[row * seq_len + col] = i64::from(*token_id);
                attention_mask[row * seq_len + col] = 1;
            }
        }
    } else {
        for (row, text) in inputs.iter().enumerate() {
            for (col, byte) in text.as_bytes().iter().take(seq_len).enumerate() {
                input_ids[row * seq_len + col] = i64::from(*byte) + 1;
                attention_mask[row * seq_len + col] = 1;
            }
        }
    }

    Ok(EncodedBatch {
        input_ids,
        attention_mask,
        batch_size: inputs.len(),
        seq_len,
    })
}

fn resolve_device(preferred: ExecutionDevice) -> ExecutionDevice {
    match preferred {
        ExecutionDevice::GpuPreferred if gpu_runtime_available() => ExecutionDevice::GpuPreferred,
        _ => ExecutionDevice::Cpu,
    }
}

fn gpu_runtime_available() -> bool {
    std::env::var("EMBEDDING_GPU_AVAILABLE")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Signed feature hashing of lowercased word tokens, L2-normalized.
/// Texts sharing words land close together, which keeps retrieval tests
/// meaningful without a model.
fn pseudo_embed(input: &str, dim: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; dim.max(1)];
    let n = out.len() as u64;
    for token in input
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
    {
        let digest = Sha256::digest(token.to_lowercase().as_bytes());
        let mut bucket = [0u8; 8];
        bucket.copy_from_slice(&digest[..8]);
        let slot = (u64::from_le_bytes(bucket) % n) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        out[slot] += sign;
    }
    let norm = out.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut out {
            *value /= norm;
        }
    }
    out
}
