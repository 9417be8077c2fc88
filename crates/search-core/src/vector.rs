use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use ahash::{AHashMap, AHashSet};
use common::{EngineError, IngestReport, JsonLines, Result, config::AnnConfig};
use parking_lot::RwLock;
use rayon::prelude::*;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};

use crate::ann::AnnGraph;

pub type VectorStorageConfig = AnnConfig;

const SIDECAR_VERSION: u32 = 1;

/// ANN index keyed by caller-supplied external IDs.
///
/// The graph and the label map live behind one lock: label assignment and
/// graph insertion happen in a single write section so labels stay dense and
/// sequential. Persisted as a graph file plus `<path>.labels.json`.
pub struct VectorStorage {
    path: Option<PathBuf>,
    config: VectorStorageConfig,
    capacity: usize,
    pool: rayon::ThreadPool,
    inner: RwLock<Inner>,
}

struct Inner {
    graph: AnnGraph,
    labels: LabelMap,
}

#[derive(Debug, Default)]
struct LabelMap {
    next_label: u64,
    // Indexed by label; labels are dense from 0.
    ids: Vec<String>,
    by_id: AHashMap<String, u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SideCar {
    version: u32,
    dim: usize,
    count: usize,
    next_label: u64,
    graph_sha256: String,
    labels: BTreeMap<u64, String>,
}

impl VectorStorage {
    pub fn open(path: Option<&Path>, config: VectorStorageConfig) -> Result<Self> {
        if config.dim == 0 || config.m < 2 || config.batch_size == 0 {
            return Err(EngineError::Configuration(format!(
                "dim {} and batch_size {} must be positive, m {} at least 2",
                config.dim, config.batch_size, config.m
            )));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .thread_name(|idx| format!("ann-query-{idx}"))
            .build()
            .map_err(|err| EngineError::Configuration(format!("query pool: {err}")))?;

        let inner = match path {
            Some(path) if path.exists() || sidecar_path(path).exists() => {
                let inner = load_pair(path)?;
                if inner.graph.dim() != config.dim {
                    return Err(EngineError::Configuration(format!(
                        "stored dimension {} differs from configured {}",
                        inner.graph.dim(),
                        config.dim
                    )));
                }
                tracing::info!(
                    path = %path.display(),
                    records = inner.labels.ids.len(),
                    "vector storage loaded"
                );
                inner
            }
            _ => Inner {
                graph: AnnGraph::new(config.dim, config.m, config.ef_construction),
                labels: LabelMap::default(),
            },
        };
        let capacity = config.max_elements.max(inner.labels.ids.len());

        Ok(Self {
            path: path.map(Path::to_path_buf),
            config,
            capacity,
            pool,
            inner: RwLock::new(inner),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.read().labels.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn dim(&self) -> usize {
        self.config.dim
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.inner.read().labels.by_id.contains_key(id)
    }

    pub fn add_items(&self, vectors: &[Vec<f32>], external_ids: &[String]) -> Result<Vec<u64>> {
        if vectors.len() != external_ids.len() {
            return Err(EngineError::InvalidInput(format!(
                "{} vectors but {} external ids",
                vectors.len(),
                external_ids.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.config.dim) {
            return Err(EngineError::DimensionMismatch {
                expected: self.config.dim,
                got: bad.len(),
            });
        }

        let mut inner = self.inner.write();
        let requested = inner.labels.ids.len() + vectors.len();
        if requested > self.capacity {
            return Err(EngineError::CapacityExceeded {
                capacity: self.capacity,
                requested,
            });
        }
        let mut batch = AHashSet::with_capacity(external_ids.len());
        for id in external_ids {
            if inner.labels.by_id.contains_key(id) || !batch.insert(id.as_str()) {
                return Err(EngineError::DuplicateId(id.clone()));
            }
        }

        let mut labels = Vec::with_capacity(vectors.len());
        for (vector, id) in vectors.iter().zip(external_ids) {
            let expected = inner.labels.next_label;
            let label = inner.graph.insert(vector);
            if label != expected {
                return Err(EngineError::Consistency(format!(
                    "graph assigned label {label}, label map expected {expected}"
                )));
            }
            inner.labels.push(label, id.clone());
            labels.push(label);
        }
        Ok(labels)
    }

    pub fn check_k(&self, k: usize) -> Result<()> {
        if k > self.config.ef {
            return Err(EngineError::Configuration(format!(
                "k {k} exceeds ef {}; results would be truncated",
                self.config.ef
            )));
        }
        if k > self.capacity {
            return Err(EngineError::Configuration(format!(
                "k {k} exceeds max_elements {}",
                self.capacity
            )));
        }
        Ok(())
    }

    pub fn get_k_nearest(&self, queries: &[Vec<f32>], k: usize) -> Result<Vec<Vec<(String, f32)>>> {
        self.check_k(k)?;
        if let Some(bad) = queries.iter().find(|q| q.len() != self.config.dim) {
            return Err(EngineError::DimensionMismatch {
                expected: self.config.dim,
                got: bad.len(),
            });
        }

        let inner = self.inner.read();
        let graph = &inner.graph;
        let ef = self.config.ef;
        let found = self.pool.install(|| {
            queries
                .par_iter()
                .map(|query| graph.search(query, k, ef))
                .collect::<Vec<_>>()
        });
        found
            .into_iter()
            .map(|hits| {
                hits.into_iter()
                    .map(|(label, distance)| {
                        inner
                            .labels
                            .id(label)
                            .map(|id| (id.to_string(), distance))
                            .ok_or_else(|| {
                                EngineError::Consistency(format!("label {label} has no external id"))
                            })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let inner = self.inner.read();
        let bytes = inner.graph.to_bytes();
        let sidecar = SideCar {
            version: SIDECAR_VERSION,
            dim: inner.graph.dim(),
            count: inner.labels.ids.len(),
            next_label: inner.labels.next_label,
            graph_sha256: format!("{:x}", Sha256::digest(&bytes)),
            labels: inner
                .labels
                .ids
                .iter()
                .enumerate()
                .map(|(label, id)| (label as u64, id.clone()))
                .collect(),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &bytes)?;
        fs::write(sidecar_path(path), serde_json::to_vec(&sidecar)?)?;
        tracing::info!(
            path = %path.display(),
            records = sidecar.count,
            bytes = bytes.len(),
            "vector storage saved"
        );
        Ok(())
    }

    pub fn persist(&self) -> Result<bool> {
        match &self.path {
            Some(path) => self.save(path).map(|()| true),
            None => Ok(false),
        }
    }

    /// Streams JSON lines from `input` and inserts every record that parses,
    /// has an ID, embeds to a vector and is not stored yet. Insertion happens
    /// in `batch_size` chunks; the storage is persisted at the end when it
    /// has a path.
    pub fn add_items_from_file<T, E, I>(
        &self,
        input: &Path,
        mut embed_fn: E,
        mut id_fn: I,
    ) -> Result<IngestReport>
    where
        T: DeserializeOwned,
        E: FnMut(&T) -> anyhow::Result<Option<Vec<f32>>>,
        I: FnMut(&T) -> Option<String>,
    {
        let mut report = IngestReport::default();
        let mut pending_ids = Vec::with_capacity(self.config.batch_size);
        let mut pending_vectors = Vec::with_capacity(self.config.batch_size);
        let mut seen = AHashSet::new();

        for (line_no, parsed) in JsonLines::<T>::open(input)? {
            report.processed += 1;
            let record = match parsed {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(line = line_no, error = %err, "skipping unparseable record");
                    report.skipped_unparseable += 1;
                    continue;
                }
            };
            let Some(id) = id_fn(&record) else {
                report.skipped_no_id += 1;
                continue;
            };
            if seen.contains(&id) || self.contains_id(&id) {
                tracing::debug!(line = line_no, id = %id, "skipping duplicate id");
                report.skipped_duplicate += 1;
                continue;
            }
            let vector = match embed_fn(&record) {
                Ok(Some(vector)) if vector.len() == self.config.dim => vector,
                Ok(Some(vector)) => {
                    tracing::warn!(id = %id, got = vector.len(), "skipping vector of wrong dimension");
                    report.skipped_no_vector += 1;
                    continue;
                }
                Ok(None) => {
                    report.skipped_no_vector += 1;
                    continue;
                }
                Err(err) => {
                    tracing::warn!(id = %id, error = %err, "embedding failed");
                    report.skipped_no_vector += 1;
                    continue;
                }
            };
            seen.insert(id.clone());
            pending_ids.push(id);
            pending_vectors.push(vector);

            if pending_ids.len() >= self.config.batch_size {
                report.inserted += self.flush(&mut pending_vectors, &mut pending_ids)?;
            }
        }
        report.inserted += self.flush(&mut pending_vectors, &mut pending_ids)?;
        self.persist()?;

        tracing::info!(
            input = %input.display(),
            processed = report.processed,
            inserted = report.inserted,
            skipped = report.skipped(),
            "vector ingest finished"
        );
        Ok(report)
    }

    fn flush(&self, vectors: &mut Vec<Vec<f32>>, ids: &mut Vec<String>) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let labels = self.add_items(vectors, ids)?;
        tracing::debug!(inserted = labels.len(), total = self.len(), "batch inserted");
        vectors.clear();
        ids.clear();
        Ok(labels.len() as u64)
    }
}

impl LabelMap {
    fn push(&mut self, label: u64, id: String) {
        self.by_id.insert(id.clone(), label);
        self.ids.push(id);
        self.next_label = label + 1;
    }

    fn id(&self, label: u64) -> Option<&str> {
        usize::try_from(label)
            .ok()
            .and_then(|idx| self.ids.get(idx))
            .map(String::as_str)
    }
}

pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(".labels.json");
    PathBuf::from(raw)
}

fn load_pair(path: &Path) -> Result<Inner> {
    let sidecar_file = sidecar_path(path);
    if !path.exists() || !sidecar_file.exists() {
        return Err(EngineError::Consistency(format!(
            "graph {} and label map {} must both exist",
            path.display(),
            sidecar_file.display()
        )));
    }

    let bytes = fs::read(path)?;
    let sidecar: SideCar = serde_json::from_slice(&fs::read(&sidecar_file)?)
        .map_err(|err| EngineError::Consistency(format!("unreadable label map: {err}")))?;
    if sidecar.version != SIDECAR_VERSION {
        return Err(EngineError::Consistency(format!(
            "unsupported label map version {}",
            sidecar.version
        )));
    }
    let digest = format!("{:x}", Sha256::digest(&bytes));
    if digest != sidecar.graph_sha256 {
        return Err(EngineError::Consistency(
            "label map was written for a different graph file".to_string(),
        ));
    }

    let graph = AnnGraph::from_bytes(&bytes)?;
    if graph.dim() != sidecar.dim
        || graph.len() != sidecar.count
        || sidecar.labels.len() != sidecar.count
        || sidecar.next_label != sidecar.count as u64
    {
        return Err(EngineError::Consistency(format!(
            "graph holds {} records of dim {}, label map {} of dim {} (next label {})",
            graph.len(),
            graph.dim(),
            sidecar.labels.len(),
            sidecar.dim,
            sidecar.next_label
        )));
    }

    let mut labels = LabelMap::default();
    for (expected, (label, id)) in sidecar.labels.into_iter().enumerate() {
        if label != expected as u64 {
            return Err(EngineError::Consistency(format!("label {expected} missing from label map")));
        }
        if labels.by_id.contains_key(&id) {
            return Err(EngineError::Consistency(format!("external id {id} mapped twice")));
        }
        labels.push(label, id);
    }
    Ok(Inner { graph, labels })
}
