use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use common::{EngineError, FeatureVector, Judgement, NewsDocument, Result};
use rayon::prelude::*;
use serde::Serialize;

use crate::features::FeaturePipeline;

/// Feature rows, graded labels and per-query group sizes for listwise
/// ranker training. Rows of one query are contiguous.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainingSet {
    pub features: Vec<FeatureVector>,
    pub labels: Vec<u32>,
    pub groups: Vec<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrainingStats {
    pub judgements: usize,
    pub groups: usize,
    pub rows: usize,
    pub missing_queries: usize,
    pub missing_references: usize,
    pub self_references: usize,
    pub failed_queries: usize,
}

enum GroupOutcome {
    Rows(Vec<(FeatureVector, u32)>, usize, usize),
    MissingQuery,
    Failed,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.features.len() != self.labels.len() {
            return Err(EngineError::InvalidInput(format!(
                "{} feature rows but {} labels",
                self.features.len(),
                self.labels.len()
            )));
        }
        if self.groups.contains(&0) {
            return Err(EngineError::InvalidInput("empty query group".to_string()));
        }
        let grouped: usize = self.groups.iter().sum();
        if grouped != self.features.len() {
            return Err(EngineError::InvalidInput(format!(
                "group sizes sum to {grouped} but there are {} rows",
                self.features.len()
            )));
        }
        Ok(())
    }

    pub fn write_artifacts(&self, dir: &Path, split: &str) -> Result<[PathBuf; 3]> {
        self.validate()?;
        fs::create_dir_all(dir)?;
        let [x_path, y_path, query_path] = artifact_paths(dir, split);

        let mut x = String::new();
        for row in &self.features {
            let [a, b, c, d] = row.to_array();
            let _ = writeln!(x, "{a} {b} {c} {d}");
        }
        let mut y = String::new();
        for label in &self.labels {
            let _ = writeln!(y, "{label}");
        }
        let mut groups = String::new();
        for size in &self.groups {
            let _ = writeln!(groups, "{size}");
        }

        fs::write(&x_path, x)?;
        fs::write(&y_path, y)?;
        fs::write(&query_path, groups)?;
        tracing::info!(dir = %dir.display(), split, rows = self.len(), "wrote training artifacts");
        Ok([x_path, y_path, query_path])
    }

    pub fn read_artifacts(dir: &Path, split: &str) -> Result<Self> {
        let [x_path, y_path, query_path] = artifact_paths(dir, split);

        let mut features = Vec::new();
        for (line_no, line) in numeric_lines(&x_path)? {
            let values = line
                .split_whitespace()
                .map(|raw| parse_number(raw, &x_path, line_no))
                .collect::<Result<Vec<f64>>>()?;
            let row: [f64; FeatureVector::LEN] = values.try_into().map_err(|values: Vec<f64>| {
                EngineError::InvalidInput(format!(
                    "{}:{line_no}: expected {} columns, got {}",
                    x_path.display(),
                    FeatureVector::LEN,
                    values.len()
                ))
            })?;
            features.push(FeatureVector::from_array(row.map(|v| v as f32)));
        }

        let labels = numeric_lines(&y_path)?
            .into_iter()
            .map(|(line_no, line)| parse_count(&line, &y_path, line_no).map(|v| v as u32))
            .collect::<Result<Vec<_>>>()?;
        let groups = numeric_lines(&query_path)?
            .into_iter()
            .map(|(line_no, line)| parse_count(&line, &query_path, line_no).map(|v| v as usize))
            .collect::<Result<Vec<_>>>()?;

        let data = Self {
            features,
            labels,
            groups,
        };
        data.validate()?;
        Ok(data)
    }

    fn push_group(&mut self, rows: Vec<(FeatureVector, u32)>) {
        self.groups.push(rows.len());
        for (features, label) in rows {
            self.features.push(features);
            self.labels.push(label);
        }
    }
}

fn artifact_paths(dir: &Path, split: &str) -> [PathBuf; 3] {
    [
        dir.join(format!("X_{split}.txt")),
        dir.join(format!("y_{split}.txt")),
        dir.join(format!("query_{split}.txt")),
    ]
}

fn numeric_lines(path: &Path) -> Result<Vec<(usize, String)>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| (idx + 1, line.trim().to_string()))
        .collect())
}

fn parse_number(raw: &str, path: &Path, line_no: usize) -> Result<f64> {
    raw.parse::<f64>().map_err(|_| {
        EngineError::InvalidInput(format!("{}:{line_no}: not a number: {raw}", path.display()))
    })
}

fn parse_count(raw: &str, path: &Path, line_no: usize) -> Result<u64> {
    let value = parse_number(raw, path, line_no)?;
    if value < 0.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
        return Err(EngineError::InvalidInput(format!(
            "{}:{line_no}: not a non-negative integer: {raw}",
            path.display()
        )));
    }
    Ok(value as u64)
}

/// Features for every graded reference of every judgement.
///
/// Each query document is fetched once. Missing queries and missing or
/// self references are skipped and counted, and queries that yield no rows
/// emit no group. Judgements are processed in parallel but groups keep the
/// input order.
pub fn build_training_set(
    pipeline: &FeaturePipeline,
    judgements: &[Judgement],
) -> Result<(TrainingSet, TrainingStats)> {
    let outcomes = judgements
        .par_iter()
        .map(|judgement| group_for(pipeline, judgement))
        .collect::<Vec<_>>();

    let mut data = TrainingSet::default();
    let mut stats = TrainingStats {
        judgements: judgements.len(),
        ..TrainingStats::default()
    };
    for outcome in outcomes {
        match outcome {
            GroupOutcome::Rows(rows, missing, self_refs) => {
                stats.missing_references += missing;
                stats.self_references += self_refs;
                if !rows.is_empty() {
                    data.push_group(rows);
                }
            }
            GroupOutcome::MissingQuery => stats.missing_queries += 1,
            GroupOutcome::Failed => stats.failed_queries += 1,
        }
    }
    stats.groups = data.groups.len();
    stats.rows = data.len();
    data.validate()?;
    tracing::info!(?stats, "built training set");
    Ok((data, stats))
}

fn group_for(pipeline: &FeaturePipeline, judgement: &Judgement) -> GroupOutcome {
    let query = match pipeline.store().get(&judgement.id) {
        Ok(Some(query)) => query,
        Ok(None) => {
            tracing::warn!(query_id = %judgement.id, "query document not found");
            return GroupOutcome::MissingQuery;
        }
        Err(err) => {
            tracing::warn!(query_id = %judgement.id, error = %err, "query lookup failed");
            return GroupOutcome::Failed;
        }
    };
    match reference_rows(pipeline, &query, judgement) {
        Ok((rows, missing, self_refs)) => GroupOutcome::Rows(rows, missing, self_refs),
        Err(err) => {
            tracing::warn!(query_id = %judgement.id, error = %err, "feature extraction failed");
            GroupOutcome::Failed
        }
    }
}

fn reference_rows(
    pipeline: &FeaturePipeline,
    query: &NewsDocument,
    judgement: &Judgement,
) -> Result<(Vec<(FeatureVector, u32)>, usize, usize)> {
    let mut rows = Vec::with_capacity(judgement.references.len());
    let mut missing = 0;
    let mut self_refs = 0;
    for reference in &judgement.references {
        if reference.id == query.id {
            self_refs += 1;
            continue;
        }
        let Some(doc) = pipeline.store().get(&reference.id)? else {
            tracing::debug!(query_id = %query.id, reference_id = %reference.id, "reference not found");
            missing += 1;
            continue;
        };
        rows.push((pipeline.get_features(query, &doc, None, None)?, reference.grade));
    }
    Ok((rows, missing, self_refs))
}

pub fn split<T>(mut data: Vec<T>, ratio: f64, seed: u64) -> Result<(Vec<T>, Vec<T>)> {
    if !(0.0..=1.0).contains(&ratio) {
        return Err(EngineError::Configuration(format!(
            "split ratio {ratio} outside [0, 1]"
        )));
    }
    let mut rng = SplitMix64(seed);
    for i in (1..data.len()).rev() {
        let j = (rng.next() % (i as u64 + 1)) as usize;
        data.swap(i, j);
    }
    let cut = (data.len() as f64 * ratio).floor() as usize;
    let tail = data.split_off(cut);
    Ok((data, tail))
}

struct SplitMix64(u64);

impl SplitMix64 {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}
