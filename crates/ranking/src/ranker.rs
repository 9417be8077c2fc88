//! Seam to an external learning-to-rank library.
//!
//! The engine never trains a model itself. It validates training data, hands
//! it to a [`Ranker`] and ranks candidates with the returned [`ScoringModel`].

use std::path::Path;

use anyhow::Context;
use common::{EngineError, FeatureVector, Result};
use serde::{Deserialize, Serialize};

use crate::{rank::rank, training::TrainingSet};

pub trait ScoringModel: Send + Sync {
    fn predict(&self, features: &[FeatureVector]) -> anyhow::Result<Vec<f32>>;
}

pub trait Ranker {
    type Model: ScoringModel;

    fn fit(&self, features: &[FeatureVector], labels: &[u32], groups: &[usize]) -> anyhow::Result<Self::Model>;
}

pub fn train_ranker<R: Ranker>(ranker: &R, data: &TrainingSet) -> Result<R::Model> {
    data.validate()?;
    tracing::info!(rows = data.len(), groups = data.groups.len(), "training ranker");
    Ok(ranker.fit(&data.features, &data.labels, &data.groups)?)
}

pub fn rank_with_model<M, T>(model: &M, features: &[FeatureVector], ids: &[T]) -> Result<(Vec<f32>, Vec<T>)>
where
    M: ScoringModel + ?Sized,
    T: Clone,
{
    let scores = model.predict(features)?;
    if scores.len() != features.len() {
        return Err(EngineError::Consistency(format!(
            "model returned {} scores for {} rows",
            scores.len(),
            features.len()
        )));
    }
    rank(&scores, ids)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub weights: [f32; FeatureVector::LEN],
    #[serde(default)]
    pub bias: f32,
}

impl LinearModel {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read model {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid model {}", path.display()))
    }
}

impl Default for LinearModel {
    fn default() -> Self {
        Self {
            weights: [1.0, 1.0, 0.0, 0.0],
            bias: 0.0,
        }
    }
}

impl ScoringModel for LinearModel {
    fn predict(&self, features: &[FeatureVector]) -> anyhow::Result<Vec<f32>> {
        Ok(features
            .iter()
            .map(|row| {
                row.to_array()
                    .iter()
                    .zip(self.weights)
                    .fold(self.bias, |acc, (value, weight)| acc + value * weight)
            })
            .collect())
    }
}
