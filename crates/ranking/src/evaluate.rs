use std::{fmt, str::FromStr, sync::Arc};

use ahash::AHashSet;
use common::{DocumentStore, EngineError, Judgement, NewsDocument, Reference, Result};
use rayon::prelude::*;
use search_core::RetrievalFusion;
use serde::{Deserialize, Serialize};

/// Fraction of the references graded at or above `cutoff` that appear in
/// `retrieved`. The query's own ID never counts as retrieved, but a graded
/// self reference stays in the denominator. Returns 0 when nothing is
/// relevant.
pub fn evaluate_recall<S: AsRef<str>>(
    retrieved: &[S],
    query_id: &str,
    references: &[Reference],
    cutoff: u32,
) -> f64 {
    let relevant = relevant_ids(references, cutoff);
    if relevant.is_empty() {
        return 0.0;
    }
    let retrieved = retrieved
        .iter()
        .map(AsRef::as_ref)
        .filter(|id| *id != query_id)
        .collect::<AHashSet<&str>>();
    let found = relevant.iter().filter(|id| retrieved.contains(*id)).count();
    found as f64 / relevant.len() as f64
}

fn relevant_ids(references: &[Reference], cutoff: u32) -> AHashSet<&str> {
    references
        .iter()
        .filter(|reference| reference.grade >= cutoff)
        .map(|reference| reference.id.as_str())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Lexical,
    Semantic,
    Combined,
}

impl Channel {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Lexical => "lexical",
            Self::Semantic => "semantic",
            Self::Combined => "combined",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Channel {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "lexical" | "bm25" => Ok(Self::Lexical),
            "semantic" | "vector" => Ok(Self::Semantic),
            "combined" | "hybrid" => Ok(Self::Combined),
            other => Err(EngineError::Configuration(format!(
                "unknown channel `{other}`, expected lexical, semantic or combined"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRecall {
    pub id: String,
    pub recall: f64,
    pub retrieved: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecallReport {
    pub channel: Channel,
    pub size: usize,
    pub relevance_cutoff: u32,
    pub judgements: usize,
    pub evaluated: usize,
    pub no_relevant: usize,
    pub exceptions: usize,
    pub recall_avg: f64,
    pub recall_min: f64,
    pub recall_max: f64,
    pub retrieval_count_avg: f64,
    pub added_by_semantic_avg: f64,
    pub queries: Vec<QueryRecall>,
}

enum Outcome {
    NoRelevant(String),
    Exception,
    Scored {
        id: String,
        recall: f64,
        retrieved: usize,
        added_by_semantic: usize,
    },
}

pub struct RecallEvaluator {
    store: Arc<dyn DocumentStore>,
    fusion: Arc<RetrievalFusion>,
    relevance_cutoff: u32,
}

impl RecallEvaluator {
    pub fn new(store: Arc<dyn DocumentStore>, fusion: Arc<RetrievalFusion>, relevance_cutoff: u32) -> Self {
        Self {
            store,
            fusion,
            relevance_cutoff,
        }
    }

    /// Judgements without relevant references count with recall 0 and are
    /// not fetched. Queries that cannot be fetched or retrieved for are
    /// counted as exceptions and left out of the averages. A `size` the
    /// vector storage cannot serve fails the whole run.
    pub fn run(&self, judgements: &[Judgement], channel: Channel, size: usize) -> Result<RecallReport> {
        if matches!(channel, Channel::Semantic | Channel::Combined) {
            self.fusion.check_semantic_size(size)?;
        }
        let outcomes = judgements
            .par_iter()
            .map(|judgement| self.evaluate_one(judgement, channel, size))
            .collect::<Result<Vec<_>>>()?;

        let mut report = RecallReport {
            channel,
            size,
            relevance_cutoff: self.relevance_cutoff,
            judgements: judgements.len(),
            evaluated: 0,
            no_relevant: 0,
            exceptions: 0,
            recall_avg: 0.0,
            recall_min: 0.0,
            recall_max: 0.0,
            retrieval_count_avg: 0.0,
            added_by_semantic_avg: 0.0,
            queries: Vec::with_capacity(judgements.len()),
        };
        let mut retrieved_total = 0usize;
        let mut added_total = 0usize;
        for outcome in outcomes {
            match outcome {
                Outcome::NoRelevant(id) => {
                    report.no_relevant += 1;
                    report.queries.push(QueryRecall {
                        id,
                        recall: 0.0,
                        retrieved: 0,
                    });
                }
                Outcome::Exception => report.exceptions += 1,
                Outcome::Scored {
                    id,
                    recall,
                    retrieved,
                    added_by_semantic,
                } => {
                    report.evaluated += 1;
                    retrieved_total += retrieved;
                    added_total += added_by_semantic;
                    report.queries.push(QueryRecall { id, recall, retrieved });
                }
            }
        }

        if !report.queries.is_empty() {
            let recalls = report.queries.iter().map(|q| q.recall);
            report.recall_avg = recalls.clone().sum::<f64>() / report.queries.len() as f64;
            report.recall_min = recalls.clone().fold(f64::INFINITY, f64::min);
            report.recall_max = recalls.fold(f64::NEG_INFINITY, f64::max);
        }
        if report.evaluated > 0 {
            report.retrieval_count_avg = retrieved_total as f64 / report.evaluated as f64;
            report.added_by_semantic_avg = added_total as f64 / report.evaluated as f64;
        }
        tracing::info!(
            channel = %channel,
            size,
            evaluated = report.evaluated,
            no_relevant = report.no_relevant,
            exceptions = report.exceptions,
            recall_avg = report.recall_avg,
            "recall run finished"
        );
        Ok(report)
    }

    fn evaluate_one(&self, judgement: &Judgement, channel: Channel, size: usize) -> Result<Outcome> {
        if relevant_ids(&judgement.references, self.relevance_cutoff).is_empty() {
            return Ok(Outcome::NoRelevant(judgement.id.clone()));
        }
        let query = match self.store.get(&judgement.id) {
            Ok(Some(query)) => query,
            Ok(None) => {
                tracing::warn!(query_id = %judgement.id, "query document not found");
                return Ok(Outcome::Exception);
            }
            Err(err) => {
                tracing::warn!(query_id = %judgement.id, error = %err, "query lookup failed");
                return Ok(Outcome::Exception);
            }
        };
        match self.retrieve(&query, channel, size) {
            Ok((ids, added_by_semantic)) => Ok(Outcome::Scored {
                recall: evaluate_recall(&ids, &judgement.id, &judgement.references, self.relevance_cutoff),
                retrieved: ids.len(),
                id: judgement.id.clone(),
                added_by_semantic,
            }),
            Err(
                err @ (EngineError::Configuration(_)
                | EngineError::DimensionMismatch { .. }
                | EngineError::Consistency(_)),
            ) => Err(err),
            Err(err) => {
                tracing::warn!(query_id = %judgement.id, %channel, error = %err, "retrieval failed");
                Ok(Outcome::Exception)
            }
        }
    }

    fn retrieve(&self, query: &NewsDocument, channel: Channel, size: usize) -> Result<(Vec<String>, usize)> {
        let ids = |hits: Vec<common::ScoredHit>| hits.into_iter().map(|hit| hit.id).collect::<Vec<_>>();
        Ok(match channel {
            Channel::Lexical => (ids(self.fusion.retrieve_lexical(query, size)?), 0),
            Channel::Semantic => (ids(self.fusion.retrieve_semantic(query, size)?), 0),
            Channel::Combined => {
                let fused = self.fusion.combine(query, size)?;
                let added = fused.added_by_semantic;
                (fused.candidates.into_iter().map(|c| c.id).collect(), added)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use common::Reference;
    use proptest::prelude::*;

    use super::{Channel, evaluate_recall};

    fn reference(id: &str, grade: u32) -> Reference {
        Reference {
            id: id.to_string(),
            grade,
        }
    }

    #[test]
    fn counts_only_references_at_or_above_cutoff() {
        let references = [reference("R1", 8), reference("R2", 2)];
        assert_eq!(evaluate_recall(&["R1", "R3"], "Q1", &references, 4), 1.0);
        assert_eq!(evaluate_recall(&["R3"], "Q1", &references, 4), 0.0);
    }

    #[test]
    fn query_is_dropped_from_retrieved_but_stays_relevant() {
        let references = [reference("Q1", 16), reference("R1", 8)];
        assert_eq!(evaluate_recall(&["Q1", "R1"], "Q1", &references, 4), 0.5);
        assert_eq!(evaluate_recall(&["Q1"], "Q1", &references, 4), 0.0);
        assert_eq!(evaluate_recall(&["R1"], "Q1", &references, 4), 0.5);
    }

    #[test]
    fn nothing_relevant_gives_zero() {
        let references = [reference("R1", 0), reference("R2", 2)];
        assert_eq!(evaluate_recall(&["R1", "R2"], "Q1", &references, 4), 0.0);
        assert_eq!(evaluate_recall::<&str>(&[], "Q1", &[], 4), 0.0);
    }

    #[test]
    fn partial_recall() {
        let references = [reference("a", 4), reference("b", 8), reference("c", 16), reference("d", 16)];
        assert_eq!(evaluate_recall(&["b", "x", "d"], "q", &references, 4), 0.5);
    }

    #[test]
    fn channel_names_parse() {
        assert_eq!("Combined".parse::<Channel>().ok(), Some(Channel::Combined));
        assert_eq!("bm25".parse::<Channel>().ok(), Some(Channel::Lexical));
        assert!("fuzzy".parse::<Channel>().is_err());
    }

    proptest! {
        #[test]
        fn recall_stays_in_unit_interval(
            grades in prop::collection::vec(0u32..20, 0..12),
            retrieved in prop::collection::vec(0usize..15, 0..15),
            cutoff in 0u32..20,
        ) {
            let references = grades
                .iter()
                .enumerate()
                .map(|(i, grade)| reference(&format!("r{i}"), *grade))
                .collect::<Vec<_>>();
            let retrieved = retrieved.iter().map(|i| format!("r{i}")).collect::<Vec<_>>();
            let recall = evaluate_recall(&retrieved, "q", &references, cutoff);
            prop_assert!((0.0..=1.0).contains(&recall));

            let everything = references.iter().map(|r| r.id.clone()).collect::<Vec<_>>();
            let has_relevant = references.iter().any(|r| r.grade >= cutoff);
            let full = evaluate_recall(&everything, "q", &references, cutoff);
            prop_assert_eq!(full, if has_relevant { 1.0 } else { 0.0 });
        }
    }
}
