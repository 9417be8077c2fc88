use std::collections::BTreeSet;

use common::{DocumentStore, Judgement};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimeFilterStats {
    pub judgements: usize,
    pub references: usize,
    pub published_after_query: usize,
    pub missing_queries: BTreeSet<String>,
    pub missing_references: BTreeSet<String>,
}

impl TimeFilterStats {
    pub fn collect(store: &dyn DocumentStore, judgements: &[Judgement]) -> Self {
        let mut stats = Self {
            judgements: judgements.len(),
            ..Self::default()
        };
        for judgement in judgements {
            stats.references += judgement.references.len();
            let query = match store.get(&judgement.id) {
                Ok(Some(query)) => query,
                Ok(None) | Err(_) => {
                    stats.missing_queries.insert(judgement.id.clone());
                    continue;
                }
            };
            for reference in &judgement.references {
                match store.get(&reference.id) {
                    Ok(Some(doc)) if doc.published > query.published => {
                        stats.published_after_query += 1;
                    }
                    Ok(Some(_)) => {}
                    Ok(None) | Err(_) => {
                        stats.missing_references.insert(reference.id.clone());
                    }
                }
            }
        }
        tracing::info!(
            references = stats.references,
            published_after_query = stats.published_after_query,
            missing_queries = stats.missing_queries.len(),
            missing_references = stats.missing_references.len(),
            "time filter stats"
        );
        stats
    }

    pub fn ratio(&self) -> f64 {
        if self.references == 0 {
            return 0.0;
        }
        self.published_after_query as f64 / self.references as f64
    }
}

#[cfg(test)]
mod tests {
    use common::{Judgement, Language, NewsDocument, Reference};
    use search_core::TantivyDocumentStore;

    use super::TimeFilterStats;

    fn doc(id: &str, published: i64) -> NewsDocument {
        NewsDocument {
            id: id.to_string(),
            title: id.to_string(),
            body: String::new(),
            published,
        }
    }

    #[test]
    fn counts_later_references_and_missing_documents() {
        let store = TantivyDocumentStore::new_in_memory(Language::German).expect("store");
        store
            .index_documents(vec![doc("q", 100), doc("early", 50), doc("late", 150), doc("same", 100)])
            .expect("index");
        let judgements = vec![
            Judgement {
                id: "q".to_string(),
                references: ["early", "late", "same", "gone"]
                    .iter()
                    .map(|id| Reference {
                        id: (*id).to_string(),
                        grade: 8,
                    })
                    .collect(),
            },
            Judgement {
                id: "nope".to_string(),
                references: vec![Reference {
                    id: "late".to_string(),
                    grade: 4,
                }],
            },
        ];

        let stats = TimeFilterStats::collect(&store, &judgements);
        assert_eq!(stats.references, 5);
        assert_eq!(stats.published_after_query, 1);
        assert_eq!(stats.missing_references.len(), 1);
        assert!(stats.missing_queries.contains("nope"));
        assert!((stats.ratio() - 0.2).abs() < 1e-9);
    }
}
