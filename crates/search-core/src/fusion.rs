use std::sync::Arc;

use ahash::AHashMap;
use common::{DocumentStore, NewsDocument, Result, RetrievalCandidate, ScoredHit};
use embeddings::Embedder;
use serde::Serialize;

use crate::{keywords::KeywordExtractor, vector::VectorStorage};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FusedCandidates {
    pub candidates: Vec<RetrievalCandidate>,
    pub lexical_count: usize,
    pub semantic_count: usize,
    pub added_by_semantic: usize,
}

impl FusedCandidates {
    pub fn ids(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.id.as_str()).collect()
    }
}

pub struct RetrievalFusion {
    store: Arc<dyn DocumentStore>,
    keywords: Arc<KeywordExtractor>,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<VectorStorage>,
}

impl RetrievalFusion {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        keywords: Arc<KeywordExtractor>,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<VectorStorage>,
    ) -> Self {
        Self {
            store,
            keywords,
            embedder,
            vectors,
        }
    }

    pub fn check_semantic_size(&self, size: usize) -> Result<()> {
        self.vectors.check_k(size)
    }

    pub fn retrieve_lexical(&self, query_doc: &NewsDocument, size: usize) -> Result<Vec<ScoredHit>> {
        let query = self.keywords.salient_query(&query_doc.id)?;
        if query.is_empty() {
            tracing::debug!(doc_id = %query_doc.id, "no salient terms");
            return Ok(Vec::new());
        }
        tracing::debug!(doc_id = %query_doc.id, query = %query.render(), size, "lexical retrieval");
        self.store.search(&query, size)
    }

    pub fn retrieve_semantic(&self, query_doc: &NewsDocument, size: usize) -> Result<Vec<ScoredHit>> {
        let Some(text) = self.keywords.keyword_query_text(query_doc)? else {
            tracing::debug!(doc_id = %query_doc.id, "no keywords to embed");
            return Ok(Vec::new());
        };
        let vector = self.embedder.encode(&text)?;
        let mut nearest = self.vectors.get_k_nearest(&[vector], size)?;
        Ok(nearest
            .pop()
            .unwrap_or_default()
            .into_iter()
            .map(|(id, distance)| ScoredHit {
                id,
                score: 1.0 - distance,
            })
            .collect())
    }

    pub fn combine(&self, query_doc: &NewsDocument, size: usize) -> Result<FusedCandidates> {
        self.combine_sized(query_doc, size, size)
    }

    pub fn combine_sized(
        &self,
        query_doc: &NewsDocument,
        lexical_size: usize,
        semantic_size: usize,
    ) -> Result<FusedCandidates> {
        let lexical = self.retrieve_lexical(query_doc, lexical_size)?;
        let semantic = self.retrieve_semantic(query_doc, semantic_size)?;
        Ok(merge_channels(&query_doc.id, lexical, semantic))
    }
}

pub fn merge_channels(
    query_id: &str,
    lexical: Vec<ScoredHit>,
    semantic: Vec<ScoredHit>,
) -> FusedCandidates {
    let mut fused = FusedCandidates::default();
    let mut slots: AHashMap<String, usize> = AHashMap::new();

    for hit in lexical {
        if hit.id == query_id || slots.contains_key(&hit.id) {
            continue;
        }
        fused.lexical_count += 1;
        slots.insert(hit.id.clone(), fused.candidates.len());
        fused.candidates.push(RetrievalCandidate {
            id: hit.id,
            bm25_score: Some(hit.score),
            cosine_score: None,
        });
    }

    for hit in semantic {
        if hit.id == query_id {
            continue;
        }
        match slots.get(&hit.id) {
            Some(&idx) => {
                let candidate = &mut fused.candidates[idx];
                if candidate.cosine_score.is_none() {
                    candidate.cosine_score = Some(hit.score);
                    fused.semantic_count += 1;
                }
            }
            None => {
                fused.semantic_count += 1;
                fused.added_by_semantic += 1;
                slots.insert(hit.id.clone(), fused.candidates.len());
                fused.candidates.push(RetrievalCandidate {
                    id: hit.id,
                    bm25_score: None,
                    cosine_score: Some(hit.score),
                });
            }
        }
    }
    fused
}

#[cfg(test)]
mod tests {
    use common::ScoredHit;

    use super::merge_channels;

    fn hits(raw: &[(&str, f32)]) -> Vec<ScoredHit> {
        raw.iter()
            .map(|(id, score)| ScoredHit {
                id: (*id).to_string(),
                score: *score,
            })
            .collect()
    }

    #[test]
    fn shared_ids_carry_both_scores() {
        let fused = merge_channels(
            "q",
            hits(&[("a", 3.0), ("b", 0.0)]),
            hits(&[("b", 0.9), ("c", 0.4)]),
        );
        assert_eq!(fused.ids(), vec!["a", "b", "c"]);
        assert_eq!(fused.candidates[0].cosine_score, None);
        assert_eq!(fused.candidates[1].bm25_score, Some(0.0));
        assert_eq!(fused.candidates[1].cosine_score, Some(0.9));
        assert_eq!(fused.candidates[2].bm25_score, None);
        assert_eq!(fused.lexical_count, 2);
        assert_eq!(fused.semantic_count, 2);
        assert_eq!(fused.added_by_semantic, 1);
    }

    #[test]
    fn query_document_is_excluded_from_both_channels() {
        let fused = merge_channels("q", hits(&[("q", 9.0), ("a", 1.0)]), hits(&[("q", 1.0)]));
        assert_eq!(fused.ids(), vec!["a"]);
        assert_eq!(fused.semantic_count, 0);
    }

    #[test]
    fn empty_channels_give_empty_result() {
        let fused = merge_channels("q", Vec::new(), Vec::new());
        assert!(fused.candidates.is_empty());
    }
}
