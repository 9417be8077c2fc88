use std::sync::Arc;

use common::{DocumentStore, FeatureVector, NewsDocument, Result, RetrievalCandidate};
use embeddings::{Embedder, cosine_similarity};
use search_core::KeywordExtractor;

pub struct FeaturePipeline {
    store: Arc<dyn DocumentStore>,
    keywords: Arc<KeywordExtractor>,
    embedder: Arc<dyn Embedder>,
}

impl FeaturePipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        keywords: Arc<KeywordExtractor>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            store,
            keywords,
            embedder,
        }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn get_features(
        &self,
        query: &NewsDocument,
        candidate: &NewsDocument,
        bm25: Option<f32>,
        cosine: Option<f32>,
    ) -> Result<FeatureVector> {
        let bm25_score = match bm25 {
            Some(score) => score,
            None => self.explain_bm25(query, candidate)?,
        };
        let cosine_score = match cosine {
            Some(score) => score,
            None => self.keyword_cosine(query, candidate)?,
        };
        Ok(FeatureVector {
            bm25_score,
            cosine_score,
            doc_length: candidate.char_length() as f32,
            published_after: if query.published > candidate.published {
                1.0
            } else {
                0.0
            },
        })
    }

    pub fn features_for_candidates(
        &self,
        query: &NewsDocument,
        candidates: &[RetrievalCandidate],
    ) -> Result<Vec<(String, FeatureVector)>> {
        let mut out = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let Some(doc) = self.store.get(&candidate.id)? else {
                tracing::warn!(query_id = %query.id, candidate_id = %candidate.id, "candidate vanished from store");
                continue;
            };
            let features =
                self.get_features(query, &doc, candidate.bm25_score, candidate.cosine_score)?;
            out.push((candidate.id.clone(), features));
        }
        Ok(out)
    }

    fn explain_bm25(&self, query: &NewsDocument, candidate: &NewsDocument) -> Result<f32> {
        let lexical = self.keywords.salient_query(&query.id)?;
        if lexical.is_empty() {
            return Ok(0.0);
        }
        self.store.explain(&candidate.id, &lexical)
    }

    fn keyword_cosine(&self, query: &NewsDocument, candidate: &NewsDocument) -> Result<f32> {
        let Some(query_text) = self.keywords.keyword_query_text(query)? else {
            return Ok(0.0);
        };
        let Some(candidate_text) = self.keywords.keyword_query_text(candidate)? else {
            return Ok(0.0);
        };
        let query_vec = self.embedder.encode(&query_text)?;
        let candidate_vec = self.embedder.encode(&candidate_text)?;
        Ok(cosine_similarity(&query_vec, &candidate_vec))
    }
}
