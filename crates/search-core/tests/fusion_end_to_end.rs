use std::{path::PathBuf, sync::Arc};

use ahash::AHashSet;
use common::{DocumentStore, FieldTermConfig, Language, NewsDocument, config::AnnConfig};
use embeddings::{Embedder, EmbeddingConfig, EmbeddingEngine};
use search_core::{KeywordExtractor, RetrievalFusion, TantivyDocumentStore, VectorStorage};

const DIM: usize = 128;

struct Harness {
    store: Arc<TantivyDocumentStore>,
    fusion: RetrievalFusion,
}

fn corpus() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/news.jsonl")
}

fn harness() -> Harness {
    let store = Arc::new(TantivyDocumentStore::new_in_memory(Language::English).expect("store"));
    store.index_file(&corpus()).expect("index");

    let keywords = Arc::new(KeywordExtractor::new(
        store.clone(),
        vec![
            FieldTermConfig::title_default(),
            FieldTermConfig {
                field: "body".to_string(),
                min_term_freq: 2,
                min_doc_freq: 1,
                max_terms: 10,
            },
        ],
    ));
    let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingEngine::new(EmbeddingConfig {
        vector_dim: DIM,
        allow_pseudo_fallback: true,
        ..EmbeddingConfig::for_language(Language::English)
    }));
    let vectors = Arc::new(
        VectorStorage::open(
            None,
            AnnConfig {
                dim: DIM,
                max_elements: 100,
                ef_construction: 50,
                m: 8,
                ef: 20,
                num_threads: 1,
                batch_size: 3,
            },
        )
        .expect("vectors"),
    );
    let report = vectors
        .add_items_from_file::<NewsDocument, _, _>(
            &corpus(),
            |doc| match keywords.keyword_query_text(doc)? {
                Some(text) => embedder.encode(&text).map(Some),
                None => Ok(None),
            },
            |doc| Some(doc.id.clone()),
        )
        .expect("vectors ingest");
    assert_eq!(report.inserted + report.skipped_no_vector, 8);

    let fusion = RetrievalFusion::new(store.clone(), keywords, embedder, vectors);
    Harness { store, fusion }
}

fn doc(h: &Harness, id: &str) -> NewsDocument {
    h.store.get(id).expect("get").expect("present")
}

#[test]
fn lexical_channel_finds_topic_neighbours() {
    let h = harness();
    let hits = h.fusion.retrieve_lexical(&doc(&h, "m1"), 5).expect("lexical");
    let ids = hits.iter().map(|hit| hit.id.as_str()).collect::<Vec<_>>();
    assert!(ids.contains(&"m2"));
}

#[test]
fn semantic_channel_ranks_own_keywords_first() {
    let h = harness();
    let hits = h.fusion.retrieve_semantic(&doc(&h, "f1"), 3).expect("semantic");
    assert_eq!(hits[0].id, "f1");
    assert!(hits[0].score > 0.99);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn combined_candidates_are_complete_and_exclude_the_query() {
    let h = harness();
    let query = doc(&h, "m2");
    let lexical = h.fusion.retrieve_lexical(&query, 5).expect("lexical");
    let semantic = h.fusion.retrieve_semantic(&query, 5).expect("semantic");
    let fused = h.fusion.combine(&query, 5).expect("combine");

    assert!(fused.candidates.len() <= lexical.len() + semantic.len());
    assert!(fused.candidates.iter().all(|c| c.id != "m2"));

    let unique = fused.candidates.iter().map(|c| c.id.as_str()).collect::<AHashSet<_>>();
    assert_eq!(unique.len(), fused.candidates.len());

    let lexical_ids = lexical.iter().map(|hit| hit.id.as_str()).collect::<AHashSet<_>>();
    let semantic_ids = semantic.iter().map(|hit| hit.id.as_str()).collect::<AHashSet<_>>();
    for candidate in &fused.candidates {
        let id = candidate.id.as_str();
        assert_eq!(candidate.bm25_score.is_some(), lexical_ids.contains(id));
        assert_eq!(candidate.cosine_score.is_some(), semantic_ids.contains(id));
    }
    assert_eq!(
        fused.added_by_semantic,
        semantic_ids
            .iter()
            .filter(|id| **id != "m2" && !lexical_ids.contains(*id))
            .count()
    );
}

#[test]
fn unknown_document_yields_no_candidates() {
    let h = harness();
    let ghost = NewsDocument {
        id: "ghost".to_string(),
        title: "Metro fares".to_string(),
        body: String::new(),
        published: 0,
    };
    let fused = h.fusion.combine(&ghost, 5).expect("combine");
    assert!(fused.candidates.is_empty());
}

#[test]
fn k_above_ef_is_a_configuration_error() {
    let h = harness();
    let err = h
        .fusion
        .retrieve_semantic(&doc(&h, "m1"), 21)
        .expect_err("k > ef");
    assert!(err.to_string().contains("exceeds ef"));
}
