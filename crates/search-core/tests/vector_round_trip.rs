use std::{fs, path::Path};

use common::{EngineError, NewsDocument, config::AnnConfig};
use search_core::{VectorStorage, sidecar_path};

const DIM: usize = 16;

fn config() -> AnnConfig {
    AnnConfig {
        dim: DIM,
        max_elements: 500,
        ef_construction: 64,
        m: 8,
        ef: 40,
        num_threads: 2,
        batch_size: 64,
    }
}

fn vector(seed: u64) -> Vec<f32> {
    let mut state = seed.wrapping_mul(2_862_933_555_777_941_757).wrapping_add(3_037_000_493);
    (0..DIM)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((state >> 40) as f32 / (1u64 << 24) as f32) - 0.5
        })
        .collect()
}

fn filled(path: Option<&Path>) -> VectorStorage {
    let storage = VectorStorage::open(path, config()).expect("storage");
    let vectors = (0..300).map(vector).collect::<Vec<_>>();
    let ids = (0..300).map(|i| format!("doc-{i}")).collect::<Vec<_>>();
    for (chunk_v, chunk_i) in vectors.chunks(64).zip(ids.chunks(64)) {
        storage.add_items(chunk_v, chunk_i).expect("add");
    }
    storage
}

#[test]
fn save_then_load_answers_identically() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("storage.bin");
    let original = filled(Some(&path));
    original.save(&path).expect("save");
    assert!(sidecar_path(&path).exists());

    let reloaded = VectorStorage::open(Some(&path), config()).expect("reload");
    assert_eq!(reloaded.len(), 300);

    let queries = (1000..1020).map(vector).collect::<Vec<_>>();
    let before = original.get_k_nearest(&queries, 10).expect("before");
    let after = reloaded.get_k_nearest(&queries, 10).expect("after");
    assert_eq!(before, after);
}

#[test]
fn stored_records_find_themselves() {
    let storage = filled(None);
    let queries = [vector(7), vector(123), vector(299)];
    let hits = storage.get_k_nearest(&queries, 3).expect("query");
    assert_eq!(hits[0][0].0, "doc-7");
    assert_eq!(hits[1][0].0, "doc-123");
    assert_eq!(hits[2][0].0, "doc-299");
    for row in &hits {
        assert!(row.windows(2).all(|w| w[0].1 <= w[1].1));
    }
}

#[test]
fn loaded_storage_continues_label_sequence() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("storage.bin");
    filled(Some(&path)).persist().expect("persist");

    let reloaded = VectorStorage::open(Some(&path), config()).expect("reload");
    let labels = reloaded
        .add_items(&[vector(5000)], &["late".to_string()])
        .expect("add");
    assert_eq!(labels, vec![300]);
    assert!(matches!(
        reloaded.add_items(&[vector(5001)], &["doc-3".to_string()]),
        Err(EngineError::DuplicateId(_))
    ));
}

#[test]
fn file_ingest_counts_every_skip_reason() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("docs.jsonl");
    let lines = [
        r#"{"id":"a","title":"alpha","body":"one"}"#,
        r#"{"id":"b","title":"","body":""}"#,
        r#"{"title":"orphan"}"#,
        r#"{"id":"c","title":"gamma","body":"three"}"#,
        r"{broken",
        r#"{"id":"a","title":"alpha again","body":"dup"}"#,
        r#"{"id":"d","title":"delta","body":"four"}"#,
    ];
    fs::write(&input, lines.join("\n")).expect("write");

    let target = dir.path().join("storage.bin");
    let storage = VectorStorage::open(
        Some(&target),
        AnnConfig {
            batch_size: 2,
            ..config()
        },
    )
    .expect("storage");

    let report = storage
        .add_items_from_file::<serde_json::Value, _, _>(
            &input,
            |record| {
                let title = record["title"].as_str().unwrap_or_default();
                if title.is_empty() {
                    return Ok(None);
                }
                Ok(Some(vector(title.len() as u64)))
            },
            |record| record["id"].as_str().map(str::to_string),
        )
        .expect("ingest");

    assert_eq!(report.processed, 7);
    assert_eq!(report.inserted, 3);
    assert_eq!(report.skipped_no_vector, 1);
    assert_eq!(report.skipped_no_id, 1);
    assert_eq!(report.skipped_unparseable, 1);
    assert_eq!(report.skipped_duplicate, 1);
    assert_eq!(report.inserted + report.skipped(), report.processed);

    assert!(target.exists() && sidecar_path(&target).exists());
    let reloaded = VectorStorage::open(Some(&target), config()).expect("reload");
    assert!(reloaded.contains_id("d"));
    assert!(!reloaded.contains_id("b"));
}

#[test]
fn typed_records_use_news_document() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("docs.jsonl");
    fs::write(&input, "{\"id\":\"x\",\"title\":\"T\",\"published\":\"2020-01-01\"}\n{\"title\":\"no id\"}\n")
        .expect("write");
    let storage = VectorStorage::open(None, config()).expect("storage");
    let report = storage
        .add_items_from_file::<NewsDocument, _, _>(
            &input,
            |doc| Ok(Some(vector(doc.char_length() as u64))),
            |doc| Some(doc.id.clone()),
        )
        .expect("ingest");
    // NewsDocument requires an id, so the second line fails to parse.
    assert_eq!(report.inserted, 1);
    assert_eq!(report.skipped_unparseable, 1);
    assert!(!storage.persist().expect("persist"));
}
