#![allow(deprecated)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::str::contains;

fn fixture(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
        .display()
        .to_string()
}

fn setup_workspace() -> (tempfile::TempDir, PathBuf) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = tmp.path().join("newsir.toml");
    std::fs::write(
        &config,
        format!(
            r#"language = "english"
index_dir = '{index}'
vector_path = '{vectors}'

[ann]
dim = 64
max_elements = 100
ef_construction = 40
m = 8
ef = 20
num_threads = 1
batch_size = 4

[retrieval]
lexical_size = 8
semantic_size = 8
relevance_cutoff = 4

[[keywords.fields]]
field = "title"
min_term_freq = 1
min_doc_freq = 1
max_terms = 3

[[keywords.fields]]
field = "body"
min_term_freq = 2
min_doc_freq = 1
max_terms = 10
"#,
            index = tmp.path().join("index").display(),
            vectors = tmp.path().join("vectors/storage.bin").display(),
        ),
    )
    .expect("write config");
    (tmp, config)
}

fn newsir(cwd: &Path, config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("newsir").expect("binary");
    cmd.current_dir(cwd)
        .env("NEWSIR_ALLOW_PSEUDO_EMBED", "true")
        .args(["--config", &config.display().to_string()]);
    cmd
}

#[test]
fn index_vectors_recall_flow_works() {
    let (tmp, config) = setup_workspace();
    let cwd = tmp.path();
    let news = fixture("news.jsonl");
    let judgements = fixture("judgements.jsonl");

    newsir(cwd, &config)
        .args(["index-docs", &news])
        .assert()
        .success()
        .stdout(contains("\"inserted\": 8"));

    newsir(cwd, &config)
        .args(["build-vectors", &news, "--source", "keywords"])
        .assert()
        .success()
        .stdout(contains("\"vectors\": 8"));
    assert!(cwd.join("vectors/storage.bin").exists());
    assert!(cwd.join("vectors/storage.bin.labels.json").exists());

    newsir(cwd, &config)
        .args(["status"])
        .assert()
        .success()
        .stdout(contains("\"documents\": 8"))
        .stdout(contains("\"vectors\": 8"));

    newsir(cwd, &config)
        .args(["recall", "--judgements", &judgements, "--channel", "lexical"])
        .assert()
        .success()
        .stdout(contains("\"evaluated\": 3"))
        .stdout(contains("\"exceptions\": 1"))
        .stdout(contains("\"recall_avg\": 0.625"));

    newsir(cwd, &config)
        .args(["recall", "--judgements", &judgements, "--channel", "combined"])
        .assert()
        .success()
        .stdout(contains("\"channel\": \"combined\""));

    newsir(cwd, &config)
        .args(["recall", "--judgements", &judgements, "--channel", "combined", "--size", "200"])
        .assert()
        .failure()
        .stderr(contains("exceeds ef 20"));

    newsir(cwd, &config)
        .args(["time-filter", "--judgements", &judgements])
        .assert()
        .success()
        .stdout(contains("\"references\": 9"))
        .stdout(contains("\"published_after_query\": 1"));

    newsir(cwd, &config)
        .args(["rank", "m2"])
        .assert()
        .success()
        .stdout(contains("\"query\": \"m2\""));
}

#[test]
fn training_set_writes_artifacts() {
    let (tmp, config) = setup_workspace();
    let cwd = tmp.path();
    let out = cwd.join("artifacts");

    newsir(cwd, &config)
        .args(["index-docs", &fixture("news.jsonl")])
        .assert()
        .success();

    newsir(cwd, &config)
        .args([
            "training-set",
            "--judgements",
            &fixture("judgements.jsonl"),
            "--out-dir",
            &out.display().to_string(),
        ])
        .assert()
        .success()
        .stdout(contains("\"train\""));

    for name in ["X_train.txt", "y_train.txt", "query_train.txt", "X_val.txt", "y_val.txt", "query_val.txt"] {
        assert!(out.join(name).exists(), "{name} missing");
    }
}

#[test]
fn missing_judgement_file_fails() {
    let (tmp, config) = setup_workspace();
    newsir(tmp.path(), &config)
        .args(["recall", "--judgements", "does-not-exist.jsonl"])
        .assert()
        .failure();
}
