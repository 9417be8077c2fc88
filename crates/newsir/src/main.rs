mod context;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use common::{AppConfig, DocumentStore, Judgement, judgement::load_judgements};
use context::Engine;
use embeddings::Embedder;
use ranking::{
    Channel, LinearModel, TimeFilterStats, build_training_set, rank_with_model, split,
};
use search_core::EmbeddingSource;

#[derive(Debug, Parser)]
#[command(name = "newsir")]
#[command(about = "Hybrid lexical and semantic news retrieval experiments")]
struct Cli {
    /// TOML config; defaults apply when the file is missing.
    #[arg(long, global = true, default_value = "newsir.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Index a JSON lines corpus into the document store.
    IndexDocs { input: PathBuf },
    /// Embed every document of a corpus into the vector storage.
    BuildVectors {
        input: PathBuf,
        #[arg(long, default_value_t = EmbeddingSource::Keywords)]
        source: EmbeddingSource,
        /// Storage path, `vector_path` from the config when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Recall of one retrieval channel against judgement lists.
    Recall {
        #[arg(long = "judgements", required = true, num_args = 1..)]
        judgements: Vec<PathBuf>,
        #[arg(long, default_value_t = Channel::Combined)]
        channel: Channel,
        #[arg(long)]
        size: Option<usize>,
        #[arg(long)]
        vectors: Option<PathBuf>,
    },
    /// Split judgements, compute features and write ranker training files.
    TrainingSet {
        #[arg(long = "judgements", required = true, num_args = 1..)]
        judgements: Vec<PathBuf>,
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Count judged references published after their query document.
    TimeFilter {
        #[arg(long = "judgements", required = true, num_args = 1..)]
        judgements: Vec<PathBuf>,
    },
    /// Rank the fused candidates of one stored document.
    Rank {
        id: String,
        /// JSON linear model, `{"weights":[..4], "bias":0}`.
        #[arg(long)]
        model: Option<PathBuf>,
        #[arg(long)]
        size: Option<usize>,
        #[arg(long)]
        vectors: Option<PathBuf>,
    },
    Status,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::IndexDocs { input } => index_docs(config, &input),
        Commands::BuildVectors {
            input,
            source,
            output,
        } => build_vectors(config, &input, source, output.as_deref()),
        Commands::Recall {
            judgements,
            channel,
            size,
            vectors,
        } => recall(config, &judgements, channel, size, vectors.as_deref()),
        Commands::TrainingSet { judgements, out_dir } => training_set(config, &judgements, &out_dir),
        Commands::TimeFilter { judgements } => time_filter(config, &judgements),
        Commands::Rank {
            id,
            model,
            size,
            vectors,
        } => rank(config, &id, model.as_deref(), size, vectors.as_deref()),
        Commands::Status => status(config),
    }
}

fn index_docs(config: AppConfig, input: &Path) -> anyhow::Result<()> {
    let engine = Engine::open(config)?;
    let report = engine
        .store
        .index_file(input)
        .with_context(|| format!("failed to index {}", input.display()))?;
    print_json(&serde_json::json!({
        "input": input.display().to_string(),
        "documents": engine.store.num_docs(),
        "report": report,
    }))
}

fn build_vectors(
    config: AppConfig,
    input: &Path,
    source: EmbeddingSource,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let engine = Engine::open(config)?;
    let vectors = engine.open_vectors(output)?;
    let report = vectors.add_items_from_file::<common::NewsDocument, _, _>(
        input,
        |doc| match source.text_for(doc, &engine.keywords)? {
            Some(text) => engine.embedder.encode(&text).map(Some),
            None => Ok(None),
        },
        |doc| (!doc.id.is_empty()).then(|| doc.id.clone()),
    )?;
    print_json(&serde_json::json!({
        "input": input.display().to_string(),
        "source": source,
        "vectors": vectors.len(),
        "path": vectors.path().map(|p| p.display().to_string()),
        "report": report,
    }))
}

fn recall(
    config: AppConfig,
    judgement_paths: &[PathBuf],
    channel: Channel,
    size: Option<usize>,
    vectors: Option<&Path>,
) -> anyhow::Result<()> {
    let size = size.unwrap_or(match channel {
        Channel::Lexical => config.retrieval.lexical_size,
        Channel::Semantic | Channel::Combined => config.retrieval.semantic_size,
    });
    let judgements = read_judgements(judgement_paths)?;
    let engine = Engine::open(config)?;
    let evaluator = engine.evaluator(engine.open_vectors(vectors)?);
    let report = evaluator.run(&judgements, channel, size)?;
    engine.log_cache_stats();
    print_json(&report)
}

fn training_set(config: AppConfig, judgement_paths: &[PathBuf], out_dir: &Path) -> anyhow::Result<()> {
    let judgements = read_judgements(judgement_paths)?;
    let (train, val) = split(judgements, config.training.split_ratio, config.training.seed)?;
    let engine = Engine::open(config)?;
    let pipeline = engine.features();

    let mut summary = serde_json::Map::new();
    for (name, part) in [("train", train), ("val", val)] {
        let (data, stats) = build_training_set(&pipeline, &part)?;
        let files = data.write_artifacts(out_dir, name)?;
        summary.insert(
            name.to_string(),
            serde_json::json!({
                "stats": stats,
                "files": files.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
            }),
        );
    }
    print_json(&summary)
}

fn time_filter(config: AppConfig, judgement_paths: &[PathBuf]) -> anyhow::Result<()> {
    let judgements = read_judgements(judgement_paths)?;
    let engine = Engine::open(config)?;
    let stats = TimeFilterStats::collect(engine.store.as_ref(), &judgements);
    print_json(&serde_json::json!({
        "judgements": stats.judgements,
        "references": stats.references,
        "published_after_query": stats.published_after_query,
        "ratio": stats.ratio(),
        "missing_queries": stats.missing_queries.len(),
        "missing_references": stats.missing_references.len(),
    }))
}

fn rank(
    config: AppConfig,
    id: &str,
    model: Option<&Path>,
    size: Option<usize>,
    vectors: Option<&Path>,
) -> anyhow::Result<()> {
    let model = match model {
        Some(path) => LinearModel::load(path)?,
        None => LinearModel::default(),
    };
    let (lexical_size, semantic_size) = size.map_or(
        (config.retrieval.lexical_size, config.retrieval.semantic_size),
        |size| (size, size),
    );
    let engine = Engine::open(config)?;
    let query = engine
        .store
        .get(id)?
        .with_context(|| format!("document not found: {id}"))?;

    let fused = engine
        .fusion(engine.open_vectors(vectors)?)
        .combine_sized(&query, lexical_size, semantic_size)?;
    let rows = engine.features().features_for_candidates(&query, &fused.candidates)?;
    let (ids, features): (Vec<_>, Vec<_>) = rows.into_iter().unzip();
    let (scores, ranked) = rank_with_model(&model, &features, &ids)?;

    let results = ranked
        .iter()
        .zip(&scores)
        .map(|(id, score)| serde_json::json!({ "id": id, "score": score }))
        .collect::<Vec<_>>();
    print_json(&serde_json::json!({
        "query": id,
        "lexical_count": fused.lexical_count,
        "semantic_count": fused.semantic_count,
        "added_by_semantic": fused.added_by_semantic,
        "results": results,
    }))
}

fn status(config: AppConfig) -> anyhow::Result<()> {
    let engine = Engine::open(config)?;
    let vectors = engine.open_vectors(None)?;
    print_json(&serde_json::json!({
        "language": engine.config.language,
        "index_dir": engine.config.index_dir,
        "documents": engine.store.num_docs(),
        "vector_path": engine.config.vector_path,
        "vectors": vectors.len(),
        "vector_capacity": vectors.capacity(),
        "vector_dim": vectors.dim(),
    }))
}

fn read_judgements(paths: &[PathBuf]) -> anyhow::Result<Vec<Judgement>> {
    let list = load_judgements(paths)?;
    if list.skipped_lines > 0 {
        tracing::warn!(skipped = list.skipped_lines, "malformed judgement lines skipped");
    }
    Ok(list.judgements)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
