use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use docqa::config::ConfigArgs;
use docqa::embedder::pool::EmbeddingPool;
use docqa::present::truncate_chars;
use docqa::{Assistant, IngestReport};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "docqa-ingest",
    about = "Build or extend the vector store snapshot from PDF and text documents"
)]
struct IngestCli {
    /// Files or directories to ingest (.pdf, .txt, .md)
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    #[command(flatten)]
    config: ConfigArgs,

    /// Characters per chunk
    #[arg(long, env = "DOCQA_CHUNK_SIZE")]
    chunk_size: Option<usize>,

    /// Characters shared by neighboring chunks
    #[arg(long, env = "DOCQA_CHUNK_OVERLAP")]
    chunk_overlap: Option<usize>,

    /// Chunks sent per embedding batch
    #[arg(long, env = "DOCQA_EMBED_BATCH")]
    batch_size: Option<usize>,

    /// Number of concurrent embedding workers
    #[arg(long, env = "DOCQA_EMBED_THREADS", default_value_t = 1)]
    threads: usize,

    /// Print the first N chunks of each document before embedding
    #[arg(long, default_value_t = 0)]
    preview: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = IngestCli::parse();
    let mut config = cli.config.resolve().context("failed to load configuration")?;
    if let Some(size) = cli.chunk_size {
        config.chunking.chunk_size = size;
    }
    if let Some(overlap) = cli.chunk_overlap {
        config.chunking.chunk_overlap = overlap;
    }
    if let Some(batch) = cli.batch_size {
        config.embedding.batch_size = batch;
    }
    config.validate().context("invalid chunking options")?;
    let batch_size = config.embedding.batch_size.max(1);
    let snapshot_path = config.snapshot_path.clone();

    let assistant = Assistant::open(config)
        .with_context(|| format!("failed to open vector store at {}", snapshot_path.display()))?;
    let pool = EmbeddingPool::spawn(assistant.gateway().clone(), cli.threads, batch_size);

    let mut totals = IngestReport::default();
    for path in &cli.paths {
        let report = assistant
            .ingest_path_with(path, |file, texts| {
                if cli.preview > 0 {
                    let label = file
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_else(|| file.display().to_string());
                    for (idx, text) in texts.iter().take(cli.preview).enumerate() {
                        let preview = text.replace('\n', " ");
                        println!("{label} #{idx} | {}", truncate_chars(&preview, 160));
                    }
                }
                pool.embed(texts)
            })
            .with_context(|| format!("failed to ingest {}", path.display()))?;
        totals.indexed.extend(report.indexed);
        totals.skipped.extend(report.skipped);
        totals.empty.extend(report.empty);
        totals.failed.extend(report.failed);
        totals.chunks_added += report.chunks_added;
    }

    for (file, error) in &totals.failed {
        eprintln!("failed: {}: {error}", file.display());
    }
    let stats = assistant.stats();
    eprintln!(
        "ingest complete: {} chunks added from {} documents \
         ({} skipped, {} empty, {} failed); store holds {} chunks from {} documents.",
        totals.chunks_added,
        totals.indexed.len(),
        totals.skipped.len(),
        totals.empty.len(),
        totals.failed.len(),
        stats.chunks,
        stats.documents
    );
    Ok(())
}
