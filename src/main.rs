//! # ragpack CLI
//!
//! Builds retrieval indexes from course-material archives and serves the
//! tutoring API.
//!
//! ## Usage
//!
//! ```bash
//! ragpack --config ./config/ragpack.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragpack serve` | Start the HTTP server |
//! | `ragpack build <archive> -o <out.zip>` | Build a packaged index from an archive |
//! | `ragpack ask "<question>" --archive <archive>` | Answer a question against an archive |
//! | `ragpack inspect <archive>` | Report what an archive contains without embedding it |
//!
//! Without `--config`, built-in defaults are used.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ragpack::chunk::chunk_documents;
use ragpack::completion::create_completion;
use ragpack::config::{self, Config};
use ragpack::corpus;
use ragpack::detect::{self, IngestionMode};
use ragpack::embedding::create_provider;
use ragpack::index::RetrievalIndex;
use ragpack::pipeline;
use ragpack::server;
use ragpack::tutor::Tutor;
use ragpack::workspace::{ReleaseGuard, Workspace};

#[derive(Parser)]
#[command(
    name = "ragpack",
    about = "Build, package, and query retrieval indexes of course material",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Build a packaged index from a zip archive of course material.
    Build {
        /// Zip archive of raw documents (or an existing package).
        archive: PathBuf,

        /// Where to write the packaged index.
        #[arg(short, long, default_value = "rag_index.zip")]
        output: PathBuf,
    },

    /// Answer a question using the material in an archive.
    Ask {
        question: String,

        /// Zip archive to answer from. Defaults to `[corpus].default_archive`.
        #[arg(long)]
        archive: Option<PathBuf>,
    },

    /// Show the ingestion mode and contents of an archive.
    Inspect { archive: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ragpack=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Serve => server::run_server(&config).await?,
        Commands::Build { archive, output } => run_build(&config, &archive, &output).await?,
        Commands::Ask { question, archive } => {
            run_ask(&config, &question, archive.as_deref()).await?
        }
        Commands::Inspect { archive } => run_inspect(&config, &archive).await?,
    }

    Ok(())
}

async fn run_build(config: &Config, archive: &Path, output: &Path) -> anyhow::Result<()> {
    let embedder = create_provider(&config.embedding)?;
    let workspace = Workspace::open(&config.workspace.root)?;
    let guard = ReleaseGuard::new(workspace.allocate());

    pipeline::stage_archive(&guard, None, Some(archive)).await?;
    let prepared = pipeline::prepare_index(&guard, config, embedder).await?;
    let (entries, mode) = (prepared.index.len(), prepared.mode.label());
    let (guard, package) = pipeline::package_index(guard, prepared.index).await?;

    tokio::fs::copy(&package, output)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;
    if let Some(report) = guard.release_now() {
        report.log();
    }

    println!(
        "Packaged {} chunks ({} input) → {}",
        entries,
        mode,
        output.display()
    );
    Ok(())
}

async fn run_ask(config: &Config, question: &str, archive: Option<&Path>) -> anyhow::Result<()> {
    let embedder = create_provider(&config.embedding)?;
    let completion = create_completion(&config.completion)?;
    let workspace = Workspace::open(&config.workspace.root)?;
    let guard = ReleaseGuard::new(workspace.allocate());

    let source = archive.or_else(|| config.corpus.resolve_default());
    pipeline::stage_archive(&guard, None, source).await?;
    let prepared = pipeline::prepare_index(&guard, config, embedder.clone()).await?;

    let tutor = Tutor::new(config, embedder, completion);
    let response = tutor.ask(&prepared.index, question).await;
    if let Some(report) = guard.release_now() {
        report.log();
    }
    let response = response?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn run_inspect(config: &Config, archive: &Path) -> anyhow::Result<()> {
    let workspace = Workspace::open(&config.workspace.root)?;
    let archive = archive.to_path_buf();
    let chunking = config.chunking.clone();

    let summary = in_released_unit(&workspace, move |dest| {
        corpus::unpack_archive(&archive, dest)?;
        let mode = detect::detect(dest)?;
        let data_files = corpus::list_data_files(dest);

        let mut lines = vec![format!("Mode: {}", mode.label())];
        match &mode {
            IngestionMode::PreBuilt(dir) => {
                let index = RetrievalIndex::read(dir)?;
                lines.push(format!("Index: {}", dir.display()));
                lines.push(format!("Model: {} ({} dims)", index.model(), index.dims()));
                lines.push(format!("Chunks: {}", index.len()));
            }
            IngestionMode::Raw => {
                let scan = corpus::collect_documents(dest)?;
                let chunks = chunk_documents(&scan.documents, &chunking);
                lines.push(format!("Supported files: {}", scan.files_seen));
                lines.push(format!("Documents: {}", scan.documents.len()));
                lines.push(format!("Chunks: {}", chunks.len()));
                for (path, reason) in &scan.skipped {
                    lines.push(format!("Skipped: {} ({})", path.display(), reason));
                }
            }
        }
        if !data_files.is_empty() {
            lines.push(format!("Data files: {}", data_files.join(", ")));
        }
        Ok(lines.join("\n"))
    })
    .await?;

    println!("{}", summary);
    Ok(())
}

/// Run `f` on the blocking pool against a fresh unit's extraction directory.
///
/// The unit is released before returning, including when `f` fails or panics.
async fn in_released_unit<T, F>(workspace: &Workspace, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&Path) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let guard = ReleaseGuard::new(workspace.allocate());
    let dest = guard.extract_dir().to_path_buf();
    let outcome = tokio::task::spawn_blocking(move || f(&dest)).await;

    if let Some(report) = guard.release_now() {
        report.log();
    }
    outcome?
}
