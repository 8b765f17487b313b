//! # Knowledge RAG CLI (`kb`)
//!
//! The `kb` binary ingests documents, answers questions against them, and
//! starts the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! kb --config ./config/kb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kb serve` | Start the JSON + SSE HTTP server |
//! | `kb ingest <paths>...` | Ingest files, or every supported file under directories |
//! | `kb ask "<question>"` | Answer a question, optionally streaming |
//! | `kb delete <id>` | Delete a document and its vectors |
//! | `kb clear` | Drop every document and vector |
//! | `kb stats` | Print document and vector counts |
//! | `kb chunk <file>` | Print the chunks a file would produce (offline) |
//!
//! Documents are listed only in the process that ingested them; vectors
//! persist across processes when the Qdrant backend is reachable.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use walkdir::WalkDir;

use knowledge_rag::config::{self, Config};
use knowledge_rag::extract::{extract_text, is_supported, SUPPORTED_EXTENSIONS};
use knowledge_rag::logging::init_tracing;
use knowledge_rag::pipeline::{AskEvent, Orchestrator};
use knowledge_rag::server;
use knowledge_rag_core::chunk;
use knowledge_rag_core::models::ConversationTurn;
use knowledge_rag_core::normalize::normalize;

/// Knowledge RAG: question answering grounded in your own documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kb.example.toml` for every setting.
#[derive(Parser)]
#[command(
    name = "kb",
    about = "Knowledge RAG: question answering grounded in your own documents",
    version,
    long_about = "Knowledge RAG ingests txt, md, pdf and docx documents, splits them into \
    overlapping chunks, embeds them into a vector index, and answers questions with a language \
    model grounded in the most similar chunks."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/kb.toml`. When that default file does not
    /// exist, built-in defaults are used.
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve {
        /// Override `server.bind` from config.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Ingest documents.
    ///
    /// Directories are walked recursively; files with unsupported
    /// extensions inside them are skipped.
    Ingest {
        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Answer a question.
    Ask {
        question: String,

        /// Print the answer as it is generated.
        #[arg(long)]
        stream: bool,

        /// Number of chunks to retrieve (overrides `retrieval.top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Also print the retrieval note and model reasoning.
        #[arg(long)]
        show_thinking: bool,
    },

    /// Delete a document and all of its vectors.
    Delete {
        /// Document id printed by `kb ingest`.
        id: String,
    },

    /// Drop every document and vector.
    Clear,

    /// Print document and vector counts.
    Stats,

    /// Print the chunks a file would be split into.
    ///
    /// Runs extraction, normalization and chunking only; no embedding,
    /// index or generation service is contacted.
    Chunk {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (cfg, defaulted) = config::load_or_default(&cli.config)?;
    init_tracing(&cfg.logging);
    if defaulted {
        tracing::warn!(path = %cli.config.display(), "config file not found; using built-in defaults");
    }

    // Offline commands
    if let Commands::Chunk { file } = &cli.command {
        return run_chunk(&cfg, file);
    }

    let orchestrator = Arc::new(Orchestrator::from_config(&cfg).await?);
    if orchestrator.status().degraded {
        eprintln!("Warning: vector database unreachable; using a temporary in-memory index.");
    }

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| cfg.server.bind.clone());
            server::run_server(orchestrator, &bind).await?;
        }
        Commands::Ingest { paths } => {
            run_ingest(&orchestrator, &paths).await?;
        }
        Commands::Ask {
            question,
            stream,
            top_k,
            show_thinking,
        } => {
            if stream {
                run_ask_stream(&orchestrator, &question, top_k, show_thinking).await?;
            } else {
                let turn = orchestrator.ask(&question, top_k).await?;
                print_turn(&turn, show_thinking);
            }
        }
        Commands::Delete { id } => {
            let removed = orchestrator.delete_document(&id).await?;
            println!("Deleted {} ({} vectors removed).", id, removed);
        }
        Commands::Clear => {
            orchestrator.clear_knowledge_base().await?;
            println!("Knowledge base cleared.");
        }
        Commands::Stats => {
            let stats = orchestrator.stats().await?;
            let status = orchestrator.status();
            println!("Index:      {}", status.index_backend);
            println!("Documents:  {}", stats.document_count);
            println!("Vectors:    {}", stats.vector_count);
            println!(
                "Embedding:  {} ({} dims)",
                status.embedding_model, status.embedding_dims
            );
            println!("Generation: {}", status.generation_model);
        }
        Commands::Chunk { .. } => unreachable!("handled before backends are built"),
    }

    Ok(())
}

/// Expand the given paths into the list of supported files to ingest.
fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry?;
                if entry.file_type().is_file() && is_supported(&entry.file_name().to_string_lossy())
                {
                    files.push(entry.into_path());
                }
            }
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            bail!("No such file or directory: {}", path.display());
        }
    }
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn run_ingest(orchestrator: &Orchestrator, paths: &[PathBuf]) -> Result<()> {
    let files = collect_files(paths)?;
    if files.is_empty() {
        println!(
            "No supported files found (supported: {}).",
            SUPPORTED_EXTENSIONS.join(", ")
        );
        return Ok(());
    }

    let mut failed = 0usize;
    for path in &files {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        match orchestrator.ingest_bytes(file_name(path), bytes).await {
            Ok(report) => println!(
                "ingested {}  id={}  chunks={}",
                path.display(),
                report.document_id,
                report.chunk_count
            ),
            Err(e) => {
                failed += 1;
                eprintln!("failed   {}  {}", path.display(), e);
            }
        }
    }

    println!(
        "\n{} ingested, {} failed.",
        files.len() - failed,
        failed
    );
    if failed > 0 {
        bail!("{} file(s) failed to ingest", failed);
    }
    Ok(())
}

fn print_turn(turn: &ConversationTurn, show_thinking: bool) {
    if show_thinking {
        if let Some(thinking) = &turn.thinking {
            println!("--- thinking ---\n{}\n----------------\n", thinking);
        }
    }
    println!("{}", turn.answer);
    print_sources(turn.mode.as_str(), &turn.sources);
}

fn print_sources(mode: &str, sources: &[knowledge_rag_core::models::SourceRef]) {
    println!("\n[{}]", mode);
    for (i, source) in sources.iter().enumerate() {
        println!(
            "  [Source {}] {} #{}  (score {:.3})",
            i + 1,
            source.filename,
            source.chunk_index,
            source.score
        );
    }
}

async fn run_ask_stream(
    orchestrator: &Orchestrator,
    question: &str,
    top_k: Option<usize>,
    show_thinking: bool,
) -> Result<()> {
    let mut events = orchestrator.ask_stream(question, top_k).await?;
    let mut stdout = std::io::stdout();

    while let Some(event) = events.next().await {
        match event? {
            AskEvent::Thinking(text) => {
                if show_thinking {
                    eprintln!("{}", text);
                }
            }
            AskEvent::Delta(text) => {
                write!(stdout, "{}", text)?;
                stdout.flush()?;
            }
            AskEvent::Done { mode, sources } => {
                println!();
                print_sources(mode.as_str(), &sources);
            }
        }
    }
    Ok(())
}

fn run_chunk(cfg: &Config, file: &Path) -> Result<()> {
    let bytes =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let raw = extract_text(&file_name(file), &bytes)?;
    let text = normalize(&raw);
    let chunks = chunk::split("preview", &text, &cfg.chunking.params());

    println!(
        "{}: {} chars, {} chunk(s)\n",
        file.display(),
        text.chars().count(),
        chunks.len()
    );
    for c in &chunks {
        println!(
            "--- chunk {} [{}..{}] ({} chars) ---",
            c.chunk_index,
            c.start,
            c.end,
            c.text.chars().count()
        );
        println!("{}\n", c.text);
    }
    Ok(())
}
