//! # docroute CLI
//!
//! ```bash
//! docroute --config ./config/docroute.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docroute init` | Create the SQLite database and run schema migrations |
//! | `docroute ingest <file> --session <id>` | Chunk, embed and register a page-marked text file |
//! | `docroute docs list [--session <id>]` | List documents per session |
//! | `docroute docs delete <doc> --session <id>` | Remove a document and its chunks |
//! | `docroute search "<query>" --session <id>` | Two-stage search within a session |
//! | `docroute route "<query>" [--session <id>]` | Print the evidence plan for a query as JSON |
//! | `docroute serve` | Start the HTTP server |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use docroute::app::App;
use docroute::config::{self, Config};
use docroute::{db, logging, migrate, server};

/// Session-scoped document retrieval and evidence routing.
#[derive(Parser)]
#[command(name = "docroute", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docroute.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Ingest a text file with `--- Page N ---` markers into a session.
    Ingest {
        /// Path to the extracted text.
        file: PathBuf,

        /// Session that owns the document.
        #[arg(long)]
        session: String,

        /// Display name; defaults to the file name.
        #[arg(long)]
        filename: Option<String>,
    },

    /// Inspect or remove registered documents.
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },

    /// Dense recall followed by cross-encoder reranking.
    Search {
        query: String,

        #[arg(long)]
        session: String,

        /// Maximum number of results (default: `retrieval.max_results`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Classify, gate and route a query, then print the evidence plan.
    Route {
        query: String,

        /// Omit for a session without documents.
        #[arg(long, default_value = "")]
        session: String,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum DocsAction {
    /// List documents in upload order. Without `--session`, lists every session.
    List {
        #[arg(long)]
        session: Option<String>,
    },
    /// Delete one document.
    Delete {
        document_id: String,

        #[arg(long)]
        session: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Ingest {
            file,
            session,
            filename,
        } => {
            run_ingest(cfg, &file, &session, filename).await?;
        }
        Commands::Docs { action } => {
            let app = App::open(cfg).await?;
            match action {
                DocsAction::List { session } => {
                    let sessions = match session {
                        Some(s) => vec![s],
                        None => app.registry.sessions().await,
                    };
                    if sessions.is_empty() {
                        println!("No documents.");
                    }
                    for session_id in sessions {
                        let docs = app.registry.documents(&session_id).await;
                        println!("{} ({} documents)", session_id, docs.len());
                        for d in docs {
                            println!(
                                "  {}  {}  pages={} chunks={} uploaded={}",
                                d.document_id,
                                d.filename,
                                d.total_pages,
                                d.total_chunks,
                                d.upload_time.to_rfc3339()
                            );
                        }
                    }
                }
                DocsAction::Delete {
                    document_id,
                    session,
                } => match app.ingestor.remove_document(&session, &document_id).await? {
                    Some(d) => println!("Removed {} ({})", d.document_id, d.filename),
                    None => anyhow::bail!(
                        "document {} not found in session {}",
                        document_id,
                        session
                    ),
                },
            }
        }
        Commands::Search {
            query,
            session,
            limit,
        } => {
            let app = App::open(cfg).await?;
            let max_results = limit.unwrap_or(app.config.retrieval.max_results).max(1);
            let results = app.engine.search(&query, &session, max_results).await;
            if results.is_empty() {
                println!("No results.");
            }
            for (i, r) in results.iter().enumerate() {
                println!(
                    "{}. [rerank {:.3} | sim {:.3}] {} p.{}",
                    i + 1,
                    r.rerank_score.unwrap_or(f32::NAN),
                    r.similarity_score,
                    r.metadata.filename,
                    r.metadata.page_number
                );
                println!("   {}", snippet(&r.content, 200));
            }
        }
        Commands::Route { query, session } => {
            let app = App::open(cfg).await?;
            let plan = app.pipeline.plan(&query, &session).await;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Commands::Serve => {
            let app = Arc::new(App::open(cfg).await?);
            server::run_server(app).await?;
        }
    }

    Ok(())
}

async fn run_ingest(
    cfg: Config,
    file: &std::path::Path,
    session: &str,
    filename: Option<String>,
) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let file_size = std::fs::metadata(file)?.len();
    let filename = filename.unwrap_or_else(|| {
        file.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string())
    });

    let app = App::open(cfg).await?;
    let report = app
        .ingestor
        .ingest(session, &filename, &text, file_size)
        .await?;
    println!(
        "Ingested {} as {}: {} chunks, {} pages",
        report.filename, report.document_id, report.total_chunks, report.total_pages
    );
    Ok(())
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}…", cut)
}
