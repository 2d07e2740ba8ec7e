//! # KB Harness CLI (`kb`)
//!
//! Manage collections and documents in the local knowledge base, run
//! retrieval queries and build grounding prompts.
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
//! | `kb collections list\|create\|rename\|delete` | Manage collections |
//! | `kb add <path>` | Add a document and wait for ingestion |
//! | `kb docs list` | List documents and their status |
//! | `kb delete <file-name>` | Remove a document |
//! | `kb query "<text>"` | Retrieve relevant passages |
//! | `kb prompt "<text>"` | Print the grounded prompt for a message |
//! | `kb status` | Summarize the knowledge base |

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use kb_harness::config::{self, Config};
use kb_harness::core::models::{Collection, DocumentStatus, RetrievalResult};
use kb_harness::logging;
use kb_harness::progress::ProgressMode;
use kb_harness::registry::DocumentEvent;
use kb_harness::KnowledgeBase;

/// KB Harness: a local knowledge base for grounding chat answers.
#[derive(Parser)]
#[command(name = "kb", version, about)]
struct Cli {
    /// Path to configuration file (TOML). Without it, defaults apply.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage collections.
    Collections {
        #[command(subcommand)]
        action: CollectionAction,
    },

    /// Add a document and wait until it is READY or ERROR.
    ///
    /// Exits non-zero if ingestion fails.
    Add {
        /// Path to a .txt, .md or .pdf file.
        path: PathBuf,

        /// Target collection (id or name). Defaults to "General".
        #[arg(long)]
        collection: Option<String>,

        /// Progress output on stderr. Defaults to human when stderr is a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Inspect documents.
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },

    /// Delete a document by file name.
    Delete { file_name: String },

    /// Retrieve the passages most relevant to a query.
    Query {
        text: String,

        #[arg(long)]
        top_k: Option<usize>,

        /// Restrict to a collection (id or name). Repeatable.
        #[arg(long = "collection")]
        collections: Vec<String>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the grounded prompt for a message.
    Prompt {
        text: String,

        #[arg(long)]
        top_k: Option<usize>,

        #[arg(long = "collection")]
        collections: Vec<String>,
    },

    /// Show collection and document counts and embedding availability.
    Status,
}

#[derive(Subcommand)]
enum CollectionAction {
    List,
    Create { name: String },
    Rename { id: String, name: String },
    Delete { id: String },
}

#[derive(Subcommand)]
enum DocsAction {
    List {
        /// Only documents in this collection (id or name).
        #[arg(long)]
        collection: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };

    let kb = KnowledgeBase::open(cfg).await?;
    let result = run(&kb, cli.command).await;
    kb.shutdown().await;
    result
}

async fn run(kb: &KnowledgeBase, command: Commands) -> Result<()> {
    match command {
        Commands::Collections { action } => run_collections(kb, action).await,
        Commands::Add {
            path,
            collection,
            progress,
        } => {
            let mode = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);
            run_add(kb, path, collection.as_deref(), mode).await
        }
        Commands::Docs {
            action: DocsAction::List { collection },
        } => {
            let docs = match collection {
                Some(c) => kb.documents_in(&resolve_collection(kb, &c)?.id),
                None => kb.documents(),
            };
            let names = kb.collections();
            for doc in docs {
                let owner = names
                    .iter()
                    .find(|c| c.id == doc.collection_id)
                    .map(|c| c.name.as_str())
                    .unwrap_or("?");
                match &doc.error_message {
                    Some(msg) => println!("{}\t{}\t{}\t{}", doc.file_name, owner, doc.status, msg),
                    None => println!("{}\t{}\t{}", doc.file_name, owner, doc.status),
                }
            }
            Ok(())
        }
        Commands::Delete { file_name } => {
            if !kb.delete_document(&file_name).await {
                bail!("No document named '{}'", file_name);
            }
            println!("Deleted {}", file_name);
            Ok(())
        }
        Commands::Query {
            text,
            top_k,
            collections,
            json,
        } => {
            let results = retrieve(kb, &text, top_k, &collections).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_results(&results);
            }
            Ok(())
        }
        Commands::Prompt {
            text,
            top_k,
            collections,
        } => {
            let results = retrieve(kb, &text, top_k, &collections).await?;
            println!("{}", kb.build_prompt(&text, &results));
            Ok(())
        }
        Commands::Status => {
            let _ = kb.initialize().await;
            println!("data dir:    {}", kb.config().data.dir.display());
            println!("collections: {}", kb.collections().len());
            println!("documents:   {}", kb.documents().len());
            println!("ready:       {}", kb.ready_count());
            println!(
                "embeddings:  {} ({})",
                kb.config().embedding.provider,
                if kb.is_embedding_model_available() {
                    "available"
                } else {
                    "unavailable"
                }
            );
            Ok(())
        }
    }
}

async fn run_collections(kb: &KnowledgeBase, action: CollectionAction) -> Result<()> {
    match action {
        CollectionAction::List => {
            for c in kb.collections() {
                println!("{}\t{}\t{} docs", c.id, c.name, kb.documents_in(&c.id).len());
            }
        }
        CollectionAction::Create { name } => {
            let c = kb.create_collection(&name);
            println!("{}\t{}", c.id, c.name);
        }
        CollectionAction::Rename { id, name } => {
            let c = resolve_collection(kb, &id)?;
            kb.rename_collection(&c.id, &name);
            println!("{}\t{}", c.id, name);
        }
        CollectionAction::Delete { id } => {
            let c = resolve_collection(kb, &id)?;
            kb.delete_collection(&c.id).await;
            println!("Deleted collection {}", c.name);
        }
    }
    Ok(())
}

async fn run_add(
    kb: &KnowledgeBase,
    path: PathBuf,
    collection: Option<&str>,
    mode: ProgressMode,
) -> Result<()> {
    let path = std::fs::canonicalize(&path)
        .with_context(|| format!("File not found: {}", path.display()))?;
    let collection = match collection {
        Some(c) => resolve_collection(kb, c)?,
        None => kb.default_collection(),
    };

    let mut events = kb.subscribe();
    let handle = kb.add_document(&path, &collection.id)?;
    let file_name = handle.file_name().to_string();

    let reporter = mode.reporter();
    let watched = file_name.clone();
    let render = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if event.file_name() == watched => {
                    reporter.report(&event);
                    let done = match &event {
                        DocumentEvent::Changed { status, .. } => status.is_terminal(),
                        DocumentEvent::Removed { .. } => true,
                    };
                    if done {
                        break;
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let outcome = handle.wait().await;
    let _ = tokio::time::timeout(Duration::from_secs(1), render).await;

    match outcome {
        Some(doc) if doc.status == DocumentStatus::Ready => {
            println!(
                "{}\t{}\t{} segments",
                doc.file_name,
                collection.name,
                doc.segment_ids.len()
            );
            Ok(())
        }
        Some(doc) => bail!(
            "Failed to ingest {}: {}",
            doc.file_name,
            doc.error_message.unwrap_or_default()
        ),
        None => bail!("{} was removed before ingestion finished", file_name),
    }
}

async fn retrieve(
    kb: &KnowledgeBase,
    text: &str,
    top_k: Option<usize>,
    collections: &[String],
) -> Result<Vec<RetrievalResult>> {
    let ids = collections
        .iter()
        .map(|c| resolve_collection(kb, c).map(|c| c.id))
        .collect::<Result<Vec<_>>>()?;
    if let Err(e) = kb.initialize().await {
        eprintln!("warning: {}", e);
    }
    let top_k = top_k.unwrap_or(kb.config().retrieval.top_k);
    Ok(kb.query(text, top_k, &ids).await)
}

fn resolve_collection(kb: &KnowledgeBase, id_or_name: &str) -> Result<Collection> {
    kb.find_collection(id_or_name)
        .with_context(|| format!("Unknown collection: '{}'", id_or_name))
}

fn print_results(results: &[RetrievalResult]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }
    for (i, r) in results.iter().enumerate() {
        match r.page_number {
            Some(page) => println!("{}. [{:.3}] {} (page {})", i + 1, r.score, r.file_name, page),
            None => println!("{}. [{:.3}] {}", i + 1, r.score, r.file_name),
        }
        let snippet: String = r.content.chars().take(200).collect();
        println!("   {}", snippet.replace('\n', " "));
    }
}
