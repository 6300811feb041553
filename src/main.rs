mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "searchive")]
#[command(about = "Document auto-tagging with semantic tag deduplication", long_about = None)]
#[command(version)]
struct Cli {
    /// Data directory (default: $SEARCHIVE_DATA_DIR or ./.searchive)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default searchive.json into the data directory
    Init {
        #[arg(long, help = "Overwrite an existing config")]
        force: bool,
    },
    /// Ingest a text file, or every matching file under a directory
    Ingest {
        path: PathBuf,
        #[arg(long, help = "File name glob for directories, e.g. \"*.md\"")]
        pattern: Option<String>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Show the keywords a file would be tagged with, without storing anything
    Keywords {
        file: Option<PathBuf>,
        #[arg(long, help = "Use an ingested document instead of a file")]
        document: Option<i64>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Delete a document and its tag links
    Delete {
        id: i64,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    Tags {
        #[command(subcommand)]
        action: TagsAction,
    },
    /// Search documents by content, or by tag with --tag
    Search {
        query: Option<String>,
        #[arg(long = "tag", help = "Tag name (repeatable, matches any)")]
        tags: Vec<String>,
        #[arg(short, long, default_value = "10", help = "Limit content results")]
        limit: usize,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    Status {
        #[arg(long, help = "JSON output")]
        json: bool,
    },
}

/// Tag management subcommands
#[derive(Subcommand)]
enum TagsAction {
    /// List tags by usage
    List {
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Show the tags of a document
    Show {
        document_id: i64,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// List existing tags similar to a tag (merge candidates)
    Similar {
        name: String,
        #[arg(short, long, help = "Minimum similarity (default: configured threshold)")]
        threshold: Option<f32>,
        #[arg(short, long, default_value = "10")]
        limit: usize,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Re-mirror missing tags into the tag index and drop orphaned entries
    Reconcile {
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Report tag index consistency (exit 1 if inconsistent)
    Audit {
        #[arg(long, help = "JSON output")]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = cli.data_dir.as_deref();

    if let Commands::Init { force } = cli.command {
        return commands::init::run(data_dir, force);
    }

    let service = commands::open_service(data_dir)?;
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Init { .. } => Ok(()),
            Commands::Ingest {
                path,
                pattern,
                json,
            } => commands::ingest::run(&service, &path, pattern.as_deref(), json).await,
            Commands::Keywords {
                file,
                document,
                json,
            } => commands::keywords::run(&service, file.as_deref(), document, json).await,
            Commands::Delete { id, json } => commands::delete::run(&service, id, json).await,
            Commands::Tags { action } => match action {
                TagsAction::List { limit, json } => {
                    commands::tags::run_list(&service, limit, json).await
                }
                TagsAction::Show { document_id, json } => {
                    commands::tags::run_show(&service, document_id, json).await
                }
                TagsAction::Similar {
                    name,
                    threshold,
                    limit,
                    json,
                } => commands::tags::run_similar(&service, &name, threshold, limit, json).await,
                TagsAction::Reconcile { json } => {
                    commands::tags::run_reconcile(&service, json).await
                }
                TagsAction::Audit { json } => commands::tags::run_audit(&service, json).await,
            },
            Commands::Search {
                query,
                tags,
                limit,
                json,
            } => commands::search::run(&service, query.as_deref(), &tags, limit, json).await,
            Commands::Status { json } => commands::status::run(&service, json).await,
        }
    })
}
