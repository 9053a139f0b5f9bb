//! recall - maintenance CLI for the vector store.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use recall_core::{
    CancellationToken, CollectionConfig, Distance, DocumentType, SearchFilter, StoreConfig,
};
use recall_store::open_store;

/// recall - hybrid retrieval engine administration
#[derive(Parser)]
#[command(name = "recall")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file path (default: user config dir, then ./recall.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path override
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show store statistics
    Stats,

    /// List collections
    Collections,

    /// Create a collection
    CreateCollection {
        /// Collection name
        name: String,

        /// Embedding dimension
        #[arg(short = 'd', long)]
        dimension: usize,

        /// Distance metric (cosine, euclidean, dot)
        #[arg(short = 'm', long, default_value = "cosine")]
        metric: String,
    },

    /// Delete a collection and all of its documents
    DeleteCollection {
        /// Collection name
        name: String,
    },

    /// Lexical search over document content
    Search {
        /// Search query
        query: String,

        /// Maximum number of results
        #[arg(short = 'k', long, default_value = "10")]
        top_k: usize,

        /// Restrict to a connection id
        #[arg(long)]
        connection: Option<String>,

        /// Restrict to a document type
        #[arg(long, value_name = "TYPE")]
        doc_type: Option<String>,
    },

    /// Fetch a document by id
    Get {
        /// Document id
        id: String,
    },

    /// Delete a document by id
    Delete {
        /// Document id
        id: String,
    },

    /// Compact and reindex the store
    Optimize,

    /// Write a restorable snapshot
    Backup {
        /// Snapshot destination path
        path: PathBuf,
    },

    /// Replace all state from a snapshot (destructive)
    Restore {
        /// Snapshot source path
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("failed to set up logging");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> recall_core::Result<()> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::load_default()?,
    };
    if let Some(path) = cli.database {
        config.sqlite.path = path;
    }

    let store = open_store(&config).await?;
    let cancel = CancellationToken::new();

    match cli.command {
        Commands::Stats => {
            let stats = store.stats().await?;
            println!("documents:   {}", stats.total_documents);
            println!("collections: {}", stats.total_collections);
            println!("storage:     {} bytes", stats.storage_bytes);
            println!("optimized:   {}", format_millis(stats.last_optimized));
            println!("backed up:   {}", format_millis(stats.last_backup));
        }

        Commands::Collections => {
            for name in store.list_collections().await? {
                let stats = store.collection_stats(&name).await?;
                println!(
                    "{}  dim={} metric={} docs={} index={}B",
                    stats.name,
                    stats.dimension,
                    stats.distance,
                    stats.document_count,
                    stats.index_size_bytes,
                );
            }
        }

        Commands::CreateCollection {
            name,
            dimension,
            metric,
        } => {
            let distance = Distance::parse(&metric).ok_or_else(|| {
                recall_core::StoreError::validation(format!("unknown metric: {metric}"))
            })?;
            store
                .create_collection(CollectionConfig::new(&name, dimension).with_distance(distance))
                .await?;
            println!("created collection {name}");
        }

        Commands::DeleteCollection { name } => {
            store.delete_collection(&name).await?;
            println!("deleted collection {name}");
        }

        Commands::Search {
            query,
            top_k,
            connection,
            doc_type,
        } => {
            let mut filter = SearchFilter::new();
            if let Some(conn) = connection {
                filter = filter.connection(conn);
            }
            if let Some(t) = doc_type {
                let parsed: DocumentType = t.parse()?;
                filter = filter.doc_type(parsed);
            }

            let results = store.search_by_text(&query, top_k, &filter, &cancel).await?;
            if results.is_empty() {
                println!("no results");
            }
            for (rank, doc) in results.iter().enumerate() {
                println!(
                    "{:2}. [{:.4}] {} ({}, {})",
                    rank + 1,
                    doc.score.unwrap_or(0.0),
                    doc.id,
                    doc.doc_type,
                    doc.connection_id,
                );
                println!("    {}", preview(&doc.content, 100));
            }
        }

        Commands::Get { id } => {
            let doc = store.get_document(&id).await?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }

        Commands::Delete { id } => {
            store.delete_document(&id).await?;
            println!("deleted {id}");
        }

        Commands::Optimize => {
            store.optimize(&cancel).await?;
            println!("optimize completed");
        }

        Commands::Backup { path } => {
            store.backup(&path, &cancel).await?;
            println!("backup written to {}", path.display());
        }

        Commands::Restore { path } => {
            store.restore(&path, &cancel).await?;
            println!("restored from {}", path.display());
        }
    }

    Ok(())
}

fn format_millis(millis: Option<u64>) -> String {
    match millis {
        Some(ms) => format!("{ms} (unix millis)"),
        None => "never".to_string(),
    }
}

fn preview(content: &str, max: usize) -> String {
    let flat = content.replace('\n', " ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max).collect();
        format!("{cut}...")
    }
}
