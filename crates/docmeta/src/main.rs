use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use docmeta_core::{
    loader, Config, Document, KnowledgeBase, Pipeline, Storage, WikidataClient,
};

/// Drives the extraction and enrichment pipelines over stored documents.
/// Stands in for the hosting application's task scheduler: retry policy and
/// concurrency limits belong to whoever invokes these commands.
#[derive(Parser)]
#[command(name = "docmeta", version, about = "Document metadata extraction and entity linking")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a file and run extraction followed by enrichment.
    Process {
        /// Path to a pdf, docx, doc, txt or rtf file.
        file: PathBuf,
    },
    /// Run the extraction pipeline for a stored document.
    Extract { document_id: Uuid },
    /// Run the enrichment pipeline for a stored document.
    Enrich { document_id: Uuid },
    /// Rebuild entity relations from the document's link cache.
    Resync { document_id: Uuid },
    /// Show a document's processing status and metadata.
    Status { document_id: Uuid },
    /// Probe external converters and knowledge-base connectivity.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Command::Process { file } => {
            let storage = open_storage(&config).await?;
            let document = Document::from_path(&file).context("unsupported input file")?;
            let document_id = document.id;
            storage.insert_document(&document).await?;
            println!("registered {} as {document_id}", file.display());

            let mut pipeline = Pipeline::new(Arc::clone(&storage), config)?;
            if !pipeline.run_extraction(document_id).await? {
                report_failure(&storage, document_id).await?;
                std::process::exit(1);
            }
            if !pipeline.run_enrichment(document_id).await? {
                report_failure(&storage, document_id).await?;
                std::process::exit(1);
            }
            print_status(&storage, document_id).await?;
        }
        Command::Extract { document_id } => {
            let storage = open_storage(&config).await?;
            let mut pipeline = Pipeline::new(Arc::clone(&storage), config)?;
            let ok = pipeline.run_extraction(document_id).await?;
            print_status(&storage, document_id).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Command::Enrich { document_id } => {
            let storage = open_storage(&config).await?;
            let mut pipeline = Pipeline::new(Arc::clone(&storage), config)?;
            let ok = pipeline.run_enrichment(document_id).await?;
            print_status(&storage, document_id).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Command::Resync { document_id } => {
            let storage = open_storage(&config).await?;
            let mut pipeline = Pipeline::new(Arc::clone(&storage), config)?;
            let created = pipeline.resync_links(document_id).await?;
            println!("created {created} relation(s)");
        }
        Command::Status { document_id } => {
            let storage = open_storage(&config).await?;
            print_status(&storage, document_id).await?;
        }
        Command::Check => {
            for (tool, available) in loader::check_tools() {
                println!(
                    "{tool}: {}",
                    if available { "available" } else { "missing" }
                );
            }

            let kb = WikidataClient::new(&config.wikidata)
                .map_err(|e| anyhow::anyhow!("knowledge base client: {e}"))?;
            let online = kb.ping().await;
            println!(
                "wikidata: {}",
                if online { "reachable" } else { "unreachable" }
            );
            if !online {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn open_storage(config: &Config) -> anyhow::Result<Arc<Storage>> {
    let storage = Storage::open(&config.database_path)
        .await
        .with_context(|| format!("opening database {}", config.database_path))?;
    Ok(Arc::new(storage))
}

async fn print_status(storage: &Storage, document_id: Uuid) -> anyhow::Result<()> {
    let document = storage.get_document(document_id).await?;
    println!("{}: {}", document.name, document.status);
    if let Some(error) = &document.processing_error {
        println!("error: {error}");
    }
    if !document.metadata.is_empty() {
        println!("{}", serde_json::to_string_pretty(&document.metadata.to_value())?);
    }
    Ok(())
}

async fn report_failure(storage: &Storage, document_id: Uuid) -> anyhow::Result<()> {
    let document = storage.get_document(document_id).await?;
    eprintln!(
        "processing failed: {}",
        document.processing_error.as_deref().unwrap_or("unknown error")
    );
    Ok(())
}
