use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::{error, info};
use std::io::{self, Read};

use pdf_rag::config::Settings;
use pdf_rag::database::QdrantStore;
use pdf_rag::events::{Event, IngestPdfEvent, QueryPdfEvent, DEFAULT_TOP_K};
use pdf_rag::openai::OpenAiClient;
use pdf_rag::rag::{EngineOptions, RagEngine};

/// Ingest PDFs into Qdrant and answer questions about them with an OpenAI model
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or verify the vector collection
    Init,
    /// Chunk, embed and store a document (PDF or plain text)
    Ingest {
        /// Path to the document
        pdf_path: String,
        /// Source id stored with every chunk; defaults to the path
        #[arg(long)]
        source_id: Option<String>,
    },
    /// Answer a question from the stored documents
    Query {
        question: String,
        /// Number of passages to retrieve
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: u64,
    },
    /// Handle a JSON event envelope, or read it from stdin with "-"
    Dispatch { event: String },
}

type Engine = RagEngine<OpenAiClient, QdrantStore, OpenAiClient>;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    let settings = Settings::from_env().context("Invalid configuration")?;
    let openai = OpenAiClient::new(settings.openai).context("Failed to initialize OpenAI client")?;
    let qdrant = QdrantStore::new(settings.qdrant).context("Failed to initialize Qdrant client")?;
    info!("Using Qdrant collection {}", qdrant.collection());

    let options = EngineOptions {
        chunking: settings.chunking,
        generation: settings.generation,
        policy: settings.policy,
    };
    let engine = RagEngine::new(openai.clone(), qdrant, openai, options)
        .context("Failed to initialize RAG engine")?;

    let result = run(&engine, args.command).await;
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

async fn run(engine: &Engine, command: Command) -> Result<()> {
    match command {
        Command::Init => {
            engine
                .bootstrap()
                .await
                .context("Failed to bootstrap collection")?;
            info!("Collection ready");
        }
        Command::Ingest {
            pdf_path,
            source_id,
        } => {
            let event = IngestPdfEvent {
                pdf_path,
                source_id,
            };
            ingest(engine, event).await?;
        }
        Command::Query { question, top_k } => {
            let event = QueryPdfEvent {
                question,
                top_k: Some(top_k),
            };
            query(engine, event).await?;
        }
        Command::Dispatch { event } => {
            let raw = if event == "-" {
                let mut buffer = String::new();
                io::stdin()
                    .read_to_string(&mut buffer)
                    .context("Failed to read event from stdin")?;
                buffer
            } else {
                event
            };

            let event = Event::from_json(&raw).context("Invalid event")?;
            info!("Dispatching {}", event.name());
            match event {
                Event::IngestPdf(data) => ingest(engine, data).await?,
                Event::QueryPdf(data) => query(engine, data).await?,
            }
        }
    }
    Ok(())
}

async fn ingest(engine: &Engine, event: IngestPdfEvent) -> Result<()> {
    engine
        .bootstrap()
        .await
        .context("Failed to bootstrap collection")?;
    let result = engine.ingest(event).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn query(engine: &Engine, event: QueryPdfEvent) -> Result<()> {
    let result = engine.query(event).await.context("Query failed")?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
