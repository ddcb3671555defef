use crate::chunking::{split_into_chunks, ChunkingConfig, TextChunk};
use crate::database::{ChunkPayload, SearchResult, VectorStore};
use crate::document::Document;
use crate::embeddings::Embedder;
use crate::error::{IngestError, RagError, Result, Stage};
use crate::events::{IngestPdfEvent, IngestResult, QueryPdfEvent, QueryResult};
use crate::identity::assign_id;
use crate::orchestration::{IngestPolicy, SourceGate, SourcePermit};
use crate::prompt::{chat_messages, GenerationParams, Generator};
use log::{debug, info, warn};

/// Answer returned when retrieval finds nothing to ground an answer on
pub const NO_CONTEXT_ANSWER: &str = "no context found";

/// Tunables for a [`RagEngine`]
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub chunking: ChunkingConfig,
    pub generation: GenerationParams,
    pub policy: IngestPolicy,
}

/// RAG (Retrieval-Augmented Generation) engine
pub struct RagEngine<E, S, G> {
    embedder: E,
    store: S,
    generator: G,
    options: EngineOptions,
    gate: SourceGate,
}

impl<E, S, G> RagEngine<E, S, G>
where
    E: Embedder,
    S: VectorStore,
    G: Generator,
{
    /// Create a new RAG engine.
    ///
    /// Fails when the embedder and the store disagree on the vector dimension or when an
    /// admission limit is unusable.
    pub fn new(embedder: E, store: S, generator: G, options: EngineOptions) -> Result<Self> {
        if embedder.dimension() != store.dimension() {
            return Err(RagError::Configuration(format!(
                "embedder produces {}-dimensional vectors but the store expects {}",
                embedder.dimension(),
                store.dimension()
            )));
        }
        let gate = SourceGate::new(&options.policy)?;

        Ok(RagEngine {
            embedder,
            store,
            generator,
            options,
            gate,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create or verify the vector collection
    pub async fn bootstrap(&self) -> Result<()> {
        self.store.ensure_collection().await
    }

    /// Load a document, chunk it, embed the chunks and upsert them
    pub async fn ingest(&self, event: IngestPdfEvent) -> std::result::Result<IngestResult, IngestError> {
        event
            .validate()
            .map_err(|e| IngestError::new(Stage::Admission, e))?;
        let source_id = event.source_id().to_string();

        let _permit = self.admit(&source_id).await?;

        info!("Ingesting {} as {}", event.pdf_path, source_id);
        let chunks = load_and_chunk(event.pdf_path, self.options.chunking)
            .await
            .map_err(|e| IngestError::new(Stage::LoadAndChunk, e))?;

        self.store_chunks(&source_id, chunks).await
    }

    /// Ingest already extracted text under `source_id`
    pub async fn ingest_text(
        &self,
        source_id: &str,
        text: &str,
    ) -> std::result::Result<IngestResult, IngestError> {
        if source_id.trim().is_empty() {
            return Err(IngestError::new(
                Stage::Admission,
                RagError::Validation("source_id must not be empty".to_string()),
            ));
        }
        let _permit = self.admit(source_id).await?;

        let chunks = split_into_chunks(text, &self.options.chunking);
        self.store_chunks(source_id, chunks).await
    }

    /// Embed the question, search and return contexts in rank order
    pub async fn retrieve(&self, question: &str, top_k: u64) -> Result<SearchResult> {
        let query_embedding = self.embedder.embed_one(question).await?;
        self.store.search(&query_embedding, top_k).await
    }

    /// Answer a question from the indexed documents
    pub async fn query(&self, event: QueryPdfEvent) -> Result<QueryResult> {
        event.validate()?;
        let top_k = event.top_k();
        let retry = &self.options.policy.retry;

        let found = retry
            .run("embed-and-search", || self.retrieve(&event.question, top_k))
            .await?;

        if found.is_empty() {
            info!("No relevant context found for question");
            return Ok(QueryResult {
                answer: NO_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
                num_contexts: 0,
            });
        }
        debug!("Retrieved {} contexts", found.len());

        let messages = chat_messages(&event.question, &found.contexts);
        let answer = retry
            .run("llm-answer", || {
                self.generator
                    .generate(&messages, &self.options.generation)
            })
            .await?;

        Ok(QueryResult {
            answer: answer.trim().to_string(),
            num_contexts: found.len(),
            sources: found.sources,
        })
    }

    async fn admit(
        &self,
        source_id: &str,
    ) -> std::result::Result<SourcePermit, IngestError> {
        let admitted = async {
            self.gate.check_rate(source_id)?;
            self.gate.check_throttle()?;
            self.gate.acquire(source_id).await
        };
        let permit = admitted
            .await
            .map_err(|e| IngestError::new(Stage::Admission, e))?;

        let (with_permits, rate_limited) = self.gate.tracked_sources();
        debug!(
            "Admitted {} ({} sources in flight, {} rate-limited)",
            source_id, with_permits, rate_limited
        );
        Ok(permit)
    }

    async fn store_chunks(
        &self,
        source_id: &str,
        chunks: Vec<TextChunk>,
    ) -> std::result::Result<IngestResult, IngestError> {
        if chunks.is_empty() {
            warn!("No chunks extracted for {}", source_id);
            return Ok(IngestResult { ingested: 0 });
        }
        let tokens: usize = chunks.iter().map(|c| c.token_count).sum();
        info!(
            "Split {} into {} chunks (~{} tokens)",
            source_id,
            chunks.len(),
            tokens
        );

        let ingested = self
            .options
            .policy
            .retry
            .run("embed-and-upsert", || self.embed_and_upsert(source_id, &chunks))
            .await
            .map_err(|e| IngestError::new(Stage::EmbedAndUpsert, e))?;

        info!("Ingested {} chunks from {}", ingested, source_id);
        Ok(IngestResult { ingested })
    }

    async fn embed_and_upsert(&self, source_id: &str, chunks: &[TextChunk]) -> Result<usize> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let ids = chunks.iter().map(|c| assign_id(source_id, c.index)).collect();
        let payloads = chunks
            .iter()
            .map(|c| ChunkPayload {
                source_id: source_id.to_string(),
                text: c.text.clone(),
            })
            .collect();

        self.store.upsert(ids, vectors, payloads).await
    }
}

/// Extract and chunk a document off the async workers; PDF extraction is CPU-bound
async fn load_and_chunk(path: String, chunking: ChunkingConfig) -> Result<Vec<TextChunk>> {
    tokio::task::spawn_blocking(move || {
        let document = Document::from_file(&path)?;
        debug!(
            "Loaded {} ({}, {} bytes)",
            document.path.display(),
            document.mime_type,
            document.content.len()
        );
        Ok(split_into_chunks(&document.content, &chunking))
    })
    .await
    .map_err(|e| RagError::Document(format!("document loader failed: {}", e)))?
}
