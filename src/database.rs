use crate::config::env_string;
use crate::embeddings::Embedding;
use crate::error::{RagError, Result};
use log::{debug, info};
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, Distance, GetCollectionInfoResponse, PointStruct, ScoredPoint,
    SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParams,
};
use qdrant_client::{Qdrant, QdrantError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use tokio::sync::OnceCell;

pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";
pub const DEFAULT_COLLECTION: &str = "docs";

pub const PAYLOAD_SOURCE: &str = "source";
pub const PAYLOAD_TEXT: &str = "text";

/// Payload stored alongside each chunk vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    #[serde(rename = "source")]
    pub source_id: String,
    pub text: String,
}

/// Ranked search hits; `contexts[i]` came from `sources[i]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub contexts: Vec<String>,
    pub sources: Vec<String>,
}

impl SearchResult {
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    fn push(&mut self, payload: ChunkPayload) {
        self.contexts.push(payload.text);
        self.sources.push(payload.source_id);
    }
}

impl FromIterator<ChunkPayload> for SearchResult {
    fn from_iter<I: IntoIterator<Item = ChunkPayload>>(iter: I) -> Self {
        let mut result = SearchResult::default();
        for payload in iter {
            result.push(payload);
        }
        result
    }
}

/// Persistent similarity index of chunk records
#[allow(async_fn_in_trait)]
pub trait VectorStore {
    /// Length of every vector in the collection
    fn dimension(&self) -> usize;

    /// Create the collection if missing and verify its schema. Safe to call repeatedly.
    async fn ensure_collection(&self) -> Result<()>;

    /// Insert or overwrite records by id. Returns the number of records written.
    async fn upsert(
        &self,
        ids: Vec<String>,
        vectors: Vec<Embedding>,
        payloads: Vec<ChunkPayload>,
    ) -> Result<usize>;

    /// Up to `top_k` nearest records, best first
    async fn search(&self, query: &Embedding, top_k: u64) -> Result<SearchResult>;
}

/// Check that an upsert batch is well formed before it reaches the store
pub fn validate_batch(
    ids: &[String],
    vectors: &[Embedding],
    payloads: &[ChunkPayload],
    dimension: usize,
) -> Result<()> {
    if ids.len() != vectors.len() || ids.len() != payloads.len() {
        return Err(RagError::Validation(format!(
            "batch length mismatch: {} ids, {} vectors, {} payloads",
            ids.len(),
            vectors.len(),
            payloads.len()
        )));
    }
    for vector in vectors {
        check_dimension(vector, dimension)?;
    }
    Ok(())
}

pub(crate) fn check_dimension(vector: &Embedding, dimension: usize) -> Result<()> {
    if vector.dimension() != dimension {
        return Err(RagError::Configuration(format!(
            "vector dimension mismatch: collection expects {}, got {}",
            dimension,
            vector.dimension()
        )));
    }
    Ok(())
}

/// Configuration for Qdrant
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
    pub dimension: usize,
}

impl QdrantConfig {
    /// Create a new configuration from environment variables
    pub fn from_env(dimension: usize) -> Result<Self> {
        Ok(QdrantConfig {
            url: env_string("QDRANT_URL", DEFAULT_QDRANT_URL),
            api_key: env::var("QDRANT_API_KEY").ok().filter(|k| !k.is_empty()),
            collection: env_string("QDRANT_COLLECTION", DEFAULT_COLLECTION),
            dimension,
        })
    }
}

/// Vector store backed by a Qdrant collection
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
    dimension: usize,
    ready: OnceCell<()>,
}

impl QdrantStore {
    /// Create a new Qdrant client
    pub fn new(config: QdrantConfig) -> Result<Self> {
        let config_builder = Qdrant::from_url(&config.url);
        let config_builder = if let Some(api_key) = config.api_key {
            config_builder.api_key(api_key)
        } else {
            config_builder
        };

        let client = config_builder.build().map_err(|e| {
            RagError::Configuration(format!("invalid Qdrant configuration: {}", e))
        })?;

        Ok(QdrantStore {
            client,
            collection: config.collection,
            dimension: config.dimension,
            ready: OnceCell::new(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    async fn collection_info(&self) -> Result<Option<GetCollectionInfoResponse>> {
        match self.client.collection_info(&self.collection).await {
            Ok(info) => Ok(Some(info)),
            Err(QdrantError::ResponseError { status })
                if status.code() == tonic::Code::NotFound =>
            {
                Ok(None)
            }
            Err(e) => Err(store_error("check collection", e)),
        }
    }

    async fn create_or_verify(&self) -> Result<()> {
        match self.collection_info().await? {
            Some(info) => {
                let size = collection_vector_size(&info);
                if size != Some(self.dimension as u64) {
                    return Err(RagError::Configuration(format!(
                        "collection {} has vector size {:?}, expected {}",
                        self.collection, size, self.dimension
                    )));
                }
                debug!("Using existing collection: {}", self.collection);
            }
            None => {
                let create_collection = CreateCollectionBuilder::new(self.collection.clone())
                    .vectors_config(VectorParams {
                        size: self.dimension as u64,
                        distance: Distance::Cosine.into(),
                        ..Default::default()
                    });

                self.client
                    .create_collection(create_collection)
                    .await
                    .map_err(|e| store_error("create collection", e))?;
                info!(
                    "Created collection {} ({} dims, cosine)",
                    self.collection, self.dimension
                );
            }
        }
        Ok(())
    }
}

impl VectorStore for QdrantStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn ensure_collection(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| self.create_or_verify())
            .await
            .map(|_| ())
    }

    async fn upsert(
        &self,
        ids: Vec<String>,
        vectors: Vec<Embedding>,
        payloads: Vec<ChunkPayload>,
    ) -> Result<usize> {
        validate_batch(&ids, &vectors, &payloads, self.dimension)?;
        if ids.is_empty() {
            return Ok(0);
        }
        self.ensure_collection().await?;

        let points = to_points(ids, vectors, payloads);
        let count = points.len();

        let upsert_request = UpsertPointsBuilder::new(self.collection.clone(), points).wait(true);
        self.client
            .upsert_points(upsert_request)
            .await
            .map_err(|e| store_error("upsert points", e))?;

        debug!("Upserted {} points into {}", count, self.collection);
        Ok(count)
    }

    async fn search(&self, query: &Embedding, top_k: u64) -> Result<SearchResult> {
        check_dimension(query, self.dimension)?;
        if top_k == 0 {
            return Ok(SearchResult::default());
        }
        self.ensure_collection().await?;

        let search_request =
            SearchPointsBuilder::new(self.collection.clone(), query.values.clone(), top_k)
                .with_payload(true);

        let search_response = self
            .client
            .search_points(search_request)
            .await
            .map_err(|e| store_error("search collection", e))?;

        Ok(from_scored_points(search_response.result))
    }
}

fn collection_vector_size(info: &GetCollectionInfoResponse) -> Option<u64> {
    let vectors = info
        .result
        .as_ref()?
        .config
        .as_ref()?
        .params
        .as_ref()?
        .vectors_config
        .as_ref()?;
    match vectors.config.as_ref()? {
        VectorsConfigKind::Params(params) => Some(params.size),
        VectorsConfigKind::ParamsMap(_) => None,
    }
}

/// Convert a validated batch into Qdrant points
fn to_points(
    ids: Vec<String>,
    vectors: Vec<Embedding>,
    payloads: Vec<ChunkPayload>,
) -> Vec<PointStruct> {
    ids.into_iter()
        .zip(vectors)
        .zip(payloads)
        .map(|((id, vector), payload)| {
            let payload: HashMap<String, Value> = HashMap::from([
                (PAYLOAD_SOURCE.to_string(), Value::from(payload.source_id)),
                (PAYLOAD_TEXT.to_string(), Value::from(payload.text)),
            ]);
            PointStruct::new(id, vector.values, payload)
        })
        .collect()
}

/// Keep the store's ranking; points without a text payload are skipped
fn from_scored_points(points: Vec<ScoredPoint>) -> SearchResult {
    points
        .into_iter()
        .filter_map(|scored_point| {
            let payload = scored_point.payload;
            let text = payload.get(PAYLOAD_TEXT)?.as_str()?.to_string();
            let source_id = payload
                .get(PAYLOAD_SOURCE)
                .and_then(|v| v.as_str())
                .cloned()
                .unwrap_or_default();
            Some(ChunkPayload { source_id, text })
        })
        .collect()
}

fn store_error(action: &str, err: QdrantError) -> RagError {
    use tonic::Code;

    let message = format!("Failed to {}: {}", action, err);
    match &err {
        QdrantError::ResponseError { status } => match status.code() {
            Code::Unavailable
            | Code::DeadlineExceeded
            | Code::ResourceExhausted
            | Code::Aborted
            | Code::Cancelled
            | Code::Unknown => RagError::Transient(message),
            Code::Unauthenticated | Code::PermissionDenied => RagError::Configuration(message),
            _ => RagError::Service(message),
        },
        _ => RagError::Transient(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(source: &str, text: &str) -> ChunkPayload {
        ChunkPayload {
            source_id: source.to_string(),
            text: text.to_string(),
        }
    }

    fn scored(text: Option<&str>, source: &str, score: f32) -> ScoredPoint {
        let mut payload = HashMap::new();
        if let Some(text) = text {
            payload.insert(PAYLOAD_TEXT.to_string(), Value::from(text.to_string()));
        }
        payload.insert(PAYLOAD_SOURCE.to_string(), Value::from(source.to_string()));
        ScoredPoint {
            payload,
            score,
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_batch_rejects_length_mismatch() {
        let err = validate_batch(
            &["a".to_string(), "b".to_string()],
            &[Embedding::new(vec![1.0])],
            &[payload("s", "t")],
            1,
        )
        .unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));
    }

    #[test]
    fn test_validate_batch_rejects_wrong_dimension() {
        let err = validate_batch(
            &["a".to_string()],
            &[Embedding::new(vec![1.0, 0.0])],
            &[payload("s", "t")],
            3,
        )
        .unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_points_carry_id_vector_and_payload() {
        let points = to_points(
            vec!["c043c58a-fb27-5641-8a2d-c11da12ac6c7".to_string()],
            vec![Embedding::new(vec![0.5, 0.5])],
            vec![payload("a.pdf", "hello")],
        );
        assert_eq!(points.len(), 1);
        let point = &points[0];
        assert!(point.id.is_some());
        assert_eq!(
            point.payload.get(PAYLOAD_SOURCE).and_then(|v| v.as_str()),
            Some(&"a.pdf".to_string())
        );
        assert_eq!(
            point.payload.get(PAYLOAD_TEXT).and_then(|v| v.as_str()),
            Some(&"hello".to_string())
        );
    }

    #[test]
    fn test_scored_points_keep_rank_order() {
        let result = from_scored_points(vec![
            scored(Some("best"), "a.pdf", 0.9),
            scored(None, "broken.pdf", 0.8),
            scored(Some("second"), "b.pdf", 0.5),
        ]);
        assert_eq!(result.contexts, vec!["best", "second"]);
        assert_eq!(result.sources, vec!["a.pdf", "b.pdf"]);
    }

    #[test]
    fn test_empty_search_response_is_empty_result() {
        let result = from_scored_points(Vec::new());
        assert!(result.is_empty());
        assert_eq!(result, SearchResult::default());
    }

    #[test]
    fn test_store_error_classification() {
        let unavailable = QdrantError::ResponseError {
            status: tonic::Status::unavailable("down"),
        };
        assert!(store_error("search", unavailable).is_retryable());

        let denied = QdrantError::ResponseError {
            status: tonic::Status::permission_denied("no"),
        };
        assert!(matches!(
            store_error("search", denied),
            RagError::Configuration(_)
        ));

        let invalid = QdrantError::ResponseError {
            status: tonic::Status::invalid_argument("bad vector"),
        };
        assert!(matches!(store_error("upsert", invalid), RagError::Service(_)));
    }

    #[test]
    fn test_payload_serializes_source_key() {
        let value = serde_json::to_value(payload("a.pdf", "t")).unwrap();
        assert_eq!(value["source"], "a.pdf");
        assert_eq!(value["text"], "t");
    }
}
