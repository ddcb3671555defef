use crate::config::{env_parse, env_string};
use crate::embeddings::{Embedder, Embedding, DEFAULT_EMBED_DIM};
use crate::error::{RagError, Result};
use crate::prompt::{ChatMessage, GenerationParams, Generator};
use log::debug;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-large";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// Configuration for an OpenAI-compatible API
#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub embed_model: String,
    pub embed_dim: usize,
    pub chat_model: String,
    pub timeout: Duration,
}

impl OpenAiConfig {
    /// Configuration with default models and endpoint
    pub fn new(api_key: impl Into<String>) -> Self {
        OpenAiConfig {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            embed_dim: DEFAULT_EMBED_DIM,
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| RagError::Configuration("OPENAI_API_KEY not set".to_string()))?;

        Ok(OpenAiConfig {
            api_key,
            base_url: env_string("OPENAI_BASE_URL", DEFAULT_BASE_URL),
            embed_model: env_string("EMBED_MODEL", DEFAULT_EMBED_MODEL),
            embed_dim: env_parse("EMBED_DIM", DEFAULT_EMBED_DIM)?,
            chat_model: env_string("CHAT_MODEL", DEFAULT_CHAT_MODEL),
            timeout: Duration::from_secs(env_parse("OPENAI_TIMEOUT_SECS", 60)?),
        })
    }
}

/// Client for the embeddings and chat completion endpoints.
///
/// Cloning is cheap and shares the underlying connection pool.
#[derive(Clone)]
pub struct OpenAiClient {
    config: OpenAiConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiClient {
    /// Create a new client
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(RagError::Configuration("OpenAI API key is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RagError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(OpenAiClient { config, client })
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_error(status, &error_text));
        }

        response.json::<R>().await.map_err(transport_error)
    }
}

impl Embedder for OpenAiClient {
    fn dimension(&self) -> usize {
        self.config.embed_dim
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.config.embed_model,
            input: texts,
        };
        debug!("Embedding batch of {} texts", texts.len());
        let response: EmbeddingResponse = self.post_json("embeddings", &request).await?;

        ordered_embeddings(response.data, texts.len(), self.config.embed_dim)
    }
}

impl Generator for OpenAiClient {
    async fn generate(&self, messages: &[ChatMessage], params: &GenerationParams) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.chat_model,
            messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        };
        let response: ChatResponse = self.post_json("chat/completions", &request).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| RagError::Service("No response generated".to_string()))
    }
}

/// Put response items back in input order and check count and dimension
fn ordered_embeddings(
    mut data: Vec<EmbeddingData>,
    expected: usize,
    dimension: usize,
) -> Result<Vec<Embedding>> {
    if data.len() != expected {
        return Err(RagError::Service(format!(
            "embedding provider returned {} vectors for {} inputs",
            data.len(),
            expected
        )));
    }
    data.sort_by_key(|d| d.index);

    data.into_iter()
        .enumerate()
        .map(|(i, d)| {
            if d.index != i {
                return Err(RagError::Service(format!(
                    "embedding response is missing index {}",
                    i
                )));
            }
            if d.embedding.len() != dimension {
                return Err(RagError::Configuration(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    dimension,
                    d.embedding.len()
                )));
            }
            Ok(Embedding::new(d.embedding))
        })
        .collect()
}

fn status_error(status: StatusCode, body: &str) -> RagError {
    let message = format!("API request failed: {} {}", status, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RagError::Configuration(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => RagError::Transient(message),
        s if s.is_server_error() => RagError::Transient(message),
        _ => RagError::Service(message),
    }
}

fn transport_error(err: reqwest::Error) -> RagError {
    if err.is_builder() {
        RagError::Configuration(format!("invalid request: {}", err))
    } else if err.is_decode() {
        RagError::Service(format!("failed to decode response: {}", err))
    } else {
        RagError::Transient(format!("request failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(index: usize, values: &[f32]) -> EmbeddingData {
        EmbeddingData {
            index,
            embedding: values.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_request() {
        let mut config = OpenAiConfig::new("sk-test");
        // nothing listens here, so any request would fail
        config.base_url = "http://127.0.0.1:9".to_string();
        let client = OpenAiClient::new(config).unwrap();

        let embeddings = client.embed(&[]).await.unwrap();
        assert!(embeddings.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let mut config = OpenAiConfig::new("sk-test");
        config.base_url = "http://127.0.0.1:9".to_string();
        config.timeout = Duration::from_secs(2);
        let client = OpenAiClient::new(config).unwrap();

        let err = client.embed(&["hello".to_string()]).await.unwrap_err();
        assert!(err.is_retryable(), "{:?}", err);
    }

    #[test]
    fn test_empty_api_key_is_configuration_error() {
        let err = OpenAiClient::new(OpenAiConfig::new(" ")).err().unwrap();
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[test]
    fn test_embeddings_are_reordered_by_index() {
        let data = vec![item(1, &[0.0, 1.0]), item(0, &[1.0, 0.0])];
        let embeddings = ordered_embeddings(data, 2, 2).unwrap();
        assert_eq!(embeddings[0].values, vec![1.0, 0.0]);
        assert_eq!(embeddings[1].values, vec![0.0, 1.0]);
    }

    #[test]
    fn test_embedding_count_mismatch_is_rejected() {
        let err = ordered_embeddings(vec![item(0, &[1.0])], 2, 1).unwrap_err();
        assert!(matches!(err, RagError::Service(_)));
    }

    #[test]
    fn test_embedding_dimension_mismatch_is_fatal() {
        let err = ordered_embeddings(vec![item(0, &[1.0, 2.0])], 1, 3).unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, ""),
            RagError::Configuration(_)
        ));
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(status_error(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, "bad input"),
            RagError::Service(_)
        ));
    }

    #[test]
    fn test_chat_request_shape() {
        let messages = vec![ChatMessage::user("hi")];
        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            max_tokens: 1024,
            temperature: 0.5,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["max_tokens"], 1024);
        assert_eq!(value["temperature"], 0.5);
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"], "hi");
    }
}
