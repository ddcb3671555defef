use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the ingestion and query pipeline
#[derive(Debug, Error)]
pub enum RagError {
    /// Missing credential, bad setting or a vector dimension mismatch
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network failure, timeout or an overloaded remote service
    #[error("transient service error: {0}")]
    Transient(String),

    /// Malformed input, e.g. mismatched batch lengths or a bad event payload
    #[error("validation error: {0}")]
    Validation(String),

    /// The remote service rejected the request or returned something unusable
    #[error("service error: {0}")]
    Service(String),

    /// The source document could not be loaded
    #[error("document error: {0}")]
    Document(String),

    #[error("ingestion of {source_id} is rate limited, retry in {retry_after:?}")]
    RateLimited {
        source_id: String,
        retry_after: Duration,
    },

    #[error("ingestion is throttled, retry in {retry_after:?}")]
    Throttled { retry_after: Duration },
}

impl RagError {
    /// Whether the orchestration layer may retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, RagError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, RagError>;

/// Ingestion step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Admission,
    LoadAndChunk,
    EmbedAndUpsert,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Admission => "admission",
            Stage::LoadAndChunk => "load-and-chunk",
            Stage::EmbedAndUpsert => "embed-and-upsert",
        };
        f.write_str(name)
    }
}

/// An ingestion failure tagged with the stage it happened in
#[derive(Debug, Error)]
#[error("ingestion failed during {stage}: {source}")]
pub struct IngestError {
    pub stage: Stage,
    #[source]
    pub source: RagError,
}

impl IngestError {
    pub fn new(stage: Stage, source: RagError) -> Self {
        IngestError { stage, source }
    }

    pub fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(RagError::Transient("timeout".into()).is_retryable());
        assert!(!RagError::Configuration("missing key".into()).is_retryable());
        assert!(!RagError::Validation("bad".into()).is_retryable());
        assert!(!RagError::Service("400".into()).is_retryable());
        assert!(!RagError::Document("missing".into()).is_retryable());
    }

    #[test]
    fn test_ingest_error_reports_stage() {
        let err = IngestError::new(
            Stage::EmbedAndUpsert,
            RagError::Transient("connection refused".into()),
        );
        assert_eq!(
            err.to_string(),
            "ingestion failed during embed-and-upsert: transient service error: connection refused"
        );
        assert!(err.is_retryable());
    }
}
