use crate::error::{RagError, Result};
use serde::{Deserialize, Serialize};

pub const INGEST_EVENT: &str = "rag/ingest_pdf";
pub const QUERY_EVENT: &str = "rag/query_pdf_ai";
pub const DEFAULT_TOP_K: u64 = 5;

/// Request to ingest a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestPdfEvent {
    pub pdf_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

impl IngestPdfEvent {
    pub fn new(pdf_path: impl Into<String>) -> Self {
        IngestPdfEvent {
            pdf_path: pdf_path.into(),
            source_id: None,
        }
    }

    /// The explicit source id, or the path when none was given
    pub fn source_id(&self) -> &str {
        self.source_id.as_deref().unwrap_or(&self.pdf_path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pdf_path.trim().is_empty() {
            return Err(RagError::Validation("pdf_path must not be empty".to_string()));
        }
        if self.source_id.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(RagError::Validation("source_id must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Request to answer a question from the indexed documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryPdfEvent {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u64>,
}

impl QueryPdfEvent {
    pub fn new(question: impl Into<String>) -> Self {
        QueryPdfEvent {
            question: question.into(),
            top_k: None,
        }
    }

    pub fn top_k(&self) -> u64 {
        self.top_k.unwrap_or(DEFAULT_TOP_K)
    }

    pub fn validate(&self) -> Result<()> {
        if self.question.trim().is_empty() {
            return Err(RagError::Validation("question must not be empty".to_string()));
        }
        if self.top_k() == 0 {
            return Err(RagError::Validation("top_k must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestResult {
    pub ingested: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub answer: String,
    pub sources: Vec<String>,
    pub num_contexts: usize,
}

/// A named trigger, as in `{"name": "rag/ingest_pdf", "data": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data")]
pub enum Event {
    #[serde(rename = "rag/ingest_pdf")]
    IngestPdf(IngestPdfEvent),
    #[serde(rename = "rag/query_pdf_ai")]
    QueryPdf(QueryPdfEvent),
}

impl Event {
    /// Parse and validate an event envelope
    pub fn from_json(raw: &str) -> Result<Self> {
        let event: Event = serde_json::from_str(raw)
            .map_err(|e| RagError::Validation(format!("malformed event: {}", e)))?;
        match &event {
            Event::IngestPdf(data) => data.validate()?,
            Event::QueryPdf(data) => data.validate()?,
        }
        Ok(event)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::IngestPdf(_) => INGEST_EVENT,
            Event::QueryPdf(_) => QUERY_EVENT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_id_defaults_to_path() {
        let event = IngestPdfEvent::new("a.pdf");
        assert_eq!(event.source_id(), "a.pdf");

        let event = IngestPdfEvent {
            pdf_path: "a.pdf".to_string(),
            source_id: Some("manual-v2".to_string()),
        };
        assert_eq!(event.source_id(), "manual-v2");
    }

    #[test]
    fn test_parse_ingest_event() {
        let event = Event::from_json(r#"{"name": "rag/ingest_pdf", "data": {"pdf_path": "a.pdf"}}"#)
            .unwrap();
        assert_eq!(event, Event::IngestPdf(IngestPdfEvent::new("a.pdf")));
        assert_eq!(event.name(), INGEST_EVENT);
    }

    #[test]
    fn test_parse_query_event_defaults_top_k() {
        let event =
            Event::from_json(r#"{"name": "rag/query_pdf_ai", "data": {"question": "What is X?"}}"#)
                .unwrap();
        match event {
            Event::QueryPdf(query) => assert_eq!(query.top_k(), 5),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_malformed_events_are_validation_errors() {
        let cases = [
            r#"{"name": "rag/unknown", "data": {}}"#,
            r#"{"name": "rag/ingest_pdf", "data": {}}"#,
            r#"{"name": "rag/query_pdf_ai", "data": {"question": "q", "top_k": -1}}"#,
            r#"{"name": "rag/query_pdf_ai", "data": {"question": "q", "top_k": 0}}"#,
            r#"{"name": "rag/query_pdf_ai", "data": {"question": "   "}}"#,
            "not json",
        ];
        for raw in cases {
            let err = Event::from_json(raw).unwrap_err();
            assert!(matches!(err, RagError::Validation(_)), "{}: {:?}", raw, err);
        }
    }

    #[test]
    fn test_query_result_shape() {
        let result = QueryResult {
            answer: "no context found".to_string(),
            sources: vec![],
            num_contexts: 0,
        };
        let value = serde_json::to_value(result).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"answer": "no context found", "sources": [], "num_contexts": 0})
        );
    }
}
