use crate::error::Result;
use serde::{Deserialize, Serialize};

pub const SYSTEM_PROMPT: &str = "You answer questions using only the provided context.";

/// A single chat message sent to the generation service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Fixed generation parameters supplied with every answer request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        GenerationParams {
            max_tokens: 1024,
            temperature: 0.2,
        }
    }
}

/// Produces an answer from a list of chat messages
#[allow(async_fn_in_trait)]
pub trait Generator {
    async fn generate(&self, messages: &[ChatMessage], params: &GenerationParams) -> Result<String>;
}

/// Build the grounded user prompt from retrieved contexts and the question
pub fn compose_prompt(question: &str, contexts: &[String]) -> String {
    let context_block = contexts
        .iter()
        .map(|c| format!("- {}", c))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Use the following context to answer the question.\n\n\
         Context:\n{}\n\n\
         Question: {}\n\
         Answer concisely using only the context above.",
        context_block, question
    )
}

/// System and user messages for a grounded answer
pub fn chat_messages(question: &str, contexts: &[String]) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(compose_prompt(question, contexts)),
    ]
}
