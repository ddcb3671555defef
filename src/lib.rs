pub mod chunking;
pub mod config;
pub mod database;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod events;
pub mod identity;
pub mod memory;
pub mod openai;
pub mod orchestration;
pub mod prompt;
pub mod rag;
