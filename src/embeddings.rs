use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Default dimension of `text-embedding-3-large`
pub const DEFAULT_EMBED_DIM: usize = 3072;

/// Representation of a vector embedding
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Embedding { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Embedding { values }
    }
}

/// Turns text into fixed-dimension vectors
#[allow(async_fn_in_trait)]
pub trait Embedder {
    /// Dimension of every vector this embedder produces
    fn dimension(&self) -> usize;

    /// Embed a batch of texts. Returns exactly one embedding per input, in input order.
    /// An empty batch returns an empty result without contacting the provider.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    /// Embed a single text, e.g. a question
    async fn embed_one(&self, text: &str) -> Result<Embedding> {
        let mut embeddings = self.embed(&[text.to_string()]).await?;
        embeddings.pop().ok_or_else(|| {
            crate::error::RagError::Service("embedding provider returned no vectors".to_string())
        })
    }
}
