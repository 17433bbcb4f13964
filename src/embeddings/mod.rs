// Embeddings module
// Text to fixed-dimension vectors, with the Ollama backend


pub mod ollama;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::retry::Transient;

pub use ollama::OllamaClient;

/// Why an embedding call failed. Decides whether a retry can help.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    #[error("Embedding service is rate limiting requests: {0}")]
    RateLimited(String),

    #[error("Embedding request timed out: {0}")]
    Timeout(String),

    #[error("Embedding service rejected the input: {0}")]
    InvalidInput(String),

    #[error("Could not reach the embedding service: {0}")]
    Transport(String),

    #[error("Embedding service failed: {0}")]
    Upstream(String),
}

impl EmbeddingError {
    /// Rate limits, timeouts and transport failures may succeed on a later attempt
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Timeout(_) | Self::Transport(_)
        )
    }
}

impl Transient for EmbeddingError {
    #[inline]
    fn is_transient(&self) -> bool {
        Self::is_transient(self)
    }

    #[inline]
    fn timed_out(after: Duration) -> Self {
        Self::Timeout(format!("no response within {:?}", after))
    }
}

/// Maps text to a vector. Every call against one model returns the same length.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Model name, for logs and diagnostics
    fn model(&self) -> &str;
}
