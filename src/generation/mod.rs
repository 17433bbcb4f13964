// Generation module
// Prompt in, answer text out, with the Ollama backend


pub mod ollama;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::retry::Transient;

pub use ollama::OllamaGenerator;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Generation service is rate limiting requests: {0}")]
    RateLimited(String),

    #[error("Generation request timed out: {0}")]
    Timeout(String),

    #[error("Generation was filtered: {0}")]
    ContentFiltered(String),

    #[error("Could not reach the generation service: {0}")]
    Transport(String),

    #[error("Generation service failed: {0}")]
    Upstream(String),
}

impl Transient for GenerationError {
    #[inline]
    fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Timeout(_) | Self::Transport(_)
        )
    }

    #[inline]
    fn timed_out(after: Duration) -> Self {
        Self::Timeout(format!("no response within {:?}", after))
    }
}

/// Produces answer text for a fully built prompt
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    fn model(&self) -> &str;
}
