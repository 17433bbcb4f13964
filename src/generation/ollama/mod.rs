
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{GenerationError, GenerationService};
use crate::config::{Config, ConfigError};
use crate::embeddings::OllamaClient;
use crate::embeddings::ollama::HttpFailure;

const CONTENT_FILTER_REASON: &str = "content_filter";

/// Non-streaming completions from Ollama's `/api/generate`
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    client: OllamaClient,
    model: String,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done_reason: Option<String>,
}

impl From<HttpFailure> for GenerationError {
    fn from(failure: HttpFailure) -> Self {
        match failure {
            HttpFailure::Status(429) => Self::RateLimited("HTTP 429".to_string()),
            HttpFailure::Status(status) if status >= 500 => {
                Self::Transport(format!("HTTP {}", status))
            }
            HttpFailure::Status(status) => Self::Upstream(format!("HTTP {}", status)),
            HttpFailure::Timeout(message) => Self::Timeout(message),
            HttpFailure::Transport(message) => Self::Transport(message),
            HttpFailure::Other(message) => Self::Upstream(message),
        }
    }
}

impl OllamaGenerator {
    #[inline]
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self::with_client(
            OllamaClient::new(&config.ollama)?,
            config.ollama.generation_model.clone(),
            config.generation.temperature,
        ))
    }

    #[inline]
    pub fn with_client(client: OllamaClient, model: String, temperature: f32) -> Self {
        Self {
            client,
            model,
            temperature,
        }
    }

    #[inline]
    pub fn temperature(&self) -> f32 {
        self.temperature
    }
}

#[async_trait]
impl GenerationService for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        debug!(
            "Generating with {} (prompt length: {})",
            self.model,
            prompt.len()
        );

        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
            },
        };
        let response_text = self.client.post_json("/api/generate", &request).await?;

        let response: GenerateResponse = serde_json::from_str(&response_text).map_err(|e| {
            GenerationError::Upstream(format!("Failed to parse generation response: {}", e))
        })?;

        if response.done_reason.as_deref() == Some(CONTENT_FILTER_REASON) {
            warn!("Generation stopped by content filter");
            return Err(GenerationError::ContentFiltered(
                "response withheld by content filter".to_string(),
            ));
        }

        let text = response.response.trim();
        if text.is_empty() {
            warn!("Generation returned an empty response");
            return Err(GenerationError::ContentFiltered(
                "empty response".to_string(),
            ));
        }

        debug!("Generated {} characters", text.len());
        Ok(text.to_string())
    }

    fn model(&self) -> &str {
        &self.model
    }
}
