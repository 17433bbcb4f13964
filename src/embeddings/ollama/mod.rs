
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::{EmbeddingError, EmbeddingService};
use crate::config::{ConfigError, OllamaConfig};

/// Vector length of `nomic-embed-text`
pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 768;

/// Blocking HTTP client for an Ollama server. Calls run on the blocking thread pool.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
    pub details: Option<ModelDetails>,
}

#[derive(Debug, Deserialize)]
pub struct ModelDetails {
    pub format: Option<String>,
    pub family: Option<String>,
    pub parameter_size: Option<String>,
    pub quantization_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

/// A failed HTTP exchange with Ollama, before it is mapped onto a service error
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HttpFailure {
    Status(u16),
    Timeout(String),
    Transport(String),
    Other(String),
}

impl From<ureq::Error> for HttpFailure {
    fn from(error: ureq::Error) -> Self {
        match &error {
            ureq::Error::StatusCode(status) => Self::Status(*status),
            ureq::Error::Timeout(_) => Self::Timeout(error.to_string()),
            ureq::Error::ConnectionFailed | ureq::Error::HostNotFound | ureq::Error::Io(_) => {
                Self::Transport(error.to_string())
            }
            _ => Self::Other(error.to_string()),
        }
    }
}

impl From<HttpFailure> for EmbeddingError {
    fn from(failure: HttpFailure) -> Self {
        match failure {
            HttpFailure::Status(429) => Self::RateLimited("HTTP 429".to_string()),
            HttpFailure::Status(400) => Self::InvalidInput("HTTP 400".to_string()),
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

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self, ConfigError> {
        let base_url = config.ollama_url()?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .build()
            .into();

        Ok(Self {
            base_url,
            model: config.embedding_model.clone(),
            agent,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, HttpFailure> {
        self.base_url
            .join(path)
            .map_err(|e| HttpFailure::Other(format!("Invalid endpoint {}: {}", path, e)))
    }

    /// POST a JSON body and return the response text
    pub(crate) async fn post_json<T: Serialize + Sync>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<String, HttpFailure> {
        let url = self.endpoint(path)?;
        let request_json = serde_json::to_string(body)
            .map_err(|e| HttpFailure::Other(format!("Failed to serialize request: {}", e)))?;
        let agent = self.agent.clone();

        tokio::task::spawn_blocking(move || {
            agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
                .map_err(HttpFailure::from)
        })
        .await
        .map_err(|e| HttpFailure::Other(format!("HTTP worker failed: {}", e)))?
    }

    async fn get(&self, path: &str) -> Result<String, HttpFailure> {
        let url = self.endpoint(path)?;
        let agent = self.agent.clone();

        tokio::task::spawn_blocking(move || {
            agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
                .map_err(HttpFailure::from)
        })
        .await
        .map_err(|e| HttpFailure::Other(format!("HTTP worker failed: {}", e)))?
    }

    /// Verify the server answers and every named model is installed
    #[inline]
    pub async fn health_check(&self, models: &[&str]) -> anyhow::Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        self.ping().await?;
        for model in models {
            self.validate_model(model).await?;
        }

        info!(
            "Health check passed for Ollama server at {} with models {:?}",
            self.base_url, models
        );
        Ok(())
    }

    /// Ping the Ollama server to check if it's responsive
    #[inline]
    pub async fn ping(&self) -> anyhow::Result<()> {
        debug!("Pinging Ollama server at {}", self.base_url);

        self.get("/api/version")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to ping Ollama server: {:?}", e))?;

        debug!("Server ping successful");
        Ok(())
    }

    /// Validate that a model is installed. A bare name also matches its `:latest` tag.
    #[inline]
    pub async fn validate_model(&self, model: &str) -> anyhow::Result<()> {
        debug!("Validating model: {}", model);

        let models = self.list_models().await?;
        let tagged = format!("{}:latest", model);

        if models.iter().any(|m| m.name == model || m.name == tagged) {
            debug!("Model {} is available", model);
            Ok(())
        } else {
            let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                model, available_models
            );
            Err(anyhow::anyhow!(
                "Model '{}' is not available. Available models: {:?}",
                model,
                available_models
            ))
        }
    }

    /// List all installed models
    #[inline]
    pub async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        debug!("Fetching available models from {}", self.base_url);

        let response_text = self
            .get("/api/tags")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to fetch models: {:?}", e))?;

        let models_response: ModelsResponse = serde_json::from_str(&response_text)
            .map_err(|e| anyhow::anyhow!("Failed to parse models response: {}", e))?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }
}

#[async_trait]
impl EmbeddingService for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("input is empty".to_string()));
        }

        debug!("Generating embedding for text (length: {})", text.len());

        let request = EmbedRequest {
            model: &self.model,
            input: text,
        };
        let response_text = self.post_json("/api/embed", &request).await?;

        let response: EmbedResponse = serde_json::from_str(&response_text).map_err(|e| {
            EmbeddingError::Upstream(format!("Failed to parse embedding response: {}", e))
        })?;

        let embedding = response
            .embeddings
            .into_iter()
            .next()
            .filter(|embedding| !embedding.is_empty())
            .ok_or_else(|| {
                EmbeddingError::InvalidInput("server returned no embedding".to_string())
            })?;

        debug!("Generated embedding with {} dimensions", embedding.len());
        Ok(embedding)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
