
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Config;
use crate::database::{CollectionHandle, QueryResult, VectorStore};
use crate::embeddings::EmbeddingService;
use crate::retry::{RetryError, RetryPolicy};
use crate::{RagError, Result};

/// Question in, nearest evidence out
pub struct Retriever {
    embedder: Arc<dyn EmbeddingService>,
    store: Arc<dyn VectorStore>,
    collection: CollectionHandle,
    top_k: usize,
    max_distance: Option<f32>,
    embed_retry: RetryPolicy,
    store_timeout: Duration,
}

impl Retriever {
    #[inline]
    pub fn new(
        embedder: Arc<dyn EmbeddingService>,
        store: Arc<dyn VectorStore>,
        collection: CollectionHandle,
        config: &Config,
    ) -> Self {
        let embed_retry = RetryPolicy::new(
            config.indexing.retry_attempts,
            Duration::from_millis(config.indexing.retry_base_delay_ms),
        )
        .with_attempt_timeout(Duration::from_secs(config.ollama.timeout_secs));

        Self {
            embedder,
            store,
            collection,
            top_k: config.retrieval.top_k,
            max_distance: config.retrieval.max_distance,
            embed_retry,
            store_timeout: Duration::from_secs(config.retrieval.timeout_secs),
        }
    }

    #[inline]
    pub fn with_embed_retry(mut self, retry: RetryPolicy) -> Self {
        self.embed_retry = retry;
        self
    }

    #[inline]
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    #[inline]
    pub fn collection(&self) -> &CollectionHandle {
        &self.collection
    }

    /// Embed the question with bounded retries. The vector must match the collection.
    #[inline]
    pub async fn embed_question(
        &self,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<f32>> {
        let vector = self
            .embed_retry
            .run(cancel, || self.embedder.embed(question))
            .await
            .map_err(|e| match e {
                RetryError::Cancelled => RagError::Cancelled,
                RetryError::Exhausted { last, .. } | RetryError::Fatal(last) => {
                    RagError::Embedding(last)
                }
            })?;

        self.collection
            .check_dimension(vector.len(), "Question embedding")?;
        Ok(vector)
    }

    /// Nearest `k` entries within the relevance floor. One attempt, bounded by the store timeout.
    #[inline]
    pub async fn search(
        &self,
        vector: &[f32],
        k: usize,
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        let query = tokio::time::timeout(
            self.store_timeout,
            self.store.query(&self.collection, vector, k),
        );

        let results = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RagError::Cancelled),
            outcome = query => outcome.map_err(|_| {
                RagError::Timeout(format!(
                    "query on '{}' exceeded {:?}",
                    self.collection.name(),
                    self.store_timeout
                ))
            })??,
        };

        let total = results.len();
        let results: QueryResult = match self.max_distance {
            Some(limit) => results
                .into_iter()
                .filter(|hit| hit.distance <= limit)
                .collect(),
            None => results,
        };

        debug!(
            "Retrieved {} of {} hits from '{}'",
            results.len(),
            total,
            self.collection.name()
        );
        Ok(results)
    }

    /// Embed, then search with `k` results at most
    #[inline]
    pub async fn retrieve(
        &self,
        question: &str,
        k: usize,
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        let vector = self.embed_question(question, cancel).await?;
        self.search(&vector, k, cancel).await
    }
}
