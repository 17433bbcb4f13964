// Indexer module
// Turns corpus records into embeddings and flushes them to the vector store in batches

#[cfg(test)]
mod tests;

use futures::{StreamExt, stream};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::corpus::Record;
use crate::database::{CollectionHandle, MAX_UPSERT_BATCH, StoredEntry, VectorStore};
use crate::embeddings::EmbeddingService;
use crate::retry::{RetryError, RetryPolicy};
use crate::{RagError, Result};

/// Called after every row with the number of rows handled so far
pub type ProgressCallback = Arc<dyn Fn(usize) + Send + Sync>;

/// Outcome of one ingest run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// Rows written to the store
    pub indexed: usize,
    /// Rows with no text to embed
    pub skipped: usize,
    /// Rows whose embedding could not be produced
    pub failed: usize,
    /// Upsert calls made
    pub batches: usize,
}

impl IndexReport {
    #[inline]
    pub fn processed(&self) -> usize {
        self.indexed + self.skipped + self.failed
    }
}

enum RowOutcome {
    Embedded(StoredEntry),
    Skipped,
    Failed,
}

/// Builds a collection from records: embed with bounded concurrency, flush in batches
pub struct IndexBuilder {
    embedder: Arc<dyn EmbeddingService>,
    store: Arc<dyn VectorStore>,
    collection: CollectionHandle,
    batch_size: usize,
    concurrency: usize,
    retry: RetryPolicy,
    progress: Option<ProgressCallback>,
}

impl IndexBuilder {
    #[inline]
    pub fn new(
        embedder: Arc<dyn EmbeddingService>,
        store: Arc<dyn VectorStore>,
        collection: CollectionHandle,
        config: &Config,
    ) -> Self {
        let retry = RetryPolicy::new(
            config.indexing.retry_attempts,
            Duration::from_millis(config.indexing.retry_base_delay_ms),
        )
        .with_attempt_timeout(Duration::from_secs(config.ollama.timeout_secs));

        Self {
            embedder,
            store,
            collection,
            batch_size: config.indexing.batch_size.clamp(1, MAX_UPSERT_BATCH),
            concurrency: config.indexing.concurrency.max(1),
            retry,
            progress: None,
        }
    }

    /// Open (or create) the named collection at the configured dimension, then build on it
    #[inline]
    pub async fn open(
        embedder: Arc<dyn EmbeddingService>,
        store: Arc<dyn VectorStore>,
        collection_name: &str,
        config: &Config,
    ) -> Result<Self> {
        let dimension = usize::try_from(config.ollama.embedding_dimension).map_err(|_| {
            RagError::Integrity(format!(
                "Embedding dimension {} does not fit in memory",
                config.ollama.embedding_dimension
            ))
        })?;
        let collection = store
            .get_or_create_collection(collection_name, dimension)
            .await?;

        Ok(Self::new(embedder, store, collection, config))
    }

    #[inline]
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    #[inline]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[inline]
    pub fn collection(&self) -> &CollectionHandle {
        &self.collection
    }

    /// Embed and store every record.
    ///
    /// Rows are consumed in input order. A row that cannot be embedded is counted and
    /// skipped; a vector of the wrong length aborts the run. On cancellation the batch
    /// being assembled is dropped and batches already flushed stay in the store.
    #[inline]
    pub async fn ingest<I>(&self, records: I, cancel: &CancellationToken) -> Result<IndexReport>
    where
        I: IntoIterator<Item = Record>,
        I::IntoIter: Send,
    {
        info!(
            "Indexing into '{}' (batch size {}, concurrency {})",
            self.collection.name(),
            self.batch_size,
            self.concurrency
        );

        let mut report = IndexReport::default();
        let mut batch: Vec<StoredEntry> = Vec::with_capacity(self.batch_size);

        let mut embedded = stream::iter(records)
            .map(|record| self.embed_record(record, cancel))
            .buffered(self.concurrency);

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                next = embedded.next() => Some(next),
            };

            let outcome = match next {
                None => {
                    info!(
                        "Indexing cancelled; discarding {} unflushed entries",
                        batch.len()
                    );
                    return Err(RagError::Cancelled);
                }
                Some(None) => break,
                Some(Some(outcome)) => outcome?,
            };

            match outcome {
                RowOutcome::Embedded(entry) => {
                    self.collection.check_dimension(
                        entry.embedding.len(),
                        &format!("Embedding for '{}'", entry.id),
                    )?;
                    batch.push(entry);

                    if batch.len() >= self.batch_size {
                        self.flush(&mut batch, &mut report, cancel).await?;
                    }
                }
                RowOutcome::Skipped => report.skipped += 1,
                RowOutcome::Failed => report.failed += 1,
            }

            if let Some(progress) = &self.progress {
                progress(report.processed() + batch.len());
            }
        }

        if !batch.is_empty() {
            self.flush(&mut batch, &mut report, cancel).await?;
        }

        info!(
            "Indexed {} records into '{}' ({} skipped, {} failed, {} batches)",
            report.indexed,
            self.collection.name(),
            report.skipped,
            report.failed,
            report.batches
        );
        Ok(report)
    }

    async fn embed_record(&self, record: Record, cancel: &CancellationToken) -> Result<RowOutcome> {
        let id = record.stored_id();

        if !record.has_text() {
            debug!("Skipping '{}': no text", id);
            return Ok(RowOutcome::Skipped);
        }

        match self
            .retry
            .run(cancel, || self.embedder.embed(&record.text))
            .await
        {
            Ok(embedding) => Ok(RowOutcome::Embedded(StoredEntry {
                id,
                document: record.text,
                metadata: record.metadata,
                embedding,
            })),
            Err(RetryError::Cancelled) => Err(RagError::Cancelled),
            Err(e) => {
                warn!("Failed to embed '{}': {}", id, e);
                Ok(RowOutcome::Failed)
            }
        }
    }

    async fn flush(
        &self,
        batch: &mut Vec<StoredEntry>,
        report: &mut IndexReport,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            info!(
                "Indexing cancelled; discarding {} unflushed entries",
                batch.len()
            );
            return Err(RagError::Cancelled);
        }

        let entries = std::mem::replace(batch, Vec::with_capacity(self.batch_size));
        let size = entries.len();

        debug!(
            "Flushing {} entries to '{}'",
            size,
            self.collection.name()
        );
        self.store.upsert(&self.collection, entries).await?;

        report.indexed += size;
        report.batches += 1;
        Ok(())
    }
}
