use super::*;
use crate::config::IndexingConfig;
use crate::embeddings::EmbeddingError;
use crate::testing::{CountingStore, FakeEmbedder, verse};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

const DIMENSION: usize = 16;

fn test_config(batch_size: usize, concurrency: usize) -> Config {
    Config {
        indexing: IndexingConfig {
            batch_size,
            concurrency,
            retry_attempts: 2,
            retry_base_delay_ms: 1,
        },
        ..Config::default()
    }
}

/// Sleeps a scattered few milliseconds per call and records the most calls in flight at once
struct GaugedEmbedder {
    inner: FakeEmbedder,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl GaugedEmbedder {
    fn new() -> Self {
        Self {
            inner: FakeEmbedder::new(DIMENSION),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingService for GaugedEmbedder {
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        // Later rows often finish first
        let seed = text
            .bytes()
            .fold(0_u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
        tokio::time::sleep(Duration::from_millis(1 + seed % 7)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.inner.embed(text).await
    }

    fn model(&self) -> &str {
        "gauged-embed"
    }
}

fn verses(count: u32) -> Vec<Record> {
    (1..=count)
        .map(|n| verse("Psalms", 119, n, &format!("text {n}")))
        .collect()
}

async fn builder(
    embedder: &Arc<FakeEmbedder>,
    store: &Arc<CountingStore>,
    config: &Config,
) -> IndexBuilder {
    let collection = store
        .get_or_create_collection("drb_verses", DIMENSION)
        .await
        .expect("should create collection");
    IndexBuilder::new(
        Arc::clone(embedder) as Arc<dyn EmbeddingService>,
        Arc::clone(store) as Arc<dyn VectorStore>,
        collection,
        config,
    )
}

#[tokio::test]
async fn flushes_ceil_of_rows_over_batch_size() {
    let embedder = Arc::new(FakeEmbedder::new(DIMENSION));
    let store = Arc::new(CountingStore::new());
    let indexer = builder(&embedder, &store, &test_config(3, 4)).await;

    let report = indexer
        .ingest(verses(7), &CancellationToken::new())
        .await
        .expect("ingest should succeed");

    assert_eq!(report.indexed, 7);
    assert_eq!(report.batches, 3);
    assert_eq!(store.upserts(), 3);
    assert_eq!(
        store
            .count(indexer.collection())
            .await
            .expect("should count"),
        7
    );
}

#[tokio::test]
async fn exact_multiple_has_no_trailing_flush() {
    let embedder = Arc::new(FakeEmbedder::new(DIMENSION));
    let store = Arc::new(CountingStore::new());
    let indexer = builder(&embedder, &store, &test_config(2, 2)).await;

    let report = indexer
        .ingest(verses(4), &CancellationToken::new())
        .await
        .expect("ingest should succeed");

    assert_eq!(report.batches, 2);
    assert_eq!(store.upserts(), 2);
}

#[tokio::test]
async fn reindexing_is_idempotent() {
    let embedder = Arc::new(FakeEmbedder::new(DIMENSION));
    let store = Arc::new(CountingStore::new());
    let indexer = builder(&embedder, &store, &test_config(4, 4)).await;

    for _ in 0..2 {
        indexer
            .ingest(verses(10), &CancellationToken::new())
            .await
            .expect("ingest should succeed");
    }

    assert_eq!(
        store
            .count(indexer.collection())
            .await
            .expect("should count"),
        10
    );
}

#[tokio::test]
async fn empty_rows_are_skipped_before_embedding() {
    let embedder = Arc::new(FakeEmbedder::new(DIMENSION));
    let store = Arc::new(CountingStore::new());
    let indexer = builder(&embedder, &store, &test_config(10, 1)).await;

    let mut records = verses(3);
    records.push(verse("Genesis", 1, 1, "   "));

    let report = indexer
        .ingest(records, &CancellationToken::new())
        .await
        .expect("ingest should succeed");

    assert_eq!(report.indexed, 3);
    assert_eq!(report.skipped, 1);
    assert_eq!(embedder.calls(), 3);
}

#[tokio::test]
async fn failed_rows_are_counted_not_fatal() {
    let embedder = Arc::new(FakeEmbedder::new(DIMENSION));
    embedder.fail_on("text 2", EmbeddingError::InvalidInput("bad".to_string()));
    embedder.fail_on("text 4", EmbeddingError::Transport("down".to_string()));
    let store = Arc::new(CountingStore::new());
    let indexer = builder(&embedder, &store, &test_config(10, 2)).await;

    let report = indexer
        .ingest(verses(5), &CancellationToken::new())
        .await
        .expect("ingest should succeed");

    assert_eq!(report.indexed, 3);
    assert_eq!(report.failed, 2);
    // Invalid input is tried once, transport errors use both attempts
    assert_eq!(embedder.calls(), 3 + 1 + 2);

    let stored = store
        .peek(indexer.collection(), 10)
        .await
        .expect("should peek");
    assert!(stored.iter().all(|entry| entry.embedding.len() == DIMENSION));
}

#[tokio::test]
async fn dimension_mismatch_aborts_the_run() {
    let embedder = Arc::new(FakeEmbedder::new(DIMENSION));
    embedder.wrong_dimension_for("text 3", DIMENSION + 1);
    let store = Arc::new(CountingStore::new());
    let indexer = builder(&embedder, &store, &test_config(2, 1)).await;

    let result = indexer.ingest(verses(6), &CancellationToken::new()).await;

    assert!(matches!(result, Err(RagError::Integrity(_))));
    assert_eq!(store.upserts(), 1);
}

#[tokio::test]
async fn cancellation_discards_the_open_batch() {
    let cancel = CancellationToken::new();
    let embedder = Arc::new(FakeEmbedder::new(DIMENSION));
    embedder.cancel_on("text 4", cancel.clone());
    let store = Arc::new(CountingStore::new());
    let indexer = builder(&embedder, &store, &test_config(2, 1)).await;

    let result = indexer.ingest(verses(8), &cancel).await;

    assert!(matches!(result, Err(RagError::Cancelled)));
    assert_eq!(store.upserts(), 1);
    assert_eq!(
        store
            .count(indexer.collection())
            .await
            .expect("should count"),
        2
    );
}

#[tokio::test]
async fn progress_reports_every_row() {
    let embedder = Arc::new(FakeEmbedder::new(DIMENSION));
    let store = Arc::new(CountingStore::new());
    let seen = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&seen);

    let indexer = builder(&embedder, &store, &test_config(3, 2))
        .await
        .with_progress(Arc::new(move |processed| {
            sink.store(processed, Ordering::SeqCst);
        }));

    let mut records = verses(4);
    records.push(verse("Genesis", 1, 1, ""));
    indexer
        .ingest(records, &CancellationToken::new())
        .await
        .expect("ingest should succeed");

    assert_eq!(seen.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn open_creates_collection_at_configured_dimension() {
    let embedder: Arc<dyn EmbeddingService> = Arc::new(FakeEmbedder::new(DIMENSION));
    let store: Arc<dyn VectorStore> = Arc::new(CountingStore::new());
    let mut config = test_config(10, 1);
    config.ollama.embedding_dimension = 16;

    let indexer = IndexBuilder::open(embedder, Arc::clone(&store), "ccc_qna", &config)
        .await
        .expect("should open collection");

    assert_eq!(indexer.collection().name(), "ccc_qna");
    assert_eq!(indexer.collection().dimension(), 16);
}

async fn run_gauged(concurrency: usize) -> (usize, Vec<Vec<String>>, Vec<String>) {
    let embedder = Arc::new(GaugedEmbedder::new());
    let store = Arc::new(CountingStore::new());
    let collection = store
        .get_or_create_collection("drb_verses", DIMENSION)
        .await
        .expect("should create collection");
    let indexer = IndexBuilder::new(
        Arc::clone(&embedder) as Arc<dyn EmbeddingService>,
        Arc::clone(&store) as Arc<dyn VectorStore>,
        collection,
        &test_config(3, concurrency),
    );

    let records = verses(20);
    let expected = records.iter().map(Record::stored_id).collect();
    indexer
        .ingest(records, &CancellationToken::new())
        .await
        .expect("ingest should succeed");

    (embedder.peak(), store.flushed(), expected)
}

#[tokio::test]
async fn embedding_concurrency_is_bounded() {
    let (peak, _, _) = run_gauged(4).await;
    assert!(peak <= 4, "peak {peak} exceeds the concurrency limit");
    assert!(peak > 1, "embeddings never overlapped");

    let (peak, _, _) = run_gauged(1).await;
    assert_eq!(peak, 1);
}

#[tokio::test]
async fn batches_flush_in_input_order() {
    let (_, flushed, expected) = run_gauged(4).await;

    assert_eq!(flushed.len(), 7);
    assert!(flushed[..6].iter().all(|batch| batch.len() == 3));
    assert_eq!(flushed.concat(), expected);
}
