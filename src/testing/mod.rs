// Test doubles for the embedding, generation and storage seams

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::corpus::Record;
use crate::database::{
    CollectionHandle, DistanceMetric, MemoryVectorStore, QueryResult, StoredEntry, VectorStore,
};
use crate::embeddings::{EmbeddingError, EmbeddingService};
use crate::generation::{GenerationError, GenerationService};

/// Bag-of-words embedder: texts sharing words land close together under cosine distance
#[derive(Debug, Default)]
pub struct FakeEmbedder {
    dimension: usize,
    calls: AtomicUsize,
    failures: Mutex<HashMap<String, EmbeddingError>>,
    cancel_on: Mutex<Option<(String, CancellationToken)>>,
    override_dimension: Mutex<HashMap<String, usize>>,
}

impl FakeEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    pub fn fail_on(&self, text: &str, error: EmbeddingError) {
        self.failures
            .lock()
            .expect("lock poisoned")
            .insert(text.to_string(), error);
    }

    /// Trip `token` while embedding `text`
    pub fn cancel_on(&self, text: &str, token: CancellationToken) {
        *self.cancel_on.lock().expect("lock poisoned") = Some((text.to_string(), token));
    }

    /// Return a vector of the wrong length for `text`
    pub fn wrong_dimension_for(&self, text: &str, dimension: usize) {
        self.override_dimension
            .lock()
            .expect("lock poisoned")
            .insert(text.to_string(), dimension);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(&self, text: &str, dimension: usize) -> Vec<f32> {
        let mut vector = vec![0.0; dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            let bucket = word
                .bytes()
                .fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
                    (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
                });
            let index = usize::try_from(bucket % dimension as u64).expect("bucket fits usize");
            vector[index] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingService for FakeEmbedder {
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let cancel_on = self.cancel_on.lock().expect("lock poisoned").clone();
        if let Some((trigger, token)) = cancel_on {
            if trigger == text {
                token.cancel();
            }
        }

        let failure = self.failures.lock().expect("lock poisoned").get(text).cloned();
        if let Some(error) = failure {
            return Err(error);
        }

        let dimension = self
            .override_dimension
            .lock()
            .expect("lock poisoned")
            .get(text)
            .copied()
            .unwrap_or(self.dimension);

        Ok(self.vector_for(text, dimension))
    }

    fn model(&self) -> &str {
        "fake-embed"
    }
}

/// Replies with a canned answer and records every prompt
#[derive(Debug)]
pub struct FakeGenerator {
    reply: std::result::Result<String, GenerationError>,
    prompts: Mutex<Vec<String>>,
}

impl FakeGenerator {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: GenerationError) -> Self {
        Self {
            reply: Err(error),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl GenerationService for FakeGenerator {
    async fn generate(&self, prompt: &str) -> std::result::Result<String, GenerationError> {
        self.prompts
            .lock()
            .expect("lock poisoned")
            .push(prompt.to_string());
        self.reply.clone()
    }

    fn model(&self) -> &str {
        "fake-generate"
    }
}

/// In-memory store that counts upsert calls and remembers the ids of each batch
#[derive(Debug, Default)]
pub struct CountingStore {
    inner: MemoryVectorStore,
    upserts: AtomicUsize,
    flushed: Mutex<Vec<Vec<String>>>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryVectorStore::new(DistanceMetric::Cosine),
            upserts: AtomicUsize::new(0),
            flushed: Mutex::new(Vec::new()),
        }
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Ids of every upserted batch, in call order
    pub fn flushed(&self) -> Vec<Vec<String>> {
        self.flushed.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl VectorStore for CountingStore {
    async fn get_or_create_collection(
        &self,
        name: &str,
        dimension: usize,
    ) -> Result<CollectionHandle> {
        self.inner.get_or_create_collection(name, dimension).await
    }

    async fn upsert(&self, collection: &CollectionHandle, entries: Vec<StoredEntry>) -> Result<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let ids = entries.iter().map(|entry| entry.id.clone()).collect();
        self.flushed.lock().expect("lock poisoned").push(ids);
        self.inner.upsert(collection, entries).await
    }

    async fn query(
        &self,
        collection: &CollectionHandle,
        vector: &[f32],
        k: usize,
    ) -> Result<QueryResult> {
        self.inner.query(collection, vector, k).await
    }

    async fn count(&self, collection: &CollectionHandle) -> Result<usize> {
        self.inner.count(collection).await
    }

    async fn peek(&self, collection: &CollectionHandle, limit: usize) -> Result<Vec<StoredEntry>> {
        self.inner.peek(collection, limit).await
    }
}

pub fn verse(book: &str, chapter: u32, verse: u32, text: &str) -> Record {
    let metadata = BTreeMap::from([
        ("book".to_string(), book.to_string()),
        ("chapter".to_string(), chapter.to_string()),
        ("verse".to_string(), verse.to_string()),
    ]);
    Record::new(
        vec![book.to_string(), chapter.to_string(), verse.to_string()],
        text,
        metadata,
    )
}

pub fn question(number: u32, question: &str, answer: &str) -> Record {
    let metadata = BTreeMap::from([("question_num".to_string(), number.to_string())]);
    Record::new(
        vec![number.to_string()],
        format!("Q: {question}\nA: {answer}"),
        metadata,
    )
}
