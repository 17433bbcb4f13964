// Database module
// Vector store contract plus the LanceDB and in-memory backends


pub mod lancedb;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::{RagError, Result};

pub use self::lancedb::LanceVectorStore;
pub use memory::MemoryVectorStore;

/// Largest batch a single upsert accepts
pub const MAX_UPSERT_BATCH: usize = 5000;

/// How nearest neighbours are ranked. Smaller distance is always more similar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`: 0 for identical direction
    #[default]
    Cosine,
    /// Squared euclidean distance
    L2,
    /// `1 - a·b`
    Dot,
}

impl fmt::Display for DistanceMetric {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cosine => write!(f, "cosine"),
            Self::L2 => write!(f, "l2"),
            Self::Dot => write!(f, "dot"),
        }
    }
}

/// An opened collection. Only stores hand these out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHandle {
    name: String,
    dimension: usize,
}

impl CollectionHandle {
    #[inline]
    pub(crate) fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Vector length every entry in this collection has
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Reject a vector whose length differs from the collection's
    #[inline]
    pub fn check_dimension(&self, actual: usize, subject: &str) -> Result<()> {
        if actual == self.dimension {
            Ok(())
        } else {
            Err(RagError::Integrity(format!(
                "{} has {} dimensions but collection '{}' stores {}",
                subject, actual, self.name, self.dimension
            )))
        }
    }
}

/// One persisted entry: `{id, document, metadata, embedding}`
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub id: String,
    pub document: String,
    pub metadata: BTreeMap<String, String>,
    pub embedding: Vec<f32>,
}

/// A query hit
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub id: String,
    pub document: String,
    pub metadata: BTreeMap<String, String>,
    pub distance: f32,
}

/// Hits in ascending distance order, ties broken by id
pub type QueryResult = Vec<ScoredRecord>;

/// Durable, named collections with upsert-by-id and k-nearest-neighbour search
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Open a collection, creating it on first use.
    ///
    /// Opening an existing collection with a different dimension is an integrity error.
    async fn get_or_create_collection(&self, name: &str, dimension: usize)
    -> Result<CollectionHandle>;

    /// Insert or overwrite entries by id. All entries land, or none do.
    async fn upsert(&self, collection: &CollectionHandle, entries: Vec<StoredEntry>) -> Result<()>;

    /// The `k` nearest entries to `vector`, nearest first
    async fn query(
        &self,
        collection: &CollectionHandle,
        vector: &[f32],
        k: usize,
    ) -> Result<QueryResult>;

    async fn count(&self, collection: &CollectionHandle) -> Result<usize>;

    /// A sample of up to `limit` entries, for diagnostics
    async fn peek(&self, collection: &CollectionHandle, limit: usize) -> Result<Vec<StoredEntry>>;

    /// Compact storage after a bulk load
    async fn optimize(&self, _collection: &CollectionHandle) -> Result<()> {
        Ok(())
    }
}

/// Validate an upsert batch and collapse repeated ids, keeping the last occurrence
pub(crate) fn prepare_upsert(
    collection: &CollectionHandle,
    entries: Vec<StoredEntry>,
) -> Result<Vec<StoredEntry>> {
    if entries.len() > MAX_UPSERT_BATCH {
        return Err(RagError::Database(format!(
            "Upsert of {} entries exceeds the maximum batch of {}",
            entries.len(),
            MAX_UPSERT_BATCH
        )));
    }

    for entry in &entries {
        collection.check_dimension(entry.embedding.len(), &format!("Entry '{}'", entry.id))?;
    }

    let mut last_position: HashMap<String, usize> = HashMap::with_capacity(entries.len());
    for (position, entry) in entries.iter().enumerate() {
        last_position.insert(entry.id.clone(), position);
    }

    if last_position.len() == entries.len() {
        return Ok(entries);
    }

    Ok(entries
        .into_iter()
        .enumerate()
        .filter(|(position, entry)| last_position.get(&entry.id) == Some(position))
        .map(|(_, entry)| entry)
        .collect())
}

/// Order hits by distance, then id, and keep the first `k`
pub(crate) fn rank(mut results: QueryResult, k: usize) -> QueryResult {
    results.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(k);
    results
}
