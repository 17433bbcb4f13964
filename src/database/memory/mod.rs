// In-process vector store
// Exhaustive search over every entry; used by tests and throwaway runs


use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    CollectionHandle, DistanceMetric, QueryResult, ScoredRecord, StoredEntry, VectorStore,
    prepare_upsert, rank,
};
use crate::{RagError, Result};

#[derive(Debug, Default)]
struct Collection {
    dimension: usize,
    entries: BTreeMap<String, StoredEntry>,
}

/// Vector store kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    distance: DistanceMetric,
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryVectorStore {
    #[inline]
    pub fn new(distance: DistanceMetric) -> Self {
        Self {
            distance,
            collections: RwLock::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn distance(&self) -> DistanceMetric {
        self.distance
    }

    fn missing(name: &str) -> RagError {
        RagError::Database(format!("Collection '{}' does not exist", name))
    }
}

/// Distance between two equal-length vectors under `metric`
#[inline]
pub fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    match metric {
        DistanceMetric::Cosine => {
            let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm_a == 0.0 || norm_b == 0.0 {
                1.0
            } else {
                1.0 - dot / (norm_a * norm_b)
            }
        }
        DistanceMetric::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
        DistanceMetric::Dot => 1.0 - dot,
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn get_or_create_collection(
        &self,
        name: &str,
        dimension: usize,
    ) -> Result<CollectionHandle> {
        crate::config::settings::validate_collection_name(name)?;

        let mut collections = self.collections.write().await;
        let collection = collections
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Creating in-memory collection '{}'", name);
                Collection {
                    dimension,
                    entries: BTreeMap::new(),
                }
            });

        let handle = CollectionHandle::new(name, collection.dimension);
        handle.check_dimension(dimension, "Configured embedding")?;
        Ok(handle)
    }

    async fn upsert(&self, collection: &CollectionHandle, entries: Vec<StoredEntry>) -> Result<()> {
        let entries = prepare_upsert(collection, entries)?;

        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection.name())
            .ok_or_else(|| Self::missing(collection.name()))?;

        for entry in entries {
            target.entries.insert(entry.id.clone(), entry);
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &CollectionHandle,
        vector: &[f32],
        k: usize,
    ) -> Result<QueryResult> {
        collection.check_dimension(vector.len(), "Query vector")?;

        let collections = self.collections.read().await;
        let source = collections
            .get(collection.name())
            .ok_or_else(|| Self::missing(collection.name()))?;

        let hits = source
            .entries
            .values()
            .map(|entry| ScoredRecord {
                id: entry.id.clone(),
                document: entry.document.clone(),
                metadata: entry.metadata.clone(),
                distance: distance(self.distance, vector, &entry.embedding),
            })
            .collect();

        Ok(rank(hits, k))
    }

    async fn count(&self, collection: &CollectionHandle) -> Result<usize> {
        let collections = self.collections.read().await;
        collections
            .get(collection.name())
            .map(|c| c.entries.len())
            .ok_or_else(|| Self::missing(collection.name()))
    }

    async fn peek(&self, collection: &CollectionHandle, limit: usize) -> Result<Vec<StoredEntry>> {
        let collections = self.collections.read().await;
        let source = collections
            .get(collection.name())
            .ok_or_else(|| Self::missing(collection.name()))?;

        Ok(source.entries.values().take(limit).cloned().collect())
    }
}
