
use super::{
    DISTANCE_COLUMN, DOCUMENT_COLUMN, ID_COLUMN, METADATA_COLUMN, VECTOR_COLUMN, decode_metadata,
    encode_metadata,
};
use crate::config::Config;
use crate::database::{
    CollectionHandle, DistanceMetric, QueryResult, ScoredRecord, StoredEntry, VectorStore,
    prepare_upsert, rank,
};
use crate::{RagError, Result};
use arrow::array::{Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType,
    query::{ExecutableQuery, QueryBase},
    table::Table,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Durable vector store backed by LanceDB, one table per collection
pub struct LanceVectorStore {
    connection: Connection,
    path: PathBuf,
    distance: DistanceMetric,
}

impl From<DistanceMetric> for DistanceType {
    #[inline]
    fn from(metric: DistanceMetric) -> Self {
        match metric {
            DistanceMetric::Cosine => Self::Cosine,
            DistanceMetric::L2 => Self::L2,
            DistanceMetric::Dot => Self::Dot,
        }
    }
}

impl LanceVectorStore {
    /// Open the store under the configured base directory
    ///
    /// # Arguments
    /// * `config` - Application configuration containing the base directory and metric
    #[inline]
    pub async fn new(config: &Config) -> Result<Self> {
        Self::open(&config.vector_database_path(), config.retrieval.distance).await
    }

    /// Open (or create) a LanceDB database directory
    #[inline]
    pub async fn open(path: &Path, distance: DistanceMetric) -> Result<Self> {
        debug!("Initializing LanceDB at path: {}", path.display());

        std::fs::create_dir_all(path).map_err(|e| {
            RagError::Database(format!("Failed to create vector database directory: {}", e))
        })?;

        let uri = format!("file://{}", path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to connect to LanceDB: {}", e)))?;

        info!("Vector store opened at {} ({} distance)", path.display(), distance);
        Ok(Self {
            connection,
            path: path.to_path_buf(),
            distance,
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn distance(&self) -> DistanceMetric {
        self.distance
    }

    /// Names of every collection in this database
    #[inline]
    pub async fn collection_names(&self) -> Result<Vec<String>> {
        self.connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to list tables: {}", e)))
    }

    /// Create schema with the specified vector dimension
    fn create_schema(vector_dim: usize) -> Result<Arc<Schema>> {
        let width = i32::try_from(vector_dim).map_err(|_| {
            RagError::Integrity(format!("Vector dimension {} is too large", vector_dim))
        })?;

        Ok(Arc::new(Schema::new(vec![
            Field::new(ID_COLUMN, DataType::Utf8, false),
            Field::new(DOCUMENT_COLUMN, DataType::Utf8, false),
            Field::new(METADATA_COLUMN, DataType::Utf8, false),
            Field::new(
                VECTOR_COLUMN,
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    width,
                ),
                false,
            ),
        ])))
    }

    /// Up to `limit` nearest rows, ranked by distance then id
    async fn nearest(&self, table: &Table, vector: &[f32], limit: usize) -> Result<QueryResult> {
        let results = table
            .vector_search(vector)
            .map_err(|e| RagError::Database(format!("Failed to create vector search: {}", e)))?
            .column(VECTOR_COLUMN)
            .distance_type(self.distance.into())
            .limit(limit)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to execute search: {}", e)))?;

        let mut hits = Vec::new();
        for batch in Self::collect_batches(results).await? {
            hits.extend(Self::parse_search_batch(&batch)?);
        }
        Ok(rank(hits, limit))
    }

    async fn open_table(&self, name: &str) -> Result<Table> {
        self.connection
            .open_table(name)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to open table '{}': {}", name, e)))
    }

    /// Detect vector dimension from an existing table schema
    async fn detect_vector_dimension(table: &Table) -> Result<usize> {
        let schema = table
            .schema()
            .await
            .map_err(|e| RagError::Database(format!("Failed to get table schema: {}", e)))?;

        for field in schema.fields() {
            if field.name() == VECTOR_COLUMN {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return usize::try_from(*size).map_err(|_| {
                        RagError::Integrity(format!("Invalid vector width {}", size))
                    });
                }
            }
        }

        Err(RagError::Integrity(format!(
            "Table '{}' has no fixed-size '{}' column",
            table.name(),
            VECTOR_COLUMN
        )))
    }

    async fn handle_for_existing(
        &self,
        name: &str,
        dimension: usize,
    ) -> Result<CollectionHandle> {
        let table = self.open_table(name).await?;
        let existing = Self::detect_vector_dimension(&table).await?;
        let handle = CollectionHandle::new(name, existing);

        handle.check_dimension(dimension, "Configured embedding")?;

        debug!(
            "Opened existing collection '{}' with {} dimensions",
            name, existing
        );
        Ok(handle)
    }

    /// Create a RecordBatch from stored entries
    fn create_record_batch(
        collection: &CollectionHandle,
        entries: &[StoredEntry],
    ) -> Result<RecordBatch> {
        let vector_dim = collection.dimension();
        let schema = Self::create_schema(vector_dim)?;

        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        let documents: Vec<&str> = entries.iter().map(|e| e.document.as_str()).collect();
        let metadatas = entries
            .iter()
            .map(|e| encode_metadata(&e.metadata))
            .collect::<Result<Vec<_>>>()?;

        let mut flat_values = Vec::with_capacity(entries.len() * vector_dim);
        for entry in entries {
            flat_values.extend_from_slice(&entry.embedding);
        }
        let values_array = Float32Array::from(flat_values);
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let width = i32::try_from(vector_dim).map_err(|_| {
            RagError::Integrity(format!("Vector dimension {} is too large", vector_dim))
        })?;
        let vector_array = FixedSizeListArray::try_new(field, width, Arc::new(values_array), None)
            .map_err(|e| RagError::Database(format!("Failed to create vector array: {}", e)))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(documents)),
            Arc::new(StringArray::from(metadatas)),
            Arc::new(vector_array),
        ];

        RecordBatch::try_new(schema, arrays)
            .map_err(|e| RagError::Database(format!("Failed to create record batch: {}", e)))
    }

    /// Drain a LanceDB result stream into record batches
    async fn collect_batches(
        results: lancedb::arrow::SendableRecordBatchStream,
    ) -> Result<Vec<RecordBatch>> {
        results
            .try_collect()
            .await
            .map_err(|e| RagError::Database(format!("Failed to read result stream: {}", e)))
    }

    fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
        batch
            .column_by_name(name)
            .ok_or_else(|| RagError::Database(format!("Missing {} column", name)))?
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| RagError::Database(format!("Invalid {} column type", name)))
    }

    /// Parse a single record batch from search results
    fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<ScoredRecord>> {
        let ids = Self::string_column(batch, ID_COLUMN)?;
        let documents = Self::string_column(batch, DOCUMENT_COLUMN)?;
        let metadatas = Self::string_column(batch, METADATA_COLUMN)?;
        let distances = batch
            .column_by_name(DISTANCE_COLUMN)
            .ok_or_else(|| RagError::Database("Missing _distance column".to_string()))?
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| RagError::Database("Invalid _distance column type".to_string()))?;

        (0..batch.num_rows())
            .map(|row| {
                Ok(ScoredRecord {
                    id: ids.value(row).to_string(),
                    document: documents.value(row).to_string(),
                    metadata: decode_metadata(metadatas.value(row))?,
                    distance: if distances.is_null(row) {
                        f32::INFINITY
                    } else {
                        distances.value(row)
                    },
                })
            })
            .collect()
    }

    /// Parse a plain scan batch back into stored entries
    fn parse_entry_batch(batch: &RecordBatch) -> Result<Vec<StoredEntry>> {
        let ids = Self::string_column(batch, ID_COLUMN)?;
        let documents = Self::string_column(batch, DOCUMENT_COLUMN)?;
        let metadatas = Self::string_column(batch, METADATA_COLUMN)?;
        let vectors = batch
            .column_by_name(VECTOR_COLUMN)
            .ok_or_else(|| RagError::Database("Missing vector column".to_string()))?
            .as_any()
            .downcast_ref::<FixedSizeListArray>()
            .ok_or_else(|| RagError::Database("Invalid vector column type".to_string()))?;

        (0..batch.num_rows())
            .map(|row| {
                let values = vectors.value(row);
                let embedding = values
                    .as_any()
                    .downcast_ref::<Float32Array>()
                    .ok_or_else(|| RagError::Database("Invalid vector item type".to_string()))?
                    .values()
                    .to_vec();

                Ok(StoredEntry {
                    id: ids.value(row).to_string(),
                    document: documents.value(row).to_string(),
                    metadata: decode_metadata(metadatas.value(row))?,
                    embedding,
                })
            })
            .collect()
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn get_or_create_collection(
        &self,
        name: &str,
        dimension: usize,
    ) -> Result<CollectionHandle> {
        crate::config::settings::validate_collection_name(name)?;

        if self.collection_names().await?.iter().any(|n| n == name) {
            return self.handle_for_existing(name, dimension).await;
        }

        info!(
            "Creating collection '{}' with {} dimensions",
            name, dimension
        );

        let schema = Self::create_schema(dimension)?;
        match self
            .connection
            .create_empty_table(name, schema)
            .execute()
            .await
        {
            Ok(_) => Ok(CollectionHandle::new(name, dimension)),
            Err(lancedb::Error::TableAlreadyExists { .. }) => {
                // Another writer created it between the listing and the create
                self.handle_for_existing(name, dimension).await
            }
            Err(e) => Err(RagError::Database(format!(
                "Failed to create table '{}': {}",
                name, e
            ))),
        }
    }

    async fn upsert(&self, collection: &CollectionHandle, entries: Vec<StoredEntry>) -> Result<()> {
        let entries = prepare_upsert(collection, entries)?;
        if entries.is_empty() {
            debug!("No entries to upsert");
            return Ok(());
        }

        debug!(
            "Upserting batch of {} entries into '{}'",
            entries.len(),
            collection.name()
        );

        let record_batch = Self::create_record_batch(collection, &entries)?;
        let table = self.open_table(collection.name()).await?;

        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        let mut merge = table.merge_insert(&[ID_COLUMN]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(reader))
            .await
            .map_err(|e| RagError::Database(format!("Failed to upsert entries: {}", e)))?;

        info!(
            "Upserted {} entries into '{}'",
            entries.len(),
            collection.name()
        );
        Ok(())
    }

    async fn query(
        &self,
        collection: &CollectionHandle,
        vector: &[f32],
        k: usize,
    ) -> Result<QueryResult> {
        collection.check_dimension(vector.len(), "Query vector")?;

        if k == 0 {
            return Ok(Vec::new());
        }

        let table = self.open_table(collection.name()).await?;

        let rows = table
            .count_rows(None)
            .await
            .map_err(|e| RagError::Database(format!("Failed to count rows: {}", e)))?;
        if rows == 0 {
            debug!("Collection '{}' is empty", collection.name());
            return Ok(Vec::new());
        }

        debug!(
            "Searching '{}' for {} nearest neighbours",
            collection.name(),
            k
        );

        // LanceDB cuts at `limit` in scan order; widen until no tie straddles rank k
        let mut limit = k.min(rows);
        let hits = loop {
            let hits = self.nearest(&table, vector, limit).await?;
            let exhausted = hits.len() < limit || limit >= rows;
            let boundary_tied = match (hits.get(k - 1), hits.last()) {
                (Some(kth), Some(last)) => kth.distance.total_cmp(&last.distance).is_eq(),
                _ => false,
            };

            if exhausted || !boundary_tied {
                break hits;
            }
            limit = limit.saturating_mul(2).min(rows);
            debug!(
                "Distance tie at rank {} in '{}'; widening search to {} rows",
                k,
                collection.name(),
                limit
            );
        };

        debug!("Parsed {} search results", hits.len());
        Ok(rank(hits, k))
    }

    async fn count(&self, collection: &CollectionHandle) -> Result<usize> {
        let table = self.open_table(collection.name()).await?;

        table
            .count_rows(None)
            .await
            .map_err(|e| RagError::Database(format!("Failed to count rows: {}", e)))
    }

    async fn peek(&self, collection: &CollectionHandle, limit: usize) -> Result<Vec<StoredEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let table = self.open_table(collection.name()).await?;
        let results = table
            .query()
            .limit(limit)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to scan table: {}", e)))?;

        let mut entries = Vec::new();
        for batch in Self::collect_batches(results).await? {
            entries.extend(Self::parse_entry_batch(&batch)?);
        }
        entries.truncate(limit);

        Ok(entries)
    }

    async fn optimize(&self, collection: &CollectionHandle) -> Result<()> {
        debug!("Optimizing collection '{}'", collection.name());

        let table = self.open_table(collection.name()).await?;
        if let Err(e) = table.optimize(lancedb::table::OptimizeAction::All).await {
            warn!(
                "Failed to optimize collection '{}': {}",
                collection.name(),
                e
            );
            return Err(RagError::Database(format!(
                "Failed to optimize table: {}",
                e
            )));
        }

        info!("Collection '{}' optimized", collection.name());
        Ok(())
    }
}
