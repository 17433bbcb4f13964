// LanceDB vector database module
// One table per collection: id, document, metadata (JSON), vector


pub mod vector_store;

pub use vector_store::LanceVectorStore;

use std::collections::BTreeMap;

use crate::{RagError, Result};

pub(crate) const ID_COLUMN: &str = "id";
pub(crate) const DOCUMENT_COLUMN: &str = "document";
pub(crate) const METADATA_COLUMN: &str = "metadata";
pub(crate) const VECTOR_COLUMN: &str = "vector";
pub(crate) const DISTANCE_COLUMN: &str = "_distance";

/// Metadata is stored as a JSON object of strings
pub(crate) fn encode_metadata(metadata: &BTreeMap<String, String>) -> Result<String> {
    serde_json::to_string(metadata)
        .map_err(|e| RagError::Database(format!("Failed to encode metadata: {}", e)))
}

pub(crate) fn decode_metadata(raw: &str) -> Result<BTreeMap<String, String>> {
    serde_json::from_str(raw)
        .map_err(|e| RagError::Database(format!("Failed to decode metadata: {}", e)))
}
