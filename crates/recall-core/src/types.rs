//! Core domain types for the retrieval engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use ulid::Ulid;

use crate::error::{Result, StoreError};

/// Document type, determines how content is interpreted and filtered during search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Schema,
    Query,
    Plan,
    Result,
    Business,
    Performance,
    Memory,
}

impl DocumentType {
    /// Parse from the lowercase form stored in the database.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "schema" => Some(Self::Schema),
            "query" => Some(Self::Query),
            "plan" => Some(Self::Plan),
            "result" => Some(Self::Result),
            "business" => Some(Self::Business),
            "performance" => Some(Self::Performance),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }

    /// The lowercase form stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Query => "query",
            Self::Plan => "plan",
            Self::Result => "result",
            Self::Business => "business",
            Self::Performance => "performance",
            Self::Memory => "memory",
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| StoreError::validation(format!("unknown document type: {s}")))
    }
}

/// Distance metric used to score vector similarity.
///
/// All metrics are mapped to a "higher is better" scalar so results from
/// different collections rank consistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    #[default]
    Cosine,
    Euclidean,
    Dot,
}

impl Distance {
    /// Score two vectors of equal length.
    ///
    /// Cosine with a zero-norm operand scores 0 rather than dividing by zero.
    /// Euclidean distance is converted to a similarity via `1 / (1 + d)`.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }
        match self {
            Self::Cosine => {
                let mut dot = 0.0f32;
                let mut norm_a = 0.0f32;
                let mut norm_b = 0.0f32;
                for i in 0..a.len() {
                    dot += a[i] * b[i];
                    norm_a += a[i] * a[i];
                    norm_b += b[i] * b[i];
                }
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 0.0;
                }
                dot / (norm_a.sqrt() * norm_b.sqrt())
            }
            Self::Euclidean => {
                let mut sum = 0.0f32;
                for i in 0..a.len() {
                    let d = a[i] - b[i];
                    sum += d * d;
                }
                1.0 / (1.0 + sum.sqrt())
            }
            Self::Dot => {
                let mut dot = 0.0f32;
                for i in 0..a.len() {
                    dot += a[i] * b[i];
                }
                dot
            }
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cosine" => Some(Self::Cosine),
            "euclidean" => Some(Self::Euclidean),
            "dot" => Some(Self::Dot),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::Dot => "dot",
        }
    }
}

impl std::fmt::Display for Distance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// An embedded document in the vector store.
///
/// Documents form an optional parent-child hierarchy via `parent_id`.
/// `level` is the depth from a root document and is always computed by the
/// backend from the parent, never taken from the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier. Generated (ULID) when the caller leaves it empty;
    /// callers may supply structured ids (e.g. `table:conn1:public.users`).
    pub id: String,

    /// Owning collection (dimensioned namespace).
    pub collection: String,

    /// Tenant / data-source boundary. Queries scoped to one connection never
    /// surface another connection's documents.
    pub connection_id: String,

    /// Document classification.
    #[serde(rename = "type")]
    pub doc_type: DocumentType,

    /// Raw text, used for lexical search.
    pub content: String,

    /// Embedding vector. Empty means "not embedded": the document is only
    /// reachable through lexical search.
    #[serde(default)]
    pub embedding: Vec<f32>,

    /// Caller-defined metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Parent document, if any. A back-reference, not ownership.
    #[serde(default)]
    pub parent_id: Option<String>,

    /// Depth from the root of the hierarchy (0 = root). Backend-assigned.
    #[serde(default)]
    pub level: u32,

    /// Creation timestamp (unix millis, backend-assigned on first write).
    #[serde(default)]
    pub created_at: u64,

    /// Last update timestamp (unix millis, backend-assigned on every write).
    #[serde(default)]
    pub updated_at: u64,

    /// Times this document was returned by a search.
    #[serde(default)]
    pub access_count: u64,

    /// Last time this document was returned by a search (unix millis).
    #[serde(default)]
    pub last_accessed: u64,

    /// Relevance score. Populated only in search results, never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl Document {
    /// Create a new document with a generated id.
    pub fn new(
        collection: impl Into<String>,
        connection_id: impl Into<String>,
        doc_type: DocumentType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Ulid::new().to_string(),
            collection: collection.into(),
            connection_id: connection_id.into(),
            doc_type,
            content: content.into(),
            embedding: Vec::new(),
            metadata: HashMap::new(),
            parent_id: None,
            level: 0,
            created_at: 0,
            updated_at: 0,
            access_count: 0,
            last_accessed: 0,
            score: None,
        }
    }

    /// Use a caller-supplied id instead of the generated one.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Validate the embedding length against a collection's dimension.
    ///
    /// An empty embedding is allowed (lexical-only document); anything else
    /// must match exactly.
    pub fn validate_dimension(&self, expected: usize) -> Result<()> {
        if self.embedding.is_empty() || self.embedding.len() == expected {
            Ok(())
        } else {
            Err(StoreError::DimensionMismatch {
                expected,
                actual: self.embedding.len(),
            })
        }
    }
}

/// Configuration of a collection: a named, dimensioned namespace.
///
/// The dimension is fixed at creation; changing it requires drop-and-recreate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,

    /// Embedding dimension. All non-empty embeddings in the collection must
    /// have exactly this length.
    pub vector_size: usize,

    /// Metric used by similarity search in this collection.
    #[serde(default)]
    pub distance: Distance,

    /// Keep payloads on disk rather than in memory (backend hint).
    #[serde(default)]
    pub on_disk_payload: bool,
}

impl CollectionConfig {
    pub fn new(name: impl Into<String>, vector_size: usize) -> Self {
        Self {
            name: name.into(),
            vector_size,
            distance: Distance::Cosine,
            on_disk_payload: false,
        }
    }

    pub fn with_distance(mut self, distance: Distance) -> Self {
        self.distance = distance;
        self
    }
}

/// Store-wide statistics, recomputed on demand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorStoreStats {
    pub total_documents: u64,
    pub total_collections: u64,
    pub storage_bytes: u64,

    /// Unix millis of the last completed optimize, if any.
    pub last_optimized: Option<u64>,

    /// Unix millis of the last completed backup, if any.
    pub last_backup: Option<u64>,
}

/// Per-collection statistics, recomputed on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionStats {
    pub name: String,
    pub document_count: u64,
    pub dimension: usize,
    pub distance: Distance,

    /// Bytes of embedding data held for this collection.
    pub index_size_bytes: u64,

    /// Unix millis of the most recent document update.
    pub last_updated: u64,
}

/// Equality pre-filter applied before scoring.
///
/// Filters scope the candidate set, so `k` always reflects post-filter
/// results. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub collection: Option<String>,
    pub connection_id: Option<String>,
    pub doc_type: Option<DocumentType>,
    pub level: Option<u32>,
    pub parent_id: Option<String>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    pub fn connection(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    pub fn doc_type(mut self, doc_type: DocumentType) -> Self {
        self.doc_type = Some(doc_type);
        self
    }

    pub fn level(mut self, level: u32) -> Self {
        self.level = Some(level);
        self
    }

    pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Whether a document passes this filter.
    pub fn matches(&self, doc: &Document) -> bool {
        if let Some(c) = &self.collection {
            if &doc.collection != c {
                return false;
            }
        }
        if let Some(conn) = &self.connection_id {
            if &doc.connection_id != conn {
                return false;
            }
        }
        if let Some(t) = self.doc_type {
            if doc.doc_type != t {
                return false;
            }
        }
        if let Some(l) = self.level {
            if doc.level != l {
                return false;
            }
        }
        if let Some(p) = &self.parent_id {
            if doc.parent_id.as_deref() != Some(p.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Policy applied when deleting a document that has children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    /// Delete the entire descendant subtree.
    #[default]
    Cascade,

    /// Re-attach direct children to the deleted node's parent and shift the
    /// subtree one level up. Never leaves a dangling `parent_id`.
    Reparent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_type_roundtrip() {
        for t in [
            DocumentType::Schema,
            DocumentType::Query,
            DocumentType::Plan,
            DocumentType::Result,
            DocumentType::Business,
            DocumentType::Performance,
            DocumentType::Memory,
        ] {
            assert_eq!(DocumentType::parse(t.as_str()), Some(t));
        }
        assert_eq!(DocumentType::parse("bogus"), None);
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let d = Distance::Cosine;
        let a = [1.0, 0.0, 0.0, 0.0];
        let b = [0.0, 1.0, 0.0, 0.0];
        assert!((d.score(&a, &a) - 1.0).abs() < 1e-6);
        assert!(d.score(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_norm_is_zero() {
        let d = Distance::Cosine;
        assert_eq!(d.score(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_euclidean_similarity_conversion() {
        let d = Distance::Euclidean;
        // Identical vectors: distance 0 -> similarity 1.
        assert!((d.score(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        // Distance 1 -> similarity 0.5.
        assert!((d.score(&[0.0], &[1.0]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_dot_score() {
        let d = Distance::Dot;
        assert!((d.score(&[1.0, 2.0], &[3.0, 4.0]) - 11.0).abs() < 1e-6);
    }

    #[test]
    fn test_mismatched_length_scores_zero() {
        assert_eq!(Distance::Cosine.score(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_dimension_validation() {
        let doc = Document::new("c", "conn", DocumentType::Schema, "x")
            .with_embedding(vec![1.0, 2.0, 3.0]);
        assert!(doc.validate_dimension(3).is_ok());
        assert!(matches!(
            doc.validate_dimension(4),
            Err(StoreError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_empty_embedding_passes_validation() {
        let doc = Document::new("c", "conn", DocumentType::Memory, "note");
        assert!(doc.validate_dimension(1536).is_ok());
    }

    #[test]
    fn test_filter_matches() {
        let doc = Document::new("schema_docs", "conn1", DocumentType::Schema, "users table");
        let filter = SearchFilter::new()
            .connection("conn1")
            .doc_type(DocumentType::Schema);
        assert!(filter.matches(&doc));

        let other = SearchFilter::new().connection("conn2");
        assert!(!other.matches(&doc));

        assert!(SearchFilter::new().matches(&doc));
    }

    #[test]
    fn test_filter_parent_and_level() {
        let mut doc = Document::new("c", "conn", DocumentType::Schema, "col").with_parent("t1");
        doc.level = 1;
        assert!(SearchFilter::new().parent("t1").level(1).matches(&doc));
        assert!(!SearchFilter::new().parent("t2").matches(&doc));
        assert!(!SearchFilter::new().level(0).matches(&doc));
    }
}
