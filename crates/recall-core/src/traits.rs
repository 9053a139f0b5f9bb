//! Core traits defining the interfaces between components.

use async_trait::async_trait;
use std::path::Path;

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::types::{
    CollectionConfig, CollectionStats, Document, SearchFilter, VectorStoreStats,
};

/// Backend-agnostic storage contract.
///
/// All backends satisfy the same read/write/search semantics so callers are
/// backend-unaware; selection happens once at construction via the factory.
///
/// Long scans and maintenance operations take a [`CancellationToken`] and
/// abort with `Cancelled` without corrupting state. Point operations are
/// cancelled by dropping their future.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotent setup of schema and indices. Must be called once before
    /// any other operation; re-running is a no-op.
    async fn initialize(&self) -> Result<()>;

    // Document operations

    /// Upsert a document. Same id overwrites content, embedding, metadata and
    /// hierarchy linkage; `connection_id` and `created_at` are immutable.
    /// `level` is computed from the parent, never taken from the caller.
    /// Returns the stored document with assigned id, level and timestamps.
    async fn index_document(&self, doc: Document) -> Result<Document>;

    /// Upsert a batch atomically: any invalid document rejects the whole
    /// batch, and concurrent readers never observe a partial batch.
    async fn batch_index_documents(&self, docs: Vec<Document>) -> Result<Vec<Document>>;

    /// Point read. A missing id is a `NotFound` error, distinguishable from
    /// an empty document.
    async fn get_document(&self, id: &str) -> Result<Document>;

    /// Bulk point read. Missing ids are skipped, not errors.
    async fn get_documents_batch(&self, ids: &[String]) -> Result<Vec<Document>>;

    /// Direct children of a document, ordered by id.
    async fn get_children(&self, parent_id: &str) -> Result<Vec<Document>>;

    /// Replace content, embedding and metadata of an existing document.
    async fn update_document(&self, doc: Document) -> Result<Document>;

    /// Delete a document, applying the configured orphan policy to its
    /// children.
    async fn delete_document(&self, id: &str) -> Result<()>;

    // Search operations

    /// Up to `k` documents ranked by descending similarity under the owning
    /// collection's distance metric. The filter is applied before scoring.
    async fn search_similar(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &SearchFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Document>>;

    /// Lexical search over `content`, same filter and `k` semantics.
    async fn search_by_text(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Document>>;

    /// Fused vector + lexical search. `k` applies to the fused list.
    async fn hybrid_search(
        &self,
        query: &str,
        embedding: &[f32],
        k: usize,
        filter: &SearchFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Document>>;

    // Collection management

    /// Create a collection. Creating an existing collection with identical
    /// configuration is a no-op; a differing configuration is a `Conflict`.
    async fn create_collection(&self, config: CollectionConfig) -> Result<()>;

    /// Delete a collection and, cascading, all of its documents.
    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Names of all collections.
    async fn list_collections(&self) -> Result<Vec<String>>;

    // Statistics

    async fn stats(&self) -> Result<VectorStoreStats>;

    async fn collection_stats(&self, name: &str) -> Result<CollectionStats>;

    // Maintenance

    /// Compact and reindex. Must not block concurrent operations beyond a
    /// bounded window.
    async fn optimize(&self, cancel: &CancellationToken) -> Result<()>;

    /// Write a self-contained, restorable snapshot to `path`.
    async fn backup(&self, path: &Path, cancel: &CancellationToken) -> Result<()>;

    /// Replace all current state from the snapshot at `path`. Destructive
    /// and irreversible without a prior backup.
    async fn restore(&self, path: &Path, cancel: &CancellationToken) -> Result<()>;
}

/// External embedding provider.
///
/// The engine only consumes vectors; generation is out of scope. Mismatched
/// dimensions are rejected at index time.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of document texts.
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Fixed output dimension of this provider.
    fn dimension(&self) -> usize;
}
