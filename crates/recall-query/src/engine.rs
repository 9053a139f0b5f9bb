//! Retrieval engine tying a store and an external embedding provider.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use recall_core::{
    CancellationToken, Document, Embedder, Result, SearchFilter, VectorStore,
};

use crate::hierarchy;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default number of results.
    pub top_k: usize,

    /// How many of the best matches get expanded to their descendants in
    /// [`RetrievalEngine::search_with_context`].
    pub expand_top: usize,

    /// Depth cap for hierarchy walks. `None` walks whole chains/subtrees.
    pub max_expansion_depth: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            expand_top: 3,
            max_expansion_depth: None,
        }
    }
}

/// A search match together with its expanded hierarchy context.
#[derive(Debug, Clone)]
pub struct ContextualResult {
    pub document: Document,
    pub descendants: Vec<Document>,
}

/// High-level retrieval engine.
///
/// Indexing embeds content through the external [`Embedder`] collaborator and
/// persists through the active backend; searches route to the same backend.
pub struct RetrievalEngine<S: ?Sized, E: ?Sized> {
    store: Arc<S>,
    embedder: Arc<E>,
    config: EngineConfig,
}

impl<S, E> RetrievalEngine<S, E>
where
    S: VectorStore + ?Sized,
    E: Embedder + ?Sized,
{
    pub fn new(store: Arc<S>, embedder: Arc<E>) -> Self {
        Self {
            store,
            embedder,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Embed a document's content and index it.
    ///
    /// Documents arriving with an embedding keep it; the embedder is only
    /// invoked for the rest.
    pub async fn index(&self, doc: Document) -> Result<Document> {
        let doc = self.embed_missing(vec![doc]).await?.pop();
        // embed_missing preserves input length, so the pop always succeeds.
        let doc = doc.ok_or_else(|| recall_core::StoreError::validation("empty batch"))?;
        self.store.index_document(doc).await
    }

    /// Embed and index a batch atomically.
    pub async fn index_batch(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        let docs = self.embed_missing(docs).await?;
        self.store.batch_index_documents(docs).await
    }

    async fn embed_missing(&self, mut docs: Vec<Document>) -> Result<Vec<Document>> {
        let pending: Vec<usize> = docs
            .iter()
            .enumerate()
            .filter(|(_, d)| d.embedding.is_empty() && !d.content.is_empty())
            .map(|(i, _)| i)
            .collect();
        if pending.is_empty() {
            return Ok(docs);
        }

        let texts: Vec<&str> = pending.iter().map(|&i| docs[i].content.as_str()).collect();
        let embeddings = self.embedder.embed_documents(&texts).await?;
        debug!(count = embeddings.len(), "embedded documents");

        for (&i, embedding) in pending.iter().zip(embeddings) {
            docs[i].embedding = embedding;
        }
        Ok(docs)
    }

    /// Hybrid search: embed the query, fuse vector and lexical results.
    pub async fn search(
        &self,
        query: &str,
        filter: &SearchFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Document>> {
        let start = Instant::now();
        let embedding = self.embedder.embed_query(query).await?;
        let results = self
            .store
            .hybrid_search(query, &embedding, self.config.top_k, filter, cancel)
            .await?;

        info!(
            query = %query,
            results = results.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "hybrid search completed"
        );
        Ok(results)
    }

    /// Vector-only search.
    pub async fn semantic_search(
        &self,
        query: &str,
        filter: &SearchFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Document>> {
        let embedding = self.embedder.embed_query(query).await?;
        self.store
            .search_similar(&embedding, self.config.top_k, filter, cancel)
            .await
    }

    /// Lexical-only search.
    pub async fn keyword_search(
        &self,
        query: &str,
        filter: &SearchFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Document>> {
        self.store
            .search_by_text(query, self.config.top_k, filter, cancel)
            .await
    }

    /// Hierarchical retrieval: search coarse documents (scope with a level
    /// filter), then expand the best matches to their descendants for detail.
    pub async fn search_with_context(
        &self,
        query: &str,
        filter: &SearchFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<ContextualResult>> {
        let matches = self.search(query, filter, cancel).await?;

        let mut results = Vec::with_capacity(matches.len());
        for (i, document) in matches.into_iter().enumerate() {
            let descendants = if i < self.config.expand_top {
                hierarchy::descendants(
                    self.store.as_ref(),
                    &document,
                    self.config.max_expansion_depth,
                )
                .await?
            } else {
                Vec::new()
            };
            results.push(ContextualResult {
                document,
                descendants,
            });
        }
        Ok(results)
    }

    /// Ancestor chain of a match, nearest parent first.
    pub async fn expand_ancestors(&self, doc: &Document) -> Result<Vec<Document>> {
        hierarchy::ancestors(self.store.as_ref(), doc, self.config.max_expansion_depth).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use recall_core::{CollectionConfig, DocumentType, StoreError};
    use recall_store::MemoryVectorStore;

    /// Deterministic embedder: buckets token hashes into a fixed-size vector.
    struct MockEmbedder {
        dimension: usize,
    }

    impl MockEmbedder {
        fn embed(&self, text: &str) -> Vec<f32> {
            let mut v = vec![0.0f32; self.dimension];
            for token in text.to_lowercase().split_whitespace() {
                let mut hash = 1469598103934665603u64;
                for b in token.bytes() {
                    hash ^= b as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
                v[(hash % self.dimension as u64) as usize] += 1.0;
            }
            v
        }
    }

    #[async_trait]
    impl Embedder for MockEmbedder {
        async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| self.embed(t)).collect())
        }

        async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            Ok(self.embed(text))
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    async fn engine() -> RetrievalEngine<MemoryVectorStore, MockEmbedder> {
        let store = MemoryVectorStore::new();
        store
            .create_collection(CollectionConfig::new("schema_docs", 8))
            .await
            .unwrap();
        RetrievalEngine::new(Arc::new(store), Arc::new(MockEmbedder { dimension: 8 }))
    }

    fn doc(id: &str, content: &str) -> Document {
        Document::new("schema_docs", "conn1", DocumentType::Schema, content).with_id(id)
    }

    #[tokio::test]
    async fn test_index_attaches_embedding() {
        let engine = engine().await;
        let stored = engine.index(doc("d1", "users table")).await.unwrap();
        assert_eq!(stored.embedding.len(), 8);
    }

    #[tokio::test]
    async fn test_search_finds_indexed_content() {
        let engine = engine().await;
        engine
            .index_batch(vec![
                doc("users", "users table with email column"),
                doc("orders", "orders table with total amount"),
            ])
            .await
            .unwrap();

        let results = engine
            .search(
                "users table with email column",
                &SearchFilter::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].id, "users");
    }

    #[tokio::test]
    async fn test_search_with_context_expands_top_matches() {
        let engine = engine().await;
        engine
            .index_batch(vec![
                doc("users", "users table"),
                doc("users.id", "id primary key").with_parent("users"),
                doc("users.email", "email unique").with_parent("users"),
            ])
            .await
            .unwrap();

        let results = engine
            .search_with_context(
                "users table",
                &SearchFilter::new().level(0),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let top = &results[0];
        assert_eq!(top.document.id, "users");
        let child_ids: Vec<&str> = top.descendants.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(child_ids, vec!["users.email", "users.id"]);
    }

    #[tokio::test]
    async fn test_expand_ancestors() {
        let engine = engine().await;
        engine
            .index_batch(vec![
                doc("schema", "public schema"),
                doc("users", "users table").with_parent("schema"),
                doc("users.id", "id column").with_parent("users"),
            ])
            .await
            .unwrap();

        let leaf = engine
            .keyword_search("id", &SearchFilter::new(), &CancellationToken::new())
            .await
            .unwrap()
            .into_iter()
            .find(|d| d.id == "users.id")
            .unwrap();

        let chain = engine.expand_ancestors(&leaf).await.unwrap();
        let ids: Vec<&str> = chain.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["users", "schema"]);
    }

    #[tokio::test]
    async fn test_search_propagates_cancellation() {
        let engine = engine().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine
            .search("anything", &SearchFilter::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
    }
}
