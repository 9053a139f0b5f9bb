//! In-process backend backed by hash maps.
//!
//! Satisfies the same contract as the SQLite backend: concurrent readers,
//! serialized writers, identical validation and hierarchy semantics. Useful
//! as the configuration-selected alternate backend and for tests that need a
//! store without touching disk.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use recall_core::{
    fuse, now_millis, CancellationToken, CollectionConfig, CollectionStats, Document,
    FusionConfig, OrphanPolicy, Result, SearchFilter, StoreError, TopK, VectorStore,
    VectorStoreStats,
};

/// Serializable store state; also the backup snapshot format.
#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    collections: HashMap<String, CollectionConfig>,
    documents: HashMap<String, Document>,
    last_optimized: Option<u64>,
    last_backup: Option<u64>,
}

/// Hash-map backed vector store.
pub struct MemoryVectorStore {
    state: RwLock<State>,
    fusion: FusionConfig,
    orphan_policy: OrphanPolicy,
}

impl Default for MemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            fusion: FusionConfig::default(),
            orphan_policy: OrphanPolicy::default(),
        }
    }

    pub fn with_fusion(mut self, fusion: FusionConfig) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn with_orphan_policy(mut self, policy: OrphanPolicy) -> Self {
        self.orphan_policy = policy;
        self
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|e| StoreError::unavailable(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|e| StoreError::unavailable(e.to_string()))
    }

    /// Validate a document and resolve its level against `documents`.
    fn prepare(
        collections: &HashMap<String, CollectionConfig>,
        documents: &HashMap<String, Document>,
        mut doc: Document,
    ) -> Result<Document> {
        if doc.id.is_empty() {
            doc.id = ulid::Ulid::new().to_string();
        }

        let config = collections
            .get(&doc.collection)
            .ok_or_else(|| StoreError::collection_not_found(&doc.collection))?;
        doc.validate_dimension(config.vector_size)?;

        doc.level = match &doc.parent_id {
            Some(parent_id) => {
                if parent_id == &doc.id {
                    return Err(StoreError::validation(format!(
                        "document {} cannot be its own parent",
                        doc.id
                    )));
                }
                match documents.get(parent_id) {
                    Some(parent) => parent.level + 1,
                    None => {
                        return Err(StoreError::validation(format!(
                            "parent document not found: {parent_id}"
                        )))
                    }
                }
            }
            None => 0,
        };

        Ok(doc)
    }

    /// Upsert into `documents`, preserving immutable fields and shifting
    /// descendant levels when the node moved.
    fn upsert(documents: &mut HashMap<String, Document>, mut doc: Document) -> String {
        let now = now_millis();
        doc.score = None;
        doc.updated_at = now;

        let old_level = match documents.get(&doc.id) {
            Some(existing) => {
                doc.connection_id = existing.connection_id.clone();
                doc.created_at = existing.created_at;
                doc.access_count = existing.access_count;
                doc.last_accessed = existing.last_accessed;
                Some(existing.level)
            }
            None => {
                doc.created_at = now;
                doc.access_count = 0;
                doc.last_accessed = 0;
                None
            }
        };

        let id = doc.id.clone();
        let new_level = doc.level;
        documents.insert(id.clone(), doc);

        if let Some(old) = old_level {
            if old != new_level {
                let delta = new_level as i64 - old as i64;
                for desc_id in Self::descendants_of(documents, &id) {
                    if let Some(d) = documents.get_mut(&desc_id) {
                        d.level = (d.level as i64 + delta) as u32;
                    }
                }
            }
        }

        id
    }

    /// Strict descendants, breadth-first.
    fn descendants_of(documents: &HashMap<String, Document>, id: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut queue: VecDeque<String> = VecDeque::from([id.to_string()]);
        while let Some(current) = queue.pop_front() {
            for doc in documents.values() {
                if doc.parent_id.as_deref() == Some(current.as_str()) {
                    result.push(doc.id.clone());
                    queue.push_back(doc.id.clone());
                }
            }
        }
        result
    }

    fn bump_access(state: &mut State, ids: &[String]) {
        let now = now_millis();
        for id in ids {
            if let Some(doc) = state.documents.get_mut(id) {
                doc.access_count += 1;
                doc.last_accessed = now;
            }
        }
    }

    fn similar_impl(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &SearchFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Document>> {
        cancel.check()?;
        let state = self.read()?;

        let mut top = TopK::new(k);
        for doc in state.documents.values() {
            cancel.check()?;
            if doc.embedding.is_empty() || doc.embedding.len() != embedding.len() {
                continue;
            }
            if !filter.matches(doc) {
                continue;
            }
            let distance = state
                .collections
                .get(&doc.collection)
                .map(|c| c.distance)
                .unwrap_or_default();
            let score = distance.score(embedding, &doc.embedding);
            top.push(score, doc.clone());
        }

        Ok(top
            .into_sorted_vec()
            .into_iter()
            .map(|(score, mut doc)| {
                doc.score = Some(score);
                doc
            })
            .collect())
    }

    fn text_impl(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Document>> {
        cancel.check()?;

        let query_tokens: HashSet<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let state = self.read()?;
        let mut top = TopK::new(k);
        for doc in state.documents.values() {
            cancel.check()?;
            if !filter.matches(doc) {
                continue;
            }
            let content_tokens: HashSet<String> = doc
                .content
                .to_lowercase()
                .split_whitespace()
                .map(str::to_string)
                .collect();
            let matched = query_tokens.intersection(&content_tokens).count();
            if matched == 0 {
                continue;
            }
            let score = matched as f32 / query_tokens.len() as f32;
            top.push(score, doc.clone());
        }

        Ok(top
            .into_sorted_vec()
            .into_iter()
            .map(|(score, mut doc)| {
                doc.score = Some(score);
                doc
            })
            .collect())
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn initialize(&self) -> Result<()> {
        // Nothing to set up; present for contract parity.
        self.read().map(|_| ())
    }

    async fn index_document(&self, doc: Document) -> Result<Document> {
        let mut state = self.write()?;
        let state = &mut *state;
        let prepared = Self::prepare(&state.collections, &state.documents, doc)?;
        let id = Self::upsert(&mut state.documents, prepared);
        debug!(id = %id, "document indexed");
        Ok(state.documents[&id].clone())
    }

    async fn batch_index_documents(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        let mut state = self.write()?;
        let state = &mut *state;

        for doc in &docs {
            let config = state
                .collections
                .get(&doc.collection)
                .ok_or_else(|| StoreError::collection_not_found(&doc.collection))?;
            doc.validate_dimension(config.vector_size)?;
        }

        // Stage the whole batch on a copy so a late failure (e.g. an
        // unresolvable parent) leaves nothing behind.
        let mut staged = state.documents.clone();
        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            let prepared = Self::prepare(&state.collections, &staged, doc)?;
            ids.push(Self::upsert(&mut staged, prepared));
        }
        state.documents = staged;

        debug!(count = ids.len(), "batch indexed documents");
        Ok(ids.iter().map(|id| state.documents[id].clone()).collect())
    }

    async fn get_document(&self, id: &str) -> Result<Document> {
        let state = self.read()?;
        state
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(id))
    }

    async fn get_documents_batch(&self, ids: &[String]) -> Result<Vec<Document>> {
        let state = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.documents.get(id).cloned())
            .collect())
    }

    async fn get_children(&self, parent_id: &str) -> Result<Vec<Document>> {
        let state = self.read()?;
        let mut children: Vec<Document> = state
            .documents
            .values()
            .filter(|d| d.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(children)
    }

    async fn update_document(&self, doc: Document) -> Result<Document> {
        let mut state = self.write()?;
        let state = &mut *state;
        if !state.documents.contains_key(&doc.id) {
            return Err(StoreError::not_found(&doc.id));
        }
        let prepared = Self::prepare(&state.collections, &state.documents, doc)?;
        let id = Self::upsert(&mut state.documents, prepared);
        Ok(state.documents[&id].clone())
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        let mut state = self.write()?;
        let state = &mut *state;
        let Some(node) = state.documents.get(id).cloned() else {
            return Err(StoreError::not_found(id));
        };

        match self.orphan_policy {
            OrphanPolicy::Cascade => {
                for desc_id in Self::descendants_of(&state.documents, id) {
                    state.documents.remove(&desc_id);
                }
                state.documents.remove(id);
            }
            OrphanPolicy::Reparent => {
                for desc_id in Self::descendants_of(&state.documents, id) {
                    if let Some(d) = state.documents.get_mut(&desc_id) {
                        d.level -= 1;
                    }
                }
                let child_ids: Vec<String> = state
                    .documents
                    .values()
                    .filter(|d| d.parent_id.as_deref() == Some(id))
                    .map(|d| d.id.clone())
                    .collect();
                for child_id in child_ids {
                    if let Some(d) = state.documents.get_mut(&child_id) {
                        d.parent_id = node.parent_id.clone();
                    }
                }
                state.documents.remove(id);
            }
        }

        debug!(id = %id, policy = ?self.orphan_policy, "document deleted");
        Ok(())
    }

    async fn search_similar(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &SearchFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Document>> {
        let results = self.similar_impl(embedding, k, filter, cancel)?;
        let ids: Vec<String> = results.iter().map(|d| d.id.clone()).collect();
        if let Ok(mut state) = self.write() {
            Self::bump_access(&mut state, &ids);
        }
        Ok(results)
    }

    async fn search_by_text(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Document>> {
        let results = self.text_impl(query, k, filter, cancel)?;
        let ids: Vec<String> = results.iter().map(|d| d.id.clone()).collect();
        if let Ok(mut state) = self.write() {
            Self::bump_access(&mut state, &ids);
        }
        Ok(results)
    }

    async fn hybrid_search(
        &self,
        query: &str,
        embedding: &[f32],
        k: usize,
        filter: &SearchFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Document>> {
        let fetch_k = self.fusion.candidate_count(k);
        let vector_results = self.similar_impl(embedding, fetch_k, filter, cancel)?;
        let text_results = self.text_impl(query, fetch_k, filter, cancel)?;

        let fused = fuse(vector_results, text_results, &self.fusion, k);
        let ids: Vec<String> = fused.iter().map(|d| d.id.clone()).collect();
        if let Ok(mut state) = self.write() {
            Self::bump_access(&mut state, &ids);
        }
        Ok(fused)
    }

    async fn create_collection(&self, config: CollectionConfig) -> Result<()> {
        let mut state = self.write()?;
        if let Some(existing) = state.collections.get(&config.name) {
            if existing.vector_size == config.vector_size && existing.distance == config.distance {
                return Ok(());
            }
            return Err(StoreError::conflict(format!(
                "collection {} exists with dimension {} ({}), requested {} ({})",
                config.name,
                existing.vector_size,
                existing.distance,
                config.vector_size,
                config.distance,
            )));
        }
        info!(name = %config.name, dimension = config.vector_size, "collection created");
        state.collections.insert(config.name.clone(), config);
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut state = self.write()?;
        if state.collections.remove(name).is_none() {
            return Err(StoreError::collection_not_found(name));
        }
        state.documents.retain(|_, d| d.collection != name);
        info!(name = %name, "collection deleted");
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let state = self.read()?;
        let mut names: Vec<String> = state.collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn stats(&self) -> Result<VectorStoreStats> {
        let state = self.read()?;
        let storage_bytes: u64 = state
            .documents
            .values()
            .map(|d| (d.content.len() + d.embedding.len() * 4) as u64)
            .sum();
        Ok(VectorStoreStats {
            total_documents: state.documents.len() as u64,
            total_collections: state.collections.len() as u64,
            storage_bytes,
            last_optimized: state.last_optimized,
            last_backup: state.last_backup,
        })
    }

    async fn collection_stats(&self, name: &str) -> Result<CollectionStats> {
        let state = self.read()?;
        let config = state
            .collections
            .get(name)
            .ok_or_else(|| StoreError::collection_not_found(name))?;

        let docs: Vec<&Document> = state
            .documents
            .values()
            .filter(|d| d.collection == name)
            .collect();
        Ok(CollectionStats {
            name: config.name.clone(),
            document_count: docs.len() as u64,
            dimension: config.vector_size,
            distance: config.distance,
            index_size_bytes: docs.iter().map(|d| d.embedding.len() as u64 * 4).sum(),
            last_updated: docs.iter().map(|d| d.updated_at).max().unwrap_or(0),
        })
    }

    async fn optimize(&self, cancel: &CancellationToken) -> Result<()> {
        cancel.check()?;
        let mut state = self.write()?;
        state.last_optimized = Some(now_millis());
        info!("vector store optimization completed");
        Ok(())
    }

    async fn backup(&self, path: &Path, cancel: &CancellationToken) -> Result<()> {
        cancel.check()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let snapshot = {
            let mut state = self.write()?;
            state.last_backup = Some(now_millis());
            serde_json::to_vec(&*state)?
        };
        std::fs::write(path, snapshot)?;

        info!(path = %path.display(), "backup created");
        Ok(())
    }

    async fn restore(&self, path: &Path, cancel: &CancellationToken) -> Result<()> {
        cancel.check()?;
        if !path.exists() {
            return Err(StoreError::validation(format!(
                "snapshot not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read(path)?;
        let restored: State = serde_json::from_slice(&content)
            .map_err(|e| StoreError::corrupt(format!("invalid snapshot: {e}")))?;

        let mut state = self.write()?;
        *state = restored;

        info!(path = %path.display(), "restore completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_core::DocumentType;

    async fn store_with_collection(dim: usize) -> MemoryVectorStore {
        let store = MemoryVectorStore::new();
        store.initialize().await.unwrap();
        store
            .create_collection(CollectionConfig::new("schema_docs", dim))
            .await
            .unwrap();
        store
    }

    fn doc(id: &str, content: &str, embedding: Vec<f32>) -> Document {
        Document::new("schema_docs", "conn1", DocumentType::Schema, content)
            .with_id(id)
            .with_embedding(embedding)
    }

    #[tokio::test]
    async fn test_round_trip() {
        let store = store_with_collection(4).await;
        store
            .index_document(doc("d1", "users table", vec![0.1, 0.2, 0.3, 0.4]))
            .await
            .unwrap();

        let fetched = store.get_document("d1").await.unwrap();
        assert_eq!(fetched.content, "users table");
        assert_eq!(fetched.embedding, vec![0.1, 0.2, 0.3, 0.4]);
        assert!(fetched.created_at > 0);
        assert!(store.get_document("ghost").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = store_with_collection(4).await;
        let err = store
            .index_document(doc("bad", "x", vec![1.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let store = store_with_collection(4).await;
        let err = store
            .batch_index_documents(vec![
                doc("a", "first", vec![1.0, 0.0, 0.0, 0.0]),
                doc("b", "orphan", vec![]).with_parent("ghost"),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation { .. }));
        assert_eq!(store.stats().await.unwrap().total_documents, 0);
    }

    #[tokio::test]
    async fn test_search_similar_scenario() {
        let store = store_with_collection(4).await;
        store
            .batch_index_documents(vec![
                doc("A", "alpha", vec![1.0, 0.0, 0.0, 0.0]),
                doc("B", "beta", vec![0.0, 1.0, 0.0, 0.0]),
                doc("C", "gamma", vec![0.9, 0.1, 0.0, 0.0]),
            ])
            .await
            .unwrap();

        let results = store
            .search_similar(
                &[1.0, 0.0, 0.0, 0.0],
                2,
                &SearchFilter::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "A");
        assert_eq!(results[1].id, "C");
    }

    #[tokio::test]
    async fn test_level_and_hierarchy_policies() {
        let store = store_with_collection(4).await;
        store
            .batch_index_documents(vec![
                doc("root", "schema", vec![]),
                doc("mid", "table", vec![]).with_parent("root"),
                doc("leaf", "column", vec![]).with_parent("mid"),
            ])
            .await
            .unwrap();
        assert_eq!(store.get_document("leaf").await.unwrap().level, 2);

        // Cascade is the default.
        store.delete_document("root").await.unwrap();
        assert_eq!(store.stats().await.unwrap().total_documents, 0);

        // Reparent keeps children attached one level up.
        let store = store_with_collection(4)
            .await
            .with_orphan_policy(OrphanPolicy::Reparent);
        store
            .batch_index_documents(vec![
                doc("root", "schema", vec![]),
                doc("mid", "table", vec![]).with_parent("root"),
                doc("leaf", "column", vec![]).with_parent("mid"),
            ])
            .await
            .unwrap();
        store.delete_document("mid").await.unwrap();
        let leaf = store.get_document("leaf").await.unwrap();
        assert_eq!(leaf.parent_id.as_deref(), Some("root"));
        assert_eq!(leaf.level, 1);
    }

    #[tokio::test]
    async fn test_text_and_hybrid_search() {
        let store = store_with_collection(4).await;
        store
            .batch_index_documents(vec![
                doc("vec-only", "zzz qqq", vec![1.0, 0.0, 0.0, 0.0]),
                doc("text-only", "monthly revenue report", vec![]),
            ])
            .await
            .unwrap();

        let text = store
            .search_by_text(
                "revenue report",
                10,
                &SearchFilter::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(text.len(), 1);
        assert_eq!(text[0].id, "text-only");

        let hybrid = store
            .hybrid_search(
                "revenue report",
                &[1.0, 0.0, 0.0, 0.0],
                10,
                &SearchFilter::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let ids: Vec<&str> = hybrid.iter().map(|d| d.id.as_str()).collect();
        assert!(ids.contains(&"vec-only"));
        assert!(ids.contains(&"text-only"));
    }

    #[tokio::test]
    async fn test_cancelled() {
        let store = store_with_collection(4).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = store
            .search_by_text("x", 5, &SearchFilter::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
    }

    #[tokio::test]
    async fn test_backup_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("snapshot.json");

        let store = store_with_collection(4).await;
        store
            .index_document(doc("d1", "kept", vec![1.0, 0.0, 0.0, 0.0]))
            .await
            .unwrap();
        store
            .backup(&snapshot, &CancellationToken::new())
            .await
            .unwrap();

        let other = MemoryVectorStore::new();
        other
            .restore(&snapshot, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(other.get_document("d1").await.unwrap().content, "kept");
        assert_eq!(other.list_collections().await.unwrap(), vec!["schema_docs"]);

        let bogus = dir.path().join("bogus.json");
        std::fs::write(&bogus, b"{not json").unwrap();
        let err = other
            .restore(&bogus, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CorruptState { .. }));
    }

    #[tokio::test]
    async fn test_collection_conflict() {
        let store = store_with_collection(4).await;
        store
            .create_collection(CollectionConfig::new("schema_docs", 4))
            .await
            .unwrap();
        let err = store
            .create_collection(CollectionConfig::new("schema_docs", 8))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }
}
