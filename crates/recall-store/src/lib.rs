//! recall-store - Storage backends for the hybrid retrieval engine
//!
//! This crate provides the SQLite reference backend (durable storage, FTS5
//! lexical search, brute-force similarity scoring), an in-process hash-map
//! backend, and the factory that selects between them from configuration.

mod memory;
mod schema;
mod sqlite;

use std::sync::Arc;

use recall_core::{
    Result, StoreConfig, StoreError, VectorStore, STORE_TYPE_MEMORY, STORE_TYPE_SQLITE,
};

pub use memory::MemoryVectorStore;
pub use sqlite::SqliteVectorStore;

// Re-export schema for migrations/tooling
pub use schema::{SCHEMA, SCHEMA_VERSION};

/// Create and initialize a vector store from configuration.
///
/// Backend selection happens here, once; callers only ever see the
/// [`VectorStore`] contract. An unrecognized `store_type` fails fast.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn VectorStore>> {
    let store: Arc<dyn VectorStore> = match config.store_type.to_lowercase().as_str() {
        "" | STORE_TYPE_SQLITE => Arc::new(
            SqliteVectorStore::open(&config.sqlite, config.fusion, config.orphan_policy)?
        ),
        STORE_TYPE_MEMORY => Arc::new(
            MemoryVectorStore::new()
                .with_fusion(config.fusion)
                .with_orphan_policy(config.orphan_policy),
        ),
        other => {
            return Err(StoreError::UnsupportedBackend {
                kind: other.to_string(),
            })
        }
    };

    store.initialize().await?;
    Ok(store)
}
