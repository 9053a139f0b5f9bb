//! recall-core - Core types and traits for the hybrid retrieval engine
//!
//! This crate provides the domain model (documents, collections, filters),
//! the backend-agnostic `VectorStore` contract, the error taxonomy, score
//! fusion primitives, and the configuration surface shared by all backends.

pub mod cancel;
pub mod config;
pub mod error;
pub mod ranking;
pub mod traits;
pub mod types;

pub use cancel::CancellationToken;
pub use config::{SqliteConfig, StoreConfig, STORE_TYPE_MEMORY, STORE_TYPE_SQLITE};
pub use error::{Result, StoreError};
pub use ranking::{fuse, FusionConfig, TopK};
pub use traits::{Embedder, VectorStore};
pub use types::{
    now_millis, CollectionConfig, CollectionStats, Distance, Document, DocumentType,
    OrphanPolicy, SearchFilter, VectorStoreStats,
};
