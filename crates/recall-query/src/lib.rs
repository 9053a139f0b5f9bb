//! recall-query - Retrieval engine and hierarchy-aware expansion
//!
//! This crate ties a [`recall_core::VectorStore`] backend and an external
//! [`recall_core::Embedder`] together: indexing embeds content and persists
//! it; searches route to the active backend; matches expand along the
//! parent-child hierarchy for context.
//!
//! # Example
//!
//! ```rust,ignore
//! use recall_query::{RetrievalEngine, EngineConfig};
//! use std::sync::Arc;
//!
//! let engine = RetrievalEngine::new(Arc::new(store), Arc::new(embedder));
//! let results = engine.search("orders by region", &filter, &cancel).await?;
//! ```

mod engine;
pub mod hierarchy;

pub use engine::{ContextualResult, EngineConfig, RetrievalEngine};

// Re-export for convenience
pub use recall_core::{CancellationToken, Document, SearchFilter};
