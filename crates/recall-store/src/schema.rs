//! Database schema definitions for the SQLite backend.
//!
//! Hierarchy columns (`parent_id`, `level`) are part of the base schema and
//! every index is created with `IF NOT EXISTS`, so re-running initialization
//! against an existing database is a no-op. `schema_migrations` records the
//! applied version to make upgrades detectable.

/// Main schema SQL for initializing the database.
pub const SCHEMA: &str = r#"
-- Structural migration bookkeeping
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- Collections: named, dimensioned namespaces
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    vector_size INTEGER NOT NULL,
    distance TEXT NOT NULL DEFAULT 'cosine',
    on_disk_payload INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Documents: one row per retrievable unit
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    collection TEXT NOT NULL,
    connection_id TEXT NOT NULL,
    doc_type TEXT NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    parent_id TEXT,
    level INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
CREATE INDEX IF NOT EXISTS idx_documents_connection_type ON documents(connection_id, doc_type);
CREATE INDEX IF NOT EXISTS idx_documents_parent ON documents(parent_id);
CREATE INDEX IF NOT EXISTS idx_documents_level ON documents(level);

-- Embeddings: fixed-width little-endian f32 blobs, one row per embedded document
CREATE TABLE IF NOT EXISTS embeddings (
    document_id TEXT PRIMARY KEY REFERENCES documents(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    dimension INTEGER NOT NULL
);

-- Maintenance timestamps (last_optimized, last_backup)
CREATE TABLE IF NOT EXISTS maintenance (
    key TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);

-- FTS5 virtual table for lexical search
CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts USING fts5(
    content,
    content=documents,
    content_rowid=rowid
);

-- Triggers to keep FTS5 in sync with the documents table
CREATE TRIGGER IF NOT EXISTS documents_ai AFTER INSERT ON documents BEGIN
    INSERT INTO documents_fts(rowid, content) VALUES (NEW.rowid, NEW.content);
END;

CREATE TRIGGER IF NOT EXISTS documents_ad AFTER DELETE ON documents BEGIN
    INSERT INTO documents_fts(documents_fts, rowid, content) VALUES ('delete', OLD.rowid, OLD.content);
END;

CREATE TRIGGER IF NOT EXISTS documents_au AFTER UPDATE ON documents BEGIN
    INSERT INTO documents_fts(documents_fts, rowid, content) VALUES ('delete', OLD.rowid, OLD.content);
    INSERT INTO documents_fts(rowid, content) VALUES (NEW.rowid, NEW.content);
END;
"#;

/// Current schema version recorded in `schema_migrations`.
pub const SCHEMA_VERSION: u32 = 1;
