//! SQLite-based reference backend.
//!
//! Durable storage plus correctness-first similarity scoring without a
//! specialized vector index: embeddings are fixed-width little-endian f32
//! blobs, and `search_similar` scans the pre-filtered row set keeping a
//! bounded top-k heap.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::backup::{Backup, StepResult};
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension};
use tracing::{debug, info, warn};

use recall_core::{
    fuse, now_millis, CancellationToken, CollectionConfig, CollectionStats, Distance, Document,
    DocumentType, FusionConfig, OrphanPolicy, Result, SearchFilter, SqliteConfig, StoreError,
    TopK, VectorStore, VectorStoreStats,
};

use crate::schema::{SCHEMA, SCHEMA_VERSION};

/// Pages copied per backup/restore step before re-checking cancellation.
const BACKUP_STEP_PAGES: i32 = 64;

/// SQLite-backed vector store.
///
/// The connection is wrapped in a blocking Mutex; WAL mode keeps readers in
/// other processes unblocked while a write is in flight.
pub struct SqliteVectorStore {
    conn: Arc<Mutex<Connection>>,
    fusion: FusionConfig,
    orphan_policy: OrphanPolicy,
}

impl SqliteVectorStore {
    /// Open or create a database using the given configuration.
    pub fn open(
        config: &SqliteConfig,
        fusion: FusionConfig,
        orphan_policy: OrphanPolicy,
    ) -> Result<Self> {
        let path = config.path.as_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StoreError::initialization(format!("failed to open database: {e}")))?;

        Self::configure_connection(&conn, config)?;

        info!(path = %path.display(), "sqlite vector store opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            fusion,
            orphan_policy,
        })
    }

    /// Open an in-memory database (used by tests and the default alternate
    /// wiring).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            StoreError::initialization(format!("failed to open in-memory database: {e}"))
        })?;
        Self::configure_connection(&conn, &SqliteConfig::default())?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            fusion: FusionConfig::default(),
            orphan_policy: OrphanPolicy::default(),
        })
    }

    pub fn with_fusion(mut self, fusion: FusionConfig) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn with_orphan_policy(mut self, policy: OrphanPolicy) -> Self {
        self.orphan_policy = policy;
        self
    }

    fn configure_connection(conn: &Connection, config: &SqliteConfig) -> Result<()> {
        let mut pragmas = format!(
            "PRAGMA cache_size = -{};\n\
             PRAGMA mmap_size = {};\n\
             PRAGMA busy_timeout = {};\n\
             PRAGMA synchronous = NORMAL;\n\
             PRAGMA temp_store = MEMORY;\n\
             PRAGMA foreign_keys = ON;\n",
            config.cache_size_mb as u64 * 1024,
            config.mmap_size_mb as u64 * 1024 * 1024,
            config.busy_timeout_ms,
        );
        if config.wal_enabled {
            pragmas.push_str("PRAGMA journal_mode = WAL;\n");
        }
        conn.execute_batch(&pragmas)
            .map_err(|e| StoreError::initialization(format!("failed to configure connection: {e}")))
    }

    /// Execute a blocking operation on the connection.
    fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::unavailable(e.to_string()))?;
        f(&conn)
    }

    /// Execute a mutable blocking operation on the connection.
    fn with_conn_mut<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::unavailable(e.to_string()))?;
        f(&mut conn)
    }
}

// Manually implement Send + Sync since Connection is protected by Mutex
unsafe impl Send for SqliteVectorStore {}
unsafe impl Sync for SqliteVectorStore {}

/// Map a rusqlite error into the store taxonomy.
fn db_error(e: rusqlite::Error) -> StoreError {
    match e.sqlite_error_code() {
        Some(ErrorCode::OperationInterrupted) => StoreError::Cancelled,
        Some(ErrorCode::DatabaseCorrupt) | Some(ErrorCode::NotADatabase) => {
            StoreError::corrupt(e.to_string())
        }
        _ => StoreError::unavailable(e.to_string()),
    }
}

/// Convert an f32 vector to a little-endian blob.
fn embedding_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert a little-endian blob back to an f32 vector.
fn embedding_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

const DOCUMENT_COLUMNS: &str = "d.id, d.collection, d.connection_id, d.doc_type, d.content, \
     d.metadata, d.parent_id, d.level, d.created_at, d.updated_at, d.access_count, d.last_accessed";

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    let type_str: String = row.get(3)?;
    let doc_type = DocumentType::parse(&type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown document type: {type_str}").into(),
        )
    })?;
    let metadata_str: String = row.get(5)?;

    Ok(Document {
        id: row.get(0)?,
        collection: row.get(1)?,
        connection_id: row.get(2)?,
        doc_type,
        content: row.get(4)?,
        embedding: Vec::new(),
        metadata: serde_json::from_str(&metadata_str).unwrap_or_default(),
        parent_id: row.get(6)?,
        level: row.get::<_, i64>(7)? as u32,
        created_at: row.get::<_, i64>(8)? as u64,
        updated_at: row.get::<_, i64>(9)? as u64,
        access_count: row.get::<_, i64>(10)? as u64,
        last_accessed: row.get::<_, i64>(11)? as u64,
        score: None,
    })
}

// Internal helpers operating on a borrowed connection.
impl SqliteVectorStore {
    fn collection_config(conn: &Connection, name: &str) -> Result<Option<CollectionConfig>> {
        let mut stmt = conn
            .prepare("SELECT name, vector_size, distance, on_disk_payload FROM collections WHERE name = ?")
            .map_err(db_error)?;
        stmt.query_row(params![name], |row| {
            let distance_str: String = row.get(2)?;
            Ok(CollectionConfig {
                name: row.get(0)?,
                vector_size: row.get::<_, i64>(1)? as usize,
                distance: Distance::parse(&distance_str).unwrap_or_default(),
                on_disk_payload: row.get::<_, i64>(3)? != 0,
            })
        })
        .optional()
        .map_err(db_error)
    }

    /// All collection configs, keyed by name.
    fn collection_configs(conn: &Connection) -> Result<HashMap<String, CollectionConfig>> {
        let mut stmt = conn
            .prepare("SELECT name, vector_size, distance, on_disk_payload FROM collections")
            .map_err(db_error)?;
        let configs = stmt
            .query_map([], |row| {
                let distance_str: String = row.get(2)?;
                Ok(CollectionConfig {
                    name: row.get(0)?,
                    vector_size: row.get::<_, i64>(1)? as usize,
                    distance: Distance::parse(&distance_str).unwrap_or_default(),
                    on_disk_payload: row.get::<_, i64>(3)? != 0,
                })
            })
            .map_err(db_error)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_error)?;
        Ok(configs.into_iter().map(|c| (c.name.clone(), c)).collect())
    }

    fn fetch_document(conn: &Connection, id: &str) -> Result<Document> {
        let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents d WHERE d.id = ?");
        let mut stmt = conn.prepare(&sql).map_err(db_error)?;
        let doc = stmt
            .query_row(params![id], row_to_document)
            .optional()
            .map_err(db_error)?;

        let Some(mut doc) = doc else {
            return Err(StoreError::not_found(id));
        };

        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT embedding FROM embeddings WHERE document_id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)?;
        if let Some(bytes) = blob {
            doc.embedding = embedding_from_bytes(&bytes);
        }

        Ok(doc)
    }

    /// Validate a document against its owning collection and resolve its
    /// level from the parent. Returns the document ready to persist.
    fn prepare_document(conn: &Connection, mut doc: Document) -> Result<Document> {
        if doc.id.is_empty() {
            doc.id = ulid::Ulid::new().to_string();
        }

        let config = Self::collection_config(conn, &doc.collection)?
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
                let parent_level: Option<i64> = conn
                    .query_row(
                        "SELECT level FROM documents WHERE id = ?",
                        params![parent_id],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(db_error)?;
                match parent_level {
                    Some(level) => level as u32 + 1,
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

    /// Upsert one prepared document inside an open transaction scope.
    fn upsert_document(conn: &Connection, doc: &Document) -> Result<()> {
        let now = now_millis();
        let metadata = serde_json::to_string(&doc.metadata)?;
        let old_level: Option<i64> = conn
            .query_row(
                "SELECT level FROM documents WHERE id = ?",
                params![doc.id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)?;

        conn.execute(
            r#"
            INSERT INTO documents (id, collection, connection_id, doc_type, content, metadata,
                                   parent_id, level, created_at, updated_at, access_count, last_accessed)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, 0)
            ON CONFLICT(id) DO UPDATE SET
                collection = excluded.collection,
                doc_type = excluded.doc_type,
                content = excluded.content,
                metadata = excluded.metadata,
                parent_id = excluded.parent_id,
                level = excluded.level,
                updated_at = excluded.updated_at
            "#,
            params![
                doc.id,
                doc.collection,
                doc.connection_id,
                doc.doc_type.as_str(),
                doc.content,
                metadata,
                doc.parent_id,
                doc.level as i64,
                now as i64,
                now as i64,
            ],
        )
        .map_err(db_error)?;

        // A moved subtree root shifts all descendant levels by the same delta.
        if let Some(old) = old_level {
            let delta = doc.level as i64 - old;
            if delta != 0 {
                conn.execute(
                    r#"
                    WITH RECURSIVE sub(id) AS (
                        SELECT id FROM documents WHERE parent_id = ?1
                        UNION ALL
                        SELECT d.id FROM documents d JOIN sub ON d.parent_id = sub.id
                    )
                    UPDATE documents SET level = level + ?2 WHERE id IN (SELECT id FROM sub)
                    "#,
                    params![doc.id, delta],
                )
                .map_err(db_error)?;
            }
        }

        if doc.embedding.is_empty() {
            conn.execute(
                "DELETE FROM embeddings WHERE document_id = ?",
                params![doc.id],
            )
            .map_err(db_error)?;
        } else {
            conn.execute(
                r#"
                INSERT INTO embeddings (document_id, embedding, dimension)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(document_id) DO UPDATE SET
                    embedding = excluded.embedding,
                    dimension = excluded.dimension
                "#,
                params![
                    doc.id,
                    embedding_to_bytes(&doc.embedding),
                    doc.embedding.len() as i64
                ],
            )
            .map_err(db_error)?;
        }

        Ok(())
    }

    /// Build WHERE clauses and parameters for a filter.
    fn filter_clauses(filter: &SearchFilter) -> (Vec<&'static str>, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut clauses: Vec<&'static str> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(c) = &filter.collection {
            clauses.push("d.collection = ?");
            args.push(Box::new(c.clone()));
        }
        if let Some(conn_id) = &filter.connection_id {
            clauses.push("d.connection_id = ?");
            args.push(Box::new(conn_id.clone()));
        }
        if let Some(t) = filter.doc_type {
            clauses.push("d.doc_type = ?");
            args.push(Box::new(t.as_str().to_string()));
        }
        if let Some(l) = filter.level {
            clauses.push("d.level = ?");
            args.push(Box::new(l as i64));
        }
        if let Some(p) = &filter.parent_id {
            clauses.push("d.parent_id = ?");
            args.push(Box::new(p.clone()));
        }
        (clauses, args)
    }

    /// Brute-force similarity scan over the pre-filtered row set.
    fn similar_impl(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &SearchFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Document>> {
        cancel.check()?;

        self.with_conn(|conn| {
            let configs = Self::collection_configs(conn)?;

            let (clauses, args) = Self::filter_clauses(filter);
            let where_sql = if clauses.is_empty() {
                String::new()
            } else {
                format!(" WHERE {}", clauses.join(" AND "))
            };
            let sql = format!(
                "SELECT {DOCUMENT_COLUMNS}, e.embedding \
                 FROM documents d INNER JOIN embeddings e ON e.document_id = d.id{where_sql}"
            );

            let mut stmt = conn.prepare(&sql).map_err(db_error)?;
            let refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
            let mut rows = stmt.query(refs.as_slice()).map_err(db_error)?;

            let mut top = TopK::new(k);
            while let Some(row) = rows.next().map_err(db_error)? {
                cancel.check()?;

                let mut doc = row_to_document(row).map_err(db_error)?;
                let blob: Vec<u8> = row.get(12).map_err(db_error)?;
                doc.embedding = embedding_from_bytes(&blob);
                if doc.embedding.len() != embedding.len() {
                    continue;
                }

                let distance = configs
                    .get(&doc.collection)
                    .map(|c| c.distance)
                    .unwrap_or_default();
                let score = distance.score(embedding, &doc.embedding);
                top.push(score, doc);
            }

            Ok(top
                .into_sorted_vec()
                .into_iter()
                .map(|(score, mut doc)| {
                    doc.score = Some(score);
                    doc
                })
                .collect())
        })
    }

    /// Lexical search via FTS5; bm25 ranks lower-is-better, so scores are
    /// negated into the shared higher-is-better scale.
    fn text_impl(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Document>> {
        cancel.check()?;

        let escaped = escape_fts5_query(query);
        if escaped.is_empty() {
            return Ok(Vec::new());
        }

        self.with_conn(|conn| {
            let (clauses, mut args) = Self::filter_clauses(filter);
            let filter_sql = if clauses.is_empty() {
                String::new()
            } else {
                format!(" AND {}", clauses.join(" AND "))
            };
            let sql = format!(
                "SELECT {DOCUMENT_COLUMNS}, bm25(documents_fts) AS rank \
                 FROM documents_fts f JOIN documents d ON d.rowid = f.rowid \
                 WHERE documents_fts MATCH ?{filter_sql} \
                 ORDER BY rank LIMIT {k}"
            );

            let mut all_args: Vec<Box<dyn rusqlite::ToSql>> = Vec::with_capacity(args.len() + 1);
            all_args.push(Box::new(escaped));
            all_args.append(&mut args);

            let mut stmt = conn.prepare(&sql).map_err(db_error)?;
            let refs: Vec<&dyn rusqlite::ToSql> = all_args.iter().map(|a| a.as_ref()).collect();
            let mut rows = stmt.query(refs.as_slice()).map_err(db_error)?;

            let mut docs = Vec::new();
            while let Some(row) = rows.next().map_err(db_error)? {
                cancel.check()?;
                let mut doc = row_to_document(row).map_err(db_error)?;
                let rank: f64 = row.get(12).map_err(db_error)?;
                doc.score = Some(-rank as f32);
                docs.push(doc);
            }
            Ok(docs)
        })
    }

    /// Best-effort access counter bump; losing an increment is acceptable.
    fn bump_access(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE documents SET access_count = access_count + 1, last_accessed = ? \
             WHERE id IN ({placeholders})"
        );
        let result = self.with_conn(|conn| {
            let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::with_capacity(ids.len() + 1);
            args.push(Box::new(now_millis() as i64));
            for id in ids {
                args.push(Box::new(id.clone()));
            }
            let refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
            conn.execute(&sql, refs.as_slice()).map_err(db_error)
        });
        if let Err(e) = result {
            warn!(error = %e, "failed to update access counters");
        }
    }

    fn set_maintenance(conn: &Connection, key: &str, value: u64) -> Result<()> {
        conn.execute(
            "INSERT INTO maintenance (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value as i64],
        )
        .map_err(db_error)?;
        Ok(())
    }

    fn get_maintenance(conn: &Connection, key: &str) -> Result<Option<u64>> {
        let value: Option<i64> = conn
            .query_row(
                "SELECT value FROM maintenance WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)?;
        Ok(value.map(|v| v as u64))
    }
}

/// Escape FTS5 query special characters.
fn escape_fts5_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| {
            if term.contains(|c: char| "+-*()\"".contains(c)) {
                format!("\"{}\"", term.replace('"', "\"\""))
            } else {
                term.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn initialize(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(SCHEMA)
                .map_err(|e| StoreError::initialization(format!("failed to apply schema: {e}")))?;

            let applied: Option<i64> = conn
                .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                    row.get(0)
                })
                .map_err(db_error)?;

            if let Some(version) = applied {
                if version as u32 > SCHEMA_VERSION {
                    return Err(StoreError::initialization(format!(
                        "database schema version {version} is newer than supported {SCHEMA_VERSION}"
                    )));
                }
            }

            conn.execute(
                "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, now_millis() as i64],
            )
            .map_err(db_error)?;

            info!("sqlite vector store initialized");
            Ok(())
        })
    }

    async fn index_document(&self, doc: Document) -> Result<Document> {
        self.with_conn(|conn| {
            let prepared = Self::prepare_document(conn, doc)?;

            let tx = conn.unchecked_transaction().map_err(db_error)?;
            Self::upsert_document(&tx, &prepared)?;
            tx.commit().map_err(db_error)?;

            debug!(id = %prepared.id, doc_type = %prepared.doc_type, "document indexed");
            Self::fetch_document(conn, &prepared.id)
        })
    }

    async fn batch_index_documents(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        self.with_conn(|conn| {
            // Validate every document before any write so a bad entry rejects
            // the whole batch without touching storage.
            let configs = Self::collection_configs(conn)?;
            for doc in &docs {
                let config = configs
                    .get(&doc.collection)
                    .ok_or_else(|| StoreError::collection_not_found(&doc.collection))?;
                doc.validate_dimension(config.vector_size)?;
            }

            let tx = conn.unchecked_transaction().map_err(db_error)?;
            let mut ids = Vec::with_capacity(docs.len());
            for doc in docs {
                // Parents indexed earlier in the same batch are visible here,
                // so intra-batch hierarchies resolve.
                let prepared = Self::prepare_document(&tx, doc)?;
                Self::upsert_document(&tx, &prepared)?;
                ids.push(prepared.id);
            }
            tx.commit().map_err(db_error)?;

            debug!(count = ids.len(), "batch indexed documents");
            ids.iter().map(|id| Self::fetch_document(conn, id)).collect()
        })
    }

    async fn get_document(&self, id: &str) -> Result<Document> {
        self.with_conn(|conn| Self::fetch_document(conn, id))
    }

    async fn get_documents_batch(&self, ids: &[String]) -> Result<Vec<Document>> {
        self.with_conn(|conn| {
            let mut docs = Vec::with_capacity(ids.len());
            for id in ids {
                match Self::fetch_document(conn, id) {
                    Ok(doc) => docs.push(doc),
                    Err(StoreError::NotFound { .. }) => continue,
                    Err(e) => return Err(e),
                }
            }
            Ok(docs)
        })
    }

    async fn get_children(&self, parent_id: &str) -> Result<Vec<Document>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents d WHERE d.parent_id = ? ORDER BY d.id"
            );
            let mut stmt = conn.prepare(&sql).map_err(db_error)?;
            let ids = stmt
                .query_map(params![parent_id], |row| row.get::<_, String>(0))
                .map_err(db_error)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_error)?;

            ids.iter().map(|id| Self::fetch_document(conn, id)).collect()
        })
    }

    async fn update_document(&self, doc: Document) -> Result<Document> {
        self.with_conn(|conn| {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM documents WHERE id = ?",
                    params![doc.id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_error)?;
            if exists.is_none() {
                return Err(StoreError::not_found(&doc.id));
            }

            let prepared = Self::prepare_document(conn, doc)?;
            let tx = conn.unchecked_transaction().map_err(db_error)?;
            Self::upsert_document(&tx, &prepared)?;
            tx.commit().map_err(db_error)?;

            debug!(id = %prepared.id, "document updated");
            Self::fetch_document(conn, &prepared.id)
        })
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        let policy = self.orphan_policy;
        self.with_conn(|conn| {
            let node: Option<Option<String>> = conn
                .query_row(
                    "SELECT parent_id FROM documents WHERE id = ?",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_error)?;
            let Some(parent_id) = node else {
                return Err(StoreError::not_found(id));
            };

            let tx = conn.unchecked_transaction().map_err(db_error)?;
            match policy {
                OrphanPolicy::Cascade => {
                    tx.execute(
                        r#"
                        WITH RECURSIVE sub(id) AS (
                            SELECT ?1
                            UNION ALL
                            SELECT d.id FROM documents d JOIN sub ON d.parent_id = sub.id
                        )
                        DELETE FROM documents WHERE id IN (SELECT id FROM sub)
                        "#,
                        params![id],
                    )
                    .map_err(db_error)?;
                }
                OrphanPolicy::Reparent => {
                    // The subtree moves one level up before children are
                    // reattached to the deleted node's parent.
                    tx.execute(
                        r#"
                        WITH RECURSIVE sub(id) AS (
                            SELECT id FROM documents WHERE parent_id = ?1
                            UNION ALL
                            SELECT d.id FROM documents d JOIN sub ON d.parent_id = sub.id
                        )
                        UPDATE documents SET level = level - 1 WHERE id IN (SELECT id FROM sub)
                        "#,
                        params![id],
                    )
                    .map_err(db_error)?;
                    tx.execute(
                        "UPDATE documents SET parent_id = ?1 WHERE parent_id = ?2",
                        params![parent_id, id],
                    )
                    .map_err(db_error)?;
                    tx.execute("DELETE FROM documents WHERE id = ?", params![id])
                        .map_err(db_error)?;
                }
            }
            tx.commit().map_err(db_error)?;

            debug!(id = %id, policy = ?policy, "document deleted");
            Ok(())
        })
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
        self.bump_access(&ids);
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
        self.bump_access(&ids);
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

        debug!(
            vector = vector_results.len(),
            text = text_results.len(),
            "hybrid search candidates"
        );

        let fused = fuse(vector_results, text_results, &self.fusion, k);
        let ids: Vec<String> = fused.iter().map(|d| d.id.clone()).collect();
        self.bump_access(&ids);
        Ok(fused)
    }

    async fn create_collection(&self, config: CollectionConfig) -> Result<()> {
        self.with_conn(|conn| {
            if let Some(existing) = Self::collection_config(conn, &config.name)? {
                if existing.vector_size == config.vector_size
                    && existing.distance == config.distance
                {
                    debug!(name = %config.name, "collection already exists with identical config");
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

            let now = now_millis() as i64;
            conn.execute(
                "INSERT INTO collections (name, vector_size, distance, on_disk_payload, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    config.name,
                    config.vector_size as i64,
                    config.distance.as_str(),
                    config.on_disk_payload as i64,
                    now,
                ],
            )
            .map_err(db_error)?;

            info!(name = %config.name, dimension = config.vector_size, "collection created");
            Ok(())
        })
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction().map_err(db_error)?;
            tx.execute("DELETE FROM documents WHERE collection = ?", params![name])
                .map_err(db_error)?;
            let deleted = tx
                .execute("DELETE FROM collections WHERE name = ?", params![name])
                .map_err(db_error)?;
            if deleted == 0 {
                return Err(StoreError::collection_not_found(name));
            }
            tx.commit().map_err(db_error)?;

            info!(name = %name, "collection deleted");
            Ok(())
        })
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT name FROM collections ORDER BY name")
                .map_err(db_error)?;
            let names = stmt
                .query_map([], |row| row.get(0))
                .map_err(db_error)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_error)?;
            Ok(names)
        })
    }

    async fn stats(&self) -> Result<VectorStoreStats> {
        self.with_conn(|conn| {
            let total_documents: i64 = conn
                .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
                .map_err(db_error)?;
            let total_collections: i64 = conn
                .query_row("SELECT COUNT(*) FROM collections", [], |row| row.get(0))
                .map_err(db_error)?;

            let page_count: i64 = conn
                .query_row("PRAGMA page_count", [], |row| row.get(0))
                .unwrap_or(0);
            let page_size: i64 = conn
                .query_row("PRAGMA page_size", [], |row| row.get(0))
                .unwrap_or(4096);

            Ok(VectorStoreStats {
                total_documents: total_documents as u64,
                total_collections: total_collections as u64,
                storage_bytes: (page_count * page_size) as u64,
                last_optimized: Self::get_maintenance(conn, "last_optimized")?,
                last_backup: Self::get_maintenance(conn, "last_backup")?,
            })
        })
    }

    async fn collection_stats(&self, name: &str) -> Result<CollectionStats> {
        self.with_conn(|conn| {
            let config = Self::collection_config(conn, name)?
                .ok_or_else(|| StoreError::collection_not_found(name))?;

            let document_count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM documents WHERE collection = ?",
                    params![name],
                    |row| row.get(0),
                )
                .map_err(db_error)?;

            let index_size_bytes: i64 = conn
                .query_row(
                    "SELECT COALESCE(SUM(LENGTH(e.embedding)), 0) \
                     FROM embeddings e JOIN documents d ON d.id = e.document_id \
                     WHERE d.collection = ?",
                    params![name],
                    |row| row.get(0),
                )
                .map_err(db_error)?;

            let last_updated: Option<i64> = conn
                .query_row(
                    "SELECT MAX(updated_at) FROM documents WHERE collection = ?",
                    params![name],
                    |row| row.get(0),
                )
                .map_err(db_error)?;

            Ok(CollectionStats {
                name: config.name,
                document_count: document_count as u64,
                dimension: config.vector_size,
                distance: config.distance,
                index_size_bytes: index_size_bytes as u64,
                last_updated: last_updated.map(|v| v as u64).unwrap_or(0),
            })
        })
    }

    async fn optimize(&self, cancel: &CancellationToken) -> Result<()> {
        self.with_conn(|conn| {
            cancel.check()?;
            conn.execute(
                "INSERT INTO documents_fts(documents_fts) VALUES('optimize')",
                [],
            )
            .map_err(db_error)?;

            cancel.check()?;
            conn.execute_batch("ANALYZE").map_err(db_error)?;

            cancel.check()?;
            conn.execute_batch("VACUUM").map_err(db_error)?;

            Self::set_maintenance(conn, "last_optimized", now_millis())?;
            info!("vector store optimization completed");
            Ok(())
        })
    }

    async fn backup(&self, path: &Path, cancel: &CancellationToken) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let result = self.with_conn(|conn| {
            let mut dst = Connection::open(path).map_err(db_error)?;
            let backup = Backup::new(conn, &mut dst).map_err(db_error)?;
            loop {
                match backup.step(BACKUP_STEP_PAGES).map_err(db_error)? {
                    StepResult::Done => break,
                    StepResult::More => cancel.check()?,
                    StepResult::Busy | StepResult::Locked => {
                        cancel.check()?;
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    _ => cancel.check()?,
                }
            }
            drop(backup);
            Self::set_maintenance(conn, "last_backup", now_millis())?;
            Ok(())
        });

        match result {
            Ok(()) => {
                info!(path = %path.display(), "backup created");
                Ok(())
            }
            Err(e) => {
                // Never leave a partial snapshot behind.
                let _ = std::fs::remove_file(path);
                Err(e)
            }
        }
    }

    async fn restore(&self, path: &Path, cancel: &CancellationToken) -> Result<()> {
        if !path.exists() {
            return Err(StoreError::validation(format!(
                "snapshot not found: {}",
                path.display()
            )));
        }

        let src = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(db_error)?;
        // Reject snapshots that are not a recall database before touching
        // live state.
        src.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get::<_, Option<i64>>(0)
        })
        .map_err(|e| StoreError::corrupt(format!("invalid snapshot: {e}")))?;

        self.with_conn_mut(|conn| {
            let backup = Backup::new(&src, conn).map_err(db_error)?;
            loop {
                match backup.step(BACKUP_STEP_PAGES).map_err(db_error)? {
                    StepResult::Done => break,
                    StepResult::More => cancel.check()?,
                    StepResult::Busy | StepResult::Locked => {
                        cancel.check()?;
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    _ => cancel.check()?,
                }
            }
            Ok(())
        })?;

        info!(path = %path.display(), "restore completed");
        Ok(())
    }
}
