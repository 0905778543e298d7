use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::error::IndexError;

/// Current schema version.  Increment when adding new migrations.
const SCHEMA_VERSION: u32 = 1;

/// Per-connection settings applied by the pool on every new connection.
pub const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;";

/// Apply all pending migrations to `conn`.
///
/// Tables are created with `IF NOT EXISTS` and the `meta` table records the
/// applied version, so running this on every open is safe.
pub fn run_migrations(conn: &Connection) -> Result<(), IndexError> {
    // WAL lets readers proceed while an ingestion batch is writing.
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;

    // ------------------------------------------------------------------
    // meta: schema version and the embedding model the index was built with.
    // ------------------------------------------------------------------
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;

    let current_version = get_schema_version(conn);

    if current_version >= SCHEMA_VERSION {
        debug!(version = current_version, "knowledge schema up to date");
        return Ok(());
    }

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    set_meta(conn, "schema_version", &SCHEMA_VERSION.to_string())?;
    debug!(version = SCHEMA_VERSION, "knowledge schema migrated");
    Ok(())
}

// ---------------------------------------------------------------------------
// v1: initial tables
// ---------------------------------------------------------------------------

fn migrate_v1(conn: &Connection) -> Result<(), IndexError> {
    // ------------------------------------------------------------------
    // documents: one row per indexed chunk. `seq` is the FTS rowid; `id`
    // is the stable chunk identifier exposed to callers.
    // ------------------------------------------------------------------
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS documents (
            seq             INTEGER PRIMARY KEY AUTOINCREMENT,
            id              TEXT    NOT NULL UNIQUE,
            title           TEXT    NOT NULL,
            content         TEXT    NOT NULL,
            source_document TEXT    NOT NULL,
            document_type   TEXT    NOT NULL,
            domain_tags     TEXT    NOT NULL DEFAULT '[]',
            freeform_tags   TEXT    NOT NULL DEFAULT '[]',
            priority        INTEGER NOT NULL DEFAULT 0,
            confidentiality TEXT    NOT NULL,
            chunk_index     INTEGER NOT NULL,
            total_chunks    INTEGER NOT NULL,
            ingested_at     INTEGER NOT NULL,
            embedding       BLOB    NOT NULL
        );",
    )?;

    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source_document);
         CREATE INDEX IF NOT EXISTS idx_documents_confidentiality ON documents(confidentiality);",
    )?;

    // ------------------------------------------------------------------
    // embedding_cache: vectors keyed by content hash so unchanged chunks
    // are not re-embedded on re-ingestion.
    // ------------------------------------------------------------------
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS embedding_cache (
            hash       TEXT PRIMARY KEY,
            model      TEXT NOT NULL,
            dimensions INTEGER NOT NULL,
            embedding  BLOB NOT NULL,
            created_at INTEGER NOT NULL
        );",
    )?;

    // ------------------------------------------------------------------
    // documents_fts: FTS5 external-content table for BM25 ranking.
    // ------------------------------------------------------------------
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts USING fts5(
            title,
            content,
            content='documents',
            content_rowid='seq',
            tokenize='porter unicode61'
        );",
    )?;

    conn.execute_batch(
        "CREATE TRIGGER IF NOT EXISTS documents_ai AFTER INSERT ON documents BEGIN
            INSERT INTO documents_fts(rowid, title, content) VALUES (new.seq, new.title, new.content);
        END;",
    )?;
    conn.execute_batch(
        "CREATE TRIGGER IF NOT EXISTS documents_ad AFTER DELETE ON documents BEGIN
            INSERT INTO documents_fts(documents_fts, rowid, title, content)
                VALUES ('delete', old.seq, old.title, old.content);
        END;",
    )?;
    conn.execute_batch(
        "CREATE TRIGGER IF NOT EXISTS documents_au AFTER UPDATE ON documents BEGIN
            INSERT INTO documents_fts(documents_fts, rowid, title, content)
                VALUES ('delete', old.seq, old.title, old.content);
            INSERT INTO documents_fts(rowid, title, content) VALUES (new.seq, new.title, new.content);
        END;",
    )?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn get_schema_version(conn: &Connection) -> u32 {
    get_meta(conn, "schema_version")
        .ok()
        .flatten()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0)
}

pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>, IndexError> {
    Ok(conn
        .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
            row.get::<_, String>(0)
        })
        .optional()?)
}

pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<(), IndexError> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
        [key, value],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Embedding blobs
// ---------------------------------------------------------------------------

/// Encode a vector as little-endian `f32` bytes.
pub fn floats_to_bytes(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for f in v {
        out.extend_from_slice(&f.to_le_bytes());
    }
    out
}

/// Decode little-endian `f32` bytes. Trailing partial values are ignored.
pub fn bytes_to_floats(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn fts_follows_document_rows() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO documents (id, title, content, source_document, document_type,
                confidentiality, chunk_index, total_chunks, ingested_at, embedding)
             VALUES ('a', 'Refunds', 'refunds take five days', 's', 'policy', 'public', 0, 1, 0, x'')",
            [],
        )
        .unwrap();
        let hits: i64 = conn
            .query_row(
                "SELECT count(*) FROM documents_fts WHERE documents_fts MATCH 'refund'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(hits, 1);

        conn.execute("DELETE FROM documents WHERE id = 'a'", []).unwrap();
        let hits: i64 = conn
            .query_row(
                "SELECT count(*) FROM documents_fts WHERE documents_fts MATCH 'refund'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(hits, 0);
    }

    #[test]
    fn float_blob_encoding() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(bytes_to_floats(&floats_to_bytes(&v)), v);
        assert!(bytes_to_floats(&[1, 2, 3]).is_empty());
    }
}
