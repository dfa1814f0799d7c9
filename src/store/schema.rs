//! SQLite schema and connection pragmas (`spec.md` §4.3).

use rusqlite::Connection;

use super::error::IndexError;

/// Apply the WAL-mode pragma set required on every connection
/// (`spec.md` §4.3 "Configuration applied on every connection open").
pub fn apply_pragmas(conn: &Connection) -> Result<(), IndexError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "mmap_size", 128 * 1024 * 1024i64)?;
    conn.pragma_update(None, "cache_size", -20 * 1024i64)?; // negative = KiB
    conn.pragma_update(None, "busy_timeout", 5_000i64)?;
    Ok(())
}

/// Create tables and indices if they do not already exist.
pub fn apply_schema(conn: &Connection) -> Result<(), IndexError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            subject         TEXT NOT NULL,
            reply_to        TEXT,
            correlation_id  TEXT,
            created_at      TEXT NOT NULL,
            expires_at      TEXT,
            status          TEXT NOT NULL,
            size_bytes      INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_subject_id ON messages (subject, id);
        CREATE INDEX IF NOT EXISTS idx_messages_status_id ON messages (status, id);

        CREATE TABLE IF NOT EXISTS deliveries (
            id               TEXT PRIMARY KEY,
            adapter_id       TEXT NOT NULL,
            envelope_id      TEXT NOT NULL,
            url              TEXT NOT NULL,
            attempt          INTEGER NOT NULL,
            next_attempt_at  TEXT NOT NULL,
            status           TEXT NOT NULL,
            last_error       TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_deliveries_status_next ON deliveries (status, next_attempt_at);

        CREATE TABLE IF NOT EXISTS nonces (
            adapter_id  TEXT NOT NULL,
            nonce       TEXT NOT NULL,
            expires_at  TEXT NOT NULL,
            PRIMARY KEY (adapter_id, nonce)
        );
        CREATE INDEX IF NOT EXISTS idx_nonces_expires_at ON nonces (expires_at);

        CREATE TABLE IF NOT EXISTS runs (
            run_id         TEXT PRIMARY KEY,
            adapter_id     TEXT NOT NULL,
            envelope_id    TEXT NOT NULL,
            started_at     TEXT NOT NULL,
            ended_at       TEXT,
            outcome        TEXT NOT NULL,
            error_kind     TEXT,
            cost_reported  REAL
        );
        "#,
    )?;
    Ok(())
}
