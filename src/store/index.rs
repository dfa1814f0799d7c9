//! Async-facing handle over the embedded SQLite index (`spec.md` §4.3).
//!
//! `rusqlite::Connection` is not `Sync` and must not be driven across
//! `.await` points directly, so every operation here is dispatched through
//! `tokio::task::spawn_blocking` against a connection held behind a
//! `parking_lot::Mutex`. This keeps call sites `async fn`-shaped — the
//! same shape `spec.md` §4.3/§4.4 describe — while respecting rusqlite's
//! threading contract.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::error::IndexError;
use super::schema::{apply_pragmas, apply_schema};
use crate::util::EnvelopeId;

/// A row in the `messages` table, the durable index counterpart to a
/// Maildir-stored envelope.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: EnvelopeId,
    pub subject: String,
    pub reply_to: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: String,
    pub size_bytes: i64,
}

/// Outbound webhook delivery attempt status (`spec.md` §3 "Outbound-webhook
/// delivery record").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Succeeded,
    Failed,
    Dead,
}

impl DeliveryStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            "dead" => Self::Dead,
            _ => Self::Pending,
        }
    }
}

/// A row in the `deliveries` table.
#[derive(Debug, Clone)]
pub struct DeliveryRow {
    pub id: String,
    pub adapter_id: String,
    pub envelope_id: EnvelopeId,
    pub url: String,
    pub attempt: i64,
    pub next_attempt_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub last_error: Option<String>,
}

/// Outcome of a Claude Code runtime-adapter run (`spec.md` §3 "Run
/// history").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failure,
}

impl RunOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// A row in the `runs` table.
#[derive(Debug, Clone)]
pub struct RunRow {
    pub run_id: Uuid,
    pub adapter_id: String,
    pub envelope_id: EnvelopeId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: RunOutcome,
    pub error_kind: Option<String>,
    pub cost_reported: Option<f64>,
}

/// Handle over the embedded index/run-history database.
#[derive(Debug, Clone)]
pub struct IndexStore {
    conn: Arc<Mutex<Connection>>,
}

impl IndexStore {
    /// Open (creating if absent) the database at `path`, applying pragmas
    /// and schema.
    pub async fn open(path: impl AsRef<Path> + Send + 'static) -> Result<Self, IndexError> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, IndexError> {
            let conn = Connection::open(path)?;
            apply_pragmas(&conn)?;
            apply_schema(&conn)?;
            Ok(conn)
        })
        .await??;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database, used in tests.
    pub async fn open_in_memory() -> Result<Self, IndexError> {
        let conn = tokio::task::spawn_blocking(|| -> Result<Connection, IndexError> {
            let conn = Connection::open_in_memory()?;
            apply_pragmas(&conn)?;
            apply_schema(&conn)?;
            Ok(conn)
        })
        .await??;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, IndexError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, IndexError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || f(&conn.lock())).await?
    }

    /// Insert a message row, transactionally with the Maildir rename in
    /// `RelayCore::publish` (the caller is responsible for sequencing —
    /// this method performs the SQLite half of that logical unit of work,
    /// `spec.md` §4.3 "Transactional discipline").
    pub async fn insert_message(&self, row: MessageRow) -> Result<(), IndexError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO messages (id, subject, reply_to, correlation_id, created_at, expires_at, status, size_bytes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    row.id.to_string(),
                    row.subject,
                    row.reply_to,
                    row.correlation_id.map(|u| u.to_string()),
                    row.created_at.to_rfc3339(),
                    row.expires_at.map(|d| d.to_rfc3339()),
                    row.status,
                    row.size_bytes,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Update a message's status in place (`new` → `cur`/`dlq`).
    pub async fn set_message_status(
        &self,
        id: EnvelopeId,
        status: &'static str,
    ) -> Result<(), IndexError> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE messages SET status = ?1 WHERE id = ?2",
                params![status, id.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    /// Look up a message row by id, used during startup reconciliation.
    pub async fn find_message(&self, id: EnvelopeId) -> Result<Option<MessageRow>, IndexError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, subject, reply_to, correlation_id, created_at, expires_at, status, size_bytes
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .optional()
            .map_err(IndexError::from)
        })
        .await
    }

    /// Check-and-record a webhook nonce (`spec.md` §4.6.2, §8 "Nonce
    /// idempotence"). Returns `true` if this is the first time `nonce` has
    /// been seen for `adapter_id` within its TTL window, `false` if it is a
    /// replay.
    pub async fn check_and_record_nonce(
        &self,
        adapter_id: String,
        nonce: String,
        ttl: chrono::Duration,
    ) -> Result<bool, IndexError> {
        self.with_conn(move |conn| {
            let now = Utc::now();
            conn.execute("DELETE FROM nonces WHERE expires_at < ?1", params![now.to_rfc3339()])?;

            let existing: Option<String> = conn
                .query_row(
                    "SELECT nonce FROM nonces WHERE adapter_id = ?1 AND nonce = ?2",
                    params![adapter_id, nonce],
                    |r| r.get(0),
                )
                .optional()?;

            if existing.is_some() {
                return Ok(false);
            }

            let expires_at = now + ttl;
            conn.execute(
                "INSERT INTO nonces (adapter_id, nonce, expires_at) VALUES (?1, ?2, ?3)",
                params![adapter_id, nonce, expires_at.to_rfc3339()],
            )?;
            Ok(true)
        })
        .await
    }

    /// Create a new outbound-delivery row with a stable id, one per
    /// envelope (not per attempt), `attempt` starting at 1.
    pub async fn create_delivery(
        &self,
        id: String,
        adapter_id: String,
        envelope_id: EnvelopeId,
        url: String,
    ) -> Result<(), IndexError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO deliveries (id, adapter_id, envelope_id, url, attempt, next_attempt_at, status, last_error)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, NULL)",
                params![
                    id,
                    adapter_id,
                    envelope_id.to_string(),
                    url,
                    Utc::now().to_rfc3339(),
                    DeliveryStatus::Pending.as_str(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Record the outcome of a delivery attempt: advance `attempt`, set
    /// `next_attempt_at`, and transition `status` (possibly to `dead`).
    pub async fn record_delivery_attempt(
        &self,
        id: String,
        status: DeliveryStatus,
        next_attempt_at: Option<DateTime<Utc>>,
        last_error: Option<String>,
    ) -> Result<(), IndexError> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE deliveries
                 SET attempt = attempt + 1, status = ?1, next_attempt_at = ?2, last_error = ?3
                 WHERE id = ?4",
                params![
                    status.as_str(),
                    next_attempt_at.unwrap_or_else(Utc::now).to_rfc3339(),
                    last_error,
                    id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Fetch pending deliveries whose `next_attempt_at` has elapsed.
    pub async fn due_deliveries(&self, now: DateTime<Utc>) -> Result<Vec<DeliveryRow>, IndexError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, adapter_id, envelope_id, url, attempt, next_attempt_at, status, last_error
                 FROM deliveries WHERE status IN ('pending', 'failed') AND next_attempt_at <= ?1
                 ORDER BY next_attempt_at ASC",
            )?;
            let rows = stmt
                .query_map(params![now.to_rfc3339()], row_to_delivery)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Insert a run-history row after a Claude Code runtime-adapter turn
    /// completes.
    pub async fn insert_run(&self, row: RunRow) -> Result<(), IndexError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO runs (run_id, adapter_id, envelope_id, started_at, ended_at, outcome, error_kind, cost_reported)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    row.run_id.to_string(),
                    row.adapter_id,
                    row.envelope_id.to_string(),
                    row.started_at.to_rfc3339(),
                    row.ended_at.map(|d| d.to_rfc3339()),
                    row.outcome.as_str(),
                    row.error_kind,
                    row.cost_reported,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Run a truncating WAL checkpoint, invoked on graceful shutdown
    /// (`spec.md` §4.3 "Checkpoint policy").
    pub async fn checkpoint_truncate(&self) -> Result<(), IndexError> {
        self.with_conn(|conn| {
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
            Ok(())
        })
        .await
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(4)?;
    let expires_at: Option<String> = row.get(5)?;
    let correlation_id: Option<String> = row.get(3)?;
    Ok(MessageRow {
        id: id.parse().map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                "invalid envelope id".into(),
            )
        })?,
        subject: row.get(1)?,
        reply_to: row.get(2)?,
        correlation_id: correlation_id.and_then(|s| Uuid::parse_str(&s).ok()),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        expires_at: expires_at.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|d| d.with_timezone(&Utc))
        }),
        status: row.get(6)?,
        size_bytes: row.get(7)?,
    })
}

fn row_to_delivery(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeliveryRow> {
    let envelope_id: String = row.get(2)?;
    let next_attempt_at: String = row.get(5)?;
    let status: String = row.get(6)?;
    Ok(DeliveryRow {
        id: row.get(0)?,
        adapter_id: row.get(1)?,
        envelope_id: envelope_id.parse().map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                "invalid envelope id".into(),
            )
        })?,
        url: row.get(3)?,
        attempt: row.get(4)?,
        next_attempt_at: DateTime::parse_from_rfc3339(&next_attempt_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        status: DeliveryStatus::parse(&status),
        last_error: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_row(id: EnvelopeId) -> MessageRow {
        MessageRow {
            id,
            subject: "relay.agent.claude".to_string(),
            reply_to: None,
            correlation_id: None,
            created_at: id.created_at(),
            expires_at: None,
            status: "new".to_string(),
            size_bytes: 4,
        }
    }

    #[tokio::test]
    async fn insert_and_find_message_round_trips() {
        let store = IndexStore::open_in_memory().await.unwrap();
        let id = EnvelopeId::new();
        store.insert_message(message_row(id)).await.unwrap();

        let found = store.find_message(id).await.unwrap().unwrap();
        assert_eq!(found.subject, "relay.agent.claude");
        assert_eq!(found.status, "new");
    }

    #[tokio::test]
    async fn missing_message_returns_none() {
        let store = IndexStore::open_in_memory().await.unwrap();
        let id = EnvelopeId::new();
        assert!(store.find_message(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_message_status_updates_row() {
        let store = IndexStore::open_in_memory().await.unwrap();
        let id = EnvelopeId::new();
        store.insert_message(message_row(id)).await.unwrap();
        store.set_message_status(id, "cur").await.unwrap();
        let found = store.find_message(id).await.unwrap().unwrap();
        assert_eq!(found.status, "cur");
    }

    #[tokio::test]
    async fn nonce_accepts_once_then_rejects_replay() {
        let store = IndexStore::open_in_memory().await.unwrap();
        let first = store
            .check_and_record_nonce("webhook-1".into(), "abc123".into(), chrono::Duration::hours(24))
            .await
            .unwrap();
        let second = store
            .check_and_record_nonce("webhook-1".into(), "abc123".into(), chrono::Duration::hours(24))
            .await
            .unwrap();
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn delivery_lifecycle_tracks_attempts() {
        let store = IndexStore::open_in_memory().await.unwrap();
        let envelope_id = EnvelopeId::new();
        store
            .create_delivery(
                "delivery-1".into(),
                "webhook-1".into(),
                envelope_id,
                "https://example.com/hook".into(),
            )
            .await
            .unwrap();

        store
            .record_delivery_attempt(
                "delivery-1".into(),
                DeliveryStatus::Failed,
                Some(Utc::now() + chrono::Duration::seconds(60)),
                Some("connection refused".into()),
            )
            .await
            .unwrap();

        let due = store.due_deliveries(Utc::now() + chrono::Duration::minutes(5)).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].attempt, 2);
        assert_eq!(due[0].status, DeliveryStatus::Failed);
    }

    #[tokio::test]
    async fn run_history_round_trips() {
        let store = IndexStore::open_in_memory().await.unwrap();
        let run_id = Uuid::new_v4();
        let envelope_id = EnvelopeId::new();
        store
            .insert_run(RunRow {
                run_id,
                adapter_id: "claude-code".into(),
                envelope_id,
                started_at: Utc::now(),
                ended_at: Some(Utc::now()),
                outcome: RunOutcome::Success,
                error_kind: None,
                cost_reported: Some(0.02),
            })
            .await
            .unwrap();
        // No direct getter is required by spec.md; this test exercises
        // the insert path used by the Claude Code adapter.
    }
}
