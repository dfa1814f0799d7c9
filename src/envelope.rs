//! The envelope: the immutable unit of routing (`spec.md` §3).

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::subject::Subject;
use crate::util::EnvelopeId;

/// Maildir lifecycle state mirrored onto the envelope's logical status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeStatus {
    /// Written to `tmp/`, not yet durable.
    Tmp,
    /// Durable and visible for dispatch (`new/`).
    New,
    /// Acknowledged by its consumers (`cur/`).
    Cur,
    /// Delivery exhausted; preserved for operator inspection (`dlq/`).
    Dlq,
}

/// The unit of routing. Immutable once published.
///
/// Field-for-field as `spec.md` §3: `id`, `subject`, `payload`, `reply_to`,
/// `correlation_id`, `created_at`, `expires_at`, `status`. The payload is
/// an opaque byte sequence — Relay does not interpret it — but a
/// conventional JSON shape (`content`, `from`, `to`, `conversation_id`,
/// `channel_meta`) is documented in [`PayloadConvention`] for adapters
/// that choose to use it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: EnvelopeId,
    pub subject: Subject,
    pub payload: Bytes,
    pub reply_to: Option<Subject>,
    pub correlation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: EnvelopeStatus,
}

impl Envelope {
    /// Construct a new envelope for publishing. `id` and `created_at` are
    /// minted together so the id's encoded timestamp and `created_at`
    /// never disagree.
    pub fn new(subject: Subject, payload: Bytes) -> Self {
        let id = EnvelopeId::new();
        let created_at = id.created_at();
        Self {
            id,
            subject,
            payload,
            reply_to: None,
            correlation_id: None,
            created_at,
            expires_at: None,
            status: EnvelopeStatus::Tmp,
        }
    }

    pub fn with_reply_to(mut self, reply_to: Subject) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether this envelope is past its `expires_at` and eligible for
    /// purge.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() > at)
    }
}

/// The conventional JSON payload shape referenced by `spec.md` §3. Relay
/// itself never parses this — only adapters that opt into the convention
/// (Telegram, webhook, Claude Code) do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadConvention {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_meta: Option<serde_json::Value>,
}
