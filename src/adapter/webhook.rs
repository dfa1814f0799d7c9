//! Webhook adapter: inbound HTTP signature verification, outbound
//! retrying delivery (`spec.md` §4.6.2).
//!
//! Inbound verification and outbound signing share the HMAC-SHA256 idiom
//! from `airssys_osl::middleware::security` (constant-time comparison,
//! explicit timestamp window); the outbound retry queue is durable in
//! [`crate::store::IndexStore`] so it survives a process restart.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use axum::body::Bytes as AxumBytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::error::AdapterError;
use super::status::AdapterStatus;
use super::traits::{Adapter, AdapterKind};
use crate::core::{PublishOptions, RelayPublisher};
use crate::envelope::Envelope;
use crate::maildir::MaildirStore;
use crate::store::{DeliveryStatus, IndexStore};

type HmacSha256 = Hmac<Sha256>;

const TIMESTAMP_WINDOW_SECS: i64 = 300;
const NONCE_TTL: ChronoDuration = ChronoDuration::hours(24);
const MAX_ATTEMPTS: u32 = 6;
const BACKOFF_SCHEDULE_SECS: [u64; 6] = [0, 60, 300, 1800, 7200, 86400];
const DEADLETTER_SUBJECT: &str = "relay.adapter.webhook.deadletter";

/// Shared secrets for one rotation window: `current` verifies and signs;
/// `previous`, when set, still verifies (but never signs) so in-flight
/// deliveries from the old secret aren't rejected mid-rotation.
#[derive(Debug, Clone)]
pub struct WebhookSecrets {
    pub current: String,
    pub previous: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub id: String,
    pub subject_prefix: String,
    pub display_name: String,
    pub bind_addr: std::net::SocketAddr,
    pub secrets: WebhookSecrets,
    pub outbound_url: String,
}

struct SharedState {
    index: IndexStore,
    maildir: MaildirStore,
    relay: tokio::sync::OnceCell<RelayPublisher>,
    secrets: WebhookSecrets,
    subject_prefix: String,
    draining: AtomicBool,
}

/// Webhook adapter instance. One HTTP server listener per instance,
/// plus a background task driving the durable outbound retry queue.
pub struct WebhookAdapter {
    config: WebhookConfig,
    state: Arc<SharedState>,
    status: parking_lot::Mutex<AdapterStatus>,
    server_handle: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
    retry_handle: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
    http: reqwest::Client,
}

impl WebhookAdapter {
    pub fn new(config: WebhookConfig, index: IndexStore, maildir: MaildirStore) -> Self {
        let state = Arc::new(SharedState {
            index,
            maildir,
            relay: tokio::sync::OnceCell::new(),
            secrets: config.secrets.clone(),
            subject_prefix: config.subject_prefix.clone(),
            draining: AtomicBool::new(false),
        });
        Self {
            config,
            state,
            status: parking_lot::Mutex::new(AdapterStatus::stopped()),
            server_handle: parking_lot::Mutex::new(None),
            retry_handle: parking_lot::Mutex::new(None),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Adapter for WebhookAdapter {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn subject_prefix(&self) -> &str {
        &self.config.subject_prefix
    }

    fn display_name(&self) -> &str {
        &self.config.display_name
    }

    fn adapter_kind(&self) -> AdapterKind {
        AdapterKind::External
    }

    async fn start(&self, relay: RelayPublisher) -> Result<(), AdapterError> {
        self.state
            .relay
            .set(relay)
            .map_err(|_| AdapterError::StartFailed {
                adapter_id: self.config.id.clone(),
                reason: "adapter already started".to_string(),
            })?;

        let app = Router::new()
            .route("/webhook", post(handle_inbound))
            .with_state(self.state.clone());

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| AdapterError::StartFailed {
                adapter_id: self.config.id.clone(),
                reason: e.to_string(),
            })?;

        let server_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "webhook inbound server exited");
            }
        });
        *self.server_handle.lock() = Some(server_handle);

        let retry_state = self.state.clone();
        let outbound_url = self.config.outbound_url.clone();
        let http = self.http.clone();
        let adapter_id = self.config.id.clone();
        let retry_handle = tokio::spawn(async move {
            retry_loop(retry_state, http, outbound_url, adapter_id).await;
        });
        *self.retry_handle.lock() = Some(retry_handle);

        *self.status.lock() = AdapterStatus::running();
        Ok(())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        self.state.draining.store(true, Ordering::Release);
        if let Some(handle) = self.server_handle.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.retry_handle.lock().take() {
            handle.abort();
        }
        *self.status.lock() = AdapterStatus::stopped();
        Ok(())
    }

    async fn deliver(&self, envelope: &Envelope) -> Result<(), AdapterError> {
        if self.state.draining.load(Ordering::Acquire) {
            return Err(AdapterError::AdapterStopping(self.config.id.clone()));
        }

        let delivery_id = uuid::Uuid::new_v4().to_string();
        self.state
            .index
            .create_delivery(
                delivery_id.clone(),
                self.config.id.clone(),
                envelope.id,
                self.config.outbound_url.clone(),
            )
            .await
            .map_err(|e| AdapterError::DeliveryFailed {
                adapter_id: self.config.id.clone(),
                reason: e.to_string(),
            })?;

        attempt_delivery(
            &self.http,
            &self.state,
            &self.config.outbound_url,
            &delivery_id,
            envelope,
            1,
        )
        .await;
        Ok(())
    }

    fn get_status(&self) -> AdapterStatus {
        self.status.lock().clone()
    }
}

async fn handle_inbound(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    body: AxumBytes,
) -> (StatusCode, &'static str) {
    let Some(sig_header) = headers
        .get("X-Webhook-Signature")
        .and_then(|v| v.to_str().ok())
    else {
        return (StatusCode::UNAUTHORIZED, "missing signature");
    };

    let Some((timestamp, hmac_hex)) = parse_signature_header(sig_header) else {
        return (StatusCode::UNAUTHORIZED, "malformed signature header");
    };

    let now = Utc::now().timestamp();
    if (now - timestamp).abs() > TIMESTAMP_WINDOW_SECS {
        return (StatusCode::UNAUTHORIZED, "timestamp outside window");
    }

    let signed_message = format!("{timestamp}.{}", String::from_utf8_lossy(&body));
    let verified = [Some(&state.secrets.current), state.secrets.previous.as_ref()]
        .into_iter()
        .flatten()
        .any(|secret| verify_hmac(secret, &signed_message, &hmac_hex));
    if !verified {
        return (StatusCode::UNAUTHORIZED, "signature mismatch");
    }

    let Ok(parsed): Result<serde_json::Value, _> = serde_json::from_slice(&body) else {
        return (StatusCode::BAD_REQUEST, "invalid json body");
    };
    let Some(nonce) = parsed.get("nonce").and_then(|v| v.as_str()) else {
        return (StatusCode::BAD_REQUEST, "missing nonce");
    };
    let Some(route_key) = parsed.get("routeKey").and_then(|v| v.as_str()) else {
        return (StatusCode::BAD_REQUEST, "missing routeKey");
    };

    let adapter_id = state.subject_prefix.clone();
    let fresh = state
        .index
        .check_and_record_nonce(adapter_id, nonce.to_string(), NONCE_TTL)
        .await
        .unwrap_or(false);
    if !fresh {
        return (StatusCode::CONFLICT, "replayed nonce");
    }

    let Some(relay) = state.relay.get() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "adapter not started");
    };
    let subject = format!("{}.{route_key}", state.subject_prefix);
    match relay.publish(&subject, Bytes::copy_from_slice(&body), PublishOptions::default()).await {
        Ok(_) => (StatusCode::OK, "accepted"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "publish rejected"),
    }
}

fn parse_signature_header(header: &str) -> Option<(i64, String)> {
    let mut timestamp = None;
    let mut hmac_hex = None;
    for part in header.split(',') {
        let (key, value) = part.split_once('=')?;
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => hmac_hex = Some(value.to_string()),
            _ => {}
        }
    }
    Some((timestamp?, hmac_hex?))
}

/// HMAC-SHA256 accepts keys of any length, so this only fails if the
/// underlying key material is somehow unrepresentable; callers treat
/// `None` as a verification/signing failure.
fn compute_hmac(secret: &str, message: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(message.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

fn verify_hmac(secret: &str, message: &str, candidate_hex: &str) -> bool {
    let Some(expected) = compute_hmac(secret, message) else {
        return false;
    };
    let expected_bytes = expected.as_bytes();
    let candidate_bytes = candidate_hex.as_bytes();
    expected_bytes.len() == candidate_bytes.len() && expected_bytes.ct_eq(candidate_bytes).into()
}

async fn attempt_delivery(
    http: &reqwest::Client,
    state: &Arc<SharedState>,
    url: &str,
    delivery_id: &str,
    envelope: &Envelope,
    attempt: u32,
) {
    let timestamp = Utc::now().timestamp();
    let body = serde_json::to_vec(envelope).unwrap_or_default();
    let signed_message = format!("{timestamp}.{}", String::from_utf8_lossy(&body));
    let Some(signature) = compute_hmac(&state.secrets.current, &signed_message) else {
        schedule_retry_or_deadletter(state, delivery_id, envelope, attempt, "failed to sign outbound payload".to_string()).await;
        return;
    };

    let response = http
        .post(url)
        .header("X-DorkOS-Delivery-Id", delivery_id)
        .header(
            "X-DorkOS-Signature",
            format!("t={timestamp},v1={signature}"),
        )
        .body(body)
        .send()
        .await;

    match response {
        Ok(resp) if resp.status().is_success() => {
            let _ = state
                .index
                .record_delivery_attempt(delivery_id.to_string(), DeliveryStatus::Succeeded, None, None)
                .await;
        }
        Ok(resp) => {
            schedule_retry_or_deadletter(
                state,
                delivery_id,
                envelope,
                attempt,
                format!("http status {}", resp.status()),
            )
            .await;
        }
        Err(e) => {
            schedule_retry_or_deadletter(state, delivery_id, envelope, attempt, e.to_string()).await;
        }
    }
}

async fn schedule_retry_or_deadletter(
    state: &Arc<SharedState>,
    delivery_id: &str,
    envelope: &Envelope,
    attempt: u32,
    error: String,
) {
    if attempt >= MAX_ATTEMPTS {
        let _ = state
            .index
            .record_delivery_attempt(delivery_id.to_string(), DeliveryStatus::Dead, None, Some(error))
            .await;
        if let Some(relay) = state.relay.get() {
            if let Ok(payload) = serde_json::to_vec(envelope) {
                let _ = relay
                    .publish(DEADLETTER_SUBJECT, Bytes::from(payload), PublishOptions::default())
                    .await;
            }
        }
        return;
    }

    let base = BACKOFF_SCHEDULE_SECS[attempt as usize % BACKOFF_SCHEDULE_SECS.len()];
    let jitter = 0.8 + 0.4 * rand::thread_rng().gen::<f64>();
    let delay = StdDuration::from_secs_f64(base as f64 * jitter);
    let next_attempt_at = Utc::now() + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::zero());

    let _ = state
        .index
        .record_delivery_attempt(
            delivery_id.to_string(),
            DeliveryStatus::Failed,
            Some(next_attempt_at),
            Some(error),
        )
        .await;
}

/// Poll `due_deliveries` and redrive failed attempts whose
/// `next_attempt_at` has elapsed (`spec.md` §4.6.2 "Durable queue survives
/// process restart").
async fn retry_loop(state: Arc<SharedState>, http: reqwest::Client, url: String, adapter_id: String) {
    let mut interval = tokio::time::interval(StdDuration::from_secs(5));
    loop {
        interval.tick().await;
        if state.draining.load(Ordering::Acquire) {
            return;
        }
        let Ok(due) = state.index.due_deliveries(Utc::now()).await else {
            continue;
        };
        for row in due {
            if row.adapter_id != adapter_id {
                continue;
            }
            let Some(envelope) = reconstruct_envelope(&state, row.envelope_id).await else {
                tracing::warn!(envelope_id = %row.envelope_id, "cannot reconstruct envelope for retry, skipping");
                continue;
            };
            attempt_delivery(&http, &state, &url, &row.id, &envelope, row.attempt as u32).await;
        }
    }
}

/// Recover the original envelope from the durable stores for a redrive
/// attempt. Returns `None` if either half of the record has been purged
/// (the delivery is effectively orphaned at that point).
async fn reconstruct_envelope(state: &SharedState, envelope_id: crate::util::EnvelopeId) -> Option<Envelope> {
    let row = state.index.find_message(envelope_id).await.ok()??;
    let subject = crate::subject::Subject::parse(&row.subject).ok()?;
    let payload = state.maildir.read(envelope_id).await.ok()?;
    let mut envelope = Envelope::new(subject, Bytes::from(payload));
    envelope.id = envelope_id;
    envelope.created_at = row.created_at;
    envelope.expires_at = row.expires_at;
    envelope.correlation_id = row.correlation_id;
    envelope.reply_to = row
        .reply_to
        .as_deref()
        .and_then(|s| crate::subject::Subject::parse(s).ok());
    Some(envelope)
}
