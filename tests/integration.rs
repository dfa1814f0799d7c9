//! End-to-end scenarios exercising RelayCore, the Adapter Registry, and
//! the built-in adapters together.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dorkos_relay::adapter::claude_code::{AgentSessionRuntime, ClaudeCodeAdapter, ClaudeCodeConfig, RunOptions, RunResult};
use dorkos_relay::adapter::webhook::{WebhookAdapter, WebhookConfig, WebhookSecrets};
use dorkos_relay::envelope::Envelope;
use dorkos_relay::prelude::*;
use hmac::{Hmac, Mac};
use sha2::Sha256;

async fn open_core() -> (RelayCore, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let core = RelayCore::open(RelayConfig::under_state_root(dir.path())).await.unwrap();
    (core, dir)
}

/// Scenario 1: publish/subscribe with wildcard.
#[tokio::test]
async fn publish_subscribe_with_wildcard() {
    let (core, _dir) = open_core().await;
    let count = Arc::new(AtomicUsize::new(0));
    let counted = count.clone();
    core.subscribe("relay.agent.*", DispatchMode::Serial, move |_env| {
        let counted = counted.clone();
        Box::pin(async move {
            counted.fetch_add(1, Ordering::SeqCst);
        })
    })
    .unwrap();

    core.publish("relay.agent.claude", Bytes::from_static(b"hi"), PublishOptions::default())
        .await
        .unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 1);
}

/// Scenario 2: subject rejection — no Maildir file, no SQLite row.
#[tokio::test]
async fn invalid_subject_is_rejected_without_persisting() {
    let (core, dir) = open_core().await;
    let result = core.publish("foo..bar", Bytes::new(), PublishOptions::default()).await;
    assert!(matches!(result, Err(CoreError::InvalidSubject(_))));

    let maildir_new = dir.path().join("relay/maildir/new");
    let entries = std::fs::read_dir(&maildir_new).unwrap().count();
    assert_eq!(entries, 0);
}

fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let message = format!("{timestamp}.{}", String::from_utf8_lossy(body));
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Scenario 3: webhook signature replay — first delivery accepted, the
/// identical replayed nonce rejected.
#[tokio::test]
async fn webhook_signature_replay_is_rejected() {
    let (core, _dir) = open_core().await;
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let bound_addr = listener.local_addr().unwrap();
    drop(listener);

    let secret = "shhh".to_string();
    let adapter = Arc::new(WebhookAdapter::new(
        WebhookConfig {
            id: "wh".to_string(),
            subject_prefix: "relay.wh".to_string(),
            display_name: "Webhook".to_string(),
            bind_addr: bound_addr,
            secrets: WebhookSecrets {
                current: secret.clone(),
                previous: None,
            },
            outbound_url: "http://127.0.0.1:1/unused".to_string(),
        },
        core.index_store(),
        core.maildir_store(),
    ));
    core.register_adapter(adapter).await.unwrap();
    // Give the server task a moment to bind and start accepting.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let count = Arc::new(AtomicUsize::new(0));
    let counted = count.clone();
    core.subscribe("relay.wh.*", DispatchMode::Serial, move |_env| {
        let counted = counted.clone();
        Box::pin(async move {
            counted.fetch_add(1, Ordering::SeqCst);
        })
    })
    .unwrap();

    let body = serde_json::to_vec(&serde_json::json!({"nonce": "n-1", "routeKey": "inbox"})).unwrap();
    let timestamp = Utc::now().timestamp();
    let signature = sign(&secret, timestamp, &body);

    let client = reqwest::Client::new();
    let url = format!("http://{bound_addr}/webhook");

    let first = client
        .post(&url)
        .header("X-Webhook-Signature", format!("t={timestamp},v1={signature}"))
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert!(first.status().is_success());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    let replay = client
        .post(&url)
        .header("X-Webhook-Signature", format!("t={timestamp},v1={signature}"))
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(replay.status().as_u16(), 409);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

struct EchoRuntime;

#[async_trait]
impl AgentSessionRuntime for EchoRuntime {
    async fn run_turn(&self, prompt: String, _options: RunOptions) -> Result<RunResult, String> {
        let _ = prompt;
        Ok(RunResult {
            session_id: "session-echo".to_string(),
            final_text: "pong".to_string(),
            cost_usd: Some(0.0),
        })
    }

    async fn cancel(&self, _session_id: &str) {}
}

/// Scenario 4: runtime-adapter round-trip via `replyTo`.
#[tokio::test]
async fn runtime_adapter_round_trip() {
    let (core, _dir) = open_core().await;
    let adapter = Arc::new(ClaudeCodeAdapter::new(
        ClaudeCodeConfig::default(),
        Arc::new(EchoRuntime),
        core.index_store(),
    ));
    core.register_adapter(adapter).await.unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::channel(1);
    core.subscribe("test.reply", DispatchMode::Serial, move |env| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(env).await;
        })
    })
    .unwrap();

    let payload = serde_json::to_vec(&serde_json::json!({"content": "ping"})).unwrap();
    core.publish(
        "relay.agent.claude",
        Bytes::from(payload),
        PublishOptions {
            reply_to: Subject::parse("test.reply").ok(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for agent reply")
        .expect("reply channel closed");

    let value: serde_json::Value = serde_json::from_slice(&reply.payload).unwrap();
    assert_eq!(value.get("content").and_then(|v| v.as_str()), Some("pong"));
}

struct CountingAdapter {
    id: String,
    prefix: String,
    delivered: Arc<AtomicUsize>,
    fail: bool,
}

#[async_trait]
impl Adapter for CountingAdapter {
    fn id(&self) -> &str {
        &self.id
    }
    fn subject_prefix(&self) -> &str {
        &self.prefix
    }
    fn display_name(&self) -> &str {
        &self.id
    }
    fn adapter_kind(&self) -> AdapterKind {
        AdapterKind::External
    }
    async fn start(&self, _relay: RelayPublisher) -> Result<(), AdapterError> {
        Ok(())
    }
    async fn stop(&self) -> Result<(), AdapterError> {
        Ok(())
    }
    async fn deliver(&self, _envelope: &Envelope) -> Result<(), AdapterError> {
        if self.fail {
            return Err(AdapterError::DeliveryFailed {
                adapter_id: self.id.clone(),
                reason: "forced failure".to_string(),
            });
        }
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn get_status(&self) -> AdapterStatus {
        AdapterStatus::running()
    }
}

/// Scenario 6: adapter crash isolation — one adapter's failing `deliver`
/// never blocks another adapter matching the same subject.
#[tokio::test]
async fn adapter_crash_is_isolated() {
    let (core, _dir) = open_core().await;
    let delivered_b = Arc::new(AtomicUsize::new(0));

    core.register_adapter(Arc::new(CountingAdapter {
        id: "a".to_string(),
        prefix: "relay.shared".to_string(),
        delivered: Arc::new(AtomicUsize::new(0)),
        fail: true,
    }))
    .await
    .unwrap();
    core.register_adapter(Arc::new(CountingAdapter {
        id: "b".to_string(),
        prefix: "relay.shared".to_string(),
        delivered: delivered_b.clone(),
        fail: false,
    }))
    .await
    .unwrap();

    core.publish("relay.shared.event", Bytes::new(), PublishOptions::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(delivered_b.load(Ordering::SeqCst), 1);
}

/// Scenario 5: hot-reload without loss — the new instance starts before
/// the old one stops, and every envelope in a publish burst is delivered
/// by exactly one of the two instances.
#[tokio::test]
async fn hot_reload_delivers_every_envelope_exactly_once() {
    let (core, _dir) = open_core().await;
    let delivered_old = Arc::new(AtomicUsize::new(0));
    let delivered_new = Arc::new(AtomicUsize::new(0));

    core.register_adapter(Arc::new(CountingAdapter {
        id: "reloadable".to_string(),
        prefix: "relay.reload".to_string(),
        delivered: delivered_old.clone(),
        fail: false,
    }))
    .await
    .unwrap();

    for i in 0..5 {
        core.publish(&format!("relay.reload.burst{i}"), Bytes::new(), PublishOptions::default())
            .await
            .unwrap();
    }

    core.hot_reload_adapter(Arc::new(CountingAdapter {
        id: "reloadable".to_string(),
        prefix: "relay.reload".to_string(),
        delivered: delivered_new.clone(),
        fail: false,
    }))
    .await
    .unwrap();

    for i in 5..10 {
        core.publish(&format!("relay.reload.burst{i}"), Bytes::new(), PublishOptions::default())
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let total = delivered_old.load(Ordering::SeqCst) + delivered_new.load(Ordering::SeqCst);
    assert_eq!(total, 10);
    assert!(delivered_new.load(Ordering::SeqCst) >= 5);
}
