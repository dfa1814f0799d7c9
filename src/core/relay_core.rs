//! RelayCore: the central publish/subscribe engine (`spec.md` §4.4).
//!
//! Exclusively owns the Maildir root, the SQLite handle, and the
//! in-process subscription table, mirroring the ownership split the
//! teacher draws between `airssys_rt::system::ActorSystem` (owns the
//! mailboxes and scheduler) and `airssys_rt::registry::ActorRegistry`
//! (owns the actor map) — here, RelayCore vs. [`crate::registry::AdapterRegistry`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::config::RelayConfig;
use super::error::CoreError;
use super::metrics::{Metrics, MetricsSnapshot};
use super::publisher::{RelayPublisher, Unsubscribe};
use crate::adapter::{Adapter, AdapterStatus};
use crate::envelope::{Envelope, EnvelopeStatus};
use crate::maildir::MaildirStore;
use crate::registry::AdapterRegistry;
use crate::store::{IndexStore, MessageRow};
use crate::subject::{compile_pattern, Subject};
use crate::subscription::{DispatchMode, Subscription};
use crate::util::EnvelopeId;

/// Boxed future returned by a subscription handler.
pub type BoxFuture = futures::future::BoxFuture<'static, ()>;

type Handler = Arc<dyn Fn(Envelope) -> BoxFuture + Send + Sync>;

/// Optional fields accepted by [`RelayCore::publish`] (`spec.md` §4.4
/// `opts?: {replyTo?, correlationId?, expiresAt?}`).
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub reply_to: Option<Subject>,
    pub correlation_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub(super) struct Inner {
    maildir: MaildirStore,
    index: IndexStore,
    registry: Arc<AdapterRegistry>,
    pub(super) metrics: Metrics,
    pub(super) subscriptions: Mutex<Vec<(Subscription, Handler)>>,
    self_weak: std::sync::Weak<Inner>,
    shutting_down: AtomicBool,
}

impl Inner {
    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        opts: PublishOptions,
    ) -> Result<EnvelopeId, CoreError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(CoreError::ShuttingDown);
        }

        let subject = Subject::parse(subject)?;
        let mut envelope = Envelope::new(subject.clone(), payload);
        if let Some(reply_to) = opts.reply_to {
            envelope = envelope.with_reply_to(reply_to);
        }
        if let Some(correlation_id) = opts.correlation_id {
            envelope = envelope.with_correlation_id(correlation_id);
        }
        if let Some(expires_at) = opts.expires_at {
            envelope = envelope.with_expires_at(expires_at);
        }

        self.maildir.put(envelope.id, &envelope.payload).await?;
        envelope.status = EnvelopeStatus::New;

        self.index
            .insert_message(MessageRow {
                id: envelope.id,
                subject: subject.as_str().to_string(),
                reply_to: envelope.reply_to.as_ref().map(|s| s.as_str().to_string()),
                correlation_id: envelope.correlation_id,
                created_at: envelope.created_at,
                expires_at: envelope.expires_at,
                status: "new".to_string(),
                size_bytes: envelope.payload.len() as i64,
            })
            .await?;

        self.metrics.record_publish();
        self.dispatch_to_subscribers(&envelope).await;

        self.registry
            .broadcast(subject.as_str(), Arc::new(envelope.clone()))
            .await
            .map_err(|e| match e {
                crate::registry::RegistryError::Backpressure(id) => CoreError::Backpressure(id),
                other => CoreError::Registry(other),
            })?;

        Ok(envelope.id)
    }

    async fn publish_ephemeral(&self, subject: &str, payload: Bytes) -> Result<(), CoreError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(CoreError::ShuttingDown);
        }
        let subject = Subject::parse(subject)?;
        let envelope = Envelope::new(subject, payload);
        self.metrics.record_publish();
        self.dispatch_to_subscribers(&envelope).await;
        Ok(())
    }

    /// Invoke matching in-process subscribers in registration order.
    /// `FireAndForget` handlers are spawned and unawaited; `Serial`
    /// handlers are awaited before the next subscriber runs (`spec.md`
    /// §4.4 "Concurrency").
    async fn dispatch_to_subscribers(&self, envelope: &Envelope) {
        let matching: Vec<(DispatchMode, Handler)> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|(sub, _)| sub.pattern.matches(envelope.subject.as_str()))
            .map(|(sub, handler)| (sub.dispatch_mode, handler.clone()))
            .collect();

        for (mode, handler) in matching {
            self.metrics.record_dispatch();
            let future = handler(envelope.clone());
            match mode {
                DispatchMode::Serial => future.await,
                DispatchMode::FireAndForget => {
                    tokio::spawn(async move {
                        future.await;
                    });
                }
            }
        }
    }

    fn subscribe<F>(
        &self,
        pattern: &str,
        dispatch_mode: DispatchMode,
        handler: F,
    ) -> Result<Unsubscribe, CoreError>
    where
        F: Fn(Envelope) -> BoxFuture + Send + Sync + 'static,
    {
        let compiled = compile_pattern(pattern)?;
        let subscription = Subscription::new(compiled, dispatch_mode);
        let id = subscription.id;
        self.subscriptions
            .lock()
            .push((subscription, Arc::new(handler)));
        Ok(Unsubscribe::new(self.self_weak.clone(), id))
    }
}

/// The central publish/subscribe engine (`spec.md` §4.4).
#[derive(Clone)]
pub struct RelayCore {
    inner: Arc<Inner>,
}

impl RelayCore {
    /// Open (creating if absent) the Maildir and SQLite stores under
    /// `config`, reap orphaned `tmp/` writers, build the adapter registry,
    /// and replay any envelopes left in `new/` from a prior run.
    pub async fn open(config: RelayConfig) -> Result<Self, CoreError> {
        config.validate().map_err(CoreError::Config)?;

        let maildir = MaildirStore::open(&config.maildir_root).await?;
        let index = IndexStore::open(config.sqlite_path.clone()).await?;
        let registry = Arc::new(AdapterRegistry::new(config.adapter_inbox_depth));

        let reaped = maildir.reap_stale_tmp(config.stale_tmp_ttl).await?;
        if reaped > 0 {
            tracing::info!(count = reaped, "reaped stale tmp/ entries on startup");
        }

        let inner = Arc::new_cyclic(|weak| Inner {
            maildir,
            index,
            registry,
            metrics: Metrics::new(),
            subscriptions: Mutex::new(Vec::new()),
            self_weak: weak.clone(),
            shutting_down: AtomicBool::new(false),
        });

        let core = Self { inner };
        core.replay_on_startup().await?;
        Ok(core)
    }

    /// Scan `new/` for envelopes left over from a prior run, reconcile
    /// against SQLite, and re-dispatch to matching adapters only —
    /// in-process subscribers never receive replayed messages, since they
    /// did not exist pre-restart (`spec.md` §4.4 "Replay on startup").
    async fn replay_on_startup(&self) -> Result<(), CoreError> {
        for id in self.inner.maildir.list_new().await? {
            match self.inner.index.find_message(id).await? {
                Some(row) => {
                    let Ok(subject) = Subject::parse(&row.subject) else {
                        tracing::warn!(%id, "replayed message has an unparsable subject, skipping");
                        continue;
                    };
                    let payload = Bytes::from(self.inner.maildir.read(id).await?);
                    let mut envelope = Envelope::new(subject.clone(), payload);
                    envelope.id = id;
                    envelope.created_at = row.created_at;
                    envelope.expires_at = row.expires_at;
                    envelope.correlation_id = row.correlation_id;
                    envelope.reply_to = row
                        .reply_to
                        .as_deref()
                        .and_then(|s| Subject::parse(s).ok());
                    if let Err(e) = self
                        .inner
                        .registry
                        .broadcast(subject.as_str(), Arc::new(envelope))
                        .await
                    {
                        tracing::warn!(%id, error = %e, "adapter backpressure replaying startup envelope");
                    }
                }
                None => {
                    // Payload bytes alone cannot recover the original
                    // subject; route straight to dlq rather than guess.
                    tracing::warn!(%id, "new/ entry has no SQLite row, routing to dlq");
                    self.inner
                        .index
                        .insert_message(MessageRow {
                            id,
                            subject: "relay.unknown.orphaned".to_string(),
                            reply_to: None,
                            correlation_id: None,
                            created_at: id.created_at(),
                            expires_at: None,
                            status: "dlq".to_string(),
                            size_bytes: 0,
                        })
                        .await?;
                    self.inner.maildir.to_dlq(id).await?;
                    self.inner.metrics.record_dlq_move();
                }
            }
        }
        Ok(())
    }

    pub async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        opts: PublishOptions,
    ) -> Result<EnvelopeId, CoreError> {
        self.inner.publish(subject, payload, opts).await
    }

    pub async fn publish_ephemeral(&self, subject: &str, payload: Bytes) -> Result<(), CoreError> {
        self.inner.publish_ephemeral(subject, payload).await
    }

    pub fn subscribe<F>(
        &self,
        pattern: &str,
        dispatch_mode: DispatchMode,
        handler: F,
    ) -> Result<Unsubscribe, CoreError>
    where
        F: Fn(Envelope) -> BoxFuture + Send + Sync + 'static,
    {
        self.inner.subscribe(pattern, dispatch_mode, handler)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// The narrow, `Weak`-backed capability handed to handlers and
    /// adapters (`spec.md` §4.4 ownership).
    pub fn publisher(&self) -> RelayPublisher {
        RelayPublisher::new(Arc::downgrade(&self.inner))
    }

    /// A cloned handle to the index store, for adapters (webhook, Claude
    /// Code) that need their own durable bookkeeping tables.
    pub fn index_store(&self) -> IndexStore {
        self.inner.index.clone()
    }

    /// A cloned handle to the maildir store, for adapters that need to
    /// read back payload bytes (webhook retry redrive).
    pub fn maildir_store(&self) -> MaildirStore {
        self.inner.maildir.clone()
    }

    pub async fn register_adapter(&self, adapter: Arc<dyn Adapter>) -> Result<(), CoreError> {
        self.inner
            .registry
            .register(adapter, self.publisher())
            .await
            .map_err(CoreError::from)
    }

    pub async fn unregister_adapter(&self, id: &str) -> Result<(), CoreError> {
        self.inner.registry.unregister(id).await.map_err(CoreError::from)
    }

    pub async fn hot_reload_adapter(&self, adapter: Arc<dyn Adapter>) -> Result<(), CoreError> {
        self.inner
            .registry
            .hot_reload(adapter, self.publisher())
            .await
            .map_err(CoreError::from)
    }

    pub fn list_adapters(&self) -> Vec<String> {
        self.inner.registry.list_adapter_ids()
    }

    pub fn adapter_status(&self, id: &str) -> Option<AdapterStatus> {
        self.inner.registry.adapter_status(id)
    }

    /// Run a final WAL checkpoint. Call during graceful shutdown.
    pub async fn checkpoint(&self) -> Result<(), CoreError> {
        self.inner.shutting_down.store(true, Ordering::Release);
        self.inner.index.checkpoint_truncate().await?;
        Ok(())
    }
}
