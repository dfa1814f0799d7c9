//! The narrow capability handed to handlers and adapters (`spec.md` §4.4
//! ownership: "Handlers and adapters hold weak references to RelayCore via
//! a narrow `RelayPublisher` capability (publish + subscribe only)").

use std::sync::Weak;

use bytes::Bytes;

use super::error::CoreError;
use super::relay_core::{Inner, PublishOptions};
use super::metrics::MetricsSnapshot;
use crate::subscription::{DispatchMode, SubscriptionId};
use crate::util::EnvelopeId;

/// A `Weak`-backed, publish/subscribe-only view of [`super::RelayCore`].
///
/// Cloning is cheap. Once the owning `RelayCore` has been dropped, every
/// method becomes a [`CoreError::ShuttingDown`] rather than panicking —
/// adapters routinely outlive a brief shutdown window while draining.
#[derive(Clone)]
pub struct RelayPublisher {
    inner: Weak<Inner>,
}

impl RelayPublisher {
    pub(crate) fn new(inner: Weak<Inner>) -> Self {
        Self { inner }
    }

    /// A handle with no backing core, useful as a placeholder in tests
    /// that exercise adapter lifecycle without a running RelayCore.
    pub fn disconnected() -> Self {
        Self { inner: Weak::new() }
    }

    fn upgrade(&self) -> Result<std::sync::Arc<Inner>, CoreError> {
        self.inner.upgrade().ok_or(CoreError::ShuttingDown)
    }

    pub async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        opts: PublishOptions,
    ) -> Result<EnvelopeId, CoreError> {
        let inner = self.upgrade()?;
        inner.publish(subject, payload, opts).await
    }

    pub async fn publish_ephemeral(&self, subject: &str, payload: Bytes) -> Result<(), CoreError> {
        let inner = self.upgrade()?;
        inner.publish_ephemeral(subject, payload).await
    }

    pub fn subscribe<F>(
        &self,
        pattern: &str,
        dispatch_mode: DispatchMode,
        handler: F,
    ) -> Result<Unsubscribe, CoreError>
    where
        F: Fn(crate::envelope::Envelope) -> super::relay_core::BoxFuture
            + Send
            + Sync
            + 'static,
    {
        let inner = self.upgrade()?;
        inner.subscribe(pattern, dispatch_mode, handler)
    }

    pub fn metrics(&self) -> Result<MetricsSnapshot, CoreError> {
        let inner = self.upgrade()?;
        Ok(inner.metrics.snapshot())
    }
}

/// Disposer returned from [`RelayPublisher::subscribe`]. Dropping it does
/// nothing; callers must invoke it explicitly. Safe and idempotent to call
/// after the owning RelayCore has already shut down.
pub struct Unsubscribe {
    inner: Weak<Inner>,
    id: SubscriptionId,
}

impl Unsubscribe {
    pub(crate) fn new(inner: Weak<Inner>, id: SubscriptionId) -> Self {
        Self { inner, id }
    }

    pub fn call(self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.subscriptions.lock().retain(|(sub, _)| sub.id != self.id);
        }
    }
}
