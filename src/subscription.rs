//! In-process subscriptions (`spec.md` §3 "Subscription").

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::subject::CompiledMatcher;

/// Unique identifier for a subscription, used internally by
/// [`crate::core::RelayCore`] to locate and remove an entry when its
/// disposer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a subscriber's handler must be awaited before the next
/// subscriber in registration order runs (`spec.md` §4.4 concurrency).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Default: the handler's future is spawned and its rejection logged;
    /// RelayCore does not wait on it.
    FireAndForget,
    /// `serial: true`: RelayCore awaits the handler before dispatching to
    /// the next subscriber for this envelope.
    Serial,
}

/// An in-process subscription: a compiled pattern plus the metadata needed
/// to route and later remove it. The handler itself is stored by
/// [`crate::core::RelayCore`], not here — this type is the registry-side
/// record (`spec.md` §3 `(id, pattern, handler, adapterId?, createdAt)`
/// minus the handler, kept out of this struct because it is not `Clone`
/// or `Debug` in the general case).
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub pattern: CompiledMatcher,
    pub adapter_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub dispatch_mode: DispatchMode,
}

impl Subscription {
    pub(crate) fn new(pattern: CompiledMatcher, dispatch_mode: DispatchMode) -> Self {
        Self {
            id: SubscriptionId::new(),
            pattern,
            adapter_id: None,
            created_at: Utc::now(),
            dispatch_mode,
        }
    }

    pub(crate) fn for_adapter(
        pattern: CompiledMatcher,
        adapter_id: impl Into<String>,
    ) -> Self {
        Self {
            id: SubscriptionId::new(),
            pattern,
            adapter_id: Some(adapter_id.into()),
            created_at: Utc::now(),
            dispatch_mode: DispatchMode::FireAndForget,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::compile_pattern;

    #[test]
    fn subscription_ids_are_unique() {
        let pattern = compile_pattern("relay.agent.*").unwrap();
        let a = Subscription::new(pattern.clone(), DispatchMode::FireAndForget);
        let b = Subscription::new(pattern, DispatchMode::FireAndForget);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn adapter_subscription_carries_adapter_id() {
        let pattern = compile_pattern("relay.telegram.>").unwrap();
        let sub = Subscription::for_adapter(pattern, "telegram-main");
        assert_eq!(sub.adapter_id.as_deref(), Some("telegram-main"));
    }
}
