//! The Adapter Registry: owns the adapter map exclusively (`spec.md`
//! §4.5). Grounded in the teacher's `airssys_rt::registry::ActorRegistry`
//! — a concurrent id-keyed map with settled-result fan-out — adapted from
//! actor mailboxes to adapter `deliver()` calls.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Semaphore;

use super::error::RegistryError;
use crate::adapter::{Adapter, AdapterStatus};
use crate::core::RelayPublisher;
use crate::envelope::Envelope;

struct Entry {
    adapter: Arc<dyn Adapter>,
    /// Bounds this adapter's dispatch inbox (`spec.md` §4.4
    /// "Backpressure"). A `deliver()` call that can't acquire a permit is
    /// dropped rather than queued; the permit is released once the
    /// spawned delivery task finishes.
    inbox: Arc<Semaphore>,
}

/// Concurrent id → adapter map plus per-adapter inbox semaphores.
///
/// All mutation goes through `register`/`unregister`/`hot_reload`, which
/// is sufficient serialization for the invariants in `spec.md` §8 since
/// `DashMap` entries are independently locked and registration only ever
/// inserts after a successful `start()`.
pub struct AdapterRegistry {
    adapters: DashMap<String, Entry>,
    inbox_depth: usize,
}

impl AdapterRegistry {
    pub fn new(inbox_depth: usize) -> Self {
        Self {
            adapters: DashMap::new(),
            inbox_depth,
        }
    }

    /// Start `adapter` and, on success, add it to the map. On failure the
    /// adapter is never inserted and other adapters are unaffected
    /// (`spec.md` §4.5, invariant 5).
    pub async fn register(
        &self,
        adapter: Arc<dyn Adapter>,
        relay: RelayPublisher,
    ) -> Result<(), RegistryError> {
        let id = adapter.id().to_string();
        if self.adapters.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }

        adapter.start(relay).await.map_err(|e| {
            tracing::warn!(adapter_id = %id, error = %e, "adapter failed to start");
            e
        })?;

        self.adapters.insert(
            id,
            Entry {
                adapter,
                inbox: Arc::new(Semaphore::new(self.inbox_depth)),
            },
        );
        Ok(())
    }

    /// Remove `id` from the map first, then stop it, so no new `deliver()`
    /// calls race the shutdown (`spec.md` §4.5).
    pub async fn unregister(&self, id: &str) -> Result<(), RegistryError> {
        let (_, entry) = self
            .adapters
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        if let Err(e) = entry.adapter.stop().await {
            tracing::warn!(adapter_id = %id, error = %e, "adapter failed to stop cleanly");
        }
        Ok(())
    }

    /// Start-new-before-stop-old adapter swap (`spec.md` §4.5 "Hot
    /// reload"). No delivers are lost: the new instance is registered and
    /// receiving before the old instance's `stop()` is called.
    pub async fn hot_reload(
        &self,
        new_adapter: Arc<dyn Adapter>,
        relay: RelayPublisher,
    ) -> Result<(), RegistryError> {
        let id = new_adapter.id().to_string();
        let old = self.adapters.remove(&id).map(|(_, entry)| entry);

        new_adapter.start(relay).await?;
        self.adapters.insert(
            id.clone(),
            Entry {
                adapter: new_adapter,
                inbox: Arc::new(Semaphore::new(self.inbox_depth)),
            },
        );

        if let Some(old_entry) = old {
            if let Err(e) = old_entry.adapter.stop().await {
                tracing::warn!(adapter_id = %id, error = %e, "previous adapter instance failed to stop cleanly");
            }
        }
        Ok(())
    }

    /// Dispatch `envelope` to every adapter whose `subject_prefix` matches
    /// `subject`. A spawned `deliver()`'s own failure is settled-result
    /// isolated — one adapter's delivery error never blocks or propagates
    /// from another's (`spec.md` §4.5 `broadcast`). Inbox saturation is
    /// different: it is known before the task is ever spawned, so it is
    /// collected and surfaced synchronously to the caller as
    /// [`RegistryError::Backpressure`] (`spec.md` §4.6.3 step 1, §7, §8
    /// "Backpressure saturation").
    pub async fn broadcast(&self, subject: &str, envelope: Arc<Envelope>) -> Result<(), RegistryError> {
        let targets: Vec<(String, Arc<dyn Adapter>, Arc<Semaphore>)> = self
            .adapters
            .iter()
            .filter(|e| subject.starts_with(e.adapter.subject_prefix()))
            .map(|e| (e.key().clone(), e.adapter.clone(), e.inbox.clone()))
            .collect();

        let mut saturated: Option<String> = None;
        for (id, adapter, inbox) in targets {
            let Ok(permit) = inbox.try_acquire_owned() else {
                tracing::warn!(adapter_id = %id, "adapter inbox saturated, dropping dispatch");
                saturated.get_or_insert(id);
                continue;
            };
            let envelope = envelope.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = adapter.deliver(&envelope).await {
                    tracing::warn!(adapter_id = %id, error = %e, "adapter delivery failed");
                }
            });
        }

        match saturated {
            Some(id) => Err(RegistryError::Backpressure(id)),
            None => Ok(()),
        }
    }

    pub fn list_adapter_ids(&self) -> Vec<String> {
        self.adapters.iter().map(|e| e.key().clone()).collect()
    }

    pub fn adapter_status(&self, id: &str) -> Option<AdapterStatus> {
        self.adapters.get(id).map(|e| e.adapter.get_status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterError, AdapterKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubAdapter {
        id: String,
        prefix: String,
        delivered: Arc<AtomicUsize>,
        fail_start: bool,
    }

    #[async_trait]
    impl Adapter for StubAdapter {
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
            if self.fail_start {
                return Err(AdapterError::StartFailed {
                    adapter_id: self.id.clone(),
                    reason: "stub failure".to_string(),
                });
            }
            Ok(())
        }

        async fn stop(&self) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn deliver(&self, _envelope: &Envelope) -> Result<(), AdapterError> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn get_status(&self) -> AdapterStatus {
            AdapterStatus::running()
        }
    }

    fn test_envelope(subject: &str) -> Arc<Envelope> {
        Arc::new(Envelope::new(
            crate::subject::Subject::parse(subject).unwrap(),
            bytes::Bytes::new(),
        ))
    }

    #[tokio::test]
    async fn failed_start_leaves_registry_empty() {
        let registry = AdapterRegistry::new(8);
        let adapter = Arc::new(StubAdapter {
            id: "a".into(),
            prefix: "relay.a".into(),
            delivered: Arc::new(AtomicUsize::new(0)),
            fail_start: true,
        });
        let result = registry.register(adapter, RelayPublisher::disconnected()).await;
        assert!(result.is_err());
        assert!(registry.list_adapter_ids().is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_only_prefix_matching_adapters() {
        let registry = AdapterRegistry::new(8);
        let delivered_a = Arc::new(AtomicUsize::new(0));
        let delivered_b = Arc::new(AtomicUsize::new(0));

        registry
            .register(
                Arc::new(StubAdapter {
                    id: "a".into(),
                    prefix: "relay.a".into(),
                    delivered: delivered_a.clone(),
                    fail_start: false,
                }),
                RelayPublisher::disconnected(),
            )
            .await
            .unwrap();
        registry
            .register(
                Arc::new(StubAdapter {
                    id: "b".into(),
                    prefix: "relay.b".into(),
                    delivered: delivered_b.clone(),
                    fail_start: false,
                }),
                RelayPublisher::disconnected(),
            )
            .await
            .unwrap();

        registry
            .broadcast("relay.a.claude", test_envelope("relay.a.claude"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(delivered_a.load(Ordering::SeqCst), 1);
        assert_eq!(delivered_b.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn broadcast_surfaces_backpressure_when_inbox_saturated() {
        let registry = AdapterRegistry::new(0);
        registry
            .register(
                Arc::new(StubAdapter {
                    id: "a".into(),
                    prefix: "relay.a".into(),
                    delivered: Arc::new(AtomicUsize::new(0)),
                    fail_start: false,
                }),
                RelayPublisher::disconnected(),
            )
            .await
            .unwrap();

        let result = registry
            .broadcast("relay.a.claude", test_envelope("relay.a.claude"))
            .await;
        assert!(matches!(result, Err(RegistryError::Backpressure(id)) if id == "a"));
    }

    #[tokio::test]
    async fn unregister_removes_before_stop_and_rejects_unknown() {
        let registry = AdapterRegistry::new(8);
        registry
            .register(
                Arc::new(StubAdapter {
                    id: "a".into(),
                    prefix: "relay.a".into(),
                    delivered: Arc::new(AtomicUsize::new(0)),
                    fail_start: false,
                }),
                RelayPublisher::disconnected(),
            )
            .await
            .unwrap();
        registry.unregister("a").await.unwrap();
        assert!(registry.list_adapter_ids().is_empty());
        assert!(matches!(
            registry.unregister("a").await,
            Err(RegistryError::NotFound(_))
        ));
    }
}
