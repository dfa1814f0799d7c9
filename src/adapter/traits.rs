//! The polymorphic adapter contract (`spec.md` §4.6).
//!
//! Deliberately a single trait with an informational `adapter_kind()` tag
//! rather than an `ExternalAdapter`/`RuntimeAdapter` hierarchy — `spec.md`
//! §9 "Tagged adapters vs hierarchy" calls this out explicitly so the
//! [`crate::registry::AdapterRegistry`] stays generic over one object-safe
//! trait.

use async_trait::async_trait;

use super::error::AdapterError;
use super::status::AdapterStatus;
use crate::core::RelayPublisher;
use crate::envelope::Envelope;

/// Informational tag distinguishing adapters that bridge to an external
/// channel from adapters that bridge into an in-process runtime. Carries
/// no behavioral weight in the registry — it exists purely for status
/// reporting and operator dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    External,
    Runtime,
}

/// An adapter bridges Relay to an external channel (Telegram, webhook) or
/// to an in-process runtime (Claude Code agent sessions).
///
/// Implementations must be `Send + Sync` so a single instance can be
/// shared behind the registry's concurrent map. `stop()` must be
/// idempotent and safe to call while `start()` is still in flight
/// (`spec.md` §4.6).
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Stable identifier, unique within the registry.
    fn id(&self) -> &str;

    /// Routing filter: adapters receive `deliver()` calls only for
    /// subjects whose prefix matches this string (`spec.md` §4.5
    /// `broadcast`).
    fn subject_prefix(&self) -> &str;

    /// Human-readable label for operator-facing status output.
    fn display_name(&self) -> &str;

    /// Informational external/runtime tag; defaults to `External` since
    /// most adapters bridge to an external channel.
    fn adapter_kind(&self) -> AdapterKind {
        AdapterKind::External
    }

    /// Acquire resources, open connections, register subscriptions.
    async fn start(&self, relay: RelayPublisher) -> Result<(), AdapterError>;

    /// Drain in-flight work and close resources. Must be idempotent.
    async fn stop(&self) -> Result<(), AdapterError>;

    /// Route `envelope` out of the bus (external adapters) or into an
    /// agent turn (runtime adapters).
    async fn deliver(&self, envelope: &Envelope) -> Result<(), AdapterError>;

    /// Point-in-time status snapshot.
    fn get_status(&self) -> AdapterStatus;
}
