//! Adapter-facing error types (`spec.md` §7).

use thiserror::Error;

/// Any error an adapter or the registry surfaces around an adapter's
/// lifecycle or delivery. Isolated: never propagates out of
/// [`crate::registry::AdapterRegistry::broadcast`] (`spec.md` §4.5, §7
/// `AdapterError`).
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("adapter {adapter_id} failed to start: {reason}")]
    StartFailed { adapter_id: String, reason: String },

    #[error("adapter {adapter_id} failed to stop cleanly: {reason}")]
    StopFailed { adapter_id: String, reason: String },

    #[error("adapter {adapter_id} failed to deliver envelope: {reason}")]
    DeliveryFailed { adapter_id: String, reason: String },

    #[error("adapter {0} is draining after stop(); reject and do not retry here")]
    AdapterStopping(String),

    #[error("adapter {adapter_id} backpressure: {resource} saturated")]
    Backpressure { adapter_id: String, resource: String },

    #[error("adapter {adapter_id} start() exceeded its deadline")]
    StartTimeout { adapter_id: String },
}

impl AdapterError {
    /// Whether the caller should redirect rather than retry against the
    /// same adapter instance (`spec.md` §7 `AdapterStopping`).
    pub fn should_redirect(&self) -> bool {
        matches!(self, AdapterError::AdapterStopping(_))
    }
}
