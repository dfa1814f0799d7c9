//! Adapter status reporting (`spec.md` §3 "Adapter status").

use chrono::{DateTime, Utc};

/// Lifecycle state of an adapter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Errored,
}

/// Point-in-time status snapshot returned by [`super::Adapter::get_status`].
#[derive(Debug, Clone)]
pub struct AdapterStatus {
    pub state: AdapterState,
    pub since: DateTime<Utc>,
    pub last_error: Option<String>,
    /// In-flight operation count; meaningful chiefly for runtime adapters
    /// (`spec.md` §4.6.3's permit gate), `0` for adapters that do not
    /// track concurrency.
    pub in_flight: usize,
}

impl AdapterStatus {
    pub fn stopped() -> Self {
        Self {
            state: AdapterState::Stopped,
            since: Utc::now(),
            last_error: None,
            in_flight: 0,
        }
    }

    pub fn running() -> Self {
        Self {
            state: AdapterState::Running,
            since: Utc::now(),
            last_error: None,
            in_flight: 0,
        }
    }

    pub fn errored(reason: impl Into<String>) -> Self {
        Self {
            state: AdapterState::Errored,
            since: Utc::now(),
            last_error: Some(reason.into()),
            in_flight: 0,
        }
    }

    pub fn with_in_flight(mut self, in_flight: usize) -> Self {
        self.in_flight = in_flight;
        self
    }
}
