//! RelayCore: the central publish/subscribe engine (`spec.md` §4.4).

mod config;
mod error;
mod metrics;
mod publisher;
#[allow(clippy::module_inception)]
mod relay_core;

pub use config::{default_state_root, RelayConfig, RelayConfigBuilder};
pub use error::CoreError;
pub use metrics::{Metrics, MetricsSnapshot};
pub use publisher::{RelayPublisher, Unsubscribe};
pub use relay_core::{BoxFuture, PublishOptions, RelayCore};
