//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use dorkos_relay::prelude::*;
//! ```

// Core engine
pub use crate::core::{
    default_state_root, BoxFuture, CoreError, PublishOptions, RelayConfig, RelayConfigBuilder,
    RelayCore, RelayPublisher, Unsubscribe,
};

// Subjects and routing
pub use crate::subject::{CompiledMatcher, InvalidSubject, Subject};
pub use crate::subscription::{DispatchMode, Subscription, SubscriptionId};

// Envelope
pub use crate::envelope::{Envelope, EnvelopeStatus, PayloadConvention};

// Adapter runtime
pub use crate::adapter::{Adapter, AdapterError, AdapterKind, AdapterState, AdapterStatus};
pub use crate::manager::{AdapterEntryConfig, AdapterManager, AdaptersFile, ManagerError};
pub use crate::plugin::{PluginFactory, PluginLoader, PluginResolver, StaticPluginResolver};
pub use crate::registry::{AdapterRegistry, RegistryError};

// Utilities
pub use crate::util::EnvelopeId;
