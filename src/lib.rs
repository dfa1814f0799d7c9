//! # dorkos-relay - Subject-Addressed Pub/Sub Message Bus
//!
//! A persistent, crash-safe message bus for routing structured messages
//! between external channels (Telegram, webhooks) and in-process runtimes
//! (Claude Code agent sessions), addressed by dot-separated NATS-style
//! subjects with `*`/`>` wildcard subscriptions.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use dorkos_relay::prelude::*;
//! use bytes::Bytes;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CoreError> {
//!     let core = RelayCore::open(RelayConfig::under_state_root(default_state_root())).await?;
//!
//!     let _unsub = core.subscribe("relay.agent.*", DispatchMode::Serial, |envelope| {
//!         Box::pin(async move {
//!             println!("received on {}", envelope.subject.as_str());
//!         })
//!     })?;
//!
//!     core.publish("relay.agent.claude", Bytes::from_static(b"hi"), PublishOptions::default())
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! ## Core Engine
//! - [`core`] - `RelayCore` publish/subscribe engine, config, metrics
//! - [`subject`] - Subject validation and wildcard pattern matching
//! - [`envelope`] - The immutable routing unit
//! - [`subscription`] - In-process subscription records
//!
//! ## Durable Storage
//! - [`maildir`] - Crash-safe Maildir-style payload storage
//! - [`store`] - Embedded SQLite index, retry queue, run history
//!
//! ## Adapter Runtime
//! - [`registry`] - Concurrent adapter map with settled-result broadcast
//! - [`adapter`] - The `Adapter` trait and built-in Telegram/webhook/Claude Code adapters
//! - [`plugin`] - Third-party adapter resolution and instantiation
//! - [`manager`] - Config-driven adapter lifecycle and hot reload
//!
//! ## Infrastructure
//! - [`util`] - Shared identifier types

pub mod adapter;
pub mod core;
pub mod envelope;
pub mod maildir;
pub mod manager;
pub mod plugin;
pub mod registry;
pub mod store;
pub mod subject;
pub mod subscription;
pub mod util;

pub mod prelude;

// Re-export commonly used types
pub use adapter::{Adapter, AdapterError, AdapterKind, AdapterState, AdapterStatus};
pub use core::{
    default_state_root, BoxFuture, CoreError, Metrics, MetricsSnapshot, PublishOptions,
    RelayConfig, RelayConfigBuilder, RelayCore, RelayPublisher, Unsubscribe,
};
pub use envelope::{Envelope, EnvelopeStatus, PayloadConvention};
pub use manager::{AdapterEntryConfig, AdapterManager, AdaptersFile, ManagerError, RuntimeFactory};
pub use plugin::{PluginFactory, PluginLoadError, PluginLoader, PluginResolver, StaticPluginResolver};
pub use registry::{AdapterRegistry, RegistryError};
pub use subject::{compile_pattern, validate_subject, CompiledMatcher, InvalidSubject, Subject};
pub use subscription::{DispatchMode, Subscription, SubscriptionId};
pub use util::EnvelopeId;
