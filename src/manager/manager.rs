//! Adapter Manager: loads `adapters.json`, constructs and registers
//! adapters against a [`RelayCore`], and hot-reloads the running set when
//! the file changes on disk (`spec.md` §4.8).
//!
//! Grounded in the teacher's `airssys_rt::system::ActorSystem` startup
//! sequencing (build from config, register, watch for changes) adapted
//! from actor definitions to adapter config entries. File-change
//! debouncing mirrors the common `notify` + event-coalescing idiom used
//! across the wider example corpus for watching config files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::config::{AdapterEntryConfig, AdaptersFile};
use super::error::ManagerError;
use crate::adapter::claude_code::{AgentSessionRuntime, ClaudeCodeAdapter, ClaudeCodeConfig};
use crate::adapter::telegram::{TelegramAdapter, TelegramConfig};
use crate::adapter::webhook::{WebhookAdapter, WebhookConfig, WebhookSecrets};
use crate::adapter::Adapter;
use crate::core::RelayCore;
use crate::plugin::PluginLoader;

/// Debounce window for config-file write events (`spec.md` §4.8
/// "Hot reload" — coalesce the burst of events a single `mv`/`write`
/// produces before reconciling).
const DEBOUNCE: Duration = Duration::from_millis(150);

/// Constructs a built-in adapter instance from an [`AgentSessionRuntime`]
/// factory, since the Claude Code adapter needs a runtime binding the
/// manager cannot default-construct on its own.
pub type RuntimeFactory = Arc<dyn Fn() -> Arc<dyn AgentSessionRuntime> + Send + Sync>;

/// Owns the reconciliation loop between `adapters.json` and the running
/// [`crate::registry::AdapterRegistry`] behind `core`.
pub struct AdapterManager {
    core: RelayCore,
    config_path: PathBuf,
    plugin_loader: PluginLoader,
    runtime_factory: Option<RuntimeFactory>,
    watcher_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AdapterManager {
    pub fn new(core: RelayCore, config_path: impl Into<PathBuf>, plugin_loader: PluginLoader) -> Self {
        Self {
            core,
            config_path: config_path.into(),
            plugin_loader,
            runtime_factory: None,
            watcher_handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Register the constructor used to bind `claude-code` entries to a
    /// live [`AgentSessionRuntime`]. Entries of that type are skipped with
    /// a warning if no factory has been set.
    pub fn with_runtime_factory(mut self, factory: RuntimeFactory) -> Self {
        self.runtime_factory = Some(factory);
        self
    }

    /// Read `adapters.json`, construct every enabled entry, and register
    /// each against the core's adapter registry.
    pub async fn load(&self) -> Result<(), ManagerError> {
        let file = self.read_config().await?;
        for entry in file.adapters.iter().filter(|e| e.enabled()) {
            match self.build_adapter(entry) {
                Ok(adapter) => {
                    if let Err(e) = self.core.register_adapter(adapter).await {
                        tracing::warn!(adapter_id = %entry.id(), error = %e, "failed to register adapter");
                    }
                }
                Err(e) => {
                    tracing::warn!(adapter_id = %entry.id(), error = %e, "failed to construct adapter, skipping");
                }
            }
        }
        Ok(())
    }

    async fn read_config(&self) -> Result<AdaptersFile, ManagerError> {
        let bytes = tokio::fs::read(&self.config_path)
            .await
            .map_err(|e| ManagerError::ConfigRead {
                path: self.config_path.display().to_string(),
                source: e,
            })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn build_adapter(&self, entry: &AdapterEntryConfig) -> Result<Arc<dyn Adapter>, ManagerError> {
        match entry {
            AdapterEntryConfig::Telegram {
                id,
                subject_prefix,
                display_name,
                bot_token,
                ..
            } => Ok(Arc::new(TelegramAdapter::new(TelegramConfig {
                id: id.clone(),
                subject_prefix: subject_prefix.clone(),
                display_name: display_name.clone(),
                bot_token: bot_token.clone(),
            }))),
            AdapterEntryConfig::Webhook {
                id,
                subject_prefix,
                display_name,
                bind_addr,
                outbound_url,
                secret,
                previous_secret,
                ..
            } => {
                let bind_addr = bind_addr
                    .parse()
                    .map_err(|_| ManagerError::UnknownAdapterType(format!("{id}: invalid bind_addr")))?;
                Ok(Arc::new(WebhookAdapter::new(
                    WebhookConfig {
                        id: id.clone(),
                        subject_prefix: subject_prefix.clone(),
                        display_name: display_name.clone(),
                        bind_addr,
                        secrets: WebhookSecrets {
                            current: secret.clone(),
                            previous: previous_secret.clone(),
                        },
                        outbound_url: outbound_url.clone(),
                    },
                    self.core.index_store(),
                    self.core.maildir_store(),
                )))
            }
            AdapterEntryConfig::ClaudeCode {
                id,
                subject_prefix,
                display_name,
                max_concurrent,
                cwd,
                model,
                conversational,
                run_deadline_secs,
                ..
            } => {
                let Some(factory) = &self.runtime_factory else {
                    return Err(ManagerError::UnknownAdapterType(format!(
                        "{id}: no agent-session runtime bound to this manager"
                    )));
                };
                Ok(Arc::new(ClaudeCodeAdapter::new(
                    ClaudeCodeConfig {
                        id: id.clone(),
                        subject_prefix: subject_prefix.clone(),
                        display_name: display_name.clone(),
                        max_concurrent: *max_concurrent,
                        default_cwd: cwd.clone(),
                        default_model: model.clone(),
                        conversational: *conversational,
                        stop_grace: Duration::from_secs(30),
                        run_deadline: Duration::from_secs(*run_deadline_secs),
                    },
                    factory(),
                    self.core.index_store(),
                )))
            }
            AdapterEntryConfig::Plugin { id, specifier, config, .. } => self
                .plugin_loader
                .instantiate(specifier, config.clone())
                .map_err(|e| {
                    tracing::warn!(adapter_id = %id, error = %e, "plugin instantiation failed");
                    ManagerError::Plugin(e)
                }),
        }
    }

    /// Spawn a background task watching `adapters.json` for changes and
    /// reconciling the running adapter set (`spec.md` §4.8 "Hot reload").
    /// Additions and modified entries are (re)registered via
    /// `hot_reload`/`register`; entries removed from the file or disabled
    /// are unregistered. One slow or failing adapter never blocks
    /// reconciliation of the others.
    pub async fn watch(self: &Arc<Self>) -> Result<(), ManagerError> {
        let (tx, mut rx) = mpsc::channel(16);
        let config_path = self.config_path.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if res.is_ok() {
                let _ = tx.blocking_send(());
            }
        })
        .map_err(|e| ManagerError::ConfigRead {
            path: config_path.display().to_string(),
            source: std::io::Error::other(e.to_string()),
        })?;

        let watch_dir = self
            .config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| ManagerError::ConfigRead {
                path: watch_dir.display().to_string(),
                source: std::io::Error::other(e.to_string()),
            })?;

        let manager = self.clone();
        let handle = tokio::spawn(async move {
            // `watcher` must outlive the loop or the OS-level handle drops.
            let _watcher = watcher;
            loop {
                if rx.recv().await.is_none() {
                    return;
                }
                // Coalesce the burst of events a single write/rename
                // produces into one reconciliation pass.
                tokio::time::sleep(DEBOUNCE).await;
                while rx.try_recv().is_ok() {}

                if let Err(e) = manager.reconcile().await {
                    tracing::warn!(error = %e, "adapters.json reconciliation failed");
                }
            }
        });
        *self.watcher_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Diff the on-disk config against the currently registered adapter
    /// ids and apply `register`/`hot_reload`/`unregister` accordingly.
    async fn reconcile(&self) -> Result<(), ManagerError> {
        let file = self.read_config().await?;
        let desired: HashMap<String, &AdapterEntryConfig> = file.enabled_by_id();
        let running: std::collections::HashSet<String> = self.core.list_adapters().into_iter().collect();

        for (id, entry) in &desired {
            match self.build_adapter(entry) {
                Ok(adapter) => {
                    let result = if running.contains(id) {
                        self.core.hot_reload_adapter(adapter).await
                    } else {
                        self.core.register_adapter(adapter).await
                    };
                    if let Err(e) = result {
                        tracing::warn!(adapter_id = %id, error = %e, "failed to apply adapter change");
                    }
                }
                Err(e) => {
                    tracing::warn!(adapter_id = %id, error = %e, "failed to construct adapter during reconcile");
                }
            }
        }

        let desired_ids: std::collections::HashSet<String> = desired.keys().cloned().collect();
        for id in running.difference(&desired_ids) {
            if let Err(e) = self.core.unregister_adapter(id).await {
                tracing::warn!(adapter_id = %id, error = %e, "failed to unregister removed adapter");
            }
        }

        Ok(())
    }

    /// Stop the config watcher and every registered adapter. Each stop is
    /// driven independently so a single slow adapter cannot block the
    /// others from shutting down (`spec.md` §4.8 "Graceful shutdown").
    pub async fn shutdown(&self) {
        if let Some(handle) = self.watcher_handle.lock().await.take() {
            handle.abort();
        }

        let ids = self.core.list_adapters();
        let stops = ids.into_iter().map(|id| {
            let core = self.core.clone();
            tokio::spawn(async move {
                if let Err(e) = core.unregister_adapter(&id).await {
                    tracing::warn!(adapter_id = %id, error = %e, "adapter failed to stop during shutdown");
                }
            })
        });
        for stop in stops {
            let _ = stop.await;
        }

        if let Err(e) = self.core.checkpoint().await {
            tracing::warn!(error = %e, "final checkpoint failed during shutdown");
        }
    }
}
