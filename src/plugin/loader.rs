//! Third-party adapter resolution and instantiation (`spec.md` §4.7).
//!
//! A host language with `require()`/dynamic `import()` can load arbitrary
//! code named by a package specifier at runtime; Rust cannot do this
//! safely without `unsafe` dylib loading, so this is realized as a
//! factory registry behind a swappable [`PluginResolver`] instead — the
//! same "registered name resolves to a constructor" shape, minus the
//! unsafe FFI boundary. A resolver backed by `libloading` could implement
//! this trait later without changing callers.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use super::error::PluginLoadError;
use crate::adapter::Adapter;

/// A loaded plugin's constructor, analogous to `spec.md` §4.7's
/// `{name, version, createAdapter, configSchema?}` default export shape.
pub trait PluginFactory: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;

    /// Validate `config` against this plugin's schema, if it has one.
    /// Plugins without a schema accept any object.
    fn validate_config(&self, _config: &serde_json::Value) -> Result<(), String> {
        Ok(())
    }

    fn create_adapter(&self, config: serde_json::Value) -> Result<Arc<dyn Adapter>, String>;
}

/// Resolves a specifier (absolute path or registered package name) to a
/// [`PluginFactory`]. Relative paths must be rejected before reaching a
/// resolver (`spec.md` §4.7 "Security posture").
pub trait PluginResolver: Send + Sync {
    fn resolve(&self, specifier: &str) -> Result<Arc<dyn PluginFactory>, PluginLoadError>;
}

/// A resolver backed by a static, host-registered map of specifier →
/// factory. This is the only resolver the in-process plugin ecosystem
/// needs today: plugins are Rust crates linked into the binary and
/// registered at startup, not discovered at runtime.
#[derive(Default)]
pub struct StaticPluginResolver {
    factories: HashMap<String, Arc<dyn PluginFactory>>,
}

impl StaticPluginResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, specifier: impl Into<String>, factory: Arc<dyn PluginFactory>) -> Self {
        self.factories.insert(specifier.into(), factory);
        self
    }
}

impl PluginResolver for StaticPluginResolver {
    fn resolve(&self, specifier: &str) -> Result<Arc<dyn PluginFactory>, PluginLoadError> {
        self.factories
            .get(specifier)
            .cloned()
            .ok_or_else(|| PluginLoadError::NotFound(specifier.to_string()))
    }
}

fn is_relative_specifier(specifier: &str) -> bool {
    let path = std::path::Path::new(specifier);
    !path.is_absolute() && (specifier.starts_with('.') || specifier.contains('/'))
}

/// Loads and caches plugin factories by specifier (`spec.md` §4.7
/// "Modules are cached by specifier; code reloads require process
/// restart").
pub struct PluginLoader {
    resolver: Box<dyn PluginResolver>,
    cache: DashMap<String, Arc<dyn PluginFactory>>,
}

impl PluginLoader {
    pub fn new(resolver: Box<dyn PluginResolver>) -> Self {
        Self {
            resolver,
            cache: DashMap::new(),
        }
    }

    /// Resolve `specifier` to a cached (or newly resolved) factory.
    pub fn load(&self, specifier: &str) -> Result<Arc<dyn PluginFactory>, PluginLoadError> {
        if is_relative_specifier(specifier) {
            return Err(PluginLoadError::RelativePathRejected(specifier.to_string()));
        }
        if let Some(cached) = self.cache.get(specifier) {
            return Ok(cached.clone());
        }
        let factory = self.resolver.resolve(specifier)?;
        self.cache.insert(specifier.to_string(), factory.clone());
        Ok(factory)
    }

    /// Resolve `specifier`, validate `config`, and construct an adapter
    /// instance.
    pub fn instantiate(
        &self,
        specifier: &str,
        config: serde_json::Value,
    ) -> Result<Arc<dyn Adapter>, PluginLoadError> {
        let factory = self.load(specifier)?;
        factory
            .validate_config(&config)
            .map_err(|reason| PluginLoadError::InvalidConfig(specifier.to_string(), reason))?;
        factory
            .create_adapter(config)
            .map_err(|reason| PluginLoadError::ConstructionFailed(specifier.to_string(), reason))
    }
}
