//! Third-party adapter resolution and instantiation (`spec.md` §4.7).

mod error;
#[allow(clippy::module_inception)]
mod loader;

pub use error::PluginLoadError;
pub use loader::{PluginFactory, PluginLoader, PluginResolver, StaticPluginResolver};
