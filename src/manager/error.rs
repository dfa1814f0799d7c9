//! Adapter Manager error types (`spec.md` §4.8).

use thiserror::Error;

use crate::plugin::PluginLoadError;
use crate::registry::RegistryError;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("failed to read adapters config at {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse adapters config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error(transparent)]
    Plugin(#[from] PluginLoadError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("unknown built-in adapter type for entry {0}")]
    UnknownAdapterType(String),
}
