//! Plugin Loader error types (`spec.md` §4.7, §7).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginLoadError {
    #[error("plugin specifier {0} is a relative path; absolute paths or registered package names only")]
    RelativePathRejected(String),

    #[error("no plugin registered for specifier {0}")]
    NotFound(String),

    #[error("plugin {0} config failed schema validation: {1}")]
    InvalidConfig(String, String),

    #[error("plugin {0} createAdapter failed: {1}")]
    ConstructionFailed(String, String),
}
