//! RelayCore configuration, following the teacher's `SystemConfig`
//! pattern: sensible defaults, a fluent builder, and explicit validation
//! (`airssys_rt::system::config::SystemConfig`).

use std::path::PathBuf;
use std::time::Duration;

/// Default bounded depth of a per-adapter dispatch inbox (`spec.md` §4.4
/// "Backpressure").
pub const DEFAULT_ADAPTER_INBOX_DEPTH: usize = 256;

/// Default age after which an orphaned `tmp/` entry is reaped on startup
/// (`spec.md` §4.2).
pub const DEFAULT_STALE_TMP_TTL: Duration = Duration::from_secs(5 * 60);

/// Default retention before a `cur/`-status message becomes eligible for
/// purge (implementation detail, not prescribed by `spec.md`; chosen
/// conservatively).
pub const DEFAULT_MESSAGE_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Top-level RelayCore configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// `<state_root>/relay/maildir`.
    pub maildir_root: PathBuf,
    /// `<state_root>/relay/relay.db`.
    pub sqlite_path: PathBuf,
    /// Bounded depth of each adapter's dispatch inbox.
    pub adapter_inbox_depth: usize,
    /// Age after which an orphaned `tmp/` entry is reaped at startup.
    pub stale_tmp_ttl: Duration,
    /// Retention window before a processed message is purged.
    pub message_retention: Duration,
}

impl RelayConfig {
    /// Derive the canonical layout (`spec.md` §6) from a single state
    /// root, typically `$RELAY_HOME`.
    pub fn under_state_root(state_root: impl Into<PathBuf>) -> Self {
        let root = state_root.into().join("relay");
        Self {
            maildir_root: root.join("maildir"),
            sqlite_path: root.join("relay.db"),
            adapter_inbox_depth: DEFAULT_ADAPTER_INBOX_DEPTH,
            stale_tmp_ttl: DEFAULT_STALE_TMP_TTL,
            message_retention: DEFAULT_MESSAGE_RETENTION,
        }
    }

    pub fn builder(state_root: impl Into<PathBuf>) -> RelayConfigBuilder {
        RelayConfigBuilder {
            config: Self::under_state_root(state_root),
        }
    }

    /// Validate configuration values, mirroring
    /// `airssys_rt::system::config::SystemConfig::validate`.
    pub fn validate(&self) -> Result<(), String> {
        if self.adapter_inbox_depth == 0 {
            return Err("adapter_inbox_depth must be > 0".to_string());
        }
        if self.stale_tmp_ttl.is_zero() {
            return Err("stale_tmp_ttl must be > 0".to_string());
        }
        Ok(())
    }
}

/// Fluent builder for [`RelayConfig`].
#[derive(Debug)]
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    pub fn adapter_inbox_depth(mut self, depth: usize) -> Self {
        self.config.adapter_inbox_depth = depth;
        self
    }

    pub fn stale_tmp_ttl(mut self, ttl: Duration) -> Self {
        self.config.stale_tmp_ttl = ttl;
        self
    }

    pub fn message_retention(mut self, retention: Duration) -> Self {
        self.config.message_retention = retention;
        self
    }

    pub fn build(self) -> Result<RelayConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Resolve `$RELAY_HOME`, falling back to an OS-appropriate user-data
/// directory (`spec.md` §6 "Environment inputs").
pub fn default_state_root() -> PathBuf {
    std::env::var_os("RELAY_HOME")
        .map(PathBuf::from)
        .or_else(|| dirs::data_dir().map(|d| d.join("dorkos")))
        .unwrap_or_else(|| PathBuf::from(".dorkos"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_spec_paths() {
        let config = RelayConfig::under_state_root("/var/lib/dorkos");
        assert_eq!(
            config.maildir_root,
            PathBuf::from("/var/lib/dorkos/relay/maildir")
        );
        assert_eq!(config.sqlite_path, PathBuf::from("/var/lib/dorkos/relay/relay.db"));
    }

    #[test]
    fn builder_rejects_zero_inbox_depth() {
        let result = RelayConfig::builder("/tmp/dorkos").adapter_inbox_depth(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_applies_overrides() {
        let config = RelayConfig::builder("/tmp/dorkos")
            .adapter_inbox_depth(10)
            .stale_tmp_ttl(Duration::from_secs(60))
            .build()
            .unwrap();
        assert_eq!(config.adapter_inbox_depth, 10);
        assert_eq!(config.stale_tmp_ttl, Duration::from_secs(60));
    }
}
