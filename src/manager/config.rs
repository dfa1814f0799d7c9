//! `adapters.json` schema types (`spec.md` §4.8).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One entry in the top-level adapters configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AdapterEntryConfig {
    Telegram {
        id: String,
        subject_prefix: String,
        display_name: String,
        bot_token: String,
        #[serde(default)]
        enabled: bool,
    },
    Webhook {
        id: String,
        subject_prefix: String,
        display_name: String,
        bind_addr: String,
        outbound_url: String,
        secret: String,
        #[serde(default)]
        previous_secret: Option<String>,
        #[serde(default)]
        enabled: bool,
    },
    ClaudeCode {
        id: String,
        subject_prefix: String,
        display_name: String,
        #[serde(default = "default_max_concurrent")]
        max_concurrent: usize,
        #[serde(default)]
        cwd: Option<String>,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        conversational: bool,
        #[serde(default = "default_run_deadline_secs")]
        run_deadline_secs: u64,
        #[serde(default)]
        enabled: bool,
    },
    Plugin {
        id: String,
        specifier: String,
        #[serde(default)]
        config: serde_json::Value,
        #[serde(default)]
        enabled: bool,
    },
}

impl AdapterEntryConfig {
    pub fn id(&self) -> &str {
        match self {
            Self::Telegram { id, .. }
            | Self::Webhook { id, .. }
            | Self::ClaudeCode { id, .. }
            | Self::Plugin { id, .. } => id,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            Self::Telegram { enabled, .. }
            | Self::Webhook { enabled, .. }
            | Self::ClaudeCode { enabled, .. }
            | Self::Plugin { enabled, .. } => *enabled,
        }
    }
}

fn default_max_concurrent() -> usize {
    3
}

/// Default runtime-adapter per-run deadline (`spec.md` §5), 10 minutes.
fn default_run_deadline_secs() -> u64 {
    600
}

/// The full `adapters.json` document: a flat list of entries keyed
/// internally by `id`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdaptersFile {
    #[serde(default)]
    pub adapters: Vec<AdapterEntryConfig>,
}

impl AdaptersFile {
    pub fn enabled_by_id(&self) -> HashMap<String, &AdapterEntryConfig> {
        self.adapters
            .iter()
            .filter(|entry| entry.enabled())
            .map(|entry| (entry.id().to_string(), entry))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_mixed_adapter_kinds() {
        let json = serde_json::json!({
            "adapters": [
                {"type": "telegram", "id": "tg", "subject_prefix": "relay.telegram", "display_name": "Telegram", "bot_token": "t", "enabled": true},
                {"type": "claude-code", "id": "cc", "subject_prefix": "relay.agent.claude", "display_name": "Claude Code", "enabled": true}
            ]
        });
        let file: AdaptersFile = serde_json::from_value(json).unwrap();
        assert_eq!(file.adapters.len(), 2);
        assert_eq!(file.enabled_by_id().len(), 2);
    }
}
