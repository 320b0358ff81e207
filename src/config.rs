// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Model configuration.
//!
//! Configuration is a JSON document whose fields all have defaults, so `{}` is a valid config.
//! [`Settings`] is the validated form handed to models (regexes compiled, durations resolved).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::RegexSet;
use serde::{Deserialize, Serialize};

use crate::model::{Encoding, Resource};

const DEFAULT_ORPHAN_SETTLE_MS: u64 = 100;
const DEFAULT_AUTO_SAVE_DELAY_MS: u64 = 1000;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteDurability {
    /// Fast, best-effort persistence.
    ///
    /// - Writes a temp file and renames atomically into place.
    /// - Does not perform per-file fsync/sync.
    #[default]
    BestEffort,

    /// Slower, best-effort durability.
    ///
    /// Attempts to flush written file contents and rename operations to stable storage where
    /// possible. Exact guarantees are platform/filesystem-dependent.
    Durable,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoSaveMode {
    #[default]
    Off,
    AfterDelay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoSaveConfig {
    pub mode: AutoSaveMode,
    pub delay_ms: u64,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            mode: AutoSaveMode::Off,
            delay_ms: DEFAULT_AUTO_SAVE_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// Send the last known etag on write so concurrent external edits are detected.
    pub prevent_save_conflicts: bool,
    /// Delay before re-checking existence after a delete notification.
    pub orphan_settle_ms: u64,
    pub auto_save: AutoSaveConfig,
    /// Regexes matched against the resource; matching models refuse to save.
    pub readonly_patterns: Vec<String>,
    pub default_encoding: Encoding,
    pub durability: WriteDurability,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            prevent_save_conflicts: true,
            orphan_settle_ms: DEFAULT_ORPHAN_SETTLE_MS,
            auto_save: AutoSaveConfig::default(),
            readonly_patterns: Vec::new(),
            default_encoding: Encoding::Utf8,
            durability: WriteDurability::BestEffort,
        }
    }
}

impl ModelConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|source| ConfigError::Json { path: None, source })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: Some(path.to_path_buf()),
            source,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config at {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid config json: {source}")]
    Json {
        path: Option<PathBuf>,
        source: serde_json::Error,
    },
    #[error("invalid readonly pattern: {source}")]
    Pattern {
        #[source]
        source: regex::Error,
    },
}

/// Validated configuration shared by all models of a manager.
#[derive(Debug, Clone)]
pub struct Settings {
    config: ModelConfig,
    readonly: RegexSet,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config: ModelConfig::default(),
            readonly: RegexSet::empty(),
        }
    }
}

impl Settings {
    pub fn new(config: ModelConfig) -> Result<Self, ConfigError> {
        let readonly = RegexSet::new(&config.readonly_patterns)
            .map_err(|source| ConfigError::Pattern { source })?;
        Ok(Self { config, readonly })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn is_readonly(&self, resource: &Resource) -> bool {
        self.readonly.is_match(resource.as_str())
    }

    pub fn prevent_save_conflicts(&self) -> bool {
        self.config.prevent_save_conflicts
    }

    pub fn orphan_settle(&self) -> Duration {
        Duration::from_millis(self.config.orphan_settle_ms)
    }

    pub fn auto_save_delay(&self) -> Option<Duration> {
        match self.config.auto_save.mode {
            AutoSaveMode::Off => None,
            AutoSaveMode::AfterDelay => Some(Duration::from_millis(self.config.auto_save.delay_ms)),
        }
    }

    pub fn default_encoding(&self) -> Encoding {
        self.config.default_encoding
    }

    pub fn durability(&self) -> WriteDurability {
        self.config.durability
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{AutoSaveMode, ConfigError, ModelConfig, Settings, WriteDurability};
    use crate::model::{Encoding, Resource};

    #[test]
    fn empty_document_yields_defaults() {
        let config = ModelConfig::from_json_str("{}").unwrap();
        assert_eq!(config, ModelConfig::default());
        assert!(config.prevent_save_conflicts);
        assert_eq!(config.orphan_settle_ms, 100);
        assert_eq!(config.auto_save.mode, AutoSaveMode::Off);
    }

    #[test]
    fn parses_all_fields() {
        let config = ModelConfig::from_json_str(
            r#"{
  "prevent_save_conflicts": false,
  "orphan_settle_ms": 250,
  "auto_save": { "mode": "after_delay", "delay_ms": 500 },
  "readonly_patterns": ["\\.lock$"],
  "default_encoding": "utf16le",
  "durability": "durable"
}"#,
        )
        .unwrap();

        let settings = Settings::new(config).unwrap();
        assert!(!settings.prevent_save_conflicts());
        assert_eq!(settings.orphan_settle(), Duration::from_millis(250));
        assert_eq!(settings.auto_save_delay(), Some(Duration::from_millis(500)));
        assert_eq!(settings.default_encoding(), Encoding::Utf16Le);
        assert_eq!(settings.durability(), WriteDurability::Durable);
        assert!(settings.is_readonly(&Resource::new("/w/Cargo.lock").unwrap()));
        assert!(!settings.is_readonly(&Resource::new("/w/main.rs").unwrap()));
    }

    #[test]
    fn rejects_unknown_fields_and_bad_patterns() {
        match ModelConfig::from_json_str(r#"{ "nope": 1 }"#) {
            Err(ConfigError::Json { path: None, .. }) => {}
            other => panic!("expected json error, got: {other:?}"),
        }

        let config = ModelConfig {
            readonly_patterns: vec!["(".to_owned()],
            ..ModelConfig::default()
        };
        match Settings::new(config) {
            Err(ConfigError::Pattern { .. }) => {}
            other => panic!("expected pattern error, got: {other:?}"),
        }
    }
}
