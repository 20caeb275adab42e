//! Process configuration.
//!
//! Loaded once at startup into an immutable snapshot that is passed by
//! reference to the components that need it. Live reload is an explicit
//! [`Config::reload`] call producing a new snapshot, never an implicit
//! re-read.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::approval::ApprovalLevel;
use crate::providers::config::ProviderConfig;

const CONFIG_FILE: &str = "conductor.json";

const DEFAULT_MAX_TURNS: u32 = 25;
const DEFAULT_MAX_SPAWN_DEPTH: u32 = 3;
const DEFAULT_PHASE_BUDGET_SECS: u64 = 600;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 120;

/// Immutable configuration snapshot.
#[derive(Debug, Clone)]
pub struct Config {
    pub working_dir: PathBuf,
    pub approval_level: ApprovalLevel,
    /// Per-run turn budget.
    pub max_turns: u32,
    /// Maximum spawn-tree depth for child agent runs.
    pub max_spawn_depth: u32,
    /// Wall-clock budget for one phase's concurrent agent runs.
    pub phase_budget_secs: u64,
    pub command_timeout_secs: u64,
    /// Providers shipped with the process configuration. Read-only at
    /// runtime; user-added providers live in a separate store.
    pub system_providers: Vec<ProviderConfig>,
    /// Path of the persisted user provider list.
    pub user_provider_path: PathBuf,
}

/// On-disk shape of `conductor.json`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    approval_level: Option<u8>,
    max_turns: Option<u32>,
    max_spawn_depth: Option<u32>,
    phase_budget_secs: Option<u64>,
    command_timeout_secs: Option<u64>,
    #[serde(default)]
    providers: Vec<ProviderConfig>,
}

impl Config {
    /// Load configuration for a workspace. A missing `conductor.json`
    /// yields pure defaults.
    pub fn load(working_dir: impl Into<PathBuf>) -> Result<Self> {
        let working_dir = working_dir.into();
        let file = read_config_file(&working_dir.join(CONFIG_FILE))?;

        let approval_level = match file.approval_level {
            Some(ordinal) => ApprovalLevel::from_ordinal(ordinal)
                .with_context(|| format!("Invalid approval level {}", ordinal))?,
            None => ApprovalLevel::Medium,
        };

        let user_provider_path = dirs::config_dir()
            .unwrap_or_else(|| working_dir.join(".config"))
            .join("conductor")
            .join("providers.json");

        Ok(Self {
            working_dir,
            approval_level,
            max_turns: file.max_turns.unwrap_or(DEFAULT_MAX_TURNS),
            max_spawn_depth: file.max_spawn_depth.unwrap_or(DEFAULT_MAX_SPAWN_DEPTH),
            phase_budget_secs: file.phase_budget_secs.unwrap_or(DEFAULT_PHASE_BUDGET_SECS),
            command_timeout_secs: file
                .command_timeout_secs
                .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS),
            system_providers: file.providers,
            user_provider_path,
        })
    }

    /// Produce a fresh snapshot from the same workspace.
    pub fn reload(&self) -> Result<Self> {
        Self::load(self.working_dir.clone())
    }

    /// New snapshot with a different approval level.
    pub fn with_approval_level(&self, level: ApprovalLevel) -> Self {
        let mut config = self.clone();
        config.approval_level = level;
        config
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid config at {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();

        assert_eq!(config.approval_level, ApprovalLevel::Medium);
        assert_eq!(config.max_turns, DEFAULT_MAX_TURNS);
        assert_eq!(config.max_spawn_depth, DEFAULT_MAX_SPAWN_DEPTH);
        assert!(config.system_providers.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"approvalLevel": 1, "maxTurns": 10}"#,
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.approval_level, ApprovalLevel::Low);
        assert_eq!(config.max_turns, 10);
        assert_eq!(config.phase_budget_secs, DEFAULT_PHASE_BUDGET_SECS);
    }

    #[test]
    fn test_invalid_approval_level_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), r#"{"approvalLevel": 9}"#).unwrap();

        assert!(Config::load(dir.path()).is_err());
    }

    #[test]
    fn test_reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.max_turns, DEFAULT_MAX_TURNS);

        std::fs::write(dir.path().join(CONFIG_FILE), r#"{"maxTurns": 5}"#).unwrap();
        let reloaded = config.reload().unwrap();
        assert_eq!(reloaded.max_turns, 5);
        // The original snapshot is unchanged.
        assert_eq!(config.max_turns, DEFAULT_MAX_TURNS);
    }
}
