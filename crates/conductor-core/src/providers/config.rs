//! Provider configuration.
//!
//! Two configuration sets exist: system entries sourced from process
//! configuration (immutable at runtime) and user entries persisted as a
//! JSON list (mutable via add/remove). A user entry with the same name
//! as a system entry overrides it in the merged view.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Where a provider entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    System,
    User,
}

/// Transport configuration for a provider connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum ProviderTransport {
    /// Spawn a local process and speak newline-delimited JSON-RPC over
    /// its stdio.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
}

/// One configured provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    /// Unique key in the merged view.
    pub name: String,
    #[serde(flatten)]
    pub transport: ProviderTransport,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub auto_connect: bool,
    pub added_by: ConfigSource,
    pub added_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl ProviderConfig {
    pub fn stdio(
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        added_by: ConfigSource,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            transport: ProviderTransport::Stdio {
                command: command.into(),
                args,
                env: HashMap::new(),
            },
            enabled: true,
            auto_connect: false,
            added_by,
            added_at: Utc::now(),
        }
    }

    pub fn transport_kind(&self) -> &'static str {
        match self.transport {
            ProviderTransport::Stdio { .. } => "stdio",
        }
    }
}

/// Merge system and user entries by name; user overrides system. Order
/// is system-first, stable by name within each set.
pub fn merge_configs(system: &[ProviderConfig], user: &[ProviderConfig]) -> Vec<ProviderConfig> {
    let mut merged: Vec<ProviderConfig> = Vec::new();

    for config in system {
        if let Some(user_override) = user.iter().find(|u| u.name == config.name) {
            merged.push(user_override.clone());
        } else {
            merged.push(config.clone());
        }
    }

    for config in user {
        if !system.iter().any(|s| s.name == config.name) {
            merged.push(config.clone());
        }
    }

    merged.sort_by(|a, b| a.name.cmp(&b.name));
    merged
}

/// Merged view restricted to enabled entries.
pub fn merged_enabled(system: &[ProviderConfig], user: &[ProviderConfig]) -> Vec<ProviderConfig> {
    merge_configs(system, user)
        .into_iter()
        .filter(|c| c.enabled)
        .collect()
}

/// Persisted store for user-added provider entries.
pub struct UserProviderStore {
    path: PathBuf,
}

impl UserProviderStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted list. A missing file is an empty list, not an
    /// error.
    pub async fn load(&self) -> Result<Vec<ProviderConfig>> {
        if !self.path.exists() {
            tracing::debug!("No provider store at {:?}", self.path);
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {:?}", self.path))?;

        let configs: Vec<ProviderConfig> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", self.path))?;

        Ok(configs)
    }

    /// Write the full list back, creating parent directories as needed.
    pub async fn save(&self, configs: &[ProviderConfig]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let content = serde_json::to_string_pretty(configs)?;
        tokio::fs::write(&self.path, content)
            .await
            .with_context(|| format!("Failed to write {:?}", self.path))?;

        tracing::debug!("Saved {} provider entries to {:?}", configs.len(), self.path);
        Ok(())
    }
}
