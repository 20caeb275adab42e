//! Provider connection manager.
//!
//! Owns the merged system/user configuration and at most one live
//! connection per provider name. Connect/disconnect on different names
//! may run concurrently; operations on the same name are serialized
//! through a per-name lock so a connect and a disconnect can never race
//! on one entry.

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use super::client::ProviderClient;
use super::config::{merged_enabled, ConfigSource, ProviderConfig, UserProviderStore};
use super::protocol::ProviderToolResult;
use super::provider_tool_name;
use crate::ai::types::ToolDefinition;

/// Per-provider status for callers (UI, diagnostics).
#[derive(Debug, Clone)]
pub struct ProviderStatus {
    pub name: String,
    pub transport_kind: String,
    pub source: ConfigSource,
    pub connected: bool,
    pub tool_count: usize,
    pub resource_count: usize,
    /// Last connection or catalog error, if any. Absence of a
    /// connection with no error means never connected or explicitly
    /// disconnected, not unreachable.
    pub error: Option<String>,
}

pub struct ProviderManager {
    /// System entries from process configuration; immutable at runtime.
    system: Vec<ProviderConfig>,
    /// User entries; persisted through `store`.
    user: RwLock<Vec<ProviderConfig>>,
    store: UserProviderStore,
    /// Live connections keyed by provider name.
    connections: RwLock<HashMap<String, Arc<ProviderClient>>>,
    /// Last error per provider name.
    last_errors: RwLock<HashMap<String, String>>,
    /// Per-name operation locks (serialize connect/disconnect per entry).
    op_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    working_dir: PathBuf,
}

impl ProviderManager {
    pub fn new(system: Vec<ProviderConfig>, store: UserProviderStore, working_dir: PathBuf) -> Self {
        Self {
            system,
            user: RwLock::new(Vec::new()),
            store,
            connections: RwLock::new(HashMap::new()),
            last_errors: RwLock::new(HashMap::new()),
            op_locks: Mutex::new(HashMap::new()),
            working_dir,
        }
    }

    /// Load persisted user entries. Call once at startup.
    pub async fn load_user_config(&self) -> Result<()> {
        let configs = self.store.load().await?;
        info!("Loaded {} user provider entries", configs.len());
        *self.user.write().await = configs;
        Ok(())
    }

    /// Merged view of enabled entries (user overrides system by name).
    pub async fn configs(&self) -> Vec<ProviderConfig> {
        let user = self.user.read().await;
        merged_enabled(&self.system, &user)
    }

    async fn config_for(&self, name: &str) -> Option<ProviderConfig> {
        self.configs().await.into_iter().find(|c| c.name == name)
    }

    async fn name_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.op_locks.lock().await;
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Connect to a configured provider. Fails if a connection already
    /// exists under that name.
    pub async fn connect(&self, name: &str) -> Result<()> {
        let lock = self.name_lock(name).await;
        let _guard = lock.lock().await;

        let Some(config) = self.config_for(name).await else {
            return Err(anyhow!("Unknown provider: {}", name));
        };

        if self.connections.read().await.contains_key(name) {
            return Err(anyhow!("Provider already connected: {}", name));
        }

        match self.connect_inner(name, &config).await {
            Ok(client) => {
                self.connections
                    .write()
                    .await
                    .insert(name.to_string(), client);
                self.last_errors.write().await.remove(name);
                info!("Connected to provider: {}", name);
                Ok(())
            }
            Err(e) => {
                self.last_errors
                    .write()
                    .await
                    .insert(name.to_string(), e.to_string());
                Err(e)
            }
        }
    }

    async fn connect_inner(&self, name: &str, config: &ProviderConfig) -> Result<Arc<ProviderClient>> {
        let client = ProviderClient::connect(name, config, &self.working_dir).await?;
        client.initialize().await?;
        client.list_tools().await?;

        // Resource catalog is optional capability; fetch failures are
        // recorded but do not fail the connection.
        if let Err(e) = client.list_resources().await {
            warn!("Provider {} resource catalog fetch failed: {}", name, e);
            self.last_errors
                .write()
                .await
                .insert(name.to_string(), e.to_string());
        }

        Ok(Arc::new(client))
    }

    /// Disconnect a provider. A no-op when not connected.
    pub async fn disconnect(&self, name: &str) {
        let lock = self.name_lock(name).await;
        let _guard = lock.lock().await;

        if self.connections.write().await.remove(name).is_some() {
            info!("Disconnected from provider: {}", name);
        }
    }

    /// Connect every enabled, auto-connect entry concurrently.
    /// Individual failures are recorded per provider and never abort the
    /// other connections.
    pub async fn connect_all(&self) {
        let eligible: Vec<String> = self
            .configs()
            .await
            .into_iter()
            .filter(|c| c.auto_connect)
            .map(|c| c.name)
            .collect();

        if eligible.is_empty() {
            return;
        }

        info!("Connecting to {} providers in parallel", eligible.len());

        let futures: Vec<_> = eligible
            .iter()
            .map(|name| async move { (name.clone(), self.connect(name).await) })
            .collect();

        let results = futures::future::join_all(futures).await;

        for (name, result) in results {
            if let Err(e) = result {
                warn!("Failed to connect to provider {}: {:#}", name, e);
            }
        }
    }

    /// Disconnect every live connection, tolerating individual failures.
    pub async fn disconnect_all(&self) {
        let names: Vec<String> = self.connections.read().await.keys().cloned().collect();

        let futures: Vec<_> = names
            .iter()
            .map(|name| async move { self.disconnect(name).await })
            .collect();

        futures::future::join_all(futures).await;
    }

    /// Per-provider connection status, tool/resource counts and last
    /// error.
    pub async fn server_statuses(&self) -> Vec<ProviderStatus> {
        let configs = self.configs().await;
        let connections = self.connections.read().await;
        let last_errors = self.last_errors.read().await;

        let mut statuses = Vec::with_capacity(configs.len());

        for config in configs {
            let (connected, tool_count, resource_count) =
                if let Some(client) = connections.get(&config.name) {
                    if client.is_alive().await {
                        (
                            true,
                            client.get_tools().await.len(),
                            client.get_resources().await.len(),
                        )
                    } else {
                        (false, 0, 0)
                    }
                } else {
                    (false, 0, 0)
                };

            statuses.push(ProviderStatus {
                transport_kind: config.transport_kind().to_string(),
                source: config.added_by,
                connected,
                tool_count,
                resource_count,
                error: last_errors.get(&config.name).cloned(),
                name: config.name,
            });
        }

        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Persist a new user entry, then optionally auto-connect. The
    /// config is stored before the connection attempt so a connection
    /// failure never loses it.
    pub async fn add_server(&self, config: ProviderConfig) -> Result<()> {
        if config.added_by != ConfigSource::User {
            return Err(anyhow!("Only user entries can be added at runtime"));
        }

        {
            let mut user = self.user.write().await;
            if user.iter().any(|c| c.name == config.name) {
                return Err(anyhow!("Provider already configured: {}", config.name));
            }
            user.push(config.clone());
            self.store.save(&user).await?;
        }

        if config.auto_connect && config.enabled {
            if let Err(e) = self.connect(&config.name).await {
                warn!(
                    "Provider {} stored but initial connect failed: {:#}",
                    config.name, e
                );
            }
        }

        Ok(())
    }

    /// Remove a user entry: disconnect first, then delete from the
    /// persisted store, then from memory. A crash mid-removal leaves at
    /// worst a disconnected-but-still-configured entry.
    pub async fn remove_server(&self, name: &str) -> Result<()> {
        {
            let user = self.user.read().await;
            if !user.iter().any(|c| c.name == name) {
                return Err(anyhow!("Unknown user provider: {}", name));
            }
        }

        self.disconnect(name).await;

        let mut user = self.user.write().await;
        let remaining: Vec<ProviderConfig> =
            user.iter().filter(|c| c.name != name).cloned().collect();
        self.store.save(&remaining).await?;
        *user = remaining;

        self.last_errors.write().await.remove(name);
        info!("Removed provider: {}", name);
        Ok(())
    }

    /// Call a tool on a connected provider.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<ProviderToolResult> {
        let client = {
            let connections = self.connections.read().await;
            connections
                .get(server)
                .cloned()
                .ok_or_else(|| anyhow!("Provider not connected: {}", server))?
        };

        client.call_tool(tool, arguments).await
    }

    /// All provider tools under their namespaced names, for the model's
    /// tool list.
    pub async fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let connections = self.connections.read().await;
        let mut definitions = Vec::new();

        for (name, client) in connections.iter() {
            for tool in client.get_tools().await {
                definitions.push(ToolDefinition {
                    name: provider_tool_name(name, &tool.name),
                    description: tool.description.unwrap_or_default(),
                    input_schema: tool.input_schema,
                });
            }
        }

        definitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with(system: Vec<ProviderConfig>, dir: &std::path::Path) -> ProviderManager {
        ProviderManager::new(
            system,
            UserProviderStore::new(dir.join("providers.json")),
            dir.to_path_buf(),
        )
    }

    fn stdio_config(name: &str, command: &str, source: ConfigSource) -> ProviderConfig {
        let mut config = ProviderConfig::stdio(name, command, vec![], source);
        config.auto_connect = true;
        config
    }

    #[tokio::test]
    async fn test_connect_unknown_provider_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(vec![], dir.path());

        let err = manager.connect("nope").await.unwrap_err();
        assert!(err.to_string().contains("Unknown provider"));
    }

    #[tokio::test]
    async fn test_connect_all_tolerates_unreachable_provider() {
        let dir = tempfile::tempdir().unwrap();
        // A command that cannot exist; spawn fails immediately.
        let system = vec![stdio_config(
            "broken",
            "conductor-test-missing-provider-binary",
            ConfigSource::System,
        )];
        let manager = manager_with(system, dir.path());

        manager.connect_all().await;

        let statuses = manager.server_statuses().await;
        assert_eq!(statuses.len(), 1);
        assert!(!statuses[0].connected);
        assert!(statuses[0].error.is_some());
    }

    /// Shell responder speaking the stdio wire protocol. Request ids are
    /// deterministic per connection (initialize=1, tools/list=2,
    /// resources/list=3), so replies can be scripted in order. The
    /// trailing `cat` keeps the process alive for the status check.
    #[cfg(unix)]
    fn write_responder_script(dir: &std::path::Path) -> std::path::PathBuf {
        let script = dir.join("responder.sh");
        std::fs::write(
            &script,
            concat!(
                "read -r line\n",
                "echo '{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"protocolVersion\":\"2024-11-05\",\"capabilities\":{}}}'\n",
                "read -r line\n",
                "read -r line\n",
                "echo '{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"tools\":[{\"name\":\"stat\",\"inputSchema\":{\"type\":\"object\"}}]}}'\n",
                "read -r line\n",
                "echo '{\"jsonrpc\":\"2.0\",\"id\":3,\"result\":{\"resources\":[]}}'\n",
                "cat >/dev/null\n",
            ),
        )
        .unwrap();
        script
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connect_all_connects_reachable_alongside_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_responder_script(dir.path());

        let mut scripted = ProviderConfig::stdio(
            "scripted",
            "sh",
            vec![script.to_string_lossy().into_owned()],
            ConfigSource::System,
        );
        scripted.auto_connect = true;

        let system = vec![
            scripted,
            stdio_config(
                "broken",
                "conductor-test-missing-provider-binary",
                ConfigSource::System,
            ),
        ];
        let manager = manager_with(system, dir.path());

        manager.connect_all().await;

        let statuses = manager.server_statuses().await;
        assert_eq!(statuses.len(), 2);

        let broken = &statuses[0];
        assert_eq!(broken.name, "broken");
        assert!(!broken.connected);
        assert!(broken.error.is_some());

        let scripted = &statuses[1];
        assert_eq!(scripted.name, "scripted");
        assert!(scripted.connected);
        assert_eq!(scripted.tool_count, 1);
        assert_eq!(scripted.resource_count, 0);
        assert!(scripted.error.is_none());

        manager.disconnect_all().await;
    }

    #[tokio::test]
    async fn test_add_server_persists_before_connect_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(vec![], dir.path());
        manager.load_user_config().await.unwrap();

        // Auto-connect fails (missing binary) but the entry is stored.
        let config = stdio_config(
            "flaky",
            "conductor-test-missing-provider-binary",
            ConfigSource::User,
        );
        manager.add_server(config).await.unwrap();

        let store = UserProviderStore::new(dir.path().join("providers.json"));
        let persisted = store.load().await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].name, "flaky");

        let statuses = manager.server_statuses().await;
        assert!(!statuses[0].connected);
        assert!(statuses[0].error.is_some());
    }

    #[tokio::test]
    async fn test_add_duplicate_user_entry_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(vec![], dir.path());

        let mut config = stdio_config("dup", "bin", ConfigSource::User);
        config.auto_connect = false;
        manager.add_server(config.clone()).await.unwrap();
        let err = manager.add_server(config).await.unwrap_err();
        assert!(err.to_string().contains("already configured"));
    }

    #[tokio::test]
    async fn test_remove_server_deletes_persisted_entry() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(vec![], dir.path());

        let mut config = stdio_config("gone", "bin", ConfigSource::User);
        config.auto_connect = false;
        manager.add_server(config).await.unwrap();
        manager.remove_server("gone").await.unwrap();

        let store = UserProviderStore::new(dir.path().join("providers.json"));
        assert!(store.load().await.unwrap().is_empty());
        assert!(manager.server_statuses().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown_server_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(vec![], dir.path());

        let err = manager.remove_server("missing").await.unwrap_err();
        assert!(err.to_string().contains("Unknown user provider"));
    }

    #[tokio::test]
    async fn test_call_tool_on_disconnected_provider_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(vec![], dir.path());

        let err = manager
            .call_tool("ghost", "stat", Value::Null)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not connected"));
    }
}
