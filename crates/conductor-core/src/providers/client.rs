//! Per-provider JSON-RPC client.
//!
//! Owns the transport for one connected provider and a background
//! receive loop that correlates responses to pending requests.

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info};

use super::config::{ProviderConfig, ProviderTransport};
use super::protocol::{
    ClientInfo, InitializeParams, InitializeResult, ProviderResourceDef, ProviderToolDef,
    ProviderToolResult, ResourcesListResult, RpcRequest, RpcResponse, ToolCallParams,
    ToolsListResult, METHOD_NOT_FOUND,
};
use super::transport::StdioTransport;

const PROTOCOL_VERSION: &str = "2024-11-05";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Result of a catalog fetch that distinguishes "unsupported" from a
/// real failure.
enum CatalogOutcome<T> {
    Ok(T),
    Unsupported,
}

pub struct ProviderClient {
    name: String,
    transport: Arc<StdioTransport>,
    next_id: AtomicI64,
    /// Pending request handlers keyed by request id.
    pending: Arc<RwLock<HashMap<i64, oneshot::Sender<Result<Value>>>>>,
    /// Cached tool catalog.
    tools: RwLock<Vec<ProviderToolDef>>,
    /// Cached resource catalog. `None` until fetched.
    resources: RwLock<Option<Vec<ProviderResourceDef>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl ProviderClient {
    /// Spawn the provider process and start the receive loop.
    pub async fn connect(name: &str, config: &ProviderConfig, working_dir: &Path) -> Result<Self> {
        let ProviderTransport::Stdio { command, args, env } = &config.transport;

        info!("Connecting to provider: {}", name);

        let transport = Arc::new(StdioTransport::spawn(command, args, env, working_dir).await?);

        let pending: Arc<RwLock<HashMap<i64, oneshot::Sender<Result<Value>>>>> =
            Arc::new(RwLock::new(HashMap::new()));

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let recv_transport = Arc::clone(&transport);
        let recv_pending = Arc::clone(&pending);
        let recv_name = name.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Provider {} shutting down receive loop", recv_name);
                        break;
                    }
                    result = recv_transport.receive() => {
                        match result {
                            Ok(message) => {
                                if let Err(e) = handle_message(&message, &recv_pending).await {
                                    error!("Provider {} message error: {}", recv_name, e);
                                }
                            }
                            Err(e) => {
                                error!("Provider {} receive error: {}", recv_name, e);
                                // Fail all pending requests
                                let mut pending = recv_pending.write().await;
                                for (_, tx) in pending.drain() {
                                    let _ = tx.send(Err(anyhow!("Connection lost")));
                                }
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            name: name.to_string(),
            transport,
            next_id: AtomicI64::new(1),
            pending,
            tools: RwLock::new(Vec::new()),
            resources: RwLock::new(None),
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Initialize the connection (required before using tools).
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: Value::Object(serde_json::Map::new()),
            client_info: ClientInfo {
                name: "conductor".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let result: InitializeResult = self
            .request("initialize", Some(serde_json::to_value(params)?))
            .await
            .map_err(|e| {
                error!("Provider {} initialize failed: {}", self.name, e);
                e
            })?;

        info!(
            "Provider {} initialized (protocol: {})",
            self.name, result.protocol_version
        );

        self.notify("notifications/initialized", None).await?;

        Ok(result)
    }

    /// Fetch and cache the tool catalog.
    pub async fn list_tools(&self) -> Result<Vec<ProviderToolDef>> {
        let result: ToolsListResult = self.request("tools/list", None).await?;
        info!("Provider {} has {} tools", self.name, result.tools.len());

        *self.tools.write().await = result.tools.clone();
        Ok(result.tools)
    }

    /// Fetch and cache the resource catalog.
    ///
    /// A method-not-found reply means the provider has no resource
    /// capability; that is recorded as an empty catalog, not an error.
    pub async fn list_resources(&self) -> Result<Vec<ProviderResourceDef>> {
        let outcome: CatalogOutcome<ResourcesListResult> =
            match self.request("resources/list", None).await {
                Ok(result) => CatalogOutcome::Ok(result),
                Err(e) if is_method_not_found(&e) => CatalogOutcome::Unsupported,
                Err(e) => return Err(e),
            };

        let resources = match outcome {
            CatalogOutcome::Ok(result) => result.resources,
            CatalogOutcome::Unsupported => {
                debug!("Provider {} does not support resources", self.name);
                Vec::new()
            }
        };

        *self.resources.write().await = Some(resources.clone());
        Ok(resources)
    }

    /// Call a tool on this provider.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ProviderToolResult> {
        let params = ToolCallParams {
            name: name.to_string(),
            arguments: if arguments.is_null() {
                None
            } else {
                Some(arguments)
            },
        };

        self.request("tools/call", Some(serde_json::to_value(params)?))
            .await
    }

    pub async fn get_tools(&self) -> Vec<ProviderToolDef> {
        self.tools.read().await.clone()
    }

    pub async fn get_resources(&self) -> Vec<ProviderResourceDef> {
        self.resources.read().await.clone().unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn is_alive(&self) -> bool {
        self.transport.is_alive().await
    }

    /// Send a request and wait for the correlated response.
    async fn request<R: for<'de> serde::Deserialize<'de>>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<R> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest::new(id, method, params);
        let json = serde_json::to_string(&request)?;

        debug!("Provider {} request [{}]: {}", self.name, id, method);

        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(id, tx);

        self.transport.send(&json).await?;

        let result =
            tokio::time::timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS), rx).await;

        match result {
            Ok(Ok(Ok(value))) => Ok(serde_json::from_value(value)?),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(anyhow!("Request cancelled")),
            Err(_) => {
                self.pending.write().await.remove(&id);
                Err(anyhow!("Request timed out after {}s", REQUEST_TIMEOUT_SECS))
            }
        }
    }

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        #[derive(serde::Serialize)]
        struct Notification {
            jsonrpc: &'static str,
            method: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            params: Option<Value>,
        }

        let notification = Notification {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
        };

        let json = serde_json::to_string(&notification)?;
        debug!("Provider {} notify: {}", self.name, method);
        self.transport.send(&json).await
    }
}

impl Drop for ProviderClient {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

/// RPC errors are surfaced as "rpc {code}: {message}" by the receive
/// loop; method-not-found is recognized by code.
fn is_method_not_found(error: &anyhow::Error) -> bool {
    error
        .to_string()
        .starts_with(&format!("rpc {}:", METHOD_NOT_FOUND))
}

async fn handle_message(
    message: &str,
    pending: &RwLock<HashMap<i64, oneshot::Sender<Result<Value>>>>,
) -> Result<()> {
    let response: RpcResponse = serde_json::from_str(message)?;

    if let Some(id) = response.id {
        let mut pending = pending.write().await;
        if let Some(tx) = pending.remove(&id) {
            if let Some(error) = response.error {
                let _ = tx.send(Err(anyhow!("rpc {}: {}", error.code, error.message)));
            } else {
                let _ = tx.send(Ok(response.result.unwrap_or(Value::Null)));
            }
        }
        return Ok(());
    }

    if let Some(method) = &response.method {
        debug!("Provider notification: {}", method);
    }

    Ok(())
}
