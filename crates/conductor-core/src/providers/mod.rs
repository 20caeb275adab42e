//! External tool-provider connections.
//!
//! A provider is an external tool/resource source reached over a
//! pluggable transport (currently stdio JSON-RPC). The manager owns the
//! merged system/user configuration and at most one live connection per
//! provider name.

pub mod client;
pub mod config;
pub mod manager;
pub mod protocol;
pub mod transport;

pub use config::{ConfigSource, ProviderConfig, ProviderTransport, UserProviderStore};
pub use manager::{ProviderManager, ProviderStatus};
pub use protocol::format_tool_result;

/// Namespace prefix for provider tools exposed to the model.
pub const PROVIDER_TOOL_PREFIX: &str = "mcp__";

/// Split a namespaced provider tool name into `(server, tool)`.
///
/// Built-in tool names never carry the `mcp__` prefix, so a built-in can
/// never be shadowed by a provider tool of the same name.
pub fn parse_provider_tool_name(name: &str) -> Option<(&str, &str)> {
    let rest = name.strip_prefix(PROVIDER_TOOL_PREFIX)?;
    let (server, tool) = rest.split_once("__")?;
    if server.is_empty() || tool.is_empty() {
        return None;
    }
    Some((server, tool))
}

/// Build the namespaced name under which a provider tool is exposed.
pub fn provider_tool_name(server: &str, tool: &str) -> String {
    format!("{}{}__{}", PROVIDER_TOOL_PREFIX, server, tool)
}
