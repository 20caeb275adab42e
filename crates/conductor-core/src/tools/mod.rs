//! Built-in tools, the tool registry, and change staging.

pub mod implementations;
pub mod registry;
pub mod staging;

pub use implementations::register_builtin_tools;
pub use registry::{parse_params, Tool, ToolContext, ToolRegistry, ToolResult};
pub use staging::PendingChange;
