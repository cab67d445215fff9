//! Tool providers, the merged catalog, and dispatch.

mod connection;
mod errors;
mod host;
mod registry;
mod types;

pub use connection::{Connector, McpConnector, ProviderConnection};
pub use errors::ToolError;
pub use host::ToolHost;
pub use registry::{ProviderStatus, ProviderSummary, ToolProviderRegistry};
pub use types::{SEPARATOR, ToolDefinition, qualify, split_qualified};
