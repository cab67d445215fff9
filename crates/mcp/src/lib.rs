//! MCP (Model Context Protocol) client library.
//!
//! Connects to tool-provider servers over stdio (child process) or
//! streamable HTTP using the official rmcp SDK, and carries the JSON-RPC 2.0
//! envelopes the UI bridge speaks on its own channel.
//!
//! # Example
//!
//! ```no_run
//! use mcp::{Client, ServerConfig, TransportConfig};
//! use std::collections::BTreeMap;
//!
//! # async fn example() -> mcp::Result<()> {
//! let config = ServerConfig {
//!     name: "filesystem".to_string(),
//!     transport: TransportConfig::Subprocess {
//!         command: "mcp-filesystem".to_string(),
//!         args: vec!["--root".to_string(), "./workspace".to_string()],
//!         env: BTreeMap::new(),
//!     },
//! };
//!
//! let client = Client::connect(config).await?;
//! for tool in client.list_tools().await? {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let result = client
//!     .call_tool("read_file", serde_json::json!({ "path": "./README.md" }))
//!     .await?;
//! println!("error: {}", result.is_error);
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod protocol;
mod service;

pub use config::{ServerConfig, TransportConfig};
pub use error::{Error, Result};
pub use protocol::{
    CallToolResult, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION,
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    METHOD_NOT_FOUND, PARSE_ERROR, ReadResourceResult, RequestId, Resource, ResourceContents,
    SERVER_ERROR, ServerNotification, Tool, ToolContent,
};
pub use service::{Client, DEFAULT_TIMEOUT, TOOL_CALL_TIMEOUT};
