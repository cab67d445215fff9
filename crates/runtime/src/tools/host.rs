//! Tool host trait.

use std::future::Future;
use std::sync::Arc;

use mcp::{CallToolResult, ReadResourceResult};
use serde_json::Value;

use super::types::split_qualified;
use super::{ToolDefinition, ToolError};

/// Trait for tool execution hosts.
///
/// This is the boundary between the model loop (and the UI bridge) and
/// tool-provider side effects.
pub trait ToolHost: Send + Sync {
    /// Tools currently offered to the model.
    fn catalog(&self) -> impl Future<Output = Vec<ToolDefinition>> + Send;

    fn tool_definition(
        &self,
        provider: &str,
        tool: &str,
    ) -> impl Future<Output = Option<ToolDefinition>> + Send;

    /// Call `tool` on `provider`. A result flagged `is_error` is still `Ok`.
    fn call_tool(
        &self,
        provider: &str,
        tool: &str,
        arguments: Value,
    ) -> impl Future<Output = Result<CallToolResult, ToolError>> + Send;

    fn read_resource(
        &self,
        provider: &str,
        uri: &str,
    ) -> impl Future<Output = Result<ReadResourceResult, ToolError>> + Send;

    /// Call by qualified `provider__tool` name.
    fn call_qualified(
        &self,
        name: &str,
        arguments: Value,
    ) -> impl Future<Output = Result<CallToolResult, ToolError>> + Send {
        async move {
            let (provider, tool) =
                split_qualified(name).ok_or_else(|| ToolError::InvalidName(name.to_string()))?;
            self.call_tool(provider, tool, arguments).await
        }
    }
}

impl<T: ToolHost> ToolHost for Arc<T> {
    fn catalog(&self) -> impl Future<Output = Vec<ToolDefinition>> + Send {
        (**self).catalog()
    }

    fn tool_definition(
        &self,
        provider: &str,
        tool: &str,
    ) -> impl Future<Output = Option<ToolDefinition>> + Send {
        (**self).tool_definition(provider, tool)
    }

    fn call_tool(
        &self,
        provider: &str,
        tool: &str,
        arguments: Value,
    ) -> impl Future<Output = Result<CallToolResult, ToolError>> + Send {
        (**self).call_tool(provider, tool, arguments)
    }

    fn read_resource(
        &self,
        provider: &str,
        uri: &str,
    ) -> impl Future<Output = Result<ReadResourceResult, ToolError>> + Send {
        (**self).read_resource(provider, uri)
    }
}
