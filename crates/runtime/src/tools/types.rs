//! Tool-related types.

use mcp::Tool;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::ToolSpec;

/// Joins provider id and local tool name in a qualified name.
pub const SEPARATOR: &str = "__";

/// Build `provider__tool`.
pub fn qualify(provider: &str, tool: &str) -> String {
    format!("{provider}{SEPARATOR}{tool}")
}

/// Split a qualified name at the first separator into (provider, tool).
///
/// The local name keeps any further separators. Provider ids are rejected
/// at registration if they contain the separator, so the first occurrence
/// always ends the provider id.
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    name.split_once(SEPARATOR)
        .filter(|(provider, tool)| !provider.is_empty() && !tool.is_empty())
}

/// A provider tool as exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub qualified_name: String,
    pub provider_id: String,
    pub local_name: String,
    pub description: String,
    pub input_schema: Value,
    pub ui_resource_uri: Option<String>,
}

impl ToolDefinition {
    pub fn from_tool(provider_id: &str, tool: &Tool) -> Self {
        Self {
            qualified_name: qualify(provider_id, &tool.name),
            provider_id: provider_id.to_string(),
            local_name: tool.name.clone(),
            description: tool.description.clone().unwrap_or_default(),
            input_schema: tool.input_schema.clone(),
            ui_resource_uri: tool.ui_resource_uri().map(String::from),
        }
    }

    pub fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.qualified_name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}
