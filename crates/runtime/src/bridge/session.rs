use std::time::{Duration, Instant};

use mcp::CallToolResult;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::orchestrator::{UiResource, UiToolDef};

/// What a rendered UI was produced from.
#[derive(Debug, Clone, PartialEq)]
pub struct UiMount {
    /// Qualified tool name; its provider part routes the UI's own tool calls.
    pub tool_name: String,
    pub tool_use_id: String,
    pub tool_input: Value,
    pub tool_result: CallToolResult,
    pub tool_def: UiToolDef,
    pub resource_uri: String,
    /// Conversation that user messages from this UI are injected into.
    pub conversation_id: Option<String>,
}

impl UiMount {
    pub fn from_resource(resource: &UiResource, conversation_id: Option<String>) -> Self {
        Self {
            tool_name: resource.tool_name.clone(),
            tool_use_id: resource.tool_use_id.clone(),
            tool_input: resource.tool_input.clone(),
            tool_result: resource.tool_result.clone(),
            tool_def: resource.tool_def.clone(),
            resource_uri: resource.resource_uri.clone(),
            conversation_id,
        }
    }
}

pub(super) struct BridgeSession {
    pub(super) mount: UiMount,
    pub(super) outbound: Option<mpsc::UnboundedSender<Value>>,
    pub(super) initialized: bool,
    pub(super) tool_data_sent: bool,
    /// Last open, bind, or release.
    pub(super) touched: Instant,
}

impl BridgeSession {
    pub(super) fn new(mount: UiMount) -> Self {
        Self {
            mount,
            outbound: None,
            initialized: false,
            tool_data_sent: false,
            touched: Instant::now(),
        }
    }

    pub(super) fn is_bound(&self) -> bool {
        self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Unbound and untouched for at least `ttl`.
    pub(super) fn is_idle_for(&self, ttl: Duration) -> bool {
        !self.is_bound() && self.touched.elapsed() >= ttl
    }

    /// Queue a frame for the rendering context. Dropped if the channel is gone.
    pub(super) fn send(&self, frame: Value) {
        if let Some(tx) = &self.outbound {
            let _ = tx.send(frame);
        }
    }
}
