//! Provider connection seam.
//!
//! The registry talks to tool providers through these traits so its
//! reconnect policy can be exercised without spawning real servers.

use std::future::Future;

use mcp::{
    CallToolResult, Client, ReadResourceResult, Resource, ServerConfig, ServerNotification, Tool,
    TransportConfig,
};
use serde_json::Value;
use tokio::sync::mpsc;

/// A live connection to one tool provider.
pub trait ProviderConnection: Send + Sync + 'static {
    fn list_tools(&self) -> impl Future<Output = mcp::Result<Vec<Tool>>> + Send;

    fn list_resources(&self) -> impl Future<Output = mcp::Result<Vec<Resource>>> + Send;

    fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> impl Future<Output = mcp::Result<CallToolResult>> + Send;

    fn read_resource(&self, uri: &str) -> impl Future<Output = mcp::Result<ReadResourceResult>> + Send;

    fn is_connected(&self) -> bool;

    /// Server notifications. Yields `Some` once.
    fn take_notifications(
        &self,
    ) -> impl Future<Output = Option<mpsc::UnboundedReceiver<ServerNotification>>> + Send;

    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Opens provider connections.
pub trait Connector: Send + Sync + 'static {
    type Connection: ProviderConnection;

    fn connect(
        &self,
        id: &str,
        transport: &TransportConfig,
    ) -> impl Future<Output = mcp::Result<Self::Connection>> + Send;
}

/// Connects through the rmcp-backed [`Client`].
#[derive(Debug, Clone, Copy, Default)]
pub struct McpConnector;

impl Connector for McpConnector {
    type Connection = Client;

    async fn connect(&self, id: &str, transport: &TransportConfig) -> mcp::Result<Client> {
        Client::connect(ServerConfig {
            name: id.to_string(),
            transport: transport.clone(),
        })
        .await
    }
}

impl ProviderConnection for Client {
    async fn list_tools(&self) -> mcp::Result<Vec<Tool>> {
        Client::list_tools(self).await
    }

    async fn list_resources(&self) -> mcp::Result<Vec<Resource>> {
        Client::list_resources(self).await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> mcp::Result<CallToolResult> {
        Client::call_tool(self, name, arguments).await
    }

    async fn read_resource(&self, uri: &str) -> mcp::Result<ReadResourceResult> {
        Client::read_resource(self, uri).await
    }

    fn is_connected(&self) -> bool {
        Client::is_connected(self)
    }

    async fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<ServerNotification>> {
        Client::take_notifications(self).await
    }

    async fn close(&self) {
        Client::close(self).await;
    }
}
