//! Tool provider registry.
//!
//! Owns one live connection per registered provider, exposes the merged
//! tool catalog under qualified names, and dispatches calls with a bounded
//! reconnect policy: at most one reconnect per call.

use std::sync::Arc;

use indexmap::IndexMap;
use mcp::{CallToolResult, ReadResourceResult, Resource, ServerNotification, Tool, TransportConfig};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::{Connector, McpConnector, ProviderConnection};
use super::types::SEPARATOR;
use super::{ToolDefinition, ToolError, ToolHost};

/// Connection status reported for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    Connected,
    Disconnected,
}

/// Listing entry for one registered provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub status: ProviderStatus,
    pub tools: Vec<String>,
    pub resource_count: usize,
}

struct ProviderEntry<P> {
    transport: TransportConfig,
    connection: Arc<P>,
    tools: Arc<RwLock<Vec<Tool>>>,
    resources: Vec<Resource>,
    listener: Option<JoinHandle<()>>,
}

impl<P> Drop for ProviderEntry<P> {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

/// Registry of tool providers keyed by provider id.
///
/// Registration order is preserved in listings and in the catalog.
pub struct ToolProviderRegistry<C: Connector = McpConnector> {
    connector: C,
    providers: RwLock<IndexMap<String, Arc<ProviderEntry<C::Connection>>>>,
}

impl ToolProviderRegistry<McpConnector> {
    pub fn new() -> Self {
        Self::with_connector(McpConnector)
    }
}

impl Default for ToolProviderRegistry<McpConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> ToolProviderRegistry<C> {
    pub fn with_connector(connector: C) -> Self {
        Self {
            connector,
            providers: RwLock::new(IndexMap::new()),
        }
    }

    /// Connect to a provider and add it under `id`.
    ///
    /// Fails without leaving an entry if the id is invalid or taken, or the
    /// connection cannot be established.
    pub async fn register(&self, id: &str, transport: TransportConfig) -> Result<(), ToolError> {
        validate_provider_id(id)?;
        if self.providers.read().await.contains_key(id) {
            return Err(ToolError::DuplicateProvider(id.to_string()));
        }

        let entry = self.connect_entry(id, transport).await?;

        let mut providers = self.providers.write().await;
        if providers.contains_key(id) {
            drop(providers);
            entry.connection.close().await;
            return Err(ToolError::DuplicateProvider(id.to_string()));
        }
        providers.insert(id.to_string(), Arc::new(entry));
        Ok(())
    }

    /// Close and forget a provider.
    pub async fn remove(&self, id: &str) -> Result<(), ToolError> {
        let entry = self
            .providers
            .write()
            .await
            .shift_remove(id)
            .ok_or_else(|| ToolError::ProviderNotFound(id.to_string()))?;
        entry.connection.close().await;
        info!(provider = %id, "tool provider removed");
        Ok(())
    }

    /// Tear down the connection and establish a new one with the same config.
    ///
    /// If the new connection fails the entry stays, reported as disconnected.
    pub async fn reconnect(&self, id: &str) -> Result<(), ToolError> {
        let old = self.entry(id).await?;
        old.connection.close().await;
        let fresh = self.connect_entry(id, old.transport.clone()).await?;

        let mut providers = self.providers.write().await;
        match providers.get_mut(id) {
            Some(slot) => *slot = Arc::new(fresh),
            None => {
                drop(providers);
                fresh.connection.close().await;
                return Err(ToolError::ProviderNotFound(id.to_string()));
            }
        }
        info!(provider = %id, "tool provider reconnected");
        Ok(())
    }

    /// All providers with their status and tool names.
    pub async fn list(&self) -> Vec<ProviderSummary> {
        let providers = self.providers.read().await;
        let mut out = Vec::with_capacity(providers.len());
        for (id, entry) in providers.iter() {
            let tools = entry.tools.read().await.iter().map(|t| t.name.clone()).collect();
            let (command, args, url) = match &entry.transport {
                TransportConfig::Subprocess { command, args, .. } => {
                    (Some(command.clone()), Some(args.clone()), None)
                }
                TransportConfig::HttpStream { url } => (None, None, Some(url.clone())),
            };
            out.push(ProviderSummary {
                id: id.clone(),
                kind: entry.transport.kind(),
                command,
                args,
                url,
                status: if entry.connection.is_connected() {
                    ProviderStatus::Connected
                } else {
                    ProviderStatus::Disconnected
                },
                tools,
                resource_count: entry.resources.len(),
            });
        }
        out
    }

    /// Resources a provider advertised at connect time.
    pub async fn resources(&self, id: &str) -> Result<Vec<Resource>, ToolError> {
        Ok(self.entry(id).await?.resources.clone())
    }

    /// Read a resource addressed as `<scheme>://<provider>/<path>`.
    pub async fn read_resource_uri(&self, uri: &str) -> Result<ReadResourceResult, ToolError> {
        let provider =
            provider_from_uri(uri).ok_or_else(|| ToolError::InvalidResourceUri(uri.to_string()))?;
        ToolHost::read_resource(self, provider, uri).await
    }

    /// Close every provider.
    pub async fn close_all(&self) {
        let entries: Vec<_> = self.providers.write().await.drain(..).collect();
        for (id, entry) in entries {
            entry.connection.close().await;
            debug!(provider = %id, "tool provider closed");
        }
    }

    async fn entry(&self, id: &str) -> Result<Arc<ProviderEntry<C::Connection>>, ToolError> {
        self.providers
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ToolError::ProviderNotFound(id.to_string()))
    }

    async fn connect_entry(
        &self,
        id: &str,
        transport: TransportConfig,
    ) -> Result<ProviderEntry<C::Connection>, ToolError> {
        let connection = Arc::new(self.connector.connect(id, &transport).await.map_err(|e| {
            warn!(provider = %id, error = %e, "tool provider connection failed");
            ToolError::from(e)
        })?);

        let tools = connection.list_tools().await.unwrap_or_else(|e| {
            warn!(provider = %id, error = %e, "tools/list failed");
            Vec::new()
        });
        // Resources are optional; plenty of servers do not implement them.
        let resources = connection.list_resources().await.unwrap_or_else(|e| {
            debug!(provider = %id, error = %e, "resources/list failed");
            Vec::new()
        });

        info!(
            provider = %id,
            transport = transport.kind(),
            tools = ?tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            resources = resources.len(),
            "tool provider connected"
        );

        let tools = Arc::new(RwLock::new(tools));
        let listener = connection.take_notifications().await.map(|rx| {
            spawn_listener(id.to_string(), Arc::clone(&connection), Arc::clone(&tools), rx)
        });

        Ok(ProviderEntry {
            transport,
            connection,
            tools,
            resources,
            listener,
        })
    }

    async fn reconnect_for_call(&self, id: &str) -> Result<Arc<C::Connection>, ToolError> {
        self.reconnect(id).await.map_err(|e| ToolError::ReconnectFailed {
            id: id.to_string(),
            message: e.to_string(),
        })?;
        Ok(Arc::clone(&self.entry(id).await?.connection))
    }
}

impl<C: Connector> ToolHost for ToolProviderRegistry<C> {
    async fn catalog(&self) -> Vec<ToolDefinition> {
        let providers = self.providers.read().await;
        let mut out = Vec::new();
        for (id, entry) in providers.iter() {
            if !entry.connection.is_connected() {
                continue;
            }
            let tools = entry.tools.read().await;
            out.extend(tools.iter().map(|tool| ToolDefinition::from_tool(id, tool)));
        }
        out
    }

    async fn tool_definition(&self, provider: &str, tool: &str) -> Option<ToolDefinition> {
        let entry = self.entry(provider).await.ok()?;
        let tools = entry.tools.read().await;
        tools
            .iter()
            .find(|t| t.name == tool)
            .map(|t| ToolDefinition::from_tool(provider, t))
    }

    async fn call_tool(
        &self,
        provider: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<CallToolResult, ToolError> {
        let mut connection = Arc::clone(&self.entry(provider).await?.connection);
        let mut reconnected = false;

        if !connection.is_connected() {
            info!(provider = %provider, "tool provider disconnected; reconnecting before call");
            connection = self.reconnect_for_call(provider).await?;
            reconnected = true;
        }

        match connection.call_tool(tool, arguments.clone()).await {
            Ok(result) => Ok(result),
            Err(e) if e.is_session_error() && !reconnected => {
                warn!(provider = %provider, tool = %tool, error = %e, "session lost; reconnecting and retrying once");
                let connection = self.reconnect_for_call(provider).await?;
                connection
                    .call_tool(tool, arguments)
                    .await
                    .map_err(ToolError::from)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_resource(&self, provider: &str, uri: &str) -> Result<ReadResourceResult, ToolError> {
        let entry = self.entry(provider).await?;
        entry
            .connection
            .read_resource(uri)
            .await
            .map_err(ToolError::from)
    }
}

fn validate_provider_id(id: &str) -> Result<(), ToolError> {
    if id.trim().is_empty() || id.contains(SEPARATOR) {
        return Err(ToolError::InvalidProviderId(id.to_string()));
    }
    Ok(())
}

/// Provider id is the authority part of `<scheme>://<provider>/...`.
fn provider_from_uri(uri: &str) -> Option<&str> {
    let (_, rest) = uri.split_once("://")?;
    let provider = rest.split('/').next()?;
    (!provider.is_empty()).then_some(provider)
}

fn spawn_listener<P: ProviderConnection>(
    id: String,
    connection: Arc<P>,
    tools: Arc<RwLock<Vec<Tool>>>,
    mut notifications: mpsc::UnboundedReceiver<ServerNotification>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            match notification {
                ServerNotification::ToolListChanged => match connection.list_tools().await {
                    Ok(list) => {
                        info!(provider = %id, tools = list.len(), "tool list changed");
                        *tools.write().await = list;
                    }
                    Err(e) => warn!(provider = %id, error = %e, "failed to refresh tools"),
                },
                other => debug!(provider = %id, notification = ?other, "ignoring notification"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use mcp::ToolContent;
    use serde_json::json;

    fn tool(name: &str) -> Tool {
        serde_json::from_value(json!({"name": name, "inputSchema": {"type": "object"}})).unwrap()
    }

    #[derive(Default)]
    struct FakeState {
        connects: AtomicUsize,
        calls: AtomicUsize,
        fail_connect: AtomicBool,
        call_failures: Mutex<VecDeque<mcp::Error>>,
        tools: Mutex<Vec<Tool>>,
        latest: Mutex<Option<Arc<FakeLink>>>,
    }

    struct FakeLink {
        connected: AtomicBool,
        notify: mpsc::UnboundedSender<ServerNotification>,
    }

    struct FakeConnection {
        state: Arc<FakeState>,
        link: Arc<FakeLink>,
        notifications: Mutex<Option<mpsc::UnboundedReceiver<ServerNotification>>>,
    }

    impl ProviderConnection for FakeConnection {
        async fn list_tools(&self) -> mcp::Result<Vec<Tool>> {
            Ok(self.state.tools.lock().unwrap().clone())
        }

        async fn list_resources(&self) -> mcp::Result<Vec<Resource>> {
            Err(mcp::Error::Timeout("resources/list".into()))
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> mcp::Result<CallToolResult> {
            self.state.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.state.call_failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            Ok(CallToolResult {
                content: vec![ToolContent::text(format!("{name}:{arguments}"))],
                ..Default::default()
            })
        }

        async fn read_resource(&self, uri: &str) -> mcp::Result<ReadResourceResult> {
            Ok(serde_json::from_value(json!({
                "contents": [{"uri": uri, "mimeType": "text/html", "text": "<p>hi</p>"}]
            }))
            .unwrap())
        }

        fn is_connected(&self) -> bool {
            self.link.connected.load(Ordering::SeqCst)
        }

        async fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<ServerNotification>> {
            self.notifications.lock().unwrap().take()
        }

        async fn close(&self) {
            self.link.connected.store(false, Ordering::SeqCst);
        }
    }

    #[derive(Clone, Default)]
    struct FakeConnector(Arc<FakeState>);

    impl Connector for FakeConnector {
        type Connection = FakeConnection;

        async fn connect(&self, _id: &str, _transport: &TransportConfig) -> mcp::Result<FakeConnection> {
            self.0.connects.fetch_add(1, Ordering::SeqCst);
            if self.0.fail_connect.load(Ordering::SeqCst) {
                return Err(mcp::Error::Timeout("initialize".into()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            let link = Arc::new(FakeLink {
                connected: AtomicBool::new(true),
                notify: tx,
            });
            *self.0.latest.lock().unwrap() = Some(Arc::clone(&link));
            Ok(FakeConnection {
                state: Arc::clone(&self.0),
                link,
                notifications: Mutex::new(Some(rx)),
            })
        }
    }

    fn stdio() -> TransportConfig {
        TransportConfig::Subprocess {
            command: "node".into(),
            args: vec!["server.js".into()],
            env: BTreeMap::new(),
        }
    }

    fn registry(tools: &[&str]) -> (ToolProviderRegistry<FakeConnector>, Arc<FakeState>) {
        let connector = FakeConnector::default();
        *connector.0.tools.lock().unwrap() = tools.iter().map(|n| tool(n)).collect();
        let state = Arc::clone(&connector.0);
        (ToolProviderRegistry::with_connector(connector), state)
    }

    fn drop_link(state: &FakeState) {
        let link = state.latest.lock().unwrap().clone().unwrap();
        link.connected.store(false, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn register_lists_provider_and_catalog() {
        let (reg, _) = registry(&["add", "db__query"]);
        reg.register("calc", stdio()).await.unwrap();
        reg.register(
            "web",
            TransportConfig::HttpStream {
                url: "http://localhost:3001/mcp".into(),
            },
        )
        .await
        .unwrap();

        let list = reg.list().await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "calc");
        assert_eq!(list[0].kind, "stdio");
        assert_eq!(list[0].command.as_deref(), Some("node"));
        assert_eq!(list[0].status, ProviderStatus::Connected);
        assert_eq!(list[0].tools, vec!["add", "db__query"]);
        assert_eq!(list[1].url.as_deref(), Some("http://localhost:3001/mcp"));

        let json = serde_json::to_value(&list[1]).unwrap();
        assert_eq!(json["type"], "http");
        assert_eq!(json["status"], "connected");
        assert_eq!(json["resourceCount"], 0);
        assert!(json.get("command").is_none());

        let names: Vec<_> = reg.catalog().await.into_iter().map(|d| d.qualified_name).collect();
        assert_eq!(
            names,
            vec!["calc__add", "calc__db__query", "web__add", "web__db__query"]
        );
    }

    #[tokio::test]
    async fn rejects_bad_and_duplicate_ids() {
        let (reg, _) = registry(&["add"]);
        assert!(matches!(
            reg.register("my__srv", stdio()).await,
            Err(ToolError::InvalidProviderId(_))
        ));
        assert!(matches!(
            reg.register("", stdio()).await,
            Err(ToolError::InvalidProviderId(_))
        ));
        reg.register("calc", stdio()).await.unwrap();
        assert!(matches!(
            reg.register("calc", stdio()).await,
            Err(ToolError::DuplicateProvider(_))
        ));
        assert_eq!(reg.list().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_connect_leaves_no_entry() {
        let (reg, state) = registry(&["add"]);
        state.fail_connect.store(true, Ordering::SeqCst);
        assert!(reg.register("calc", stdio()).await.is_err());
        assert!(reg.list().await.is_empty());
    }

    #[tokio::test]
    async fn remove_unknown_provider_fails() {
        let (reg, _) = registry(&[]);
        assert!(matches!(
            reg.remove("ghost").await,
            Err(ToolError::ProviderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn catalog_skips_disconnected_providers() {
        let (reg, state) = registry(&["add"]);
        reg.register("calc", stdio()).await.unwrap();
        drop_link(&state);
        assert!(reg.catalog().await.is_empty());
        assert_eq!(reg.list().await[0].status, ProviderStatus::Disconnected);
    }

    #[tokio::test]
    async fn session_error_reconnects_once_and_retries() {
        let (reg, state) = registry(&["add"]);
        reg.register("calc", stdio()).await.unwrap();
        state
            .call_failures
            .lock()
            .unwrap()
            .push_back(mcp::Error::Closed);

        let result = reg.call_tool("calc", "add", json!({"a": 1})).await.unwrap();
        assert_eq!(result.content[0].as_text(), Some(r#"add:{"a":1}"#));
        assert_eq!(state.connects.load(Ordering::SeqCst), 2);
        assert_eq!(state.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_failure_propagates_without_another_reconnect() {
        let (reg, state) = registry(&["add"]);
        reg.register("calc", stdio()).await.unwrap();
        {
            let mut failures = state.call_failures.lock().unwrap();
            failures.push_back(mcp::Error::Closed);
            failures.push_back(mcp::Error::Closed);
        }

        let err = reg.call_tool("calc", "add", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Provider(_)));
        assert_eq!(state.connects.load(Ordering::SeqCst), 2);
        assert_eq!(state.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn disconnected_provider_reconnects_before_call() {
        let (reg, state) = registry(&["add"]);
        reg.register("calc", stdio()).await.unwrap();
        drop_link(&state);
        // A session failure after the up-front reconnect is not retried.
        state
            .call_failures
            .lock()
            .unwrap()
            .push_back(mcp::Error::Closed);

        assert!(reg.call_tool("calc", "add", json!({})).await.is_err());
        assert_eq!(state.connects.load(Ordering::SeqCst), 2);
        assert_eq!(state.calls.load(Ordering::SeqCst), 1);

        let ok = reg.call_tool("calc", "add", json!({})).await;
        assert!(ok.is_ok());
        assert_eq!(state.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn other_errors_do_not_reconnect() {
        let (reg, state) = registry(&["add"]);
        reg.register("calc", stdio()).await.unwrap();
        state
            .call_failures
            .lock()
            .unwrap()
            .push_back(mcp::Error::Timeout("tools/call".into()));

        assert!(reg.call_tool("calc", "add", json!({})).await.is_err());
        assert_eq!(state.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_reconnect_keeps_entry_disconnected() {
        let (reg, state) = registry(&["add"]);
        reg.register("calc", stdio()).await.unwrap();
        drop_link(&state);
        state.fail_connect.store(true, Ordering::SeqCst);

        let err = reg.call_tool("calc", "add", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::ReconnectFailed { .. }));
        let list = reg.list().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].status, ProviderStatus::Disconnected);
    }

    #[tokio::test]
    async fn tool_list_changed_refreshes_catalog() {
        let (reg, state) = registry(&["add"]);
        reg.register("calc", stdio()).await.unwrap();

        state.tools.lock().unwrap().push(tool("sub"));
        let link = state.latest.lock().unwrap().clone().unwrap();
        link.notify.send(ServerNotification::ToolListChanged).unwrap();

        let mut names = Vec::new();
        for _ in 0..50 {
            names = reg.catalog().await.into_iter().map(|d| d.local_name).collect();
            if names.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(names, vec!["add", "sub"]);

        let sub = reg.tool_definition("calc", "sub").await.unwrap();
        assert_eq!(sub.qualified_name, "calc__sub");
        assert!(reg.tool_definition("calc", "mul").await.is_none());
        assert!(reg.tool_definition("other", "add").await.is_none());
    }

    #[tokio::test]
    async fn read_resource_by_uri_uses_authority() {
        let (reg, _) = registry(&[]);
        reg.register("charts", stdio()).await.unwrap();

        let result = reg.read_resource_uri("ui://charts/view.html").await.unwrap();
        assert_eq!(result.contents[0].text.as_deref(), Some("<p>hi</p>"));

        assert!(matches!(
            reg.read_resource_uri("not-a-uri").await,
            Err(ToolError::InvalidResourceUri(_))
        ));
        assert!(matches!(
            reg.read_resource_uri("ui://other/view.html").await,
            Err(ToolError::ProviderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn reconnect_replaces_connection() {
        let (reg, state) = registry(&["add"]);
        reg.register("calc", stdio()).await.unwrap();
        drop_link(&state);
        reg.reconnect("calc").await.unwrap();
        assert_eq!(reg.list().await[0].status, ProviderStatus::Connected);
        assert_eq!(state.connects.load(Ordering::SeqCst), 2);
    }
}
