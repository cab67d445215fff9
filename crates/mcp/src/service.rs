//! Tool-provider client on the rmcp SDK.
//!
//! One [`Client`] per provider. Requests go through the SDK peer; results
//! are converted into this crate's payload types so callers never see SDK
//! model types.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rmcp::model::{CallToolRequestParams, ReadResourceRequestParams};
use rmcp::service::{NotificationContext, Peer, RoleClient, RunningService};
use rmcp::transport::{ConfigureCommandExt, StreamableHttpClientTransport, TokioChildProcess};
use rmcp::{ClientHandler, ServiceError, ServiceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::process::Command;
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{ServerConfig, TransportConfig};
use crate::error::{Error, Result};
use crate::protocol::{CallToolResult, ReadResourceResult, Resource, ServerNotification, Tool};

/// Default timeout for protocol operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for `tools/call`; tools may do real work.
pub const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(120);

type Service = RunningService<RoleClient, ListChangeHandler>;

/// Client-side handler that forwards list-change notifications.
struct ListChangeHandler {
    server: String,
    notifications: mpsc::UnboundedSender<ServerNotification>,
}

impl ListChangeHandler {
    fn forward(&self, notification: ServerNotification) {
        debug!(server = %self.server, ?notification, "provider notification");
        // Nobody is listening once the registry drops the receiver.
        let _ = self.notifications.send(notification);
    }
}

impl ClientHandler for ListChangeHandler {
    async fn on_tool_list_changed(&self, _context: NotificationContext<RoleClient>) {
        self.forward(ServerNotification::ToolListChanged);
    }

    async fn on_resource_list_changed(&self, _context: NotificationContext<RoleClient>) {
        self.forward(ServerNotification::ResourceListChanged);
    }
}

/// Handle to a connected tool-provider server.
pub struct Client {
    name: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<Service>>,
    closed: AtomicBool,
    notifications: Mutex<Option<mpsc::UnboundedReceiver<ServerNotification>>>,
}

impl Client {
    /// Open the transport and run the initialize handshake.
    pub async fn connect(config: ServerConfig) -> Result<Self> {
        let ServerConfig { name, transport } = config;
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = ListChangeHandler {
            server: name.clone(),
            notifications: tx,
        };

        let service = match &transport {
            TransportConfig::Subprocess { command, args, env } => {
                let process = TokioChildProcess::new(Command::new(command).configure(|cmd| {
                    cmd.args(args).envs(env);
                }))
                .map_err(|source| Error::Spawn {
                    command: command.clone(),
                    source,
                })?;
                handshake(&name, handler.serve(process)).await?
            }
            TransportConfig::HttpStream { url } => {
                let http = StreamableHttpClientTransport::from_uri(url.as_str());
                handshake(&name, handler.serve(http)).await?
            }
        };
        info!(server = %name, transport = transport.kind(), "provider connected");

        Ok(Self {
            name,
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
            closed: AtomicBool::new(false),
            notifications: Mutex::new(Some(rx)),
        })
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.peer.is_transport_closed()
    }

    /// Every tool the server offers, across all pages.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let tools = self
            .request("tools/list", DEFAULT_TIMEOUT, self.peer.list_all_tools())
            .await?;
        convert(tools)
    }

    /// Every resource the server offers, across all pages.
    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        let resources = self
            .request("resources/list", DEFAULT_TIMEOUT, self.peer.list_all_resources())
            .await?;
        convert(resources)
    }

    /// Call a tool. `arguments` must be a JSON object or null.
    ///
    /// A tool that fails reports it through `is_error` on an `Ok` result.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            _ => return Err(Error::InvalidArguments),
        };
        let params = CallToolRequestParams {
            name: name.to_string().into(),
            arguments,
            meta: None,
            task: None,
        };
        let result = self
            .request("tools/call", TOOL_CALL_TIMEOUT, self.peer.call_tool(params))
            .await?;
        convert(result)
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        let params: ReadResourceRequestParams = serde_json::from_value(json!({ "uri": uri }))?;
        let result = self
            .request("resources/read", DEFAULT_TIMEOUT, self.peer.read_resource(params))
            .await?;
        convert(result)
    }

    /// Server notifications. Yields `Some` once.
    pub async fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<ServerNotification>> {
        self.notifications.lock().await.take()
    }

    /// Shut the connection down. Later requests fail with [`Error::Closed`].
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let Some(service) = self.service.lock().await.take() else {
            return;
        };
        if let Err(e) = service.cancel().await {
            warn!(server = %self.name, error = %e, "provider service task failed");
        }
        info!(server = %self.name, "provider connection closed");
    }

    async fn request<T>(
        &self,
        method: &str,
        limit: Duration,
        call: impl Future<Output = std::result::Result<T, ServiceError>>,
    ) -> Result<T> {
        if !self.is_connected() {
            return Err(Error::Closed);
        }
        match timeout(limit, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Timeout(method.to_string())),
        }
    }
}

async fn handshake<E: std::fmt::Display>(
    server: &str,
    serving: impl Future<Output = std::result::Result<Service, E>>,
) -> Result<Service> {
    match timeout(DEFAULT_TIMEOUT, serving).await {
        Ok(Ok(service)) => Ok(service),
        Ok(Err(e)) => Err(Error::Connect {
            server: server.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Err(Error::Timeout("initialize".to_string())),
    }
}

/// Re-shape an SDK value into the matching crate payload type.
fn convert<T: Serialize, U: DeserializeOwned>(value: T) -> Result<U> {
    Ok(serde_json::from_value(serde_json::to_value(value)?)?)
}
