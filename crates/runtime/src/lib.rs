//! Arcana runtime: model streaming, tool orchestration, and the UI bridge.
//!
//! The runtime is organized around these pieces:
//!
//! - **Backend**: a model provider that streams one turn as canonical
//!   events ([`AnthropicBackend`] for segmented SSE, [`OpenAiBackend`] for
//!   chunk-synthesized streams).
//! - **ToolProviderRegistry**: live connections to tool providers, the
//!   merged catalog under `provider__tool` names, and dispatch with a single
//!   reconnect-and-retry.
//! - **Orchestrator**: the model/tool loop, emitting [`WireEvent`]s.
//! - **UiBridge**: JSON-RPC sessions for tool-produced UIs, proxying their
//!   tool calls and injected user messages back into the host.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use runtime::{AnthropicAuth, AnthropicBackend, ChatRequest, EventSink, Message,
//!     Orchestrator, ToolProviderRegistry};
//!
//! # async fn example() -> runtime::Result<()> {
//! let registry = Arc::new(ToolProviderRegistry::new());
//! let backend = AnthropicBackend::builder(
//!     AnthropicAuth::ApiKey("sk-ant-api01-...".into()),
//!     "claude-sonnet-4-20250514",
//! )
//! .build();
//!
//! let orchestrator = Orchestrator::new(backend, Arc::clone(&registry));
//! let (sink, mut events) = EventSink::channel();
//! let request = ChatRequest { messages: vec![Message::user("Hello!")], system: None };
//! tokio::spawn(async move { orchestrator.run(request, &sink).await });
//! while let Some(event) = events.recv().await {
//!     println!("{}: {}", event.name(), event.payload());
//! }
//! # Ok(())
//! # }
//! ```

pub mod bridge;
mod error;
pub mod model;
pub mod orchestrator;
pub mod providers;
pub mod tools;

pub use error::{Error, Result};

// Model types and the backend seam
pub use model::{
    Backend, CanonicalEvent, ContentBlock, Message, ModelError, ModelRequest, Role, StopReason,
    ToolSpec,
};

// Concrete providers
pub use providers::{AnthropicAuth, AnthropicBackend, OpenAiBackend, Provider};

// Tool providers
pub use tools::{ToolDefinition, ToolError, ToolHost, ToolProviderRegistry};

// Orchestration
pub use orchestrator::{ChatRequest, EventSink, Orchestrator, Termination, UiResource, WireEvent};

// UI bridge
pub use bridge::{BridgeError, HostSurface, TurnSlots, UiBridge, UiMount};
