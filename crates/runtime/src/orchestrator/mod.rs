//! Tool-use orchestration loop.
//!
//! One [`Orchestrator::run`] drives a conversation to convergence: stream a
//! model turn, forward deltas to the caller, dispatch every requested tool in
//! order, feed the results back, and repeat until the model stops asking for
//! tools or the iteration cap is hit.

mod accumulator;
mod events;

pub use accumulator::{ToolCall, Turn, TurnAccumulator};
pub use events::{EventSink, UiResource, UiToolDef, WireEvent};

use futures::StreamExt;
use mcp::{CallToolResult, ToolContent};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::model::{
    Backend, ContentBlock, Message, ModelError, ModelRequest, Role, StopReason, ToolResultContent,
    ToolSpec,
};
use crate::tools::{ToolDefinition, ToolHost, split_qualified};

/// Model turns allowed per run.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

pub const ITERATION_LIMIT_MESSAGE: &str = "Maximum tool use iterations reached";

/// Input to one run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub system: Option<String>,
}

/// How a run ended. The matching wire event has already been emitted.
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    Done(Option<StopReason>),
    Failed(String),
    IterationLimit,
}

/// Drives model turns and tool dispatch for a single request at a time.
pub struct Orchestrator<B, H> {
    backend: B,
    host: H,
    max_iterations: usize,
}

impl<B: Backend, H: ToolHost> Orchestrator<B, H> {
    pub fn new(backend: B, host: H) -> Self {
        Self {
            backend,
            host,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run the loop, writing wire events to `sink`.
    pub async fn run(&self, request: ChatRequest, sink: &EventSink) -> Termination {
        let ChatRequest {
            mut messages,
            system,
        } = request;
        let catalog = self.host.catalog().await;
        let specs: Vec<ToolSpec> = catalog.iter().map(ToolDefinition::to_spec).collect();
        debug!(tools = specs.len(), history = messages.len(), "starting run");

        for iteration in 1..=self.max_iterations {
            let turn = match self
                .stream_turn(&messages, &specs, system.as_deref(), sink)
                .await
            {
                Ok(turn) => turn,
                Err(e) => {
                    warn!(iteration, error = %e, "model turn failed");
                    let message = e.to_string();
                    sink.emit(WireEvent::Error {
                        message: message.clone(),
                    });
                    return Termination::Failed(message);
                }
            };

            let calls = turn.tool_calls();
            if calls.is_empty() || turn.stop_reason.is_some_and(StopReason::is_terminal) {
                debug!(iteration, stop_reason = ?turn.stop_reason, "run complete");
                sink.emit(WireEvent::Done {
                    stop_reason: turn.stop_reason,
                });
                return Termination::Done(turn.stop_reason);
            }

            messages.push(Message::blocks(Role::Assistant, turn.blocks));

            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.dispatch(call, sink).await);
            }
            messages.push(Message::blocks(Role::User, results));
        }

        warn!(max = self.max_iterations, "iteration limit reached");
        sink.emit(WireEvent::Error {
            message: ITERATION_LIMIT_MESSAGE.to_string(),
        });
        Termination::IterationLimit
    }

    async fn stream_turn(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        system: Option<&str>,
        sink: &EventSink,
    ) -> Result<Turn, ModelError> {
        let mut stream = self
            .backend
            .stream_turn(ModelRequest {
                messages,
                tools,
                system,
            })
            .await?;
        let mut accumulator = TurnAccumulator::new();
        while let Some(event) = stream.next().await {
            accumulator.apply(event?, sink);
        }
        Ok(accumulator.finish(sink))
    }

    /// Execute one call and produce the block fed back to the model.
    async fn dispatch(&self, call: ToolCall, sink: &EventSink) -> ContentBlock {
        let result = match self.host.call_qualified(&call.name, call.input.clone()).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool dispatch failed");
                CallToolResult::error_text(format!("Error: {e}"))
            }
        };
        info!(tool = %call.name, is_error = result.is_error, "tool call finished");

        sink.emit(WireEvent::ToolResult {
            tool_use_id: call.id.clone(),
            content: result.content.clone(),
            is_error: result.is_error,
        });

        // Looked up live: the provider may have changed its tool list mid-run.
        let definition = match split_qualified(&call.name) {
            Some((provider, tool)) => self.host.tool_definition(provider, tool).await,
            None => None,
        };
        if let Some(definition) = definition {
            if let Some(uri) = &definition.ui_resource_uri {
                self.emit_ui_resource(&call, &definition, uri, &result, sink)
                    .await;
            }
        }

        ContentBlock::ToolResult {
            tool_use_id: call.id,
            content: model_content(&result),
            is_error: result.is_error,
        }
    }

    async fn emit_ui_resource(
        &self,
        call: &ToolCall,
        definition: &ToolDefinition,
        uri: &str,
        result: &CallToolResult,
        sink: &EventSink,
    ) {
        let resource = match self.host.read_resource(&definition.provider_id, uri).await {
            Ok(resource) => resource,
            Err(e) => {
                warn!(tool = %call.name, uri, error = %e, "UI resource fetch failed");
                return;
            }
        };
        let html = resource
            .contents
            .into_iter()
            .next()
            .and_then(|c| c.text)
            .unwrap_or_default();

        sink.emit(WireEvent::UiResource(Box::new(UiResource {
            tool_name: call.name.clone(),
            tool_use_id: call.id.clone(),
            tool_input: call.input.clone(),
            resource_uri: uri.to_string(),
            html,
            tool_def: UiToolDef {
                name: definition.local_name.clone(),
                description: definition.description.clone(),
                input_schema: definition.input_schema.clone(),
            },
            tool_result: result.clone(),
            session_id: None,
        })));
    }
}

/// Tool output as the model sees it.
fn model_content(result: &CallToolResult) -> Vec<ToolResultContent> {
    if result.content.is_empty() {
        return vec![ToolResultContent::Text("No output".to_string())];
    }
    result
        .content
        .iter()
        .map(|part| match part {
            ToolContent::Text { text } => ToolResultContent::Text(text.clone()),
            ToolContent::Image { .. } => {
                ToolResultContent::Structured(serde_json::to_value(part).unwrap_or_default())
            }
            other => ToolResultContent::Text(serde_json::to_string(other).unwrap_or_default()),
        })
        .collect()
}
