//! Per-turn block accumulation.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::{debug, trace};

use super::events::{EventSink, WireEvent};
use crate::model::{BlockKind, CanonicalEvent, ContentBlock, Delta, StopReason};

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// A finished model turn.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Turn {
    pub blocks: Vec<ContentBlock>,
    pub stop_reason: Option<StopReason>,
}

impl Turn {
    /// Tool-use blocks in the order the model emitted them.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug)]
enum OpenBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        json: String,
    },
    Thinking {
        text: String,
        signature: String,
    },
}

/// Folds canonical events into content blocks, forwarding deltas to the
/// caller as they arrive.
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    open: BTreeMap<usize, OpenBlock>,
    blocks: Vec<ContentBlock>,
    stop_reason: Option<StopReason>,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: CanonicalEvent, sink: &EventSink) {
        match event {
            CanonicalEvent::MessageStart | CanonicalEvent::MessageStop => {}
            CanonicalEvent::BlockStart {
                index,
                kind,
                id,
                name,
            } => {
                if self.open.contains_key(&index) {
                    debug!(index, "block restarted before stop; closing previous");
                    self.close(index, sink);
                }
                let block = match kind {
                    BlockKind::Text => OpenBlock::Text(String::new()),
                    BlockKind::ToolUse => {
                        let id = id.unwrap_or_default();
                        let name = name.unwrap_or_default();
                        sink.emit(WireEvent::ToolStart {
                            id: id.clone(),
                            name: name.clone(),
                        });
                        OpenBlock::ToolUse {
                            id,
                            name,
                            json: String::new(),
                        }
                    }
                    BlockKind::Thinking => {
                        sink.emit(WireEvent::ThinkingStart);
                        OpenBlock::Thinking {
                            text: String::new(),
                            signature: String::new(),
                        }
                    }
                };
                self.open.insert(index, block);
            }
            CanonicalEvent::BlockDelta { index, delta } => {
                let Some(block) = self.open.get_mut(&index) else {
                    trace!(index, "delta for unopened block");
                    return;
                };
                match (block, delta) {
                    (OpenBlock::Text(buf), Delta::Text(text)) => {
                        buf.push_str(&text);
                        sink.emit(WireEvent::TextDelta { text });
                    }
                    (OpenBlock::ToolUse { json, .. }, Delta::ToolInput(fragment)) => {
                        json.push_str(&fragment);
                    }
                    (OpenBlock::Thinking { text: buf, .. }, Delta::Thinking(text)) => {
                        buf.push_str(&text);
                        sink.emit(WireEvent::ThinkingDelta { text });
                    }
                    (OpenBlock::Thinking { signature, .. }, Delta::Signature(sig)) => {
                        signature.push_str(&sig);
                    }
                    (_, delta) => trace!(index, ?delta, "delta does not match block kind"),
                }
            }
            CanonicalEvent::BlockStop { index } => self.close(index, sink),
            CanonicalEvent::MessageDelta { stop_reason } => {
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason;
                }
            }
        }
    }

    /// Close anything left open and return the turn.
    pub fn finish(mut self, sink: &EventSink) -> Turn {
        let leftover: Vec<usize> = self.open.keys().copied().collect();
        for index in leftover {
            self.close(index, sink);
        }
        Turn {
            blocks: self.blocks,
            stop_reason: self.stop_reason,
        }
    }

    fn close(&mut self, index: usize, sink: &EventSink) {
        let Some(block) = self.open.remove(&index) else {
            return;
        };
        match block {
            // Providers reject empty text blocks on replay.
            OpenBlock::Text(text) if text.is_empty() => {}
            OpenBlock::Text(text) => self.blocks.push(ContentBlock::Text { text }),
            OpenBlock::ToolUse { id, name, json } => {
                let input = parse_tool_input(&json);
                sink.emit(WireEvent::ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                });
                self.blocks.push(ContentBlock::ToolUse { id, name, input });
            }
            OpenBlock::Thinking { text, signature } => {
                sink.emit(WireEvent::ThinkingEnd);
                self.blocks.push(ContentBlock::Thinking { text, signature });
            }
        }
    }
}

/// Accumulated argument JSON as an object; anything unparsable becomes `{}`.
fn parse_tool_input(json: &str) -> Value {
    match serde_json::from_str::<Value>(json) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) | Err(_) => {
            if !json.trim().is_empty() {
                debug!(json, "malformed tool arguments; using empty input");
            }
            Value::Object(Map::new())
        }
    }
}
