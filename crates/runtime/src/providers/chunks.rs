//! Block synthesis for incremental-chunk providers.
//!
//! OpenAI-style chat completion streams carry bare deltas: text fragments and
//! tool-call fragments keyed by a sparse per-call index, with no block
//! boundaries. [`ChunkSynthesizer`] reconstructs canonical block lifecycles
//! from them.
//!
//! Canonical indices are assigned sequentially as blocks open, so a text
//! block that follows tool calls never collides with a tool-call index.

use indexmap::IndexMap;
use serde::Deserialize;

use crate::model::{BlockKind, CanonicalEvent, Delta, StopReason};

/// One streamed chat-completion chunk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallDelta {
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Finite-state accumulator turning chunks into canonical events.
///
/// State is an open-text flag (the canonical index of the open text block,
/// if any) plus a map from chunk tool-call index to canonical block index.
/// All open blocks are closed exactly once, either on the first
/// `finish_reason` or on [`ChunkSynthesizer::finish`].
#[derive(Debug, Default)]
pub struct ChunkSynthesizer {
    started: bool,
    closed: bool,
    next_index: usize,
    text_block: Option<usize>,
    tool_blocks: IndexMap<usize, usize>,
}

impl ChunkSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk.
    pub fn push(&mut self, chunk: ChatChunk) -> Vec<CanonicalEvent> {
        let mut events = Vec::new();
        if self.closed {
            return events;
        }
        if !self.started {
            self.started = true;
            events.push(CanonicalEvent::MessageStart);
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return events;
        };

        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            let index = match self.text_block {
                Some(index) => index,
                None => {
                    let index = self.allocate();
                    self.text_block = Some(index);
                    events.push(CanonicalEvent::BlockStart {
                        index,
                        kind: BlockKind::Text,
                        id: None,
                        name: None,
                    });
                    index
                }
            };
            events.push(CanonicalEvent::BlockDelta {
                index,
                delta: Delta::Text(text),
            });
        }

        for call in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match call.function {
                Some(f) => (f.name, f.arguments),
                None => (None, None),
            };

            let index = match self.tool_blocks.get(&call.index) {
                Some(&index) => index,
                None => {
                    if let Some(text_index) = self.text_block.take() {
                        events.push(CanonicalEvent::BlockStop { index: text_index });
                    }
                    let index = self.allocate();
                    self.tool_blocks.insert(call.index, index);
                    events.push(CanonicalEvent::BlockStart {
                        index,
                        kind: BlockKind::ToolUse,
                        id: Some(call.id.unwrap_or_default()),
                        name: Some(name.unwrap_or_default()),
                    });
                    index
                }
            };

            if let Some(arguments) = arguments.filter(|a| !a.is_empty()) {
                events.push(CanonicalEvent::BlockDelta {
                    index,
                    delta: Delta::ToolInput(arguments),
                });
            }
        }

        if let Some(reason) = choice.finish_reason {
            self.close_all(&mut events);
            events.push(CanonicalEvent::MessageDelta {
                stop_reason: Some(StopReason::from_finish_reason(&reason)),
            });
            events.push(CanonicalEvent::MessageStop);
        }

        events
    }

    /// End of stream. Closes anything still open if no finish reason arrived.
    pub fn finish(&mut self) -> Vec<CanonicalEvent> {
        let mut events = Vec::new();
        if self.closed || !self.started {
            return events;
        }
        self.close_all(&mut events);
        events.push(CanonicalEvent::MessageStop);
        events
    }

    fn allocate(&mut self) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    fn close_all(&mut self, events: &mut Vec<CanonicalEvent>) {
        if let Some(index) = self.text_block.take() {
            events.push(CanonicalEvent::BlockStop { index });
        }
        for (_, index) in self.tool_blocks.drain(..) {
            events.push(CanonicalEvent::BlockStop { index });
        }
        self.closed = true;
    }
}
