//! Model provider adapters.
//!
//! Each provider implements [`Backend`] for its specific API and normalizes
//! the provider's streaming protocol into [`CanonicalEvent`]s.

mod anthropic;
mod chunks;
mod openai;
mod sse;

pub use anthropic::{AnthropicAuth, AnthropicBackend, AnthropicBackendBuilder, VertexTarget};
pub use chunks::{ChatChunk, ChunkChoice, ChunkDelta, ChunkSynthesizer, FunctionDelta, ToolCallDelta};
pub use openai::{OpenAiBackend, OpenAiBackendBuilder};

use std::collections::VecDeque;

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use sse::{SseDecoder, SseEvent};

use crate::model::{Backend, CanonicalEvent, EventStream, ModelError, ModelRequest};

/// Any configured model provider.
pub enum Provider {
    Anthropic(AnthropicBackend),
    OpenAi(OpenAiBackend),
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic(backend) => write!(f, "{backend}"),
            Self::OpenAi(backend) => write!(f, "{backend}"),
        }
    }
}

impl Backend for Provider {
    async fn stream_turn(&self, request: ModelRequest<'_>) -> Result<EventStream, ModelError> {
        match self {
            Self::Anthropic(backend) => backend.stream_turn(request).await,
            Self::OpenAi(backend) => backend.stream_turn(request).await,
        }
    }
}

/// Per-provider translation of SSE events into canonical events.
pub(crate) trait Translate: Send + 'static {
    fn translate(&mut self, event: SseEvent) -> Result<Vec<CanonicalEvent>, ModelError>;

    /// Called once when the body ends.
    fn finish(&mut self) -> Vec<CanonicalEvent>;
}

struct NormalizeState<T> {
    body: BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    decoder: SseDecoder,
    translator: T,
    queue: VecDeque<CanonicalEvent>,
    finished: bool,
}

/// Turn a streaming HTTP response into a canonical event stream.
pub(crate) fn normalize<T: Translate>(response: reqwest::Response, translator: T) -> EventStream {
    let state = NormalizeState {
        body: response.bytes_stream().boxed(),
        decoder: SseDecoder::new(),
        translator,
        queue: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.queue.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }

            let sse_events = match state.body.next().await {
                Some(Ok(chunk)) => state.decoder.push(&chunk),
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(ModelError::Stream(e.to_string())), state));
                }
                None => {
                    state.finished = true;
                    let trailing: Vec<SseEvent> = state.decoder.finish().into_iter().collect();
                    for event in trailing {
                        match state.translator.translate(event) {
                            Ok(events) => state.queue.extend(events),
                            Err(e) => return Some((Err(e), state)),
                        }
                    }
                    let tail = state.translator.finish();
                    state.queue.extend(tail);
                    continue;
                }
            };

            for event in sse_events {
                match state.translator.translate(event) {
                    Ok(events) => state.queue.extend(events),
                    Err(e) => {
                        state.finished = true;
                        state.queue.clear();
                        return Some((Err(e), state));
                    }
                }
            }
        }
    })
    .boxed()
}

/// Map a non-success HTTP response to a model error.
pub(crate) async fn api_error(response: reqwest::Response) -> ModelError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    ModelError::Api(format!("{status}: {body}"))
}
