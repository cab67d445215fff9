//! Model protocol types and backend trait.

pub mod errors;
pub mod types;

pub use errors::ModelError;
pub use types::{
    Backend, BlockKind, CanonicalEvent, ContentBlock, Delta, EventStream, Message,
    MessageContent, ModelRequest, Role, StopReason, ToolResultContent, ToolSpec,
};
